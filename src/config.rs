use std::{sync::Arc, time::Duration};

use http::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::{client::OfrepClient, transport::ReqwestTransport, Error, OfrepProvider, Result};

/// Configuration for [`OfrepProvider`].
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    base_url: String,
    timeout: Duration,
    headers: Vec<(String, String)>,
    http_client: Option<reqwest::Client>,
}

impl ProviderConfig {
    /// Default timeout of a single request.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a default configuration for the OFREP server at `base_url`.
    ///
    /// ```
    /// # use ofrep::ProviderConfig;
    /// ProviderConfig::new("http://localhost:8016");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        ProviderConfig {
            base_url: base_url.into(),
            timeout: ProviderConfig::DEFAULT_TIMEOUT,
            headers: Vec::new(),
            http_client: None,
        }
    }

    /// Override the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a header to send with every request.
    ///
    /// ```
    /// # use ofrep::ProviderConfig;
    /// let config = ProviderConfig::new("http://localhost:8016")
    ///     .header("X-Api-Key", "secret");
    /// ```
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Authenticate with a bearer token.
    pub fn bearer_token(self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        self.header(http::header::AUTHORIZATION.as_str(), value)
    }

    /// Share an existing HTTP client with the provider.
    ///
    /// The provider never shuts down a shared client.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Create a new [`OfrepProvider`] using the specified configuration.
    ///
    /// ```
    /// # use ofrep::{OfrepProvider, ProviderConfig};
    /// let provider: OfrepProvider = ProviderConfig::new("http://localhost:8016")
    ///     .to_provider()
    ///     .unwrap();
    /// ```
    pub fn to_provider(self) -> Result<OfrepProvider> {
        let base_url = Url::parse(&self.base_url).map_err(Error::InvalidBaseUrl)?;
        let headers = self.header_map()?;

        let transport = match self.http_client {
            Some(client) => ReqwestTransport::with_client(client, Some(self.timeout)),
            None => ReqwestTransport::new(Some(self.timeout))?,
        };

        let client = OfrepClient::new(base_url, Arc::new(transport))?.with_headers(headers);
        Ok(OfrepProvider::from_client(client))
    }

    fn header_map(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::try_from(name.as_str()).map_err(http::Error::from)?;
            let value = HeaderValue::try_from(value.as_str()).map_err(http::Error::from)?;
            headers.append(name, value);
        }
        Ok(headers)
    }
}
