//! A Rust client for the OpenFeature Remote Evaluation Protocol (OFREP).
//!
//! # Overview
//!
//! The crate revolves around an [`OfrepProvider`] that asks a remote flag evaluation server for
//! feature flag values. Each evaluation sends an [`EvaluationContext`] (an optional targeting key
//! plus custom fields) and results in a [`FlagResolution`] holding a value of the requested type,
//! along with the reason, variant, and flag metadata reported by the server.
//!
//! [`OfrepProvider`] implements the OpenFeature SDK's
//! [`FeatureProvider`](open_feature::provider::FeatureProvider) trait, so it can also be
//! registered with [`OpenFeature`](open_feature::OpenFeature) and used through an SDK client.
//!
//! Flag targeting happens on the server. The provider holds no flag state of its own: every
//! evaluation is a fresh request.
//!
//! # Error Handling
//!
//! Flag resolution never fails. When the server cannot be reached, the flag does not exist, or the
//! flag holds a value of a different type, the resolution carries the caller's default value and a
//! [`ResolutionError`] describing the problem.
//!
//! Errors that occur before any resolution can be made (e.g., an invalid base URL) are represented
//! by the [`Error`] enum.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages. Consider integrating a `log`-compatible logger implementation for better visibility
//! into provider operations.
//!
//! # Examples
//!
//! Examples can be found in the `demos` directory of the `ofrep` crate repository.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod client;
mod config;
mod context;
mod error;
mod feature_provider;
mod provider;
pub mod resolution;
pub mod schema;
mod transport;

#[cfg(test)]
mod test_utils;

pub use client::OfrepClient;
pub use config::ProviderConfig;
pub use context::{ContextError, EvaluationContext, FieldValue, Fields, ObjectValue};
pub use error::{Error, Result, TransportError};
pub use open_feature::provider::ProviderMetadata;
pub use provider::{OfrepProvider, PROVIDER_NAME};
pub use resolution::{ErrorCode, FlagResolution, Reason, ResolutionError, StructValue};
pub use transport::{ReqwestTransport, Transport};
