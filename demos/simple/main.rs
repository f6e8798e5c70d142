use ofrep::{EvaluationContext, ProviderConfig};
use open_feature::OpenFeature;

#[tokio::main]
pub async fn main() -> ofrep::Result<()> {
    env_logger::init();

    let endpoint =
        std::env::var("OFREP_ENDPOINT").unwrap_or_else(|_| "http://localhost:8016".to_owned());
    let provider = ProviderConfig::new(endpoint).to_provider()?;

    let context = EvaluationContext::new()
        .with_targeting_key("test-subject")
        .with_field("country", "NL");

    // Resolution never fails. On error, the default value is returned.
    let resolution = provider
        .resolve_bool_value("a-boolean-flag", false, Some(&context))
        .await;

    println!("Resolution: {:?}", resolution);

    // The same flag through the OpenFeature SDK.
    OpenFeature::singleton_mut()
        .await
        .set_provider(provider.clone())
        .await;
    let client = OpenFeature::singleton().await.create_client();
    let sdk_context = open_feature::EvaluationContext::default()
        .with_targeting_key("test-subject")
        .with_custom_field("country", "NL");
    let value = client
        .get_bool_value("a-boolean-flag", Some(&sdk_context), None)
        .await
        .unwrap_or(false);

    println!("OpenFeature value: {value}");

    println!("Press Ctrl-C to exit.");
    provider.run(tokio::signal::ctrl_c()).await
}
