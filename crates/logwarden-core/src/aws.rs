//! Shared AWS SDK configuration

use aws_config::{BehaviorVersion, Region, SdkConfig};
use tracing::info;

/// Load the SDK config from the default provider chain.
///
/// `region` overrides whatever the environment or profile selects.
pub async fn sdk_config(region: Option<&str>) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = region {
        loader = loader.region(Region::new(region.to_string()));
    }
    let config = loader.load().await;

    info!(region = ?config.region(), "AWS SDK config loaded");
    config
}
