use std::sync::Arc;

use location_provider::LocationServer;
use location_provider_mock::{MockLocationServer, MOCK_PROVIDER_ID};

pub const DEFAULT_PROVIDER_ID: &str = MOCK_PROVIDER_ID;
pub const PROVIDER_ENV_VAR: &str = "POSITION_PROBE_PROVIDER";

pub fn provider_from_env() -> Result<Arc<dyn LocationServer>, String> {
    let provider_id = std::env::var(PROVIDER_ENV_VAR)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    provider_for_id(provider_id.as_deref().unwrap_or(DEFAULT_PROVIDER_ID))
}

pub fn provider_for_id(provider_id: &str) -> Result<Arc<dyn LocationServer>, String> {
    match provider_id {
        DEFAULT_PROVIDER_ID => Ok(Arc::new(MockLocationServer::demo())),
        unknown => Err(format!(
            "Unsupported provider '{unknown}'. Available providers: {DEFAULT_PROVIDER_ID}"
        )),
    }
}
