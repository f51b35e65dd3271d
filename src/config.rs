use camino::Utf8Path;
use config::{Config, ConfigError};

pub use huesync_api::config::*;

use crate::error::{ApiError, ApiResult};

pub fn parse(filename: &Utf8Path) -> Result<AppConfig, ConfigError> {
    let settings = Config::builder()
        .set_default("huesync.request_timeout_secs", 10)?
        .add_source(config::File::with_name(filename.as_str()))
        .build()?;

    settings.try_deserialize()
}

/// The application key for a bridge, either inline or from the environment.
pub fn resolve_token(name: &str, server: &BridgeServer) -> ApiResult<String> {
    if let Some(token) = &server.token {
        return Ok(token.clone());
    }

    let Some(var) = &server.token_env else {
        return Err(ApiError::service_error(format!(
            "[{name}] Neither token nor token_env is configured"
        )));
    };

    std::env::var(var).map_err(|_| {
        ApiError::service_error(format!("[{name}] Environment variable {var} is not set"))
    })
}
