//! Loads [`AgentConfig`] from `FLEET_*` environment variables.
//!
//! Each field maps to `FLEET_<FIELD>`, e.g. `FLEET_URL`,
//! `FLEET_SSL_PUBLIC_KEY`, `FLEET_EXCHANGE_INTERVAL_SECS`,
//! `FLEET_ACCOUNTS_BACKEND` (`rpc` or `direct`).

use anyhow::{Context, Result};

use crate::domain::AgentConfig;

pub const ENV_PREFIX: &str = "FLEET_";

/// Read and validate the configuration from the process environment.
pub fn load_config() -> Result<AgentConfig> {
    let config: AgentConfig = envy::prefixed(ENV_PREFIX)
        .from_env()
        .context("failed to load config from FLEET_* env vars")?;
    config.validate()?;
    Ok(config)
}

/// Read and validate the configuration from explicit variables.
pub fn load_config_from<I>(vars: I) -> Result<AgentConfig>
where
    I: IntoIterator<Item = (String, String)>,
{
    let config: AgentConfig = envy::prefixed(ENV_PREFIX)
        .from_iter(vars)
        .context("failed to load config from FLEET_* variables")?;
    config.validate()?;
    Ok(config)
}
