//! Agent configuration loading.
//!
//! A missing file yields defaults. Anything else that goes wrong (an
//! unreadable file, bad TOML, an unknown exception policy, values that fail
//! validation) is a configuration fault and is returned as an error.

use std::path::Path;
use std::str::FromStr;

use kairos_types::{AgentConfig, ConfigError, ExceptionPolicy};
use tracing::debug;

/// Load `AgentConfig` from a TOML file.
pub async fn load_agent_config(path: &Path) -> Result<AgentConfig, ConfigError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no agent config file, using defaults");
            return Ok(AgentConfig::default());
        }
        Err(e) => return Err(e.into()),
    };
    parse_agent_config(&content)
}

/// Parse and validate `AgentConfig` from TOML text.
pub fn parse_agent_config(content: &str) -> Result<AgentConfig, ConfigError> {
    let value: toml::Value = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

    // Surface an unknown policy as such instead of a generic parse error.
    if let Some(policy) = value.get("exception_policy") {
        match policy.as_str() {
            Some(s) => {
                ExceptionPolicy::from_str(s)?;
            }
            None => {
                return Err(ConfigError::UnsupportedExceptionPolicy(policy.to_string()));
            }
        }
    }

    let config: AgentConfig = value.try_into().map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
