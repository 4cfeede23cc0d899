use thiserror::Error;

use crate::ids::{ComponentId, SkillId};

/// Configuration faults. Always fatal, never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("unsupported exception policy: '{0}'")]
    UnsupportedExceptionPolicy(String),

    #[error("invalid skill id '{0}': expected 'author/name'")]
    InvalidSkillId(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors from component registration.
///
/// During runtime absorption these are logged and skipped; during agent
/// construction they abort the build.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("skill '{0}' is already registered")]
    SkillAlreadyRegistered(SkillId),

    #[error("skill '{0}' is not registered")]
    SkillNotFound(SkillId),

    #[error("component '{0}' is already registered")]
    ComponentAlreadyRegistered(ComponentId),

    #[error("a handler for protocol '{protocol}' is already registered in skill '{skill}'")]
    HandlerAlreadyRegistered { protocol: String, skill: SkillId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_policy_display_names_value() {
        let err = ConfigError::UnsupportedExceptionPolicy("explode".to_string());
        assert_eq!(err.to_string(), "unsupported exception policy: 'explode'");
    }

    #[test]
    fn handler_conflict_display() {
        let err = RegistryError::HandlerAlreadyRegistered {
            protocol: "fipa".to_string(),
            skill: "acme/echo".parse().unwrap(),
        };
        assert!(err.to_string().contains("fipa"));
        assert!(err.to_string().contains("acme/echo"));
    }
}
