//! Skill and component identifiers.
//!
//! A skill is addressed as `author/name`. Components (behaviours and
//! handlers) are addressed by their owning skill plus a component name.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Identifier of a skill, in `author/name` form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SkillId {
    author: String,
    name: String,
}

impl SkillId {
    /// Build a skill id from its parts, validating both.
    pub fn new(author: impl Into<String>, name: impl Into<String>) -> Result<Self, ConfigError> {
        let author = author.into();
        let name = name.into();
        if !is_valid_part(&author) || !is_valid_part(&name) {
            return Err(ConfigError::InvalidSkillId(format!("{author}/{name}")));
        }
        Ok(Self { author, name })
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn is_valid_part(part: &str) -> bool {
    !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl FromStr for SkillId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (author, name) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| ConfigError::InvalidSkillId(s.to_string()))?;
        Self::new(author, name).map_err(|_| ConfigError::InvalidSkillId(s.to_string()))
    }
}

impl TryFrom<String> for SkillId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SkillId> for String {
    fn from(id: SkillId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for SkillId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.author, self.name)
    }
}

/// Identifier of a behaviour or handler: owning skill plus component name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentId {
    pub skill: SkillId,
    pub name: String,
}

impl ComponentId {
    pub fn new(skill: SkillId, name: impl Into<String>) -> Self {
        Self {
            skill,
            name: name.into(),
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.skill, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_skill_id() {
        let id: SkillId = "fetchai/echo_skill".parse().unwrap();
        assert_eq!(id.author(), "fetchai");
        assert_eq!(id.name(), "echo_skill");
        assert_eq!(id.to_string(), "fetchai/echo_skill");
    }

    #[test]
    fn parse_rejects_missing_separator() {
        let err = "echo".parse::<SkillId>().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSkillId(ref s) if s == "echo"));
    }

    #[test]
    fn parse_rejects_empty_or_bad_parts() {
        assert!("/echo".parse::<SkillId>().is_err());
        assert!("acme/".parse::<SkillId>().is_err());
        assert!("acme/ec ho".parse::<SkillId>().is_err());
        assert!("a/b/c".parse::<SkillId>().is_err());
    }

    #[test]
    fn skill_id_serializes_as_string() {
        let id: SkillId = "acme/echo".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"acme/echo\"");
        let back: SkillId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<SkillId>("\"nope\"").is_err());
    }

    #[test]
    fn component_id_display() {
        let id = ComponentId::new("acme/echo".parse().unwrap(), "ticker");
        assert_eq!(id.to_string(), "acme/echo:ticker");
    }
}
