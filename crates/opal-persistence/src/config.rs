use opal_schema::DEFAULT_IDENTITY_PROPERTY;
use opal_types::Identifier;
use serde::{Deserialize, Serialize};

use crate::error::{PersistenceError, PersistenceResult};

/// How identifiers are generated for new entities without a natural
/// identity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierStrategy {
    /// Time-ordered UUIDs.
    #[default]
    UuidV7,
    /// Random UUIDs.
    UuidV4,
}

impl IdentifierStrategy {
    pub fn generate(&self) -> Identifier {
        match self {
            Self::UuidV7 => Identifier::generate(),
            Self::UuidV4 => Identifier::generate_random(),
        }
    }
}

/// Configuration for a [`PersistenceManager`](crate::PersistenceManager).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Property that carries the engine-assigned identifier of entities
    /// without a natural identity.
    pub synthetic_identity_property: String,
    /// When `false`, lazy flags are ignored and everything is mapped
    /// eagerly.
    pub lazy_loading: bool,
    /// Identifier generation for new entities.
    pub identifier_strategy: IdentifierStrategy,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            synthetic_identity_property: DEFAULT_IDENTITY_PROPERTY.to_string(),
            lazy_loading: true,
            identifier_strategy: IdentifierStrategy::UuidV7,
        }
    }
}

impl PersistenceConfig {
    /// Everything is loaded when mapped; no placeholders, no proxies.
    pub fn eager() -> Self {
        Self {
            lazy_loading: false,
            ..Default::default()
        }
    }

    /// Parse a TOML document. Missing keys take their default values.
    pub fn from_toml_str(source: &str) -> PersistenceResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| PersistenceError::Config(e.to_string()))?;
        if config.synthetic_identity_property.trim().is_empty() {
            return Err(PersistenceError::Config(
                "synthetic_identity_property must not be empty".into(),
            ));
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> PersistenceResult<String> {
        toml::to_string(self).map_err(|e| PersistenceError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PersistenceConfig::default();
        assert_eq!(config.synthetic_identity_property, DEFAULT_IDENTITY_PROPERTY);
        assert!(config.lazy_loading);
        assert_eq!(config.identifier_strategy, IdentifierStrategy::UuidV7);
        assert!(!PersistenceConfig::eager().lazy_loading);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PersistenceConfig::from_toml_str(
            r#"
            lazy_loading = false
            identifier_strategy = "uuid_v4"
            "#,
        )
        .unwrap();
        assert!(!config.lazy_loading);
        assert_eq!(config.identifier_strategy, IdentifierStrategy::UuidV4);
        assert_eq!(config.synthetic_identity_property, DEFAULT_IDENTITY_PROPERTY);
    }

    #[test]
    fn toml_round_trip() {
        let config = PersistenceConfig {
            synthetic_identity_property: "oid".into(),
            ..PersistenceConfig::eager()
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(PersistenceConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn rejects_bad_config() {
        assert!(matches!(
            PersistenceConfig::from_toml_str("lazy_loading = \"sometimes\""),
            Err(PersistenceError::Config(_))
        ));
        assert!(PersistenceConfig::from_toml_str("synthetic_identity_property = \" \"").is_err());
    }

    #[test]
    fn strategies_generate_distinct_identifiers() {
        let a = IdentifierStrategy::UuidV7.generate();
        let b = IdentifierStrategy::UuidV4.generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }
}
