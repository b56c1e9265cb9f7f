//! Configuration management for RowGuard
//!
//! Settings are resolved once at process start from a file and/or
//! environment variables. Nothing here is re-read at runtime.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ConfigError, Error, Result};
use crate::types::{NullHandling, PolicyMode, Value};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "ROWGUARD_";

/// Main configuration structure for RowGuard
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Interception policy
    #[serde(default)]
    pub policy: PolicySettings,

    /// Pipeline execution
    #[serde(default)]
    pub executor: ExecutorSettings,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML/YAML/JSON file
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Read(format!("{}: {}", path.display(), e)))?;

        Self::parse(&content, path.extension().and_then(|ext| ext.to_str()))
    }

    /// Parse configuration text; the extension selects the format
    pub fn parse(content: &str, extension: Option<&str>) -> Result<Self> {
        let config = match extension {
            Some("toml") => toml::from_str(content)
                .map_err(|e| ConfigError::Parse(format!("TOML: {}", e)))?,
            Some("yaml" | "yml") => serde_yaml::from_str(content)
                .map_err(|e| ConfigError::Parse(format!("YAML: {}", e)))?,
            _ => serde_json::from_str(content)
                .map_err(|e| ConfigError::Parse(format!("JSON: {}", e)))?,
        };

        Ok(config)
    }

    /// Apply `ROWGUARD_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let policy = &mut self.policy;

        if let Some(v) = get("RELATION_ID") {
            policy.relation_id = parse_override("RELATION_ID", &v)?;
        }
        if let Some(v) = get("COLUMN_NO") {
            policy.column_no = parse_override("COLUMN_NO", &v)?;
        }
        if let Some(v) = get("MODE") {
            policy.mode = match v.to_ascii_lowercase().as_str() {
                "abort" => PolicyMode::Abort,
                "perturb" => PolicyMode::Perturb,
                _ => return Err(invalid_override("MODE", &v)),
            };
        }
        if let Some(v) = get("ABORT_STATEMENT_ONLY") {
            policy.abort_statement_only = match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => true,
                "0" | "false" | "off" | "no" => false,
                _ => return Err(invalid_override("ABORT_STATEMENT_ONLY", &v)),
            };
        }
        if let Some(v) = get("SENTINEL") {
            // Bare words are taken as text sentinels
            let value = serde_json::from_str::<Value>(&v).unwrap_or(Value::Text(v));
            policy.sentinel = Some(value);
        }
        if let Some(v) = get("NULL_HANDLING") {
            policy.null_handling = match v.to_ascii_lowercase().as_str() {
                "skip" => NullHandling::Skip,
                "zero" => NullHandling::Zero,
                "error" => NullHandling::Error,
                _ => return Err(invalid_override("NULL_HANDLING", &v)),
            };
        }
        if let Some(v) = get("NOISE_SEED") {
            policy.noise_seed = Some(parse_override("NOISE_SEED", &v)?);
        }

        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid_override(key, value))
}

fn invalid_override(key: &str, value: &str) -> Error {
    Error::Config(ConfigError::InvalidOverride {
        key: format!("{ENV_PREFIX}{key}"),
        value: value.to_string(),
    })
}

/// Raw policy settings as read from the configuration source.
///
/// Validation happens when the executor builds its `PolicyConfig`;
/// these values are kept as read so errors can name what was supplied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicySettings {
    /// Relation id of the protected table (0 = no table selected)
    #[serde(default)]
    pub relation_id: i64,
    /// 1-based column position inside the relation (0 = none)
    #[serde(default)]
    pub column_no: i64,
    /// Abort on sentinel or perturb values
    #[serde(default)]
    pub mode: PolicyMode,
    /// Abort only the statement instead of the session
    #[serde(default)]
    pub abort_statement_only: bool,
    /// Value that signals a violation in abort mode
    #[serde(default)]
    pub sentinel: Option<Value>,
    /// Null handling in perturb mode
    #[serde(default)]
    pub null_handling: NullHandling,
    /// Fixed noise seed; wall-clock seeding per run when unset
    #[serde(default)]
    pub noise_seed: Option<u64>,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            relation_id: 0,
            column_no: 0,
            mode: PolicyMode::default(),
            abort_statement_only: false,
            sentinel: None,
            null_handling: NullHandling::default(),
            noise_seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Let the upstream fan out across workers when no row limit is set
    pub allow_parallel: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            allow_parallel: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive
    pub level: String,
    /// Output format ("text" or "json")
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_inert() {
        let config = Config::default();
        assert_eq!(config.policy.relation_id, 0);
        assert_eq!(config.policy.column_no, 0);
        assert_eq!(config.policy.mode, PolicyMode::Abort);
        assert!(!config.policy.abort_statement_only);
        assert!(config.policy.sentinel.is_none());
        assert!(config.executor.allow_parallel);
    }

    #[test]
    fn test_parse_toml() {
        let config = Config::parse(
            r#"
            [policy]
            relation_id = 100
            column_no = 2
            mode = "perturb"
            null_handling = "zero"
            noise_seed = 7
            "#,
            Some("toml"),
        )
        .unwrap();

        assert_eq!(config.policy.relation_id, 100);
        assert_eq!(config.policy.column_no, 2);
        assert_eq!(config.policy.mode, PolicyMode::Perturb);
        assert_eq!(config.policy.null_handling, NullHandling::Zero);
        assert_eq!(config.policy.noise_seed, Some(7));
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_parse_yaml_and_json() {
        let yaml = Config::parse(
            "policy:\n  relation_id: 100\n  column_no: 2\n  sentinel: -1\n  abort_statement_only: true\n",
            Some("yaml"),
        )
        .unwrap();
        assert_eq!(yaml.policy.sentinel, Some(Value::Int32(-1)));
        assert!(yaml.policy.abort_statement_only);

        let json = Config::parse(
            r#"{"policy":{"relation_id":100,"column_no":2,"sentinel":-1,"abort_statement_only":true}}"#,
            None,
        )
        .unwrap();
        assert_eq!(json.policy, yaml.policy);
    }

    #[test]
    fn test_parse_error() {
        let err = Config::parse("[policy\n", Some("toml")).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Parse(_))));
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                ("ROWGUARD_RELATION_ID", "100"),
                ("ROWGUARD_COLUMN_NO", " 2 "),
                ("ROWGUARD_MODE", "PERTURB"),
                ("ROWGUARD_ABORT_STATEMENT_ONLY", "on"),
                ("ROWGUARD_SENTINEL", "canary"),
                ("ROWGUARD_NOISE_SEED", "42"),
            ]))
            .unwrap();

        assert_eq!(config.policy.relation_id, 100);
        assert_eq!(config.policy.column_no, 2);
        assert_eq!(config.policy.mode, PolicyMode::Perturb);
        assert!(config.policy.abort_statement_only);
        assert_eq!(config.policy.sentinel, Some(Value::Text("canary".into())));
        assert_eq!(config.policy.noise_seed, Some(42));
    }

    #[test]
    fn test_numeric_sentinel_override() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[("ROWGUARD_SENTINEL", "-1")]))
            .unwrap();
        assert_eq!(config.policy.sentinel, Some(Value::Int32(-1)));
    }

    #[rstest]
    #[case("ROWGUARD_RELATION_ID", "-")]
    #[case("ROWGUARD_COLUMN_NO", "two")]
    #[case("ROWGUARD_MODE", "mask")]
    #[case("ROWGUARD_ABORT_STATEMENT_ONLY", "maybe")]
    #[case("ROWGUARD_NULL_HANDLING", "ignore")]
    #[case("ROWGUARD_NOISE_SEED", "-3")]
    fn test_invalid_override(#[case] name: &str, #[case] value: &str) {
        let mut config = Config::default();
        let err = config
            .apply_overrides(lookup(&[(name, value)]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InvalidOverride { ref key, .. }) if key == name
        ));
        assert_eq!(config.policy, PolicySettings::default());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rowguard.toml");
        std::fs::write(&path, "[policy]\nrelation_id = 5\ncolumn_no = 1\n").unwrap();

        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.policy.relation_id, 5);

        let missing = Config::load(dir.path().join("missing.toml")).await;
        assert!(matches!(missing, Err(Error::Config(ConfigError::Read(_)))));
    }
}
