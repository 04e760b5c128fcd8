//! Configuration loading from disk and environment.
//!
//! Order: TOML file → `APP_*` environment overrides → semantic validation.
//! Overrides are applied to the raw table, so an override can also supply a
//! required key the file leaves out.

use std::fs;
use std::path::Path;

use toml::{Table, Value};

use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::schema::ContractMode;

/// Environment variables that override file settings: (variable, section, key).
pub const ENV_OVERRIDES: &[(&str, &str, &str)] = &[
    ("APP_BIND_ADDRESS", "listener", "bind_address"),
    ("APP_DATABASE_URL", "database", "url"),
    ("APP_OUTPUT_CONTRACT", "validation", "output_contract"),
    ("APP_LOG_LEVEL", "observability", "log_level"),
];

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Env { var: String, message: String },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Env { var, message } => write!(f, "Invalid {}: {}", var, message),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file plus the process environment.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content, |var| std::env::var(var).ok())
}

/// Parse TOML text, apply overrides from `lookup`, and validate.
pub fn parse_config(
    content: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<AppConfig, ConfigError> {
    let mut table: Table = toml::from_str(content).map_err(ConfigError::Parse)?;
    apply_env_overrides(&mut table, lookup)?;

    let config: AppConfig = Value::Table(table)
        .try_into()
        .map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn apply_env_overrides(
    table: &mut Table,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    for (var, section, key) in ENV_OVERRIDES {
        let Some(value) = lookup(var) else {
            continue;
        };

        let value = if *var == "APP_OUTPUT_CONTRACT" {
            let mode: ContractMode = value.parse().map_err(|message| ConfigError::Env {
                var: var.to_string(),
                message,
            })?;
            mode.as_str().to_string()
        } else {
            value
        };

        let entry = table
            .entry(section.to_string())
            .or_insert(Value::Table(Table::new()));
        let Value::Table(section_table) = entry else {
            return Err(ConfigError::Env {
                var: var.to_string(),
                message: format!("[{}] is not a table in the config file", section),
            });
        };
        section_table.insert(key.to_string(), Value::String(value));
        tracing::debug!(var, section, key, "Applied environment override");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    const MINIMAL: &str = r#"
        [validation]
        output_contract = "strict"
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL, env(&[])).unwrap();
        assert_eq!(config.validation.output_contract, ContractMode::Strict);
        assert_eq!(config.service.prefix, "/api");
        assert_eq!(config.database.max_connections, 10);
        assert!(!config.lifecycle.shutdown_endpoint);
    }

    #[test]
    fn output_contract_is_required() {
        let err = parse_config("[listener]\nbind_address = \"127.0.0.1:9000\"\n", env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("validation"));
    }

    #[test]
    fn env_overrides_win_and_can_supply_contract() {
        let config = parse_config(
            "[database]\nurl = \"postgres://file/db\"\n",
            env(&[
                ("APP_OUTPUT_CONTRACT", "Lenient"),
                ("APP_DATABASE_URL", "postgres://env/db"),
                ("APP_BIND_ADDRESS", "127.0.0.1:9999"),
            ]),
        )
        .unwrap();
        assert_eq!(config.validation.output_contract, ContractMode::Lenient);
        assert_eq!(config.database.url, "postgres://env/db");
        assert_eq!(config.listener.bind_address, "127.0.0.1:9999");
    }

    #[test]
    fn bad_contract_override_is_rejected() {
        let err = parse_config(MINIMAL, env(&[("APP_OUTPUT_CONTRACT", "loose")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref var, .. } if var == "APP_OUTPUT_CONTRACT"));
    }

    #[test]
    fn semantic_errors_are_listed() {
        let content = format!("{}\n[database]\nmax_connections = 0\n[timeouts]\nrequest_secs = 0\n", MINIMAL);
        let err = parse_config(&content, env(&[])).unwrap_err();
        let ConfigError::Validation(errors) = &err else {
            panic!("expected validation error, got {err}");
        };
        assert_eq!(errors.len(), 2);
        assert!(err.to_string().contains("database.max_connections"));
        assert!(err.to_string().contains("timeouts.request_secs"));
    }
}
