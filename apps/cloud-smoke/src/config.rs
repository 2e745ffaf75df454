//! Environment-backed runtime configuration for `cloud-smoke`.

use std::{env, error::Error, fmt};

use cloud_core::{ProviderParams, SessionPersistence, StrategyKind};
use cloud_hooks::{HooksConfig, ticket_fetcher};

const DEFAULT_STRATEGY: &str = "custom-ticket";
const DEFAULT_PROVIDER_SCOPE: &str = "snsapi_base";
const DEFAULT_LOGIN_ATTEMPTS: u32 = 3;

/// Runtime configuration used by the smoke binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    /// Backend environment identifier.
    pub endpoint: String,
    /// Selected login strategy.
    pub strategy: StrategyKind,
    /// Ticket handed out by the ticket fetcher for `custom-ticket`.
    pub ticket: Option<String>,
    /// Provider parameters for `provider-based`.
    pub provider: Option<ProviderParams>,
    /// Session persistence passed to the backend.
    pub persistence: SessionPersistence,
    /// Upper bound on login attempts, including the first.
    pub login_attempts: u32,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let endpoint =
            optional_trimmed_env("CLOUD_ENV", &mut lookup).ok_or(ConfigError::Missing {
                key: "CLOUD_ENV",
            })?;

        let strategy_raw = optional_trimmed_env("CLOUD_LOGIN_STRATEGY", &mut lookup)
            .unwrap_or_else(|| DEFAULT_STRATEGY.to_owned());
        let strategy = strategy_raw
            .parse::<StrategyKind>()
            .map_err(|err| ConfigError::InvalidValue {
                key: "CLOUD_LOGIN_STRATEGY",
                value: strategy_raw.clone(),
                reason: err.message,
            })?;

        let ticket = optional_trimmed_env("CLOUD_TICKET", &mut lookup);
        let provider_id = optional_trimmed_env("CLOUD_PROVIDER_ID", &mut lookup);
        let provider_scope = optional_trimmed_env("CLOUD_PROVIDER_SCOPE", &mut lookup)
            .unwrap_or_else(|| DEFAULT_PROVIDER_SCOPE.to_owned());
        let provider = provider_id.map(|provider_id| ProviderParams {
            provider_id,
            scope: provider_scope,
        });

        match strategy {
            StrategyKind::CustomTicket if ticket.is_none() => {
                return Err(ConfigError::Missing {
                    key: "CLOUD_TICKET",
                });
            }
            StrategyKind::Provider if provider.is_none() => {
                return Err(ConfigError::Missing {
                    key: "CLOUD_PROVIDER_ID",
                });
            }
            _ => {}
        }

        let persistence = match optional_trimmed_env("CLOUD_PERSISTENCE", &mut lookup) {
            Some(value) => value
                .parse::<SessionPersistence>()
                .map_err(|reason| ConfigError::InvalidValue {
                    key: "CLOUD_PERSISTENCE",
                    value,
                    reason,
                })?,
            None => SessionPersistence::default(),
        };

        let login_attempts =
            parse_optional_u32("CLOUD_LOGIN_ATTEMPTS", DEFAULT_LOGIN_ATTEMPTS, &mut lookup)?;
        if login_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CLOUD_LOGIN_ATTEMPTS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            endpoint,
            strategy,
            ticket,
            provider,
            persistence,
            login_attempts,
        })
    }

    /// Adapter configuration for the parsed settings.
    pub fn hooks_config(&self) -> HooksConfig {
        let mut config = HooksConfig::new(self.endpoint.clone(), self.strategy.as_str())
            .with_persistence(self.persistence);

        if let Some(ticket) = self.ticket.clone() {
            config = config.with_ticket_fetcher(ticket_fetcher(move || {
                let ticket = ticket.clone();
                async move { Ok(ticket) }
            }));
        }
        if let Some(provider) = self.provider.clone() {
            config = config.with_provider(provider);
        }
        config
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is unset or blank.
    Missing { key: &'static str },
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { key } => write!(f, "missing required {key}"),
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u32<F>(
    key: &'static str,
    default: u32,
    lookup: &mut F,
) -> Result<u32, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .trim()
        .parse::<u32>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<SmokeConfig, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        SmokeConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn parses_custom_ticket_defaults() {
        let cfg = config_from_pairs(&[("CLOUD_ENV", " env-123 "), ("CLOUD_TICKET", "t-1")])
            .expect("config should parse");

        assert_eq!(cfg.endpoint, "env-123");
        assert_eq!(cfg.strategy, StrategyKind::CustomTicket);
        assert_eq!(cfg.ticket.as_deref(), Some("t-1"));
        assert_eq!(cfg.provider, None);
        assert_eq!(cfg.persistence, SessionPersistence::Local);
        assert_eq!(cfg.login_attempts, DEFAULT_LOGIN_ATTEMPTS);
    }

    #[test]
    fn endpoint_is_required() {
        let err = config_from_pairs(&[("CLOUD_ENV", "   "), ("CLOUD_TICKET", "t")])
            .expect_err("blank endpoint should fail");
        assert_eq!(err, ConfigError::Missing { key: "CLOUD_ENV" });
    }

    #[test]
    fn strategy_parameters_are_required_per_strategy() {
        let err = config_from_pairs(&[("CLOUD_ENV", "env")])
            .expect_err("custom-ticket without ticket should fail");
        assert_eq!(err, ConfigError::Missing { key: "CLOUD_TICKET" });

        let err = config_from_pairs(&[("CLOUD_ENV", "env"), ("CLOUD_LOGIN_STRATEGY", "provider")])
            .expect_err("provider without id should fail");
        assert_eq!(
            err,
            ConfigError::Missing {
                key: "CLOUD_PROVIDER_ID"
            }
        );

        let cfg = config_from_pairs(&[("CLOUD_ENV", "env"), ("CLOUD_LOGIN_STRATEGY", "none")])
            .expect("none needs no parameters");
        assert_eq!(cfg.strategy, StrategyKind::None);
    }

    #[test]
    fn parses_provider_with_default_scope() {
        let cfg = config_from_pairs(&[
            ("CLOUD_ENV", "env"),
            ("CLOUD_LOGIN_STRATEGY", "provider-based"),
            ("CLOUD_PROVIDER_ID", "wx-open"),
        ])
        .expect("config should parse");

        assert_eq!(
            cfg.provider,
            Some(ProviderParams {
                provider_id: "wx-open".to_owned(),
                scope: DEFAULT_PROVIDER_SCOPE.to_owned(),
            })
        );
        let hooks = cfg.hooks_config();
        assert_eq!(hooks.strategy, "provider-based");
        assert!(hooks.strategy_params.provider.is_some());
        assert!(hooks.strategy_params.ticket_fetcher.is_none());
    }

    #[test]
    fn rejects_unknown_strategy_and_persistence() {
        let err = config_from_pairs(&[("CLOUD_ENV", "env"), ("CLOUD_LOGIN_STRATEGY", "sms")])
            .expect_err("unknown strategy should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "CLOUD_LOGIN_STRATEGY",
                ..
            }
        ));

        let err = config_from_pairs(&[
            ("CLOUD_ENV", "env"),
            ("CLOUD_TICKET", "t"),
            ("CLOUD_PERSISTENCE", "forever"),
        ])
        .expect_err("unknown persistence should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "CLOUD_PERSISTENCE",
                ..
            }
        ));
    }

    #[test]
    fn rejects_invalid_login_attempts() {
        for raw in ["0", "many"] {
            let err = config_from_pairs(&[
                ("CLOUD_ENV", "env"),
                ("CLOUD_TICKET", "t"),
                ("CLOUD_LOGIN_ATTEMPTS", raw),
            ])
            .expect_err("invalid attempts should fail");
            assert!(matches!(
                err,
                ConfigError::InvalidValue {
                    key: "CLOUD_LOGIN_ATTEMPTS",
                    ..
                }
            ));
        }
    }
}
