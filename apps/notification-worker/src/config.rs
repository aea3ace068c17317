//! Worker settings, loaded from the environment.

use amqp_worker::AmqpConfig;
use core_config::{env_or_default, ConfigError, FromEnv};

/// Everything the worker needs to come up.
#[derive(Debug, Clone)]
pub struct Settings {
    pub amqp: AmqpConfig,
    /// Mail provider selector, `smtp` or `mock`.
    pub mail_driver: String,
    /// Per-consumer prefetch for the notification queues. Unset leaves
    /// the broker default in place.
    pub prefetch: Option<u16>,
}

impl FromEnv for Settings {
    fn from_env() -> Result<Self, ConfigError> {
        let prefetch = match std::env::var("WORKER_PREFETCH") {
            Ok(raw) => Some(raw.parse().map_err(|e| ConfigError::ParseError {
                key: "WORKER_PREFETCH".to_string(),
                details: format!("{e}"),
            })?),
            Err(_) => None,
        };

        Ok(Self {
            amqp: AmqpConfig::from_env()?,
            mail_driver: env_or_default("MAIL_DRIVER", "smtp"),
            prefetch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        temp_env::with_vars(
            [
                ("MAIL_DRIVER", None::<&str>),
                ("WORKER_PREFETCH", None),
                ("AMQP_HOST", None),
            ],
            || {
                let settings = Settings::from_env().unwrap();
                assert_eq!(settings.mail_driver, "smtp");
                assert_eq!(settings.prefetch, None);
                assert_eq!(settings.amqp.host, "127.0.0.1");
            },
        );
    }

    #[test]
    fn prefetch_is_read_when_present() {
        temp_env::with_var("WORKER_PREFETCH", Some("32"), || {
            let settings = Settings::from_env().unwrap();
            assert_eq!(settings.prefetch, Some(32));
        });
    }

    #[test]
    fn unparseable_prefetch_is_rejected() {
        temp_env::with_var("WORKER_PREFETCH", Some("lots"), || {
            let err = Settings::from_env().unwrap_err();
            assert!(err.to_string().contains("WORKER_PREFETCH"));
        });
    }
}
