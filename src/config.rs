use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::{BotError, BotResult};
use crate::session::{clamp_volume, DEFAULT_IDLE_TIMEOUT, DEFAULT_VOLUME};

const DEFAULT_PREFIX: &str = "!";
const DEFAULT_EXTERNAL_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct CatalogCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub prefix: String,
    pub catalog: Option<CatalogCredentials>,
    pub idle_timeout: Duration,
    pub external_timeout: Duration,
    pub default_volume: u8,
}

impl Config {
    pub fn from_env() -> BotResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> BotResult<Self> {
        let get = |key: &str| lookup(key).map(|value| value.trim().to_string()).filter(|value| !value.is_empty());

        let discord_token = get("DISCORD_TOKEN")
            .ok_or_else(|| BotError::Configuration("Expected DISCORD_TOKEN in the environment".to_string()))?;

        let catalog = match (get("SPOTIFY_CLIENT_ID"), get("SPOTIFY_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(CatalogCredentials {
                client_id,
                client_secret,
            }),
            _ => {
                info!("Catalog credentials not set, catalog links are disabled");
                None
            }
        };

        let idle_timeout = parse_or::<u64>(get("IDLE_TIMEOUT_SECS"), "IDLE_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_IDLE_TIMEOUT);

        let external_timeout = parse_or::<u64>(get("EXTERNAL_TIMEOUT_SECS"), "EXTERNAL_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_EXTERNAL_TIMEOUT);

        let default_volume = parse_or::<i64>(get("DEFAULT_VOLUME"), "DEFAULT_VOLUME")?
            .map(clamp_volume)
            .unwrap_or(DEFAULT_VOLUME);

        Ok(Self {
            discord_token,
            prefix: get("COMMAND_PREFIX").unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            catalog,
            idle_timeout,
            external_timeout,
            default_volume,
        })
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str) -> BotResult<Option<T>> {
    value
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| BotError::Configuration(format!("{key} must be a number, got `{raw}`")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> BotResult<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_with_only_a_token() {
        let config = config(&[("DISCORD_TOKEN", "abc")]).unwrap();

        assert_eq!(config.prefix, "!");
        assert!(config.catalog.is_none());
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.default_volume, 100);
    }

    #[test]
    fn token_is_required() {
        assert!(matches!(config(&[]), Err(BotError::Configuration(_))));
        assert!(matches!(config(&[("DISCORD_TOKEN", "  ")]), Err(BotError::Configuration(_))));
    }

    #[test]
    fn catalog_needs_both_credentials() {
        let partial = config(&[("DISCORD_TOKEN", "abc"), ("SPOTIFY_CLIENT_ID", "id")]).unwrap();
        assert!(partial.catalog.is_none());

        let full = config(&[
            ("DISCORD_TOKEN", "abc"),
            ("SPOTIFY_CLIENT_ID", "id"),
            ("SPOTIFY_CLIENT_SECRET", "secret"),
        ])
        .unwrap();
        assert_eq!(full.catalog.map(|c| c.client_id).as_deref(), Some("id"));
    }

    #[test]
    fn numbers_are_validated_and_volume_clamped() {
        assert!(matches!(
            config(&[("DISCORD_TOKEN", "abc"), ("IDLE_TIMEOUT_SECS", "soon")]),
            Err(BotError::Configuration(_))
        ));

        let config = config(&[
            ("DISCORD_TOKEN", "abc"),
            ("IDLE_TIMEOUT_SECS", "60"),
            ("DEFAULT_VOLUME", "400"),
        ])
        .unwrap();

        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.default_volume, 150);
    }
}
