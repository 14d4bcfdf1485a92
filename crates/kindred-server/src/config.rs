use anyhow::{Context, Result, bail};

use kindred_gateway::pusher::PusherConfig;

/// Secrets that ship in examples and must never reach a running server.
const PLACEHOLDER_SECRETS: &[&str] = &["", "secret", "changeme", "change-me", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub enum FanoutMode {
    /// Built-in WebSocket gateway at `/gateway`.
    Gateway,
    /// Publish through a Pusher Channels compatible HTTP API.
    Pusher(PusherConfig),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub jwt_secret: String,
    pub fanout: FanoutMode,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source. `from_env` passes the process env.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = get("KINDRED_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("KINDRED_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("KINDRED_PORT must be a port number")?;
        let db_path = get("KINDRED_DB_PATH").unwrap_or_else(|| "kindred.db".into());

        let jwt_secret = get("KINDRED_JWT_SECRET").context("KINDRED_JWT_SECRET is not set")?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) {
            bail!("KINDRED_JWT_SECRET is a placeholder; set it to the identity provider's signing secret");
        }

        let fanout = match get("KINDRED_FANOUT").as_deref().unwrap_or("gateway") {
            "gateway" => FanoutMode::Gateway,
            "pusher" => {
                let required = |key: &str| get(key).with_context(|| format!("{key} is required for KINDRED_FANOUT=pusher"));
                FanoutMode::Pusher(PusherConfig {
                    app_id: required("PUSHER_APP_ID")?,
                    key: required("PUSHER_KEY")?,
                    secret: required("PUSHER_SECRET")?,
                    cluster: required("PUSHER_CLUSTER")?,
                })
            }
            other => bail!("Unknown KINDRED_FANOUT '{}' (expected gateway or pusher)", other),
        };

        Ok(Self {
            host,
            port,
            db_path,
            jwt_secret,
            fanout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[("KINDRED_JWT_SECRET", "a-real-secret")]).unwrap();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.db_path, "kindred.db");
        assert!(matches!(cfg.fanout, FanoutMode::Gateway));
    }

    #[test]
    fn refuses_missing_or_placeholder_secret() {
        assert!(config(&[]).is_err());
        assert!(config(&[("KINDRED_JWT_SECRET", "dev-secret-change-me")]).is_err());
        assert!(config(&[("KINDRED_JWT_SECRET", "  ")]).is_err());
    }

    #[test]
    fn pusher_needs_credentials() {
        let base = [("KINDRED_JWT_SECRET", "s"), ("KINDRED_FANOUT", "pusher")];
        let err = config(&base).unwrap_err();
        assert!(err.to_string().contains("PUSHER_APP_ID"));

        let cfg = config(&[
            base[0],
            base[1],
            ("PUSHER_APP_ID", "1"),
            ("PUSHER_KEY", "k"),
            ("PUSHER_SECRET", "x"),
            ("PUSHER_CLUSTER", "eu"),
        ])
        .unwrap();
        match cfg.fanout {
            FanoutMode::Pusher(p) => assert_eq!(p.cluster, "eu"),
            other => panic!("unexpected {other:?}"),
        }

        assert!(config(&[base[0], ("KINDRED_FANOUT", "carrier-pigeon")]).is_err());
    }
}
