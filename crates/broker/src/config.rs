use anyhow::Context;

/// Runtime configuration, loaded from the environment (`.env` included via
/// `dotenvy`). Tokens are intentionally allowed to be empty at load time;
/// [`crate::auth`] turns an empty token into a 500 at request time rather
/// than refusing to start, matching the reference broker.
pub struct BrokerConfig {
    pub db_path: String,
    pub host: String,
    pub port: u16,
    pub worker_token: String,
    pub bot_token: String,
    pub lease_seconds: i64,
}

impl BrokerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let db_path = std::env::var("BROKER_DB").unwrap_or_else(|_| "broker.db".to_string());
        let host = std::env::var("BROKER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("BROKER_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .context("BROKER_PORT must be a valid port number")?;
        let worker_token = std::env::var("WORKER_TOKEN").unwrap_or_default();
        let bot_token = std::env::var("BOT_TOKEN").unwrap_or_default();
        let lease_seconds = std::env::var("LEASE_SECONDS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("LEASE_SECONDS must be an integer")?;

        Ok(Self {
            db_path,
            host,
            port,
            worker_token,
            bot_token,
            lease_seconds,
        })
    }
}
