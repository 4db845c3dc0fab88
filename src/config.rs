use serde::Deserialize;

use crate::errors::Result;
use crate::objects::S3Config;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

#[derive(Clone, Deserialize)]
pub struct Config {
    pub listen_addr: String,
    pub s3: S3Config,
}

impl Config {
    /// Assemble runtime configuration from the environment.
    pub fn from_env() -> Result<Config> {
        Ok(Config {
            listen_addr: std::env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string()),
            s3: S3Config::from_env()?,
        })
    }
}
