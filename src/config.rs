//! Server configuration loaded from environment variables.
//!
//! - `PORT` - Listen port (default: 3001)
//! - `APP_DATA_PATH` - Directory for stored collections (default: `data`)
//! - `FRONTEND_URL` - Base URL for checkout and portal redirects
//!   (default: `http://localhost:5173`)
//! - `STRIPE_SECRET_KEY` - Billing provider API key
//! - `STRIPE_WEBHOOK_SECRET` - Signing secret for webhook payloads
//! - `STRIPE_PRO_PRODUCT_ID`, `STRIPE_PREMIUM_PRODUCT_ID` - Products whose
//!   active price backs each paid plan
//! - `STRIPE_API_BASE` - Provider API base URL (default: `https://api.stripe.com`)

use crate::models::PlanTier;
use crate::storage::resolve_data_path;
use secrecy::SecretString;
use std::{env, net::SocketAddr, path::PathBuf};
use thiserror::Error;

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_FRONTEND_URL: &str = "http://localhost:5173";
const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_path: PathBuf,
    pub frontend_url: String,
    pub stripe: StripeConfig,
}

#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: Option<SecretString>,
    pub webhook_secret: Option<SecretString>,
    pub pro_product_id: Option<String>,
    pub premium_product_id: Option<String>,
    pub api_base: String,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &self.secret_key.as_ref().map(|_| "[REDACTED]"))
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("pro_product_id", &self.pro_product_id)
            .field("premium_product_id", &self.premium_product_id)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            webhook_secret: None,
            pro_product_id: None,
            premium_product_id: None,
            api_base: DEFAULT_STRIPE_API_BASE.to_string(),
        }
    }
}

impl StripeConfig {
    /// Paid plans paired with the product that prices them.
    pub fn products(&self) -> Vec<(PlanTier, &str)> {
        [
            (PlanTier::Pro, self.pro_product_id.as_deref()),
            (PlanTier::Premium, self.premium_product_id.as_deref()),
        ]
        .into_iter()
        .filter_map(|(plan, product)| product.map(|id| (plan, id)))
        .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_path: PathBuf::from("data"),
            frontend_url: DEFAULT_FRONTEND_URL.to_string(),
            stripe: StripeConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match optional("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|err| ConfigError::InvalidEnvVar("PORT".into(), err.to_string()))?,
            None => DEFAULT_PORT,
        };

        let frontend_url = optional("FRONTEND_URL")
            .unwrap_or_else(|| DEFAULT_FRONTEND_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let stripe = StripeConfig {
            secret_key: optional("STRIPE_SECRET_KEY").map(SecretString::from),
            webhook_secret: optional("STRIPE_WEBHOOK_SECRET").map(SecretString::from),
            pro_product_id: optional("STRIPE_PRO_PRODUCT_ID"),
            premium_product_id: optional("STRIPE_PREMIUM_PRODUCT_ID"),
            api_base: optional("STRIPE_API_BASE")
                .unwrap_or_else(|| DEFAULT_STRIPE_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
        };

        Ok(Self {
            port,
            data_path: resolve_data_path(),
            frontend_url,
            stripe,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}

/// Unset and blank variables are treated the same.
fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
