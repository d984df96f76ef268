use anyhow::Context;
use bigdecimal::BigDecimal;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub redis_url: Option<String>,
    pub admin_api_key: String,
    pub platform: PlatformSettings,
    pub stripe: Option<StripeSettings>,
    pub paypal: PaypalSettings,
    pub mail: Option<MailSettings>,
    pub enable_scheduler: bool,
    pub log_format: LogFormat,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlatformSettings {
    pub collective_slug: String,
    pub currency: String,
    pub host_fee_share_percent: BigDecimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StripeSettings {
    pub secret_key: String,
    pub api_url: String,
    pub webhook_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaypalSettings {
    pub api_url: String,
    pub webhook_id: Option<String>,
    /// Platform app credentials, used to verify webhook signatures.
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MailSettings {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process env.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let host_fee_share_percent = BigDecimal::from_str(&var("PLATFORM_HOST_FEE_SHARE_PERCENT", "15"))
            .context("PLATFORM_HOST_FEE_SHARE_PERCENT must be a number")?;
        if !crate::domain::money::is_valid_percent(&host_fee_share_percent) {
            anyhow::bail!("PLATFORM_HOST_FEE_SHARE_PERCENT must be between 0 and 100");
        }

        let stripe = match lookup("STRIPE_SECRET_KEY") {
            Some(secret_key) => Some(StripeSettings {
                secret_key,
                api_url: var("STRIPE_API_URL", "https://api.stripe.com"),
                webhook_secret: lookup("STRIPE_WEBHOOK_SECRET")
                    .context("STRIPE_WEBHOOK_SECRET is required when STRIPE_SECRET_KEY is set")?,
            }),
            None => None,
        };

        let mail = match lookup("MAIL_API_URL") {
            Some(api_url) => Some(MailSettings {
                api_url,
                api_key: var("MAIL_API_KEY", ""),
                from: var("MAIL_FROM", "no-reply@localhost"),
            }),
            None => None,
        };

        let log_format = match var("LOG_FORMAT", "text").to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Config {
            server_port: var("SERVER_PORT", "3000")
                .parse()
                .context("SERVER_PORT must be a port number")?,
            database_url: lookup("DATABASE_URL").context("DATABASE_URL is required")?,
            database_max_connections: var("DATABASE_MAX_CONNECTIONS", "10")
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a number")?,
            redis_url: lookup("REDIS_URL").filter(|url| !url.is_empty()),
            admin_api_key: lookup("ADMIN_API_KEY").context("ADMIN_API_KEY is required")?,
            platform: PlatformSettings {
                collective_slug: var("PLATFORM_COLLECTIVE_SLUG", "platform"),
                currency: var("PLATFORM_CURRENCY", "USD"),
                host_fee_share_percent,
            },
            stripe,
            paypal: PaypalSettings {
                api_url: var("PAYPAL_API_URL", "https://api-m.sandbox.paypal.com"),
                webhook_id: lookup("PAYPAL_WEBHOOK_ID"),
                client_id: lookup("PAYPAL_CLIENT_ID"),
                client_secret: lookup("PAYPAL_CLIENT_SECRET"),
            },
            mail,
            enable_scheduler: var("ENABLE_SCHEDULER", "true")
                .parse()
                .context("ENABLE_SCHEDULER must be true or false")?,
            log_format,
        })
    }
}
