use crate::config::Config;
use crate::db::models::Collective;
use crate::db::queries;
use crate::domain::CollectiveType;
use anyhow::{Context, Result};
use sqlx::PgPool;

pub struct ValidationReport {
    pub environment: bool,
    pub database: bool,
    pub redis: bool,
    pub platform: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.database && self.redis && self.platform
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Database Connectivity: {}", status(self.database));
        println!("Redis Connectivity:    {}", status(self.redis));
        println!("Platform Account:      {}", status(self.platform));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

pub async fn validate_environment(config: &Config, pool: &PgPool) -> Result<ValidationReport> {
    let mut report = ValidationReport {
        environment: true,
        database: true,
        redis: true,
        platform: true,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Err(e) = validate_database(pool).await {
        report.database = false;
        report.errors.push(format!("Database: {}", e));
    }

    // Redis is optional; only a configured one has to answer.
    if let Some(redis_url) = &config.redis_url {
        if let Err(e) = validate_redis(redis_url).await {
            report.redis = false;
            report.errors.push(format!("Redis: {}", e));
        }
    }

    if report.database {
        if let Err(e) = queries::get_collective_by_slug(pool, &config.platform.collective_slug).await {
            report.platform = false;
            report.errors.push(format!(
                "Platform: collective '{}' not found ({})",
                config.platform.collective_slug, e
            ));
        }
    }

    Ok(report)
}

pub fn validate_env_vars(config: &Config) -> Result<()> {
    if config.database_url.is_empty() {
        anyhow::bail!("DATABASE_URL is empty");
    }
    if config.admin_api_key.len() < 16 {
        anyhow::bail!("ADMIN_API_KEY must be at least 16 characters");
    }
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }

    url::Url::parse(&config.database_url).context("DATABASE_URL is not a valid URL")?;
    url::Url::parse(&config.paypal.api_url).context("PAYPAL_API_URL is not a valid URL")?;
    if let Some(stripe) = &config.stripe {
        url::Url::parse(&stripe.api_url).context("STRIPE_API_URL is not a valid URL")?;
        if stripe.webhook_secret.is_empty() {
            anyhow::bail!("STRIPE_WEBHOOK_SECRET is empty");
        }
    }
    if let Some(mail) = &config.mail {
        url::Url::parse(&mail.api_url).context("MAIL_API_URL is not a valid URL")?;
    }
    crate::validation::validate_slug(&config.platform.collective_slug)
        .context("PLATFORM_COLLECTIVE_SLUG is not a valid slug")?;
    crate::validation::validate_currency(&config.platform.currency)
        .context("PLATFORM_CURRENCY is not a valid currency")?;

    Ok(())
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}

async fn validate_redis(redis_url: &str) -> Result<()> {
    let client = redis::Client::open(redis_url).context("Invalid Redis URL")?;

    let mut conn = client
        .get_multiplexed_tokio_connection()
        .await
        .context("Failed to connect to Redis")?;

    redis::cmd("PING")
        .query_async::<_, String>(&mut conn)
        .await
        .context("Redis PING failed")?;

    Ok(())
}

/// Creates the platform organization on first start.
pub async fn ensure_platform_collective(pool: &PgPool, config: &Config) -> Result<Collective> {
    let slug = &config.platform.collective_slug;
    match queries::get_collective_by_slug(pool, slug).await {
        Ok(platform) => Ok(platform),
        Err(sqlx::Error::RowNotFound) => {
            let platform = Collective::new(
                slug.clone(),
                "Platform".to_string(),
                CollectiveType::Organization,
                None,
                config.platform.currency.clone(),
            );
            let platform = queries::insert_collective(pool, &platform)
                .await
                .context("Failed to create the platform collective")?;
            tracing::info!(slug = %platform.slug, "Platform collective created");
            Ok(platform)
        }
        Err(e) => Err(e).context("Failed to load the platform collective"),
    }
}
