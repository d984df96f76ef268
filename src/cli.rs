use chrono::Utc;
use clap::{Parser, Subcommand};
use crate::config::Config;
use crate::services::settlement::previous_period;
use crate::AppState;

#[derive(Parser)]
#[command(name = "fiscal-host-core")]
#[command(about = "Fiscal Host Core - contributions, expenses and host settlements", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Invoice hosts for the platform's share of a month
    Settle {
        /// Year of the period, defaults to last month's
        #[arg(long)]
        year: Option<i32>,

        /// Month of the period (1-12), defaults to last month
        #[arg(long)]
        month: Option<u32>,

        /// Compute invoices without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Recurring contribution commands
    #[command(subcommand)]
    Recurring(RecurringCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum RecurringCommands {
    /// Charge every recurring order that is due now
    Run,
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    use sqlx::migrate::Migrator;
    use std::path::Path;

    let pool = crate::db::create_pool(config).await?;
    let migrator = Migrator::new(Path::new("./migrations")).await?;

    tracing::info!("Running database migrations...");
    migrator.run(&pool).await?;

    tracing::info!("Database migrations completed");
    println!("✓ Database migrations completed");

    Ok(())
}

pub async fn handle_settle(
    config: &Config,
    year: Option<i32>,
    month: Option<u32>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let (default_year, default_month) = previous_period(Utc::now());
    let (year, month) = (year.unwrap_or(default_year), month.unwrap_or(default_month));

    let pool = crate::db::create_pool(config).await?;
    let state = AppState::build(pool, config.clone())?;

    tracing::info!(year, month, dry_run, "Running host settlements");
    let report = state.settlements.run_monthly(year, month, dry_run).await?;

    println!(
        "Settlements for {}{}:",
        report.period,
        if report.dry_run { " (dry run)" } else { "" }
    );
    for invoice in &report.invoices {
        println!(
            "  {:<32} {:>14} {}  ({} entries)",
            invoice.host_slug,
            crate::domain::money::format_cents(invoice.total_amount),
            invoice.currency,
            invoice.settlement_count
        );
    }
    for failure in &report.failures {
        println!("  ❌ {}: {}", failure.host_id, failure.error);
    }
    println!(
        "✓ {} invoice(s), {} failure(s)",
        report.invoices.len(),
        report.failures.len()
    );

    if !report.failures.is_empty() {
        anyhow::bail!("{} host(s) could not be invoiced", report.failures.len());
    }
    Ok(())
}

pub async fn handle_recurring_run(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;
    let state = AppState::build(pool, config.clone())?;

    let summary = state.recurring.process_due(Utc::now()).await?;
    println!(
        "✓ Recurring run: {} charged, {} failed, {} cancelled, {} skipped",
        summary.charged, summary.failed, summary.cancelled, summary.skipped
    );
    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    crate::startup::validate_env_vars(config)?;

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!(
        "  Redis URL: {}",
        config
            .redis_url
            .as_deref()
            .map(mask_password)
            .unwrap_or_else(|| "(disabled)".to_string())
    );
    println!(
        "  Platform: {} ({}, {}% of host fees)",
        config.platform.collective_slug,
        config.platform.currency,
        config.platform.host_fee_share_percent
    );
    println!(
        "  Stripe: {}",
        config.stripe.as_ref().map(|s| s.api_url.as_str()).unwrap_or("(disabled)")
    );
    println!("  PayPal: {}", config.paypal.api_url);
    println!("  Scheduler: {}", if config.enable_scheduler { "enabled" } else { "disabled" });

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user_start = slash_pos + 2;
                let user = &url[user_start..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
