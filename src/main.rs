use clap::Parser;
use fiscal_host_core::cli::{Cli, Commands, DbCommands, RecurringCommands};
use fiscal_host_core::config::{Config, LogFormat};
use fiscal_host_core::services::Scheduler;
use fiscal_host_core::{cli, create_app, db, startup, AppState};
use sqlx::migrate::Migrator;
use std::net::SocketAddr;
use std::path::Path;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    let args = Cli::parse();
    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Settle {
            year,
            month,
            dry_run,
        } => cli::handle_settle(&config, year, month, dry_run).await,
        Commands::Recurring(RecurringCommands::Run) => cli::handle_recurring_run(&config).await,
        Commands::Config => cli::handle_config_validate(&config),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;

    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("Database migrations completed");

    let platform = startup::ensure_platform_collective(&pool, &config).await?;
    tracing::info!(slug = %platform.slug, currency = %platform.currency, "Platform collective ready");

    let report = startup::validate_environment(&config, &pool).await?;
    report.print();
    if !report.is_valid() {
        anyhow::bail!("Startup validation failed");
    }

    let state = AppState::build(pool, config.clone())?;

    if config.enable_scheduler {
        let handles = Scheduler::new(state.settlements.clone(), state.recurring.clone()).start()?;
        tracing::info!(jobs = handles.len(), "Scheduler started");
    }

    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
