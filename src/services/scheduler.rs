use std::str::FromStr;

use chrono::Utc;
use cron::Schedule;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use crate::services::recurring::RecurringService;
use crate::services::settlement::{previous_period, SettlementService};

/// 04:00 UTC on the 1st, for the month that just ended.
pub const MONTHLY_SETTLEMENT: &str = "0 0 4 1 * *";
/// Top of every hour.
pub const HOURLY_RECURRING: &str = "0 0 * * * *";

pub fn parse_schedule(expression: &str) -> anyhow::Result<Schedule> {
    Schedule::from_str(expression)
        .map_err(|e| anyhow::anyhow!("invalid cron expression '{}': {}", expression, e))
}

/// Time left until the next fire, or `None` when the schedule is exhausted.
fn until_next(schedule: &Schedule) -> Option<Duration> {
    let next = schedule.upcoming(Utc).next()?;
    let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    Some(wait)
}

pub struct Scheduler {
    settlements: SettlementService,
    recurring: RecurringService,
}

impl Scheduler {
    pub fn new(settlements: SettlementService, recurring: RecurringService) -> Self {
        Self {
            settlements,
            recurring,
        }
    }

    /// Spawns one tokio task per job.
    pub fn start(self) -> anyhow::Result<Vec<JoinHandle<()>>> {
        let monthly = parse_schedule(MONTHLY_SETTLEMENT)?;
        let hourly = parse_schedule(HOURLY_RECURRING)?;

        let settlements = self.settlements;
        let settlement_task = tokio::spawn(async move {
            info!("Monthly settlement job scheduled ({})", MONTHLY_SETTLEMENT);
            while let Some(wait) = until_next(&monthly) {
                sleep(wait).await;
                let (year, month) = previous_period(Utc::now());
                match settlements.run_monthly(year, month, false).await {
                    Ok(report) => info!(
                        period = %report.period,
                        invoices = report.invoices.len(),
                        failures = report.failures.len(),
                        "Monthly settlement finished"
                    ),
                    Err(e) => error!("Monthly settlement failed: {}", e),
                }
            }
        });

        let recurring = self.recurring;
        let recurring_task = tokio::spawn(async move {
            info!("Recurring charge job scheduled ({})", HOURLY_RECURRING);
            while let Some(wait) = until_next(&hourly) {
                sleep(wait).await;
                if let Err(e) = recurring.process_due(Utc::now()).await {
                    error!("Recurring charge run failed: {}", e);
                }
            }
        });

        Ok(vec![settlement_task, recurring_task])
    }
}
