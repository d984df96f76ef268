use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{Collective, Expense, Transaction};
use crate::db::queries;
use crate::domain::{ExpenseItem, ExpenseStatus, ExpenseType};
use crate::error::AppError;
use crate::services::notifications::{ActivityType, NewActivity, Notifier};

/// What a host owes the platform for one period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformInvoice {
    pub host_id: Uuid,
    pub host_slug: String,
    pub currency: String,
    pub items: Vec<ExpenseItem>,
    pub total_amount: i64,
    /// Set once the invoice was written as a settlement expense.
    pub expense_id: Option<Uuid>,
    pub settlement_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostFailure {
    pub host_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementRunReport {
    pub period: String,
    pub dry_run: bool,
    pub invoices: Vec<PlatformInvoice>,
    pub failures: Vec<HostFailure>,
}

/// Start of the month following `year`/`month`, the end of the period.
pub fn period_end(year: i32, month: u32) -> Result<DateTime<Utc>, AppError> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| Utc.from_utc_datetime(&d))
        .ok_or_else(|| AppError::BadRequest(format!("invalid period {}-{}", year, month)))
}

pub fn period_label(year: i32, month: u32) -> Result<String, AppError> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(|d| d.format("%B %Y").to_string())
        .ok_or_else(|| AppError::BadRequest(format!("invalid period {}-{}", year, month)))
}

/// The month before `now`, as invoiced on the 1st.
pub fn previous_period(now: DateTime<Utc>) -> (i32, u32) {
    if now.month() == 1 {
        (now.year() - 1, 12)
    } else {
        (now.year(), now.month() - 1)
    }
}

/// Sums the host-side debt legs per invoice line. Refunded debts come in
/// negative and reduce their line.
pub fn aggregate(host: &Collective, rows: &[Transaction]) -> Option<PlatformInvoice> {
    let mut lines: BTreeMap<&'static str, i64> = BTreeMap::new();
    let mut count = 0;

    for row in rows.iter().filter(|r| r.collective_id == host.id) {
        let Some(label) = row.kind.invoice_label() else {
            continue;
        };
        *lines.entry(label).or_insert(0) += row.amount_in_host_currency;
        count += 1;
    }

    let total_amount: i64 = lines.values().sum();
    if total_amount <= 0 {
        return None;
    }

    Some(PlatformInvoice {
        host_id: host.id,
        host_slug: host.slug.clone(),
        currency: host.currency.clone(),
        items: lines
            .into_iter()
            .filter(|(_, amount)| *amount != 0)
            .map(|(label, amount)| ExpenseItem {
                description: label.to_string(),
                amount,
            })
            .collect(),
        total_amount,
        expense_id: None,
        settlement_count: count,
    })
}

#[derive(Clone)]
pub struct SettlementService {
    pool: PgPool,
    notifier: Notifier,
    platform_slug: String,
}

impl SettlementService {
    pub fn new(pool: PgPool, notifier: Notifier, platform_slug: String) -> Self {
        Self {
            pool,
            notifier,
            platform_slug,
        }
    }

    /// Invoices every host that owes debts from before the end of the period.
    pub async fn run_monthly(
        &self,
        year: i32,
        month: u32,
        dry_run: bool,
    ) -> Result<SettlementRunReport, AppError> {
        let before = period_end(year, month)?;
        let period = period_label(year, month)?;
        let hosts = queries::hosts_with_owed_settlements(&self.pool, before).await?;

        tracing::info!(period = %period, hosts = hosts.len(), dry_run, "Running platform settlement");

        let mut invoices = Vec::new();
        let mut failures = Vec::new();
        for host_id in hosts {
            match self.invoice_host(host_id, year, month, dry_run).await {
                Ok(Some(invoice)) => invoices.push(invoice),
                Ok(None) => tracing::info!(host_id = %host_id, "Nothing to invoice"),
                Err(e) => {
                    tracing::error!(host_id = %host_id, error = %e, "Failed to invoice host");
                    failures.push(HostFailure {
                        host_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(SettlementRunReport {
            period,
            dry_run,
            invoices,
            failures,
        })
    }

    pub async fn invoice_host(
        &self,
        host_id: Uuid,
        year: i32,
        month: u32,
        dry_run: bool,
    ) -> Result<Option<PlatformInvoice>, AppError> {
        let before = period_end(year, month)?;
        let period = period_label(year, month)?;
        let host = queries::get_collective(&self.pool, host_id).await?;
        let platform = queries::get_collective_by_slug(&self.pool, &self.platform_slug).await?;

        let mut tx = self.pool.begin().await?;
        let owed = queries::lock_owed_debts_for_host(&mut tx, host.id, before).await?;
        let rows: Vec<Transaction> = owed.iter().map(|d| d.transaction.clone()).collect();

        let Some(mut invoice) = aggregate(&host, &rows) else {
            tx.rollback().await?;
            return Ok(None);
        };
        if dry_run {
            tx.rollback().await?;
            return Ok(Some(invoice));
        }

        let now = Utc::now();
        let expense = Expense {
            id: Uuid::new_v4(),
            collective_id: host.id,
            from_collective_id: platform.id,
            expense_type: ExpenseType::Settlement,
            status: ExpenseStatus::Approved,
            description: format!("Platform settlement for {}", period),
            amount: invoice.total_amount,
            currency: host.currency.clone(),
            items: serde_json::to_value(&invoice.items)
                .map_err(|e| AppError::Internal(e.to_string()))?,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        let expense = queries::insert_expense(&mut *tx, &expense).await?;

        let settlement_ids: Vec<Uuid> = owed.iter().map(|d| d.settlement_id).collect();
        queries::mark_settlements_invoiced(&mut tx, &settlement_ids, expense.id).await?;
        tx.commit().await?;

        invoice.expense_id = Some(expense.id);
        tracing::info!(
            "Invoiced host {} for {}: {} {} over {} settlements (expense {})",
            host.slug,
            period,
            invoice.total_amount,
            invoice.currency,
            settlement_ids.len(),
            expense.id
        );

        self.notifier
            .notify(
                NewActivity::new(
                    ActivityType::PlatformInvoiceCreated,
                    serde_json::json!({
                        "amount": invoice.total_amount,
                        "currency": invoice.currency,
                        "collective": host.slug,
                        "period": period,
                        "items": invoice.items,
                    }),
                )
                .collective(host.id)
                .expense(expense.id)
                .recipient(host.id),
            )
            .await;

        Ok(Some(invoice))
    }
}
