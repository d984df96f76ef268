use bigdecimal::BigDecimal;
use chrono::Utc;
use csv::Writer;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{Collective, ConnectedAccount, PaymentMethod, Transaction};
use crate::db::{is_unique_violation, queries};
use crate::domain::money::{format_cents, is_valid_percent};
use crate::domain::CollectiveType;
use crate::error::AppError;
use crate::services::notifications::{ActivityType, NewActivity, Notifier};
use crate::utils::cursor;
use crate::validation::{
    sanitize_string, validate_currency, validate_email, validate_max_len, validate_required,
    validate_slug, ValidationError, NAME_MAX_LEN,
};

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;
const EXPORT_BATCH_SIZE: i64 = 500;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCollective {
    pub slug: String,
    pub name: String,
    #[serde(rename = "type")]
    pub collective_type: CollectiveType,
    pub email: Option<String>,
    pub currency: String,
    /// Slug of the host to apply to.
    pub host_slug: Option<String>,
    pub host_fee_percent: Option<BigDecimal>,
    #[serde(default)]
    pub is_host: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePaymentMethod {
    pub collective_id: Uuid,
    pub service: String,
    #[serde(rename = "type")]
    pub method_type: String,
    pub customer_id: Option<String>,
    pub token: Option<String>,
    pub currency: Option<String>,
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectAccount {
    pub service: String,
    pub username: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub currency: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionPage {
    pub transactions: Vec<Transaction>,
    pub next_cursor: Option<String>,
}

#[derive(Serialize)]
struct TransactionCsvRow {
    id: String,
    transaction_group: String,
    created_at: String,
    kind: &'static str,
    #[serde(rename = "type")]
    entry_type: &'static str,
    description: String,
    from_collective_id: String,
    amount: String,
    currency: String,
    host_fee: String,
    platform_fee: String,
    payment_processor_fee: String,
    net_amount: String,
    is_refund: bool,
    order_id: String,
    expense_id: String,
}

impl From<&Transaction> for TransactionCsvRow {
    fn from(tx: &Transaction) -> Self {
        TransactionCsvRow {
            id: tx.id.to_string(),
            transaction_group: tx.transaction_group.to_string(),
            created_at: tx.created_at.to_rfc3339(),
            kind: tx.kind.as_str(),
            entry_type: tx.entry_type.as_str(),
            description: tx.description.clone(),
            from_collective_id: tx.from_collective_id.to_string(),
            amount: format_cents(tx.amount),
            currency: tx.currency.clone(),
            host_fee: format_cents(tx.host_fee_in_host_currency),
            platform_fee: format_cents(tx.platform_fee_in_host_currency),
            payment_processor_fee: format_cents(tx.payment_processor_fee_in_host_currency),
            net_amount: format_cents(tx.net_amount_in_collective_currency),
            is_refund: tx.is_refund,
            order_id: tx.order_id.map(|id| id.to_string()).unwrap_or_default(),
            expense_id: tx.expense_id.map(|id| id.to_string()).unwrap_or_default(),
        }
    }
}

pub fn write_csv(rows: &[Transaction]) -> Result<Vec<u8>, AppError> {
    let mut writer = Writer::from_writer(Vec::new());
    for row in rows {
        writer
            .serialize(TransactionCsvRow::from(row))
            .map_err(|e| AppError::Internal(format!("CSV serialization failed: {}", e)))?;
    }
    writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("CSV flush failed: {}", e)))
}

#[derive(Clone)]
pub struct AccountService {
    pool: PgPool,
    notifier: Notifier,
}

impl AccountService {
    pub fn new(pool: PgPool, notifier: Notifier) -> Self {
        Self { pool, notifier }
    }

    pub async fn create_collective(&self, input: CreateCollective) -> Result<Collective, AppError> {
        validate_slug(&input.slug)?;
        let name = sanitize_string(&input.name);
        validate_required("name", &name)?;
        validate_max_len("name", &name, NAME_MAX_LEN)?;
        validate_currency(&input.currency)?;
        if let Some(email) = &input.email {
            validate_email(email)?;
        }
        if let Some(percent) = &input.host_fee_percent {
            if !is_valid_percent(percent) {
                return Err(
                    ValidationError::new("host_fee_percent", "must be between 0 and 100").into(),
                );
            }
        }
        if input.is_host && input.host_slug.is_some() {
            return Err(ValidationError::new("host_slug", "a host cannot apply to another host").into());
        }

        let mut collective = Collective::new(
            input.slug,
            name,
            input.collective_type,
            input.email,
            input.currency,
        );
        collective.host_fee_percent = input.host_fee_percent;

        if input.is_host {
            collective.is_host = true;
            collective.host_collective_id = Some(collective.id);
            collective.approved_at = Some(collective.created_at);
        } else if let Some(host_slug) = &input.host_slug {
            let host = queries::get_collective_by_slug(&self.pool, host_slug).await?;
            if !host.is_host {
                return Err(AppError::Validation(format!("{} is not a host", host.slug)));
            }
            collective.host_collective_id = Some(host.id);
        }

        let collective = queries::insert_collective(&self.pool, &collective)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Conflict(format!("slug {} is already taken", collective.slug))
                } else {
                    AppError::Database(e)
                }
            })?;

        tracing::info!(
            collective_id = %collective.id,
            slug = %collective.slug,
            is_host = collective.is_host,
            "Collective created"
        );
        Ok(collective)
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Collective, AppError> {
        queries::get_collective_by_slug(&self.pool, slug)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => AppError::NotFound(format!("collective {}", slug)),
                other => AppError::Database(other),
            })
    }

    pub async fn apply_to_host(&self, slug: &str, host_slug: &str) -> Result<Collective, AppError> {
        let collective = self.get_by_slug(slug).await?;
        let host = self.get_by_slug(host_slug).await?;
        if !host.is_host {
            return Err(AppError::Validation(format!("{} is not a host", host.slug)));
        }
        if collective.is_host {
            return Err(AppError::Conflict(format!("{} is a host", collective.slug)));
        }
        let collective = queries::set_collective_host(&self.pool, collective.id, host.id, false).await?;
        tracing::info!(collective = %collective.slug, host = %host.slug, "Applied to host");
        Ok(collective)
    }

    /// Host admin accepts a pending collective.
    pub async fn approve(&self, slug: &str) -> Result<Collective, AppError> {
        let collective = self.get_by_slug(slug).await?;
        if collective.host_collective_id.is_none() {
            return Err(AppError::Validation(format!(
                "{} has not applied to a host",
                collective.slug
            )));
        }
        if collective.approved_at.is_some() {
            return Ok(collective);
        }

        let collective = queries::approve_collective(&self.pool, collective.id).await?;
        tracing::info!(collective = %collective.slug, "Collective approved");
        self.notifier
            .notify(
                NewActivity::new(
                    ActivityType::CollectiveApproved,
                    serde_json::json!({ "collective": collective.slug }),
                )
                .collective(collective.id)
                .recipient(collective.id),
            )
            .await;
        Ok(collective)
    }

    pub async fn balances(&self, collective: &Collective) -> Result<Vec<Balance>, AppError> {
        let balances = queries::get_balances(&self.pool, collective.id).await?;
        Ok(balances
            .into_iter()
            .map(|(currency, amount)| Balance { currency, amount })
            .collect())
    }

    pub async fn transactions(
        &self,
        collective: &Collective,
        cursor_param: Option<&str>,
        limit: Option<i64>,
    ) -> Result<TransactionPage, AppError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let position = match cursor_param {
            Some(c) => Some(
                cursor::decode(c).map_err(|e| AppError::BadRequest(format!("invalid cursor: {}", e)))?,
            ),
            None => None,
        };

        // One extra row tells whether another page exists.
        let mut transactions =
            queries::list_collective_transactions(&self.pool, collective.id, position, limit + 1)
                .await?;
        let next_cursor = if transactions.len() as i64 > limit {
            transactions.truncate(limit as usize);
            transactions.last().map(|t| cursor::encode(t.created_at, t.id))
        } else {
            None
        };

        Ok(TransactionPage {
            transactions,
            next_cursor,
        })
    }

    pub async fn export_csv(&self, collective: &Collective) -> Result<Vec<u8>, AppError> {
        let mut rows = Vec::new();
        let mut position = None;
        loop {
            let batch = queries::list_collective_transactions(
                &self.pool,
                collective.id,
                position,
                EXPORT_BATCH_SIZE,
            )
            .await?;
            let done = (batch.len() as i64) < EXPORT_BATCH_SIZE;
            position = batch.last().map(|t| (t.created_at, t.id));
            rows.extend(batch);
            if done {
                break;
            }
        }

        tracing::info!(collective = %collective.slug, rows = rows.len(), "Exported ledger");
        write_csv(&rows)
    }

    pub async fn create_payment_method(
        &self,
        input: CreatePaymentMethod,
    ) -> Result<PaymentMethod, AppError> {
        validate_required("service", &input.service)?;
        validate_required("type", &input.method_type)?;
        if let Some(currency) = &input.currency {
            validate_currency(currency)?;
        }
        let owner = queries::get_collective(&self.pool, input.collective_id).await?;

        let payment_method = PaymentMethod {
            id: Uuid::new_v4(),
            collective_id: owner.id,
            service: input.service,
            method_type: input.method_type,
            customer_id: input.customer_id,
            token: input.token,
            currency: input.currency,
            data: input.data,
            archived_at: None,
            created_at: Utc::now(),
        };
        Ok(queries::insert_payment_method(&self.pool, &payment_method).await?)
    }

    /// Stores a host's processor credentials.
    pub async fn connect_account(
        &self,
        host: &Collective,
        input: ConnectAccount,
    ) -> Result<(), AppError> {
        if !host.is_host {
            return Err(AppError::Validation(format!("{} is not a host", host.slug)));
        }
        validate_required("service", &input.service)?;
        validate_required("username", &input.username)?;

        let account = ConnectedAccount {
            id: Uuid::new_v4(),
            collective_id: host.id,
            service: input.service,
            username: input.username,
            token: input.token,
            created_at: Utc::now(),
        };
        queries::insert_connected_account(&self.pool, &account)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Conflict(format!(
                        "{} already has a {} account",
                        host.slug, account.service
                    ))
                } else {
                    AppError::Database(e)
                }
            })?;
        tracing::info!(host = %host.slug, service = %account.service, "Connected account added");
        Ok(())
    }
}
