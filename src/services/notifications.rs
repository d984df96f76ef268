use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::MailSettings;
use crate::db::models::Activity;
use crate::db::queries;
use crate::domain::money::format_cents;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityType {
    CollectiveApproved,
    OrderConfirmed,
    OrderPending,
    OrderPaymentFailed,
    OrderRefunded,
    OrderDisputed,
    OrderCancelled,
    ExpenseSubmitted,
    ExpenseApproved,
    ExpenseRejected,
    ExpensePaid,
    PlatformInvoiceCreated,
}

impl ActivityType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityType::CollectiveApproved => "COLLECTIVE_APPROVED",
            ActivityType::OrderConfirmed => "ORDER_CONFIRMED",
            ActivityType::OrderPending => "ORDER_PENDING",
            ActivityType::OrderPaymentFailed => "ORDER_PAYMENT_FAILED",
            ActivityType::OrderRefunded => "ORDER_REFUNDED",
            ActivityType::OrderDisputed => "ORDER_DISPUTED",
            ActivityType::OrderCancelled => "ORDER_CANCELLED",
            ActivityType::ExpenseSubmitted => "EXPENSE_SUBMITTED",
            ActivityType::ExpenseApproved => "EXPENSE_APPROVED",
            ActivityType::ExpenseRejected => "EXPENSE_REJECTED",
            ActivityType::ExpensePaid => "EXPENSE_PAID",
            ActivityType::PlatformInvoiceCreated => "PLATFORM_INVOICE_CREATED",
        }
    }

    fn subject(self) -> &'static str {
        match self {
            ActivityType::CollectiveApproved => "Your collective has been approved",
            ActivityType::OrderConfirmed => "Thank you for your contribution",
            ActivityType::OrderPending => "Your contribution is awaiting payment",
            ActivityType::OrderPaymentFailed => "Your contribution could not be processed",
            ActivityType::OrderRefunded => "Your contribution has been refunded",
            ActivityType::OrderDisputed => "A contribution has been disputed",
            ActivityType::OrderCancelled => "Your recurring contribution was cancelled",
            ActivityType::ExpenseSubmitted => "New expense submitted",
            ActivityType::ExpenseApproved => "Your expense has been approved",
            ActivityType::ExpenseRejected => "Your expense has been rejected",
            ActivityType::ExpensePaid => "Your expense has been paid",
            ActivityType::PlatformInvoiceCreated => "New platform settlement invoice",
        }
    }
}

/// An event to record, and mail to `recipient_id` when it has an email.
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub activity_type: ActivityType,
    pub collective_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub expense_id: Option<Uuid>,
    pub recipient_id: Option<Uuid>,
    pub data: serde_json::Value,
}

impl NewActivity {
    pub fn new(activity_type: ActivityType, data: serde_json::Value) -> Self {
        Self {
            activity_type,
            collective_id: None,
            order_id: None,
            expense_id: None,
            recipient_id: None,
            data,
        }
    }

    pub fn collective(mut self, id: Uuid) -> Self {
        self.collective_id = Some(id);
        self
    }

    pub fn order(mut self, id: Uuid) -> Self {
        self.order_id = Some(id);
        self
    }

    pub fn expense(mut self, id: Uuid) -> Self {
        self.expense_id = Some(id);
        self
    }

    pub fn recipient(mut self, id: Uuid) -> Self {
        self.recipient_id = Some(id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[derive(Error, Debug)]
pub enum MailerError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Mail API rejected the message with status {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailerError>;
}

/// Posts plain-text emails as JSON to a transactional mail API.
pub struct HttpMailer {
    client: Client,
    settings: MailSettings,
}

impl HttpMailer {
    pub fn new(settings: MailSettings) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, settings }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &Email) -> Result<(), MailerError> {
        let response = self
            .client
            .post(&self.settings.api_url)
            .bearer_auth(&self.settings.api_key)
            .json(&serde_json::json!({
                "from": self.settings.from,
                "to": email.to,
                "subject": email.subject,
                "text": email.text,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MailerError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Used when no mail API is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), MailerError> {
        tracing::info!(to = %email.to, subject = %email.subject, "Email not sent, no mail API configured");
        Ok(())
    }
}

fn describe(activity: &NewActivity) -> String {
    let data = &activity.data;
    let amount = data
        .get("amount")
        .and_then(|v| v.as_i64())
        .map(format_cents);
    let currency = data.get("currency").and_then(|v| v.as_str()).unwrap_or("");
    let collective = data.get("collective").and_then(|v| v.as_str());

    let mut lines = vec![activity.activity_type.subject().to_string()];
    if let Some(amount) = amount {
        lines.push(format!("Amount: {} {}", amount, currency));
    }
    if let Some(collective) = collective {
        lines.push(format!("Collective: {}", collective));
    }
    if let Some(reason) = data.get("error").and_then(|v| v.as_str()) {
        lines.push(format!("Reason: {}", reason));
    }
    lines.join("\n")
}

pub fn email_for(activity: &NewActivity, to: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: activity.activity_type.subject().to_string(),
        text: describe(activity),
    }
}

#[derive(Clone)]
pub struct Notifier {
    pool: PgPool,
    mailer: Arc<dyn Mailer>,
}

impl Notifier {
    pub fn new(pool: PgPool, mailer: Arc<dyn Mailer>) -> Self {
        Self { pool, mailer }
    }

    /// Records the activity and mails its recipient. Never fails the caller.
    pub async fn notify(&self, activity: NewActivity) {
        let row = Activity {
            id: Uuid::new_v4(),
            activity_type: activity.activity_type.as_str().to_string(),
            collective_id: activity.collective_id,
            order_id: activity.order_id,
            expense_id: activity.expense_id,
            data: Some(activity.data.clone()),
            created_at: Utc::now(),
        };
        if let Err(e) = queries::insert_activity(&self.pool, &row).await {
            tracing::error!(activity = %row.activity_type, error = %e, "Failed to record activity");
        }

        let Some(recipient_id) = activity.recipient_id else {
            return;
        };
        let recipient = match queries::get_collective(&self.pool, recipient_id).await {
            Ok(recipient) => recipient,
            Err(e) => {
                tracing::warn!(recipient_id = %recipient_id, error = %e, "Notification recipient not found");
                return;
            }
        };
        let Some(to) = recipient.email.as_deref() else {
            return;
        };

        if let Err(e) = self.mailer.send(&email_for(&activity, to)).await {
            tracing::error!(
                activity = %row.activity_type,
                recipient = %recipient.slug,
                error = %e,
                "Failed to send notification email"
            );
        }
    }
}
