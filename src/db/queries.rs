use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgExecutor, PgPool, Postgres, Result, Transaction as SqlxTransaction};
use uuid::Uuid;

use crate::db::models::{
    Activity, Collective, ConnectedAccount, Expense, Order, PaymentMethod, PaypalProduct,
    Transaction, TransactionSettlement,
};
use crate::domain::{ExpenseStatus, OrderStatus, SettlementStatus, TransactionKind};
use crate::ledger::LedgerBatch;

// --- Collective Queries ---

pub async fn insert_collective(pool: &PgPool, collective: &Collective) -> Result<Collective> {
    sqlx::query_as::<_, Collective>(
        r#"
        INSERT INTO collectives (
            id, slug, name, type, email, currency, host_collective_id,
            host_fee_percent, is_host, approved_at, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING *
        "#,
    )
    .bind(collective.id)
    .bind(&collective.slug)
    .bind(&collective.name)
    .bind(collective.collective_type)
    .bind(&collective.email)
    .bind(&collective.currency)
    .bind(collective.host_collective_id)
    .bind(&collective.host_fee_percent)
    .bind(collective.is_host)
    .bind(collective.approved_at)
    .bind(collective.created_at)
    .bind(collective.updated_at)
    .fetch_one(pool)
    .await
}

pub async fn get_collective<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<Collective> {
    sqlx::query_as::<_, Collective>("SELECT * FROM collectives WHERE id = $1")
        .bind(id)
        .fetch_one(executor)
        .await
}

pub async fn get_collective_by_slug(pool: &PgPool, slug: &str) -> Result<Collective> {
    sqlx::query_as::<_, Collective>("SELECT * FROM collectives WHERE slug = $1")
        .bind(slug)
        .fetch_one(pool)
        .await
}

pub async fn approve_collective(pool: &PgPool, id: Uuid) -> Result<Collective> {
    sqlx::query_as::<_, Collective>(
        "UPDATE collectives SET approved_at = NOW(), updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_one(pool)
    .await
}

/// Serializes balance-dependent writes for one collective until the
/// transaction ends.
pub async fn lock_collective(
    tx: &mut SqlxTransaction<'_, Postgres>,
    id: Uuid,
) -> Result<Collective> {
    sqlx::query_as::<_, Collective>("SELECT * FROM collectives WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_one(&mut **tx)
        .await
}

/// Moves a collective under a host. Approval is cleared until the host accepts.
pub async fn set_collective_host(
    pool: &PgPool,
    id: Uuid,
    host_id: Uuid,
    approved: bool,
) -> Result<Collective> {
    sqlx::query_as::<_, Collective>(
        r#"
        UPDATE collectives
        SET host_collective_id = $2,
            approved_at = CASE WHEN $3 THEN NOW() ELSE NULL END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(host_id)
    .bind(approved)
    .fetch_one(pool)
    .await
}

pub async fn get_connected_account(
    pool: &PgPool,
    collective_id: Uuid,
    service: &str,
) -> Result<Option<ConnectedAccount>> {
    sqlx::query_as::<_, ConnectedAccount>(
        "SELECT * FROM connected_accounts WHERE collective_id = $1 AND service = $2",
    )
    .bind(collective_id)
    .bind(service)
    .fetch_optional(pool)
    .await
}

pub async fn insert_connected_account(pool: &PgPool, account: &ConnectedAccount) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO connected_accounts (id, collective_id, service, username, token, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(account.id)
    .bind(account.collective_id)
    .bind(&account.service)
    .bind(&account.username)
    .bind(&account.token)
    .bind(account.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Balance per currency: the sum of net amounts credited and debited.
pub async fn get_balances<'e, E: PgExecutor<'e>>(
    executor: E,
    collective_id: Uuid,
) -> Result<Vec<(String, i64)>> {
    sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT currency, COALESCE(SUM(net_amount_in_collective_currency), 0)::BIGINT
        FROM transactions
        WHERE collective_id = $1
        GROUP BY currency
        ORDER BY currency
        "#,
    )
    .bind(collective_id)
    .fetch_all(executor)
    .await
}

pub async fn get_balance<'e, E: PgExecutor<'e>>(
    executor: E,
    collective_id: Uuid,
    currency: &str,
) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COALESCE(SUM(net_amount_in_collective_currency), 0)::BIGINT
        FROM transactions
        WHERE collective_id = $1 AND currency = $2
        "#,
    )
    .bind(collective_id)
    .bind(currency)
    .fetch_one(executor)
    .await
}

// --- Payment Method Queries ---

pub async fn insert_payment_method(pool: &PgPool, pm: &PaymentMethod) -> Result<PaymentMethod> {
    sqlx::query_as::<_, PaymentMethod>(
        r#"
        INSERT INTO payment_methods (
            id, collective_id, service, type, customer_id, token, currency, data, archived_at, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(pm.id)
    .bind(pm.collective_id)
    .bind(&pm.service)
    .bind(&pm.method_type)
    .bind(&pm.customer_id)
    .bind(&pm.token)
    .bind(&pm.currency)
    .bind(&pm.data)
    .bind(pm.archived_at)
    .bind(pm.created_at)
    .fetch_one(pool)
    .await
}

pub async fn get_payment_method(pool: &PgPool, id: Uuid) -> Result<PaymentMethod> {
    sqlx::query_as::<_, PaymentMethod>("SELECT * FROM payment_methods WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
}

// --- Order Queries ---

pub async fn insert_order(pool: &PgPool, order: &Order) -> Result<Order> {
    sqlx::query_as::<_, Order>(
        r#"
        INSERT INTO orders (
            id, from_collective_id, collective_id, tier_id, payment_method_id, description,
            total_amount, currency, platform_tip_amount, tax_amount, status, recurrence_interval,
            next_charge_date, charge_retry_count, external_id, processed_at, data, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
        RETURNING *
        "#,
    )
    .bind(order.id)
    .bind(order.from_collective_id)
    .bind(order.collective_id)
    .bind(order.tier_id)
    .bind(order.payment_method_id)
    .bind(&order.description)
    .bind(order.total_amount)
    .bind(&order.currency)
    .bind(order.platform_tip_amount)
    .bind(order.tax_amount)
    .bind(order.status)
    .bind(&order.recurrence_interval)
    .bind(order.next_charge_date)
    .bind(order.charge_retry_count)
    .bind(&order.external_id)
    .bind(order.processed_at)
    .bind(&order.data)
    .bind(order.created_at)
    .bind(order.updated_at)
    .fetch_one(pool)
    .await
}

pub async fn get_order<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<Order> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(id)
        .fetch_one(executor)
        .await
}

pub async fn get_order_for_update(
    tx: &mut SqlxTransaction<'_, Postgres>,
    id: Uuid,
) -> Result<Order> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_one(&mut **tx)
        .await
}

pub async fn find_order_by_external_id(pool: &PgPool, external_id: &str) -> Result<Option<Order>> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE external_id = $1")
        .bind(external_id)
        .fetch_optional(pool)
        .await
}

pub async fn update_order_status<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    status: OrderStatus,
) -> Result<Order> {
    sqlx::query_as::<_, Order>(
        "UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(status)
    .fetch_one(executor)
    .await
}

pub async fn set_order_external_id(pool: &PgPool, id: Uuid, external_id: &str) -> Result<()> {
    sqlx::query("UPDATE orders SET external_id = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(external_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Records a successful charge on the order.
pub async fn mark_order_charged(
    tx: &mut SqlxTransaction<'_, Postgres>,
    id: Uuid,
    status: OrderStatus,
    next_charge_date: Option<DateTime<Utc>>,
    external_id: Option<&str>,
) -> Result<Order> {
    sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET status = $2, next_charge_date = $3, charge_retry_count = 0,
            external_id = COALESCE(external_id, $4),
            processed_at = NOW(), updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(status)
    .bind(next_charge_date)
    .bind(external_id)
    .fetch_one(&mut **tx)
    .await
}

pub async fn reschedule_order_charge(
    pool: &PgPool,
    id: Uuid,
    retry_count: i32,
    next_charge_date: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE orders
        SET charge_retry_count = $2, next_charge_date = $3, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(retry_count)
    .bind(next_charge_date)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_due_recurring_orders(
    pool: &PgPool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Order>> {
    sqlx::query_as::<_, Order>(
        r#"
        SELECT * FROM orders
        WHERE status = 'ACTIVE'
        AND recurrence_interval IS NOT NULL
        AND next_charge_date <= $1
        ORDER BY next_charge_date ASC
        LIMIT $2
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await
}

// --- Expense Queries ---

pub async fn insert_expense<'e, E: PgExecutor<'e>>(executor: E, expense: &Expense) -> Result<Expense> {
    sqlx::query_as::<_, Expense>(
        r#"
        INSERT INTO expenses (
            id, collective_id, from_collective_id, type, status, description,
            amount, currency, items, paid_at, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING *
        "#,
    )
    .bind(expense.id)
    .bind(expense.collective_id)
    .bind(expense.from_collective_id)
    .bind(expense.expense_type)
    .bind(expense.status)
    .bind(&expense.description)
    .bind(expense.amount)
    .bind(&expense.currency)
    .bind(&expense.items)
    .bind(expense.paid_at)
    .bind(expense.created_at)
    .bind(expense.updated_at)
    .fetch_one(executor)
    .await
}

pub async fn get_expense(pool: &PgPool, id: Uuid) -> Result<Expense> {
    sqlx::query_as::<_, Expense>("SELECT * FROM expenses WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
}

pub async fn get_expense_for_update(
    tx: &mut SqlxTransaction<'_, Postgres>,
    id: Uuid,
) -> Result<Expense> {
    sqlx::query_as::<_, Expense>("SELECT * FROM expenses WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_one(&mut **tx)
        .await
}

pub async fn update_expense_status<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    status: ExpenseStatus,
) -> Result<Expense> {
    sqlx::query_as::<_, Expense>(
        r#"
        UPDATE expenses
        SET status = $2,
            paid_at = CASE WHEN $2 = 'PAID'::expense_status THEN NOW() ELSE paid_at END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(status)
    .fetch_one(executor)
    .await
}

// --- Transaction Queries ---

async fn insert_transaction_row(
    tx: &mut SqlxTransaction<'_, Postgres>,
    row: &Transaction,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, transaction_group, kind, type, description, collective_id, from_collective_id,
            host_collective_id, order_id, expense_id, payment_method_id, amount, currency,
            amount_in_host_currency, host_currency, host_currency_fx_rate, host_fee_in_host_currency,
            platform_fee_in_host_currency, payment_processor_fee_in_host_currency, tax_amount,
            net_amount_in_collective_currency, is_refund, is_debt, is_disputed,
            refund_transaction_id, data, created_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
            $19, $20, $21, $22, $23, $24, $25, $26, $27
        )
        "#,
    )
    .bind(row.id)
    .bind(row.transaction_group)
    .bind(row.kind)
    .bind(row.entry_type)
    .bind(&row.description)
    .bind(row.collective_id)
    .bind(row.from_collective_id)
    .bind(row.host_collective_id)
    .bind(row.order_id)
    .bind(row.expense_id)
    .bind(row.payment_method_id)
    .bind(row.amount)
    .bind(&row.currency)
    .bind(row.amount_in_host_currency)
    .bind(&row.host_currency)
    .bind(&row.host_currency_fx_rate)
    .bind(row.host_fee_in_host_currency)
    .bind(row.platform_fee_in_host_currency)
    .bind(row.payment_processor_fee_in_host_currency)
    .bind(row.tax_amount)
    .bind(row.net_amount_in_collective_currency)
    .bind(row.is_refund)
    .bind(row.is_debt)
    .bind(row.is_disputed)
    .bind(row.refund_transaction_id)
    .bind(&row.data)
    .bind(row.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Writes every row and settlement of a batch inside the caller's transaction.
pub async fn insert_batch(
    tx: &mut SqlxTransaction<'_, Postgres>,
    batch: &LedgerBatch,
) -> Result<()> {
    for row in &batch.transactions {
        insert_transaction_row(tx, row).await?;
    }

    for settlement in &batch.settlements {
        sqlx::query(
            r#"
            INSERT INTO transaction_settlements (
                id, transaction_group, kind, settlement_status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, NOW(), NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(settlement.transaction_group)
        .bind(settlement.kind)
        .bind(settlement.status)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

pub async fn get_transaction(pool: &PgPool, id: Uuid) -> Result<Transaction> {
    sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
}

/// All rows of a group, credits first, in insertion order within each type.
pub async fn get_transaction_group<'e, E: PgExecutor<'e>>(
    executor: E,
    group: Uuid,
) -> Result<Vec<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        SELECT * FROM transactions
        WHERE transaction_group = $1
        ORDER BY created_at ASC, type ASC, kind ASC
        FOR UPDATE
        "#,
    )
    .bind(group)
    .fetch_all(executor)
    .await
}

/// The contribution credit recorded for a processor charge id.
pub async fn find_credit_by_charge_id(pool: &PgPool, charge_id: &str) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        SELECT * FROM transactions
        WHERE data->>'charge_id' = $1
        AND type = 'CREDIT'
        AND kind IN ('CONTRIBUTION', 'ADDED_FUNDS')
        AND is_refund = FALSE
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(charge_id)
    .fetch_optional(pool)
    .await
}

pub async fn link_refund(
    tx: &mut SqlxTransaction<'_, Postgres>,
    original_id: Uuid,
    refund_id: Uuid,
) -> Result<()> {
    sqlx::query("UPDATE transactions SET refund_transaction_id = $2 WHERE id = $1")
        .bind(original_id)
        .bind(refund_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn mark_order_transactions_disputed(
    tx: &mut SqlxTransaction<'_, Postgres>,
    order_id: Uuid,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE transactions SET is_disputed = TRUE WHERE order_id = $1 AND is_refund = FALSE",
    )
    .bind(order_id)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

/// Whether a charge with this processor id was already recorded for the order.
pub async fn charge_already_recorded<'e, E: PgExecutor<'e>>(
    executor: E,
    order_id: Uuid,
    charge_id: &str,
) -> Result<bool> {
    sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM transactions
            WHERE order_id = $1 AND data->>'charge_id' = $2
        )
        "#,
    )
    .bind(order_id)
    .bind(charge_id)
    .fetch_one(executor)
    .await
}

pub async fn list_collective_transactions(
    pool: &PgPool,
    collective_id: Uuid,
    cursor: Option<(DateTime<Utc>, Uuid)>,
    limit: i64,
) -> Result<Vec<Transaction>> {
    let (created_at, id) = match cursor {
        Some((created_at, id)) => (Some(created_at), Some(id)),
        None => (None, None),
    };

    sqlx::query_as::<_, Transaction>(
        r#"
        SELECT * FROM transactions
        WHERE collective_id = $1
        AND ($2::timestamptz IS NULL OR (created_at, id) < ($2, $3))
        ORDER BY created_at DESC, id DESC
        LIMIT $4
        "#,
    )
    .bind(collective_id)
    .bind(created_at)
    .bind(id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

// --- Settlement Queries ---

pub async fn get_group_settlements<'e, E: PgExecutor<'e>>(
    executor: E,
    group: Uuid,
) -> Result<Vec<TransactionSettlement>> {
    sqlx::query_as::<_, TransactionSettlement>(
        "SELECT * FROM transaction_settlements WHERE transaction_group = $1",
    )
    .bind(group)
    .fetch_all(executor)
    .await
}

pub async fn update_settlement_status(
    tx: &mut SqlxTransaction<'_, Postgres>,
    group: Uuid,
    kind: TransactionKind,
    status: SettlementStatus,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE transaction_settlements
        SET settlement_status = $3, updated_at = NOW()
        WHERE transaction_group = $1 AND kind = $2
        "#,
    )
    .bind(group)
    .bind(kind)
    .bind(status)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn list_settlements(
    pool: &PgPool,
    status: Option<SettlementStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<TransactionSettlement>> {
    sqlx::query_as::<_, TransactionSettlement>(
        r#"
        SELECT * FROM transaction_settlements
        WHERE ($1::settlement_status IS NULL OR settlement_status = $1)
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(status)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

/// Hosts holding debt legs with an OWED settlement created before `before`.
pub async fn hosts_with_owed_settlements(pool: &PgPool, before: DateTime<Utc>) -> Result<Vec<Uuid>> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT DISTINCT t.collective_id
        FROM transactions t
        JOIN transaction_settlements s
            ON s.transaction_group = t.transaction_group AND s.kind = t.kind
        WHERE t.is_debt = TRUE
        AND t.collective_id = t.host_collective_id
        AND s.settlement_status = 'OWED'
        AND t.created_at < $1
        "#,
    )
    .bind(before)
    .fetch_all(pool)
    .await
}

#[derive(Debug, Clone, FromRow)]
pub struct OwedDebt {
    pub settlement_id: Uuid,
    #[sqlx(flatten)]
    pub transaction: Transaction,
}

/// Host-side debt legs still owed, with their settlement rows locked.
pub async fn lock_owed_debts_for_host(
    tx: &mut SqlxTransaction<'_, Postgres>,
    host_id: Uuid,
    before: DateTime<Utc>,
) -> Result<Vec<OwedDebt>> {
    sqlx::query_as::<_, OwedDebt>(
        r#"
        SELECT s.id AS settlement_id, t.*
        FROM transactions t
        JOIN transaction_settlements s
            ON s.transaction_group = t.transaction_group AND s.kind = t.kind
        WHERE t.collective_id = $1
        AND t.is_debt = TRUE
        AND s.settlement_status = 'OWED'
        AND t.created_at < $2
        ORDER BY t.created_at ASC
        FOR UPDATE OF s
        "#,
    )
    .bind(host_id)
    .bind(before)
    .fetch_all(&mut **tx)
    .await
}

pub async fn mark_settlements_invoiced(
    tx: &mut SqlxTransaction<'_, Postgres>,
    settlement_ids: &[Uuid],
    expense_id: Uuid,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE transaction_settlements
        SET settlement_status = 'INVOICED', expense_id = $2, updated_at = NOW()
        WHERE id = ANY($1)
        "#,
    )
    .bind(settlement_ids)
    .bind(expense_id)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

pub async fn settle_expense_settlements(
    tx: &mut SqlxTransaction<'_, Postgres>,
    expense_id: Uuid,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE transaction_settlements
        SET settlement_status = 'SETTLED', updated_at = NOW()
        WHERE expense_id = $1
        "#,
    )
    .bind(expense_id)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

// --- PayPal Product Queries ---

pub async fn get_paypal_product(
    pool: &PgPool,
    collective_id: Uuid,
    tier_id: Option<Uuid>,
) -> Result<Option<PaypalProduct>> {
    sqlx::query_as::<_, PaypalProduct>(
        r#"
        SELECT * FROM paypal_products
        WHERE collective_id = $1 AND tier_id IS NOT DISTINCT FROM $2
        "#,
    )
    .bind(collective_id)
    .bind(tier_id)
    .fetch_optional(pool)
    .await
}

pub async fn insert_paypal_product(pool: &PgPool, product: &PaypalProduct) -> Result<PaypalProduct> {
    sqlx::query_as::<_, PaypalProduct>(
        r#"
        INSERT INTO paypal_products (id, collective_id, tier_id, created_at)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(&product.id)
    .bind(product.collective_id)
    .bind(product.tier_id)
    .bind(product.created_at)
    .fetch_one(pool)
    .await
}

// --- Activity Queries ---

pub async fn insert_activity(pool: &PgPool, activity: &Activity) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO activities (id, type, collective_id, order_id, expense_id, data, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(activity.id)
    .bind(&activity.activity_type)
    .bind(activity.collective_id)
    .bind(activity.order_id)
    .bind(activity.expense_id)
    .bind(&activity.data)
    .bind(activity.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_activities(pool: &PgPool, order_id: Uuid) -> Result<Vec<Activity>> {
    sqlx::query_as::<_, Activity>(
        "SELECT * FROM activities WHERE order_id = $1 ORDER BY created_at ASC",
    )
    .bind(order_id)
    .fetch_all(pool)
    .await
}
