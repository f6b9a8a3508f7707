//! PostgreSQL implementation of the ledger store.
//!
//! Uses runtime-bound sqlx queries so the workspace builds without a live
//! `DATABASE_URL`. The debit path takes a row-level exclusive lock
//! (`SELECT ... FOR UPDATE`) for the duration of the read-check-write, which
//! serializes concurrent settlements per user across any number of service
//! instances.

use crate::error::{LedgerError, Result};
use crate::store::{
    DEFAULT_STARTING_BALANCE, LedgerAccount, LedgerStore, ProvisionOutcome, Settlement,
    SettlementRequest, SettleOutcome,
};
use fundflow_core::{DonationId, DomainError, PaymentStatus, UserId};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

/// PostgreSQL-backed [`LedgerStore`].
#[derive(Clone)]
pub struct PostgresLedgerStore {
    /// Connection pool, shared by all handlers of a service instance.
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the given database URL with a small pool.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the pool cannot be established.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// The underlying pool, for sharing with the dead-letter queue.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the ledger tables if they do not exist.
    ///
    /// Safe to race across instances; every statement is `IF NOT EXISTS`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if a statement fails.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS ledger_accounts (
                user_id BIGINT PRIMARY KEY,
                username TEXT NOT NULL,
                balance NUMERIC(12, 2) NOT NULL DEFAULT 1000.00 CHECK (balance >= 0),
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS settlements (
                donation_id TEXT PRIMARY KEY,
                user_id BIGINT NOT NULL,
                amount NUMERIC(12, 2) NOT NULL,
                status TEXT NOT NULL,
                reason TEXT,
                new_balance NUMERIC(12, 2),
                settled_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS failed_events (
                id BIGSERIAL PRIMARY KEY,
                topic TEXT NOT NULL,
                event_key TEXT,
                event_type TEXT,
                payload JSONB NOT NULL,
                error_message TEXT NOT NULL,
                error_details TEXT,
                retry_count INT NOT NULL DEFAULT 0,
                first_failed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                last_failed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                status TEXT NOT NULL DEFAULT 'pending',
                resolved_at TIMESTAMPTZ,
                resolved_by TEXT,
                resolution_notes TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("Ledger schema initialized");
        Ok(())
    }

    /// Map a settlement row back to the domain type.
    fn row_to_settlement(row: &PgRow) -> Result<Settlement> {
        let status_str: String = row.try_get("status")?;
        let status = match status_str.as_str() {
            "success" => PaymentStatus::Success,
            "failed" => PaymentStatus::Failed,
            other => {
                return Err(LedgerError::CorruptRow(format!(
                    "unknown settlement status: {other}"
                )));
            },
        };

        Ok(Settlement {
            donation_id: DonationId::from(row.try_get::<String, _>("donation_id")?),
            user_id: UserId(row.try_get("user_id")?),
            amount: row.try_get("amount")?,
            status,
            reason: row.try_get("reason")?,
            new_balance: row.try_get("new_balance")?,
            settled_at: row.try_get("settled_at")?,
        })
    }

    /// Fetch a settlement inside an open transaction.
    async fn find_settlement_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        donation_id: &DonationId,
    ) -> Result<Option<Settlement>> {
        let row = sqlx::query(
            r"
            SELECT donation_id, user_id, amount, status, reason, new_balance, settled_at
            FROM settlements
            WHERE donation_id = $1
            ",
        )
        .bind(donation_id.as_str())
        .fetch_optional(&mut **tx)
        .await?;

        row.as_ref().map(Self::row_to_settlement).transpose()
    }

    /// Insert a settlement row inside an open transaction.
    ///
    /// `ON CONFLICT DO NOTHING` keeps a concurrent redelivery from clobbering
    /// the first recorded outcome; returns whether this call inserted.
    async fn insert_settlement_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        settlement: &Settlement,
    ) -> Result<bool> {
        let status = match settlement.status {
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        };
        let result = sqlx::query(
            r"
            INSERT INTO settlements (donation_id, user_id, amount, status, reason, new_balance, settled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (donation_id) DO NOTHING
            ",
        )
        .bind(settlement.donation_id.as_str())
        .bind(settlement.user_id.0)
        .bind(settlement.amount)
        .bind(status)
        .bind(settlement.reason.as_deref())
        .bind(settlement.new_balance)
        .bind(settlement.settled_at)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a failed settlement and commit.
    async fn record_failure(
        mut tx: sqlx::Transaction<'_, sqlx::Postgres>,
        request: &SettlementRequest,
        reason: &str,
    ) -> Result<SettleOutcome> {
        let settlement = Settlement {
            donation_id: request.donation_id.clone(),
            user_id: request.user_id,
            amount: request.amount,
            status: PaymentStatus::Failed,
            reason: Some(reason.to_string()),
            new_balance: None,
            settled_at: chrono::Utc::now(),
        };

        if Self::insert_settlement_tx(&mut tx, &settlement).await? {
            tx.commit().await?;
            Ok(SettleOutcome::Applied(settlement))
        } else {
            // Lost the race to a concurrent redelivery; return its outcome.
            let existing = Self::find_settlement_tx(&mut tx, &request.donation_id)
                .await?
                .ok_or_else(|| {
                    LedgerError::Database("settlement conflict row vanished".to_string())
                })?;
            tx.commit().await?;
            Ok(SettleOutcome::Replayed(existing))
        }
    }
}

impl LedgerStore for PostgresLedgerStore {
    async fn provision_account(
        &self,
        user_id: UserId,
        username: &str,
    ) -> Result<ProvisionOutcome> {
        // The unique constraint, not a check-then-insert, is what makes this
        // idempotent across concurrent provisioner instances.
        let result = sqlx::query(
            r"
            INSERT INTO ledger_accounts (user_id, username, balance)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO NOTHING
            ",
        )
        .bind(user_id.0)
        .bind(username)
        .bind(DEFAULT_STARTING_BALANCE)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            tracing::info!(
                user_id = %user_id,
                username = username,
                starting_balance = %DEFAULT_STARTING_BALANCE,
                "Ledger account provisioned"
            );
            metrics::counter!("ledger.accounts.provisioned").increment(1);
            Ok(ProvisionOutcome::Created)
        } else {
            tracing::debug!(user_id = %user_id, "Ledger account already exists");
            Ok(ProvisionOutcome::AlreadyExists)
        }
    }

    async fn settle(&self, request: &SettlementRequest) -> Result<SettleOutcome> {
        let mut tx = self.pool.begin().await?;

        // Fast path: already settled.
        if let Some(existing) = Self::find_settlement_tx(&mut tx, &request.donation_id).await? {
            tx.commit().await?;
            return Ok(SettleOutcome::Replayed(existing));
        }

        // Exclusive row lock for the read-check-write.
        let row = sqlx::query("SELECT balance FROM ledger_accounts WHERE user_id = $1 FOR UPDATE")
            .bind(request.user_id.0)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Self::record_failure(
                tx,
                request,
                DomainError::AccountNotProvisioned {
                    user_id: request.user_id.0,
                }
                .reason_code(),
            )
            .await;
        };

        // A concurrent redelivery may have settled this donation while we
        // waited for the lock; re-check now that the row is ours.
        if let Some(existing) = Self::find_settlement_tx(&mut tx, &request.donation_id).await? {
            tx.commit().await?;
            return Ok(SettleOutcome::Replayed(existing));
        }

        let balance: Decimal = row.try_get("balance")?;
        if balance < request.amount {
            return Self::record_failure(
                tx,
                request,
                DomainError::InsufficientBalance {
                    requested: request.amount,
                    available: balance,
                }
                .reason_code(),
            )
            .await;
        }

        let new_balance = balance - request.amount;
        sqlx::query(
            r"
            UPDATE ledger_accounts
            SET balance = $1, updated_at = now()
            WHERE user_id = $2
            ",
        )
        .bind(new_balance)
        .bind(request.user_id.0)
        .execute(&mut *tx)
        .await?;

        let settlement = Settlement {
            donation_id: request.donation_id.clone(),
            user_id: request.user_id,
            amount: request.amount,
            status: PaymentStatus::Success,
            reason: None,
            new_balance: Some(new_balance),
            settled_at: chrono::Utc::now(),
        };
        if !Self::insert_settlement_tx(&mut tx, &settlement).await? {
            // Another writer recorded this donation first; drop our debit
            // and return the recorded outcome instead.
            let existing = Self::find_settlement_tx(&mut tx, &request.donation_id)
                .await?
                .ok_or_else(|| LedgerError::Database("settlement conflict row vanished".to_string()))?;
            tx.rollback().await?;
            return Ok(SettleOutcome::Replayed(existing));
        }
        tx.commit().await?;

        tracing::info!(
            donation_id = %settlement.donation_id,
            user_id = %settlement.user_id,
            amount = %settlement.amount,
            new_balance = %new_balance,
            "Donation settled"
        );
        metrics::counter!("ledger.settlements.success").increment(1);

        Ok(SettleOutcome::Applied(settlement))
    }

    async fn get_account(&self, user_id: UserId) -> Result<Option<LedgerAccount>> {
        let row = sqlx::query(
            r"
            SELECT user_id, username, balance, created_at, updated_at
            FROM ledger_accounts
            WHERE user_id = $1
            ",
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(LedgerAccount {
                user_id: UserId(row.try_get("user_id")?),
                username: row.try_get("username")?,
                balance: row.try_get("balance")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }
}
