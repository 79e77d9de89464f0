//! Per-day quota ledger for the video provider's unit budget.
//!
//! Reservation is the throttle: a single conditional UPDATE that either
//! books the units under the ceiling or changes nothing. Consumption is
//! unconditional bookkeeping of what actually happened and may exceed the
//! ceiling.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::PgPool;

use crate::job_store::StoreError;
use crate::provider::{Provider, ProviderOp};

#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Atomically add `required` to today's total iff the result stays at or
    /// under `ceiling`. Concurrent callers can never overshoot together.
    async fn reserve(&self, required: i64, ceiling: i64) -> Result<bool, StoreError>;

    /// Unconditional increment.
    async fn consume(&self, units: i64) -> Result<(), StoreError>;

    /// Today's total, 0 when no row exists yet.
    async fn used(&self) -> Result<i64, StoreError>;

    /// Administrative override of today's total.
    async fn set(&self, value: i64) -> Result<(), StoreError>;
}

/// Bill a provider operation to the ledger. No-op for free operations.
pub async fn bill(
    ledger: &dyn QuotaLedger,
    provider: &dyn Provider,
    op: ProviderOp,
) -> Result<(), StoreError> {
    bill_many(ledger, provider, op, 1).await
}

/// Bill `count` repetitions of an operation (bulk inserts).
pub async fn bill_many(
    ledger: &dyn QuotaLedger,
    provider: &dyn Provider,
    op: ProviderOp,
    count: usize,
) -> Result<(), StoreError> {
    let units = provider.quota_cost(op) * count as i64;
    if units > 0 {
        ledger.consume(units).await?;
    }
    Ok(())
}

pub struct PgQuotaLedger {
    pool: PgPool,
    tz: chrono_tz::Tz,
}

impl PgQuotaLedger {
    pub fn new(pool: PgPool, tz: chrono_tz::Tz) -> Self {
        Self { pool, tz }
    }

    /// The provider bills against its own calendar, not the server's.
    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive()
    }

    async fn ensure_row(&self, date: NaiveDate) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO youtube_quota (date, total)
            VALUES ($1, 0)
            ON CONFLICT (date) DO NOTHING
            "#,
        )
        .bind(date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl QuotaLedger for PgQuotaLedger {
    async fn reserve(&self, required: i64, ceiling: i64) -> Result<bool, StoreError> {
        if required == 0 {
            return Ok(true);
        }
        let today = self.today();
        self.ensure_row(today).await?;

        let res = sqlx::query(
            r#"
            UPDATE youtube_quota
            SET total = total + $2
            WHERE date = $1
              AND total + $2 <= $3
            "#,
        )
        .bind(today)
        .bind(required)
        .bind(ceiling)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn consume(&self, units: i64) -> Result<(), StoreError> {
        if units == 0 {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO youtube_quota (date, total)
            VALUES ($1, $2)
            ON CONFLICT (date) DO UPDATE
              SET total = youtube_quota.total + EXCLUDED.total
            "#,
        )
        .bind(self.today())
        .bind(units)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn used(&self) -> Result<i64, StoreError> {
        let total: Option<i64> =
            sqlx::query_scalar(r#"SELECT total FROM youtube_quota WHERE date = $1"#)
                .bind(self.today())
                .fetch_optional(&self.pool)
                .await?;
        Ok(total.unwrap_or(0))
    }

    async fn set(&self, value: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO youtube_quota (date, total)
            VALUES ($1, $2)
            ON CONFLICT (date) DO UPDATE
              SET total = EXCLUDED.total
            "#,
        )
        .bind(self.today())
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
