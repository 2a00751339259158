use super::{CoinStore, UserId};
use crate::types::*;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::{info, warn};

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(3))
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Postgres-backed coin store
#[derive(Clone)]
pub struct PgCoinStore {
    pool: PgPool,
}

impl PgCoinStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply embedded migrations
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("✓ Migrations applied");
        Ok(())
    }

    async fn insert_coin_if_missing(
        tx: &mut Transaction<'_, Postgres>,
        coin: &CoinRecord,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO coins (id, symbol, name, price, last_updated)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&coin.id)
        .bind(&coin.symbol)
        .bind(&coin.name)
        .bind(coin.price)
        .bind(coin.last_updated)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn link(tx: &mut Transaction<'_, Postgres>, user_id: UserId, coin_id: &str) -> Result<bool> {
        let done = sqlx::query(
            "INSERT INTO portfolio_coins (user_id, coin_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(coin_id)
        .execute(&mut **tx)
        .await?;

        Ok(done.rows_affected() > 0)
    }

    async fn unlink(tx: &mut Transaction<'_, Postgres>, user_id: UserId, coin_id: &str) -> Result<bool> {
        let done = sqlx::query("DELETE FROM portfolio_coins WHERE user_id = $1 AND coin_id = $2")
            .bind(user_id)
            .bind(coin_id)
            .execute(&mut **tx)
            .await?;

        Ok(done.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl CoinStore for PgCoinStore {
    async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>("SELECT id FROM coins WHERE last_updated < $1")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        Ok(ids)
    }

    async fn apply_prices(&self, updates: &[PriceUpdate]) -> Result<u64> {
        if updates.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = updates.iter().map(|u| u.id.clone()).collect();
        let prices: Vec<Decimal> = updates.iter().map(|u| u.price).collect();

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE coins AS c
             SET price = u.price, last_updated = NOW()
             FROM UNNEST($1::text[], $2::numeric[]) AS u(id, price)
             WHERE c.id = u.id",
        )
        .bind(&ids)
        .bind(&prices)
        .execute(&mut *tx)
        .await;

        let updated = match result {
            Ok(done) => done.rows_affected(),
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback after failed price flush also failed: {}", rollback_err);
                }
                return Err(e.into());
            }
        };

        tx.commit().await?;
        Ok(updated)
    }

    async fn get_coin(&self, id: &str) -> Result<Option<CoinRecord>> {
        let coin = sqlx::query_as::<_, CoinRecord>(
            "SELECT id, symbol, name, price, last_updated FROM coins WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(coin)
    }

    async fn portfolio(&self, user_id: UserId) -> Result<Vec<CoinRecord>> {
        let coins = sqlx::query_as::<_, CoinRecord>(
            "SELECT c.id, c.symbol, c.name, c.price, c.last_updated
             FROM coins c
             JOIN portfolio_coins p ON p.coin_id = c.id
             WHERE p.user_id = $1
             ORDER BY c.symbol, c.id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(coins)
    }

    async fn in_portfolio(&self, user_id: UserId, coin_id: &str) -> Result<bool> {
        let found: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM portfolio_coins WHERE user_id = $1 AND coin_id = $2",
        )
        .bind(user_id)
        .bind(coin_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(found.is_some())
    }

    async fn add_to_portfolio(&self, user_id: UserId, coin: &CoinRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        Self::insert_coin_if_missing(&mut tx, coin).await?;
        if !Self::link(&mut tx, user_id, &coin.id).await? {
            tx.rollback().await?;
            return Err(PriceSyncError::AlreadyInPortfolio(coin.id.clone()));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn replace_in_portfolio(
        &self,
        user_id: UserId,
        from_id: &str,
        to: &CoinRecord,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if !Self::unlink(&mut tx, user_id, from_id).await? {
            tx.rollback().await?;
            return Err(PriceSyncError::NotInPortfolio(from_id.to_string()));
        }
        Self::insert_coin_if_missing(&mut tx, to).await?;
        if !Self::link(&mut tx, user_id, &to.id).await? {
            tx.rollback().await?;
            return Err(PriceSyncError::AlreadyInPortfolio(to.id.clone()));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn remove_from_portfolio(&self, user_id: UserId, coin_id: &str) -> Result<()> {
        let done = sqlx::query("DELETE FROM portfolio_coins WHERE user_id = $1 AND coin_id = $2")
            .bind(user_id)
            .bind(coin_id)
            .execute(&self.pool)
            .await?;

        if done.rows_affected() == 0 {
            return Err(PriceSyncError::NotInPortfolio(coin_id.to_string()));
        }
        Ok(())
    }
}
