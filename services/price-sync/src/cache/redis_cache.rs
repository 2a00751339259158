// Redis cache implementation
use super::{coin_key, normalize_symbol, symbol_key, InitLock, MetadataCache};
use crate::types::*;
use redis::AsyncCommands;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone)]
pub struct RedisCache {
    client: redis::aio::MultiplexedConnection,
}

impl RedisCache {
    pub async fn new(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;

        Ok(Self { client: conn })
    }

    /// Rebuild a coin from its hash fields, `None` for an empty or partial hash
    fn coin_from_fields(fields: HashMap<String, String>) -> Option<CachedCoin> {
        let id = fields.get("id")?.clone();
        let symbol = fields.get("symbol")?.clone();
        let name = fields.get("name")?.clone();
        let price = fields
            .get("price")
            .and_then(|p| Decimal::from_str(p).ok())
            .unwrap_or(Decimal::ZERO);

        Some(CachedCoin { id, symbol, name, price })
    }
}

#[async_trait::async_trait]
impl MetadataCache for RedisCache {
    async fn put(&self, coin: &CachedCoin) -> Result<()> {
        let symbol = normalize_symbol(&coin.symbol);
        let fields = [
            ("id", coin.id.clone()),
            ("symbol", symbol.clone()),
            ("name", coin.name.clone()),
            ("price", coin.price.to_string()),
        ];

        let mut conn = self.client.clone();
        let previous: Option<String> = conn.hget(coin_key(&coin.id), "symbol").await?;

        // MULTI/EXEC so readers never see the index entry without its hash
        let mut pipe = redis::pipe();
        pipe.atomic();
        if let Some(old) = previous.filter(|old| *old != symbol) {
            pipe.srem(symbol_key(&old), &coin.id).ignore();
        }
        pipe.hset_multiple(coin_key(&coin.id), &fields)
            .ignore()
            .sadd(symbol_key(&symbol), &coin.id)
            .ignore();
        let _: () = pipe.query_async(&mut conn).await?;

        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<CachedCoin>> {
        let fields: HashMap<String, String> = self.client.clone().hgetall(coin_key(id)).await?;
        Ok(Self::coin_from_fields(fields))
    }

    async fn get_by_symbol(&self, symbol: &str) -> Result<Vec<CachedCoin>> {
        let mut conn = self.client.clone();
        let ids: Vec<String> = conn.smembers(symbol_key(symbol)).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hgetall(coin_key(id));
        }
        let hashes: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        Ok(hashes.into_iter().filter_map(Self::coin_from_fields).collect())
    }
}

#[async_trait::async_trait]
impl InitLock for RedisCache {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        // SET NX EX in one command: no window where the key exists without a TTL
        let mut conn = self.client.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("locked")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_coin_from_fields() {
        let coin = RedisCache::coin_from_fields(fields(&[
            ("id", "bitcoin"),
            ("symbol", "btc"),
            ("name", "Bitcoin"),
            ("price", "50000.25"),
        ]))
        .unwrap();

        assert_eq!(coin.id, "bitcoin");
        assert_eq!(coin.price, Decimal::from_str("50000.25").unwrap());
    }

    #[test]
    fn test_missing_hash_is_none() {
        assert!(RedisCache::coin_from_fields(HashMap::new()).is_none());
        assert!(RedisCache::coin_from_fields(fields(&[("id", "bitcoin")])).is_none());
    }

    /// Needs a running Redis at REDIS_URL
    #[tokio::test]
    #[ignore]
    async fn test_put_and_lookup_against_redis() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".into());
        let cache = RedisCache::new(&url).await.unwrap();
        let coin = CachedCoin {
            id: "price-sync-test-coin".into(),
            symbol: "PSTC".into(),
            name: "Price Sync Test".into(),
            price: Decimal::ZERO,
        };

        cache.put(&coin).await.unwrap();

        let found = cache.get_by_id(&coin.id).await.unwrap().unwrap();
        assert_eq!(found.symbol, "pstc");
        let by_symbol = cache.get_by_symbol("pstc").await.unwrap();
        assert!(by_symbol.iter().any(|c| c.id == coin.id));

        let renamed = CachedCoin {
            symbol: "PSTX".into(),
            ..coin.clone()
        };
        cache.put(&renamed).await.unwrap();
        let old = cache.get_by_symbol("pstc").await.unwrap();
        assert!(old.iter().all(|c| c.id != coin.id));
        let new = cache.get_by_symbol("pstx").await.unwrap();
        assert!(new.iter().any(|c| c.id == coin.id));
    }
}
