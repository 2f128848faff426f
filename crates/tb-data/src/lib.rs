pub mod cache;
pub mod loaders;
pub mod providers;

pub use cache::*;
pub use loaders::*;
pub use providers::*;

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;

use tb_options::ChainSnapshot;
use tb_types::{Symbol, TbResult};

/// Connector that answers chain requests from a [`ChainCache`] before
/// going to the venue.
#[derive(Debug, Clone)]
pub struct CachedConnector {
    inner: Arc<dyn MarketDataConnector>,
    cache: Arc<dyn ChainCache>,
}

impl CachedConnector {
    pub fn new(inner: Arc<dyn MarketDataConnector>, cache: Arc<dyn ChainCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &Arc<dyn ChainCache> {
        &self.cache
    }
}

#[async_trait]
impl MarketDataConnector for CachedConnector {
    async fn get_options_chain(&self, currency: &str) -> TbResult<ChainSnapshot> {
        if let Some(chain) = self.cache.get(currency) {
            return Ok(chain);
        }
        let chain = self.inner.get_options_chain(currency).await?;
        debug!(currency, contracts = chain.len(), "caching fetched chain");
        self.cache.set(currency, chain.clone());
        Ok(chain)
    }

    async fn get_underlying_price(&self, symbol: &Symbol) -> TbResult<Decimal> {
        self.inner.get_underlying_price(symbol).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_second_request_served_from_cache() {
        let chain = ChainSnapshot::new(Symbol::crypto("ETH"), dec!(3000), 0.0, Utc::now());
        let cache = Arc::new(InMemoryChainCache::new());
        let connector = CachedConnector::new(
            Arc::new(StaticConnector::new().with_chain("ETH", chain)),
            cache.clone(),
        );

        connector.get_options_chain("ETH").await.unwrap();
        connector.get_options_chain("ETH").await.unwrap();
        let stats = cache.get_stats();
        assert_eq!(stats.stores, 1);
        assert_eq!(stats.hits, 1);

        assert!(connector.cache().invalidate("ETH"));
        connector.get_options_chain("ETH").await.unwrap();
        assert_eq!(cache.get_stats().stores, 2);
    }
}
