use crate::domain::deal::SwapDeal;
use crate::domain::ports::DealStore;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory deal store.
///
/// Uses `Arc<RwLock<HashMap<String, SwapDeal>>>` keyed by payment hash, so
/// clones share the same deals. Suited to tests and to running without
/// durable storage.
#[derive(Default, Clone)]
pub struct InMemoryDealStore {
    deals: Arc<RwLock<HashMap<String, SwapDeal>>>,
}

impl InMemoryDealStore {
    /// Creates a new, empty in-memory deal store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DealStore for InMemoryDealStore {
    async fn save_deal(&self, deal: SwapDeal) -> Result<()> {
        let mut deals = self.deals.write().await;
        deals.insert(deal.r_hash.clone(), deal);
        Ok(())
    }

    async fn get_deal(&self, r_hash: &str) -> Result<Option<SwapDeal>> {
        let deals = self.deals.read().await;
        Ok(deals.get(r_hash).cloned())
    }

    async fn all_deals(&self) -> Result<Vec<SwapDeal>> {
        let deals = self.deals.read().await;
        let mut all: Vec<SwapDeal> = deals.values().cloned().collect();
        all.sort_by_key(|deal| deal.create_time);
        Ok(all)
    }
}
