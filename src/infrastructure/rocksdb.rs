use crate::domain::deal::SwapDeal;
use crate::domain::ports::DealStore;
use crate::error::{Result, SwapError};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use std::path::Path;
use std::sync::Arc;

/// Column Family for storing swap deals.
pub const CF_DEALS: &str = "deals";

/// A persistent deal store using RocksDB.
///
/// Deals live in the `deals` column family, keyed by the raw bytes of their
/// payment hash, with `serde_json` encoded values.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the `deals` column family exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_deals = ColumnFamilyDescriptor::new(CF_DEALS, Options::default());
        let db = DB::open_cf_descriptors(&opts, path, vec![cf_deals])?;

        Ok(Self { db: Arc::new(db) })
    }

    fn deals_cf(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db.cf_handle(CF_DEALS).ok_or_else(|| {
            SwapError::InternalError(Box::new(std::io::Error::other(
                "Deals column family not found",
            )))
        })
    }
}

fn deal_key(r_hash: &str) -> Vec<u8> {
    hex::decode(r_hash).unwrap_or_else(|_| r_hash.as_bytes().to_vec())
}

#[async_trait]
impl DealStore for RocksDBStore {
    async fn save_deal(&self, deal: SwapDeal) -> Result<()> {
        let cf = self.deals_cf()?;
        let value = serde_json::to_vec(&deal).map_err(|e| {
            SwapError::InternalError(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Serialization error: {}", e),
            )))
        })?;
        self.db.put_cf(cf, deal_key(&deal.r_hash), value)?;
        Ok(())
    }

    async fn get_deal(&self, r_hash: &str) -> Result<Option<SwapDeal>> {
        let cf = self.deals_cf()?;
        match self.db.get_cf(cf, deal_key(r_hash))? {
            Some(bytes) => {
                let deal = serde_json::from_slice(&bytes).map_err(|e| {
                    SwapError::InternalError(Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("Deserialization error: {}", e),
                    )))
                })?;
                Ok(Some(deal))
            }
            None => Ok(None),
        }
    }

    async fn all_deals(&self) -> Result<Vec<SwapDeal>> {
        let cf = self.deals_cf()?;
        let mut deals = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item.map_err(|e| {
                SwapError::InternalError(Box::new(std::io::Error::other(format!(
                    "RocksDB iteration error: {}",
                    e
                ))))
            })?;
            let deal: SwapDeal = serde_json::from_slice(&value).map_err(|e| {
                SwapError::InternalError(Box::new(std::io::Error::other(format!(
                    "Failed to deserialize deal: {}",
                    e
                ))))
            })?;
            deals.push(deal);
        }
        deals.sort_by_key(|deal| deal.create_time);
        Ok(deals)
    }
}
