//! In-memory storage
//!
//! Useful for tests and prototypes; nothing survives the process. Filtering
//! is entirely the matcher's job here — no SQL is involved.

use tokio::sync::RwLock;

use async_trait::async_trait;

use super::{Snapshot, Storage, StoreError, row_matches};
use crate::document::Document;
use crate::predicate::Predicate;

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<Document>>,
    snapshots: RwLock<Vec<Snapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn save_records(&self, records: &[Document]) -> Result<(), StoreError> {
        self.records.write().await.extend_from_slice(records);
        Ok(())
    }

    async fn load_records(&self, query: Option<&Predicate>) -> Result<Vec<Document>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|doc| row_matches(query, doc))
            .cloned()
            .collect())
    }

    async fn save_snapshots(&self, snapshots: &[Snapshot]) -> Result<(), StoreError> {
        let mut stored = self.snapshots.write().await;
        for (key, doc) in snapshots {
            match stored.iter_mut().find(|(existing, _)| existing == key) {
                Some(slot) => slot.1 = doc.clone(),
                None => stored.push((key.clone(), doc.clone())),
            }
        }
        Ok(())
    }

    async fn load_snapshots(
        &self,
        query: Option<&Predicate>,
    ) -> Result<Vec<Document>, StoreError> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .iter()
            .map(|(_, doc)| doc)
            .filter(|doc| row_matches(query, doc))
            .cloned()
            .collect())
    }
}
