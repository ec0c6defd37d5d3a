use crate::error::{Result, VectorStoreError};
use crate::types::{CatalogEntry, EmbeddingVector, ItemId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Read access to the catalog's embeddings.
#[async_trait]
pub trait VectorCatalogReader: Send + Sync {
    /// Every item that currently has an embedding, in a stable order.
    ///
    /// Slot assignment follows this order, so the same catalog state must
    /// always enumerate identically.
    async fn enumerate(&self) -> Result<Vec<CatalogEntry>>;

    /// Current embedding of a single item, `None` if the item is unknown or has
    /// no embedding.
    async fn fetch_vector(&self, item: ItemId) -> Result<Option<EmbeddingVector>>;
}

/// One row of a JSON catalog file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: ItemId,
    #[serde(default)]
    pub embedding: Option<EmbeddingVector>,
}

/// Catalog backed by a JSON array of [`CatalogRecord`]s, re-read on every call.
#[derive(Debug, Clone)]
pub struct JsonFileCatalog {
    path: PathBuf,
}

impl JsonFileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_records(&self) -> Result<Vec<CatalogRecord>> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            VectorStoreError::CatalogError(format!(
                "failed to read catalog {}: {e}",
                self.path.display()
            ))
        })?;
        let mut records: Vec<CatalogRecord> = serde_json::from_slice(&bytes)?;
        records.sort_by_key(|r| r.id);
        Ok(records)
    }
}

#[async_trait]
impl VectorCatalogReader for JsonFileCatalog {
    async fn enumerate(&self) -> Result<Vec<CatalogEntry>> {
        Ok(self
            .read_records()
            .await?
            .into_iter()
            .filter_map(|r| r.embedding.map(|v| CatalogEntry::new(r.id, v)))
            .collect())
    }

    async fn fetch_vector(&self, item: ItemId) -> Result<Option<EmbeddingVector>> {
        Ok(self
            .read_records()
            .await?
            .into_iter()
            .find(|r| r.id == item)
            .and_then(|r| r.embedding))
    }
}

/// In-process catalog ordered by ascending item id.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    items: RwLock<BTreeMap<ItemId, Option<EmbeddingVector>>>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (ItemId, Option<EmbeddingVector>)>) -> Self {
        Self {
            items: RwLock::new(entries.into_iter().collect()),
        }
    }

    /// Inserts or replaces an item. Returns `true` when an existing embedding
    /// changed, which invalidates the current index.
    pub async fn upsert(&self, item: ItemId, embedding: Option<EmbeddingVector>) -> bool {
        let mut items = self.items.write().await;
        match items.insert(item, embedding.clone()) {
            Some(Some(previous)) => embedding.as_ref() != Some(&previous),
            _ => false,
        }
    }

    /// Removes an item. Returns `true` when it had an embedding.
    pub async fn remove(&self, item: ItemId) -> bool {
        matches!(self.items.write().await.remove(&item), Some(Some(_)))
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl VectorCatalogReader for MemoryCatalog {
    async fn enumerate(&self) -> Result<Vec<CatalogEntry>> {
        Ok(self
            .items
            .read()
            .await
            .iter()
            .filter_map(|(id, v)| v.clone().map(|v| CatalogEntry::new(*id, v)))
            .collect())
    }

    async fn fetch_vector(&self, item: ItemId) -> Result<Option<EmbeddingVector>> {
        Ok(self.items.read().await.get(&item).cloned().flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn json_catalog_orders_by_id_and_skips_missing_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        tokio::fs::write(
            &path,
            r#"[
                {"id": 9, "embedding": [1.0, 0.0]},
                {"id": 2, "embedding": null},
                {"id": 4},
                {"id": 1, "embedding": [0.0, 1.0]}
            ]"#,
        )
        .await
        .unwrap();

        let catalog = JsonFileCatalog::new(&path);
        let entries = catalog.enumerate().await.unwrap();
        assert_eq!(
            entries,
            vec![
                CatalogEntry::new(1, vec![0.0, 1.0]),
                CatalogEntry::new(9, vec![1.0, 0.0]),
            ]
        );
        assert_eq!(
            catalog.fetch_vector(ItemId(9)).await.unwrap(),
            Some(vec![1.0, 0.0])
        );
        assert_eq!(catalog.fetch_vector(ItemId(2)).await.unwrap(), None);
        assert_eq!(catalog.fetch_vector(ItemId(77)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn json_catalog_missing_file_is_an_error() {
        let catalog = JsonFileCatalog::new("/definitely/not/here/catalog.json");
        assert!(matches!(
            catalog.enumerate().await,
            Err(VectorStoreError::CatalogError(_))
        ));
    }

    #[tokio::test]
    async fn memory_catalog_reports_invalidating_mutations() {
        let catalog = MemoryCatalog::new();
        assert!(!catalog.upsert(ItemId(1), Some(vec![1.0])).await);
        assert!(!catalog.upsert(ItemId(1), Some(vec![1.0])).await);
        assert!(catalog.upsert(ItemId(1), Some(vec![2.0])).await);
        assert!(catalog.upsert(ItemId(1), None).await);
        assert!(!catalog.remove(ItemId(1)).await);

        catalog.upsert(ItemId(3), Some(vec![3.0])).await;
        catalog.upsert(ItemId(2), Some(vec![2.0])).await;
        let ids: Vec<ItemId> = catalog
            .enumerate()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.item)
            .collect();
        assert_eq!(ids, vec![ItemId(2), ItemId(3)]);
        assert!(catalog.remove(ItemId(3)).await);
    }
}
