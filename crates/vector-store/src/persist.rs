use crate::error::{Result, VectorStoreError};
use crate::forest::AnnForest;
use crate::generation::{GenerationHeader, IndexGeneration};
use crate::item_map::ItemMap;
use crate::lock::FileLock;
use crate::metric::Metric;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub const STRUCTURE_FILE_NAME: &str = "similar.ann.json";
pub const ITEM_MAP_FILE_NAME: &str = "similar.map.json";
pub const INDEX_LOCK_FILE_NAME: &str = "index.lock";

#[derive(Debug, Deserialize)]
struct StructureArtifact {
    header: GenerationHeader,
    forest: AnnForest,
}

#[derive(Debug, Deserialize)]
struct ItemMapArtifact {
    header: GenerationHeader,
    items: ItemMap,
}

/// The two persisted artifacts of the active generation inside one directory.
///
/// Both files are replaced together: new contents go to `*.json.tmp` first and
/// are renamed into place only after both writes have been synced. Writers
/// serialize through the exclusive `index.lock` in the same directory, which
/// is shared across processes.
#[derive(Debug, Clone)]
pub struct IndexFiles {
    dir: PathBuf,
}

impl IndexFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn structure_path(&self) -> PathBuf {
        self.dir.join(STRUCTURE_FILE_NAME)
    }

    #[must_use]
    pub fn map_path(&self) -> PathBuf {
        self.dir.join(ITEM_MAP_FILE_NAME)
    }

    #[must_use]
    pub fn structure_tmp_path(&self) -> PathBuf {
        self.structure_path().with_extension("json.tmp")
    }

    #[must_use]
    pub fn map_tmp_path(&self) -> PathBuf {
        self.map_path().with_extension("json.tmp")
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(INDEX_LOCK_FILE_NAME)
    }

    /// Takes the writer lock without waiting; `Ok(None)` while another builder,
    /// in this process or another, holds it.
    pub fn try_lock(&self) -> Result<Option<FileLock>> {
        FileLock::try_acquire(&self.lock_path())
    }

    /// Waits for the writer lock.
    pub async fn lock(&self) -> Result<FileLock> {
        FileLock::acquire(&self.lock_path()).await
    }

    /// True when both artifacts are present on disk.
    pub async fn exists(&self) -> bool {
        path_exists(&self.structure_path()).await && path_exists(&self.map_path()).await
    }

    /// Publishes `generation` as the persisted pair.
    ///
    /// The caller must hold the writer lock. The structure rename is the commit
    /// point: once it succeeds the generation is published even if the map
    /// rename fails, and the next [`IndexFiles::load`] completes it from the
    /// synced map temporary. That case is reported as
    /// [`VectorStoreError::PartiallyPublished`].
    pub async fn save(&self, generation: &IndexGeneration) -> Result<()> {
        let (Some(header), Some(forest), Some(items)) =
            (generation.header(), generation.forest(), generation.items())
        else {
            return Err(VectorStoreError::InconsistentState(
                "refusing to persist an empty generation".into(),
            ));
        };

        tokio::fs::create_dir_all(&self.dir).await?;

        let structure = serde_json::to_vec(&StructureArtifactRef {
            header,
            forest,
        })?;
        let map = serde_json::to_vec(&ItemMapArtifactRef { header, items })?;

        let structure_tmp = self.structure_tmp_path();
        let map_tmp = self.map_tmp_path();

        if let Err(err) = write_synced(&structure_tmp, &structure).await {
            self.discard_temporaries().await;
            return Err(err);
        }
        if let Err(err) = write_synced(&map_tmp, &map).await {
            self.discard_temporaries().await;
            return Err(err);
        }

        if let Err(err) = tokio::fs::rename(&structure_tmp, self.structure_path()).await {
            self.discard_temporaries().await;
            return Err(err.into());
        }
        if let Err(err) = tokio::fs::rename(&map_tmp, self.map_path()).await {
            log::warn!(
                "Generation {:016x} committed but its map is still pending in {}: {err}",
                header.generation,
                map_tmp.display()
            );
            return Err(VectorStoreError::PartiallyPublished {
                generation: header.generation,
                source: err,
            });
        }

        log::info!(
            "Persisted index generation {:016x} ({} items) to {}",
            header.generation,
            header.slot_count,
            self.dir.display()
        );
        Ok(())
    }

    /// Loads the persisted pair.
    ///
    /// Returns `Ok(None)` when neither artifact exists and an
    /// `InconsistentState` error when they exist but do not belong together or
    /// were built for another dimension or metric.
    pub async fn load(&self, dimension: usize, metric: Metric) -> Result<Option<IndexGeneration>> {
        let mut structure: Option<StructureArtifact> =
            read_artifact(&self.structure_path()).await?;
        let mut map: Option<ItemMapArtifact> = read_artifact(&self.map_path()).await?;

        if structure.is_none() && map.is_none() {
            return Ok(None);
        }

        if structure.as_ref().map(|s| s.header) != map.as_ref().map(|m| m.header) {
            // A live builder may be between its two renames; wait for it, then
            // repair only if the pair still disagrees.
            let _lock = self.lock().await?;
            structure = read_artifact(&self.structure_path()).await?;
            map = read_artifact(&self.map_path()).await?;
            if structure.as_ref().map(|s| s.header) != map.as_ref().map(|m| m.header) {
                self.roll_forward(&mut structure, &mut map).await?;
            }
        }

        let (structure, map) = match (structure, map) {
            (Some(structure), Some(map)) => (structure, map),
            (Some(_), None) => {
                return Err(VectorStoreError::InconsistentState(format!(
                    "{} exists without {}",
                    STRUCTURE_FILE_NAME, ITEM_MAP_FILE_NAME
                )))
            }
            (None, _) => {
                return Err(VectorStoreError::InconsistentState(format!(
                    "{} exists without {}",
                    ITEM_MAP_FILE_NAME, STRUCTURE_FILE_NAME
                )))
            }
        };

        if structure.header != map.header {
            return Err(VectorStoreError::InconsistentState(format!(
                "structure generation {:016x} does not match map generation {:016x}",
                structure.header.generation, map.header.generation
            )));
        }
        let header = structure.header;
        if header.dimension != dimension || header.metric != metric {
            return Err(VectorStoreError::InconsistentState(format!(
                "persisted index is {}-d/{} but {dimension}-d/{metric} is configured",
                header.dimension, header.metric
            )));
        }

        IndexGeneration::from_parts(header, structure.forest, map.items).map(Some)
    }

    /// Like [`IndexFiles::load`], but any absence or inconsistency yields the
    /// empty generation.
    pub async fn load_or_empty(&self, dimension: usize, metric: Metric) -> IndexGeneration {
        match self.load(dimension, metric).await {
            Ok(Some(generation)) => {
                log::info!(
                    "Loaded index generation with {} items from {}",
                    generation.len(),
                    self.dir.display()
                );
                generation
            }
            Ok(None) => {
                log::warn!(
                    "No persisted index at {}; starting with an empty index",
                    self.dir.display()
                );
                IndexGeneration::empty(dimension, metric)
            }
            Err(err) => {
                log::warn!(
                    "Ignoring persisted index at {}: {err}; starting with an empty index",
                    self.dir.display()
                );
                IndexGeneration::empty(dimension, metric)
            }
        }
    }

    /// Reads only the map artifact's header, for status reporting.
    pub async fn read_header(&self) -> Result<Option<GenerationHeader>> {
        let map: Option<ItemMapArtifact> = read_artifact(&self.map_path()).await?;
        Ok(map.map(|m| m.header))
    }

    /// Deletes both artifacts and any temporaries.
    pub async fn remove_all(&self) -> Result<()> {
        for path in [
            self.structure_path(),
            self.map_path(),
            self.structure_tmp_path(),
            self.map_tmp_path(),
        ] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => log::info!("Removed {}", path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn roll_forward(
        &self,
        structure: &mut Option<StructureArtifact>,
        map: &mut Option<ItemMapArtifact>,
    ) -> Result<()> {
        if let Some(current) = structure.as_ref() {
            if let Ok(Some(pending)) = read_artifact::<ItemMapArtifact>(&self.map_tmp_path()).await
            {
                if pending.header == current.header {
                    log::warn!(
                        "Completing interrupted publish of generation {:016x}",
                        current.header.generation
                    );
                    tokio::fs::rename(self.map_tmp_path(), self.map_path()).await?;
                    *map = Some(pending);
                    return Ok(());
                }
            }
        }
        if let Some(current) = map.as_ref() {
            if let Ok(Some(pending)) =
                read_artifact::<StructureArtifact>(&self.structure_tmp_path()).await
            {
                if pending.header == current.header {
                    log::warn!(
                        "Completing interrupted publish of generation {:016x}",
                        current.header.generation
                    );
                    tokio::fs::rename(self.structure_tmp_path(), self.structure_path()).await?;
                    *structure = Some(pending);
                }
            }
        }
        Ok(())
    }

    async fn discard_temporaries(&self) {
        for path in [self.structure_tmp_path(), self.map_tmp_path()] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => log::warn!("Failed to remove temporary {}: {err}", path.display()),
            }
        }
    }
}

#[derive(Serialize)]
struct StructureArtifactRef<'a> {
    header: &'a GenerationHeader,
    forest: &'a AnnForest,
}

#[derive(Serialize)]
struct ItemMapArtifactRef<'a> {
    header: &'a GenerationHeader,
    items: &'a ItemMap,
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

async fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::{ForestBuilder, ForestParams};
    use crate::types::ItemId;
    use pretty_assertions::assert_eq;

    fn generation(ids: &[i64]) -> IndexGeneration {
        let mut builder = ForestBuilder::new(3, Metric::Angular);
        let mut items = ItemMap::new();
        for (i, id) in ids.iter().enumerate() {
            let slot = items.push(ItemId(*id)).unwrap();
            builder
                .add_item(slot, vec![1.0, i as f32, (i * i) as f32])
                .unwrap();
        }
        let header = GenerationHeader::fresh(3, Metric::Angular, ids.len());
        IndexGeneration::from_parts(header, builder.build(ForestParams::default()), items).unwrap()
    }

    #[tokio::test]
    async fn save_then_load_restores_generation() {
        let dir = tempfile::tempdir().unwrap();
        let files = IndexFiles::new(dir.path());
        let original = generation(&[5, 6, 7]);
        files.save(&original).await.unwrap();

        assert!(files.exists().await);
        assert!(!files.structure_tmp_path().exists());
        let loaded = files.load(3, Metric::Angular).await.unwrap().unwrap();
        assert_eq!(loaded.summary(), original.summary());
        assert_eq!(loaded.slot_of(ItemId(7)), original.slot_of(ItemId(7)));
    }

    #[tokio::test]
    async fn missing_files_load_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let files = IndexFiles::new(dir.path().join("nothing-here"));
        assert!(files.load(3, Metric::Angular).await.unwrap().is_none());
        assert!(files.load_or_empty(3, Metric::Angular).await.is_empty());
    }

    #[tokio::test]
    async fn mismatched_generations_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let files = IndexFiles::new(dir.path());
        files.save(&generation(&[1, 2])).await.unwrap();
        let old_map = tokio::fs::read(files.map_path()).await.unwrap();
        files.save(&generation(&[1, 2])).await.unwrap();
        tokio::fs::write(files.map_path(), old_map).await.unwrap();

        let err = files.load(3, Metric::Angular).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::InconsistentState(_)));
        assert!(files.load_or_empty(3, Metric::Angular).await.is_empty());
    }

    #[tokio::test]
    async fn structure_without_map_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let files = IndexFiles::new(dir.path());
        files.save(&generation(&[1, 2])).await.unwrap();
        tokio::fs::remove_file(files.map_path()).await.unwrap();

        assert!(!files.exists().await);
        assert!(files.load(3, Metric::Angular).await.is_err());
    }

    #[tokio::test]
    async fn interrupted_publish_rolls_forward() {
        let dir = tempfile::tempdir().unwrap();
        let files = IndexFiles::new(dir.path());
        files.save(&generation(&[1, 2])).await.unwrap();
        let first_map = tokio::fs::read(files.map_path()).await.unwrap();

        let newer = generation(&[3, 4, 5]);
        files.save(&newer).await.unwrap();
        // Simulate a crash after the structure rename but before the map rename.
        tokio::fs::rename(files.map_path(), files.map_tmp_path())
            .await
            .unwrap();
        tokio::fs::write(files.map_path(), first_map).await.unwrap();

        let loaded = files.load(3, Metric::Angular).await.unwrap().unwrap();
        assert_eq!(loaded.generation_id(), newer.generation_id());
        assert!(!files.map_tmp_path().exists());
    }

    #[tokio::test]
    async fn configured_metric_must_match() {
        let dir = tempfile::tempdir().unwrap();
        let files = IndexFiles::new(dir.path());
        files.save(&generation(&[1, 2])).await.unwrap();
        assert!(files.load(3, Metric::Euclidean).await.is_err());
        assert!(files.load(4, Metric::Angular).await.is_err());
    }

    #[tokio::test]
    async fn failed_structure_write_keeps_previous_pair() {
        let dir = tempfile::tempdir().unwrap();
        let files = IndexFiles::new(dir.path());
        let first = generation(&[1, 2]);
        files.save(&first).await.unwrap();

        // A directory squatting on the temporary path makes the structure write fail.
        tokio::fs::create_dir(files.structure_tmp_path()).await.unwrap();
        assert!(files.save(&generation(&[8, 9])).await.is_err());
        assert!(!files.map_tmp_path().exists());

        let loaded = files.load(3, Metric::Angular).await.unwrap().unwrap();
        assert_eq!(loaded.generation_id(), first.generation_id());
    }

    #[tokio::test]
    async fn failed_map_rename_commits_generation_for_next_load() {
        let dir = tempfile::tempdir().unwrap();
        let files = IndexFiles::new(dir.path());
        files.save(&generation(&[1, 2])).await.unwrap();

        tokio::fs::remove_file(files.map_path()).await.unwrap();
        tokio::fs::create_dir(files.map_path()).await.unwrap();
        let newer = generation(&[3, 4, 5]);
        let err = files.save(&newer).await.unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::PartiallyPublished { generation, .. } if Some(generation) == newer.generation_id()
        ));
        assert!(files.map_tmp_path().exists());

        tokio::fs::remove_dir(files.map_path()).await.unwrap();
        let loaded = files.load(3, Metric::Angular).await.unwrap().unwrap();
        assert_eq!(loaded.generation_id(), newer.generation_id());
        assert!(!files.map_tmp_path().exists());
    }

    #[tokio::test]
    async fn writer_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let files = IndexFiles::new(dir.path().join("index"));
        let other = IndexFiles::new(dir.path().join("index"));

        let held = files.try_lock().unwrap().unwrap();
        assert!(other.try_lock().unwrap().is_none());
        drop(held);
        assert!(other.try_lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn remove_all_clears_directory() {
        let dir = tempfile::tempdir().unwrap();
        let files = IndexFiles::new(dir.path());
        files.save(&generation(&[1])).await.unwrap();
        files.remove_all().await.unwrap();
        assert!(!files.structure_path().exists());
        assert!(!files.map_path().exists());
        files.remove_all().await.unwrap();
    }
}
