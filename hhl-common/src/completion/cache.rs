//! Metadata cache
//!
//! Loads every course and pathway definition from a `ContentStore`, validates
//! the whole set, and publishes it as one immutable `MetadataSnapshot`.
//!
//! **Lifecycle:**
//! 1. `MetadataCache::new()` starts unloaded; lookups fail with
//!    `Error::Configuration`
//! 2. `load()` builds a complete snapshot and swaps it in atomically
//! 3. A failed `load()`/`reload()` puts the cache into a failed state: every
//!    lookup fails until a later load succeeds. Snapshots already handed out
//!    stay valid and consistent.
//!
//! Partial metadata is never published: one malformed definition fails the
//! whole load.

use crate::completion::calculator::CourseCatalog;
use crate::metadata::{CourseDefinition, CourseMetadata, PathwayDefinition, PathwayMetadata};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

/// Source of course and pathway definition documents
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Human-readable location for log lines
    fn describe(&self) -> String;

    async fn course_definitions(&self) -> Result<Vec<CourseDefinition>>;

    async fn pathway_definitions(&self) -> Result<Vec<PathwayDefinition>>;
}

/// Content store backed by `<root>/courses/*.json` and `<root>/pathways/*.json`
#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read and parse every `*.json` file in `subdir`, sorted by file name
    async fn read_documents<T>(&self, subdir: &str) -> Result<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        if !tokio::fs::try_exists(&self.root).await.unwrap_or(false) {
            return Err(Error::Configuration(format!(
                "content directory not found: {}",
                self.root.display()
            )));
        }

        let dir = self.root.join(subdir);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(Error::Configuration(format!(
                "content subdirectory not found: {}",
                dir.display()
            )));
        }

        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", dir.display(), e))
        })?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
                Error::Configuration(format!("cannot read {}: {}", path.display(), e))
            })?;
            let document = serde_json::from_str(&raw).map_err(|e| {
                Error::Configuration(format!("malformed definition {}: {}", path.display(), e))
            })?;
            debug!(file = %path.display(), "Loaded definition");
            documents.push(document);
        }
        Ok(documents)
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    async fn course_definitions(&self) -> Result<Vec<CourseDefinition>> {
        self.read_documents("courses").await
    }

    async fn pathway_definitions(&self) -> Result<Vec<PathwayDefinition>> {
        self.read_documents("pathways").await
    }
}

/// In-memory content store
#[derive(Debug, Clone, Default)]
pub struct StaticContentStore {
    pub courses: Vec<CourseDefinition>,
    pub pathways: Vec<PathwayDefinition>,
}

impl StaticContentStore {
    pub fn new(courses: Vec<CourseDefinition>, pathways: Vec<PathwayDefinition>) -> Self {
        Self { courses, pathways }
    }
}

#[async_trait]
impl ContentStore for StaticContentStore {
    fn describe(&self) -> String {
        "static".to_string()
    }

    async fn course_definitions(&self) -> Result<Vec<CourseDefinition>> {
        Ok(self.courses.clone())
    }

    async fn pathway_definitions(&self) -> Result<Vec<PathwayDefinition>> {
        Ok(self.pathways.clone())
    }
}

/// Immutable, validated set of course and pathway metadata
#[derive(Debug, Clone)]
pub struct MetadataSnapshot {
    courses: BTreeMap<String, Arc<CourseMetadata>>,
    pathways: BTreeMap<String, Arc<PathwayMetadata>>,
    loaded_at: DateTime<Utc>,
}

impl MetadataSnapshot {
    /// Build a snapshot from already-normalized metadata
    ///
    /// Fails on duplicate slugs, on pathways naming a course that does not
    /// exist, and on pathways naming another pathway.
    pub fn new(courses: Vec<CourseMetadata>, pathways: Vec<PathwayMetadata>) -> Result<Self> {
        let mut course_map = BTreeMap::new();
        for course in courses {
            let slug = course.slug().to_string();
            if course_map.insert(slug.clone(), Arc::new(course)).is_some() {
                return Err(Error::Configuration(format!(
                    "course '{}' defined more than once",
                    slug
                )));
            }
        }

        let mut pathway_map = BTreeMap::new();
        for pathway in pathways {
            let slug = pathway.slug().to_string();
            if pathway_map.insert(slug.clone(), Arc::new(pathway)).is_some() {
                return Err(Error::Configuration(format!(
                    "pathway '{}' defined more than once",
                    slug
                )));
            }
        }

        for pathway in pathway_map.values() {
            for course in pathway.courses() {
                if course_map.contains_key(&course.slug) {
                    continue;
                }
                if pathway_map.contains_key(&course.slug) {
                    return Err(Error::Configuration(format!(
                        "pathway '{}' references pathway '{}' as a course",
                        pathway.slug(),
                        course.slug
                    )));
                }
                return Err(Error::Configuration(format!(
                    "pathway '{}' references unknown course '{}'",
                    pathway.slug(),
                    course.slug
                )));
            }
        }

        Ok(Self {
            courses: course_map,
            pathways: pathway_map,
            loaded_at: Utc::now(),
        })
    }

    /// Build a snapshot from raw definition documents
    ///
    /// Legacy module-only pathways are skipped with a warning; they cannot
    /// be evaluated and lookups report them as not found.
    pub fn from_definitions(
        courses: Vec<CourseDefinition>,
        pathways: Vec<PathwayDefinition>,
    ) -> Result<Self> {
        let courses = courses
            .into_iter()
            .map(CourseDefinition::into_metadata)
            .collect::<Result<Vec<_>>>()?;

        let mut normalized = Vec::with_capacity(pathways.len());
        for pathway in pathways {
            if pathway.is_legacy_module_pathway() {
                warn!(pathway = %pathway.slug, "Skipping legacy module-only pathway definition");
                continue;
            }
            normalized.push(pathway.into_metadata()?);
        }

        Self::new(courses, normalized)
    }

    pub fn course(&self, slug: &str) -> Option<&Arc<CourseMetadata>> {
        self.courses.get(slug)
    }

    pub fn pathway(&self, slug: &str) -> Option<&Arc<PathwayMetadata>> {
        self.pathways.get(slug)
    }

    pub fn courses(&self) -> impl Iterator<Item = &Arc<CourseMetadata>> {
        self.courses.values()
    }

    pub fn pathways(&self) -> impl Iterator<Item = &Arc<PathwayMetadata>> {
        self.pathways.values()
    }

    pub fn course_count(&self) -> usize {
        self.courses.len()
    }

    pub fn pathway_count(&self) -> usize {
        self.pathways.len()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

impl CourseCatalog for MetadataSnapshot {
    fn find_course(&self, slug: &str) -> Option<&CourseMetadata> {
        self.courses.get(slug).map(|c| c.as_ref())
    }
}

#[derive(Debug, Clone)]
enum CacheState {
    Unloaded,
    Ready(Arc<MetadataSnapshot>),
    Failed(String),
}

/// Process-lifetime metadata cache with an explicit lifecycle
///
/// Constructed and passed by reference; there is no global instance.
#[derive(Debug)]
pub struct MetadataCache {
    state: RwLock<CacheState>,
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataCache {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState::Unloaded),
        }
    }

    /// Load (or reload) all definitions from `store`
    ///
    /// On success the new snapshot replaces the old one in a single swap.
    /// On failure the cache is marked failed and the error is returned.
    pub async fn load(&self, store: &dyn ContentStore) -> Result<Arc<MetadataSnapshot>> {
        match Self::read_snapshot(store).await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                info!(
                    source = %store.describe(),
                    courses = snapshot.course_count(),
                    pathways = snapshot.pathway_count(),
                    "Metadata loaded"
                );
                self.set_state(CacheState::Ready(snapshot.clone()))?;
                Ok(snapshot)
            }
            Err(e) => {
                error!(source = %store.describe(), error = %e, "Failed to load metadata");
                self.set_state(CacheState::Failed(e.to_string()))?;
                Err(e)
            }
        }
    }

    /// Same as `load()`; named for call sites that refresh a live cache
    pub async fn reload(&self, store: &dyn ContentStore) -> Result<Arc<MetadataSnapshot>> {
        self.load(store).await
    }

    /// Install an already-built snapshot
    pub fn install(&self, snapshot: MetadataSnapshot) -> Result<Arc<MetadataSnapshot>> {
        let snapshot = Arc::new(snapshot);
        self.set_state(CacheState::Ready(snapshot.clone()))?;
        Ok(snapshot)
    }

    /// Current snapshot, or `Error::Configuration` when unloaded or failed
    pub fn snapshot(&self) -> Result<Arc<MetadataSnapshot>> {
        let state = self
            .state
            .read()
            .map_err(|_| Error::Internal("metadata cache lock poisoned".to_string()))?;
        match &*state {
            CacheState::Ready(snapshot) => Ok(snapshot.clone()),
            CacheState::Unloaded => Err(Error::Configuration(
                "metadata cache has not been loaded".to_string(),
            )),
            CacheState::Failed(reason) => Err(Error::Configuration(format!(
                "metadata cache unavailable after failed load: {}",
                reason
            ))),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot().is_ok()
    }

    /// Course lookup; `Ok(None)` means "cannot evaluate", never "complete"
    pub fn get_course_metadata(&self, slug: &str) -> Result<Option<Arc<CourseMetadata>>> {
        Ok(self.snapshot()?.course(slug).cloned())
    }

    /// Pathway lookup; `Ok(None)` means "cannot evaluate", never "complete"
    pub fn get_pathway_metadata(&self, slug: &str) -> Result<Option<Arc<PathwayMetadata>>> {
        Ok(self.snapshot()?.pathway(slug).cloned())
    }

    async fn read_snapshot(store: &dyn ContentStore) -> Result<MetadataSnapshot> {
        let courses = store.course_definitions().await?;
        let pathways = store.pathway_definitions().await?;
        MetadataSnapshot::from_definitions(courses, pathways)
    }

    fn set_state(&self, next: CacheState) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| Error::Internal("metadata cache lock poisoned".to_string()))?;
        *state = next;
        Ok(())
    }
}
