//! Tenant template catalog
//!
//! The catalog holds an immutable snapshot of the templates found under the
//! template root. A scan builds a complete replacement snapshot and swaps it
//! in under a single write lock; readers clone the current `Arc` and never
//! hold the lock while iterating.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

use tenantmesh_core::{Error, Result, TemplateFolder, TemplateStore, TenantTemplate};

/// Templates loaded by one scan
#[derive(Debug)]
pub struct CatalogSnapshot {
    generation: u64,
    scanned_at: chrono::DateTime<chrono::Utc>,
    templates: BTreeMap<String, Arc<TenantTemplate>>,
}

impl CatalogSnapshot {
    fn empty() -> Self {
        Self {
            generation: 0,
            scanned_at: chrono::Utc::now(),
            templates: BTreeMap::new(),
        }
    }

    /// Scan that produced this snapshot (0 = nothing scanned yet)
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn scanned_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.scanned_at
    }

    pub fn get(&self, id: &str) -> Option<&Arc<TenantTemplate>> {
        self.templates.get(id)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Templates sorted by name. Equal names keep id order.
    pub fn sorted_by_name(&self) -> Vec<Arc<TenantTemplate>> {
        let mut list: Vec<Arc<TenantTemplate>> = self.templates.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }
}

/// Outcome of a catalog scan
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    /// Generation assigned to this scan
    pub generation: u64,
    /// Number of templates in the scanned set
    pub loaded: usize,
    /// Folders whose manifest could not be read or parsed
    pub skipped: Vec<String>,
    /// Whether the scanned set became the current snapshot
    pub published: bool,
}

/// Catalog of tenant templates keyed by template id
pub struct TemplateCatalog {
    store: Arc<dyn TemplateStore>,
    current: RwLock<Arc<CatalogSnapshot>>,
    next_generation: AtomicU64,
}

impl std::fmt::Debug for TemplateCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateCatalog")
            .field("root", &self.store.root())
            .field("generation", &self.snapshot().generation())
            .finish()
    }
}

impl TemplateCatalog {
    /// Create an empty catalog. Call [`scan`](Self::scan) to load templates.
    pub fn new(store: Arc<dyn TemplateStore>) -> Self {
        Self {
            store,
            current: RwLock::new(Arc::new(CatalogSnapshot::empty())),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Load every template under the root and publish the result.
    ///
    /// Folders without a manifest are ignored; folders whose manifest fails to
    /// read or parse are skipped with a warning. If the root itself cannot be
    /// listed the current snapshot is kept. Scans may run concurrently: a
    /// scan that finishes after a newer one is discarded.
    pub fn scan(&self) -> ScanSummary {
        let generation = self.next_generation.fetch_add(1, Ordering::AcqRel);

        let folders = match self.store.list_template_folders() {
            Ok(folders) => folders,
            Err(e) => {
                error!(
                    "Unable to list template root {:?}: {}",
                    self.store.root(),
                    e
                );
                return ScanSummary {
                    generation,
                    loaded: 0,
                    skipped: Vec::new(),
                    published: false,
                };
            }
        };

        let mut templates: BTreeMap<String, Arc<TenantTemplate>> = BTreeMap::new();
        let mut skipped = Vec::new();

        for folder in folders {
            let template = match self.load_template(&folder) {
                Ok(Some(template)) => template,
                Ok(None) => {
                    debug!("Folder '{}' has no template manifest", folder.name);
                    continue;
                }
                Err(e) => {
                    warn!("Skipping template '{}': {}", folder.name, e);
                    skipped.push(folder.name);
                    continue;
                }
            };

            if template.id != folder.name {
                warn!(
                    "Template id '{}' does not match its folder '{}'",
                    template.id, folder.name
                );
            }
            if templates.contains_key(&template.id) {
                warn!(
                    "Duplicate template id '{}' in folder '{}' ignored",
                    template.id, folder.name
                );
                skipped.push(folder.name);
                continue;
            }
            templates.insert(template.id.clone(), Arc::new(template));
        }

        let loaded = templates.len();
        let snapshot = Arc::new(CatalogSnapshot {
            generation,
            scanned_at: chrono::Utc::now(),
            templates,
        });

        let published = {
            let mut current = self
                .current
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if current.generation < generation {
                *current = snapshot.clone();
                true
            } else {
                false
            }
        };

        if published {
            info!("Tenant template catalog found the following templates:");
            for template in snapshot.sorted_by_name() {
                info!("[{}] {}", template.id, template.name);
            }
        } else {
            debug!("Discarding scan {} superseded by a newer scan", generation);
        }

        ScanSummary {
            generation,
            loaded,
            skipped,
            published,
        }
    }

    /// Read and parse one folder's manifest, `Ok(None)` if it has none
    ///
    /// # Errors
    /// - `Error::TemplateParse` if the manifest can't be read or parsed
    fn load_template(&self, folder: &TemplateFolder) -> Result<Option<TenantTemplate>> {
        let parse_error = |reason: String| Error::TemplateParse {
            path: self.store.manifest_path(folder),
            reason,
        };
        let manifest = match self.store.read_manifest(folder) {
            Ok(Some(manifest)) => manifest,
            Ok(None) => return Ok(None),
            Err(e) => return Err(parse_error(e.to_string())),
        };
        TenantTemplate::from_manifest(&manifest)
            .map(Some)
            .map_err(|e| parse_error(e.to_string()))
    }

    /// All templates sorted by name
    pub fn list(&self) -> Vec<Arc<TenantTemplate>> {
        self.snapshot().sorted_by_name()
    }

    /// Template with the given id, if loaded
    pub fn lookup(&self, id: &str) -> Option<Arc<TenantTemplate>> {
        self.snapshot().get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use tenantmesh_core::TemplateEntry;

    /// Template store backed by a map of folder name -> manifest
    #[derive(Default)]
    struct MapStore {
        manifests: Mutex<HashMap<String, Option<&'static str>>>,
        fail_listing: bool,
    }

    impl MapStore {
        fn with(entries: &[(&str, Option<&'static str>)]) -> Self {
            let store = Self::default();
            for (name, manifest) in entries {
                store.set(name, *manifest);
            }
            store
        }

        fn set(&self, name: &str, manifest: Option<&'static str>) {
            self.manifests
                .lock()
                .unwrap()
                .insert(name.to_string(), manifest);
        }

        fn clear(&self) {
            self.manifests.lock().unwrap().clear();
        }
    }

    impl TemplateStore for MapStore {
        fn root(&self) -> &Path {
            Path::new("/templates")
        }

        fn list_template_folders(&self) -> Result<Vec<TemplateFolder>> {
            if self.fail_listing {
                return Err(Error::Internal("disk gone".to_string()));
            }
            let mut names: Vec<String> = self.manifests.lock().unwrap().keys().cloned().collect();
            names.sort();
            Ok(names
                .into_iter()
                .map(|name| TemplateFolder::new(name.clone(), PathBuf::from("/templates").join(name)))
                .collect())
        }

        fn open_folder(&self, name: &str) -> Result<Option<TemplateFolder>> {
            Ok(self
                .manifests
                .lock()
                .unwrap()
                .contains_key(name)
                .then(|| TemplateFolder::new(name, PathBuf::from("/templates").join(name))))
        }

        fn read_manifest(&self, folder: &TemplateFolder) -> Result<Option<Bytes>> {
            Ok(self
                .manifests
                .lock()
                .unwrap()
                .get(&folder.name)
                .copied()
                .flatten()
                .map(|manifest| Bytes::from_static(manifest.as_bytes())))
        }

        fn list_entries_recursive(&self, _folder: &TemplateFolder) -> Result<Vec<TemplateEntry>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_empty_catalog() {
        let catalog = TemplateCatalog::new(Arc::new(MapStore::default()));
        assert!(catalog.list().is_empty());
        assert!(catalog.lookup("anything").is_none());
        assert_eq!(catalog.snapshot().generation(), 0);
    }

    #[test]
    fn test_list_sorted_by_name() {
        let store = MapStore::with(&[
            ("a", Some(r#"{"id":"a","name":"Zebra"}"#)),
            ("b", Some(r#"{"id":"b","name":"Apple"}"#)),
        ]);
        let catalog = TemplateCatalog::new(Arc::new(store));
        let summary = catalog.scan();
        assert_eq!(summary.loaded, 2);
        assert!(summary.published);

        let ids: Vec<String> = catalog.list().iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_sort_is_case_sensitive() {
        let store = MapStore::with(&[
            ("lower", Some(r#"{"id":"lower","name":"apple"}"#)),
            ("upper", Some(r#"{"id":"upper","name":"Banana"}"#)),
        ]);
        let catalog = TemplateCatalog::new(Arc::new(store));
        catalog.scan();

        let names: Vec<String> = catalog.list().iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, vec!["Banana", "apple"]);
    }

    #[test]
    fn test_parse_failure_skips_template() {
        let store = MapStore::with(&[
            ("good", Some(r#"{"id":"good","name":"Good"}"#)),
            ("broken", Some("{not json")),
            ("no-manifest", None),
        ]);
        let catalog = TemplateCatalog::new(Arc::new(store));
        let summary = catalog.scan();

        assert_eq!(summary.loaded, 1);
        assert_eq!(summary.skipped, vec!["broken"]);
        assert!(catalog.lookup("good").is_some());
        assert!(catalog.lookup("broken").is_none());
        assert!(catalog.lookup("no-manifest").is_none());
    }

    #[test]
    fn test_broken_manifest_reports_template_parse() {
        let store = MapStore::with(&[("broken", Some("{not json")), ("bare", None)]);
        let catalog = TemplateCatalog::new(Arc::new(store));

        let broken = TemplateFolder::new("broken", "/templates/broken");
        match catalog.load_template(&broken) {
            Err(Error::TemplateParse { path, reason }) => {
                assert_eq!(path, PathBuf::from("/templates/broken/template.json"));
                assert!(!reason.is_empty());
            }
            other => panic!("expected TemplateParse, got {:?}", other),
        }

        let bare = TemplateFolder::new("bare", "/templates/bare");
        assert!(catalog.load_template(&bare).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_id_keeps_first_folder() {
        let store = MapStore::with(&[
            ("first", Some(r#"{"id":"dup","name":"First"}"#)),
            ("second", Some(r#"{"id":"dup","name":"Second"}"#)),
        ]);
        let catalog = TemplateCatalog::new(Arc::new(store));
        let summary = catalog.scan();

        assert_eq!(summary.loaded, 1);
        assert_eq!(summary.skipped, vec!["second"]);
        assert_eq!(catalog.lookup("dup").unwrap().name, "First");
    }

    #[test]
    fn test_rescan_replaces_snapshot() {
        let store = Arc::new(MapStore::with(&[("a", Some(r#"{"id":"a","name":"A"}"#))]));
        let catalog = TemplateCatalog::new(store.clone());
        catalog.scan();
        let before = catalog.snapshot();

        store.clear();
        store.set("b", Some(r#"{"id":"b","name":"B"}"#));
        catalog.scan();

        assert!(catalog.lookup("a").is_none());
        assert!(catalog.lookup("b").is_some());
        // A reader holding the old snapshot still sees the old set
        assert!(before.get("a").is_some());
        assert!(before.get("b").is_none());
        assert!(catalog.snapshot().generation() > before.generation());
    }

    #[test]
    fn test_listing_failure_keeps_snapshot() {
        let good = MapStore::with(&[("a", Some(r#"{"id":"a","name":"A"}"#))]);
        let catalog = TemplateCatalog::new(Arc::new(good));
        catalog.scan();

        let failing = TemplateCatalog {
            store: Arc::new(MapStore {
                fail_listing: true,
                ..MapStore::default()
            }),
            current: RwLock::new(catalog.snapshot()),
            next_generation: AtomicU64::new(10),
        };
        let summary = failing.scan();
        assert!(!summary.published);
        assert!(failing.lookup("a").is_some());
    }

    #[test]
    fn test_concurrent_scans_never_mix() {
        let store = Arc::new(MapStore::with(&[
            ("a", Some(r#"{"id":"a","name":"A"}"#)),
            ("b", Some(r#"{"id":"b","name":"B"}"#)),
        ]));
        let catalog = Arc::new(TemplateCatalog::new(store));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let catalog = catalog.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        catalog.scan();
                        let snapshot = catalog.snapshot();
                        assert_eq!(snapshot.len(), 2);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(catalog.snapshot().generation(), 400);
    }
}
