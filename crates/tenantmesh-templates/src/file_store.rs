//! File-based TemplateStore implementation

use bytes::Bytes;
use futures::stream::{self, BoxStream};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use tenantmesh_core::{
    Error, Result, TEMPLATE_MANIFEST_FILE, TemplateEntry, TemplateFolder, TemplateStore,
};

/// How often the watcher thread checks whether its stream was dropped
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Type alias for template root change streams
pub type RootChangeStream = BoxStream<'static, Result<RootChange>>;

/// Something changed beneath the template root
#[derive(Debug, Clone)]
pub struct RootChange {
    /// Paths reported by the watcher
    pub paths: Vec<PathBuf>,

    /// Timestamp of the change
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Template store over a local directory
///
/// Each immediate subdirectory of the root is a template folder. A folder
/// is a listed template when it contains a manifest file.
#[derive(Debug, Clone)]
pub struct FileTemplateStore {
    /// Template root directory
    root: PathBuf,
    /// Manifest path relative to each template folder
    manifest_file: String,
}

impl FileTemplateStore {
    /// Create a store over a template root
    ///
    /// The root is used as given; callers expand `~` or variables first.
    ///
    /// # Errors
    /// - `Error::Config` if the root doesn't exist or isn't a directory
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();

        if !root.is_dir() {
            return Err(Error::Config(format!(
                "Template root not found at '{}'",
                root.display()
            )));
        }

        info!("Initialized FileTemplateStore for {:?}", root);

        Ok(Self {
            root,
            manifest_file: TEMPLATE_MANIFEST_FILE.to_string(),
        })
    }

    /// Use a different manifest path inside each template folder
    pub fn with_manifest_file(mut self, manifest_file: impl Into<String>) -> Self {
        self.manifest_file = manifest_file.into();
        self
    }

    pub fn manifest_file(&self) -> &str {
        &self.manifest_file
    }

    /// Append everything beneath `dir` to `out`, parents first
    ///
    /// Symlinks are followed. `ancestors` holds the canonical paths of the
    /// folders being walked, so a link back into one of them is skipped.
    fn walk(
        &self,
        dir: &Path,
        prefix: &str,
        ancestors: &mut Vec<PathBuf>,
        out: &mut Vec<TemplateEntry>,
    ) -> Result<()> {
        ancestors.push(fs::canonicalize(dir)?);
        for (name, path) in sorted_entries(dir)? {
            let relative = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };

            let metadata = fs::metadata(&path)?;
            if metadata.is_dir() {
                if ancestors.contains(&fs::canonicalize(&path)?) {
                    warn!("Skipping symlink cycle at {:?}", path);
                    continue;
                }
                out.push(TemplateEntry::folder(relative.clone()));
                self.walk(&path, &relative, ancestors, out)?;
            } else if metadata.is_file() {
                let content = fs::read(&path)?;
                out.push(TemplateEntry::file(relative, content));
            } else {
                debug!("Skipping special file {:?}", path);
            }
        }
        ancestors.pop();
        Ok(())
    }

    /// Watch the template root for changes
    ///
    /// Returns a stream that emits whenever a file or folder beneath the root
    /// is created, modified or removed. The watcher thread exits shortly
    /// after the stream is dropped.
    pub async fn watch_root(&self) -> Result<RootChangeStream> {
        // Create a channel for file system events
        let (tx, rx) = mpsc::channel(100);

        let root = self.root.clone();

        // Spawn watcher in a blocking task
        tokio::task::spawn_blocking(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher = match RecommendedWatcher::new(
                move |res: std::result::Result<Event, notify::Error>| {
                    if let Err(e) = notify_tx.send(res) {
                        error!("Failed to send template watch event: {}", e);
                    }
                },
                notify::Config::default(),
            ) {
                Ok(w) => w,
                Err(e) => {
                    error!("Failed to create template root watcher: {}", e);
                    return;
                }
            };

            if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
                error!("Failed to watch template root: {}", e);
                return;
            }

            info!("Watching template root for changes: {:?}", root);

            loop {
                let event_result = match notify_rx.recv_timeout(WATCH_POLL_INTERVAL) {
                    Ok(event_result) => event_result,
                    Err(RecvTimeoutError::Timeout) if tx.is_closed() => {
                        debug!("Template root stream dropped, stopping watcher");
                        break;
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                };
                match event_result {
                    Ok(event) => {
                        if matches!(
                            event.kind,
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                        ) {
                            let change = RootChange {
                                paths: event.paths,
                                timestamp: chrono::Utc::now(),
                            };

                            if tx.blocking_send(Ok(change)).is_err() {
                                debug!("Template root stream closed, stopping watcher");
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Template root watch error: {}", e);
                        if tx
                            .blocking_send(Err(Error::Internal(format!(
                                "Template root watch error: {}",
                                e
                            ))))
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        Ok(Box::pin(stream))
    }
}

/// Directory entries with UTF-8 names, sorted by name
fn sorted_entries(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        match entry.file_name().into_string() {
            Ok(name) => entries.push((name, entry.path())),
            Err(name) => warn!("Skipping non UTF-8 entry {:?} in {:?}", name, dir),
        }
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

/// A folder name must be a single plain path segment
fn is_plain_segment(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

impl TemplateStore for FileTemplateStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn list_template_folders(&self) -> Result<Vec<TemplateFolder>> {
        let mut folders = Vec::new();
        for (name, path) in sorted_entries(&self.root)? {
            if path.is_dir() {
                folders.push(TemplateFolder::new(name, path));
            }
        }
        Ok(folders)
    }

    fn open_folder(&self, name: &str) -> Result<Option<TemplateFolder>> {
        if !is_plain_segment(name) {
            warn!("Rejecting template folder name {:?}", name);
            return Ok(None);
        }
        let path = self.root.join(name);
        if path.is_dir() {
            Ok(Some(TemplateFolder::new(name, path)))
        } else {
            Ok(None)
        }
    }

    fn manifest_path(&self, folder: &TemplateFolder) -> PathBuf {
        folder.location.join(&self.manifest_file)
    }

    fn read_manifest(&self, folder: &TemplateFolder) -> Result<Option<Bytes>> {
        let path = self.manifest_path(folder);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(Bytes::from(fs::read(&path)?)))
    }

    fn list_entries_recursive(&self, folder: &TemplateFolder) -> Result<Vec<TemplateEntry>> {
        let mut entries = Vec::new();
        self.walk(&folder.location, "", &mut Vec::new(), &mut entries)?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_root_not_found() {
        let result = FileTemplateStore::new("/nonexistent/templates");
        assert!(matches!(result.unwrap_err(), Error::Config(_)));
    }

    #[test]
    fn test_list_template_folders_skips_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b/template.json", "{}");
        write(dir.path(), "a/template.json", "{}");
        write(dir.path(), "README.md", "not a template");

        let store = FileTemplateStore::new(dir.path()).unwrap();
        let names: Vec<String> = store
            .list_template_folders()
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_read_manifest() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "iot/template.json", r#"{"id":"iot"}"#);
        fs::create_dir_all(dir.path().join("bare")).unwrap();

        let store = FileTemplateStore::new(dir.path()).unwrap();
        let iot = store.open_folder("iot").unwrap().unwrap();
        assert_eq!(
            store.read_manifest(&iot).unwrap().unwrap(),
            Bytes::from_static(br#"{"id":"iot"}"#)
        );

        let bare = store.open_folder("bare").unwrap().unwrap();
        assert!(store.read_manifest(&bare).unwrap().is_none());
    }

    #[test]
    fn test_custom_manifest_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "iot/meta/manifest.json", "{}");

        let store = FileTemplateStore::new(dir.path())
            .unwrap()
            .with_manifest_file("meta/manifest.json");
        let iot = store.open_folder("iot").unwrap().unwrap();
        assert!(store.read_manifest(&iot).unwrap().is_some());
    }

    #[test]
    fn test_open_folder_rejects_escapes() {
        let dir = TempDir::new().unwrap();
        let store = FileTemplateStore::new(dir.path()).unwrap();
        assert!(store.open_folder("..").unwrap().is_none());
        assert!(store.open_folder("a/../..").unwrap().is_none());
        assert!(store.open_folder("missing").unwrap().is_none());
    }

    #[test]
    fn test_list_entries_recursive_parents_first() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "iot/template.json", "{}");
        write(dir.path(), "iot/config/engine.xml", "<engine/>");
        write(dir.path(), "iot/config/scripts/init.js", "init()");

        let store = FileTemplateStore::new(dir.path()).unwrap();
        let folder = store.open_folder("iot").unwrap().unwrap();
        let entries = store.list_entries_recursive(&folder).unwrap();

        let paths: Vec<&str> = entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "config",
                "config/engine.xml",
                "config/scripts",
                "config/scripts/init.js",
                "template.json",
            ]
        );
        assert!(entries[0].is_folder());
        assert_eq!(
            entries[1].content.as_deref(),
            Some(b"<engine/>".as_slice())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_watch_root_reports_new_files() {
        use futures::StreamExt;

        let dir = TempDir::new().unwrap();
        let store = FileTemplateStore::new(dir.path()).unwrap();
        let mut changes = store.watch_root().await.unwrap();

        // Give the watcher time to register
        tokio::time::sleep(Duration::from_millis(100)).await;
        write(dir.path(), "retail/template.json", "{}");

        let change = tokio::time::timeout(Duration::from_secs(5), changes.next())
            .await
            .expect("timed out waiting for change")
            .expect("stream ended")
            .expect("watch error");
        assert!(!change.paths.is_empty());
    }

    #[test]
    fn test_manifest_path_follows_manifest_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "iot/meta/manifest.json", r#"{"id":"iot"}"#);

        let store = FileTemplateStore::new(dir.path())
            .unwrap()
            .with_manifest_file("meta/manifest.json");
        let iot = store.open_folder("iot").unwrap().unwrap();

        assert_eq!(
            store.manifest_path(&iot),
            dir.path().join("iot/meta/manifest.json")
        );
        assert!(store.read_manifest(&iot).unwrap().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_is_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "iot/config/engine.xml", "<engine/>");
        std::os::unix::fs::symlink(dir.path().join("iot"), dir.path().join("iot/config/loop"))
            .unwrap();
        write(dir.path(), "shared/scripts/init.js", "init()");
        std::os::unix::fs::symlink(
            dir.path().join("shared/scripts"),
            dir.path().join("iot/scripts"),
        )
        .unwrap();

        let store = FileTemplateStore::new(dir.path()).unwrap();
        let folder = store.open_folder("iot").unwrap().unwrap();
        let entries = store.list_entries_recursive(&folder).unwrap();

        let paths: Vec<&str> = entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["config", "config/engine.xml", "scripts", "scripts/init.js"]
        );
    }
}
