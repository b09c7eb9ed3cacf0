use std::{
    collections::HashSet,
    ffi::OsString,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use eyre::{Context, Result};
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::{
    config::{loader::load_config, models::SimulatorConfig},
    ports::config_provider::ConfigProvider,
};

/// Configuration provider that loads from a local file and watches it, plus any
/// hook modules it references, for changes.
pub struct FileConfigProvider {
    path: PathBuf,
    watcher: Mutex<notify::RecommendedWatcher>,
    watched_dirs: Mutex<HashSet<PathBuf>>,
    watched_names: Arc<Mutex<HashSet<OsString>>>,
    update_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (tx, rx) = mpsc::channel(1);
        let watched_names = Arc::new(Mutex::new(HashSet::new()));

        let names = watched_names.clone();
        let watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        if !(event.kind.is_modify()
                            || event.kind.is_create()
                            || event.kind.is_remove())
                        {
                            return;
                        }
                        let relevant = names.lock().is_ok_and(|names| {
                            event
                                .paths
                                .iter()
                                .filter_map(|p| p.file_name())
                                .any(|name| names.contains(name))
                        });
                        if relevant {
                            tracing::debug!("Watched file changed: {:?}", event.kind);
                            // A pending signal already covers this change.
                            let _ = tx.try_send(());
                        }
                    }
                    Err(e) => tracing::error!("File watch error: {:?}", e),
                }
            })?;

        let provider = Self {
            path: path.clone(),
            watcher: Mutex::new(watcher),
            watched_dirs: Mutex::new(HashSet::new()),
            watched_names,
            update_rx: Mutex::new(Some(rx)),
        };
        provider.watch_file(&path)?;
        Ok(provider)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Also signal a change when `path` is modified, e.g. a declarative hook module.
    pub fn watch_file(&self, path: &Path) -> Result<()> {
        let name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("Invalid watch path: {}", path.display()))?
            .to_owned();
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        self.watched_names
            .lock()
            .map_err(|_| eyre::eyre!("Watched file set is poisoned"))?
            .insert(name);

        let mut dirs = self
            .watched_dirs
            .lock()
            .map_err(|_| eyre::eyre!("Watched directory set is poisoned"))?;
        if dirs.insert(dir.clone()) {
            self.watcher
                .lock()
                .map_err(|_| eyre::eyre!("File watcher is poisoned"))?
                .watch(&dir, RecursiveMode::NonRecursive)
                .wrap_err_with(|| format!("Failed to watch directory {}", dir.display()))?;
            tracing::debug!("Watching {} for changes", dir.display());
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn load_config(&self) -> Result<SimulatorConfig> {
        let path_str = self
            .path
            .to_str()
            .ok_or_else(|| eyre::eyre!("Invalid path: {}", self.path.display()))?;
        load_config(path_str).await
    }

    fn watch(&self) -> Result<mpsc::Receiver<()>> {
        self.update_rx
            .lock()
            .map_err(|_| eyre::eyre!("Watch receiver is poisoned"))?
            .take()
            .ok_or_else(|| eyre::eyre!("watch() can only be called once"))
    }
}
