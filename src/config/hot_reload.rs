use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::Config;

/// Live-reloadable configuration holder.
///
/// Wraps `Config` in an `ArcSwap` so readers never block and writers
/// atomically swap the pointer. A signal handler reads the file with
/// [`ConfigHandle::read`], rebuilds the upload worker from it, and only then
/// [`store`](ConfigHandle::store)s it, so the snapshot always matches the
/// running worker.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<ArcSwap<Config>>,
    path: PathBuf,
}

impl ConfigHandle {
    /// Seed a handle; reloads read from `config.config_path`.
    pub fn new(config: Config) -> Self {
        let path = config.config_path.clone();
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
            path,
        }
    }

    /// Current snapshot. Never blocks on a concurrent reload.
    pub fn load(&self) -> arc_swap::Guard<Arc<Config>> {
        self.inner.load()
    }

    /// Owned snapshot for tasks that outlive the guard.
    pub fn load_full(&self) -> Arc<Config> {
        self.inner.load_full()
    }

    /// Load the file behind this handle without swapping it in.
    ///
    /// Environment overrides are re-applied and the result validated.
    pub fn read(&self) -> anyhow::Result<Config> {
        load_from_path(&self.path)
    }

    /// Replace the active snapshot.
    pub fn store(&self, config: Config) {
        self.inner.store(Arc::new(config));
        tracing::info!(path = %self.path.display(), "config snapshot replaced");
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn load_from_path(path: &Path) -> anyhow::Result<Config> {
    let mut config = Config::load_from_path(path)?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}
