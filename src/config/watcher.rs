//! Hot reload of the configuration file.
//!
//! Editors often write a file in several steps, so one save can produce a
//! burst of modify events. Each event reloads and validates the file, and a
//! config equal to the last one delivered is dropped. Invalid edits are
//! logged and the running configuration stays in force.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::LinkguardConfig;

/// Watches one configuration file and forwards each new valid config.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<LinkguardConfig>,
    last: Arc<Mutex<Option<LinkguardConfig>>>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end of its updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<LinkguardConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
                last: Arc::new(Mutex::new(None)),
            },
            update_rx,
        )
    }

    /// Start watching on notify's background thread.
    ///
    /// The returned watcher must be kept alive for updates to flow.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();
        let last = Arc::clone(&self.last);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    reload(&path, &last, &tx);
                }
                Ok(_) => {}
                Err(e) => tracing::error!(path = %path.display(), error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %self.path.display(), "Config watcher started");
        Ok(watcher)
    }
}

/// Load `path` and forward it unless invalid or unchanged. Returns whether
/// an update was sent.
fn reload(
    path: &Path,
    last: &Mutex<Option<LinkguardConfig>>,
    tx: &mpsc::UnboundedSender<LinkguardConfig>,
) -> bool {
    let config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(
                path = %path.display(),
                error = %e,
                "Config reload failed, keeping current configuration"
            );
            return false;
        }
    };

    let mut last = last.lock().expect("config watcher mutex poisoned");
    if last.as_ref() == Some(&config) {
        tracing::debug!(path = %path.display(), "Config unchanged, skipping reload");
        return false;
    }

    tracing::info!(path = %path.display(), "Config reloaded");
    *last = Some(config.clone());
    tx.send(config).is_ok()
}
