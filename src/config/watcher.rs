//! File watcher for the configuration file.
//!
//! Watches the directory containing the config file rather than the file
//! itself, so editors that save by unlink-and-rename are still picked up.
//! A reload is triggered when a debounced batch touches the config file, or
//! when the file's symlink target changes (mounted config maps swap the
//! target of a symlink). Deleting the file ends the watch; the last snapshot
//! stays active.
//!
//! Outcomes are published through a tokio watch channel.

use super::store::{ReloadOutcome, SettingsStore};
use notify_debouncer_mini::{DebouncedEventKind, new_debouncer};
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// How often the blocking loop checks whether its handle is gone.
const HANDLE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Events published by the watcher after each handled change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A new snapshot was applied.
    Reloaded(PathBuf),
    /// The file changed on disk but its contents match the active snapshot.
    Unchanged(PathBuf),
    /// The new contents were rejected; the previous snapshot is still active.
    Failed(String),
    /// The config file was removed; the watcher has stopped.
    Stopped(PathBuf),
    /// The underlying file watcher reported an error.
    Error(String),
}

/// Configuration for the file watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Debounce duration for coalescing rapid changes.
    pub debounce_duration: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(500),
        }
    }
}

/// Handle to a running config watcher. Dropping it stops the watcher.
pub struct ConfigWatcherHandle {
    /// Receiver for watch events. Closed once the watcher stops.
    pub events: watch::Receiver<Option<WatchEvent>>,
    _task_handle: tokio::task::JoinHandle<()>,
}

impl ConfigWatcherHandle {
    /// Wait for the next watch event. Returns `None` once the watcher has stopped.
    pub async fn wait_for_change(&mut self) -> Option<WatchEvent> {
        loop {
            if self.events.changed().await.is_err() {
                return None;
            }
            let event = self.events.borrow_and_update().clone();
            if event.is_some() {
                return event;
            }
        }
    }

    /// Get the latest event without waiting.
    pub fn latest_event(&self) -> Option<WatchEvent> {
        self.events.borrow().clone()
    }
}

/// Start watching `config_file` and reloading `store` on change.
///
/// Returns once the directory watch is registered, so an edit made right
/// after this call is not missed. Must be called within a tokio runtime.
pub fn start_config_watcher(
    store: Arc<SettingsStore>,
    config_file: &Path,
    config: WatcherConfig,
) -> Result<ConfigWatcherHandle, notify::Error> {
    let config_file = config_file.to_path_buf();
    let config_dir = config_file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let (event_tx, event_rx) = watch::channel(None);
    let (notify_tx, notify_rx) = mpsc::channel();

    let mut debouncer = new_debouncer(config.debounce_duration, notify_tx)?;
    debouncer
        .watcher()
        .watch(&config_dir, notify::RecursiveMode::NonRecursive)?;
    debug!(config_file = %config_file.display(), "Watching configuration file for changes");

    let task_handle = tokio::task::spawn_blocking(move || {
        // Keep the debouncer alive for as long as events are processed.
        let _debouncer = debouncer;
        process_notify_events(notify_rx, event_tx, &store, &config_file);
    });

    Ok(ConfigWatcherHandle {
        events: event_rx,
        _task_handle: task_handle,
    })
}

/// What to do with a batch of debounced events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchAction {
    Reload,
    Stop,
    Ignore,
}

/// Decide how to react to a batch.
///
/// `touched` is whether the batch names the config file, `exists` whether
/// the file is present now, and the targets are the symlink-resolved paths
/// before and after the batch.
fn classify(
    touched: bool,
    exists: bool,
    previous_target: Option<&Path>,
    current_target: Option<&Path>,
) -> WatchAction {
    let retargeted = current_target.is_some() && current_target != previous_target;
    if retargeted || (touched && exists) {
        WatchAction::Reload
    } else if touched {
        WatchAction::Stop
    } else {
        WatchAction::Ignore
    }
}

fn process_notify_events(
    rx: mpsc::Receiver<Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>>,
    tx: watch::Sender<Option<WatchEvent>>,
    store: &SettingsStore,
    config_file: &Path,
) {
    let mut real_target = std::fs::canonicalize(config_file).ok();

    loop {
        let events = match rx.recv_timeout(HANDLE_POLL_INTERVAL) {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                error!(error = %e, "error occurred watching for file changes: {}", e);
                if tx.send(Some(WatchEvent::Error(e.to_string()))).is_err() {
                    return;
                }
                continue;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if tx.is_closed() {
                    debug!("Config watcher handle dropped, stopping");
                    return;
                }
                continue;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                info!("Config watcher channel closed, stopping");
                return;
            }
        };

        // Some platforms report canonical paths, so match the resolved target too.
        let touched = events.iter().any(|event| {
            matches!(
                event.kind,
                DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous
            ) && (event.path == config_file || Some(&event.path) == real_target.as_ref())
        });
        let current_target = std::fs::canonicalize(config_file).ok();
        let action = classify(
            touched,
            config_file.exists(),
            real_target.as_deref(),
            current_target.as_deref(),
        );

        let event = match action {
            WatchAction::Ignore => continue,
            WatchAction::Stop => {
                warn!(
                    config_file = %config_file.display(),
                    "configuration file removed; keeping current settings and no longer watching"
                );
                let _ = tx.send(Some(WatchEvent::Stopped(config_file.to_path_buf())));
                return;
            }
            WatchAction::Reload => {
                real_target = current_target;
                reload(store, config_file)
            }
        };

        if tx.send(Some(event)).is_err() {
            info!("Config watcher receiver dropped, stopping");
            return;
        }
    }
}

fn reload(store: &SettingsStore, config_file: &Path) -> WatchEvent {
    match store.reload() {
        Ok(ReloadOutcome::Reloaded) => {
            info!(config_file = %config_file.display(), "Configuration reloaded");
            WatchEvent::Reloaded(config_file.to_path_buf())
        }
        Ok(ReloadOutcome::Unchanged) => {
            debug!(config_file = %config_file.display(), "Configuration change was a no-op");
            WatchEvent::Unchanged(config_file.to_path_buf())
        }
        Err(e) => {
            error!(
                error = %e,
                "aborting reload of configuration file settings: {}", e
            );
            warn!("no changes have been made to the configuration");
            WatchEvent::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_to_config_reloads() {
        let target = Path::new("/etc/json-exec.yaml");
        assert_eq!(
            classify(true, true, Some(target), Some(target)),
            WatchAction::Reload
        );
    }

    #[test]
    fn test_removed_config_stops() {
        let target = Path::new("/etc/json-exec.yaml");
        assert_eq!(classify(true, false, Some(target), None), WatchAction::Stop);
    }

    #[test]
    fn test_unrelated_file_ignored() {
        let target = Path::new("/etc/json-exec.yaml");
        assert_eq!(
            classify(false, true, Some(target), Some(target)),
            WatchAction::Ignore
        );
    }

    #[test]
    fn test_symlink_retarget_reloads() {
        let old = Path::new("/config/..2024_01_01/json-exec.yaml");
        let new = Path::new("/config/..2024_02_01/json-exec.yaml");
        assert_eq!(
            classify(false, true, Some(old), Some(new)),
            WatchAction::Reload
        );
    }

    #[test]
    fn test_file_appearing_reloads() {
        let target = Path::new("/etc/json-exec.yaml");
        assert_eq!(classify(false, true, None, Some(target)), WatchAction::Reload);
    }
}
