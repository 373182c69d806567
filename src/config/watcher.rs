//! Configuration hot-reload watcher.
//!
//! ## Responsibility
//! Watch a TOML config file for changes and broadcast validated new configs
//! to subscribers. Invalid reloads are logged and rejected; the current
//! config remains unchanged.
//!
//! ## Guarantees
//! - Only validated configs are broadcast
//! - Invalid file edits are logged but do not disrupt the running service
//! - Reloads are debounced: a burst of writes produces one reload, after
//!   the file has been quiet for the debounce interval
//! - The background task exits once the [`ConfigWatcher`] is dropped
//!
//! ## NOT Responsible For
//! - Applying the config to running services (see
//!   [`crate::orchestrator::Orchestrator::apply_config`])
//! - Initial config loading (that belongs to `loader`)

use std::path::PathBuf;
use std::sync::mpsc::TryRecvError;
use std::time::{Duration, Instant};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::loader::load_from_file;
use super::validation::ConfigError;
use super::OrchestratorConfig;

/// Quiet period after the last file event before a reload.
pub const DEBOUNCE: Duration = Duration::from_millis(500);

const POLL: Duration = Duration::from_millis(100);

/// Watches a config file and broadcasts validated updates.
pub struct ConfigWatcher {
    tx: broadcast::Sender<OrchestratorConfig>,
    // Dropping the notify watcher closes the event channel, which ends the
    // background task.
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Watch `path`. The initial config is **not** broadcast; use
    /// [`load_from_file`] for the first load.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file watcher cannot be created or the
    /// parent directory cannot be watched.
    pub fn new(
        path: PathBuf,
    ) -> Result<(Self, broadcast::Receiver<OrchestratorConfig>), ConfigError> {
        let (tx, rx) = broadcast::channel(8);
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| ConfigError::Io {
            file: path.display().to_string(),
            source: std::io::Error::other(e.to_string()),
        })?;

        // Watch the directory so atomic saves (write temp, rename over) are seen.
        let watch_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigError::Io {
                file: watch_dir.display().to_string(),
                source: std::io::Error::other(e.to_string()),
            })?;

        let tx_task = tx.clone();
        tokio::spawn(async move {
            let mut last_event: Option<Instant> = None;
            loop {
                tokio::time::sleep(POLL).await;

                loop {
                    match notify_rx.try_recv() {
                        Ok(event) => {
                            let relevant =
                                matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                                    && event
                                        .paths
                                        .iter()
                                        .any(|p| p.file_name() == path.file_name());
                            if relevant {
                                last_event = Some(Instant::now());
                            }
                        }
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            info!(path = %path.display(), "config watcher stopped");
                            return;
                        }
                    }
                }

                if last_event.is_some_and(|t| t.elapsed() >= DEBOUNCE) {
                    last_event = None;
                    match load_from_file(&path) {
                        Ok(config) => {
                            info!(path = %path.display(), "config reloaded");
                            // No receivers is fine; the config was still validated.
                            let _ = tx_task.send(config);
                        }
                        Err(e) => {
                            warn!(
                                path = %path.display(),
                                error = %e,
                                "config reload rejected, keeping current config"
                            );
                        }
                    }
                }
            }
        });

        Ok((
            Self {
                tx,
                _watcher: watcher,
            },
            rx,
        ))
    }

    /// Another receiver for config updates.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorConfig> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID_TOML: &str = r#"
[security]
threshold = 8

[demo]
max_per_session = 10
"#;

    #[tokio::test]
    async fn test_config_watcher_creation_succeeds() {
        let dir = tempfile::tempdir().expect("test: create tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, VALID_TOML).expect("test: write");

        let (watcher, _rx) = ConfigWatcher::new(path).expect("test: create watcher");
        let _rx2 = watcher.subscribe();
    }

    #[tokio::test]
    async fn test_config_watcher_detects_file_change() {
        let dir = tempfile::tempdir().expect("test: create tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, VALID_TOML).expect("test: write");

        let (_watcher, mut rx) = ConfigWatcher::new(path.clone()).expect("test: create watcher");
        tokio::time::sleep(Duration::from_millis(200)).await;

        let updated = VALID_TOML.replace("threshold = 8", "threshold = 6");
        let mut f = std::fs::File::create(&path).expect("test: open for write");
        f.write_all(updated.as_bytes()).expect("test: write");
        f.sync_all().expect("test: sync");
        drop(f);

        let result = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        let config = result.expect("test: timeout").expect("test: recv");
        assert_eq!(config.security.threshold, 6);
    }

    #[tokio::test]
    async fn test_config_watcher_rejects_invalid_reload() {
        let dir = tempfile::tempdir().expect("test: create tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, VALID_TOML).expect("test: write");

        let (_watcher, mut rx) = ConfigWatcher::new(path.clone()).expect("test: create watcher");
        tokio::time::sleep(Duration::from_millis(200)).await;

        std::fs::write(&path, "[security]\nthreshold = 99\n").expect("test: write invalid");

        let result = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(result.is_err(), "should not broadcast invalid config");
    }

    #[tokio::test]
    async fn test_config_watcher_nonexistent_parent_returns_error() {
        let path = PathBuf::from("/definitely/nonexistent/dir/config.toml");
        assert!(ConfigWatcher::new(path).is_err());
    }
}
