//! Settings file watcher
//!
//! Turns file-system change events on the settings file into
//! "settings changed" notifications for the [`ConfigPort`].
//!
//! The parent directory is watched rather than the file itself, so editors
//! that save by writing a new file and renaming it over the old one are
//! picked up as well.
//!
//! [`ConfigPort`]: crate::scope::config::ConfigPort

use super::SettingsError;
use crate::scope::config::ConfigNotifier;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Watches one settings file and notifies on change
pub struct SettingsWatcher {
    path: PathBuf,
    /// The underlying watcher (dropping it stops notifications)
    _watcher: RecommendedWatcher,
}

impl SettingsWatcher {
    /// Start watching `path`
    ///
    /// # Arguments
    /// * `path` - Settings file to watch (need not exist yet)
    /// * `notifier` - Slot that receives one notification per change burst
    pub fn start(path: &Path, notifier: ConfigNotifier) -> Result<Self, SettingsError> {
        let file_name: Option<OsString> = path.file_name().map(|n| n.to_os_string());
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    return;
                }
                let touches_settings = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if touches_settings {
                    tracing::trace!(kind = ?event.kind, "settings_file_changed");
                    notifier.notify();
                }
            }
            Err(e) => tracing::warn!(error = %e, "Settings watcher error"),
        })?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = %path.display(), "Watching settings file for changes");

        Ok(Self {
            path: path.to_path_buf(),
            _watcher: watcher,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
