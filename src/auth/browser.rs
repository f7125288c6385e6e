//! Launching the user's browser for the authorization-code flow
//!
//! Callers depend only on the [`BrowserLauncher`] capability. The platform
//! logic lives in a private implementation returned by [`system_browser`]:
//! `open` on macOS, `cmd /c start` on Windows, and on other Unix systems the
//! first launcher from a fixed allow-list that is present on `PATH`.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use thiserror::Error;

/// Launchers tried in order on Linux and the BSDs.
#[cfg_attr(any(target_os = "macos", target_os = "windows"), allow(dead_code))]
const UNIX_LAUNCHERS: &[&str] = &[
    "xdg-open",
    "x-www-browser",
    "www-browser",
    "sensible-browser",
    "gnome-open",
    "kde-open",
    "wslview",
];

/// Failure to hand a URL to a browser.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// No launcher is available on this system.
    #[error("no browser launcher available")]
    NoHandler,

    /// The launcher exists but could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Opens a URL in a browser.
pub trait BrowserLauncher: Send + Sync {
    /// Asks the platform to open `url`. Returns once the launcher has been
    /// started, not when the page has loaded.
    fn open(&self, url: &str) -> std::result::Result<(), LaunchError>;
}

/// Returns the launcher for the current platform.
pub fn system_browser() -> Arc<dyn BrowserLauncher> {
    Arc::new(SystemBrowser)
}

struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> std::result::Result<(), LaunchError> {
        let mut command = platform_command(url)?;
        let program = format!("{:?}", command.get_program());
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| LaunchError::Spawn { program, source })?;

        // Reap the launcher so it does not linger as a zombie.
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(())
    }
}

#[cfg(target_os = "macos")]
fn platform_command(url: &str) -> std::result::Result<Command, LaunchError> {
    let mut command = Command::new("open");
    command.arg(url);
    Ok(command)
}

#[cfg(target_os = "windows")]
fn platform_command(url: &str) -> std::result::Result<Command, LaunchError> {
    // The empty argument is the window title `start` expects first.
    let mut command = Command::new("cmd");
    command.args(["/c", "start", "", url]);
    Ok(command)
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn platform_command(url: &str) -> std::result::Result<Command, LaunchError> {
    let path = std::env::var_os("PATH").unwrap_or_default();
    let launcher = first_available(UNIX_LAUNCHERS, &path).ok_or(LaunchError::NoHandler)?;
    let mut command = Command::new(launcher);
    command.arg(url);
    Ok(command)
}

/// Returns the first of `candidates` present as a file in one of the
/// directories of `path`.
#[cfg_attr(any(target_os = "macos", target_os = "windows"), allow(dead_code))]
fn first_available(candidates: &[&str], path: &std::ffi::OsStr) -> Option<PathBuf> {
    let dirs: Vec<PathBuf> = std::env::split_paths(path).collect();
    candidates.iter().find_map(|name| {
        dirs.iter()
            .map(|dir| dir.join(name))
            .find(|candidate| is_file(candidate))
    })
}

#[cfg_attr(any(target_os = "macos", target_os = "windows"), allow(dead_code))]
fn is_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_available_respects_allow_list_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("wslview"), b"").unwrap();
        std::fs::write(dir.path().join("www-browser"), b"").unwrap();
        std::fs::write(dir.path().join("firefox"), b"").unwrap();

        let found = first_available(UNIX_LAUNCHERS, dir.path().as_os_str()).unwrap();
        assert_eq!(found, dir.path().join("www-browser"));
    }

    #[test]
    fn test_first_available_none_when_no_launcher_installed() {
        let dir = tempfile::tempdir().unwrap();
        assert!(first_available(UNIX_LAUNCHERS, dir.path().as_os_str()).is_none());
    }

    #[test]
    fn test_first_available_ignores_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("xdg-open")).unwrap();
        assert!(first_available(&["xdg-open"], dir.path().as_os_str()).is_none());
    }

    #[test]
    fn test_launch_error_display() {
        assert_eq!(
            LaunchError::NoHandler.to_string(),
            "no browser launcher available"
        );
    }
}
