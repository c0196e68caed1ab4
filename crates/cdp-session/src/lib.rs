//! Chromium DevTools Protocol session layer.
//!
//! This crate owns the browser side of pagepilot: launching (or connecting
//! to) a Chromium instance, routing raw CDP commands over the websocket,
//! and exposing the small capability surface the automation core consumes
//! via the [`BrowserSession`] trait.

use std::{env, path::PathBuf};

use which::which;

pub mod error;
pub mod metrics;
pub mod session;
pub mod transport;
mod util;

pub use error::{SessionError, SessionErrorKind};
pub use session::{BrowserSession, CdpSession, KeyEvent, TouchPoint};
pub use transport::{CdpTransport, ChromiumTransport, CommandTarget, NoopTransport, TransportEvent};

pub mod ids {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use uuid::Uuid;

    /// Unique identifier for one live debugging connection. Carried in every
    /// session-level log line so concurrent sessions stay distinguishable.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct SessionId(pub Uuid);

    impl SessionId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl Default for SessionId {
        fn default() -> Self {
            Self::new()
        }
    }

    impl fmt::Display for SessionId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            self.0.fmt(f)
        }
    }
}

pub mod config {
    use super::detect_chrome_executable;
    use serde::{Deserialize, Serialize};
    use std::path::{Path, PathBuf};

    /// Construction-time configuration for a debugging session.
    ///
    /// Owned by the caller; the session layer never reads CLI arguments.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct SessionConfig {
        /// Remote debugging port passed to the launched browser.
        pub port: u16,
        /// Run without a visible window.
        pub headless: bool,
        pub executable: PathBuf,
        pub user_data_dir: PathBuf,
        /// Connect to an already-running browser instead of launching one.
        pub websocket_url: Option<String>,
        /// Per-command response deadline.
        pub default_deadline_ms: u64,
    }

    impl Default for SessionConfig {
        fn default() -> Self {
            Self {
                port: 9222,
                headless: true,
                executable: detect_chrome_executable().unwrap_or_default(),
                user_data_dir: default_profile_dir(),
                websocket_url: None,
                default_deadline_ms: 30_000,
            }
        }
    }

    impl SessionConfig {
        pub fn with_headless(mut self, headless: bool) -> Self {
            self.headless = headless;
            self
        }

        pub fn with_port(mut self, port: u16) -> Self {
            self.port = port;
            self
        }
    }

    fn default_profile_dir() -> PathBuf {
        if let Ok(path) = std::env::var("PAGEPILOT_PROFILE") {
            return PathBuf::from(path);
        }
        Path::new("./.pagepilot-profile").into()
    }
}

pub use config::SessionConfig;

fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("PAGEPILOT_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    for name in chrome_executable_names() {
        if let Ok(path) = which(name) {
            return Some(path);
        }
    }

    for candidate in os_specific_chrome_paths() {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    None
}

fn chrome_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(any(target_os = "macos", target_os = "linux", target_os = "freebsd"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        &["chrome"]
    }
}

fn os_specific_chrome_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        let mut paths = Vec::new();
        for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
            if let Ok(value) = env::var(key) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    let root = PathBuf::from(trimmed);
                    paths.push(root.join("Google/Chrome/Application/chrome.exe"));
                    paths.push(root.join("Chromium/Application/chrome.exe"));
                    paths.push(root.join("Microsoft/Edge/Application/msedge.exe"));
                }
            }
        }
        paths
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        Vec::new()
    }
}
