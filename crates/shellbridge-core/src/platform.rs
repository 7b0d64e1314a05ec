//! Platform detection for backend selection.

use serde::{Deserialize, Serialize};

/// Host platforms that determine which backends are usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Linux, including under WSL
    Linux,
    /// macOS
    MacOS,
    /// Native Windows
    Windows,
    /// Any other Unix (BSDs and friends)
    Unix,
}

impl Platform {
    /// Detect the current platform at runtime.
    ///
    /// # Examples
    ///
    /// ```
    /// use shellbridge_core::Platform;
    ///
    /// let platform = Platform::detect();
    /// println!("Running on: {platform}");
    /// ```
    pub fn detect() -> Self {
        #[cfg(target_os = "linux")]
        {
            Platform::Linux
        }

        #[cfg(target_os = "macos")]
        {
            Platform::MacOS
        }

        #[cfg(target_os = "windows")]
        {
            Platform::Windows
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            Platform::Unix
        }
    }

    /// Get the platform name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Linux => "Linux",
            Platform::MacOS => "macOS",
            Platform::Windows => "Windows",
            Platform::Unix => "Unix",
        }
    }

    /// Check if this is a Unix-like platform.
    pub fn is_unix(&self) -> bool {
        !matches!(self, Platform::Windows)
    }

    /// Whether the pseudo-terminal backend can drive a shell here.
    ///
    /// Native Windows is served by the pipe backend.
    pub fn supports_pty(&self) -> bool {
        self.is_unix()
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
