//! Backend selection.

use tracing::info;

use shellbridge_backend::{
    tmux_available, BackendKind, PipeBackend, PtyBackend, TerminalBackend, TmuxBackend,
};
use shellbridge_core::{BackendPreference, Error, Platform, Result, SessionConfig, SessionOptions};

/// Decide which backend serves `preference` on `platform`.
///
/// `Auto` picks the pipe backend on Windows, tmux on Unix when it is
/// installed, and a pseudo-terminal otherwise.
///
/// # Examples
///
/// ```
/// use shellbridge_backend::BackendKind;
/// use shellbridge_core::{BackendPreference, Platform};
/// use shellbridge_session::select_backend_kind;
///
/// let kind = select_backend_kind(Platform::Linux, BackendPreference::Auto, false).unwrap();
/// assert_eq!(kind, BackendKind::Pty);
/// ```
pub fn select_backend_kind(
    platform: Platform,
    preference: BackendPreference,
    tmux_available: bool,
) -> Result<BackendKind> {
    match preference {
        BackendPreference::Auto if !platform.is_unix() => Ok(BackendKind::Pipe),
        BackendPreference::Auto if tmux_available => Ok(BackendKind::Tmux),
        BackendPreference::Auto => Ok(BackendKind::Pty),
        BackendPreference::Pipe => Ok(BackendKind::Pipe),
        BackendPreference::Tmux if tmux_available => Ok(BackendKind::Tmux),
        BackendPreference::Tmux => Err(Error::BackendUnavailable(
            "tmux is not installed".to_string(),
        )),
        BackendPreference::Pty if platform.supports_pty() => Ok(BackendKind::Pty),
        BackendPreference::Pty => Err(Error::BackendUnavailable(format!(
            "no pseudo-terminal support on {platform}"
        ))),
    }
}

/// Build an unstarted backend of `kind`.
pub fn build_backend(
    kind: BackendKind,
    options: SessionOptions,
    config: SessionConfig,
) -> Box<dyn TerminalBackend> {
    match kind {
        BackendKind::Pty => Box::new(PtyBackend::new(options, config)),
        BackendKind::Tmux => Box::new(TmuxBackend::new(options, config)),
        BackendKind::Pipe => Box::new(PipeBackend::new(options, config)),
    }
}

/// Select and build the backend for this host.
pub fn create_backend(
    options: &SessionOptions,
    config: &SessionConfig,
) -> Result<Box<dyn TerminalBackend>> {
    let platform = Platform::detect();
    let kind = select_backend_kind(platform, config.backend, tmux_available())?;
    info!("Selected {} backend on {}", kind, platform);
    Ok(build_backend(kind, options.clone(), config.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_selection() {
        let auto = BackendPreference::Auto;
        assert_eq!(
            select_backend_kind(Platform::Windows, auto, true).unwrap(),
            BackendKind::Pipe
        );
        assert_eq!(
            select_backend_kind(Platform::Linux, auto, true).unwrap(),
            BackendKind::Tmux
        );
        assert_eq!(
            select_backend_kind(Platform::MacOS, auto, false).unwrap(),
            BackendKind::Pty
        );
        assert_eq!(
            select_backend_kind(Platform::Unix, auto, false).unwrap(),
            BackendKind::Pty
        );
    }

    #[test]
    fn test_explicit_selection() {
        assert_eq!(
            select_backend_kind(Platform::Linux, BackendPreference::Pipe, true).unwrap(),
            BackendKind::Pipe
        );
        assert_eq!(
            select_backend_kind(Platform::Linux, BackendPreference::Pty, true).unwrap(),
            BackendKind::Pty
        );
        assert_eq!(
            select_backend_kind(Platform::MacOS, BackendPreference::Tmux, true).unwrap(),
            BackendKind::Tmux
        );
    }

    #[test]
    fn test_unavailable_selection() {
        assert!(matches!(
            select_backend_kind(Platform::Linux, BackendPreference::Tmux, false),
            Err(Error::BackendUnavailable(_))
        ));
        assert!(matches!(
            select_backend_kind(Platform::Windows, BackendPreference::Pty, false),
            Err(Error::BackendUnavailable(_))
        ));
    }

    #[test]
    fn test_build_backend_kind() {
        let options = SessionOptions::new(std::env::temp_dir());
        let backend = build_backend(BackendKind::Pipe, options, SessionConfig::default());
        assert_eq!(backend.kind(), BackendKind::Pipe);
        assert!(!backend.is_alive());
    }
}
