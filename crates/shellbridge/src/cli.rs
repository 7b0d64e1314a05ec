//! Command-line argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use shellbridge_core::{BackendPreference, SessionConfig, SessionOptions};

/// Runs one instrumented shell and executes each stdin line as a command,
/// printing one JSON reply per line on stdout.
#[derive(Parser, Debug, Clone, Default, PartialEq)]
#[command(name = "shellbridge")]
#[command(version)]
#[command(after_help = "\
Directives:
  !interrupt             Interrupt the running command
  !screen                Print the current screen
  !clear                 Clear the screen buffer

Logs go to stderr; set RUST_LOG to change the level.")]
pub struct CliArgs {
    /// Working directory (default: current directory)
    #[arg(long = "workdir", value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Backend driving the shell (default: auto)
    #[arg(long, value_name = "KIND", value_enum)]
    pub backend: Option<BackendArg>,

    /// Shell executable (default: bash)
    #[arg(long, value_name = "PATH")]
    pub shell: Option<PathBuf>,

    /// Run the shell as this user
    #[arg(long, value_name = "NAME")]
    pub user: Option<String>,

    /// Attach to or create this tmux session
    #[arg(long, value_name = "NAME")]
    pub tmux_session: Option<String>,

    /// Per-command timeout in seconds
    #[arg(long, value_name = "SECS", value_parser = parse_timeout)]
    pub timeout: Option<Duration>,

    /// YAML session configuration
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the JSON schema of replies and exit
    #[arg(long)]
    pub schema: bool,
}

/// `--backend` values.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendArg {
    /// tmux when installed, otherwise pty; pipe on Windows
    Auto,
    /// Pseudo-terminal
    Pty,
    /// Detached tmux pane
    Tmux,
    /// Plain stdio pipes
    #[value(alias = "subprocess")]
    Pipe,
}

impl From<BackendArg> for BackendPreference {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => BackendPreference::Auto,
            BackendArg::Pty => BackendPreference::Pty,
            BackendArg::Tmux => BackendPreference::Tmux,
            BackendArg::Pipe => BackendPreference::Pipe,
        }
    }
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number of seconds"))?;
    if secs <= 0.0 {
        return Err("timeout must be positive".to_string());
    }
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

impl CliArgs {
    /// Session configuration from `--config` with command-line overrides.
    pub fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::from_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => SessionConfig::default(),
        };
        if let Some(backend) = self.backend {
            config.backend = backend.into();
        }
        Ok(config)
    }

    /// Session options from the command line.
    pub fn session_options(&self) -> anyhow::Result<SessionOptions> {
        let work_dir = match &self.work_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("cannot determine current directory")?,
        };
        let mut options = SessionOptions::new(work_dir);
        if let Some(user) = &self.user {
            options = options.with_username(user.clone());
        }
        if let Some(shell) = &self.shell {
            options = options.with_shell(shell.clone());
        }
        if let Some(name) = &self.tmux_session {
            options = options.with_tmux_session(name.clone());
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<CliArgs, clap::Error> {
        CliArgs::try_parse_from(std::iter::once("shellbridge").chain(args.iter().copied()))
    }

    #[test]
    fn test_command_definition() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        assert_eq!(parse(&[]).unwrap(), CliArgs::default());
    }

    #[test]
    fn test_all_flags() {
        let args = parse(&[
            "--workdir",
            "/tmp/proj",
            "--backend",
            "tmux",
            "--shell=/bin/sh",
            "--user",
            "agent",
            "--timeout",
            "1.5",
            "--config",
            "cfg.yaml",
        ])
        .unwrap();
        assert_eq!(args.work_dir, Some(PathBuf::from("/tmp/proj")));
        assert_eq!(args.backend, Some(BackendArg::Tmux));
        assert_eq!(args.shell, Some(PathBuf::from("/bin/sh")));
        assert_eq!(args.user.as_deref(), Some("agent"));
        assert_eq!(args.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(args.config, Some(PathBuf::from("cfg.yaml")));
        assert!(!args.schema);
    }

    #[test]
    fn test_help_and_schema() {
        let err = parse(&["--workdir", "/tmp", "-h"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        assert!(err.to_string().contains("!interrupt"));
        assert!(parse(&["--schema"]).unwrap().schema);
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(parse(&["--backend", "screen"]).is_err());
        assert!(parse(&["--timeout", "0"]).is_err());
        assert!(parse(&["--timeout", "-3"]).is_err());
        assert!(parse(&["--timeout", "NaN"]).is_err());
        assert!(parse(&["--timeout"]).is_err());
        let err = parse(&["--verbose"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_oversized_timeout_rejected() {
        assert!(parse(&["--timeout", "1e300"]).is_err());
        assert!(parse(&["--timeout", "inf"]).is_err());
    }

    #[test]
    fn test_backend_override() {
        let args = parse(&["--backend", "pipe"]).unwrap();
        let config = args.session_config().unwrap();
        assert_eq!(config.backend, BackendPreference::Pipe);

        let args = parse(&["--backend", "subprocess"]).unwrap();
        assert_eq!(args.backend, Some(BackendArg::Pipe));
        assert_eq!(
            parse(&[]).unwrap().session_config().unwrap().backend,
            BackendPreference::Auto
        );
    }

    #[test]
    fn test_session_options() {
        let args = parse(&["--workdir", "/srv", "--user", "agent", "--tmux-session", "work"]).unwrap();
        let options = args.session_options().unwrap();
        assert_eq!(options.work_dir, PathBuf::from("/srv"));
        assert_eq!(options.username.as_deref(), Some("agent"));
        assert_eq!(options.tmux_session.as_deref(), Some("work"));
    }
}
