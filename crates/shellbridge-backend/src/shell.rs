//! Shell executable resolution and launch command construction.

use std::path::{Path, PathBuf};

use shellbridge_core::{Error, PromptProtocol, Result};
use tracing::{debug, info};

#[cfg(unix)]
const FALLBACK_SHELLS: &[&str] = &["/bin/bash", "/usr/bin/bash", "/usr/local/bin/bash", "/bin/sh"];

#[cfg(windows)]
const FALLBACK_SHELLS: &[&str] = &[
    r"C:\Program Files\Git\bin\bash.exe",
    r"C:\Program Files\Git\usr\bin\bash.exe",
    r"C:\Program Files (x86)\Git\bin\bash.exe",
];

/// Family of shell, which decides how the prompt is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShellFlavor {
    /// GNU bash (PS1 escapes, `PROMPT_COMMAND`)
    Bash,
    /// Plain POSIX sh; PS1 from the environment, no prompt directive
    Posix,
    /// Windows PowerShell / pwsh (`prompt` function)
    PowerShell,
}

impl ShellFlavor {
    /// Derive the flavor from the executable's file name.
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.contains("bash") {
            ShellFlavor::Bash
        } else if name.contains("powershell") || name == "pwsh" {
            ShellFlavor::PowerShell
        } else {
            ShellFlavor::Posix
        }
    }

    /// Input line that installs the instrumented prompt, if one is needed.
    pub fn prompt_directive(&self, nonce: &str) -> Option<String> {
        match self {
            ShellFlavor::Bash => Some(PromptProtocol::prompt_command(nonce)),
            ShellFlavor::PowerShell => Some(PromptProtocol::render_powershell_prompt(nonce)),
            ShellFlavor::Posix => None,
        }
    }

    /// Initial PS1 value exported to the child.
    ///
    /// Plain sh does not expand the `\n` prompt escape, so it gets literal
    /// newlines instead.
    pub fn ps1(&self, nonce: &str) -> String {
        match self {
            ShellFlavor::Posix => PromptProtocol::render_prompt(nonce).replace(r"\n", "\n"),
            _ => PromptProtocol::render_prompt(nonce),
        }
    }

    /// Line terminator the shell expects on its input.
    pub fn line_ending(&self) -> &'static str {
        match self {
            ShellFlavor::PowerShell => "\r\n",
            _ => "\n",
        }
    }
}

/// Look an executable up on `PATH`.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).find_map(|dir| {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{name}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}

/// Resolve the shell to run.
///
/// An explicit path must exist. Otherwise `bash` is looked up on `PATH`,
/// then in well-known install locations, and on Windows PowerShell is the
/// last resort.
pub fn resolve_shell(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        if let Some(found) = path.to_str().and_then(find_in_path) {
            return Ok(found);
        }
        return Err(Error::BackendUnavailable(format!(
            "shell '{}' not found",
            path.display()
        )));
    }

    if let Some(bash) = find_in_path("bash") {
        debug!("Resolved bash on PATH: {}", bash.display());
        return Ok(bash);
    }

    if let Some(found) = FALLBACK_SHELLS.iter().map(Path::new).find(|p| p.is_file()) {
        debug!("Resolved fallback shell: {}", found.display());
        return Ok(found.to_path_buf());
    }

    if cfg!(windows) {
        if let Some(ps) = find_in_path("powershell").or_else(|| find_in_path("pwsh")) {
            return Ok(ps);
        }
    }

    Err(Error::BackendUnavailable(
        "could not find bash or another usable shell".to_string(),
    ))
}

/// Program and arguments that start an interactive shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    /// Executable to spawn
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Flavor of the underlying shell
    pub flavor: ShellFlavor,
    /// Resolved shell path
    pub shell: PathBuf,
}

impl ShellCommand {
    /// Interactive shell for `shell`, optionally run as `username`.
    ///
    /// `line_editing` keeps readline enabled; backends that read a raw byte
    /// stream disable it so redraw sequences never reach the output.
    pub fn interactive(shell: &Path, username: Option<&str>, line_editing: bool) -> Self {
        let flavor = ShellFlavor::from_path(shell);
        let shell_str = shell.to_string_lossy().to_string();

        let args: Vec<String> = match flavor {
            ShellFlavor::Bash if line_editing => vec!["-i".to_string()],
            ShellFlavor::Bash => vec!["--noediting".to_string(), "-i".to_string()],
            ShellFlavor::Posix => vec!["-i".to_string()],
            ShellFlavor::PowerShell => vec!["-NoLogo".to_string(), "-NoExit".to_string()],
        };

        let command = match username {
            Some(user) if flavor != ShellFlavor::PowerShell => {
                info!("Running shell as user '{}'", user);
                let inner = std::iter::once(shell_str.clone())
                    .chain(args.iter().cloned())
                    .collect::<Vec<_>>()
                    .join(" ");
                Self {
                    program: "su".to_string(),
                    args: vec![
                        user.to_string(),
                        "-s".to_string(),
                        shell_str,
                        "-c".to_string(),
                        format!("exec {inner}"),
                    ],
                    flavor,
                    shell: shell.to_path_buf(),
                }
            }
            _ => Self {
                program: shell_str,
                args,
                flavor,
                shell: shell.to_path_buf(),
            },
        };
        debug!("Shell command: {} {:?}", command.program, command.args);
        command
    }

    /// Single command-line string (for launchers that take one string).
    pub fn to_command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(quote_arg)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Command line that starts the shell under exactly `env`, for launchers
    /// that would otherwise pass their own environment through.
    pub fn to_command_line_with_env(&self, env: &[(String, String)]) -> String {
        let assignments = env
            .iter()
            .map(|(k, v)| quote_arg(&format!("{k}={v}")))
            .collect::<Vec<_>>()
            .join(" ");
        format!("env -i {} {}", assignments, self.to_command_line())
    }
}

/// Quote one argument for a POSIX shell command line.
fn quote_arg(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@+,".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
