//! Environment passed to spawned shells.
//!
//! The child gets a copy of this process's environment with credentials
//! removed, plus the variables the prompt protocol relies on.

use shellbridge_core::SessionConfig;
use tracing::debug;

use crate::shell::ShellFlavor;

/// Whether `name` looks like it carries a secret.
///
/// Matching is a case-insensitive substring test against each deny pattern.
pub fn is_sensitive(name: &str, denylist: &[String]) -> bool {
    let upper = name.to_ascii_uppercase();
    denylist
        .iter()
        .any(|pattern| !pattern.is_empty() && upper.contains(&pattern.to_ascii_uppercase()))
}

/// Filter `vars` through the deny list.
pub fn sanitize<I>(vars: I, denylist: &[String]) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut removed = 0usize;
    let kept = vars
        .into_iter()
        .filter(|(name, _)| {
            let sensitive = is_sensitive(name, denylist);
            removed += usize::from(sensitive);
            !sensitive
        })
        .collect();
    debug!("Sanitized environment: {} variables removed", removed);
    kept
}

/// Sanitized copy of the current process environment.
///
/// Variables whose name or value is not valid unicode are skipped.
pub fn sanitized_env(denylist: &[String]) -> Vec<(String, String)> {
    let vars = std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)));
    sanitize(vars, denylist)
}

/// Full environment for a shell child: sanitized variables, terminal type,
/// the instrumented PS1 carrying `nonce`, and UTF-8 output for Python tooling.
pub fn shell_env(
    config: &SessionConfig,
    flavor: ShellFlavor,
    nonce: &str,
) -> Vec<(String, String)> {
    let overrides = [
        ("TERM", config.term.clone()),
        ("PS1", flavor.ps1(nonce)),
        ("PYTHONIOENCODING", "utf-8".to_string()),
    ];

    let mut env: Vec<(String, String)> = sanitized_env(&config.env_denylist)
        .into_iter()
        .filter(|(name, _)| !overrides.iter().any(|(o, _)| o == name))
        .collect();
    env.extend(overrides.into_iter().map(|(k, v)| (k.to_string(), v)));
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denylist() -> Vec<String> {
        SessionConfig::default().env_denylist
    }

    #[test]
    fn test_is_sensitive() {
        let deny = denylist();
        assert!(is_sensitive("GITHUB_TOKEN", &deny));
        assert!(is_sensitive("aws_secret_access_key", &deny));
        assert!(is_sensitive("OPENAI_API_KEY", &deny));
        assert!(is_sensitive("DB_PASSWORD", &deny));
        assert!(!is_sensitive("PATH", &deny));
        assert!(!is_sensitive("HOME", &deny));
    }

    #[test]
    fn test_empty_pattern_matches_nothing() {
        assert!(!is_sensitive("PATH", &[String::new()]));
    }

    #[test]
    fn test_sanitize() {
        let vars = vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("MY_TOKEN".to_string(), "abc".to_string()),
            ("LANG".to_string(), "C.UTF-8".to_string()),
        ];
        let kept = sanitize(vars, &denylist());
        let names: Vec<&str> = kept.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["PATH", "LANG"]);
    }

    #[test]
    fn test_shell_env_overrides() {
        let config = SessionConfig::default();
        let env = shell_env(&config, ShellFlavor::Bash, "c0ffee");

        let get = |name: &str| {
            env.iter()
                .filter(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
                .collect::<Vec<_>>()
        };
        assert_eq!(get("TERM"), vec!["xterm-256color"]);
        assert_eq!(get("PYTHONIOENCODING"), vec!["utf-8"]);
        assert_eq!(get("PS1").len(), 1);
        assert!(get("PS1")[0].contains(shellbridge_core::PROMPT_BEGIN));
        assert!(get("PS1")[0].contains("\"nonce\": \"c0ffee\""));
    }

    #[test]
    fn test_posix_ps1_has_real_newlines() {
        let env = shell_env(&SessionConfig::default(), ShellFlavor::Posix, "c0ffee");
        let ps1 = env
            .iter()
            .find(|(k, _)| k == "PS1")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert!(!ps1.contains(r"\n"));
        assert!(ps1.contains("\n###PS1JSON###\n"));
        assert!(ps1.starts_with('\n'));
    }
}
