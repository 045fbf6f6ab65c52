//! Environment access for config loading.
//!
//! Two things read the environment while a snapshot is built:
//! - `${VAR}` substitution inside user config and theme files, limited to an
//!   allowlist so a shared or downloaded file cannot exfiltrate secrets
//! - the `LUMEN_*` overlay layer (see [`crate::loader`])
//!
//! Both go through an [`Environment`] captured once per load cycle, so a
//! cycle sees one consistent view and tests can supply their own variables.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Prefix for lumen's own environment variables.
pub const ENV_PREFIX: &str = "LUMEN_";

/// Matches `${VAR_NAME}` or `${VAR_NAME:-default value}`.
static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-((?:[^}\\]|\\.)*))?}")
        .expect("env-var substitution regex is a compile-time constant and must be valid")
});

/// Matches `allow-all-env-vars: true` at the top level of a YAML document.
static ALLOW_ALL_ENV_VARS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^allow-all-env-vars\s*[:=]\s*true\s*$")
        .expect("allow-all-env-vars pre-scan regex is a compile-time constant and must be valid")
});

/// Variables that may be substituted into config files without opting in.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "HOME",
    "USER",
    "USERNAME",
    "LOGNAME",
    "USERPROFILE",
    "SHELL",
    "TERM",
    "LANG",
    "COLORTERM",
    "TERM_PROGRAM",
    "XDG_CONFIG_HOME",
    "XDG_DATA_HOME",
    "XDG_STATE_HOME",
    "XDG_CACHE_HOME",
    "XDG_RUNTIME_DIR",
    "TMPDIR",
    "TEMP",
    "TMP",
    "HOSTNAME",
    "HOST",
    "TZ",
    "APPDATA",
    "LOCALAPPDATA",
];

/// Check whether a variable may be substituted without `allow-all-env-vars`.
///
/// Allowed are the names in [`ALLOWED_ENV_VARS`] plus anything starting with
/// `LUMEN_` or `LC_`.
pub fn is_env_var_allowed(var_name: &str) -> bool {
    ALLOWED_ENV_VARS.contains(&var_name)
        || var_name.starts_with(ENV_PREFIX)
        || var_name.starts_with("LC_")
}

/// A point-in-time copy of environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Copy the current process environment. Variables whose name or value
    /// is not valid Unicode are skipped.
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
        }
    }

    /// An environment with no variables at all.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Variables whose name starts with `prefix`, in name order.
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.vars
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Substitute `${VAR}` placeholders in raw config text.
    ///
    /// The allowlist is bypassed when the text itself sets
    /// `allow-all-env-vars: true` at the top level.
    pub fn substitute(&self, input: &str) -> String {
        let allow_all = pre_scan_allow_all_env_vars(input);
        substitute_with(input, allow_all, |name| self.get(name).map(str::to_string))
    }
}

/// Substitute `${VAR}` patterns in a string using `lookup`.
///
/// - `${VAR}` becomes the value of `VAR`; an unset variable leaves the
///   placeholder unchanged
/// - `${VAR:-default}` falls back to `default` when `VAR` is unset
/// - `$${VAR}` is an escape producing the literal `${VAR}`
///
/// Unless `allow_all` is set, variables that fail [`is_env_var_allowed`] are
/// left verbatim and a warning is logged.
pub fn substitute_with(
    input: &str,
    allow_all: bool,
    lookup: impl Fn(&str) -> Option<String>,
) -> String {
    let escaped_placeholder = "\x00ESC_DOLLAR\x00";
    let working = input.replace("$${", escaped_placeholder);

    let result = ENV_VAR_PATTERN.replace_all(&working, |caps: &regex::Captures| {
        let var_name = &caps[1];

        if !allow_all && !is_env_var_allowed(var_name) {
            log::warn!(
                "Config references non-allowlisted environment variable ${{{var_name}}}; left as-is. \
                 Set `allow-all-env-vars: true` in the file to allow it."
            );
            return caps[0].to_string();
        }

        match lookup(var_name) {
            Some(value) => value,
            None => caps
                .get(2)
                .map(|m| m.as_str().replace("\\}", "}"))
                .unwrap_or_else(|| caps[0].to_string()),
        }
    });

    result.replace(escaped_placeholder, "${")
}

/// Look for `allow-all-env-vars: true` before the text is parsed, since
/// substitution has to happen first.
pub(crate) fn pre_scan_allow_all_env_vars(raw: &str) -> bool {
    ALLOW_ALL_ENV_VARS_PATTERN.is_match(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        Environment::from_pairs([
            ("HOME", "/home/tester"),
            ("LUMEN_THEME", "nord"),
            ("SECRET_TOKEN", "hunter2"),
        ])
    }

    #[test]
    fn test_allowlisted_variable_is_substituted() {
        assert_eq!(env().substitute("dir: ${HOME}/logs"), "dir: /home/tester/logs");
        assert_eq!(env().substitute("theme: ${LUMEN_THEME}"), "theme: nord");
    }

    #[test]
    fn test_non_allowlisted_variable_is_left_verbatim() {
        assert_eq!(env().substitute("token: ${SECRET_TOKEN}"), "token: ${SECRET_TOKEN}");
    }

    #[test]
    fn test_allow_all_opt_in() {
        let text = "allow-all-env-vars: true\ntoken: ${SECRET_TOKEN}\n";
        assert_eq!(
            env().substitute(text),
            "allow-all-env-vars: true\ntoken: hunter2\n"
        );
    }

    #[test]
    fn test_default_value_and_escape() {
        assert_eq!(env().substitute("tz: ${TZ:-UTC}"), "tz: UTC");
        assert_eq!(env().substitute("x: ${LUMEN_MISSING:-a\\}b}"), "x: a}b");
        assert_eq!(env().substitute("x: $${HOME}"), "x: ${HOME}");
    }

    #[test]
    fn test_unset_variable_keeps_placeholder() {
        assert_eq!(env().substitute("x: ${LUMEN_UNSET}"), "x: ${LUMEN_UNSET}");
    }

    #[test]
    fn test_with_prefix_iterates_in_order() {
        let env = Environment::from_pairs([
            ("LUMEN_B", "2"),
            ("OTHER", "x"),
            ("LUMEN_A", "1"),
            ("LUMENX", "no"),
        ]);
        let names: Vec<&str> = env.with_prefix("LUMEN_").map(|(k, _)| k).collect();
        assert_eq!(names, ["LUMEN_A", "LUMEN_B"]);
    }

    #[test]
    fn test_is_env_var_allowed() {
        assert!(is_env_var_allowed("HOME"));
        assert!(is_env_var_allowed("LUMEN_ANYTHING"));
        assert!(is_env_var_allowed("LC_ALL"));
        assert!(!is_env_var_allowed("AWS_SECRET_ACCESS_KEY"));
    }
}
