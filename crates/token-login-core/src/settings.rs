//! Environment-driven settings.
//!
//! Every knob of the credential provider comes from environment variables
//! that the package-manager client passes through to the plugin process.

use std::collections::HashMap;
use std::path::PathBuf;

/// Token-info JSON consumed at authentication time.
///
/// The package-manager client runs the plugin with its own environment, so
/// this variable must be set on the client process.
pub const TOKEN_INFO_ENV: &str = "NUGET_TOKEN_INFO";

/// Debugging only: `true` disables redaction of sensitive values.
pub const NO_REDACT_ENV: &str = "NUGET_TOKEN_DANGEROUS_NO_REDACT";

/// Debugging only: path of an append-only log file.
pub const LOG_FILE_ENV: &str = "NUGET_TOKEN_LOG_FILE";

/// Source of environment variables.
pub trait EnvSource: Send + Sync {
    /// Look up a variable. Missing and non-unicode values are both `None`.
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Logger settings read at process start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Whether secret values are redacted from logs.
    pub redact: bool,
    /// Optional append-only log file.
    pub log_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redact: true,
            log_file: None,
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_source(&ProcessEnv)
    }

    /// Read settings from an arbitrary source.
    #[must_use]
    pub fn from_source(env: &dyn EnvSource) -> Self {
        // Unparseable values keep redaction on.
        let redact = env
            .var(NO_REDACT_ENV)
            .and_then(|v| parse_bool(&v))
            .is_none_or(|no_redact| !no_redact);

        let log_file = env
            .var(LOG_FILE_ENV)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Self { redact, log_file }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
        vars.iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_are_safe() {
        let settings = Settings::from_source(&env(&[]));
        assert_eq!(settings, Settings::default());
        assert!(settings.redact);
        assert!(settings.log_file.is_none());
    }

    #[test]
    fn test_no_redact_parsing() {
        assert!(!Settings::from_source(&env(&[(NO_REDACT_ENV, "TRUE")])).redact);
        assert!(!Settings::from_source(&env(&[(NO_REDACT_ENV, " true ")])).redact);
        assert!(Settings::from_source(&env(&[(NO_REDACT_ENV, "false")])).redact);
        assert!(Settings::from_source(&env(&[(NO_REDACT_ENV, "1")])).redact);
        assert!(Settings::from_source(&env(&[(NO_REDACT_ENV, "yes")])).redact);
    }

    #[test]
    fn test_log_file_is_trimmed() {
        let settings = Settings::from_source(&env(&[(LOG_FILE_ENV, "  logs/plugin.log ")]));
        assert_eq!(settings.log_file, Some(PathBuf::from("logs/plugin.log")));

        let blank = Settings::from_source(&env(&[(LOG_FILE_ENV, "   ")]));
        assert!(blank.log_file.is_none());
    }
}
