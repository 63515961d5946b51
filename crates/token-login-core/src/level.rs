//! Host log levels.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Log level as understood by the package-manager host.
///
/// Variants are ordered from most to least verbose, so `a < b` means `a` is
/// noisier than `b`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum LogLevel {
    /// Diagnostic detail.
    #[default]
    Debug,
    /// Verbose progress.
    Verbose,
    /// Informational.
    Information,
    /// Minimal output, shown by default.
    Minimal,
    /// Warning.
    Warning,
    /// Error.
    Error,
}

impl LogLevel {
    /// Four-character prefix used in the file sink.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Debug => "DBUG",
            Self::Verbose => "VERB",
            Self::Information => "INFO",
            Self::Minimal => "MIN ",
            Self::Warning => "WARN",
            Self::Error => "ERR ",
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Debug => 0,
            Self::Verbose => 1,
            Self::Information => 2,
            Self::Minimal => 3,
            Self::Warning => 4,
            Self::Error => 5,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Debug,
            1 => Self::Verbose,
            2 => Self::Information,
            3 => Self::Minimal,
            4 => Self::Warning,
            _ => Self::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "Debug",
            Self::Verbose => "Verbose",
            Self::Information => "Information",
            Self::Minimal => "Minimal",
            Self::Warning => "Warning",
            Self::Error => "Error",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(LogLevel::Debug < LogLevel::Verbose);
        assert!(LogLevel::Minimal < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_u8_conversion_preserves_order() {
        for level in [
            LogLevel::Debug,
            LogLevel::Verbose,
            LogLevel::Information,
            LogLevel::Minimal,
            LogLevel::Warning,
            LogLevel::Error,
        ] {
            assert_eq!(LogLevel::from_u8(level.as_u8()), level);
        }
    }

    #[test]
    fn test_serde_uses_host_names() {
        let json = serde_json::to_string(&LogLevel::Information).unwrap();
        assert_eq!(json, "\"Information\"");
        let parsed: LogLevel = serde_json::from_str("\"Minimal\"").unwrap();
        assert_eq!(parsed, LogLevel::Minimal);
    }
}
