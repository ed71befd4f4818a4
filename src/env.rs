//! Runtime environment, read from `REPORTCAST_ENV`.
//!
//! | value                  | environment   | credentials          |
//! |------------------------|---------------|----------------------|
//! | `test`                 | Test          | `credentials.json`   |
//! | `development` / `dev`  | Development   | OS keyring           |
//! | anything else or unset | Production    | OS keyring           |

/// Runtime environment for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Hosted service; token in the OS keyring.
    #[default]
    Production,
    /// Local stack; token in the OS keyring.
    Development,
    /// Credentials live in a plain file under the config directory.
    Test,
}

impl Environment {
    /// Variable the environment is read from.
    pub const VAR: &'static str = "REPORTCAST_ENV";

    /// Environment of this process.
    #[must_use]
    pub fn current() -> Self {
        std::env::var(Self::VAR).map_or_else(|_| Self::default(), |value| Self::from_value(&value))
    }

    /// Case-insensitive parse; unknown values mean production.
    #[must_use]
    pub fn from_value(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "test" => Self::Test,
            "development" | "dev" => Self::Development,
            _ => Self::Production,
        }
    }

    /// Whether the bearer token belongs in the OS keyring.
    #[must_use]
    pub fn uses_keyring(self) -> bool {
        self != Self::Test
    }
}

/// `true` when credentials must bypass the OS keyring. Unit tests always
/// do.
#[must_use]
pub fn should_skip_keyring() -> bool {
    cfg!(test) || !Environment::current().uses_keyring()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_value() {
        assert_eq!(Environment::from_value("test"), Environment::Test);
        assert_eq!(Environment::from_value(" DEV "), Environment::Development);
        assert_eq!(
            Environment::from_value("development"),
            Environment::Development
        );
        assert_eq!(Environment::from_value("staging"), Environment::Production);
    }

    #[test]
    fn test_only_test_mode_skips_keyring() {
        assert!(!Environment::Test.uses_keyring());
        assert!(Environment::Development.uses_keyring());
        assert!(Environment::Production.uses_keyring());
    }

    #[test]
    fn test_unit_tests_skip_keyring() {
        assert!(should_skip_keyring());
    }
}
