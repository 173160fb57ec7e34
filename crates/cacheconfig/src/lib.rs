//! Cache server configuration file parser
//!
//! Parses INI-style server configuration files and exposes typed options
//! through the [`define_options!`] macro.
//!
//! # Example
//!
//! ```no_run
//! use cacheconfig::CacheConfig;
//!
//! let config = CacheConfig::from_file("/etc/cacheserver/server.conf").unwrap();
//! let listen = config.get_with_fallback(&["server", "global"], "listen_addr");
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(String),
}

/// Trait for types that can be parsed from configuration values
pub trait ConfigValue: Sized + Clone {
    /// Parse from a string value in the configuration file
    fn parse_config_value(s: &str) -> Result<Self, ConfigError>;

    /// Get the type name for error messages
    fn type_name() -> &'static str;
}

/// Duration value (supports time units: s, ms, us, m, h)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Duration(pub std::time::Duration);

impl ConfigValue for Duration {
    fn parse_config_value(s: &str) -> Result<Self, ConfigError> {
        parse_duration(s).map(Duration)
    }

    fn type_name() -> &'static str {
        "duration"
    }
}

/// Count value (plain unsigned integer)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Count(pub u64);

impl ConfigValue for Count {
    fn parse_config_value(s: &str) -> Result<Self, ConfigError> {
        s.trim()
            .parse()
            .map(Count)
            .map_err(|_| ConfigError::ParseError(format!("Invalid count: {}", s)))
    }

    fn type_name() -> &'static str {
        "count"
    }
}

impl ConfigValue for bool {
    fn parse_config_value(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Ok(true),
            "false" | "no" | "0" | "off" => Ok(false),
            _ => Err(ConfigError::ParseError(format!("Invalid bool: {}", s))),
        }
    }

    fn type_name() -> &'static str {
        "bool"
    }
}

impl ConfigValue for String {
    fn parse_config_value(s: &str) -> Result<Self, ConfigError> {
        Ok(s.to_string())
    }

    fn type_name() -> &'static str {
        "string"
    }
}

/// A configuration option with name and default value
pub struct ConfigOption<T: ConfigValue> {
    name: &'static str,
    default: T,
}

impl<T: ConfigValue> ConfigOption<T> {
    pub const fn new(name: &'static str, default: T) -> Self {
        Self { name, default }
    }

    /// Get the value from config, falling back to the default when the
    /// option is absent from every section
    ///
    /// A value that is present but unparsable is an error.
    pub fn get(&self, config: &CacheConfig, sections: &[&str]) -> Result<T, ConfigError> {
        match config.get_with_fallback(sections, self.name) {
            Some(raw) => T::parse_config_value(raw).map_err(|e| {
                ConfigError::ParseError(format!(
                    "option '{}' expects a {}: {}",
                    self.name,
                    T::type_name(),
                    e
                ))
            }),
            None => Ok(self.default.clone()),
        }
    }
}

/// Parse duration string with time units
fn parse_duration(s: &str) -> Result<std::time::Duration, ConfigError> {
    let s = s.trim();

    let num_end = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());

    let num_str = &s[..num_end];
    let unit = s[num_end..].trim().to_lowercase();

    let num: f64 = num_str
        .parse()
        .map_err(|_| ConfigError::ParseError(format!("Invalid number: {}", num_str)))?;

    let seconds = match unit.as_str() {
        "" | "s" | "sec" | "second" | "seconds" => num,
        "ms" | "msec" | "millisecond" | "milliseconds" => num / 1000.0,
        "us" | "usec" | "microsecond" | "microseconds" => num / 1_000_000.0,
        "m" | "min" | "minute" | "minutes" => num * 60.0,
        "h" | "hr" | "hour" | "hours" => num * 3600.0,
        _ => {
            return Err(ConfigError::ParseError(format!(
                "Unknown time unit: {}",
                unit
            )))
        }
    };

    std::time::Duration::try_from_secs_f64(seconds)
        .map_err(|e| ConfigError::ParseError(format!("Invalid duration '{}': {}", s, e)))
}

/// Represents a parsed server configuration
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    sections: HashMap<String, HashMap<String, String>>,
}

impl CacheConfig {
    /// Parse a configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a configuration from a string
    ///
    /// Keys outside any section land in `[global]`. Spaces and underscores
    /// in keys are interchangeable (`security enabled` == `security_enabled`).
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current_section = String::from("global");

        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();

            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') {
                if !line.ends_with(']') || line.len() < 3 {
                    return Err(ConfigError::ParseError(format!(
                        "line {}: malformed section header '{}'",
                        lineno + 1,
                        line
                    )));
                }
                current_section = line[1..line.len() - 1].trim().to_string();
                sections.entry(current_section.clone()).or_default();
                continue;
            }

            match line.split_once('=') {
                Some((key, value)) => {
                    sections
                        .entry(current_section.clone())
                        .or_default()
                        .insert(normalize_key(key), value.trim().to_string());
                }
                None => {
                    return Err(ConfigError::ParseError(format!(
                        "line {}: expected 'key = value', got '{}'",
                        lineno + 1,
                        line
                    )));
                }
            }
        }

        Ok(Self { sections })
    }

    /// Get a configuration value from a specific section
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(&normalize_key(key)))
            .map(|v| v.as_str())
    }

    /// Get a configuration value, checking multiple sections in order
    /// Typically checks: server -> global
    pub fn get_with_fallback(&self, sections: &[&str], key: &str) -> Option<&str> {
        sections
            .iter()
            .find_map(|section| self.get(section, key))
    }

    /// Get all keys in a section
    pub fn keys(&self, section: &str) -> Vec<&str> {
        self.sections
            .get(section)
            .map(|s| s.keys().map(|k| k.as_str()).collect())
            .unwrap_or_default()
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().replace(' ', "_")
}

/// Define a configuration struct with typed options
///
/// # Example
///
/// ```
/// use cacheconfig::{define_options, CacheConfig, Count, Duration};
///
/// define_options! {
///     /// Listener configuration
///     pub struct ListenerOptions {
///         /// Maximum number of concurrent client connections
///         max_connections: Count = Count(800),
///
///         /// Idle timeout (30 seconds)
///         idle_timeout: Duration = Duration(std::time::Duration::from_secs(30)),
///
///         /// Require authentication
///         security_enabled: bool = false,
///     }
/// }
///
/// let config = CacheConfig::parse("[server]\nmax_connections = 16\n").unwrap();
/// let opts = ListenerOptions::from_config(&config, &["server", "global"]).unwrap();
///
/// assert_eq!(opts.max_connections.0, 16);
/// assert!(!opts.security_enabled);
/// ```
#[macro_export]
macro_rules! define_options {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field:ident: $ty:ty = $default:expr
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field: $ty,
            )*
        }

        impl $name {
            /// Create with default values
            pub fn new() -> Self {
                Self {
                    $(
                        $field: $default,
                    )*
                }
            }

            /// Load from a parsed configuration with section fallback
            pub fn from_config(
                config: &$crate::CacheConfig,
                sections: &[&str],
            ) -> ::std::result::Result<Self, $crate::ConfigError> {
                Ok(Self {
                    $(
                        $field: {
                            let opt = $crate::ConfigOption::new(stringify!($field), $default);
                            opt.get(config, sections)?
                        },
                    )*
                })
            }

            /// Get option names (for introspection)
            pub fn option_names() -> &'static [&'static str] {
                &[
                    $(stringify!($field),)*
                ]
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TEST_CONFIG: &str = r#"
; cache server test configuration
[global]
    listen_addr = 0.0.0.0:40404
    auth timeout = 5s

[server]
    security_enabled = true
    keyring = /etc/cacheserver/keyring
    max_auth_failures = 5
"#;

    #[test]
    fn test_parse_config() {
        let config = CacheConfig::parse(TEST_CONFIG).unwrap();

        assert_eq!(config.get("global", "listen_addr"), Some("0.0.0.0:40404"));
        assert_eq!(config.get("server", "security_enabled"), Some("true"));
        assert_eq!(config.get("server", "listen_addr"), None);
    }

    #[test]
    fn test_space_and_underscore_keys_are_equivalent() {
        let config = CacheConfig::parse(TEST_CONFIG).unwrap();
        assert_eq!(config.get("global", "auth_timeout"), Some("5s"));
        assert_eq!(config.get("global", "auth timeout"), Some("5s"));
    }

    #[test]
    fn test_get_with_fallback() {
        let config = CacheConfig::parse(TEST_CONFIG).unwrap();

        assert_eq!(
            config.get_with_fallback(&["server", "global"], "listen_addr"),
            Some("0.0.0.0:40404")
        );
        assert_eq!(
            config.get_with_fallback(&["server", "global"], "keyring"),
            Some("/etc/cacheserver/keyring")
        );
        assert_eq!(config.get_with_fallback(&["global"], "keyring"), None);
    }

    #[test]
    fn test_keys_outside_section_go_to_global() {
        let config = CacheConfig::parse("security_enabled = yes\n").unwrap();
        assert_eq!(config.get("global", "security_enabled"), Some("yes"));
    }

    #[test]
    fn test_malformed_lines_are_rejected() {
        assert!(matches!(
            CacheConfig::parse("[server\nfoo = bar\n"),
            Err(ConfigError::ParseError(_))
        ));
        assert!(matches!(
            CacheConfig::parse("[server]\nsecurity_enabled\n"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_keys() {
        let config = CacheConfig::parse(TEST_CONFIG).unwrap();
        assert_eq!(config.keys("server").len(), 3);
        assert!(config.keys("nonexistent").is_empty());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TEST_CONFIG.as_bytes()).unwrap();

        let config = CacheConfig::from_file(file.path()).unwrap();
        assert_eq!(config.get("server", "max_auth_failures"), Some("5"));
    }

    #[test]
    fn test_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = CacheConfig::from_file(dir.path().join("absent.conf"));
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(
            parse_duration("10").unwrap(),
            std::time::Duration::from_secs(10)
        );
        assert_eq!(
            parse_duration("250ms").unwrap(),
            std::time::Duration::from_millis(250)
        );
        assert_eq!(
            parse_duration("2 min").unwrap(),
            std::time::Duration::from_secs(120)
        );
        assert_eq!(
            parse_duration("1h").unwrap(),
            std::time::Duration::from_secs(3600)
        );
        assert!(parse_duration("10 fortnights").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(matches!(
            parse_duration("99999999999999999999h"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_bool_config_value() {
        for v in ["true", "Yes", "1", "ON"] {
            assert!(bool::parse_config_value(v).unwrap());
        }
        for v in ["false", "no", "0", "off"] {
            assert!(!bool::parse_config_value(v).unwrap());
        }
        assert!(bool::parse_config_value("maybe").is_err());
    }

    #[test]
    fn test_count_config_value() {
        assert_eq!(Count::parse_config_value("42").unwrap().0, 42);
        assert!(Count::parse_config_value("-1").is_err());
        assert_eq!(Count::type_name(), "count");
    }

    #[test]
    fn test_config_option_get() {
        let config = CacheConfig::parse(TEST_CONFIG).unwrap();

        let opt = ConfigOption::new("max_auth_failures", Count(3));
        assert_eq!(opt.get(&config, &["server"]).unwrap().0, 5);

        let opt = ConfigOption::new("auth_timeout", Duration(std::time::Duration::from_secs(10)));
        assert_eq!(
            opt.get(&config, &["server", "global"]).unwrap().0,
            std::time::Duration::from_secs(5)
        );

        let opt = ConfigOption::new("nonexistent_option", Count(999));
        assert_eq!(opt.get(&config, &["server"]).unwrap().0, 999);
    }

    #[test]
    fn test_config_option_rejects_bad_value() {
        let config = CacheConfig::parse("[server]\nsecurity_enabled = perhaps\n").unwrap();
        let opt = ConfigOption::new("security_enabled", false);
        assert!(matches!(
            opt.get(&config, &["server"]),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_config_option_rejects_overflowing_duration() {
        let config =
            CacheConfig::parse("[server]\nauth_timeout = 99999999999999999999h\n").unwrap();
        let opt = ConfigOption::new("auth_timeout", Duration(std::time::Duration::from_secs(10)));
        assert!(matches!(
            opt.get(&config, &["server"]),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_define_options_macro() {
        define_options! {
            /// Test server options
            pub struct TestOptions {
                /// Listen address
                listen_addr: String = String::from("127.0.0.1:40404"),

                /// Require authentication
                security_enabled: bool = false,

                /// Failed attempts before disconnect
                max_auth_failures: Count = Count(3),

                /// Credential check timeout
                auth_timeout: Duration = Duration(std::time::Duration::from_secs(10)),
            }
        }

        let defaults = TestOptions::default();
        assert_eq!(defaults.listen_addr, "127.0.0.1:40404");
        assert!(!defaults.security_enabled);
        assert_eq!(defaults.max_auth_failures.0, 3);

        let config = CacheConfig::parse(TEST_CONFIG).unwrap();
        let opts = TestOptions::from_config(&config, &["server", "global"]).unwrap();
        assert_eq!(opts.listen_addr, "0.0.0.0:40404");
        assert!(opts.security_enabled);
        assert_eq!(opts.max_auth_failures.0, 5);
        assert_eq!(opts.auth_timeout.0, std::time::Duration::from_secs(5));

        let names = TestOptions::option_names();
        assert_eq!(names.len(), 4);
        assert!(names.contains(&"security_enabled"));
    }
}
