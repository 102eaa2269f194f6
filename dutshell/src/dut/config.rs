//! Device description documents.

use std::fmt;
use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};

use crate::error::{ConfigError, Result};
use crate::session::SessionConfig;
use crate::transport::{Credential, Endpoint};

/// One username/password pair from the document.
#[derive(Deserialize)]
pub struct Account {
    pub username: String,
    #[serde(deserialize_with = "secret")]
    password: SecretString,
}

impl Account {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    pub fn credential(&self) -> Credential {
        Credential::new(self.username.clone(), self.password.expose_secret())
    }
}

impl Clone for Account {
    fn clone(&self) -> Self {
        Self::new(self.username.clone(), self.password.expose_secret())
    }
}

fn secret<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Accounts for each endpoint of a device.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Accounts {
    /// Console-server login.
    pub console: Account,
    /// Device login typed at the console's login prompt.
    pub device: Account,
    /// Host OS login over direct SSH.
    pub host: Account,
    /// Management controller login over direct SSH.
    pub bmc: Account,
}

impl Default for Accounts {
    fn default() -> Self {
        Self {
            console: Account::new("administrator", "ufispace"),
            device: Account::new("root", "ufispace"),
            host: Account::new("root", "ufispace"),
            bmc: Account::new("sysadmin", "superuser"),
        }
    }
}

/// Console-server line the device's serial port is wired to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConsoleAddress {
    pub ip: String,
    pub port: u16,
}

/// Description of one device under test.
///
/// ```json
/// {
///   "platform": "S9600-72XC",
///   "sku": "x86-d-2187nt",
///   "console_ip": { "ip": "192.168.162.2", "port": 5102 }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct DutConfig {
    pub platform: String,
    pub sku: String,
    pub console_ip: ConsoleAddress,

    #[serde(default)]
    pub accounts: Accounts,

    #[serde(default)]
    pub session: SessionConfig,

    /// Verify host keys against known_hosts. Lab devices are re-imaged often, so off by default.
    #[serde(default)]
    pub strict_host_keys: bool,
}

impl DutConfig {
    /// Parse a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: DutConfig = serde_json::from_str(text).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.console_ip.ip.trim().is_empty() {
            return Err(ConfigError::invalid("console_ip.ip", "must not be empty").into());
        }
        if self.console_ip.port == 0 {
            return Err(ConfigError::invalid("console_ip.port", "must not be 0").into());
        }
        self.session.validate()?;
        Ok(())
    }

    pub fn console_endpoint(&self) -> Endpoint {
        Endpoint::console(self.console_ip.ip.clone(), self.console_ip.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const MINIMAL: &str = r#"{
        "platform": "S9600-72XC",
        "sku": "x86-d-2187nt",
        "console_ip": { "ip": "192.168.162.2", "port": 5102 }
    }"#;

    #[test]
    fn test_minimal_document_uses_default_accounts() {
        let config = DutConfig::from_json(MINIMAL).unwrap();
        assert_eq!(config.platform, "S9600-72XC");
        assert_eq!(config.console_endpoint().to_string(), "192.168.162.2:5102");
        assert_eq!(config.accounts.console.username, "administrator");
        assert_eq!(config.accounts.bmc.username, "sysadmin");
        assert_eq!(config.session, SessionConfig::default());
        assert!(!config.strict_host_keys);
    }

    #[test]
    fn test_overrides() {
        let config = DutConfig::from_json(
            r#"{
                "platform": "p", "sku": "s",
                "console_ip": { "ip": "10.1.1.1", "port": 7001 },
                "accounts": { "bmc": { "username": "ADMIN", "password": "ADMIN" } },
                "session": { "timeout_secs": 30, "shell_prompt": "admin@sonic:~\\$" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.accounts.bmc.username, "ADMIN");
        assert_eq!(config.accounts.bmc.credential().secret(), "ADMIN");
        assert_eq!(config.accounts.host.username, "root");
        assert_eq!(config.session.timeout_secs, 30.0);
    }

    #[test]
    fn test_missing_required_key_is_malformed() {
        let err = DutConfig::from_json(r#"{ "platform": "p", "sku": "s" }"#).unwrap_err();
        assert!(matches!(err, crate::Error::Config(ConfigError::Malformed(_))));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_negative_session_timeout_rejected() {
        let err = DutConfig::from_json(
            r#"{ "platform": "p", "sku": "s",
                 "console_ip": { "ip": "10.1.1.1", "port": 7001 },
                 "session": { "timeout_secs": -1 } }"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_bad_prompt_regex_rejected_at_load() {
        let err = DutConfig::from_json(
            r#"{ "platform": "p", "sku": "s",
                 "console_ip": { "ip": "10.1.1.1", "port": 7001 },
                 "session": { "shell_prompt": "root@(" } }"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("shell_prompt"));
    }

    #[test]
    fn test_missing_file_is_io() {
        let err = DutConfig::from_path("/nonexistent/dut.json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_account_debug_redacts_password() {
        let shown = format!("{:?}", Account::new("root", "ufispace"));
        assert!(!shown.contains("ufispace"));
    }
}
