use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Process-wide settings, built once at start-up and passed by reference.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub imap_server: Option<String>,
    pub imap_port: u16,
    pub userid: Option<String>,
    pub userpw: Option<String>,
    pub mailbox: String,
    /// Seconds before a stalled IMAP read/write fails the run.
    pub imap_timeout: u64,

    pub port: u16,
    pub data_dir: PathBuf,
    pub static_dir: Option<PathBuf>,
    pub max_item_per_feed: usize,
    /// Seconds between poller runs.
    pub poll_interval: u64,
    /// Externally visible base URL used for OPML and reader links.
    pub server_baseurl: Option<String>,
    pub enable_internal_reader: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            imap_server: None,
            imap_port: 993,
            userid: None,
            userpw: None,
            mailbox: "INBOX".to_string(),
            imap_timeout: 30,
            port: 8000,
            data_dir: PathBuf::from("data"),
            static_dir: None,
            max_item_per_feed: 50,
            poll_interval: 120,
            server_baseurl: None,
            enable_internal_reader: false,
        }
    }
}

/// Mailbox login details, only required by the fetch path.
#[derive(Debug, Clone)]
pub struct MailboxCredentials {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub mailbox: String,
    pub timeout: Duration,
}

impl Config {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("emails.db")
    }

    pub fn feed_dir(&self) -> PathBuf {
        self.data_dir.join("feed")
    }

    pub fn static_dir(&self) -> PathBuf {
        self.static_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("static"))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn credentials(&self) -> Result<MailboxCredentials> {
        let require = |value: &Option<String>, key: &str| {
            value
                .clone()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::Config(format!("{key} not set")))
        };

        Ok(MailboxCredentials {
            server: require(&self.imap_server, "IMAP_SERVER")?,
            port: self.imap_port,
            user: require(&self.userid, "USERID")?,
            password: require(&self.userpw, "USERPW")?,
            mailbox: self.mailbox.clone(),
            timeout: Duration::from_secs(self.imap_timeout),
        })
    }

    /// Applies environment-style overrides on top of the current values.
    /// Keys match in all-uppercase or all-lowercase spelling (`USERID` or
    /// `userid`); anything else is ignored.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in vars {
            let value: String = value.into();
            let key = key.as_ref();
            if key != key.to_ascii_uppercase() && key != key.to_ascii_lowercase() {
                continue;
            }
            match key.to_ascii_uppercase().as_str() {
                "IMAP_SERVER" => self.imap_server = Some(value),
                "IMAP_PORT" => self.imap_port = parse_number("IMAP_PORT", &value)?,
                "IMAP_TIMEOUT" => self.imap_timeout = parse_number("IMAP_TIMEOUT", &value)?,
                "USERID" => self.userid = Some(value),
                "USERPW" => self.userpw = Some(value),
                "MAILBOX" => self.mailbox = value,
                "PORT" => self.port = parse_number("PORT", &value)?,
                "DATA_DIR" => self.data_dir = PathBuf::from(value),
                "STATIC_DIR" => self.static_dir = Some(PathBuf::from(value)),
                "MAX_ITEM_PER_FEED" => {
                    self.max_item_per_feed = parse_number("MAX_ITEM_PER_FEED", &value)?
                }
                "POLL_INTERVAL" => self.poll_interval = parse_number("POLL_INTERVAL", &value)?,
                "SERVER_BASEURL" => {
                    self.server_baseurl = Some(value).filter(|v| !v.trim().is_empty())
                }
                "ENABLE_INTERNAL_READER" => {
                    self.enable_internal_reader = parse_bool("ENABLE_INTERNAL_READER", &value)?
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key} must be a number, got {value:?}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Config(format!("{key} must be a boolean, got {value:?}"))),
    }
}

fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("mailfeed"))
}

pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("config.toml"))
}

/// Loads the TOML file at `path` (or the default location when it exists),
/// then applies overrides from the process environment.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let file = match path {
        Some(p) => Some(p.to_path_buf()),
        None => default_config_path().filter(|p| p.exists()),
    };

    let mut cfg = match file {
        Some(p) => {
            let s = fs::read_to_string(&p)?;
            toml::from_str(&s)
                .map_err(|e| Error::Config(format!("{}: {e}", p.display())))?
        }
        None => Config::default(),
    };

    cfg.apply_overrides(std::env::vars())?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_replace_defaults() {
        let mut cfg = Config::default();
        cfg.apply_overrides([
            ("IMAP_SERVER", "imap.example.com"),
            ("USERID", "me@example.com"),
            ("USERPW", "hunter2"),
            ("PORT", "9000"),
            ("MAX_ITEM_PER_FEED", "5"),
            ("ENABLE_INTERNAL_READER", "true"),
            ("SERVER_BASEURL", "https://feeds.example.com"),
            ("HOME", "/ignored"),
        ])
        .unwrap();

        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.max_item_per_feed, 5);
        assert!(cfg.enable_internal_reader);
        assert_eq!(cfg.mailbox, "INBOX");

        let creds = cfg.credentials().unwrap();
        assert_eq!(creds.server, "imap.example.com");
        assert_eq!(creds.port, 993);
    }

    #[test]
    fn lowercase_keys_are_accepted() {
        let mut cfg = Config::default();
        cfg.apply_overrides([
            ("imap_server", "imap.example.com"),
            ("userid", "me@example.com"),
            ("userpw", "hunter2"),
            ("mailbox", "Newsletters"),
            ("Port", "9000"),
        ])
        .unwrap();

        let creds = cfg.credentials().unwrap();
        assert_eq!(creds.server, "imap.example.com");
        assert_eq!(creds.user, "me@example.com");
        assert_eq!(creds.mailbox, "Newsletters");
        assert_eq!(cfg.port, 8000);
    }

    #[test]
    fn bad_number_is_a_config_error() {
        let mut cfg = Config::default();
        let err = cfg.apply_overrides([("PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn missing_credentials_are_reported() {
        let cfg = Config::default();
        assert!(matches!(cfg.credentials(), Err(Error::Config(_))));
    }

    #[test]
    fn toml_file_fills_missing_fields_with_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            imap_server = "imap.example.com"
            data_dir = "/var/lib/mailfeed"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.imap_server.as_deref(), Some("imap.example.com"));
        assert_eq!(cfg.feed_dir(), PathBuf::from("/var/lib/mailfeed/feed"));
        assert_eq!(cfg.poll_interval, 120);
    }
}
