//! Reader for the puavo configuration directory
//!
//! Device configuration lives in small single-value files under
//! `/etc/puavo`. Keys map to paths by splitting on `_`, so `ldap_dn`
//! reads `/etc/puavo/ldap/dn`.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{ClientError, Result};

/// Default configuration directory root
pub const DEFAULT_ETC_ROOT: &str = "/etc/puavo";

/// Environment variable overriding the configuration directory root
pub const ETC_ROOT_ENV: &str = "PUAVO_ETC_ROOT";

pub const DOMAIN_KEY: &str = "domain";
pub const APISERVER_KEY: &str = "apiserver";
pub const LDAP_DN_KEY: &str = "ldap_dn";
pub const LDAP_PASSWORD_KEY: &str = "ldap_password";

/// Cached reader and writer for `/etc/puavo` style files
#[derive(Debug)]
pub struct PuavoEtc {
    root: PathBuf,
    cache: Mutex<HashMap<String, String>>,
}

impl Default for PuavoEtc {
    fn default() -> Self {
        Self::new(Self::default_root())
    }
}

impl PuavoEtc {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn default_root() -> PathBuf {
        std::env::var_os(ETC_ROOT_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ETC_ROOT))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path backing a key
    pub fn path_of(&self, key: &str) -> PathBuf {
        key.split('_')
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    /// Read a value, `None` when its file does not exist
    pub fn read(&self, key: &str) -> Result<Option<String>> {
        if let Some(value) = self.cache.lock().get(key) {
            return Ok(Some(value.clone()));
        }

        let path = self.path_of(key);
        match fs::read_to_string(&path) {
            Ok(content) => {
                let value = content.trim().to_string();
                self.cache.lock().insert(key.to_string(), value.clone());
                Ok(Some(value))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} is missing", path.display());
                Ok(None)
            }
            Err(source) => Err(ClientError::Io { path, source }),
        }
    }

    /// Read a value whose absence makes the client unusable
    pub fn require(&self, key: &str) -> Result<String> {
        self.read(key)?.ok_or_else(|| ClientError::ConfigMissing {
            path: self.path_of(key),
        })
    }

    /// Read an integer value
    pub fn read_int(&self, key: &str) -> Result<Option<i64>> {
        self.read(key)?
            .map(|value| {
                value.parse::<i64>().map_err(|e| {
                    ClientError::invalid_option(key, format!("{value:?} is not an integer: {e}"))
                })
            })
            .transpose()
    }

    /// Write a value followed by a newline, creating parent directories
    pub fn write(&self, key: &str, value: impl std::fmt::Display) -> Result<()> {
        let path = self.path_of(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ClientError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        fs::write(&path, format!("{value}\n")).map_err(|source| ClientError::Io {
            path: path.clone(),
            source,
        })?;

        self.cache.lock().remove(key);
        Ok(())
    }
}
