use std::path::PathBuf;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Version and title printed in every record header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIdentity {
    pub version: String,
    pub title: String,
}

impl AppIdentity {
    pub fn new(version: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            title: title.into(),
        }
    }

    pub fn origin(&self) -> String {
        format!("{} / {}", self.version, self.title)
    }
}

/// What the logger needs from the application embedding it.
pub trait HostEnvironment: Send + Sync {
    /// Writable directory for the log files. Created by the logger if absent.
    fn log_directory(&self) -> Result<PathBuf>;
    fn identity(&self) -> AppIdentity;
}

/// Default host: logs go to `<local data dir>/<product>/` unless a directory
/// is given explicitly.
#[derive(Debug, Clone)]
pub struct AppHost {
    identity: AppIdentity,
    product: String,
    log_dir: Option<PathBuf>,
}

impl AppHost {
    pub fn new(identity: AppIdentity) -> Self {
        let product = identity.title.clone();
        Self {
            identity,
            product,
            log_dir: None,
        }
    }

    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = product.into();
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }
}

impl HostEnvironment for AppHost {
    fn log_directory(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.log_dir {
            return Ok(dir.clone());
        }
        let base = dirs::data_local_dir().ok_or_else(|| anyhow!("failed to locate local data dir"))?;
        Ok(base.join(sanitize_file_name(&self.product)))
    }

    fn identity(&self) -> AppIdentity {
        self.identity.clone()
    }
}

/// Replaces characters that are not allowed in file names on any supported
/// platform with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let out: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if out.trim().is_empty() {
        "_".to_string()
    } else {
        out
    }
}
