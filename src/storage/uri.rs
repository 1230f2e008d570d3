//! Storage locations given on the command line

use std::fmt;
use std::str::FromStr;

use super::StorageError;

/// Where a directory lives: on local disk or in a B2 bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageUri {
    /// Absolute host path
    Local { path: String },
    /// Bucket plus an absolute path inside it (`/` for the bucket root)
    B2 { bucket: String, path: String },
}

impl StorageUri {
    /// Absolute path in the backend's namespace
    pub fn path(&self) -> &str {
        match self {
            StorageUri::Local { path } | StorageUri::B2 { path, .. } => path,
        }
    }
}

/// Expand a leading `~` and anchor relative paths at the working directory
fn absolute_local(raw: &str) -> Result<String, StorageError> {
    let expanded = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with(['/', '\\']) => {
            let home = dirs::home_dir()
                .ok_or_else(|| StorageError::InvalidPath(format!("{} (no home directory)", raw)))?;
            home.join(rest.trim_start_matches(['/', '\\']))
        }
        _ => raw.into(),
    };

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()?.join(expanded)
    };

    absolute
        .to_str()
        .map(str::to_string)
        .ok_or_else(|| StorageError::InvalidPath(raw.to_string()))
}

impl FromStr for StorageUri {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(StorageError::InvalidPath(s.to_string()));
        }

        if let Some(rest) = s.strip_prefix("b2://") {
            let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
            if bucket.is_empty() {
                return Err(StorageError::InvalidPath(s.to_string()));
            }
            return Ok(StorageUri::B2 {
                bucket: bucket.to_string(),
                path: format!("/{}", key),
            });
        }

        if let Some(path) = s.strip_prefix("file://") {
            return Ok(StorageUri::Local {
                path: absolute_local(path)?,
            });
        }

        if let Some((scheme, _)) = s.split_once("://") {
            return Err(StorageError::InvalidPath(format!(
                "{} (unsupported scheme {:?})",
                s, scheme
            )));
        }

        Ok(StorageUri::Local {
            path: absolute_local(s)?,
        })
    }
}

impl fmt::Display for StorageUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageUri::Local { path } => write!(f, "file://{}", path),
            StorageUri::B2 { bucket, path } => {
                write!(f, "b2://{}/{}", bucket, path.trim_start_matches('/'))
            }
        }
    }
}
