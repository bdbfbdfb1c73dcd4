use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, TransportError};

/// A pipe name resolved to the platform's endpoint path.
///
/// On Unix, a name containing `/` is taken as a socket path verbatim; any
/// other name lands in the temp directory as `<name>.pipe`. On Windows, a
/// name that does not already start with `\\` is placed under `\\.\pipe\`.
#[derive(Clone, PartialEq, Eq)]
pub struct PipeName {
    name: String,
    path: PathBuf,
}

impl PipeName {
    /// Maximum endpoint path length.
    /// Unix `sockaddr_un.sun_path` is 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    pub const MAX_PATH_LEN: usize = 108;
    #[cfg(all(unix, not(target_os = "linux")))]
    pub const MAX_PATH_LEN: usize = 104;
    #[cfg(windows)]
    pub const MAX_PATH_LEN: usize = 256;

    /// Validate `name` and resolve it to an endpoint path.
    pub fn resolve(name: &str) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(TransportError::InvalidName {
                name: name.to_string(),
                reason: "name must not be empty",
            });
        }
        if name.contains('\0') {
            return Err(TransportError::InvalidName {
                name: name.to_string(),
                reason: "name must not contain NUL",
            });
        }

        let path = platform_path(name)?;
        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::NameTooLong {
                path,
                len,
                max: Self::MAX_PATH_LEN,
            });
        }

        Ok(Self {
            name: name.to_string(),
            path,
        })
    }

    /// The name as supplied by the caller.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// The resolved endpoint path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn platform_path(name: &str) -> Result<PathBuf> {
    if name.contains('/') {
        return Ok(PathBuf::from(name));
    }
    Ok(std::env::temp_dir().join(format!("{name}.pipe")))
}

#[cfg(windows)]
fn platform_path(name: &str) -> Result<PathBuf> {
    if name.starts_with(r"\\") {
        return Ok(PathBuf::from(name));
    }
    if name.contains('\\') {
        return Err(TransportError::InvalidName {
            name: name.to_string(),
            reason: "short pipe names must not contain backslashes",
        });
    }
    Ok(PathBuf::from(format!(r"\\.\pipe\{name}")))
}

impl fmt::Debug for PipeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeName")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

impl fmt::Display for PipeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
