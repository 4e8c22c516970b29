//! Host version detection
//!
//! When no release is given, jails are created from the release the host
//! kernel runs, provided iocage can fetch it.

use crate::error::{Error, Result};
use std::ffi::CStr;
use std::fmt;
use tracing::debug;

/// FreeBSD release type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseType {
    /// -CURRENT development branch
    Current,
    /// -STABLE maintenance branch
    Stable,
    /// -RELEASE official release
    Release,
    /// -RC release candidate
    Rc(u8),
}

impl fmt::Display for ReleaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseType::Current => write!(f, "CURRENT"),
            ReleaseType::Stable => write!(f, "STABLE"),
            ReleaseType::Release => write!(f, "RELEASE"),
            ReleaseType::Rc(n) => write!(f, "RC{}", n),
        }
    }
}

/// FreeBSD OS version information
#[derive(Debug, Clone)]
pub struct OsVersion {
    /// Major version number
    pub major: u8,
    /// Minor version number
    pub minor: u8,
    /// Patch level (from -pX suffix)
    pub patch: Option<u8>,
    /// Release type (CURRENT, STABLE, RELEASE, etc.)
    pub release_type: ReleaseType,
}

/// Kernel release string from `uname(2)`, e.g. `13.2-RELEASE-p4`
fn kernel_release() -> Result<String> {
    let mut utsname: libc::utsname = unsafe { std::mem::zeroed() };

    let result = unsafe { libc::uname(&mut utsname) };
    if result != 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }

    let release_cstr = unsafe { CStr::from_ptr(utsname.release.as_ptr()) };
    let release = release_cstr
        .to_str()
        .map_err(|e| Error::InvalidVersion(format!("Invalid UTF-8 in uname.release: {}", e)))?
        .to_string();

    Ok(release)
}

impl OsVersion {
    /// Parse a FreeBSD version string
    ///
    /// Accepts `16.0-CURRENT`, `15.0-RELEASE`, `15.0-RELEASE-p1`, `14.2-STABLE`
    /// and `15.0-RC2`.
    fn parse(s: &str) -> Result<Self> {
        // Example: "16.0-CURRENT" or "15.0-RELEASE-p1"
        let parts: Vec<&str> = s.split('-').collect();

        if parts.len() < 2 {
            return Err(Error::InvalidVersion(format!(
                "Invalid version format: {}",
                s
            )));
        }

        let version_nums: Vec<&str> = parts[0].split('.').collect();
        if version_nums.len() != 2 {
            return Err(Error::InvalidVersion(format!(
                "Invalid version number: {}",
                parts[0]
            )));
        }

        let major = version_nums[0].parse::<u8>().map_err(|_| {
            Error::InvalidVersion(format!("Invalid major version: {}", version_nums[0]))
        })?;

        let minor = version_nums[1].parse::<u8>().map_err(|_| {
            Error::InvalidVersion(format!("Invalid minor version: {}", version_nums[1]))
        })?;

        let release_type = match parts[1] {
            "CURRENT" => ReleaseType::Current,
            "STABLE" => ReleaseType::Stable,
            "RELEASE" => ReleaseType::Release,
            s if s.starts_with("RC") => {
                let num = s
                    .strip_prefix("RC")
                    .and_then(|n| n.parse::<u8>().ok())
                    .unwrap_or(1);
                ReleaseType::Rc(num)
            }
            _ => {
                return Err(Error::InvalidVersion(format!(
                    "Unknown release type: {}",
                    parts[1]
                )))
            }
        };

        // Patch level, e.g. "p1" from "15.0-RELEASE-p1"
        let patch = if parts.len() > 2 && parts[2].starts_with('p') {
            parts[2]
                .strip_prefix('p')
                .and_then(|n| n.parse::<u8>().ok())
        } else {
            None
        };

        Ok(OsVersion {
            major,
            minor,
            patch,
            release_type,
        })
    }

    /// The release iocage fetches for this version
    ///
    /// Release candidates map to the final release; development branches
    /// have no fetchable release.
    pub fn fetchable_release(&self) -> Option<String> {
        match self.release_type {
            ReleaseType::Release | ReleaseType::Rc(_) => {
                Some(format!("{}.{}-RELEASE", self.major, self.minor))
            }
            ReleaseType::Current | ReleaseType::Stable => None,
        }
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}-{}", self.major, self.minor, self.release_type)?;
        if let Some(patch) = self.patch {
            write!(f, "-p{}", patch)?;
        }
        Ok(())
    }
}

/// Release to use for a kernel release string
pub fn release_for_kernel(kernel: &str) -> Result<String> {
    let unrecognised = || Error::Precondition(format!("Release not recognised: {}", kernel.trim()));

    let version = OsVersion::parse(kernel.trim()).map_err(|_| unrecognised())?;
    let release = version.fetchable_release().ok_or_else(unrecognised)?;
    debug!(version = %version, release = %release, "host release");
    Ok(release)
}

/// Release matching the running kernel
pub fn host_release() -> Result<String> {
    release_for_kernel(&kernel_release()?)
}
