//! Character device helpers.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{SupportError, SupportResult};
use crate::module::sudo;

/// Find the major number registered for `name` in `/proc/devices` text.
pub fn parse_major_number(devices: &str, name: &str) -> Option<u32> {
    devices.lines().find_map(|line| {
        let (major, dev) = line.trim().split_once(' ')?;
        if dev.trim() == name {
            major.trim().parse().ok()
        } else {
            None
        }
    })
}

/// Major number of the character device registered as `name`.
pub fn device_major_number(name: &str) -> SupportResult<u32> {
    let devices = std::fs::read_to_string("/proc/devices")?;
    parse_major_number(&devices, name).ok_or_else(|| SupportError::DeviceNotFound(name.to_string()))
}

/// A fresh path, inside a new temporary directory, for a device node.
///
/// The directory is not removed automatically.
pub fn temporary_file_path() -> SupportResult<PathBuf> {
    let dir = tempfile::TempDir::new()?.keep();
    Ok(dir.join("device"))
}

/// Removes a device node on drop.
#[derive(Debug)]
pub struct UnlinkOnDrop {
    path: PathBuf,
}

impl UnlinkOnDrop {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnlinkOnDrop {
    fn drop(&mut self) {
        if let Err(e) = sudo(&["rm", &self.path.to_string_lossy()]) {
            warn!(path = %self.path.display(), error = %e, "failed to remove device node");
        }
    }
}

/// Create a world-readable/writable character device node.
pub fn mknod(path: &Path, major: u32, minor: u32) -> SupportResult<UnlinkOnDrop> {
    sudo(&[
        "mknod",
        "--mode=a=rw",
        &path.to_string_lossy(),
        "c",
        &major.to_string(),
        &minor.to_string(),
    ])?;
    Ok(UnlinkOnDrop {
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICES: &str = "Character devices:\n\
  1 mem\n\
  4 /dev/vc/0\n\
240 chrdev-region-allocation\n\
241 testchr\n\
\n\
Block devices:\n\
  8 sd\n";

    #[test]
    fn test_parse_major_number() {
        assert_eq!(parse_major_number(DEVICES, "testchr"), Some(241));
        assert_eq!(parse_major_number(DEVICES, "mem"), Some(1));
        assert_eq!(parse_major_number(DEVICES, "chrdev-region-allocation"), Some(240));
    }

    #[test]
    fn test_parse_requires_exact_name() {
        assert_eq!(parse_major_number(DEVICES, "chr"), None);
        assert_eq!(parse_major_number(DEVICES, "Character devices:"), None);
    }

    #[test]
    fn test_temporary_file_path_is_fresh() {
        let a = temporary_file_path().unwrap();
        let b = temporary_file_path().unwrap();
        assert_ne!(a, b);
        assert!(a.parent().unwrap().is_dir());
        assert!(!a.exists());
    }
}
