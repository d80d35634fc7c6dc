//! Local Device Scanner
//!
//! Maps array volume WWNs to local block devices by walking the
//! `/dev/disk/by-id` symlinks udev maintains.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Length of the WWN suffix carried in by-id names
pub const WWN_LENGTH: usize = 32;

const WWN_PREFIX: &str = "wwn-0x";
const DM_PREFIX: &str = "dm-name-";

/// Naming scheme of the by-id links to match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceNaming {
    /// `wwn-0x<wwn>` links of plain SCSI devices
    Wwn,
    /// `dm-name-<name>` links of device-mapper/multipath devices
    DeviceMapper,
}

impl DeviceNaming {
    fn prefix(self) -> &'static str {
        match self {
            DeviceNaming::Wwn => WWN_PREFIX,
            DeviceNaming::DeviceMapper => DM_PREFIX,
        }
    }
}

/// WWN carried by a by-id link name, if it follows the naming scheme
pub fn wwn_from_link_name(name: &str, naming: DeviceNaming) -> Option<String> {
    let rest = name.strip_prefix(naming.prefix())?;
    if !rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let start = rest.len().checked_sub(WWN_LENGTH)?;
    Some(rest[start..].to_string())
}

/// Scan a by-id directory, returning WWN -> resolved device path
pub fn scan_by_id(dir: &Path, naming: DeviceNaming) -> Result<BTreeMap<String, String>> {
    let dir_str = dir
        .to_str()
        .ok_or_else(|| Error::Internal(format!("non-UTF-8 device path: {}", dir.display())))?;
    let pattern =
        Path::new(&glob::Pattern::escape(dir_str)).join(format!("{}*", naming.prefix()));
    let pattern = pattern
        .to_str()
        .ok_or_else(|| Error::Internal(format!("non-UTF-8 device path: {}", dir.display())))?;

    if !dir.exists() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", dir.display()),
        )));
    }

    let entries = glob::glob(pattern)
        .map_err(|e| Error::Internal(format!("invalid device pattern '{}': {}", pattern, e)))?;

    let mut devices = BTreeMap::new();
    for entry in entries {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!("Skipping unreadable by-id entry: {}", e);
                continue;
            }
        };
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(wwn) = wwn_from_link_name(name, naming) else {
            debug!("Ignoring by-id entry {}", name);
            continue;
        };

        match fs::canonicalize(&path) {
            Ok(device) => {
                devices.insert(wwn, device.to_string_lossy().to_string());
            }
            Err(e) => warn!("Cannot resolve {}: {}", path.display(), e),
        }
    }

    Ok(devices)
}
