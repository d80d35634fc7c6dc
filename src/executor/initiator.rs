//! Local Host Identity
//!
//! Reads the iSCSI initiator name of the local host, or the MAC address of a
//! network interface for hosts still using the legacy identity scheme.

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Parse the contents of an `initiatorname.iscsi` file.
///
/// The initiator is the value after `=` on the last non-blank line.
pub fn parse_initiator_name(contents: &str) -> Result<String> {
    let last = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .ok_or_else(|| Error::HostIdentity("initiator name file is empty".into()))?;

    let (_, value) = last.split_once('=').ok_or_else(|| {
        Error::HostIdentity(format!("malformed initiator name line: '{}'", last))
    })?;

    let value = value.trim();
    if value.is_empty() {
        return Err(Error::HostIdentity("initiator name is empty".into()));
    }
    Ok(value.to_string())
}

/// Read the iSCSI initiator name from a file
pub fn read_initiator_name(path: &Path) -> Result<String> {
    let contents = fs::read_to_string(path).map_err(|e| {
        Error::HostIdentity(format!("error reading {}: {}", path.display(), e))
    })?;
    let name = parse_initiator_name(&contents)?;
    debug!(initiator = %name, "Read iSCSI initiator name");
    Ok(name)
}

/// Read the MAC address of an interface from sysfs
pub fn read_mac_address(net_class_path: &Path, interface: &str) -> Result<String> {
    let path = net_class_path.join(interface).join("address");
    let raw = fs::read_to_string(&path).map_err(|e| {
        Error::HostIdentity(format!("problem getting mac address from {}: {}", path.display(), e))
    })?;

    let mac = raw.replace('\n', "").trim().to_string();
    if mac.is_empty() {
        return Err(Error::HostIdentity(format!(
            "interface {} has no mac address",
            interface
        )));
    }
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_initiator_name_takes_last_line() {
        let contents = "## DO NOT EDIT\nInitiatorName=iqn.1994-05.com.redhat:old\nInitiatorName=iqn.1994-05.com.redhat:a1b2c3\n\n";
        assert_eq!(
            parse_initiator_name(contents).unwrap(),
            "iqn.1994-05.com.redhat:a1b2c3"
        );
    }

    #[test]
    fn test_parse_initiator_name_rejects_empty_value() {
        assert_matches!(
            parse_initiator_name("InitiatorName=\n"),
            Err(Error::HostIdentity(_))
        );
        assert_matches!(parse_initiator_name(""), Err(Error::HostIdentity(_)));
        assert_matches!(
            parse_initiator_name("no separator"),
            Err(Error::HostIdentity(_))
        );
    }

    #[test]
    fn test_read_mac_address() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("eth0")).unwrap();
        std::fs::write(dir.path().join("eth0/address"), "52:54:00:12:34:56\n").unwrap();

        assert_eq!(
            read_mac_address(dir.path(), "eth0").unwrap(),
            "52:54:00:12:34:56"
        );
        assert_matches!(
            read_mac_address(dir.path(), "eth1"),
            Err(Error::HostIdentity(_))
        );
    }
}
