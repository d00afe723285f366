// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Capability interface over the local print subsystem.
//
// The resolver and dispatcher only ever talk to a `PrintSubsystem`.  The
// production implementation shells out to the CUPS command-line tools
// (`cups.rs`); tests substitute an in-memory fake.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use printdrop_core::error::Result;

/// Driver descriptor passed along with a device registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverRef {
    /// A vendor driver descriptor file (`.ppd` or `.ppd.gz`).
    File(PathBuf),
    /// Driverless IPP Everywhere registration.
    IppEverywhere,
    /// The subsystem's generic fallback driver.
    Generic,
}

impl std::fmt::Display for DriverRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::IppEverywhere => f.write_str("ipp-everywhere"),
            Self::Generic => f.write_str("generic"),
        }
    }
}

/// The three operations the engine needs from the local print subsystem.
#[async_trait]
pub trait PrintSubsystem: Send + Sync {
    /// Raw listing of the devices the subsystem knows about.
    async fn list_devices(&self) -> Result<String>;

    /// Register (or re-register) `name` as a queue for `device_uri`.
    ///
    /// Registering a name that already exists must not fail fatally.
    async fn register_device(&self, name: &str, device_uri: &str, driver: &DriverRef)
        -> Result<()>;

    /// Submit `file` to `device` (or the subsystem default when `None`),
    /// forwarding `raw_options` untouched.
    ///
    /// Fails with `PrintdropError::DispatchFailure` carrying the captured
    /// command output when the subsystem rejects the job.
    async fn submit(&self, device: Option<&str>, file: &Path, raw_options: &str) -> Result<()>;
}

/// Whether `name` appears as a device in a subsystem listing.
///
/// Understands both `lpstat -v` lines (`device for NAME: URI`) and
/// `lpstat -p` lines (`printer NAME is idle.  enabled since ...`).
pub fn listing_contains(listing: &str, name: &str) -> bool {
    listing.lines().any(|line| {
        let mut words = line.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (Some("device"), Some("for"), Some(dev)) => dev.trim_end_matches(':') == name,
            (Some("printer"), Some(dev), _) => dev == name,
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LPSTAT_V: &str = "device for Label_Printer_1: usb://Zebra/ZD420\n\
                            device for _192_168_1_5: socket://192.168.1.5:9100\n";

    #[test]
    fn finds_devices_in_lpstat_v_output() {
        assert!(listing_contains(LPSTAT_V, "Label_Printer_1"));
        assert!(listing_contains(LPSTAT_V, "_192_168_1_5"));
        assert!(!listing_contains(LPSTAT_V, "_192_168_1"));
    }

    #[test]
    fn finds_devices_in_lpstat_p_output() {
        let listing = "printer Office is idle.  enabled since Mon 01 Jan 2026\n";
        assert!(listing_contains(listing, "Office"));
        assert!(!listing_contains(listing, "idle."));
    }

    #[test]
    fn empty_listing_contains_nothing() {
        assert!(!listing_contains("", "Office"));
    }
}
