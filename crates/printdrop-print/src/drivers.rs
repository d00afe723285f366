// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Driver descriptor selection for printer registration.
//
// Chain: protocol override → <model>.ppd.gz → <model>.ppd → any other
// driver file in the directory → generic.  IPP always registers driverless.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use printdrop_core::config::DriverSettings;
use printdrop_core::types::TransportProtocol;

use crate::subsystem::DriverRef;

/// Extensions recognised as driver descriptor files, compressed first.
const DRIVER_EXTENSIONS: &[&str] = &["ppd.gz", "ppd"];

/// Chooses the driver reference used when registering a network printer.
#[derive(Debug, Clone, Default)]
pub struct DriverCatalog {
    settings: DriverSettings,
}

impl DriverCatalog {
    pub fn new(settings: DriverSettings) -> Self {
        Self { settings }
    }

    /// Pick the driver for a device reached over `protocol`.
    pub fn select(&self, protocol: TransportProtocol) -> DriverRef {
        if protocol == TransportProtocol::Ipp {
            return DriverRef::IppEverywhere;
        }

        if let Some(path) = self.settings.overrides.get(&protocol) {
            if path.is_file() {
                return DriverRef::File(path.clone());
            }
            warn!(
                protocol = %protocol,
                path = %path.display(),
                "driver override missing on disk, falling back"
            );
        }

        let Some(dir) = self.settings.directory.as_deref() else {
            return DriverRef::Generic;
        };

        if let Some(model) = self.settings.model.as_deref() {
            for ext in DRIVER_EXTENSIONS {
                let candidate = dir.join(format!("{model}.{ext}"));
                if candidate.is_file() {
                    debug!(path = %candidate.display(), "using vendor driver");
                    return DriverRef::File(candidate);
                }
            }
        }

        match any_driver_file(dir) {
            Some(path) => {
                debug!(path = %path.display(), "using first known driver file");
                DriverRef::File(path)
            }
            None => DriverRef::Generic,
        }
    }
}

/// First driver file in `dir` by name, preferring compressed descriptors.
fn any_driver_file(dir: &Path) -> Option<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "driver directory unreadable");
            return None;
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    DRIVER_EXTENSIONS.iter().find_map(|ext| {
        let suffix = format!(".{ext}");
        files
            .iter()
            .find(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(&suffix))
            })
            .cloned()
    })
}
