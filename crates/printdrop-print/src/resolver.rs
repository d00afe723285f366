// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Destination resolution: raw identifier → transport + local device name.
//
// Identifier forms, tried in order:
//   "10.0.0.7/socket"   address + explicit protocol (exactly one slash)
//   "10.0.0.7"          dotted quad, protocol defaults to IPP
//   "Label_Printer_1"   a queue already configured on this machine
//
// Network destinations are registered with the print subsystem under a name
// derived from the address, so every job for the same address lands on the
// same local queue.  Two jobs can race to register the same brand-new name;
// each checks then registers, relying on the subsystem treating a repeated
// registration as a no-op.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use printdrop_core::error::{PrintdropError, Result};
use printdrop_core::types::TransportProtocol;

use crate::drivers::DriverCatalog;
use crate::subsystem::{PrintSubsystem, listing_contains};

/// Parsed form of a destination identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A printer reached over the network.
    Network {
        address: String,
        protocol: TransportProtocol,
    },
    /// A queue pre-configured in the local print subsystem.
    Direct(String),
    /// No identifier at all: let the subsystem use its default queue.
    SystemDefault,
}

impl Destination {
    /// Parse a raw destination identifier.  Pure; touches no printer.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Self::SystemDefault);
        };

        if raw.matches('/').count() == 1 {
            let (address, protocol) = raw.split_once('/').unwrap_or((raw, ""));
            let protocol: TransportProtocol = protocol.parse()?;
            let address = address.trim();
            if address.is_empty() {
                return Err(PrintdropError::Config(format!(
                    "printer identifier '{raw}' has no address"
                )));
            }
            return Ok(Self::Network {
                address: address.to_owned(),
                protocol,
            });
        }

        if is_dotted_quad(raw) {
            return Ok(Self::Network {
                address: raw.to_owned(),
                protocol: TransportProtocol::Ipp,
            });
        }

        Ok(Self::Direct(raw.to_owned()))
    }
}

/// Outcome of resolving a destination for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPrinter {
    pub destination: Destination,
    /// Local device name to submit to; `None` means the subsystem default.
    pub device: Option<String>,
    /// Whether this resolution issued a registration.
    pub registered: bool,
}

/// Deterministic local device name for a network address.
///
/// `192.168.1.5` becomes `_192_168_1_5`.
pub fn canonical_device_name(address: &str) -> String {
    let body: String = address
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("_{body}")
}

/// `d.d.d.d` with one to three digits per group.
fn is_dotted_quad(s: &str) -> bool {
    let groups: Vec<&str> = s.split('.').collect();
    groups.len() == 4
        && groups
            .iter()
            .all(|g| (1..=3).contains(&g.len()) && g.bytes().all(|b| b.is_ascii_digit()))
}

/// Resolves destination identifiers and makes sure network printers exist
/// as local queues before anything is submitted to them.
pub struct PrinterResolver {
    subsystem: Arc<dyn PrintSubsystem>,
    drivers: DriverCatalog,
    settle_delay: Duration,
    dry_run: bool,
}

impl PrinterResolver {
    pub fn new(
        subsystem: Arc<dyn PrintSubsystem>,
        drivers: DriverCatalog,
        settle_delay: Duration,
        dry_run: bool,
    ) -> Self {
        Self {
            subsystem,
            drivers,
            settle_delay,
            dry_run,
        }
    }

    /// Resolve `raw` to a local device, registering network printers the
    /// subsystem does not know yet.
    #[instrument(skip(self))]
    pub async fn resolve(&self, raw: Option<&str>) -> Result<ResolvedPrinter> {
        let destination = Destination::parse(raw)?;

        match &destination {
            Destination::Network { address, protocol } => {
                let name = canonical_device_name(address);
                let registered = self.ensure_registered(&name, address, *protocol).await?;
                Ok(ResolvedPrinter {
                    device: Some(name),
                    destination,
                    registered,
                })
            }
            Destination::Direct(name) => {
                if self.dry_run {
                    info!(device = %name, "[dry run] would verify printer is configured");
                } else if !self.is_known(name).await {
                    warn!(
                        device = %name,
                        "printer is not configured in the local print subsystem; attempting anyway"
                    );
                }
                Ok(ResolvedPrinter {
                    device: Some(name.clone()),
                    destination,
                    registered: false,
                })
            }
            Destination::SystemDefault => {
                debug!("no destination given, using subsystem default");
                Ok(ResolvedPrinter {
                    destination,
                    device: None,
                    registered: false,
                })
            }
        }
    }

    async fn is_known(&self, name: &str) -> bool {
        match self.subsystem.list_devices().await {
            Ok(listing) => listing_contains(&listing, name),
            Err(e) => {
                warn!(error = %e, "could not list printers, treating as unknown");
                false
            }
        }
    }

    /// Returns `true` when a registration was issued.
    ///
    /// Dry-run never touches the subsystem, not even to list devices.
    async fn ensure_registered(
        &self,
        name: &str,
        address: &str,
        protocol: TransportProtocol,
    ) -> Result<bool> {
        let uri = protocol.device_uri(address);
        let driver = self.drivers.select(protocol);

        if self.dry_run {
            info!(device = %name, uri = %uri, driver = %driver, "[dry run] would register printer if unknown");
            return Ok(false);
        }

        if self.is_known(name).await {
            debug!(device = %name, "printer already registered");
            return Ok(false);
        }

        info!(device = %name, uri = %uri, driver = %driver, "registering printer");
        self.subsystem.register_device(name, &uri, &driver).await?;

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        Ok(true)
    }
}
