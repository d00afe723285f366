// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Printdrop delivery worker.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PrintdropError;

/// Object metadata field naming the destination printer.
pub const METADATA_PRINTER: &str = "printer";

/// Object metadata field carrying the opaque print options string.
pub const METADATA_PRINT_OPTIONS: &str = "print-options";

/// Object metadata field carrying the SHA-256 hex digest of the body.
pub const METADATA_SHA256: &str = "sha256";

/// Top-level object key prefix under which every worker namespace lives.
pub const CLIENTS_PREFIX: &str = "clients";

/// Free-form metadata attached to a stored object.
pub type ObjectMetadata = HashMap<String, String>;

/// Location of an artifact in object storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocator {
    /// Bucket / container name.
    pub container: String,
    /// Object key inside the container (already percent-decoded).
    pub key: String,
}

impl ObjectLocator {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
        }
    }

    /// Last path segment of the key, used as the local file name.
    pub fn basename(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or_default()
    }

    /// Whether the key lives under `clients/{namespace}/`.
    pub fn in_namespace(&self, namespace: &str) -> bool {
        let mut parts = self.key.splitn(3, '/');
        matches!(
            (parts.next(), parts.next(), parts.next()),
            (Some(CLIENTS_PREFIX), Some(ns), Some(rest)) if ns == namespace && !rest.is_empty()
        )
    }
}

impl std::fmt::Display for ObjectLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.container, self.key)
    }
}

/// A message as handed out by the at-least-once queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: String,
    pub body: String,
    /// Opaque handle used to acknowledge (delete) this particular receipt.
    pub receipt_handle: String,
    /// How many times the queue has handed this message out, this receipt included.
    pub approx_receive_count: u32,
}

impl QueueMessage {
    /// Short identifier used to key log lines.
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(8) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }
}

/// Transport used to reach a network printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    /// Raw TCP socket (port 9100, JetDirect).
    Socket,
    /// LPR/LPD (RFC 1179, port 515).
    Lpd,
    /// IPP (port 631).
    Ipp,
}

impl TransportProtocol {
    /// Keyword as written in destination identifiers and device URIs.
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Socket => "socket",
            Self::Lpd => "lpd",
            Self::Ipp => "ipp",
        }
    }

    /// Default port for this protocol.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Socket => 9100,
            Self::Lpd => 515,
            Self::Ipp => 631,
        }
    }

    /// Device URI handed to the print subsystem when registering `address`.
    pub fn device_uri(&self, address: &str) -> String {
        match self {
            Self::Socket => format!("socket://{address}:{}", self.default_port()),
            Self::Lpd => format!("lpd://{address}/lp"),
            Self::Ipp => format!("ipp://{address}/ipp/print"),
        }
    }
}

impl FromStr for TransportProtocol {
    type Err = PrintdropError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "socket" => Ok(Self::Socket),
            "lpd" => Ok(Self::Lpd),
            "ipp" => Ok(Self::Ipp),
            other => Err(PrintdropError::UnsupportedProtocol(other.to_owned())),
        }
    }
}

impl std::fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Classification of errors for acknowledgement and backoff decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Connectivity blip or retryable failure; redelivery may succeed.
    Transient,
    /// Retrying the same input cannot succeed.
    Permanent,
}
