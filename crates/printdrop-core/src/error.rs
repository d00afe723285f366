// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Printdrop.

use thiserror::Error;

/// Top-level error type for all Printdrop operations.
#[derive(Debug, Error)]
pub enum PrintdropError {
    // -- Pipeline outcomes --
    #[error("malformed delivery notification: {0}")]
    MalformedNotification(String),

    #[error("object key {0} is outside this worker's namespace")]
    ForeignNamespace(String),

    #[error("object key {0} was already delivered")]
    DuplicateDelivery(String),

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("unsupported printer protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("print dispatch to {device} failed: {output}")]
    DispatchFailure { device: String, output: String },

    // -- Collaborators --
    #[error("message queue unreachable: {0}")]
    QueueUnavailable(String),

    #[error("message queue error: {0}")]
    Queue(String),

    #[error("object storage error: {0}")]
    Storage(String),

    #[error("print subsystem error: {0}")]
    PrintSubsystem(String),

    // -- Local --
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PrintdropError>;
