// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Error classification and receive backoff.
//
// Per-message failures are classified to decide how loudly to report a
// message left for redelivery.  Receive failures pick one of two fixed
// backoffs: a longer one when the queue is unreachable, a shorter one for
// everything else.

use std::time::Duration;

use printdrop_core::error::PrintdropError;
use printdrop_core::types::ErrorClass;
use printdrop_core::WorkerConfig;

/// Classify a `PrintdropError` for redelivery reporting.
pub fn classify_error(err: &PrintdropError) -> ErrorClass {
    match err {
        // Redelivery of the same payload cannot fix these.
        PrintdropError::MalformedNotification(_) => ErrorClass::Permanent,
        PrintdropError::ForeignNamespace(_) => ErrorClass::Permanent,
        PrintdropError::DuplicateDelivery(_) => ErrorClass::Permanent,
        PrintdropError::UnsupportedProtocol(_) => ErrorClass::Permanent,
        PrintdropError::Config(_) => ErrorClass::Permanent,
        PrintdropError::Serialization(_) => ErrorClass::Permanent,

        // A later attempt may succeed.
        PrintdropError::Transfer(_) => ErrorClass::Transient,
        PrintdropError::DispatchFailure { .. } => ErrorClass::Transient,
        PrintdropError::QueueUnavailable(_) => ErrorClass::Transient,
        PrintdropError::Queue(_) => ErrorClass::Transient,
        PrintdropError::Storage(_) => ErrorClass::Transient,
        PrintdropError::PrintSubsystem(_) => ErrorClass::Transient,
        PrintdropError::Io(_) => ErrorClass::Transient,
    }
}

/// Whether a receive failure means the queue could not be reached at all.
pub fn is_connectivity_error(err: &PrintdropError) -> bool {
    match err {
        PrintdropError::QueueUnavailable(_) => true,
        PrintdropError::Io(io_err) => matches!(
            io_err.kind(),
            std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::BrokenPipe
        ),
        _ => false,
    }
}

/// Fixed delays applied after a failed receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveBackoff {
    /// After a connectivity-class failure.
    pub connection: Duration,
    /// After any other failure.
    pub other: Duration,
}

impl Default for ReceiveBackoff {
    fn default() -> Self {
        Self {
            connection: Duration::from_secs(10),
            other: Duration::from_secs(5),
        }
    }
}

impl ReceiveBackoff {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            connection: config.connection_backoff(),
            other: config.error_backoff(),
        }
    }

    /// Delay before the next receive after `err`.
    pub fn delay_for(&self, err: &PrintdropError) -> Duration {
        if is_connectivity_error(err) {
            self.connection
        } else {
            self.other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_queue_backs_off_longer() {
        let backoff = ReceiveBackoff::default();
        let err = PrintdropError::QueueUnavailable("database is locked".into());
        assert_eq!(backoff.delay_for(&err), Duration::from_secs(10));
    }

    #[test]
    fn other_receive_errors_back_off_shorter() {
        let backoff = ReceiveBackoff::default();
        let err = PrintdropError::Queue("no such table: messages".into());
        assert_eq!(backoff.delay_for(&err), Duration::from_secs(5));
    }

    #[test]
    fn refused_connection_is_connectivity() {
        let err = PrintdropError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
        assert!(is_connectivity_error(&err));
        let err = PrintdropError::Io(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(!is_connectivity_error(&err));
    }

    #[test]
    fn unsupported_protocol_is_permanent() {
        let err = PrintdropError::UnsupportedProtocol("usb".into());
        assert_eq!(classify_error(&err), ErrorClass::Permanent);
    }

    #[test]
    fn transfer_failure_is_transient() {
        let err = PrintdropError::Transfer("connection reset".into());
        assert_eq!(classify_error(&err), ErrorClass::Transient);
    }
}
