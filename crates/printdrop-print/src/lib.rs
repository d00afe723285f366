// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printdrop Print: destination resolution, printer registration, and print
// submission against the local print subsystem.  The engine only depends on
// the `PrintSubsystem` capability; `CupsCli` is the production backend.

pub mod cups;
pub mod dispatcher;
pub mod drivers;
pub mod resolver;
pub mod subsystem;

pub use cups::CupsCli;
pub use dispatcher::PrintDispatcher;
pub use drivers::DriverCatalog;
pub use resolver::{Destination, PrinterResolver, ResolvedPrinter};
pub use subsystem::{DriverRef, PrintSubsystem};
