// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk — Core types and error definitions shared across all crates.

pub mod batch;
pub mod config;
pub mod error;
pub mod types;

pub use batch::{BatchFactory, DocumentBatch, ImageWriter};
pub use config::AppConfig;
pub use error::{Result, ScanwerkError};
pub use types::*;
