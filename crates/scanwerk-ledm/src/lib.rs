// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk — HP LEDM walk-up scan pipeline.
//
// The device drives everything: destinations registered here appear on its
// front panel, user actions surface through the long-polled event table, and
// each requested scan becomes a device-side job whose pages are streamed back
// through the JPEG header fixer into a document batch.

pub mod client;
pub mod controller;
pub mod discovery;
pub mod jpeg;
mod job;
pub mod poller;
pub mod schema;

pub use client::DeviceClient;
pub use controller::{ControllerConfig, ScanController};
pub use poller::EventPoller;
