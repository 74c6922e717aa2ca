// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Scanwerk walk-up scan receiver.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Colour space requested from the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ColorSpace {
    #[default]
    Gray,
    Color,
}

impl ColorSpace {
    /// LEDM `ColorSpace` keyword.
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Self::Gray => "Gray",
            Self::Color => "Color",
        }
    }
}

/// Where the device acquires the page from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanSource {
    /// Flatbed glass — one page per job.
    Platen,
    /// Automatic document feeder — a whole stack per job.
    Adf,
}

impl ScanSource {
    /// LEDM `InputSource` keyword.
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Self::Platen => "Platen",
            Self::Adf => "Adf",
        }
    }
}

/// State of the automatic document feeder as reported by `/Scan/Status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdfState {
    Empty,
    Loaded,
    Jammed,
}

impl AdfState {
    /// Parse the wire keyword. Anything unrecognised counts as `Loaded`,
    /// matching the device-side convention that only an explicitly empty
    /// feeder selects the flatbed.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "Empty" => Self::Empty,
            "Jammed" => Self::Jammed,
            _ => Self::Loaded,
        }
    }

    /// The scan source implied by this feeder state.
    pub fn scan_source(&self) -> ScanSource {
        match self {
            Self::Empty => ScanSource::Platen,
            _ => ScanSource::Adf,
        }
    }
}

/// Monotonic event sequence identifier assigned by the device.
///
/// The wire form is `"i-j"` (e.g. `"48-189"`). Ordering is lexicographic on
/// `(i, j)`; events at or below the last handled stamp are replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct AgingStamp {
    pub i: u64,
    pub j: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("aging stamp must be two decimals separated by '-'")]
pub struct ParseAgingStampError;

impl FromStr for AgingStamp {
    type Err = ParseAgingStampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (i, j) = s.split_once('-').ok_or(ParseAgingStampError)?;
        Ok(Self {
            i: i.parse().map_err(|_| ParseAgingStampError)?,
            j: j.parse().map_err(|_| ParseAgingStampError)?,
        })
    }
}

impl fmt::Display for AgingStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.i, self.j)
    }
}

/// A configured scan destination, shown on the device front panel once
/// registered. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationSettings {
    /// Display name, combined with the hostname on the device UI.
    pub name: String,
    /// Stem for batch directory names; the document type is used when absent.
    #[serde(default)]
    pub file_pattern: Option<String>,
    /// Pages of this destination should be OCRed downstream.
    #[serde(default)]
    pub ocr: bool,
    /// This destination scans the back sides of the previous batch; the sink
    /// merges the two into one duplex document.
    #[serde(default)]
    pub verso: bool,
    /// Resolution in DPI, applied to both axes.
    pub resolution: u32,
    #[serde(default)]
    pub color_space: ColorSpace,
}
