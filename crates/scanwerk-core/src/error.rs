// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Scanwerk.
//
// Transport, Parse and Protocol errors carry the operation that produced them
// plus an optional wrapped cause, so that a failure deep in a scan job still
// names the device call that went wrong.

use thiserror::Error;

/// Boxed cause attached to transport and parse failures.
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for all Scanwerk operations.
#[derive(Debug, Error)]
pub enum ScanwerkError {
    /// An HTTP call to the device failed or returned an unexpected status.
    #[error("{operation}: {message}")]
    Transport {
        operation: &'static str,
        message: String,
        #[source]
        source: Option<Cause>,
    },

    /// A device response could not be unmarshalled.
    #[error("{operation}: malformed device XML: {message}")]
    Parse {
        operation: &'static str,
        message: String,
        #[source]
        source: Option<Cause>,
    },

    /// The device violated the LEDM protocol: missing `Location` header,
    /// absent walk-up settings, unparsable aging stamp, unknown event type,
    /// missing SOF marker in a page stream.
    #[error("{operation}: protocol violation: {message}")]
    Protocol {
        operation: &'static str,
        message: String,
    },

    /// The scan job reached the `Canceled` terminal state.
    #[error("scan job canceled on the device")]
    JobCanceled,

    /// The device canceled the page during the post-scan phase.
    #[error("scan job canceled by the device during page transfer")]
    CanceledByDevice,

    /// The device announced it is powering down.
    #[error("device is powering down")]
    PowerDown,

    /// File I/O error from the document batch sink.
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanwerkError {
    /// Transport failure without an underlying cause (unexpected status).
    pub fn transport(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Transport {
            operation,
            message: message.into(),
            source: None,
        }
    }

    /// Transport failure wrapping the error that produced it.
    pub fn transport_from(
        operation: &'static str,
        message: impl Into<String>,
        source: impl Into<Cause>,
    ) -> Self {
        Self::Transport {
            operation,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// XML unmarshal failure wrapping the decoder error.
    pub fn parse(
        operation: &'static str,
        message: impl Into<String>,
        source: impl Into<Cause>,
    ) -> Self {
        Self::Parse {
            operation,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn protocol(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Protocol {
            operation,
            message: message.into(),
        }
    }

    /// Whether this error ends a scan job without ending the controller.
    pub fn is_job_cancellation(&self) -> bool {
        matches!(self, Self::JobCanceled | Self::CanceledByDevice)
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanwerkError>;
