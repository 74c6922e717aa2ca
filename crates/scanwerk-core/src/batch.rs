// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document batch sink — the host surface that receives scanned pages.
//
// One batch corresponds to one document as the user sees it: all pages fed
// between a ScanRequested and the matching ScanPagesComplete. The controller
// owns at most one open batch at a time.

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::error::Result;
use crate::types::DestinationSettings;

/// Sink for one page image. The scan pipeline writes the repaired JPEG
/// stream into it and shuts it down when the page is complete.
pub type ImageWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A batch of page images forming one document.
#[async_trait]
pub trait DocumentBatch: Send {
    /// Open a sink for the next page of the batch.
    async fn new_image_writer(&mut self) -> Result<ImageWriter>;

    /// Finalise the batch after the last page was delivered.
    async fn close_document_batch(&mut self) -> Result<()>;

    /// Throw away partial output after a canceled scan job.
    async fn discard_document_batch(&mut self) -> Result<()>;
}

/// Produces a [`DocumentBatch`] per scan request.
///
/// `previous` is the most recently closed batch, handed back so that a verso
/// pass (back sides, scanned after flipping the stack) can be merged with its
/// recto batch.
#[async_trait]
pub trait BatchFactory: Send + Sync {
    async fn new_batch(
        &self,
        doc_type: &str,
        destination: &DestinationSettings,
        format: &str,
        previous: Option<Box<dyn DocumentBatch>>,
    ) -> Result<Box<dyn DocumentBatch>>;
}
