// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// File-based document batch sink.
//
// Each batch is a directory of page images. Pages are written into a
// `.partial` staging directory that is renamed into place when the batch
// closes, so a crash mid-scan never leaves a directory that looks finished.
//
// A verso destination chains onto the previously closed batch: the user
// scans the fronts, flips the stack, scans the backs, and the close pass
// interleaves the two into one duplex document (backs arrive in reverse
// order because the flipped stack feeds last-page-first).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, warn};

use scanwerk_core::batch::{BatchFactory, DocumentBatch, ImageWriter};
use scanwerk_core::error::Result;
use scanwerk_core::types::DestinationSettings;

/// Produces one directory-backed batch per scan request under a fixed root.
pub struct FileBatchFactory {
    root: PathBuf,
    /// Final directory of the most recently closed batch, for verso merges.
    last_closed: Arc<Mutex<Option<PathBuf>>>,
}

impl FileBatchFactory {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            last_closed: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl BatchFactory for FileBatchFactory {
    async fn new_batch(
        &self,
        doc_type: &str,
        destination: &DestinationSettings,
        format: &str,
        previous: Option<Box<dyn DocumentBatch>>,
    ) -> Result<Box<dyn DocumentBatch>> {
        fs::create_dir_all(&self.root).await?;

        let stem = destination
            .file_pattern
            .clone()
            .unwrap_or_else(|| doc_type.to_owned());
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let mut final_dir = self.root.join(format!("{stem}-{stamp}"));
        let mut suffix = 1u32;
        while path_exists(&final_dir).await || path_exists(&staging_of(&final_dir)).await {
            suffix += 1;
            final_dir = self.root.join(format!("{stem}-{stamp}-{suffix}"));
        }
        let staging = staging_of(&final_dir);
        fs::create_dir_all(&staging).await?;

        // A verso pass merges into the batch that was closed just before it.
        let merge_with = if destination.verso && previous.is_some() {
            self.last_closed.lock().expect("last-closed lock poisoned").take()
        } else {
            None
        };
        if destination.verso && merge_with.is_none() {
            warn!(
                destination = %destination.name,
                "verso destination without a preceding batch; keeping pages separate"
            );
        }

        info!(
            doc_type,
            format,
            dir = %staging.display(),
            merging = merge_with.is_some(),
            "document batch opened"
        );
        Ok(Box::new(FileDocumentBatch {
            staging,
            final_dir,
            extension: page_extension(format),
            pages: 0,
            merge_with,
            last_closed: Arc::clone(&self.last_closed),
        }))
    }
}

struct FileDocumentBatch {
    staging: PathBuf,
    final_dir: PathBuf,
    extension: &'static str,
    pages: u32,
    merge_with: Option<PathBuf>,
    last_closed: Arc<Mutex<Option<PathBuf>>>,
}

#[async_trait]
impl DocumentBatch for FileDocumentBatch {
    async fn new_image_writer(&mut self) -> Result<ImageWriter> {
        self.pages += 1;
        let path = self
            .staging
            .join(format!("page-{:04}.{}", self.pages, self.extension));
        debug!(path = %path.display(), "opening page writer");
        let file = fs::File::create(&path).await?;
        Ok(Box::new(file))
    }

    async fn close_document_batch(&mut self) -> Result<()> {
        let closed = match self.merge_with.take() {
            Some(recto) => {
                merge_verso(&recto, &self.staging, self.extension).await?;
                info!(
                    dir = %recto.display(),
                    verso_pages = self.pages,
                    "verso pages merged into recto batch"
                );
                recto
            }
            None => {
                fs::rename(&self.staging, &self.final_dir).await?;
                info!(
                    dir = %self.final_dir.display(),
                    pages = self.pages,
                    "document batch closed"
                );
                self.final_dir.clone()
            }
        };
        *self.last_closed.lock().expect("last-closed lock poisoned") = Some(closed);
        Ok(())
    }

    async fn discard_document_batch(&mut self) -> Result<()> {
        warn!(dir = %self.staging.display(), pages = self.pages, "discarding partial batch");
        // A recto batch reserved for this merge was never consumed; put it
        // back so the next verso attempt can still chain onto it.
        if let Some(recto) = self.merge_with.take() {
            *self.last_closed.lock().expect("last-closed lock poisoned") = Some(recto);
        }
        match fs::remove_dir_all(&self.staging).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn staging_of(final_dir: &Path) -> PathBuf {
    let mut name = final_dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    final_dir.with_file_name(name)
}

fn page_extension(format: &str) -> &'static str {
    match format {
        "Jpeg" => "jpg",
        _ => "bin",
    }
}

async fn path_exists(path: &Path) -> bool {
    fs::metadata(path).await.is_ok()
}

/// Sorted page files of a batch directory.
async fn list_pages(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pages = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with("page-") {
            pages.push(entry.path());
        }
    }
    pages.sort();
    Ok(pages)
}

/// Interleave a recto batch with its verso pages in place.
///
/// Verso pages are reversed first: the flipped stack feeds the back of the
/// last page before the back of the first. Leftover pages of either side
/// (uneven counts) are appended at the end.
async fn merge_verso(recto_dir: &Path, verso_staging: &Path, extension: &str) -> Result<()> {
    let recto_pages = list_pages(recto_dir).await?;
    let mut verso_pages = list_pages(verso_staging).await?;
    verso_pages.reverse();

    let mut ordered = Vec::with_capacity(recto_pages.len() + verso_pages.len());
    let mut recto_iter = recto_pages.into_iter();
    let mut verso_iter = verso_pages.into_iter();
    loop {
        match (recto_iter.next(), verso_iter.next()) {
            (None, None) => break,
            (recto, verso) => {
                ordered.extend(recto);
                ordered.extend(verso);
            }
        }
    }

    // Assemble in a scratch directory, then swap it in, so a failure part
    // way through never leaves a half-renumbered batch.
    let scratch = verso_staging.with_extension("merge");
    fs::create_dir_all(&scratch).await?;
    for (index, source) in ordered.iter().enumerate() {
        let target = scratch.join(format!("page-{:04}.{extension}", index + 1));
        fs::rename(source, target).await?;
    }
    fs::remove_dir_all(recto_dir).await?;
    fs::remove_dir_all(verso_staging).await?;
    fs::rename(&scratch, recto_dir).await?;
    Ok(())
}
