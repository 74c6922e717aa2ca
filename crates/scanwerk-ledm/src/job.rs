// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan job driver — runs exactly one device-side scan job to a terminal
// state. One job covers one page on the flatbed or the whole feeder stack.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use scanwerk_core::batch::DocumentBatch;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{ColorSpace, ScanSource};

use crate::client::DeviceClient;
use crate::jpeg::SofLineFixer;
use crate::schema::{JobState, PreScanPage, ScanSettings};

/// Create a scan job with the given knobs and poll it to completion,
/// delivering each ready page into a fresh image writer from `batch`.
///
/// `poll_interval` is how often the job URL is re-read while the job is
/// processing; the device family expects ten seconds.
pub(crate) async fn run_scan_job(
    client: &DeviceClient,
    batch: &mut dyn DocumentBatch,
    source: ScanSource,
    resolution: u32,
    color_space: ColorSpace,
    poll_interval: Duration,
) -> Result<()> {
    let settings = ScanSettings::for_job(source, resolution, color_space);
    let job_url = client.post_scan_job(&settings).await?;

    let mut tick = tokio::time::interval(poll_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tick.tick().await;
        let job = client.job(&job_url).await?;
        match job.state() {
            JobState::Processing => {
                if let Some(scan) = &job.scan_job {
                    // Pre-scan phase: a page may be ready to upload. The
                    // device leaves ReadyToUpload once the binary is fetched,
                    // so no dedup bookkeeping is needed.
                    if let Some(page) = &scan.pre_scan_page {
                        if page.page_state == "ReadyToUpload" {
                            download_page(client, batch, page).await?;
                        }
                    }
                    // Post-scan phase: the device may have canceled the job.
                    if let Some(page) = &scan.post_scan_page {
                        if page.page_state == "CanceledByDevice" {
                            return Err(ScanwerkError::CanceledByDevice);
                        }
                    }
                }
            }
            JobState::Canceled => return Err(ScanwerkError::JobCanceled),
            JobState::Completed => {
                info!(job_url = %job_url, "scan job completed");
                return Ok(());
            }
            JobState::Other => {
                debug!(job_url = %job_url, state = %job.job_state, "unhandled job state");
            }
        }
    }
}

/// Stream one page binary through the SOF0 fixer into a new image writer.
async fn download_page(
    client: &DeviceClient,
    batch: &mut dyn DocumentBatch,
    page: &PreScanPage,
) -> Result<()> {
    let height = page
        .buffer_info
        .as_ref()
        .map(|b| u16::try_from(b.image_height).unwrap_or(u16::MAX))
        .unwrap_or(0);
    info!(
        page = page.page_number,
        height,
        binary_url = %page.binary_url,
        "page ready to upload"
    );

    let mut response = client.download_page(&page.binary_url).await?;
    let mut writer = batch.new_image_writer().await?;
    let mut fixer = SofLineFixer::new(height);
    let mut out = Vec::with_capacity(32 * 1024);
    let mut written = 0u64;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| ScanwerkError::transport_from("device.download_page", "read chunk", e))?
    {
        out.clear();
        fixer.feed(&chunk, &mut out)?;
        writer.write_all(&out).await?;
        written += out.len() as u64;
    }
    fixer.finish()?;
    writer.shutdown().await?;

    info!(page = page.page_number, bytes = written, "page stored");
    Ok(())
}
