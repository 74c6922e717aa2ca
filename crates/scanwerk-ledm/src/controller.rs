// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Controller — top-level supervisor of the walk-up scan pipeline.
//
// Holds the registered-destination map, supervises the event poller,
// re-registers destinations on a timer, deduplicates events by aging stamp,
// and drives the walk-up session state machine
// (HostSelected → ScanRequested → ScanNewPageRequested* → ScanPagesComplete).
// Scan jobs run inline on this task: while a scan is in progress no new
// events are consumed, which matches the device — the user can only interact
// with one page at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use scanwerk_core::batch::{BatchFactory, DocumentBatch};
use scanwerk_core::config::AppConfig;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{AgingStamp, DestinationSettings, ScanSource};

use crate::client::{uuid_from_uri, DeviceClient};
use crate::job::run_scan_job;
use crate::poller::{EventPoller, PollerEvent};
use crate::schema::{Event, EventTable, WalkupDestination, WalkupEventKind};

/// Payload resource type that names a walk-up destination.
const WALKUP_DESTINATION_RESOURCE: &str = "wus:WalkupScanToCompDestination";

/// Timing knobs of the controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// How often destinations are re-registered; the timer resets on every
    /// received event table, since an active user refreshes them implicitly.
    pub registration_interval: Duration,
    /// Device-side hold time knob of the event long poll.
    pub event_poll_timeout: Duration,
    /// How often a processing scan job is re-polled.
    pub job_poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            registration_interval: Duration::from_secs(30 * 60),
            event_poll_timeout: Duration::from_secs(2 * 60),
            job_poll_interval: Duration::from_secs(10),
        }
    }
}

impl From<&AppConfig> for ControllerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            registration_interval: config.registration_interval(),
            event_poll_timeout: config.event_poll_timeout(),
            ..Self::default()
        }
    }
}

/// Top-level state of one controller run.
pub struct ScanController {
    client: DeviceClient,
    factory: Arc<dyn BatchFactory>,
    hostname: String,
    configured: Vec<DestinationSettings>,
    config: ControllerConfig,
    /// Registered destinations keyed by the UUID the device minted.
    /// Re-registration merges, so late events for a UUID from an earlier
    /// cycle still resolve.
    destinations: HashMap<Uuid, DestinationSettings>,
    /// Last handled event stamp; events at or below it are replays.
    aging_stamp: AgingStamp,
    /// Source recorded at HostSelected for the upcoming job.
    scan_source: Option<ScanSource>,
    /// The open batch of the active session, if any.
    batch: Option<Box<dyn DocumentBatch>>,
    /// The most recently closed batch, kept for verso chaining.
    previous_batch: Option<Box<dyn DocumentBatch>>,
}

impl ScanController {
    pub fn new(
        client: DeviceClient,
        factory: Arc<dyn BatchFactory>,
        hostname: String,
        destinations: Vec<DestinationSettings>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            client,
            factory,
            hostname,
            configured: destinations,
            config,
            destinations: HashMap::new(),
            aging_stamp: AgingStamp::default(),
            scan_source: None,
            batch: None,
            previous_batch: None,
        }
    }

    /// Register destinations and process device events until an error ends
    /// the run. Never returns `Ok` in practice; `PowerDown` is the orderly
    /// way out.
    pub async fn run(mut self) -> Result<()> {
        self.register_all().await?;

        let mut poller = EventPoller::spawn(self.client.clone(), self.config.event_poll_timeout);
        let timer = tokio::time::sleep(self.config.registration_interval);
        tokio::pin!(timer);

        let err = loop {
            tokio::select! {
                event = poller.next() => match event {
                    PollerEvent::Table(table) => {
                        if let Err(e) = self.handle_event_table(table).await {
                            break e;
                        }
                        timer
                            .as_mut()
                            .reset(Instant::now() + self.config.registration_interval);
                    }
                    PollerEvent::Failed(e) => break e,
                    PollerEvent::Closed => {
                        break ScanwerkError::transport(
                            "controller.run",
                            "event poller exited without reporting an error",
                        );
                    }
                },
                () = &mut timer => {
                    debug!("re-registration timer fired");
                    // The poller must be fully stopped before registering and
                    // spawning a successor; two concurrent pollers corrupt
                    // the entity-tag cursor.
                    let acked = poller.shutdown().await;
                    trace!(acked, "poller handshake complete");
                    self.register_all().await?;
                    poller = EventPoller::spawn(
                        self.client.clone(),
                        self.config.event_poll_timeout,
                    );
                    timer
                        .as_mut()
                        .reset(Instant::now() + self.config.registration_interval);
                }
            }
        };

        poller.shutdown().await;
        Err(err)
    }

    /// Register every configured destination, merging the fresh UUIDs into
    /// the map. Re-registering also moves the destinations back to the top
    /// of the device's on-screen list.
    async fn register_all(&mut self) -> Result<()> {
        for destination in self.configured.clone() {
            let label = format!("{}({})", self.hostname, destination.name);
            let registered = self.client.register_destination(&label).await?;
            self.destinations.insert(registered.uuid, destination);
        }
        info!(
            registered = self.configured.len(),
            known = self.destinations.len(),
            "destinations registered"
        );
        Ok(())
    }

    /// Process one event table in document order; the first error aborts the
    /// remaining events of the table.
    async fn handle_event_table(&mut self, table: EventTable) -> Result<()> {
        debug!(events = table.events.len(), "event table received");
        for event in &table.events {
            match event.category.as_str() {
                "ScanEvent" => self.handle_scan_event(event).await?,
                "PoweringDownEvent" => {
                    warn!("device announced power-down");
                    return Err(ScanwerkError::PowerDown);
                }
                other => trace!(category = other, "ignoring event"),
            }
        }
        Ok(())
    }

    async fn handle_scan_event(&mut self, event: &Event) -> Result<()> {
        let stamp: AgingStamp = event.aging_stamp.parse().map_err(|e| {
            ScanwerkError::protocol(
                "controller.scan_event",
                format!("bad aging stamp {:?}: {e}", event.aging_stamp),
            )
        })?;
        if stamp <= self.aging_stamp {
            debug!(%stamp, last = %self.aging_stamp, "replayed scan event dropped");
            return Ok(());
        }
        self.aging_stamp = stamp;

        let Some(uri) = event
            .payloads
            .iter()
            .find(|p| p.resource_type == WALKUP_DESTINATION_RESOURCE)
            .map(|p| p.resource_uri.clone())
        else {
            trace!(%stamp, "scan event without a walk-up destination payload");
            return Ok(());
        };
        let Some(uuid) = uuid_from_uri(&uri) else {
            trace!(uri = %uri, "destination URI does not end in a UUID");
            return Ok(());
        };
        let Some(settings) = self.destinations.get(&uuid).cloned() else {
            trace!(%uuid, "scan event for a destination of another host");
            return Ok(());
        };

        debug!(%stamp, %uuid, "scan event for a registered destination");
        let destination = self.client.walkup_destination(&uri).await?;
        self.handle_walkup_event(&settings, &destination).await
    }

    /// Fetch the latest walk-up event and advance the session state machine.
    async fn handle_walkup_event(
        &mut self,
        settings: &DestinationSettings,
        destination: &WalkupDestination,
    ) -> Result<()> {
        const OP: &str = "controller.walkup";
        let event = self.client.walkup_event().await?;
        info!(event = %event.event_type, destination = %settings.name, "walk-up event");

        match event.kind() {
            WalkupEventKind::HostSelected => {
                let source = self.client.scan_source().await?;
                info!(?source, "host selected on the device front panel");
                self.scan_source = Some(source);
            }

            WalkupEventKind::ScanRequested => {
                let walkup_settings = destination.settings.as_ref().ok_or_else(|| {
                    ScanwerkError::protocol(OP, "ScanRequested without WalkupScanToCompSettings")
                })?;
                if self.batch.is_some() {
                    return Err(ScanwerkError::protocol(
                        OP,
                        "ScanRequested while a document batch is still open",
                    ));
                }
                let doc_type = shortcut_doc_type(&walkup_settings.shortcut);
                let previous = self.previous_batch.take();
                let batch = self
                    .factory
                    .new_batch(doc_type, settings, "Jpeg", previous)
                    .await?;
                self.run_job(batch, settings).await?;
            }

            WalkupEventKind::ScanNewPageRequested => {
                let batch = self.batch.take().ok_or_else(|| {
                    ScanwerkError::protocol(
                        OP,
                        "ScanNewPageRequested without an open document batch",
                    )
                })?;
                self.run_job(batch, settings).await?;
            }

            WalkupEventKind::ScanPagesComplete => {
                let mut batch = self.batch.take().ok_or_else(|| {
                    ScanwerkError::protocol(OP, "ScanPagesComplete without an open document batch")
                })?;
                batch.close_document_batch().await?;
                self.previous_batch = Some(batch);
                info!("document batch closed");
            }

            WalkupEventKind::Unknown(other) => {
                return Err(ScanwerkError::protocol(
                    OP,
                    format!("unknown walk-up event type {other:?}"),
                ));
            }
        }
        Ok(())
    }

    /// Run one scan job into `batch`. On success the batch stays open for
    /// further pages; a device-side cancellation discards it and the
    /// controller keeps running.
    async fn run_job(
        &mut self,
        mut batch: Box<dyn DocumentBatch>,
        settings: &DestinationSettings,
    ) -> Result<()> {
        let source = self.current_source().await?;
        let result = run_scan_job(
            &self.client,
            batch.as_mut(),
            source,
            settings.resolution,
            settings.color_space,
            self.config.job_poll_interval,
        )
        .await;
        match result {
            Ok(()) => {
                self.batch = Some(batch);
                Ok(())
            }
            Err(e) if e.is_job_cancellation() => {
                warn!(error = %e, "scan job canceled; discarding batch");
                batch.discard_document_batch().await?;
                self.scan_source = None;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Source recorded at HostSelected; re-queried when the device replayed
    /// a ScanRequested without one (e.g. after a controller restart).
    async fn current_source(&mut self) -> Result<ScanSource> {
        match self.scan_source {
            Some(source) => Ok(source),
            None => {
                let source = self.client.scan_source().await?;
                debug!(?source, "scan source queried on demand");
                self.scan_source = Some(source);
                Ok(source)
            }
        }
    }
}

/// Strip the `Save` prefix off a device shortcut: `SaveDocument1` names the
/// `Document1` document type. Malformed shortcuts pass through whole.
fn shortcut_doc_type(shortcut: &str) -> &str {
    shortcut.get(4..).filter(|s| !s.is_empty()).unwrap_or(shortcut)
}
