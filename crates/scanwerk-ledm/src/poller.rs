// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Event poller — one spawned task that turns the device's long-poll event
// surface into a channel of event tables.
//
// Shutdown is a synchronous handshake: the supervisor sends a reply sender
// on the stop channel and the task answers `true` only once it has actually
// exited. The supervisor must not spawn a replacement before the reply.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use scanwerk_core::error::ScanwerkError;

use crate::client::{DeviceClient, EventTableResponse};
use crate::schema::EventTable;

/// What the supervisor receives from a poller.
#[derive(Debug)]
pub enum PollerEvent {
    /// A non-empty event table arrived.
    Table(EventTable),
    /// The poll loop hit a fatal error and exited.
    Failed(ScanwerkError),
    /// Both channels closed without an error (task torn down).
    Closed,
}

/// Handle to a running event poller task.
pub struct EventPoller {
    events: mpsc::Receiver<EventTable>,
    errors: mpsc::Receiver<ScanwerkError>,
    stop: mpsc::Sender<oneshot::Sender<bool>>,
    task: JoinHandle<()>,
}

impl EventPoller {
    /// Spawn a poller. `poll_timeout` is the device-side hold time knob; the
    /// wire timeout is ten times it and the client deadline adds slack on
    /// top (see [`DeviceClient::fetch_event_table`]).
    pub fn spawn(client: DeviceClient, poll_timeout: Duration) -> Self {
        let (events_tx, events) = mpsc::channel(4);
        let (errors_tx, errors) = mpsc::channel(1);
        let (stop, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(poll_loop(client, poll_timeout, events_tx, errors_tx, stop_rx));
        Self {
            events,
            errors,
            stop,
            task,
        }
    }

    /// Wait for the next table or error.
    pub async fn next(&mut self) -> PollerEvent {
        tokio::select! {
            Some(table) = self.events.recv() => PollerEvent::Table(table),
            Some(err) = self.errors.recv() => PollerEvent::Failed(err),
            else => PollerEvent::Closed,
        }
    }

    /// Stop the poll task and wait until it has actually exited.
    ///
    /// Returns `true` when the task acknowledged the stop; `false` when it
    /// was already gone (after a fatal error). Either way the task has
    /// terminated when this returns.
    pub async fn shutdown(self) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        let acked = if self.stop.send(ack_tx).await.is_ok() {
            ack_rx.await.unwrap_or(false)
        } else {
            false
        };
        let _ = self.task.await;
        debug!(acked, "event poller shut down");
        acked
    }
}

async fn poll_loop(
    client: DeviceClient,
    poll_timeout: Duration,
    events: mpsc::Sender<EventTable>,
    errors: mpsc::Sender<ScanwerkError>,
    mut stop: mpsc::Receiver<oneshot::Sender<bool>>,
) {
    // Prime: a plain fetch captures the initial entity tag and the table of
    // events the device currently holds. A device with no backlog returns a
    // table without events, which stays off the channel like any other.
    let mut etag = match client.fetch_event_table(None, None).await {
        Ok(EventTableResponse::Changed { etag, table }) => {
            if table.events.is_empty() {
                trace!("prime event table carries no events");
            } else if !send_or_stop(&events, table, &mut stop).await {
                return;
            }
            etag
        }
        Ok(EventTableResponse::NotModified) => {
            let _ = errors
                .send(ScanwerkError::protocol(
                    "poller.prime",
                    "304 for a request without If-None-Match",
                ))
                .await;
            return;
        }
        Err(err) => {
            let _ = errors.send(err).await;
            return;
        }
    };

    loop {
        // A stop request between polls wins before any new request is made.
        match stop.try_recv() {
            Ok(ack) => {
                let _ = ack.send(true);
                debug!("event poller stopping on request");
                return;
            }
            Err(mpsc::error::TryRecvError::Empty) => {}
            Err(mpsc::error::TryRecvError::Disconnected) => {
                debug!("supervisor gone; event poller exiting");
                return;
            }
        }

        match client
            .fetch_event_table(etag.as_deref(), Some(poll_timeout))
            .await
        {
            Ok(EventTableResponse::Changed { etag: next, table }) => {
                etag = next;
                if table.events.is_empty() {
                    trace!("event table changed but carries no events");
                    continue;
                }
                if !send_or_stop(&events, table, &mut stop).await {
                    return;
                }
            }
            Ok(EventTableResponse::NotModified) => {
                trace!("no new events");
            }
            Err(err) => {
                let _ = errors.send(err).await;
                return;
            }
        }
    }
}

/// Send a table to the supervisor unless a stop request arrives first.
/// Returns `false` when the loop must exit (stopped or supervisor gone).
async fn send_or_stop(
    events: &mpsc::Sender<EventTable>,
    table: EventTable,
    stop: &mut mpsc::Receiver<oneshot::Sender<bool>>,
) -> bool {
    tokio::select! {
        sent = events.send(table) => sent.is_ok(),
        Some(ack) = stop.recv() => {
            let _ = ack.send(true);
            debug!("event poller stopping during delivery");
            false
        }
    }
}
