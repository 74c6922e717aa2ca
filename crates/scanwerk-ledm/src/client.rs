// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Async HTTP+XML client for the device's LEDM control surface.
//
// The device speaks cleartext HTTP on its management port (8080). Ordinary
// requests go through one shared client; event long polls each get a fresh
// client because the total-request deadline must cover the device-side hold
// time and cannot be reset on a connection that is already open.

use std::time::Duration;

use reqwest::header::{CONNECTION, CONTENT_TYPE, ETAG, IF_NONE_MATCH, LOCATION};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::ScanSource;

use crate::schema::{
    self, DestinationRegistration, DiscoveryTree, EventTable, Job, ScanSettings, ScanStatus,
    WalkupDestination, WalkupEvent,
};

/// Default TCP connect timeout towards the device.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Slack added on top of the device-side hold time for a long poll.
const LONG_POLL_SLACK: Duration = Duration::from_secs(10);

/// Result of one event-table fetch.
#[derive(Debug)]
pub enum EventTableResponse {
    /// 200 — a new table, plus the entity tag to present next time.
    Changed {
        etag: Option<String>,
        table: EventTable,
    },
    /// 304 — nothing new since the presented entity tag.
    NotModified,
}

/// A destination the device accepted, identified by the UUID it minted.
#[derive(Debug, Clone)]
pub struct RegisteredDestination {
    pub uuid: Uuid,
    pub uri: String,
}

/// Client bound to a single device base URL.
#[derive(Clone)]
pub struct DeviceClient {
    base: Url,
    http: reqwest::Client,
    connect_timeout: Duration,
}

impl DeviceClient {
    /// Create a client for the given base URL (e.g. `http://192.168.1.50:8080`).
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_connect_timeout(base_url, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(base_url: &str, connect_timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| {
            ScanwerkError::transport_from("device.new", format!("invalid device URL {base_url:?}"), e)
        })?;
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ScanwerkError::transport_from("device.new", "build HTTP client", e))?;
        Ok(Self {
            base,
            http,
            connect_timeout,
        })
    }

    /// The device base URL this client talks to.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Resolve a device-relative URI; job and binary URLs may come back
    /// absolute from some firmware revisions.
    fn resolve(&self, op: &'static str, uri: &str) -> Result<Url> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            Url::parse(uri)
                .map_err(|e| ScanwerkError::transport_from(op, format!("bad URL {uri:?}"), e))
        } else {
            self.base
                .join(uri)
                .map_err(|e| ScanwerkError::transport_from(op, format!("bad URI {uri:?}"), e))
        }
    }

    /// GET a path and unmarshal the 200 body.
    async fn get_xml<T: DeserializeOwned>(&self, op: &'static str, uri: &str) -> Result<T> {
        let url = self.resolve(op, uri)?;
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ScanwerkError::transport_from(op, "GET failed", e))?;
        if resp.status() != StatusCode::OK {
            return Err(ScanwerkError::transport(
                op,
                format!("unexpected status {}", resp.status()),
            ));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| ScanwerkError::transport_from(op, "read body", e))?;
        quick_xml::de::from_str(&body).map_err(|e| ScanwerkError::parse(op, uri.to_owned(), e))
    }

    /// Whether the device answers on its management port. The discovery tree
    /// body is discarded; any successful connection counts.
    #[instrument(skip(self), fields(device = %self.base))]
    pub async fn is_online(&self) -> Result<()> {
        let url = self.resolve("device.online", "/DevMgmt/DiscoveryTree.xml")?;
        self.http
            .get(url)
            .send()
            .await
            .map_err(|e| ScanwerkError::transport_from("device.online", "GET failed", e))?;
        Ok(())
    }

    /// Fetch and parse the discovery tree (startup logging).
    #[instrument(skip(self), fields(device = %self.base))]
    pub async fn discovery_tree(&self) -> Result<DiscoveryTree> {
        self.get_xml("device.discovery_tree", "/DevMgmt/DiscoveryTree.xml")
            .await
    }

    /// Current scanner and feeder state.
    #[instrument(skip(self), fields(device = %self.base))]
    pub async fn scan_status(&self) -> Result<ScanStatus> {
        self.get_xml("device.scan_status", "/Scan/Status").await
    }

    /// Scan source implied by the feeder state: the flatbed only when the
    /// feeder is explicitly empty.
    pub async fn scan_source(&self) -> Result<ScanSource> {
        let status = self.scan_status().await?;
        let source = scanwerk_core::types::AdfState::from_wire(&status.adf_state).scan_source();
        debug!(adf_state = %status.adf_state, ?source, "derived scan source");
        Ok(source)
    }

    /// Register a destination on the device. Requires `201 Created`; the
    /// device mints a UUID as the last segment of the `Location` header.
    #[instrument(skip(self), fields(device = %self.base))]
    pub async fn register_destination(&self, label: &str) -> Result<RegisteredDestination> {
        const OP: &str = "device.register";
        let body = schema::marshal(&DestinationRegistration::new(label))
            .map_err(|e| ScanwerkError::parse(OP, "marshal registration", e))?;
        let url = self.resolve(OP, "/WalkupScanToComp/WalkupScanToCompDestinations")?;
        let resp = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| ScanwerkError::transport_from(OP, "POST failed", e))?;
        if resp.status() != StatusCode::CREATED {
            return Err(ScanwerkError::transport(
                OP,
                format!("unexpected status {}", resp.status()),
            ));
        }
        let uri = header_str(&resp, LOCATION.as_str())
            .ok_or_else(|| ScanwerkError::protocol(OP, "201 response without Location header"))?;
        let uuid = uuid_from_uri(&uri).ok_or_else(|| {
            ScanwerkError::protocol(OP, format!("Location {uri:?} does not end in a UUID"))
        })?;
        info!(%uuid, uri = %uri, "destination registered");
        Ok(RegisteredDestination { uuid, uri })
    }

    /// Fetch one destination record by the URI an event named.
    #[instrument(skip(self), fields(device = %self.base))]
    pub async fn walkup_destination(&self, uri: &str) -> Result<WalkupDestination> {
        self.get_xml("device.walkup_destination", uri).await
    }

    /// Fetch the latest walk-up event.
    #[instrument(skip(self), fields(device = %self.base))]
    pub async fn walkup_event(&self) -> Result<WalkupEvent> {
        self.get_xml(
            "device.walkup_event",
            "/WalkupScanToComp/WalkupScanToCompEvent",
        )
        .await
    }

    /// Fetch the event table.
    ///
    /// With `long_poll` set, the device is asked to hold the request for ten
    /// times that duration and the whole exchange runs on a fresh client
    /// whose deadline covers the hold time plus slack. `etag` is carried in
    /// `If-None-Match`; a 304 means nothing changed.
    #[instrument(skip(self), fields(device = %self.base, etag = etag.unwrap_or("-")))]
    pub async fn fetch_event_table(
        &self,
        etag: Option<&str>,
        long_poll: Option<Duration>,
    ) -> Result<EventTableResponse> {
        const OP: &str = "device.event_table";
        let (client, url) = match long_poll {
            Some(hold) => {
                let client = reqwest::Client::builder()
                    .connect_timeout(self.connect_timeout)
                    .timeout(hold + LONG_POLL_SLACK)
                    .build()
                    .map_err(|e| ScanwerkError::transport_from(OP, "build poll client", e))?;
                let mut url = self.resolve(OP, "/EventMgmt/EventTable")?;
                url.query_pairs_mut()
                    .append_pair("timeout", &(hold.as_secs() * 10).to_string());
                (client, url)
            }
            None => (self.http.clone(), self.resolve(OP, "/EventMgmt/EventTable")?),
        };

        let mut request = client.get(url).header(CONNECTION, "close");
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| ScanwerkError::transport_from(OP, "GET failed", e))?;

        match resp.status() {
            StatusCode::NOT_MODIFIED => Ok(EventTableResponse::NotModified),
            StatusCode::OK => {
                let etag = header_str(&resp, ETAG.as_str());
                let body = resp
                    .text()
                    .await
                    .map_err(|e| ScanwerkError::transport_from(OP, "read body", e))?;
                let table: EventTable = quick_xml::de::from_str(&body)
                    .map_err(|e| ScanwerkError::parse(OP, "event table", e))?;
                debug!(events = table.events.len(), etag = etag.as_deref().unwrap_or("-"), "event table fetched");
                Ok(EventTableResponse::Changed { etag, table })
            }
            status => Err(ScanwerkError::transport(
                OP,
                format!("unexpected status {status}"),
            )),
        }
    }

    /// Create a scan job. Requires `201 Created`; returns the job URL from
    /// the `Location` header.
    #[instrument(skip(self, settings), fields(device = %self.base, source = %settings.input_source))]
    pub async fn post_scan_job(&self, settings: &ScanSettings) -> Result<String> {
        const OP: &str = "device.post_scan_job";
        let body = schema::marshal(settings)
            .map_err(|e| ScanwerkError::parse(OP, "marshal scan settings", e))?;
        let url = self.resolve(OP, "/Scan/Jobs")?;
        let resp = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| ScanwerkError::transport_from(OP, "POST failed", e))?;
        if resp.status() != StatusCode::CREATED {
            return Err(ScanwerkError::transport(
                OP,
                format!("unexpected status {}", resp.status()),
            ));
        }
        let job_url = header_str(&resp, LOCATION.as_str())
            .ok_or_else(|| ScanwerkError::protocol(OP, "201 response without Location header"))?;
        info!(job_url = %job_url, "scan job created");
        Ok(job_url)
    }

    /// Poll the current state of a scan job.
    #[instrument(skip(self), fields(device = %self.base))]
    pub async fn job(&self, job_url: &str) -> Result<Job> {
        self.get_xml("device.job", job_url).await
    }

    /// Start downloading a page binary; the caller streams the body.
    #[instrument(skip(self), fields(device = %self.base))]
    pub async fn download_page(&self, binary_url: &str) -> Result<reqwest::Response> {
        const OP: &str = "device.download_page";
        let url = self.resolve(OP, binary_url)?;
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ScanwerkError::transport_from(OP, "GET failed", e))?;
        if resp.status() != StatusCode::OK {
            return Err(ScanwerkError::transport(
                OP,
                format!("unexpected status {}", resp.status()),
            ));
        }
        Ok(resp)
    }
}

/// Read a response header as a string, if present and valid UTF-8.
fn header_str(resp: &reqwest::Response, name: &str) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Extract the UUID the device placed at the end of a resource URI.
pub(crate) fn uuid_from_uri(uri: &str) -> Option<Uuid> {
    let last = uri.rsplit('/').next()?;
    Uuid::parse_str(last).ok()
}
