// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end scenarios against a scripted mock LEDM device.
//
// The mock speaks just enough of the control surface for the pipeline:
// event-table long polling with entity tags, destination registration,
// walk-up event fetches, scan jobs and page binaries. Tests script the
// device, run a controller against it, and end every run with a
// PoweringDownEvent.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::io::AsyncWrite;
use uuid::Uuid;

use scanwerk_core::batch::{BatchFactory, DocumentBatch, ImageWriter};
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{ColorSpace, DestinationSettings};
use scanwerk_ledm::poller::PollerEvent;
use scanwerk_ledm::{ControllerConfig, DeviceClient, EventPoller, ScanController};

// ---------------------------------------------------------------------------
// Mock device
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct MockDevice(Arc<Mutex<DeviceState>>);

struct DeviceState {
    // event table
    current_etag: u64,
    current_body: String,
    queued_tables: VecDeque<String>,
    if_none_match_history: Vec<Option<String>>,
    // walk-up surface
    registrations: Vec<String>,
    registered_uuids: Vec<Uuid>,
    walkup_events: VecDeque<String>,
    walkup_event_gets: usize,
    shortcut: String,
    adf_state: String,
    // scan jobs
    job_scripts: VecDeque<VecDeque<String>>,
    jobs: HashMap<u32, VecDeque<String>>,
    next_job_id: u32,
    posted_settings: Vec<String>,
    pages: HashMap<(u32, u32), Vec<u8>>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            current_etag: 1,
            current_body: empty_table_xml(),
            queued_tables: VecDeque::new(),
            if_none_match_history: Vec::new(),
            registrations: Vec::new(),
            registered_uuids: Vec::new(),
            walkup_events: VecDeque::new(),
            walkup_event_gets: 0,
            shortcut: "SaveDocument1".into(),
            adf_state: "Empty".into(),
            job_scripts: VecDeque::new(),
            jobs: HashMap::new(),
            next_job_id: 1,
            posted_settings: Vec::new(),
            pages: HashMap::new(),
        }
    }
}

impl MockDevice {
    async fn start() -> (Self, String) {
        let mock = Self::default();
        let app = Router::new()
            .route("/DevMgmt/DiscoveryTree.xml", get(discovery_tree))
            .route("/EventMgmt/EventTable", get(event_table))
            .route("/Scan/Status", get(scan_status))
            .route(
                "/WalkupScanToComp/WalkupScanToCompDestinations",
                post(register_destination),
            )
            .route(
                "/WalkupScanToComp/WalkupScanToCompDestinations/{uuid}",
                get(walkup_destination),
            )
            .route("/WalkupScanToComp/WalkupScanToCompEvent", get(walkup_event))
            .route("/Scan/Jobs", post(post_scan_job))
            .route("/Scan/Jobs/{id}", get(get_job))
            .route("/Scan/Jobs/{id}/Pages/{page}", get(get_page))
            .with_state(mock.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (mock, base)
    }

    fn push_table(&self, body: String) {
        self.0.lock().unwrap().queued_tables.push_back(body);
    }

    fn push_walkup_event(&self, kind: &str) {
        self.0
            .lock()
            .unwrap()
            .walkup_events
            .push_back(kind.to_owned());
    }

    fn push_job_script(&self, polls: Vec<String>) {
        self.0
            .lock()
            .unwrap()
            .job_scripts
            .push_back(polls.into());
    }

    fn set_page(&self, job: u32, page: u32, bytes: Vec<u8>) {
        self.0.lock().unwrap().pages.insert((job, page), bytes);
    }

    fn set_adf_state(&self, state: &str) {
        self.0.lock().unwrap().adf_state = state.to_owned();
    }

    fn set_shortcut(&self, shortcut: &str) {
        self.0.lock().unwrap().shortcut = shortcut.to_owned();
    }

    fn registration_count(&self) -> usize {
        self.0.lock().unwrap().registrations.len()
    }

    fn registered_uuids(&self) -> Vec<Uuid> {
        self.0.lock().unwrap().registered_uuids.clone()
    }

    fn walkup_event_gets(&self) -> usize {
        self.0.lock().unwrap().walkup_event_gets
    }

    fn posted_settings(&self) -> Vec<String> {
        self.0.lock().unwrap().posted_settings.clone()
    }

    fn if_none_match_history(&self) -> Vec<Option<String>> {
        self.0.lock().unwrap().if_none_match_history.clone()
    }
}

async fn discovery_tree() -> Response {
    let xml = r#"<ledm:DiscoveryTree
            xmlns:ledm="http://www.hp.com/schemas/imaging/con/ledm/2007/09/21"
            xmlns:dd="http://www.hp.com/schemas/imaging/con/dictionaries/1.0/">
  <dd:Version><dd:Revision>MOCK.0001</dd:Revision><dd:Date>2026-01-01</dd:Date></dd:Version>
</ledm:DiscoveryTree>"#;
    xml.to_owned().into_response()
}

async fn event_table(State(mock): State<MockDevice>, headers: HeaderMap) -> Response {
    let presented = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let (status, etag, body) = {
        let mut state = mock.0.lock().unwrap();
        state.if_none_match_history.push(presented.clone());
        match presented {
            Some(tag) if tag == state.current_etag.to_string() => {
                if let Some(next) = state.queued_tables.pop_front() {
                    state.current_etag += 1;
                    state.current_body = next;
                    (
                        StatusCode::OK,
                        state.current_etag,
                        state.current_body.clone(),
                    )
                } else {
                    (StatusCode::NOT_MODIFIED, state.current_etag, String::new())
                }
            }
            // no tag, or a stale one: serve the current table
            _ => (
                StatusCode::OK,
                state.current_etag,
                state.current_body.clone(),
            ),
        }
    };

    if status == StatusCode::NOT_MODIFIED {
        // simulate a short device-side hold so idle pollers do not spin hot
        tokio::time::sleep(Duration::from_millis(15)).await;
    }
    (status, [(header::ETAG, etag.to_string())], body).into_response()
}

async fn scan_status(State(mock): State<MockDevice>) -> Response {
    let adf = mock.0.lock().unwrap().adf_state.clone();
    format!(
        r#"<ScanStatus xmlns="http://www.hp.com/schemas/imaging/con/cnx/scan/2008/08/19">
  <ScannerState>Idle</ScannerState>
  <AdfState>{adf}</AdfState>
</ScanStatus>"#
    )
    .into_response()
}

async fn register_destination(State(mock): State<MockDevice>, body: String) -> Response {
    let uuid = Uuid::new_v4();
    let mut state = mock.0.lock().unwrap();
    state.registrations.push(body);
    state.registered_uuids.push(uuid);
    (
        StatusCode::CREATED,
        [(
            header::LOCATION,
            format!("/WalkupScanToComp/WalkupScanToCompDestinations/{uuid}"),
        )],
        String::new(),
    )
        .into_response()
}

async fn walkup_destination(
    State(mock): State<MockDevice>,
    Path(uuid): Path<String>,
) -> Response {
    let shortcut = mock.0.lock().unwrap().shortcut.clone();
    format!(
        r#"<wus:WalkupScanToCompDestination
        xmlns:wus="http://www.hp.com/schemas/imaging/con/ledm/walkupscan/2010/09/28"
        xmlns:dd="http://www.hp.com/schemas/imaging/con/dictionaries/1.0/"
        xmlns:scantype="http://www.hp.com/schemas/imaging/con/ledm/scantype/2008/03/17">
  <dd:ResourceURI>/WalkupScanToComp/WalkupScanToCompDestinations/{uuid}</dd:ResourceURI>
  <dd:Name>mock</dd:Name>
  <wus:WalkupScanToCompSettings>
    <scantype:ScanSettings>
      <dd:ScanPlexMode>Simplex</dd:ScanPlexMode>
    </scantype:ScanSettings>
    <wus:Shortcut>{shortcut}</wus:Shortcut>
  </wus:WalkupScanToCompSettings>
</wus:WalkupScanToCompDestination>"#
    )
    .into_response()
}

async fn walkup_event(State(mock): State<MockDevice>) -> Response {
    let mut state = mock.0.lock().unwrap();
    state.walkup_event_gets += 1;
    match state.walkup_events.pop_front() {
        Some(kind) => format!(
            r#"<wus:WalkupScanToCompEvent
        xmlns:wus="http://www.hp.com/schemas/imaging/con/ledm/walkupscan/2010/09/28">
  <wus:WalkupScanToCompEventType>{kind}</wus:WalkupScanToCompEventType>
</wus:WalkupScanToCompEvent>"#
        )
        .into_response(),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "no scripted walk-up event",
        )
            .into_response(),
    }
}

async fn post_scan_job(State(mock): State<MockDevice>, body: String) -> Response {
    let mut state = mock.0.lock().unwrap();
    state.posted_settings.push(body);
    match state.job_scripts.pop_front() {
        Some(script) => {
            let id = state.next_job_id;
            state.next_job_id += 1;
            state.jobs.insert(id, script);
            (
                StatusCode::CREATED,
                [(header::LOCATION, format!("/Scan/Jobs/{id}"))],
                String::new(),
            )
                .into_response()
        }
        None => (StatusCode::INTERNAL_SERVER_ERROR, "no scripted job").into_response(),
    }
}

async fn get_job(State(mock): State<MockDevice>, Path(id): Path<u32>) -> Response {
    let mut state = mock.0.lock().unwrap();
    match state.jobs.get_mut(&id) {
        Some(polls) => {
            // serve the script in order, repeating the terminal body
            let body = if polls.len() > 1 {
                polls.pop_front().unwrap()
            } else {
                polls.front().cloned().unwrap_or_default()
            };
            body.into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_page(
    State(mock): State<MockDevice>,
    Path((id, page)): Path<(u32, u32)>,
) -> Response {
    match mock.0.lock().unwrap().pages.get(&(id, page)) {
        Some(bytes) => bytes.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ---------------------------------------------------------------------------
// Scripted XML bodies
// ---------------------------------------------------------------------------

fn empty_table_xml() -> String {
    r#"<ev:EventTable xmlns:ev="http://www.hp.com/schemas/imaging/con/ledm/events/2007/09/16"/>"#
        .to_owned()
}

fn scan_event_table_xml(stamp: &str, uuid: Uuid) -> String {
    format!(
        r#"<ev:EventTable
        xmlns:ev="http://www.hp.com/schemas/imaging/con/ledm/events/2007/09/16"
        xmlns:dd="http://www.hp.com/schemas/imaging/con/dictionaries/1.0/">
  <ev:Event>
    <dd:UnqualifiedEventCategory>ScanEvent</dd:UnqualifiedEventCategory>
    <dd:AgingStamp>{stamp}</dd:AgingStamp>
    <ev:Payload>
      <dd:ResourceURI>/WalkupScanToComp/WalkupScanToCompDestinations/{uuid}</dd:ResourceURI>
      <dd:ResourceType>wus:WalkupScanToCompDestination</dd:ResourceType>
    </ev:Payload>
  </ev:Event>
</ev:EventTable>"#
    )
}

fn power_down_table_xml(stamp: &str) -> String {
    format!(
        r#"<ev:EventTable
        xmlns:ev="http://www.hp.com/schemas/imaging/con/ledm/events/2007/09/16"
        xmlns:dd="http://www.hp.com/schemas/imaging/con/dictionaries/1.0/">
  <ev:Event>
    <dd:UnqualifiedEventCategory>PoweringDownEvent</dd:UnqualifiedEventCategory>
    <dd:AgingStamp>{stamp}</dd:AgingStamp>
  </ev:Event>
</ev:EventTable>"#
    )
}

fn job_ready_xml(job: u32, page: u32, height: u32) -> String {
    format!(
        r#"<j:Job xmlns:j="http://www.hp.com/schemas/imaging/con/ledm/jobs/2009/04/30">
  <j:JobCategory>Scan</j:JobCategory>
  <j:JobState>Processing</j:JobState>
  <ScanJob xmlns="http://www.hp.com/schemas/imaging/con/cnx/scan/2008/08/19">
    <PreScanPage>
      <PageNumber>{page}</PageNumber>
      <PageState>ReadyToUpload</PageState>
      <BufferInfo>
        <ImageWidth>2481</ImageWidth>
        <ImageHeight>{height}</ImageHeight>
        <BytesPerLine>2496</BytesPerLine>
      </BufferInfo>
      <BinaryURL>/Scan/Jobs/{job}/Pages/{page}</BinaryURL>
      <ImageOrientation>Normal</ImageOrientation>
    </PreScanPage>
  </ScanJob>
</j:Job>"#
    )
}

fn job_completed_xml() -> String {
    r#"<j:Job xmlns:j="http://www.hp.com/schemas/imaging/con/ledm/jobs/2009/04/30">
  <j:JobCategory>Scan</j:JobCategory>
  <j:JobState>Completed</j:JobState>
</j:Job>"#
        .to_owned()
}

fn job_device_canceled_xml(page: u32) -> String {
    format!(
        r#"<j:Job xmlns:j="http://www.hp.com/schemas/imaging/con/ledm/jobs/2009/04/30">
  <j:JobState>Processing</j:JobState>
  <ScanJob xmlns="http://www.hp.com/schemas/imaging/con/cnx/scan/2008/08/19">
    <PostScanPage>
      <PageNumber>{page}</PageNumber>
      <PageState>CanceledByDevice</PageState>
      <TotalLines>0</TotalLines>
    </PostScanPage>
  </ScanJob>
</j:Job>"#
    )
}

// ---------------------------------------------------------------------------
// Recording batch sink
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct RecordingFactory(Arc<Mutex<FactoryLog>>);

#[derive(Default)]
struct FactoryLog {
    doc_types: Vec<String>,
    chained: Vec<bool>,
    batches: Vec<Arc<Mutex<BatchLog>>>,
}

#[derive(Default)]
struct BatchLog {
    pages: Vec<Arc<Mutex<Vec<u8>>>>,
    closed: bool,
    discarded: bool,
}

impl RecordingFactory {
    fn batch(&self, index: usize) -> Arc<Mutex<BatchLog>> {
        self.0.lock().unwrap().batches[index].clone()
    }

    fn batch_count(&self) -> usize {
        self.0.lock().unwrap().batches.len()
    }

    fn doc_types(&self) -> Vec<String> {
        self.0.lock().unwrap().doc_types.clone()
    }
}

#[async_trait]
impl BatchFactory for RecordingFactory {
    async fn new_batch(
        &self,
        doc_type: &str,
        _destination: &DestinationSettings,
        _format: &str,
        previous: Option<Box<dyn DocumentBatch>>,
    ) -> Result<Box<dyn DocumentBatch>> {
        let log = Arc::new(Mutex::new(BatchLog::default()));
        let mut factory = self.0.lock().unwrap();
        factory.doc_types.push(doc_type.to_owned());
        factory.chained.push(previous.is_some());
        factory.batches.push(log.clone());
        Ok(Box::new(RecordingBatch(log)))
    }
}

struct RecordingBatch(Arc<Mutex<BatchLog>>);

#[async_trait]
impl DocumentBatch for RecordingBatch {
    async fn new_image_writer(&mut self) -> Result<ImageWriter> {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        self.0.lock().unwrap().pages.push(buffer.clone());
        Ok(Box::new(SharedSink(buffer)))
    }

    async fn close_document_batch(&mut self) -> Result<()> {
        self.0.lock().unwrap().closed = true;
        Ok(())
    }

    async fn discard_document_batch(&mut self) -> Result<()> {
        self.0.lock().unwrap().discarded = true;
        Ok(())
    }
}

struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl AsyncWrite for SharedSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

fn test_config() -> ControllerConfig {
    ControllerConfig {
        registration_interval: Duration::from_secs(60),
        event_poll_timeout: Duration::from_secs(1),
        job_poll_interval: Duration::from_millis(25),
    }
}

fn destination(name: &str, resolution: u32) -> DestinationSettings {
    DestinationSettings {
        name: name.into(),
        file_pattern: None,
        ocr: false,
        verso: false,
        resolution,
        color_space: ColorSpace::Gray,
    }
}

fn controller(
    base: &str,
    factory: &RecordingFactory,
    destinations: Vec<DestinationSettings>,
    config: ControllerConfig,
) -> ScanController {
    let client = DeviceClient::new(base).unwrap();
    ScanController::new(
        client,
        Arc::new(factory.clone()),
        "testhost".into(),
        destinations,
        config,
    )
}

/// Poll `check` until it returns true or the deadline passes.
async fn wait_until(check: impl Fn() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 4s");
}

/// A JPEG-framed page with the SOF0 line field set to the given bytes; the
/// SOF0 marker sits at offset 20, so the line field occupies bytes 25-26.
fn page_jpeg(line_field: [u8; 2]) -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
    data.resize(20, 0x11);
    data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08]);
    data.extend_from_slice(&line_field);
    data.extend_from_slice(&[0x09, 0xB1]);
    while data.len() < 2000 {
        data.push((data.len() % 251) as u8);
    }
    data
}

async fn run_to_power_down(controller: ScanController) -> ScanwerkError {
    tokio::time::timeout(Duration::from_secs(10), controller.run())
        .await
        .expect("controller did not finish in time")
        .expect_err("controller runs end in an error")
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_page_flatbed_scan_delivers_patched_page() {
    let (mock, base) = MockDevice::start().await;
    mock.set_adf_state("Empty");
    mock.set_shortcut("SavePDF1Page");
    mock.push_walkup_event("HostSelected");
    mock.push_walkup_event("ScanRequested");
    mock.push_walkup_event("ScanPagesComplete");
    mock.push_job_script(vec![job_ready_xml(1, 1, 3300), job_completed_xml()]);
    mock.set_page(1, 1, page_jpeg([0xFF, 0xFF]));

    let factory = RecordingFactory::default();
    let run = tokio::spawn(run_to_power_down(controller(
        &base,
        &factory,
        vec![destination("Documents", 300)],
        test_config(),
    )));

    wait_until(|| mock.registration_count() == 1).await;
    let uuid = mock.registered_uuids()[0];
    mock.push_table(scan_event_table_xml("1-1", uuid));
    mock.push_table(scan_event_table_xml("1-2", uuid));
    mock.push_table(scan_event_table_xml("1-3", uuid));
    mock.push_table(power_down_table_xml("1-4"));

    let err = run.await.unwrap();
    assert!(matches!(err, ScanwerkError::PowerDown), "got {err}");

    // the registration body carried the combined label
    let registration = mock.0.lock().unwrap().registrations[0].clone();
    assert!(registration.contains("testhost(Documents)"));

    // one scan job, flatbed, at the destination's resolution
    let settings = mock.posted_settings();
    assert_eq!(settings.len(), 1);
    assert!(settings[0].contains("<InputSource>Platen</InputSource>"));
    assert!(settings[0].contains("<XResolution>300</XResolution>"));
    assert!(settings[0].contains("<ColorSpace>Gray</ColorSpace>"));

    // one batch, shortcut prefix stripped, closed after ScanPagesComplete
    assert_eq!(factory.doc_types(), vec!["PDF1Page".to_owned()]);
    let batch = factory.batch(0);
    let log = batch.lock().unwrap();
    assert!(log.closed);
    assert!(!log.discarded);
    assert_eq!(log.pages.len(), 1);

    // the page matches the input except the patched line field (3300 = 0x0CE4)
    let delivered = log.pages[0].lock().unwrap().clone();
    let original = page_jpeg([0xFF, 0xFF]);
    assert_eq!(delivered.len(), original.len());
    assert_eq!(delivered[25], 0x0C);
    assert_eq!(delivered[26], 0xE4);
    for (i, (a, b)) in original.iter().zip(delivered.iter()).enumerate() {
        if i != 25 && i != 26 {
            assert_eq!(a, b, "byte {i} changed");
        }
    }
}

#[tokio::test]
async fn adf_scan_delivers_every_page_of_the_stack() {
    let (mock, base) = MockDevice::start().await;
    mock.set_adf_state("Loaded");
    mock.push_walkup_event("HostSelected");
    mock.push_walkup_event("ScanRequested");
    mock.push_walkup_event("ScanPagesComplete");
    mock.push_job_script(vec![
        job_ready_xml(1, 1, 3300),
        job_ready_xml(1, 2, 3300),
        job_ready_xml(1, 3, 3300),
        job_completed_xml(),
    ]);
    for page in 1..=3 {
        mock.set_page(1, page, page_jpeg([0xFF, 0xFF]));
    }

    let factory = RecordingFactory::default();
    let run = tokio::spawn(run_to_power_down(controller(
        &base,
        &factory,
        vec![destination("Documents", 300)],
        test_config(),
    )));

    wait_until(|| mock.registration_count() == 1).await;
    let uuid = mock.registered_uuids()[0];
    mock.push_table(scan_event_table_xml("2-1", uuid));
    mock.push_table(scan_event_table_xml("2-2", uuid));
    mock.push_table(scan_event_table_xml("2-3", uuid));
    mock.push_table(power_down_table_xml("2-4"));

    let err = run.await.unwrap();
    assert!(matches!(err, ScanwerkError::PowerDown), "got {err}");

    let settings = mock.posted_settings();
    assert_eq!(settings.len(), 1, "the feeder stack is one job");
    assert!(settings[0].contains("<InputSource>Adf</InputSource>"));

    let batch = factory.batch(0);
    let log = batch.lock().unwrap();
    assert_eq!(log.pages.len(), 3);
    assert!(log.closed);
    for page in &log.pages {
        let bytes = page.lock().unwrap();
        assert_eq!(bytes[25], 0x0C);
        assert_eq!(bytes[26], 0xE4);
    }
}

#[tokio::test]
async fn replayed_aging_stamp_triggers_no_second_scan() {
    let (mock, base) = MockDevice::start().await;
    mock.push_walkup_event("HostSelected");

    let factory = RecordingFactory::default();
    let run = tokio::spawn(run_to_power_down(controller(
        &base,
        &factory,
        vec![destination("Documents", 300)],
        test_config(),
    )));

    wait_until(|| mock.registration_count() == 1).await;
    let uuid = mock.registered_uuids()[0];
    mock.push_table(scan_event_table_xml("5-9", uuid));
    mock.push_table(scan_event_table_xml("5-9", uuid));
    mock.push_table(power_down_table_xml("5-10"));

    let err = run.await.unwrap();
    assert!(matches!(err, ScanwerkError::PowerDown), "got {err}");

    // the replay was dropped before any device fetch
    assert_eq!(mock.walkup_event_gets(), 1);
    assert!(mock.posted_settings().is_empty());
    assert_eq!(factory.batch_count(), 0);
}

#[tokio::test]
async fn timer_re_registers_and_old_uuids_stay_resolvable() {
    let (mock, base) = MockDevice::start().await;
    mock.push_walkup_event("HostSelected");

    let factory = RecordingFactory::default();
    let mut config = test_config();
    config.registration_interval = Duration::from_millis(300);
    let run = tokio::spawn(run_to_power_down(controller(
        &base,
        &factory,
        vec![destination("Documents", 300)],
        config,
    )));

    // idle long enough for at least one re-registration cycle
    wait_until(|| mock.registration_count() >= 2).await;
    let uuids = mock.registered_uuids();
    assert!(uuids.len() >= 2);
    assert_ne!(uuids[0], uuids[1], "the device minted fresh UUIDs");

    // an event for the first-cycle UUID still resolves after re-registration
    mock.push_table(scan_event_table_xml("1-1", uuids[0]));
    wait_until(|| mock.walkup_event_gets() == 1).await;

    mock.push_table(power_down_table_xml("1-2"));
    let err = run.await.unwrap();
    assert!(matches!(err, ScanwerkError::PowerDown), "got {err}");
}

#[tokio::test]
async fn device_side_cancel_discards_batch_and_controller_survives() {
    let (mock, base) = MockDevice::start().await;
    mock.set_adf_state("Loaded");
    mock.push_walkup_event("HostSelected");
    mock.push_walkup_event("ScanRequested");
    mock.push_job_script(vec![job_device_canceled_xml(1)]);

    let factory = RecordingFactory::default();
    let run = tokio::spawn(run_to_power_down(controller(
        &base,
        &factory,
        vec![destination("Documents", 300)],
        test_config(),
    )));

    wait_until(|| mock.registration_count() == 1).await;
    let uuid = mock.registered_uuids()[0];
    mock.push_table(scan_event_table_xml("3-1", uuid));
    mock.push_table(scan_event_table_xml("3-2", uuid));
    mock.push_table(power_down_table_xml("3-3"));

    // the run ends with the scripted power-down, not the cancellation
    let err = run.await.unwrap();
    assert!(matches!(err, ScanwerkError::PowerDown), "got {err}");

    let batch = factory.batch(0);
    let log = batch.lock().unwrap();
    assert!(log.discarded);
    assert!(!log.closed);
    assert!(log.pages.is_empty(), "no page writer was opened");
}

#[tokio::test]
async fn powering_down_event_ends_the_controller() {
    let (mock, base) = MockDevice::start().await;

    let factory = RecordingFactory::default();
    let run = tokio::spawn(run_to_power_down(controller(
        &base,
        &factory,
        vec![destination("Documents", 300)],
        test_config(),
    )));

    wait_until(|| mock.registration_count() == 1).await;
    mock.push_table(power_down_table_xml("9-1"));

    let err = run.await.unwrap();
    assert!(matches!(err, ScanwerkError::PowerDown), "got {err}");
    assert_eq!(mock.walkup_event_gets(), 0);
}

// ---------------------------------------------------------------------------
// Poller contract
// ---------------------------------------------------------------------------

#[tokio::test]
async fn poller_carries_the_etag_into_the_next_request() {
    let (mock, base) = MockDevice::start().await;
    let client = DeviceClient::new(&base).unwrap();
    let mut poller = EventPoller::spawn(client, Duration::from_secs(1));

    // the empty prime table stays off the channel; the first delivery is the
    // first table that actually carries events
    let uuid = Uuid::new_v4();
    mock.push_table(scan_event_table_xml("1-1", uuid));
    match poller.next().await {
        PollerEvent::Table(table) => {
            assert_eq!(table.events.len(), 1);
            assert_eq!(table.events[0].aging_stamp, "1-1");
        }
        other => panic!("expected first table, got {other:?}"),
    }

    mock.push_table(scan_event_table_xml("1-2", uuid));
    match poller.next().await {
        PollerEvent::Table(table) => {
            assert_eq!(table.events[0].aging_stamp, "1-2");
        }
        other => panic!("expected second table, got {other:?}"),
    }

    assert!(poller.shutdown().await);

    let history = mock.if_none_match_history();
    assert_eq!(history[0], None, "the prime fetch presents no tag");
    // each 200 response's tag was presented on a later request
    assert!(history.contains(&Some("1".to_owned())));
    assert!(history.contains(&Some("2".to_owned())));
    // tags are presented in order, never regressing
    let presented: Vec<u64> = history
        .iter()
        .flatten()
        .map(|tag| tag.parse().unwrap())
        .collect();
    assert!(presented.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn poller_stop_ack_handshake_is_idempotent_across_restarts() {
    let (_mock, base) = MockDevice::start().await;
    let client = DeviceClient::new(&base).unwrap();

    let poller = EventPoller::spawn(client.clone(), Duration::from_secs(1));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(poller.shutdown().await, "first poller acknowledges the stop");

    let poller = EventPoller::spawn(client, Duration::from_secs(1));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(poller.shutdown().await, "second poller acknowledges the stop");
}
