// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// On-the-wire XML shapes of the LEDM control surface.
//
// The device emits elements with its canonical namespace prefixes (`dd:`,
// `ev:`, `wus:`, `j:`); flatbed-era firmware occasionally drops them, so every
// deserialized field accepts both forms. Request bodies reproduce the exact
// namespace layout the firmware expects — notably the registration `Hostname`
// element, which lives in the 2009/04/06 dictionary rather than 1.0.

use scanwerk_core::types::{ColorSpace, ScanSource};
use serde::{Deserialize, Serialize};

/// Fixed header prepended to every request body.
pub const XML_HEADER: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

const NS_WALKUP: &str = "http://www.hp.com/schemas/imaging/con/ledm/walkupscan/2010/09/28";
const NS_SCAN: &str = "http://www.hp.com/schemas/imaging/con/cnx/scan/2008/08/19";
const NS_DICT: &str = "http://www.hp.com/schemas/imaging/con/dictionaries/1.0/";
const NS_DICT_2009: &str = "http://www.hp.com/schemas/imaging/con/dictionaries/2009/04/06";

/// Serialize a request body with the fixed XML header.
pub fn marshal<T: Serialize>(value: &T) -> Result<String, quick_xml::SeError> {
    quick_xml::se::to_string(value).map(|body| format!("{XML_HEADER}{body}"))
}

// ---------------------------------------------------------------------------
// /DevMgmt/DiscoveryTree.xml
// ---------------------------------------------------------------------------

/// The device's resource catalogue. Scanwerk only reads the revision for
/// startup logging; reaching the document at all is the online probe.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryTree {
    #[serde(rename = "Version", alias = "dd:Version", default)]
    pub version: Option<Version>,
    #[serde(rename = "SupportedTree", alias = "ledm:SupportedTree", default)]
    pub supported_trees: Vec<SupportedTree>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Version {
    #[serde(rename = "Revision", alias = "dd:Revision", default)]
    pub revision: String,
    #[serde(rename = "Date", alias = "dd:Date", default)]
    pub date: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupportedTree {
    #[serde(rename = "ResourceURI", alias = "dd:ResourceURI", default)]
    pub resource_uri: String,
    #[serde(rename = "ResourceType", alias = "dd:ResourceType", default)]
    pub resource_type: String,
}

// ---------------------------------------------------------------------------
// /Scan/Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ScanStatus {
    #[serde(rename = "ScannerState", alias = "scan:ScannerState", default)]
    pub scanner_state: String,
    /// `Empty`, `Loaded` or `Jammed`. Defaults to `Empty` for devices
    /// without a feeder, which omit the element.
    #[serde(rename = "AdfState", alias = "scan:AdfState", default = "adf_state_default")]
    pub adf_state: String,
}

fn adf_state_default() -> String {
    "Empty".into()
}

// ---------------------------------------------------------------------------
// /EventMgmt/EventTable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventTable {
    #[serde(rename = "Event", alias = "ev:Event", default)]
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    #[serde(
        rename = "UnqualifiedEventCategory",
        alias = "dd:UnqualifiedEventCategory",
        default
    )]
    pub category: String,
    #[serde(rename = "AgingStamp", alias = "dd:AgingStamp", default)]
    pub aging_stamp: String,
    #[serde(rename = "Payload", alias = "ev:Payload", default)]
    pub payloads: Vec<Payload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Payload {
    #[serde(rename = "ResourceURI", alias = "dd:ResourceURI", default)]
    pub resource_uri: String,
    #[serde(rename = "ResourceType", alias = "dd:ResourceType", default)]
    pub resource_type: String,
}

// ---------------------------------------------------------------------------
// /WalkupScanToComp/*
// ---------------------------------------------------------------------------

/// A destination record as the device returns it, including the walk-up
/// settings the user picked on the front panel.
#[derive(Debug, Clone, Deserialize)]
pub struct WalkupDestination {
    #[serde(rename = "ResourceURI", alias = "dd:ResourceURI", default)]
    pub resource_uri: String,
    #[serde(rename = "Name", alias = "dd:Name", default)]
    pub name: String,
    #[serde(rename = "Hostname", alias = "dd:Hostname", alias = "dd3:Hostname", default)]
    pub hostname: String,
    #[serde(rename = "LinkType", alias = "wus:LinkType", default)]
    pub link_type: String,
    #[serde(
        rename = "WalkupScanToCompSettings",
        alias = "wus:WalkupScanToCompSettings",
        default
    )]
    pub settings: Option<WalkupSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalkupSettings {
    #[serde(rename = "ScanSettings", alias = "scantype:ScanSettings", default)]
    pub scan_settings: Option<ScanPlexSettings>,
    /// Device-side preset name, e.g. `SaveDocument1`; the leading `Save` is
    /// stripped before it reaches the batch sink.
    #[serde(rename = "Shortcut", alias = "wus:Shortcut", default)]
    pub shortcut: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanPlexSettings {
    #[serde(rename = "ScanPlexMode", alias = "dd:ScanPlexMode", default)]
    pub scan_plex_mode: String,
}

/// The latest walk-up event, fetched after a scan event names one of our
/// destinations.
#[derive(Debug, Clone, Deserialize)]
pub struct WalkupEvent {
    #[serde(
        rename = "WalkupScanToCompEventType",
        alias = "wus:WalkupScanToCompEventType",
        default
    )]
    pub event_type: String,
}

/// Typed view of [`WalkupEvent::event_type`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkupEventKind {
    HostSelected,
    ScanRequested,
    ScanNewPageRequested,
    ScanPagesComplete,
    Unknown(String),
}

impl WalkupEvent {
    pub fn kind(&self) -> WalkupEventKind {
        match self.event_type.as_str() {
            "HostSelected" => WalkupEventKind::HostSelected,
            "ScanRequested" => WalkupEventKind::ScanRequested,
            "ScanNewPageRequested" => WalkupEventKind::ScanNewPageRequested,
            "ScanPagesComplete" => WalkupEventKind::ScanPagesComplete,
            other => WalkupEventKind::Unknown(other.to_owned()),
        }
    }
}

/// POST body registering a destination on the device.
#[derive(Debug, Clone, Serialize)]
#[serde(rename = "WalkupScanToCompDestination")]
pub struct DestinationRegistration {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "@xmlns:dd")]
    xmlns_dd: &'static str,
    #[serde(rename = "@xmlns:dd3")]
    xmlns_dd3: &'static str,
    #[serde(rename = "dd:Name")]
    pub name: String,
    #[serde(rename = "dd3:Hostname")]
    pub hostname: String,
    #[serde(rename = "LinkType")]
    pub link_type: String,
}

impl DestinationRegistration {
    /// `label` is shown on the device front panel, conventionally
    /// `hostname(destination)`.
    pub fn new(label: &str) -> Self {
        Self {
            xmlns: NS_WALKUP,
            xmlns_dd: NS_DICT,
            xmlns_dd3: NS_DICT_2009,
            name: label.to_owned(),
            hostname: label.to_owned(),
            link_type: "Network".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// /Scan/Jobs
// ---------------------------------------------------------------------------

/// POST body creating a scan job.
///
/// The defaults are the A4-at-300-DPI approximation the device family was
/// calibrated against; callers override source, resolution and colour space
/// per destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "ScanSettings")]
pub struct ScanSettings {
    #[serde(rename = "@xmlns", default = "scan_ns")]
    xmlns: String,
    #[serde(rename = "XResolution")]
    pub x_resolution: u32,
    #[serde(rename = "YResolution")]
    pub y_resolution: u32,
    #[serde(rename = "XStart")]
    pub x_start: u32,
    #[serde(rename = "YStart")]
    pub y_start: u32,
    #[serde(rename = "Width")]
    pub width: u32,
    #[serde(rename = "Height")]
    pub height: u32,
    #[serde(rename = "Format")]
    pub format: String,
    #[serde(rename = "CompressionQFactor")]
    pub compression_q_factor: u32,
    #[serde(rename = "ColorSpace")]
    pub color_space: String,
    #[serde(rename = "BitDepth")]
    pub bit_depth: u32,
    #[serde(rename = "InputSource")]
    pub input_source: String,
    #[serde(rename = "GrayRendering")]
    pub gray_rendering: String,
    #[serde(rename = "ToneMap")]
    pub tone_map: ToneMap,
    #[serde(rename = "SharpeningLevel")]
    pub sharpening_level: u32,
    #[serde(rename = "NoiseRemoval")]
    pub noise_removal: u32,
    #[serde(rename = "ContentType")]
    pub content_type: String,
}

fn scan_ns() -> String {
    NS_SCAN.to_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToneMap {
    #[serde(rename = "Gamma")]
    pub gamma: u32,
    #[serde(rename = "Brightness")]
    pub brightness: u32,
    #[serde(rename = "Contrast")]
    pub contrast: u32,
    // device spelling
    #[serde(rename = "Highlite")]
    pub highlite: u32,
    #[serde(rename = "Shadow")]
    pub shadow: u32,
    #[serde(rename = "Threshold")]
    pub threshold: u32,
}

impl Default for ToneMap {
    fn default() -> Self {
        Self {
            gamma: 1000,
            brightness: 1000,
            contrast: 1000,
            highlite: 179,
            shadow: 25,
            threshold: 0,
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            xmlns: scan_ns(),
            x_resolution: 200,
            y_resolution: 200,
            x_start: 0,
            y_start: 0,
            width: 2481,
            height: 3507,
            format: "Jpeg".into(),
            compression_q_factor: 0,
            color_space: ColorSpace::Gray.as_wire_str().into(),
            bit_depth: 8,
            input_source: ScanSource::Platen.as_wire_str().into(),
            gray_rendering: "NTSC".into(),
            tone_map: ToneMap::default(),
            sharpening_level: 0,
            noise_removal: 0,
            content_type: "Document".into(),
        }
    }
}

impl ScanSettings {
    /// Defaults with the per-destination knobs applied.
    pub fn for_job(source: ScanSource, resolution: u32, color_space: ColorSpace) -> Self {
        Self {
            x_resolution: resolution,
            y_resolution: resolution,
            color_space: color_space.as_wire_str().into(),
            input_source: source.as_wire_str().into(),
            ..Self::default()
        }
    }
}

/// A job document as returned by polling the job URL.
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    #[serde(rename = "JobCategory", alias = "j:JobCategory", default)]
    pub job_category: String,
    #[serde(rename = "JobState", alias = "j:JobState", default)]
    pub job_state: String,
    #[serde(rename = "ScanJob", alias = "scan:ScanJob", default)]
    pub scan_job: Option<ScanJobStatus>,
}

/// Typed view of [`Job::job_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Processing,
    Canceled,
    Completed,
    Other,
}

impl Job {
    pub fn state(&self) -> JobState {
        match self.job_state.as_str() {
            "Processing" => JobState::Processing,
            "Canceled" => JobState::Canceled,
            "Completed" => JobState::Completed,
            _ => JobState::Other,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanJobStatus {
    #[serde(rename = "PreScanPage", alias = "scan:PreScanPage", default)]
    pub pre_scan_page: Option<PreScanPage>,
    #[serde(rename = "PostScanPage", alias = "scan:PostScanPage", default)]
    pub post_scan_page: Option<PostScanPage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreScanPage {
    #[serde(rename = "PageNumber", default)]
    pub page_number: u32,
    /// `PreparingScan` or `ReadyToUpload`.
    #[serde(rename = "PageState", default)]
    pub page_state: String,
    #[serde(rename = "BufferInfo", default)]
    pub buffer_info: Option<BufferInfo>,
    #[serde(rename = "BinaryURL", default)]
    pub binary_url: String,
    #[serde(rename = "ImageOrientation", default)]
    pub image_orientation: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostScanPage {
    #[serde(rename = "PageNumber", default)]
    pub page_number: u32,
    /// `UploadCompleted` or `CanceledByDevice`.
    #[serde(rename = "PageState", default)]
    pub page_state: String,
    #[serde(rename = "TotalLines", default)]
    pub total_lines: u32,
}

/// Dimensions of the page being acquired. `image_height` is the actual line
/// count used to patch the JPEG SOF0 header.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferInfo {
    #[serde(rename = "ImageWidth", default)]
    pub image_width: u32,
    #[serde(rename = "ImageHeight", default)]
    pub image_height: u32,
    #[serde(rename = "BytesPerLine", default)]
    pub bytes_per_line: u32,
}
