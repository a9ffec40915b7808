#![allow(dead_code)]

use assert_json_diff::assert_json_eq;
use async_trait::async_trait;
use cmp_consent::channel::{BridgeReceiver, RenderingSurface};
use cmp_consent::client::{Connectivity, RemoteConsentClient};
use cmp_consent::config::SessionConfig;
use cmp_consent::consent::CustomConsent;
use cmp_consent::error::ConsentLibError;
use cmp_consent::session::{ConsentCallbacks, ConsentSession, UiExecutor};
use cmp_consent::vendor_consent::VendorConsent;
use parking_lot::Mutex;
use serde::Deserialize;
use std::fs::File;
use std::io;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use url::Url;

#[derive(Deserialize)]
pub struct Fixture {
    consent_string: String,
    expected: serde_json::Value,
}

impl Fixture {
    pub fn load_from_file<P: AsRef<Path>>(p: P) -> io::Result<Self> {
        let f = File::open(p)?;
        let fixture: Self = serde_json::from_reader(&f)
            .map_err(|e| io::Error::new(ErrorKind::InvalidData, e.to_string()))?;
        Ok(fixture)
    }

    pub fn assert_json_matches(&self) {
        let consent = match VendorConsent::decode(&self.consent_string) {
            Ok(consent) => consent,
            Err(e) => panic!("consent string decode error: {e}"),
        };

        assert_json_eq!(serde_json::to_value(&consent).unwrap(), self.expected);
    }
}

const BASE64_URL: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Builds TCF v1.1 vendor consent strings bit by bit.
#[derive(Clone, Debug)]
pub struct ConsentStringBuilder {
    pub cmp_id: u16,
    pub vendor_list_version: u16,
    pub purposes: [bool; 24],
    pub max_vendor_id: u16,
    pub vendors: Vendors,
}

#[derive(Clone, Debug)]
pub enum Vendors {
    BitField(Vec<bool>),
    /// Ranges are sorted and disjoint, listed vendors get `!default_consent`.
    Range {
        default_consent: bool,
        ranges: Vec<(u16, u16)>,
    },
}

impl ConsentStringBuilder {
    pub fn bitfield(purposes: [bool; 24], vendors: Vec<bool>) -> Self {
        Self {
            cmp_id: 7,
            vendor_list_version: 8,
            purposes,
            max_vendor_id: vendors.len() as u16,
            vendors: Vendors::BitField(vendors),
        }
    }

    pub fn range(
        purposes: [bool; 24],
        max_vendor_id: u16,
        default_consent: bool,
        ranges: Vec<(u16, u16)>,
    ) -> Self {
        Self {
            cmp_id: 7,
            vendor_list_version: 8,
            purposes,
            max_vendor_id,
            vendors: Vendors::Range {
                default_consent,
                ranges,
            },
        }
    }

    pub fn build(&self) -> String {
        let mut bits = Bits::default();
        bits.push(1, 6);
        bits.push(15_100_821_554, 36);
        bits.push(15_100_821_554, 36);
        bits.push(self.cmp_id as u64, 12);
        bits.push(1, 12);
        bits.push(3, 6);
        bits.push((b'E' - b'A') as u64, 6);
        bits.push((b'N' - b'A') as u64, 6);
        bits.push(self.vendor_list_version as u64, 12);
        for &p in &self.purposes {
            bits.push_bool(p);
        }
        bits.push(self.max_vendor_id as u64, 16);

        match &self.vendors {
            Vendors::BitField(vendors) => {
                bits.push_bool(false);
                for &v in vendors {
                    bits.push_bool(v);
                }
            }
            Vendors::Range {
                default_consent,
                ranges,
            } => {
                bits.push_bool(true);
                bits.push_bool(*default_consent);
                bits.push(ranges.len() as u64, 12);
                for &(start, end) in ranges {
                    if start == end {
                        bits.push_bool(false);
                        bits.push(start as u64, 16);
                    } else {
                        bits.push_bool(true);
                        bits.push(start as u64, 16);
                        bits.push(end as u64, 16);
                    }
                }
            }
        }

        bits.to_base64_url()
    }

    /// Expected consent of every vendor from 1 to the max vendor id.
    pub fn expected_vendors(&self) -> Vec<bool> {
        match &self.vendors {
            Vendors::BitField(vendors) => vendors.clone(),
            Vendors::Range {
                default_consent,
                ranges,
            } => (1..=self.max_vendor_id)
                .map(|id| {
                    if ranges.iter().any(|&(s, e)| s <= id && id <= e) {
                        !default_consent
                    } else {
                        *default_consent
                    }
                })
                .collect(),
        }
    }
}

#[derive(Default)]
struct Bits(Vec<bool>);

impl Bits {
    fn push(&mut self, value: u64, width: u32) {
        for i in (0..width).rev() {
            self.0.push((value >> i) & 1 == 1);
        }
    }

    fn push_bool(&mut self, b: bool) {
        self.0.push(b);
    }

    fn to_base64_url(&self) -> String {
        self.0
            .chunks(6)
            .map(|chunk| {
                let index = (0..6).fold(0usize, |acc, i| {
                    (acc << 1) | usize::from(chunk.get(i).copied().unwrap_or(false))
                });
                BASE64_URL[index] as char
            })
            .collect()
    }
}

/// Purpose flags from a string of 24 `'0'`/`'1'` characters.
pub fn purposes(s: &str) -> [bool; 24] {
    let mut purposes = [false; 24];
    for (p, c) in purposes.iter_mut().zip(s.chars()) {
        *p = c == '1';
    }
    purposes
}

pub type Script = Arc<dyn Fn(&BridgeReceiver) + Send + Sync>;

/// Plays the part of the message script as soon as a URL is loaded.
pub fn script<F>(f: F) -> Script
where
    F: Fn(&BridgeReceiver) + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn silent() -> Script {
    script(|_| {})
}

pub struct FakeSurface {
    ops: Mutex<Vec<String>>,
    bridge: Mutex<Option<BridgeReceiver>>,
    script: Script,
}

impl FakeSurface {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            ops: Mutex::default(),
            bridge: Mutex::default(),
            script,
        })
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.ops.lock().iter().filter(|o| o.as_str() == op).count()
    }

    pub fn bridge(&self) -> Option<BridgeReceiver> {
        self.bridge.lock().clone()
    }

    fn record(&self, op: impl Into<String>) {
        self.ops.lock().push(op.into());
    }
}

impl RenderingSurface for FakeSurface {
    fn install_bridge(&self, bridge: BridgeReceiver) {
        self.record("install_bridge");
        *self.bridge.lock() = Some(bridge);
    }

    fn load_blank(&self) {
        self.record("load_blank");
    }

    fn load_url(&self, url: &Url) {
        self.record(format!("load_url {}", url.path()));
        if let Some(bridge) = self.bridge() {
            (self.script)(&bridge);
        }
    }

    fn display(&self) {
        self.record("display");
    }

    fn attach(&self) {
        self.record("attach");
    }

    fn detach(&self) {
        self.record("detach");
    }

    fn destroy(&self) {
        self.record("destroy");
    }
}

/// Hands out fake surfaces sharing the same script, and keeps them around.
pub struct FakeSurfaces {
    script: Script,
    created: Mutex<Vec<Arc<FakeSurface>>>,
}

impl FakeSurfaces {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            created: Mutex::default(),
        })
    }

    pub fn created(&self) -> Vec<Arc<FakeSurface>> {
        self.created.lock().clone()
    }
}

impl cmp_consent::session::SurfaceFactory for FakeSurfaces {
    fn create(&self) -> Arc<dyn RenderingSurface> {
        let surface = FakeSurface::new(Arc::clone(&self.script));
        self.created.lock().push(Arc::clone(&surface));
        surface
    }
}

pub struct Network(AtomicBool);

impl Network {
    pub fn online() -> Arc<Self> {
        Arc::new(Self(AtomicBool::new(true)))
    }

    pub fn offline() -> Arc<Self> {
        Arc::new(Self(AtomicBool::new(false)))
    }

    pub fn set(&self, online: bool) {
        self.0.store(online, Ordering::SeqCst);
    }
}

impl Connectivity for Network {
    fn is_connected(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomConsentsRequest {
    pub consent_uuid: Option<String>,
    pub eu_consent: Option<String>,
    pub site_id: String,
    pub vendor_ids: Vec<String>,
}

#[derive(Default)]
pub struct FakeClient {
    pub gdpr_applies: Option<bool>,
    pub custom_consents: Mutex<Vec<CustomConsent>>,
    pub gdpr_requests: AtomicUsize,
    pub site_id_requests: AtomicUsize,
    pub custom_consents_requests: Mutex<Vec<CustomConsentsRequest>>,
}

impl FakeClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gdpr_applies: Some(true),
            ..Self::default()
        })
    }

    pub fn failing_gdpr() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond_with(&self, consents: Vec<CustomConsent>) {
        *self.custom_consents.lock() = consents;
    }
}

#[async_trait]
impl RemoteConsentClient for FakeClient {
    async fn gdpr_status(&self) -> Result<bool, ConsentLibError> {
        self.gdpr_requests.fetch_add(1, Ordering::SeqCst);
        self.gdpr_applies
            .ok_or_else(|| ConsentLibError::api("gdpr status unavailable"))
    }

    async fn site_id(&self, account_id: u32, site_name: &str) -> Result<String, ConsentLibError> {
        self.site_id_requests.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{account_id}-{site_name}"))
    }

    async fn custom_consents(
        &self,
        consent_uuid: Option<&str>,
        eu_consent: Option<&str>,
        site_id: &str,
        vendor_ids: &[String],
    ) -> Result<Vec<CustomConsent>, ConsentLibError> {
        self.custom_consents_requests
            .lock()
            .push(CustomConsentsRequest {
                consent_uuid: consent_uuid.map(str::to_string),
                eu_consent: eu_consent.map(str::to_string),
                site_id: site_id.to_string(),
                vendor_ids: vendor_ids.to_vec(),
            });
        Ok(self.custom_consents.lock().clone())
    }
}

/// Records every host callback along with what the session exposed at the time.
#[derive(Default)]
pub struct RecordingCallbacks {
    events: Mutex<Vec<String>>,
}

impl RecordingCallbacks {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    fn record(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl ConsentCallbacks for RecordingCallbacks {
    fn on_message_ready(&self, session: &ConsentSession) {
        self.record(format!("ready {}", session.will_show_message()));
    }

    fn on_message_choice_select(&self, session: &ConsentSession) {
        self.record(format!("choice {:?}", session.choice_type()));
    }

    fn on_error_occurred(&self, session: &ConsentSession) {
        let error = session.error().map(ToString::to_string).unwrap_or_default();
        self.record(format!("error {error}"));
    }

    fn on_interaction_complete(&self, session: &ConsentSession) {
        self.record(format!("complete {}", session.state()));
    }
}

/// Runs UI tasks inline and counts them.
#[derive(Default)]
pub struct CountingUi(AtomicUsize);

impl CountingUi {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl UiExecutor for CountingUi {
    fn run_on_ui(&self, task: Box<dyn FnOnce() + Send>) {
        self.0.fetch_add(1, Ordering::SeqCst);
        task()
    }
}

pub fn demo_config() -> SessionConfig {
    SessionConfig::builder()
        .account_id(22)
        .site_name("mobile.demo")
        .build()
        .unwrap()
}
