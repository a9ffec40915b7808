//! Typed access to the persisted consent artifacts.
//!
//! The host injects a [`KeyValueStore`]; [`ConsentStore`] owns the key names
//! and the read/modify/write rules on top of it. Writes are atomic per key,
//! there are no cross-key transactions.
use crate::consent::CustomConsent;
use crate::constants::{
    CONSENT_UUID_KEY, CUSTOM_CONSENTS_KEY, EU_CONSENT_KEY, IAB_CONSENT_CMP_PRESENT,
    IAB_CONSENT_CONSENT_STRING, IAB_CONSENT_PARSED_PURPOSE_CONSENTS,
    IAB_CONSENT_PARSED_VENDOR_CONSENTS, IAB_CONSENT_SUBJECT_TO_GDPR, site_id_key,
};
use crate::vendor_consent::VendorConsent;
use fnv::FnvHashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use strum_macros::Display;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};
use url::form_urlencoded;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unable to access store file")]
    Io(#[from] io::Error),
    #[error("unable to serialize store contents")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredValue {
    Bool(bool),
    String(String),
    StringSet(BTreeSet<String>),
}

/// A string keyed persistent store, such as the platform preferences.
///
/// Implementations must make each call atomic for the key it touches, as
/// several sessions may use the same store at once.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<StoredValue>;

    fn set(&self, key: &str, value: StoredValue) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Replaces the value of `key` with the result of `f`, without any other
    /// writer interleaving. Returning `None` removes the key.
    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<StoredValue>) -> Option<StoredValue>,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<FnvHashMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<StoredValue> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: StoredValue) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<StoredValue>) -> Option<StoredValue>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        if let Some(value) = f(entries.remove(key)) {
            entries.insert(key.to_string(), value);
        }
        Ok(())
    }
}

/// Keeps each entry in its own JSON file under a directory.
///
/// A write goes to a unique temporary file in the same directory which is
/// then renamed over the key's file, so a reader never sees a half written
/// value and writers on other keys are never overwritten. Stores opened on
/// the same directory within a process share a lock per key for
/// [`KeyValueStore::update`].
#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
}

type KeyLock = Arc<Mutex<()>>;

static KEY_LOCKS: LazyLock<Mutex<FnvHashMap<PathBuf, KeyLock>>> =
    LazyLock::new(Default::default);

impl JsonFileStore {
    /// Opens the store rooted at `path`, creating the directory if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        fs::create_dir_all(&path)?;
        Ok(Self {
            root: fs::canonicalize(path)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Reads every entry from disk, failing on the first unreadable file.
    pub fn entries(&self) -> Result<BTreeMap<String, StoredValue>, StoreError> {
        let mut entries = BTreeMap::new();
        for dir_entry in fs::read_dir(&self.root)? {
            let path = dir_entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(decode_key) else {
                continue;
            };
            if let Some(value) = read_value(&path)? {
                entries.insert(key, value);
            }
        }
        Ok(entries)
    }

    fn key_path(&self, key: &str) -> PathBuf {
        let name: String = form_urlencoded::byte_serialize(key.as_bytes()).collect();
        self.root.join(format!("{name}.json"))
    }

    fn key_lock(path: &Path) -> KeyLock {
        KEY_LOCKS
            .lock()
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }

    fn write_value(&self, path: &Path, value: &StoredValue) -> Result<(), StoreError> {
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&serde_json::to_vec_pretty(value)?)?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove_value(path: &Path) -> Result<(), StoreError> {
        match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

fn decode_key(name: &str) -> String {
    form_urlencoded::parse(name.as_bytes())
        .map(|(key, _)| key.into_owned())
        .next()
        .unwrap_or_default()
}

fn read_value(path: &Path) -> Result<Option<StoredValue>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<StoredValue> {
        let path = self.key_path(key);
        read_value(&path)
            .inspect_err(|e| warn!(path = %path.display(), error = %e, "unreadable store entry"))
            .ok()
            .flatten()
    }

    fn set(&self, key: &str, value: StoredValue) -> Result<(), StoreError> {
        let path = self.key_path(key);
        let lock = Self::key_lock(&path);
        let _guard = lock.lock();
        self.write_value(&path, &value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.key_path(key);
        let lock = Self::key_lock(&path);
        let _guard = lock.lock();
        Self::remove_value(&path)
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<StoredValue>) -> Option<StoredValue>,
    ) -> Result<(), StoreError> {
        let path = self.key_path(key);
        let lock = Self::key_lock(&path);
        let _guard = lock.lock();
        match f(read_value(&path)?) {
            Some(value) => self.write_value(&path, &value),
            None => Self::remove_value(&path),
        }
    }
}

/// Whether the user is subject to GDPR, as last reported by the remote service.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum GdprStatus {
    Unset,
    Applies,
    DoesNotApply,
}

#[derive(Clone)]
pub struct ConsentStore {
    kv: Arc<dyn KeyValueStore>,
}

impl ConsentStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    fn string(&self, key: &str) -> Option<String> {
        match self.kv.get(key) {
            Some(StoredValue::String(s)) => Some(s),
            _ => None,
        }
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.kv.set(key, StoredValue::String(value.to_string()))
    }

    pub fn mark_cmp_present(&self) -> Result<(), StoreError> {
        self.kv.set(IAB_CONSENT_CMP_PRESENT, StoredValue::Bool(true))
    }

    pub fn is_cmp_present(&self) -> bool {
        matches!(
            self.kv.get(IAB_CONSENT_CMP_PRESENT),
            Some(StoredValue::Bool(true))
        )
    }

    pub fn subject_to_gdpr(&self) -> GdprStatus {
        match self.string(IAB_CONSENT_SUBJECT_TO_GDPR).as_deref() {
            Some("1") => GdprStatus::Applies,
            Some("0") => GdprStatus::DoesNotApply,
            _ => GdprStatus::Unset,
        }
    }

    pub fn set_subject_to_gdpr(&self, applies: bool) -> Result<(), StoreError> {
        self.set_string(IAB_CONSENT_SUBJECT_TO_GDPR, if applies { "1" } else { "0" })
    }

    pub fn eu_consent(&self) -> Option<String> {
        self.string(EU_CONSENT_KEY)
    }

    pub fn set_eu_consent(&self, eu_consent: &str) -> Result<(), StoreError> {
        self.set_string(EU_CONSENT_KEY, eu_consent)
    }

    pub fn consent_uuid(&self) -> Option<String> {
        self.string(CONSENT_UUID_KEY)
    }

    pub fn set_consent_uuid(&self, consent_uuid: &str) -> Result<(), StoreError> {
        self.set_string(CONSENT_UUID_KEY, consent_uuid)
    }

    pub fn consent_string(&self) -> Option<String> {
        self.string(IAB_CONSENT_CONSENT_STRING)
    }

    pub fn parsed_purpose_consents(&self) -> Option<String> {
        self.string(IAB_CONSENT_PARSED_PURPOSE_CONSENTS)
    }

    pub fn parsed_vendor_consents(&self) -> Option<String> {
        self.string(IAB_CONSENT_PARSED_VENDOR_CONSENTS)
    }

    /// Writes the raw consent string along with the purpose and vendor
    /// flags derived from its decoded form.
    pub fn set_iab_consent(&self, raw: &str, consent: &VendorConsent) -> Result<(), StoreError> {
        let purposes = consent.purpose_consent_string();
        let vendors = consent.vendor_consent_string();
        debug!(%purposes, %vendors, "storing parsed IAB consents");

        self.set_string(IAB_CONSENT_CONSENT_STRING, raw)?;
        self.set_string(IAB_CONSENT_PARSED_PURPOSE_CONSENTS, &purposes)?;
        self.set_string(IAB_CONSENT_PARSED_VENDOR_CONSENTS, &vendors)
    }

    pub fn site_id(&self, account_id: u32, site_name: &str) -> Option<String> {
        self.string(&site_id_key(account_id, site_name))
    }

    pub fn set_site_id(
        &self,
        account_id: u32,
        site_name: &str,
        site_id: &str,
    ) -> Result<(), StoreError> {
        self.set_string(&site_id_key(account_id, site_name), site_id)
    }

    /// All stored custom consents. Blobs which cannot be read are skipped.
    pub fn custom_consents(&self) -> Vec<CustomConsent> {
        match self.kv.get(CUSTOM_CONSENTS_KEY) {
            Some(StoredValue::StringSet(blobs)) => blobs.iter().filter_map(|b| parse_blob(b)).collect(),
            _ => vec![],
        }
    }

    /// Removes the stored custom vendor consents for exactly `vendor_ids`.
    pub fn clear_custom_consents(&self, vendor_ids: &[String]) -> Result<(), StoreError> {
        self.update_custom_consents(|consents| {
            consents.retain(|c| !(c.is_vendor() && vendor_ids.iter().any(|id| id == c.id())));
        })
    }

    /// Replaces every stored custom consent with a remote refresh.
    ///
    /// The response only lists what is currently consented to, so anything
    /// absent from it is revoked.
    pub fn refresh_custom_consents(&self, response: &[CustomConsent]) -> Result<(), StoreError> {
        self.update_custom_consents(|consents| {
            consents.clear();
            consents.extend(response.iter().cloned());
        })
    }

    fn update_custom_consents<F>(&self, mut f: F) -> Result<(), StoreError>
    where
        F: FnMut(&mut Vec<CustomConsent>),
    {
        let mut error = None;
        self.kv.update(CUSTOM_CONSENTS_KEY, &mut |current| {
            let previous = current.clone();
            let mut consents = match current {
                Some(StoredValue::StringSet(blobs)) => {
                    blobs.iter().filter_map(|b| parse_blob(b)).collect()
                }
                _ => vec![],
            };
            f(&mut consents);

            let blobs = consents
                .iter()
                .map(CustomConsent::to_json)
                .collect::<Result<BTreeSet<_>, _>>();
            match blobs {
                Ok(blobs) => Some(StoredValue::StringSet(blobs)),
                Err(e) => {
                    error = Some(e);
                    previous.clone()
                }
            }
        })?;

        match error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

fn parse_blob(blob: &str) -> Option<CustomConsent> {
    CustomConsent::from_json(blob)
        .inspect_err(|e| warn!(%blob, error = %e, "skipping malformed custom consent"))
        .ok()
}
