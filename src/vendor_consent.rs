//! Decoding of IAB TCF v1.1 vendor consent strings.
//!
//! A vendor consent string is a base64url encoded, bit-packed record. Its
//! layout is described in the
//! [Consent string and vendor list formats v1.1](https://github.com/InteractiveAdvertisingBureau/GDPR-Transparency-and-Consent-Framework/blob/master/Consent%20string%20and%20vendor%20list%20formats%20v1.1%20Final.md)
//! document.
//!
//! ```
//! # use std::error::Error;
//! #
//! # fn main() -> Result<(), Box<dyn Error>> {
//! use cmp_consent::vendor_consent::VendorConsent;
//!
//! let consent = VendorConsent::decode("BOEFEAyOEFEAyAHABDENAI4AAAB9vABAASA")?;
//!
//! assert!(consent.is_purpose_allowed(1));
//! assert!(!consent.is_purpose_allowed(4));
//! assert!(consent.is_vendor_allowed(8));
//! assert!(!consent.is_vendor_allowed(9));
//! # Ok(())
//! # }
//! ```
use crate::constants::MAX_PURPOSE_ID;
use crate::core::DataReader;
use crate::core::base64;
pub use crate::core::IdRange;
pub use crate::core::base64::DecodeError;
use serde::Serialize;
use std::io;
use std::str::FromStr;
use strum_macros::Display;
use thiserror::Error;

const VENDOR_CONSENT_VERSION: u8 = 1;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("malformed base64 in consent string")]
    MalformedBase64(#[from] DecodeError),
    #[error("declared field length exceeds remaining bits")]
    TruncatedBitstream(#[from] io::Error),
    #[error("unsupported consent string version (expected {VENDOR_CONSENT_VERSION}, found {found})")]
    UnsupportedVersion { found: u8 },
    #[error("invalid vendor range {start}-{end} (max vendor id {max_vendor_id})")]
    InvalidVendorRange {
        start: u16,
        end: u16,
        max_vendor_id: u16,
    },
}

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Serialize)]
pub enum VendorEncoding {
    BitField,
    Range,
}

/// A run of vendor ids sharing the same consent flag.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct RangeEntry {
    pub ids: IdRange,
    pub allowed: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorConsents {
    /// One flag per vendor, index `i` holding the flag of vendor `i + 1`.
    BitField(Vec<bool>),
    /// Vendors covered by an entry take its flag, all others the default.
    Range {
        default_consent: bool,
        entries: Vec<RangeEntry>,
    },
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct VendorConsent {
    pub version: u8,
    pub created: u64,
    pub last_updated: u64,
    pub cmp_id: u16,
    pub cmp_version: u16,
    pub consent_screen: u8,
    pub consent_language: String,
    pub vendor_list_version: u16,
    pub purposes_allowed: Vec<bool>,
    pub max_vendor_id: u16,
    pub vendor_consents: VendorConsents,
}

impl FromStr for VendorConsent {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = base64::decode(s)?;
        let mut r = DataReader::with_bit_len(&decoded.bytes, decoded.bit_len);

        let version = r.read_fixed_integer::<u8>(6)?;
        if version != VENDOR_CONSENT_VERSION {
            return Err(CodecError::UnsupportedVersion { found: version });
        }

        let created = r.read_datetime_as_unix_timestamp()?;
        let last_updated = r.read_datetime_as_unix_timestamp()?;
        let cmp_id = r.read_fixed_integer(12)?;
        let cmp_version = r.read_fixed_integer(12)?;
        let consent_screen = r.read_fixed_integer(6)?;
        let consent_language = r.read_string(2)?;
        let vendor_list_version = r.read_fixed_integer(12)?;
        let purposes_allowed = r.read_fixed_bitfield(MAX_PURPOSE_ID)?;
        let max_vendor_id = r.read_fixed_integer::<u16>(16)?;
        let vendor_consents = parse_vendor_consents(&mut r, max_vendor_id)?;

        Ok(Self {
            version,
            created,
            last_updated,
            cmp_id,
            cmp_version,
            consent_screen,
            consent_language,
            vendor_list_version,
            purposes_allowed,
            max_vendor_id,
            vendor_consents,
        })
    }
}

fn parse_vendor_consents(
    r: &mut DataReader,
    max_vendor_id: u16,
) -> Result<VendorConsents, CodecError> {
    let is_range = r.read_bool()?;
    if !is_range {
        return Ok(VendorConsents::BitField(
            r.read_fixed_bitfield(max_vendor_id as usize)?,
        ));
    }

    let default_consent = r.read_bool()?;
    let entries = r
        .read_integer_range()?
        .into_iter()
        .map(|ids| {
            if ids.start == 0 || ids.start > ids.end || ids.end > max_vendor_id {
                return Err(CodecError::InvalidVendorRange {
                    start: ids.start,
                    end: ids.end,
                    max_vendor_id,
                });
            }
            // listed vendors carry the opposite of the default consent
            Ok(RangeEntry {
                ids,
                allowed: !default_consent,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(VendorConsents::Range {
        default_consent,
        entries,
    })
}

impl VendorConsent {
    pub fn decode(s: &str) -> Result<Self, CodecError> {
        s.parse()
    }

    pub fn vendor_encoding(&self) -> VendorEncoding {
        match self.vendor_consents {
            VendorConsents::BitField(_) => VendorEncoding::BitField,
            VendorConsents::Range { .. } => VendorEncoding::Range,
        }
    }

    pub fn default_consent(&self) -> Option<bool> {
        match self.vendor_consents {
            VendorConsents::BitField(_) => None,
            VendorConsents::Range {
                default_consent, ..
            } => Some(default_consent),
        }
    }

    /// Purpose ids are 1-based; anything outside `1..=24` is not allowed.
    pub fn is_purpose_allowed(&self, id: i32) -> bool {
        index_of(id, self.purposes_allowed.len())
            .map(|i| self.purposes_allowed[i])
            .unwrap_or(false)
    }

    /// Vendor ids are 1-based; anything outside `1..=max_vendor_id` is not allowed.
    pub fn is_vendor_allowed(&self, id: i32) -> bool {
        let Some(i) = index_of(id, self.max_vendor_id as usize) else {
            return false;
        };

        match &self.vendor_consents {
            VendorConsents::BitField(bits) => bits.get(i).copied().unwrap_or(false),
            VendorConsents::Range {
                default_consent,
                entries,
            } => entries
                .iter()
                .find(|e| e.ids.contains(id as u16))
                .map(|e| e.allowed)
                .unwrap_or(*default_consent),
        }
    }

    /// One `'1'`/`'0'` character per purpose, in ascending id order.
    pub fn purpose_consent_string(&self) -> String {
        (1..=MAX_PURPOSE_ID as i32)
            .map(|id| flag_char(self.is_purpose_allowed(id)))
            .collect()
    }

    /// One `'1'`/`'0'` character per vendor up to `max_vendor_id`, in ascending id order.
    pub fn vendor_consent_string(&self) -> String {
        (1..=self.max_vendor_id as i32)
            .map(|id| flag_char(self.is_vendor_allowed(id)))
            .collect()
    }
}

fn index_of(id: i32, len: usize) -> Option<usize> {
    usize::try_from(id)
        .ok()
        .filter(|&id| (1..=len).contains(&id))
        .map(|id| id - 1)
}

fn flag_char(allowed: bool) -> char {
    if allowed { '1' } else { '0' }
}
