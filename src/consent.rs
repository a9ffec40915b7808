//! Vendors and purposes outside of the IAB global vendor list.
//!
//! Custom consents are scoped to a site configuration (account id, site
//! name and page) and are only returned by the remote service for things the
//! user actually consented to.
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CustomVendorConsent {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CustomPurposeConsent {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CustomConsent {
    #[serde(rename = "vendor")]
    Vendor(CustomVendorConsent),
    #[serde(rename = "purpose")]
    Purpose(CustomPurposeConsent),
}

impl CustomConsent {
    pub fn vendor(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Vendor(CustomVendorConsent {
            id: id.into(),
            name: name.into(),
        })
    }

    pub fn purpose(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Purpose(CustomPurposeConsent {
            id: id.into(),
            name: name.into(),
        })
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Vendor(v) => &v.id,
            Self::Purpose(p) => &p.id,
        }
    }

    pub fn is_vendor(&self) -> bool {
        matches!(self, Self::Vendor(_))
    }

    pub fn as_vendor(&self) -> Option<&CustomVendorConsent> {
        match self {
            Self::Vendor(v) => Some(v),
            Self::Purpose(_) => None,
        }
    }

    pub fn as_purpose(&self) -> Option<&CustomPurposeConsent> {
        match self {
            Self::Purpose(p) => Some(p),
            Self::Vendor(_) => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
