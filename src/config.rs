//! Immutable configuration of a consent session.
use crate::constants::{
    DEFAULT_CMP_DOMAIN, DEFAULT_MESSAGE_DOMAIN, DEFAULT_MESSAGE_TIMEOUT, DEFAULT_MMS_DOMAIN,
    DEFAULT_PAGE_LOAD_TIMEOUT, DEFAULT_STAGING_CMP_DOMAIN, DEFAULT_STAGING_MESSAGE_DOMAIN,
    DEFAULT_STAGING_MMS_DOMAIN,
};
use crate::error::ConsentLibError;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::time::Duration;
use strum_macros::Display;
use url::Url;

#[derive(Clone, Copy, Debug, Default, Display, Eq, PartialEq)]
#[strum(serialize_all = "UPPERCASE")]
pub enum DebugLevel {
    Debug,
    #[default]
    Off,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TargetingValue {
    String(String),
    Integer(i64),
}

impl From<&str> for TargetingValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for TargetingValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for TargetingValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for TargetingValue {
    fn from(n: i32) -> Self {
        Self::Integer(n.into())
    }
}

/// Targeting parameters, kept in insertion order.
///
/// Setting a key again replaces its value without moving it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TargetingParams(Vec<(String, TargetingValue)>);

impl TargetingParams {
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<TargetingValue>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&TargetingValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TargetingValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn to_json(&self) -> String {
        // a map of strings and integers cannot fail to serialize
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Serialize for TargetingParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub account_id: u32,
    pub site_name: String,
    pub page: String,
    pub staging: bool,
    pub staging_campaign: bool,
    pub cmp_domain: Option<String>,
    pub message_domain: Option<String>,
    pub mms_domain: Option<String>,
    pub targeting_params: TargetingParams,
    pub debug_level: DebugLevel,
    pub message_timeout: Duration,
    pub page_load_timeout: Duration,
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// `site_name/page`, the path identifying the site configuration.
    pub fn site_path(&self) -> String {
        if self.page.is_empty() {
            self.site_name.clone()
        } else {
            format!("{}/{}", self.site_name, self.page.trim_start_matches('/'))
        }
    }

    pub fn site_href(&self) -> String {
        format!("https://{}", self.site_path())
    }

    pub fn cmp_base(&self) -> Result<Url, ConsentLibError> {
        domain_url(
            self.cmp_domain.as_deref(),
            self.staging,
            DEFAULT_CMP_DOMAIN,
            DEFAULT_STAGING_CMP_DOMAIN,
        )
    }

    pub fn message_base(&self) -> Result<Url, ConsentLibError> {
        domain_url(
            self.message_domain.as_deref(),
            self.staging,
            DEFAULT_MESSAGE_DOMAIN,
            DEFAULT_STAGING_MESSAGE_DOMAIN,
        )
    }

    pub fn mms_base(&self) -> Result<Url, ConsentLibError> {
        domain_url(
            self.mms_domain.as_deref(),
            self.staging,
            DEFAULT_MMS_DOMAIN,
            DEFAULT_STAGING_MMS_DOMAIN,
        )
    }
}

/// Accepts a bare host (`https` implied) or a base URL with its scheme.
fn domain_url(
    custom: Option<&str>,
    staging: bool,
    default: &str,
    default_staging: &str,
) -> Result<Url, ConsentLibError> {
    let domain = custom.unwrap_or(if staging { default_staging } else { default });
    let with_scheme = if domain.contains("://") {
        domain.to_string()
    } else {
        format!("https://{domain}")
    };

    Url::parse(&with_scheme).map_err(|e| {
        ConsentLibError::BuildConfiguration(format!("invalid domain {domain:?}: {e}"))
    })
}

#[derive(Clone, Debug, Default)]
pub struct SessionConfigBuilder {
    account_id: Option<u32>,
    site_name: Option<String>,
    page: String,
    staging: bool,
    staging_campaign: bool,
    cmp_domain: Option<String>,
    message_domain: Option<String>,
    mms_domain: Option<String>,
    targeting_params: TargetingParams,
    debug_level: DebugLevel,
    message_timeout: Option<Duration>,
    page_load_timeout: Option<Duration>,
}

impl SessionConfigBuilder {
    pub fn account_id(mut self, account_id: u32) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn site_name(mut self, site_name: impl Into<String>) -> Self {
        self.site_name = Some(site_name.into());
        self
    }

    pub fn page(mut self, page: impl Into<String>) -> Self {
        self.page = page.into();
        self
    }

    pub fn staging(mut self, staging: bool) -> Self {
        self.staging = staging;
        self
    }

    pub fn staging_campaign(mut self, staging_campaign: bool) -> Self {
        self.staging_campaign = staging_campaign;
        self
    }

    pub fn cmp_domain(mut self, domain: impl Into<String>) -> Self {
        self.cmp_domain = Some(domain.into());
        self
    }

    pub fn message_domain(mut self, domain: impl Into<String>) -> Self {
        self.message_domain = Some(domain.into());
        self
    }

    pub fn mms_domain(mut self, domain: impl Into<String>) -> Self {
        self.mms_domain = Some(domain.into());
        self
    }

    pub fn targeting_param(
        mut self,
        key: impl Into<String>,
        value: impl Into<TargetingValue>,
    ) -> Self {
        self.targeting_params.insert(key, value);
        self
    }

    pub fn debug_level(mut self, debug_level: DebugLevel) -> Self {
        self.debug_level = debug_level;
        self
    }

    pub fn message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = Some(timeout);
        self
    }

    pub fn page_load_timeout(mut self, timeout: Duration) -> Self {
        self.page_load_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<SessionConfig, ConsentLibError> {
        let account_id = self
            .account_id
            .ok_or_else(|| ConsentLibError::BuildConfiguration("missing account id".into()))?;
        let site_name = self
            .site_name
            .ok_or_else(|| ConsentLibError::BuildConfiguration("missing site name".into()))?;
        if site_name.trim().is_empty() {
            return Err(ConsentLibError::BuildConfiguration(
                "site name must not be blank".into(),
            ));
        }

        let message_timeout = self.message_timeout.unwrap_or(DEFAULT_MESSAGE_TIMEOUT);
        if message_timeout.is_zero() {
            return Err(ConsentLibError::BuildConfiguration(
                "message timeout must be greater than zero".into(),
            ));
        }

        let config = SessionConfig {
            account_id,
            site_name,
            page: self.page,
            staging: self.staging,
            staging_campaign: self.staging_campaign,
            cmp_domain: self.cmp_domain,
            message_domain: self.message_domain,
            mms_domain: self.mms_domain,
            targeting_params: self.targeting_params,
            debug_level: self.debug_level,
            message_timeout,
            page_load_timeout: self.page_load_timeout.unwrap_or(DEFAULT_PAGE_LOAD_TIMEOUT),
        };

        // surface bad overrides now rather than on the first request
        config.cmp_base()?;
        config.message_base()?;
        config.mms_base()?;

        Ok(config)
    }
}
