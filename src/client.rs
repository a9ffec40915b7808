//! Requests to the remote consent service.
use crate::config::SessionConfig;
use crate::consent::CustomConsent;
use crate::constants::DEFAULT_REQUEST_TIMEOUT;
use crate::error::ConsentLibError;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;
use url::{Position, Url};

/// Reports whether the device currently has a usable network connection.
pub trait Connectivity: Send + Sync {
    fn is_connected(&self) -> bool;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysConnected;

impl Connectivity for AlwaysConnected {
    fn is_connected(&self) -> bool {
        true
    }
}

/// The read operations offered by the remote consent service.
///
/// All of them are idempotent and may be retried by the host.
#[async_trait]
pub trait RemoteConsentClient: Send + Sync {
    /// Whether GDPR applies to the current user.
    async fn gdpr_status(&self) -> Result<bool, ConsentLibError>;

    async fn site_id(&self, account_id: u32, site_name: &str) -> Result<String, ConsentLibError>;

    /// The custom vendors among `vendor_ids` and the custom purposes the
    /// user consented to.
    async fn custom_consents(
        &self,
        consent_uuid: Option<&str>,
        eu_consent: Option<&str>,
        site_id: &str,
        vendor_ids: &[String],
    ) -> Result<Vec<CustomConsent>, ConsentLibError>;

    fn message_url(&self, config: &SessionConfig) -> Result<Url, ConsentLibError> {
        message_url(config)
    }
}

/// Builds the URL of the consent message for a site configuration.
///
/// No network access is involved, identical configurations always give
/// identical URLs.
pub fn message_url(config: &SessionConfig) -> Result<Url, ConsentLibError> {
    let mut url = config.message_base()?;
    let cmp = config.cmp_base()?;
    let mms = config.mms_base()?;

    {
        let mut segments = url.path_segments_mut().map_err(|_| {
            ConsentLibError::BuildConfiguration("message domain cannot hold a path".into())
        })?;
        segments
            .pop_if_empty()
            .push(&config.account_id.to_string())
            .push(&config.site_name)
            .extend(config.page.split('/').filter(|s| !s.is_empty()));
    }

    let env = |staging: bool| if staging { "stage" } else { "public" };

    url.query_pairs_mut()
        .append_pair("_sp_accountId", &config.account_id.to_string())
        .append_pair("_sp_siteHref", &config.site_href())
        .append_pair("_sp_mms_Domain", mms.as_str().trim_end_matches('/'))
        .append_pair(
            "_sp_cmp_origin",
            &format!("//{}", &cmp[Position::BeforeHost..Position::AfterPort]),
        )
        .append_pair("_sp_env", env(config.staging))
        .append_pair("_sp_campaign_env", env(config.staging_campaign))
        .append_pair("_sp_runMessaging", "true")
        .append_pair("_sp_targetingParams", &config.targeting_params.to_json())
        .append_pair("_sp_debug_level", &config.debug_level.to_string());

    Ok(url)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GdprStatusResponse {
    gdpr_applies: bool,
}

#[derive(Deserialize)]
struct SiteDataResponse {
    site_id: serde_json::Value,
}

#[derive(Deserialize)]
struct ConsentedItem {
    #[serde(rename = "_id")]
    id: String,
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomConsentsResponse {
    #[serde(default)]
    consented_vendors: Vec<ConsentedItem>,
    #[serde(default)]
    consented_purposes: Vec<ConsentedItem>,
}

/// [`RemoteConsentClient`] over HTTP.
#[derive(Clone)]
pub struct HttpConsentClient {
    http: reqwest::Client,
    cmp_base: Url,
    mms_base: Url,
    connectivity: Arc<dyn Connectivity>,
}

impl HttpConsentClient {
    pub fn new(
        config: &SessionConfig,
        connectivity: Arc<dyn Connectivity>,
    ) -> Result<Self, ConsentLibError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ConsentLibError::BuildConfiguration(e.to_string()))?;

        Ok(Self {
            http,
            cmp_base: config.cmp_base()?,
            mms_base: config.mms_base()?,
            connectivity,
        })
    }

    fn endpoint(base: &Url, path: &str) -> Result<Url, ConsentLibError> {
        base.join(path)
            .map_err(|e| ConsentLibError::api(format!("invalid endpoint {path}: {e}")))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<T, ConsentLibError> {
        if !self.connectivity.is_connected() {
            return Err(ConsentLibError::NoInternetConnection);
        }

        debug!(%url, "requesting consent service");
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl RemoteConsentClient for HttpConsentClient {
    async fn gdpr_status(&self) -> Result<bool, ConsentLibError> {
        let url = Self::endpoint(&self.cmp_base, "consent/v2/gdpr-status")?;
        let response: GdprStatusResponse = self.get_json(url).await?;
        Ok(response.gdpr_applies)
    }

    async fn site_id(&self, account_id: u32, site_name: &str) -> Result<String, ConsentLibError> {
        let mut url = Self::endpoint(&self.mms_base, "get_site_data")?;
        url.query_pairs_mut()
            .append_pair("account_id", &account_id.to_string())
            .append_pair("href", &format!("https://{site_name}"));

        let response: SiteDataResponse = self.get_json(url).await?;
        match response.site_id {
            serde_json::Value::Number(n) => Ok(n.to_string()),
            serde_json::Value::String(s) if !s.is_empty() => Ok(s),
            other => Err(ConsentLibError::api(format!("unexpected site id {other}"))),
        }
    }

    async fn custom_consents(
        &self,
        consent_uuid: Option<&str>,
        eu_consent: Option<&str>,
        site_id: &str,
        vendor_ids: &[String],
    ) -> Result<Vec<CustomConsent>, ConsentLibError> {
        let mut url = Self::endpoint(
            &self.cmp_base,
            &format!("consent/v2/{site_id}/custom-vendors"),
        )?;
        url.query_pairs_mut()
            .append_pair("customVendorIds", &vendor_ids.join(","))
            .append_pair("consentUUID", consent_uuid.unwrap_or_default())
            .append_pair("euconsent", eu_consent.unwrap_or_default());

        let response: CustomConsentsResponse = self.get_json(url).await?;
        let vendors = response
            .consented_vendors
            .into_iter()
            .map(|v| CustomConsent::vendor(v.id, v.name));
        let purposes = response
            .consented_purposes
            .into_iter()
            .map(|p| CustomConsent::purpose(p.id, p.name));

        Ok(vendors.chain(purposes).collect())
    }
}
