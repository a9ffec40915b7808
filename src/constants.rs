//! Store keys, limits and defaults shared by the whole crate.
use std::time::Duration;

/// Highest purpose id defined by the TCF v1.1 purpose list.
pub const MAX_PURPOSE_ID: usize = 24;

/// Set to `true` as soon as a consent session runs.
pub const IAB_CONSENT_CMP_PRESENT: &str = "IABConsent_CMPPresent";
/// `"1"` when the user is subject to GDPR, `"0"` otherwise, absent until known.
pub const IAB_CONSENT_SUBJECT_TO_GDPR: &str = "IABConsent_SubjectToGDPR";
/// The raw IAB consent string.
pub const IAB_CONSENT_CONSENT_STRING: &str = "IABConsent_ConsentString";
/// 24 `'0'`/`'1'` characters, one per purpose.
pub const IAB_CONSENT_PARSED_PURPOSE_CONSENTS: &str = "IABConsent_ParsedPurposeConsents";
/// One `'0'`/`'1'` character per vendor, up to the max vendor id of the consent string.
pub const IAB_CONSENT_PARSED_VENDOR_CONSENTS: &str = "IABConsent_ParsedVendorConsents";

pub const EU_CONSENT_KEY: &str = "euconsent";
pub const CONSENT_UUID_KEY: &str = "consentUUID";

const SP_PREFIX: &str = "_sp_";

/// Aggregate set of JSON encoded custom consents.
pub const CUSTOM_CONSENTS_KEY: &str = "_sp__custom_consents";

/// Key of the cached site id for an account and site pair.
pub fn site_id_key(account_id: u32, site_name: &str) -> String {
    format!("{SP_PREFIX}site_id_{account_id}_{site_name}")
}

/// Placeholder the message script sends for values it does not have.
pub const UNDEFINED: &str = "undefined";

pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_CMP_DOMAIN: &str = "sourcepoint.mgr.consensu.org";
pub const DEFAULT_STAGING_CMP_DOMAIN: &str = "cmp.sp-stage.net";
pub const DEFAULT_MESSAGE_DOMAIN: &str = "in-app-messaging.pm.sourcepoint.mgr.consensu.org";
pub const DEFAULT_STAGING_MESSAGE_DOMAIN: &str = "in-app-messaging.pm.cmp.sp-stage.net";
pub const DEFAULT_MMS_DOMAIN: &str = "mms.sp-prod.net";
pub const DEFAULT_STAGING_MMS_DOMAIN: &str = "mms.sp-stage.net";

/// Document loaded before the message so the script bridge can attach.
pub const BLANK_DOCUMENT: &str = "about:blank";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_id_key_is_scoped_per_account_and_site() {
        assert_eq!(site_id_key(22, "mobile.demo"), "_sp_site_id_22_mobile.demo");
        assert_ne!(site_id_key(22, "a"), site_id_key(23, "a"));
    }
}
