//! This crate is a client for consent management platforms (CMP) implementing the IAB
//! [Transparency and Consent Framework](https://github.com/InteractiveAdvertisingBureau/GDPR-Transparency-and-Consent-Framework)
//! v1.1.
//!
//! It drives the consent message shown to the user in an embedded rendering surface, persists the
//! resulting consent data, and answers vendor and purpose consent queries.
//!
//! # Running a consent session
//!
//! A [`ConsentSession`](session/struct.ConsentSession.html) is built from a
//! [`SessionConfig`](config/struct.SessionConfig.html), a key/value store, and a rendering surface
//! supplied by the host application.
//!
//! ```no_run
//! # use std::error::Error;
//! # use std::sync::Arc;
//! # use cmp_consent::channel::{BridgeReceiver, RenderingSurface};
//! # use url::Url;
//! # struct WebView;
//! # impl RenderingSurface for WebView {
//! #     fn install_bridge(&self, _bridge: BridgeReceiver) {}
//! #     fn load_blank(&self) {}
//! #     fn load_url(&self, _url: &Url) {}
//! #     fn display(&self) {}
//! #     fn attach(&self) {}
//! #     fn detach(&self) {}
//! #     fn destroy(&self) {}
//! # }
//! #
//! # async fn example() -> Result<(), Box<dyn Error>> {
//! use cmp_consent::config::SessionConfig;
//! use cmp_consent::session::ConsentSession;
//! use cmp_consent::store::JsonFileStore;
//!
//! let config = SessionConfig::builder()
//!     .account_id(22)
//!     .site_name("mobile.demo")
//!     .targeting_param("MyPrivacyManager", "true")
//!     .build()?;
//!
//! let mut session = ConsentSession::builder(config)
//!     .store(Arc::new(JsonFileStore::open("consent")?))
//!     .surface(Arc::new(WebView))
//!     .build()?;
//!
//! session.run().await?;
//!
//! let vendors = session.get_iab_vendor_consents(&[1, 8, 755])?;
//! let purposes = session.get_iab_purpose_consents(&[1, 2, 3])?;
//! # Ok(())
//! # }
//! ```
//!
//! # Decoding consent strings
//!
//! Consent strings can also be decoded on their own with
//! [`VendorConsent`](vendor_consent/struct.VendorConsent.html).
//!
//! # Error handling
//!
//! A consent string which cannot be fully decoded is considered as an error, and is never
//! persisted. Queries on such a string fail rather than reporting vendors or purposes as not
//! allowed.
//!
//! Failures happening while a session runs are reported once through the
//! [`ConsentCallbacks`](session/trait.ConsentCallbacks.html) of the session, and end the run.
//!
pub mod channel;
pub mod client;
pub mod config;
pub mod consent;
pub mod constants;
pub(crate) mod core;
pub mod error;
pub mod session;
pub mod store;
pub mod vendor_consent;
