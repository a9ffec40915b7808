//! Two-way bridge between the consent session and the rendering surface.
//!
//! The surface (typically a web view) only serves as a transport: the message
//! script running inside it calls the inbound hooks of a [`BridgeReceiver`],
//! which forwards typed events to a [`BridgeEventSink`]. In the other
//! direction, [`MessageChannel::load_message`] asks the surface to navigate to
//! the consent message.
//!
//! Inbound hooks may be called from any thread.
use crate::client::Connectivity;
use crate::constants::BLANK_DOCUMENT;
use crate::error::ConsentLibError;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use url::Url;

/// What the session needs from the view rendering the consent message.
pub trait RenderingSurface: Send + Sync {
    /// Registers the receiver the message script must report to, replacing
    /// any previous one.
    fn install_bridge(&self, bridge: BridgeReceiver);

    /// Loads an empty document. The script bridge only attaches after a
    /// first navigation has happened.
    fn load_blank(&self);

    fn load_url(&self, url: &Url);

    /// Sizes the surface to fill its container and brings it to the front.
    fn display(&self);

    fn attach(&self);

    fn detach(&self);

    fn destroy(&self);
}

/// Cookie jar of the rendering surface.
pub trait CookieStore: Send + Sync {
    /// Forces in-memory cookies to durable storage.
    fn flush(&self);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoCookies;

impl CookieStore for NoCookies {
    fn flush(&self) {}
}

/// Receives the events raised by the message script.
pub trait BridgeEventSink: Send + Sync {
    fn on_message_ready(&self, will_show_message: bool);

    fn on_error_occurred(&self, error: ConsentLibError);

    fn on_interaction_complete(&self, eu_consent: Option<String>, consent_uuid: Option<String>);

    fn on_message_choice_select(&self, choice_type: i32);
}

/// Messages as posted by the script over the bridge.
#[derive(Debug, Deserialize, Eq, PartialEq)]
#[serde(tag = "name")]
pub enum BridgeMessage {
    #[serde(rename = "onReceiveMessageData", rename_all = "camelCase")]
    ReceiveMessageData {
        will_show_message: bool,
        #[serde(rename = "msgJSON", default)]
        msg_json: Option<String>,
    },
    #[serde(rename = "onMessageChoiceSelect", rename_all = "camelCase")]
    MessageChoiceSelect { choice_type: i32 },
    #[serde(rename = "sendConsentData")]
    SendConsentData {
        #[serde(default)]
        euconsent: Option<String>,
        #[serde(rename = "consentUUID", default)]
        consent_uuid: Option<String>,
    },
    #[serde(rename = "onErrorOccurred", rename_all = "camelCase")]
    ErrorOccurred {
        #[serde(default)]
        error_type: String,
    },
}

/// The inbound end of the bridge, handed to the rendering surface.
#[derive(Clone)]
pub struct BridgeReceiver {
    sink: Arc<dyn BridgeEventSink>,
    connectivity: Arc<dyn Connectivity>,
    cookies: Arc<dyn CookieStore>,
    pending_loads: Arc<Mutex<HashSet<String>>>,
    page_load_timeout: Duration,
    runtime: Option<Handle>,
}

impl BridgeReceiver {
    fn forward<F>(&self, f: F)
    where
        F: FnOnce(&dyn BridgeEventSink),
    {
        // consent cookies must be durable before the session acts on them
        self.cookies.flush();
        f(self.sink.as_ref());
    }

    pub fn on_receive_message_data(&self, will_show_message: bool, _msg_json: &str) {
        self.forward(|sink| sink.on_message_ready(will_show_message));
    }

    pub fn on_message_choice_select(&self, choice_type: i32) {
        if !self.connectivity.is_connected() {
            self.forward(|sink| sink.on_error_occurred(ConsentLibError::NoInternetConnection));
        }
        self.forward(|sink| sink.on_message_choice_select(choice_type));
    }

    pub fn send_consent_data(&self, eu_consent: Option<String>, consent_uuid: Option<String>) {
        self.forward(|sink| sink.on_interaction_complete(eu_consent, consent_uuid));
    }

    pub fn on_error_occurred(&self, error_type: &str) {
        let error = if self.connectivity.is_connected() {
            ConsentLibError::api(format!(
                "something went wrong in the message script: {error_type}"
            ))
        } else {
            ConsentLibError::NoInternetConnection
        };
        self.forward(|sink| sink.on_error_occurred(error));
    }

    /// Decodes a JSON message posted by the script and raises the matching
    /// event. Unreadable messages are reported as errors.
    pub fn dispatch(&self, message: &str) {
        match serde_json::from_str::<BridgeMessage>(message) {
            Ok(BridgeMessage::ReceiveMessageData {
                will_show_message,
                msg_json,
            }) => self.on_receive_message_data(will_show_message, msg_json.as_deref().unwrap_or("")),
            Ok(BridgeMessage::MessageChoiceSelect { choice_type }) => {
                self.on_message_choice_select(choice_type)
            }
            Ok(BridgeMessage::SendConsentData {
                euconsent,
                consent_uuid,
            }) => self.send_consent_data(euconsent, consent_uuid),
            Ok(BridgeMessage::ErrorOccurred { error_type }) => self.on_error_occurred(&error_type),
            Err(e) => {
                warn!(error = %e, "unreadable bridge message");
                self.forward(|sink| {
                    sink.on_error_occurred(ConsentLibError::api(format!(
                        "unreadable bridge message: {e}"
                    )))
                });
            }
        }
    }

    /// Called by the surface when it starts loading a page. A page which has
    /// not finished loading after the page load timeout raises an error.
    pub fn page_started(&self, url: &str) {
        if url == BLANK_DOCUMENT || url.starts_with("data:") {
            return;
        }
        self.pending_loads.lock().insert(url.to_string());

        let Some(runtime) = &self.runtime else {
            debug!(%url, "no runtime available, page load is not watched");
            return;
        };

        let pending_loads = Arc::clone(&self.pending_loads);
        let sink = Arc::clone(&self.sink);
        let timeout = self.page_load_timeout;
        let url = url.to_string();
        runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if pending_loads.lock().contains(&url) {
                warn!(%url, "page load timed out");
                sink.on_error_occurred(ConsentLibError::api(format!("TIMED OUT: {url}")));
            }
        });
    }

    pub fn page_finished(&self, url: &str) {
        self.cookies.flush();
        self.pending_loads.lock().remove(url);
    }
}

/// The outbound end of the bridge, owned by the session.
#[derive(Clone)]
pub struct MessageChannel {
    surface: Arc<dyn RenderingSurface>,
    connectivity: Arc<dyn Connectivity>,
    cookies: Arc<dyn CookieStore>,
    page_load_timeout: Duration,
}

impl MessageChannel {
    pub fn new(
        surface: Arc<dyn RenderingSurface>,
        connectivity: Arc<dyn Connectivity>,
        cookies: Arc<dyn CookieStore>,
        page_load_timeout: Duration,
    ) -> Self {
        Self {
            surface,
            connectivity,
            cookies,
            page_load_timeout,
        }
    }

    pub fn surface(&self) -> &Arc<dyn RenderingSurface> {
        &self.surface
    }

    /// Routes the events of the surface to `sink` from now on.
    pub fn connect(&self, sink: Arc<dyn BridgeEventSink>) -> BridgeReceiver {
        let receiver = BridgeReceiver {
            sink,
            connectivity: Arc::clone(&self.connectivity),
            cookies: Arc::clone(&self.cookies),
            pending_loads: Arc::default(),
            page_load_timeout: self.page_load_timeout,
            runtime: Handle::try_current().ok(),
        };
        self.surface.install_bridge(receiver.clone());
        receiver
    }

    /// Fails fast when offline; otherwise loads a blank document, then the message.
    pub fn load_message(&self, url: &Url) -> Result<(), ConsentLibError> {
        if !self.connectivity.is_connected() {
            return Err(ConsentLibError::NoInternetConnection);
        }

        self.surface.load_blank();
        info!(%url, "loading consent message");
        self.surface.load_url(url);
        Ok(())
    }
}
