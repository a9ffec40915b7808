//! One consent flow, from loading the message to persisting the user's choice.
//!
//! A [`ConsentSession`] goes through the states
//! `Idle → AwaitingMessage → (MessageReady | TimedOut | ErrorOccurred) → Finished`
//! on every [`ConsentSession::run`]. Events raised by the message script reach
//! the session over a channel; the message timeout only exists while the
//! session is awaiting the message, so a late timer can never fire after the
//! message was accepted.
use crate::channel::{BridgeEventSink, CookieStore, MessageChannel, NoCookies, RenderingSurface};
use crate::client::{AlwaysConnected, Connectivity, HttpConsentClient, RemoteConsentClient};
use crate::config::SessionConfig;
use crate::consent::{CustomConsent, CustomPurposeConsent, CustomVendorConsent};
use crate::constants::UNDEFINED;
use crate::error::ConsentLibError;
use crate::store::{ConsentStore, GdprStatus, KeyValueStore};
use crate::vendor_consent::VendorConsent;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use strum_macros::Display;
use tokio::sync::mpsc;
use tokio::time::Sleep;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, Default, Display, Eq, PartialEq)]
pub enum SessionState {
    #[default]
    Idle,
    AwaitingMessage,
    MessageReady,
    TimedOut,
    ErrorOccurred,
    Finished,
}

/// Hooks the host application is notified through.
///
/// Every hook receives the session, so the host can read the current consent
/// data from it. `on_interaction_complete` is invoked exactly once per run,
/// whichever way the run ends.
pub trait ConsentCallbacks: Send + Sync {
    fn on_message_ready(&self, _session: &ConsentSession) {}

    fn on_message_choice_select(&self, _session: &ConsentSession) {}

    fn on_error_occurred(&self, _session: &ConsentSession) {}

    fn on_interaction_complete(&self, _session: &ConsentSession) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoCallbacks;

impl ConsentCallbacks for NoCallbacks {}

/// Runs surface operations on the host UI thread.
pub trait UiExecutor: Send + Sync {
    fn run_on_ui(&self, task: Box<dyn FnOnce() + Send>);
}

/// Runs UI tasks right away on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineUi;

impl UiExecutor for InlineUi {
    fn run_on_ui(&self, task: Box<dyn FnOnce() + Send>) {
        task()
    }
}

/// Creates rendering surfaces for sessions which own theirs.
pub trait SurfaceFactory: Send + Sync {
    fn create(&self) -> Arc<dyn RenderingSurface>;
}

impl<F> SurfaceFactory for F
where
    F: Fn() -> Arc<dyn RenderingSurface> + Send + Sync,
{
    fn create(&self) -> Arc<dyn RenderingSurface> {
        self()
    }
}

enum SurfaceSource {
    /// Supplied by the host, which stays responsible for showing and destroying it.
    External(Arc<dyn RenderingSurface>),
    Owned(Arc<dyn SurfaceFactory>),
}

#[derive(Debug)]
enum BridgeEvent {
    MessageReady(bool),
    Error(ConsentLibError),
    InteractionComplete {
        eu_consent: Option<String>,
        consent_uuid: Option<String>,
    },
    ChoiceSelect(i32),
}

struct EventSender(mpsc::UnboundedSender<BridgeEvent>);

impl EventSender {
    fn send(&self, event: BridgeEvent) {
        if let Err(e) = self.0.send(event) {
            debug!(event = ?e.0, "bridge event after the session finished");
        }
    }
}

impl BridgeEventSink for EventSender {
    fn on_message_ready(&self, will_show_message: bool) {
        self.send(BridgeEvent::MessageReady(will_show_message));
    }

    fn on_error_occurred(&self, error: ConsentLibError) {
        self.send(BridgeEvent::Error(error));
    }

    fn on_interaction_complete(&self, eu_consent: Option<String>, consent_uuid: Option<String>) {
        self.send(BridgeEvent::InteractionComplete {
            eu_consent,
            consent_uuid,
        });
    }

    fn on_message_choice_select(&self, choice_type: i32) {
        self.send(BridgeEvent::ChoiceSelect(choice_type));
    }
}

fn is_defined(value: &str) -> bool {
    value != UNDEFINED
}

pub struct ConsentSessionBuilder {
    config: SessionConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    client: Option<Arc<dyn RemoteConsentClient>>,
    connectivity: Arc<dyn Connectivity>,
    surface: Option<SurfaceSource>,
    cookies: Arc<dyn CookieStore>,
    ui: Arc<dyn UiExecutor>,
    callbacks: Arc<dyn ConsentCallbacks>,
}

impl ConsentSessionBuilder {
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to an [`HttpConsentClient`] for the session configuration.
    pub fn client(mut self, client: Arc<dyn RemoteConsentClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Uses a surface owned by the host. The session never attaches, detaches
    /// or destroys it.
    pub fn surface(mut self, surface: Arc<dyn RenderingSurface>) -> Self {
        self.surface = Some(SurfaceSource::External(surface));
        self
    }

    /// Lets the session create, show and destroy its own surfaces.
    pub fn surface_factory(mut self, factory: Arc<dyn SurfaceFactory>) -> Self {
        self.surface = Some(SurfaceSource::Owned(factory));
        self
    }

    pub fn cookies(mut self, cookies: Arc<dyn CookieStore>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn ui(mut self, ui: Arc<dyn UiExecutor>) -> Self {
        self.ui = ui;
        self
    }

    pub fn callbacks(mut self, callbacks: Arc<dyn ConsentCallbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn build(self) -> Result<ConsentSession, ConsentLibError> {
        let kv = self
            .store
            .ok_or_else(|| ConsentLibError::BuildConfiguration("a consent store is required".into()))?;
        let source = self.surface.ok_or_else(|| {
            ConsentLibError::BuildConfiguration("a rendering surface is required".into())
        })?;
        let client = match self.client {
            Some(client) => client,
            None => Arc::new(HttpConsentClient::new(
                &self.config,
                Arc::clone(&self.connectivity),
            )?),
        };

        let store = ConsentStore::new(kv);
        let surface = match &source {
            SurfaceSource::External(surface) => Arc::clone(surface),
            SurfaceSource::Owned(factory) => factory.create(),
        };
        let channel = MessageChannel::new(
            surface,
            Arc::clone(&self.connectivity),
            Arc::clone(&self.cookies),
            self.config.page_load_timeout,
        );

        Ok(ConsentSession {
            eu_consent: store.eu_consent(),
            consent_uuid: store.consent_uuid(),
            config: self.config,
            store,
            client,
            connectivity: self.connectivity,
            cookies: self.cookies,
            ui: self.ui,
            callbacks: self.callbacks,
            source,
            channel: Some(channel),
            state: SessionState::Idle,
            will_show_message: false,
            choice_type: None,
            error: None,
        })
    }
}

/// Drives the consent flow for one site configuration.
pub struct ConsentSession {
    config: SessionConfig,
    store: ConsentStore,
    client: Arc<dyn RemoteConsentClient>,
    connectivity: Arc<dyn Connectivity>,
    cookies: Arc<dyn CookieStore>,
    ui: Arc<dyn UiExecutor>,
    callbacks: Arc<dyn ConsentCallbacks>,
    source: SurfaceSource,
    channel: Option<MessageChannel>,
    state: SessionState,
    will_show_message: bool,
    choice_type: Option<i32>,
    error: Option<ConsentLibError>,
    eu_consent: Option<String>,
    consent_uuid: Option<String>,
}

impl ConsentSession {
    pub fn builder(config: SessionConfig) -> ConsentSessionBuilder {
        ConsentSessionBuilder {
            config,
            store: None,
            client: None,
            connectivity: Arc::new(AlwaysConnected),
            surface: None,
            cookies: Arc::new(NoCookies),
            ui: Arc::new(InlineUi),
            callbacks: Arc::new(NoCallbacks),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &ConsentStore {
        &self.store
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn eu_consent(&self) -> Option<&str> {
        self.eu_consent.as_deref()
    }

    pub fn consent_uuid(&self) -> Option<&str> {
        self.consent_uuid.as_deref()
    }

    /// The last choice the user selected in the current run.
    pub fn choice_type(&self) -> Option<i32> {
        self.choice_type
    }

    pub fn will_show_message(&self) -> bool {
        self.will_show_message
    }

    /// The error which ended the current run, if any.
    pub fn error(&self) -> Option<&ConsentLibError> {
        self.error.as_ref()
    }

    /// Runs the consent flow until it finishes.
    ///
    /// Errors raised while the flow is in progress are reported through
    /// [`ConsentCallbacks::on_error_occurred`] and end the run. Only failures
    /// which prevent the flow from starting at all are returned.
    ///
    /// Taking `&mut self` rules out overlapping runs on the same session.
    pub async fn run(&mut self) -> Result<(), ConsentLibError> {
        let channel = self.ensure_channel()?;
        self.state = SessionState::Idle;
        self.will_show_message = false;
        self.choice_type = None;
        self.error = None;

        self.store.mark_cmp_present()?;
        self.fetch_gdpr_status();

        let (sender, mut events) = mpsc::unbounded_channel();
        channel.connect(Arc::new(EventSender(sender)));
        self.transition(SessionState::AwaitingMessage);

        let loaded = self
            .client
            .message_url(&self.config)
            .and_then(|url| channel.load_message(&url));
        if let Err(error) = loaded {
            self.fail(error);
            self.finish();
            return Ok(());
        }

        let mut message_timeout: Option<Pin<Box<Sleep>>> =
            Some(Box::pin(tokio::time::sleep(self.config.message_timeout)));

        loop {
            let event = match message_timeout.as_mut() {
                Some(timeout) => tokio::select! {
                    () = timeout.as_mut() => None,
                    event = events.recv() => Some(event),
                },
                None => Some(events.recv().await),
            };

            let flow = match event {
                None => {
                    self.transition(SessionState::TimedOut);
                    self.fail(ConsentLibError::Timeout);
                    ControlFlow::Break(())
                }
                Some(None) => {
                    self.fail(ConsentLibError::api("message bridge closed"));
                    ControlFlow::Break(())
                }
                Some(Some(event)) => self.handle(event, &channel),
            };

            if self.state != SessionState::AwaitingMessage {
                message_timeout = None;
            }
            if flow.is_break() {
                break;
            }
        }

        self.finish();
        Ok(())
    }

    fn ensure_channel(&mut self) -> Result<MessageChannel, ConsentLibError> {
        if let Some(channel) = &self.channel {
            return Ok(channel.clone());
        }
        match &self.source {
            SurfaceSource::External(_) => Err(ConsentLibError::SessionDestroyed),
            SurfaceSource::Owned(factory) => {
                debug!("building a new rendering surface");
                let channel = MessageChannel::new(
                    factory.create(),
                    Arc::clone(&self.connectivity),
                    Arc::clone(&self.cookies),
                    self.config.page_load_timeout,
                );
                self.channel = Some(channel.clone());
                Ok(channel)
            }
        }
    }

    fn fetch_gdpr_status(&self) {
        if self.store.subject_to_gdpr() != GdprStatus::Unset {
            return;
        }

        let client = Arc::clone(&self.client);
        let store = self.store.clone();
        tokio::spawn(async move {
            match client.gdpr_status().await {
                Ok(applies) => {
                    if let Err(e) = store.set_subject_to_gdpr(applies) {
                        warn!(error = %e, "could not store gdpr status");
                    }
                }
                // left unset, so the next run asks again
                Err(e) => debug!(error = %e, "dropping gdpr status failure"),
            }
        });
    }

    fn transition(&mut self, state: SessionState) {
        debug!(from = %self.state, to = %state, "session state");
        self.state = state;
    }

    fn handle(&mut self, event: BridgeEvent, channel: &MessageChannel) -> ControlFlow<()> {
        match event {
            BridgeEvent::MessageReady(will_show_message) => {
                if self.state != SessionState::AwaitingMessage {
                    debug!(state = %self.state, "ignoring repeated message ready");
                    return ControlFlow::Continue(());
                }
                self.transition(SessionState::MessageReady);
                self.will_show_message = will_show_message;
                let callbacks = Arc::clone(&self.callbacks);
                callbacks.on_message_ready(self);

                if will_show_message {
                    self.display(channel);
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(())
                }
            }
            BridgeEvent::ChoiceSelect(choice_type) => {
                debug!(choice_type, "message choice selected");
                self.choice_type = Some(choice_type);
                let callbacks = Arc::clone(&self.callbacks);
                callbacks.on_message_choice_select(self);
                ControlFlow::Continue(())
            }
            BridgeEvent::Error(error) => {
                self.fail(error);
                ControlFlow::Break(())
            }
            BridgeEvent::InteractionComplete {
                eu_consent,
                consent_uuid,
            } => {
                if let Err(error) = self.complete_interaction(eu_consent, consent_uuid) {
                    self.fail(error);
                }
                ControlFlow::Break(())
            }
        }
    }

    fn fail(&mut self, error: ConsentLibError) {
        warn!(
            account_id = self.config.account_id,
            site = %self.config.site_name,
            %error,
            "consent session failed"
        );
        if self.state != SessionState::TimedOut {
            self.transition(SessionState::ErrorOccurred);
        }
        self.error = Some(error);
        let callbacks = Arc::clone(&self.callbacks);
        callbacks.on_error_occurred(self);
    }

    /// Keeps defined values in memory, and persists them along with the
    /// derived IAB strings once both are known. Nothing is persisted when the
    /// consent string cannot be decoded.
    fn complete_interaction(
        &mut self,
        eu_consent: Option<String>,
        consent_uuid: Option<String>,
    ) -> Result<(), ConsentLibError> {
        let eu_consent = eu_consent.filter(|s| is_defined(s));
        let consent_uuid = consent_uuid.filter(|s| is_defined(s));

        if let (Some(eu_consent), Some(consent_uuid)) = (&eu_consent, &consent_uuid) {
            let record = VendorConsent::decode(eu_consent)?;
            self.store.set_eu_consent(eu_consent)?;
            self.store.set_consent_uuid(consent_uuid)?;
            self.store.set_iab_consent(eu_consent, &record)?;
            info!(%consent_uuid, "consent stored");
        }

        if eu_consent.is_some() {
            self.eu_consent = eu_consent;
        }
        if consent_uuid.is_some() {
            self.consent_uuid = consent_uuid;
        }
        Ok(())
    }

    fn display(&self, channel: &MessageChannel) {
        if let SurfaceSource::Owned(_) = self.source {
            let surface = Arc::clone(channel.surface());
            self.ui.run_on_ui(Box::new(move || {
                surface.display();
                surface.attach();
            }));
        }
    }

    fn finish(&mut self) {
        if let SurfaceSource::Owned(_) = self.source {
            self.release_surface();
        }
        self.transition(SessionState::Finished);
        info!(
            account_id = self.config.account_id,
            site = %self.config.site_name,
            "consent session finished"
        );
        let callbacks = Arc::clone(&self.callbacks);
        callbacks.on_interaction_complete(self);
    }

    fn release_surface(&mut self) {
        let Some(channel) = self.channel.take() else {
            return;
        };
        if let SurfaceSource::Owned(_) = self.source {
            let surface = Arc::clone(channel.surface());
            self.ui.run_on_ui(Box::new(move || {
                surface.detach();
                surface.destroy();
            }));
        }
    }

    /// Releases the rendering surface.
    ///
    /// A surface created by the session is destroyed, and the next run builds
    /// a new one. A host supplied surface is left alone and the session
    /// cannot run anymore.
    pub fn destroy(&mut self) {
        self.release_surface();
    }

    async fn site_id(&self) -> Result<String, ConsentLibError> {
        let account_id = self.config.account_id;
        let site_name = &self.config.site_name;
        if let Some(site_id) = self.store.site_id(account_id, site_name) {
            return Ok(site_id);
        }

        let site_id = self.client.site_id(account_id, site_name).await?;
        self.store.set_site_id(account_id, site_name, &site_id)?;
        Ok(site_id)
    }

    async fn load_and_store_custom_consents(
        &self,
        vendor_ids: &[String],
    ) -> Result<Vec<CustomConsent>, ConsentLibError> {
        let site_id = self.site_id().await?;
        let consents = self
            .client
            .custom_consents(
                self.consent_uuid.as_deref(),
                self.eu_consent.as_deref(),
                &site_id,
                vendor_ids,
            )
            .await?;
        self.store.clear_custom_consents(vendor_ids)?;
        self.store.refresh_custom_consents(&consents)?;
        Ok(consents)
    }

    /// The custom vendors among `vendor_ids` the user consented to.
    pub async fn get_custom_vendor_consents(
        &self,
        vendor_ids: &[String],
    ) -> Result<Vec<CustomVendorConsent>, ConsentLibError> {
        let consents = self.load_and_store_custom_consents(vendor_ids).await?;
        Ok(consents
            .iter()
            .filter_map(CustomConsent::as_vendor)
            .cloned()
            .collect())
    }

    /// The custom purposes the user consented to.
    pub async fn get_custom_purpose_consents(
        &self,
    ) -> Result<Vec<CustomPurposeConsent>, ConsentLibError> {
        let consents = self.load_and_store_custom_consents(&[]).await?;
        Ok(consents
            .iter()
            .filter_map(CustomConsent::as_purpose)
            .cloned()
            .collect())
    }

    fn stored_consent(&self) -> Result<VendorConsent, ConsentLibError> {
        let raw = self
            .store
            .consent_string()
            .ok_or(ConsentLibError::MissingConsentString)?;
        Ok(VendorConsent::decode(&raw)?)
    }

    /// Whether each of the IAB vendors in `vendor_ids` is allowed by the
    /// stored consent string.
    pub fn get_iab_vendor_consents(&self, vendor_ids: &[i32]) -> Result<Vec<bool>, ConsentLibError> {
        let consent = self.stored_consent()?;
        Ok(vendor_ids
            .iter()
            .map(|&id| consent.is_vendor_allowed(id))
            .collect())
    }

    pub fn get_iab_purpose_consents(
        &self,
        purpose_ids: &[i32],
    ) -> Result<Vec<bool>, ConsentLibError> {
        let consent = self.stored_consent()?;
        Ok(purpose_ids
            .iter()
            .map(|&id| consent.is_purpose_allowed(id))
            .collect())
    }
}

impl Drop for ConsentSession {
    fn drop(&mut self) {
        self.release_surface();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::BridgeReceiver;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use url::Url;

    #[derive(Default)]
    struct Surface {
        bridge: Mutex<Option<BridgeReceiver>>,
    }

    impl RenderingSurface for Surface {
        fn install_bridge(&self, bridge: BridgeReceiver) {
            *self.bridge.lock() = Some(bridge);
        }
        fn load_blank(&self) {}
        fn load_url(&self, _url: &Url) {
            if let Some(bridge) = self.bridge.lock().as_ref() {
                bridge.on_receive_message_data(false, "{}");
            }
        }
        fn display(&self) {}
        fn attach(&self) {}
        fn detach(&self) {}
        fn destroy(&self) {}
    }

    struct Client;

    #[async_trait]
    impl RemoteConsentClient for Client {
        async fn gdpr_status(&self) -> Result<bool, ConsentLibError> {
            Ok(true)
        }

        async fn site_id(&self, _: u32, _: &str) -> Result<String, ConsentLibError> {
            Ok("123".into())
        }

        async fn custom_consents(
            &self,
            _: Option<&str>,
            _: Option<&str>,
            _: &str,
            _: &[String],
        ) -> Result<Vec<CustomConsent>, ConsentLibError> {
            Ok(vec![])
        }
    }

    fn config() -> SessionConfig {
        SessionConfig::builder()
            .account_id(22)
            .site_name("mobile.demo")
            .build()
            .unwrap()
    }

    #[test]
    fn store_is_required() {
        let result = ConsentSession::builder(config())
            .surface(Arc::new(Surface::default()))
            .client(Arc::new(Client))
            .build();

        assert!(matches!(result, Err(ConsentLibError::BuildConfiguration(_))));
    }

    #[test]
    fn surface_is_required() {
        let result = ConsentSession::builder(config())
            .store(Arc::new(MemoryStore::new()))
            .client(Arc::new(Client))
            .build();

        assert!(matches!(result, Err(ConsentLibError::BuildConfiguration(_))));
    }

    #[test]
    fn consent_is_loaded_from_store() {
        let kv = Arc::new(MemoryStore::new());
        let store = ConsentStore::new(kv.clone());
        store.set_eu_consent("BOEF").unwrap();
        store.set_consent_uuid("uuid-1").unwrap();

        let session = ConsentSession::builder(config())
            .store(kv)
            .surface(Arc::new(Surface::default()))
            .client(Arc::new(Client))
            .build()
            .unwrap();

        assert_eq!(session.eu_consent(), Some("BOEF"));
        assert_eq!(session.consent_uuid(), Some("uuid-1"));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn message_not_shown_finishes_run() {
        let mut session = ConsentSession::builder(config())
            .store(Arc::new(MemoryStore::new()))
            .surface(Arc::new(Surface::default()))
            .client(Arc::new(Client))
            .build()
            .unwrap();

        session.run().await.unwrap();

        assert_eq!(session.state(), SessionState::Finished);
        assert!(!session.will_show_message());
        assert!(session.error().is_none());
        assert!(session.store().is_cmp_present());
    }

    #[test]
    fn placeholder_values_are_undefined() {
        assert!(!is_defined("undefined"));
        assert!(is_defined("BOEF"));
    }

    #[test]
    fn state_display() {
        assert_eq!(SessionState::AwaitingMessage.to_string(), "AwaitingMessage");
    }
}
