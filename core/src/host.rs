//! The bridge as owned by one host activity instance.

use crate::reader::{Adapter, AdapterProvider, ReaderSessionController};
use crate::router::{ActivationEventRouter, ConsumerSink};

/// Name of the channel the consumer talks to the bridge through.
pub const CHANNEL: &str = "onecard_client/deeplink";

/// Method invoked on the consumer for every delivered link.
pub const METHOD_ON_NEW_LINK: &str = "onNewLink";

/// Method the consumer calls to fetch the link the host was launched with.
pub const METHOD_GET_INITIAL_LINK: &str = "getInitialLink";

/// Result of a method call made by the consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MethodResult {
    Success(Option<String>),
    NotImplemented,
}

/// Composes the reader controller and the link router. The two share no state.
pub struct HostBridge<A, S>
where
    A: Adapter,
    S: ConsumerSink,
{
    reader: ReaderSessionController<A>,
    router: ActivationEventRouter<S>,
    initial_link: Option<String>,
}

impl<A, S> HostBridge<A, S>
where
    A: Adapter,
    S: ConsumerSink,
{
    /// Builds the bridge when the host is created, with the link it was launched with, if any.
    pub fn create<P>(provider: &P, launch_link: Option<&str>) -> Self
    where
        P: AdapterProvider<Adapter = A>,
    {
        Self::new(ReaderSessionController::from_provider(provider), launch_link)
    }

    pub fn new(reader: ReaderSessionController<A>, launch_link: Option<&str>) -> Self {
        let mut router = ActivationEventRouter::new();
        if let Some(link) = launch_link {
            router.capture_cold_start_event(link);
        }

        Self {
            reader,
            router,
            initial_link: launch_link.map(ToOwned::to_owned),
        }
    }

    pub fn on_resume(&mut self) {
        self.reader.on_foreground_resume()
    }

    pub fn on_pause(&mut self) {
        self.reader.on_foreground_pause()
    }

    /// Handles the data of an intent delivered to the running host.
    pub fn on_new_intent(&mut self, data: Option<&str>) {
        if let Some(link) = data {
            self.router.on_external_event(link);
        }
    }

    pub fn register_consumer(&mut self, sink: S) {
        self.router.register_consumer(sink)
    }

    /// The link the host was launched with, as received.
    /// Unlike routed links, this is not filtered.
    pub fn initial_link(&self) -> Option<&str> {
        self.initial_link.as_deref()
    }

    /// Answers a method call made by the consumer on [`CHANNEL`].
    pub fn handle_method_call(&self, method: &str) -> MethodResult {
        match method {
            METHOD_GET_INITIAL_LINK => MethodResult::Success(self.initial_link.clone()),
            _ => MethodResult::NotImplemented,
        }
    }

    pub fn reader(&self) -> &ReaderSessionController<A> {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut ReaderSessionController<A> {
        &mut self.reader
    }

    pub fn router(&self) -> &ActivationEventRouter<S> {
        &self.router
    }
}
