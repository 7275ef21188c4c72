//! Routing activation links to the consumer.
//!
//! The router keeps a single pending slot rather than a queue: when several eligible links
//! arrive before the consumer attaches, only the newest one is delivered.

use crate::activation::ActivationEvent;
use crate::log::debug;

/// The consumer of activation links.
/// Each delivered link is handed over exactly once, on the thread owning the router.
pub trait ConsumerSink {
    fn deliver(&mut self, link: &str);
}

impl<F> ConsumerSink for F
where
    F: FnMut(&str),
{
    fn deliver(&mut self, link: &str) {
        self(link)
    }
}

pub struct ActivationEventRouter<S>
where
    S: ConsumerSink,
{
    sink: Option<S>,
    pending: Option<ActivationEvent>,
}

impl<S> Default for ActivationEventRouter<S>
where
    S: ConsumerSink,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ActivationEventRouter<S>
where
    S: ConsumerSink,
{
    pub fn new() -> Self {
        Self {
            sink: None,
            pending: None,
        }
    }

    /// Attaches the consumer, replacing any previous one, then flushes the pending link.
    pub fn register_consumer(&mut self, sink: S) {
        let sink = self.sink.insert(sink);
        debug!("Consumer registered");

        if let Some(event) = self.pending.take() {
            debug!("Flushing pending activation link");
            sink.deliver(event.raw());
        }
    }

    /// Handles a link received while the host is already running.
    pub fn on_external_event(&mut self, raw: &str) {
        self.accept(raw)
    }

    /// Handles the link the host was launched with.
    pub fn capture_cold_start_event(&mut self, raw: &str) {
        self.accept(raw)
    }

    pub fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    pub fn pending_event(&self) -> Option<&ActivationEvent> {
        self.pending.as_ref()
    }

    pub fn sink(&self) -> Option<&S> {
        self.sink.as_ref()
    }

    fn accept(&mut self, raw: &str) {
        let event = match ActivationEvent::parse(raw) {
            Ok(event) => event,
            Err(_e) => {
                debug!("Discarding activation link: {}", _e);
                return;
            }
        };

        match self.sink.as_mut() {
            Some(sink) => {
                debug!("Delivering activation link");
                sink.deliver(event.raw());
            }
            None => {
                if self.pending.replace(event).is_some() {
                    debug!("Pending activation link superseded by a newer one");
                } else {
                    debug!("Activation link buffered until a consumer attaches");
                }
            }
        }
    }
}
