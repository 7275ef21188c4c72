//! A crate to hold the contactless reader while the host is in foreground,
//! and to route OneCard activation links to a single consumer.

pub mod activation;
pub mod host;
pub mod reader;
pub mod router;

mod log;

pub use activation::ActivationEvent;
pub use host::HostBridge;
pub use reader::ReaderSessionController;
pub use router::ActivationEventRouter;
