//! Holding the contactless reader while the host is in foreground.
//!
//! ## Why hold the reader at all?
//! When a card is tapped while no one listens in reader mode, the platform dispatches the tag
//! to its default handler, which may launch another application or play a sound. The bridge
//! does not read the card by itself (the consumer talks to the card through its own channel),
//! but it keeps the reader claimed by installing a discovery callback that drops every tag.
//! Removing that callback changes behaviour: competing handlers start to fire again.
//!
//! ## Usage
//! ```rust
//! use std::sync::Arc;
//!
//! use onecard_bridge::reader::{Adapter, DiscoveryCallback, ReaderFlags, SessionState};
//! use onecard_bridge::ReaderSessionController;
//!
//! struct Nfc(bool);
//!
//! impl Adapter for Nfc {
//!     fn is_enabled(&self) -> bool { true }
//!     fn enable_listening(&mut self, _: Arc<dyn DiscoveryCallback>, _: ReaderFlags) { self.0 = true }
//!     fn disable_listening(&mut self) { self.0 = false }
//! }
//!
//! let mut controller = ReaderSessionController::new(Some(Nfc(false)));
//! controller.on_foreground_resume();
//! assert_eq!(SessionState::Active, controller.state());
//! controller.on_foreground_pause();
//! assert_eq!(SessionState::Inactive, controller.state());
//! ```

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use crate::log::{debug, info};

/// Reader technology and behaviour flags.
/// The bit values are the ones the Android platform uses for reader mode.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ReaderFlags(u32);

impl ReaderFlags {
    /// NFC-A (ISO 14443-3A).
    pub const NFC_A: Self = Self(0x1);

    /// NFC-B (ISO 14443-3B).
    pub const NFC_B: Self = Self(0x2);

    /// Skip the NDEF check, so the platform does not dispatch the tag by its content.
    pub const SKIP_NDEF_CHECK: Self = Self(0x80);

    /// Suppress the platform sound played on discovery.
    pub const NO_PLATFORM_SOUNDS: Self = Self(0x100);

    /// Flags requested for every reader session held by the bridge.
    pub const CLAIM: Self = Self(
        Self::NFC_A.0 | Self::NFC_B.0 | Self::SKIP_NDEF_CHECK.0 | Self::NO_PLATFORM_SOUNDS.0,
    );

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ReaderFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ReaderFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ReaderFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReaderFlags({:#x})", self.0)
    }
}

/// A tag detected by the adapter. Its contents are never inspected by the bridge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tag {
    id: Vec<u8>,
}

impl Tag {
    pub fn new(id: Vec<u8>) -> Self {
        Self { id }
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }
}

/// Called by the adapter when a tag is discovered, possibly on a hardware-driven thread.
pub trait DiscoveryCallback: Send + Sync {
    fn on_tag_discovered(&self, tag: &Tag);
}

/// The discovery callback installed by the controller.
///
/// It intentionally discards every tag. Its only effect is occupying the
/// "who handles a detected tag" slot of the adapter while the session is active.
#[derive(Copy, Clone, Debug, Default)]
pub struct ClaimReader;

impl DiscoveryCallback for ClaimReader {
    fn on_tag_discovered(&self, _tag: &Tag) {}
}

/// A handle to the hardware reader adapter.
pub trait Adapter {
    /// Whether the adapter is turned on by the user.
    fn is_enabled(&self) -> bool;

    /// Starts listening in reader mode, handing discovered tags to the callback.
    fn enable_listening(&mut self, callback: Arc<dyn DiscoveryCallback>, flags: ReaderFlags);

    /// Stops listening in reader mode.
    fn disable_listening(&mut self);
}

/// Gives access to the process-wide default adapter, if the device has one.
pub trait AdapterProvider {
    type Adapter: Adapter;

    fn default_adapter(&self) -> Option<Self::Adapter>;
}

impl<A, F> AdapterProvider for F
where
    A: Adapter,
    F: Fn() -> Option<A>,
{
    type Adapter = A;

    fn default_adapter(&self) -> Option<A> {
        self()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum SessionState {
    Inactive,
    Active,
}

/// An exclusive listening grant held on the adapter.
///
/// A session exists only while it is active: the controller holding it is its owner, and
/// dropping it from the controller is what deactivates it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReaderSession {
    flags: ReaderFlags,
}

impl ReaderSession {
    pub fn flags(&self) -> ReaderFlags {
        self.flags
    }
}

/// Owns the adapter handle and the reader session held on it.
pub struct ReaderSessionController<A>
where
    A: Adapter,
{
    adapter: Option<A>,
    session: Option<ReaderSession>,
}

impl<A> ReaderSessionController<A>
where
    A: Adapter,
{
    /// Creates a controller over the adapter. `None` means the device has no reader,
    /// in which case every operation is a no-op.
    pub fn new(adapter: Option<A>) -> Self {
        Self {
            adapter,
            session: None,
        }
    }

    /// Creates a controller over the default adapter of the provider.
    pub fn from_provider<P>(provider: &P) -> Self
    where
        P: AdapterProvider<Adapter = A>,
    {
        Self::new(provider.default_adapter())
    }

    /// Claims the reader when the host comes to foreground.
    /// Does nothing if a session is already held or the adapter is unavailable.
    pub fn on_foreground_resume(&mut self) {
        let Some(adapter) = self.adapter.as_mut() else {
            debug!("No reader adapter on this device");
            return;
        };

        if !adapter.is_enabled() {
            debug!("Reader adapter is disabled");

            if self.session.take().is_some() {
                info!("Dropping the reader session as the adapter became unavailable");
                adapter.disable_listening();
            }

            return;
        }

        if self.session.is_some() {
            return;
        }

        let flags = ReaderFlags::CLAIM;
        adapter.enable_listening(Arc::new(ClaimReader), flags);
        self.session = Some(ReaderSession { flags });

        info!("Reader session enabled with {:?}", flags);
    }

    /// Releases the reader when the host leaves foreground. Does nothing if no session is held.
    pub fn on_foreground_pause(&mut self) {
        if self.session.take().is_none() {
            return;
        }

        if let Some(adapter) = self.adapter.as_mut() {
            adapter.disable_listening();
        }

        info!("Reader session disabled");
    }

    pub fn state(&self) -> SessionState {
        match self.session {
            Some(_) => SessionState::Active,
            None => SessionState::Inactive,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&ReaderSession> {
        self.session.as_ref()
    }

    pub fn adapter(&self) -> Option<&A> {
        self.adapter.as_ref()
    }

    pub fn adapter_mut(&mut self) -> Option<&mut A> {
        self.adapter.as_mut()
    }
}

impl<A> Drop for ReaderSessionController<A>
where
    A: Adapter,
{
    fn drop(&mut self) {
        self.on_foreground_pause();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeAdapter {
        disabled: bool,
        listening: Option<ReaderFlags>,
        callback: Option<Arc<dyn DiscoveryCallback>>,
        enables: usize,
        disables: usize,
    }

    impl Adapter for FakeAdapter {
        fn is_enabled(&self) -> bool {
            !self.disabled
        }

        fn enable_listening(&mut self, callback: Arc<dyn DiscoveryCallback>, flags: ReaderFlags) {
            self.listening = Some(flags);
            self.callback = Some(callback);
            self.enables += 1;
        }

        fn disable_listening(&mut self) {
            self.listening = None;
            self.callback = None;
            self.disables += 1;
        }
    }

    fn controller() -> ReaderSessionController<FakeAdapter> {
        ReaderSessionController::new(Some(FakeAdapter::default()))
    }

    fn adapter(controller: &ReaderSessionController<FakeAdapter>) -> &FakeAdapter {
        controller.adapter().unwrap()
    }

    #[test]
    fn test_initial_state_is_inactive() {
        let controller = controller();

        assert_eq!(SessionState::Inactive, controller.state());
        assert!(controller.session().is_none());
        assert_eq!(0, adapter(&controller).enables);
    }

    #[test]
    fn test_resume_claims_reader_with_flags() {
        let mut controller = controller();
        controller.on_foreground_resume();

        assert!(controller.is_active());
        assert_eq!(
            Some(ReaderFlags::NFC_A
                | ReaderFlags::NFC_B
                | ReaderFlags::SKIP_NDEF_CHECK
                | ReaderFlags::NO_PLATFORM_SOUNDS),
            adapter(&controller).listening,
        );
        assert_eq!(0x183, ReaderFlags::CLAIM.bits());
    }

    #[test]
    fn test_session_exists_only_while_active() {
        let mut controller = controller();
        assert_eq!(None, controller.session());

        controller.on_foreground_resume();
        assert_eq!(
            Some(ReaderFlags::CLAIM),
            controller.session().map(|s| s.flags()),
        );

        controller.on_foreground_pause();
        assert_eq!(None, controller.session());
    }

    #[test]
    fn test_resume_is_idempotent() {
        let mut controller = controller();
        controller.on_foreground_resume();
        controller.on_foreground_resume();

        assert!(controller.is_active());
        assert_eq!(1, adapter(&controller).enables);
    }

    #[test]
    fn test_pause_releases_reader() {
        let mut controller = controller();
        controller.on_foreground_resume();
        controller.on_foreground_pause();

        assert_eq!(SessionState::Inactive, controller.state());
        assert_eq!(None, adapter(&controller).listening);
        assert_eq!(1, adapter(&controller).disables);
    }

    #[test]
    fn test_pause_is_idempotent() {
        let mut controller = controller();
        controller.on_foreground_pause();
        controller.on_foreground_resume();
        controller.on_foreground_pause();
        controller.on_foreground_pause();

        assert!(!controller.is_active());
        assert_eq!(1, adapter(&controller).disables);
    }

    #[test]
    fn test_absent_adapter_is_noop() {
        let mut controller = ReaderSessionController::<FakeAdapter>::new(None);
        controller.on_foreground_resume();
        assert!(!controller.is_active());

        controller.on_foreground_pause();
        assert!(!controller.is_active());
    }

    #[test]
    fn test_disabled_adapter_is_noop() {
        let mut controller = ReaderSessionController::new(Some(FakeAdapter {
            disabled: true,
            ..Default::default()
        }));
        controller.on_foreground_resume();

        assert!(!controller.is_active());
        assert_eq!(0, adapter(&controller).enables);
    }

    #[test]
    fn test_resume_drops_session_when_adapter_turned_off() {
        let mut controller = controller();
        controller.on_foreground_resume();
        controller.adapter_mut().unwrap().disabled = true;
        controller.on_foreground_resume();

        assert!(!controller.is_active());
        assert_eq!(1, adapter(&controller).disables);
    }

    #[test]
    fn test_resume_pause_resume_with_adapter_disabled() {
        let mut controller = controller();
        let mut states = vec![];

        controller.on_foreground_resume();
        states.push(controller.state());
        controller.on_foreground_pause();
        states.push(controller.state());
        controller.adapter_mut().unwrap().disabled = true;
        controller.on_foreground_resume();
        states.push(controller.state());

        use SessionState::*;
        assert_eq!(vec![Active, Inactive, Inactive], states);
    }

    #[test]
    fn test_installed_callback_discards_tags() {
        let mut controller = controller();
        controller.on_foreground_resume();

        let callback = adapter(&controller).callback.clone().unwrap();
        callback.on_tag_discovered(&Tag::new(vec![0x04, 0xA2, 0x3B]));

        assert!(controller.is_active());
        assert_eq!(1, adapter(&controller).enables);
    }

    #[test]
    fn test_from_provider() {
        let controller = ReaderSessionController::from_provider(&|| Some(FakeAdapter::default()));
        assert!(controller.adapter().is_some());

        let controller = ReaderSessionController::from_provider(&|| None::<FakeAdapter>);
        assert!(controller.adapter().is_none());
    }

    #[test]
    fn test_flags_contains() {
        assert!(ReaderFlags::CLAIM.contains(ReaderFlags::NFC_B));
        assert!(!ReaderFlags::empty().contains(ReaderFlags::NFC_A));

        let mut flags = ReaderFlags::empty();
        flags |= ReaderFlags::NFC_A;
        assert_eq!(ReaderFlags::from_bits(0x1), flags);
    }
}
