use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::str::FromStr;
use std::sync::Arc;

use onecard_bridge::reader::{Adapter, DiscoveryCallback, ReaderFlags, SessionState};
use onecard_bridge::HostBridge;
use serde::Serialize;
use tracing::debug;

#[derive(Clone, Debug, thiserror::Error)]
pub enum ParseStepError {
    #[error("Unknown step: {0} (expected resume, pause, attach, link:<uri>, adapter:on or adapter:off)")]
    Unknown(String),
}

/// A single event on the host timeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Resume,
    Pause,
    Attach,
    Link(String),
    Adapter(bool),
}

impl FromStr for Step {
    type Err = ParseStepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "resume" => Self::Resume,
            "pause" => Self::Pause,
            "attach" => Self::Attach,
            "adapter:on" => Self::Adapter(true),
            "adapter:off" => Self::Adapter(false),
            _ => match s.strip_prefix("link:") {
                Some(link) => Self::Link(link.to_owned()),
                None => return Err(ParseStepError::Unknown(s.to_owned())),
            },
        })
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resume => f.write_str("resume"),
            Self::Pause => f.write_str("pause"),
            Self::Attach => f.write_str("attach"),
            Self::Link(link) => write!(f, "link:{}", link),
            Self::Adapter(true) => f.write_str("adapter:on"),
            Self::Adapter(false) => f.write_str("adapter:off"),
        }
    }
}

/// An in-memory reader adapter.
pub struct MemoryAdapter {
    enabled: bool,
    listening: Option<ReaderFlags>,
}

impl MemoryAdapter {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            listening: None,
        }
    }
}

impl Adapter for MemoryAdapter {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn enable_listening(&mut self, _: Arc<dyn DiscoveryCallback>, flags: ReaderFlags) {
        debug!("Reader mode enabled: {:?}", flags);
        self.listening = Some(flags);
    }

    fn disable_listening(&mut self) {
        debug!("Reader mode disabled");
        self.listening = None;
    }
}

#[derive(Debug, Serialize)]
pub struct Frame {
    pub step: String,
    pub reader: SessionState,
    pub listening_flags: Option<u32>,
    pub attached: bool,
    pub pending: Option<String>,
    pub delivered: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub initial_link: Option<String>,
    pub frames: Vec<Frame>,
}

type Sink = Box<dyn FnMut(&str)>;

/// Replays the steps against a fresh bridge, recording the observable state after each one.
pub fn replay(adapter: Option<MemoryAdapter>, launch: Option<&str>, steps: &[Step]) -> Report {
    let adapter = Cell::new(adapter);
    let mut bridge = HostBridge::<MemoryAdapter, Sink>::create(&|| adapter.take(), launch);
    let deliveries = Rc::new(RefCell::new(Vec::<String>::new()));
    let mut frames = Vec::with_capacity(steps.len());

    for step in steps {
        match step {
            Step::Resume => bridge.on_resume(),
            Step::Pause => bridge.on_pause(),
            Step::Attach => {
                let deliveries = Rc::clone(&deliveries);
                bridge.register_consumer(Box::new(move |link: &str| {
                    deliveries.borrow_mut().push(link.to_owned())
                }));
            }
            Step::Link(link) => bridge.on_new_intent(Some(link.as_str())),
            Step::Adapter(enabled) => {
                if let Some(adapter) = bridge.reader_mut().adapter_mut() {
                    adapter.enabled = *enabled;
                }
            }
        }

        frames.push(Frame {
            step: step.to_string(),
            reader: bridge.reader().state(),
            listening_flags: bridge
                .reader()
                .adapter()
                .and_then(|a| a.listening)
                .map(|f| f.bits()),
            attached: bridge.router().is_attached(),
            pending: bridge.router().pending_event().map(|e| e.raw().to_owned()),
            delivered: deliveries.borrow_mut().drain(..).collect(),
        });
    }

    Report {
        initial_link: bridge.initial_link().map(ToOwned::to_owned),
        frames,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(s: &[&str]) -> Vec<Step> {
        s.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn test_parse_step() {
        assert_eq!(Step::Resume, "resume".parse().unwrap());
        assert_eq!(Step::Adapter(false), "adapter:off".parse().unwrap());
        assert_eq!(
            Step::Link("onecard://auth/x".to_owned()),
            "link:onecard://auth/x".parse().unwrap(),
        );
        assert!("suspend".parse::<Step>().is_err());
    }

    #[test]
    fn test_replay_cold_start() {
        let report = replay(
            Some(MemoryAdapter::new(true)),
            Some("onecard://auth/session?x=1"),
            &steps(&["resume", "attach", "pause"]),
        );

        assert_eq!(Some("onecard://auth/session?x=1".to_owned()), report.initial_link);
        assert_eq!(SessionState::Active, report.frames[0].reader);
        assert_eq!(Some(0x183), report.frames[0].listening_flags);
        assert_eq!(Some("onecard://auth/session?x=1".to_owned()), report.frames[0].pending);
        assert_eq!(vec!["onecard://auth/session?x=1"], report.frames[1].delivered);
        assert_eq!(SessionState::Inactive, report.frames[2].reader);
        assert_eq!(None, report.frames[2].listening_flags);
    }

    #[test]
    fn test_replay_adapter_switched_off() {
        let report = replay(
            Some(MemoryAdapter::new(true)),
            None,
            &steps(&["resume", "pause", "adapter:off", "resume"]),
        );
        let states: Vec<_> = report.frames.iter().map(|f| f.reader).collect();

        use SessionState::*;
        assert_eq!(vec![Active, Inactive, Inactive, Inactive], states);
    }

    #[test]
    fn test_replay_without_adapter() {
        let report = replay(None, None, &steps(&["adapter:on", "resume"]));

        assert_eq!(SessionState::Inactive, report.frames[1].reader);
    }
}
