//! Global hotkeys. Chords are stored per counter in [bindings::HotkeyStore], parsed by
//! [chord::Chord] and bound to the operating system through a [HotkeyBackend].
//! [registry::HotkeyRegistry] owns the active listeners.
//!
//! Listeners run on whatever thread the platform delivers key events on. They never touch counter
//! state: firing a listener only queues a [HotkeyEvent] for the owner of the engine.

pub mod bindings;
pub mod chord;
pub mod registry;

#[cfg(feature = "win")]
pub mod win;
#[cfg(feature = "x11")]
pub mod x11;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use chord::Chord;

/// A hotkey was pressed for the counter `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotkeyEvent {
    pub key: Arc<str>,
}

/// Sink for [HotkeyEvent]s, drained by the event loop that owns the engine.
pub type HotkeyDispatch = UnboundedSender<HotkeyEvent>;

/// The action attached to a single chord. The counter key is fixed when the listener is created.
#[derive(Debug, Clone)]
pub struct HotkeyListener {
    key: Arc<str>,
    dispatch: HotkeyDispatch,
}

impl HotkeyListener {
    pub fn new(key: &str, dispatch: HotkeyDispatch) -> Self {
        Self {
            key: key.into(),
            dispatch,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Queues an increment for the listener's counter. Safe to call from any thread.
    pub fn fire(&self) {
        debug!("Hotkey fired for {}", self.key);
        if self
            .dispatch
            .send(HotkeyEvent {
                key: self.key.clone(),
            })
            .is_err()
        {
            warn!("Hotkey for {} fired after the event loop stopped", self.key);
        }
    }
}

/// Identifies a listener registered with a [HotkeyBackend].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// Contract platform specific hotkey implementations must fulfil.
#[cfg_attr(test, mockall::automock)]
pub trait HotkeyBackend {
    /// Starts listening for `chord` system wide. Fails if the chord can't be grabbed, for example
    /// because something else already owns it.
    fn register(&mut self, chord: &Chord, listener: HotkeyListener) -> Result<ListenerId>;

    /// Stops a listener created by [HotkeyBackend::register].
    fn unregister(&mut self, id: ListenerId) -> Result<()>;
}

/// Serves as a cross-compatible HotkeyBackend implementation.
pub struct GenericHotkeyBackend {
    inner: Box<dyn HotkeyBackend>,
}

impl GenericHotkeyBackend {
    pub fn new() -> Result<Self> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "win")] {
                use win::WindowsHotkeyBackend;
                Ok(Self {
                    inner: Box::new(WindowsHotkeyBackend::new()?),
                })
            }
            else if #[cfg(feature = "x11")] {
                use x11::LinuxHotkeyBackend;
                Ok(Self {
                    inner: Box::new(LinuxHotkeyBackend::new()?),
                })
            }
            else {
                Err(anyhow::anyhow!(
                    "No hotkey backend was compiled in, enable the `win` or `x11` feature"
                ))
            }
        }
    }
}

impl HotkeyBackend for GenericHotkeyBackend {
    fn register(&mut self, chord: &Chord, listener: HotkeyListener) -> Result<ListenerId> {
        self.inner.register(chord, listener)
    }

    fn unregister(&mut self, id: ListenerId) -> Result<()> {
        self.inner.unregister(id)
    }
}
