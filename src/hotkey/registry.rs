use tracing::{debug, error, info, warn};

use super::{
    bindings::HotkeyBindings, chord::Chord, HotkeyBackend, HotkeyDispatch, HotkeyListener,
    ListenerId,
};

enum RegistryState {
    Unbound,
    Bound(Vec<(String, ListenerId)>),
}

/// Owns every listener installed through a [HotkeyBackend]. Installing always removes the
/// previous listener set first, so the same chord is never bound twice.
pub struct HotkeyRegistry<B: HotkeyBackend> {
    backend: B,
    state: RegistryState,
}

impl<B: HotkeyBackend> HotkeyRegistry<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: RegistryState::Unbound,
        }
    }

    /// Registers a listener for every bound chord, each dispatching its own counter key.
    /// Chords that can't be parsed or grabbed are logged and skipped. Returns the number of
    /// active listeners.
    pub fn install(&mut self, bindings: &HotkeyBindings, dispatch: &HotkeyDispatch) -> usize {
        self.uninstall();

        let mut installed = Vec::with_capacity(bindings.len());
        for (key, chord) in bindings.iter() {
            let parsed = match chord.parse::<Chord>() {
                Ok(v) => v,
                Err(e) => {
                    error!("Skipping hotkey of {key}: {e}");
                    continue;
                }
            };
            match self
                .backend
                .register(&parsed, HotkeyListener::new(key, dispatch.clone()))
            {
                Ok(id) => {
                    debug!("Bound {parsed} to {key}");
                    installed.push((key.to_string(), id));
                }
                Err(e) => error!("Failed to bind {parsed} to {key}: {e:?}"),
            }
        }

        let count = installed.len();
        info!("Installed {count} hotkeys");
        self.state = RegistryState::Bound(installed);
        count
    }

    /// Removes every installed listener. Calling it while unbound does nothing, and failures of
    /// the backend are only logged.
    pub fn uninstall(&mut self) {
        let RegistryState::Bound(listeners) =
            std::mem::replace(&mut self.state, RegistryState::Unbound)
        else {
            return;
        };

        for (key, id) in listeners {
            if let Err(e) = self.backend.unregister(id) {
                warn!("Failed to unbind hotkey of {key}: {e:?}");
            }
        }
        info!("Uninstalled hotkeys");
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.state, RegistryState::Bound(_))
    }

    pub fn active_listeners(&self) -> usize {
        match &self.state {
            RegistryState::Unbound => 0,
            RegistryState::Bound(listeners) => listeners.len(),
        }
    }
}

impl<B: HotkeyBackend> Drop for HotkeyRegistry<B> {
    fn drop(&mut self) {
        self.uninstall();
    }
}
