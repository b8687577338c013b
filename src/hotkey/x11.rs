use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    thread,
};

use anyhow::{anyhow, Result};
use tracing::{debug, error, info, instrument, warn};
use xcb::{
    x::{self, GrabMode, Keycode, ModMask, Window},
    Connection,
};

use super::{
    chord::{Chord, ChordKey, NamedKey},
    HotkeyBackend, HotkeyListener, ListenerId,
};

type Listeners = Arc<Mutex<HashMap<(Keycode, u32), Vec<(ListenerId, HotkeyListener)>>>>;

fn keysym(key: ChordKey) -> u32 {
    match key {
        // Latin-1 keysyms match their ascii codes.
        ChordKey::Char(c) => c as u32,
        ChordKey::Function(n) => 0xffbe + (n as u32 - 1),
        ChordKey::Named(named) => match named {
            NamedKey::Space => 0x0020,
            NamedKey::Tab => 0xff09,
            NamedKey::Enter => 0xff0d,
            NamedKey::Escape => 0xff1b,
            NamedKey::Backspace => 0xff08,
            NamedKey::Delete => 0xffff,
            NamedKey::Insert => 0xff63,
            NamedKey::Home => 0xff50,
            NamedKey::End => 0xff57,
            NamedKey::PageUp => 0xff55,
            NamedKey::PageDown => 0xff56,
            NamedKey::Left => 0xff51,
            NamedKey::Up => 0xff52,
            NamedKey::Right => 0xff53,
            NamedKey::Down => 0xff54,
            NamedKey::Plus => 0x002b,
        },
    }
}

fn modifier_mask(chord: &Chord) -> ModMask {
    let mut mask = ModMask::empty();
    if chord.modifiers.ctrl {
        mask |= ModMask::CONTROL;
    }
    if chord.modifiers.shift {
        mask |= ModMask::SHIFT;
    }
    if chord.modifiers.alt {
        mask |= ModMask::N1;
    }
    if chord.modifiers.super_key {
        mask |= ModMask::N4;
    }
    mask
}

fn relevant_modifiers() -> ModMask {
    ModMask::CONTROL | ModMask::SHIFT | ModMask::N1 | ModMask::N4
}

/// Caps lock and num lock change the modifier state of a key press, so every chord is grabbed
/// with all of their combinations.
fn lock_variants() -> [ModMask; 4] {
    [
        ModMask::empty(),
        ModMask::LOCK,
        ModMask::N2,
        ModMask::LOCK | ModMask::N2,
    ]
}

struct Grab {
    keycode: Keycode,
    modifiers: ModMask,
}

/// Grabs chords on the root window and reads key presses on a dedicated thread.
pub struct LinuxHotkeyBackend {
    connection: Arc<Connection>,
    root: Window,
    keymap: HashMap<u32, Keycode>,
    listeners: Listeners,
    grabs: HashMap<ListenerId, Grab>,
    next_id: u64,
}

impl LinuxHotkeyBackend {
    pub fn new() -> Result<Self> {
        let (connection, preferred_screen) = Connection::connect(None)?;
        let setup = connection.get_setup();
        let root = setup
            .roots()
            .nth(preferred_screen.max(0) as usize)
            .ok_or_else(|| anyhow!("X11 screen {preferred_screen} doesn't exist"))?
            .root();
        let keymap = load_keymap(&connection)?;

        let connection = Arc::new(connection);
        let listeners: Listeners = Default::default();
        spawn_event_thread(connection.clone(), listeners.clone())?;

        Ok(Self {
            connection,
            root,
            keymap,
            listeners,
            grabs: HashMap::new(),
            next_id: 0,
        })
    }

    fn ungrab(&self, grab: &Grab) {
        for variant in lock_variants() {
            let result = self.connection.send_and_check_request(&x::UngrabKey {
                key: grab.keycode,
                grab_window: self.root,
                modifiers: grab.modifiers | variant,
            });
            if let Err(e) = result {
                debug!("Failed to ungrab keycode {}: {e:?}", grab.keycode);
            }
        }
    }
}

fn load_keymap(connection: &Connection) -> Result<HashMap<u32, Keycode>> {
    let setup = connection.get_setup();
    let first = setup.min_keycode();
    let count = setup.max_keycode() - first + 1;
    let reply = connection.wait_for_reply(connection.send_request(&x::GetKeyboardMapping {
        first_keycode: first,
        count,
    }))?;

    let per_keycode = reply.keysyms_per_keycode().max(1) as usize;
    let mut keymap = HashMap::new();
    for (index, keysym) in reply.keysyms().iter().enumerate() {
        if *keysym == 0 {
            continue;
        }
        let keycode = first + (index / per_keycode) as u8;
        keymap.entry(*keysym).or_insert(keycode);
    }
    Ok(keymap)
}

fn spawn_event_thread(connection: Arc<Connection>, listeners: Listeners) -> Result<()> {
    thread::Builder::new()
        .name("hotkey-x11".into())
        .spawn(move || loop {
            let event = match connection.wait_for_event() {
                Ok(event) => event,
                Err(e) => {
                    error!("X11 event loop stopped {e:?}");
                    return;
                }
            };
            let xcb::Event::X(x::Event::KeyPress(press)) = event else {
                continue;
            };
            let modifiers = press.state().bits() & relevant_modifiers().bits();
            let Ok(listeners) = listeners.lock() else {
                error!("Hotkey listeners are poisoned");
                return;
            };
            if let Some(bound) = listeners.get(&(press.detail(), modifiers)) {
                for (_, listener) in bound {
                    listener.fire();
                }
            }
        })?;
    Ok(())
}

impl HotkeyBackend for LinuxHotkeyBackend {
    #[instrument(skip(self, listener))]
    fn register(&mut self, chord: &Chord, listener: HotkeyListener) -> Result<ListenerId> {
        let keycode = *self
            .keymap
            .get(&keysym(chord.key))
            .ok_or_else(|| anyhow!("No key on this keyboard produces {chord}"))?;
        let grab = Grab {
            keycode,
            modifiers: modifier_mask(chord),
        };

        for variant in lock_variants() {
            let result = self.connection.send_and_check_request(&x::GrabKey {
                owner_events: true,
                grab_window: self.root,
                modifiers: grab.modifiers | variant,
                key: keycode,
                pointer_mode: GrabMode::Async,
                keyboard_mode: GrabMode::Async,
            });
            if let Err(e) = result {
                self.ungrab(&grab);
                return Err(anyhow!("Couldn't grab {chord}, it's probably taken: {e:?}"));
            }
        }

        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners
            .lock()
            .map_err(|_| anyhow!("Hotkey listeners are poisoned"))?
            .entry((keycode, grab.modifiers.bits()))
            .or_default()
            .push((id, listener));
        self.grabs.insert(id, grab);
        info!("Grabbed {chord}");
        Ok(id)
    }

    #[instrument(skip(self))]
    fn unregister(&mut self, id: ListenerId) -> Result<()> {
        let grab = self
            .grabs
            .remove(&id)
            .ok_or_else(|| anyhow!("{id:?} is not registered"))?;
        self.ungrab(&grab);

        let mut listeners = self
            .listeners
            .lock()
            .map_err(|_| anyhow!("Hotkey listeners are poisoned"))?;
        let slot = (grab.keycode, grab.modifiers.bits());
        if let Some(bound) = listeners.get_mut(&slot) {
            bound.retain(|(v, _)| *v != id);
            if bound.is_empty() {
                listeners.remove(&slot);
            }
        } else {
            warn!("{id:?} had no listener");
        }
        Ok(())
    }
}
