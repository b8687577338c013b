use std::{
    collections::HashMap,
    sync::mpsc::{self, Receiver, Sender},
    thread,
};

use anyhow::{anyhow, Result};
use tracing::{error, info, instrument, warn};
use windows::Win32::{
    Foundation::{HWND, LPARAM, WPARAM},
    System::Threading::GetCurrentThreadId,
    UI::{
        Input::KeyboardAndMouse::{
            RegisterHotKey, UnregisterHotKey, HOT_KEY_MODIFIERS, MOD_ALT, MOD_CONTROL,
            MOD_NOREPEAT, MOD_SHIFT, MOD_WIN,
        },
        WindowsAndMessaging::{
            GetMessageW, PeekMessageW, PostThreadMessageW, MSG, PM_NOREMOVE, WM_APP, WM_HOTKEY,
            WM_QUIT,
        },
    },
};

use super::{
    chord::{Chord, ChordKey, NamedKey},
    HotkeyBackend, HotkeyListener, ListenerId,
};

fn virtual_key(key: ChordKey) -> u32 {
    match key {
        ChordKey::Char('-') => 0xbd,
        ChordKey::Char(c) => c.to_ascii_uppercase() as u32,
        ChordKey::Function(n) => 0x70 + (n as u32 - 1),
        ChordKey::Named(named) => match named {
            NamedKey::Space => 0x20,
            NamedKey::Tab => 0x09,
            NamedKey::Enter => 0x0d,
            NamedKey::Escape => 0x1b,
            NamedKey::Backspace => 0x08,
            NamedKey::Delete => 0x2e,
            NamedKey::Insert => 0x2d,
            NamedKey::Home => 0x24,
            NamedKey::End => 0x23,
            NamedKey::PageUp => 0x21,
            NamedKey::PageDown => 0x22,
            NamedKey::Left => 0x25,
            NamedKey::Up => 0x26,
            NamedKey::Right => 0x27,
            NamedKey::Down => 0x28,
            NamedKey::Plus => 0xbb,
        },
    }
}

fn modifiers(chord: &Chord) -> HOT_KEY_MODIFIERS {
    let mut modifiers = MOD_NOREPEAT;
    if chord.modifiers.ctrl {
        modifiers |= MOD_CONTROL;
    }
    if chord.modifiers.shift {
        modifiers |= MOD_SHIFT;
    }
    if chord.modifiers.alt {
        modifiers |= MOD_ALT;
    }
    if chord.modifiers.super_key {
        modifiers |= MOD_WIN;
    }
    modifiers
}

enum Request {
    Register {
        id: i32,
        modifiers: HOT_KEY_MODIFIERS,
        virtual_key: u32,
        listener: HotkeyListener,
        reply: Sender<Result<()>>,
    },
    Unregister {
        id: i32,
        reply: Sender<Result<()>>,
    },
}

/// Hotkeys registered with `RegisterHotKey` are delivered to the message queue of the thread that
/// registered them, so every call is forwarded to a dedicated message loop thread.
pub struct WindowsHotkeyBackend {
    thread_id: u32,
    requests: Sender<Request>,
    next_id: i32,
}

impl WindowsHotkeyBackend {
    pub fn new() -> Result<Self> {
        let (requests, receiver) = mpsc::channel();
        let (thread_sender, thread_receiver) = mpsc::channel();

        thread::Builder::new()
            .name("hotkey-win".into())
            .spawn(move || message_loop(receiver, thread_sender))?;

        let thread_id = thread_receiver
            .recv()
            .map_err(|_| anyhow!("Hotkey message loop didn't start"))?;

        Ok(Self {
            thread_id,
            requests,
            next_id: 0,
        })
    }

    fn send(&self, request: Request, reply: Receiver<Result<()>>) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| anyhow!("Hotkey message loop has stopped"))?;
        unsafe { PostThreadMessageW(self.thread_id, WM_APP, WPARAM(0), LPARAM(0))? };
        reply
            .recv()
            .map_err(|_| anyhow!("Hotkey message loop has stopped"))?
    }
}

impl Drop for WindowsHotkeyBackend {
    fn drop(&mut self) {
        if let Err(e) = unsafe { PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) }
        {
            warn!("Couldn't stop hotkey message loop {e:?}");
        }
    }
}

fn message_loop(requests: Receiver<Request>, thread_sender: Sender<u32>) {
    let mut listeners = HashMap::<i32, HotkeyListener>::new();
    let mut message = MSG::default();

    // Forces the creation of this thread's message queue before anyone posts to it.
    unsafe {
        let _ = PeekMessageW(&mut message, HWND::default(), 0, 0, PM_NOREMOVE);
    }
    if thread_sender.send(unsafe { GetCurrentThreadId() }).is_err() {
        return;
    }

    loop {
        let result = unsafe { GetMessageW(&mut message, HWND::default(), 0, 0) };
        match result.0 {
            0 => break,
            -1 => {
                error!("Hotkey message loop failed");
                break;
            }
            _ => {}
        }

        match message.message {
            WM_HOTKEY => match listeners.get(&(message.wParam.0 as i32)) {
                Some(listener) => listener.fire(),
                None => warn!("Received unknown hotkey {}", message.wParam.0),
            },
            WM_APP => {
                while let Ok(request) = requests.try_recv() {
                    handle_request(request, &mut listeners);
                }
            }
            _ => {}
        }
    }

    for id in listeners.keys() {
        let _ = unsafe { UnregisterHotKey(HWND::default(), *id) };
    }
}

fn handle_request(request: Request, listeners: &mut HashMap<i32, HotkeyListener>) {
    match request {
        Request::Register {
            id,
            modifiers,
            virtual_key,
            listener,
            reply,
        } => {
            let result = unsafe { RegisterHotKey(HWND::default(), id, modifiers, virtual_key) }
                .map_err(|e| anyhow!("Couldn't register hotkey, it's probably taken: {e}"));
            if result.is_ok() {
                listeners.insert(id, listener);
            }
            let _ = reply.send(result);
        }
        Request::Unregister { id, reply } => {
            listeners.remove(&id);
            let result = unsafe { UnregisterHotKey(HWND::default(), id) }.map_err(Into::into);
            let _ = reply.send(result);
        }
    }
}

impl HotkeyBackend for WindowsHotkeyBackend {
    #[instrument(skip(self, listener))]
    fn register(&mut self, chord: &Chord, listener: HotkeyListener) -> Result<ListenerId> {
        self.next_id += 1;
        let id = self.next_id;
        let (reply, receiver) = mpsc::channel();
        self.send(
            Request::Register {
                id,
                modifiers: modifiers(chord),
                virtual_key: virtual_key(chord.key),
                listener,
                reply,
            },
            receiver,
        )?;
        info!("Registered {chord}");
        Ok(ListenerId(id as u64))
    }

    #[instrument(skip(self))]
    fn unregister(&mut self, id: ListenerId) -> Result<()> {
        let (reply, receiver) = mpsc::channel();
        self.send(
            Request::Unregister {
                id: id.0 as i32,
                reply,
            },
            receiver,
        )
    }
}
