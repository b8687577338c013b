use std::{fmt::Display, str::FromStr};

use crate::error::Error;

/// Checks that a chord only uses letters, digits, `+` and `-`. Spaces are ignored, and an empty
/// chord means "no hotkey" so it's always valid.
pub fn validate_chord(chord: &str) -> bool {
    chord
        .chars()
        .filter(|c| *c != ' ')
        .all(|c| c.is_alphanumeric() || c == '+' || c == '-')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Modifiers {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub super_key: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedKey {
    Space,
    Tab,
    Enter,
    Escape,
    Backspace,
    Delete,
    Insert,
    Home,
    End,
    PageUp,
    PageDown,
    Up,
    Down,
    Left,
    Right,
    Plus,
}

impl NamedKey {
    const ALL: [(&'static str, NamedKey); 16] = [
        ("space", NamedKey::Space),
        ("tab", NamedKey::Tab),
        ("enter", NamedKey::Enter),
        ("esc", NamedKey::Escape),
        ("backspace", NamedKey::Backspace),
        ("delete", NamedKey::Delete),
        ("insert", NamedKey::Insert),
        ("home", NamedKey::Home),
        ("end", NamedKey::End),
        ("pageup", NamedKey::PageUp),
        ("pagedown", NamedKey::PageDown),
        ("up", NamedKey::Up),
        ("down", NamedKey::Down),
        ("left", NamedKey::Left),
        ("right", NamedKey::Right),
        ("plus", NamedKey::Plus),
    ];

    fn parse(name: &str) -> Option<Self> {
        let name = match name {
            "return" => "enter",
            "escape" => "esc",
            "del" => "delete",
            v => v,
        };
        Self::ALL.iter().find(|v| v.0 == name).map(|v| v.1)
    }

    fn name(&self) -> &'static str {
        Self::ALL
            .iter()
            .find(|v| v.1 == *self)
            .map(|v| v.0)
            .unwrap_or("?")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChordKey {
    /// A lowercase ascii letter, a digit or `-`.
    Char(char),
    /// F1 to F24.
    Function(u8),
    Named(NamedKey),
}

/// A parsed key combination such as `ctrl+shift+2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chord {
    pub modifiers: Modifiers,
    pub key: ChordKey,
}

fn parse_key(token: &str) -> Option<ChordKey> {
    let mut chars = token.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return (c.is_ascii_alphanumeric() || c == '-').then_some(ChordKey::Char(c));
    }
    if let Some(number) = token.strip_prefix('f').and_then(|v| v.parse::<u8>().ok()) {
        return (1..=24).contains(&number).then_some(ChordKey::Function(number));
    }
    NamedKey::parse(token).map(ChordKey::Named)
}

impl FromStr for Chord {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidChord(s.to_string());
        if !validate_chord(s) {
            return Err(invalid());
        }

        let normalized = s.replace(' ', "").to_lowercase();
        let mut modifiers = Modifiers::default();
        let mut key = None;

        // "ctrl+-" splits into ["ctrl", "-"], a trailing "+" can only be spelled "plus".
        for token in normalized.split('+') {
            match token {
                "ctrl" | "control" => modifiers.ctrl = true,
                "shift" => modifiers.shift = true,
                "alt" | "option" => modifiers.alt = true,
                "win" | "super" | "cmd" | "meta" => modifiers.super_key = true,
                token => {
                    if key.is_some() {
                        return Err(invalid());
                    }
                    key = Some(parse_key(token).ok_or_else(invalid)?);
                }
            }
        }

        Ok(Chord {
            modifiers,
            key: key.ok_or_else(invalid)?,
        })
    }
}

impl Display for Chord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Modifiers {
            ctrl,
            shift,
            alt,
            super_key,
        } = self.modifiers;
        for (enabled, name) in [(ctrl, "ctrl"), (shift, "shift"), (alt, "alt"), (super_key, "super")] {
            if enabled {
                write!(f, "{name}+")?;
            }
        }
        match self.key {
            ChordKey::Char(c) => write!(f, "{c}"),
            ChordKey::Function(n) => write!(f, "f{n}"),
            ChordKey::Named(named) => write!(f, "{}", named.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::hotkey::chord::{validate_chord, Chord, ChordKey, Modifiers, NamedKey};

    #[test]
    fn test_validate_chord() {
        assert!(validate_chord(""));
        assert!(validate_chord("ctrl+1"));
        assert!(validate_chord("shift + alt + 2"));
        assert!(validate_chord("ctrl+-"));
        assert!(!validate_chord("ctrl+;"));
        assert!(!validate_chord("ctrl\t+1"));
        assert!(!validate_chord("alt+é,"));
    }

    #[test]
    fn test_parse_chord() {
        let chord: Chord = "Ctrl + Shift + 2".parse().unwrap();
        assert_eq!(
            chord,
            Chord {
                modifiers: Modifiers {
                    ctrl: true,
                    shift: true,
                    ..Default::default()
                },
                key: ChordKey::Char('2'),
            }
        );
        assert_eq!(chord.to_string(), "ctrl+shift+2");

        assert_eq!("alt+f12".parse::<Chord>().unwrap().key, ChordKey::Function(12));
        assert_eq!(
            "super+page up".parse::<Chord>().unwrap().key,
            ChordKey::Named(NamedKey::PageUp)
        );
        assert_eq!("ctrl+-".parse::<Chord>().unwrap().key, ChordKey::Char('-'));
    }

    #[test]
    fn test_parse_chord_rejects() {
        assert!("".parse::<Chord>().is_err());
        assert!("ctrl+shift".parse::<Chord>().is_err());
        assert!("ctrl+a+b".parse::<Chord>().is_err());
        assert!("ctrl+f25".parse::<Chord>().is_err());
        assert!("ctrl+banana".parse::<Chord>().is_err());
        assert!("ctrl+;".parse::<Chord>().is_err());
    }
}
