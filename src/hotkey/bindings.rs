use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
    error::{Error, Result},
    fs::operations::{read_json, write_json_atomic, FileGroupLock},
};

use super::chord::{validate_chord, Chord};

const HOTKEYS_FILE: &str = "hotkeys.json";
const LOCK_FILE: &str = ".hotkeys.lock";

/// Counter key to chord. Only counters with a hotkey are present.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HotkeyBindings(BTreeMap<String, String>);

impl HotkeyBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `chord` to `key`. A blank chord removes the binding, anything else has to parse as
    /// a [Chord].
    pub fn set(&mut self, key: &str, chord: &str) -> Result<()> {
        let chord = chord.trim();
        if chord.is_empty() {
            self.0.remove(key);
            return Ok(());
        }
        chord.parse::<Chord>()?;
        self.0.insert(key.into(), chord.into());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Drops bindings whose key doesn't satisfy `keep`, returning the dropped keys.
    pub fn retain_keys(&mut self, keep: impl Fn(&str) -> bool) -> Vec<String> {
        let removed = self
            .0
            .keys()
            .filter(|v| !keep(v.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        for key in removed.iter() {
            self.0.remove(key);
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HotkeyBindings {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Persists [HotkeyBindings] as a json mapping.
pub struct HotkeyStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl HotkeyStore {
    pub fn new(dir: &Path) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(HOTKEYS_FILE),
            lock_path: dir.join(LOCK_FILE),
        })
    }

    /// Loads saved bindings. A missing file means no hotkeys, an unreadable one or one containing
    /// forbidden characters is [Error::ConfigCorrupt]. Chords that still don't parse are dropped.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<HotkeyBindings> {
        let lock = FileGroupLock::shared(&self.lock_path).await?;
        let loaded = read_json::<HotkeyBindings>(&self.path).await;
        lock.release().await?;

        let mut bindings = loaded?.unwrap_or_default();
        if let Some((_, chord)) = bindings.iter().find(|(_, chord)| !validate_chord(chord)) {
            return Err(Error::corrupt(
                &self.path,
                format!("{chord:?} is not a valid chord"),
            ));
        }

        let unusable = bindings
            .iter()
            .filter(|(_, chord)| chord.parse::<Chord>().is_err())
            .map(|(key, _)| key.to_string())
            .collect::<Vec<_>>();
        if !unusable.is_empty() {
            warn!("Ignoring hotkeys that don't name a single key {unusable:?}");
            bindings.retain_keys(|key| !unusable.iter().any(|v| v == key));
        }
        Ok(bindings)
    }

    #[instrument(skip_all)]
    pub async fn save(&self, bindings: &HotkeyBindings) -> Result<()> {
        let lock = FileGroupLock::exclusive(&self.lock_path).await?;
        let result = write_json_atomic(&self.path, bindings).await;
        lock.release().await?;
        result?;
        info!("Saved {} hotkeys", bindings.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;

    use crate::{
        error::Error,
        hotkey::bindings::{HotkeyBindings, HotkeyStore, HOTKEYS_FILE},
    };

    #[test]
    fn test_set_and_clear() -> Result<()> {
        let mut bindings = HotkeyBindings::new();
        bindings.set("patrol", " ctrl+1 ")?;
        assert_eq!(bindings.get("patrol"), Some("ctrl+1"));

        bindings.set("patrol", "")?;
        assert_eq!(bindings.get("patrol"), None);

        assert!(matches!(
            bindings.set("room", "ctrl+;"),
            Err(Error::InvalidChord(_))
        ));
        for chord in ["ctrl+banana", "ctrl+shift", "ctrl+a+b", "+"] {
            assert!(matches!(
                bindings.set("room", chord),
                Err(Error::InvalidChord(_))
            ));
        }
        assert!(bindings.is_empty());
        Ok(())
    }

    #[test]
    fn test_retain_keys() {
        let mut bindings: HotkeyBindings = [("patrol", "ctrl+1"), ("btn_gone", "ctrl+2")]
            .into_iter()
            .collect();
        let removed = bindings.retain_keys(|v| v != "btn_gone");
        assert_eq!(removed, vec!["btn_gone".to_string()]);
        assert_eq!(bindings.len(), 1);
    }

    #[tokio::test]
    async fn test_store_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let store = HotkeyStore::new(dir.path())?;
        assert!(store.load().await?.is_empty());

        let bindings: HotkeyBindings = [("patrol", "ctrl+1"), ("room", "alt+e")]
            .into_iter()
            .collect();
        store.save(&bindings).await?;
        let first = std::fs::read(dir.path().join(HOTKEYS_FILE))?;

        let loaded = store.load().await?;
        assert_eq!(loaded, bindings);
        store.save(&loaded).await?;
        assert_eq!(std::fs::read(dir.path().join(HOTKEYS_FILE))?, first);
        Ok(())
    }

    #[tokio::test]
    async fn test_store_rejects_invalid_chord() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join(HOTKEYS_FILE), r#"{ "patrol": "ctrl+;" }"#)?;
        let store = HotkeyStore::new(dir.path())?;

        assert!(matches!(
            store.load().await,
            Err(Error::ConfigCorrupt { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_store_drops_unusable_chords() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(
            dir.path().join(HOTKEYS_FILE),
            r#"{ "patrol": "ctrl+banana", "room": "ctrl+shift", "gmp": "alt+g" }"#,
        )?;
        let store = HotkeyStore::new(dir.path())?;

        let loaded = store.load().await?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("gmp"), Some("alt+g"));
        Ok(())
    }
}
