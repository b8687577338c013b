//! [CounterEngine] is the single owner of counter state. Every mutation coming from the command
//! line or from a hotkey goes through it, so the json mappings, the hotkey file and the counter
//! table stay on the same key domain.

use std::{collections::BTreeMap, path::Path};

use tracing::{error, info, instrument, warn};

use crate::{
    error::{Error, Result},
    hotkey::bindings::{HotkeyBindings, HotkeyStore},
    storage::{
        config_store::ConfigStore,
        counter_store::{CounterStore, SqliteCounterStore},
        entities::{
            generate_key, is_builtin, CounterConfig, CounterDefinition, DefinitionInput,
            MAX_CUSTOM_DEFINITIONS, MAX_DEFINITIONS,
        },
    },
    utils::percentage::{hundred_progress, Percentage},
};

/// Name of the counter database inside the application directory.
pub const DATABASE_FILE: &str = "counters.db";

/// Sum of `count * points` over every key present in `counts`. Keys without points contribute
/// nothing. The sum saturates instead of overflowing.
pub fn weighted_total(counts: &BTreeMap<String, i64>, points: &BTreeMap<String, i64>) -> i64 {
    counts
        .iter()
        .map(|(key, count)| count.saturating_mul(points.get(key).copied().unwrap_or(0)))
        .fold(0, i64::saturating_add)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterTally {
    pub definition: CounterDefinition,
    pub count: i64,
}

impl CounterTally {
    pub fn points(&self) -> i64 {
        self.count.saturating_mul(self.definition.points)
    }
}

/// Counts of every defined counter at one point in time, in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub counters: Vec<CounterTally>,
    pub total: i64,
}

impl Snapshot {
    pub fn new(config: &CounterConfig, stored: &BTreeMap<String, i64>) -> Self {
        let counters = config
            .definitions()
            .into_iter()
            .map(|definition| CounterTally {
                count: stored.get(&definition.key).copied().unwrap_or(0),
                definition,
            })
            .collect::<Vec<_>>();
        let counts = counters
            .iter()
            .map(|v| (v.definition.key.clone(), v.count))
            .collect();
        let total = weighted_total(&counts, &config.points);
        Snapshot { counters, total }
    }

    pub fn get(&self, key: &str) -> Option<&CounterTally> {
        self.counters.iter().find(|v| v.definition.key == key)
    }

    pub fn count(&self, key: &str) -> Option<i64> {
        self.get(key).map(|v| v.count)
    }

    pub fn counts(&self) -> BTreeMap<String, i64> {
        self.counters
            .iter()
            .map(|v| (v.definition.key.clone(), v.count))
            .collect()
    }

    pub fn progress(&self) -> Percentage {
        hundred_progress(self.total)
    }
}

pub struct CounterEngine<S: CounterStore> {
    config_store: ConfigStore,
    hotkey_store: HotkeyStore,
    counters: S,
    config: CounterConfig,
    hotkeys: HotkeyBindings,
}

impl<S: CounterStore> CounterEngine<S> {
    /// Loads definitions and hotkeys and makes sure the counter table has a field for every
    /// counter.
    pub async fn open(
        config_store: ConfigStore,
        hotkey_store: HotkeyStore,
        counters: S,
    ) -> Result<Self> {
        let config = config_store.load().await?;
        let mut hotkeys = hotkey_store.load().await?;

        let stale = hotkeys.retain_keys(|key| config.contains(key));
        if !stale.is_empty() {
            warn!("Ignoring hotkeys of unknown counters {stale:?}");
        }

        counters.ensure_schema(&config.keys()).await?;
        info!("Counter engine ready with {} counters", config.len());

        Ok(Self {
            config_store,
            hotkey_store,
            counters,
            config,
            hotkeys,
        })
    }

    pub fn definitions(&self) -> Vec<CounterDefinition> {
        self.config.definitions()
    }

    pub fn definition(&self, key: &str) -> Option<CounterDefinition> {
        self.config.definition(key)
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    pub fn hotkeys(&self) -> &HotkeyBindings {
        &self.hotkeys
    }

    pub fn store(&self) -> &S {
        &self.counters
    }

    pub async fn read_all(&self) -> Result<Snapshot> {
        let stored = self.counters.read_all().await?;
        Ok(Snapshot::new(&self.config, &stored))
    }

    #[instrument(skip(self))]
    pub async fn increment(&mut self, key: &str) -> Result<Snapshot> {
        if !self.config.contains(key) {
            return Err(Error::UnknownCounter(key.into()));
        }
        self.counters.increment(key).await?;
        self.read_all().await
    }

    /// Zeroes every counter once `confirm` agrees. Returns [None] when it doesn't.
    #[instrument(skip_all)]
    pub async fn reset(&mut self, confirm: impl FnOnce() -> bool) -> Result<Option<Snapshot>> {
        if !confirm() {
            info!("Reset was not confirmed");
            return Ok(None);
        }
        self.counters.reset().await?;
        self.read_all().await.map(Some)
    }

    /// Creates a user defined counter. Its key is derived from label and color.
    #[instrument(skip(self))]
    pub async fn add_definition(&mut self, input: &DefinitionInput) -> Result<CounterDefinition> {
        if self.config.len() >= MAX_DEFINITIONS {
            return Err(Error::CapacityExceeded {
                limit: MAX_DEFINITIONS,
                what: "counters",
            });
        }
        if self.config.custom_count() >= MAX_CUSTOM_DEFINITIONS {
            return Err(Error::CapacityExceeded {
                limit: MAX_CUSTOM_DEFINITIONS,
                what: "user defined counters",
            });
        }
        let (label, points, color) = input.validated()?;
        let key = generate_key(&label, &color);
        if self.config.contains(&key) {
            return Err(Error::DuplicateKey(key));
        }

        let definition = CounterDefinition {
            key,
            label,
            points,
            color,
        };

        // The field has to exist before any persisted definition can refer to it.
        self.counters
            .ensure_schema(std::slice::from_ref(&definition.key))
            .await?;

        let mut updated = self.config.clone();
        updated.upsert(definition.clone());
        if let Err(e) = self.config_store.save(&updated).await {
            error!("Failed to save new counter {}, rolling back: {e}", definition.key);
            if let Err(drop_error) = self.counters.drop_field(&definition.key).await {
                warn!("Left an unused field {}: {drop_error}", definition.key);
            }
            return Err(e);
        }

        self.config = updated;
        info!("Added counter {}", definition.key);
        Ok(definition)
    }

    /// Overwrites label, points and color of an existing counter. Blank or unparsable values
    /// fall back to defaults instead of failing.
    #[instrument(skip(self))]
    pub async fn edit_definition(
        &mut self,
        key: &str,
        input: &DefinitionInput,
    ) -> Result<CounterDefinition> {
        if !self.config.contains(key) {
            return Err(Error::UnknownCounter(key.into()));
        }
        let (label, points, color) = input.with_fallbacks();
        let definition = CounterDefinition {
            key: key.into(),
            label,
            points,
            color,
        };

        let mut updated = self.config.clone();
        updated.upsert(definition.clone());
        self.config_store.save(&updated).await?;
        self.config = updated;
        info!("Edited counter {key}");
        Ok(definition)
    }

    /// Removes a user defined counter together with its hotkey and its field once `confirm`
    /// agrees. Returns whether the counter was removed.
    #[instrument(skip(self, confirm))]
    pub async fn delete_definition(
        &mut self,
        key: &str,
        confirm: impl FnOnce() -> bool,
    ) -> Result<bool> {
        if !self.config.contains(key) {
            return Err(Error::UnknownCounter(key.into()));
        }
        if is_builtin(key) {
            return Err(Error::ProtectedDefinition(key.into()));
        }
        if !confirm() {
            info!("Removal of {key} was not confirmed");
            return Ok(false);
        }

        let mut config = self.config.clone();
        config.remove(key);
        self.config_store.save(&config).await?;

        let mut hotkeys = self.hotkeys.clone();
        if hotkeys.remove(key).is_some() {
            if let Err(e) = self.hotkey_store.save(&hotkeys).await {
                error!("Failed to save hotkeys after removing {key}, restoring the counter: {e}");
                if let Err(restore_error) = self.config_store.save(&self.config).await {
                    error!("Failed to restore counter {key}: {restore_error}");
                }
                return Err(e);
            }
        }

        self.config = config;
        self.hotkeys = hotkeys;

        // A field without a definition is harmless, it only costs a column.
        if let Err(e) = self.counters.drop_field(key).await {
            warn!("Counter {key} removed but its field was kept: {e}");
        }
        info!("Removed counter {key}");
        Ok(true)
    }

    /// Binds `chord` to the counter `key`. A blank chord removes the hotkey.
    #[instrument(skip(self))]
    pub async fn set_hotkey(&mut self, key: &str, chord: &str) -> Result<()> {
        if !self.config.contains(key) {
            return Err(Error::UnknownCounter(key.into()));
        }
        let mut hotkeys = self.hotkeys.clone();
        hotkeys.set(key, chord)?;
        self.hotkey_store.save(&hotkeys).await?;
        self.hotkeys = hotkeys;
        Ok(())
    }

    /// Replaces every hotkey at once. Nothing is saved if any chord is invalid or any key is
    /// unknown.
    #[instrument(skip_all)]
    pub async fn replace_hotkeys(&mut self, bindings: &[(String, String)]) -> Result<()> {
        let mut hotkeys = HotkeyBindings::new();
        for (key, chord) in bindings {
            if !self.config.contains(key) {
                return Err(Error::UnknownCounter(key.clone()));
            }
            hotkeys.set(key, chord)?;
        }
        self.hotkey_store.save(&hotkeys).await?;
        self.hotkeys = hotkeys;
        Ok(())
    }
}

impl CounterEngine<SqliteCounterStore> {
    /// Opens every store kept in the application directory `dir`.
    pub async fn open_dir(dir: &Path) -> Result<Self> {
        let counters = SqliteCounterStore::new(&dir.join(DATABASE_FILE)).await?;
        Self::open(
            ConfigStore::new(dir.to_owned())?,
            HotkeyStore::new(dir)?,
            counters,
        )
        .await
    }

    pub async fn close(self) {
        self.counters.close().await;
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, path::Path};

    use anyhow::Result;
    use tempfile::tempdir;

    use crate::{
        engine::{weighted_total, CounterEngine},
        error::Error,
        storage::{
            counter_store::{CounterStore, SqliteCounterStore},
            entities::{
                CounterConfig, DefinitionInput, DEFAULT_COLOR, MAX_POINTS, PLACEHOLDER_LABEL,
            },
        },
        utils::logging::TEST_LOGGING,
    };

    async fn open_engine(dir: &Path) -> Result<CounterEngine<SqliteCounterStore>> {
        *TEST_LOGGING;
        Ok(CounterEngine::open_dir(dir).await?)
    }

    fn custom(n: usize) -> DefinitionInput {
        DefinitionInput::new(format!("Custom {n}"), "3", "#123456")
    }

    #[test]
    fn test_weighted_total() {
        let counts = BTreeMap::from([
            ("a".to_string(), 3),
            ("b".to_string(), 0),
            ("c".to_string(), 2),
        ]);
        let points = BTreeMap::from([
            ("a".to_string(), 10),
            ("b".to_string(), 7),
            ("c".to_string(), 0),
        ]);
        assert_eq!(weighted_total(&counts, &points), 30);
        assert_eq!(weighted_total(&BTreeMap::new(), &points), 0);
        assert_eq!(weighted_total(&counts, &BTreeMap::new()), 0);
    }

    #[tokio::test]
    async fn test_default_scenario() -> Result<()> {
        let dir = tempdir()?;
        let mut engine = open_engine(dir.path()).await?;

        for _ in 0..3 {
            engine.increment("patrol").await?;
        }
        let snapshot = engine.increment("room").await?;

        assert_eq!(snapshot.count("patrol"), Some(3));
        assert_eq!(snapshot.count("room"), Some(1));
        assert!(snapshot
            .counters
            .iter()
            .filter(|v| !["patrol", "room"].contains(&v.definition.key.as_str()))
            .all(|v| v.count == 0));
        assert_eq!(snapshot.total, 40);
        assert_eq!(*snapshot.progress(), 40.);
        assert_eq!(snapshot.get("patrol").map(|v| v.points()), Some(30));
        Ok(())
    }

    #[tokio::test]
    async fn test_increment_unknown_counter() -> Result<()> {
        let dir = tempdir()?;
        let mut engine = open_engine(dir.path()).await?;

        assert!(matches!(
            engine.increment("nothing").await,
            Err(Error::UnknownCounter(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_keeps_definitions_and_hotkeys() -> Result<()> {
        let dir = tempdir()?;
        let mut engine = open_engine(dir.path()).await?;
        let added = engine.add_definition(&custom(1)).await?;
        engine.set_hotkey("patrol", "ctrl+1").await?;
        engine.increment("patrol").await?;
        engine.increment(&added.key).await?;

        assert!(engine.reset(|| false).await?.is_none());
        assert_eq!(engine.read_all().await?.count("patrol"), Some(1));

        let snapshot = engine.reset(|| true).await?.unwrap();
        assert!(snapshot.counters.iter().all(|v| v.count == 0));
        assert_eq!(snapshot.total, 0);
        assert_eq!(snapshot.counters.len(), 17);
        assert_eq!(engine.hotkeys().get("patrol"), Some("ctrl+1"));
        assert_eq!(engine.definition(&added.key), Some(added));
        Ok(())
    }

    #[tokio::test]
    async fn test_add_definition() -> Result<()> {
        let dir = tempdir()?;
        let mut engine = open_engine(dir.path()).await?;

        let added = engine.add_definition(&custom(1)).await?;

        assert_eq!(engine.read_all().await?.count(&added.key), Some(0));
        assert_eq!(engine.store().read_all().await?.get(&added.key), Some(&0));
        drop(engine);

        let reopened = open_engine(dir.path()).await?;
        assert_eq!(reopened.definition(&added.key), Some(added));
        Ok(())
    }

    #[tokio::test]
    async fn test_add_definition_capacity() -> Result<()> {
        let dir = tempdir()?;
        let mut engine = open_engine(dir.path()).await?;
        for n in 0..4 {
            engine.add_definition(&custom(n)).await?;
        }
        let before = engine.config().clone();
        let stored_before = engine.store().read_all().await?;

        assert!(matches!(
            engine.add_definition(&custom(5)).await,
            Err(Error::CapacityExceeded { .. })
        ));
        assert_eq!(engine.config(), &before);
        assert_eq!(engine.store().read_all().await?, stored_before);
        Ok(())
    }

    #[tokio::test]
    async fn test_add_definition_rejects_bad_input() -> Result<()> {
        let dir = tempdir()?;
        let mut engine = open_engine(dir.path()).await?;

        assert!(matches!(
            engine
                .add_definition(&DefinitionInput::new("Label", "many", "#fff"))
                .await,
            Err(Error::InvalidDefinition(_))
        ));
        assert!(matches!(
            engine
                .add_definition(&DefinitionInput::new("", "1", "#fff"))
                .await,
            Err(Error::InvalidDefinition(_))
        ));
        assert_eq!(engine.config(), &CounterConfig::defaults());
        Ok(())
    }

    #[tokio::test]
    async fn test_add_duplicate_definition() -> Result<()> {
        let dir = tempdir()?;
        let mut engine = open_engine(dir.path()).await?;
        engine.add_definition(&custom(1)).await?;

        assert!(matches!(
            engine.add_definition(&custom(1)).await,
            Err(Error::DuplicateKey(_))
        ));
        assert_eq!(engine.config().custom_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_builtin_is_protected() -> Result<()> {
        let dir = tempdir()?;
        let mut engine = open_engine(dir.path()).await?;
        engine.increment("patrol").await?;

        assert!(matches!(
            engine.delete_definition("patrol", || true).await,
            Err(Error::ProtectedDefinition(_))
        ));
        assert_eq!(engine.config(), &CounterConfig::defaults());
        assert_eq!(engine.read_all().await?.count("patrol"), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_definition() -> Result<()> {
        let dir = tempdir()?;
        let mut engine = open_engine(dir.path()).await?;
        let added = engine.add_definition(&custom(1)).await?;
        engine.set_hotkey(&added.key, "ctrl+9").await?;
        engine.increment(&added.key).await?;

        assert!(!engine.delete_definition(&added.key, || false).await?);
        assert!(engine.definition(&added.key).is_some());

        assert!(engine.delete_definition(&added.key, || true).await?);
        assert!(engine.definition(&added.key).is_none());
        assert!(engine.hotkeys().get(&added.key).is_none());
        assert!(!engine.store().read_all().await?.contains_key(&added.key));
        drop(engine);

        let reopened = open_engine(dir.path()).await?;
        assert!(reopened.definition(&added.key).is_none());
        assert!(reopened.hotkeys().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_edit_definition_falls_back() -> Result<()> {
        let dir = tempdir()?;
        let mut engine = open_engine(dir.path()).await?;

        let edited = engine
            .edit_definition("patrol", &DefinitionInput::new(" ", "lots", ""))
            .await?;

        assert_eq!(edited.label, PLACEHOLDER_LABEL);
        assert_eq!(edited.points, 1);
        assert_eq!(edited.color, DEFAULT_COLOR);
        engine.increment("patrol").await?;
        assert_eq!(engine.read_all().await?.total, 1);

        assert!(matches!(
            engine
                .edit_definition("btn_missing", &DefinitionInput::default())
                .await,
            Err(Error::UnknownCounter(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_hotkeys() -> Result<()> {
        let dir = tempdir()?;
        let mut engine = open_engine(dir.path()).await?;

        engine.set_hotkey("patrol", "ctrl+1").await?;
        assert!(matches!(
            engine.set_hotkey("patrol", "ctrl+?").await,
            Err(Error::InvalidChord(_))
        ));
        for chord in ["ctrl+banana", "ctrl+shift", "ctrl+a+b"] {
            assert!(matches!(
                engine.set_hotkey("patrol", chord).await,
                Err(Error::InvalidChord(_))
            ));
        }
        assert!(matches!(
            engine.set_hotkey("nothing", "ctrl+2").await,
            Err(Error::UnknownCounter(_))
        ));
        assert!(matches!(
            engine
                .replace_hotkeys(&[
                    ("room".to_string(), "alt+r".to_string()),
                    ("patrol".to_string(), "ctrl+!".to_string()),
                ])
                .await,
            Err(Error::InvalidChord(_))
        ));
        assert_eq!(engine.hotkeys().get("patrol"), Some("ctrl+1"));
        assert_eq!(engine.hotkeys().get("room"), None);
        Ok(())
    }

    #[tokio::test]
    async fn test_live_engine_reads_after_schema_changes() -> Result<()> {
        let dir = tempdir()?;
        let mut engine = open_engine(dir.path()).await?;
        assert_eq!(engine.read_all().await?.counters.len(), 16);

        let added = engine.add_definition(&custom(1)).await?;
        let snapshot = engine.increment(&added.key).await?;
        assert_eq!(snapshot.count(&added.key), Some(1));
        assert_eq!(snapshot.total, 3);

        let snapshot = engine.read_all().await?;
        assert_eq!(snapshot.counters.len(), 17);
        assert_eq!(snapshot.count(&added.key), Some(1));

        assert!(engine.delete_definition(&added.key, || true).await?);
        let snapshot = engine.read_all().await?;
        assert_eq!(snapshot.counters.len(), 16);
        assert_eq!(snapshot.total, 0);

        let snapshot = engine.increment("patrol").await?;
        assert_eq!(snapshot.total, 10);
        engine.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_extreme_points_never_overflow() -> Result<()> {
        let dir = tempdir()?;
        let mut engine = open_engine(dir.path()).await?;

        assert!(matches!(
            engine
                .add_definition(&DefinitionInput::new("Big", "9223372036854775807", "#000000"))
                .await,
            Err(Error::InvalidDefinition(_))
        ));
        assert_eq!(engine.config(), &CounterConfig::defaults());

        let heavy = engine
            .add_definition(&DefinitionInput::new("Heavy", MAX_POINTS.to_string(), "#000000"))
            .await?;
        engine.increment(&heavy.key).await?;
        assert_eq!(engine.increment(&heavy.key).await?.total, 2 * MAX_POINTS);

        let edited = engine
            .edit_definition(
                &heavy.key,
                &DefinitionInput::new("Heavy", "-9223372036854775808", "#000000"),
            )
            .await?;
        assert_eq!(edited.points, 1);
        engine.close().await;

        // Hand edited files aren't bounded, totals saturate instead.
        std::fs::write(
            dir.path().join("points.json"),
            r#"{ "patrol": 9223372036854775807, "room": 9223372036854775807 }"#,
        )?;
        let mut engine = open_engine(dir.path()).await?;
        engine.increment("patrol").await?;
        engine.increment("patrol").await?;
        let snapshot = engine.increment("room").await?;
        assert_eq!(snapshot.total, i64::MAX);
        assert_eq!(snapshot.get("patrol").map(|v| v.points()), Some(i64::MAX));
        engine.close().await;

        assert_eq!(
            weighted_total(
                &BTreeMap::from([("a".to_string(), i64::MAX), ("b".to_string(), 2)]),
                &BTreeMap::from([("a".to_string(), -2), ("b".to_string(), 1)]),
            ),
            i64::MIN + 2
        );
        Ok(())
    }
}
