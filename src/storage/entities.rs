use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Hard ceiling on the number of counters, built-in ones included.
pub const MAX_DEFINITIONS: usize = 20;
/// How many counters a user may define on top of the built-in ones.
pub const MAX_CUSTOM_DEFINITIONS: usize = 4;

pub const PLACEHOLDER_LABEL: &str = "Untitled";
pub const DEFAULT_COLOR: &str = "#2563EB";
pub const DEFAULT_POINTS: i64 = 1;

/// Prefix of keys minted for user defined counters.
const GENERATED_KEY_PREFIX: &str = "btn_";
const MAX_KEY_LEN: usize = 64;
/// Column name reserved by the counter table.
pub(crate) const RESERVED_KEY: &str = "user_id";

#[derive(Debug)]
pub struct BuiltinCounter {
    pub key: &'static str,
    pub label: &'static str,
    pub points: i64,
    pub color: &'static str,
}

const fn builtin(
    key: &'static str,
    label: &'static str,
    points: i64,
    color: &'static str,
) -> BuiltinCounter {
    BuiltinCounter {
        key,
        label,
        points,
        color,
    }
}

/// Counters seeded on first run. They can be edited but never removed. The order here is the
/// display order.
pub const BUILTIN_COUNTERS: [BuiltinCounter; 16] = [
    builtin("patrol", "Patrol", 10, "#2563EB"),
    builtin("room", "Ward round", 10, "#22C55E"),
    builtin("neodmirin", "Neodmirin", 3, "#F59E42"),
    builtin("ksilotab", "Ksilotab", 7, "#EF4444"),
    builtin("reanimation", "Reanimation", 4, "#2563EB"),
    builtin("call_accept", "Accepted call", 4, "#22C55E"),
    builtin("event", "Event", 10, "#F59E42"),
    builtin("surgery", "Surgery", 15, "#EF4444"),
    builtin("inspection", "Sanitary inspection", 15, "#2563EB"),
    builtin("supply", "Supply", 10, "#22C55E"),
    builtin("gmp", "GMP", 15, "#F59E42"),
    builtin("exams", "Exams", 7, "#EF4444"),
    builtin("self_interview", "Conducted an interview", 10, "#2563EB"),
    builtin("assist_interview", "Assisted an interview", 5, "#22C55E"),
    builtin("accepted_person", "Accepted person", 5, "#F59E42"),
    builtin("exam_interview", "Exam (interview)", 5, "#EF4444"),
];

pub fn find_builtin(key: &str) -> Option<&'static BuiltinCounter> {
    BUILTIN_COUNTERS.iter().find(|v| v.key == key)
}

pub fn is_builtin(key: &str) -> bool {
    find_builtin(key).is_some()
}

/// Keys double as column names of the counter table, so they are restricted to plain lowercase
/// identifiers.
pub fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    key.len() <= MAX_KEY_LEN
        && key != RESERVED_KEY
        && (first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Derives the key of a user defined counter from its label and color. The same pair always
/// produces the same key, which is how duplicates are detected.
pub fn generate_key(label: &str, color: &str) -> String {
    let digest = Sha256::new()
        .chain_update(label.as_bytes())
        .chain_update(color.as_bytes())
        .finalize();
    format!("{GENERATED_KEY_PREFIX}{}", hex::encode(&digest[..4]))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDefinition {
    pub key: String,
    pub label: String,
    pub points: i64,
    pub color: String,
}

impl CounterDefinition {
    pub fn is_builtin(&self) -> bool {
        is_builtin(&self.key)
    }
}

impl From<&BuiltinCounter> for CounterDefinition {
    fn from(value: &BuiltinCounter) -> Self {
        CounterDefinition {
            key: value.key.into(),
            label: value.label.into(),
            points: value.points,
            color: value.color.into(),
        }
    }
}

pub type Labels = BTreeMap<String, String>;
pub type Points = BTreeMap<String, i64>;
pub type Colors = BTreeMap<String, String>;

/// The three persisted mappings describing every counter. They always share the same key domain.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CounterConfig {
    pub labels: Labels,
    pub points: Points,
    pub colors: Colors,
}

impl CounterConfig {
    pub fn defaults() -> Self {
        let mut config = CounterConfig::default();
        for counter in BUILTIN_COUNTERS.iter() {
            config.upsert(counter.into());
        }
        config
    }

    /// Fills gaps in loaded mappings. The key domain is every built-in key plus every labelled
    /// key; values missing from a mapping come from the built-in table, or from generic defaults
    /// for user defined counters. Returns the keys that were dropped because they belong to no
    /// counter.
    pub fn merge_with_defaults(
        labels: Option<Labels>,
        points: Option<Points>,
        colors: Option<Colors>,
    ) -> (Self, Vec<String>) {
        let mut labels = labels.unwrap_or_default();
        let mut points = points.unwrap_or_default();
        let mut colors = colors.unwrap_or_default();

        for counter in BUILTIN_COUNTERS.iter() {
            labels
                .entry(counter.key.into())
                .or_insert_with(|| counter.label.into());
        }

        let mut config = CounterConfig::default();
        for (key, label) in labels {
            let builtin = find_builtin(&key);
            let point = points
                .remove(&key)
                .or(builtin.map(|v| v.points))
                .unwrap_or(DEFAULT_POINTS);
            let color = colors
                .remove(&key)
                .or(builtin.map(|v| v.color.to_string()))
                .unwrap_or_else(|| DEFAULT_COLOR.into());
            config.points.insert(key.clone(), point);
            config.colors.insert(key.clone(), color);
            config.labels.insert(key, label);
        }

        let mut orphans = points.into_keys().chain(colors.into_keys()).collect::<Vec<_>>();
        orphans.sort();
        orphans.dedup();
        (config, orphans)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.labels.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn custom_count(&self) -> usize {
        self.labels.keys().filter(|v| !is_builtin(v)).count()
    }

    /// Keys in display order: built-in counters as listed in [BUILTIN_COUNTERS], then user
    /// defined ones by key.
    pub fn keys(&self) -> Vec<String> {
        BUILTIN_COUNTERS
            .iter()
            .map(|v| v.key)
            .filter(|v| self.contains(v))
            .map(String::from)
            .chain(self.labels.keys().filter(|v| !is_builtin(v)).cloned())
            .collect()
    }

    pub fn definition(&self, key: &str) -> Option<CounterDefinition> {
        let label = self.labels.get(key)?;
        Some(CounterDefinition {
            key: key.into(),
            label: label.clone(),
            points: self.points.get(key).copied().unwrap_or(DEFAULT_POINTS),
            color: self
                .colors
                .get(key)
                .cloned()
                .unwrap_or_else(|| DEFAULT_COLOR.into()),
        })
    }

    pub fn definitions(&self) -> Vec<CounterDefinition> {
        self.keys()
            .iter()
            .filter_map(|v| self.definition(v))
            .collect()
    }

    pub fn upsert(&mut self, definition: CounterDefinition) {
        let CounterDefinition {
            key,
            label,
            points,
            color,
        } = definition;
        self.labels.insert(key.clone(), label);
        self.points.insert(key.clone(), points);
        self.colors.insert(key, color);
    }

    pub fn remove(&mut self, key: &str) -> Option<CounterDefinition> {
        let definition = self.definition(key)?;
        self.labels.remove(key);
        self.points.remove(key);
        self.colors.remove(key);
        Some(definition)
    }
}

/// Largest weight a counter may carry, in either direction.
pub const MAX_POINTS: i64 = 1_000_000;

/// Parses an integer weight within `-MAX_POINTS..=MAX_POINTS`.
pub fn parse_points(raw: &str) -> Option<i64> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|v| (-MAX_POINTS..=MAX_POINTS).contains(v))
}

/// Raw values of a counter form as the user typed them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefinitionInput {
    pub label: String,
    pub points: String,
    pub color: String,
}

impl DefinitionInput {
    pub fn new(label: impl Into<String>, points: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            points: points.into(),
            color: color.into(),
        }
    }

    /// Used when creating a counter. Every field must be present and points must be an integer.
    pub fn validated(&self) -> Result<(String, i64, String)> {
        let points = parse_points(&self.points)
            .ok_or(Error::InvalidDefinition(
                "points must be an integer between -1000000 and 1000000",
            ))?;
        let label = self.label.trim();
        let color = self.color.trim();
        if label.is_empty() || color.is_empty() {
            return Err(Error::InvalidDefinition("label and color must not be empty"));
        }
        Ok((label.into(), points, color.into()))
    }

    /// Used when editing an existing counter. Blank or unparsable fields fall back to defaults.
    pub fn with_fallbacks(&self) -> (String, i64, String) {
        let label = match self.label.trim() {
            "" => PLACEHOLDER_LABEL,
            v => v,
        };
        let color = match self.color.trim() {
            "" => DEFAULT_COLOR,
            v => v,
        };
        let points = parse_points(&self.points).unwrap_or(DEFAULT_POINTS);
        (label.into(), points, color.into())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::{
        error::Error,
        storage::entities::{
            generate_key, is_valid_key, parse_points, CounterConfig, DefinitionInput,
            BUILTIN_COUNTERS, DEFAULT_COLOR, MAX_POINTS, PLACEHOLDER_LABEL,
        },
    };

    #[test]
    fn test_builtin_keys_are_valid_and_unique() {
        let mut keys = BUILTIN_COUNTERS.iter().map(|v| v.key).collect::<Vec<_>>();
        assert!(keys.iter().all(|v| is_valid_key(v)));
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), BUILTIN_COUNTERS.len());
    }

    #[test]
    fn test_key_validation() {
        assert!(is_valid_key("btn_0a1b2c3d"));
        assert!(is_valid_key("_hidden"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("user_id"));
        assert!(!is_valid_key("1patrol"));
        assert!(!is_valid_key("patrol\"; DROP TABLE stats; --"));
        assert!(!is_valid_key("Patrol"));
    }

    #[test]
    fn test_generated_key_is_deterministic() {
        let key = generate_key("Night shift", "#22C55E");
        assert_eq!(key, generate_key("Night shift", "#22C55E"));
        assert_ne!(key, generate_key("Night shift", "#EF4444"));
        assert!(key.starts_with("btn_"));
        assert_eq!(key.len(), "btn_".len() + 8);
        assert!(is_valid_key(&key));
    }

    #[test]
    fn test_merge_with_defaults_without_files() {
        let (config, orphans) = CounterConfig::merge_with_defaults(None, None, None);
        assert_eq!(config, CounterConfig::defaults());
        assert!(orphans.is_empty());
        assert_eq!(config.len(), 16);
        assert_eq!(config.points["patrol"], 10);
    }

    #[test]
    fn test_merge_with_defaults_keeps_user_values() {
        let labels = BTreeMap::from([
            ("patrol".to_string(), "My patrol".to_string()),
            ("btn_00000001".to_string(), "Custom".to_string()),
        ]);
        let points = BTreeMap::from([
            ("room".to_string(), 42),
            ("stale".to_string(), 3),
        ]);
        let (config, orphans) = CounterConfig::merge_with_defaults(Some(labels), Some(points), None);

        assert_eq!(config.labels["patrol"], "My patrol");
        assert_eq!(config.labels["room"], "Ward round");
        assert_eq!(config.points["room"], 42);
        assert_eq!(config.points["btn_00000001"], 1);
        assert_eq!(config.colors["btn_00000001"], DEFAULT_COLOR);
        assert_eq!(config.len(), 17);
        assert_eq!(orphans, vec!["stale".to_string()]);
    }

    #[test]
    fn test_keys_put_builtins_first() {
        let mut config = CounterConfig::defaults();
        config.upsert(crate::storage::entities::CounterDefinition {
            key: "aaa_custom".into(),
            label: "Custom".into(),
            points: 2,
            color: "#000000".into(),
        });
        let keys = config.keys();
        assert_eq!(keys[0], "patrol");
        assert_eq!(keys.last().map(String::as_str), Some("aaa_custom"));
        assert_eq!(config.custom_count(), 1);
    }

    #[test]
    fn test_strict_input() {
        assert!(matches!(
            DefinitionInput::new("Label", "ten", "#fff").validated(),
            Err(Error::InvalidDefinition(_))
        ));
        assert!(matches!(
            DefinitionInput::new("  ", "10", "#fff").validated(),
            Err(Error::InvalidDefinition(_))
        ));
        assert_eq!(
            DefinitionInput::new(" Label ", " 7 ", "#fff").validated().unwrap(),
            ("Label".to_string(), 7, "#fff".to_string())
        );
    }

    #[test]
    fn test_lenient_input() {
        assert_eq!(
            DefinitionInput::new("", "x", " ").with_fallbacks(),
            (PLACEHOLDER_LABEL.to_string(), 1, DEFAULT_COLOR.to_string())
        );
        assert_eq!(
            DefinitionInput::new("Patrol", "-3", "#000000").with_fallbacks(),
            ("Patrol".to_string(), -3, "#000000".to_string())
        );
    }

    #[test]
    fn test_points_are_bounded() {
        assert_eq!(parse_points(" -15 "), Some(-15));
        assert_eq!(parse_points("1000000"), Some(MAX_POINTS));
        assert_eq!(parse_points("-1000000"), Some(-MAX_POINTS));
        assert_eq!(parse_points("1000001"), None);
        assert_eq!(parse_points("9223372036854775807"), None);
        assert_eq!(parse_points("-9223372036854775808"), None);

        assert!(matches!(
            DefinitionInput::new("Big", "9223372036854775807", "#000000").validated(),
            Err(Error::InvalidDefinition(_))
        ));
        assert_eq!(
            DefinitionInput::new("Big", "9223372036854775807", "#000000")
                .with_fallbacks()
                .1,
            1
        );
    }
}
