use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::{
    error::{Error, Result},
    fs::operations::{read_json, write_json_atomic, FileGroupLock},
};

use super::entities::{is_valid_key, Colors, CounterConfig, Labels, Points};

const LABELS_FILE: &str = "labels.json";
const POINTS_FILE: &str = "points.json";
const COLORS_FILE: &str = "colors.json";
const LOCK_FILE: &str = ".config.lock";

/// Persists labels, points and colors of every counter as three json mappings inside one
/// directory.
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Loads the mappings, filling in defaults for every missing file or key. Only a file that
    /// exists but can't be parsed makes this fail.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<CounterConfig> {
        let lock = FileGroupLock::shared(&self.lock_path()).await?;
        let loaded = self.load_unlocked().await;
        lock.release().await?;
        let (labels, points, colors) = loaded?;

        let (config, orphans) = CounterConfig::merge_with_defaults(labels, points, colors);
        if !orphans.is_empty() {
            warn!("Ignoring settings of unknown counters {orphans:?}");
        }
        debug!("Loaded {} counter definitions", config.len());
        Ok(config)
    }

    async fn load_unlocked(&self) -> Result<(Option<Labels>, Option<Points>, Option<Colors>)> {
        let labels_path = self.dir.join(LABELS_FILE);
        let labels = read_json::<Labels>(&labels_path).await?;
        if let Some(key) = labels
            .iter()
            .flat_map(|v| v.keys())
            .find(|v| !is_valid_key(v))
        {
            return Err(Error::corrupt(
                labels_path,
                format!("{key:?} is not a valid counter key"),
            ));
        }
        let points = read_json::<Points>(&self.dir.join(POINTS_FILE)).await?;
        let colors = read_json::<Colors>(&self.dir.join(COLORS_FILE)).await?;
        Ok((labels, points, colors))
    }

    /// Writes all three mappings. Each file is replaced atomically and the whole group is written
    /// under an exclusive lock.
    #[instrument(skip_all)]
    pub async fn save(&self, config: &CounterConfig) -> Result<()> {
        let lock = FileGroupLock::exclusive(&self.lock_path()).await?;
        let result = self.save_unlocked(config).await;
        lock.release().await?;
        result?;
        info!("Saved {} counter definitions", config.len());
        Ok(())
    }

    async fn save_unlocked(&self, config: &CounterConfig) -> Result<()> {
        write_json_atomic(&self.dir.join(LABELS_FILE), &config.labels).await?;
        write_json_atomic(&self.dir.join(POINTS_FILE), &config.points).await?;
        write_json_atomic(&self.dir.join(COLORS_FILE), &config.colors).await?;
        Ok(())
    }
}
