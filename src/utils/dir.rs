use std::{env, io, path::PathBuf};

use anyhow::{anyhow, Result};

const APPLICATION_DIR: &str = "hotcount";

/// Picks the directory holding configuration, counters and logs, creating it when missing.
pub fn create_application_default_path() -> Result<PathBuf> {
    let mut path = platform_data_dir()?;
    path.push(APPLICATION_DIR);

    match std::fs::create_dir_all(&path) {
        Ok(_) => Ok(path),
        Err(v) if v.kind() == io::ErrorKind::AlreadyExists => Ok(path),
        Err(v) => Err(v.into()),
    }
}

/// Makes `dir` absolute, since the daemon moves away from the directory it was started in.
pub fn resolve_application_path(dir: Option<PathBuf>) -> Result<PathBuf> {
    let Some(dir) = dir else {
        return create_application_default_path();
    };
    std::fs::create_dir_all(&dir)?;
    Ok(std::path::absolute(dir)?)
}

#[cfg(windows)]
fn platform_data_dir() -> Result<PathBuf> {
    env::var("APPDATA")
        .map(PathBuf::from)
        .map_err(|_| anyhow!("APPDATA should be present on Windows"))
}

#[cfg(not(windows))]
fn platform_data_dir() -> Result<PathBuf> {
    env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|_| {
            env::var("HOME").map(|home| {
                let mut path = PathBuf::from(home);
                path.push(".local/state");
                path
            })
        })
        .map_err(|_| anyhow!("Couldn't find neither XDG_STATE_HOME nor HOME"))
}
