use std::path::PathBuf;

/// The daemon binary is installed next to the cli binary.
pub fn to_daemon_path(mut path: PathBuf) -> PathBuf {
    path.set_file_name("hotcount-daemon");
    #[cfg(windows)]
    {
        path.set_extension("exe");
    }
    path
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::cli::daemon_path::to_daemon_path;

    #[test]
    fn test_daemon_is_next_to_cli() {
        let daemon = to_daemon_path(PathBuf::from("bin").join("hotcount"));
        assert_eq!(daemon.parent(), Some(PathBuf::from("bin").as_path()));
        assert!(daemon
            .file_name()
            .is_some_and(|v| v.to_string_lossy().starts_with("hotcount-daemon")));
    }
}
