use std::{
    env,
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::{anyhow, Result};
use sysinfo::{get_current_pid, Signal, System};
use tracing::{info, warn};

use super::daemon_path::to_daemon_path;

pub fn daemon_executable() -> Result<PathBuf> {
    Ok(to_daemon_path(env::current_exe()?))
}

/// Terminates every process started from `name`, except this one and its children. Returns how
/// many were stopped.
pub fn kill_previous_servers(name: &Path) -> Result<usize> {
    let system = System::new_all();
    let current_id = get_current_pid().map_err(|e| anyhow!("Can't find own process {e}"))?;
    let mut killed = 0;
    for (pid, process) in system.processes().iter() {
        if *pid == current_id {
            continue;
        }
        if matches!(process.parent(), Some(p) if p == current_id) {
            continue;
        }

        if process
            .exe()
            .filter(|v| v.exists())
            .filter(|v| name == *v)
            .is_some()
        {
            info!("Stopping daemon {pid}");
            // This will forcefully terminate the process on Windows. Anything better will require a
            // lot more work.
            if process.kill_with(Signal::Term).is_none() {
                process.kill();
            }
            process.wait();
            killed += 1;
        }
    }
    Ok(killed)
}

/// Shuts down previous daemons and starts a new one for `dir`. The daemon detaches itself, so
/// this only waits for the launcher to exit.
pub fn restart_server(dir: &Path) -> Result<()> {
    let daemon = daemon_executable()?;
    kill_previous_servers(&daemon)?;

    let mut command = std::process::Command::new(&daemon);
    command.arg("--dir").arg(dir);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());

    let status = command
        .status()
        .map_err(|e| anyhow!("Couldn't start {daemon:?}: {e}"))?;
    if !status.success() {
        return Err(anyhow!("Daemon launcher failed with {status}"));
    }
    info!("Started daemon for {dir:?}");
    Ok(())
}

/// Restarts the daemon only when one is running, so it rebinds the current hotkeys.
pub fn reload_running_server(dir: &Path) -> Result<bool> {
    let daemon = daemon_executable()?;
    if kill_previous_servers(&daemon)? == 0 {
        return Ok(false);
    }
    restart_server(dir)
        .inspect_err(|e| warn!("Stopped daemon couldn't be restarted {e:?}"))?;
    Ok(true)
}
