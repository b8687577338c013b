// This runs daemon on windows without creating a console. Disable during development to see
// stdout.
#![windows_subsystem = "windows"]

use std::env::args;

use anyhow::Result;
use clap::Parser;
use hotcount::{
    daemon::{args::DaemonArgs, start_daemon},
    utils::{
        dir::resolve_application_path,
        logging::{enable_logging, DAEMON_PREFIX},
        runtime::single_thread_runtime,
    },
};

fn main() -> Result<()> {
    run_service(args().collect::<Vec<_>>())
}

fn run_service(command_args: Vec<String>) -> Result<()> {
    let mut args = DaemonArgs::parse_from(&command_args);
    // Resolved before detaching, the daemon changes its working directory.
    args.dir = Some(resolve_application_path(args.dir.take())?);

    if !args.force {
        #[cfg(feature = "win")]
        {
            use std::os::windows::process::CommandExt;
            use windows::Win32::System::Threading::DETACHED_PROCESS;

            let process_name = std::env::current_exe()?;
            let mut command = std::process::Command::new(process_name);
            command.arg("--force");
            if let Some(dir) = &args.dir {
                command.arg("--dir").arg(dir);
            }
            if args.log_console {
                command.arg("--log-console");
            }
            if let Some(log) = args.log {
                command.arg("--log-filter").arg(log.to_string());
            }
            command.creation_flags(DETACHED_PROCESS.0);
            command.stdin(std::process::Stdio::null());
            command.stdout(std::process::Stdio::null());
            command.stderr(std::process::Stdio::null());
            #[allow(clippy::zombie_processes)]
            command.spawn()?;
            println!("Created daemon");
            return Ok(());
        }
        #[cfg(unix)]
        {
            use daemonize::Daemonize;

            let daemonize = Daemonize::new()
                .stdout(daemonize::Stdio::devnull())
                .stderr(daemonize::Stdio::devnull())
                // stdin is always redirected to /dev/null by daemonize 0.5
                .execute();
            match daemonize {
                daemonize::Outcome::Parent(parent) => {
                    parent.inspect_err(|e| eprintln!("Failed to create daemon {e:?}"))?;
                    println!("Created daemon");
                    return Ok(());
                }
                daemonize::Outcome::Child(child) => {
                    child?;
                }
            }
        }
    }

    run(args)
}

fn run(args: DaemonArgs) -> Result<()> {
    let app_dir = resolve_application_path(args.dir)?;
    enable_logging(DAEMON_PREFIX, &app_dir, args.log, args.log_console)?;
    single_thread_runtime()?.block_on(async move { start_daemon(app_dir).await })?;
    Ok(())
}
