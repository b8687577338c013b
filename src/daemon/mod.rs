use std::path::{Path, PathBuf};

use anyhow::Result;
use processing::{counting::CountingProcessor, ProcessingModule};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    engine::CounterEngine,
    hotkey::{registry::HotkeyRegistry, GenericHotkeyBackend, HotkeyBackend},
};

pub mod args;
pub mod processing;
pub mod shutdown;

/// Represents the starting point for the daemon
pub async fn start_daemon(dir: PathBuf) -> Result<()> {
    std::env::set_current_dir("/")?;

    let backend = GenericHotkeyBackend::new()?;
    let shutdown_token = CancellationToken::new();

    let (_, result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        run_daemon(&dir, backend, shutdown_token),
    );

    if let Err(e) = &result {
        error!("Daemon stopped with an error {e:?}");
    }
    result
}

/// Binds the saved hotkeys and counts presses until `shutdown_token` is cancelled. Hotkeys are
/// unbound before returning.
async fn run_daemon(
    dir: &Path,
    backend: impl HotkeyBackend,
    shutdown_token: CancellationToken,
) -> Result<()> {
    let _stop_on_exit = shutdown_token.clone().drop_guard();

    let engine = CounterEngine::open_dir(dir).await?;
    let (sender, receiver) = mpsc::unbounded_channel();

    let mut registry = HotkeyRegistry::new(backend);
    if registry.install(engine.hotkeys(), &sender) == 0 {
        warn!("No hotkeys are bound, nothing will be counted until some are configured");
    }

    let processor = ProcessingModule::new(
        receiver,
        CountingProcessor::new(engine),
        shutdown_token,
    );
    let result = processor.run().await;

    registry.uninstall();
    info!("Daemon stopped");
    result
}
