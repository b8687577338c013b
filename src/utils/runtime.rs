use anyhow::Result;

/// Counting is strictly sequential, so the daemon never needs more than one worker thread.
pub fn single_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
