use anyhow::Result;
use tracing::info;

use crate::{
    engine::CounterEngine, hotkey::HotkeyEvent, storage::counter_store::SqliteCounterStore,
};

use super::module::EventProcessor;

/// Turns every hotkey press into an increment of its counter.
pub struct CountingProcessor {
    engine: CounterEngine<SqliteCounterStore>,
}

impl CountingProcessor {
    pub fn new(engine: CounterEngine<SqliteCounterStore>) -> Self {
        Self { engine }
    }
}

impl EventProcessor for CountingProcessor {
    async fn process_next(&mut self, event: HotkeyEvent) -> Result<()> {
        let snapshot = self.engine.increment(&event.key).await?;
        info!(
            "{} is now {}, total {} ({})",
            event.key,
            snapshot.count(&event.key).unwrap_or_default(),
            snapshot.total,
            snapshot.progress()
        );
        Ok(())
    }

    async fn finalize(self) -> Result<()> {
        self.engine.close().await;
        Ok(())
    }
}
