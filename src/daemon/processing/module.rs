use anyhow::Result;

use crate::hotkey::HotkeyEvent;

/// Consumes hotkey events one at a time. Implementations own whatever state the events mutate.
pub trait EventProcessor {
    fn process_next(&mut self, event: HotkeyEvent) -> impl std::future::Future<Output = Result<()>>;

    fn finalize(self) -> impl std::future::Future<Output = Result<()>>;
}
