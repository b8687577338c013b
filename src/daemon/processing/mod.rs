use anyhow::Result;
use module::EventProcessor;
use tokio::{select, sync::mpsc::UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::hotkey::HotkeyEvent;

pub mod counting;
pub mod module;

/// Drains hotkey events in arrival order until shutdown is requested. Being the only consumer of
/// the channel makes it the only writer of counter state inside the daemon.
pub struct ProcessingModule<Processor> {
    receiver: UnboundedReceiver<HotkeyEvent>,
    processor: Processor,
    shutdown_token: CancellationToken,
}

impl<P: EventProcessor> ProcessingModule<P> {
    pub fn new(
        receiver: UnboundedReceiver<HotkeyEvent>,
        processor: P,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            receiver,
            processor,
            shutdown_token,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            // Presses queued before shutdown are still counted.
            let event = select! {
                biased;
                event = self.receiver.recv() => event,
                _ = self.shutdown_token.cancelled() => None,
            };
            let Some(event) = event else {
                break;
            };

            debug!("Processing event {:?}", event);
            match self.processor.process_next(event.clone()).await {
                Ok(_) => {
                    info!("Processed event {:?}", event)
                }
                Err(e) => {
                    error!("Error processing event {:?}: {e:?}", event)
                }
            }
        }

        // Stops whatever else is waiting on shutdown when the channel closed first.
        self.shutdown_token.cancel();
        self.receiver.close();
        self.processor.finalize().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use anyhow::{anyhow, Result};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use crate::{
        daemon::processing::{module::EventProcessor, ProcessingModule},
        hotkey::HotkeyEvent,
        utils::logging::TEST_LOGGING,
    };

    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
        finalized: Arc<Mutex<bool>>,
    }

    impl EventProcessor for Recorder {
        async fn process_next(&mut self, event: HotkeyEvent) -> Result<()> {
            if &*event.key == "broken" {
                return Err(anyhow!("can't process {}", event.key));
            }
            self.seen.lock().unwrap().push(event.key.to_string());
            Ok(())
        }

        async fn finalize(self) -> Result<()> {
            *self.finalized.lock().unwrap() = true;
            Ok(())
        }
    }

    fn event(key: &str) -> HotkeyEvent {
        HotkeyEvent { key: key.into() }
    }

    #[tokio::test]
    async fn test_events_are_processed_in_order() -> Result<()> {
        *TEST_LOGGING;
        let (sender, receiver) = mpsc::unbounded_channel();
        let recorder = Recorder::default();
        let module = ProcessingModule::new(receiver, recorder.clone(), CancellationToken::new());

        for key in ["room", "broken", "patrol", "room"] {
            sender.send(event(key))?;
        }
        drop(sender);
        module.run().await?;

        assert_eq!(*recorder.seen.lock().unwrap(), ["room", "patrol", "room"]);
        assert!(*recorder.finalized.lock().unwrap());
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_stops_processing() -> Result<()> {
        *TEST_LOGGING;
        let (_sender, receiver) = mpsc::unbounded_channel();
        let recorder = Recorder::default();
        let token = CancellationToken::new();
        let module = ProcessingModule::new(receiver, recorder.clone(), token.clone());

        token.cancel();
        module.run().await?;

        assert!(recorder.seen.lock().unwrap().is_empty());
        assert!(*recorder.finalized.lock().unwrap());
        Ok(())
    }
}
