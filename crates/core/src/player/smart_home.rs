use std::{sync::Arc, time::Duration};

use crossbeam::channel::{select, unbounded};

use super::{PlayerThread, PublishLog, StartFailure};
use crate::{
    accessory::{setup_uri, AccessoryBackend, LightState, CATEGORY_LIGHTBULB},
    bus::DisplayBus,
    command::SmartHomeAction,
    config::SmartHomeConfig,
    frame,
    render::qr_frame,
};

/// The loop is event driven; this bounds the bridge shutdown instead.
const CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Acts as a smart-home light: the whole display shows the light colour.
pub struct SmartHomePlayer {
    action: SmartHomeAction,
    config: SmartHomeConfig,
    backend: Arc<dyn AccessoryBackend>,
    pub(super) thread: Option<PlayerThread>,
}

impl std::fmt::Debug for SmartHomePlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartHomePlayer")
            .field("action", &self.action)
            .field("bind", &self.config.bind)
            .finish_non_exhaustive()
    }
}

impl SmartHomePlayer {
    pub fn new(
        action: SmartHomeAction,
        config: SmartHomeConfig,
        backend: Arc<dyn AccessoryBackend>,
    ) -> Self {
        Self {
            action,
            config,
            backend,
            thread: None,
        }
    }

    pub fn check_interval(&self) -> Duration {
        CHECK_INTERVAL
    }

    pub(super) fn spawn(&self, bus: DisplayBus) -> std::result::Result<PlayerThread, StartFailure> {
        let action = self.action;
        let config = self.config.clone();
        let backend = Arc::clone(&self.backend);
        PlayerThread::spawn("smart-home", bus, move |bus, stop, ready| {
            let (width, height) = bus.dimensions();
            let mut log = PublishLog::default();

            // Build the pairing frame before opening the listener so a bad
            // code fails the start cleanly.
            let first = match action {
                SmartHomeAction::Setup => {
                    let uri = setup_uri(&config.pincode, &config.setup_id, CATEGORY_LIGHTBULB)?;
                    qr_frame(&uri, width, height, [255, 255, 255])?
                }
                SmartHomeAction::Start => frame::blank(width, height),
            };
            let (updates_tx, updates) = unbounded();
            let driver = backend.start(&config, updates_tx)?;
            ready.mark();
            log.immediate(bus, &first);

            let mut light = LightState::default();
            loop {
                select! {
                    recv(updates) -> update => match update {
                        Ok(update) => {
                            if let Some(color) = light.apply(update) {
                                tracing::debug!(?color, on = light.is_on(), "light changed");
                                log.immediate(bus, &frame::solid(width, height, color));
                            }
                        }
                        Err(_) => break,
                    },
                    recv(stop.receiver()) -> _ => break,
                }
            }

            driver.stop();
            Ok(())
        })
    }
}
