use std::{sync::Arc, time::Duration};

use super::{period, PlayerThread, PublishLog, StartFailure};
use crate::{
    bus::DisplayBus,
    config::ParticleConfig,
    particles::{ParticleBackend, ParticleField},
};

/// Fireworks. The renderer is created on the player thread since GPU
/// devices stay with the thread that opened them.
pub struct ParticlePlayer {
    config: ParticleConfig,
    backend: Arc<dyn ParticleBackend>,
    pub(super) thread: Option<PlayerThread>,
}

impl std::fmt::Debug for ParticlePlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticlePlayer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ParticlePlayer {
    pub fn new(config: ParticleConfig, backend: Arc<dyn ParticleBackend>) -> Self {
        Self {
            config,
            backend,
            thread: None,
        }
    }

    pub fn check_interval(&self) -> Duration {
        period(self.config.fps)
    }

    pub(super) fn spawn(&self, bus: DisplayBus) -> std::result::Result<PlayerThread, StartFailure> {
        let config = self.config.clone();
        let backend = Arc::clone(&self.backend);
        PlayerThread::spawn("particles", bus, move |bus, stop, ready| {
            bus.set_fps(config.fps);
            let (width, height) = bus.dimensions();
            let mut renderer = backend.create(config.capacity, width, height)?;
            let mut field = ParticleField::new(&config);
            tracing::info!(renderer = renderer.name(), capacity = field.capacity(), "particles starting");
            ready.mark();

            let mut log = PublishLog::default();
            while !stop.is_stopped() {
                let burst = field.tick();
                let frame = renderer.advance(burst.as_ref())?;
                log.paced(bus, &frame);
            }
            Ok(())
        })
    }
}
