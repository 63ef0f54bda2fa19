use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{Local, Utc};

use super::{period, PlayerThread, PublishLog, Ready, StartFailure};
use crate::{
    bus::DisplayBus,
    config::ClockConfig,
    globe::{globe_mailbox, GlobeBatch, GlobeProducer, GlobeRenderer, GlobeSender, ProducerSettings},
    render::{compose_clock, ClockFace},
    stop::StopToken,
    Result,
};

/// Frames in one full turn of the globe.
pub fn rotation_frames(fps: f32, rotations_per_minute: f32) -> usize {
    ((fps * 60.0 / rotations_per_minute).round() as usize).max(1)
}

/// Batch index shown at step `n` of a `rotation`-frame turn.
pub fn frame_index(n: usize, rotation: usize, len: usize) -> Option<usize> {
    if len == 0 || rotation == 0 {
        return None;
    }
    let index = (n as f64 / rotation as f64 * len as f64).floor() as usize;
    Some(index.min(len - 1))
}

/// Date and time over a rotating earth. Owns the globe producer for as long
/// as it runs and respawns it if it dies.
pub struct ClockPlayer {
    config: ClockConfig,
    renderer: Arc<dyn GlobeRenderer>,
    pub(super) thread: Option<PlayerThread>,
}

impl std::fmt::Debug for ClockPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockPlayer")
            .field("config", &self.config)
            .field("thread", &self.thread)
            .finish_non_exhaustive()
    }
}

impl ClockPlayer {
    pub fn new(config: ClockConfig, renderer: Arc<dyn GlobeRenderer>) -> Self {
        Self {
            config,
            renderer,
            thread: None,
        }
    }

    pub fn check_interval(&self) -> Duration {
        period(self.config.fps)
    }

    pub(super) fn spawn(&self, bus: DisplayBus) -> std::result::Result<PlayerThread, StartFailure> {
        let config = self.config.clone();
        let renderer = Arc::clone(&self.renderer);
        PlayerThread::spawn("clock", bus, move |bus, stop, ready| {
            run(&config, renderer, bus, stop, ready)
        })
    }
}

struct Supervisor {
    renderer: Arc<dyn GlobeRenderer>,
    settings: ProducerSettings,
    sender: GlobeSender,
    stop: StopToken,
    producer: Option<GlobeProducer>,
    restart_backoff: Duration,
    last_restart: Instant,
}

impl Supervisor {
    fn spawn(&self) -> Result<GlobeProducer> {
        GlobeProducer::spawn(
            Arc::clone(&self.renderer),
            self.settings,
            self.sender.clone(),
            self.stop.clone(),
        )
    }

    /// Replaces a producer that exited while the clock is still running.
    fn check(&mut self) {
        if self.stop.is_stopped() {
            return;
        }
        let alive = self.producer.as_ref().is_some_and(|p| !p.is_finished());
        if alive || self.last_restart.elapsed() < self.restart_backoff {
            return;
        }
        if let Some(dead) = self.producer.take() {
            dead.join();
        }
        tracing::warn!("globe producer exited, restarting");
        self.last_restart = Instant::now();
        match self.spawn() {
            Ok(producer) => self.producer = Some(producer),
            Err(err) => tracing::error!(%err, "could not restart globe producer"),
        }
    }

    fn shutdown(mut self) {
        if let Some(producer) = self.producer.take() {
            producer.join();
        }
    }
}

fn run(
    config: &ClockConfig,
    renderer: Arc<dyn GlobeRenderer>,
    bus: &mut DisplayBus,
    stop: &StopToken,
    ready: &mut Ready,
) -> Result<()> {
    bus.set_fps(config.fps);
    let (width, height) = bus.dimensions();

    // One globe straight away so the first frames are not bare.
    let mut batch: GlobeBatch = match renderer.render(config.globe_size, 0.0, Utc::now()) {
        Ok(globe) => vec![globe],
        Err(err) => {
            tracing::warn!(%err, "initial globe render failed");
            Vec::new()
        }
    };

    let (sender, mailbox) = globe_mailbox();
    let mut supervisor = Supervisor {
        renderer,
        settings: ProducerSettings::from(config),
        sender,
        stop: stop.clone(),
        producer: None,
        restart_backoff: config.restart_backoff(),
        last_restart: Instant::now(),
    };
    supervisor.producer = Some(supervisor.spawn()?);
    ready.mark();

    let rotation = rotation_frames(config.fps, config.rotations_per_minute);
    let mut log = PublishLog::default();
    let mut n = 0;
    while !stop.is_stopped() {
        n = (n + 1) % rotation;
        if let Some(fresh) = mailbox.latest() {
            tracing::debug!(frames = fresh.len(), "globe batch swapped in");
            batch = fresh;
        }
        supervisor.check();

        let globe = frame_index(n, rotation, batch.len()).map(|i| &batch[i]);
        let face = ClockFace::at(&Local::now());
        let frame = compose_clock(&face, globe, width, height);
        log.paced(bus, &frame);
    }

    supervisor.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{DateTime, Utc};

    use super::*;
    use crate::{
        frame::{self, Frame},
        player::testing::{memory_bus, wait_for_frame},
    };

    #[test]
    fn rotation_length_and_indexing() {
        assert_eq!(rotation_frames(30.0, 5.0), 360);
        assert_eq!(frame_index(0, 360, 600), Some(0));
        assert_eq!(frame_index(180, 360, 600), Some(300));
        assert_eq!(frame_index(359, 360, 36), Some(35));
        assert_eq!(frame_index(10, 360, 0), None);
    }

    /// First call paints red, later calls green; the second call panics so
    /// the first producer dies.
    struct Staged {
        calls: AtomicUsize,
    }

    impl GlobeRenderer for Staged {
        fn render(&self, size: u32, _: f32, _: DateTime<Utc>) -> Result<Frame> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(frame::solid(size, size, [255, 0, 0])),
                1 => panic!("renderer crashed"),
                _ => Ok(frame::solid(size, size, [0, 255, 0])),
            }
        }
    }

    fn centre(pixels: &[u8], width: usize) -> [u8; 3] {
        let at = (width / 2 * width + width / 2) * 3;
        [pixels[at], pixels[at + 1], pixels[at + 2]]
    }

    #[test]
    fn dead_producer_is_restarted() {
        let config = ClockConfig {
            fps: 50.0,
            globe_size: 8,
            preview_frames: 2,
            full_frames: 4,
            restart_backoff_secs: 0,
            backoff_secs: 0,
            ..ClockConfig::default()
        };
        let player = ClockPlayer::new(
            config,
            Arc::new(Staged {
                calls: AtomicUsize::new(0),
            }),
        );
        let (bus, rx) = memory_bus(64, 64);
        let thread = player.spawn(bus).unwrap();

        wait_for_frame(&rx, |f| centre(&f.pixels, 64) == [255, 0, 0]);
        wait_for_frame(&rx, |f| centre(&f.pixels, 64) == [0, 255, 0]);
        assert!(thread.join().is_some());
    }

    #[test]
    fn stop_interrupts_the_producer_refresh_wait() {
        let config = ClockConfig {
            fps: 50.0,
            globe_size: 8,
            preview_frames: 1,
            full_frames: 2,
            ..ClockConfig::default()
        };
        let player = ClockPlayer::new(config, Arc::new(crate::globe::EarthRenderer));
        let (bus, rx) = memory_bus(64, 64);
        let thread = player.spawn(bus).unwrap();
        wait_for_frame(&rx, |_| true);
        std::thread::sleep(Duration::from_millis(100));

        let start = Instant::now();
        assert!(thread.join().is_some());
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
