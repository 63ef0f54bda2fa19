//! Players: one background thread per active animation.
//!
//! A player takes the [`DisplayBus`] by value when it starts and hands it
//! back when it stops, so two players can never publish at the same time.
//! Start-up errors are reported synchronously through a readiness channel;
//! the bus comes back with the error.

mod clock;
mod frames;
mod music;
mod particles;
mod smart_home;

pub use clock::{frame_index, rotation_frames, ClockPlayer};
pub use frames::FramesPlayer;
pub use music::MusicPlayer;
pub use particles::ParticlePlayer;
pub use smart_home::SmartHomePlayer;

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{bounded, Sender};

use crate::{
    accessory::{AccessoryBackend, HttpBridge},
    audio::AudioBackend,
    bus::DisplayBus,
    config::AppConfig,
    descriptor::AnimationDescriptor,
    frame::Frame,
    globe::{EarthRenderer, GlobeRenderer},
    particles::{AutoParticles, ParticleBackend},
    stop::{stop_pair, StopHandle, StopToken},
    LampError, Result,
};

/// Hardware and network collaborators handed to players.
#[derive(Clone)]
pub struct Devices {
    pub audio: Arc<dyn AudioBackend>,
    pub particles: Arc<dyn ParticleBackend>,
    pub accessory: Arc<dyn AccessoryBackend>,
    pub globe: Arc<dyn GlobeRenderer>,
}

impl Devices {
    /// The real devices available in this build.
    pub fn system(config: &AppConfig) -> Self {
        Self {
            audio: system_audio(config),
            particles: Arc::new(AutoParticles),
            accessory: Arc::new(HttpBridge),
            globe: Arc::new(EarthRenderer),
        }
    }
}

#[cfg(feature = "audio-device")]
fn system_audio(config: &AppConfig) -> Arc<dyn AudioBackend> {
    Arc::new(crate::audio::CpalBackend::new(config.audio.device.clone()))
}

#[cfg(not(feature = "audio-device"))]
fn system_audio(_: &AppConfig) -> Arc<dyn AudioBackend> {
    Arc::new(crate::audio::NoAudio)
}

impl fmt::Debug for Devices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Devices")
            .field("audio", &self.audio.name())
            .finish_non_exhaustive()
    }
}

/// Everything a player may need besides its descriptor.
#[derive(Debug, Clone)]
pub struct PlayerContext {
    pub config: Arc<AppConfig>,
    pub devices: Devices,
}

/// A player that could not start, with the bus it was given. The bus is only
/// missing if the player thread died without handing it back.
pub struct StartFailure {
    pub error: LampError,
    pub bus: Option<DisplayBus>,
}

impl fmt::Debug for StartFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartFailure")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Lets a player body tell [`PlayerThread::spawn`] that it is up.
pub(crate) struct Ready {
    tx: Sender<Result<()>>,
    sent: bool,
}

impl Ready {
    pub(crate) fn mark(&mut self) {
        self.report(Ok(()));
    }

    fn report(&mut self, outcome: Result<()>) {
        if !self.sent {
            self.sent = true;
            let _ = self.tx.send(outcome);
        }
    }
}

/// The running thread of a player. Joining it always yields the bus back.
pub(crate) struct PlayerThread {
    stop: StopHandle,
    handle: JoinHandle<Option<DisplayBus>>,
}

impl PlayerThread {
    pub(crate) fn spawn<F>(
        name: &str,
        bus: DisplayBus,
        body: F,
    ) -> std::result::Result<Self, StartFailure>
    where
        F: FnOnce(&mut DisplayBus, &StopToken, &mut Ready) -> Result<()> + Send + 'static,
    {
        let (stop, token) = stop_pair();
        let (ready_tx, ready_rx) = bounded(1);
        let label = name.to_string();

        // The bus travels inside a cell so it can be recovered if the OS
        // refuses to create the thread.
        let slot = Arc::new(std::sync::Mutex::new(Some(bus)));
        let thread_slot = Arc::clone(&slot);
        let spawned = thread::Builder::new()
            .name(format!("player-{name}"))
            .spawn(move || {
                let mut ready = Ready {
                    tx: ready_tx,
                    sent: false,
                };
                let Some(mut bus) = thread_slot.lock().ok().and_then(|mut slot| slot.take()) else {
                    ready.report(Err(LampError::player_start("display bus missing from handoff")));
                    return None;
                };
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    body(&mut bus, &token, &mut ready)
                }));
                match outcome {
                    Ok(Ok(())) => ready.mark(),
                    Ok(Err(err)) => {
                        if ready.sent {
                            tracing::error!(player = %label, %err, "player stopped with an error");
                        }
                        ready.report(Err(err));
                    }
                    Err(_) => {
                        tracing::error!(player = %label, "player panicked");
                        ready.report(Err(LampError::player_start("player panicked")));
                    }
                }
                Some(bus)
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                return Err(StartFailure {
                    error: LampError::player_start(err),
                    bus: slot.lock().ok().and_then(|mut slot| slot.take()),
                });
            }
        };

        let started = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(LampError::player_start("player exited during start")));
        let thread = Self { stop, handle };
        match started {
            Ok(()) => Ok(thread),
            Err(error) => Err(StartFailure {
                error,
                bus: thread.join(),
            }),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signals the thread and waits for it.
    pub(crate) fn join(mut self) -> Option<DisplayBus> {
        self.stop.stop();
        let bus = self.handle.join().ok().flatten();
        if bus.is_none() {
            tracing::error!("player thread lost the display bus");
        }
        bus
    }
}

/// Publish helper that logs failures instead of stopping the player.
#[derive(Debug, Default)]
pub(crate) struct PublishLog {
    failures: u64,
}

impl PublishLog {
    pub(crate) fn paced(&mut self, bus: &mut DisplayBus, frame: &Frame) {
        let result = bus.publish(frame);
        self.record(result);
    }

    pub(crate) fn immediate(&mut self, bus: &mut DisplayBus, frame: &Frame) {
        let result = bus.publish_now(frame).map(|_| ());
        self.record(result);
    }

    fn record(&mut self, result: Result<()>) {
        if let Err(err) = result {
            self.failures += 1;
            if self.failures == 1 || self.failures % 1000 == 0 {
                tracing::warn!(%err, failures = self.failures, "frame publish failed");
            }
        }
    }
}

pub(crate) fn period(fps: f32) -> Duration {
    if fps.is_finite() && fps > 0.0 {
        Duration::from_secs_f32(1.0 / fps)
    } else {
        Duration::ZERO
    }
}

/// The closed set of players. Exactly one variant exists per descriptor kind.
#[derive(Debug)]
pub enum Player {
    Frames(FramesPlayer),
    Clock(ClockPlayer),
    Music(MusicPlayer),
    Particles(ParticlePlayer),
    SmartHome(SmartHomePlayer),
}

impl Player {
    pub fn for_descriptor(descriptor: Arc<AnimationDescriptor>, context: &PlayerContext) -> Self {
        let config = &context.config;
        match descriptor.as_ref() {
            AnimationDescriptor::Sequence { .. } | AnimationDescriptor::Scroller { .. } => {
                Self::Frames(FramesPlayer::new(
                    Arc::clone(&descriptor),
                    config.display.width,
                ))
            }
            AnimationDescriptor::ClockOverlay => Self::Clock(ClockPlayer::new(
                config.clock.clone(),
                Arc::clone(&context.devices.globe),
            )),
            AnimationDescriptor::MusicReactive { algorithm, fps } => Self::Music(MusicPlayer::new(
                *algorithm,
                *fps,
                config.audio.gain,
                Arc::clone(&context.devices.audio),
            )),
            AnimationDescriptor::GpuEffect => Self::Particles(ParticlePlayer::new(
                config.particles.clone(),
                Arc::clone(&context.devices.particles),
            )),
            AnimationDescriptor::SmartHome { action } => Self::SmartHome(SmartHomePlayer::new(
                *action,
                config.smart_home.clone(),
                Arc::clone(&context.devices.accessory),
            )),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Frames(_) => "frames",
            Self::Clock(_) => "clock",
            Self::Music(_) => "music",
            Self::Particles(_) => "particles",
            Self::SmartHome(_) => "smart_home",
        }
    }

    /// Longest the player goes without looking at its stop signal.
    pub fn check_interval(&self) -> Duration {
        match self {
            Self::Frames(p) => p.check_interval(),
            Self::Clock(p) => p.check_interval(),
            Self::Music(p) => p.check_interval(),
            Self::Particles(p) => p.check_interval(),
            Self::SmartHome(p) => p.check_interval(),
        }
    }

    pub fn start(&mut self, bus: DisplayBus) -> std::result::Result<(), StartFailure> {
        let thread = match self {
            Self::Frames(p) => p.spawn(bus),
            Self::Clock(p) => p.spawn(bus),
            Self::Music(p) => p.spawn(bus),
            Self::Particles(p) => p.spawn(bus),
            Self::SmartHome(p) => p.spawn(bus),
        }?;
        *self.slot() = Some(thread);
        tracing::info!(player = self.kind(), "player started");
        Ok(())
    }

    /// Stops the thread and returns the bus. `None` if it was not running.
    pub fn stop(&mut self) -> Option<DisplayBus> {
        let thread = self.slot().take()?;
        let bus = thread.join();
        tracing::info!(player = self.kind(), "player stopped");
        bus
    }

    pub fn is_active(&self) -> bool {
        let thread = match self {
            Self::Frames(p) => &p.thread,
            Self::Clock(p) => &p.thread,
            Self::Music(p) => &p.thread,
            Self::Particles(p) => &p.thread,
            Self::SmartHome(p) => &p.thread,
        };
        thread.as_ref().is_some_and(PlayerThread::is_running)
    }

    fn slot(&mut self) -> &mut Option<PlayerThread> {
        match self {
            Self::Frames(p) => &mut p.thread,
            Self::Clock(p) => &mut p.thread,
            Self::Music(p) => &mut p.thread,
            Self::Particles(p) => &mut p.thread,
            Self::SmartHome(p) => &mut p.thread,
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if self.slot().is_some() {
            self.stop();
        }
    }
}

impl fmt::Debug for PlayerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerThread")
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::time::{Duration, Instant};

    use crossbeam::channel::Receiver;

    use super::*;
    use crate::{
        audio::testing::ToneBackend,
        bus::{MemorySink, PublishedFrame},
        config::BusConfig,
        particles::SoftwareBackend,
    };

    pub(crate) use super::smart_home::testing::FakeHub;

    pub(crate) fn memory_bus(width: u32, height: u32) -> (DisplayBus, Receiver<PublishedFrame>) {
        let (sink, rx) = MemorySink::new();
        let bus = DisplayBus::new(Box::new(sink), &BusConfig::default(), width, height);
        (bus, rx)
    }

    pub(crate) fn context(config: AppConfig) -> PlayerContext {
        PlayerContext {
            config: Arc::new(config),
            devices: Devices {
                audio: Arc::new(ToneBackend::default()),
                particles: Arc::new(SoftwareBackend),
                accessory: Arc::new(FakeHub::default()),
                globe: Arc::new(EarthRenderer),
            },
        }
    }

    /// Waits for a frame matching `check`, failing after a few seconds.
    pub(crate) fn wait_for_frame(
        rx: &Receiver<PublishedFrame>,
        mut check: impl FnMut(&PublishedFrame) -> bool,
    ) -> PublishedFrame {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(left) {
                Ok(frame) if check(&frame) => return frame,
                Ok(_) => continue,
                Err(_) => panic!("no matching frame published"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{testing::*, *};
    use crate::{command::SmartHomeAction, descriptor::MusicAlgorithm, frame};

    fn small_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.smart_home.bind = std::net::SocketAddr::from(([127, 0, 0, 1], 0));
        config
    }

    #[test]
    fn every_descriptor_maps_to_its_player() {
        let context = context(small_config());
        let cases = [
            (
                AnimationDescriptor::sequence(vec![frame::blank(64, 64)], 10.0).unwrap(),
                "frames",
            ),
            (
                AnimationDescriptor::Scroller {
                    wide_frame: frame::blank(80, 64),
                    fps: 45.0,
                },
                "frames",
            ),
            (AnimationDescriptor::ClockOverlay, "clock"),
            (
                AnimationDescriptor::MusicReactive {
                    algorithm: MusicAlgorithm::Spectral,
                    fps: 60.0,
                },
                "music",
            ),
            (AnimationDescriptor::GpuEffect, "particles"),
            (
                AnimationDescriptor::SmartHome {
                    action: SmartHomeAction::Start,
                },
                "smart_home",
            ),
        ];
        for (descriptor, kind) in cases {
            let player = Player::for_descriptor(Arc::new(descriptor), &context);
            assert_eq!(player.kind(), kind);
            assert!(!player.is_active());
        }
    }

    #[test]
    fn check_intervals_follow_frame_rates() {
        let context = context(small_config());
        let sequence = Player::for_descriptor(
            Arc::new(AnimationDescriptor::sequence(vec![frame::blank(64, 64)], 20.0).unwrap()),
            &context,
        );
        assert_eq!(sequence.check_interval().as_millis(), 50);

        let clock = Player::for_descriptor(Arc::new(AnimationDescriptor::ClockOverlay), &context);
        assert_eq!(clock.check_interval(), period(30.0));

        let particles = Player::for_descriptor(Arc::new(AnimationDescriptor::GpuEffect), &context);
        assert_eq!(particles.check_interval(), period(120.0));
    }

    #[test]
    fn stop_returns_the_bus_within_the_check_interval() {
        let context = context(small_config());
        let descriptor =
            AnimationDescriptor::sequence(vec![frame::solid(64, 64, [9, 9, 9])], 10.0).unwrap();
        let mut player = Player::for_descriptor(Arc::new(descriptor), &context);
        let (bus, rx) = memory_bus(64, 64);

        player.start(bus).unwrap();
        assert!(player.is_active());
        wait_for_frame(&rx, |_| true);

        let start = Instant::now();
        let bus = player.stop();
        assert!(bus.is_some());
        assert!(start.elapsed() <= player.check_interval() + Duration::from_millis(200));
        assert!(!player.is_active());
        assert!(player.stop().is_none());
    }

    #[test]
    fn panicking_body_hands_the_bus_back() {
        let (bus, _rx) = memory_bus(4, 4);
        let failure = PlayerThread::spawn("test", bus, |_, _, _| panic!("boom")).unwrap_err();
        assert!(matches!(failure.error, LampError::PlayerStart(_)));
        assert_eq!(failure.bus.map(|bus| bus.dimensions()), Some((4, 4)));
    }
}
