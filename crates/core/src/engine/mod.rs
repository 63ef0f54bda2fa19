//! The control loop: resolves commands into descriptors and swaps players.
//!
//! Commands are handled strictly one at a time. The engine owns the display
//! bus while no player runs and the current player otherwise, so a new player
//! can only start after the old one has been joined.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};

use crate::{
    assets::AssetCache,
    bus::DisplayBus,
    command::{Ack, Command},
    config::AppConfig,
    descriptor::{AnimationDescriptor, MusicAlgorithm},
    player::{Devices, Player, PlayerContext, StartFailure},
    render::{qr_frame, text_scroller},
    LampError, Result,
};

/// Scroll rate for text messages.
pub const TEXT_FPS: f32 = 45.0;
/// Rate for QR images; they fit the display and never move.
pub const QR_FPS: f32 = 5.0;

/// A command waiting for the engine, with the channel for its reply.
#[derive(Debug)]
pub struct Request {
    pub command: Command,
    pub reply: Sender<Result<Ack>>,
}

/// Cloneable front door to a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: Sender<Request>,
}

impl EngineHandle {
    /// Queues `command` and blocks until the engine has handled it.
    pub fn submit(&self, command: Command) -> Result<Ack> {
        let (reply, answer) = bounded(1);
        self.tx
            .send(Request { command, reply })
            .map_err(|_| LampError::msg("engine is not running"))?;
        answer
            .recv()
            .map_err(|_| LampError::msg("engine dropped the command"))?
    }
}

/// Unbounded request queue; requests are served in arrival order.
pub fn request_channel() -> (EngineHandle, Receiver<Request>) {
    let (tx, rx) = unbounded();
    (EngineHandle { tx }, rx)
}

pub struct Engine {
    context: PlayerContext,
    cache: AssetCache,
    bus: Option<DisplayBus>,
    player: Option<Player>,
    current: Option<Arc<AnimationDescriptor>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("player", &self.active_player())
            .field("current", &self.current.as_ref().map(|d| d.kind()))
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(config: AppConfig, bus: DisplayBus, devices: Devices) -> Self {
        let cache = AssetCache::new(&config.cache, config.display);
        Self {
            context: PlayerContext {
                config: Arc::new(config),
                devices,
            },
            cache,
            bus: Some(bus),
            player: None,
            current: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.context.config
    }

    /// Kind of the running player, if any.
    pub fn active_player(&self) -> Option<&'static str> {
        self.player
            .as_ref()
            .filter(|p| p.is_active())
            .map(Player::kind)
    }

    pub fn current(&self) -> Option<&AnimationDescriptor> {
        self.current.as_deref()
    }

    /// Runs the configured startup command, if there is one.
    pub fn boot(&mut self) {
        if let Some(command) = self.context.config.startup.clone() {
            tracing::info!(command = command.label(), "running startup command");
            if let Err(err) = self.handle(command) {
                tracing::warn!(%err, "startup command failed");
            }
        }
    }

    /// Resolves and plays `command`. Resolution errors leave the current
    /// player untouched.
    pub fn handle(&mut self, command: Command) -> Result<Ack> {
        let label = command.label();
        tracing::info!(command = label, "command received");
        let descriptor = self.resolve(&command)?;
        self.swap(Arc::new(descriptor))?;
        tracing::debug!(command = label, player = ?self.active_player(), "command applied");
        Ok(Ack::received())
    }

    /// Turns a command into something playable. May convert assets.
    pub fn resolve(&self, command: &Command) -> Result<AnimationDescriptor> {
        let display = self.context.config.display;
        match command {
            Command::CacheRef { file_type, path } => self.cache.load(*file_type, path),
            Command::RawFrames {
                pixels,
                shape,
                dtype,
                fps,
            } => self.cache.load_raw(pixels, *shape, dtype, *fps),
            Command::Music { name } => Ok(AnimationDescriptor::MusicReactive {
                algorithm: MusicAlgorithm::from_name(name)?,
                fps: self.context.config.audio.fps,
            }),
            Command::Gpu => Ok(AnimationDescriptor::GpuEffect),
            Command::SmartHome { action } => Ok(AnimationDescriptor::SmartHome { action: *action }),
            Command::Clock => Ok(AnimationDescriptor::ClockOverlay),
            Command::Text { text } => Ok(AnimationDescriptor::Scroller {
                wide_frame: text_scroller(text, display.width, display.height),
                fps: TEXT_FPS,
            }),
            Command::Qr { data } => Ok(AnimationDescriptor::Scroller {
                wide_frame: qr_frame(data, display.width, display.height, [255, 255, 255])?,
                fps: QR_FPS,
            }),
        }
    }

    fn swap(&mut self, next: Arc<AnimationDescriptor>) -> Result<()> {
        let bus = self.reclaim_bus()?;
        match self.launch(Arc::clone(&next), bus) {
            Ok(player) => {
                self.player = Some(player);
                self.current = Some(next);
                Ok(())
            }
            Err(StartFailure { error, bus }) => {
                tracing::warn!(%error, kind = next.kind(), "player failed to start");
                self.restore(bus);
                Err(error)
            }
        }
    }

    /// Restarts the previous mode after a failed start, or goes idle.
    fn restore(&mut self, bus: Option<DisplayBus>) {
        let Some(bus) = bus else {
            tracing::error!("display bus lost during a failed start, idling");
            self.current = None;
            return;
        };
        let Some(previous) = self.current.clone() else {
            self.bus = Some(bus);
            return;
        };
        match self.launch(Arc::clone(&previous), bus) {
            Ok(player) => {
                tracing::info!(kind = previous.kind(), "previous mode restored");
                self.player = Some(player);
            }
            Err(StartFailure { error, bus }) => {
                tracing::error!(%error, kind = previous.kind(), "previous mode failed too, idling");
                self.current = None;
                self.bus = bus;
            }
        }
    }

    fn launch(
        &self,
        descriptor: Arc<AnimationDescriptor>,
        bus: DisplayBus,
    ) -> std::result::Result<Player, StartFailure> {
        let mut player = Player::for_descriptor(descriptor, &self.context);
        player.start(bus)?;
        Ok(player)
    }

    /// Stops the running player, if any, and takes the bus back.
    fn reclaim_bus(&mut self) -> Result<DisplayBus> {
        if let Some(mut player) = self.player.take() {
            if let Some(bus) = player.stop() {
                return Ok(bus);
            }
        }
        self.bus
            .take()
            .ok_or_else(|| LampError::msg("display bus was lost with a crashed player"))
    }

    /// Serves requests until every [`EngineHandle`] is gone, then stops the
    /// player.
    pub fn serve(&mut self, requests: Receiver<Request>) {
        for Request { command, reply } in requests.iter() {
            let label = command.label();
            let outcome = self.handle(command);
            if let Err(err) = &outcome {
                tracing::warn!(command = label, %err, "command failed");
            }
            let _ = reply.send(outcome);
        }
        self.shutdown();
    }

    /// Boots and serves on a dedicated thread.
    pub fn spawn(mut self) -> Result<(EngineHandle, JoinHandle<()>)> {
        let (handle, requests) = request_channel();
        let thread = thread::Builder::new()
            .name("engine".into())
            .spawn(move || {
                self.boot();
                self.serve(requests);
            })?;
        Ok((handle, thread))
    }

    pub fn shutdown(&mut self) {
        if let Ok(bus) = self.reclaim_bus() {
            self.bus = Some(bus);
        }
        tracing::info!("engine stopped");
    }
}
