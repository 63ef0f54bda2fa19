//! Core library for the Pixel Lamp LED matrix.
//!
//! An [`Engine`] turns incoming [`Command`]s into [`AnimationDescriptor`]s
//! and keeps exactly one player running for the current descriptor. Players
//! push finished frames through the [`DisplayBus`], which paces them to the
//! player's frame rate. Each module owns one subsystem: asset loading, globe
//! rendering, spectral analysis, particles, the smart-home accessory and so
//! on.

pub mod accessory;
pub mod analysis;
pub mod assets;
pub mod audio;
pub mod bus;
pub mod command;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod frame;
pub mod globe;
pub mod particles;
pub mod player;
pub mod render;
pub mod stop;

pub use assets::AssetCache;
pub use bus::{DisplayBus, FrameSink, MemorySink, NullSink, UdpSink};
pub use command::{Ack, CacheKind, Command, SmartHomeAction};
pub use config::AppConfig;
pub use descriptor::{AnimationDescriptor, MusicAlgorithm};
pub use engine::{Engine, EngineHandle};
pub use error::{LampError, Result};
pub use frame::Frame;
pub use player::{Devices, Player};
