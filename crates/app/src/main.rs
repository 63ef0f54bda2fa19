mod intake;

use std::{path::PathBuf, thread};

use clap::{Parser, Subcommand, ValueEnum};
use pixel_lamp_core::{
    AppConfig, AssetCache, CacheKind, Devices, DisplayBus, Engine, FrameSink, MemorySink,
    NullSink, UdpSink,
};
use tracing_subscriber::EnvFilter;

fn main() -> pixel_lamp_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { sink } => run_serve(config, sink),
        Commands::Precompute { kind, input } => run_precompute(&config, kind, &input),
    }
}

fn load_config(path: Option<&std::path::Path>) -> pixel_lamp_core::Result<AppConfig> {
    match path {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading configuration");
            AppConfig::load(path)
        }
        None => Ok(AppConfig::default()),
    }
}

fn run_serve(config: AppConfig, sink: SinkKind) -> pixel_lamp_core::Result<()> {
    tracing::info!(
        ?sink,
        width = config.display.width,
        height = config.display.height,
        "starting pixel lamp"
    );

    let sink: Box<dyn FrameSink> = match sink {
        SinkKind::Udp => Box::new(UdpSink::connect(config.bus.address)?),
        SinkKind::Memory => {
            let (sink, frames) = MemorySink::new();
            thread::Builder::new()
                .name("frame-counter".into())
                .spawn(move || {
                    for (count, frame) in frames.iter().enumerate() {
                        if count % 600 == 0 {
                            tracing::info!(count, bytes = frame.pixels.len(), "frames published");
                        }
                    }
                })?;
            Box::new(sink)
        }
        SinkKind::Null => Box::new(NullSink),
    };
    let bus = DisplayBus::new(sink, &config.bus, config.display.width, config.display.height);

    let devices = Devices::system(&config);
    let bind = config.intake.bind;
    let (engine, _engine_thread) = Engine::new(config, bus, devices).spawn()?;

    let server = intake::server(bind, engine)?;
    tracing::info!(address = %server.server_addr(), "command intake listening");
    server.run();
    Ok(())
}

fn run_precompute(
    config: &AppConfig,
    kind: AssetKind,
    input: &PathBuf,
) -> pixel_lamp_core::Result<()> {
    tracing::info!(?kind, input = %input.display(), "precomputing frame archive");
    let cache = AssetCache::new(&config.cache, config.display);
    let archive = cache.precompute(kind.into(), input)?;
    tracing::info!(archive = %archive.display(), "frame archive ready");
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Playback engine for the Pixel Lamp LED matrix", long_about = None)]
struct Cli {
    /// JSON configuration file; defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the engine and accept commands over HTTP.
    Serve {
        /// Where finished frames go.
        #[arg(long, value_enum, default_value_t = SinkKind::Udp)]
        sink: SinkKind,
    },
    /// Convert a video, sticker or photo into the frame cache ahead of time.
    Precompute {
        #[arg(value_enum)]
        kind: AssetKind,
        /// Source file, absolute or relative to the cache directory.
        input: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SinkKind {
    Udp,
    Memory,
    Null,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AssetKind {
    Video,
    Sticker,
    Photo,
}

impl From<AssetKind> for CacheKind {
    fn from(kind: AssetKind) -> Self {
        match kind {
            AssetKind::Video => CacheKind::Video,
            AssetKind::Sticker => CacheKind::Sticker,
            AssetKind::Photo => CacheKind::Photo,
        }
    }
}
