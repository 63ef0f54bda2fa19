use std::{sync::Arc, time::Duration};

use crossbeam::channel::{bounded, select};

use super::{period, PlayerThread, PublishLog, Ready, StartFailure};
use crate::{
    analysis::{ScrollCanvas, SpectralAnalyzer},
    audio::{block_size, AudioBackend},
    bus::DisplayBus,
    descriptor::MusicAlgorithm,
    stop::StopToken,
    Result,
};

type Line = Vec<[u8; 3]>;

/// Lines buffered between the capture callback and the player loop.
const LINE_BACKLOG: usize = 4;

/// Scrolling spectrogram driven by live audio capture.
pub struct MusicPlayer {
    algorithm: MusicAlgorithm,
    fps: f32,
    gain: f32,
    audio: Arc<dyn AudioBackend>,
    pub(super) thread: Option<PlayerThread>,
}

impl std::fmt::Debug for MusicPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MusicPlayer")
            .field("algorithm", &self.algorithm)
            .field("fps", &self.fps)
            .field("audio", &self.audio.name())
            .finish_non_exhaustive()
    }
}

impl MusicPlayer {
    pub fn new(algorithm: MusicAlgorithm, fps: f32, gain: f32, audio: Arc<dyn AudioBackend>) -> Self {
        Self {
            algorithm,
            fps,
            gain,
            audio,
            thread: None,
        }
    }

    pub fn check_interval(&self) -> Duration {
        period(self.fps)
    }

    pub(super) fn spawn(&self, bus: DisplayBus) -> std::result::Result<PlayerThread, StartFailure> {
        let audio = Arc::clone(&self.audio);
        let (algorithm, fps, gain) = (self.algorithm, self.fps, self.gain);
        PlayerThread::spawn("music", bus, move |bus, stop, ready| match algorithm {
            MusicAlgorithm::Spectral => spectral(audio.as_ref(), fps, gain, bus, stop, ready),
        })
    }
}

fn spectral(
    audio: &dyn AudioBackend,
    fps: f32,
    gain: f32,
    bus: &mut DisplayBus,
    stop: &StopToken,
    ready: &mut Ready,
) -> Result<()> {
    bus.set_fps(fps);
    let (width, height) = bus.dimensions();
    let sample_rate = audio.sample_rate()?;
    let block = block_size(sample_rate, fps);
    let mut analyzer = SpectralAnalyzer::new(width, sample_rate, gain)?;
    tracing::info!(
        device = audio.name(),
        sample_rate,
        block,
        fft = analyzer.fft_size(),
        "spectrogram starting"
    );

    let (lines_tx, lines) = bounded::<Line>(LINE_BACKLOG);
    let stream = audio.open_input(
        block,
        Box::new(move |samples| match analyzer.line(samples) {
            Ok(Some(line)) => {
                // A full backlog means the display is behind; drop the line.
                let _ = lines_tx.try_send(line);
            }
            Ok(None) => {}
            Err(err) => tracing::debug!(%err, "audio block skipped"),
        }),
    )?;
    ready.mark();

    let mut canvas = ScrollCanvas::new(width, height);
    let mut last: Option<Line> = None;
    let mut log = PublishLog::default();
    let frame_period = bus.period();
    loop {
        select! {
            recv(lines) -> line => match line {
                Ok(line) => {
                    canvas.push_line(&line);
                    log.immediate(bus, canvas.frame());
                    last = Some(line);
                }
                Err(_) => {
                    tracing::warn!("audio stream ended");
                    break;
                }
            },
            recv(stop.receiver()) -> _ => break,
            default(frame_period) => {
                if let Some(line) = &last {
                    canvas.push_line(line);
                }
                log.paced(bus, canvas.frame());
            }
        }
        if stop.is_stopped() {
            break;
        }
    }

    stream.close();
    tracing::info!("spectrogram stopped");
    Ok(())
}
