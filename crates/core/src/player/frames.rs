use std::{ops::Range, sync::Arc, time::Duration};

use super::{period, PlayerThread, PublishLog, Ready, StartFailure};
use crate::{
    bus::DisplayBus,
    descriptor::AnimationDescriptor,
    frame::{self, Frame},
    stop::StopToken,
    Result,
};

/// Rate used when a scroller already fits the display.
const STATIC_SCROLL_FPS: f32 = 5.0;

/// Plays precomputed frames: looping sequences and horizontal scrollers.
#[derive(Debug)]
pub struct FramesPlayer {
    descriptor: Arc<AnimationDescriptor>,
    display_width: u32,
    pub(super) thread: Option<PlayerThread>,
}

impl FramesPlayer {
    pub fn new(descriptor: Arc<AnimationDescriptor>, display_width: u32) -> Self {
        Self {
            descriptor,
            display_width,
            thread: None,
        }
    }

    pub fn check_interval(&self) -> Duration {
        period(self.fps_for(self.display_width))
    }

    /// Effective rate; a scroller that does not move runs slower.
    fn fps_for(&self, display_width: u32) -> f32 {
        match self.descriptor.as_ref() {
            AnimationDescriptor::Sequence { fps, .. } => *fps,
            AnimationDescriptor::Scroller { wide_frame, .. } if wide_frame.width() <= display_width => {
                STATIC_SCROLL_FPS
            }
            AnimationDescriptor::Scroller { fps, .. } => *fps,
            _ => 0.0,
        }
    }

    pub(super) fn spawn(&self, bus: DisplayBus) -> std::result::Result<PlayerThread, StartFailure> {
        let descriptor = Arc::clone(&self.descriptor);
        let fps = self.fps_for(bus.dimensions().0);
        PlayerThread::spawn("frames", bus, move |bus, stop, ready| {
            bus.set_fps(fps);
            play(&descriptor, bus, stop, ready)
        })
    }
}

fn play(
    descriptor: &AnimationDescriptor,
    bus: &mut DisplayBus,
    stop: &StopToken,
    ready: &mut Ready,
) -> Result<()> {
    let (width, height) = bus.dimensions();
    let mut log = PublishLog::default();
    match descriptor {
        AnimationDescriptor::Sequence { frames, .. } => {
            ready.mark();
            tracing::debug!(frames = frames.len(), "frames player looping");
            loop_frames(frames, bus, stop, &mut log);
        }
        AnimationDescriptor::Scroller { wide_frame, .. } if wide_frame.width() <= width => {
            let still = centred(wide_frame, (width, height));
            ready.mark();
            loop_frames(std::slice::from_ref(&still), bus, stop, &mut log);
        }
        AnimationDescriptor::Scroller { wide_frame, .. } => {
            ready.mark();
            let offsets = scroll_offsets(wide_frame, width);
            tracing::debug!(windows = offsets.len(), "frames player scrolling");
            let mut window = frame::blank(width, height);
            'scroll: loop {
                for x in offsets.clone() {
                    if stop.is_stopped() {
                        break 'scroll;
                    }
                    fill_window(&mut window, wide_frame, x);
                    log.paced(bus, &window);
                }
            }
        }
        other => {
            return Err(crate::LampError::player_start(format!(
                "frames player cannot play `{}`",
                other.kind()
            )))
        }
    }
    Ok(())
}

fn loop_frames(frames: &[Frame], bus: &mut DisplayBus, stop: &StopToken, log: &mut PublishLog) {
    loop {
        for frame in frames {
            if stop.is_stopped() {
                return;
            }
            log.paced(bus, frame);
        }
    }
}

/// A strip no wider than the display, centred on a blank frame.
pub(super) fn centred(wide: &Frame, (width, height): (u32, u32)) -> Frame {
    let mut out = frame::blank(width, height);
    let x = (i64::from(width) - i64::from(wide.width())) / 2;
    let y = (i64::from(height) - i64::from(wide.height())) / 2;
    frame::paste(&mut out, wide, x, y);
    out
}

/// Left edges of every `width`-wide window of `wide`, one pixel per step.
pub(super) fn scroll_offsets(wide: &Frame, width: u32) -> Range<u32> {
    0..wide.width().saturating_sub(width)
}

/// Copies the window starting at column `x` into `out`, reusing its buffer.
pub(super) fn fill_window(out: &mut Frame, wide: &Frame, x: u32) {
    frame::paste(out, wide, -i64::from(x), 0);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::player::testing::{memory_bus, wait_for_frame};

    fn striped(width: u32, height: u32) -> Frame {
        Frame::from_fn(width, height, |x, _| image::Rgb([x as u8, 0, 0]))
    }

    #[test]
    fn scroller_wider_than_display_yields_each_offset() {
        let wide = striped(74, 8);
        let offsets = scroll_offsets(&wide, 64);
        assert_eq!(offsets.len(), 10);

        let mut window = frame::blank(64, 8);
        fill_window(&mut window, &wide, offsets.start);
        assert_eq!(window.get_pixel(0, 0).0[0], 0);
        fill_window(&mut window, &wide, offsets.end - 1);
        assert_eq!(window.get_pixel(0, 0).0[0], 9);
        assert_eq!(window.get_pixel(63, 7).0[0], 72);
    }

    #[test]
    fn long_scroller_streams_windows_from_one_buffer() {
        // 40k columns would be half a gigabyte if every window were kept.
        let wide = striped(40_074, 8);
        assert_eq!(scroll_offsets(&wide, 64).len(), 40_010);

        let descriptor = AnimationDescriptor::Scroller {
            wide_frame: wide,
            fps: 200.0,
        };
        let player = FramesPlayer::new(Arc::new(descriptor), 64);
        let (bus, rx) = memory_bus(64, 8);
        let thread = player.spawn(bus).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.pixels[0], 0);
        assert_eq!(second.pixels[0], 1);
        assert_eq!(second.pixels.len(), 64 * 8 * 3);
        assert!(thread.join().is_some());
    }

    #[test]
    fn scroller_that_fits_is_static() {
        assert_eq!(centred(&striped(64, 8), (64, 8)), striped(64, 8));
        assert!(scroll_offsets(&striped(64, 8), 64).is_empty());

        let descriptor = Arc::new(AnimationDescriptor::Scroller {
            wide_frame: striped(64, 8),
            fps: 45.0,
        });
        let player = FramesPlayer::new(Arc::clone(&descriptor), 64);
        assert_eq!(player.check_interval().as_millis(), 200);
        assert_eq!(FramesPlayer::new(descriptor, 32).fps_for(32), 45.0);
    }

    #[test]
    fn sequence_loops_in_order() {
        let frames = (0..3)
            .map(|i| frame::solid(4, 4, [i * 10, 0, 0]))
            .collect::<Vec<_>>();
        let descriptor = AnimationDescriptor::sequence(frames, 200.0).unwrap();
        let player = FramesPlayer::new(Arc::new(descriptor), 4);
        let (bus, rx) = memory_bus(4, 4);

        let thread = player.spawn(bus).unwrap();
        let reds: Vec<u8> = (0..7)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap().pixels[0])
            .collect();
        assert!(thread.join().is_some());

        let start = reds.iter().position(|r| *r == 0).unwrap();
        let cycle: Vec<u8> = reds[start..].iter().take(4).copied().collect();
        assert_eq!(cycle, vec![0, 10, 20, 0]);
    }

    #[test]
    fn static_scroller_publishes_the_same_frame() {
        let descriptor = AnimationDescriptor::Scroller {
            wide_frame: frame::solid(4, 4, [1, 2, 3]),
            fps: 45.0,
        };
        let player = FramesPlayer::new(Arc::new(descriptor), 4);
        let (bus, rx) = memory_bus(4, 4);
        let thread = player.spawn(bus).unwrap();

        let first = wait_for_frame(&rx, |_| true);
        let second = wait_for_frame(&rx, |_| true);
        assert_eq!(first.pixels, second.pixels);
        // 5 fps pacing.
        assert!(second.at - first.at >= Duration::from_millis(150));
        thread.join();
    }
}
