//! Audio capture seam for the music player.
//!
//! Backends deliver mono `f32` blocks of a fixed size to a callback that runs
//! on the backend's own thread. The stream stays open until the returned
//! [`InputStream`] is closed or dropped.

#[cfg(feature = "audio-device")]
mod device;

#[cfg(feature = "audio-device")]
pub use device::CpalBackend;

use crate::Result;

/// Callback receiving one block of mono samples.
pub type BlockCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// An open capture stream.
pub trait InputStream {
    /// Stops delivering blocks. Dropping the stream has the same effect.
    fn close(self: Box<Self>);
}

/// Source of live audio.
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &str;

    fn sample_rate(&self) -> Result<u32>;

    /// Opens the input and starts calling `on_block` with `block_size`
    /// samples at a time. Fails with [`crate::LampError::PlayerStart`] when
    /// the device cannot be acquired.
    fn open_input(&self, block_size: usize, on_block: BlockCallback)
        -> Result<Box<dyn InputStream>>;
}

/// Samples per block so that one block covers one display frame.
pub fn block_size(sample_rate: u32, fps: f32) -> usize {
    let millis = 1000.0 / fps;
    ((sample_rate as f32 * millis / 1000.0).round() as usize).max(1)
}

/// Regroups arbitrarily sized device buffers into fixed-size blocks.
#[derive(Debug, Clone)]
pub struct BlockAssembler {
    size: usize,
    block: Vec<f32>,
}

impl BlockAssembler {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            block: Vec::with_capacity(size),
        }
    }

    pub fn extend<I>(&mut self, samples: I, mut emit: impl FnMut(&[f32]))
    where
        I: IntoIterator<Item = f32>,
    {
        for sample in samples {
            self.block.push(sample);
            if self.block.len() == self.size {
                emit(&self.block);
                self.block.clear();
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.block.len()
    }
}

/// Backend used when the binary is built without device support.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAudio;

impl AudioBackend for NoAudio {
    fn name(&self) -> &str {
        "none"
    }

    fn sample_rate(&self) -> Result<u32> {
        Err(crate::LampError::player_start(
            "audio capture is not available in this build",
        ))
    }

    fn open_input(&self, _: usize, _: BlockCallback) -> Result<Box<dyn InputStream>> {
        Err(crate::LampError::player_start(
            "audio capture is not available in this build",
        ))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        f32::consts::PI,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    use super::*;
    use crate::LampError;

    /// Plays a 440 Hz tone in real time from a helper thread.
    #[derive(Debug, Clone, Default)]
    pub struct ToneBackend {
        pub open_streams: Arc<AtomicUsize>,
        pub busy: bool,
    }

    struct ToneStream {
        running: Arc<AtomicBool>,
        worker: Option<thread::JoinHandle<()>>,
    }

    impl InputStream for ToneStream {
        fn close(self: Box<Self>) {}
    }

    impl Drop for ToneStream {
        fn drop(&mut self) {
            self.running.store(false, Ordering::SeqCst);
            if let Some(worker) = self.worker.take() {
                let _ = worker.join();
            }
        }
    }

    impl AudioBackend for ToneBackend {
        fn name(&self) -> &str {
            "tone"
        }

        fn sample_rate(&self) -> Result<u32> {
            Ok(8_000)
        }

        fn open_input(
            &self,
            block_size: usize,
            mut on_block: BlockCallback,
        ) -> Result<Box<dyn InputStream>> {
            if self.busy {
                return Err(LampError::player_start("device busy"));
            }
            let running = Arc::new(AtomicBool::new(true));
            let open = Arc::clone(&self.open_streams);
            open.fetch_add(1, Ordering::SeqCst);
            let flag = Arc::clone(&running);
            let worker = thread::spawn(move || {
                let block: Vec<f32> = (0..block_size)
                    .map(|i| (2.0 * PI * 440.0 * i as f32 / 8_000.0).sin())
                    .collect();
                while flag.load(Ordering::SeqCst) {
                    on_block(&block);
                    thread::sleep(Duration::from_millis(10));
                }
                open.fetch_sub(1, Ordering::SeqCst);
            });
            Ok(Box::new(ToneStream {
                running,
                worker: Some(worker),
            }))
        }
    }
}
