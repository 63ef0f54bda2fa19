use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, FromSample, Sample, SampleFormat, SizedSample, StreamConfig, SupportedBufferSize,
};

use super::{AudioBackend, BlockAssembler, BlockCallback, InputStream};
use crate::{LampError, Result};

/// Captures from a cpal input device, keeping only the first channel.
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    device_name: Option<String>,
}

impl CpalBackend {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }

    fn device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        match &self.device_name {
            Some(wanted) => host
                .input_devices()
                .map_err(LampError::player_start)?
                .find(|device| device.name().map(|n| &n == wanted).unwrap_or(false))
                .ok_or_else(|| LampError::player_start(format!("input device `{wanted}` not found"))),
            None => host
                .default_input_device()
                .ok_or_else(|| LampError::player_start("no input device available")),
        }
    }
}

struct CpalStream {
    stream: cpal::Stream,
}

impl InputStream for CpalStream {
    fn close(self: Box<Self>) {
        if let Err(err) = self.stream.pause() {
            tracing::warn!(%err, "failed to pause input stream");
        }
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        self.device_name.as_deref().unwrap_or("default")
    }

    fn sample_rate(&self) -> Result<u32> {
        let config = self
            .device()?
            .default_input_config()
            .map_err(LampError::player_start)?;
        Ok(config.sample_rate().0)
    }

    fn open_input(
        &self,
        block_size: usize,
        on_block: BlockCallback,
    ) -> Result<Box<dyn InputStream>> {
        let device = self.device()?;
        let supported = device
            .default_input_config()
            .map_err(LampError::player_start)?;
        let sample_format = supported.sample_format();
        let fixed = match supported.buffer_size() {
            SupportedBufferSize::Range { min, max } => {
                (*min as usize..=*max as usize).contains(&block_size)
            }
            SupportedBufferSize::Unknown => false,
        };
        let mut config: StreamConfig = supported.into();
        if fixed {
            config.buffer_size = BufferSize::Fixed(block_size as u32);
        }

        let stream = match sample_format {
            SampleFormat::F32 => build::<f32>(&device, &config, block_size, on_block),
            SampleFormat::I16 => build::<i16>(&device, &config, block_size, on_block),
            SampleFormat::U16 => build::<u16>(&device, &config, block_size, on_block),
            SampleFormat::I32 => build::<i32>(&device, &config, block_size, on_block),
            other => Err(LampError::player_start(format!(
                "unsupported sample format {other:?}"
            ))),
        }?;
        stream.play().map_err(LampError::player_start)?;

        tracing::info!(
            device = self.name(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            block_size,
            "audio input opened"
        );
        Ok(Box::new(CpalStream { stream }))
    }
}

fn build<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    block_size: usize,
    mut on_block: BlockCallback,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    let mut assembler = BlockAssembler::new(block_size);
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono = data.iter().step_by(channels).map(|s| s.to_sample::<f32>());
                assembler.extend(mono, |block| on_block(block));
            },
            |err| tracing::warn!(%err, "audio input stream error"),
            None,
        )
        .map_err(LampError::player_start)
}
