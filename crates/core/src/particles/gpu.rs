use crossbeam::channel::bounded;
use image::Rgb;

use super::{Burst, Particle, ParticleRenderer};
use crate::{
    frame::{self, Frame},
    LampError, Result,
};

const WORKGROUP_SIZE: u32 = 64;

// Particles are read as a flat float array so the layout does not depend on
// WGSL struct alignment rules: pos.xy, color.rgb, prev.xy.
const PHYSICS_SHADER: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<f32>;

const STRIDE: u32 = 7u;

@compute @workgroup_size(64)
fn step(@builtin(global_invocation_id) id: vec3<u32>) {
    let count = arrayLength(&data) / STRIDE;
    if (id.x >= count) {
        return;
    }
    let b = id.x * STRIDE;
    let pos = vec2<f32>(data[b], data[b + 1u]);
    let prev = vec2<f32>(data[b + 5u], data[b + 6u]);
    let next = pos + (pos - prev) + vec2<f32>(0.0, -0.0008);
    data[b] = next.x;
    data[b + 1u] = next.y;
    data[b + 5u] = pos.x;
    data[b + 6u] = pos.y;
}
"#;

const POINT_SHADER: &str = r#"
struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec3<f32>,
};

@vertex
fn vs_main(@location(0) pos: vec2<f32>, @location(1) color: vec3<f32>) -> VertexOut {
    var out: VertexOut;
    out.position = vec4<f32>(pos, 0.0, 1.0);
    out.color = color;
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    return vec4<f32>(in.color, 1.0);
}
"#;

/// Integrates particles in a compute pass and draws them as points into an
/// offscreen texture that is read back every frame.
pub struct GpuParticles {
    device: wgpu::Device,
    queue: wgpu::Queue,
    capacity: usize,
    width: u32,
    height: u32,
    particles: wgpu::Buffer,
    physics: wgpu::ComputePipeline,
    physics_bind_group: wgpu::BindGroup,
    points: wgpu::RenderPipeline,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    readback: wgpu::Buffer,
    padded_bytes_per_row: u32,
}

impl GpuParticles {
    pub fn new(capacity: usize, width: u32, height: u32) -> Result<Self> {
        pollster::block_on(Self::new_async(capacity.max(1), width, height))
    }

    async fn new_async(capacity: usize, width: u32, height: u32) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| LampError::player_start("no GPU adapter found"))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("particles-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                },
                None,
            )
            .await
            .map_err(LampError::player_start)?;

        let particles = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("particles"),
            size: (capacity * std::mem::size_of::<Particle>()) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::VERTEX
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let physics_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("particles-physics"),
            source: wgpu::ShaderSource::Wgsl(PHYSICS_SHADER.into()),
        });
        let physics_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("particles-physics-layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let physics_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("particles-physics-bind-group"),
            layout: &physics_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: particles.as_entire_binding(),
            }],
        });
        let physics_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("particles-physics-pipeline-layout"),
                bind_group_layouts: &[&physics_layout],
                push_constant_ranges: &[],
            });
        let physics = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("particles-physics"),
            layout: Some(&physics_pipeline_layout),
            module: &physics_module,
            entry_point: "step",
        });

        let point_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("particles-points"),
            source: wgpu::ShaderSource::Wgsl(POINT_SHADER.into()),
        });
        let point_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("particles-points-layout"),
            bind_group_layouts: &[],
            push_constant_ranges: &[],
        });
        let points = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("particles-points"),
            layout: Some(&point_layout),
            vertex: wgpu::VertexState {
                module: &point_module,
                entry_point: "vs_main",
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<Particle>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x3],
                }],
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::PointList,
                ..wgpu::PrimitiveState::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &point_module,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
        });

        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("particles-target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let padded_bytes_per_row = align_to(width * 4, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("particles-readback"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        tracing::info!(adapter = %adapter.get_info().name, capacity, "gpu particles ready");
        Ok(Self {
            device,
            queue,
            capacity,
            width,
            height,
            particles,
            physics,
            physics_bind_group,
            points,
            target,
            target_view,
            readback,
            padded_bytes_per_row,
        })
    }

    fn read_frame(&self) -> Result<Frame> {
        let slice = self.readback.slice(..);
        let (tx, rx) = bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| LampError::msg("readback callback dropped"))?
            .map_err(|err| LampError::msg(format!("readback map failed: {err}")))?;

        let mut out = frame::blank(self.width, self.height);
        {
            let mapped = slice.get_mapped_range();
            for y in 0..self.height {
                let row = (y * self.padded_bytes_per_row) as usize;
                for x in 0..self.width {
                    let at = row + x as usize * 4;
                    out.put_pixel(x, y, Rgb([mapped[at], mapped[at + 1], mapped[at + 2]]));
                }
            }
        }
        self.readback.unmap();
        Ok(out)
    }
}

impl ParticleRenderer for GpuParticles {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn advance(&mut self, burst: Option<&Burst>) -> Result<Frame> {
        if let Some(burst) = burst {
            for (offset, particles) in burst.segments(self.capacity) {
                let at = (offset * std::mem::size_of::<Particle>()) as wgpu::BufferAddress;
                self.queue
                    .write_buffer(&self.particles, at, bytemuck::cast_slice(particles));
            }
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("particles-frame"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("particles-physics"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.physics);
            pass.set_bind_group(0, &self.physics_bind_group, &[]);
            pass.dispatch_workgroups((self.capacity as u32).div_ceil(WORKGROUP_SIZE), 1, 1);
        }
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("particles-points"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.points);
            pass.set_vertex_buffer(0, self.particles.slice(..));
            pass.draw(0..self.capacity as u32, 0..1);
        }
        // Texture rows come back top first, matching frame rows.
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &self.readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        self.read_frame()
    }
}

fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}
