//! Firework-style particle effect.
//!
//! [`ParticleField`] decides when and where bursts appear and where they land
//! in the fixed-size particle ring. A [`ParticleRenderer`] owns the particle
//! state, integrates it one step per frame and rasterises the result. The
//! wgpu renderer does both on the GPU; [`SoftwareParticles`] is the fallback.

#[cfg(feature = "gpu")]
mod gpu;

#[cfg(feature = "gpu")]
pub use gpu::GpuParticles;

use std::f32::consts::TAU;

use image::Rgb;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    config::ParticleConfig,
    frame::{self, Frame},
    Result,
};

/// Constant acceleration applied every step, in clip-space units.
pub const GRAVITY: [f32; 2] = [0.0, -0.0008];

/// One point of light. `prev` is the position one step earlier, so the
/// velocity is implicit.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "gpu", derive(bytemuck::Pod, bytemuck::Zeroable))]
pub struct Particle {
    pub pos: [f32; 2],
    pub color: [f32; 3],
    pub prev: [f32; 2],
}

/// Verlet step: `next = pos + (pos - prev) + GRAVITY`.
pub fn integrate(particle: &mut Particle) {
    let [x, y] = particle.pos;
    let [px, py] = particle.prev;
    particle.prev = particle.pos;
    particle.pos = [x + (x - px) + GRAVITY[0], y + (y - py) + GRAVITY[1]];
}

/// Particles written into the ring starting at `start`, wrapping at the end.
#[derive(Debug, Clone, PartialEq)]
pub struct Burst {
    pub start: usize,
    pub particles: Vec<Particle>,
}

impl Burst {
    /// Contiguous `(offset, particles)` writes for a ring of `capacity`.
    pub fn segments(&self, capacity: usize) -> Vec<(usize, &[Particle])> {
        if capacity == 0 || self.particles.is_empty() {
            return Vec::new();
        }
        let start = self.start % capacity;
        let head = self.particles.len().min(capacity - start);
        let (first, rest) = self.particles.split_at(head);
        let mut out = vec![(start, first)];
        if !rest.is_empty() {
            out.push((0, rest));
        }
        out
    }

    pub fn apply(&self, ring: &mut [Particle]) {
        let capacity = ring.len();
        for (offset, particles) in self.segments(capacity) {
            ring[offset..offset + particles.len()].copy_from_slice(particles);
        }
    }
}

/// Decides when bursts happen and what they contain.
#[derive(Debug)]
pub struct ParticleField {
    capacity: usize,
    cursor: usize,
    spawn_probability: f64,
    rng: StdRng,
}

impl ParticleField {
    pub fn new(config: &ParticleConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_rng(config: &ParticleConfig, rng: StdRng) -> Self {
        Self {
            capacity: config.capacity.max(1),
            cursor: 0,
            spawn_probability: config.spawn_probability.clamp(0.0, 1.0),
            rng,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Rolls for a burst this frame.
    pub fn tick(&mut self) -> Option<Burst> {
        if self.rng.gen_bool(self.spawn_probability) {
            Some(self.spawn_burst())
        } else {
            None
        }
    }

    /// A burst of 50..300 particles from one random point, written at the
    /// current ring cursor.
    pub fn spawn_burst(&mut self) -> Burst {
        let count = self.rng.gen_range(50..300).min(self.capacity);
        let origin = [self.rng.gen_range(-0.8..0.8), self.rng.gen_range(-0.2..0.8)];
        let base: [f32; 3] = [
            self.rng.gen_range(0.2..1.0),
            self.rng.gen_range(0.2..1.0),
            self.rng.gen_range(0.2..1.0),
        ];

        let particles = (0..count)
            .map(|_| {
                let brightness: f32 = self.rng.gen_range(0.7..1.8);
                let angle: f32 = self.rng.gen_range(0.0..TAU);
                let radius: f32 = self.rng.gen_range(0.005..0.08);
                Particle {
                    pos: origin,
                    color: base.map(|c| (c * brightness).clamp(0.0, 1.0)),
                    prev: [
                        origin[0] - angle.cos() * radius,
                        origin[1] - angle.sin() * radius,
                    ],
                }
            })
            .collect::<Vec<_>>();

        let burst = Burst {
            start: self.cursor,
            particles,
        };
        self.cursor = (self.cursor + count) % self.capacity;
        burst
    }
}

/// Maps clip-space particles to pixels; later particles win.
pub fn rasterize(particles: &[Particle], width: u32, height: u32) -> Frame {
    let mut out = frame::blank(width, height);
    for particle in particles {
        let [x, y] = particle.pos;
        let px = ((x + 1.0) / 2.0 * width as f32).floor();
        let py = ((1.0 - y) / 2.0 * height as f32).floor();
        if px < 0.0 || py < 0.0 || px >= width as f32 || py >= height as f32 {
            continue;
        }
        let color = particle.color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
        out.put_pixel(px as u32, py as u32, Rgb(color));
    }
    out
}

/// Owns particle state and produces one frame per call.
pub trait ParticleRenderer {
    fn name(&self) -> &'static str;

    /// Writes `burst` into the ring, integrates one step and renders.
    fn advance(&mut self, burst: Option<&Burst>) -> Result<Frame>;
}

/// Creates renderers on the player thread.
pub trait ParticleBackend: Send + Sync {
    fn create(&self, capacity: usize, width: u32, height: u32)
        -> Result<Box<dyn ParticleRenderer>>;
}

#[derive(Debug, Clone)]
pub struct SoftwareParticles {
    ring: Vec<Particle>,
    width: u32,
    height: u32,
}

impl SoftwareParticles {
    pub fn new(capacity: usize, width: u32, height: u32) -> Self {
        Self {
            ring: vec![Particle::default(); capacity.max(1)],
            width,
            height,
        }
    }

    pub fn particles(&self) -> &[Particle] {
        &self.ring
    }
}

impl ParticleRenderer for SoftwareParticles {
    fn name(&self) -> &'static str {
        "software"
    }

    fn advance(&mut self, burst: Option<&Burst>) -> Result<Frame> {
        if let Some(burst) = burst {
            burst.apply(&mut self.ring);
        }
        self.ring.iter_mut().for_each(integrate);
        Ok(rasterize(&self.ring, self.width, self.height))
    }
}

/// Prefers the GPU when built with it and an adapter is present.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoParticles;

impl ParticleBackend for AutoParticles {
    fn create(
        &self,
        capacity: usize,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn ParticleRenderer>> {
        if let Some(gpu) = try_gpu(capacity, width, height) {
            return Ok(gpu);
        }
        Ok(Box::new(SoftwareParticles::new(capacity, width, height)))
    }
}

#[cfg(feature = "gpu")]
fn try_gpu(capacity: usize, width: u32, height: u32) -> Option<Box<dyn ParticleRenderer>> {
    match GpuParticles::new(capacity, width, height) {
        Ok(gpu) => Some(Box::new(gpu)),
        Err(err) => {
            tracing::warn!(%err, "gpu particles unavailable, using software");
            None
        }
    }
}

#[cfg(not(feature = "gpu"))]
fn try_gpu(_: usize, _: u32, _: u32) -> Option<Box<dyn ParticleRenderer>> {
    None
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareBackend;

impl ParticleBackend for SoftwareBackend {
    fn create(
        &self,
        capacity: usize,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn ParticleRenderer>> {
        Ok(Box::new(SoftwareParticles::new(capacity, width, height)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(capacity: usize) -> ParticleField {
        let config = ParticleConfig {
            capacity,
            ..ParticleConfig::default()
        };
        ParticleField::with_rng(&config, StdRng::seed_from_u64(7))
    }

    #[test]
    fn particle_layout_is_seven_floats() {
        assert_eq!(std::mem::size_of::<Particle>(), 28);
    }

    #[test]
    fn verlet_step_applies_gravity() {
        let mut p = Particle {
            pos: [0.0, 0.0],
            color: [1.0; 3],
            prev: [-0.01, 0.0],
        };
        integrate(&mut p);
        assert_eq!(p.prev, [0.0, 0.0]);
        assert!((p.pos[0] - 0.01).abs() < 1e-6);
        assert!((p.pos[1] + 0.0008).abs() < 1e-6);
    }

    #[test]
    fn bursts_respect_ranges() {
        let mut field = field(1024);
        for _ in 0..20 {
            let burst = field.spawn_burst();
            assert!((50..300).contains(&burst.particles.len()));
            let origin = burst.particles[0].pos;
            for p in &burst.particles {
                assert_eq!(p.pos, origin);
                assert!(p.color.iter().all(|c| (0.0..=1.0).contains(c)));
                let dx = p.pos[0] - p.prev[0];
                let dy = p.pos[1] - p.prev[1];
                let radius = (dx * dx + dy * dy).sqrt();
                assert!((0.004..0.081).contains(&radius));
            }
        }
    }

    #[test]
    fn ring_cursor_wraps() {
        let mut field = field(400);
        let first = field.spawn_burst();
        let second = field.spawn_burst();
        assert_eq!(first.start, 0);
        assert_eq!(second.start, first.particles.len() % 400);

        let mut expected = (first.particles.len() + second.particles.len()) % 400;
        for _ in 0..10 {
            let burst = field.spawn_burst();
            assert_eq!(burst.start, expected);
            expected = (expected + burst.particles.len()) % 400;
        }
    }

    #[test]
    fn wrapped_bursts_split_into_two_writes() {
        let particle = |v: f32| Particle {
            pos: [v, v],
            ..Particle::default()
        };
        let burst = Burst {
            start: 8,
            particles: (0..5).map(|i| particle(i as f32)).collect(),
        };

        let segments = burst.segments(10);
        assert_eq!(segments.len(), 2);
        assert_eq!((segments[0].0, segments[0].1.len()), (8, 2));
        assert_eq!((segments[1].0, segments[1].1.len()), (0, 3));

        let mut ring = vec![Particle::default(); 10];
        burst.apply(&mut ring);
        assert_eq!(ring[9].pos, [1.0, 1.0]);
        assert_eq!(ring[0].pos, [2.0, 2.0]);
        assert_eq!(ring[5].pos, [0.0, 0.0]);
    }

    #[test]
    fn rasterizes_clip_space_to_pixels() {
        let particles = [
            Particle {
                pos: [0.0, 0.0],
                color: [1.0, 0.0, 0.0],
                prev: [0.0, 0.0],
            },
            Particle {
                pos: [-1.0, 1.0],
                color: [0.0, 1.0, 0.0],
                prev: [0.0, 0.0],
            },
            Particle {
                pos: [2.0, 0.0],
                color: [0.0, 0.0, 1.0],
                prev: [0.0, 0.0],
            },
        ];
        let frame = rasterize(&particles, 64, 64);
        assert_eq!(frame.get_pixel(32, 32).0, [255, 0, 0]);
        assert_eq!(frame.get_pixel(0, 0).0, [0, 255, 0]);
        assert_eq!(frame.pixels().filter(|p| p.0 != [0, 0, 0]).count(), 2);
    }

    #[test]
    fn software_renderer_moves_bursts() {
        let mut field = field(1024);
        let mut renderer = SoftwareParticles::new(1024, 64, 64);
        let burst = field.spawn_burst();
        let count = burst.particles.len();

        let first = renderer.advance(Some(&burst)).unwrap();
        assert!(first.pixels().any(|p| p.0 != [0, 0, 0]));
        assert!(renderer.particles()[..count]
            .iter()
            .all(|p| p.pos != burst.particles[0].pos));
    }
}
