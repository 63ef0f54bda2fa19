//! Rate-paced outbound channel carrying finished frames to the display.
//!
//! Every publish writes one message made of the channel tag followed by the
//! raw RGB bytes of the frame. [`DisplayBus::publish`] then sleeps for
//! `max(0, 1/fps - elapsed_since_last_publish)`, which is the only deliberate
//! throttle in the system.

use std::{
    net::{SocketAddr, UdpSocket},
    thread,
    time::{Duration, Instant},
};

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::{config::BusConfig, frame::Frame, LampError, Result};

/// Largest UDP payload over IPv4; a whole frame must fit in one.
pub const MAX_DATAGRAM: usize = 65_507;

/// Transport under the bus. Implementations only move bytes.
pub trait FrameSink: Send {
    fn send(&mut self, channel: &[u8], payload: &[u8]) -> Result<()>;
}

/// Sends each frame as a single UDP datagram: tag bytes, then pixels.
#[derive(Debug)]
pub struct UdpSink {
    socket: UdpSocket,
    scratch: Vec<u8>,
}

impl UdpSink {
    pub fn connect(address: SocketAddr) -> Result<Self> {
        let local: SocketAddr = if address.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(address)?;
        tracing::info!(%address, "display bus connected");
        Ok(Self {
            socket,
            scratch: Vec::new(),
        })
    }
}

impl FrameSink for UdpSink {
    fn send(&mut self, channel: &[u8], payload: &[u8]) -> Result<()> {
        self.scratch.clear();
        self.scratch.extend_from_slice(channel);
        self.scratch.extend_from_slice(payload);
        if self.scratch.len() > MAX_DATAGRAM {
            return Err(LampError::BusPublish(format!(
                "{}-byte frame exceeds the {MAX_DATAGRAM}-byte datagram limit",
                self.scratch.len()
            )));
        }
        self.socket
            .send(&self.scratch)
            .map_err(|err| LampError::BusPublish(err.to_string()))?;
        Ok(())
    }
}

/// A frame as observed on a [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedFrame {
    pub channel: Vec<u8>,
    pub pixels: Vec<u8>,
    pub at: Instant,
}

/// In-process sink used for dry runs and tests.
#[derive(Debug, Clone)]
pub struct MemorySink {
    tx: Sender<PublishedFrame>,
}

impl MemorySink {
    pub fn new() -> (Self, Receiver<PublishedFrame>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl FrameSink for MemorySink {
    fn send(&mut self, channel: &[u8], payload: &[u8]) -> Result<()> {
        self.tx
            .send(PublishedFrame {
                channel: channel.to_vec(),
                pixels: payload.to_vec(),
                at: Instant::now(),
            })
            .map_err(|_| LampError::BusPublish("memory sink receiver dropped".into()))
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn send(&mut self, _channel: &[u8], _payload: &[u8]) -> Result<()> {
        Ok(())
    }
}

pub struct DisplayBus {
    sink: Box<dyn FrameSink>,
    channel: Vec<u8>,
    width: u32,
    height: u32,
    period: Duration,
    last_publish: Instant,
}

impl DisplayBus {
    pub fn new(sink: Box<dyn FrameSink>, config: &BusConfig, width: u32, height: u32) -> Self {
        Self {
            sink,
            channel: config.channel.as_bytes().to_vec(),
            width,
            height,
            period: period_for(config.fps),
            last_publish: Instant::now(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Changes the pacing rate. Players call this when they take over the bus.
    pub fn set_fps(&mut self, fps: f32) {
        self.period = period_for(fps);
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sends the frame and sleeps out the rest of the current frame period.
    pub fn publish(&mut self, frame: &Frame) -> Result<()> {
        let sent = self.send(frame);
        let wait = self.remaining();
        if !wait.is_zero() {
            thread::sleep(wait);
        }
        self.last_publish = Instant::now();
        sent
    }

    /// Sends the frame without pacing and without touching the pacing clock.
    /// Returns how long a paced publish would have waited.
    pub fn publish_now(&mut self, frame: &Frame) -> Result<Duration> {
        self.send(frame)?;
        Ok(self.remaining())
    }

    fn remaining(&self) -> Duration {
        self.period.saturating_sub(self.last_publish.elapsed())
    }

    fn send(&mut self, frame: &Frame) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(LampError::BusPublish(format!(
                "frame is {}x{}, display is {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        self.sink.send(&self.channel, frame.as_raw())
    }
}

impl std::fmt::Debug for DisplayBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayBus")
            .field("channel", &String::from_utf8_lossy(&self.channel))
            .field("width", &self.width)
            .field("height", &self.height)
            .field("period", &self.period)
            .finish()
    }
}

fn period_for(fps: f32) -> Duration {
    if fps.is_finite() && fps > 0.0 {
        Duration::from_secs_f32(1.0 / fps)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame;

    fn memory_bus(fps: f32) -> (DisplayBus, Receiver<PublishedFrame>) {
        let (sink, rx) = MemorySink::new();
        let config = BusConfig {
            fps,
            ..BusConfig::default()
        };
        (DisplayBus::new(Box::new(sink), &config, 4, 2), rx)
    }

    #[test]
    fn publishes_tag_and_raw_pixels() {
        let (mut bus, rx) = memory_bus(1000.0);
        let frame = frame::solid(4, 2, [1, 2, 3]);

        bus.publish(&frame).unwrap();

        let sent = rx.try_recv().unwrap();
        assert_eq!(sent.channel, b"A");
        assert_eq!(sent.pixels.len(), 4 * 2 * 3);
        assert_eq!(&sent.pixels[..3], &[1, 2, 3]);
    }

    #[test]
    fn paces_to_the_configured_rate() {
        let (mut bus, rx) = memory_bus(50.0);
        let frame = frame::blank(4, 2);

        let start = Instant::now();
        for _ in 0..5 {
            bus.publish(&frame).unwrap();
        }

        assert!(start.elapsed() >= Duration::from_millis(90));
        assert_eq!(rx.try_iter().count(), 5);
    }

    #[test]
    fn publish_now_does_not_sleep() {
        let (mut bus, rx) = memory_bus(1.0);
        let frame = frame::blank(4, 2);

        let start = Instant::now();
        let pending = bus.publish_now(&frame).unwrap();

        assert!(start.elapsed() < Duration::from_millis(500));
        assert!(pending > Duration::from_millis(500));
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn udp_sink_refuses_frames_beyond_one_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut sink = UdpSink::connect(receiver.local_addr().unwrap()).unwrap();

        sink.send(b"A", &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(receiver.recv(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"A\x01\x02\x03");

        let err = sink.send(b"A", &vec![0u8; 148 * 148 * 3]).unwrap_err();
        assert!(matches!(err, LampError::BusPublish(_)));
    }

    #[test]
    fn rejects_frames_of_the_wrong_size() {
        let (mut bus, _rx) = memory_bus(1000.0);
        let err = bus.publish(&frame::blank(3, 3)).unwrap_err();
        assert!(matches!(err, LampError::BusPublish(_)));
    }

    #[test]
    fn udp_sink_writes_one_datagram_per_frame() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut sink = UdpSink::connect(receiver.local_addr().unwrap()).unwrap();

        sink.send(b"A", &[7, 8, 9]).unwrap();

        let mut buf = [0u8; 16];
        let len = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[b'A', 7, 8, 9]);
    }
}
