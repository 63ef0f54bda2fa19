//! Rotating earth shown behind the clock.
//!
//! Rendering a full rotation is slow, so a background producer keeps a
//! capacity-1 mailbox stocked with batches of frames. The clock player only
//! ever reads the mailbox without blocking and keeps its last batch when it
//! is empty.

use std::{
    f32::consts::PI,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use chrono::{DateTime, Datelike, Timelike, Utc};
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use image::Rgb;

use crate::{
    config::ClockConfig,
    frame::{self, Frame},
    stop::StopToken,
    LampError, Result,
};

const OCEAN: [u8; 3] = [128, 128, 255];
const LAND: [u8; 3] = [178, 255, 178];
const NIGHT_FACTOR: f32 = 0.4;

/// Coarse continents as `(lat, lon, lat radius, lon radius)` in degrees.
const LANDMASSES: [(f32, f32, f32, f32); 11] = [
    (45.0, -100.0, 22.0, 30.0),
    (15.0, -90.0, 8.0, 8.0),
    (-15.0, -60.0, 22.0, 14.0),
    (72.0, -42.0, 10.0, 12.0),
    (50.0, 15.0, 12.0, 20.0),
    (5.0, 20.0, 30.0, 20.0),
    (45.0, 90.0, 22.0, 50.0),
    (20.0, 78.0, 10.0, 8.0),
    (0.0, 115.0, 6.0, 15.0),
    (-25.0, 135.0, 10.0, 17.0),
    (-80.0, 0.0, 10.0, 360.0),
];

/// Produces a single globe image.
pub trait GlobeRenderer: Send + Sync {
    fn render(&self, size: u32, longitude: f32, at: DateTime<Utc>) -> Result<Frame>;
}

/// Orthographic earth with a day/night terminator.
#[derive(Debug, Default, Clone, Copy)]
pub struct EarthRenderer;

impl GlobeRenderer for EarthRenderer {
    fn render(&self, size: u32, longitude: f32, at: DateTime<Utc>) -> Result<Frame> {
        if size == 0 {
            return Err(LampError::msg("globe size must be positive"));
        }
        Ok(render_earth(size, longitude, at))
    }
}

fn wrap_degrees(value: f32) -> f32 {
    (value + 180.0).rem_euclid(360.0) - 180.0
}

fn is_land(lat: f32, lon: f32) -> bool {
    LANDMASSES.iter().any(|&(clat, clon, rlat, rlon)| {
        let dlat = (lat - clat) / rlat;
        let dlon = wrap_degrees(lon - clon) / rlon;
        dlat * dlat + dlon * dlon <= 1.0
    })
}

/// Latitude and longitude (degrees) where the sun is overhead at `at`.
pub fn subsolar_point(at: DateTime<Utc>) -> (f32, f32) {
    let day = at.ordinal() as f32;
    let declination = -23.44 * ((360.0 / 365.0) * (day + 10.0)).to_radians().cos();
    let hours = at.hour() as f32 + at.minute() as f32 / 60.0 + at.second() as f32 / 3600.0;
    (declination, wrap_degrees(-15.0 * (hours - 12.0)))
}

/// Draws the globe centred on `(longitude, 0)`, filling a `size`x`size` frame.
pub fn render_earth(size: u32, longitude: f32, at: DateTime<Utc>) -> Frame {
    let (sun_lat, sun_lon) = subsolar_point(at);
    let (sun_lat, sun_lon) = (sun_lat.to_radians(), sun_lon.to_radians());
    let mut out = frame::blank(size, size);

    for py in 0..size {
        for px in 0..size {
            let x = (px as f32 + 0.5) / size as f32 * 2.0 - 1.0;
            let y = 1.0 - (py as f32 + 0.5) / size as f32 * 2.0;
            let r2 = x * x + y * y;
            if r2 > 1.0 {
                continue;
            }
            let z = (1.0 - r2).sqrt();
            let lat = y.asin();
            let lon = longitude.to_radians() + x.atan2(z);

            let base = if is_land(lat * 180.0 / PI, wrap_degrees(lon * 180.0 / PI)) {
                LAND
            } else {
                OCEAN
            };
            let daylight =
                lat.cos() * sun_lat.cos() * (lon - sun_lon).cos() + lat.sin() * sun_lat.sin();
            let color = if daylight < 0.0 {
                base.map(|c| (c as f32 * NIGHT_FACTOR) as u8)
            } else {
                base
            };
            out.put_pixel(px, py, Rgb(color));
        }
    }
    out
}

/// Renders `count` frames at evenly spaced longitudes. Returns `None` when
/// stopped part way.
pub fn render_batch(
    renderer: &dyn GlobeRenderer,
    size: u32,
    count: usize,
    at: DateTime<Utc>,
    stop: &StopToken,
) -> Result<Option<Vec<Frame>>> {
    let mut batch = Vec::with_capacity(count);
    for index in 0..count {
        if stop.is_stopped() {
            return Ok(None);
        }
        let longitude = -180.0 + 360.0 * index as f32 / count as f32;
        batch.push(renderer.render(size, longitude, at)?);
    }
    Ok(Some(batch))
}

pub type GlobeBatch = Vec<Frame>;

/// Outcome of offering a batch to the mailbox.
#[derive(Debug)]
pub enum Offer {
    Delivered,
    /// The slot stayed full for the whole wait.
    Returned(GlobeBatch),
    Stopped,
    Closed,
}

pub fn globe_mailbox() -> (GlobeSender, GlobeReceiver) {
    let (tx, rx) = bounded(1);
    (GlobeSender { tx }, GlobeReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct GlobeSender {
    tx: Sender<GlobeBatch>,
}

impl GlobeSender {
    pub fn is_full(&self) -> bool {
        self.tx.is_full()
    }

    /// Puts `batch` in the slot, waiting up to `wait` for it to free up.
    pub fn offer(&self, batch: GlobeBatch, wait: Duration, stop: &StopToken) -> Offer {
        match self.tx.try_send(batch) {
            Ok(()) => Offer::Delivered,
            Err(TrySendError::Disconnected(_)) => Offer::Closed,
            Err(TrySendError::Full(batch)) => {
                if stop.wait(wait) {
                    return Offer::Stopped;
                }
                match self.tx.try_send(batch) {
                    Ok(()) => Offer::Delivered,
                    Err(TrySendError::Full(batch)) => Offer::Returned(batch),
                    Err(TrySendError::Disconnected(_)) => Offer::Closed,
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct GlobeReceiver {
    rx: Receiver<GlobeBatch>,
}

impl GlobeReceiver {
    /// Non-blocking; the newest batch if one is waiting.
    pub fn latest(&self) -> Option<GlobeBatch> {
        self.rx.try_iter().last()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProducerSettings {
    pub size: u32,
    pub preview_frames: usize,
    pub full_frames: usize,
    pub refresh: Duration,
    pub backoff: Duration,
}

impl From<&ClockConfig> for ProducerSettings {
    fn from(config: &ClockConfig) -> Self {
        Self {
            size: config.globe_size,
            preview_frames: config.preview_frames,
            full_frames: config.full_frames,
            refresh: config.refresh_interval(),
            backoff: config.backoff(),
        }
    }
}

/// Background worker filling the globe mailbox.
#[derive(Debug)]
pub struct GlobeProducer {
    handle: JoinHandle<()>,
}

impl GlobeProducer {
    pub fn spawn(
        renderer: Arc<dyn GlobeRenderer>,
        settings: ProducerSettings,
        sender: GlobeSender,
        stop: StopToken,
    ) -> Result<Self> {
        let handle = thread::Builder::new()
            .name("globe-producer".into())
            .spawn(move || produce(renderer.as_ref(), settings, &sender, &stop))?;
        Ok(Self { handle })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) {
        if self.handle.join().is_err() {
            tracing::warn!("globe producer panicked");
        }
    }
}

fn produce(
    renderer: &dyn GlobeRenderer,
    settings: ProducerSettings,
    sender: &GlobeSender,
    stop: &StopToken,
) {
    let mut preview_sent = settings.preview_frames == 0;
    let mut pending: Option<GlobeBatch> = None;

    while !stop.is_stopped() {
        let batch = match pending.take() {
            Some(batch) => batch,
            None => {
                if sender.is_full() {
                    if stop.wait(settings.backoff) {
                        break;
                    }
                    continue;
                }
                let count = if preview_sent {
                    settings.full_frames
                } else {
                    settings.preview_frames
                };
                match render_batch(renderer, settings.size, count, Utc::now(), stop) {
                    Ok(Some(batch)) => batch,
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(%err, "globe render failed, skipping cycle");
                        if stop.wait(settings.backoff) {
                            break;
                        }
                        continue;
                    }
                }
            }
        };

        let frames = batch.len();
        match sender.offer(batch, settings.backoff, stop) {
            Offer::Delivered => {
                tracing::debug!(frames, "globe batch delivered");
                if !preview_sent {
                    preview_sent = true;
                    continue;
                }
                if stop.wait(settings.refresh) {
                    break;
                }
            }
            Offer::Returned(batch) => pending = Some(batch),
            Offer::Stopped | Offer::Closed => break,
        }
    }
    tracing::debug!("globe producer finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stop::stop_pair;
    use chrono::TimeZone;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Instant,
    };

    fn equinox_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap()
    }

    #[test]
    fn day_and_night_sides() {
        // Mid Atlantic faces the sun, the western Pacific does not.
        let day = render_earth(16, -30.0, equinox_noon());
        let night = render_earth(16, 150.0, equinox_noon());

        assert_eq!(day.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(day.get_pixel(8, 8).0, OCEAN);
        assert_eq!(night.get_pixel(8, 8).0, [51, 51, 102]);
    }

    #[test]
    fn subsolar_longitude_follows_utc_time() {
        let (_, lon) = subsolar_point(equinox_noon());
        assert!(lon.abs() < 0.01);
        let evening = Utc.with_ymd_and_hms(2024, 3, 20, 18, 0, 0).unwrap();
        let (_, lon) = subsolar_point(evening);
        assert!((lon + 90.0).abs() < 0.01);
    }

    #[test]
    fn mailbox_holds_one_batch() {
        let (_handle, stop) = stop_pair();
        let (tx, rx) = globe_mailbox();
        let wait = Duration::from_millis(10);

        assert!(matches!(tx.offer(vec![frame::blank(1, 1)], wait, &stop), Offer::Delivered));
        assert!(tx.is_full());
        let start = Instant::now();
        match tx.offer(vec![frame::blank(2, 2)], wait, &stop) {
            Offer::Returned(batch) => assert_eq!(batch[0].width(), 2),
            other => panic!("expected the batch back, got {other:?}"),
        }
        let took = start.elapsed();
        assert!(took >= wait);
        assert!(took < wait + Duration::from_millis(100), "offer blocked for {took:?}");

        assert_eq!(rx.latest().map(|b| b[0].width()), Some(1));
        assert!(rx.latest().is_none());
    }

    struct Flaky {
        calls: AtomicUsize,
        failures: usize,
    }

    impl GlobeRenderer for Flaky {
        fn render(&self, size: u32, _: f32, _: DateTime<Utc>) -> Result<Frame> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(LampError::msg("no texture"));
            }
            Ok(frame::blank(size, size))
        }
    }

    fn settings() -> ProducerSettings {
        ProducerSettings {
            size: 4,
            preview_frames: 2,
            full_frames: 3,
            refresh: Duration::from_secs(30),
            backoff: Duration::from_millis(10),
        }
    }

    fn wait_for_batch(rx: &GlobeReceiver) -> GlobeBatch {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(batch) = rx.latest() {
                return batch;
            }
            assert!(Instant::now() < deadline, "no batch produced");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn producer_sends_preview_then_full_batch() {
        let (mut handle, stop) = stop_pair();
        let (tx, rx) = globe_mailbox();
        let producer = GlobeProducer::spawn(Arc::new(EarthRenderer), settings(), tx, stop).unwrap();

        assert_eq!(wait_for_batch(&rx).len(), 2);
        assert_eq!(wait_for_batch(&rx).len(), 3);

        // Now parked on the 30 s refresh wait; stop must cut it short.
        let start = Instant::now();
        handle.stop();
        producer.join();
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn render_failures_skip_the_cycle() {
        let (_handle, stop) = stop_pair();
        let (tx, rx) = globe_mailbox();
        let renderer = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            failures: 3,
        });
        let _producer = GlobeProducer::spawn(renderer, settings(), tx, stop).unwrap();

        assert_eq!(wait_for_batch(&rx).len(), 2);
    }
}
