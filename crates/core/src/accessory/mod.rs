//! Smart-home light accessory: characteristic state, pairing URI and the
//! network bridge that receives updates from the home hub.

use std::{net::SocketAddr, thread::JoinHandle};

use crossbeam::channel::Sender;
use rouille::{Request, Response};
use serde::{Deserialize, Serialize};

use crate::{config::SmartHomeConfig, LampError, Result};

/// Accessory category advertised for a light bulb.
pub const CATEGORY_LIGHTBULB: u64 = 5;

/// Colorsys-style HSV conversion; hue in degrees, saturation and value in
/// percent. Channels are truncated, not rounded.
pub fn hsv_to_rgb(hue: f64, saturation: f64, value: f64) -> [u8; 3] {
    let h = (hue / 360.0).rem_euclid(1.0);
    let s = (saturation / 100.0).clamp(0.0, 1.0);
    let v = (value / 100.0).clamp(0.0, 1.0);

    let (r, g, b) = if s == 0.0 {
        (v, v, v)
    } else {
        let sector = (h * 6.0).floor();
        let f = h * 6.0 - sector;
        let p = v * (1.0 - s);
        let q = v * (1.0 - s * f);
        let t = v * (1.0 - s * (1.0 - f));
        match sector as u8 % 6 {
            0 => (v, t, p),
            1 => (q, v, p),
            2 => (p, v, t),
            3 => (p, q, v),
            4 => (t, p, v),
            _ => (v, p, q),
        }
    };
    [r, g, b].map(|c| (c * 255.0) as u8)
}

/// Pairing URI encoded into the setup QR code.
pub fn setup_uri(pincode: &str, setup_id: &str, category: u64) -> Result<String> {
    let digits: String = pincode.chars().filter(|c| *c != '-').collect();
    if digits.len() != 8 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(LampError::msg(format!(
            "pairing code `{pincode}` must be eight digits"
        )));
    }
    let pin: u64 = digits
        .parse()
        .map_err(|_| LampError::msg(format!("pairing code `{pincode}` is not numeric")))?;

    let payload = ((category & 0xff) << 31) | (2 << 27) | (pin & 0x7fff_ffff);
    Ok(format!("X-HM://{:0>9}{setup_id}", base36(payload)))
}

fn base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Changed characteristics; absent fields are left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacteristicUpdate {
    #[serde(default)]
    pub on: Option<bool>,
    #[serde(default)]
    pub hue: Option<f64>,
    #[serde(default)]
    pub saturation: Option<f64>,
    #[serde(default)]
    pub brightness: Option<f64>,
}

/// Light characteristics. Every setter returns the colour the display
/// should switch to, or `None` when nothing visible changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightState {
    on: bool,
    hue: f64,
    saturation: f64,
    brightness: f64,
}

impl Default for LightState {
    fn default() -> Self {
        Self {
            on: false,
            hue: 0.0,
            saturation: 100.0,
            brightness: 100.0,
        }
    }
}

impl LightState {
    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn color(&self) -> [u8; 3] {
        hsv_to_rgb(self.hue, self.saturation, self.brightness)
    }

    pub fn set_on(&mut self, on: bool) -> Option<[u8; 3]> {
        self.on = on;
        if on {
            Some(self.color())
        } else {
            Some([0, 0, 0])
        }
    }

    pub fn set_hue(&mut self, hue: f64) -> Option<[u8; 3]> {
        self.hue = hue.clamp(0.0, 360.0);
        self.on.then(|| self.color())
    }

    pub fn set_saturation(&mut self, saturation: f64) -> Option<[u8; 3]> {
        self.saturation = saturation.clamp(0.0, 100.0);
        self.on.then(|| self.color())
    }

    pub fn set_brightness(&mut self, brightness: f64) -> Option<[u8; 3]> {
        self.brightness = brightness.clamp(0.0, 100.0);
        self.on.then(|| self.color())
    }

    /// Applies `on`, then hue, saturation and brightness; the last visible
    /// change wins.
    pub fn apply(&mut self, update: CharacteristicUpdate) -> Option<[u8; 3]> {
        let mut shown = None;
        if let Some(on) = update.on {
            shown = self.set_on(on).or(shown);
        }
        if let Some(hue) = update.hue {
            shown = self.set_hue(hue).or(shown);
        }
        if let Some(saturation) = update.saturation {
            shown = self.set_saturation(saturation).or(shown);
        }
        if let Some(brightness) = update.brightness {
            shown = self.set_brightness(brightness).or(shown);
        }
        shown
    }
}

/// A running accessory endpoint.
pub trait AccessoryDriver: Send {
    fn address(&self) -> Option<SocketAddr>;

    /// Closes the listener and waits for its thread.
    fn stop(self: Box<Self>);
}

/// Starts accessory endpoints that forward updates to `updates`.
pub trait AccessoryBackend: Send + Sync {
    fn start(
        &self,
        config: &SmartHomeConfig,
        updates: Sender<CharacteristicUpdate>,
    ) -> Result<Box<dyn AccessoryDriver>>;
}

#[derive(Debug, Serialize)]
struct AccessoryInfo {
    name: String,
    category: u64,
    setup_uri: String,
}

#[derive(Debug, Serialize)]
struct Status<'a> {
    status: &'a str,
}

/// JSON-over-HTTP bridge: `PUT /characteristics` with a
/// [`CharacteristicUpdate`] body, `GET /accessory` for identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpBridge;

struct HttpDriver {
    address: SocketAddr,
    handle: JoinHandle<()>,
    stop: std::sync::mpsc::Sender<()>,
}

impl AccessoryDriver for HttpDriver {
    fn address(&self) -> Option<SocketAddr> {
        Some(self.address)
    }

    fn stop(self: Box<Self>) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            tracing::warn!("accessory bridge thread panicked");
        }
        tracing::info!(address = %self.address, "accessory bridge stopped");
    }
}

impl AccessoryBackend for HttpBridge {
    fn start(
        &self,
        config: &SmartHomeConfig,
        updates: Sender<CharacteristicUpdate>,
    ) -> Result<Box<dyn AccessoryDriver>> {
        let info = AccessoryInfo {
            name: config.name.clone(),
            category: CATEGORY_LIGHTBULB,
            setup_uri: setup_uri(&config.pincode, &config.setup_id, CATEGORY_LIGHTBULB)?,
        };
        let server = rouille::Server::new(config.bind, move |request| {
            handle_request(request, &info, &updates)
        })
        .map_err(LampError::player_start)?;
        let address = server.server_addr();
        let (handle, stop) = server.stoppable();

        tracing::info!(%address, name = %config.name, "accessory bridge listening");
        Ok(Box::new(HttpDriver {
            address,
            handle,
            stop,
        }))
    }
}

fn handle_request(
    request: &Request,
    info: &AccessoryInfo,
    updates: &Sender<CharacteristicUpdate>,
) -> Response {
    rouille::router!(request,
        (GET) ["/accessory"] => {
            Response::json(info)
        },
        (PUT) ["/characteristics"] => {
            match rouille::input::json_input::<CharacteristicUpdate>(request) {
                Ok(update) => match updates.send(update) {
                    Ok(()) => Response::json(&Status { status: "ok" }),
                    Err(_) => Response::json(&Status { status: "accessory stopped" })
                        .with_status_code(503),
                },
                Err(err) => {
                    tracing::debug!(%err, "rejected characteristic update");
                    Response::json(&Status { status: "invalid update" }).with_status_code(400)
                }
            }
        },
        _ => Response::empty_404()
    )
}
