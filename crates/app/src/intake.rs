//! HTTP command intake. Every request becomes one engine command and gets one
//! short status string back.

use std::{io::Read, net::SocketAddr};

use pixel_lamp_core::{command::FrameShape, Ack, Command, EngineHandle, LampError, Result};
use rouille::{Request, Response};

pub fn server(
    bind: SocketAddr,
    engine: EngineHandle,
) -> Result<rouille::Server<impl Fn(&Request) -> Response + Send + Sync + 'static>> {
    rouille::Server::new(bind, move |request| handle_request(request, &engine))
        .map_err(|err| LampError::msg(format!("cannot bind command intake on {bind}: {err}")))
}

pub fn handle_request(request: &Request, engine: &EngineHandle) -> Response {
    rouille::router!(request,
        (GET) ["/api/health"] => {
            Response::text("ok")
        },
        (POST) ["/api/command"] => {
            match rouille::input::json_input::<Command>(request) {
                Ok(command) => reply(engine.submit(command)),
                Err(err) => {
                    tracing::debug!(%err, "rejected command body");
                    Response::text(format!("invalid command: {err}")).with_status_code(400)
                }
            }
        },
        (POST) ["/api/frames"] => {
            match raw_frames(request) {
                Ok(command) => reply(engine.submit(command)),
                Err(err) => Response::text(err.to_string()).with_status_code(400),
            }
        },
        _ => Response::empty_404()
    )
}

fn reply(outcome: Result<Ack>) -> Response {
    match outcome {
        Ok(ack) => Response::text(ack.to_string()),
        Err(err) => {
            let status = if err.is_resolution() {
                400
            } else if matches!(err, LampError::PlayerStart(_)) {
                503
            } else {
                500
            };
            Response::text(err.to_string()).with_status_code(status)
        }
    }
}

fn param<T: std::str::FromStr>(request: &Request, name: &str) -> Result<T> {
    let raw = request
        .get_param(name)
        .ok_or_else(|| LampError::InvalidCommand(format!("missing `{name}` parameter")))?;
    raw.parse()
        .map_err(|_| LampError::InvalidCommand(format!("bad `{name}` parameter `{raw}`")))
}

/// `POST /api/frames?count=&height=&width=&fps=[&dtype=]` with the pixels as
/// the body.
fn raw_frames(request: &Request) -> Result<Command> {
    let shape: FrameShape = [
        param(request, "count")?,
        param(request, "height")?,
        param(request, "width")?,
        3,
    ];
    let fps: f32 = param(request, "fps")?;
    let dtype = request
        .get_param("dtype")
        .unwrap_or_else(|| "uint8".to_string());

    let mut pixels = Vec::new();
    if let Some(mut body) = request.data() {
        body.read_to_end(&mut pixels)?;
    }
    Ok(Command::RawFrames {
        pixels,
        shape,
        dtype,
        fps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixel_lamp_core::{AppConfig, DisplayBus, Devices, Engine, NullSink};

    fn engine() -> EngineHandle {
        let config = AppConfig::default();
        let bus = DisplayBus::new(
            Box::new(NullSink),
            &config.bus,
            config.display.width,
            config.display.height,
        );
        let devices = Devices::system(&config);
        let (handle, _thread) = Engine::new(config, bus, devices).spawn().unwrap();
        handle
    }

    fn json(url: &str, body: &str) -> Request {
        Request::fake_http(
            "POST",
            url,
            vec![("Content-Type".into(), "application/json".into())],
            body.as_bytes().to_vec(),
        )
    }

    fn body(response: Response) -> String {
        let (mut reader, _) = response.data.into_reader_and_size();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn commands_get_a_status_reply() {
        let engine = engine();

        let ok = handle_request(&json("/api/command", r#"{"kind":"text","text":"hi"}"#), &engine);
        assert_eq!(ok.status_code, 200);
        assert_eq!(body(ok), "received");

        let unknown = handle_request(&json("/api/command", r#"{"kind":"music","name":"x"}"#), &engine);
        assert_eq!(unknown.status_code, 400);

        let garbage = handle_request(&json("/api/command", "{"), &engine);
        assert_eq!(garbage.status_code, 400);
    }

    #[test]
    fn raw_frames_are_read_from_the_body() {
        let engine = engine();
        let pixels = vec![9u8; 64 * 64 * 3];
        let request = Request::fake_http(
            "POST",
            "/api/frames?count=1&height=64&width=64&fps=5",
            vec![],
            pixels,
        );
        assert_eq!(handle_request(&request, &engine).status_code, 200);

        let short = Request::fake_http(
            "POST",
            "/api/frames?count=2&height=64&width=64&fps=5",
            vec![],
            vec![0; 10],
        );
        assert_eq!(handle_request(&short, &engine).status_code, 400);

        let missing = Request::fake_http("POST", "/api/frames?count=1", vec![], vec![]);
        assert_eq!(handle_request(&missing, &engine).status_code, 400);

        let huge = Request::fake_http(
            "POST",
            &format!("/api/frames?count=1&height={}&width=4&fps=5", 1usize << 62),
            vec![],
            vec![],
        );
        assert_eq!(handle_request(&huge, &engine).status_code, 400);
        assert_eq!(handle_request(&request, &engine).status_code, 200);
    }

    #[test]
    fn health_and_unknown_routes() {
        let engine = engine();
        let health = Request::fake_http("GET", "/api/health", vec![], vec![]);
        assert_eq!(handle_request(&health, &engine).status_code, 200);
        let nothing = Request::fake_http("GET", "/nope", vec![], vec![]);
        assert_eq!(handle_request(&nothing, &engine).status_code, 404);
    }
}
