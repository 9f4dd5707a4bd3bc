//! Request dispatcher
//!
//! Serves exactly one request per connection, driving [`ConnectionStateMachine`] through
//! read, route, execute and write. Faults are logged here and never reach the listener.

use alloc::format;
use alloc::string::ToString;
use alloc::vec::Vec;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Timer;
use embedded_io_async::{Read, Write};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::device::DeviceState;
use crate::hardware::{Color, Hardware};
use crate::http::{
    HttpError, MAX_HEADER_LINE, MAX_REQUEST_LINE, Method, RequestReader, Response, Status,
    parse_content_length, parse_request_line, write_response,
};
use crate::playback::{Admission, DutyPolicy, Melody, Note, Scheduler, Tone};
use crate::state_machine::{CloseReason, ConnectionEvent, ConnectionStateMachine};
use crate::{BoardError, config};

/// Known endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Health,
    Sensor,
    LedPulse,
    LedBlink,
    Tone,
    Melody,
}

impl Route {
    pub fn resolve(method: Method, path: &str) -> Option<Self> {
        match (method, path) {
            (Method::Get, "/health") => Some(Route::Health),
            (Method::Get, "/sensor") => Some(Route::Sensor),
            (Method::Get, "/led") => Some(Route::LedPulse),
            (Method::Post, "/led") => Some(Route::LedBlink),
            (Method::Post, "/tone") => Some(Route::Tone),
            (Method::Post, "/melody") => Some(Route::Melody),
            _ => None,
        }
    }
}

/// Body size limit for a request path
pub fn body_limit(path: &str) -> usize {
    match path {
        "/tone" => config::TONE_BODY_LIMIT,
        "/melody" => config::MELODY_BODY_LIMIT,
        _ => config::DEFAULT_BODY_LIMIT,
    }
}

/// Malformed input or an unavailable board; answered with a 4xx/5xx error payload
#[derive(Debug, Clone, PartialEq)]
pub enum RequestError {
    /// Body is not JSON
    InvalidJson(alloc::string::String),
    /// JSON is well formed but a field is missing or mistyped
    InvalidField(alloc::string::String),
    /// A field is present but out of range
    OutOfRange {
        field: &'static str,
        detail: &'static str,
    },
    BodyTooLarge { declared: usize, limit: usize },
    Device(BoardError),
    Halted,
}

impl RequestError {
    fn from_json(error: serde_json::Error) -> Self {
        match error.classify() {
            serde_json::error::Category::Data => RequestError::InvalidField(error.to_string()),
            _ => RequestError::InvalidJson(error.to_string()),
        }
    }

    pub fn into_response(self) -> Response {
        match self {
            RequestError::InvalidJson(detail) => {
                Response::error(Status::BadRequest, "invalid_json", &detail)
            }
            RequestError::InvalidField(detail) => {
                Response::error(Status::BadRequest, "invalid_field", &detail)
            }
            RequestError::OutOfRange { field, detail } => Response::error(
                Status::BadRequest,
                "out_of_range",
                &format!("{field}: {detail}"),
            ),
            RequestError::BodyTooLarge { declared, limit } => Response::error(
                Status::PayloadTooLarge,
                "payload_too_large",
                &format!("body of {declared} bytes exceeds the {limit} byte limit"),
            ),
            RequestError::Device(e) => Response::error(
                Status::ServiceUnavailable,
                "device_error",
                &e.to_string(),
            ),
            RequestError::Halted => Response::error(
                Status::ServiceUnavailable,
                "halted",
                "board has been shut down",
            ),
        }
    }
}

impl From<BoardError> for RequestError {
    fn from(error: BoardError) -> Self {
        match error {
            BoardError::Halted => RequestError::Halted,
            other => RequestError::Device(other),
        }
    }
}

/// `duty` as sent by clients: a fraction or `"light"`
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
enum DutyField {
    Fraction(f32),
    Mode(DutyMode),
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum DutyMode {
    Light,
}

/// `POST /tone` body, also the shape of one melody note
#[derive(Debug, Deserialize)]
struct ToneBody {
    freq: i64,
    ms: i64,
    duty: Option<DutyField>,
}

#[derive(Debug, Deserialize)]
struct MelodyBody {
    #[serde(default)]
    notes: Vec<ToneBody>,
    gap_ms: Option<i64>,
    duty: Option<DutyField>,
}

#[derive(Serialize)]
struct HealthPayload<'a> {
    status: &'static str,
    device_id: &'a str,
    api_version: &'static str,
}

#[derive(Serialize)]
struct TonePayload {
    playing: bool,
    until_ms_from_now: u64,
}

#[derive(Serialize)]
struct MelodyPayload {
    queued: usize,
}

#[derive(Serialize)]
struct PulsePayload {
    blink: &'static str,
}

#[derive(Serialize)]
struct BlinkPayload {
    led_blink: &'static str,
}

/// Durations past `config::MAX_NOTE_MS` are refused; non-positive ones are left to the
/// scheduler, which skips them
fn check_duration(ms: i64) -> Result<(), RequestError> {
    if ms > 0 && ms as u64 > config::MAX_NOTE_MS {
        return Err(RequestError::OutOfRange {
            field: "ms",
            detail: "exceeds the longest allowed note",
        });
    }
    Ok(())
}

fn resolve_duty(field: Option<DutyField>) -> Result<Option<DutyPolicy>, RequestError> {
    match field {
        None => Ok(None),
        Some(DutyField::Mode(DutyMode::Light)) => Ok(Some(DutyPolicy::FromLight)),
        Some(DutyField::Fraction(duty)) if (0.0..=1.0).contains(&duty) => {
            Ok(Some(DutyPolicy::Fixed(duty)))
        }
        Some(DutyField::Fraction(_)) => Err(RequestError::OutOfRange {
            field: "duty",
            detail: "expected a number between 0.0 and 1.0 or \"light\"",
        }),
    }
}

fn parse_body<'de, T: Deserialize<'de>>(body: &'de [u8]) -> Result<T, RequestError> {
    serde_json::from_slice(body).map_err(RequestError::from_json)
}

/// Routes requests to the device and the playback scheduler
pub struct Dispatcher<'a, M: RawMutex, H: Hardware> {
    device: &'a DeviceState<M, H>,
    scheduler: &'a Scheduler<'a, M, H>,
}

impl<'a, M: RawMutex, H: Hardware> Dispatcher<'a, M, H> {
    pub fn new(device: &'a DeviceState<M, H>, scheduler: &'a Scheduler<'a, M, H>) -> Self {
        Self { device, scheduler }
    }

    /// Serve one request on `conn`. The caller closes the connection afterwards.
    pub async fn serve<C: Read + Write>(&self, conn: &mut C) -> CloseReason {
        let mut sm = ConnectionStateMachine::new();

        if let Err(e) = self.exchange(conn, &mut sm).await {
            let state = sm.get_current_state();
            sm.handle_event(ConnectionEvent::Fault);
            warn!("[HTTP] Connection fault in {:?}: {:?}", state, e);
        }

        sm.close_reason()
            .unwrap_or(CloseReason::Fault(sm.get_current_state()))
    }

    async fn exchange<C: Read + Write>(
        &self,
        conn: &mut C,
        sm: &mut ConnectionStateMachine,
    ) -> Result<(), HttpError> {
        let mut reader = RequestReader::new(conn);

        let mut line: heapless::Vec<u8, MAX_REQUEST_LINE> = heapless::Vec::new();
        reader.read_line(&mut line).await?;
        let request = parse_request_line(&line)?;
        sm.handle_event(ConnectionEvent::RequestLineRead);

        let mut header: heapless::Vec<u8, MAX_HEADER_LINE> = heapless::Vec::new();
        let mut content_length = None;
        loop {
            reader.read_line(&mut header).await?;
            if header.is_empty() {
                break;
            }
            if let Some(length) = parse_content_length(&header)? {
                content_length = Some(length);
            }
        }

        let has_body = request.method == Method::Post;
        sm.handle_event(ConnectionEvent::HeadersDone { has_body });

        let body = if has_body {
            let body = match reader
                .read_body(content_length, body_limit(&request.path))
                .await
            {
                Ok(body) => Ok(body),
                Err(HttpError::BodyTooLarge { declared, limit }) => {
                    Err(RequestError::BodyTooLarge { declared, limit })
                }
                Err(e) => return Err(e),
            };
            sm.handle_event(ConnectionEvent::BodyRead);
            body
        } else {
            Ok(Vec::new())
        };

        let route = Route::resolve(request.method, &request.path);
        sm.handle_event(ConnectionEvent::Routed {
            found: route.is_some(),
        });

        let response = match route {
            None => Response::not_found(),
            Some(route) => {
                let result = match body {
                    Ok(body) => self.execute(route, &body).await,
                    Err(e) => Err(e),
                };
                sm.handle_event(ConnectionEvent::Executed);
                result.unwrap_or_else(RequestError::into_response)
            }
        };

        let conn = reader.into_inner();
        write_response(conn, &response).await?;
        sm.handle_event(ConnectionEvent::ResponseWritten);

        info!(
            "[HTTP] {:?} {} -> {}",
            request.method,
            request.path,
            response.status.code()
        );
        Ok(())
    }

    /// Run a routed request and build its success payload
    pub async fn execute(&self, route: Route, body: &[u8]) -> Result<Response, RequestError> {
        match route {
            Route::Health => Ok(Response::json(
                Status::Ok,
                &HealthPayload {
                    status: "ok",
                    device_id: self.device.device_id(),
                    api_version: config::API_VERSION,
                },
            )),
            Route::Sensor => {
                let reading = self.device.read_light().await?;
                Ok(Response::json(Status::Ok, &reading))
            }
            Route::LedPulse => {
                self.pulse_led().await?;
                Ok(Response::json(Status::Ok, &PulsePayload { blink: "done" }))
            }
            Route::LedBlink => {
                self.blink_red().await?;
                Ok(Response::json(
                    Status::Ok,
                    &BlinkPayload {
                        led_blink: "red 5 times",
                    },
                ))
            }
            Route::Tone => self.start_tone(parse_body(body)?).await,
            Route::Melody => self.start_melody(parse_body(body)?).await,
        }
    }

    async fn start_tone(&self, body: ToneBody) -> Result<Response, RequestError> {
        let duty = resolve_duty(body.duty)?.unwrap_or(self.scheduler.config().default_duty);
        check_duration(body.ms)?;

        let payload = match self.scheduler.play_tone(Tone::new(body.freq, body.ms, duty)).await {
            Admission::Started { until_ms } => TonePayload {
                playing: true,
                until_ms_from_now: until_ms,
            },
            Admission::Skipped => TonePayload {
                playing: false,
                until_ms_from_now: 0,
            },
            Admission::Refused => return Err(RequestError::Halted),
        };
        Ok(Response::json(Status::Ok, &payload))
    }

    async fn start_melody(&self, body: MelodyBody) -> Result<Response, RequestError> {
        let duty = resolve_duty(body.duty)?.unwrap_or(self.scheduler.config().default_duty);
        let gap_ms = match body.gap_ms {
            None => self.scheduler.config().default_gap_ms,
            Some(gap) => match u64::try_from(gap) {
                Err(_) => {
                    return Err(RequestError::OutOfRange {
                        field: "gap_ms",
                        detail: "must not be negative",
                    });
                }
                Ok(gap) if gap > config::MAX_GAP_MS => {
                    return Err(RequestError::OutOfRange {
                        field: "gap_ms",
                        detail: "exceeds the longest allowed gap",
                    });
                }
                Ok(gap) => gap,
            },
        };

        let notes = body
            .notes
            .into_iter()
            .map(|note| {
                check_duration(note.ms)?;
                Ok(Note {
                    frequency_hz: note.freq,
                    duration_ms: note.ms,
                    duty: resolve_duty(note.duty)?,
                })
            })
            .collect::<Result<Vec<_>, RequestError>>()?;
        let queued = notes.len();

        let melody = Melody {
            notes,
            gap_ms,
            duty,
        };
        match self.scheduler.play_melody(melody).await {
            Admission::Refused => Err(RequestError::Halted),
            Admission::Started { .. } | Admission::Skipped => {
                Ok(Response::json(Status::Ok, &MelodyPayload { queued }))
            }
        }
    }

    /// White for a moment, then back to whatever was showing
    async fn pulse_led(&self) -> Result<(), BoardError> {
        if self.device.is_halted() {
            return Err(BoardError::Halted);
        }
        let previous = self.device.color();
        self.device.set_color(Color::WHITE)?;
        Timer::after_millis(config::LED_PULSE_MS).await;
        self.device.set_color(previous)
    }

    async fn blink_red(&self) -> Result<(), BoardError> {
        if self.device.is_halted() {
            return Err(BoardError::Halted);
        }
        let previous = self.device.color();
        for _ in 0..config::LED_BLINK_COUNT {
            self.device.set_color(Color::RED)?;
            Timer::after_millis(config::LED_PULSE_MS).await;
            self.device.set_color(Color::OFF)?;
            Timer::after_millis(config::LED_PULSE_MS).await;
        }
        self.device.set_color(previous)
    }
}
