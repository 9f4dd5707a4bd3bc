//! Mock peripherals and helpers shared by the integration tests
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

use embassy_futures::block_on;
use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_time::Instant;
use embedded_io_async::{ErrorKind, ErrorType, Read, Write};

use orchestra_board::BoardError;
use orchestra_board::device::{DeviceState, device_id_from_mac};
use orchestra_board::hardware::{Color, Hardware, LightSensor, RgbLed, ToneOutput};
use orchestra_board::playback::Scheduler;

pub const TEST_MAC: [u8; 6] = [0xa0, 0x0b, 0xc2, 0x00, 0xff, 0x10];

/// Something a mock peripheral was told to do
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    Frequency(u32),
    Duty(u16),
    Color(Color),
}

/// Timestamped event log shared by the mocks
#[derive(Clone, Default)]
pub struct Trace(Rc<RefCell<Vec<(Instant, Event)>>>);

impl Trace {
    fn push(&self, event: Event) {
        self.0.borrow_mut().push((Instant::now(), event));
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().iter().map(|(_, event)| *event).collect()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    /// Frequency in effect each time the buzzer went from silent to sounding
    pub fn notes_started(&self) -> Vec<u32> {
        let mut notes = Vec::new();
        let (mut frequency, mut duty) = (0, 0);
        for event in self.events() {
            match event {
                Event::Frequency(hz) => frequency = hz,
                Event::Duty(d) => {
                    if duty == 0 && d > 0 {
                        notes.push(frequency);
                    }
                    duty = d;
                }
                Event::Color(_) => {}
            }
        }
        notes
    }

    /// True when the frequency never changed while the buzzer was sounding
    pub fn frequency_stable_while_sounding(&self) -> bool {
        let mut duty = 0;
        for event in self.events() {
            match event {
                Event::Frequency(_) if duty > 0 => return false,
                Event::Duty(d) => duty = d,
                _ => {}
            }
        }
        true
    }

    /// Each stretch the buzzer sounded: frequency, start and end
    pub fn sounding_spans(&self) -> Vec<(u32, Instant, Instant)> {
        let mut spans = Vec::new();
        let mut frequency = 0;
        let mut started = None;
        for (at, event) in self.0.borrow().iter().copied() {
            match event {
                Event::Frequency(hz) => frequency = hz,
                Event::Duty(0) => {
                    if let Some((hz, start)) = started.take() {
                        spans.push((hz, start, at));
                    }
                }
                Event::Duty(_) => {
                    if started.is_none() {
                        started = Some((frequency, at));
                    }
                }
                Event::Color(_) => {}
            }
        }
        spans
    }

    pub fn last_duty(&self) -> Option<u16> {
        self.events().into_iter().rev().find_map(|event| match event {
            Event::Duty(d) => Some(d),
            _ => None,
        })
    }

    pub fn duties(&self) -> Vec<u16> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Duty(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    pub fn colors(&self) -> Vec<Color> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Color(c) => Some(c),
                _ => None,
            })
            .collect()
    }
}

pub struct MockBuzzer {
    trace: Trace,
}

impl ToneOutput for MockBuzzer {
    fn set_frequency(&mut self, hz: u32) -> Result<(), BoardError> {
        self.trace.push(Event::Frequency(hz));
        Ok(())
    }

    fn set_duty(&mut self, duty: u16) -> Result<(), BoardError> {
        self.trace.push(Event::Duty(duty));
        Ok(())
    }
}

pub struct MockLed {
    trace: Trace,
}

impl RgbLed for MockLed {
    fn set_color(&mut self, color: Color) -> Result<(), BoardError> {
        self.trace.push(Event::Color(color));
        Ok(())
    }
}

pub struct MockSensor {
    value: Rc<Cell<u16>>,
}

impl LightSensor for MockSensor {
    async fn read_u16(&mut self) -> Result<u16, BoardError> {
        Ok(self.value.get())
    }
}

pub struct MockHardware;

impl Hardware for MockHardware {
    type Buzzer = MockBuzzer;
    type Led = MockLed;
    type Sensor = MockSensor;
}

pub type TestDevice = DeviceState<NoopRawMutex, MockHardware>;
pub type TestScheduler<'a> = Scheduler<'a, NoopRawMutex, MockHardware>;

/// A mock board: device state, its event trace and the light level knob
pub struct Rig {
    pub device: TestDevice,
    pub trace: Trace,
    pub light: Rc<Cell<u16>>,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_id(&device_id_from_mac(TEST_MAC))
    }

    pub fn with_id(device_id: &str) -> Self {
        let trace = Trace::default();
        let light = Rc::new(Cell::new(0));
        let device = DeviceState::new(
            device_id,
            MockBuzzer {
                trace: trace.clone(),
            },
            MockLed {
                trace: trace.clone(),
            },
            MockSensor {
                value: light.clone(),
            },
        );
        Self {
            device,
            trace,
            light,
        }
    }
}

/// Drive `body` to completion while the scheduler's runner loop runs alongside it
pub fn run_with_scheduler<F: Future>(scheduler: &TestScheduler<'_>, body: F) -> F::Output {
    block_on(async {
        match select(scheduler.run(), body).await {
            Either::First(never) => never,
            Either::Second(output) => output,
        }
    })
}

/// In-memory connection: serves `input` in chunks, records what is written
pub struct MockConn {
    input: Vec<u8>,
    pos: usize,
    chunk: usize,
    pub output: Vec<u8>,
    fail_writes: bool,
}

impl MockConn {
    pub fn new(input: &[u8]) -> Self {
        Self {
            input: input.to_vec(),
            pos: 0,
            chunk: usize::MAX,
            output: Vec::new(),
            fail_writes: false,
        }
    }

    pub fn chunked(mut self, chunk: usize) -> Self {
        self.chunk = chunk;
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl ErrorType for MockConn {
    type Error = ErrorKind;
}

impl Read for MockConn {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self
            .chunk
            .min(buf.len())
            .min(self.input.len() - self.pos);
        buf[..n].copy_from_slice(&self.input[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for MockConn {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.fail_writes {
            return Err(ErrorKind::BrokenPipe);
        }
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }
}

/// Status line, headers and body of a raw response
pub struct ParsedResponse {
    pub status_line: String,
    pub headers: Vec<String>,
    pub body: String,
}

impl ParsedResponse {
    pub fn parse(raw: &str) -> Self {
        let (head, body) = raw.split_once("\r\n\r\n").expect("response has no blank line");
        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap_or_default().to_string();
        Self {
            status_line,
            headers: lines.map(str::to_string).collect(),
            body: body.to_string(),
        }
    }

    pub fn code(&self) -> u16 {
        self.status_line
            .split(' ')
            .nth(1)
            .and_then(|code| code.parse().ok())
            .expect("status code")
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("body is JSON")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }
}
