//! Playback scheduler
//!
//! Owns the single playback slot. A request for a new tone or melody cancels whatever
//! is playing, waits (bounded) for the runner to acknowledge that the buzzer is silent,
//! and only then installs the new task. The runner is one long-lived future, so two
//! tasks can never drive the buzzer at the same time.

use alloc::vec::Vec;
use core::cell::Cell;

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer, with_timeout};
use log::{debug, info, warn};

use crate::device::DeviceState;
use crate::hardware::Hardware;
use crate::sensor::light_duty;
use crate::{BoardError, config};

/// How the buzzer duty is chosen while a note sounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DutyPolicy {
    /// Constant duty, 0.0–1.0
    Fixed(f32),
    /// Re-derived from the light sensor every refresh interval
    FromLight,
}

impl Default for DutyPolicy {
    fn default() -> Self {
        DutyPolicy::Fixed(config::DEFAULT_DUTY)
    }
}

/// A single sustained frequency
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency_hz: i64,
    pub duration_ms: i64,
    pub duty: DutyPolicy,
}

impl Tone {
    pub fn new(frequency_hz: i64, duration_ms: i64, duty: DutyPolicy) -> Self {
        Self {
            frequency_hz,
            duration_ms,
            duty,
        }
    }

    pub fn is_audible(&self) -> bool {
        audible(self.frequency_hz, self.duration_ms).is_some()
    }
}

/// One melody note; a missing duty inherits the melody's
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    pub frequency_hz: i64,
    pub duration_ms: i64,
    pub duty: Option<DutyPolicy>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Melody {
    pub notes: Vec<Note>,
    pub gap_ms: u64,
    pub duty: DutyPolicy,
}

impl Melody {
    /// Playing time: audible notes plus the gaps between consecutive notes
    pub fn total_ms(&self) -> u64 {
        let notes = self
            .notes
            .iter()
            .filter_map(|note| audible(note.frequency_hz, note.duration_ms))
            .fold(0u64, |total, (_, ms)| total.saturating_add(ms));
        let gaps = self
            .gap()
            .saturating_mul(self.notes.len().saturating_sub(1) as u64);
        notes.saturating_add(gaps)
    }

    /// Gap between notes, capped at `config::MAX_GAP_MS`
    pub fn gap(&self) -> u64 {
        self.gap_ms.min(config::MAX_GAP_MS)
    }
}

/// The operation occupying the playback slot
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackTask {
    Tone(Tone),
    Melody(Melody),
}

/// Result of a play request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Installed; playback ends this many milliseconds from now
    Started { until_ms: u64 },
    /// Nothing audible to play; the previous task was still stopped
    Skipped,
    /// The board has been shut down
    Refused,
}

/// Slot occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    /// Handed to the runner, not yet picked up
    Installed,
    Playing,
}

/// Scheduler tunables
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackConfig {
    /// Duty for tones and melodies whose request carries none
    pub default_duty: DutyPolicy,
    /// Re-evaluation cadence of light-derived duty
    pub duty_refresh: Duration,
    /// Upper bound on the stop handshake
    pub preempt_wait: Duration,
    /// Gap between melody notes when the request carries none
    pub default_gap_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_duty: DutyPolicy::default(),
            duty_refresh: Duration::from_millis(config::DUTY_REFRESH_MS),
            preempt_wait: Duration::from_millis(config::PREEMPT_WAIT_MS),
            default_gap_ms: config::DEFAULT_GAP_MS,
        }
    }
}

/// Single-slot tone/melody scheduler
pub struct Scheduler<'a, M: RawMutex, H: Hardware> {
    device: &'a DeviceState<M, H>,
    config: PlaybackConfig,
    request: Signal<M, PlaybackTask>,
    cancel: Signal<M, ()>,
    stopped: Signal<M, ()>,
    state: BlockingMutex<M, Cell<PlaybackState>>,
}

impl<'a, M: RawMutex, H: Hardware> Scheduler<'a, M, H> {
    pub fn new(device: &'a DeviceState<M, H>, config: PlaybackConfig) -> Self {
        Self {
            device,
            config,
            request: Signal::new(),
            cancel: Signal::new(),
            stopped: Signal::new(),
            state: BlockingMutex::new(Cell::new(PlaybackState::Idle)),
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn state(&self) -> PlaybackState {
        self.state.lock(|state| state.get())
    }

    /// A task is installed or playing
    pub fn is_active(&self) -> bool {
        self.state() != PlaybackState::Idle
    }

    fn set_state(&self, next: PlaybackState) {
        self.state.lock(|state| state.set(next));
    }

    /// Replace the current task with a single tone
    pub async fn play_tone(&self, tone: Tone) -> Admission {
        if self.device.is_halted() {
            return Admission::Refused;
        }
        self.preempt().await;
        // Shutdown may have latched while the previous task was being stopped
        if self.device.is_halted() {
            return Admission::Refused;
        }

        match audible(tone.frequency_hz, tone.duration_ms) {
            Some((_, ms)) => {
                self.install(PlaybackTask::Tone(tone));
                Admission::Started { until_ms: ms }
            }
            None => {
                info!(
                    "[PLAY] Skipping invalid tone: {}Hz for {}ms",
                    tone.frequency_hz, tone.duration_ms
                );
                Admission::Skipped
            }
        }
    }

    /// Replace the current task with a melody
    pub async fn play_melody(&self, melody: Melody) -> Admission {
        if self.device.is_halted() {
            return Admission::Refused;
        }
        self.preempt().await;
        if self.device.is_halted() {
            return Admission::Refused;
        }

        if melody.notes.is_empty() {
            info!("[PLAY] Empty melody, nothing to play");
            return Admission::Skipped;
        }
        let until_ms = melody.total_ms();
        self.install(PlaybackTask::Melody(melody));
        Admission::Started { until_ms }
    }

    /// Stop whatever is playing without installing anything
    pub async fn stop(&self) {
        self.preempt().await;
    }

    fn install(&self, task: PlaybackTask) {
        self.set_state(PlaybackState::Installed);
        self.request.signal(task);
    }

    /// Stop handshake: raise the cancel token and wait for the runner's acknowledgment
    async fn preempt(&self) {
        match self.state() {
            PlaybackState::Idle => {}
            PlaybackState::Installed => {
                // Never started, so nothing is sounding
                self.request.reset();
                self.set_state(PlaybackState::Idle);
            }
            PlaybackState::Playing => {
                self.stopped.reset();
                self.cancel.signal(());
                if with_timeout(self.config.preempt_wait, self.stopped.wait())
                    .await
                    .is_err()
                {
                    warn!(
                        "[PLAY] Preempted task did not stop within {}ms, silencing directly",
                        self.config.preempt_wait.as_millis()
                    );
                    self.device.silence();
                }
            }
        }
    }

    /// Runner loop; drive it from exactly one task
    pub async fn run(&self) -> ! {
        info!("[PLAY] Playback runner started");

        loop {
            let task = self.request.wait().await;
            self.cancel.reset();
            if self.device.is_halted() {
                warn!("[PLAY] Board halted, dropping queued playback");
                self.set_state(PlaybackState::Idle);
                self.stopped.signal(());
                continue;
            }
            self.set_state(PlaybackState::Playing);

            match select(self.perform(&task), self.cancel.wait()).await {
                Either::First(()) => debug!("[PLAY] Playback finished"),
                Either::Second(()) => info!("[PLAY] Playback cancelled"),
            }

            // The dropped note already silenced itself; the acknowledgment must imply silence
            self.device.silence();
            self.set_state(PlaybackState::Idle);
            self.stopped.signal(());
        }
    }

    async fn perform(&self, task: &PlaybackTask) {
        match task {
            PlaybackTask::Tone(tone) => {
                self.play_note(tone.frequency_hz, tone.duration_ms, tone.duty)
                    .await
            }
            PlaybackTask::Melody(melody) => {
                info!(
                    "[PLAY] Playing melody with {} notes, gap={}ms",
                    melody.notes.len(),
                    melody.gap()
                );
                for (index, note) in melody.notes.iter().enumerate() {
                    if self.device.is_halted() {
                        break;
                    }
                    if index > 0 {
                        Timer::after_millis(melody.gap()).await;
                    }
                    let duty = note.duty.unwrap_or(melody.duty);
                    self.play_note(note.frequency_hz, note.duration_ms, duty)
                        .await;
                }
            }
        }
    }

    async fn play_note(&self, frequency_hz: i64, duration_ms: i64, duty: DutyPolicy) {
        let Some((frequency_hz, duration_ms)) = audible(frequency_hz, duration_ms) else {
            info!(
                "[PLAY] Skipping invalid tone: {}Hz for {}ms",
                frequency_hz, duration_ms
            );
            return;
        };

        info!(
            "[PLAY] Playing tone: {}Hz for {}ms (duty={:?})",
            frequency_hz, duration_ms, duty
        );
        let duration = Duration::from_millis(duration_ms);
        let result = match duty {
            DutyPolicy::Fixed(duty) => self.hold_fixed(frequency_hz, duration, duty).await,
            DutyPolicy::FromLight => self.follow_light(frequency_hz, duration).await,
        };
        if let Err(e) = result {
            warn!("[PLAY] Tone aborted: {:?}", e);
        }
    }

    async fn hold_fixed(&self, frequency_hz: u32, duration: Duration, duty: f32) -> Result<(), BoardError> {
        let _sounding = self.device.sound(frequency_hz, duty)?;
        Timer::after(duration).await;
        Ok(())
    }

    async fn follow_light(&self, frequency_hz: u32, duration: Duration) -> Result<(), BoardError> {
        let deadline = Instant::now() + duration;
        let reading = self.device.read_light().await?;
        let sounding = self.device.sound(frequency_hz, light_duty(&reading))?;

        loop {
            let next = Instant::now() + self.config.duty_refresh;
            if next >= deadline {
                Timer::at(deadline).await;
                return Ok(());
            }
            Timer::at(next).await;
            let reading = self.device.read_light().await?;
            sounding.set_duty(light_duty(&reading))?;
        }
    }
}

/// Frequency and duration when both are positive and representable; the duration is
/// capped at `config::MAX_NOTE_MS`
fn audible(frequency_hz: i64, duration_ms: i64) -> Option<(u32, u64)> {
    if frequency_hz <= 0 || duration_ms <= 0 {
        return None;
    }
    let frequency_hz = u32::try_from(frequency_hz).ok()?;
    Some((frequency_hz, (duration_ms as u64).min(config::MAX_NOTE_MS)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn note(frequency_hz: i64, duration_ms: i64) -> Note {
        Note {
            frequency_hz,
            duration_ms,
            duty: None,
        }
    }

    #[test]
    fn audibility_requires_positive_values() {
        assert!(Tone::new(440, 100, DutyPolicy::default()).is_audible());
        assert!(!Tone::new(0, 100, DutyPolicy::default()).is_audible());
        assert!(!Tone::new(-5, 100, DutyPolicy::default()).is_audible());
        assert!(!Tone::new(440, 0, DutyPolicy::default()).is_audible());
        assert!(!Tone::new(i64::MAX, 100, DutyPolicy::default()).is_audible());
    }

    #[test]
    fn melody_total_counts_gaps_between_notes_only() {
        let melody = Melody {
            notes: vec![note(330, 100), note(392, 100)],
            gap_ms: 20,
            duty: DutyPolicy::default(),
        };
        assert_eq!(melody.total_ms(), 220);
    }

    #[test]
    fn melody_total_skips_invalid_notes() {
        let melody = Melody {
            notes: vec![note(0, 400), note(262, 200), note(294, -1)],
            gap_ms: 10,
            duty: DutyPolicy::default(),
        };
        assert_eq!(melody.total_ms(), 220);
    }

    #[test]
    fn oversized_durations_are_capped() {
        assert_eq!(audible(440, i64::MAX), Some((440, config::MAX_NOTE_MS)));

        let melody = Melody {
            notes: vec![note(330, i64::MAX); 4],
            gap_ms: u64::MAX,
            duty: DutyPolicy::default(),
        };
        assert_eq!(melody.gap(), config::MAX_GAP_MS);
        assert_eq!(
            melody.total_ms(),
            4 * config::MAX_NOTE_MS + 3 * config::MAX_GAP_MS
        );
    }

    #[test]
    fn default_duty_is_half() {
        assert_eq!(DutyPolicy::default(), DutyPolicy::Fixed(0.5));
        assert_eq!(PlaybackConfig::default().preempt_wait, Duration::from_millis(10));
    }
}
