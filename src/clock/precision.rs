use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::AudioClock;
use crate::config::ClockConfig;
use crate::error::ClockError;
use crate::shared::{DEFAULT_STEPS, MAX_BPM, MAX_STEPS, MIN_BPM, MIN_STEPS};

/// One step boundary, stamped with the audio-clock time it must sound at.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepEvent {
    pub step: usize,
    pub time: f64,
    pub duration: f64,
}

/// Reported when a pass had to pull the schedule back onto the audio clock.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DriftCorrection {
    /// When the last scheduled step was due.
    pub expected: f64,
    /// Audio-clock time of the check.
    pub actual: f64,
    pub deviation: f64,
}

/// Result of one scheduling pass: the newly due steps and when to call back.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SchedulePass {
    pub steps: Vec<StepEvent>,
    /// Steps after this time that were handed out earlier are void; their
    /// sounds must be cancelled by whoever scheduled them.
    pub revoked_after: Option<f64>,
    pub drift: Option<DriftCorrection>,
    pub next_wake: Option<f64>,
}

impl SchedulePass {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.revoked_after.is_none() && self.drift.is_none()
    }
}

/// Handle returned by [`PrecisionClock::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TickSubscription(u64);

type TickListener = Box<dyn FnMut(StepEvent)>;

#[derive(Clone, Copy, Debug)]
struct InFlight {
    event: StepEvent,
    tick_sent: bool,
}

/// Look-ahead step clock.
///
/// The clock never plays anything. Each pass fills the window
/// `[now, now + lookahead)` with step events and tells the host when to
/// call [`poll`](Self::poll) again; the host is free to drive that with a
/// sleep, an event-loop timeout or anything else, as long as `now` comes
/// from the same [`AudioClock`] the audio output renders against.
pub struct PrecisionClock {
    config: ClockConfig,
    audio: Arc<dyn AudioClock>,
    tempo: f64,
    step_duration: f64,
    step_count: usize,
    running: bool,
    step: usize,
    next_step_time: f64,
    wake_at: Option<f64>,
    last_drift_check: f64,
    in_flight: VecDeque<InFlight>,
    last_sounded: Option<StepEvent>,
    listeners: Vec<(TickSubscription, TickListener)>,
    next_subscription: u64,
}

impl PrecisionClock {
    pub fn new(config: ClockConfig, audio: Arc<dyn AudioClock>) -> Self {
        let tempo = clamp_tempo(config.bpm, crate::shared::DEFAULT_BPM);
        let step_duration = step_duration(tempo, config.steps_per_beat);
        Self {
            config,
            audio,
            tempo,
            step_duration,
            step_count: DEFAULT_STEPS,
            running: false,
            step: 0,
            next_step_time: 0.0,
            wake_at: None,
            last_drift_check: 0.0,
            in_flight: VecDeque::new(),
            last_sounded: None,
            listeners: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    pub fn step_duration(&self) -> f64 {
        self.step_duration
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// Index of the next step that hasn't been scheduled yet.
    pub fn current_step(&self) -> usize {
        self.step
    }

    pub fn next_step_time(&self) -> f64 {
        self.next_step_time
    }

    pub fn now(&self) -> f64 {
        self.audio.now()
    }

    /// The step that is audible right now, if playback has reached one.
    pub fn playing_step(&self) -> Option<usize> {
        if !self.running {
            return None;
        }
        let now = self.audio.now();
        self.in_flight
            .iter()
            .rev()
            .find(|f| f.event.time <= now)
            .map(|f| f.event)
            .or(self.last_sounded)
            .map(|e| e.step)
    }

    pub fn start(&mut self) -> Result<SchedulePass, ClockError> {
        if self.running {
            return Ok(SchedulePass::default());
        }
        if !self.audio.is_available() {
            error!("cannot start clock: audio clock unavailable");
            return Err(ClockError::Unavailable);
        }
        self.audio.resume().inspect_err(|e| error!("cannot start clock: {e}"))?;

        let now = self.audio.now();
        self.running = true;
        self.step = 0;
        self.next_step_time = now;
        self.last_drift_check = now;
        self.in_flight.clear();
        self.last_sounded = None;
        info!(tempo = self.tempo, at = now, "clock started");

        let mut pass = self.schedule(now);
        self.deliver_ticks(now);
        pass.next_wake = self.next_wake();
        Ok(pass)
    }

    /// Stops scheduling and drops everything still pending. Safe to call twice.
    pub fn stop(&mut self) {
        if self.running {
            info!("clock stopped");
        }
        self.running = false;
        self.step = 0;
        self.wake_at = None;
        self.in_flight.clear();
        self.last_sounded = None;
    }

    /// Clamps `bpm` into range. A large enough change while running voids the
    /// pre-scheduled steps and schedules fresh from now, so stale steps at the
    /// old tempo don't play.
    pub fn set_tempo(&mut self, bpm: f64) -> SchedulePass {
        let bpm = clamp_tempo(bpm, self.tempo);
        let delta = (bpm - self.tempo).abs();
        self.tempo = bpm;
        self.step_duration = step_duration(bpm, self.config.steps_per_beat);

        if !self.running || delta <= self.config.tempo_reschedule_threshold {
            return SchedulePass::default();
        }

        let now = self.audio.now();
        if let Some(first) = self.in_flight.iter().find(|f| f.event.time > now) {
            self.step = first.event.step;
        }
        let before = self.in_flight.len();
        self.in_flight.retain(|f| f.event.time <= now);
        debug!(
            tempo = bpm,
            revoked = before - self.in_flight.len(),
            "tempo change, rescheduling"
        );

        // a kept step sitting exactly on now already owns that instant
        self.next_step_time = match self.in_flight.back() {
            Some(last) if last.event.time >= now => last.event.time + self.step_duration,
            _ => now,
        };
        self.last_drift_check = now;
        let mut pass = self.schedule(now);
        pass.revoked_after = Some(now);
        pass
    }

    /// Length of the pattern being played. The step index wraps into it.
    pub fn set_step_count(&mut self, count: usize) {
        self.step_count = count.clamp(MIN_STEPS, MAX_STEPS);
        self.step %= self.step_count;
    }

    /// Host timer entry point: runs a pass when one is due and delivers
    /// ticks whose pre-roll has been reached.
    pub fn poll(&mut self) -> Result<SchedulePass, ClockError> {
        if !self.running {
            return Ok(SchedulePass::default());
        }
        if !self.audio.is_available() {
            error!("audio clock lost while running");
            self.stop();
            return Err(ClockError::Unavailable);
        }

        let now = self.audio.now();
        // a wake further out than one window means the audio clock went backwards
        let due = self
            .wake_at
            .is_some_and(|wake| now >= wake || wake - now > self.config.lookahead);
        let mut pass = if due { self.schedule(now) } else { SchedulePass::default() };
        self.deliver_ticks(now);
        pass.next_wake = self.next_wake();
        Ok(pass)
    }

    /// Earliest time the host needs to call [`poll`](Self::poll) again.
    pub fn next_wake(&self) -> Option<f64> {
        if !self.running {
            return None;
        }
        let preroll = self.config.tick_preroll;
        let next_tick = self
            .in_flight
            .iter()
            .find(|f| !f.tick_sent)
            .map(|f| f.event.time - preroll);
        match (self.wake_at, next_tick) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn subscribe(&mut self, listener: impl FnMut(StepEvent) + 'static) -> TickSubscription {
        let id = TickSubscription(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, subscription: TickSubscription) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(id, _)| *id != subscription);
        self.listeners.len() != before
    }

    fn schedule(&mut self, now: f64) -> SchedulePass {
        let mut pass = SchedulePass::default();
        self.prune(now);
        let horizon = now + self.config.lookahead;
        pass.drift = self.check_drift(now);
        // resynced from ahead of the window: what was handed out past it is void
        if pass.drift.is_some_and(|d| d.expected > horizon) {
            pass.revoked_after = Some(horizon);
        }

        while self.next_step_time < horizon {
            let event = StepEvent {
                step: self.step,
                time: self.next_step_time,
                duration: self.step_duration,
            };
            self.in_flight.push_back(InFlight { event, tick_sent: false });
            pass.steps.push(event);
            self.next_step_time += self.step_duration;
            self.step = (self.step + 1) % self.step_count;
        }

        self.wake_at = Some(now + self.config.lookahead * self.config.rearm_fraction);
        pass.next_wake = self.next_wake();
        pass
    }

    // The schedule is healthy when the next step is still ahead of now and
    // the last scheduled step sits inside the look-ahead window. Anything
    // outside that band by more than the threshold gets resynced.
    fn check_drift(&mut self, now: f64) -> Option<DriftCorrection> {
        let underrun = self.next_step_time < now;
        let elapsed = now - self.last_drift_check;
        // negative elapsed means the audio clock went backwards
        if !underrun && (0.0..self.config.drift_check_interval).contains(&elapsed) {
            return None;
        }
        self.last_drift_check = now;

        let expected = self.next_step_time - self.step_duration;
        let late = now - self.next_step_time;
        let early = expected - (now + self.config.lookahead);
        let deviation = late.max(early);
        if deviation <= self.config.drift_threshold {
            return None;
        }

        self.next_step_time = now + self.step_duration;
        let horizon = now + self.config.lookahead;
        self.in_flight.retain(|f| f.event.time <= horizon);
        warn!(
            expected,
            actual = now,
            deviation_ms = deviation * 1000.0,
            "clock drift beyond tolerance, resynced"
        );
        Some(DriftCorrection { expected, actual: now, deviation })
    }

    fn deliver_ticks(&mut self, now: f64) {
        let preroll = self.config.tick_preroll;
        for pending in self.in_flight.iter_mut() {
            if pending.tick_sent {
                continue;
            }
            if pending.event.time - preroll > now {
                break;
            }
            pending.tick_sent = true;
            for (_, listener) in self.listeners.iter_mut() {
                listener(pending.event);
            }
        }
    }

    fn prune(&mut self, now: f64) {
        while let Some(front) = self.in_flight.front() {
            if !front.tick_sent || front.event.time > now {
                break;
            }
            self.last_sounded = Some(front.event);
            self.in_flight.pop_front();
        }
    }
}

fn clamp_tempo(bpm: f64, fallback: f64) -> f64 {
    if bpm.is_nan() { fallback } else { bpm.clamp(MIN_BPM, MAX_BPM) }
}

fn step_duration(tempo: f64, steps_per_beat: u32) -> f64 {
    60.0 / (tempo * steps_per_beat.max(1) as f64)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::clock::ManualClock;

    const EPS: f64 = 1e-9;

    fn clock_at(start: f64) -> (Arc<ManualClock>, PrecisionClock) {
        let audio = Arc::new(ManualClock::new(start));
        let clock = PrecisionClock::new(ClockConfig::default(), audio.clone());
        (audio, clock)
    }

    fn run_for(audio: &ManualClock, clock: &mut PrecisionClock, seconds: f64, dt: f64) -> Vec<StepEvent> {
        let mut steps = Vec::new();
        let end = audio.now() + seconds;
        while audio.now() < end {
            audio.advance(dt);
            steps.extend(clock.poll().unwrap().steps);
        }
        steps
    }

    #[test]
    fn step_duration_follows_tempo() {
        let (_audio, mut clock) = clock_at(0.0);
        assert!((clock.step_duration() - 0.125).abs() < EPS);
        clock.set_tempo(60.0);
        assert!((clock.step_duration() - 0.25).abs() < EPS);
    }

    #[test]
    fn tempo_is_clamped() {
        let (_audio, mut clock) = clock_at(0.0);
        clock.set_tempo(10.0);
        assert_eq!(clock.tempo(), 40.0);
        clock.set_tempo(1000.0);
        assert_eq!(clock.tempo(), 240.0);
        clock.set_tempo(f64::NAN);
        assert_eq!(clock.tempo(), 240.0);
    }

    #[test]
    fn start_fills_the_lookahead_window() {
        let (audio, mut clock) = clock_at(3.0);
        let pass = clock.start().unwrap();
        assert!(clock.is_running());
        assert!(!audio.is_suspended());
        assert_eq!(pass.steps.len(), 1);
        assert_eq!(pass.steps[0].step, 0);
        assert_eq!(pass.steps[0].time, 3.0);
        assert!((clock.next_step_time() - 3.125).abs() < EPS);
        // re-arms at 80% of the window
        assert!((clock.wake_at.unwrap() - 3.08).abs() < EPS);
    }

    #[test]
    fn start_twice_is_a_no_op() {
        let (audio, mut clock) = clock_at(0.0);
        clock.start().unwrap();
        audio.advance(0.5);
        clock.poll().unwrap();
        let step = clock.current_step();
        let pass = clock.start().unwrap();
        assert!(pass.steps.is_empty());
        assert_eq!(clock.current_step(), step);
    }

    #[test]
    fn start_without_audio_leaves_clock_stopped() {
        let (audio, mut clock) = clock_at(0.0);
        audio.set_available(false);
        assert_eq!(clock.start(), Err(ClockError::Unavailable));
        assert!(!clock.is_running());
        assert_eq!(clock.next_wake(), None);
    }

    #[test]
    fn steps_are_monotonic_with_no_gaps() {
        let (audio, mut clock) = clock_at(0.0);
        clock.set_step_count(16);
        let mut steps = clock.start().unwrap().steps;
        steps.extend(run_for(&audio, &mut clock, 10.0, 0.013));

        // 10 s at 8 steps/s, plus whatever the window pre-scheduled
        assert!(steps.len() >= 80);
        for pair in steps.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert!(b.time > a.time);
            assert!((b.time - a.time - clock.step_duration()).abs() < 1e-9);
            assert_eq!(b.step, (a.step + 1) % 16);
        }
        // never scheduled past the window
        assert!(steps.last().unwrap().time < audio.now() + 0.1);
    }

    #[test]
    fn stop_is_idempotent_and_cancels_pending_work() {
        let (audio, mut clock) = clock_at(0.0);
        let ticks = Rc::new(RefCell::new(Vec::new()));
        let sink = ticks.clone();
        clock.subscribe(move |e| sink.borrow_mut().push(e.step));

        clock.start().unwrap();
        run_for(&audio, &mut clock, 0.5, 0.01);
        let delivered = ticks.borrow().len();

        clock.stop();
        clock.stop();
        assert!(!clock.is_running());
        assert_eq!(clock.current_step(), 0);
        assert_eq!(clock.next_wake(), None);

        let after = run_for(&audio, &mut clock, 1.0, 0.01);
        assert!(after.is_empty());
        assert_eq!(ticks.borrow().len(), delivered);
    }

    #[test]
    fn ticks_arrive_ahead_of_audio_time() {
        let (audio, mut clock) = clock_at(0.0);
        let ticks = Rc::new(RefCell::new(Vec::new()));
        let sink = ticks.clone();
        let clock_ref = audio.clone();
        clock.subscribe(move |e| sink.borrow_mut().push((e.step, e.time, clock_ref.now())));

        clock.start().unwrap();
        run_for(&audio, &mut clock, 1.0, 0.001);

        let ticks = ticks.borrow();
        assert!(ticks.len() >= 8);
        for &(_, time, delivered_at) in ticks.iter().skip(1) {
            assert!(delivered_at < time);
            assert!(time - delivered_at <= 0.005 + 1e-9);
        }
    }

    #[test]
    fn unsubscribed_listeners_stop_hearing_ticks() {
        let (audio, mut clock) = clock_at(0.0);
        let count = Rc::new(RefCell::new(0usize));
        let sink = count.clone();
        let sub = clock.subscribe(move |_| *sink.borrow_mut() += 1);
        clock.start().unwrap();
        run_for(&audio, &mut clock, 0.3, 0.01);
        let heard = *count.borrow();
        assert!(heard > 0);

        assert!(clock.unsubscribe(sub));
        assert!(!clock.unsubscribe(sub));
        run_for(&audio, &mut clock, 0.5, 0.01);
        assert_eq!(*count.borrow(), heard);
    }

    #[test]
    fn large_tempo_change_reschedules_from_now() {
        let (audio, mut clock) = clock_at(0.0);
        clock.start().unwrap();
        audio.set(0.09);
        let pass = clock.poll().unwrap();
        assert_eq!(pass.steps[0].step, 1);
        assert!((pass.steps[0].time - 0.125).abs() < EPS);

        let pass = clock.set_tempo(60.0);
        assert_eq!(pass.revoked_after, Some(0.09));
        // step 1 was still in the future, so it is scheduled again at the new tempo
        assert_eq!(pass.steps[0].step, 1);
        assert!((pass.steps[0].time - 0.09).abs() < EPS);
        assert!((pass.steps[0].duration - 0.25).abs() < EPS);
        assert!((clock.next_step_time() - 0.34).abs() < EPS);
    }

    #[test]
    fn small_tempo_change_keeps_schedule() {
        let (audio, mut clock) = clock_at(0.0);
        clock.start().unwrap();
        audio.set(0.09);
        clock.poll().unwrap();
        let next = clock.next_step_time();
        let pass = clock.set_tempo(120.3);
        assert!(pass.is_empty());
        assert_eq!(clock.next_step_time(), next);
    }

    #[test]
    fn stall_beyond_threshold_resyncs() {
        let (audio, mut clock) = clock_at(0.0);
        clock.start().unwrap();
        audio.set(2.0);
        let pass = clock.poll().unwrap();

        let drift = pass.drift.expect("drift should be corrected");
        assert!(drift.deviation > 0.06);
        assert_eq!(drift.actual, 2.0);
        assert!((clock.next_step_time() - 2.125).abs() < EPS);
        // no burst of catch-up steps in the past
        assert!(pass.steps.iter().all(|s| s.time >= 2.0));
    }

    #[test]
    fn small_lateness_is_not_corrected() {
        let (audio, mut clock) = clock_at(0.0);
        clock.start().unwrap();
        // window ran dry by 30 ms only
        audio.set(0.155);
        let pass = clock.poll().unwrap();
        assert!(pass.drift.is_none());
        assert!((pass.steps[0].time - 0.125).abs() < EPS);
    }

    #[test]
    fn clock_that_jumped_back_is_resynced_on_the_next_poll() {
        let (audio, mut clock) = clock_at(10.0);
        clock.start().unwrap();
        run_for(&audio, &mut clock, 6.0, 0.02);
        // device reset: clock restarts near zero
        audio.set(0.5);
        let pass = clock.poll().unwrap();
        let drift = pass.drift.expect("jump back should be corrected");
        assert!(drift.expected > 15.0);
        assert!((pass.revoked_after.unwrap() - 0.6).abs() < EPS);
        assert!((clock.next_step_time() - 0.625).abs() < EPS);

        let steps = run_for(&audio, &mut clock, 1.0, 0.005);
        assert!(clock.is_running());
        assert!(steps.len() >= 7);
        assert!(steps.iter().all(|s| s.time >= 0.5 && s.time < 1.7));
        assert!(clock.next_wake().unwrap() < 2.0);
    }

    #[test]
    fn late_resync_revokes_nothing() {
        let (audio, mut clock) = clock_at(0.0);
        clock.start().unwrap();
        audio.set(2.0);
        let pass = clock.poll().unwrap();
        assert!(pass.drift.is_some());
        assert_eq!(pass.revoked_after, None);
    }

    #[test]
    fn tempo_change_on_a_step_boundary_keeps_steps_strictly_increasing() {
        let (audio, mut clock) = clock_at(0.0);
        let mut steps = clock.start().unwrap().steps;
        audio.set(0.09);
        steps.extend(clock.poll().unwrap().steps);
        // exactly on step 1
        audio.set(0.125);
        let pass = clock.set_tempo(60.0);
        assert_eq!(pass.revoked_after, Some(0.125));
        // step 1 stays at 0.125, step 2 follows one new step later
        assert!(pass.steps.is_empty());
        assert_eq!(clock.current_step(), 2);
        assert!((clock.next_step_time() - 0.375).abs() < EPS);
        steps.extend(run_for(&audio, &mut clock, 1.0, 0.01));
        for pair in steps.windows(2) {
            assert!(pair[1].time > pair[0].time);
        }
    }

    #[test]
    fn losing_the_audio_clock_stops_cleanly() {
        let (audio, mut clock) = clock_at(0.0);
        clock.start().unwrap();
        audio.set_available(false);
        audio.advance(0.2);
        assert_eq!(clock.poll(), Err(ClockError::Unavailable));
        assert!(!clock.is_running());
        assert_eq!(clock.next_wake(), None);
    }

    #[test]
    fn step_count_change_wraps_index() {
        let (audio, mut clock) = clock_at(0.0);
        clock.start().unwrap();
        run_for(&audio, &mut clock, 2.2, 0.01);
        assert!(clock.current_step() >= 16);
        clock.set_step_count(16);
        assert!(clock.current_step() < 16);
        clock.set_step_count(1000);
        assert_eq!(clock.step_count(), 64);
    }

    #[test]
    fn playing_step_tracks_audio_time() {
        let (audio, mut clock) = clock_at(0.0);
        assert_eq!(clock.playing_step(), None);
        clock.start().unwrap();
        assert_eq!(clock.playing_step(), Some(0));
        run_for(&audio, &mut clock, 0.3, 0.01);
        // 0.30 s at 0.125 s per step
        assert_eq!(clock.playing_step(), Some(2));
    }
}
