//! Runtime configuration.
//!
//! Every timing constant the scheduler uses lives here rather than being
//! hard-coded, because the compensation offsets depend on the audio device
//! and host machine. All fields have defaults, so a partial JSON file is fine.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::error::Result;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub clock: ClockConfig,
    pub dispatch: DispatchConfig,
    pub trigger: TriggerConfig,
    pub patterns: PatternConfig,
    pub midi: MidiConfig,
    pub log_level: LogLevel,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub bpm: f64,
    /// Steps per quarter note (4 = sixteenths).
    pub steps_per_beat: u32,
    /// Seconds of audio the clock pre-schedules into.
    pub lookahead: f64,
    /// Fraction of the look-ahead window after which the next pass runs.
    pub rearm_fraction: f64,
    /// Seconds between periodic drift checks.
    pub drift_check_interval: f64,
    /// Deviation (seconds) beyond which the schedule is resynced.
    pub drift_threshold: f64,
    /// Tempo change (BPM) that forces a full reschedule while running.
    pub tempo_reschedule_threshold: f64,
    /// Tick subscribers hear about a step this long before it sounds.
    pub tick_preroll: f64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            bpm: crate::shared::DEFAULT_BPM,
            steps_per_beat: 4,
            lookahead: 0.1,
            rearm_fraction: 0.8,
            drift_check_interval: 5.0,
            drift_threshold: 0.06,
            tempo_reschedule_threshold: 0.5,
            tick_preroll: 0.005,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Added to every sequenced note's target time.
    pub latency_compensation: f64,
    /// Pad highlights turn on this long before the audio.
    pub visual_preroll: f64,
    /// Minimum time a highlight stays on before it may revert.
    pub highlight_hold: f64,
    /// Largest timing jitter at 100% humanize, in seconds.
    pub max_humanize: f64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            latency_compensation: 0.005,
            visual_preroll: 0.015,
            highlight_hold: 0.1,
            max_humanize: 0.01,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Same-note retriggers closer than this are dropped.
    pub debounce: f64,
    pub fade_in: f64,
    pub fade_out: f64,
    /// Regions shorter than this get no fade-out.
    pub min_fade_out_region: f64,
    /// Exponential time constant used by stop/stop_all.
    pub stop_time_constant: f64,
    /// Voices are hard-stopped this long after a stop fade begins.
    pub stop_hard_after: f64,
    /// Gain at full velocity.
    pub headroom: f32,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            debounce: 0.02,
            fade_in: 0.003,
            fade_out: 0.003,
            min_fade_out_region: 0.05,
            stop_time_constant: 0.01,
            stop_hard_after: 0.05,
            headroom: 0.8,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub default_steps: usize,
    /// Seconds during which a second create() returns the first pattern.
    pub create_cooldown: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            default_steps: crate::shared::DEFAULT_STEPS,
            create_cooldown: 0.3,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    /// Substring of the input port name to connect to.
    pub input_port: Option<String>,
    /// Substring of the output port name used for LEDs.
    pub output_port: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&data)?;
        Ok(config.sanitized())
    }

    /// Pulls out-of-range values back to something the scheduler can run with.
    pub fn sanitized(mut self) -> Self {
        let defaults = Config::default();

        let c = &mut self.clock;
        c.bpm = c.bpm.clamp(crate::shared::MIN_BPM, crate::shared::MAX_BPM);
        c.steps_per_beat = c.steps_per_beat.clamp(1, 16);
        c.lookahead = positive_or(c.lookahead, defaults.clock.lookahead);
        if !(c.rearm_fraction > 0.0 && c.rearm_fraction <= 1.0) {
            c.rearm_fraction = defaults.clock.rearm_fraction;
        }
        c.drift_check_interval = positive_or(c.drift_check_interval, defaults.clock.drift_check_interval);
        c.drift_threshold = positive_or(c.drift_threshold, defaults.clock.drift_threshold);
        c.tempo_reschedule_threshold = c.tempo_reschedule_threshold.max(0.0);
        c.tick_preroll = c.tick_preroll.max(0.0);

        let d = &mut self.dispatch;
        d.latency_compensation = d.latency_compensation.max(0.0);
        d.visual_preroll = d.visual_preroll.max(0.0);
        d.highlight_hold = d.highlight_hold.max(0.0);
        d.max_humanize = d.max_humanize.max(0.0);

        let t = &mut self.trigger;
        t.debounce = t.debounce.max(0.0);
        t.fade_in = t.fade_in.max(0.0);
        t.fade_out = t.fade_out.max(0.0);
        t.min_fade_out_region = t.min_fade_out_region.max(0.0);
        t.stop_time_constant = positive_or(t.stop_time_constant, defaults.trigger.stop_time_constant);
        t.stop_hard_after = positive_or(t.stop_hard_after, defaults.trigger.stop_hard_after);
        t.headroom = t.headroom.clamp(0.0, 1.0);

        let p = &mut self.patterns;
        p.default_steps = p.default_steps.clamp(crate::shared::MIN_STEPS, crate::shared::MAX_STEPS);
        p.create_cooldown = p.create_cooldown.max(0.0);

        self
    }
}

fn positive_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() && value > 0.0 { value } else { fallback }
}
