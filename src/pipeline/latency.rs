//! Per-turn phase timings and session latency statistics.

use std::time::{Duration, Instant};

/// Phase timestamps of the current turn. Reset when a new turn begins.
#[derive(Debug, Clone, Default)]
pub struct PhaseTimings {
    /// Capture time of the last frame of the user's utterance.
    pub speech_ended: Option<Instant>,
    pub recognition_start: Option<Instant>,
    pub recognition_end: Option<Instant>,
    pub generation_start: Option<Instant>,
    pub first_fragment: Option<Instant>,
    pub generation_end: Option<Instant>,
    pub synthesis_start: Option<Instant>,
    pub first_audio: Option<Instant>,
    pub synthesis_end: Option<Instant>,
}

impl PhaseTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn mark_speech_ended(&mut self, at: Instant) {
        self.speech_ended = Some(at);
    }

    pub fn mark_recognition_start(&mut self) {
        self.recognition_start = Some(Instant::now());
    }

    pub fn mark_recognition_end(&mut self) {
        self.recognition_end = Some(Instant::now());
    }

    pub fn mark_generation_start(&mut self) {
        self.generation_start = Some(Instant::now());
    }

    /// Only the first call per turn is kept.
    pub fn mark_first_fragment(&mut self) {
        self.first_fragment.get_or_insert_with(Instant::now);
    }

    pub fn mark_generation_end(&mut self) {
        self.generation_end = Some(Instant::now());
    }

    /// Only the first call per turn is kept.
    pub fn mark_synthesis_start(&mut self) {
        self.synthesis_start.get_or_insert_with(Instant::now);
    }

    /// Keeps the earliest audio instant reported.
    pub fn mark_first_audio(&mut self, at: Instant) {
        self.first_audio = Some(match self.first_audio {
            Some(existing) if existing <= at => existing,
            _ => at,
        });
    }

    pub fn mark_synthesis_end(&mut self) {
        self.synthesis_end = Some(Instant::now());
    }

    pub fn recognition(&self) -> Option<Duration> {
        between(self.recognition_start, self.recognition_end)
    }

    pub fn generation(&self) -> Option<Duration> {
        between(self.generation_start, self.generation_end)
    }

    /// Time until the model produced its first fragment.
    pub fn time_to_first_fragment(&self) -> Option<Duration> {
        between(self.generation_start, self.first_fragment)
    }

    pub fn synthesis(&self) -> Option<Duration> {
        between(self.synthesis_start, self.synthesis_end)
    }

    /// What the user waits after they stop speaking until the assistant is
    /// heard. Falls back to the recognition start for replies with no user
    /// utterance (the greeting).
    pub fn response_delay(&self) -> Option<Duration> {
        between(
            self.speech_ended.or(self.recognition_start).or(self.generation_start),
            self.first_audio,
        )
    }
}

fn between(start: Option<Instant>, end: Option<Instant>) -> Option<Duration> {
    Some(end?.saturating_duration_since(start?))
}

/// Aggregated latency statistics.
#[derive(Debug, Clone)]
pub struct LatencyStats {
    pub count: usize,
    pub recognition_avg: Duration,
    pub first_fragment_avg: Duration,
    pub generation_avg: Duration,
    pub synthesis_avg: Duration,
    pub response_delay_avg: Duration,
    pub response_delay_min: Duration,
    pub response_delay_max: Duration,
}

/// Collects completed turn timings.
#[derive(Debug, Default)]
pub struct LatencyTracker {
    measurements: Vec<PhaseTimings>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a turn; turns that never produced audio are skipped.
    pub fn record(&mut self, timings: PhaseTimings) {
        if timings.response_delay().is_some() {
            self.measurements.push(timings);
        }
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    pub fn stats(&self) -> Option<LatencyStats> {
        let delays: Vec<Duration> = self
            .measurements
            .iter()
            .filter_map(PhaseTimings::response_delay)
            .collect();
        let &response_delay_min = delays.iter().min()?;
        let &response_delay_max = delays.iter().max()?;

        let collect = |f: fn(&PhaseTimings) -> Option<Duration>| -> Vec<Duration> {
            self.measurements.iter().filter_map(f).collect()
        };

        Some(LatencyStats {
            count: self.measurements.len(),
            recognition_avg: avg_duration(&collect(PhaseTimings::recognition)),
            first_fragment_avg: avg_duration(&collect(PhaseTimings::time_to_first_fragment)),
            generation_avg: avg_duration(&collect(PhaseTimings::generation)),
            synthesis_avg: avg_duration(&collect(PhaseTimings::synthesis)),
            response_delay_avg: avg_duration(&delays),
            response_delay_min,
            response_delay_max,
        })
    }

    /// Logs a summary of the session.
    pub fn log_summary(&self) {
        if let Some(stats) = self.stats() {
            tracing::info!("{}", summary(&stats));
        }
    }
}

/// One-line human summary of `stats`.
pub fn summary(stats: &LatencyStats) -> String {
    format!(
        "{} repl{}: avg wait {} (fastest {}, slowest {}); recognition {}, first token {}, generation {}, synthesis {}",
        stats.count,
        if stats.count == 1 { "y" } else { "ies" },
        format_duration(stats.response_delay_avg),
        format_duration(stats.response_delay_min),
        format_duration(stats.response_delay_max),
        format_duration(stats.recognition_avg),
        format_duration(stats.first_fragment_avg),
        format_duration(stats.generation_avg),
        format_duration(stats.synthesis_avg),
    )
}

/// Under 1s: "450ms", at or above 1s: "1.5s".
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

fn avg_duration(durations: &[Duration]) -> Duration {
    if durations.is_empty() {
        return Duration::from_secs(0);
    }
    let sum: Duration = durations.iter().sum();
    sum / durations.len() as u32
}
