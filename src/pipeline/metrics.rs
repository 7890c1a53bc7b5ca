//! Latency milestones for one turn.
//!
//! [`TurnMetrics`] only captures instants; every milestone is set at most
//! once and later marks are ignored.  [`LatencyReport`] derives the phase
//! durations for logging and export and never feeds back into control flow.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Milestone instants, in the order they are expected to occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnMetrics {
    pub turn_start: Instant,
    pub transcribed_at: Option<Instant>,
    pub generation_started_at: Option<Instant>,
    pub first_token_at: Option<Instant>,
    pub first_synthesis_start_at: Option<Instant>,
    pub first_audio_ready_at: Option<Instant>,
    pub turn_end: Option<Instant>,
}

impl TurnMetrics {
    pub fn start() -> Self {
        Self::started_at(Instant::now())
    }

    pub fn started_at(turn_start: Instant) -> Self {
        Self {
            turn_start,
            transcribed_at: None,
            generation_started_at: None,
            first_token_at: None,
            first_synthesis_start_at: None,
            first_audio_ready_at: None,
            turn_end: None,
        }
    }

    pub fn mark_transcribed(&mut self) {
        self.transcribed_at.get_or_insert_with(Instant::now);
    }

    pub fn mark_generation_started(&mut self) {
        self.generation_started_at.get_or_insert_with(Instant::now);
    }

    pub fn mark_first_token(&mut self) {
        self.first_token_at.get_or_insert_with(Instant::now);
    }

    /// Record the first successful flush: when its synthesis call started and
    /// when its audio became ready.
    pub fn mark_first_audio(&mut self, synthesis_started: Instant, audio_ready: Instant) {
        if self.first_audio_ready_at.is_none() {
            self.first_synthesis_start_at = Some(synthesis_started);
            self.first_audio_ready_at = Some(audio_ready);
        }
    }

    pub fn mark_turn_end(&mut self) {
        self.turn_end.get_or_insert_with(Instant::now);
    }

    pub fn is_finished(&self) -> bool {
        self.turn_end.is_some()
    }

    pub fn report(&self) -> LatencyReport {
        let from_start = |t: Option<Instant>| t.map(|t| ms(t.saturating_duration_since(self.turn_start)));
        let between = |a: Option<Instant>, b: Option<Instant>| match (a, b) {
            (Some(a), Some(b)) => Some(ms(b.saturating_duration_since(a))),
            _ => None,
        };

        LatencyReport {
            transcription_ms: from_start(self.transcribed_at),
            time_to_first_token_ms: from_start(self.first_token_at),
            time_to_first_audio_ms: from_start(self.first_audio_ready_at),
            generation_wait_ms: between(self.generation_started_at, self.first_token_at),
            accumulation_ms: between(self.first_token_at, self.first_synthesis_start_at),
            first_synthesis_ms: between(self.first_synthesis_start_at, self.first_audio_ready_at),
            total_ms: from_start(self.turn_end),
        }
    }
}

impl Default for TurnMetrics {
    fn default() -> Self {
        Self::start()
    }
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}

/// Phase breakdown in milliseconds; `None` where a milestone was not reached.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LatencyReport {
    /// Turn start → transcript accepted.
    pub transcription_ms: Option<f64>,
    pub time_to_first_token_ms: Option<f64>,
    pub time_to_first_audio_ms: Option<f64>,
    /// Generator invoked → first fragment.
    pub generation_wait_ms: Option<f64>,
    /// First fragment → first synthesis call.
    pub accumulation_ms: Option<f64>,
    /// Duration of the first successful synthesis call.
    pub first_synthesis_ms: Option<f64>,
    pub total_ms: Option<f64>,
}

impl std::fmt::Display for LatencyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields = [
            ("stt", self.transcription_ms),
            ("ttft", self.time_to_first_token_ms),
            ("ttfa", self.time_to_first_audio_ms),
            ("gen_wait", self.generation_wait_ms),
            ("accum", self.accumulation_ms),
            ("first_tts", self.first_synthesis_ms),
            ("total", self.total_ms),
        ];
        let mut first = true;
        for (name, value) in fields {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            match value {
                Some(v) => write!(f, "{name}={v:.0}ms")?,
                None => write!(f, "{name}=-")?,
            }
        }
        Ok(())
    }
}
