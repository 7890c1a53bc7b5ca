//! Streaming turn orchestrator: fragments in, speech segments out.
//!
//! [`StreamingOrchestrator`] pulls fragments from a [`FragmentStream`],
//! accumulates them, and each time enough text is pending calls the
//! synthesizer and yields the result.  Everything happens on the caller's
//! flow of control: one fragment wait or one synthesis call at a time, so
//! segments come out strictly in text order.
//!
//! ```text
//! next_segment()
//!   ├─ AwaitingFirstToken / Accumulating ─▶ pull fragment (timeout, cancel)
//!   │     ├─ Ok(text)  → push; trimmed ≥ threshold → Flushing
//!   │     ├─ end       → Draining
//!   │     └─ Err       → before first: fallback apology → Failed
//!   │                    after first:  Draining, then Failed
//!   ├─ Flushing  ─▶ synthesize(trim(pending)) → yield, or drop on error
//!   └─ Draining  ─▶ final flush if anything pending → Done / Failed
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, Stream, StreamExt};

use crate::config::TurnConfig;
use crate::llm::{FragmentStream, GenerationError};
use crate::tts::{SynthesisError, SynthesizedAudio, Synthesizer};

use super::accumulator::TextAccumulator;
use super::cancel::CancelToken;
use super::error::{TurnError, TurnOutcome};
use super::metrics::TurnMetrics;
use super::state::TurnState;

// ---------------------------------------------------------------------------
// SpeechSegment
// ---------------------------------------------------------------------------

/// One synthesized span of the reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechSegment {
    /// Position among the segments yielded by this turn, from 0.
    pub index: usize,
    /// Trimmed text that was synthesized.
    pub source_text: String,
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

// ---------------------------------------------------------------------------
// OrchestratorSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub flush_threshold: usize,
    /// Bound on each fragment wait and each synthesis call.
    pub call_timeout: Duration,
    pub fallback_text: String,
}

impl OrchestratorSettings {
    pub fn from_config(config: &TurnConfig) -> Self {
        Self {
            flush_threshold: config.flush_threshold,
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            fallback_text: config.fallback_text.clone(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&TurnConfig::default())
    }
}

// ---------------------------------------------------------------------------
// StreamingOrchestrator
// ---------------------------------------------------------------------------

enum Pull {
    Fragment(String),
    End,
    Failed(GenerationError),
    Cancelled,
}

enum Synthesis {
    Ready(SynthesizedAudio),
    Dropped(SynthesisError),
    Cancelled,
}

/// Drives one turn from fragment stream to speech segments.
///
/// Not restartable: once [`next_segment`](Self::next_segment) returns `None`
/// the outcome is fixed.
pub struct StreamingOrchestrator {
    fragments: Option<FragmentStream>,
    synthesizer: Arc<dyn Synthesizer>,
    settings: OrchestratorSettings,
    cancel: CancelToken,
    state: TurnState,
    accumulator: TextAccumulator,
    metrics: TurnMetrics,
    /// Mid-stream failure waiting for the best-effort drain to finish.
    pending_failure: Option<TurnError>,
    outcome: Option<TurnOutcome>,
    yielded: usize,
    dropped: usize,
}

impl StreamingOrchestrator {
    pub fn new(
        fragments: FragmentStream,
        synthesizer: Arc<dyn Synthesizer>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            fragments: Some(fragments),
            synthesizer,
            settings,
            cancel: CancelToken::new(),
            state: TurnState::Idle,
            accumulator: TextAccumulator::new(),
            metrics: TurnMetrics::start(),
            pending_failure: None,
            outcome: None,
            yielded: 0,
            dropped: 0,
        }
    }

    /// Continue timing a turn whose earlier stages were already measured.
    pub fn with_metrics(mut self, metrics: TurnMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    // -----------------------------------------------------------------------
    // Driving
    // -----------------------------------------------------------------------

    /// Produce the next segment, or `None` once the turn is over.
    pub async fn next_segment(&mut self) -> Option<SpeechSegment> {
        loop {
            if self.state.is_terminal() {
                return None;
            }
            if self.cancel.is_cancelled() {
                self.finish(TurnOutcome::Cancelled);
                return None;
            }

            match self.state {
                TurnState::Idle => self.state = TurnState::AwaitingFirstToken,

                TurnState::AwaitingFirstToken | TurnState::Accumulating => match self.pull().await {
                    Pull::Fragment(text) => {
                        if self.state == TurnState::AwaitingFirstToken {
                            self.metrics.mark_first_token();
                            self.state = TurnState::Accumulating;
                        }
                        log::trace!("turn: fragment {text:?}");
                        self.accumulator.push(&text);
                        if self.accumulator.is_ready(self.settings.flush_threshold) {
                            self.state = TurnState::Flushing;
                        }
                    }
                    Pull::End => {
                        self.fragments = None;
                        self.state = TurnState::Draining;
                    }
                    Pull::Failed(e) => {
                        self.fragments = None;
                        if self.state == TurnState::AwaitingFirstToken {
                            log::warn!("turn: generation failed before first fragment: {e}");
                            return self.apologise(e).await;
                        }
                        log::warn!("turn: generation failed mid-stream: {e}");
                        self.pending_failure =
                            Some(TurnError::PartialGenerationFailure(e.to_string()));
                        self.state = TurnState::Draining;
                    }
                    Pull::Cancelled => {
                        self.finish(TurnOutcome::Cancelled);
                        return None;
                    }
                },

                TurnState::Flushing => {
                    let segment = self.flush().await;
                    if self.state.is_terminal() {
                        return None;
                    }
                    self.state = TurnState::Accumulating;
                    if segment.is_some() {
                        return segment;
                    }
                }

                TurnState::Draining => {
                    let segment = if self.accumulator.has_pending() {
                        self.flush().await
                    } else {
                        None
                    };
                    if self.state.is_terminal() {
                        return None;
                    }
                    let outcome = match self.pending_failure.take() {
                        Some(error) => TurnOutcome::Failed(error),
                        None => TurnOutcome::Completed,
                    };
                    self.finish(outcome);
                    return segment;
                }

                TurnState::Done | TurnState::Failed | TurnState::Cancelled => return None,
            }
        }
    }

    /// The same sequence as a `Stream`.
    pub fn segments(&mut self) -> impl Stream<Item = SpeechSegment> + Send + '_ {
        stream::unfold(self, |orchestrator| async move {
            let segment = orchestrator.next_segment().await?;
            Some((segment, orchestrator))
        })
    }

    /// Drain every remaining segment.
    pub async fn collect(&mut self) -> Vec<SpeechSegment> {
        let mut segments = Vec::new();
        while let Some(segment) = self.next_segment().await {
            segments.push(segment);
        }
        segments
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// `None` until the turn has ended.
    pub fn outcome(&self) -> Option<&TurnOutcome> {
        self.outcome.as_ref()
    }

    pub fn metrics(&self) -> &TurnMetrics {
        &self.metrics
    }

    /// Full generated text so far, untrimmed.
    pub fn reply(&self) -> &str {
        self.accumulator.reply()
    }

    pub fn segments_yielded(&self) -> usize {
        self.yielded
    }

    pub fn segments_dropped(&self) -> usize {
        self.dropped
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn pull(&mut self) -> Pull {
        let timeout = self.settings.call_timeout;
        let cancel = self.cancel.clone();
        let Some(fragments) = self.fragments.as_mut() else {
            return Pull::End;
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Pull::Cancelled,
            next = tokio::time::timeout(timeout, fragments.next()) => match next {
                Err(_) => Pull::Failed(GenerationError::Timeout),
                Ok(None) => Pull::End,
                Ok(Some(Ok(text))) => Pull::Fragment(text),
                Ok(Some(Err(e))) => Pull::Failed(e),
            },
        }
    }

    /// Owns everything it needs so the returned future does not borrow
    /// `self` (the fragment stream is `Send` but not `Sync`).
    fn synthesize_pending<'a>(
        &self,
        text: &'a str,
    ) -> impl std::future::Future<Output = Synthesis> + Send + 'a {
        synthesize(
            Arc::clone(&self.synthesizer),
            self.cancel.clone(),
            self.settings.call_timeout,
            text,
        )
    }

    /// Synthesize and clear the pending text.  Sets a terminal state if
    /// cancellation is observed.
    async fn flush(&mut self) -> Option<SpeechSegment> {
        let text = self.accumulator.take()?;
        let started = Instant::now();

        match self.synthesize_pending(&text).await {
            Synthesis::Ready(audio) => {
                if self.cancel.is_cancelled() {
                    self.finish(TurnOutcome::Cancelled);
                    return None;
                }
                self.metrics.mark_first_audio(started, Instant::now());
                log::debug!(
                    "turn: segment {} ({} chars, {:.2}s audio)",
                    self.yielded,
                    text.chars().count(),
                    audio.duration_secs()
                );
                Some(self.segment(text, audio))
            }
            Synthesis::Dropped(e) => {
                let error = TurnError::SynthesisFailure(e.to_string());
                log::warn!("turn: dropping segment {text:?}: {error}");
                self.dropped += 1;
                None
            }
            Synthesis::Cancelled => {
                self.finish(TurnOutcome::Cancelled);
                None
            }
        }
    }

    /// Generation failed before any text: speak the fixed apology once.
    async fn apologise(&mut self, error: GenerationError) -> Option<SpeechSegment> {
        let outcome = TurnOutcome::Failed(TurnError::GenerationFailure(error.to_string()));
        let text = self.settings.fallback_text.clone();

        match self.synthesize_pending(&text).await {
            Synthesis::Ready(audio) if !self.cancel.is_cancelled() => {
                let segment = self.segment(text, audio);
                self.finish(outcome);
                Some(segment)
            }
            Synthesis::Ready(_) | Synthesis::Cancelled => {
                self.finish(TurnOutcome::Cancelled);
                None
            }
            Synthesis::Dropped(e) => {
                log::warn!("turn: fallback apology could not be synthesized: {e}");
                self.dropped += 1;
                self.finish(outcome);
                None
            }
        }
    }

    fn segment(&mut self, source_text: String, audio: SynthesizedAudio) -> SpeechSegment {
        let segment = SpeechSegment {
            index: self.yielded,
            source_text,
            sample_rate: audio.sample_rate,
            samples: audio.samples,
        };
        self.yielded += 1;
        segment
    }

    fn finish(&mut self, outcome: TurnOutcome) {
        if self.outcome.is_some() {
            return;
        }
        self.fragments = None;
        self.state = match outcome {
            TurnOutcome::Completed => TurnState::Done,
            TurnOutcome::Cancelled => TurnState::Cancelled,
            TurnOutcome::Rejected(_) | TurnOutcome::Failed(_) => TurnState::Failed,
        };
        self.metrics.mark_turn_end();

        log::info!(
            "turn: {outcome} after {} segments ({} dropped) [{}]",
            self.yielded,
            self.dropped,
            self.metrics.report()
        );
        self.outcome = Some(outcome);
    }
}

/// One synthesis call bounded by `timeout` and raced against `cancel`.
async fn synthesize(
    synthesizer: Arc<dyn Synthesizer>,
    cancel: CancelToken,
    timeout: Duration,
    text: &str,
) -> Synthesis {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Synthesis::Cancelled,
        result = tokio::time::timeout(timeout, synthesizer.synthesize(text)) => match result {
            Ok(Ok(audio)) => Synthesis::Ready(audio),
            Ok(Err(e)) => Synthesis::Dropped(e),
            Err(_) => Synthesis::Dropped(SynthesisError::Timeout),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::ToneSynthesizer;
    use futures::stream::BoxStream;

    fn fragments(items: &[&str]) -> FragmentStream {
        let items: Vec<Result<String, GenerationError>> =
            items.iter().map(|s| Ok(s.to_string())).collect();
        stream::iter(items).boxed()
    }

    fn failing_after(items: &[&str], error: GenerationError) -> FragmentStream {
        let mut items: Vec<Result<String, GenerationError>> =
            items.iter().map(|s| Ok(s.to_string())).collect();
        items.push(Err(error));
        stream::iter(items).boxed()
    }

    fn orchestrator(source: FragmentStream, synth: Arc<ToneSynthesizer>) -> StreamingOrchestrator {
        StreamingOrchestrator::new(source, synth, OrchestratorSettings::default())
    }

    fn texts(segments: &[SpeechSegment]) -> Vec<&str> {
        segments.iter().map(|s| s.source_text.as_str()).collect()
    }

    #[tokio::test]
    async fn flushes_once_threshold_is_reached() {
        let synth = Arc::new(ToneSynthesizer::new());
        let mut orc = orchestrator(fragments(&["a", "b", "cd"]), synth.clone());

        let segments = orc.collect().await;
        assert_eq!(texts(&segments), ["abcd"]);
        assert_eq!(synth.calls(), ["abcd"]);
        assert_eq!(orc.outcome(), Some(&TurnOutcome::Completed));
        assert_eq!(orc.state(), TurnState::Done);
    }

    #[tokio::test]
    async fn remainder_is_flushed_at_end_without_minimum() {
        let synth = Arc::new(ToneSynthesizer::new());
        let mut orc = orchestrator(fragments(&["Hello", " ", "!"]), synth);

        let segments = orc.collect().await;
        assert_eq!(texts(&segments), ["Hello", "!"]);
        assert_eq!(segments[1].index, 1);
    }

    #[tokio::test]
    async fn whitespace_is_kept_between_fragments() {
        let synth = Arc::new(ToneSynthesizer::new());
        let mut orc = orchestrator(fragments(&["a", " ", "b", "c"]), synth);

        let segments = orc.collect().await;
        assert_eq!(texts(&segments), ["a b", "c"]);
        assert_eq!(orc.reply(), "a bc");
    }

    #[tokio::test]
    async fn empty_stream_completes_silently() {
        let synth = Arc::new(ToneSynthesizer::new());
        let mut orc = orchestrator(fragments(&[]), synth.clone());

        assert!(orc.next_segment().await.is_none());
        assert_eq!(orc.outcome(), Some(&TurnOutcome::Completed));
        assert!(synth.calls().is_empty());
        assert!(orc.metrics().first_token_at.is_none());
    }

    #[tokio::test]
    async fn failure_before_first_fragment_yields_one_apology() {
        let synth = Arc::new(ToneSynthesizer::new());
        let mut orc = orchestrator(
            failing_after(&[], GenerationError::Request("refused".into())),
            synth.clone(),
        );

        let segments = orc.collect().await;
        assert_eq!(segments.len(), 1);
        assert_eq!(
            segments[0].source_text,
            OrchestratorSettings::default().fallback_text
        );
        assert!(matches!(
            orc.outcome(),
            Some(TurnOutcome::Failed(TurnError::GenerationFailure(_)))
        ));
        assert_eq!(orc.state(), TurnState::Failed);
    }

    #[tokio::test]
    async fn failure_mid_stream_flushes_pending_without_apology() {
        let synth = Arc::new(ToneSynthesizer::new());
        let mut orc = orchestrator(
            failing_after(&["Hi", "!"], GenerationError::Stream("reset".into())),
            synth.clone(),
        );

        let segments = orc.collect().await;
        assert_eq!(texts(&segments), ["Hi!"]);
        assert!(matches!(
            orc.outcome(),
            Some(TurnOutcome::Failed(TurnError::PartialGenerationFailure(_)))
        ));
        assert!(!synth
            .calls()
            .contains(&OrchestratorSettings::default().fallback_text));
    }

    #[tokio::test]
    async fn failure_mid_stream_with_partial_remainder() {
        let synth = Arc::new(ToneSynthesizer::new());
        let mut orc = orchestrator(
            failing_after(&["Hello", "wo"], GenerationError::Timeout),
            synth,
        );

        let segments = orc.collect().await;
        assert_eq!(texts(&segments), ["Hello", "wo"]);
        assert!(matches!(orc.outcome(), Some(TurnOutcome::Failed(_))));
    }

    #[tokio::test]
    async fn synthesis_failure_drops_only_that_segment() {
        let synth = Arc::new(ToneSynthesizer::failing_on(&["two"]));
        let mut orc = orchestrator(fragments(&["one", "two", "three"]), synth);

        let segments = orc.collect().await;
        assert_eq!(texts(&segments), ["one", "three"]);
        assert_eq!(segments[1].index, 1);
        assert_eq!(orc.segments_dropped(), 1);
        assert_eq!(orc.outcome(), Some(&TurnOutcome::Completed));
    }

    #[tokio::test]
    async fn first_audio_milestone_uses_first_successful_flush() {
        let synth = Arc::new(ToneSynthesizer::failing_on(&["one"]));
        let mut orc = orchestrator(fragments(&["one", "two"]), synth);

        let first = orc.next_segment().await.unwrap();
        assert_eq!(first.source_text, "two");
        let m = *orc.metrics();
        let token = m.first_token_at.unwrap();
        let synth_start = m.first_synthesis_start_at.unwrap();
        let ready = m.first_audio_ready_at.unwrap();
        assert!(token <= synth_start && synth_start <= ready);

        orc.collect().await;
        let m = orc.metrics();
        assert!(ready <= m.turn_end.unwrap());
    }

    #[tokio::test]
    async fn fragment_timeout_counts_as_generation_failure() {
        let synth = Arc::new(ToneSynthesizer::new());
        let stalled: BoxStream<'static, Result<String, GenerationError>> = stream::pending().boxed();
        let settings = OrchestratorSettings {
            call_timeout: Duration::from_millis(20),
            ..OrchestratorSettings::default()
        };
        let mut orc = StreamingOrchestrator::new(stalled, synth, settings);

        let segments = orc.collect().await;
        assert_eq!(segments.len(), 1, "apology expected");
        assert!(matches!(
            orc.outcome(),
            Some(TurnOutcome::Failed(TurnError::GenerationFailure(_)))
        ));
    }

    #[tokio::test]
    async fn synthesis_timeout_drops_segment() {
        let mut slow = ToneSynthesizer::new();
        slow.delay = Some(Duration::from_millis(200));
        let settings = OrchestratorSettings {
            call_timeout: Duration::from_millis(20),
            ..OrchestratorSettings::default()
        };
        let mut orc = StreamingOrchestrator::new(fragments(&["abc"]), Arc::new(slow), settings);

        assert!(orc.collect().await.is_empty());
        assert_eq!(orc.segments_dropped(), 1);
        assert_eq!(orc.outcome(), Some(&TurnOutcome::Completed));
    }

    #[tokio::test]
    async fn cancellation_stops_consumption() {
        let synth = Arc::new(ToneSynthesizer::new());
        let cancel = CancelToken::new();
        let mut orc = orchestrator(fragments(&["one", "two", "three"]), synth.clone())
            .with_cancel(cancel.clone());

        let first = orc.next_segment().await.unwrap();
        assert_eq!(first.source_text, "one");
        cancel.cancel();

        assert!(orc.next_segment().await.is_none());
        assert!(orc.next_segment().await.is_none());
        assert_eq!(orc.outcome(), Some(&TurnOutcome::Cancelled));
        assert_eq!(orc.state(), TurnState::Cancelled);
        assert_eq!(synth.calls(), ["one"]);
    }

    #[tokio::test]
    async fn cancellation_during_synthesis_yields_nothing() {
        let mut slow = ToneSynthesizer::new();
        slow.delay = Some(Duration::from_millis(100));
        let cancel = CancelToken::new();
        let mut orc = orchestrator(fragments(&["abc", "def"]), Arc::new(slow))
            .with_cancel(cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        assert!(orc.next_segment().await.is_none());
        canceller.await.unwrap();
        assert_eq!(orc.outcome(), Some(&TurnOutcome::Cancelled));
    }

    #[tokio::test]
    async fn segments_stream_matches_next_segment() {
        let synth = Arc::new(ToneSynthesizer::new());
        let mut orc = orchestrator(fragments(&["The ", "quick ", "fox."]), synth);
        let collected: Vec<SpeechSegment> = orc.segments().collect().await;
        assert_eq!(texts(&collected), ["The", "quick", "fox."]);
    }

    #[tokio::test]
    async fn partitioning_is_deterministic() {
        let script = ["Sure", ",", " the ", "answer", " is ", "4", "2", "."];
        let mut runs = Vec::new();
        for _ in 0..2 {
            let synth = Arc::new(ToneSynthesizer::new());
            let mut orc = orchestrator(fragments(&script), synth);
            let segments = orc.collect().await;
            runs.push(texts(&segments).iter().map(|s| s.to_string()).collect::<Vec<_>>());
        }
        assert_eq!(runs[0], runs[1]);
    }
}
