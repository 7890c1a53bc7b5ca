//! Per-session context and the turn entry point.
//!
//! [`VoiceSession`] owns everything one conversation needs: the shared
//! collaborators, the stage settings, and the rolling conversation history.
//! It is cheap to clone; clones belong to the same conversation.
//!
//! [`VoiceSession::start_turn`] takes one raw utterance and returns a lazy
//! [`Turn`].  Nothing runs until the caller asks for the first segment:
//!
//! ```text
//! Turn::next_segment()
//!   ├─ condition audio            ── AudioRejection   → Rejected
//!   ├─ debug sink (optional)
//!   ├─ transcription gate         ── GateRejection    → Rejected / Failed
//!   ├─ transcript filter          ── QualityRejection → Rejected
//!   ├─ synthesizer ready?         ── no               → Failed
//!   ├─ generator.generate(prompt, history)
//!   └─ StreamingOrchestrator      ── segments …       → Completed / Failed / Cancelled
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;

use crate::audio::{timestamp_label, AudioConditioner, DebugSink, UtteranceAudio, WavDebugSink};
use crate::config::AppConfig;
use crate::llm::{ConversationHistory, FragmentStream, GenerationError, TextGenerator};
use crate::stt::{Transcriber, TranscriptFilter, TranscriptionGate, TranscriptionResult};
use crate::tts::Synthesizer;

use super::cancel::CancelToken;
use super::error::{TurnError, TurnOutcome};
use super::metrics::{LatencyReport, TurnMetrics};
use super::orchestrator::{OrchestratorSettings, SpeechSegment, StreamingOrchestrator};

// ---------------------------------------------------------------------------
// VoiceSession
// ---------------------------------------------------------------------------

/// One conversation.  No state is shared between sessions except the
/// collaborators handed in.
#[derive(Clone)]
pub struct VoiceSession {
    conditioner: AudioConditioner,
    gate: TranscriptionGate,
    filter: Arc<TranscriptFilter>,
    settings: OrchestratorSettings,
    transcriber: Arc<dyn Transcriber>,
    generator: Arc<dyn TextGenerator>,
    synthesizer: Arc<dyn Synthesizer>,
    debug_sink: Option<Arc<dyn DebugSink>>,
    history: Arc<Mutex<ConversationHistory>>,
}

impl VoiceSession {
    /// Build a session from `config`.  A [`WavDebugSink`] is attached when
    /// `debug.audio` is set.
    pub fn new(
        config: &AppConfig,
        transcriber: Arc<dyn Transcriber>,
        generator: Arc<dyn TextGenerator>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        let debug_sink = config
            .debug
            .audio
            .then(|| Arc::new(WavDebugSink::new(&config.debug.audio_path)) as Arc<dyn DebugSink>);

        Self {
            conditioner: AudioConditioner::from_config(&config.audio),
            gate: TranscriptionGate::from_config(&config.stt),
            filter: Arc::new(TranscriptFilter::default()),
            settings: OrchestratorSettings::from_config(&config.turn),
            transcriber,
            generator,
            synthesizer,
            debug_sink,
            history: Arc::new(Mutex::new(ConversationHistory::new(config.llm.history_limit))),
        }
    }

    pub fn with_debug_sink(mut self, sink: Arc<dyn DebugSink>) -> Self {
        self.debug_sink = Some(sink);
        self
    }

    pub fn with_filter(mut self, filter: TranscriptFilter) -> Self {
        self.filter = Arc::new(filter);
        self
    }

    /// Copy of the conversation so far, oldest first.
    pub fn history(&self) -> ConversationHistory {
        self.with_history(|h| h.clone())
    }

    pub fn clear_history(&self) {
        self.with_history(ConversationHistory::clear)
    }

    // A panic while holding the lock leaves the history intact, so poisoning
    // is ignored.
    fn with_history<R>(&self, f: impl FnOnce(&mut ConversationHistory) -> R) -> R {
        let mut guard = self
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut *guard)
    }

    /// Begin a turn for one captured utterance.  The returned [`Turn`] is
    /// lazy; `cancel` may be triggered at any time to interrupt it.
    pub fn start_turn(&self, audio: UtteranceAudio, cancel: CancelToken) -> Turn {
        Turn {
            session: self.clone(),
            cancel,
            metrics: TurnMetrics::start(),
            stage: Stage::Pending(audio),
            transcript: None,
            report: None,
        }
    }
}

// ---------------------------------------------------------------------------
// TurnReport
// ---------------------------------------------------------------------------

/// Summary of a finished turn, for logging or export.
#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    #[serde(skip)]
    pub metrics: TurnMetrics,
    pub latency: LatencyReport,
    pub transcript: Option<TranscriptionResult>,
    /// Generated reply, trimmed.
    pub reply: String,
    pub segments_yielded: usize,
    pub segments_dropped: usize,
}

// ---------------------------------------------------------------------------
// Turn
// ---------------------------------------------------------------------------

enum Stage {
    Pending(UtteranceAudio),
    Streaming(Box<StreamingOrchestrator>),
    Finished,
}

/// A lazy, finite, non-restartable sequence of speech segments.
pub struct Turn {
    session: VoiceSession,
    cancel: CancelToken,
    metrics: TurnMetrics,
    stage: Stage,
    transcript: Option<TranscriptionResult>,
    report: Option<TurnReport>,
}

impl Turn {
    /// Next segment of the reply, or `None` once the turn is over.
    pub async fn next_segment(&mut self) -> Option<SpeechSegment> {
        loop {
            match std::mem::replace(&mut self.stage, Stage::Finished) {
                Stage::Pending(audio) => match self.prepare(audio).await {
                    Ok(orchestrator) => self.stage = Stage::Streaming(Box::new(orchestrator)),
                    Err(outcome) => {
                        self.finish_early(outcome);
                        return None;
                    }
                },
                Stage::Streaming(mut orchestrator) => {
                    if let Some(segment) = orchestrator.next_segment().await {
                        self.stage = Stage::Streaming(orchestrator);
                        return Some(segment);
                    }
                    self.finish_streaming(&orchestrator);
                    return None;
                }
                Stage::Finished => return None,
            }
        }
    }

    /// The same sequence as a `Stream`.
    pub fn segments(&mut self) -> impl Stream<Item = SpeechSegment> + Send + '_ {
        stream::unfold(self, |turn| async move {
            let segment = turn.next_segment().await?;
            Some((segment, turn))
        })
    }

    /// Run the turn to the end, returning every segment and the report.
    pub async fn run_to_end(mut self) -> (Vec<SpeechSegment>, TurnReport) {
        let mut segments = Vec::new();
        while let Some(segment) = self.next_segment().await {
            segments.push(segment);
        }
        let report = self.report.take().unwrap_or_else(|| TurnReport {
            outcome: TurnOutcome::Cancelled,
            metrics: self.metrics,
            latency: self.metrics.report(),
            transcript: self.transcript.clone(),
            reply: String::new(),
            segments_yielded: segments.len(),
            segments_dropped: 0,
        });
        (segments, report)
    }

    /// Available once `next_segment` has returned `None`.
    pub fn report(&self) -> Option<&TurnReport> {
        self.report.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.report.is_some()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    // -----------------------------------------------------------------------
    // Front stages
    // -----------------------------------------------------------------------

    async fn prepare(&mut self, raw: UtteranceAudio) -> Result<StreamingOrchestrator, TurnOutcome> {
        let session = self.session.clone();

        if self.cancel.is_cancelled() {
            return Err(TurnOutcome::Cancelled);
        }

        let audio = session.conditioner.condition(&raw).map_err(|rejection| {
            log::info!("turn: audio rejected: {rejection}");
            TurnOutcome::from_error(rejection.into())
        })?;

        if let Some(sink) = &session.debug_sink {
            save_debug_audio(Arc::clone(sink), &audio).await;
        }

        let transcript = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TurnOutcome::Cancelled),
            result = session.gate.transcribe(&audio, Arc::clone(&session.transcriber)) => result,
        }
        .map_err(|rejection| {
            let error = TurnError::from(rejection);
            if error.is_rejection() {
                log::info!("turn: {error}");
            } else {
                log::warn!("turn: {error}");
            }
            TurnOutcome::from_error(error)
        })?;
        self.metrics.mark_transcribed();

        let prompt = transcript.trimmed().to_string();
        log::info!("turn: transcript ({}) {prompt:?}", transcript.language);
        self.transcript = Some(transcript);

        session.filter.check(&prompt).map_err(|rejection| {
            log::info!("turn: transcript discarded: {rejection}");
            TurnOutcome::from_error(rejection.into())
        })?;

        if !session.synthesizer.is_ready() {
            let error = TurnError::ResourceNotReady("synthesizer".into());
            log::warn!("turn: {error}");
            return Err(TurnOutcome::Failed(error));
        }

        let history = session.with_history(|h| {
            let snapshot = h.snapshot();
            h.push_user(prompt.clone());
            snapshot
        });

        self.metrics.mark_generation_started();
        let fragments = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TurnOutcome::Cancelled),
            started = start_generation(
                session.generator.as_ref(),
                &prompt,
                &history,
                session.settings.call_timeout,
            ) => started,
        };

        Ok(StreamingOrchestrator::new(
            fragments,
            Arc::clone(&session.synthesizer),
            session.settings.clone(),
        )
        .with_metrics(self.metrics)
        .with_cancel(self.cancel.clone()))
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    fn finish_early(&mut self, outcome: TurnOutcome) {
        self.metrics.mark_turn_end();
        if matches!(outcome, TurnOutcome::Cancelled) {
            log::info!("turn: cancelled before generation");
        }
        self.report = Some(TurnReport {
            outcome,
            metrics: self.metrics,
            latency: self.metrics.report(),
            transcript: self.transcript.clone(),
            reply: String::new(),
            segments_yielded: 0,
            segments_dropped: 0,
        });
    }

    fn finish_streaming(&mut self, orchestrator: &StreamingOrchestrator) {
        let reply = orchestrator.reply().trim().to_string();
        self.session.with_history(|h| h.push_assistant(&reply));

        let metrics = *orchestrator.metrics();
        self.metrics = metrics;
        self.report = Some(TurnReport {
            outcome: orchestrator
                .outcome()
                .cloned()
                .unwrap_or(TurnOutcome::Cancelled),
            metrics,
            latency: metrics.report(),
            transcript: self.transcript.clone(),
            reply,
            segments_yielded: orchestrator.segments_yielded(),
            segments_dropped: orchestrator.segments_dropped(),
        });
    }
}

/// Call the generator, bounded by `timeout`.  A refusal becomes a stream
/// whose only item is the error, so the orchestrator treats it like any
/// failure before the first fragment.
async fn start_generation(
    generator: &dyn TextGenerator,
    prompt: &str,
    history: &[crate::llm::ChatMessage],
    timeout: Duration,
) -> FragmentStream {
    let started = match tokio::time::timeout(timeout, generator.generate(prompt, history)).await {
        Ok(result) => result,
        Err(_) => Err(GenerationError::Timeout),
    };
    match started {
        Ok(fragments) => fragments,
        Err(e) => stream::once(async move { Err(e) }).boxed(),
    }
}

async fn save_debug_audio(sink: Arc<dyn DebugSink>, audio: &UtteranceAudio) {
    let samples = audio.samples.to_f32();
    let sample_rate = audio.sample_rate;
    let label = timestamp_label();

    let saved = tokio::task::spawn_blocking(move || sink.save(&samples, sample_rate, &label)).await;
    match saved {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("turn: debug audio not saved: {e:#}"),
        Err(e) => log::warn!("turn: debug audio task failed: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Samples;
    use crate::llm::{GenerationError, Role, ScriptedGenerator};
    use crate::stt::MockTranscriber;
    use crate::tts::ToneSynthesizer;

    fn speech() -> UtteranceAudio {
        let samples: Vec<f32> = (0..24_000).map(|i| (i as f32 * 0.07).sin() * 0.3).collect();
        UtteranceAudio::mono(Samples::F32(samples), 24_000)
    }

    fn session(
        transcript: &str,
        generator: Arc<ScriptedGenerator>,
        synthesizer: Arc<ToneSynthesizer>,
    ) -> VoiceSession {
        VoiceSession::new(
            &AppConfig::default(),
            Arc::new(MockTranscriber::ok(transcript, 0.05)),
            generator,
            synthesizer,
        )
    }

    #[tokio::test]
    async fn happy_path_records_history() {
        let gen = Arc::new(ScriptedGenerator::new(&["It is ", "sunny", " today."]));
        let synth = Arc::new(ToneSynthesizer::new());
        let s = session("How is the weather?", gen.clone(), synth);

        let (segments, report) = s.start_turn(speech(), CancelToken::new()).run_to_end().await;
        let joined: Vec<_> = segments.iter().map(|x| x.source_text.as_str()).collect();
        assert_eq!(joined, ["It is", "sunny", "today."]);
        assert!(report.outcome.is_completed());
        assert_eq!(report.reply, "It is sunny today.");
        assert_eq!(report.segments_yielded, 3);
        assert!(report.metrics.transcribed_at.is_some());
        assert!(report.metrics.generation_started_at <= report.metrics.first_token_at);

        let history = s.history().snapshot();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "How is the weather?");
        assert_eq!(history[1].content, "It is sunny today.");
    }

    #[tokio::test]
    async fn second_turn_sees_first_in_history() {
        let gen = Arc::new(ScriptedGenerator::new(&["Fine."]));
        let s = session("Hello there", gen.clone(), Arc::new(ToneSynthesizer::new()));

        s.start_turn(speech(), CancelToken::new()).run_to_end().await;
        s.start_turn(speech(), CancelToken::new()).run_to_end().await;

        let calls = gen.calls.lock().unwrap();
        assert!(calls[0].1.is_empty());
        assert_eq!(calls[1].1.len(), 2);
        assert_eq!(calls[1].1[1].content, "Fine.");
    }

    #[tokio::test]
    async fn short_audio_is_rejected_before_transcription() {
        let gen = Arc::new(ScriptedGenerator::new(&["never"]));
        let transcriber = Arc::new(MockTranscriber::ok("hello", 0.0));
        let s = VoiceSession::new(
            &AppConfig::default(),
            transcriber.clone(),
            gen.clone(),
            Arc::new(ToneSynthesizer::new()),
        );
        let short = UtteranceAudio::mono(Samples::F32(vec![0.2; 2_400]), 24_000);

        let (segments, report) = s.start_turn(short, CancelToken::new()).run_to_end().await;
        assert!(segments.is_empty());
        assert!(matches!(
            report.outcome,
            TurnOutcome::Rejected(TurnError::RejectedInput(_))
        ));
        assert_eq!(transcriber.calls(), 0);
        assert!(gen.calls.lock().unwrap().is_empty());
        assert!(report.metrics.turn_end.is_some());
    }

    #[tokio::test]
    async fn low_quality_transcript_never_reaches_generator() {
        let gen = Arc::new(ScriptedGenerator::new(&["never"]));
        let synth = Arc::new(ToneSynthesizer::new());
        let s = session("subtitle by someone", gen.clone(), synth.clone());

        let (segments, report) = s.start_turn(speech(), CancelToken::new()).run_to_end().await;
        assert!(segments.is_empty());
        match report.outcome {
            TurnOutcome::Rejected(TurnError::LowQualityTranscript { reason, .. }) => {
                assert!(reason.contains("subtitle by someone"))
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(gen.calls.lock().unwrap().is_empty());
        assert!(synth.calls().is_empty());
        assert!(s.history().is_empty());
    }

    #[tokio::test]
    async fn synthesizer_not_ready_is_fatal() {
        let mut synth = ToneSynthesizer::new();
        synth.ready = false;
        let gen = Arc::new(ScriptedGenerator::new(&["hi"]));
        let s = session("What time is it?", gen.clone(), Arc::new(synth));

        let (segments, report) = s.start_turn(speech(), CancelToken::new()).run_to_end().await;
        assert!(segments.is_empty());
        assert!(matches!(
            report.outcome,
            TurnOutcome::Failed(TurnError::ResourceNotReady(_))
        ));
        assert!(gen.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn generator_refusal_yields_apology() {
        let gen = Arc::new(ScriptedGenerator::refusing(GenerationError::NotConfigured(
            "DeepSeek".into(),
        )));
        let s = session("Tell me a joke", gen, Arc::new(ToneSynthesizer::new()));

        let (segments, report) = s.start_turn(speech(), CancelToken::new()).run_to_end().await;
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].source_text, AppConfig::default().turn.fallback_text);
        assert!(matches!(
            report.outcome,
            TurnOutcome::Failed(TurnError::GenerationFailure(_))
        ));
        // the prompt is recorded, the apology is not
        let history = s.history().snapshot();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }

    #[tokio::test]
    async fn cancelled_before_start_does_nothing() {
        let gen = Arc::new(ScriptedGenerator::new(&["never"]));
        let s = session("Hello there", gen.clone(), Arc::new(ToneSynthesizer::new()));
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut turn = s.start_turn(speech(), cancel);
        assert!(turn.next_segment().await.is_none());
        assert_eq!(turn.report().map(|r| &r.outcome), Some(&TurnOutcome::Cancelled));
        assert!(gen.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn debug_sink_receives_conditioned_audio() {
        struct Recorder(Mutex<Vec<(usize, u32, String)>>);
        impl DebugSink for Recorder {
            fn save(&self, samples: &[f32], sample_rate: u32, label: &str) -> anyhow::Result<()> {
                self.0
                    .lock()
                    .unwrap()
                    .push((samples.len(), sample_rate, label.to_string()));
                Ok(())
            }
        }

        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let s = session(
            "Hello there",
            Arc::new(ScriptedGenerator::new(&["Hi."])),
            Arc::new(ToneSynthesizer::new()),
        )
        .with_debug_sink(recorder.clone());

        s.start_turn(speech(), CancelToken::new()).run_to_end().await;
        let saved = recorder.0.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, 24_000);
        assert_eq!(saved[0].1, 24_000);
        assert!(saved[0].2.starts_with("received_"));
    }

    #[tokio::test]
    async fn failing_debug_sink_does_not_fail_the_turn() {
        struct Broken;
        impl DebugSink for Broken {
            fn save(&self, _: &[f32], _: u32, _: &str) -> anyhow::Result<()> {
                anyhow::bail!("disk full")
            }
        }

        let s = session(
            "Hello there",
            Arc::new(ScriptedGenerator::new(&["Hi."])),
            Arc::new(ToneSynthesizer::new()),
        )
        .with_debug_sink(Arc::new(Broken));

        let (segments, report) = s.start_turn(speech(), CancelToken::new()).run_to_end().await;
        assert_eq!(segments.len(), 1);
        assert!(report.outcome.is_completed());
    }
}
