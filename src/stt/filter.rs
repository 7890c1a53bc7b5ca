//! Transcript quality filter.
//!
//! Speech recognisers hallucinate on noise: captioning credits, runs of
//! exclamation marks, one character repeated, or a loop of the same phrase.
//! [`TranscriptFilter`] holds an ordered list of [`FilterRule`]s and rejects a
//! transcript on the first rule that matches.
//!
//! Phrase matching is a case-sensitive substring test.

use thiserror::Error;

/// Captioning credits that leak into transcripts.  Longest first so the
/// reason names the most specific phrase.
pub const DENY_LIST: &[&str] = &["subtitle by someone", "subtitle by", "subtitle"];

/// Generic filler produced on silence or music.
pub const HALLUCINATION_PHRASES: &[&str] = &[
    "Thank you.",
    "thanks",
    "Thank you for watching",
    "please like subscribe and share",
    "please like and subscribe",
    "thanks for watching",
    "subtitle",
    "captions",
];

const AFFECTION_PHRASES: &[&str] = &["I love you", "love you"];

const MAX_EXCLAMATIONS: usize = 20;
const MAX_EXCLAMATION_DENSITY: f32 = 0.3;
const MAX_REPEAT_DENSITY: f32 = 0.8;
const MIN_REPEAT_SAMPLE: usize = 10;
const AFFECTION_MIN_LEN: usize = 200;
const MIN_ALPHA_RATIO: f32 = 0.3;

// ---------------------------------------------------------------------------
// QualityRejection
// ---------------------------------------------------------------------------

/// First rule that matched, with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{rule}: {reason}")]
pub struct QualityRejection {
    pub rule: &'static str,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// FilterRule
// ---------------------------------------------------------------------------

type Check = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// A named predicate returning `Some(reason)` when the transcript is bad.
pub struct FilterRule {
    name: &'static str,
    check: Check,
}

impl std::fmt::Debug for FilterRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterRule").field("name", &self.name).finish()
    }
}

impl FilterRule {
    pub fn new<F>(name: &'static str, check: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            name,
            check: Box::new(check),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn evaluate(&self, text: &str) -> Option<String> {
        (self.check)(text)
    }

    /// Rejects text containing one of `phrases`; the reason names the phrase.
    pub fn phrase_list(name: &'static str, label: &'static str, phrases: &'static [&'static str]) -> Self {
        Self::new(name, move |text| {
            phrases
                .iter()
                .find(|p| text.contains(**p))
                .map(|p| format!("{label}: {p:?}"))
        })
    }

    pub fn deny_list() -> Self {
        Self::phrase_list("deny_list", "contains known bad string", DENY_LIST)
    }

    pub fn exclamation_overload() -> Self {
        Self::new("exclamation_overload", |text| {
            let count = text.matches('!').count();
            let len = text.chars().count();
            let density = if len > 0 { count as f32 / len as f32 } else { 0.0 };
            (count > MAX_EXCLAMATIONS || density > MAX_EXCLAMATION_DENSITY).then(|| {
                format!("too many exclamation marks: {count}, density {density:.3}")
            })
        })
    }

    pub fn repetition_density() -> Self {
        Self::new("repetition_density", |text| {
            let density = repeat_density(text)?;
            (density > MAX_REPEAT_DENSITY)
                .then(|| format!("high repeated-character density: {density:.3}"))
        })
    }

    pub fn affection_loop() -> Self {
        Self::new("affection_loop", |text| {
            if text.chars().count() <= AFFECTION_MIN_LEN {
                return None;
            }
            AFFECTION_PHRASES
                .iter()
                .find(|p| text.contains(**p))
                .map(|p| format!("long text contains repeated phrase {p:?}"))
        })
    }

    pub fn low_alphabetic_ratio() -> Self {
        Self::new("low_alphabetic_ratio", |text| {
            let len = text.chars().count();
            let alpha = text.chars().filter(|c| c.is_alphabetic()).count();
            ((alpha as f32) < len as f32 * MIN_ALPHA_RATIO)
                .then(|| format!("low alphabetic ratio: {alpha}/{len}"))
        })
    }

    pub fn hallucination_phrases() -> Self {
        Self::phrase_list(
            "hallucination_phrase",
            "hallucination pattern",
            HALLUCINATION_PHRASES,
        )
    }
}

/// `1 − unique / total` over non-whitespace characters, or `None` when there
/// are no more than `MIN_REPEAT_SAMPLE` of them.
fn repeat_density(text: &str) -> Option<f32> {
    let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if chars.len() <= MIN_REPEAT_SAMPLE {
        return None;
    }
    let unique = chars.iter().collect::<std::collections::HashSet<_>>().len();
    Some(1.0 - unique as f32 / chars.len() as f32)
}

// ---------------------------------------------------------------------------
// TranscriptFilter
// ---------------------------------------------------------------------------

/// Ordered rule list; the first match rejects.
#[derive(Debug)]
pub struct TranscriptFilter {
    rules: Vec<FilterRule>,
}

impl Default for TranscriptFilter {
    fn default() -> Self {
        Self::new(vec![
            FilterRule::deny_list(),
            FilterRule::exclamation_overload(),
            FilterRule::repetition_density(),
            FilterRule::affection_loop(),
            FilterRule::low_alphabetic_ratio(),
            FilterRule::hallucination_phrases(),
        ])
    }
}

impl TranscriptFilter {
    pub fn new(rules: Vec<FilterRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.iter().map(FilterRule::name)
    }

    /// Append a rule after the existing ones.
    pub fn with_rule(mut self, rule: FilterRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn check(&self, text: &str) -> Result<(), QualityRejection> {
        for rule in &self.rules {
            if let Some(reason) = rule.evaluate(text) {
                return Err(QualityRejection {
                    rule: rule.name(),
                    reason,
                });
            }
        }
        Ok(())
    }

    /// `(accepted, reason)`; the reason is empty when accepted.
    pub fn is_acceptable(&self, text: &str) -> (bool, String) {
        match self.check(text) {
            Ok(()) => (true, String::new()),
            Err(rejection) => (false, rejection.reason),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
