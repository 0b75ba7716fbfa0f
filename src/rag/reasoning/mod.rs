
/// Delta that opens a reasoning section
pub const REASONING_START_TAG: &str = "<think>";

/// Delta that closes a reasoning section
pub const REASONING_END_TAG: &str = "</think>";

/// Classification of one streamed delta
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filtered {
    /// Part of the user-visible answer
    Answer(String),
    /// Part of the model's reasoning
    Reasoning(String),
    ReasoningStarted,
    ReasoningEnded,
    /// Dropped whitespace directly after a reasoning section
    Skipped,
}

/// Splits a delta stream into reasoning and answer text.
///
/// Tags are recognised only when a whole delta, trimmed, equals the tag.
/// Matching is case-sensitive and tags are never searched for inside larger
/// deltas. One all-whitespace delta right after the end tag is dropped.
#[derive(Debug, Default, Clone)]
pub struct ReasoningFilter {
    in_reasoning: bool,
    just_ended: bool,
    reasoning: String,
}

impl ReasoningFilter {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, delta: &str) -> Filtered {
        let trimmed = delta.trim();

        if trimmed == REASONING_START_TAG {
            self.in_reasoning = true;
            self.just_ended = false;
            self.reasoning.clear();
            return Filtered::ReasoningStarted;
        }
        if trimmed == REASONING_END_TAG {
            self.in_reasoning = false;
            self.just_ended = true;
            return Filtered::ReasoningEnded;
        }

        if self.in_reasoning {
            self.reasoning.push_str(delta);
            return Filtered::Reasoning(delta.to_string());
        }

        if std::mem::take(&mut self.just_ended) && trimmed.is_empty() {
            return Filtered::Skipped;
        }
        Filtered::Answer(delta.to_string())
    }

    /// True between a start tag and its end tag
    #[inline]
    pub fn in_reasoning(&self) -> bool {
        self.in_reasoning
    }

    /// Reasoning text of the current or most recent section
    #[inline]
    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    /// Drop any buffered reasoning, e.g. after the stream failed
    #[inline]
    pub fn discard(&mut self) {
        self.in_reasoning = false;
        self.just_ended = false;
        self.reasoning.clear();
    }
}

/// Split a complete answer that opens with a reasoning section into
/// `(answer, reasoning)`. Text without a leading section is returned as the answer.
#[inline]
pub fn split_reasoning(text: &str) -> (String, String) {
    let section = text
        .trim_start()
        .strip_prefix(REASONING_START_TAG)
        .and_then(|rest| rest.split_once(REASONING_END_TAG));

    match section {
        Some((reasoning, answer)) => (answer.trim_start().to_string(), reasoning.trim().to_string()),
        None => (text.to_string(), String::new()),
    }
}
