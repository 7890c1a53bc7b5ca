//! Pending-text buffer between the fragment stream and the synthesizer.

/// Collects fragments verbatim until enough text is pending to flush.
///
/// `pending` is cleared on every flush; `reply` keeps the whole generated
/// text for the conversation history.
#[derive(Debug, Clone, Default)]
pub struct TextAccumulator {
    pending: String,
    reply: String,
    fragments: usize,
}

impl TextAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append without trimming; whitespace is kept exactly as produced.
    pub fn push(&mut self, fragment: &str) {
        self.pending.push_str(fragment);
        self.reply.push_str(fragment);
        self.fragments += 1;
    }

    /// `true` when the trimmed pending text has at least `threshold` chars.
    pub fn is_ready(&self, threshold: usize) -> bool {
        self.pending.trim().chars().count() >= threshold
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.trim().is_empty()
    }

    /// Clear `pending`, returning its trimmed content if any.
    pub fn take(&mut self) -> Option<String> {
        let text = self.pending.trim().to_string();
        self.pending.clear();
        (!text.is_empty()).then_some(text)
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Everything pushed so far, untrimmed.
    pub fn reply(&self) -> &str {
        &self.reply
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_counts_trimmed_chars() {
        let mut acc = TextAccumulator::new();
        acc.push("  a");
        assert!(!acc.is_ready(3));
        acc.push("b ");
        assert!(!acc.is_ready(3));
        acc.push("cd");
        assert!(acc.is_ready(3));
        assert_eq!(acc.pending(), "  ab cd");
    }

    #[test]
    fn multibyte_chars_count_once() {
        let mut acc = TextAccumulator::new();
        acc.push("你好");
        assert!(!acc.is_ready(3));
        acc.push("吗");
        assert!(acc.is_ready(3));
    }

    #[test]
    fn take_trims_and_clears() {
        let mut acc = TextAccumulator::new();
        acc.push(" Hello, ");
        assert_eq!(acc.take().as_deref(), Some("Hello,"));
        assert_eq!(acc.pending(), "");
        assert!(!acc.has_pending());

        acc.push("   ");
        assert_eq!(acc.take(), None);
        assert_eq!(acc.pending(), "");
    }

    #[test]
    fn reply_keeps_everything() {
        let mut acc = TextAccumulator::new();
        acc.push("Hello");
        acc.take();
        acc.push(" world");
        assert_eq!(acc.reply(), "Hello world");
        assert_eq!(acc.fragment_count(), 2);
    }
}
