//! Re-buffering of model text fragments into speakable phrases.

/// Characters that end a sentence.
const TERMINAL: &[char] = &['.', '!', '?'];

/// Characters after which a gap stays attached to the following clause.
const CLAUSE_PAUSE: &[char] = &[',', ';', ':'];

/// Unbroken text is cut once it reaches this multiple of the threshold.
const HARD_LIMIT_FACTOR: usize = 4;

/// A unit of assistant text ready to be spoken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhraseChunk {
    /// Position within the reply, starting at 0.
    pub sequence: usize,
    pub text: String,
}

/// Accumulates fragments until a phrase boundary.
///
/// Flush rules, checked after every fragment:
/// - the text, ignoring trailing whitespace, ends in `.`, `!` or `?`;
/// - the text is at least `threshold` characters long and ends at a plain
///   word gap (whitespace after a word, not after a comma-like pause);
/// - the text reached `HARD_LIMIT_FACTOR * threshold` characters.
///
/// Any non-blank remainder is flushed by [`PhraseBuffer::finish`].
#[derive(Debug, Clone)]
pub struct PhraseBuffer {
    threshold: usize,
    pending: String,
    next_sequence: usize,
}

impl PhraseBuffer {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            pending: String::new(),
            next_sequence: 0,
        }
    }

    /// Add one fragment. Returns the phrases completed by it (zero or one).
    pub fn push(&mut self, fragment: &str) -> Vec<PhraseChunk> {
        if fragment.is_empty() {
            return Vec::new();
        }
        self.pending.push_str(fragment);

        if self.should_flush() {
            self.take().into_iter().collect()
        } else {
            Vec::new()
        }
    }

    /// End of the fragment stream: flush whatever is left.
    pub fn finish(&mut self) -> Option<PhraseChunk> {
        self.take()
    }

    /// Drop the unflushed remainder (generation failed mid-stream).
    pub fn discard(&mut self) -> usize {
        let dropped = self.pending.chars().count();
        self.pending.clear();
        dropped
    }

    /// Text accumulated but not yet flushed.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Number of phrases emitted so far.
    pub fn emitted(&self) -> usize {
        self.next_sequence
    }

    fn should_flush(&self) -> bool {
        let trimmed = self.pending.trim_end();
        if trimmed.ends_with(TERMINAL) {
            return true;
        }

        let len = self.pending.chars().count();
        if len >= self.threshold * HARD_LIMIT_FACTOR {
            return true;
        }
        if len < self.threshold || trimmed.len() == self.pending.len() {
            return false;
        }
        !trimmed.ends_with(CLAUSE_PAUSE)
    }

    fn take(&mut self) -> Option<PhraseChunk> {
        if self.pending.trim().is_empty() {
            self.pending.clear();
            return None;
        }
        let chunk = PhraseChunk {
            sequence: self.next_sequence,
            text: std::mem::take(&mut self.pending),
        };
        self.next_sequence += 1;
        Some(chunk)
    }
}
