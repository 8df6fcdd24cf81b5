//! Reconciles streamed text deltas with a late authoritative final text.
//!
//! Some backends resend a rebuilt answer once streaming completes. The
//! assembler keeps whichever version is more complete, so streamed
//! characters are never lost to an empty or truncated completion signal.

/// Accumulates the text of one model step.
#[derive(Debug, Default, Clone)]
pub struct StreamAssembler {
    text: String,
    finished: bool,
    last_seq: Option<u64>,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta. Deltas carrying a sequence number at or below the
    /// last consumed one are dropped as stale or duplicated.
    pub fn push_delta(&mut self, text: &str, seq: Option<u64>) {
        if self.finished {
            return;
        }
        if let Some(seq) = seq {
            if self.last_seq.is_some_and(|last| seq <= last) {
                return;
            }
            self.last_seq = Some(seq);
        }
        self.text.push_str(text);
    }

    /// Reconcile with the final text and stop accepting input.
    pub fn push_final(&mut self, text: &str) {
        if self.finished {
            return;
        }
        self.finished = true;

        if text.is_empty() {
            return;
        }
        if self.text.is_empty() || text.starts_with(self.text.as_str()) {
            self.text = text.to_string();
            return;
        }
        // Diverged: the final text is authoritative unless it is shorter.
        if text.chars().count() >= self.text.chars().count() {
            self.text = text.to_string();
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn into_text(self) -> String {
        self.text
    }
}
