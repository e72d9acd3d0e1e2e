//! Ordered conversation transcript assembled from streamed events.
//!
//! Assistant speech arrives as many small text deltas; user speech arrives
//! as one finished transcription. The assembler merges contiguous assistant
//! deltas into a single utterance and never lets an utterance change once a
//! newer one has started.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    /// Label used when rendering a transcript for people.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::User => "You",
            Self::Assistant => "Interviewer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    speaker: Speaker,
    text: String,
    #[serde(skip)]
    open: bool,
}

impl Utterance {
    #[must_use]
    pub const fn speaker(&self) -> Speaker {
        self.speaker
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Still accumulating deltas.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    utterances: Vec<Utterance>,
}

impl Transcript {
    #[must_use]
    pub fn utterances(&self) -> &[Utterance] {
        &self.utterances
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Utterance> {
        self.utterances.iter()
    }

    /// `Interviewer: ...` / `You: ...`, one utterance per line.
    #[must_use]
    pub fn to_plain_text(&self) -> String {
        self.utterances
            .iter()
            .map(|u| format!("{}: {}", u.speaker.label(), u.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn close_open(&mut self) -> bool {
        match self.utterances.last_mut() {
            Some(last) if last.open => {
                last.open = false;
                true
            }
            _ => false,
        }
    }

    fn append_assistant_delta(&mut self, text: &str) {
        if let Some(last) = self.utterances.last_mut() {
            if last.open && last.speaker == Speaker::Assistant {
                last.text.push_str(text);
                return;
            }
        }
        self.close_open();
        self.utterances.push(Utterance {
            speaker: Speaker::Assistant,
            text: text.to_string(),
            open: true,
        });
    }

    fn append_user_final(&mut self, text: &str) {
        self.close_open();
        self.utterances.push(Utterance {
            speaker: Speaker::User,
            text: text.to_string(),
            open: false,
        });
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Utterance;
    type IntoIter = std::slice::Iter<'a, Utterance>;

    fn into_iter(self) -> Self::IntoIter {
        self.utterances.iter()
    }
}

/// The only writer of a session's transcript.
///
/// Readers hold the paired `watch::Receiver` and only ever see whole
/// snapshots.
#[derive(Debug)]
pub struct TranscriptAssembler {
    tx: watch::Sender<Transcript>,
    sealed: bool,
}

impl TranscriptAssembler {
    #[must_use]
    pub fn new() -> (Self, watch::Receiver<Transcript>) {
        let (tx, rx) = watch::channel(Transcript::default());
        (Self { tx, sealed: false }, rx)
    }

    /// Merge an assistant text fragment. Empty fragments change nothing.
    pub fn on_assistant_delta(&mut self, text: &str) {
        if text.is_empty() || self.sealed {
            return;
        }
        self.tx.send_modify(|t| t.append_assistant_delta(text));
    }

    /// Close whatever is open and append a finished user utterance.
    pub fn on_user_final(&mut self, text: &str) {
        if self.sealed {
            return;
        }
        self.tx.send_modify(|t| t.append_user_final(text));
    }

    /// Seal the transcript when the session ends. Later input is ignored.
    pub(crate) fn close(&mut self) {
        self.sealed = true;
        self.tx.send_if_modified(Transcript::close_open);
    }

    #[must_use]
    pub fn snapshot(&self) -> Transcript {
        self.tx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(t: &Transcript) -> Vec<(Speaker, &str)> {
        t.iter().map(|u| (u.speaker(), u.text())).collect()
    }

    #[test]
    fn contiguous_deltas_merge_into_one_utterance() {
        let (mut asm, _rx) = TranscriptAssembler::new();
        for delta in ["Tell", " me", " about", " yourself."] {
            asm.on_assistant_delta(delta);
        }
        let t = asm.snapshot();
        assert_eq!(pairs(&t), vec![(Speaker::Assistant, "Tell me about yourself.")]);
        assert!(t.utterances()[0].is_open());
    }

    #[test]
    fn user_final_closes_open_assistant_utterance() {
        let (mut asm, _rx) = TranscriptAssembler::new();
        asm.on_assistant_delta("Hello");
        asm.on_user_final("Hi");
        asm.on_assistant_delta("Next");

        let t = asm.snapshot();
        assert_eq!(
            pairs(&t),
            vec![
                (Speaker::Assistant, "Hello"),
                (Speaker::User, "Hi"),
                (Speaker::Assistant, "Next"),
            ]
        );
        assert!(!t.utterances()[0].is_open());
        assert!(!t.utterances()[1].is_open());
        assert!(t.utterances()[2].is_open());
    }

    #[test]
    fn consecutive_user_finals_stay_separate() {
        let (mut asm, _rx) = TranscriptAssembler::new();
        asm.on_user_final("First.");
        asm.on_user_final("Second.");
        assert_eq!(asm.snapshot().len(), 2);
    }

    #[test]
    fn empty_delta_is_a_no_op() {
        let (mut asm, rx) = TranscriptAssembler::new();
        asm.on_assistant_delta("");
        assert!(asm.snapshot().is_empty());
        assert!(!rx.has_changed().unwrap());

        asm.on_assistant_delta("Hi");
        asm.on_assistant_delta("");
        assert_eq!(pairs(&asm.snapshot()), vec![(Speaker::Assistant, "Hi")]);
    }

    #[test]
    fn close_seals_the_transcript() {
        let (mut asm, _rx) = TranscriptAssembler::new();
        asm.on_assistant_delta("Thanks for your time");
        asm.close();
        asm.on_assistant_delta("!");
        asm.on_user_final("Bye");
        let t = asm.snapshot();
        assert_eq!(pairs(&t), vec![(Speaker::Assistant, "Thanks for your time")]);
        assert!(!t.utterances()[0].is_open());
    }

    #[test]
    fn receivers_see_snapshots() {
        let (mut asm, rx) = TranscriptAssembler::new();
        asm.on_assistant_delta("Hi");
        let seen = rx.borrow().clone();
        asm.on_assistant_delta(" there");
        assert_eq!(seen.utterances()[0].text(), "Hi");
        assert_eq!(rx.borrow().utterances()[0].text(), "Hi there");
    }

    #[test]
    fn renders_and_serializes() {
        let (mut asm, _rx) = TranscriptAssembler::new();
        asm.on_assistant_delta("Why this role?");
        asm.on_user_final("I like APIs.");
        let t = asm.snapshot();

        assert_eq!(t.to_plain_text(), "Interviewer: Why this role?\nYou: I like APIs.");
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"speaker": "assistant", "text": "Why this role?"},
                {"speaker": "user", "text": "I like APIs."}
            ])
        );
    }
}
