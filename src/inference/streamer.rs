//! Snapshot-to-delta conversion.
//!
//! The engine reports the whole text so far at every step. The streamer
//! strips the echoed prompt and forwards only what was appended since the
//! previous step, tracking the length of the last de-prompted snapshot in
//! characters. A snapshot that comes back shorter than the tracked length
//! yields an empty chunk.
//!
//! Lengths count `char`s, not bytes: an earlier character may be rewritten
//! to one of a different UTF-8 width (a partial multi-byte token decoded as
//! U+FFFD, later completed), and a byte offset would then skip new text.

use std::borrow::Cow;

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};

use crate::inference::engine::{EngineError, SnapshotStream};

/// Per-request diff state. Not shareable across requests.
#[derive(Debug, Clone)]
pub struct DiffStreamer {
    prompt: String,
    last_length: usize,
}

impl DiffStreamer {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            last_length: 0,
        }
    }

    /// Consume one snapshot and return the newly appended suffix.
    pub fn next_chunk(&mut self, snapshot: &str) -> String {
        let answer = self.strip_prompt(snapshot);
        let chunk = suffix_from(&answer, self.last_length).to_string();
        self.last_length = answer.chars().count();
        chunk
    }

    /// Length of the previous de-prompted snapshot, in characters.
    pub fn last_length(&self) -> usize {
        self.last_length
    }

    fn strip_prompt<'a>(&self, snapshot: &'a str) -> Cow<'a, str> {
        if self.prompt.is_empty() {
            Cow::Borrowed(snapshot)
        } else {
            Cow::Owned(snapshot.replace(&self.prompt, ""))
        }
    }
}

/// Tail of `text` starting at character `offset`, or `""` past the end.
fn suffix_from(text: &str, offset: usize) -> &str {
    match text.char_indices().nth(offset) {
        Some((start, _)) => &text[start..],
        None => "",
    }
}

/// Wrap a snapshot stream so it yields UTF-8 encoded deltas.
pub fn diff_stream(
    snapshots: SnapshotStream,
    prompt: impl Into<String>,
) -> impl Stream<Item = Result<Bytes, EngineError>> + Send {
    let mut streamer = DiffStreamer::new(prompt);
    snapshots.map(move |snapshot| snapshot.map(|s| Bytes::from(streamer.next_chunk(&s))))
}
