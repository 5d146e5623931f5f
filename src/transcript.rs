//! Append-only conversation transcript.
//!
//! The session appends entries as the run progresses; the presentation layer
//! reads them back with [`Transcript::all`] or incrementally with
//! [`Transcript::since`]. Entries are never mutated, reordered or removed.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Who or what produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Typed text or recognized speech from the user.
    Input,
    /// Assistant response speech.
    Output,
    /// Fatal run error.
    Error,
    /// Non-fatal notice (e.g. microphone unavailable).
    Info,
}

/// One transcript line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    /// Creation order, starting at 0.
    pub seq: u64,
    pub kind: EntryKind,
    pub content: String,
}

#[derive(Default)]
struct Inner {
    entries: RwLock<Vec<ChatEntry>>,
    listener: Option<crossbeam_channel::Sender<ChatEntry>>,
}

/// Shared handle to the transcript. Clones see the same entries.
#[derive(Clone, Default)]
pub struct Transcript {
    inner: Arc<Inner>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward every appended entry to `tx` as well (non-blocking).
    pub fn with_listener(tx: crossbeam_channel::Sender<ChatEntry>) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(Vec::new()),
                listener: Some(tx),
            }),
        }
    }

    /// Append a new entry and return it.
    pub fn append(&self, kind: EntryKind, content: impl Into<String>) -> ChatEntry {
        let entry = {
            let mut entries = self
                .inner
                .entries
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let entry = ChatEntry {
                seq: entries.len() as u64,
                kind,
                content: content.into(),
            };
            entries.push(entry.clone());
            entry
        };

        if let Some(ref tx) = self.inner.listener
            && tx.try_send(entry.clone()).is_err()
        {
            tracing::debug!(seq = entry.seq, "transcript listener gone or full");
        }

        entry
    }

    /// All entries in creation order.
    pub fn all(&self) -> Vec<ChatEntry> {
        self.read().clone()
    }

    /// Entries appended after the first `n`.
    pub fn since(&self, n: usize) -> Vec<ChatEntry> {
        self.read().iter().skip(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Last entry, if any.
    pub fn last(&self) -> Option<ChatEntry> {
        self.read().last().cloned()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<ChatEntry>> {
        self.inner
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for Transcript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcript")
            .field("len", &self.len())
            .finish()
    }
}
