//! Offset tracker: the consumed byte position of each monitored stream.
//!
//! A cursor only ever moves forward through `commit`. The single exception
//! is truncation/rotation: when the stream is observed to be shorter than
//! the committed offset, the cursor restarts at 0 in a new generation.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a monitored stream (file path, connection id, or a
/// configured name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StreamId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Read position of one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCursor {
    pub stream_id: StreamId,
    /// Bytes consumed so far. Never decreases except on truncation.
    pub last_offset: u64,
    /// Incremented each time the stream is observed to have shrunk.
    pub generation: u64,
}

impl StreamCursor {
    pub fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            last_offset: 0,
            generation: 0,
        }
    }
}

/// Half-open byte range `[start, end)` to read next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadWindow {
    pub start: u64,
    pub end: u64,
}

impl ReadWindow {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of comparing the stream's current size with its cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// New bytes are available.
    Read(ReadWindow),
    /// Nothing new since the last commit.
    UpToDate,
    /// The stream shrank below the cursor. The cursor was reset to 0 and
    /// the caller must call `advance` again with the post-truncation size.
    Truncated {
        previous_offset: u64,
        generation: u64,
    },
}

/// Tracks cursors for the streams owned by one monitoring loop.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    cursors: HashMap<StreamId, StreamCursor>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a cursor (e.g. one loaded from a checkpoint), replacing any
    /// existing cursor for the same stream.
    pub fn restore(&mut self, cursor: StreamCursor) {
        self.cursors.insert(cursor.stream_id.clone(), cursor);
    }

    /// Returns the cursor for `stream_id`, if the stream has been seen.
    pub fn cursor(&self, stream_id: &StreamId) -> Option<&StreamCursor> {
        self.cursors.get(stream_id)
    }

    fn cursor_mut(&mut self, stream_id: &StreamId) -> &mut StreamCursor {
        self.cursors
            .entry(stream_id.clone())
            .or_insert_with(|| StreamCursor::new(stream_id.clone()))
    }

    /// Compute the next read window for a stream whose current size is
    /// `current_size`.
    pub fn advance(&mut self, stream_id: &StreamId, current_size: u64) -> Advance {
        let cursor = self.cursor_mut(stream_id);
        if current_size < cursor.last_offset {
            let previous_offset = cursor.last_offset;
            cursor.last_offset = 0;
            cursor.generation += 1;
            return Advance::Truncated {
                previous_offset,
                generation: cursor.generation,
            };
        }
        if current_size == cursor.last_offset {
            return Advance::UpToDate;
        }
        Advance::Read(ReadWindow {
            start: cursor.last_offset,
            end: current_size,
        })
    }

    /// Record that every byte before `end` has been fully processed.
    ///
    /// Returns `false` (and changes nothing) when `end` does not move the
    /// cursor forward, which makes repeated commits of the same window
    /// harmless.
    pub fn commit(&mut self, stream_id: &StreamId, end: u64) -> bool {
        let cursor = self.cursor_mut(stream_id);
        if end <= cursor.last_offset {
            return false;
        }
        cursor.last_offset = end;
        true
    }
}
