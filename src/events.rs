// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Typed index-update events and the sink that observes them.
//!
//! The reference implementation threads a process-wide emitter through
//! every layer; here the emitter is an explicit `EventSink` passed to the
//! components that raise events, so a caller embedding SynapsD chooses
//! whether (and how) to observe index churn.

use crate::id::DocumentId;

/// Events raised by the bitmap index, the context tree, and the document
/// engine. Consumed, never produced, by SynapsD itself beyond the raise
/// site — routing them anywhere (logs, a changefeed, a UI) is the
/// embedder's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// One or more bitmaps were ticked, unticked, or otherwise mutated.
    BitmapUpdated { keys: Vec<String> },
    /// A bitmap was deleted (it transitioned to empty, or was removed
    /// explicitly).
    BitmapDeleted { key: String },
    /// A path was inserted into the context tree.
    TreePathInserted { path: String },
    /// A path (or subtree) was moved.
    TreePathMoved {
        from: String,
        to: String,
        recursive: bool,
    },
    /// A path (or subtree) was copied.
    TreePathCopied {
        from: String,
        to: String,
        recursive: bool,
    },
    /// A path was removed.
    TreePathRemoved { path: String, recursive: bool },
    /// A layer was created.
    TreeLayerCreated { name: String },
    /// A layer's attributes were updated.
    TreeLayerUpdated { name: String },
    /// A layer was renamed.
    TreeLayerRenamed { from: String, to: String },
    /// A layer was removed from the registry.
    TreeLayerDeleted { name: String },
    /// A document was inserted (first sight of its primary checksum).
    DocumentInserted { id: DocumentId },
    /// A document was updated (primary checksum already known).
    DocumentUpdated { id: DocumentId },
    /// A document record was deleted outright.
    DocumentDeleted { id: DocumentId },
    /// A batch operation completed; emitted once per batch call instead of
    /// once per document.
    BatchCompleted {
        operation: &'static str,
        count: usize,
        errors: usize,
    },
}

/// Observer for engine events. Implementations must not block the calling
/// thread for long: events are raised synchronously from the write path.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// An `EventSink` that discards every event. The default sink so
/// constructing an engine never requires wiring one up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// An `EventSink` that appends every event it sees, useful in tests that
/// want to assert on emitted events.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("recording sink mutex poisoned").clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: Event) {
        self.events
            .lock()
            .expect("recording sink mutex poisoned")
            .push(event);
    }
}

#[cfg(test)]
mod events_test {
    use super::*;

    #[test]
    fn null_sink_drops_everything() {
        let sink = NullSink;
        sink.emit(Event::BitmapDeleted {
            key: "tag/x".to_string(),
        });
    }

    #[test]
    fn recording_sink_accumulates() {
        let sink = RecordingSink::new();
        sink.emit(Event::DocumentInserted { id: 100_001 });
        sink.emit(Event::DocumentInserted { id: 100_002 });
        assert_eq!(sink.events().len(), 2);
    }
}
