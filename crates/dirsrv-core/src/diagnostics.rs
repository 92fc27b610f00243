//! Administrative diagnostics.
//!
//! Problems that do not fail the current operation (a malformed subentry
//! skipped at startup, a repair that could not be applied, a filter that
//! collapsed to nothing) are recorded here. A bounded ring buffer keeps the
//! most recent events for inspection and a broadcast channel forwards them
//! to live subscribers.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{DirError, Result};

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DiagnosticEvent {
    /// A stored subentry was not registered at startup.
    SubentrySkipped {
        /// The subentry.
        dn: String,
        /// Why it was skipped.
        reason: String,
    },
    /// A secondary modification failed after the primary operation.
    RepairFailed {
        /// The entry that could not be updated.
        dn: String,
        /// The failure.
        reason: String,
    },
    /// A search filter normalized to nothing and returned no entries.
    FilterCollapsed {
        /// The filter as supplied.
        filter: String,
    },
}

/// A recorded event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Position in the stream, starting at 1.
    pub seq: u64,
    /// When it was recorded.
    pub at: DateTime<Utc>,
    /// The event.
    pub kind: DiagnosticEvent,
}

struct Ring {
    events: VecDeque<Diagnostic>,
    next_seq: u64,
}

/// Ring buffer plus broadcast fan-out.
pub struct Diagnostics {
    ring: Mutex<Ring>,
    capacity: usize,
    sender: broadcast::Sender<Diagnostic>,
}

impl Diagnostics {
    /// Keep at most `capacity` events (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            ring: Mutex::new(Ring {
                events: VecDeque::with_capacity(capacity),
                next_seq: 1,
            }),
            capacity,
            sender,
        }
    }

    /// Record an event, evicting the oldest when full.
    pub fn record(&self, kind: DiagnosticEvent) -> Result<Diagnostic> {
        let mut ring = self
            .ring
            .lock()
            .map_err(|e| DirError::LockPoisoned(format!("diagnostics: {}", e)))?;
        let event = Diagnostic {
            seq: ring.next_seq,
            at: Utc::now(),
            kind,
        };
        ring.next_seq += 1;
        if ring.events.len() == self.capacity {
            ring.events.pop_front();
        }
        ring.events.push_back(event.clone());
        // No subscribers is fine.
        let _ = self.sender.send(event.clone());
        Ok(event)
    }

    /// Buffered events, oldest first.
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        match self.ring.lock() {
            Ok(ring) => ring.events.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().events.iter().cloned().collect(),
        }
    }

    /// Take and clear the buffered events.
    pub fn drain(&self) -> Vec<Diagnostic> {
        match self.ring.lock() {
            Ok(mut ring) => ring.events.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().events.drain(..).collect(),
        }
    }

    /// Live stream of future events.
    pub fn subscribe(&self) -> broadcast::Receiver<Diagnostic> {
        self.sender.subscribe()
    }

    /// Configured ring size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collapsed(i: usize) -> DiagnosticEvent {
        DiagnosticEvent::FilterCollapsed {
            filter: format!("(f{}=x)", i),
        }
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let diag = Diagnostics::new(2);
        for i in 0..3 {
            diag.record(collapsed(i)).unwrap();
        }
        let events = diag.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].seq, 2);
        assert_eq!(events[1].kind, collapsed(2));
    }

    #[test]
    fn test_drain_empties_buffer() {
        let diag = Diagnostics::default();
        diag.record(collapsed(0)).unwrap();
        assert_eq!(diag.drain().len(), 1);
        assert!(diag.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let diag = Diagnostics::new(8);
        let mut rx = diag.subscribe();
        diag.record(DiagnosticEvent::SubentrySkipped {
            dn: "cn=bad,ou=system".into(),
            reason: "no administrative point".into(),
        })
        .unwrap();
        let event = rx.recv().await.unwrap();
        assert!(matches!(event.kind, DiagnosticEvent::SubentrySkipped { .. }));
    }

    #[test]
    fn test_serializes_to_json() {
        let diag = Diagnostics::new(1);
        let event = diag.record(collapsed(1)).unwrap();
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("FilterCollapsed"));
    }
}
