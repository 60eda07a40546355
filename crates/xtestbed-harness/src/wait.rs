//! Event wait & assertion engine.
//!
//! Everything here reduces to one primitive: sample the session's private
//! queue until a predicate matches or a deadline passes.  The engine never
//! blocks without a deadline, and it always forces a synchronization
//! round-trip before sampling.  That round-trip is what turns "the server
//! probably sent it by now" into "everything generated so far is locally
//! queued", and it is the only ordering guarantee the harness relies on.
//! Waiting on session A and then on session B is race-free because each
//! wait synchronizes its own connection first.
//!
//! Non-matching events are interleaved by the server (hierarchy notices,
//! property updates) and are *discarded*, not buffered: a later wait must
//! not observe an event an earlier wait skipped.  Callers that care about
//! cross-kind ordering use [`ProtocolSession::wait_for_ordered`].
//!
//! A timed-out or violated wait records the failure on the instance's
//! witness, which is what keeps the server log on disk for post-mortem.

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::trace;

use xtestbed_core::protocol::{EventPredicate, ServerEvent};

use crate::session::{ProtocolSession, SessionError};

/// Error type for wait-engine assertions.
#[derive(Debug, Error)]
pub enum WaitError {
    /// No matching event arrived before the deadline.
    #[error("timed out after {timeout:?} waiting for {predicate:?} ({skipped} events skipped)")]
    Timeout {
        timeout: Duration,
        predicate: EventPredicate,
        skipped: usize,
    },

    /// An event arrived during a window that had to stay silent.
    #[error("expected no event, observed {0:?}")]
    UnexpectedEvent(Box<ServerEvent>),

    /// An event of a later expectation arrived before an earlier one.
    #[error("ordering violation: expectation #{expected_index} still open, observed {observed:?}")]
    OrderingViolation {
        expected_index: usize,
        observed: Box<ServerEvent>,
    },

    /// The session failed underneath the wait.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Progress of a single wait call.
#[derive(Debug)]
enum WaitState {
    /// Sampling the queue.
    Polling,
    /// Terminal: a matching event was found.
    Matched(Box<ServerEvent>),
    /// Terminal: the deadline passed.
    TimedOut,
}

impl ProtocolSession {
    /// Blocks until the next event matching `predicate` arrives, skipping
    /// and discarding non-matching events.
    ///
    /// # Errors
    ///
    /// [`WaitError::Timeout`] when nothing matched before the deadline; the
    /// failure is recorded on the instance witness.
    pub fn wait_for(
        &mut self,
        predicate: EventPredicate,
        timeout: Duration,
    ) -> Result<ServerEvent, WaitError> {
        let deadline = Instant::now() + timeout;
        let mut skipped = 0usize;
        let mut state = WaitState::Polling;

        self.sync()?;
        loop {
            match state {
                WaitState::Polling => {
                    while let Some(event) =
                        self.transport_mut().poll_event().map_err(SessionError::from)?
                    {
                        if predicate.matches(&event) {
                            state = WaitState::Matched(Box::new(event));
                            break;
                        }
                        trace!(session = %self.label(), ?event, "skipping non-matching event");
                        skipped += 1;
                    }
                    if matches!(state, WaitState::Polling) {
                        if Instant::now() >= deadline {
                            state = WaitState::TimedOut;
                        } else {
                            std::thread::sleep(self.poll_interval());
                            self.sync()?;
                        }
                    }
                }
                WaitState::Matched(event) => return Ok(*event),
                WaitState::TimedOut => {
                    self.witness().mark_failed();
                    return Err(WaitError::Timeout {
                        timeout,
                        predicate,
                        skipped,
                    });
                }
            }
        }
    }

    /// Proves an action produced no observable event at all: waits the
    /// *entire* timeout and fails the moment anything arrives.
    ///
    /// Succeeding consumes nothing, so calling this twice in a row with no
    /// intervening action succeeds twice.
    ///
    /// # Errors
    ///
    /// [`WaitError::UnexpectedEvent`] on any arrival; recorded as a failure.
    pub fn assert_no_event(&mut self, timeout: Duration) -> Result<(), WaitError> {
        self.assert_no_event_matching(EventPredicate::any(), timeout)
    }

    /// Like [`ProtocolSession::assert_no_event`], but only a predicate match
    /// is a failure; unrelated events are discarded.
    pub fn assert_no_event_matching(
        &mut self,
        predicate: EventPredicate,
        timeout: Duration,
    ) -> Result<(), WaitError> {
        let deadline = Instant::now() + timeout;
        self.sync()?;
        loop {
            while let Some(event) =
                self.transport_mut().poll_event().map_err(SessionError::from)?
            {
                if predicate.matches(&event) {
                    self.witness().mark_failed();
                    return Err(WaitError::UnexpectedEvent(Box::new(event)));
                }
                trace!(session = %self.label(), ?event, "discarding unrelated event");
            }
            if Instant::now() >= deadline {
                return Ok(());
            }
            std::thread::sleep(self.poll_interval());
            self.sync()?;
        }
    }

    /// Synchronously empties the queue without blocking beyond one
    /// round-trip, for exact-count assertions.
    pub fn drain_pending(&mut self) -> Result<Vec<ServerEvent>, WaitError> {
        self.sync()?;
        let mut events = Vec::new();
        while let Some(event) = self.transport_mut().poll_event().map_err(SessionError::from)? {
            events.push(event);
        }
        Ok(events)
    }

    /// Waits until every predicate has matched, in order.  An event matching
    /// a *later* predicate while an earlier one is still open is an
    /// ordering violation; events matching no predicate are skipped.
    ///
    /// # Errors
    ///
    /// [`WaitError::OrderingViolation`] on inversion,
    /// [`WaitError::Timeout`] if the sequence does not complete in time.
    pub fn wait_for_ordered(
        &mut self,
        predicates: &[EventPredicate],
        timeout: Duration,
    ) -> Result<Vec<ServerEvent>, WaitError> {
        let deadline = Instant::now() + timeout;
        let mut matched = Vec::with_capacity(predicates.len());
        let mut index = 0usize;
        let mut skipped = 0usize;

        self.sync()?;
        while index < predicates.len() {
            while let Some(event) =
                self.transport_mut().poll_event().map_err(SessionError::from)?
            {
                if predicates[index].matches(&event) {
                    matched.push(event);
                    index += 1;
                    if index == predicates.len() {
                        break;
                    }
                } else if predicates[index + 1..].iter().any(|p| p.matches(&event)) {
                    self.witness().mark_failed();
                    return Err(WaitError::OrderingViolation {
                        expected_index: index,
                        observed: Box::new(event),
                    });
                } else {
                    trace!(session = %self.label(), ?event, "skipping non-matching event");
                    skipped += 1;
                }
            }
            if index == predicates.len() {
                break;
            }
            if Instant::now() >= deadline {
                self.witness().mark_failed();
                return Err(WaitError::Timeout {
                    timeout,
                    predicate: predicates[index],
                    skipped,
                });
            }
            std::thread::sleep(self.poll_interval());
            self.sync()?;
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::FailureWitness;
    use crate::testing::scripted::ScriptedTransport;
    use xtestbed_core::protocol::EventKind;

    fn session_with(events: Vec<ServerEvent>) -> (ProtocolSession, FailureWitness) {
        let witness = FailureWitness::new();
        let mut session = ProtocolSession::new(
            Box::new(ScriptedTransport::with_events(events)),
            "scripted".to_string(),
            witness.clone(),
        );
        session.set_poll_interval(Duration::from_millis(1));
        (session, witness)
    }

    fn event(kind: EventKind, detail: u32) -> ServerEvent {
        ServerEvent {
            kind,
            extension_opcode: None,
            device: 2,
            source: 2,
            detail,
            root_x: 0.0,
            root_y: 0.0,
            screen: 0,
            buttons: 0,
            emulated: false,
        }
    }

    #[test]
    fn test_wait_for_skips_interleaved_events() {
        // Arrange – the motion of interest is buried behind noise
        let (mut session, witness) = session_with(vec![
            event(EventKind::HierarchyChanged, 0),
            event(EventKind::PropertyChanged, 0),
            event(EventKind::CoreMotion, 0),
        ]);

        // Act
        let matched = session
            .wait_for(
                EventPredicate::kind(EventKind::CoreMotion),
                Duration::from_millis(100),
            )
            .unwrap();

        // Assert – skipped events were discarded, not buffered
        assert_eq!(matched.kind, EventKind::CoreMotion);
        assert!(session.drain_pending().unwrap().is_empty());
        assert!(!witness.has_failed());
    }

    #[test]
    fn test_wait_for_timeout_marks_failure_and_counts_skips() {
        // Arrange – only unrelated events available
        let (mut session, witness) = session_with(vec![
            event(EventKind::HierarchyChanged, 0),
            event(EventKind::HierarchyChanged, 0),
        ]);

        // Act
        let err = session
            .wait_for(
                EventPredicate::kind(EventKind::CoreMotion),
                Duration::from_millis(20),
            )
            .unwrap_err();

        // Assert
        match err {
            WaitError::Timeout { skipped, .. } => assert_eq!(skipped, 2),
            other => panic!("unexpected: {other}"),
        }
        assert!(witness.has_failed());
    }

    #[test]
    fn test_assert_no_event_fails_on_any_arrival() {
        let (mut session, witness) = session_with(vec![event(EventKind::CoreMotion, 0)]);
        let err = session
            .assert_no_event(Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, WaitError::UnexpectedEvent(_)));
        assert!(witness.has_failed());
    }

    #[test]
    fn test_assert_no_event_is_idempotent() {
        // Arrange – nothing queued at all
        let (mut session, witness) = session_with(Vec::new());

        // Act / Assert – both calls pass; the first leaves no state behind
        session.assert_no_event(Duration::from_millis(10)).unwrap();
        session.assert_no_event(Duration::from_millis(10)).unwrap();
        assert!(!witness.has_failed());
    }

    #[test]
    fn test_assert_no_event_matching_discards_unrelated() {
        let (mut session, _) = session_with(vec![event(EventKind::HierarchyChanged, 0)]);
        session
            .assert_no_event_matching(
                EventPredicate::kind(EventKind::CoreMotion),
                Duration::from_millis(10),
            )
            .unwrap();
    }

    #[test]
    fn test_drain_pending_returns_exact_queue() {
        let (mut session, _) = session_with(vec![
            event(EventKind::CoreButtonPress, 4),
            event(EventKind::CoreButtonRelease, 4),
            event(EventKind::CoreButtonPress, 4),
            event(EventKind::CoreButtonRelease, 4),
        ]);
        let drained = session.drain_pending().unwrap();
        assert_eq!(drained.len(), 4);
        assert!(session.drain_pending().unwrap().is_empty());
    }

    #[test]
    fn test_ordered_wait_accepts_in_order_sequences() {
        let (mut session, _) = session_with(vec![
            event(EventKind::CoreButtonPress, 1),
            event(EventKind::CoreMotion, 0),
            event(EventKind::CoreButtonRelease, 1),
        ]);
        let matched = session
            .wait_for_ordered(
                &[
                    EventPredicate::kind(EventKind::CoreButtonPress),
                    EventPredicate::kind(EventKind::CoreButtonRelease),
                ],
                Duration::from_millis(100),
            )
            .unwrap();
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn test_ordered_wait_flags_inversion() {
        // Arrange – release arrives while press is still expected
        let (mut session, witness) = session_with(vec![
            event(EventKind::CoreButtonRelease, 1),
            event(EventKind::CoreButtonPress, 1),
        ]);

        // Act
        let err = session
            .wait_for_ordered(
                &[
                    EventPredicate::kind(EventKind::CoreButtonPress),
                    EventPredicate::kind(EventKind::CoreButtonRelease),
                ],
                Duration::from_millis(100),
            )
            .unwrap_err();

        // Assert
        match err {
            WaitError::OrderingViolation { expected_index, .. } => assert_eq!(expected_index, 0),
            other => panic!("unexpected: {other}"),
        }
        assert!(witness.has_failed());
    }

    #[test]
    fn test_wait_observes_events_flushed_only_on_sync() {
        // Arrange – events that only become visible after a round-trip
        let (mut session, _) = session_with(Vec::new());
        // ScriptedTransport::with_events delivers on first sync; use the
        // unflushed constructor to stage events behind one extra sync.
        let mut session2 = {
            let witness = FailureWitness::new();
            let transport =
                ScriptedTransport::with_unflushed_events(vec![event(EventKind::CoreMotion, 0)]);
            let mut s = ProtocolSession::new(Box::new(transport), "staged".into(), witness);
            s.set_poll_interval(Duration::from_millis(1));
            s
        };

        // Act / Assert
        session.assert_no_event(Duration::from_millis(5)).unwrap();
        let matched = session2
            .wait_for(EventPredicate::any(), Duration::from_millis(100))
            .unwrap();
        assert_eq!(matched.kind, EventKind::CoreMotion);
    }
}
