//! Single-cell harness for unit-testing one behavior
//!
//! A testbed is a mesh of size one with a mocked environment: the
//! behavior under test runs against a stub mesh whose every operation
//! fails cleanly, and everything it emits is captured into an ordered
//! sink instead of being broadcast. A runner feeds input events; a
//! tester evaluates the sink once the runner is done.

use crate::behavior::Behavior;
use crate::cell::{Cell, Emitter};
use crate::error::{MeshError, Result};
use crate::event::{
    CellFailed, CellTerminated, Event, TOPIC_TESTBED_ERROR, TOPIC_TESTBED_TERMINATED,
};
use crate::sink::EventSink;
use crate::stream::{Receptor, Stream};
use futures::future::BoxFuture;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Verdict of a testbed run
#[derive(Debug, Error)]
pub enum TestbedError {
    /// An assertion did not hold
    #[error("test failed: {0}")]
    Failed(String),

    /// The runner or tester hit an error
    #[error("test error: {0}")]
    Error(#[source] MeshError),

    /// The whole run exceeded its deadline
    #[error("test failed: timeout after {0:?}")]
    Timeout(Duration),
}

/// The testbed's single cell: input pipe plus capture sink
pub(crate) struct TestbedCore {
    pub(crate) cancel: CancellationToken,
    input: Stream,
    sink: Mutex<EventSink>,
}

impl TestbedCore {
    pub(crate) const CELL_NAME: &'static str = "testbed";

    /// Capture one emitted event into the sink, appending the
    /// testbed hop
    pub(crate) fn capture(&self, mut event: Event) {
        event.append_emitter(Self::CELL_NAME);
        self.locked_sink().push(event);
    }

    fn locked_sink(&self) -> MutexGuard<'_, EventSink> {
        // A tester panicking mid-assertion must not wedge the sink.
        self.sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Emitter handed to the testbed runner for producing input events
#[derive(Clone)]
pub struct TestbedEmitter {
    core: Arc<TestbedCore>,
}

impl TestbedEmitter {
    /// Construct an event and send it to the behavior under test
    pub async fn emit(&self, topic: &str) -> Result<()> {
        self.emit_event(Event::new(topic)?).await
    }

    /// Construct an event with a payload and send it to the behavior
    /// under test
    pub async fn emit_with(&self, topic: &str, payload: impl Serialize) -> Result<()> {
        self.emit_event(Event::with_payload(topic, payload)?).await
    }

    /// Send an event to the behavior under test
    ///
    /// The hop path is initialized to the root marker, as if the
    /// event entered a mesh from outside. If the testbed winds down
    /// while waiting to hand off, the event is dropped silently.
    pub async fn emit_event(&self, mut event: Event) -> Result<()> {
        event.init_emitters();
        tokio::select! {
            _ = self.core.cancel.cancelled() => Ok(()),
            delivered = self.core.input.emit_event(event) => delivered,
        }
    }
}

/// The tester's window onto the captured events
///
/// Read access to the sink plus assertion helpers. Success is the
/// tester returning `Ok(())`; [`Evaluator::fail`] and
/// [`Evaluator::error`] build the explicit failure verdicts.
#[derive(Clone)]
pub struct Evaluator {
    core: Arc<TestbedCore>,
}

impl Evaluator {
    /// Number of captured events
    pub fn len(&self) -> usize {
        self.core.locked_sink().len()
    }

    /// Whether nothing was captured yet
    pub fn is_empty(&self) -> bool {
        self.core.locked_sink().is_empty()
    }

    /// The first captured event
    pub fn first(&self) -> Option<Event> {
        self.core.locked_sink().first().cloned()
    }

    /// The last captured event
    pub fn last(&self) -> Option<Event> {
        self.core.locked_sink().last().cloned()
    }

    /// The captured event at `index`
    pub fn peek(&self, index: usize) -> Option<Event> {
        self.core.locked_sink().get(index).cloned()
    }

    /// Snapshot of all captured events, in capture order
    pub fn events(&self) -> Vec<Event> {
        self.core.locked_sink().iter().cloned().collect()
    }

    /// Fail the test unless the condition holds
    pub fn assert(
        &self,
        condition: bool,
        reason: impl Into<String>,
    ) -> std::result::Result<(), TestbedError> {
        if condition {
            Ok(())
        } else {
            Err(TestbedError::Failed(reason.into()))
        }
    }

    /// Fail the test unless the predicate holds within a few retries
    ///
    /// The behavior under test runs concurrently with the tester, so
    /// the last captured events may trail the runner slightly. Five
    /// attempts with exponential backoff starting at 2 ms.
    pub async fn assert_retry(
        &self,
        mut predicate: impl FnMut(&EventSink) -> bool,
        reason: impl Into<String>,
    ) -> std::result::Result<(), TestbedError> {
        const ATTEMPTS: usize = 5;
        let mut delay = Duration::from_millis(2);
        for attempt in 0..ATTEMPTS {
            if predicate(&self.core.locked_sink()) {
                return Ok(());
            }
            if attempt + 1 < ATTEMPTS {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
        Err(TestbedError::Failed(reason.into()))
    }

    /// Explicit failure verdict with a reason
    pub fn fail(&self, reason: impl Into<String>) -> TestbedError {
        TestbedError::Failed(reason.into())
    }

    /// Explicit error verdict wrapping a mesh error
    pub fn error(&self, err: MeshError) -> TestbedError {
        TestbedError::Error(err)
    }
}

type BoxTester =
    Box<dyn FnOnce(Evaluator) -> BoxFuture<'static, std::result::Result<(), TestbedError>> + Send>;

/// Harness running exactly one behavior under controlled conditions
///
/// The behavior's `Cell::mesh()` is a stub that refuses every
/// operation, so behaviors depending on the surrounding mesh are
/// flagged rather than silently appearing to work.
pub struct Testbed {
    cancel: CancellationToken,
    core: Arc<TestbedCore>,
    tester: BoxTester,
}

impl Testbed {
    /// Start the testbed cell with the behavior under test; the
    /// tester runs after the runner completes
    pub fn new<B, T, Fut>(behavior: B, tester: T) -> Self
    where
        B: Behavior,
        T: FnOnce(Evaluator) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), TestbedError>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let (input, receptor) = Stream::new();
        let core = Arc::new(TestbedCore {
            cancel: cancel.child_token(),
            input,
            sink: Mutex::new(EventSink::new()),
        });
        tokio::spawn(run_testbed_cell(core.clone(), Box::new(behavior), receptor));
        Testbed {
            cancel,
            core,
            tester: Box::new(move |evaluator| Box::pin(tester(evaluator))),
        }
    }

    /// Run the runner as an asynchronous producer of input events,
    /// then the tester against the captured sink
    ///
    /// Returns `Ok` on success, the assertion failure or error
    /// otherwise, or a timeout verdict if the whole run exceeds the
    /// deadline. The testbed context is cancelled on the way out.
    pub async fn go<R, Fut>(
        self,
        runner: R,
        timeout: Duration,
    ) -> std::result::Result<(), TestbedError>
    where
        R: FnOnce(TestbedEmitter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let emitter = TestbedEmitter {
            core: self.core.clone(),
        };
        let evaluator = Evaluator {
            core: self.core.clone(),
        };
        let tester = self.tester;
        let run = async move {
            runner(emitter).await.map_err(TestbedError::Error)?;
            tester(evaluator).await
        };
        let outcome = tokio::time::timeout(timeout, run).await;
        self.cancel.cancel();
        match outcome {
            Ok(verdict) => verdict,
            Err(_) => Err(TestbedError::Timeout(timeout)),
        }
    }
}

/// Backend task hosting the behavior under test
///
/// Mirrors a mesh cell's shutdown notification, but captures the
/// notice into the sink under the testbed topics.
async fn run_testbed_cell(core: Arc<TestbedCore>, behavior: Box<dyn Behavior>, receptor: Receptor) {
    let cell = Cell::testbed(core.clone());
    let emitter = Emitter::testbed(core.clone());

    let notice = match behavior.go(cell, receptor, emitter).await {
        Ok(()) => Event::with_payload(
            TOPIC_TESTBED_TERMINATED,
            CellTerminated {
                cell_name: TestbedCore::CELL_NAME.to_string(),
            },
        ),
        Err(err) => {
            tracing::warn!(error = %err, "tested behavior failed");
            Event::with_payload(
                TOPIC_TESTBED_ERROR,
                CellFailed {
                    cell_name: TestbedCore::CELL_NAME.to_string(),
                    error: err.to_string(),
                },
            )
        }
    };
    if let Ok(notice) = notice {
        core.capture(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::RequestBehavior;

    fn forwarder() -> impl Behavior {
        RequestBehavior::new(|_cell: Cell, event: Event, out: Emitter| async move {
            out.emit_event(event).await
        })
    }

    #[tokio::test]
    async fn test_evaluator_assert() {
        let testbed = Testbed::new(forwarder(), |evaluator: Evaluator| async move {
            evaluator.assert(true, "holds")?;
            let err = evaluator.assert(false, "does not hold").unwrap_err();
            assert!(matches!(&err, TestbedError::Failed(reason) if reason == "does not hold"));
            Err(err)
        });

        let verdict = testbed
            .go(|_out: TestbedEmitter| async move { Ok(()) }, Duration::from_secs(1))
            .await;
        assert!(matches!(verdict, Err(TestbedError::Failed(_))));
    }

    #[tokio::test]
    async fn test_evaluator_verdict_constructors() {
        let testbed = Testbed::new(forwarder(), |evaluator: Evaluator| async move {
            let failed = evaluator.fail("reason");
            assert_eq!(failed.to_string(), "test failed: reason");
            let error = evaluator.error(MeshError::behavior("cause"));
            assert_eq!(error.to_string(), "test error: cause");
            Ok(())
        });

        testbed
            .go(|_out: TestbedEmitter| async move { Ok(()) }, Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_runner_error_becomes_verdict() {
        let testbed = Testbed::new(forwarder(), |_evaluator: Evaluator| async move { Ok(()) });

        let verdict = testbed
            .go(
                |out: TestbedEmitter| async move {
                    // Empty topic never leaves the runner.
                    out.emit("").await
                },
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(
            verdict,
            Err(TestbedError::Error(MeshError::EmptyTopic))
        ));
    }

    #[tokio::test]
    async fn test_timeout_verdict() {
        let testbed = Testbed::new(forwarder(), |_evaluator: Evaluator| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        });

        let verdict = testbed
            .go(
                |_out: TestbedEmitter| async move { Ok(()) },
                Duration::from_millis(50),
            )
            .await;
        assert!(matches!(verdict, Err(TestbedError::Timeout(_))));
    }
}
