//! Testbed integration tests
//!
//! Exercises single behaviors in isolation: capture of emitted
//! events, the stubbed mesh, termination notices, and sink-driven
//! evaluation.

use cellmesh::{
    Behavior, BehaviorFn, Cell, CellFailed, CellTerminated, Emitter, Evaluator, Event, EventSink,
    MeshError, Receptor, RequestBehavior, Testbed, TestbedEmitter, TOPIC_TESTBED_ERROR,
    TOPIC_TESTBED_TERMINATED,
};
use tokio::time::Duration;

/// Behavior re-emitting every pulled event unchanged
fn forwarder() -> impl Behavior {
    RequestBehavior::new(|_cell: Cell, event: Event, out: Emitter| async move {
        out.emit_event(event).await
    })
}

fn topics(sink: &EventSink) -> Vec<String> {
    sink.iter().map(|event| event.topic().to_string()).collect()
}

#[tokio::test]
async fn test_single_cell_forward() {
    let testbed = Testbed::new(forwarder(), |evaluator: Evaluator| async move {
        evaluator
            .assert_retry(|sink| sink.len() == 3, "expected three forwarded events")
            .await?;

        let captured: Vec<String> = evaluator
            .events()
            .iter()
            .map(|event| event.topic().to_string())
            .collect();
        evaluator.assert(
            captured == ["one", "two", "three"],
            format!("unexpected capture order: {captured:?}"),
        )?;

        // External events forwarded once carry the testbed hop.
        evaluator.assert(
            evaluator.first().unwrap().emitters() == "/testbed",
            "missing root marker or testbed hop",
        )
    });

    testbed
        .go(
            |out: TestbedEmitter| async move {
                out.emit("one").await?;
                out.emit("two").await?;
                out.emit("three").await
            },
            Duration::from_secs(5),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_upcaser_behavior() {
    let upcaser = RequestBehavior::new(|_cell: Cell, event: Event, out: Emitter| async move {
        out.emit(&event.topic().to_uppercase()).await
    });

    let testbed = Testbed::new(upcaser, |evaluator: Evaluator| async move {
        evaluator
            .assert_retry(
                |sink| topics(sink) == ["ONE", "TWO", "THREE"],
                "expected upper-cased topics in order",
            )
            .await
    });

    testbed
        .go(
            |out: TestbedEmitter| async move {
                for topic in ["one", "two", "three"] {
                    out.emit(topic).await?;
                }
                Ok(())
            },
            Duration::from_secs(5),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_mesh_is_stubbed() {
    // Exercises every mesh operation from inside a tested behavior;
    // each must fail deterministically, naming the argument, and the
    // behavior must remain runnable afterwards.
    let probing = BehaviorFn(
        |cell: Cell, mut receptor: Receptor, emitter: Emitter| async move {
            let mesh = cell.mesh();

            let check = |result: Result<(), MeshError>, want: &str| match result {
                Err(err) if err.to_string() == want => Ok(()),
                Err(err) => Err(MeshError::behavior(format!("unexpected error: {err}"))),
                Ok(()) => Err(MeshError::behavior(format!("expected '{want}', got Ok"))),
            };

            check(
                mesh.go("other", forwarder()).await,
                "cell name 'other' already used",
            )?;
            check(
                mesh.subscribe("other", "testbed").await,
                "emitter cell 'other' does not exist",
            )?;
            check(
                mesh.unsubscribe("other", "testbed").await,
                "emitter cell 'other' does not exist",
            )?;
            check(
                mesh.emit_event("other", Event::new("probe")?).await,
                "cell 'other' does not exist",
            )?;
            if mesh.emitter("other").await.is_ok() {
                return Err(MeshError::behavior("stub mesh handed out an emitter"));
            }

            // Still runnable: forward whatever arrives.
            loop {
                tokio::select! {
                    _ = cell.context().cancelled() => return Ok(()),
                    pulled = receptor.pull() => {
                        let Some(event) = pulled else { return Ok(()) };
                        emitter.emit_event(event).await?;
                    }
                }
            }
        },
    );

    let testbed = Testbed::new(probing, |evaluator: Evaluator| async move {
        evaluator
            .assert_retry(
                |sink| topics(sink) == ["alive"],
                "behavior did not survive the stub probing",
            )
            .await
    });

    testbed
        .go(
            |out: TestbedEmitter| async move { out.emit("alive").await },
            Duration::from_secs(5),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_terminating_behavior_leaves_notice() {
    let one_shot = BehaviorFn(
        |cell: Cell, mut receptor: Receptor, _emitter: Emitter| async move {
            tokio::select! {
                _ = cell.context().cancelled() => Ok(()),
                _ = receptor.pull() => Ok(()),
            }
        },
    );

    let testbed = Testbed::new(one_shot, |evaluator: Evaluator| async move {
        evaluator
            .assert_retry(
                |sink| topics(sink) == [TOPIC_TESTBED_TERMINATED],
                "expected the testbed termination notice",
            )
            .await?;

        let notice = evaluator.last().unwrap();
        let terminated: CellTerminated = notice.payload().map_err(|err| evaluator.error(err))?;
        evaluator.assert(
            terminated.cell_name == "testbed",
            "notice names the wrong cell",
        )
    });

    testbed
        .go(
            |out: TestbedEmitter| async move { out.emit("quit").await },
            Duration::from_secs(5),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_failing_behavior_leaves_error_notice() {
    let failing = BehaviorFn(
        |cell: Cell, mut receptor: Receptor, _emitter: Emitter| async move {
            tokio::select! {
                _ = cell.context().cancelled() => Ok(()),
                _ = receptor.pull() => Err(MeshError::behavior("boom")),
            }
        },
    );

    let testbed = Testbed::new(failing, |evaluator: Evaluator| async move {
        evaluator
            .assert_retry(
                |sink| topics(sink) == [TOPIC_TESTBED_ERROR],
                "expected the testbed error notice",
            )
            .await?;

        let failed: CellFailed = evaluator
            .last()
            .unwrap()
            .payload()
            .map_err(|err| evaluator.error(err))?;
        evaluator.assert(failed.cell_name == "testbed", "notice names the wrong cell")?;
        evaluator.assert(failed.error == "boom", "notice carries the wrong error")
    });

    testbed
        .go(
            |out: TestbedEmitter| async move { out.emit("trigger").await },
            Duration::from_secs(5),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_collecting_behavior_reports_payload() {
    // A small collector built on EventSink: accumulates topics and
    // answers a `report!` event with the collected list.
    let collecting = BehaviorFn(
        |cell: Cell, mut receptor: Receptor, emitter: Emitter| async move {
            let mut sink = EventSink::new();
            loop {
                tokio::select! {
                    _ = cell.context().cancelled() => return Ok(()),
                    pulled = receptor.pull() => {
                        let Some(event) = pulled else { return Ok(()) };
                        if event.topic() == "report!" {
                            let collected: Vec<String> =
                                sink.iter().map(|event| event.topic().to_string()).collect();
                            emitter.emit_with("report", collected).await?;
                            sink.clear();
                        } else {
                            sink.push(event);
                        }
                    }
                }
            }
        },
    );

    let testbed = Testbed::new(collecting, |evaluator: Evaluator| async move {
        evaluator
            .assert_retry(|sink| sink.len() == 1, "expected one report event")
            .await?;

        let report = evaluator.first().unwrap();
        evaluator.assert(report.topic() == "report", "unexpected report topic")?;
        let collected: Vec<String> = report.payload().map_err(|err| evaluator.error(err))?;
        evaluator.assert(
            collected == ["a", "b", "c"],
            format!("unexpected collected topics: {collected:?}"),
        )
    });

    testbed
        .go(
            |out: TestbedEmitter| async move {
                for topic in ["a", "b", "c", "report!"] {
                    out.emit(topic).await?;
                }
                Ok(())
            },
            Duration::from_secs(5),
        )
        .await
        .unwrap();
}
