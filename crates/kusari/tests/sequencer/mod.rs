use std::sync::{Arc, Mutex, OnceLock};

use kusari::{
    Bytes, ConstructionError, Destination, FetchError, Payload, Sequencer, SequencerBuilder,
    SequencerHandle, SequencerState,
};

use crate::{
    drain,
    fetcher::{Step, TestFetcher},
    within, AssertWrapper,
};

const ABC: [&str; 3] = [
    "https://example.test/files/a",
    "https://example.test/files/b",
    "https://example.test/files/c",
];

#[tokio::test]
async fn test_all_targets_succeed_in_order() -> anyhow::Result<()> {
    let fetcher = TestFetcher::new();
    let (sequencer, mut results) = Sequencer::channel(fetcher.clone(), ABC, Destination::Memory)?;
    assert_eq!(sequencer.state(), SequencerState::Idle);

    sequencer.resume();
    assert_eq!(within(sequencer.wait()).await, SequencerState::Finished);

    let results = drain(&mut results);
    assert_eq!(results.len(), 3);
    for (index, (result, name)) in results.iter().zip(["a", "b", "c"]).enumerate() {
        assert_eq!(result.index, index);
        assert_eq!(result.target.as_str(), ABC[index]);
        assert_eq!(
            result.payload().assert_success(),
            &Payload::Bytes(Bytes::from(format!("{name} data")))
        );
    }

    let progress = sequencer.progress();
    assert_eq!(progress.total(), 3);
    assert_eq!(progress.completed(), 3);
    assert_eq!(progress.failed(), 0);
    assert_eq!(progress.fraction(), 1.);
    assert_eq!(fetcher.attempts(), vec![0, 1, 2]);

    Ok(())
}

#[tokio::test]
async fn test_failed_item_does_not_stop_sequence() -> anyhow::Result<()> {
    let fetcher = TestFetcher::new().step("b", Step::Fail("network error"));
    let (sequencer, mut results) = Sequencer::channel(fetcher, ABC, Destination::Memory)?;

    sequencer.resume();
    assert_eq!(within(sequencer.wait()).await, SequencerState::Finished);

    let results = drain(&mut results);
    assert_eq!(results.len(), 3);
    assert!(results[0].is_success());
    let error = results[1].error().assert_success();
    assert!(matches!(error, FetchError::Custom(_)));
    assert_eq!(error.to_string(), "network error");
    assert!(results[2].is_success());

    let progress = sequencer.progress();
    assert_eq!(progress.completed(), 3);
    assert_eq!(progress.failed(), 1);
    assert_eq!(progress.succeeded(), 2);
    assert_eq!(progress.fraction(), 1.);

    Ok(())
}

#[tokio::test]
async fn test_empty_sequence_finishes_on_resume() -> anyhow::Result<()> {
    let fetcher = TestFetcher::new();
    let (sequencer, mut results) =
        Sequencer::channel(fetcher.clone(), Vec::<String>::new(), Destination::Memory)?;
    assert!(!sequencer.progress().is_complete());

    sequencer.resume();
    assert_eq!(sequencer.state(), SequencerState::Finished);
    assert_eq!(within(sequencer.wait()).await, SequencerState::Finished);

    let progress = sequencer.progress();
    assert_eq!(progress.total(), 0);
    assert_eq!(progress.completed(), 0);
    assert_eq!(progress.fraction(), 1.);
    assert!(progress.is_complete());
    assert!(drain(&mut results).is_empty());
    assert!(fetcher.attempts().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_cancel_while_idle() -> anyhow::Result<()> {
    let fetcher = TestFetcher::new();
    let (sequencer, mut results) = Sequencer::channel(fetcher.clone(), ABC, Destination::Memory)?;

    sequencer.cancel();
    assert_eq!(sequencer.state(), SequencerState::Cancelled);

    // terminal states are never left
    sequencer.resume();
    sequencer.cancel();
    assert_eq!(within(sequencer.wait()).await, SequencerState::Cancelled);

    assert!(drain(&mut results).is_empty());
    assert!(fetcher.attempts().is_empty());
    assert_eq!(sequencer.progress().completed(), 0);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resume_is_idempotent() -> anyhow::Result<()> {
    let fetcher = TestFetcher::new();
    let (sequencer, mut results) = Sequencer::channel(fetcher.clone(), ABC, Destination::Memory)?;

    sequencer.resume();
    sequencer.resume();
    assert_ne!(sequencer.state(), SequencerState::Idle);
    sequencer.resume();

    assert_eq!(within(sequencer.wait()).await, SequencerState::Finished);
    sequencer.resume();

    assert_eq!(drain(&mut results).len(), 3);
    assert_eq!(fetcher.attempts(), vec![0, 1, 2]);
    assert_eq!(fetcher.max_in_flight(), 1);

    Ok(())
}

#[tokio::test]
async fn test_cancel_in_flight_item() -> anyhow::Result<()> {
    let mut fetcher = TestFetcher::new().step("b", Step::Hold);
    let mut started = fetcher.started();
    let (sequencer, mut results) = Sequencer::channel(fetcher.clone(), ABC, Destination::Memory)?;

    sequencer.resume();
    assert_eq!(within(started.recv()).await, Some(0));
    assert_eq!(within(started.recv()).await, Some(1));
    assert_eq!(sequencer.state(), SequencerState::Running);

    sequencer.cancel();
    assert_eq!(within(sequencer.wait()).await, SequencerState::Cancelled);

    let results = drain(&mut results);
    assert_eq!(results.len(), 2);
    assert!(results[0].is_success());
    assert_eq!(results[1].index, 1);
    assert!(results[1].error().assert_success().is_cancelled());

    assert_eq!(fetcher.attempts(), vec![0, 1]);
    let progress = sequencer.progress();
    assert_eq!(progress.completed(), 2);
    assert_eq!(progress.failed(), 1);

    Ok(())
}

#[tokio::test]
async fn test_cancelled_item_that_succeeds_is_kept() -> anyhow::Result<()> {
    let mut fetcher = TestFetcher::new().step("a", Step::HoldThenSucceed);
    let mut started = fetcher.started();
    let (sequencer, mut results) = Sequencer::channel(fetcher.clone(), ABC, Destination::Memory)?;

    sequencer.resume();
    assert_eq!(within(started.recv()).await, Some(0));
    sequencer.cancel();
    assert_eq!(within(sequencer.wait()).await, SequencerState::Cancelled);

    let results = drain(&mut results);
    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].payload().assert_success(),
        &Payload::Bytes(Bytes::from("a data"))
    );
    assert_eq!(fetcher.attempts(), vec![0]);

    Ok(())
}

#[tokio::test]
async fn test_cancel_from_item_handler() -> anyhow::Result<()> {
    let fetcher = TestFetcher::new();
    let handle = Arc::new(OnceLock::<SequencerHandle>::new());
    let delivered = Arc::new(Mutex::new(Vec::new()));

    let sequencer = {
        let handle = handle.clone();
        let delivered = delivered.clone();
        Sequencer::new(fetcher.clone(), ABC, Destination::Memory, move |result| {
            delivered.lock().unwrap().push((result.index, result.is_success()));
            if let Some(handle) = handle.get() {
                handle.cancel();
            }
        })?
    };
    _ = handle.set(sequencer.handle());

    sequencer.resume();
    assert_eq!(within(sequencer.wait()).await, SequencerState::Cancelled);

    assert_eq!(*delivered.lock().unwrap(), vec![(0, true)]);
    assert_eq!(fetcher.attempts(), vec![0]);
    assert_eq!(sequencer.progress().completed(), 1);

    Ok(())
}

#[tokio::test]
async fn test_cancel_during_last_item() -> anyhow::Result<()> {
    let mut fetcher = TestFetcher::new().step("c", Step::Hold);
    let mut started = fetcher.started();
    let (sequencer, mut results) = Sequencer::channel(fetcher.clone(), ABC, Destination::Memory)?;

    sequencer.resume();
    for index in 0..3 {
        assert_eq!(within(started.recv()).await, Some(index));
    }
    sequencer.cancel();
    assert_eq!(within(sequencer.wait()).await, SequencerState::Cancelled);

    let results = drain(&mut results);
    assert_eq!(results.len(), 3);
    assert!(results[2].error().assert_success().is_cancelled());
    assert_eq!(sequencer.progress().completed(), 3);

    Ok(())
}

#[tokio::test]
async fn test_cancel_right_after_resume() -> anyhow::Result<()> {
    let fetcher = TestFetcher::new().step("a", Step::Hold);
    let (sequencer, mut results) = Sequencer::channel(fetcher.clone(), ABC, Destination::Memory)?;

    // the driver task has not been polled yet on this runtime
    sequencer.resume();
    sequencer.cancel();
    assert_eq!(within(sequencer.wait()).await, SequencerState::Cancelled);

    assert!(fetcher.attempts().is_empty());
    assert!(drain(&mut results).is_empty());
    assert_eq!(sequencer.progress().completed(), 0);

    Ok(())
}

#[tokio::test]
async fn test_progress_is_monotonic() -> anyhow::Result<()> {
    let fetcher = TestFetcher::new().step("b", Step::Fail("network error"));
    let handle = Arc::new(OnceLock::<SequencerHandle>::new());
    let snapshots = Arc::new(Mutex::new(Vec::new()));

    let sequencer = {
        let handle = handle.clone();
        let snapshots = snapshots.clone();
        SequencerBuilder::new()
            .on_item(move |_| {
                if let Some(handle) = handle.get() {
                    snapshots.lock().unwrap().push(handle.progress());
                }
            })
            .build(fetcher, ABC)?
    };
    _ = handle.set(sequencer.handle());
    let mut watcher = sequencer.subscribe();

    sequencer.resume();
    within(watcher.wait_for(|progress| progress.is_complete())).await?;
    assert_eq!(within(sequencer.wait()).await, SequencerState::Finished);

    let snapshots = snapshots.lock().unwrap();
    let completed: Vec<_> = snapshots.iter().map(|p| p.completed()).collect();
    assert_eq!(completed, vec![1, 2, 3]);
    for pair in snapshots.windows(2) {
        assert!(pair[0].fraction() <= pair[1].fraction());
    }
    assert_eq!(snapshots[0].fraction(), 1. / 3.);
    assert_eq!(snapshots[2].fraction(), 1.);

    Ok(())
}

#[tokio::test]
async fn test_panicking_handler_settles_sequence() -> anyhow::Result<()> {
    let fetcher = TestFetcher::new();
    let sequencer = Sequencer::new(fetcher.clone(), ABC, Destination::Memory, |_| {
        panic!("handler failed");
    })?;

    sequencer.resume();
    assert_eq!(within(sequencer.wait()).await, SequencerState::Cancelled);
    assert_eq!(fetcher.attempts(), vec![0]);

    Ok(())
}

#[tokio::test]
async fn test_persist_destination() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let template = dir.path().join("{index}_{name}.bin");
    let (sequencer, mut results) = Sequencer::channel(
        TestFetcher::new(),
        ABC,
        Destination::persist(template.to_string_lossy()),
    )?;

    sequencer.resume();
    assert_eq!(within(sequencer.wait()).await, SequencerState::Finished);

    let results = drain(&mut results);
    assert_eq!(results.len(), 3);
    for (index, name) in ["a", "b", "c"].into_iter().enumerate() {
        let expected = dir.path().join(format!("{index:03}_{name}.bin"));
        let path = results[index].payload().and_then(Payload::path).assert_success();
        assert_eq!(path, &expected);
        assert_eq!(std::fs::read_to_string(path)?, format!("{name} data"));
    }

    Ok(())
}

#[tokio::test]
async fn test_construction_errors() {
    let error = Sequencer::channel(
        TestFetcher::new(),
        ["https://example.test/a", "not a url"],
        Destination::Memory,
    )
    .err()
    .assert_success();
    assert!(matches!(
        error,
        ConstructionError::InvalidTarget { index: 1, .. }
    ));

    let error = Sequencer::channel(
        TestFetcher::new().scheme("https"),
        ["https://example.test/a", "ftp://example.test/b"],
        Destination::Memory,
    )
    .err()
    .assert_success();
    assert!(matches!(
        error,
        ConstructionError::UnsupportedTarget { index: 1, .. }
    ));

    let error = Sequencer::channel(TestFetcher::new(), ABC, Destination::persist("out/{id}"))
        .err()
        .assert_success();
    assert!(matches!(error, ConstructionError::InvalidTemplate { .. }));

    let error = Sequencer::channel(
        TestFetcher::new(),
        ["https://a.test/x/seg.ts", "https://b.test/y/seg.ts"],
        Destination::persist("out/{name}"),
    )
    .err()
    .assert_success();
    assert!(matches!(
        error,
        ConstructionError::DuplicateDestination { .. }
    ));
}

#[test]
fn test_construction_requires_runtime() {
    let error = Sequencer::channel(TestFetcher::new(), ABC, Destination::Memory)
        .err()
        .assert_success();
    assert!(matches!(error, ConstructionError::NoRuntime(_)));
}
