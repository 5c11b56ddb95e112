mod builder;

pub use builder::SequencerBuilder;

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::{
    runtime::Handle,
    sync::{mpsc, watch},
};
use tokio_util::sync::CancellationToken;

use crate::{
    destination::{Destination, FetchDestination},
    error::{ConstructionError, FetchError, FetchResult},
    fetch::{FetchRequest, Fetcher, Payload},
    progress::{AggregateProgress, ItemProgress, ProgressSender},
    Target,
};

/// Lifecycle of a [`Sequencer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum SequencerState {
    Idle,
    Running,
    Cancelled,
    Finished,
}

impl SequencerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Finished)
    }
}

/// Outcome of one attempted target.
#[derive(Debug)]
pub struct ItemResult {
    pub index: usize,
    pub target: Target,
    pub outcome: FetchResult<Payload>,
}

impl ItemResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&FetchError> {
        self.outcome.as_ref().err()
    }
}

pub(crate) type ItemHandler = Box<dyn FnMut(ItemResult) + Send + 'static>;

struct Shared {
    targets: Arc<[Target]>,
    destinations: Vec<FetchDestination>,
    state: watch::Sender<SequencerState>,
    progress: ProgressSender,
    cancel: CancellationToken,
}

/// Fetches a fixed list of targets one at a time.
///
/// ```text
///            resume()                 list exhausted
///   Idle ───────────────► Running ─────────────────────► Finished
///     │                      │
///     │ cancel()             │ cancel(), once the in-flight item settled
///     ▼                      ▼
///  Cancelled ◄───────────────┘
/// ```
///
/// Results are delivered in target order from a single task, one at a time.
/// A failed item does not stop the sequence. Dropping the sequencer does not
/// stop a running sequence, call [`Sequencer::cancel`] for that.
pub struct Sequencer<F>
where
    F: Fetcher,
{
    handle: SequencerHandle,
    fetcher: Arc<F>,
    handler: Mutex<Option<ItemHandler>>,
    runtime: Handle,
}

impl<F> Sequencer<F>
where
    F: Fetcher,
{
    /// Build a sequencer that calls `on_item` for every settled target.
    pub fn new<I, T>(
        fetcher: F,
        targets: I,
        destination: Destination,
        on_item: impl FnMut(ItemResult) + Send + 'static,
    ) -> Result<Self, ConstructionError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        SequencerBuilder::new()
            .destination(destination)
            .on_item(on_item)
            .build(fetcher, targets)
    }

    /// Build a sequencer that sends every [`ItemResult`] to the returned
    /// receiver.
    pub fn channel<I, T>(
        fetcher: F,
        targets: I,
        destination: Destination,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ItemResult>), ConstructionError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let sequencer = Self::new(fetcher, targets, destination, move |result| {
            // the receiver may be gone, results are dropped then
            _ = tx.send(result);
        })?;
        Ok((sequencer, rx))
    }

    pub(crate) fn with_targets(
        fetcher: F,
        targets: Vec<Target>,
        destination: &Destination,
        handler: ItemHandler,
    ) -> Result<Self, ConstructionError> {
        let runtime = Handle::try_current()?;

        if let Some((index, target)) = targets
            .iter()
            .enumerate()
            .find(|(_, target)| !fetcher.supports(target))
        {
            return Err(ConstructionError::UnsupportedTarget {
                index,
                target: target.to_string(),
            });
        }
        let destinations = destination.plan(&targets)?;

        let total = targets.len();
        let (state, _) = watch::channel(SequencerState::Idle);
        let (progress, _) = watch::channel(AggregateProgress::new(total));

        Ok(Self {
            handle: SequencerHandle {
                shared: Arc::new(Shared {
                    targets: targets.into(),
                    destinations,
                    state,
                    progress: Arc::new(progress),
                    cancel: CancellationToken::new(),
                }),
            },
            fetcher: Arc::new(fetcher),
            handler: Mutex::new(Some(handler)),
            runtime,
        })
    }

    pub fn targets(&self) -> &[Target] {
        &self.handle.shared.targets
    }

    /// A cloneable handle for observing or cancelling the sequence from
    /// elsewhere, including from the item handler.
    pub fn handle(&self) -> SequencerHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> SequencerState {
        self.handle.state()
    }

    /// Snapshot of the aggregate progress.
    pub fn progress(&self) -> AggregateProgress {
        self.handle.progress()
    }

    /// Watch the aggregate progress as it changes.
    pub fn subscribe(&self) -> watch::Receiver<AggregateProgress> {
        self.handle.subscribe()
    }

    /// Start fetching. Does nothing unless the sequencer is idle.
    ///
    /// Returns immediately, results are observed through the item handler.
    pub fn resume(&self) {
        let shared = &self.handle.shared;
        let empty = shared.targets.is_empty();
        let started = shared.state.send_if_modified(|state| {
            if *state != SequencerState::Idle {
                return false;
            }
            if empty {
                shared.progress.send_modify(AggregateProgress::finish_empty);
                *state = SequencerState::Finished;
            } else {
                *state = SequencerState::Running;
            }
            true
        });
        if !started {
            tracing::debug!("Sequencer is {:?}, resume ignored.", self.state());
            return;
        }
        if empty {
            tracing::info!("No target to fetch.");
            return;
        }

        let handler = match self.handler.lock() {
            Ok(mut handler) => handler.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
        .unwrap_or_else(|| Box::new(|_: ItemResult| {}));

        self.runtime.spawn(drive(
            Driver {
                shared: shared.clone(),
            },
            self.fetcher.clone(),
            handler,
        ));
    }

    /// See [`SequencerHandle::cancel`].
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// See [`SequencerHandle::wait`].
    pub async fn wait(&self) -> SequencerState {
        self.handle.wait().await
    }
}

#[derive(Clone)]
pub struct SequencerHandle {
    shared: Arc<Shared>,
}

impl SequencerHandle {
    pub fn state(&self) -> SequencerState {
        *self.shared.state.borrow()
    }

    pub fn progress(&self) -> AggregateProgress {
        self.shared.progress.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AggregateProgress> {
        self.shared.progress.subscribe()
    }

    /// Stop the sequence.
    ///
    /// An idle sequencer is cancelled at once. A running one asks the
    /// in-flight fetch to stop, delivers its result, then settles as
    /// [`SequencerState::Cancelled`] without starting another target.
    pub fn cancel(&self) {
        let shared = &self.shared;
        shared.state.send_if_modified(|state| match state {
            SequencerState::Idle => {
                *state = SequencerState::Cancelled;
                true
            }
            SequencerState::Running => {
                // under the state lock so the driver can not start another
                // target after this returns
                shared.cancel.cancel();
                false
            }
            SequencerState::Cancelled | SequencerState::Finished => false,
        });
    }

    /// Wait until the sequencer reaches a terminal state and return it.
    ///
    /// Waiting does not start an idle sequencer.
    pub async fn wait(&self) -> SequencerState {
        self.shared
            .state
            .subscribe()
            .wait_for(|state| state.is_terminal())
            .await
            .map(|state| *state)
            .unwrap_or_else(|_| self.state())
    }
}

/// Owned by the driver task. Settles the state if the task ends without
/// reaching a terminal state, e.g. when a handler panics or the runtime
/// shuts down.
struct Driver {
    shared: Arc<Shared>,
}

impl Drop for Driver {
    fn drop(&mut self) {
        let aborted = self.shared.state.send_if_modified(|state| {
            if *state == SequencerState::Running {
                *state = SequencerState::Cancelled;
                true
            } else {
                false
            }
        });
        if aborted {
            tracing::error!("Sequence stopped unexpectedly.");
        }
    }
}

async fn drive<F>(driver: Driver, fetcher: Arc<F>, mut handler: ItemHandler)
where
    F: Fetcher,
{
    let shared = &driver.shared;
    let total = shared.targets.len();
    tracing::info!("Start fetching {total} target(s) in sequence.");

    let mut index = 0;
    let state = loop {
        // decided under the state lock, no fetch starts once `cancel` returned
        let mut settled = None;
        shared.state.send_if_modified(|state| {
            if shared.cancel.is_cancelled() {
                *state = SequencerState::Cancelled;
            } else if index == total {
                *state = SequencerState::Finished;
            } else {
                return false;
            }
            settled = Some(*state);
            true
        });
        if let Some(state) = settled {
            break state;
        }

        let target = shared.targets[index].clone();
        let request = FetchRequest {
            index,
            target: target.clone(),
            destination: shared.destinations[index].clone(),
            progress: ItemProgress::new(index, shared.progress.clone()),
            cancel: shared.cancel.child_token(),
        };
        let outcome = fetcher.fetch(request).await;

        shared
            .progress
            .send_modify(|progress| progress.settle(outcome.is_err()));
        let progress = shared.progress.borrow().clone();
        let completed = progress.completed();
        match &outcome {
            Ok(_) => tracing::info!(
                "Fetching {target} finished. ({completed} / {total} or {:.2}%)",
                progress.percentage()
            ),
            Err(e) => tracing::warn!(
                "Fetching {target} failed: {e}. ({completed} / {total} or {:.2}%)",
                progress.percentage()
            ),
        }

        handler(ItemResult {
            index,
            target,
            outcome,
        });
        index += 1;
    };

    let progress = shared.progress.borrow().clone();
    match state {
        SequencerState::Cancelled => tracing::info!(
            "Sequence cancelled, {} of {total} target(s) were not attempted.",
            total - progress.completed()
        ),
        _ => tracing::info!(
            "Sequence finished, {} succeeded and {} failed.",
            progress.succeeded(),
            progress.failed()
        ),
    }
    if progress.failed() > 0 {
        tracing::error!("Failed to fetch {} target(s).", progress.failed());
    }
}
