mod diagnostics;

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tracing::Instrument;

use crate::core::{ArcStr, Concurrency, Deps, Results};
use crate::engine::{ResolutionContext, TaskState};
use crate::error::{FlowError, ProducerError};
use crate::flow::FlowConfig;
use crate::spec::ProducerFn;

pub use diagnostics::Diagnostics;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Outcome of one producer, reported back to the scheduler loop.
struct Completion<T> {
    id: ArcStr,
    outcome: Result<T, ProducerError>,
    start: Instant,
    duration: Duration,
}

impl<'f, T> ResolutionContext<'f, T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Pop the next ready identifier and invoke its producer.
    ///
    /// The state is switched to [`TaskState::Computing`] before the producer
    /// is called and before anything is awaited, which is what keeps every
    /// producer to a single invocation.
    fn begin(&mut self) -> Option<BoxFuture<'static, Completion<T>>> {
        while let Some(id) = self.ready.pop_front() {
            let Some(state) = self.states.get_mut(&id) else {
                continue;
            };

            if !matches!(state, TaskState::Resolving { waiting: 0 }) {
                continue;
            }

            *state = TaskState::Computing;

            let Some(spec) = self.specs.get(&id) else {
                continue;
            };

            let deps = self.dependency_results(&spec.dependencies);
            let span = tracing::debug_span!("task", name = %id);
            let future = span.in_scope(|| {
                tracing::debug!("starting");
                invoke(&spec.producer, deps)
            });

            return Some(
                async move {
                    let start = Instant::now();
                    let outcome = future.await;
                    let duration = start.elapsed();

                    match &outcome {
                        Ok(_) => tracing::debug!(?duration, "finished"),
                        Err(err) => tracing::warn!(?duration, "failed: {err}"),
                    }

                    Completion {
                        id,
                        outcome,
                        start,
                        duration,
                    }
                }
                .instrument(span)
                .boxed(),
            );
        }

        None
    }
}

/// Call the producer, turning a panic, whether raised by the call itself or
/// while polling the returned future, into an ordinary failure.
fn invoke<T>(producer: &ProducerFn<T>, deps: Deps<T>) -> BoxFuture<'static, Result<T, ProducerError>>
where
    T: Send + 'static,
{
    match std::panic::catch_unwind(AssertUnwindSafe(|| producer(deps))) {
        Ok(future) => AssertUnwindSafe(future)
            .catch_unwind()
            .map(|result| match result {
                Ok(outcome) => outcome.map_err(ProducerError::from),
                Err(panic) => Err(panic_error(panic)),
            })
            .boxed(),
        Err(panic) => std::future::ready(Err(panic_error(panic))).boxed(),
    }
}

fn panic_error(panic: Box<dyn Any + Send>) -> ProducerError {
    let msg = if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Task panicked: {s}")
    } else {
        String::from("Task panicked with unknown payload")
    };

    ProducerError::new(anyhow::anyhow!(msg))
}

/// Resolve `requested` and everything it depends on.
///
/// The scheduler works as follows:
/// 1. Every requested identifier is walked, which validates it and its
///    transitive dependencies and records how many unresolved dependencies
///    each of them waits on. Identifiers waiting on nothing become ready.
/// 2. Ready identifiers are started while fewer than `concurrency` producers
///    are running.
/// 3. The loop waits for any running producer to finish. Its value is stored
///    and the waiting counts of its dependents are decremented; dependents
///    reaching zero become ready.
/// 4. The first failure stops new producers from starting. Producers already
///    running are polled to completion, then the failure is returned.
pub(crate) async fn run<T>(
    flow: &FlowConfig<T>,
    requested: BTreeSet<ArcStr>,
    concurrency: Concurrency,
) -> Result<(Results<T>, Diagnostics), FlowError>
where
    T: Clone + Send + Sync + 'static,
{
    let span = tracing::info_span!("resolve", tasks = requested.len(), ?concurrency);

    schedule(flow, requested, concurrency)
        .instrument(span)
        .await
}

async fn schedule<T>(
    flow: &FlowConfig<T>,
    requested: BTreeSet<ArcStr>,
    concurrency: Concurrency,
) -> Result<(Results<T>, Diagnostics), FlowError>
where
    T: Clone + Send + Sync + 'static,
{
    let mut context = ResolutionContext::new(flow);
    for id in &requested {
        context.visit(id)?;
    }

    let permits = concurrency.permits();
    let mut running = FuturesUnordered::new();
    let mut execution_times = HashMap::new();
    let mut peak_concurrency = 0;
    let mut failure = None;

    loop {
        while failure.is_none() && running.len() < permits {
            let Some(future) = context.begin() else {
                break;
            };
            running.push(future);
            peak_concurrency = peak_concurrency.max(running.len());
        }

        let Some(completion) = running.next().await else {
            break;
        };

        let Completion {
            id,
            outcome,
            start,
            duration,
        } = completion;

        execution_times.insert(id.clone(), TaskExecution { start, duration });

        match outcome {
            Ok(value) => context.complete(&id, value),
            Err(source) => {
                context.fail(&id);
                if failure.is_none() {
                    if !running.is_empty() {
                        tracing::info!(
                            "waiting for {} running tasks before failing",
                            running.len()
                        );
                    }
                    failure = Some(FlowError::Producer {
                        identifier: id,
                        source,
                    });
                }
            }
        }
    }

    if let Some(err) = failure {
        return Err(err);
    }

    let results = context.aggregate(&requested);
    tracing::debug!("resolved {} tasks", results.len());

    Ok((
        results,
        Diagnostics {
            execution_times,
            peak_concurrency,
        },
    ))
}
