//! The resolution engine.
//!
//! A single resolution owns a [`ResolutionContext`]: the per-identifier state
//! machine, the reverse dependency edges discovered so far and the queue of
//! identifiers whose dependencies are all resolved. Nothing in it outlives the
//! call that created it.
//!
//! ## State machine
//!
//! Every identifier moves through
//!
//! * *unvisited* (absent from the state map),
//! * [`TaskState::Resolving`] once it was validated and its dependencies are
//!   being waited on,
//! * [`TaskState::Computing`] once its producer was invoked,
//! * [`TaskState::Resolved`] holding the value, or [`TaskState::Failed`].
//!
//! The transition into `Computing` happens in [`ResolutionContext::begin`],
//! which is synchronous, so no two branches can ever invoke the producer of the
//! same identifier.

mod runner;

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::core::{ArcStr, Concurrency, Deps, Results};
use crate::error::FlowError;
use crate::flow::FlowConfig;
use crate::spec::Normalized;

pub use runner::{Diagnostics, TaskExecution};

pub(crate) enum TaskState<T> {
    /// Validated; `waiting` dependencies are not resolved yet.
    Resolving { waiting: usize },
    /// Producer invoked, result pending.
    Computing,
    Resolved(T),
    Failed,
}

/// Check that every dependency of `id` is declared in `flow`.
pub(crate) fn check_existence<T>(
    flow: &FlowConfig<T>,
    id: &ArcStr,
    dependencies: &[ArcStr],
) -> Result<(), FlowError>
where
    T: Clone + Send + Sync + 'static,
{
    let missing: Vec<ArcStr> = dependencies
        .iter()
        .filter(|dependency| !flow.contains(dependency))
        .cloned()
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(FlowError::NonExistentDependency {
            identifier: id.clone(),
            dependencies: missing,
        })
    }
}

/// Position of the iterative walk inside one identifier's dependency list.
struct Frame {
    id: ArcStr,
    dependencies: Vec<ArcStr>,
    next: usize,
}

pub(crate) struct ResolutionContext<'f, T> {
    flow: &'f FlowConfig<T>,
    specs: HashMap<ArcStr, Normalized<T>>,
    states: HashMap<ArcStr, TaskState<T>>,
    /// Map from a dependency to the identifiers waiting on it.
    dependents: HashMap<ArcStr, Vec<ArcStr>>,
    ready: VecDeque<ArcStr>,
}

impl<'f, T> ResolutionContext<'f, T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(flow: &'f FlowConfig<T>) -> Self {
        Self {
            flow,
            specs: HashMap::new(),
            states: HashMap::new(),
            dependents: HashMap::new(),
            ready: VecDeque::new(),
        }
    }

    /// Walk everything `root` transitively depends on, validating each
    /// identifier as it is first reached.
    ///
    /// The walk is depth-first with an explicit stack. `on_stack` maps every
    /// identifier of the current path to its frame index, so reaching one of
    /// them again yields the cycle in constant time.
    pub(crate) fn visit(&mut self, root: &ArcStr) -> Result<(), FlowError> {
        if self.states.contains_key(root) {
            return Ok(());
        }

        let mut stack = vec![self.enter(root)?];
        let mut on_stack = HashMap::from([(root.clone(), 0)]);

        while let Some(frame) = stack.last_mut() {
            let Some(dependency) = frame.dependencies.get(frame.next).cloned() else {
                let id = frame.id.clone();
                stack.pop();
                on_stack.remove(&id);
                self.finish(id);
                continue;
            };

            frame.next += 1;
            let id = frame.id.clone();

            if matches!(self.states.get(&dependency), Some(TaskState::Resolved(_))) {
                continue;
            }

            if let Some(&start) = on_stack.get(&dependency) {
                return Err(FlowError::CyclicDependency {
                    identifier: id,
                    cycle: stack[start..].iter().map(|f| f.id.clone()).collect(),
                });
            }

            if self.states.contains_key(&dependency) {
                self.wait(&id, dependency);
            } else {
                self.wait(&id, dependency.clone());
                let frame = self.enter(&dependency)?;
                on_stack.insert(dependency, stack.len());
                stack.push(frame);
            }
        }

        Ok(())
    }

    fn enter(&mut self, id: &ArcStr) -> Result<Frame, FlowError> {
        let spec = self
            .flow
            .get(id)
            .ok_or_else(|| FlowError::UnknownTask(id.clone()))?;

        let normalized = spec.normalize();
        check_existence(self.flow, id, &normalized.dependencies)?;

        tracing::trace!(task = %id, dependencies = normalized.dependencies.len(), "visiting");

        let dependencies = normalized.dependencies.clone();
        self.specs.insert(id.clone(), normalized);
        self.states.insert(id.clone(), TaskState::Resolving { waiting: 0 });

        Ok(Frame {
            id: id.clone(),
            dependencies,
            next: 0,
        })
    }

    fn wait(&mut self, id: &ArcStr, dependency: ArcStr) {
        if let Some(TaskState::Resolving { waiting }) = self.states.get_mut(id) {
            *waiting += 1;
        }
        self.dependents.entry(dependency).or_default().push(id.clone());
    }

    fn finish(&mut self, id: ArcStr) {
        if let Some(TaskState::Resolving { waiting: 0 }) = self.states.get(&id) {
            self.ready.push_back(id);
        }
    }

    /// Store the value of `id` and release every identifier that was waiting
    /// only on it.
    pub(crate) fn complete(&mut self, id: &ArcStr, value: T) {
        self.states.insert(id.clone(), TaskState::Resolved(value));

        for dependent in self.dependents.remove(id).unwrap_or_default() {
            if let Some(TaskState::Resolving { waiting }) = self.states.get_mut(&dependent) {
                *waiting -= 1;
                if *waiting == 0 {
                    self.ready.push_back(dependent);
                }
            }
        }
    }

    pub(crate) fn fail(&mut self, id: &ArcStr) {
        self.states.insert(id.clone(), TaskState::Failed);
    }

    #[cfg(test)]
    pub(crate) fn state(&self, id: &str) -> Option<&TaskState<T>> {
        self.states.get(id)
    }

    /// Resolved values of `dependencies`, keyed by identifier.
    fn dependency_results(&self, dependencies: &[ArcStr]) -> Deps<T> {
        let mut deps = Deps::empty();

        for dependency in dependencies {
            if let Some(TaskState::Resolved(value)) = self.states.get(dependency) {
                deps.values.insert(dependency.clone(), value.clone());
            }
        }

        deps
    }

    /// Collect the values of `requested` once every one of them is resolved.
    fn aggregate(mut self, requested: &BTreeSet<ArcStr>) -> Results<T> {
        debug_assert!(
            requested
                .iter()
                .all(|id| matches!(self.states.get(id), Some(TaskState::Resolved(_)))),
            "aggregating before every requested task was resolved"
        );

        let values = requested
            .iter()
            .filter_map(|id| match self.states.remove(id) {
                Some(TaskState::Resolved(value)) => Some((id.clone(), value)),
                _ => None,
            })
            .collect();

        Results { values }
    }
}

/// Configures and runs a single resolution of a [`FlowConfig`].
///
/// Every call to one of the `resolve*` methods builds a fresh
/// resolution context, so results are never shared between calls.
pub struct Resolver<'f, T = serde_json::Value> {
    flow: &'f FlowConfig<T>,
    concurrency: Concurrency,
}

impl<'f, T> Resolver<'f, T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(flow: &'f FlowConfig<T>) -> Self {
        Self {
            flow,
            concurrency: Concurrency::Unbounded,
        }
    }

    /// Limit how many producers may run at the same time.
    pub fn concurrency(mut self, concurrency: impl Into<Concurrency>) -> Self {
        self.concurrency = concurrency.into();
        self
    }

    /// Resolve every task of the flow.
    pub async fn resolve(&self) -> Result<Results<T>, FlowError> {
        self.resolve_with_diagnostics()
            .await
            .map(|(results, _)| results)
    }

    /// Resolve only `ids` and whatever they transitively depend on. The
    /// returned mapping holds exactly the requested identifiers.
    pub async fn resolve_only<I, S>(&self, ids: I) -> Result<Results<T>, FlowError>
    where
        I: IntoIterator<Item = S>,
        S: Into<ArcStr>,
    {
        let requested = ids.into_iter().map(Into::into).collect();
        runner::run(self.flow, requested, self.concurrency)
            .await
            .map(|(results, _)| results)
    }

    /// Resolve every task of the flow and report how the run went.
    pub async fn resolve_with_diagnostics(&self) -> Result<(Results<T>, Diagnostics), FlowError> {
        let requested = self.flow.identifiers().cloned().collect();
        runner::run(self.flow, requested, self.concurrency).await
    }
}
