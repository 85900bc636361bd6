//! Task declarations and their normalization.
//!
//! A task is declared in one of three shapes: a constant value, a producer
//! without dependencies, or a producer that receives the resolved values of
//! the dependencies it names. Before resolution every shape is collapsed into
//! the same [`Normalized`] form: an ordered list of dependency identifiers and
//! a producer taking [`Deps`].

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::core::{ArcStr, Deps};
use crate::error::SpecError;

/// Result returned from a single producer.
pub type TaskResult<T> = anyhow::Result<T>;

/// Type-erased async producer of a task value.
pub type ProducerFn<T> = Arc<dyn Fn(Deps<T>) -> BoxFuture<'static, TaskResult<T>> + Send + Sync>;

/// How the value of a single task is produced.
pub enum TaskSpec<T> {
    /// A fixed value.
    Constant(T),
    /// A producer without dependencies.
    Producer(ProducerFn<T>),
    /// A producer called with the resolved values of the listed identifiers.
    Dependent(Vec<ArcStr>, ProducerFn<T>),
}

impl<T> TaskSpec<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// A task that resolves to `value` without running anything.
    pub fn constant(value: T) -> Self {
        TaskSpec::Constant(value)
    }

    /// A synchronous producer without dependencies.
    pub fn from_fn<F>(func: F) -> Self
    where
        F: Fn() -> TaskResult<T> + Send + Sync + 'static,
    {
        TaskSpec::Producer(Arc::new(move |_: Deps<T>| std::future::ready(func()).boxed()))
    }

    /// An async producer without dependencies.
    pub fn from_async<F, Fut>(func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult<T>> + Send + 'static,
    {
        TaskSpec::Producer(Arc::new(move |_: Deps<T>| func().boxed()))
    }

    /// A synchronous producer reading the values of `dependencies`.
    pub fn dependent<I, S, F>(dependencies: I, func: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ArcStr>,
        F: Fn(&Deps<T>) -> TaskResult<T> + Send + Sync + 'static,
    {
        TaskSpec::Dependent(
            dependencies.into_iter().map(Into::into).collect(),
            Arc::new(move |deps: Deps<T>| std::future::ready(func(&deps)).boxed()),
        )
    }

    /// An async producer given the values of `dependencies` by value.
    pub fn dependent_async<I, S, F, Fut>(dependencies: I, func: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ArcStr>,
        F: Fn(Deps<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult<T>> + Send + 'static,
    {
        TaskSpec::Dependent(
            dependencies.into_iter().map(Into::into).collect(),
            Arc::new(move |deps: Deps<T>| func(deps).boxed()),
        )
    }

    /// Build a spec from the list form, where every entry but the last names a
    /// dependency and the last one produces the value.
    ///
    /// A list holding a single value is a constant. A value in last position
    /// after dependencies is rejected, since the dependencies would have no
    /// consumer.
    pub fn from_entries(entries: Vec<Entry<T>>) -> Result<Self, SpecError> {
        let mut entries = entries;
        let last = entries.pop().ok_or(SpecError::Empty)?;

        let dependencies = entries
            .into_iter()
            .enumerate()
            .map(|(position, entry)| match entry {
                Entry::Dependency(id) => Ok(id),
                _ => Err(SpecError::MisplacedEntry { position }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        match last {
            Entry::Producer(func) => Ok(TaskSpec::Dependent(dependencies, func)),
            Entry::Value(value) if dependencies.is_empty() => Ok(TaskSpec::Constant(value)),
            Entry::Value(_) | Entry::Dependency(_) => Err(SpecError::MissingProducer),
        }
    }

    /// Declared dependencies, in declaration order.
    pub fn dependencies(&self) -> &[ArcStr] {
        match self {
            TaskSpec::Dependent(dependencies, _) => dependencies,
            TaskSpec::Constant(_) | TaskSpec::Producer(_) => &[],
        }
    }

    pub(crate) fn normalize(&self) -> Normalized<T> {
        match self {
            TaskSpec::Constant(value) => {
                let value = value.clone();
                Normalized {
                    dependencies: Vec::new(),
                    producer: Arc::new(move |_: Deps<T>| std::future::ready(Ok(value.clone())).boxed()),
                }
            }
            TaskSpec::Producer(func) => Normalized {
                dependencies: Vec::new(),
                producer: func.clone(),
            },
            TaskSpec::Dependent(dependencies, func) => Normalized {
                dependencies: dependencies.clone(),
                producer: func.clone(),
            },
        }
    }
}

impl<T> std::fmt::Debug for TaskSpec<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskSpec::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            TaskSpec::Producer(_) => write!(f, "Producer(*)"),
            TaskSpec::Dependent(deps, _) => write!(f, "Dependent({deps:?}, *)"),
        }
    }
}

/// Single element of a list-form task declaration.
pub enum Entry<T> {
    Dependency(ArcStr),
    Value(T),
    Producer(ProducerFn<T>),
}

impl<T> Entry<T>
where
    T: Send + 'static,
{
    pub fn dependency(id: impl Into<ArcStr>) -> Self {
        Entry::Dependency(id.into())
    }

    pub fn producer<F>(func: F) -> Self
    where
        F: Fn(&Deps<T>) -> TaskResult<T> + Send + Sync + 'static,
    {
        Entry::Producer(Arc::new(move |deps: Deps<T>| std::future::ready(func(&deps)).boxed()))
    }
}

/// Uniform shape of every task, ready for the engine.
pub(crate) struct Normalized<T> {
    pub dependencies: Vec<ArcStr>,
    pub producer: ProducerFn<T>,
}

impl<T> Clone for Normalized<T> {
    fn clone(&self) -> Self {
        Self {
            dependencies: self.dependencies.clone(),
            producer: self.producer.clone(),
        }
    }
}
