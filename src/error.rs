use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::core::ArcStr;

/// Failure produced by a task's producer, shared by every dependent that
/// awaited it.
#[derive(Debug, Error, Clone)]
#[error(transparent)]
pub struct ProducerError(#[from] pub(crate) Arc<anyhow::Error>);

impl ProducerError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }

    /// The error exactly as the producer returned it.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }
}

impl From<anyhow::Error> for ProducerError {
    fn from(e: anyhow::Error) -> Self {
        ProducerError(Arc::new(e))
    }
}

/// Coarse classification of a [`FlowError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    NonExistentDependency,
    CyclicDependency,
    ProducerFailure,
}

impl ErrorKind {
    /// Numeric code of validation failures. Producer failures carry none.
    pub fn code(self) -> Option<u8> {
        match self {
            ErrorKind::NonExistentDependency => Some(0),
            ErrorKind::CyclicDependency => Some(1),
            ErrorKind::ProducerFailure => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::NonExistentDependency => "Non existent dependencies",
            ErrorKind::CyclicDependency => "Cyclic dependencies",
            ErrorKind::ProducerFailure => "Producer failure",
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum FlowError {
    #[error("Non existent dependencies of '{identifier}': {}", join(.dependencies))]
    NonExistentDependency {
        identifier: ArcStr,
        dependencies: Vec<ArcStr>,
    },

    #[error("Cyclic dependencies of '{identifier}': {}", join(.cycle))]
    CyclicDependency { identifier: ArcStr, cycle: Vec<ArcStr> },

    #[error("Task '{identifier}':\n{source}")]
    Producer {
        identifier: ArcStr,
        source: ProducerError,
    },

    #[error("Task '{0}' does not exist")]
    UnknownTask(ArcStr),
}

fn join(items: &[ArcStr]) -> String {
    items
        .iter()
        .map(|item| item.as_ref())
        .collect::<Vec<_>>()
        .join(", ")
}

impl FlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::NonExistentDependency { .. } | FlowError::UnknownTask(_) => {
                ErrorKind::NonExistentDependency
            }
            FlowError::CyclicDependency { .. } => ErrorKind::CyclicDependency,
            FlowError::Producer { .. } => ErrorKind::ProducerFailure,
        }
    }

    pub fn code(&self) -> Option<u8> {
        self.kind().code()
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// The identifier whose resolution failed.
    pub fn identifier(&self) -> &str {
        match self {
            FlowError::NonExistentDependency { identifier, .. }
            | FlowError::CyclicDependency { identifier, .. }
            | FlowError::Producer { identifier, .. }
            | FlowError::UnknownTask(identifier) => identifier,
        }
    }

    /// Offending identifiers of a validation failure, empty for producer
    /// failures.
    pub fn identifiers(&self) -> &[ArcStr] {
        match self {
            FlowError::NonExistentDependency { dependencies, .. } => dependencies,
            FlowError::CyclicDependency { cycle, .. } => cycle,
            FlowError::UnknownTask(identifier) => std::slice::from_ref(identifier),
            FlowError::Producer { .. } => &[],
        }
    }

    /// The original producer failure, if this is one.
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            FlowError::Producer { source, .. } => Some(source.inner()),
            _ => None,
        }
    }

    /// Flat `{kind, code, name, message, data}` view of this error.
    pub fn report(&self) -> ErrorReport {
        let data = match self {
            FlowError::Producer { source, .. } => serde_json::Value::String(source.to_string()),
            other => serde_json::Value::Array(
                other
                    .identifiers()
                    .iter()
                    .map(|id| serde_json::Value::String(id.to_string()))
                    .collect(),
            ),
        };

        ErrorReport {
            kind: self.kind(),
            code: self.code(),
            name: self.name(),
            message: self.to_string(),
            data,
        }
    }
}

/// Serializable form of a [`FlowError`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub code: Option<u8>,
    pub name: &'static str,
    pub message: String,
    pub data: serde_json::Value,
}

/// Malformed list-form task declaration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error("Task list is empty")]
    Empty,

    #[error("Task list declares dependencies but its last entry is not a producer")]
    MissingProducer,

    #[error("Entry at position {position} must be a dependency identifier")]
    MisplacedEntry { position: usize },
}
