use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::ops::Index;

/// Atomic reference-counted string type used for identifiers.
pub type ArcStr = std::sync::Arc<str>;

/// Upper bound on how many producers may run at the same time during a single
/// resolution.
///
/// Anything that is not a positive integer means there is no bound, so
/// `Concurrency::from(0)` and `Concurrency::from_raw(-3)` are both
/// [`Concurrency::Unbounded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    /// Only dependency order constrains when producers start.
    #[default]
    Unbounded,
    /// At most `n` producers are running at any time.
    Limited(NonZeroUsize),
}

impl Concurrency {
    /// At most `n` producers at a time, unbounded when `n` is zero.
    pub fn limited(n: usize) -> Self {
        NonZeroUsize::new(n).map_or(Concurrency::Unbounded, Concurrency::Limited)
    }

    /// Interpret an untrusted signed value, treating non-positive input as
    /// unbounded.
    pub fn from_raw(n: i64) -> Self {
        usize::try_from(n).map_or(Concurrency::Unbounded, Concurrency::limited)
    }

    pub(crate) fn permits(self) -> usize {
        match self {
            Concurrency::Unbounded => usize::MAX,
            Concurrency::Limited(n) => n.get(),
        }
    }
}

impl From<usize> for Concurrency {
    fn from(n: usize) -> Self {
        Concurrency::limited(n)
    }
}

impl From<NonZeroUsize> for Concurrency {
    fn from(n: NonZeroUsize) -> Self {
        Concurrency::Limited(n)
    }
}

impl From<Option<usize>> for Concurrency {
    fn from(n: Option<usize>) -> Self {
        n.map_or(Concurrency::Unbounded, Concurrency::limited)
    }
}

/// Resolved values of the dependencies a task declared, handed to its
/// producer.
#[derive(Debug, Clone)]
pub struct Deps<T> {
    pub(crate) values: HashMap<ArcStr, T>,
}

impl<T> Deps<T> {
    pub(crate) fn empty() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.values.get(id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.values.iter().map(|(k, v)| (k.as_ref(), v))
    }

    pub fn into_inner(self) -> HashMap<ArcStr, T> {
        self.values
    }
}

impl<T> Index<&str> for Deps<T> {
    type Output = T;

    /// # Panics
    /// When `id` was not declared as a dependency of the task.
    fn index(&self, id: &str) -> &T {
        match self.values.get(id) {
            Some(value) => value,
            None => panic!("'{id}' is not a declared dependency"),
        }
    }
}

/// The final identifier to value mapping of a successful resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Results<T> {
    pub(crate) values: BTreeMap<ArcStr, T>,
}

impl<T> Results<T> {
    pub fn get(&self, id: &str) -> Option<&T> {
        self.values.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.values.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.values.iter().map(|(k, v)| (k.as_ref(), v))
    }

    pub fn into_inner(self) -> BTreeMap<ArcStr, T> {
        self.values
    }
}

impl<T> Index<&str> for Results<T> {
    type Output = T;

    /// # Panics
    /// When `id` was not part of the resolution.
    fn index(&self, id: &str) -> &T {
        match self.values.get(id) {
            Some(value) => value,
            None => panic!("'{id}' was not resolved"),
        }
    }
}

impl<T> IntoIterator for Results<T> {
    type Item = (ArcStr, T);
    type IntoIter = std::collections::btree_map::IntoIter<ArcStr, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_concurrency_is_unbounded() {
        assert_eq!(Concurrency::from(0usize), Concurrency::Unbounded);
        assert_eq!(Concurrency::from_raw(0), Concurrency::Unbounded);
        assert_eq!(Concurrency::from_raw(-4), Concurrency::Unbounded);
        assert_eq!(Concurrency::from(None), Concurrency::Unbounded);
        assert_eq!(Concurrency::default(), Concurrency::Unbounded);
    }

    #[test]
    fn positive_concurrency_is_limited() {
        assert_eq!(Concurrency::from_raw(3).permits(), 3);
        assert_eq!(Concurrency::from(Some(2usize)).permits(), 2);
        assert_eq!(Concurrency::Unbounded.permits(), usize::MAX);
    }
}
