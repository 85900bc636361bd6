use std::collections::{BTreeMap, HashMap};
use std::future::Future;

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::core::{ArcStr, Deps};
use crate::error::{FlowError, SpecError};
use crate::spec::{Entry, TaskResult, TaskSpec};

/// The set of tasks to resolve, keyed by identifier.
///
/// Tasks are added either directly as [`TaskSpec`]s or through the
/// [`FlowConfig::task`] builder, and wired together by naming each other's
/// identifiers as dependencies. Identifiers are kept in sorted order, so the
/// order in which tasks were added never changes the outcome.
///
/// # Example
///
/// ```rust
/// use flowprops::FlowConfig;
///
/// let mut flow = FlowConfig::<String>::new();
/// flow.task("syncProp").value("sync prop".to_string());
/// flow.task("syncFn").run(|| Ok("sync fn".to_string()));
/// flow.task("dependencyFn")
///     .depends_on(["syncProp", "syncFn"])
///     .run(|deps| Ok(format!("{} - {}", deps["syncProp"], deps["syncFn"])));
///
/// assert_eq!(flow.len(), 3);
/// ```
pub struct FlowConfig<T = serde_json::Value> {
    pub(crate) tasks: BTreeMap<ArcStr, TaskSpec<T>>,
}

impl<T> FlowConfig<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
        }
    }

    /// Start declaring the task named `id`. A previous declaration under the
    /// same identifier is replaced.
    pub fn task(&mut self, id: impl Into<ArcStr>) -> TaskDef<'_, T> {
        TaskDef {
            flow: self,
            id: id.into(),
        }
    }

    pub fn insert(&mut self, id: impl Into<ArcStr>, spec: TaskSpec<T>) -> Option<TaskSpec<T>> {
        self.tasks.insert(id.into(), spec)
    }

    /// Insert a task declared in list form, see [`TaskSpec::from_entries`].
    pub fn insert_entries(
        &mut self,
        id: impl Into<ArcStr>,
        entries: Vec<Entry<T>>,
    ) -> Result<&mut Self, SpecError> {
        let spec = TaskSpec::from_entries(entries)?;
        self.tasks.insert(id.into(), spec);
        Ok(self)
    }

    pub fn get(&self, id: &str) -> Option<&TaskSpec<T>> {
        self.tasks.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &ArcStr> {
        self.tasks.keys()
    }

    /// Check the whole configuration without running anything.
    ///
    /// Resolution performs the same checks lazily, identifier by identifier.
    /// This is for callers who want to reject a configuration up front.
    pub fn validate(&self) -> Result<(), FlowError> {
        for (id, spec) in &self.tasks {
            crate::engine::check_existence(self, id, spec.dependencies())?;
        }

        let graph = self.graph();
        for scc in petgraph::algo::tarjan_scc(&graph) {
            let is_cycle = match scc.as_slice() {
                [single] => graph.contains_edge(*single, *single),
                _ => true,
            };

            if is_cycle {
                let mut cycle: Vec<ArcStr> = scc.iter().map(|&i| graph[i].clone()).collect();
                cycle.sort();
                return Err(FlowError::CyclicDependency {
                    identifier: cycle[0].clone(),
                    cycle,
                });
            }
        }

        Ok(())
    }

    /// Dependency graph with an edge from every dependency to its dependent.
    /// Dependencies absent from the configuration are left out.
    pub(crate) fn graph(&self) -> Graph<ArcStr, ()> {
        let mut graph = Graph::with_capacity(self.tasks.len(), 0);

        let indices: HashMap<&ArcStr, NodeIndex> = self
            .tasks
            .keys()
            .map(|id| (id, graph.add_node(id.clone())))
            .collect();

        for (id, spec) in &self.tasks {
            for dependency in spec.dependencies() {
                if let Some(&source) = indices.get(dependency) {
                    graph.add_edge(source, indices[id], ());
                }
            }
        }

        graph
    }
}

impl<T> Default for FlowConfig<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> FromIterator<(S, TaskSpec<T>)> for FlowConfig<T>
where
    S: Into<ArcStr>,
{
    fn from_iter<I: IntoIterator<Item = (S, TaskSpec<T>)>>(iter: I) -> Self {
        Self {
            tasks: iter.into_iter().map(|(id, spec)| (id.into(), spec)).collect(),
        }
    }
}

impl<T> std::fmt::Debug for FlowConfig<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.tasks.iter()).finish()
    }
}

impl<T> std::fmt::Display for FlowConfig<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        let graph = self.graph();

        for index in graph.node_indices() {
            let name = graph[index].replace('"', "\\\"");
            writeln!(f, "    {:?}[\"{}\"]", index.index(), name)?;
        }

        for edge in graph.edge_indices() {
            if let Some((source, target)) = graph.edge_endpoints(edge) {
                writeln!(f, "    {:?} --> {:?}", source.index(), target.index())?;
            }
        }

        Ok(())
    }
}

/// A task being declared with [`FlowConfig::task`].
pub struct TaskDef<'a, T> {
    flow: &'a mut FlowConfig<T>,
    id: ArcStr,
}

impl<'a, T> TaskDef<'a, T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Declare the task as a constant.
    pub fn value(self, value: T) {
        self.flow.insert(self.id, TaskSpec::constant(value));
    }

    /// Declare the task with a synchronous producer.
    pub fn run<F>(self, callback: F)
    where
        F: Fn() -> TaskResult<T> + Send + Sync + 'static,
    {
        self.flow.insert(self.id, TaskSpec::from_fn(callback));
    }

    /// Declare the task with an async producer.
    pub fn run_async<F, Fut>(self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult<T>> + Send + 'static,
    {
        self.flow.insert(self.id, TaskSpec::from_async(callback));
    }

    /// Name the tasks whose values the producer needs.
    pub fn depends_on<I, S>(self, dependencies: I) -> TaskBinder<'a, T>
    where
        I: IntoIterator<Item = S>,
        S: Into<ArcStr>,
    {
        TaskBinder {
            flow: self.flow,
            id: self.id,
            dependencies: dependencies.into_iter().map(Into::into).collect(),
        }
    }
}

/// A task with declared dependencies, waiting for its producer.
pub struct TaskBinder<'a, T> {
    flow: &'a mut FlowConfig<T>,
    id: ArcStr,
    dependencies: Vec<ArcStr>,
}

impl<'a, T> TaskBinder<'a, T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Finish the declaration with a synchronous producer.
    pub fn run<F>(self, callback: F)
    where
        F: Fn(&Deps<T>) -> TaskResult<T> + Send + Sync + 'static,
    {
        let spec = TaskSpec::dependent(self.dependencies, callback);
        self.flow.insert(self.id, spec);
    }

    /// Finish the declaration with an async producer.
    pub fn run_async<F, Fut>(self, callback: F)
    where
        F: Fn(Deps<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult<T>> + Send + 'static,
    {
        let spec = TaskSpec::dependent_async(self.dependencies, callback);
        self.flow.insert(self.id, spec);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn chain(flow: &mut FlowConfig<u32>, id: &str, deps: &[&str]) {
        flow.task(id)
            .depends_on(deps.iter().copied())
            .run(|deps| Ok(deps.iter().map(|(_, v)| v).sum::<u32>() + 1));
    }

    #[test]
    fn valid_flow() {
        let mut flow = FlowConfig::new();
        flow.task("a").value(1);
        chain(&mut flow, "b", &["a"]);
        chain(&mut flow, "c", &["a", "b"]);

        assert!(flow.validate().is_ok());
    }

    #[test]
    fn validate_reports_missing_dependencies() {
        let mut flow = FlowConfig::new();
        chain(&mut flow, "a", &["b", "c"]);
        flow.task("c").value(1);

        let err = flow.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NonExistentDependency);
        assert_eq!(err.identifier(), "a");
        assert_eq!(err.identifiers(), [ArcStr::from("b")]);
    }

    #[test]
    fn validate_reports_long_cycles() {
        let mut flow = FlowConfig::new();
        chain(&mut flow, "a", &["c"]);
        chain(&mut flow, "b", &["a"]);
        chain(&mut flow, "c", &["b"]);
        chain(&mut flow, "d", &[]);

        let err = flow.validate().unwrap_err();
        assert_eq!(err.code(), Some(1));
        let cycle: Vec<&str> = err.identifiers().iter().map(AsRef::as_ref).collect();
        assert_eq!(cycle, ["a", "b", "c"]);
    }

    #[test]
    fn validate_reports_self_dependency() {
        let mut flow = FlowConfig::new();
        chain(&mut flow, "a", &["a"]);

        let err = flow.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CyclicDependency);
        assert_eq!(err.identifier(), "a");
    }

    #[test]
    fn builder_replaces_previous_declaration() {
        let mut flow = FlowConfig::new();
        flow.task("a").value(1);
        flow.task("a").value(2);

        assert_eq!(flow.len(), 1);
        assert!(matches!(flow.get("a"), Some(TaskSpec::Constant(2))));
    }

    #[test]
    fn mermaid_rendering() {
        let mut flow = FlowConfig::new();
        flow.task("a").value(1);
        chain(&mut flow, "b", &["a"]);

        let rendered = flow.to_string();
        assert!(rendered.starts_with("graph LR\n"));
        assert!(rendered.contains("0[\"a\"]"));
        assert!(rendered.contains("1[\"b\"]"));
        assert!(rendered.contains("0 --> 1"));
    }
}
