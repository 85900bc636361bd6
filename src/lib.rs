#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod core;
mod engine;
mod error;
mod flow;
#[cfg(feature = "logging")]
pub mod logging;
mod spec;

pub use crate::core::{ArcStr, Concurrency, Deps, Results};
pub use crate::engine::{Diagnostics, Resolver, TaskExecution};
pub use crate::error::*;
pub use crate::flow::{FlowConfig, TaskBinder, TaskDef};
pub use crate::spec::{Entry, ProducerFn, TaskResult, TaskSpec};

/// Resolve every task of `flow` and collect their values.
///
/// Producers run at most `concurrency` at a time, see [`Concurrency`] for how
/// the limit is interpreted. The returned mapping holds every identifier of
/// the flow. Any single failure fails the whole call.
pub async fn props<T>(
    flow: &FlowConfig<T>,
    concurrency: impl Into<Concurrency>,
) -> Result<Results<T>, FlowError>
where
    T: Clone + Send + Sync + 'static,
{
    Resolver::new(flow).concurrency(concurrency).resolve().await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn example() -> FlowConfig<String> {
        let mut flow = FlowConfig::new();
        flow.task("syncProp").value("sync prop".to_string());
        flow.task("syncFn").run(|| Ok("sync fn".to_string()));
        flow.task("asyncFn").run_async(|| async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            anyhow::Ok("async fn".to_string())
        });
        flow.task("dependencyFn")
            .depends_on(["syncFn", "asyncFn"])
            .run(|deps| Ok(format!("{} - {}", deps["syncFn"], deps["asyncFn"])));
        flow
    }

    #[tokio::test]
    async fn resolves_mixed_flow() {
        let results = props(&example(), Concurrency::Unbounded).await.unwrap();

        let expected = [
            ("asyncFn", "async fn"),
            ("dependencyFn", "sync fn - async fn"),
            ("syncFn", "sync fn"),
            ("syncProp", "sync prop"),
        ];

        assert_eq!(results.len(), expected.len());
        for (id, value) in expected {
            assert_eq!(results[id], value);
        }
    }

    #[tokio::test]
    async fn resolves_with_limit_of_one() {
        let results = props(&example(), 1usize).await.unwrap();
        assert_eq!(results["dependencyFn"], "sync fn - async fn");
    }

    #[tokio::test]
    async fn missing_dependency_code() {
        let mut flow = FlowConfig::<String>::new();
        flow.task("a").depends_on(["b"]).run(|_| Ok(String::new()));

        let err = props(&flow, Concurrency::Unbounded).await.unwrap_err();
        assert_eq!(err.code(), Some(0));
        assert_eq!(err.identifiers(), [ArcStr::from("b")]);
    }

    #[tokio::test]
    async fn mutual_cycle_code() {
        let mut flow = FlowConfig::<String>::new();
        flow.task("fnOne").depends_on(["fnTwo"]).run(|_| Ok(String::new()));
        flow.task("fnTwo").depends_on(["fnOne"]).run(|_| Ok(String::new()));

        let err = props(&flow, Concurrency::Unbounded).await.unwrap_err();
        assert_eq!(err.code(), Some(1));
        assert_eq!(err.name(), "Cyclic dependencies");
    }

    #[tokio::test]
    async fn json_values() {
        let mut flow = FlowConfig::new();
        flow.task("name").value(serde_json::json!("flow"));
        flow.task("size").run(|| Ok(serde_json::json!(3)));
        flow.task("summary").depends_on(["name", "size"]).run(|deps| {
            Ok(serde_json::json!({ "name": deps["name"], "size": deps["size"] }))
        });

        let results = props(&flow, Concurrency::Unbounded).await.unwrap();
        assert_eq!(
            results["summary"],
            serde_json::json!({ "name": "flow", "size": 3 })
        );
    }
}
