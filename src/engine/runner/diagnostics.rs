use std::collections::HashMap;
use std::fmt::Write;

use crate::core::ArcStr;
use crate::engine::TaskExecution;
use crate::flow::FlowConfig;

/// Timing information about a single resolution.
///
/// Returned by [`Resolver::resolve_with_diagnostics`](crate::Resolver::resolve_with_diagnostics).
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// Start and duration of every producer that ran.
    pub execution_times: HashMap<ArcStr, TaskExecution>,
    /// Highest number of producers that were running at the same time.
    pub peak_concurrency: usize,
}

impl Diagnostics {
    /// Renders the flow as a Mermaid diagram, color-coded by producer duration.
    ///
    /// * **Green**: Fast
    /// * **Yellow**: Moderate
    /// * **Red**: Slow
    /// * **Grey**: Never ran
    pub fn render_mermaid<T>(&self, flow: &FlowConfig<T>) -> String
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut f = String::new();
        let _ = writeln!(f, "graph LR");

        let times = &self.execution_times;
        let (min_time, max_time) = times
            .values()
            .map(|t| t.duration.as_secs_f64())
            .fold(None, |acc: Option<(f64, f64)>, secs| match acc {
                None => Some((secs, secs)),
                Some((lo, hi)) => Some((lo.min(secs), hi.max(secs))),
            })
            .unwrap_or((0.0, 0.0));

        // all producers took the same time
        let span = if (max_time - min_time).abs() < f64::EPSILON {
            1.0
        } else {
            max_time - min_time
        };

        let graph = flow.graph();

        for index in graph.node_indices() {
            let id = &graph[index];
            let name = id.replace('"', "\\\"");

            let (label, color) = match times.get(id) {
                Some(exec) => {
                    let t = (exec.duration.as_secs_f64() - min_time) / span;
                    (format!("{:.2?}", exec.duration), heat(t))
                }
                None => ("Skipped".to_string(), "#D3D3D3".to_string()),
            };

            let _ = writeln!(f, "    {:?}[\"{}\\n{}\"]", index.index(), name, label);
            let _ = writeln!(f, "    style {:?} fill:{}", index.index(), color);
        }

        for edge in graph.edge_indices() {
            if let Some((source, target)) = graph.edge_endpoints(edge) {
                let _ = writeln!(f, "    {:?} --> {:?}", source.index(), target.index());
            }
        }

        f
    }
}

/// Green (0.0) through yellow (0.5) to red (1.0).
fn heat(t: f64) -> String {
    let (r, g) = if t < 0.5 {
        ((255.0 * t * 2.0) as u8, 255)
    } else {
        (255, (255.0 * (1.0 - (t - 0.5) * 2.0)) as u8)
    };

    format!("#{:02X}{:02X}00", r, g)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    fn execution(start: Instant, millis: u64) -> TaskExecution {
        TaskExecution {
            start,
            duration: Duration::from_millis(millis),
        }
    }

    #[test]
    fn heat_endpoints() {
        assert_eq!(heat(0.0), "#00FF00");
        assert_eq!(heat(0.5), "#FFFF00");
        assert_eq!(heat(1.0), "#FF0000");
    }

    #[test]
    fn mermaid_marks_skipped_tasks() {
        let mut flow = FlowConfig::<u32>::new();
        flow.task("a").value(1);
        flow.task("b").depends_on(["a"]).run(|deps| Ok(deps["a"] + 1));

        let mut diagnostics = Diagnostics::default();
        diagnostics
            .execution_times
            .insert("a".into(), execution(Instant::now(), 2));

        let rendered = diagnostics.render_mermaid(&flow);
        assert!(rendered.contains("0[\"a\\n2.00ms\"]"));
        assert!(rendered.contains("1[\"b\\nSkipped\"]"));
        assert!(rendered.contains("0 --> 1"));
    }
}
