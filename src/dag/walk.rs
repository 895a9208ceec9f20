//! Concurrent traversal of a graph in dependency order.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, trace, warn};

use crate::diag::Diagnostics;

use super::graph::{Graph, Vertex, VertexId};

/// The result of visiting one vertex.
#[derive(Debug)]
pub enum VisitOutcome {
    /// The vertex completed; dependents may run.
    Ok,
    /// The vertex completed with diagnostics to surface at the end of the
    /// walk; dependents may run.
    NonFatal(Diagnostics),
    /// The vertex failed; its transitive dependents are skipped, other
    /// branches keep walking.
    Fatal(Diagnostics),
}

/// Visits vertices during a walk.
#[async_trait]
pub trait GraphVisitor<V>: Send + Sync {
    /// Visits a single vertex. Called only after every dependency of the
    /// vertex completed successfully.
    async fn visit(&self, vertex: &V) -> VisitOutcome;
}

/// Summary of a completed walk.
#[derive(Debug, Default)]
pub struct WalkReport {
    /// Every diagnostic surfaced during the walk, fatal and non-fatal.
    pub diagnostics: Diagnostics,
    /// Names of vertices that were visited, in completion order.
    pub visited: Vec<String>,
    /// Names of vertices that failed.
    pub failed: Vec<String>,
    /// Names of vertices skipped because a dependency failed.
    pub skipped: Vec<String>,
}

impl WalkReport {
    /// Returns true if any vertex failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

impl<V> Graph<V>
where
    V: Vertex + Clone + Send + Sync + 'static,
{
    /// Walks the graph, visiting dependencies before dependents.
    ///
    /// At most `parallelism` visits run at once. Ready siblings are
    /// admitted in vertex-name order, so a walk at parallelism 1 is fully
    /// deterministic. A fatal outcome skips the failing vertex's
    /// transitive dependents; unrelated branches still complete.
    pub async fn walk<W>(&self, visitor: Arc<W>, parallelism: usize) -> WalkReport
    where
        W: GraphVisitor<V> + 'static,
    {
        let mut report = WalkReport::default();
        if self.is_empty() {
            return report;
        }

        let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
        let (tx, mut rx) = mpsc::unbounded_channel::<(VertexId, VisitOutcome)>();

        let mut pending: HashMap<VertexId, usize> = HashMap::new();
        let mut ready: BTreeMap<(String, VertexId), VertexId> = BTreeMap::new();
        for id in self.vertex_ids() {
            let deps = self.down_edges(id).len();
            pending.insert(id, deps);
            if deps == 0 {
                ready.insert((self.vertex_name(id), id), id);
            }
        }

        let mut doomed: HashSet<VertexId> = HashSet::new();
        let mut in_flight = 0_usize;

        loop {
            // Admit ready vertices in name order, skipping doomed ones.
            while let Some((_, id)) = ready.pop_first() {
                if doomed.contains(&id) {
                    report.skipped.push(self.vertex_name(id));
                    self.release_dependents(id, &mut pending, &mut ready);
                    continue;
                }
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return report,
                };
                let vertex = match self.vertex(id) {
                    Some(vertex) => vertex.clone(),
                    None => continue,
                };
                let name = self.vertex_name(id);
                trace!(vertex = %name, "starting visit");
                let visitor = Arc::clone(&visitor);
                let tx = tx.clone();
                in_flight += 1;
                tokio::spawn(async move {
                    let outcome = visitor.visit(&vertex).await;
                    drop(permit);
                    // The receiver only goes away when the walk aborts.
                    let _ = tx.send((id, outcome));
                });
            }

            if in_flight == 0 {
                break;
            }

            let Some((id, outcome)) = rx.recv().await else {
                break;
            };
            in_flight -= 1;
            let name = self.vertex_name(id);
            match outcome {
                VisitOutcome::Ok => {
                    trace!(vertex = %name, "visit complete");
                    report.visited.push(name);
                }
                VisitOutcome::NonFatal(diags) => {
                    debug!(vertex = %name, count = diags.len(), "visit completed with diagnostics");
                    report.diagnostics.extend(diags);
                    report.visited.push(name);
                }
                VisitOutcome::Fatal(diags) => {
                    warn!(vertex = %name, "visit failed; skipping dependents");
                    report.diagnostics.extend(diags);
                    report.failed.push(name);
                    for dependent in self.ancestors(id) {
                        doomed.insert(dependent);
                    }
                }
            }
            self.release_dependents(id, &mut pending, &mut ready);
        }

        report
    }

    /// Marks one vertex as settled, moving any dependent whose
    /// dependencies are now all settled into the ready set.
    fn release_dependents(
        &self,
        id: VertexId,
        pending: &mut HashMap<VertexId, usize>,
        ready: &mut BTreeMap<(String, VertexId), VertexId>,
    ) {
        let consumers: BTreeSet<VertexId> = self.up_edges(id);
        for consumer in consumers {
            if let Some(remaining) = pending.get_mut(&consumer) {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    ready.insert((self.vertex_name(consumer), consumer), consumer);
                }
            }
        }
    }
}
