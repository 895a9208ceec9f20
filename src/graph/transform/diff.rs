//! Seeds the apply graph from a computed diff.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::trace;

use crate::addrs::AbsResource;
use crate::dag::Edge;
use crate::error::Result;
use crate::graph::EngineGraph;
use crate::graph::node::{GraphNode, ResourceForm};
use crate::state::{ChangeKind, Diff};

use super::GraphTransformer;

/// Adds resource vertices for every instance change in the diff: one
/// apply vertex per resource with create/update/read work, one destroy
/// vertex per resource with destruction work.
///
/// For a replacement the pair is ordered destroy-then-create by default;
/// the create-before-destroy transformer flips the pairs that asked for
/// it.
pub struct DiffTransformer {
    /// The plan being applied.
    pub diff: Arc<Diff>,
}

impl GraphTransformer for DiffTransformer {
    fn name(&self) -> &'static str {
        "DiffTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        for module in &self.diff.modules {
            // Group instance diffs by base resource address.
            let mut wants_apply: BTreeMap<String, bool> = BTreeMap::new();
            let mut wants_destroy: BTreeMap<String, bool> = BTreeMap::new();
            for (local_key, instance_diff) in &module.resources {
                if instance_diff.is_empty() {
                    continue;
                }
                let base = base_of(local_key).to_string();
                match instance_diff.change {
                    ChangeKind::Create | ChangeKind::Update | ChangeKind::Read => {
                        wants_apply.insert(base, true);
                    }
                    ChangeKind::Replace => {
                        wants_apply.insert(base.clone(), true);
                        wants_destroy.insert(base, true);
                    }
                    ChangeKind::Destroy => {
                        wants_destroy.insert(base, true);
                    }
                    ChangeKind::None => {}
                }
                if instance_diff.destroy_deposed.is_some() {
                    let base = base_of(local_key).to_string();
                    wants_destroy.insert(base, true);
                }
            }

            for base in wants_apply.keys() {
                let Ok(addr) = parse_in_module(base, &module.path) else {
                    continue;
                };
                trace!(resource = %addr, "adding apply vertex from diff");
                graph.add_vertex(GraphNode::Resource {
                    addr,
                    form: ResourceForm::Apply,
                    config: None,
                    state: Vec::new(),
                    resolved_provider: None,
                });
            }
            for base in wants_destroy.keys() {
                let Ok(addr) = parse_in_module(base, &module.path) else {
                    continue;
                };
                trace!(resource = %addr, "adding destroy vertex from diff");
                let destroy_id = graph.add_vertex(GraphNode::Resource {
                    addr: addr.clone(),
                    form: ResourceForm::Destroy,
                    config: None,
                    state: Vec::new(),
                    resolved_provider: None,
                });
                // Replacement default: the new instance is created only
                // after the old one is gone.
                if wants_apply.contains_key(base) {
                    let apply_id = graph.vertices().find_map(|(id, v)| match v {
                        GraphNode::Resource {
                            addr: a,
                            form: ResourceForm::Apply,
                            ..
                        } if a.to_string() == addr.to_string() => Some(id),
                        _ => None,
                    });
                    if let Some(apply_id) = apply_id {
                        graph.connect(Edge::new(apply_id, destroy_id));
                    }
                }
            }
        }
        Ok(())
    }
}

fn base_of(local_key: &str) -> &str {
    let end = local_key
        .find('[')
        .or_else(|| local_key.find("(deposed "))
        .unwrap_or(local_key.len());
    &local_key[..end]
}

fn parse_in_module(base: &str, module: &crate::addrs::ModulePath) -> Result<AbsResource> {
    let mut abs = AbsResource::parse(base)?;
    abs.module = module.clone();
    Ok(abs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::ModulePath;
    use crate::state::InstanceDiff;

    #[test]
    fn test_replace_gets_paired_vertices() {
        let mut diff = Diff::new();
        diff.module_mut(&ModulePath::root()).resources.insert(
            String::from("p_thing.a"),
            InstanceDiff {
                change: ChangeKind::Replace,
                attributes: BTreeMap::new(),
                destroy_deposed: None,
                create_before_destroy: false,
            },
        );

        let mut graph = EngineGraph::new();
        DiffTransformer {
            diff: Arc::new(diff),
        }
        .transform(&mut graph)
        .expect("transform");

        assert_eq!(graph.len(), 2);
        let (apply_id, _) = graph
            .vertices()
            .find(|(_, v)| v.resource_form() == Some(ResourceForm::Apply))
            .expect("apply vertex");
        let (destroy_id, _) = graph
            .vertices()
            .find(|(_, v)| v.resource_form() == Some(ResourceForm::Destroy))
            .expect("destroy vertex");
        // Create depends on destroy by default.
        assert!(graph.down_edges(apply_id).contains(&destroy_id));
    }

    #[test]
    fn test_empty_changes_are_ignored(){
        let mut diff = Diff::new();
        diff.module_mut(&ModulePath::root()).resources.insert(
            String::from("p_thing.a"),
            InstanceDiff {
                change: ChangeKind::None,
                attributes: BTreeMap::new(),
                destroy_deposed: None,
                create_before_destroy: false,
            },
        );
        let mut graph = EngineGraph::new();
        DiffTransformer {
            diff: Arc::new(diff),
        }
        .transform(&mut graph)
        .expect("transform");
        assert!(graph.is_empty());
    }
}
