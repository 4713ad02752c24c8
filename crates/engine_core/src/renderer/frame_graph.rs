// crates/engine_core/src/renderer/frame_graph.rs

use std::collections::HashMap;

use tracing::debug;

use super::render_item::RenderLayer;
use crate::error::FrameGraphError;

/// Logical resource identifier within one frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct GraphResource(pub u32);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResourceKind {
    /// Sampled texture produced by a compute pass.
    Texture,
    Color,
    Depth,
}

#[derive(Copy, Clone, Debug)]
pub struct GraphResourceDesc {
    pub id: GraphResource,
    pub name: &'static str,
    pub kind: ResourceKind,
}

/// What a pass does. The renderer matches on this; `name` is for logs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PassKind {
    WaveSimulation,
    Layer(RenderLayer),
    Blur,
    Present,
}

#[derive(Clone, Debug)]
pub struct PassDesc {
    pub name: &'static str,
    pub kind: PassKind,
    pub reads: Vec<GraphResource>,
    pub writes: Vec<GraphResource>,
}

/// Logical resource IDs used by the frame.
pub mod ids {
    use super::GraphResource;

    /// Curr wave texture, the displacement map of the Waves layer.
    pub const DISPLACEMENT: GraphResource = GraphResource(0);
    /// Color the layers draw into: the back buffer, or the offscreen
    /// target when post-processing.
    pub const SCENE_COLOR: GraphResource = GraphResource(1);
    pub const SCENE_DEPTH: GraphResource = GraphResource(2);
    /// Blurred scene, copied to the back buffer by Present.
    pub const BLURRED_COLOR: GraphResource = GraphResource(3);
}

const RESOURCES: &[GraphResourceDesc] = &[
    GraphResourceDesc {
        id: ids::DISPLACEMENT,
        name: "Displacement",
        kind: ResourceKind::Texture,
    },
    GraphResourceDesc {
        id: ids::SCENE_COLOR,
        name: "SceneColor",
        kind: ResourceKind::Color,
    },
    GraphResourceDesc {
        id: ids::SCENE_DEPTH,
        name: "SceneDepth",
        kind: ResourceKind::Depth,
    },
    GraphResourceDesc {
        id: ids::BLURRED_COLOR,
        name: "BlurredColor",
        kind: ResourceKind::Color,
    },
];

/// Static pass sequence of a frame, validated once at build time.
///
/// Wave simulation, then one pass per enabled layer in draw order, the
/// optional blur, then present.
#[derive(Clone, Debug)]
pub struct FrameGraph {
    resources: Vec<GraphResourceDesc>,
    passes: Vec<PassDesc>,
}

impl FrameGraph {
    pub fn for_layers(layers: &[RenderLayer]) -> Result<Self, FrameGraphError> {
        Self::build(layers, false)
    }

    /// With `blur`, a Blur pass runs after the layers and Present reads its
    /// output instead of the scene color.
    pub fn build(layers: &[RenderLayer], blur: bool) -> Result<Self, FrameGraphError> {
        use ids::*;

        let mut passes = Vec::with_capacity(layers.len() + 3);
        passes.push(PassDesc {
            name: "WaveSimulation",
            kind: PassKind::WaveSimulation,
            reads: Vec::new(),
            writes: vec![DISPLACEMENT],
        });
        for &layer in layers {
            let reads = if layer == RenderLayer::Waves {
                vec![DISPLACEMENT]
            } else {
                Vec::new()
            };
            passes.push(PassDesc {
                name: layer.name(),
                kind: PassKind::Layer(layer),
                reads,
                writes: vec![SCENE_COLOR, SCENE_DEPTH],
            });
        }
        let presented = if blur {
            passes.push(PassDesc {
                name: "Blur",
                kind: PassKind::Blur,
                reads: vec![SCENE_COLOR],
                writes: vec![BLURRED_COLOR],
            });
            BLURRED_COLOR
        } else {
            SCENE_COLOR
        };
        passes.push(PassDesc {
            name: "Present",
            kind: PassKind::Present,
            reads: vec![presented],
            writes: Vec::new(),
        });

        Self::new(RESOURCES.to_vec(), passes)
    }

    pub fn new(resources: Vec<GraphResourceDesc>, passes: Vec<PassDesc>) -> Result<Self, FrameGraphError> {
        validate_graph(&resources, &passes)?;
        debug!(target: "renderer", passes = passes.len(), "frame graph validated");
        Ok(Self { resources, passes })
    }

    pub fn passes(&self) -> &[PassDesc] {
        &self.passes
    }

    pub fn resources(&self) -> &[GraphResourceDesc] {
        &self.resources
    }

    /// Layers in the order their passes run.
    pub fn layer_order(&self) -> Vec<RenderLayer> {
        self.passes
            .iter()
            .filter_map(|p| match p.kind {
                PassKind::Layer(layer) => Some(layer),
                _ => None,
            })
            .collect()
    }
}

/// Checks the logical DAG:
///
/// - resource IDs are unique and every referenced ID exists;
/// - nothing is read before its first write in pass order.
fn validate_graph(resources: &[GraphResourceDesc], passes: &[PassDesc]) -> Result<(), FrameGraphError> {
    let mut resource_index: HashMap<GraphResource, usize> = HashMap::new();
    for (idx, r) in resources.iter().enumerate() {
        if resource_index.insert(r.id, idx).is_some() {
            return Err(FrameGraphError::DuplicateResource(r.name));
        }
    }

    let mut first_read: HashMap<GraphResource, (usize, &'static str)> = HashMap::new();
    let mut first_write: HashMap<GraphResource, usize> = HashMap::new();

    for (pass_idx, pass) in passes.iter().enumerate() {
        for &rid in pass.reads.iter().chain(&pass.writes) {
            if !resource_index.contains_key(&rid) {
                return Err(FrameGraphError::UnknownResource {
                    pass: pass.name,
                    id: rid.0,
                });
            }
        }
        for &rid in &pass.reads {
            first_read.entry(rid).or_insert((pass_idx, pass.name));
        }
        for &rid in &pass.writes {
            first_write.entry(rid).or_insert(pass_idx);
        }
    }

    for (rid, &(read_idx, pass)) in &first_read {
        let written_before = first_write.get(rid).is_some_and(|&w| w < read_idx);
        if !written_before {
            return Err(FrameGraphError::ReadBeforeWrite {
                pass,
                resource: resources[resource_index[rid]].name,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_passes_follow_the_draw_order() {
        let layers = RenderLayer::draw_order(&[RenderLayer::Icosahedron]);
        let graph = FrameGraph::for_layers(&layers).unwrap();
        assert_eq!(graph.layer_order(), layers);
        assert_eq!(graph.passes().first().unwrap().kind, PassKind::WaveSimulation);
        assert_eq!(graph.passes().last().unwrap().kind, PassKind::Present);
    }

    #[test]
    fn blur_runs_between_the_layers_and_present() {
        let layers = RenderLayer::draw_order(&[]);
        let graph = FrameGraph::build(&layers, true).unwrap();
        let kinds: Vec<PassKind> = graph.passes().iter().map(|p| p.kind).collect();
        assert_eq!(kinds[kinds.len() - 2], PassKind::Blur);
        assert_eq!(kinds[kinds.len() - 1], PassKind::Present);
        assert_eq!(graph.passes().last().unwrap().reads, vec![ids::BLURRED_COLOR]);
        assert_eq!(graph.layer_order(), layers);

        let plain = FrameGraph::for_layers(&layers).unwrap();
        assert!(plain.passes().iter().all(|p| p.kind != PassKind::Blur));
    }

    #[test]
    fn read_before_write_is_rejected() {
        let passes = vec![
            PassDesc {
                name: "Waves",
                kind: PassKind::Layer(RenderLayer::Waves),
                reads: vec![ids::DISPLACEMENT],
                writes: vec![ids::SCENE_COLOR],
            },
            PassDesc {
                name: "WaveSimulation",
                kind: PassKind::WaveSimulation,
                reads: vec![],
                writes: vec![ids::DISPLACEMENT],
            },
        ];
        assert_eq!(
            FrameGraph::new(RESOURCES.to_vec(), passes).unwrap_err(),
            FrameGraphError::ReadBeforeWrite {
                pass: "Waves",
                resource: "Displacement"
            }
        );
    }

    #[test]
    fn unknown_and_duplicate_resources_are_rejected() {
        let passes = vec![PassDesc {
            name: "Bogus",
            kind: PassKind::Present,
            reads: vec![],
            writes: vec![GraphResource(42)],
        }];
        assert_eq!(
            FrameGraph::new(RESOURCES.to_vec(), passes).unwrap_err(),
            FrameGraphError::UnknownResource { pass: "Bogus", id: 42 }
        );

        let mut dup = RESOURCES.to_vec();
        dup.push(RESOURCES[0]);
        assert_eq!(
            FrameGraph::new(dup, Vec::new()).unwrap_err(),
            FrameGraphError::DuplicateResource("Displacement")
        );
    }
}
