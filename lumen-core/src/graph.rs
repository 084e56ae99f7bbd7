//! Pass graph for one frame.
//!
//! ## Usage
//!
//! Declare every pass with the resources it reads and writes, then call
//! [`PassGraph::plan`] to get the recording order. Two passes whose resource
//! sets intersect with at least one write are ordered in declaration order;
//! independent passes keep declaration order as a tie-break, so the plan is
//! deterministic.

use std::{cmp::Reverse, collections::BinaryHeap, fmt};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::{
    buffer::BufferHandle,
    error::{PipelineError, Result},
    frame::FramePhase,
};

/// Resource identifier used by pass declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphResource {
    /// A buffer owned by the registry.
    Buffer(BufferHandle),
    /// The drawable target handed in by the presentation surface.
    Target,
}

impl fmt::Display for GraphResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(handle) => write!(f, "{handle:?}"),
            Self::Target => f.write_str("presentation target"),
        }
    }
}

/// Kind of GPU pass a declaration records into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Recorded inside a `wgpu::ComputePass`.
    Compute,
    /// Recorded inside a `wgpu::RenderPass` targeting [`GraphResource::Target`].
    Render,
}

/// Index of a pass inside its graph, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub usize);

/// Declaration of one pass: what it is and what it touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassDecl {
    /// Debug label.
    pub label: &'static str,
    /// Kind of GPU pass.
    pub kind: PassKind,
    /// Frame phase reached once the pass is recorded.
    pub phase: FramePhase,
    /// Resources read by the pass.
    pub reads: SmallVec<[GraphResource; 4]>,
    /// Resources written by the pass.
    pub writes: SmallVec<[GraphResource; 4]>,
}

impl PassDecl {
    /// Starts a compute pass declaration.
    pub fn compute(label: &'static str, phase: FramePhase) -> Self {
        Self {
            label,
            kind: PassKind::Compute,
            phase,
            reads: SmallVec::new(),
            writes: SmallVec::new(),
        }
    }

    /// Starts a render pass declaration. Render passes always write the
    /// presentation target.
    pub fn render(label: &'static str, phase: FramePhase) -> Self {
        Self {
            label,
            kind: PassKind::Render,
            phase,
            reads: SmallVec::new(),
            writes: SmallVec::from_slice(&[GraphResource::Target]),
        }
    }

    /// Adds a buffer read.
    #[must_use]
    pub fn reads(mut self, buffer: BufferHandle) -> Self {
        self.reads.push(GraphResource::Buffer(buffer));
        self
    }

    /// Adds a buffer write.
    #[must_use]
    pub fn writes(mut self, buffer: BufferHandle) -> Self {
        self.writes.push(GraphResource::Buffer(buffer));
        self
    }

    /// Adds an in-place read-modify-write of a buffer.
    #[must_use]
    pub fn reads_writes(self, buffer: BufferHandle) -> Self {
        self.reads(buffer).writes(buffer)
    }

    fn touches(&self, resource: GraphResource) -> bool {
        self.reads.contains(&resource) || self.writes.contains(&resource)
    }

    /// Whether `self` and `other` must not be reordered relative to each
    /// other (read-after-write, write-after-read or write-after-write).
    pub fn conflicts_with(&self, other: &PassDecl) -> bool {
        self.writes.iter().any(|w| other.touches(*w))
            || other.writes.iter().any(|w| self.reads.contains(w))
    }
}

/// Ordered pass plan for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePlan {
    order: Vec<PassId>,
    edges: Vec<(PassId, PassId)>,
}

impl FramePlan {
    /// Passes in recording order.
    pub fn order(&self) -> &[PassId] {
        &self.order
    }

    /// Happens-before edges the order honours.
    pub fn edges(&self) -> &[(PassId, PassId)] {
        &self.edges
    }

    /// Whether `before` is recorded ahead of `after`.
    pub fn precedes(&self, before: PassId, after: PassId) -> bool {
        let position = |id| self.order.iter().position(|p| *p == id);
        matches!((position(before), position(after)), (Some(a), Some(b)) if a < b)
    }
}

/// Frame-level pass graph.
#[derive(Debug, Default, Clone)]
pub struct PassGraph {
    passes: Vec<PassDecl>,
    deps: Vec<(PassId, PassId)>,
}

impl PassGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pass and returns its id.
    pub fn add_pass(&mut self, decl: PassDecl) -> PassId {
        let id = PassId(self.passes.len());
        self.passes.push(decl);
        id
    }

    /// Adds an explicit dependency that is not expressed by resources.
    pub fn add_dependency(&mut self, before: PassId, after: PassId) {
        self.deps.push((before, after));
    }

    /// Declared passes in declaration order.
    pub fn passes(&self) -> &[PassDecl] {
        &self.passes
    }

    /// Looks up a pass declaration.
    pub fn pass(&self, id: PassId) -> Option<&PassDecl> {
        self.passes.get(id.0)
    }

    /// Checks that every resource has at most one writer per frame.
    pub fn check_single_writer(&self) -> Result<()> {
        let mut writers: FxHashMap<GraphResource, &'static str> = FxHashMap::default();
        for pass in &self.passes {
            for resource in &pass.writes {
                // The render target is cleared by the first render pass and
                // composed on by later ones.
                if *resource == GraphResource::Target {
                    continue;
                }
                if let Some(first) = writers.insert(*resource, pass.label) {
                    return Err(PipelineError::MultipleWriters {
                        resource: resource.to_string(),
                        first,
                        second: pass.label,
                    });
                }
            }
        }
        Ok(())
    }

    /// Orders the passes so every conflicting pair keeps declaration order.
    pub fn plan(&self) -> Result<FramePlan> {
        self.check_single_writer()?;

        let count = self.passes.len();
        let mut outgoing: Vec<SmallVec<[usize; 4]>> = vec![SmallVec::new(); count];
        let mut in_degree = vec![0usize; count];
        let mut edges = Vec::new();

        for (left, left_pass) in self.passes.iter().enumerate() {
            for (offset, right_pass) in self.passes[left + 1..].iter().enumerate() {
                let right = left + 1 + offset;
                if left_pass.conflicts_with(right_pass)
                    && add_edge(&mut outgoing, &mut in_degree, left, right)
                {
                    edges.push((PassId(left), PassId(right)));
                }
            }
        }
        for (before, after) in &self.deps {
            if before.0 < count
                && after.0 < count
                && add_edge(&mut outgoing, &mut in_degree, before.0, after.0)
            {
                edges.push((*before, *after));
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(idx, _)| Reverse(idx))
            .collect();

        let mut order = Vec::with_capacity(count);
        while let Some(Reverse(node)) = ready.pop() {
            order.push(PassId(node));
            for &next in &outgoing[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != count {
            return Err(PipelineError::CyclicGraph);
        }

        Ok(FramePlan { order, edges })
    }
}

fn add_edge(
    outgoing: &mut [SmallVec<[usize; 4]>],
    in_degree: &mut [usize],
    from: usize,
    to: usize,
) -> bool {
    if from == to || outgoing[from].contains(&to) {
        return false;
    }
    outgoing[from].push(to);
    in_degree[to] += 1;
    true
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;

    fn handles<const N: usize>() -> [BufferHandle; N] {
        let mut map = SlotMap::<BufferHandle, ()>::with_key();
        std::array::from_fn(|_| map.insert(()))
    }

    fn indirect_graph() -> (PassGraph, [PassId; 3]) {
        let [vertices, staging, compacted, indirect, uniforms] = handles::<5>();
        let mut graph = PassGraph::new();
        let update = graph.add_pass(
            PassDecl::compute("update", FramePhase::Updated)
                .reads(uniforms)
                .reads_writes(staging),
        );
        let compact = graph.add_pass(
            PassDecl::compute("compact", FramePhase::Compacted)
                .reads(staging)
                .reads(uniforms)
                .writes(compacted)
                .writes(indirect),
        );
        let draw = graph.add_pass(
            PassDecl::render("draw", FramePhase::Drawn)
                .reads(vertices)
                .reads(compacted)
                .reads(indirect),
        );
        (graph, [update, compact, draw])
    }

    #[test]
    fn indirect_pipeline_orders_update_compact_draw() {
        let (graph, [update, compact, draw]) = indirect_graph();
        let plan = graph.plan().unwrap();
        assert_eq!(plan.order(), &[update, compact, draw]);
        assert!(plan.edges().contains(&(update, compact)));
        assert!(plan.edges().contains(&(compact, draw)));
        assert!(plan.precedes(compact, draw));
    }

    #[test]
    fn shared_reads_do_not_create_edges() {
        let [a, b] = handles::<2>();
        let mut graph = PassGraph::new();
        let first = graph.add_pass(PassDecl::compute("first", FramePhase::Updated).reads(a));
        let second = graph.add_pass(
            PassDecl::compute("second", FramePhase::Compacted)
                .reads(a)
                .writes(b),
        );
        let plan = graph.plan().unwrap();
        assert!(plan.edges().is_empty());
        assert_eq!(plan.order(), &[first, second]);
    }

    #[test]
    fn write_after_read_is_ordered() {
        let [a] = handles::<1>();
        let reader = PassDecl::compute("reader", FramePhase::Updated).reads(a);
        let writer = PassDecl::compute("writer", FramePhase::Compacted).writes(a);
        assert!(reader.conflicts_with(&writer));
        assert!(writer.conflicts_with(&reader));
    }

    #[test]
    fn explicit_dependencies_reorder_independent_passes() {
        let [a, b] = handles::<2>();
        let mut graph = PassGraph::new();
        let first = graph.add_pass(PassDecl::compute("first", FramePhase::Updated).writes(a));
        let second = graph.add_pass(PassDecl::compute("second", FramePhase::Updated).writes(b));
        graph.add_dependency(second, first);
        let plan = graph.plan().unwrap();
        assert_eq!(plan.order(), &[second, first]);
    }

    #[test]
    fn contradicting_dependencies_are_a_cycle() {
        let [a] = handles::<1>();
        let mut graph = PassGraph::new();
        let first = graph.add_pass(PassDecl::compute("first", FramePhase::Updated).writes(a));
        let second = graph.add_pass(PassDecl::compute("second", FramePhase::Compacted).reads(a));
        graph.add_dependency(second, first);
        assert!(matches!(graph.plan(), Err(PipelineError::CyclicGraph)));
    }

    #[test]
    fn two_writers_of_one_buffer_are_rejected() {
        let [a] = handles::<1>();
        let mut graph = PassGraph::new();
        graph.add_pass(PassDecl::compute("first", FramePhase::Updated).writes(a));
        graph.add_pass(PassDecl::compute("second", FramePhase::Compacted).reads_writes(a));
        match graph.plan() {
            Err(PipelineError::MultipleWriters { first, second, .. }) => {
                assert_eq!(first, "first");
                assert_eq!(second, "second");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn render_passes_share_the_target() {
        let [a] = handles::<1>();
        let mut graph = PassGraph::new();
        let first = graph.add_pass(PassDecl::render("first", FramePhase::Drawn).reads(a));
        let second = graph.add_pass(PassDecl::render("second", FramePhase::Drawn).reads(a));
        let plan = graph.plan().unwrap();
        assert_eq!(plan.order(), &[first, second]);
        assert_eq!(plan.edges(), &[(first, second)]);
    }

    #[test]
    fn empty_graph_plans_nothing() {
        let plan = PassGraph::new().plan().unwrap();
        assert!(plan.order().is_empty());
    }
}
