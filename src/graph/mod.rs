//! The signal graph.
//!
//! Nodes live in a generational arena. Each node sums the outputs of its
//! inputs, applies any events that fall inside the block at their exact
//! sample offset, and processes the result frame by frame. Rendering pulls
//! from the destination and every tap (meters, analysers), so a node that
//! nothing listens to costs nothing. A connection cycle is broken by reading
//! the previous block's output of the node that closes the loop.

pub mod node;

use std::collections::VecDeque;

pub use node::{NodeEvent, NodeId, NodeKind};

use crate::dsp::Frame;
use crate::dsp::mixer::accumulate;
use crate::error::{EngineError, Result};

struct Entry {
    kind: NodeKind,
    inputs: Vec<NodeId>,
    /// Pending events, ordered by time.
    events: VecDeque<(f64, NodeEvent)>,
    output: Vec<Frame>,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    Fresh,
    Open,
    Done,
}

pub struct Graph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    destination: NodeId,
    scratch: Vec<Frame>,
    /// Cached post-order render walk, rebuilt after topology changes.
    order: Vec<usize>,
    order_dirty: bool,
    visit: Vec<Visit>,
    stack: Vec<(usize, usize)>,
}

impl Graph {
    pub fn new() -> Self {
        let mut graph = Graph {
            slots: Vec::new(),
            free: Vec::new(),
            destination: NodeId {
                index: 0,
                generation: 0,
            },
            scratch: Vec::new(),
            order: Vec::new(),
            order_dirty: true,
            visit: Vec::new(),
            stack: Vec::new(),
        };
        graph.destination = graph.add(NodeKind::Destination);
        graph
    }

    /// The node whose output is the context output.
    pub fn destination(&self) -> NodeId {
        self.destination
    }

    /// Number of live nodes, the destination included.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entry(id).is_some()
    }

    pub fn add(&mut self, kind: NodeKind) -> NodeId {
        let entry = Entry {
            kind,
            inputs: Vec::new(),
            events: VecDeque::new(),
            output: Vec::new(),
        };
        self.order_dirty = true;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                NodeId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// Remove a node and every connection touching it. Returns `false` if the
    /// id was already stale, so removing twice is harmless.
    pub fn remove(&mut self, id: NodeId) -> bool {
        if id == self.destination || !self.contains(id) {
            return false;
        }
        let slot = &mut self.slots[id.index as usize];
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.disconnect(id);
        true
    }

    /// Route `from`'s output into `to`. Connecting twice is a no-op.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        if !self.contains(from) {
            return Err(EngineError::StaleNode(format!("{from:?}")));
        }
        let entry = self
            .entry_mut(to)
            .ok_or_else(|| EngineError::StaleNode(format!("{to:?}")))?;
        if !entry.inputs.contains(&from) {
            entry.inputs.push(from);
            self.order_dirty = true;
        }
        Ok(())
    }

    /// Remove every outgoing connection of `from`.
    pub fn disconnect(&mut self, from: NodeId) {
        self.order_dirty = true;
        for slot in &mut self.slots {
            if let Some(entry) = slot.entry.as_mut() {
                entry.inputs.retain(|&input| input != from);
            }
        }
    }

    /// Remove the single connection `from -> to`.
    pub fn disconnect_from(&mut self, from: NodeId, to: NodeId) {
        self.order_dirty = true;
        if let Some(entry) = self.entry_mut(to) {
            entry.inputs.retain(|&input| input != from);
        }
    }

    pub fn inputs(&self, id: NodeId) -> &[NodeId] {
        self.entry(id).map(|e| e.inputs.as_slice()).unwrap_or(&[])
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.entry(id).map(|e| &e.kind)
    }

    /// Replacing a node's kind can turn it into a tap, so the render walk is
    /// rebuilt afterwards.
    pub fn kind_mut(&mut self, id: NodeId) -> Option<&mut NodeKind> {
        self.order_dirty = true;
        self.entry_mut(id).map(|e| &mut e.kind)
    }

    /// Apply `event` to `id` at context time `time`. Events in the past land
    /// at the start of the next rendered block.
    pub fn schedule(&mut self, id: NodeId, time: f64, event: NodeEvent) -> bool {
        let Some(entry) = self.entry_mut(id) else {
            log::warn!("event {event:?} for stale node {id:?} dropped");
            return false;
        };
        let at = entry.events.partition_point(|(t, _)| *t <= time);
        entry.events.insert(at, (time, event));
        true
    }

    /// Drop every event still pending for `id`.
    pub fn cancel_events(&mut self, id: NodeId) {
        if let Some(entry) = self.entry_mut(id) {
            entry.events.clear();
        }
    }

    pub fn pending_events(&self, id: NodeId) -> usize {
        self.entry(id).map(|e| e.events.len()).unwrap_or(0)
    }

    /// Render `frames` frames starting at context time `start`. Returns the
    /// destination's output.
    pub fn render(&mut self, frames: usize, start: f64, sample_rate: f64) -> &[Frame] {
        if self.order_dirty {
            self.rebuild_order();
        }
        for i in 0..self.order.len() {
            let index = self.order[i];
            self.render_node(index, frames, start, sample_rate);
        }
        match self.entry(self.destination) {
            Some(entry) => &entry.output,
            None => &[],
        }
    }

    /// Post-order walk from the destination and every tap, reusing the
    /// buffers of the previous walk.
    fn rebuild_order(&mut self) {
        let mut visit = std::mem::take(&mut self.visit);
        let mut order = std::mem::take(&mut self.order);
        let mut stack = std::mem::take(&mut self.stack);
        visit.clear();
        visit.resize(self.slots.len(), Visit::Fresh);
        order.clear();
        stack.clear();
        let roots = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.entry
                    .as_ref()
                    .is_some_and(|e| e.kind.is_tap() || matches!(e.kind, NodeKind::Destination))
            })
            .map(|(i, _)| i);

        for root in roots {
            if visit[root] != Visit::Fresh {
                continue;
            }
            visit[root] = Visit::Open;
            stack.push((root, 0));
            while let Some((index, next)) = stack.pop() {
                let inputs = self.slots[index]
                    .entry
                    .as_ref()
                    .map(|e| e.inputs.as_slice())
                    .unwrap_or(&[]);
                match inputs.get(next) {
                    Some(input) => {
                        stack.push((index, next + 1));
                        let i = input.index as usize;
                        if visit[i] == Visit::Fresh {
                            visit[i] = Visit::Open;
                            stack.push((i, 0));
                        }
                    }
                    None => {
                        visit[index] = Visit::Done;
                        order.push(index);
                    }
                }
            }
        }
        self.visit = visit;
        self.order = order;
        self.stack = stack;
        self.order_dirty = false;
    }

    fn render_node(&mut self, index: usize, frames: usize, start: f64, sample_rate: f64) {
        let mut mix = std::mem::take(&mut self.scratch);
        mix.clear();
        mix.resize(frames, Frame::SILENT);

        if let Some(entry) = self.slots[index].entry.as_ref() {
            for input in &entry.inputs {
                if let Some(source) = self.entry(*input) {
                    accumulate(&mut mix, &source.output);
                }
            }
        }

        let Some(entry) = self.slots[index].entry.as_mut() else {
            self.scratch = mix;
            return;
        };
        for (i, frame) in mix.iter_mut().enumerate() {
            while let Some(&(time, event)) = entry.events.front() {
                if event_offset(time, start, sample_rate) > i {
                    break;
                }
                entry.kind.apply(event);
                entry.events.pop_front();
            }
            *frame = entry.kind.process(*frame);
        }
        entry.kind.end_block();

        std::mem::swap(&mut entry.output, &mut mix);
        self.scratch = mix;
    }

    fn entry(&self, id: NodeId) -> Option<&Entry> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, id: NodeId) -> Option<&mut Entry> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame offset inside a block starting at `start` where an event at `time`
/// takes effect.
fn event_offset(time: f64, start: f64, sample_rate: f64) -> usize {
    let offset = ((time - start) * sample_rate).round();
    if offset <= 0.0 { 0 } else { offset as usize }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::dsp::meter::Meter;
    use crate::dsp::sampler::SampleBuffer;

    const SR: f64 = 44100.0;

    /// A player over a constant buffer.
    fn dc(graph: &mut Graph) -> NodeId {
        let buffer = Arc::new(SampleBuffer::new(vec![0.5; 4096], 44100));
        graph.add(NodeKind::player(buffer, SR))
    }

    #[test]
    fn new_graph_holds_only_the_destination() {
        let graph = Graph::new();
        assert_eq!(graph.len(), 1);
        assert!(graph.contains(graph.destination()));
    }

    #[test]
    fn remove_is_idempotent_and_ids_go_stale() {
        let mut graph = Graph::new();
        let a = graph.add(NodeKind::gain(1.0));
        assert!(graph.remove(a));
        assert!(!graph.remove(a));
        let b = graph.add(NodeKind::gain(1.0));
        assert_eq!(a.index, b.index);
        assert!(!graph.contains(a));
        assert!(graph.contains(b));
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn destination_cannot_be_removed() {
        let mut graph = Graph::new();
        let dest = graph.destination();
        assert!(!graph.remove(dest));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn connecting_stale_nodes_fails() {
        let mut graph = Graph::new();
        let a = graph.add(NodeKind::gain(1.0));
        graph.remove(a);
        let dest = graph.destination();
        assert!(matches!(graph.connect(a, dest), Err(EngineError::StaleNode(_))));
    }

    #[test]
    fn removing_a_node_drops_its_connections() {
        let mut graph = Graph::new();
        let a = graph.add(NodeKind::gain(1.0));
        let dest = graph.destination();
        graph.connect(a, dest).unwrap();
        graph.remove(a);
        assert!(graph.inputs(dest).is_empty());
    }

    #[test]
    fn scheduled_trigger_lands_on_its_sample() {
        let mut graph = Graph::new();
        let player = dc(&mut graph);
        let dest = graph.destination();
        graph.connect(player, dest).unwrap();
        graph.schedule(player, 64.0 / SR, NodeEvent::Start);

        let out = graph.render(128, 0.0, SR);
        assert_eq!(out[63], Frame::SILENT);
        assert!(out[64].left > 0.4, "trigger should sound at frame 64");
        assert_eq!(graph.pending_events(player), 0);
    }

    #[test]
    fn gain_chain_scales_signal() {
        let mut graph = Graph::new();
        let player = dc(&mut graph);
        let gain = graph.add(NodeKind::gain(0.5));
        let dest = graph.destination();
        graph.connect(player, gain).unwrap();
        graph.connect(gain, dest).unwrap();
        graph.schedule(player, 0.0, NodeEvent::Start);

        let out = graph.render(16, 0.0, SR);
        let expected = (0.25f32).tanh();
        assert!((out[8].left - expected).abs() < 1e-6);
    }

    #[test]
    fn taps_render_without_a_listener() {
        let mut graph = Graph::new();
        let player = dc(&mut graph);
        let meter = graph.add(NodeKind::Meter(Meter::new(0.0)));
        graph.connect(player, meter).unwrap();
        graph.schedule(player, 0.0, NodeEvent::Start);
        graph.render(128, 0.0, SR);
        match graph.kind(meter) {
            Some(NodeKind::Meter(m)) => assert!((m.level() - 0.5).abs() < 1e-6),
            _ => panic!("meter missing"),
        }
    }

    #[test]
    fn cycles_do_not_hang() {
        let mut graph = Graph::new();
        let a = graph.add(NodeKind::gain(0.5));
        let b = graph.add(NodeKind::gain(0.5));
        let dest = graph.destination();
        graph.connect(a, b).unwrap();
        graph.connect(b, a).unwrap();
        graph.connect(b, dest).unwrap();
        let out = graph.render(32, 0.0, SR);
        assert_eq!(out.len(), 32);
    }

    #[test]
    fn render_walk_is_reused_until_the_topology_changes() {
        let mut graph = Graph::new();
        let player = dc(&mut graph);
        let dest = graph.destination();
        graph.schedule(player, 0.0, NodeEvent::Start);

        assert!(graph.render(16, 0.0, SR).iter().all(|f| *f == Frame::SILENT));
        assert!(!graph.order_dirty);
        graph.render(16, 16.0 / SR, SR);
        assert!(!graph.order_dirty);

        graph.connect(player, dest).unwrap();
        assert!(graph.order_dirty);
        assert!(graph.render(16, 32.0 / SR, SR)[0].left > 0.4);
        assert_eq!(graph.order.len(), 2);

        graph.disconnect_from(player, dest);
        assert!(graph.render(16, 48.0 / SR, SR).iter().all(|f| *f == Frame::SILENT));

        graph.connect(player, dest).unwrap();
        graph.remove(player);
        assert!(graph.render(16, 64.0 / SR, SR).iter().all(|f| *f == Frame::SILENT));
        assert_eq!(graph.order, vec![dest.index as usize]);
    }

    #[test]
    fn cancelled_events_never_fire() {
        let mut graph = Graph::new();
        let player = dc(&mut graph);
        let dest = graph.destination();
        graph.connect(player, dest).unwrap();
        graph.schedule(player, 0.0, NodeEvent::Start);
        graph.cancel_events(player);
        let out = graph.render(64, 0.0, SR);
        assert!(out.iter().all(|f| *f == Frame::SILENT));
    }
}
