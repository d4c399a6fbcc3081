//! Hierarchical navigable small-world graph.
//!
//! Nodes live in a slot vector; edges are slot numbers. Deleted slots are
//! recycled through a free list, and the whole layout (free list included)
//! is written verbatim by [`VectorIndex::save`], so a loaded index traverses
//! exactly the same graph as the one that was saved.
//!
//! Graph invariants kept after every public call:
//! - edges are undirected: `b ∈ links(a, l)` iff `a ∈ links(b, l)`
//! - no edge references a deleted slot
//! - degree is at most `m` on layers >= 1 and `2m` on layer 0

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use trawl_core::{ChunkId, IndexConfig, TrawlError};

use super::codec::{ByteReader, ByteWriter};
use super::{check_dimension, cosine, norm, Neighbor, VectorIndex};

const MAGIC: &[u8; 8] = b"TRWLHNSW";
const VERSION: u32 = 1;
const MAX_LAYERS: usize = 16;

struct Node {
    id: ChunkId,
    vector: Vec<f32>,
    norm: f64,
    /// Neighbor slots per layer; `links.len() - 1` is the node's top layer.
    links: Vec<Vec<u32>>,
}

impl Node {
    fn top_layer(&self) -> usize {
        self.links.len() - 1
    }
}

/// A node reached during traversal. Orders so that "greater" means "closer":
/// higher similarity first, lower id on ties.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    similarity: f32,
    id: ChunkId,
    slot: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.similarity
            .total_cmp(&other.similarity)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Shape of the graph, reported by `trawl status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HnswStats {
    /// Live nodes.
    pub nodes: usize,
    /// Number of layers in use (top layer of the entry point plus one).
    pub layers: usize,
    /// Mean number of layer-0 neighbors.
    pub mean_degree: f64,
    /// Largest layer-0 degree.
    pub max_degree: usize,
}

/// Production [`VectorIndex`]: an HNSW proximity graph under cosine similarity.
///
/// # Examples
///
/// ```
/// use trawl_core::{ChunkId, IndexConfig};
/// use trawl_index::vector::{HnswIndex, VectorIndex};
///
/// let mut index = HnswIndex::with_config(&IndexConfig::default());
/// index.insert(ChunkId::from_raw(1), vec![1.0, 0.0, 0.0]).unwrap();
/// index.insert(ChunkId::from_raw(2), vec![0.0, 1.0, 0.0]).unwrap();
///
/// let hits = index.search(&[1.0, 0.0, 0.0], 1, 64).unwrap();
/// assert_eq!(hits[0].id, ChunkId::from_raw(1));
/// assert_eq!(hits[0].similarity, 1.0);
/// ```
pub struct HnswIndex {
    m: usize,
    ef_construction: usize,
    seed: u64,
    dimension: Option<usize>,
    slots: Vec<Option<Node>>,
    free: Vec<u32>,
    lookup: HashMap<ChunkId, u32>,
    entry: Option<u32>,
}

impl HnswIndex {
    /// Build an empty graph with explicit parameters.
    ///
    /// `m` is clamped to at least 2 and `ef_construction` to at least `m`.
    pub fn with_params(m: usize, ef_construction: usize, seed: u64) -> Self {
        let m = m.max(2);
        Self {
            m,
            ef_construction: ef_construction.max(m),
            seed,
            dimension: None,
            slots: Vec::new(),
            free: Vec::new(),
            lookup: HashMap::new(),
            entry: None,
        }
    }

    /// Summary of the graph shape.
    pub fn stats(&self) -> HnswStats {
        let mut total = 0usize;
        let mut max_degree = 0usize;
        for node in self.slots.iter().flatten() {
            let degree = node.links[0].len();
            total += degree;
            max_degree = max_degree.max(degree);
        }
        let nodes = self.lookup.len();
        HnswStats {
            nodes,
            layers: self.entry.map_or(0, |e| self.top_layer(e) + 1),
            mean_degree: if nodes == 0 {
                0.0
            } else {
                total as f64 / nodes as f64
            },
            max_degree,
        }
    }

    fn cap(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m * 2
        } else {
            self.m
        }
    }

    fn node(&self, slot: u32) -> Option<&Node> {
        self.slots.get(slot as usize).and_then(Option::as_ref)
    }

    fn top_layer(&self, slot: u32) -> usize {
        self.node(slot).map_or(0, Node::top_layer)
    }

    fn links(&self, slot: u32, layer: usize) -> &[u32] {
        self.node(slot)
            .and_then(|n| n.links.get(layer))
            .map_or(&[], Vec::as_slice)
    }

    fn links_mut(&mut self, slot: u32, layer: usize) -> Option<&mut Vec<u32>> {
        self.slots
            .get_mut(slot as usize)?
            .as_mut()?
            .links
            .get_mut(layer)
    }

    fn degree(&self, slot: u32, layer: usize) -> usize {
        self.links(slot, layer).len()
    }

    fn candidate(&self, slot: u32, query: &[f32], query_norm: f64) -> Option<Candidate> {
        let node = self.node(slot)?;
        Some(Candidate {
            similarity: cosine(query, query_norm, &node.vector, node.norm),
            id: node.id,
            slot,
        })
    }

    fn similarity(&self, a: u32, b: u32) -> f32 {
        match (self.node(a), self.node(b)) {
            (Some(x), Some(y)) => cosine(&x.vector, x.norm, &y.vector, y.norm),
            _ => -1.0,
        }
    }

    /// Layer level for `id`, reproducible from the seed alone.
    fn draw_level(&self, id: ChunkId) -> usize {
        let mut rng = StdRng::seed_from_u64(self.seed ^ id.as_u64().rotate_left(17));
        // gen() is in [0, 1); flip it into (0, 1] so ln() stays finite.
        let u: f64 = 1.0 - rng.gen::<f64>();
        let level = (-u.ln() / (self.m as f64).ln()).floor();
        (level as usize).min(MAX_LAYERS - 1)
    }

    /// Best-first search on one layer. Returns up to `ef` candidates, closest first.
    fn search_layer(
        &self,
        query: &[f32],
        query_norm: f64,
        entries: &[u32],
        ef: usize,
        layer: usize,
    ) -> Vec<Candidate> {
        let mut visited: HashSet<u32> = HashSet::new();
        let mut frontier: BinaryHeap<Candidate> = BinaryHeap::new();
        let mut found: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();

        for &slot in entries {
            if !visited.insert(slot) {
                continue;
            }
            if let Some(c) = self.candidate(slot, query, query_norm) {
                frontier.push(c);
                found.push(Reverse(c));
            }
        }
        while found.len() > ef {
            found.pop();
        }

        while let Some(current) = frontier.pop() {
            if found.len() >= ef {
                if let Some(Reverse(worst)) = found.peek() {
                    if current < *worst {
                        break;
                    }
                }
            }
            for &next in self.links(current.slot, layer) {
                if !visited.insert(next) {
                    continue;
                }
                let Some(c) = self.candidate(next, query, query_norm) else {
                    continue;
                };
                let admit = found.len() < ef
                    || found.peek().is_some_and(|Reverse(worst)| c > *worst);
                if admit {
                    frontier.push(c);
                    found.push(Reverse(c));
                    if found.len() > ef {
                        found.pop();
                    }
                }
            }
        }

        let mut out: Vec<Candidate> = found.into_iter().map(|Reverse(c)| c).collect();
        out.sort_by(|a, b| b.cmp(a));
        out
    }

    /// Greedy descent from the entry point down to (but excluding) `stop_layer`.
    fn descend(&self, query: &[f32], query_norm: f64, stop_layer: usize) -> Vec<u32> {
        let Some(entry) = self.entry else {
            return Vec::new();
        };
        let mut current = entry;
        let top = self.top_layer(entry);
        for layer in (stop_layer + 1..=top).rev() {
            if let Some(best) = self
                .search_layer(query, query_norm, &[current], 1, layer)
                .first()
            {
                current = best.slot;
            }
        }
        vec![current]
    }

    /// Order `candidates` (closest first) by the diversity heuristic.
    ///
    /// A candidate is taken when it is closer to the base than to every
    /// neighbor already taken; the remaining slots go to the closest
    /// discarded candidates. Returns at most `limit` entries.
    fn select_diverse(&self, candidates: &[Candidate], limit: usize) -> Vec<Candidate> {
        let mut chosen: Vec<Candidate> = Vec::with_capacity(limit);
        let mut discarded: Vec<Candidate> = Vec::new();
        for &c in candidates {
            if chosen.len() >= limit {
                break;
            }
            let diverse = chosen
                .iter()
                .all(|s| self.similarity(c.slot, s.slot) < c.similarity);
            if diverse {
                chosen.push(c);
            } else {
                discarded.push(c);
            }
        }
        for c in discarded {
            if chosen.len() >= limit {
                break;
            }
            chosen.push(c);
        }
        chosen
    }

    fn link(&mut self, a: u32, b: u32, layer: usize) {
        if a == b {
            return;
        }
        if let Some(links) = self.links_mut(a, layer) {
            if !links.contains(&b) {
                links.push(b);
            }
        }
        if let Some(links) = self.links_mut(b, layer) {
            if !links.contains(&a) {
                links.push(a);
            }
        }
    }

    fn unlink(&mut self, a: u32, b: u32, layer: usize) {
        if let Some(links) = self.links_mut(a, layer) {
            links.retain(|&s| s != b);
        }
        if let Some(links) = self.links_mut(b, layer) {
            links.retain(|&s| s != a);
        }
    }

    /// Bring `slot` back within its cap on `layer`.
    ///
    /// Victims come from the tail of the heuristic order. Neighbors whose
    /// only edge is this one are skipped while other victims remain; any that
    /// still have to go are reattached elsewhere.
    fn prune(&mut self, slot: u32, layer: usize) {
        let cap = self.cap(layer);
        let degree = self.degree(slot, layer);
        if degree <= cap {
            return;
        }
        let mut neighbors: Vec<Candidate> = self
            .links(slot, layer)
            .iter()
            .filter_map(|&n| {
                let node = self.node(n)?;
                Some(Candidate {
                    similarity: self.similarity(slot, n),
                    id: node.id,
                    slot: n,
                })
            })
            .collect();
        neighbors.sort_by(|a, b| b.cmp(a));
        let ordered = self.select_diverse(&neighbors, neighbors.len());

        let mut excess = degree - cap;
        let mut victims: Vec<u32> = Vec::with_capacity(excess);
        for c in ordered.iter().rev() {
            if excess == 0 {
                break;
            }
            if self.degree(c.slot, layer) > 1 {
                victims.push(c.slot);
                excess -= 1;
            }
        }
        let mut stranded: Vec<u32> = Vec::new();
        for c in ordered.iter().rev() {
            if excess == 0 {
                break;
            }
            if !victims.contains(&c.slot) {
                victims.push(c.slot);
                stranded.push(c.slot);
                excess -= 1;
            }
        }

        for victim in victims {
            self.unlink(slot, victim, layer);
        }
        for orphan in stranded {
            self.reattach(orphan, layer);
        }
    }

    /// Give an edgeless node on `layer` one edge to the closest node with room.
    fn reattach(&mut self, slot: u32, layer: usize) {
        let cap = self.cap(layer);
        let best = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, n)| Some((i as u32, n.as_ref()?)))
            .filter(|&(other, node)| {
                other != slot && node.top_layer() >= layer && node.links[layer].len() < cap
            })
            .map(|(other, node)| Candidate {
                similarity: self.similarity(slot, other),
                id: node.id,
                slot: other,
            })
            .max();
        if let Some(best) = best {
            self.link(slot, best.slot, layer);
        }
    }

    /// Reconnect the former neighbors of a deleted node on one layer.
    ///
    /// Each orphan regains at most one edge, to the closest other orphan it
    /// is not yet linked to and that has room under the cap. Orphans left
    /// with no edge at all are reattached to the closest node anywhere.
    fn relink(&mut self, orphans: &[u32], layer: usize) {
        let cap = self.cap(layer);
        for &a in orphans {
            if self.degree(a, layer) >= cap {
                continue;
            }
            let best = orphans
                .iter()
                .filter(|&&b| {
                    b != a
                        && self.degree(b, layer) < cap
                        && !self.links(a, layer).contains(&b)
                })
                .filter_map(|&b| {
                    Some(Candidate {
                        similarity: self.similarity(a, b),
                        id: self.node(b)?.id,
                        slot: b,
                    })
                })
                .max();
            match best {
                Some(b) => self.link(a, b.slot, layer),
                None if self.degree(a, layer) == 0 => self.reattach(a, layer),
                None => {}
            }
        }
    }

    /// Highest layer wins; lowest id breaks ties.
    fn pick_entry(&self) -> Option<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (i as u32, n)))
            .max_by(|(_, a), (_, b)| {
                a.top_layer()
                    .cmp(&b.top_layer())
                    .then_with(|| b.id.cmp(&a.id))
            })
            .map(|(slot, _)| slot)
    }

    fn allocate(&mut self, node: Node) -> u32 {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                (self.slots.len() - 1) as u32
            }
        }
    }

    fn corrupt(msg: impl Into<String>) -> TrawlError {
        TrawlError::CorruptIndex(msg.into())
    }

    /// Check every structural invariant of a decoded graph.
    fn validate(&self) -> Result<(), TrawlError> {
        let live = self.slots.iter().filter(|s| s.is_some()).count();
        if live != self.lookup.len() {
            return Err(Self::corrupt("duplicate chunk ids"));
        }
        if live + self.free.len() != self.slots.len() {
            return Err(Self::corrupt("free list does not match empty slots"));
        }
        let mut seen_free = HashSet::new();
        for &slot in &self.free {
            if self.node(slot).is_some() || slot as usize >= self.slots.len() {
                return Err(Self::corrupt(format!("free slot {slot} is occupied")));
            }
            if !seen_free.insert(slot) {
                return Err(Self::corrupt(format!("free slot {slot} listed twice")));
            }
        }
        match self.entry {
            None if live > 0 => return Err(Self::corrupt("missing entry point")),
            Some(e) if self.node(e).is_none() => {
                return Err(Self::corrupt(format!("entry point {e} is empty")))
            }
            _ => {}
        }
        for (slot, node) in self.slots.iter().enumerate() {
            let Some(node) = node else { continue };
            let slot = slot as u32;
            for (layer, links) in node.links.iter().enumerate() {
                if links.len() > self.cap(layer) {
                    return Err(Self::corrupt(format!("slot {slot} exceeds cap")));
                }
                for &n in links {
                    let valid = n != slot
                        && self.node(n).is_some_and(|other| other.top_layer() >= layer)
                        && self.links(n, layer).contains(&slot);
                    if !valid {
                        return Err(Self::corrupt(format!(
                            "bad edge {slot} -> {n} on layer {layer}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

impl VectorIndex for HnswIndex {
    fn with_config(config: &IndexConfig) -> Self {
        Self::with_params(config.m, config.ef_construction, config.seed)
    }

    fn insert(&mut self, id: ChunkId, vector: Vec<f32>) -> Result<(), TrawlError> {
        check_dimension(self.dimension, vector.len())?;
        if self.lookup.contains_key(&id) {
            self.delete(id);
        }
        self.dimension = Some(vector.len());

        let level = self.draw_level(id);
        let query_norm = norm(&vector);
        let query = vector.clone();
        let slot = self.allocate(Node {
            id,
            vector,
            norm: query_norm,
            links: vec![Vec::new(); level + 1],
        });
        self.lookup.insert(id, slot);

        let Some(entry) = self.entry else {
            self.entry = Some(slot);
            return Ok(());
        };
        let top = self.top_layer(entry);

        let mut entries = self.descend(&query, query_norm, level);
        for layer in (0..=level.min(top)).rev() {
            let found: Vec<Candidate> = self
                .search_layer(&query, query_norm, &entries, self.ef_construction, layer)
                .into_iter()
                .filter(|c| c.slot != slot)
                .collect();
            let chosen = self.select_diverse(&found, self.m);
            for c in &chosen {
                self.link(slot, c.slot, layer);
            }
            for c in &chosen {
                self.prune(c.slot, layer);
            }
            if !found.is_empty() {
                entries = found.iter().map(|c| c.slot).collect();
            }
        }

        if level > top {
            self.entry = Some(slot);
        }
        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
    ) -> Result<Vec<Neighbor>, TrawlError> {
        if self.lookup.is_empty() {
            return Err(TrawlError::EmptyIndex);
        }
        check_dimension(self.dimension, query.len())?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_norm = norm(query);
        let entries = self.descend(query, query_norm, 0);
        let found = self.search_layer(query, query_norm, &entries, ef_search.max(k), 0);
        Ok(found
            .into_iter()
            .take(k)
            .map(|c| Neighbor {
                id: c.id,
                similarity: c.similarity,
            })
            .collect())
    }

    fn delete(&mut self, id: ChunkId) -> bool {
        let Some(slot) = self.lookup.remove(&id) else {
            return false;
        };
        let Some(node) = self.slots.get_mut(slot as usize).and_then(Option::take) else {
            return false;
        };
        self.free.push(slot);

        for (layer, neighbors) in node.links.iter().enumerate() {
            for &n in neighbors {
                if let Some(links) = self.links_mut(n, layer) {
                    links.retain(|&s| s != slot);
                }
            }
        }
        if self.entry == Some(slot) {
            self.entry = self.pick_entry();
        }
        for (layer, neighbors) in node.links.iter().enumerate() {
            self.relink(neighbors, layer);
        }
        true
    }

    fn contains(&self, id: ChunkId) -> bool {
        self.lookup.contains_key(&id)
    }

    fn vector(&self, id: ChunkId) -> Option<&[f32]> {
        let slot = *self.lookup.get(&id)?;
        self.node(slot).map(|n| n.vector.as_slice())
    }

    fn ids(&self) -> Vec<ChunkId> {
        let mut ids: Vec<ChunkId> = self.lookup.keys().copied().collect();
        ids.sort();
        ids
    }

    fn len(&self) -> usize {
        self.lookup.len()
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn graph_stats(&self) -> Option<HnswStats> {
        Some(self.stats())
    }

    fn save(&self) -> Vec<u8> {
        let dimension = self.dimension.unwrap_or(0);
        let mut w = ByteWriter::new(MAGIC, VERSION);
        w.put_len(self.m);
        w.put_len(self.ef_construction);
        w.put_u64(self.seed);
        w.put_len(dimension);
        match self.entry {
            Some(entry) => {
                w.put_u8(1);
                w.put_u32(entry);
            }
            None => {
                w.put_u8(0);
                w.put_u32(0);
            }
        }
        w.put_len(self.free.len());
        for &slot in &self.free {
            w.put_u32(slot);
        }
        w.put_len(self.slots.len());
        for slot in &self.slots {
            let Some(node) = slot else {
                w.put_u8(0);
                continue;
            };
            w.put_u8(1);
            w.put_u64(node.id.as_u64());
            w.put_u8(node.top_layer() as u8);
            w.put_f32s(&node.vector);
            for links in &node.links {
                w.put_len(links.len());
                for &n in links {
                    w.put_u32(n);
                }
            }
        }
        w.finish()
    }

    fn load(bytes: &[u8]) -> Result<Self, TrawlError> {
        let mut r = ByteReader::open(bytes, MAGIC, VERSION)?;
        let m = r.len()?;
        let ef_construction = r.len()?;
        let seed = r.u64()?;
        let dimension = r.len()?;
        if m < 2 {
            return Err(Self::corrupt(format!("invalid m {m}")));
        }
        let has_entry = r.u8()? == 1;
        let entry_slot = r.u32()?;

        let free_len = r.len()?;
        let mut free = Vec::with_capacity(free_len.min(bytes.len()));
        for _ in 0..free_len {
            free.push(r.u32()?);
        }

        let slot_count = r.len()?;
        let mut slots = Vec::with_capacity(slot_count.min(bytes.len()));
        let mut lookup = HashMap::new();
        for index in 0..slot_count {
            if r.u8()? == 0 {
                slots.push(None);
                continue;
            }
            if dimension == 0 {
                return Err(Self::corrupt("node stored without a dimension"));
            }
            let id = ChunkId::from_raw(r.u64()?);
            let top = r.u8()? as usize;
            if top >= MAX_LAYERS {
                return Err(Self::corrupt(format!("layer {top} out of range")));
            }
            let vector = r.f32s(dimension)?;
            let mut links = Vec::with_capacity(top + 1);
            for _ in 0..=top {
                let count = r.len()?;
                let mut layer = Vec::with_capacity(count.min(2 * m));
                for _ in 0..count {
                    let n = r.u32()?;
                    if n as usize >= slot_count {
                        return Err(Self::corrupt(format!("edge to slot {n} out of range")));
                    }
                    layer.push(n);
                }
                links.push(layer);
            }
            lookup.insert(id, index as u32);
            slots.push(Some(Node {
                id,
                norm: norm(&vector),
                vector,
                links,
            }));
        }
        r.finish()?;

        let index = Self {
            m,
            ef_construction: ef_construction.max(m),
            seed,
            dimension: (dimension > 0).then_some(dimension),
            slots,
            free,
            lookup,
            entry: has_entry.then_some(entry_slot),
        };
        index.validate()?;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::FlatIndex;

    fn id(n: u64) -> ChunkId {
        ChunkId::from_raw(n)
    }

    fn random_vectors(count: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
            .collect()
    }

    fn build(count: usize, dim: usize) -> (HnswIndex, FlatIndex, Vec<Vec<f32>>) {
        let vectors = random_vectors(count, dim, 7);
        let mut hnsw = HnswIndex::with_config(&IndexConfig::default());
        let mut flat = FlatIndex::default();
        for (i, v) in vectors.iter().enumerate() {
            hnsw.insert(id(i as u64), v.clone()).unwrap();
            flat.insert(id(i as u64), v.clone()).unwrap();
        }
        (hnsw, flat, vectors)
    }

    fn recall(hnsw: &HnswIndex, flat: &FlatIndex, queries: &[Vec<f32>], k: usize) -> f64 {
        let mut hit = 0usize;
        let mut total = 0usize;
        for q in queries {
            let exact: HashSet<ChunkId> =
                flat.search(q, k, k).unwrap().iter().map(|n| n.id).collect();
            let approx = hnsw.search(q, k, 64).unwrap();
            hit += approx.iter().filter(|n| exact.contains(&n.id)).count();
            total += exact.len();
        }
        hit as f64 / total as f64
    }

    #[test]
    fn stored_vector_matches_itself_exactly() {
        let (hnsw, _, vectors) = build(300, 16);
        for i in [0usize, 17, 150, 299] {
            let hits = hnsw.search(&vectors[i], 1, 64).unwrap();
            assert_eq!(hits[0].id, id(i as u64));
            assert_eq!(hits[0].similarity, 1.0);
        }
    }

    #[test]
    fn recall_against_exact_search() {
        let (hnsw, flat, _) = build(600, 24);
        let queries = random_vectors(40, 24, 99);
        let r = recall(&hnsw, &flat, &queries, 10);
        assert!(r >= 0.9, "recall {r}");
    }

    #[test]
    fn results_are_sorted_with_id_tiebreak() {
        let mut index = HnswIndex::with_config(&IndexConfig::default());
        for n in [5u64, 3, 9, 1] {
            index.insert(id(n), vec![1.0, 1.0]).unwrap();
        }
        index.insert(id(2), vec![1.0, 0.0]).unwrap();
        let hits = index.search(&[1.0, 1.0], 5, 64).unwrap();
        let order: Vec<u64> = hits.iter().map(|h| h.id.as_u64()).collect();
        assert_eq!(order, vec![1, 3, 5, 9, 2]);
    }

    #[test]
    fn graph_invariants_hold_after_build() {
        let (hnsw, _, _) = build(400, 8);
        hnsw.validate().unwrap();
        let stats = hnsw.stats();
        assert_eq!(stats.nodes, 400);
        assert!(stats.max_degree <= 32);
        assert!(stats.mean_degree > 1.0);
    }

    #[test]
    fn delete_leaves_no_dangling_edges() {
        let (mut hnsw, mut flat, _) = build(300, 12);
        for n in (0..300u64).step_by(3) {
            assert!(hnsw.delete(id(n)));
            flat.delete(id(n));
        }
        hnsw.validate().unwrap();
        assert_eq!(hnsw.len(), 200);

        let queries = random_vectors(30, 12, 5);
        for q in &queries {
            for hit in hnsw.search(q, 10, 64).unwrap() {
                assert!(hit.id.as_u64() % 3 != 0, "deleted id {} returned", hit.id);
            }
        }
        let r = recall(&hnsw, &flat, &queries, 10);
        assert!(r >= 0.8, "recall after deletes {r}");
    }

    #[test]
    fn delete_absent_returns_false() {
        let (mut hnsw, _, _) = build(10, 4);
        assert!(!hnsw.delete(id(1_000)));
        assert_eq!(hnsw.len(), 10);
    }

    #[test]
    fn deleting_everything_empties_the_index() {
        let (mut hnsw, _, vectors) = build(50, 4);
        for n in 0..50u64 {
            hnsw.delete(id(n));
        }
        assert!(hnsw.is_empty());
        assert!(matches!(
            hnsw.search(&vectors[0], 3, 64),
            Err(TrawlError::EmptyIndex)
        ));
        // Slots are recycled on the next insert.
        hnsw.insert(id(7), vectors[7].clone()).unwrap();
        assert_eq!(hnsw.search(&vectors[7], 1, 64).unwrap()[0].id, id(7));
    }

    #[test]
    fn reinsert_replaces_vector() {
        let mut index = HnswIndex::with_config(&IndexConfig::default());
        index.insert(id(1), vec![1.0, 0.0]).unwrap();
        index.insert(id(2), vec![0.0, 1.0]).unwrap();
        index.insert(id(1), vec![0.0, 2.0]).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.vector(id(1)), Some(&[0.0, 2.0][..]));
        index.validate().unwrap();
    }

    #[test]
    fn dimension_is_fixed_by_first_insert() {
        let mut index = HnswIndex::with_config(&IndexConfig::default());
        index.insert(id(1), vec![1.0, 0.0, 0.0]).unwrap();
        assert!(matches!(
            index.insert(id(2), vec![1.0, 0.0]),
            Err(TrawlError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert!(matches!(
            index.search(&[1.0], 1, 10),
            Err(TrawlError::DimensionMismatch { .. })
        ));
        assert!(!index.contains(id(2)));
    }

    #[test]
    fn empty_index_search_fails() {
        let index = HnswIndex::with_config(&IndexConfig::default());
        assert!(matches!(
            index.search(&[1.0, 2.0], 5, 64),
            Err(TrawlError::EmptyIndex)
        ));
    }

    #[test]
    fn save_load_gives_identical_results() {
        let (mut hnsw, _, _) = build(250, 10);
        for n in [3u64, 40, 41, 200] {
            hnsw.delete(id(n));
        }
        let bytes = hnsw.save();
        let loaded = HnswIndex::load(&bytes).unwrap();
        assert_eq!(loaded.len(), hnsw.len());
        assert_eq!(loaded.ids(), hnsw.ids());
        assert_eq!(loaded.save(), bytes);

        for q in random_vectors(20, 10, 11) {
            assert_eq!(
                hnsw.search(&q, 10, 64).unwrap(),
                loaded.search(&q, 10, 64).unwrap()
            );
        }
    }

    #[test]
    fn levels_are_reproducible() {
        let a = HnswIndex::with_params(16, 200, 42);
        let b = HnswIndex::with_params(16, 200, 42);
        for n in 0..100u64 {
            assert_eq!(a.draw_level(id(n)), b.draw_level(id(n)));
            assert!(a.draw_level(id(n)) < MAX_LAYERS);
        }
    }

    #[test]
    fn truncated_blob_is_corrupt() {
        let (hnsw, _, _) = build(20, 4);
        let bytes = hnsw.save();
        for cut in [0usize, 10, bytes.len() / 2, bytes.len() - 1] {
            assert!(matches!(
                HnswIndex::load(&bytes[..cut]),
                Err(TrawlError::CorruptIndex(_))
            ));
        }
    }

    #[test]
    fn empty_index_roundtrips() {
        let index = HnswIndex::with_config(&IndexConfig::default());
        let loaded = HnswIndex::load(&index.save()).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dimension(), None);
    }
}
