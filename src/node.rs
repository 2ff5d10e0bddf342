//! Pattern nodes: one streaming producer per triple pattern of a query.
//!
//! The scheduling core only talks to nodes through [`PatternNode`]. Optional
//! behaviour is not probed at runtime but spelled out as capabilities:
//! [`StreamKind`] says whether a node downloads its fragment directly or is
//! bound to (or fed by) the values of another variable, and [`Hunger`] says
//! whether a node can report being busy with an outstanding fetch.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::barrier::UpdateAck;
use crate::construct::{Bindings, Triple, TriplePattern, Variable, VariableHasher};
use crate::datatype::{Estimate, MatchRate};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Where a node gets its triples from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamKind {
    /// Reads its fragment directly from the endpoint.
    Download,
    /// Downloads, but with `bind_var` instantiated from known values.
    Bound { bind_var: Variable },
    /// Fed by another stream's values of `bind_var` rather than downloading.
    Fed { bind_var: Variable },
}

impl StreamKind {
    pub fn bind_var(&self) -> Option<&Variable> {
        match self {
            StreamKind::Download => None,
            StreamKind::Bound { bind_var } | StreamKind::Fed { bind_var } => Some(bind_var),
        }
    }
    pub fn is_fed(&self) -> bool {
        matches!(self, StreamKind::Fed { .. })
    }
}

/// Whether a node can take another advance request right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Hunger {
    /// The node does not track outstanding fetches.
    #[default]
    Unaware,
    Ready,
    /// Mid-flight on a fetch; cannot be driven this cycle.
    Hungry,
}

impl Hunger {
    pub fn is_hungry(&self) -> bool {
        matches!(self, Hunger::Hungry)
    }
}

/// Per-node statistics. The read counters are maintained by the node itself,
/// the per-variable match rates and estimates are written by clusters only.
#[derive(Debug, Clone, Default)]
pub struct ActiveStream {
    triples_read: u64,
    triple_count: u64,
    count: Estimate,
    match_rates: HashMap<Variable, MatchRate, VariableHasher>,
    estimates: HashMap<Variable, Estimate, VariableHasher>,
}

impl ActiveStream {
    pub fn new() -> Self {
        Self::default()
    }
    /// Number of triples this stream delivered itself. Unlike the triple
    /// count it cannot be overridden.
    pub fn triples_read(&self) -> u64 {
        self.triples_read
    }
    /// Number of triples read over the lifetime of the stream.
    pub fn triple_count(&self) -> u64 {
        self.triple_count
    }
    pub fn set_triple_count(&mut self, triple_count: u64) {
        self.triple_count = triple_count;
    }
    /// Total number of triples the endpoint announced for the pattern.
    pub fn count(&self) -> Estimate {
        self.count
    }
    pub fn set_count(&mut self, count: Estimate) {
        self.count = count;
    }
    pub fn observe(&mut self, triples: &[Triple]) {
        // the triples themselves live in the match store
        self.triples_read += triples.len() as u64;
        self.triple_count += triples.len() as u64;
    }
    pub fn match_rate(&self, variable: &Variable) -> Option<MatchRate> {
        self.match_rates.get(variable).copied()
    }
    pub fn estimate(&self, variable: &Variable) -> Option<Estimate> {
        self.estimates.get(variable).copied()
    }
    pub(crate) fn initialize(&mut self, variable: &Variable) {
        if !self.match_rates.contains_key(variable) {
            self.match_rates.insert(variable.clone(), MatchRate::ZERO);
        }
        if !self.estimates.contains_key(variable) {
            self.estimates.insert(variable.clone(), Estimate::Unbounded);
        }
    }
    pub(crate) fn record(&mut self, variable: &Variable, match_rate: MatchRate, estimate: Estimate) {
        self.match_rates.insert(variable.clone(), match_rate);
        self.estimates.insert(variable.clone(), estimate);
    }
}

/// What a cluster tells its member nodes at the end of a cycle.
#[derive(Debug, Clone, Copy)]
pub struct ClusterUpdate<'a> {
    pub variable: &'a Variable,
    pub estimate: Estimate,
    pub complete_bindings: &'a Bindings,
    pub added: &'a Bindings,
    pub removed: &'a Bindings,
    pub trigger: Option<NodeId>,
}

#[async_trait]
pub trait PatternNode: Send + fmt::Debug {
    fn pattern(&self) -> &TriplePattern;
    fn kind(&self) -> &StreamKind;
    fn hunger(&self) -> Hunger {
        Hunger::Unaware
    }
    /// Whether the node produces bindings for the variable.
    fn supplies(&self, variable: &Variable) -> bool {
        self.pattern().contains(variable) && self.kind().bind_var() != Some(variable)
    }
    fn active_supply_vars(&self) -> Vec<Variable> {
        self.pattern()
            .variables()
            .into_iter()
            .filter(|v| self.supplies(v))
            .collect()
    }
    fn is_filter(&self) -> bool {
        self.active_supply_vars().is_empty()
    }
    /// Relative cost of advancing; negative means the node is starved and must run.
    fn cost(&self) -> f64;
    fn remaining(&self) -> Option<u64>;
    fn count(&self) -> Estimate {
        self.stream().count()
    }
    fn ended(&self) -> bool;
    fn stream(&self) -> &ActiveStream;
    fn stream_mut(&mut self) -> &mut ActiveStream;
    /// Receives the new state of a variable. `ack` must be consumed exactly
    /// once, either right away or from another task.
    fn update(&mut self, update: ClusterUpdate<'_>, ack: UpdateAck);
    /// Reads the next page and returns the triples it contained.
    async fn advance(&mut self) -> Result<Vec<Triple>>;
}

pub type BoxedNode = Box<dyn PatternNode>;

/// All nodes of a query, addressed by [`NodeId`].
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: Vec<BoxedNode>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }
    pub fn register(&mut self, node: BoxedNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }
    pub fn get(&self, id: NodeId) -> Option<&dyn PatternNode> {
        self.nodes.get(id.0).map(|node| node.as_ref())
    }
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut BoxedNode> {
        self.nodes.get_mut(id.0)
    }
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &dyn PatternNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId(i), node.as_ref()))
    }
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (NodeId, &mut BoxedNode)> {
        self.nodes.iter_mut().enumerate().map(|(i, node)| (NodeId(i), node))
    }
    /// Nodes whose pattern mentions the variable, in registration order.
    pub fn touching(&self, variable: &Variable) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, node)| node.pattern().contains(variable))
            .map(|(id, _)| id)
            .collect()
    }
    pub fn suppliers_of(&self, variable: &Variable) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, node)| node.pattern().contains(variable) && node.supplies(variable))
            .map(|(id, _)| id)
            .collect()
    }
    /// Distinct variables over all patterns in registration order.
    pub fn variables(&self) -> Vec<Variable> {
        let mut variables = Vec::new();
        for (_, node) in self.iter() {
            for v in node.pattern().variables() {
                if !variables.contains(&v) {
                    variables.push(v);
                }
            }
        }
        variables
    }
    pub fn all_ended(&self) -> bool {
        self.nodes.iter().all(|node| node.ended())
    }
}

// ------------- Fragment sources -------------
/// One page of a triple pattern fragment.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub triples: Vec<Triple>,
    /// Total number of matches announced by the endpoint, if any.
    pub total: Option<u64>,
}

#[async_trait]
pub trait FragmentSource: Send + fmt::Debug {
    /// Next page, or None when the fragment is exhausted.
    async fn next_page(&mut self) -> Result<Option<Page>>;
    /// New values for the bind variable of a fed stream.
    fn feed(&mut self, _values: &Bindings) {}
}

/// Pages held in memory, used for replaying recorded fragments.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    pages: VecDeque<Page>,
}

impl MemorySource {
    pub fn new(pages: Vec<Page>) -> Self {
        Self { pages: pages.into() }
    }
    pub fn paged(triples: Vec<Triple>, page_size: usize) -> Self {
        let total = triples.len() as u64;
        let pages = triples
            .chunks(page_size.max(1))
            .map(|chunk| Page { triples: chunk.to_vec(), total: Some(total) })
            .collect();
        Self { pages }
    }
}

#[async_trait]
impl FragmentSource for MemorySource {
    async fn next_page(&mut self) -> Result<Option<Page>> {
        Ok(self.pages.pop_front())
    }
}

// ------------- FragmentNode -------------
const DEFAULT_PAGE_SIZE: f64 = 100.0;

/// A pattern node reading pages from a [`FragmentSource`].
#[derive(Debug)]
pub struct FragmentNode<S: FragmentSource> {
    pattern: TriplePattern,
    kind: StreamKind,
    source: S,
    stream: ActiveStream,
    ended: bool,
    largest_page: usize,
    pending_feed: Bindings,
    complete: HashMap<Variable, Bindings, VariableHasher>,
}

impl<S: FragmentSource> FragmentNode<S> {
    pub fn new(pattern: TriplePattern, kind: StreamKind, source: S) -> Self {
        Self {
            pattern,
            kind,
            source,
            stream: ActiveStream::new(),
            ended: false,
            largest_page: 0,
            pending_feed: Bindings::new(),
            complete: HashMap::default(),
        }
    }
    pub fn download(pattern: TriplePattern, source: S) -> Self {
        Self::new(pattern, StreamKind::Download, source)
    }
    /// Complete bindings last reported for the variable.
    pub fn complete_bindings(&self, variable: &Variable) -> Option<&Bindings> {
        self.complete.get(variable)
    }
    pub fn pending_feed(&self) -> &Bindings {
        &self.pending_feed
    }
}

#[async_trait]
impl<S: FragmentSource> PatternNode for FragmentNode<S> {
    fn pattern(&self) -> &TriplePattern {
        &self.pattern
    }
    fn kind(&self) -> &StreamKind {
        &self.kind
    }
    fn cost(&self) -> f64 {
        if self.ended {
            return f64::INFINITY;
        }
        if self.kind.is_fed() && !self.pending_feed.is_empty() {
            return -1.0;
        }
        let page_size = match self.largest_page {
            0 => DEFAULT_PAGE_SIZE,
            n => n as f64,
        };
        match self.remaining() {
            Some(remaining) => (remaining as f64 / page_size).ceil(),
            None => 1.0,
        }
    }
    fn remaining(&self) -> Option<u64> {
        match self.stream.count() {
            Estimate::Bounded(count) => Some((count as u64).saturating_sub(self.stream.triple_count())),
            Estimate::Unbounded => None,
        }
    }
    fn ended(&self) -> bool {
        self.ended
    }
    fn stream(&self) -> &ActiveStream {
        &self.stream
    }
    fn stream_mut(&mut self) -> &mut ActiveStream {
        &mut self.stream
    }
    fn update(&mut self, update: ClusterUpdate<'_>, ack: UpdateAck) {
        if self.kind.bind_var() == Some(update.variable) {
            self.pending_feed |= update.added;
            self.pending_feed -= update.removed;
        }
        self.complete
            .insert(update.variable.clone(), update.complete_bindings.clone());
        trace!(pattern = %self.pattern, variable = %update.variable, estimate = %update.estimate, "node updated");
        ack.done();
    }
    async fn advance(&mut self) -> Result<Vec<Triple>> {
        if self.ended {
            return Ok(Vec::new());
        }
        if !self.pending_feed.is_empty() {
            self.source.feed(&self.pending_feed);
            self.pending_feed.clear();
        }
        match self.source.next_page().await? {
            None => {
                debug!(pattern = %self.pattern, read = self.stream.triple_count(), "fragment exhausted");
                self.ended = true;
                Ok(Vec::new())
            }
            Some(page) => {
                if let Some(total) = page.total {
                    self.stream.set_count(Estimate::from(total));
                }
                let triples: Vec<Triple> = page
                    .triples
                    .into_iter()
                    .filter(|triple| self.pattern.bind(triple).is_some())
                    .collect();
                self.largest_page = self.largest_page.max(triples.len());
                self.stream.observe(&triples);
                Ok(triples)
            }
        }
    }
}
