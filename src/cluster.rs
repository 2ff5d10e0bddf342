//! Per-variable join scheduling.
//!
//! A [`Cluster`] exists for every variable of a query. It owns the bindings
//! and bounds known for its variable and
//! * votes for the pattern node that should be advanced next ([`Cluster::vote`]),
//! * recomputes the joined ("complete") bindings and each supplier's match rate
//!   and estimate through the match store ([`Cluster::supply`]),
//! * pushes the new state to every node touching the variable and waits until
//!   all of them acknowledged ([`Cluster::update`]).
//!
//! Clusters never hold on to the node registry or the store; both are passed
//! into the calls that need them.

use std::collections::VecDeque;

use tracing::{Level, debug, trace};

use crate::barrier::{BarrierOutcome, UpdateBarrier};
use crate::construct::{Bindings, TriplePattern, Variable, unique_by_key};
use crate::datatype::{Estimate, MatchRate};
use crate::error::{LdfjoinError, Result};
use crate::node::{ClusterUpdate, NodeId, NodeRegistry, PatternNode};
use crate::store::MatchStore;

#[derive(Debug, Clone)]
pub struct Cluster {
    variable: Variable,
    nodes: Vec<NodeId>,
    bounds: Option<Bindings>,
    bindings: Bindings,
    complete_bindings: Bindings,
    estimate: Estimate,
    add: Bindings,
    remove: Bindings,
}

/// What [`Cluster::match_suppliers`] sends to the store: the patterns of the
/// supply path, and per supplier its triple count and announced count.
#[derive(Debug, Clone, PartialEq)]
pub struct SupplyRequest {
    pub patterns: Vec<TriplePattern>,
    pub counts: Vec<(u64, Estimate)>,
}

/// Result of matching the suppliers of a variable against the store.
#[derive(Debug, Clone, PartialEq)]
pub struct SupplyStatistics {
    pub complete_bindings: Bindings,
    pub estimate: Estimate,
    pub match_rates: Vec<MatchRate>,
    pub estimates: Vec<Estimate>,
}

impl SupplyStatistics {
    /// Derives match rates and estimates for the suppliers from the joined values.
    /// `suppliers` holds each supplier's triple count and announced count.
    pub fn compute(complete_bindings: Bindings, suppliers: &[(u64, Estimate)]) -> Self {
        let matches = complete_bindings.len();
        let match_rates: Vec<MatchRate> = suppliers
            .iter()
            .map(|(triple_count, _)| MatchRate::observed(matches, *triple_count))
            .collect();
        let estimates: Vec<Estimate> = match_rates
            .iter()
            .zip(suppliers)
            .map(|(rate, (_, count))| *rate * *count)
            .collect();
        // largest supplier estimate, not the smallest
        let estimate = if complete_bindings.is_empty() {
            Estimate::Unbounded
        } else {
            Estimate::max_of(estimates.iter().copied()).unwrap_or(Estimate::Unbounded)
        };
        Self { complete_bindings, estimate, match_rates, estimates }
    }
}

fn available(node: &dyn PatternNode) -> bool {
    !node.ended() && !node.hunger().is_hungry()
}

// First candidate with the lowest cost. Infinite (or undefined) costs still
// produce a candidate; only an empty candidate set yields none.
fn infini_min(registry: &NodeRegistry, candidates: &[NodeId]) -> Option<NodeId> {
    let mut best: Option<(NodeId, f64)> = None;
    for id in candidates {
        let Some(node) = registry.get(*id) else { continue };
        let cost = match node.cost() {
            c if c.is_nan() => f64::INFINITY,
            c => c,
        };
        match best {
            Some((_, lowest)) if cost >= lowest => (),
            _ => best = Some((*id, cost)),
        }
    }
    best.map(|(id, _)| id)
}

// First candidate with the highest announced count per triple read.
fn most_productive(registry: &NodeRegistry, candidates: &[NodeId]) -> Option<NodeId> {
    let mut best: Option<(NodeId, f64)> = None;
    for id in candidates {
        let Some(node) = registry.get(*id) else { continue };
        let stream = node.stream();
        let ratio = stream.count().as_f64() / stream.triples_read() as f64;
        let ratio = if ratio.is_nan() { f64::NEG_INFINITY } else { ratio };
        match best {
            Some((_, highest)) if ratio <= highest => (),
            _ => best = Some((*id, ratio)),
        }
    }
    best.map(|(id, _)| id)
}

/// Every node needed to evaluate the join of `nodes`: the nodes themselves,
/// the suppliers of the variables they are bound by (transitively), and all
/// download nodes connected to that closure through shared variables.
pub fn supply_path(registry: &NodeRegistry, nodes: &[NodeId]) -> Vec<NodeId> {
    let bind_vars = |ids: &[NodeId]| -> Vec<Variable> {
        let mut vars: Vec<Variable> = Vec::new();
        for node in ids.iter().filter_map(|id| registry.get(*id)) {
            if let Some(v) = node.kind().bind_var() {
                if !vars.contains(v) {
                    vars.push(v.clone());
                }
            }
        }
        vars
    };
    let pattern_of = |id: &NodeId| registry.get(*id).map(|node| node.pattern().clone());

    let mut queue: VecDeque<Variable> = bind_vars(nodes).into();
    let mut visited: Vec<Variable> = queue.iter().cloned().collect();
    let mut results: Vec<NodeId> = nodes.to_vec();
    while let Some(v) = queue.pop_front() {
        let suppliers = registry.suppliers_of(&v);
        for dependency in bind_vars(&suppliers) {
            if !visited.contains(&dependency) {
                visited.push(dependency.clone());
                queue.push_back(dependency);
            }
        }
        results.extend(suppliers);
    }
    let results = unique_by_key(results, pattern_of);

    let downloads: Vec<NodeId> = registry
        .iter()
        .filter(|(_, node)| !node.kind().is_fed())
        .map(|(id, _)| id)
        .collect();
    let mut vars: Vec<Variable> = Vec::new();
    for node in results.iter().filter_map(|id| registry.get(*id)) {
        let node_vars = match node.kind().bind_var() {
            Some(v) => vec![v.clone()],
            None => node.pattern().variables(),
        };
        for v in node_vars {
            if !vars.contains(&v) {
                vars.push(v);
            }
        }
    }
    let mut connected: Vec<NodeId> = Vec::new();
    loop {
        let next: Vec<NodeId> = downloads
            .iter()
            .copied()
            .filter(|id| registry.get(*id).is_some_and(|node| node.pattern().shares_variable_with(&vars)))
            .collect();
        for node in next.iter().filter_map(|id| registry.get(*id)) {
            for v in node.pattern().variables() {
                if !vars.contains(&v) {
                    vars.push(v);
                }
            }
        }
        let stable = next.len() == connected.len();
        connected = next;
        if stable {
            break;
        }
    }

    let mut results = results;
    results.extend(connected);
    unique_by_key(results, pattern_of)
}

impl Cluster {
    pub fn new(variable: Variable) -> Self {
        Self {
            variable,
            nodes: Vec::new(),
            bounds: None,
            bindings: Bindings::new(),
            complete_bindings: Bindings::new(),
            estimate: Estimate::Unbounded,
            add: Bindings::new(),
            remove: Bindings::new(),
        }
    }
    pub fn with_nodes(variable: Variable, nodes: Vec<NodeId>) -> Self {
        let mut cluster = Self::new(variable);
        cluster.nodes = nodes;
        cluster
    }
    pub fn attach(&mut self, node: NodeId) {
        if !self.nodes.contains(&node) {
            self.nodes.push(node);
        }
    }
    pub fn variable(&self) -> &Variable {
        &self.variable
    }
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }
    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }
    pub fn bounds(&self) -> Option<&Bindings> {
        self.bounds.as_ref()
    }
    pub fn complete_bindings(&self) -> &Bindings {
        &self.complete_bindings
    }
    pub fn estimate(&self) -> Estimate {
        self.estimate
    }
    pub fn added(&self) -> &Bindings {
        &self.add
    }
    pub fn removed(&self) -> &Bindings {
        &self.remove
    }

    // ------------- bindings & bounds -------------
    pub fn add_bindings(&mut self, values: &Bindings) {
        if values.is_empty() {
            return;
        }
        let mut novel = match &self.bounds {
            Some(bounds) => values & bounds,
            None => values.clone(),
        };
        novel -= &self.bindings;
        // a value removed earlier in this cycle is back
        self.remove -= &novel;
        self.add |= &novel;
        self.bindings |= &novel;
    }
    pub fn remove_bindings(&mut self, values: &Bindings) {
        if values.is_empty() {
            return;
        }
        self.bindings -= values;
        self.add -= values;
        self.remove |= values;
    }
    /// Narrows the bounds of the variable. Bindings outside the new bounds
    /// are evicted into the pending removals.
    pub fn add_bounds(&mut self, bounds: &Bindings) {
        if bounds.is_empty() {
            return;
        }
        let bounds = match self.bounds.take() {
            Some(existing) => &existing & bounds,
            None => bounds.clone(),
        };
        let evicted = &self.bindings - &bounds;
        self.bindings &= &bounds;
        self.add -= &evicted;
        self.remove |= &evicted;
        debug!(variable = %self.variable, bounds = bounds.len(), evicted = evicted.len(), "bound");
        self.bounds = Some(bounds);
    }

    // ------------- membership -------------
    pub fn suppliers(&self, registry: &NodeRegistry) -> Vec<NodeId> {
        self.nodes
            .iter()
            .copied()
            .filter(|id| registry.get(*id).is_some_and(|node| node.supplies(&self.variable)))
            .collect()
    }
    /// Members that supply no variable at all.
    pub fn filter_nodes(&self, registry: &NodeRegistry) -> Vec<NodeId> {
        self.nodes
            .iter()
            .copied()
            .filter(|id| registry.get(*id).is_some_and(|node| node.is_filter()))
            .collect()
    }
    /// Variables the suppliers of this cluster are bound by.
    pub fn depends_on(&self, registry: &NodeRegistry) -> Vec<Variable> {
        let mut vars: Vec<Variable> = Vec::new();
        for node in self.suppliers(registry).iter().filter_map(|id| registry.get(*id)) {
            if let Some(v) = node.kind().bind_var() {
                if !vars.contains(v) {
                    vars.push(v.clone());
                }
            }
        }
        vars
    }

    // ------------- vote -------------
    /// Picks the node that should be advanced next, if any.
    pub fn vote(&self, registry: &mut NodeRegistry) -> Option<NodeId> {
        let is_available = |id: &NodeId| registry.get(*id).is_some_and(available);
        if let Some(filter) = self.filter_nodes(registry).into_iter().find(is_available) {
            trace!(variable = %self.variable, node = %filter, "vote for filter");
            return Some(filter);
        }
        let mut suppliers: Vec<NodeId> = self
            .suppliers(registry)
            .into_iter()
            .filter(is_available)
            .collect();
        if suppliers.is_empty() {
            return None;
        }
        for id in &suppliers {
            if let Some(node) = registry.get_mut(*id) {
                node.stream_mut().initialize(&self.variable);
            }
        }
        if tracing::enabled!(Level::DEBUG) {
            let rates: Vec<String> = suppliers
                .iter()
                .filter_map(|id| registry.get(*id))
                .map(|node| {
                    let stream = node.stream();
                    format!(
                        "{} ({}, {})",
                        node.pattern(),
                        stream.match_rate(&self.variable).unwrap_or_default(),
                        stream.estimate(&self.variable).unwrap_or_default()
                    )
                })
                .collect();
            debug!(variable = %self.variable, complete = self.complete_bindings.len(), suppliers = ?rates, "vote");
        }

        let needy: Vec<NodeId> = suppliers
            .iter()
            .copied()
            .filter(|id| registry.get(*id).is_some_and(|node| node.cost() < 0.0))
            .collect();
        if !needy.is_empty() {
            suppliers = needy;
        }

        // not enough data yet for the read streams to tell us anything
        let empty: Vec<NodeId> = suppliers
            .iter()
            .copied()
            .filter(|id| registry.get(*id).is_some_and(|node| node.stream().triples_read() == 0))
            .collect();
        infini_min(registry, &empty).or_else(|| most_productive(registry, &suppliers))
    }

    // ------------- supply -------------
    /// Recomputes the complete bindings of the variable and the statistics of
    /// its suppliers. The store round trip is the only suspension point.
    pub async fn supply(&mut self, registry: &mut NodeRegistry, store: &dyn MatchStore) -> Result<()> {
        let suppliers = self.suppliers(registry);
        if suppliers.is_empty() {
            tokio::task::yield_now().await;
            return Ok(());
        }
        let request = self.supply_request(&suppliers, registry)?;
        let statistics = self.match_suppliers(&request, store).await?;
        for (i, id) in suppliers.iter().enumerate() {
            if let Some(node) = registry.get_mut(*id) {
                node.stream_mut()
                    .record(&self.variable, statistics.match_rates[i], statistics.estimates[i]);
            }
        }
        debug!(variable = %self.variable, total = statistics.complete_bindings.len(), estimate = %statistics.estimate, "supply");
        self.complete_bindings = statistics.complete_bindings;
        self.estimate = statistics.estimate;
        Ok(())
    }

    /// Collects the patterns of the supply path of `suppliers` together with
    /// the triple count and announced count of each supplier.
    pub fn supply_request(&self, suppliers: &[NodeId], registry: &NodeRegistry) -> Result<SupplyRequest> {
        let path = supply_path(registry, suppliers);
        let patterns: Vec<TriplePattern> = path
            .iter()
            .filter_map(|id| registry.get(*id))
            .map(|node| node.pattern().clone())
            .collect();
        let counts: Vec<(u64, Estimate)> = suppliers
            .iter()
            .filter_map(|id| registry.get(*id))
            .map(|node| (node.stream().triple_count(), node.stream().count()))
            .collect();
        if counts.len() != suppliers.len() {
            return Err(LdfjoinError::Invariant(format!(
                "supplier of {} missing from the registry",
                self.variable
            )));
        }
        Ok(SupplyRequest { patterns, counts })
    }

    /// Joins the supply path in the store, focused on this variable.
    pub async fn match_suppliers(&self, request: &SupplyRequest, store: &dyn MatchStore) -> Result<SupplyStatistics> {
        trace!(variable = %self.variable, path = request.patterns.len(), "matching suppliers");
        let complete_bindings = store.match_bindings(&request.patterns, &self.variable).await?;
        Ok(SupplyStatistics::compute(complete_bindings, &request.counts))
    }

    // ------------- update -------------
    /// Notifies every member node of the current estimate and complete
    /// bindings, then clears the pending diffs once all of them acknowledged.
    pub async fn update(&mut self, registry: &mut NodeRegistry, trigger: Option<NodeId>) -> Result<()> {
        if let Some(missing) = self.nodes.iter().find(|id| registry.get(**id).is_none()) {
            return Err(LdfjoinError::Invariant(format!(
                "member {} of {} missing from the registry",
                missing, self.variable
            )));
        }
        if tracing::enabled!(Level::TRACE) {
            let members: Vec<&dyn PatternNode> = self.nodes.iter().filter_map(|id| registry.get(*id)).collect();
            let count = members
                .iter()
                .map(|node| node.count())
                .reduce(|a, b| if b < a { b } else { a });
            let remaining = members.iter().filter_map(|node| node.remaining()).min();
            trace!(variable = %self.variable, count = ?count, remaining = ?remaining, "update diagnostics");
        }

        let barrier = UpdateBarrier::new(self.nodes.len());
        let update = ClusterUpdate {
            variable: &self.variable,
            estimate: self.estimate,
            complete_bindings: &self.complete_bindings,
            added: &self.add,
            removed: &self.remove,
            trigger,
        };
        for id in &self.nodes {
            let (Some(node), Some(ack)) = (registry.get_mut(*id), barrier.ack()) else {
                return Err(LdfjoinError::Invariant(format!("cannot notify {} of {}", id, self.variable)));
            };
            node.update(update, ack);
        }
        match barrier.wait().await {
            BarrierOutcome::Completed => {
                trace!(variable = %self.variable, added = self.add.len(), removed = self.remove.len(), "update complete");
                self.add.clear();
                self.remove.clear();
                Ok(())
            }
            BarrierOutcome::Abandoned(abandoned) => Err(LdfjoinError::UpdateAbandoned {
                variable: self.variable.clone(),
                abandoned,
            }),
        }
    }
}
