//! The controller owns the clusters and pattern nodes of one query and drives
//! the scheduling loop: every cluster votes, the node with the most votes is
//! advanced, its triples go into the match store and its bindings into the
//! clusters of its variables, and those clusters supply and update.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::cluster::Cluster;
use crate::config::SchedulerConfig;
use crate::construct::{Bindings, Term, TermKeeper, Variable, bindings_per_variable};
use crate::error::{LdfjoinError, Result};
use crate::interface::CancelToken;
use crate::node::{NodeId, NodeRegistry};
use crate::store::MatchStore;

/// Why the scheduling loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Every node reached the end of its stream.
    Finished,
    /// Nodes remain, but no cluster wants any of them advanced.
    Stalled,
    /// The configured step limit was reached.
    StepLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub status: QueryStatus,
    pub steps: u64,
    /// Complete bindings per variable as of the last cycle.
    pub bindings: Vec<(Variable, Bindings)>,
}

impl QueryOutcome {
    pub fn bindings_of(&self, variable: &Variable) -> Option<&Bindings> {
        self.bindings
            .iter()
            .find(|(v, _)| v == variable)
            .map(|(_, bindings)| bindings)
    }
    /// Decoded values of a variable; ids unknown to the keeper are skipped.
    pub fn terms(&self, variable: &Variable, keeper: &TermKeeper) -> Vec<Term> {
        self.bindings_of(variable)
            .map(|bindings| bindings.iter().filter_map(|id| keeper.lookup(id).cloned()).collect())
            .unwrap_or_default()
    }
}

/// Result of asking every cluster for its vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Election {
    Node(NodeId),
    /// Only nodes busy with an outstanding fetch are left.
    Busy,
    Idle,
}

pub struct Controller {
    registry: NodeRegistry,
    clusters: Vec<Cluster>,
    store: Arc<dyn MatchStore>,
    config: SchedulerConfig,
}

impl Controller {
    /// Builds one cluster per variable over the registered nodes.
    pub fn new(registry: NodeRegistry, store: Arc<dyn MatchStore>, config: SchedulerConfig) -> Self {
        let clusters = registry
            .variables()
            .into_iter()
            .map(|v| {
                let nodes = registry.touching(&v);
                Cluster::with_nodes(v, nodes)
            })
            .collect();
        Self { registry, clusters, store, config }
    }
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }
    pub fn cluster(&self, variable: &Variable) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.variable() == variable)
    }

    /// Restricts a variable to the given values, e.g. values from the query.
    pub fn bind(&mut self, variable: &Variable, values: &Bindings) -> Result<()> {
        let cluster = self
            .clusters
            .iter_mut()
            .find(|c| c.variable() == variable)
            .ok_or_else(|| LdfjoinError::UnknownVariable(variable.clone()))?;
        cluster.add_bounds(values);
        Ok(())
    }

    pub fn elect(&mut self) -> Election {
        // (node, votes) in order of first vote
        let mut tally: Vec<(NodeId, usize)> = Vec::new();
        for cluster in &self.clusters {
            if let Some(id) = cluster.vote(&mut self.registry) {
                match tally.iter_mut().find(|(node, _)| *node == id) {
                    Some((_, votes)) => *votes += 1,
                    None => tally.push((id, 1)),
                }
            }
        }
        let mut winner: Option<(NodeId, usize)> = None;
        for (id, votes) in tally {
            if winner.is_none_or(|(_, most)| votes > most) {
                winner = Some((id, votes));
            }
        }
        if let Some((id, votes)) = winner {
            debug!(node = %id, votes, "elected");
            return Election::Node(id);
        }
        // patterns without variables belong to no cluster
        let unclustered = self.registry.iter().find(|(_, node)| {
            node.pattern().variables().is_empty() && !node.ended() && !node.hunger().is_hungry()
        });
        if let Some((id, _)) = unclustered {
            return Election::Node(id);
        }
        if self.registry.iter().any(|(_, node)| !node.ended() && node.hunger().is_hungry()) {
            Election::Busy
        } else {
            Election::Idle
        }
    }

    /// Advances one node and lets the clusters of its variables supply and update.
    pub async fn step(&mut self, id: NodeId) -> Result<()> {
        let node = self
            .registry
            .get_mut(id)
            .ok_or_else(|| LdfjoinError::Invariant(format!("unknown node {}", id)))?;
        let triples = node.advance().await?;
        let pattern = node.pattern().clone();
        self.store.observe(&triples)?;
        debug!(node = %id, pattern = %pattern, triples = triples.len(), "advanced");

        let mut affected: Vec<usize> = Vec::new();
        for (v, values) in bindings_per_variable(&pattern, &triples) {
            if let Some(i) = self.clusters.iter().position(|c| *c.variable() == v) {
                self.clusters[i].add_bindings(&values);
                affected.push(i);
            }
        }

        for i in affected {
            self.supply_cluster(i).await?;
            let cluster = &mut self.clusters[i];
            // nothing outside the complete bindings can join anymore
            let exhausted = cluster
                .nodes()
                .iter()
                .all(|member| self.registry.get(*member).is_none_or(|node| node.ended()));
            if exhausted {
                let stale = cluster.bindings() - cluster.complete_bindings();
                cluster.remove_bindings(&stale);
            }
            cluster.update(&mut self.registry, Some(id)).await?;
        }
        Ok(())
    }

    // The store round trip is bounded by the configured timeout.
    async fn supply_cluster(&mut self, i: usize) -> Result<()> {
        let store_timeout = self.config.store_timeout();
        let cluster = &mut self.clusters[i];
        let supplied =
            tokio::time::timeout(store_timeout, cluster.supply(&mut self.registry, self.store.as_ref())).await;
        match supplied {
            Ok(result) => result,
            Err(_) => Err(LdfjoinError::StoreTimeout {
                variable: cluster.variable().clone(),
                millis: self.config.store_timeout_ms,
            }),
        }
    }

    /// Recomputes and publishes the complete bindings of every cluster over
    /// all data observed so far.
    pub async fn settle(&mut self) -> Result<()> {
        for i in 0..self.clusters.len() {
            self.supply_cluster(i).await?;
            self.clusters[i].update(&mut self.registry, None).await?;
        }
        Ok(())
    }

    /// Drives the query until it finishes, stalls, hits the step limit or is cancelled.
    pub async fn run(&mut self, cancel: &CancelToken) -> Result<QueryOutcome> {
        let started = Instant::now();
        let mut steps: u64 = 0;
        let status = loop {
            if cancel.is_cancelled() {
                info!(steps, "query cancelled");
                return Err(LdfjoinError::Cancelled);
            }
            if self.registry.all_ended() {
                break QueryStatus::Finished;
            }
            if self.config.max_steps.is_some_and(|max| steps >= max) {
                break QueryStatus::StepLimit;
            }
            match self.elect() {
                Election::Node(id) => {
                    let stepped = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(LdfjoinError::Cancelled),
                        stepped = self.step(id) => stepped,
                    };
                    if let Err(e) = stepped {
                        if cancel.is_cancelled() {
                            info!(steps, "query cancelled");
                            return Err(LdfjoinError::Cancelled);
                        }
                        warn!(error = %e, node = %id, "step failed");
                        return Err(e);
                    }
                    steps += 1;
                }
                Election::Busy => tokio::time::sleep(self.config.idle_backoff()).await,
                Election::Idle => break QueryStatus::Stalled,
            }
        };
        if status == QueryStatus::Finished {
            self.settle().await?;
        }
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(ms = elapsed_ms, steps, status = ?status, "query complete");
        Ok(QueryOutcome {
            status,
            steps,
            bindings: self
                .clusters
                .iter()
                .map(|c| (c.variable().clone(), c.complete_bindings().clone()))
                .collect(),
        })
    }
}
