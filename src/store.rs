//! The match store keeps every triple observed during a query and answers
//! multi-pattern joins over that data for a single focus variable.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::construct::{Bindings, OtherHasher, PatternTerm, TermId, Triple, TriplePattern, Variable};
use crate::error::{LdfjoinError, Result};

#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Adds triples to the observed data.
    fn observe(&self, triples: &[Triple]) -> Result<()>;
    /// Values of `variable` that take part in at least one solution of all
    /// `patterns` over the data observed so far.
    async fn match_bindings(&self, patterns: &[TriplePattern], variable: &Variable) -> Result<Bindings>;
}

type Index = HashMap<TermId, Vec<usize>, OtherHasher>;

#[derive(Debug, Default)]
struct Observed {
    triples: Vec<Triple>,
    seen: HashSet<Triple, OtherHasher>,
    by_subject: Index,
    by_predicate: Index,
    by_object: Index,
}

type Solution = Vec<(Variable, TermId)>;

fn resolve(term: &PatternTerm, solution: &Solution) -> Option<TermId> {
    match term {
        PatternTerm::Constant(id) => Some(*id),
        PatternTerm::Variable(v) => solution.iter().find(|(known, _)| known == v).map(|(_, id)| *id),
    }
}

fn resolved_positions(pattern: &TriplePattern, solution: &Solution) -> usize {
    pattern
        .positions()
        .into_iter()
        .filter(|term| resolve(term, solution).is_some())
        .count()
}

impl Observed {
    fn insert(&mut self, triple: Triple) -> bool {
        if !self.seen.insert(triple) {
            return false;
        }
        let position = self.triples.len();
        self.by_subject.entry(triple.subject).or_default().push(position);
        self.by_predicate.entry(triple.predicate).or_default().push(position);
        self.by_object.entry(triple.object).or_default().push(position);
        self.triples.push(triple);
        true
    }
    /// Positions of the triples that can match the pattern under the
    /// solution: the smallest index bucket over the resolved positions, or
    /// None when nothing is resolved and every triple is a candidate.
    fn bucket(&self, pattern: &TriplePattern, solution: &Solution) -> Option<&[usize]> {
        let indexes = [&self.by_subject, &self.by_predicate, &self.by_object];
        pattern
            .positions()
            .into_iter()
            .zip(indexes)
            .filter_map(|(term, index)| {
                resolve(term, solution).map(|id| index.get(&id).map(Vec::as_slice).unwrap_or(&[]))
            })
            .min_by_key(|positions| positions.len())
    }
}

/// One focused join over the observed triples.
struct Search<'a> {
    observed: &'a Observed,
    focus: &'a Variable,
    abandoned: &'a AtomicBool,
    found: Bindings,
}

impl Search<'_> {
    fn solve(&mut self, remaining: &mut Vec<&TriplePattern>, solution: &mut Solution) {
        if self.abandoned.load(Ordering::Relaxed) {
            return;
        }
        let focus_value = solution.iter().find(|(v, _)| v == self.focus).map(|(_, id)| *id);
        if remaining.is_empty() {
            if let Some(value) = focus_value {
                self.found.insert(value);
            }
            return;
        }
        // this branch can only confirm a value we already have
        if focus_value.is_some_and(|value| self.found.contains(value)) {
            return;
        }
        // most constrained pattern first
        let mut next = 0;
        for (i, pattern) in remaining.iter().enumerate() {
            if resolved_positions(pattern, solution) > resolved_positions(remaining[next], solution) {
                next = i;
            }
        }
        let pattern = remaining.remove(next);
        let observed = self.observed;
        let bucket = observed.bucket(pattern, solution);
        let candidates = bucket.map_or(observed.triples.len(), <[usize]>::len);
        for i in 0..candidates {
            let triple = match bucket {
                Some(positions) => &observed.triples[positions[i]],
                None => &observed.triples[i],
            };
            let Some(bound) = pattern.bind(triple) else { continue };
            let consistent = bound.iter().all(|(v, value)| {
                solution
                    .iter()
                    .find(|(known, _)| known == v)
                    .is_none_or(|(_, known)| known == value)
            });
            if !consistent {
                continue;
            }
            let mark = solution.len();
            for (v, value) in bound {
                if !solution.iter().any(|(known, _)| *known == v) {
                    solution.push((v, value));
                }
            }
            self.solve(remaining, solution);
            solution.truncate(mark);
        }
        remaining.insert(next, pattern);
    }
}

fn search(observed: &Observed, patterns: &[TriplePattern], focus: &Variable, abandoned: &AtomicBool) -> Bindings {
    let mut search = Search { observed, focus, abandoned, found: Bindings::new() };
    let mut remaining: Vec<&TriplePattern> = patterns.iter().collect();
    search.solve(&mut remaining, &mut Solution::new());
    search.found
}

fn poisoned<E: std::fmt::Display>(e: E) -> LdfjoinError {
    LdfjoinError::Store(format!("lock poisoned: {e}"))
}

// Tells a running join that nobody waits for its result anymore.
#[derive(Default)]
struct Abandon(Arc<AtomicBool>);

impl Drop for Abandon {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// In-memory store of the triples read during one query. Triples are
/// indexed by subject, predicate and object.
#[derive(Debug, Default)]
pub struct MemoryStore {
    observed: Arc<RwLock<Observed>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn len(&self) -> usize {
        self.observed.read().map(|o| o.triples.len()).unwrap_or(0)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Synchronous variant of [`MatchStore::match_bindings`], run on the
    /// calling thread.
    pub fn matches(&self, patterns: &[TriplePattern], variable: &Variable) -> Result<Bindings> {
        if !patterns.iter().any(|pattern| pattern.contains(variable)) {
            return Ok(Bindings::new());
        }
        let observed = self.observed.read().map_err(poisoned)?;
        let found = search(&observed, patterns, variable, &AtomicBool::new(false));
        trace!(variable = %variable, patterns = patterns.len(), matches = found.len(), "store matched");
        Ok(found)
    }
}

#[async_trait]
impl MatchStore for MemoryStore {
    fn observe(&self, triples: &[Triple]) -> Result<()> {
        let mut observed = self.observed.write().map_err(poisoned)?;
        for triple in triples {
            observed.insert(*triple);
        }
        Ok(())
    }
    /// Runs the join on the blocking pool. Dropping the returned future, e.g.
    /// on a timeout or cancellation, stops the join at its next step.
    async fn match_bindings(&self, patterns: &[TriplePattern], variable: &Variable) -> Result<Bindings> {
        if !patterns.iter().any(|pattern| pattern.contains(variable)) {
            return Ok(Bindings::new());
        }
        let abandon = Abandon::default();
        let abandoned = Arc::clone(&abandon.0);
        let observed = Arc::clone(&self.observed);
        let patterns = patterns.to_vec();
        let focus = variable.clone();
        let joined = tokio::task::spawn_blocking(move || -> Result<Bindings> {
            let observed = observed.read().map_err(poisoned)?;
            Ok(search(&observed, &patterns, &focus, &abandoned))
        })
        .await;
        drop(abandon);
        let found = joined.map_err(|e| LdfjoinError::Store(format!("join task failed: {e}")))??;
        debug!(variable = %variable, matches = found.len(), "store matched");
        Ok(found)
    }
}
