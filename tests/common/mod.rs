#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ldfjoin::barrier::UpdateAck;
use ldfjoin::construct::{Bindings, Triple, TriplePattern, Variable};
use ldfjoin::datatype::Estimate;
use ldfjoin::node::{ActiveStream, ClusterUpdate, Hunger, NodeId, PatternNode, StreamKind};
use ldfjoin::store::MatchStore;
use ldfjoin::Result;

/// How a [`StubNode`] answers an update.
#[derive(Debug, Clone)]
pub enum AckMode {
    Immediate,
    /// Acknowledges from a spawned task after the delay.
    Later(Duration),
    /// Parks the ack; the test decides when (or whether) to finish it.
    Hold(Arc<Mutex<Vec<UpdateAck>>>),
    /// Drops the ack without acknowledging.
    Forget,
}

/// What a node saw of one update.
#[derive(Debug, Clone, PartialEq)]
pub struct Seen {
    pub variable: Variable,
    pub estimate: Estimate,
    pub complete: u64,
    pub added: u64,
    pub removed: u64,
    pub trigger: Option<NodeId>,
}

/// Pattern node with directly settable state.
#[derive(Debug)]
pub struct StubNode {
    pub pattern: TriplePattern,
    pub kind: StreamKind,
    pub hunger: Hunger,
    pub cost: f64,
    pub ended: bool,
    pub stream: ActiveStream,
    pub ack: AckMode,
    pub seen: Arc<Mutex<Vec<Seen>>>,
    pub pages: VecDeque<Vec<Triple>>,
}

impl StubNode {
    pub fn new(pattern: TriplePattern) -> Self {
        Self {
            pattern,
            kind: StreamKind::Download,
            hunger: Hunger::Unaware,
            cost: 1.0,
            ended: false,
            stream: ActiveStream::new(),
            ack: AckMode::Immediate,
            seen: Arc::default(),
            pages: VecDeque::new(),
        }
    }
    pub fn cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }
    pub fn kind(mut self, kind: StreamKind) -> Self {
        self.kind = kind;
        self
    }
    pub fn hunger(mut self, hunger: Hunger) -> Self {
        self.hunger = hunger;
        self
    }
    pub fn ended(mut self) -> Self {
        self.ended = true;
        self
    }
    pub fn ack(mut self, ack: AckMode) -> Self {
        self.ack = ack;
        self
    }
    /// Pretends `read` triples have been read out of an announced `count`.
    pub fn read(mut self, read: usize, count: Estimate) -> Self {
        let triples: Vec<Triple> = (0..read as u64).map(|i| Triple::new(i, 0, i)).collect();
        self.stream.observe(&triples);
        self.stream.set_count(count);
        self
    }
    pub fn triple_count(mut self, triple_count: u64, count: Estimate) -> Self {
        self.stream.set_triple_count(triple_count);
        self.stream.set_count(count);
        self
    }
    pub fn page(mut self, triples: Vec<Triple>) -> Self {
        self.pages.push_back(triples);
        self
    }
    pub fn seen(&self) -> Arc<Mutex<Vec<Seen>>> {
        Arc::clone(&self.seen)
    }
}

#[async_trait]
impl PatternNode for StubNode {
    fn pattern(&self) -> &TriplePattern {
        &self.pattern
    }
    fn kind(&self) -> &StreamKind {
        &self.kind
    }
    fn hunger(&self) -> Hunger {
        self.hunger
    }
    fn cost(&self) -> f64 {
        self.cost
    }
    fn remaining(&self) -> Option<u64> {
        None
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
        self.seen.lock().expect("seen lock").push(Seen {
            variable: update.variable.clone(),
            estimate: update.estimate,
            complete: update.complete_bindings.len(),
            added: update.added.len(),
            removed: update.removed.len(),
            trigger: update.trigger,
        });
        match &self.ack {
            AckMode::Immediate => ack.done(),
            AckMode::Later(delay) => {
                let delay = *delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    ack.done();
                });
            }
            AckMode::Hold(parked) => parked.lock().expect("parked lock").push(ack),
            AckMode::Forget => drop(ack),
        }
    }
    async fn advance(&mut self) -> Result<Vec<Triple>> {
        match self.pages.pop_front() {
            Some(triples) => {
                self.stream.observe(&triples);
                Ok(triples)
            }
            None => {
                self.ended = true;
                Ok(Vec::new())
            }
        }
    }
}

/// Store answering every join with the same values, counting the calls.
#[derive(Debug, Default)]
pub struct FixedStore {
    pub answer: Bindings,
    pub calls: Mutex<Vec<Vec<TriplePattern>>>,
}

impl FixedStore {
    pub fn new(answer: Bindings) -> Self {
        Self { answer, calls: Mutex::default() }
    }
    pub fn calls(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

#[async_trait]
impl MatchStore for FixedStore {
    fn observe(&self, _triples: &[Triple]) -> Result<()> {
        Ok(())
    }
    async fn match_bindings(&self, patterns: &[TriplePattern], _variable: &Variable) -> Result<Bindings> {
        self.calls.lock().expect("calls lock").push(patterns.to_vec());
        Ok(self.answer.clone())
    }
}

pub fn ids(values: &[u64]) -> Bindings {
    values.iter().copied().collect()
}

pub fn var(name: &str) -> Variable {
    Variable::new(name)
}

/// ?s <predicate> ?o
pub fn pattern(s: &str, predicate: u64, o: &str) -> TriplePattern {
    TriplePattern::new(var(s), predicate, var(o))
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
