use std::sync::Arc;

// used to keep the one-to-one mapping between terms and their assigned identities
use bimap::BiMap;

// maps keyed by variables and patterns use a fast hash
use core::hash::BuildHasherDefault;
use std::hash::Hash;
use seahash::SeaHasher;

// binding sets are sets of term identities
use roaring::RoaringTreemap;

// used to print out readable forms of a construct
use std::fmt;

// ------------- Term -------------
pub type TermId = u64;

pub type VariableHasher = BuildHasherDefault<SeaHasher>;
pub type OtherHasher = BuildHasherDefault<SeaHasher>;

/// A set of values (term identities) for a single variable.
pub type Bindings = RoaringTreemap;

pub const GENESIS: TermId = 0;

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Term {
    Iri(String),
    Literal(String),
    BlankNode(String),
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{}>", iri),
            Term::Literal(value) => write!(f, "\"{}\"", value),
            Term::BlankNode(label) => write!(f, "_:{}", label),
        }
    }
}

/// Dictionary encoding of terms. Every term seen during a query gets a
/// stable identity so that bindings can be kept in bitmaps.
#[derive(Debug)]
pub struct TermKeeper {
    lower_bound: TermId,
    kept: BiMap<Term, TermId>,
}
impl TermKeeper {
    pub fn new() -> Self {
        Self {
            lower_bound: GENESIS,
            kept: BiMap::new(),
        }
    }
    pub fn keep(&mut self, term: Term) -> (TermId, bool) {
        if let Some(id) = self.kept.get_by_left(&term) {
            return (*id, true);
        }
        self.lower_bound += 1;
        self.kept.insert(term, self.lower_bound);
        (self.lower_bound, false)
    }
    pub fn id(&self, term: &Term) -> Option<TermId> {
        self.kept.get_by_left(term).copied()
    }
    pub fn lookup(&self, id: TermId) -> Option<&Term> {
        self.kept.get_by_right(&id)
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
}
impl Default for TermKeeper {
    fn default() -> Self {
        Self::new()
    }
}

// ------------- Variable -------------
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Variable(Arc<str>);

impl Variable {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name.trim_start_matches('?')))
    }
    pub fn name(&self) -> &str {
        &self.0
    }
}
impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "?{}", self.0)
    }
}

// ------------- Pattern -------------
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum PatternTerm {
    Variable(Variable),
    Constant(TermId),
}
impl PatternTerm {
    pub fn variable(&self) -> Option<&Variable> {
        match self {
            PatternTerm::Variable(v) => Some(v),
            PatternTerm::Constant(_) => None,
        }
    }
}
impl From<Variable> for PatternTerm {
    fn from(v: Variable) -> Self {
        PatternTerm::Variable(v)
    }
}
impl From<TermId> for PatternTerm {
    fn from(id: TermId) -> Self {
        PatternTerm::Constant(id)
    }
}
impl fmt::Display for PatternTerm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PatternTerm::Variable(v) => write!(f, "{}", v),
            PatternTerm::Constant(id) => write!(f, "#{}", id),
        }
    }
}

/// A fully materialized triple in dictionary encoded form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Triple {
    pub subject: TermId,
    pub predicate: TermId,
    pub object: TermId,
}
impl Triple {
    pub fn new(subject: TermId, predicate: TermId, object: TermId) -> Self {
        Self { subject, predicate, object }
    }
    pub fn terms(&self) -> [TermId; 3] {
        [self.subject, self.predicate, self.object]
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct TriplePattern {
    subject: PatternTerm,
    predicate: PatternTerm,
    object: PatternTerm,
}
impl TriplePattern {
    pub fn new(
        subject: impl Into<PatternTerm>,
        predicate: impl Into<PatternTerm>,
        object: impl Into<PatternTerm>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }
    pub fn subject(&self) -> &PatternTerm {
        &self.subject
    }
    pub fn predicate(&self) -> &PatternTerm {
        &self.predicate
    }
    pub fn object(&self) -> &PatternTerm {
        &self.object
    }
    pub fn positions(&self) -> [&PatternTerm; 3] {
        [&self.subject, &self.predicate, &self.object]
    }
    /// Distinct variables in subject, predicate, object order.
    pub fn variables(&self) -> Vec<Variable> {
        let mut variables: Vec<Variable> = Vec::with_capacity(3);
        for v in self.positions().into_iter().filter_map(PatternTerm::variable) {
            if !variables.contains(v) {
                variables.push(v.clone());
            }
        }
        variables
    }
    pub fn contains(&self, variable: &Variable) -> bool {
        self.positions()
            .into_iter()
            .any(|term| term.variable() == Some(variable))
    }
    pub fn shares_variable_with(&self, variables: &[Variable]) -> bool {
        self.variables().iter().any(|v| variables.contains(v))
    }
    /// Matches the triple against the pattern and returns the value each
    /// variable takes, or None when a constant differs or a repeated
    /// variable would need two values.
    pub fn bind(&self, triple: &Triple) -> Option<Vec<(Variable, TermId)>> {
        let mut bound: Vec<(Variable, TermId)> = Vec::with_capacity(3);
        for (term, value) in self.positions().into_iter().zip(triple.terms()) {
            match term {
                PatternTerm::Constant(id) => {
                    if *id != value {
                        return None;
                    }
                }
                PatternTerm::Variable(v) => match bound.iter().find(|(known, _)| known == v) {
                    Some((_, previous)) if *previous != value => return None,
                    Some(_) => (),
                    None => bound.push((v.clone(), value)),
                },
            }
        }
        Some(bound)
    }
}
impl fmt::Display for TriplePattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)
    }
}

/// Collects the values every variable of the pattern takes over the given triples.
pub fn bindings_per_variable<'t>(
    pattern: &TriplePattern,
    triples: impl IntoIterator<Item = &'t Triple>,
) -> Vec<(Variable, Bindings)> {
    let mut collected: Vec<(Variable, Bindings)> = pattern
        .variables()
        .into_iter()
        .map(|v| (v, Bindings::new()))
        .collect();
    for triple in triples {
        if let Some(bound) = pattern.bind(triple) {
            for (v, value) in bound {
                if let Some((_, values)) = collected.iter_mut().find(|(known, _)| *known == v) {
                    values.insert(value);
                }
            }
        }
    }
    collected
}

/// Removes duplicates while keeping the first occurrence, like an ordered set.
pub fn unique_by_key<T, K: Eq + Hash>(items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    let mut seen = std::collections::HashSet::<K, OtherHasher>::default();
    items.into_iter().filter(|item| seen.insert(key(item))).collect()
}
