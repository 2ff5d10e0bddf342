//! ldfjoin – adaptive join scheduling for queries over Linked Data Fragments.
//!
//! Triple Pattern Fragment endpoints only answer single triple patterns, page
//! by page. A query with several patterns therefore has to be joined on the
//! client, and since every page costs a round trip the order in which patterns
//! are read matters a lot. There are no statistics up front, so ldfjoin
//! schedules adaptively, using what has been read so far:
//! * Every triple pattern of the query is a [`node::PatternNode`], a paged
//!   stream that can be told to advance.
//! * Every variable of the query gets a [`cluster::Cluster`]. It keeps the
//!   bindings and bounds of its variable, votes for the node to advance next,
//!   recomputes the joined ("complete") bindings through the
//!   [`store::MatchStore`], and estimates how selective each supplier is.
//! * The [`controller::Controller`] runs the loop: vote, advance, supply,
//!   update, until every stream has ended.
//!
//! Terms are dictionary encoded into [`construct::TermId`]s by a
//! [`construct::TermKeeper`], which lets binding sets be kept as roaring
//! bitmaps and joined with cheap set operations.
//!
//! ## Modules
//! * [`construct`] – Terms, variables, triples and triple patterns.
//! * [`datatype`] – The [`datatype::Estimate`] and [`datatype::MatchRate`] values used by scheduling.
//! * [`cluster`] – Per-variable scheduling: bindings, bounds, vote, supply, update.
//! * [`barrier`] – The fan-out/fan-in countdown closing every update cycle.
//! * [`node`] – The pattern node interface and a node over paged fragment sources.
//! * [`store`] – The match store interface and an in-memory implementation.
//! * [`fetch`] – A bounded-concurrency HTTP fetcher with FIFO queueing and bulk cancellation.
//! * [`controller`] – The scheduling loop for one query.
//! * [`interface`] – Query ids, cancellation tokens and background execution.
//! * [`config`] – Layered configuration (defaults, file, environment).
//!
//! ## Quick Start
//! ```
//! use ldfjoin::cluster::Cluster;
//! use ldfjoin::construct::{Bindings, Term, TermKeeper, Variable};
//!
//! let mut keeper = TermKeeper::new();
//! let (alice, _) = keeper.keep(Term::Iri("http://example.org/alice".into()));
//! let (bob, _) = keeper.keep(Term::Iri("http://example.org/bob".into()));
//!
//! let mut cluster = Cluster::new(Variable::new("person"));
//! cluster.add_bindings(&[alice, bob].into_iter().collect::<Bindings>());
//! cluster.add_bounds(&[alice].into_iter().collect::<Bindings>());
//! assert_eq!(cluster.bindings().len(), 1);
//! assert!(cluster.removed().contains(bob));
//! ```
//!
//! ## Logging
//! All components log through `tracing`; install any subscriber to see the
//! scheduling decisions (`debug`) and the per-cycle details (`trace`).

pub mod barrier;
pub mod cluster;
pub mod config;
pub mod construct;
pub mod controller;
pub mod datatype;
pub mod error;
pub mod fetch;
pub mod interface;
pub mod node;
pub mod store;

pub use error::{LdfjoinError, Result};
