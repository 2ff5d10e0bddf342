mod common;

use std::sync::Arc;

use common::{FixedStore, StubNode, approx, ids, pattern, var};
use ldfjoin::cluster::{Cluster, SupplyStatistics, supply_path};
use ldfjoin::construct::TriplePattern;
use ldfjoin::datatype::{Estimate, MatchRate};
use ldfjoin::node::{NodeRegistry, StreamKind};

#[tokio::test]
async fn supply_without_suppliers_leaves_everything_alone() {
    let mut registry = NodeRegistry::new();
    let filter = registry.register(Box::new(
        StubNode::new(TriplePattern::new(var("x"), 1u64, 2u64)).kind(StreamKind::Fed { bind_var: var("x") }),
    ));
    let store = FixedStore::new(ids(&[1, 2, 3]));
    let mut cluster = Cluster::with_nodes(var("x"), vec![filter]);

    cluster.supply(&mut registry, &store).await.expect("supply");
    assert_eq!(store.calls(), 0, "the store is not consulted");
    assert!(cluster.complete_bindings().is_empty());
    assert_eq!(cluster.estimate(), Estimate::Unbounded);
}

#[tokio::test]
async fn supply_derives_match_rate_and_estimate() {
    let mut registry = NodeRegistry::new();
    let id = registry.register(Box::new(
        StubNode::new(pattern("x", 1, "y")).triple_count(10, Estimate::from(100)),
    ));
    let store = FixedStore::new(ids(&[1, 2, 3]));
    let mut cluster = Cluster::with_nodes(var("x"), vec![id]);

    cluster.supply(&mut registry, &store).await.expect("supply");
    assert_eq!(cluster.complete_bindings(), &ids(&[1, 2, 3]));
    let stream = registry.get(id).expect("registered").stream();
    let rate = stream.match_rate(&var("x")).expect("rate recorded");
    assert!(approx(rate.value(), 0.3), "3 matches over 10 triples, got {rate}");
    match stream.estimate(&var("x")).expect("estimate recorded") {
        Estimate::Bounded(estimate) => assert!(approx(estimate, 30.0), "got {estimate}"),
        Estimate::Unbounded => panic!("estimate should be bounded"),
    }
    assert!(approx(cluster.estimate().as_f64(), 30.0));
}

#[tokio::test]
async fn supply_with_empty_join_is_unbounded() {
    let mut registry = NodeRegistry::new();
    let id = registry.register(Box::new(
        StubNode::new(pattern("x", 1, "y")).triple_count(10, Estimate::from(100)),
    ));
    let store = FixedStore::new(ids(&[]));
    let mut cluster = Cluster::with_nodes(var("x"), vec![id]);

    cluster.supply(&mut registry, &store).await.expect("supply");
    assert_eq!(store.calls(), 1);
    assert!(cluster.complete_bindings().is_empty());
    assert_eq!(cluster.estimate(), Estimate::Unbounded);
    let stream = registry.get(id).expect("registered").stream();
    assert_eq!(stream.match_rate(&var("x")), Some(MatchRate::ZERO));
}

#[tokio::test]
async fn supply_of_an_unread_stream_has_zero_rate() {
    let mut registry = NodeRegistry::new();
    let id = registry.register(Box::new(StubNode::new(pattern("x", 1, "y"))));
    let store = FixedStore::new(ids(&[5]));
    let mut cluster = Cluster::with_nodes(var("x"), vec![id]);

    cluster.supply(&mut registry, &store).await.expect("supply");
    let stream = registry.get(id).expect("registered").stream();
    assert_eq!(stream.match_rate(&var("x")), Some(MatchRate::ZERO), "0/0 is not a rate");
    assert_eq!(stream.estimate(&var("x")), Some(Estimate::Unbounded), "nothing announced yet");
}

#[tokio::test]
async fn supply_estimate_is_the_largest_supplier_estimate() {
    let mut registry = NodeRegistry::new();
    let small = registry.register(Box::new(
        StubNode::new(pattern("x", 1, "y")).triple_count(20, Estimate::from(40)),
    ));
    let large = registry.register(Box::new(
        StubNode::new(pattern("x", 2, "z")).triple_count(4, Estimate::from(400)),
    ));
    let store = Arc::new(FixedStore::new(ids(&[1, 2])));
    let mut cluster = Cluster::with_nodes(var("x"), vec![small, large]);

    cluster.supply(&mut registry, store.as_ref()).await.expect("supply");
    // 2/20 * 40 = 4 and 2/4 * 400 = 200
    assert!(approx(cluster.estimate().as_f64(), 200.0));
    let calls = store.calls.lock().expect("calls lock");
    assert_eq!(calls[0].len(), 2, "both supplier patterns are joined");
}

#[test]
fn statistics_without_suppliers_are_empty() {
    let stats = SupplyStatistics::compute(ids(&[1]), &[]);
    assert!(stats.match_rates.is_empty());
    assert_eq!(stats.estimate, Estimate::Unbounded);
}

#[test]
fn unbounded_count_keeps_the_estimate_unbounded() {
    let stats = SupplyStatistics::compute(ids(&[1, 2]), &[(4, Estimate::Unbounded)]);
    assert!(approx(stats.match_rates[0].value(), 0.5));
    assert_eq!(stats.estimates[0], Estimate::Unbounded);
}

#[test]
fn supply_path_follows_bind_variables() {
    let mut registry = NodeRegistry::new();
    // ?p knows ?f, fed by the values of ?p from ?p type Person
    let fed = registry.register(Box::new(
        StubNode::new(pattern("p", 1, "f")).kind(StreamKind::Fed { bind_var: var("p") }),
    ));
    let typed = registry.register(Box::new(StubNode::new(TriplePattern::new(var("p"), 2u64, 3u64))));
    let named = registry.register(Box::new(StubNode::new(pattern("f", 4, "n"))));
    let unrelated = registry.register(Box::new(StubNode::new(pattern("a", 5, "b"))));

    let path = supply_path(&registry, &[fed]);
    assert!(path.contains(&fed));
    assert!(path.contains(&typed), "supplier of the bind variable");
    assert!(!path.contains(&unrelated));
    // the fed node is only connected through its bind variable
    assert!(!path.contains(&named));

    let friends = Cluster::with_nodes(var("f"), registry.touching(&var("f")));
    assert_eq!(friends.depends_on(&registry), vec![var("p")]);
}

#[test]
fn supply_path_collects_connected_downloads() {
    let mut registry = NodeRegistry::new();
    let a = registry.register(Box::new(StubNode::new(pattern("x", 1, "y"))));
    let b = registry.register(Box::new(StubNode::new(pattern("y", 2, "z"))));
    let c = registry.register(Box::new(StubNode::new(pattern("z", 3, "w"))));
    let d = registry.register(Box::new(StubNode::new(pattern("q", 4, "r"))));
    // same pattern as a, deduplicated
    registry.register(Box::new(StubNode::new(pattern("x", 1, "y"))));

    let path = supply_path(&registry, &[a]);
    assert_eq!(path, vec![a, b, c]);
    assert!(!path.contains(&d));
}

#[test]
fn supply_path_terminates_on_cyclic_bindings() {
    let mut registry = NodeRegistry::new();
    let a = registry.register(Box::new(
        StubNode::new(pattern("x", 1, "y")).kind(StreamKind::Fed { bind_var: var("y") }),
    ));
    let b = registry.register(Box::new(
        StubNode::new(pattern("y", 2, "x")).kind(StreamKind::Fed { bind_var: var("x") }),
    ));
    let path = supply_path(&registry, &[a]);
    assert!(path.contains(&a) && path.contains(&b));
}
