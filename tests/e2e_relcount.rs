//! End-to-end integration tests for the relationship degree cache.
//!
//! Each test drives a `Graph<MemoryBackend>` through committed transactions
//! and checks what registered `RelcountModule`s report afterwards.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use relcount::relcount::{
    DegreeCachingStrategy, DegreeMap, NodePropertiesCaching, PropertyBuffer, SingleNodePropertyCaching,
};
use relcount::{
    Direction, Error, Graph, MemoryBackend, NodeId, PropertyMap, RelationshipDescriptor, RelcountConfig, RelcountModule,
    StorageBackend, TxMode, Value, props,
};

fn d(s: &str) -> RelationshipDescriptor {
    s.parse().unwrap()
}

fn module_with(
    graph: &Graph<MemoryBackend>,
    id: &str,
    caching: Arc<dyn DegreeCachingStrategy>,
) -> Arc<RelcountModule<MemoryBackend>> {
    let config = RelcountConfig::default().with_threshold(3).with_caching(caching);
    let module = Arc::new(RelcountModule::with_id(id, graph.backend_handle(), config).unwrap());
    graph.register_handler(module.clone());
    module
}

async fn cached_degrees(graph: &Graph<MemoryBackend>, module: &RelcountModule<MemoryBackend>, node: NodeId) -> DegreeMap {
    let backend = graph.backend();
    let tx = backend.begin_tx(TxMode::ReadOnly).await.unwrap();
    let props = PropertyBuffer::load(backend, &tx, node).await.unwrap();
    let degrees = module.config().caching().read_degrees(&props, module.format()).unwrap();
    backend.commit_tx(tx).await.unwrap();
    degrees
}

// ============================================================================
// 1. Both encodings agree
// ============================================================================

#[tokio::test]
async fn test_encodings_report_identical_counts() {
    let graph = Graph::open_memory().await.unwrap();
    let per_key = module_with(&graph, "NP", Arc::new(NodePropertiesCaching));
    let blob = module_with(&graph, "SP", Arc::new(SingleNodePropertyCaching));

    let mut tx = graph.begin(TxMode::ReadWrite).await.unwrap();
    let hub = tx.create_node(&["Hub"], PropertyMap::new()).await.unwrap();
    for i in 0..6 {
        let other = tx.create_node(&[], PropertyMap::new()).await.unwrap();
        let colour = if i % 2 == 0 { "red" } else { "blue" };
        tx.create_relationship(hub, other, "LINK", props([("colour", colour)])).await.unwrap();
        tx.create_relationship(other, hub, "BACK", props([("n", i)])).await.unwrap();
    }
    tx.commit().await.unwrap();

    for query in ["LINK#OUTGOING", "LINK#OUTGOING#colour#red", "BACK#INCOMING", "BACK#BOTH", "LINK#INCOMING"] {
        assert_eq!(
            per_key.count(hub, &d(query)).await.unwrap(),
            blob.count(hub, &d(query)).await.unwrap(),
            "{query}"
        );
    }
    assert_eq!(blob.count(hub, &d("LINK#OUTGOING#colour#red")).await.unwrap(), 3);
    assert_eq!(blob.count(hub, &d("BACK#INCOMING")).await.unwrap(), 6);
    assert_eq!(cached_degrees(&graph, &per_key, hub).await, cached_degrees(&graph, &blob, hub).await);
}

#[tokio::test]
async fn test_encodings_use_their_own_node_properties() {
    let graph = Graph::open_memory().await.unwrap();
    let per_key = module_with(&graph, "NP", Arc::new(NodePropertiesCaching));
    let blob = module_with(&graph, "SP", Arc::new(SingleNodePropertyCaching));

    let mut tx = graph.begin(TxMode::ReadWrite).await.unwrap();
    let a = tx.create_node(&[], PropertyMap::new()).await.unwrap();
    let b = tx.create_node(&[], PropertyMap::new()).await.unwrap();
    tx.create_relationship(a, b, "R", props([("k", "v1")])).await.unwrap();
    tx.commit().await.unwrap();

    let tx = graph.begin(TxMode::ReadOnly).await.unwrap();
    let node = tx.get_node(a).await.unwrap().unwrap();
    let key = per_key.format().serialize(&d("R#OUTGOING#k#v1"));
    assert_eq!(node.properties.get(&key), Some(&Value::Int(1)));
    assert!(matches!(node.properties.get(blob.format().prefix()), Some(Value::Bytes(_))));
    assert_eq!(node.properties.len(), 2);
}

#[tokio::test]
async fn test_separator_and_wildcard_characters_in_values() {
    let graph = Graph::open_memory().await.unwrap();
    let per_key = module_with(&graph, "NP", Arc::new(NodePropertiesCaching));
    let blob = module_with(&graph, "SP", Arc::new(SingleNodePropertyCaching));

    let mut tx = graph.begin(TxMode::ReadWrite).await.unwrap();
    let a = tx.create_node(&[], PropertyMap::new()).await.unwrap();
    let b = tx.create_node(&[], PropertyMap::new()).await.unwrap();
    let c = tx.create_node(&[], PropertyMap::new()).await.unwrap();
    tx.create_relationship(a, b, "TAGGED", props([("tag", "#rust")])).await.unwrap();
    tx.create_relationship(a, b, "RATED", props([("stars", "*")])).await.unwrap();
    tx.create_relationship(a, c, "RATED", props([("stars", "5")])).await.unwrap();
    tx.create_relationship(c, b, "TAGGED", props([("tag", "a\\b#*")])).await.unwrap();
    tx.commit().await.unwrap();

    let starred = RelationshipDescriptor::new("RATED", Direction::Outgoing).with("stars", "*");
    let slashed = RelationshipDescriptor::new("TAGGED", Direction::Outgoing).with("tag", "a\\b#*");
    for module in [&per_key, &blob] {
        assert_eq!(module.count(a, &d("TAGGED#OUTGOING")).await.unwrap(), 1);
        assert_eq!(module.count(a, &d("RATED#OUTGOING")).await.unwrap(), 2);
        assert_eq!(module.count(a, &d("RATED#OUTGOING#stars#5")).await.unwrap(), 1);
        assert_eq!(module.count(a, &d("RATED#OUTGOING#stars#*")).await.unwrap(), 2);
        assert_eq!(module.count(a, &starred).await.unwrap(), 1);
        assert_eq!(module.count(a, &d("RATED#OUTGOING#stars#\\*")).await.unwrap(), 1);
        assert_eq!(module.count(c, &slashed).await.unwrap(), 1);
        assert_eq!(module.count(b, &d("TAGGED#INCOMING")).await.unwrap(), 2);
    }

    // the same nodes keep accepting writes
    let mut tx = graph.begin(TxMode::ReadWrite).await.unwrap();
    tx.create_relationship(a, c, "TAGGED", props([("tag", "#rust")])).await.unwrap();
    tx.create_relationship(c, b, "TAGGED", props([("tag", "a\\b#*")])).await.unwrap();
    tx.commit().await.unwrap();

    for module in [&per_key, &blob] {
        assert_eq!(module.count(a, &d("TAGGED#OUTGOING#tag#\\#rust")).await.unwrap(), 2);
        assert_eq!(module.count(c, &slashed).await.unwrap(), 2);
    }
    assert_eq!(cached_degrees(&graph, &per_key, a).await, cached_degrees(&graph, &blob, a).await);

    per_key.reinitialize().await.unwrap();
    blob.reinitialize().await.unwrap();
    for module in [&per_key, &blob] {
        assert_eq!(module.count(a, &starred).await.unwrap(), 1);
        assert_eq!(module.count(a, &d("TAGGED#OUTGOING")).await.unwrap(), 2);
        assert_eq!(module.count(c, &slashed).await.unwrap(), 2);
    }
}

// ============================================================================
// 2. Relationship lifecycle
// ============================================================================

#[tokio::test]
async fn test_property_change_moves_the_count() {
    let graph = Graph::open_memory().await.unwrap();
    let module = RelcountModule::register(&graph, RelcountConfig::default());

    let mut tx = graph.begin(TxMode::ReadWrite).await.unwrap();
    let a = tx.create_node(&[], PropertyMap::new()).await.unwrap();
    let b = tx.create_node(&[], PropertyMap::new()).await.unwrap();
    let r = tx.create_relationship(a, b, "RATED", props([("stars", 3)])).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = graph.begin(TxMode::ReadWrite).await.unwrap();
    tx.set_relationship_property(r, "stars", 5).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(module.count(a, &d("RATED#OUTGOING#stars#3")).await.unwrap(), 0);
    assert_eq!(module.count(a, &d("RATED#OUTGOING#stars#5")).await.unwrap(), 1);
    assert_eq!(module.count(b, &d("RATED#INCOMING#stars#5")).await.unwrap(), 1);

    let mut tx = graph.begin(TxMode::ReadWrite).await.unwrap();
    tx.remove_relationship_property(r, "stars").await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(module.count_literally(a, &d("RATED#OUTGOING")).await.unwrap(), 1);
    assert_eq!(module.count(a, &d("RATED#OUTGOING#stars#5")).await.unwrap(), 0);
}

#[tokio::test]
async fn test_created_and_deleted_in_one_transaction_leaves_no_trace() {
    let graph = Graph::open_memory().await.unwrap();
    let module = RelcountModule::register(&graph, RelcountConfig::default());

    let mut tx = graph.begin(TxMode::ReadWrite).await.unwrap();
    let a = tx.create_node(&[], PropertyMap::new()).await.unwrap();
    let b = tx.create_node(&[], PropertyMap::new()).await.unwrap();
    let r = tx.create_relationship(a, b, "TMP", PropertyMap::new()).await.unwrap();
    tx.delete_relationship(r).await.unwrap();
    tx.commit().await.unwrap();

    assert!(cached_degrees(&graph, &module, a).await.is_empty());
    let tx = graph.begin(TxMode::ReadOnly).await.unwrap();
    assert!(tx.get_node(a).await.unwrap().unwrap().properties.is_empty());
}

#[tokio::test]
async fn test_detach_delete_updates_surviving_neighbours() {
    let graph = Graph::open_memory().await.unwrap();
    let module = RelcountModule::register(&graph, RelcountConfig::default());

    let mut tx = graph.begin(TxMode::ReadWrite).await.unwrap();
    let a = tx.create_node(&[], PropertyMap::new()).await.unwrap();
    let b = tx.create_node(&[], PropertyMap::new()).await.unwrap();
    let c = tx.create_node(&[], PropertyMap::new()).await.unwrap();
    tx.create_relationship(a, b, "KNOWS", PropertyMap::new()).await.unwrap();
    tx.create_relationship(a, c, "KNOWS", PropertyMap::new()).await.unwrap();
    tx.create_relationship(b, c, "KNOWS", PropertyMap::new()).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = graph.begin(TxMode::ReadWrite).await.unwrap();
    assert!(tx.detach_delete_node(b).await.unwrap());
    tx.commit().await.unwrap();

    assert_eq!(module.count(a, &d("KNOWS#OUTGOING")).await.unwrap(), 1);
    assert_eq!(module.count(c, &d("KNOWS#INCOMING")).await.unwrap(), 1);
}

#[tokio::test]
async fn test_loop_deleted_again() {
    let graph = Graph::open_memory().await.unwrap();
    let module = RelcountModule::register(&graph, RelcountConfig::default());

    let mut tx = graph.begin(TxMode::ReadWrite).await.unwrap();
    let a = tx.create_node(&[], PropertyMap::new()).await.unwrap();
    let r = tx.create_relationship(a, a, "SELF", props([("w", 1)])).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(module.count(a, &d("SELF#BOTH#w#1")).await.unwrap(), 2);

    let mut tx = graph.begin(TxMode::ReadWrite).await.unwrap();
    tx.delete_relationship(r).await.unwrap();
    tx.commit().await.unwrap();
    assert!(cached_degrees(&graph, &module, a).await.is_empty());
}

// ============================================================================
// 3. (Re)initialization
// ============================================================================

#[tokio::test]
async fn test_initialize_matches_live_maintenance() {
    let graph = Graph::open_memory().await.unwrap();
    let live = module_with(&graph, "LIVE", Arc::new(SingleNodePropertyCaching));

    let mut tx = graph.begin(TxMode::ReadWrite).await.unwrap();
    let mut nodes = Vec::new();
    for _ in 0..5 {
        nodes.push(tx.create_node(&[], PropertyMap::new()).await.unwrap());
    }
    for (i, &src) in nodes.iter().enumerate() {
        for &dst in &nodes[i..] {
            tx.create_relationship(src, dst, "E", props([("w", (i % 2) as i64)])).await.unwrap();
        }
    }
    tx.commit().await.unwrap();

    let config = RelcountConfig::default()
        .with_threshold(3)
        .with_caching(Arc::new(SingleNodePropertyCaching))
        .with_initialize_batch_size(2);
    let rebuilt = RelcountModule::with_id("INIT", graph.backend_handle(), config).unwrap();
    rebuilt.initialize().await.unwrap();

    for &node in &nodes {
        assert_eq!(cached_degrees(&graph, &live, node).await, cached_degrees(&graph, &rebuilt, node).await);
        assert_eq!(
            live.count(node, &d("E#BOTH")).await.unwrap(),
            rebuilt.count(node, &d("E#BOTH")).await.unwrap()
        );
    }
}

#[tokio::test]
async fn test_out_of_sync_cache_recovers_by_reinitializing() {
    let graph = Graph::open_memory().await.unwrap();

    let mut tx = graph.begin(TxMode::ReadWrite).await.unwrap();
    let a = tx.create_node(&[], PropertyMap::new()).await.unwrap();
    let b = tx.create_node(&[], PropertyMap::new()).await.unwrap();
    let old = tx.create_relationship(a, b, "R", props([("k", "old")])).await.unwrap();
    tx.create_relationship(a, b, "R", props([("k", "kept")])).await.unwrap();
    tx.commit().await.unwrap();

    let module = RelcountModule::register(&graph, RelcountConfig::default());
    let mut tx = graph.begin(TxMode::ReadWrite).await.unwrap();
    tx.delete_relationship(old).await.unwrap();
    let err = tx.commit().await.unwrap_err();
    assert!(matches!(err, Error::NeedsInitialization { .. }));

    module.reinitialize().await.unwrap();
    module.reinitialize().await.unwrap();

    let tx = graph.begin(TxMode::ReadOnly).await.unwrap();
    let stored = tx.get_relationships(a, Direction::Outgoing, Some("R")).await.unwrap();
    assert_eq!(module.count(a, &d("R#OUTGOING")).await.unwrap(), stored.len() as i64);
    assert_eq!(module.count(a, &d("R#OUTGOING#k#kept")).await.unwrap(), 1);
}
