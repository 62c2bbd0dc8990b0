//! End-to-end scenarios over a full store.

use chitta_engine::{
    Confidence, Mind, MindConfig, NodeType, SearchMode,
};
use chitta_embedder::{normalize, HashEmbedder};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tempfile::TempDir;

const DIM: usize = 64;

fn test_config(dir: &TempDir, name: &str) -> MindConfig {
    let mut config = MindConfig::new(dir.path().join(name));
    config.dimension = DIM;
    config.total_capacity = 512;
    config
}

fn open_mind(dir: &TempDir, name: &str) -> Mind {
    let _ = env_logger::builder().is_test(true).try_init();
    Mind::open_with_embedder(
        test_config(dir, name),
        Some(Arc::new(HashEmbedder::new(DIM))),
    )
    .unwrap()
}

fn unit_vector(seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut v: Vec<f32> = (0..DIM).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    normalize(&mut v);
    v
}

/// A vector near `base`: cosine well above 0.95.
fn near_vector(base: &[f32], seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut v: Vec<f32> = base
        .iter()
        .map(|&x| x + rng.gen_range(-0.02f32..0.02))
        .collect();
    normalize(&mut v);
    v
}

// Scenario 1: basic recall ranks related texts over the unrelated one.
#[test]
fn test_basic_recall_ordering() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "basic");

    let simple_a = mind
        .remember("simple design is elegant design", NodeType::Wisdom)
        .unwrap();
    let simple_b = mind
        .remember("keep the design simple and clean", NodeType::Wisdom)
        .unwrap();
    let weather = mind
        .remember("the weather is nice today", NodeType::Wisdom)
        .unwrap();

    let results = mind
        .recall("simple elegant design", 3, 0.0, SearchMode::Dense)
        .unwrap();
    assert_eq!(results.len(), 3, "all three nodes must come back");
    assert!(results[0].similarity > 0.4, "top cosine too low");

    let rank_of = |id| results.iter().position(|r| r.id == id).unwrap();
    assert!(rank_of(simple_a) < rank_of(weather));
    assert!(rank_of(simple_b) < rank_of(weather));
}

// Scenario 2: activation halves along a unit-weight chain.
#[test]
fn test_spreading_activation_chain() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "spread");

    let ids: Vec<_> = (0..4)
        .map(|i| {
            mind.remember_vector(
                NodeType::Belief,
                &unit_vector(100 + i),
                format!("chain node {i}").into_bytes(),
                None,
                &[],
            )
            .unwrap()
        })
        .collect();
    for pair in ids.windows(2) {
        mind.hebbian_strengthen(&pair[0], &pair[1], 1.0).unwrap();
    }

    let activations = mind.spread_activation(&ids[0], 1.0, 0.5, 5).unwrap();
    let level = |id| {
        activations
            .iter()
            .find(|(aid, _)| aid == id)
            .map(|(_, a)| *a)
            .unwrap_or(0.0)
    };
    assert!((level(&ids[0]) - 1.0).abs() <= 0.02);
    assert!((level(&ids[1]) - 0.5).abs() <= 0.02);
    assert!((level(&ids[2]) - 0.25).abs() <= 0.02);
    assert!((level(&ids[3]) - 0.125).abs() <= 0.02);
}

// Scenario 3: Hebbian growth accumulates and caps at 1.
#[test]
fn test_hebbian_growth_and_cap() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "hebbian");

    let a = mind.remember("first concept", NodeType::Belief).unwrap();
    let b = mind.remember("second concept", NodeType::Belief).unwrap();

    mind.hebbian_strengthen(&a, &b, 0.2).unwrap();
    let weight = mind.hebbian_strengthen(&a, &b, 0.3).unwrap();
    assert!((weight - 0.5).abs() < 1e-5);

    for _ in 0..20 {
        mind.hebbian_strengthen(&a, &b, 0.1).unwrap();
    }
    let node = mind.get(&a).unwrap();
    let edge = node.edges.iter().find(|e| e.target == b).unwrap();
    assert_eq!(edge.weight, 1.0);
}

// Scenario 4: persistence of confidence and recall rank across reopen.
#[test]
fn test_persistence_across_reopen() {
    let dir = TempDir::new().unwrap();
    let text = "the unified index is authoritative";
    let (id, mu_before);
    {
        let mind = open_mind(&dir, "persist");
        id = mind.remember(text, NodeType::Wisdom).unwrap();
        let confidence = mind.strengthen(&id, 0.15).unwrap();
        mu_before = confidence.mu;
        mind.close().unwrap();
    }

    let mind = open_mind(&dir, "persist");
    let node = mind.get(&id).unwrap();
    assert!((node.confidence.mu - mu_before).abs() < 1e-3);

    let results = mind.recall(text, 1, 0.0, SearchMode::Dense).unwrap();
    assert_eq!(results[0].id, id);
    assert!(results[0].similarity >= 0.95);
}

// Scenario 5: five near-identical episodes synthesize one wisdom node.
#[test]
fn test_attractor_synthesis() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "synth");

    let base = unit_vector(7);
    for i in 0..5 {
        mind.remember_vector(
            NodeType::Episode,
            &near_vector(&base, 200 + i),
            format!("deploy failed because the cache was stale ({i})").into_bytes(),
            None,
            &[],
        )
        .unwrap();
    }

    let created = mind.synthesize_wisdom().unwrap();
    assert_eq!(created, 1);

    let wisdom_ids = mind.by_type(NodeType::Wisdom, 10);
    assert_eq!(wisdom_ids.len(), 1);
    let wisdom = mind.get(&wisdom_ids[0]).unwrap();
    let text = wisdom.text().unwrap();
    assert!(
        text.starts_with("Pattern observed (5 occurrences):"),
        "unexpected synthesis text: {text}"
    );
    assert!((0.85..=0.95).contains(&wisdom.confidence.mu));

    // Synthesis only adds.
    assert_eq!(mind.by_type(NodeType::Episode, 100).len(), 5);
    // A second pass finds nothing new.
    assert_eq!(mind.synthesize_wisdom().unwrap(), 0);
}

// Scenario 6: quota eviction removes the lowest-utility episodes.
#[test]
fn test_quota_eviction() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, "quota");
    config.enable_quota_manager = true;
    // Episode cap is a quarter of total capacity.
    config.total_capacity = 400;
    let mind =
        Mind::open_with_embedder(config, Some(Arc::new(HashEmbedder::new(DIM)))).unwrap();

    let mut tainted = Vec::new();
    for i in 0..100 {
        let id = mind
            .remember_vector(
                NodeType::Episode,
                &unit_vector(1000 + i),
                format!("episode {i}").into_bytes(),
                None,
                &[],
            )
            .unwrap();
        if i < 20 {
            mind.feedback_misleading(&id, "wrong").unwrap();
            mind.feedback_misleading(&id, "wrong again").unwrap();
            tainted.push(id);
        }
    }
    for i in 100..120 {
        mind.remember_vector(
            NodeType::Episode,
            &unit_vector(1000 + i),
            format!("episode {i}").into_bytes(),
            None,
            &[],
        )
        .unwrap();
    }

    let surviving = mind.by_type(NodeType::Episode, 1000);
    assert!(surviving.len() <= 100);
    for id in &tainted {
        assert!(
            !surviving.contains(id),
            "negatively-rated episode survived eviction"
        );
    }
}

#[test]
fn test_recall_contract() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "contract");

    for i in 0..20 {
        mind.remember(&format!("memory fragment number {i}"), NodeType::Belief)
            .unwrap();
    }
    let results = mind
        .recall("memory fragment", 7, 0.0, SearchMode::Dense)
        .unwrap();

    assert!(results.len() <= 7);
    let ids: std::collections::HashSet<_> = results.iter().map(|r| r.id).collect();
    assert_eq!(ids.len(), results.len(), "duplicate ids in recall");
    for pair in results.windows(2) {
        assert!(pair[0].relevance >= pair[1].relevance);
    }
    for r in &results {
        assert!(mind.contains(&r.id));
    }

    // Result rows serialize cleanly for the RPC layer.
    let encoded = serde_json::to_string(&results).unwrap();
    assert!(encoded.contains("relevance"));
}

#[test]
fn test_hybrid_recall_finds_keyword_match() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "hybrid");

    let target = mind
        .remember(
            "the reconciler drains the write log every ten milliseconds",
            NodeType::Operation,
        )
        .unwrap();
    for i in 0..10 {
        mind.remember(&format!("unrelated filler text {i}"), NodeType::Belief)
            .unwrap();
    }

    let results = mind
        .recall(
            "how often does the reconciler drain the write log?",
            5,
            0.0,
            SearchMode::Hybrid,
        )
        .unwrap();
    assert_eq!(results[0].id, target);
}

#[test]
fn test_tag_round_trip_and_tag_recall() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "tags");

    let id = mind.remember("tagged memory", NodeType::Belief).unwrap();
    mind.add_tag(&id, "important").unwrap();
    mind.add_tag(&id, "project:chitta").unwrap();

    let hits = mind.recall_by_tag("important", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, id);

    let both = mind
        .recall_by_tags(&["important".into(), "project:chitta".into()], 10)
        .unwrap();
    assert_eq!(both.len(), 1);

    // Add then remove restores the tag set.
    mind.remove_tag(&id, "important").unwrap();
    assert!(mind.recall_by_tag("important", 10).unwrap().is_empty());
    let node = mind.get(&id).unwrap();
    assert_eq!(node.tags, vec!["project:chitta".to_string()]);
}

#[test]
fn test_tag_query_routing_short_circuits() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "routing");

    let id = mind.remember("routed by tag", NodeType::Belief).unwrap();
    mind.add_tag(&id, "inbox").unwrap();

    let results = mind.recall("tag:inbox", 10, 0.0, SearchMode::Dense).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, id);
}

#[test]
fn test_contradiction_annotation() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "truth");

    let a = mind
        .remember("the cache is always warm", NodeType::Belief)
        .unwrap();
    let b = mind
        .remember("the cache is often cold", NodeType::Belief)
        .unwrap();
    mind.add_contradiction(&a, &b, "cannot both hold", 0.9)
        .unwrap();

    let results = mind
        .recall("what do we know about the cache", 5, 0.0, SearchMode::Dense)
        .unwrap();
    let row_a = results.iter().find(|r| r.id == a).unwrap();
    assert!(row_a.has_conflict);
    assert_eq!(row_a.conflicting_ids, vec![b]);

    mind.resolve_contradiction(&a, &b, &a, None, "measured it")
        .unwrap();
    assert!(mind.get_unresolved_contradictions().is_empty());
    let results = mind
        .recall("what do we know about the cache", 5, 0.0, SearchMode::Dense)
        .unwrap();
    assert!(!results.iter().any(|r| r.has_conflict));
}

#[test]
fn test_realm_visibility_gates_recall() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, "realms");
    config.default_realm = "work".to_string();
    let mind =
        Mind::open_with_embedder(config, Some(Arc::new(HashEmbedder::new(DIM)))).unwrap();

    let id = mind
        .remember("quarterly planning notes", NodeType::Belief)
        .unwrap();

    // Visible from the work realm and from the root.
    mind.set_realm("work").unwrap();
    assert_eq!(
        mind.recall("quarterly planning", 5, 0.0, SearchMode::Dense)
            .unwrap()
            .len(),
        1
    );
    mind.set_realm("brahman").unwrap();
    assert_eq!(
        mind.recall("quarterly planning", 5, 0.0, SearchMode::Dense)
            .unwrap()
            .len(),
        1
    );

    // Invisible from a sibling realm.
    mind.create_realm("play", "brahman").unwrap();
    mind.set_realm("play").unwrap();
    assert!(mind
        .recall("quarterly planning", 5, 0.0, SearchMode::Dense)
        .unwrap()
        .is_empty());
    let _ = id;
}

#[test]
fn test_find_attractors_sorted() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "attractors");

    let hub_a = mind
        .remember_with(
            "core principle alpha",
            NodeType::Wisdom,
            Some(Confidence { mu: 0.95, sigma: 0.02, n: 10 }),
            &[],
        )
        .unwrap();
    let hub_b = mind
        .remember_with(
            "core principle beta",
            NodeType::Wisdom,
            Some(Confidence { mu: 0.8, sigma: 0.05, n: 5 }),
            &[],
        )
        .unwrap();
    for i in 0..4 {
        let leaf = mind
            .remember(&format!("supporting note {i}"), NodeType::Belief)
            .unwrap();
        mind.hebbian_strengthen(&hub_a, &leaf, 0.8).unwrap();
        if i < 2 {
            mind.hebbian_strengthen(&hub_b, &leaf, 0.8).unwrap();
        }
    }

    let attractors = mind.find_attractors(10);
    assert!(!attractors.is_empty());
    for pair in attractors.windows(2) {
        assert!(pair[0].strength >= pair[1].strength);
    }
    assert!(attractors.iter().any(|a| a.id == hub_a));
}

#[test]
fn test_propagate_confidence_bfs() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "propagate");

    let source = mind.remember("source of truth", NodeType::Wisdom).unwrap();
    let near = mind.remember("directly supported", NodeType::Belief).unwrap();
    let far = mind.remember("transitively supported", NodeType::Belief).unwrap();
    mind.hebbian_strengthen(&source, &near, 1.0).unwrap();
    mind.hebbian_strengthen(&near, &far, 1.0).unwrap();

    let before_near = mind.get(&near).unwrap().confidence.mu;
    let result = mind.propagate_confidence(&source, 0.4, 0.5, 3).unwrap();
    assert!(result.nodes_affected >= 2);
    assert!(result.total_delta_applied > 0.0);
    assert!(mind.get(&near).unwrap().confidence.mu > before_near);
}

#[test]
fn test_ledger_lifecycle() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "ledger");

    let first = mind
        .save_ledger("session summary one", Some("s1"), Some("chitta"))
        .unwrap();
    let second = mind
        .save_ledger("session summary two", Some("s2"), Some("chitta"))
        .unwrap();

    let (loaded_id, text) = mind.load_ledger(Some("s1"), None).unwrap();
    assert_eq!(loaded_id, first);
    assert_eq!(text, "session summary one");

    let ledgers = mind.list_ledgers(10, Some("chitta"));
    assert_eq!(ledgers.len(), 2);

    mind.update_ledger(&second, "session summary two, amended")
        .unwrap();
    let (reloaded, text) = mind.load_ledger(Some("s2"), None).unwrap();
    assert_eq!(reloaded, second);
    assert!(text.ends_with("amended"));
}

#[test]
fn test_triplets_and_entities() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "graph");

    mind.connect("chitta", "uses", "write-ahead-log", 0.9).unwrap();
    mind.connect("chitta", "is-a", "memory-engine", 1.0).unwrap();

    let facts = mind.query_graph(Some("chitta"), None, None);
    assert_eq!(facts.len(), 2);
    let wildcard = mind.query_graph(None, Some("uses"), None);
    assert_eq!(wildcard.len(), 1);
    assert_eq!(wildcard[0].object, "write-ahead-log");

    let entity = mind.find_entity("chitta").unwrap();
    assert_eq!(mind.find_or_create_entity("chitta").unwrap(), entity);
    let node = mind.get(&entity).unwrap();
    assert_eq!(node.node_type, NodeType::Entity);
}

#[test]
fn test_feedback_and_outcomes() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "feedback");

    let id = mind.remember("helpful fact", NodeType::Belief).unwrap();
    let before = mind.get(&id).unwrap().confidence.mu;

    mind.feedback_helpful(&id, "it worked").unwrap();
    assert_eq!(mind.apply_feedback().unwrap(), 1);
    assert!(mind.get(&id).unwrap().confidence.mu > before);

    mind.record_outcome(&[id], true, 0.1).unwrap();
    // A second apply has nothing queued.
    assert_eq!(mind.apply_feedback().unwrap(), 0);
}

#[test]
fn test_resonate_activation_outranks_identical_control() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "resonate");

    let anchor = mind
        .remember("checkpoint cadence controls recovery time", NodeType::Wisdom)
        .unwrap();
    // Two lexically identical nodes; only one is wired to the anchor.
    let satellite = mind
        .remember("restore drills run every friday", NodeType::Operation)
        .unwrap();
    let control = mind
        .remember("restore drills run every friday", NodeType::Operation)
        .unwrap();
    mind.hebbian_strengthen(&anchor, &satellite, 1.0).unwrap();

    let results = mind
        .resonate("checkpoint cadence controls recovery time", 10, 0.8)
        .unwrap();
    assert!(results.iter().any(|r| r.id == anchor));
    let rank = |id| results.iter().position(|r| r.id == id);
    match (rank(satellite), rank(control)) {
        (Some(with_edge), Some(without_edge)) => assert!(
            with_edge < without_edge,
            "spreading activation must lift the connected twin"
        ),
        (Some(_), None) => {} // control suppressed entirely
        other => panic!("connected node missing from resonance: {other:?}"),
    }
}

#[test]
fn test_full_resonate_epiplexity_boost() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "epsilonboost");

    // Equal confidence and near-equal query similarity; only the hub
    // carries edges and a computed (nonzero) epiplexity.
    let hub = mind
        .remember_with(
            "alpha beta gamma",
            NodeType::Belief,
            Some(Confidence { mu: 0.9, sigma: 0.1, n: 4 }),
            &[],
        )
        .unwrap();
    let flat = mind
        .remember_with(
            "alpha beta delta",
            NodeType::Belief,
            Some(Confidence { mu: 0.9, sigma: 0.1, n: 4 }),
            &[],
        )
        .unwrap();
    for i in 0..2 {
        let leaf = mind
            .remember(&format!("hub evidence {i}"), NodeType::Belief)
            .unwrap();
        mind.hebbian_strengthen(&hub, &leaf, 0.9).unwrap();
    }
    let hub_epsilon = mind.compute_epiplexity(&hub).unwrap();
    assert!(hub_epsilon > 0.0);

    let results = mind.full_resonate("alpha beta", 10, 0.5, 0.03).unwrap();
    let rank = |id| results.iter().position(|r| r.id == id).unwrap();
    assert!(
        rank(hub) < rank(flat),
        "epsilon-modulated boost must lift the reconstructable node"
    );
}

#[test]
fn test_full_resonate_returns_bounded() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "fullres");

    for i in 0..12 {
        mind.remember(&format!("fragment about storage {i}"), NodeType::Belief)
            .unwrap();
    }
    let results = mind.full_resonate("storage fragment", 5, 0.5, 0.03).unwrap();
    assert!(results.len() <= 5);
    for pair in results.windows(2) {
        assert!(pair[0].relevance >= pair[1].relevance);
    }
}

#[test]
fn test_lateral_inhibition_suppresses_near_duplicates() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "inhibit");

    // Twins share an embedding; the bystander overlaps the query about
    // as much as the twins but not them.
    let winner = mind
        .remember_with(
            "alpha beta gamma",
            NodeType::Belief,
            Some(Confidence { mu: 0.9, sigma: 0.1, n: 4 }),
            &[],
        )
        .unwrap();
    let loser = mind
        .remember_with(
            "alpha beta gamma",
            NodeType::Belief,
            Some(Confidence { mu: 0.8, sigma: 0.1, n: 4 }),
            &[],
        )
        .unwrap();
    let bystander = mind
        .remember_with(
            "delta epsilon",
            NodeType::Belief,
            Some(Confidence { mu: 0.9, sigma: 0.1, n: 4 }),
            &[],
        )
        .unwrap();

    let results = mind
        .recall(
            "alpha beta gamma delta epsilon zeta please",
            3,
            0.0,
            SearchMode::Dense,
        )
        .unwrap();
    let rank = |id| results.iter().position(|r| r.id == id).unwrap();

    // Without competition the loser twin would outrank the bystander
    // (same similarity, same recency, lower confidence than the winner
    // but suppressed by it); with soft inhibition it drops behind.
    assert!(rank(winner) < rank(loser));
    assert!(rank(bystander) < rank(loser));
}

#[test]
fn test_temporal_and_timeline_queries() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "temporal");

    let id = mind.remember("recent event", NodeType::Episode).unwrap();
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64;

    let range = mind
        .temporal_range_query(now - 60_000, now + 60_000, 10)
        .unwrap();
    assert_eq!(range.len(), 1);
    assert_eq!(range[0].id, id);
    assert!(mind.temporal_range_query(10, 5, 10).is_err());

    let timeline = mind.hawkes_timeline(1.0, 10).unwrap();
    assert_eq!(timeline.len(), 1);
    assert!(mind.hawkes_timeline(-1.0, 10).is_err());
}

#[test]
fn test_merge_nodes() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "merge");

    let keeper = mind.remember("canonical statement", NodeType::Belief).unwrap();
    let merged = mind.remember("duplicate statement", NodeType::Belief).unwrap();
    let third = mind.remember("related statement", NodeType::Belief).unwrap();
    mind.hebbian_strengthen(&merged, &third, 0.6).unwrap();
    mind.add_tag(&merged, "dup").unwrap();

    mind.merge_nodes(&keeper, &merged).unwrap();
    assert!(!mind.contains(&merged));

    let node = mind.get(&keeper).unwrap();
    assert!(node.edges.iter().any(|e| e.target == third));
    assert!(node.tags.contains(&"dup".to_string()));
}

#[test]
fn test_tick_reports_and_health() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, "tick");
    config.decay_interval_ms = 0;
    let mind =
        Mind::open_with_embedder(config, Some(Arc::new(HashEmbedder::new(DIM)))).unwrap();

    for i in 0..5 {
        mind.remember(&format!("steady memory {i}"), NodeType::Wisdom)
            .unwrap();
    }
    let report = mind.tick().unwrap();
    assert!(report.psi > 0.0);
    assert_eq!(report.nodes_pruned, 0, "fresh nodes must not be pruned");

    let health = mind.health();
    assert_eq!(health.status(), "healthy");

    let coherence = mind.coherence();
    assert!(coherence.tau() > 0.0);

    let state = mind.state();
    assert_eq!(state.total_nodes, 5);
    assert!(state.embedder_ready);
}

#[test]
fn test_review_gap_and_staging_flow() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "review");

    let node = mind.remember("candidate insight", NodeType::Belief).unwrap();
    mind.enqueue_for_review(&node, "came up twice", 0.8).unwrap();
    let pending = mind.pending_reviews(10);
    assert_eq!(pending.len(), 1);
    mind.adjudicate_review(&node, chitta_engine::ReviewStatus::Approved, Some(4))
        .unwrap();
    assert!(mind.pending_reviews(10).is_empty());

    mind.stage_wisdom(&node, "distilled candidate").unwrap();

    let gap = mind.remember("what is the p99 latency?", NodeType::Gap).unwrap();
    mind.register_gap(&gap, "latency", "what is the p99?", "observed in review", 0.9)
        .unwrap();
    let queue = mind.get_inquiry_queue(5);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].topic, "latency");

    // Recalling the gap counts as an encounter.
    mind.recall("what is the p99 latency?", 3, 0.0, SearchMode::Dense)
        .unwrap();
    let queue = mind.get_inquiry_queue(5);
    assert!(queue[0].encounters >= 2);
}

#[test]
fn test_text_ops_require_embedder() {
    let dir = TempDir::new().unwrap();
    let mind = Mind::open(test_config(&dir, "noembed")).unwrap();
    let err = mind.remember("text without a model", NodeType::Belief);
    assert!(matches!(err, Err(chitta_engine::ChittaError::EmbedderUnavailable)));

    // Vector inserts still work.
    let id = mind
        .remember_vector(
            NodeType::Belief,
            &unit_vector(5),
            b"vector payload".to_vec(),
            None,
            &[],
        )
        .unwrap();
    assert!(mind.contains(&id));
}

#[test]
fn test_crash_recovery_replays_wal() {
    let dir = TempDir::new().unwrap();
    let id;
    {
        let mind = open_mind(&dir, "crash");
        id = mind.remember("written before the crash", NodeType::Wisdom).unwrap();
        mind.add_tag(&id, "survivor").unwrap();
        // Simulate a crash: no close, no checkpoint, no Drop.
        std::mem::forget(mind);
    }

    let mind = open_mind(&dir, "crash");
    let node = mind.get(&id).unwrap();
    assert_eq!(node.text().as_deref(), Some("written before the crash"));
    assert!(node.tags.contains(&"survivor".to_string()));
}

#[test]
fn test_snapshot_increments() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "snap");
    mind.remember("snapshot me", NodeType::Belief).unwrap();
    let first = mind.snapshot().unwrap();
    let second = mind.snapshot().unwrap();
    assert_eq!(second, first + 1);
}

#[test]
fn test_epiplexity_ordering() {
    let dir = TempDir::new().unwrap();
    let mind = open_mind(&dir, "epiplexity");

    let hub = mind
        .remember_with(
            "deeply integrated principle",
            NodeType::Wisdom,
            Some(Confidence { mu: 0.95, sigma: 0.02, n: 10 }),
            &[],
        )
        .unwrap();
    let loner = mind
        .remember_with(
            "isolated low-confidence note",
            NodeType::Belief,
            Some(Confidence { mu: 0.2, sigma: 0.4, n: 1 }),
            &[],
        )
        .unwrap();
    for i in 0..4 {
        let leaf = mind.remember(&format!("edge {i}"), NodeType::Belief).unwrap();
        mind.hebbian_strengthen(&hub, &leaf, 0.9).unwrap();
    }

    let hub_score = mind.compute_epiplexity(&hub).unwrap();
    let loner_score = mind.compute_epiplexity(&loner).unwrap();
    assert!(hub_score > loner_score);

    let stats = mind.epiplexity_stats();
    assert_eq!(stats.count, mind.len());
    assert!(stats.top_nodes.first().map(|t| t.1).unwrap_or(0.0) >= stats.median);
}
