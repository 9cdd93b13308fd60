use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::anyhow;
use serde_json::json;

use super::*;
use crate::error::upstream_of;

#[derive(Default)]
struct FakeVectors {
    default_hits: Vec<(String, f64)>,
    by_query: Vec<(String, Vec<(String, f64)>)>,
    fail: bool,
    queries: Mutex<Vec<String>>,
    upserts: Mutex<Vec<VectorDocument>>,
}

impl FakeVectors {
    fn returning(hits: &[(&str, f64)]) -> Self {
        Self {
            default_hits: owned_hits(hits),
            ..Self::default()
        }
    }

    fn with_query(mut self, needle: &str, hits: &[(&str, f64)]) -> Self {
        self.by_query.push((needle.to_string(), owned_hits(hits)));
        self
    }

    fn query_count(&self) -> usize {
        self.queries.lock().expect("queries lock").len()
    }
}

fn owned_hits(hits: &[(&str, f64)]) -> Vec<(String, f64)> {
    hits.iter()
        .map(|(id, score)| (id.to_string(), *score))
        .collect()
}

impl VectorStore for FakeVectors {
    fn upsert_documents(&self, documents: &[VectorDocument]) -> Result<usize> {
        self.upserts
            .lock()
            .expect("upserts lock")
            .extend(documents.iter().cloned());
        Ok(documents.len())
    }

    fn similarity_search(&self, query: &str, top_k: usize) -> Result<Vec<VectorHit>> {
        self.queries.lock().expect("queries lock").push(query.to_string());
        if self.fail {
            return Err(anyhow!("connection refused"));
        }

        let hits = self
            .by_query
            .iter()
            .find(|(needle, _)| query.contains(needle.as_str()))
            .map(|(_, hits)| hits)
            .unwrap_or(&self.default_hits);
        Ok(hits
            .iter()
            .take(top_k)
            .map(|(id, score)| {
                let mut metadata = Map::new();
                metadata.insert("score".to_string(), json!(score));
                VectorHit {
                    document_id: id.clone(),
                    content: String::new(),
                    metadata,
                }
            })
            .collect())
    }
}

struct FakeProblems {
    problems: Vec<Problem>,
    calls: AtomicUsize,
}

impl FakeProblems {
    fn new(problems: &[(i64, &str)]) -> Self {
        Self {
            problems: problems
                .iter()
                .map(|(problem_id, topic)| Problem {
                    problem_id: *problem_id,
                    topic: topic.to_string(),
                    subtopic: None,
                    difficulty: None,
                    statement: format!("Problem {problem_id}"),
                    solution: None,
                    source: None,
                })
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl ProblemRepository for FakeProblems {
    fn find_by_id(&self, problem_id: i64) -> Result<Option<Problem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .problems
            .iter()
            .find(|problem| problem.problem_id == problem_id)
            .cloned())
    }

    fn find_by_topics(&self, topics: &BTreeSet<String>) -> Result<Vec<Problem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .problems
            .iter()
            .filter(|problem| topics.contains(&problem.topic))
            .cloned()
            .collect())
    }

    fn distinct_topics(&self) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .problems
            .iter()
            .map(|problem| problem.topic.clone())
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect())
    }
}

fn engine(
    vectors: FakeVectors,
    problems: FakeProblems,
    config: RetrievalConfig,
) -> (ProblemRetrievalEngine, Arc<FakeVectors>, Arc<FakeProblems>) {
    let vectors = Arc::new(vectors);
    let problems = Arc::new(problems);
    let engine = ProblemRetrievalEngine::new(vectors.clone(), problems.clone(), config);
    (engine, vectors, problems)
}

fn theme(name: &str, confidence: f64, topic: Option<&str>) -> ExtractedTheme {
    let mut theme = ExtractedTheme::new(name, confidence);
    theme.mapped_topic = topic.map(str::to_string);
    theme
}

fn first_page() -> PageRequest {
    PageRequest::new(0, 20)
}

#[test]
fn empty_theme_list_makes_no_calls() {
    let (engine, vectors, problems) = engine(
        FakeVectors::returning(&[("1", 0.9)]),
        FakeProblems::new(&[(1, "Geometry")]),
        RetrievalConfig::default(),
    );

    let semantic = engine
        .search_by_themes(&[], 10, first_page())
        .expect("search should work");
    let hybrid = engine
        .hybrid_search(&[], 10, first_page())
        .expect("search should work");

    assert!(semantic.items.is_empty());
    assert_eq!(hybrid.total_items, 0);
    assert_eq!(vectors.query_count(), 0);
    assert_eq!(problems.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn scores_are_clamped_even_when_similarity_is_out_of_range() {
    let (engine, _, _) = engine(
        FakeVectors::returning(&[("1", 1.7), ("2", -0.4)]),
        FakeProblems::new(&[(1, "Algebra"), (2, "Algebra")]),
        RetrievalConfig::default(),
    );

    let page = engine
        .search_by_themes(&[theme("Quadratics", 1.0, None)], 10, first_page())
        .expect("search should work");

    assert_eq!(page.items.len(), 2);
    assert!((page.items[0].score - 1.0).abs() < f64::EPSILON);
    assert!(page.items[1].score.abs() < f64::EPSILON);
    assert!(page
        .items
        .iter()
        .all(|result| (0.0..=1.0).contains(&result.score)));
}

#[test]
fn hybrid_boost_adds_half_the_similarity_and_clamps() {
    let config = RetrievalConfig {
        topic_match_base_score: 0.8,
        ..RetrievalConfig::default()
    };
    let (engine, _, _) = engine(
        FakeVectors::returning(&[("1", 0.9)]),
        FakeProblems::new(&[(1, "Geometry"), (2, "Geometry")]),
        config,
    );

    let page = engine
        .hybrid_search(&[theme("Triangles", 0.6, Some("Geometry"))], 10, first_page())
        .expect("search should work");

    let boosted = page
        .items
        .iter()
        .find(|result| result.problem_id == 1)
        .expect("problem 1 should be present");
    assert!((boosted.score - 1.0).abs() < f64::EPSILON, "0.8 + 0.45 clamps to 1.0");

    let topic_only = page
        .items
        .iter()
        .find(|result| result.problem_id == 2)
        .expect("problem 2 should be present");
    assert!((topic_only.score - 0.8).abs() < 1e-9);
    assert_eq!(topic_only.matched_theme.as_deref(), Some("Triangles"));
    assert_eq!(page.items[0].problem_id, 1);
}

#[test]
fn hybrid_boost_below_the_cap_is_exact() {
    let (engine, _, _) = engine(
        FakeVectors::returning(&[("problem_1", 0.4)]),
        FakeProblems::new(&[(1, "Geometry")]),
        RetrievalConfig::default(),
    );

    let page = engine
        .hybrid_search(&[theme("Circles", 0.9, Some("Geometry"))], 10, first_page())
        .expect("search should work");

    assert_eq!(page.items.len(), 1);
    assert!((page.items[0].score - 0.9).abs() < 1e-9, "0.7 + 0.4 * 0.5");
}

#[test]
fn hybrid_inserts_semantic_only_hits_with_confidence_weighting() {
    let (engine, _, _) = engine(
        FakeVectors::returning(&[("7", 0.5)]),
        FakeProblems::new(&[(7, "Algebra")]),
        RetrievalConfig::default(),
    );

    let page = engine
        .hybrid_search(&[theme("Factoring", 0.8, None)], 10, first_page())
        .expect("search should work");

    assert_eq!(page.items.len(), 1);
    assert!((page.items[0].score - 0.4).abs() < 1e-9);
    assert_eq!(page.items[0].matched_theme.as_deref(), Some("Factoring"));
}

#[test]
fn the_same_problem_from_two_themes_appears_once() {
    let vectors = FakeVectors::default()
        .with_query("Vectors", &[("problem_3", 0.9), ("4", 0.5)])
        .with_query("Angles", &[("3", 0.95)]);
    let (engine, _, _) = engine(
        vectors,
        FakeProblems::new(&[(3, "Geometry"), (4, "Geometry")]),
        RetrievalConfig::default(),
    );
    let themes = [theme("Vectors", 1.0, None), theme("Angles", 1.0, None)];

    let semantic = engine
        .search_by_themes(&themes, 10, first_page())
        .expect("search should work");
    let ids = semantic
        .items
        .iter()
        .map(|result| result.problem_id)
        .collect::<Vec<i64>>();
    assert_eq!(ids, vec![3, 4]);
    assert_eq!(semantic.items[0].matched_theme.as_deref(), Some("Vectors"));
    assert!((semantic.items[0].score - 0.9).abs() < 1e-9, "first theme wins");

    let hybrid = engine
        .hybrid_search(&themes, 10, first_page())
        .expect("search should work");
    assert_eq!(hybrid.total_items, 2);
}

#[test]
fn mapped_theme_never_returns_other_topics() {
    let (engine, _, _) = engine(
        FakeVectors::returning(&[("1", 0.99), ("2", 0.3)]),
        FakeProblems::new(&[(1, "Linear Algebra"), (2, "Geometry")]),
        RetrievalConfig::default(),
    );
    let themes = [theme("Vectors", 1.0, Some("Geometry"))];

    let semantic = engine
        .search_by_themes(&themes, 10, first_page())
        .expect("search should work");
    assert_eq!(semantic.items.len(), 1);
    assert_eq!(semantic.items[0].problem_id, 2);

    let hybrid = engine
        .hybrid_search(&themes, 10, first_page())
        .expect("search should work");
    assert!(hybrid.items.iter().all(|result| result.problem_id == 2));
}

#[test]
fn unmapped_theme_is_limited_to_the_union_of_mapped_topics() {
    let vectors = FakeVectors::default()
        .with_query("Topic: Geometry", &[])
        .with_query("Proof techniques", &[("1", 0.9), ("2", 0.8)]);
    let (engine, _, _) = engine(
        vectors,
        FakeProblems::new(&[(1, "Number Theory"), (2, "Geometry")]),
        RetrievalConfig::default(),
    );
    let themes = [
        theme("Triangles", 0.9, Some("Geometry")),
        theme("Proof techniques", 1.0, None),
    ];

    let page = engine
        .search_by_themes(&themes, 10, first_page())
        .expect("search should work");
    let ids = page
        .items
        .iter()
        .map(|result| result.problem_id)
        .collect::<Vec<i64>>();
    assert_eq!(ids, vec![2]);
}

#[test]
fn without_mapped_topics_retrieval_is_unfiltered() {
    let (engine, _, problems) = engine(
        FakeVectors::returning(&[("1", 0.9), ("2", 0.8)]),
        FakeProblems::new(&[(1, "Number Theory"), (2, "Geometry")]),
        RetrievalConfig::default(),
    );

    let page = engine
        .hybrid_search(&[theme("Proofs", 1.0, None)], 10, first_page())
        .expect("search should work");
    assert_eq!(page.total_items, 2);
    assert_eq!(
        problems.calls.load(Ordering::SeqCst),
        2,
        "no topic pass, one lookup per hit"
    );
}

#[test]
fn unknown_documents_are_skipped() {
    let (engine, _, _) = engine(
        FakeVectors::returning(&[("lecture_9", 0.9), ("99", 0.9), ("1", 0.5)]),
        FakeProblems::new(&[(1, "Algebra")]),
        RetrievalConfig::default(),
    );

    let page = engine
        .search_by_themes(&[theme("Sums", 1.0, None)], 10, first_page())
        .expect("search should work");
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].problem_id, 1);
}

#[test]
fn results_are_paged_after_ranking() {
    let (engine, _, _) = engine(
        FakeVectors::returning(&[("1", 0.2), ("2", 0.9), ("3", 0.5), ("4", 0.7), ("5", 0.1)]),
        FakeProblems::new(&[(1, "A"), (2, "A"), (3, "A"), (4, "A"), (5, "A")]),
        RetrievalConfig::default(),
    );

    let page = engine
        .hybrid_search(&[theme("Anything", 1.0, None)], 10, PageRequest::new(1, 2))
        .expect("search should work");
    let ids = page
        .items
        .iter()
        .map(|result| result.problem_id)
        .collect::<Vec<i64>>();
    assert_eq!(ids, vec![3, 1]);
    assert_eq!(page.total_items, 5);
    assert_eq!(page.total_pages, 3);
}

#[test]
fn vector_store_failure_is_reported_as_upstream() {
    let vectors = FakeVectors {
        fail: true,
        ..FakeVectors::default()
    };
    let (engine, _, _) = engine(
        vectors,
        FakeProblems::new(&[(1, "Algebra")]),
        RetrievalConfig::default(),
    );

    let error = engine
        .hybrid_search(&[theme("Sums", 1.0, None)], 10, first_page())
        .expect_err("failure should propagate");
    assert_eq!(upstream_of(&error), Some(Upstream::VectorStore));
}

#[test]
fn theme_query_anchors_on_mapped_topic() {
    let mut anchored = theme("Vectors", 0.9, Some("Geometry"));
    anchored.keywords = vec!["dot".to_string(), "angle".to_string()];
    anchored.summary = "Adding vectors.".to_string();
    assert_eq!(
        theme_query(&anchored),
        "Topic: Geometry\nVectors\ndot, angle\nAdding vectors."
    );
    assert_eq!(theme_query(&theme("Limits", 0.5, None)), "Limits");
}

#[test]
fn indexing_uses_raw_ids_and_problem_metadata() {
    let (engine, vectors, _) = engine(
        FakeVectors::default(),
        FakeProblems::new(&[]),
        RetrievalConfig::default(),
    );
    let problem = Problem {
        problem_id: 42,
        topic: "Geometry".to_string(),
        subtopic: Some("Circles".to_string()),
        difficulty: Some("Level 3".to_string()),
        statement: "Find the radius.".to_string(),
        solution: None,
        source: None,
    };

    engine.index_problem(&problem).expect("indexing should work");

    let upserts = vectors.upserts.lock().expect("upserts lock");
    assert_eq!(upserts.len(), 1);
    assert_eq!(upserts[0].document_id, "42");
    assert_eq!(
        upserts[0].content,
        "Topic: Geometry\nSubtopic: Circles\nProblem: Find the radius."
    );
    assert_eq!(upserts[0].metadata.get("type"), Some(&json!("problem")));
    assert_eq!(upserts[0].metadata.get("difficulty"), Some(&json!("Level 3")));
    assert_eq!(upserts[0].metadata.get("topic"), Some(&json!("Geometry")));
}
