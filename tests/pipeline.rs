mod common;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{Duration, Utc};

use curator::exclusion::ExclusionFilter;
use curator::models::{Candidate, CanonicalKey, InventoryItem, Medium};
use curator::pipeline::{PipelineError, ResolutionPipeline};
use curator::resolver::MetadataResolver;
use curator::store::memory::InMemoryStore;
use curator::store::Store;

use common::{FakeCatalog, FlakyStore};

fn pipeline(catalog: Arc<FakeCatalog>, store: Arc<InMemoryStore>) -> ResolutionPipeline {
    let resolver = MetadataResolver::new(catalog, store.clone());
    ResolutionPipeline::new(resolver, store, ExclusionFilter::default())
}

fn docudrama_catalog() -> FakeCatalog {
    FakeCatalog::new()
        .with("Chernobyl", Medium::Tv, 87108)
        .with("Spotlight", Medium::Movie, 314365)
        .with("The Act", Medium::Tv, 82855)
}

#[tokio::test]
async fn duplicate_candidates_collapse_to_one_item() {
    let store = Arc::new(InMemoryStore::new());
    let pipeline = pipeline(Arc::new(docudrama_catalog()), store.clone());

    let candidates = vec![
        Candidate::new("Chernobyl", 2019, "tv"),
        Candidate::new("Chernobyl", 2019, "tv"),
    ];
    let output = pipeline.resolve(&candidates, "Docudrama").await.unwrap();

    assert_eq!(output.category_label, "Docudrama");
    assert_eq!(output.items.len(), 1);
    assert_eq!(output.items[0].canonical_id, 87108);
    assert_eq!(output.items[0].medium, Medium::Tv);
}

#[tokio::test]
async fn medium_synonyms_are_one_key() {
    let store = Arc::new(InMemoryStore::new());
    let pipeline = pipeline(Arc::new(docudrama_catalog()), store);

    let candidates = vec![
        Candidate::new("Chernobyl", 2019, "Show"),
        Candidate::new("Chernobyl", 2019, "series"),
        Candidate::new("Spotlight", 2015, "film"),
    ];
    let output = pipeline.resolve(&candidates, "Docudrama").await.unwrap();

    let keys: Vec<CanonicalKey> = output.items.iter().map(|i| i.key()).collect();
    assert_eq!(
        keys,
        vec![
            CanonicalKey::new(87108, Medium::Tv),
            CanonicalKey::new(314365, Medium::Movie)
        ]
    );
}

#[tokio::test]
async fn output_keeps_input_order_and_has_no_duplicates() {
    let store = Arc::new(InMemoryStore::new());
    let pipeline = pipeline(Arc::new(docudrama_catalog()), store);

    let candidates = vec![
        Candidate::new("The Act", 2019, "tv"),
        Candidate::new("Unknown Title", 2001, "movie"),
        Candidate::new("Spotlight", 2015, "movie"),
        Candidate::new("The Act", 2019, "tv"),
        Candidate::new("Chernobyl", 2019, "tv"),
    ];
    let output = pipeline.resolve(&candidates, "Docudrama").await.unwrap();

    let titles: Vec<&str> = output.items.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(titles, vec!["The Act", "Spotlight", "Chernobyl"]);

    let unique: HashSet<CanonicalKey> = output.items.iter().map(|i| i.key()).collect();
    assert_eq!(unique.len(), output.items.len());
}

#[tokio::test]
async fn lone_unmatched_candidate_exhausts_category() {
    let store = Arc::new(InMemoryStore::new());
    let pipeline = pipeline(Arc::new(docudrama_catalog()), store.clone());

    let err = pipeline
        .resolve(&[Candidate::new("Nothing Like This", 1987, "movie")], "Docudrama")
        .await
        .unwrap_err();

    match err {
        PipelineError::NothingResolved { category } => assert_eq!(category, "Docudrama"),
        other => panic!("expected NothingResolved, got {:?}", other),
    }
    assert!(store.history_for_label("Docudrama").await.unwrap().is_empty());
}

#[tokio::test]
async fn provider_failure_skips_only_that_candidate() {
    let store = Arc::new(InMemoryStore::new());
    let catalog = docudrama_catalog().broken("Flaky");
    let pipeline = pipeline(Arc::new(catalog), store);

    let candidates = vec![
        Candidate::new("Flaky", 2010, "movie"),
        Candidate::new("Mystery", 2010, "podcast"),
        Candidate::new("Spotlight", 2015, "movie"),
    ];
    let output = pipeline.resolve(&candidates, "Docudrama").await.unwrap();
    assert_eq!(output.items.len(), 1);
    assert_eq!(output.items[0].canonical_id, 314365);
}

#[tokio::test]
async fn inventory_excludes_owned_titles() {
    let store = Arc::new(InMemoryStore::new());
    store
        .replace_inventory(
            &[InventoryItem {
                canonical_id: 99,
                medium: Medium::Movie,
            }],
            Utc::now(),
        )
        .await
        .unwrap();

    let catalog = FakeCatalog::new()
        .with("Owned Already", Medium::Movie, 99)
        .with("Same Id Show", Medium::Tv, 99);
    let pipeline = pipeline(Arc::new(catalog), store.clone());

    let err = pipeline
        .resolve(&[Candidate::new("Owned Already", 2004, "movie")], "Heists")
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NothingResolved { .. }));

    // Ids are namespaced per medium: a show with the same id is not owned.
    let output = pipeline
        .resolve(&[Candidate::new("Same Id Show", 2004, "tv")], "Heists")
        .await
        .unwrap();
    assert_eq!(output.items[0].key(), CanonicalKey::new(99, Medium::Tv));
}

#[tokio::test]
async fn immediate_rerun_is_exhausted() {
    let store = Arc::new(InMemoryStore::new());
    let pipeline = pipeline(Arc::new(docudrama_catalog()), store.clone());
    let candidates = vec![
        Candidate::new("Chernobyl", 2019, "tv"),
        Candidate::new("Spotlight", 2015, "movie"),
    ];
    let now = Utc::now();

    let first = pipeline
        .resolve_at(&candidates, "Docudrama", now)
        .await
        .unwrap();
    assert_eq!(first.items.len(), 2);

    let second = pipeline.resolve_at(&candidates, "Docudrama", now).await;
    assert!(matches!(
        second,
        Err(PipelineError::NothingResolved { .. })
    ));
}

#[tokio::test]
async fn history_is_per_category_and_expires() {
    let store = Arc::new(InMemoryStore::new());
    let pipeline = pipeline(Arc::new(docudrama_catalog()), store.clone());
    let candidates = vec![Candidate::new("Chernobyl", 2019, "tv")];
    let start = Utc::now() - Duration::days(90);

    pipeline
        .resolve_at(&candidates, "Docudrama", start)
        .await
        .unwrap();

    // Another category is unaffected by Docudrama's history.
    pipeline
        .resolve_at(&candidates, "Disasters", start)
        .await
        .unwrap();

    // Inside the 60-day window: still excluded.
    let within = pipeline
        .resolve_at(&candidates, "Docudrama", start + Duration::days(59))
        .await;
    assert!(within.is_err());

    // Past the window: eligible again, and last_seen_at moves forward.
    let later = start + Duration::days(61);
    pipeline
        .resolve_at(&candidates, "Docudrama", later)
        .await
        .unwrap();

    let entry = store
        .history_entry("Docudrama", CanonicalKey::new(87108, Medium::Tv))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.first_seen_at, start);
    assert_eq!(entry.last_seen_at, later);
}

#[tokio::test]
async fn emitted_items_avoid_exclusions_present_at_start() {
    let store = Arc::new(InMemoryStore::new());
    let now = Utc::now();
    store
        .record_recommendation(
            "Docudrama",
            CanonicalKey::new(87108, Medium::Tv),
            now - Duration::days(3),
        )
        .await
        .unwrap();
    store
        .replace_inventory(
            &[InventoryItem {
                canonical_id: 314365,
                medium: Medium::Movie,
            }],
            now,
        )
        .await
        .unwrap();

    let pipeline = pipeline(Arc::new(docudrama_catalog()), store.clone());
    let candidates = vec![
        Candidate::new("Chernobyl", 2019, "tv"),
        Candidate::new("Spotlight", 2015, "movie"),
        Candidate::new("The Act", 2019, "tv"),
    ];
    let output = pipeline
        .resolve_at(&candidates, "Docudrama", now)
        .await
        .unwrap();

    let history = store
        .recommended_since("Docudrama", now - Duration::days(60))
        .await
        .unwrap();
    let inventory = store.inventory_keys().await.unwrap();
    assert_eq!(output.items.len(), 1);
    for item in &output.items {
        assert!(!inventory.contains(&item.key()));
        assert_ne!(item.key(), CanonicalKey::new(87108, Medium::Tv));
        assert!(history.contains(&item.key()));
    }
}

#[tokio::test]
async fn cache_hit_skips_catalog_search() {
    let store = Arc::new(InMemoryStore::new());
    let catalog = Arc::new(FakeCatalog::new().with("Inside Job", Medium::Movie, 44639));
    let resolver = MetadataResolver::new(catalog.clone(), store.clone());

    let first = resolver.resolve("Inside Job", 2010, "movie").await.unwrap();
    let second = resolver.resolve("Inside Job", 2010, "movie").await.unwrap();

    assert_eq!(catalog.searches(), 1);
    assert_eq!(second.canonical_id, 44639);
    // Cached records carry the full enrichment.
    assert_eq!(first, second);
    assert!(second.genres.contains("Drama"));
    assert!(second.keywords.contains("catalog"));
}

#[tokio::test]
async fn partial_enrichment_still_emits_item() {
    let store = Arc::new(InMemoryStore::new());
    let catalog = FakeCatalog::new().with_bare("Obscure Doc", Medium::Movie, 5150);
    let pipeline = pipeline(Arc::new(catalog), store);

    let mut candidate = Candidate::new("Obscure Doc", 1999, "movie");
    candidate.rationale = "rare find".into();
    candidate.keywords = vec!["archive footage".into()];

    let output = pipeline.resolve(&[candidate], "Rarities").await.unwrap();
    let item = &output.items[0];
    assert_eq!(item.canonical_id, 5150);
    assert!(item.genres.is_empty());
    assert_eq!(item.runtime_minutes, None);
    assert_eq!(item.external_id, None);
    assert_eq!(item.rationale, "rare find");
    assert!(item.keywords.contains("archive footage"));
}

#[tokio::test]
async fn failed_history_write_keeps_item_in_output() {
    let store = Arc::new(FlakyStore::new());
    store.fail_history_writes.store(true, Ordering::SeqCst);
    let resolver = MetadataResolver::new(Arc::new(docudrama_catalog()), store.clone());
    let pipeline = ResolutionPipeline::new(resolver, store.clone(), ExclusionFilter::default());

    let candidates = vec![
        Candidate::new("Chernobyl", 2019, "tv"),
        Candidate::new("Spotlight", 2015, "movie"),
        Candidate::new("Chernobyl", 2019, "tv"),
    ];
    let output = pipeline.resolve(&candidates, "Docudrama").await.unwrap();

    // Items survive, and the in-run overlay still drops the duplicate.
    let keys: Vec<CanonicalKey> = output.items.iter().map(|i| i.key()).collect();
    assert_eq!(
        keys,
        vec![
            CanonicalKey::new(87108, Medium::Tv),
            CanonicalKey::new(314365, Medium::Movie)
        ]
    );
    assert!(store.inner.history_for_label("Docudrama").await.unwrap().is_empty());
}

#[tokio::test]
async fn unreadable_history_is_a_store_error() {
    let store = Arc::new(FlakyStore::new());
    store.fail_history_reads.store(true, Ordering::SeqCst);
    let catalog = Arc::new(docudrama_catalog());
    let resolver = MetadataResolver::new(catalog.clone(), store.clone());
    let pipeline = ResolutionPipeline::new(resolver, store.clone(), ExclusionFilter::default());

    let err = pipeline
        .resolve(&[Candidate::new("Chernobyl", 2019, "tv")], "Docudrama")
        .await
        .unwrap_err();

    match err {
        PipelineError::Store(source) => {
            assert!(format!("{:#}", source).contains("recommended_since"))
        }
        other => panic!("expected Store error, got {:?}", other),
    }
    // Nothing is resolved or recorded without exclusion state.
    assert_eq!(catalog.searches(), 0);
    assert!(store.inner.history_for_label("Docudrama").await.unwrap().is_empty());
}

#[tokio::test]
async fn unreadable_inventory_is_a_store_error() {
    let store = Arc::new(FlakyStore::new());
    store.fail_inventory_reads.store(true, Ordering::SeqCst);
    let resolver = MetadataResolver::new(Arc::new(docudrama_catalog()), store.clone());
    let pipeline = ResolutionPipeline::new(resolver, store.clone(), ExclusionFilter::default());

    let err = pipeline
        .resolve(&[Candidate::new("Spotlight", 2015, "movie")], "Docudrama")
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Store(_)));
}
