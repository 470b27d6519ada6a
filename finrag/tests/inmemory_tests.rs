//! Property tests for in-memory vector index search and upsert.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use finrag::document::{Chunk, IndexEntry};
use finrag::inmemory::InMemoryVectorIndex;
use finrag::vectorstore::{IndexManifest, VectorIndex};
use proptest::prelude::*;

const DIM: usize = 16;

/// Generate a non-zero L2-normalized embedding of the given dimension.
fn arb_normalized_embedding(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim).prop_filter_map(
        "non-zero embedding",
        |mut v| {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm < 1e-8 {
                return None;
            }
            for val in &mut v {
                *val /= norm;
            }
            Some(v)
        },
    )
}

/// Generate an entry for one of a handful of documents.
fn arb_entry(dim: usize) -> impl Strategy<Value = IndexEntry> {
    ("doc_[a-e]", 0usize..6, "[a-z ]{5,30}", arb_normalized_embedding(dim)).prop_map(
        |(document_id, ordinal, text, embedding)| IndexEntry {
            chunk: Chunk {
                document_id,
                ordinal,
                start: 0,
                end: text.chars().count(),
                text,
                overlap: 0,
                metadata: HashMap::new(),
            },
            embedding,
        },
    )
}

fn manifest() -> IndexManifest {
    IndexManifest::new("test-model", DIM)
}

/// Searching returns results ordered by descending cosine similarity, never
/// more than `top_k`, and never more than the number of distinct chunks.
mod prop_inmemory_search_ordering {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn results_ordered_descending_and_bounded_by_top_k(
            entries in proptest::collection::vec(arb_entry(DIM), 1..20),
            query in arb_normalized_embedding(DIM),
            top_k in 1usize..25,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (results, stored) = rt.block_on(async {
                let index = InMemoryVectorIndex::new(manifest());
                index.upsert(entries).await.unwrap();
                let results = index.search(&query, top_k).await.unwrap();
                (results, index.len().await)
            });

            prop_assert!(results.len() <= top_k);
            prop_assert!(results.len() <= stored);

            for window in results.results.windows(2) {
                prop_assert!(
                    window[0].score >= window[1].score,
                    "results not in descending order: {} < {}",
                    window[0].score,
                    window[1].score,
                );
            }
        }
    }
}

/// Upserting the same batch twice leaves exactly the chunks of one upsert,
/// and search results are identical across repeated calls.
mod prop_inmemory_idempotent_upsert {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn reupsert_does_not_duplicate(
            entries in proptest::collection::vec(arb_entry(DIM), 1..20),
            query in arb_normalized_embedding(DIM),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (once, twice, first, second) = rt.block_on(async {
                let index = InMemoryVectorIndex::new(manifest());
                index.upsert(entries.clone()).await.unwrap();
                let once = index.len().await;
                let first = index.search(&query, 5).await.unwrap();
                index.upsert(entries).await.unwrap();
                let twice = index.len().await;
                let second = index.search(&query, 5).await.unwrap();
                (once, twice, first, second)
            });

            prop_assert_eq!(once, twice);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn stored_count_matches_distinct_chunk_ids(
            entries in proptest::collection::vec(arb_entry(DIM), 1..20),
        ) {
            let distinct: std::collections::HashSet<String> =
                entries.iter().map(|e| e.chunk.id()).collect();
            let rt = tokio::runtime::Runtime::new().unwrap();
            let stored = rt.block_on(async {
                let index = InMemoryVectorIndex::new(manifest());
                index.upsert(entries).await.unwrap();
                index.len().await
            });
            prop_assert_eq!(stored, distinct.len());
        }
    }
}

/// A query whose dimensionality differs from the index is rejected rather
/// than scored against incompatible vectors.
#[tokio::test]
async fn mismatched_query_dimension_is_rejected() {
    let index = InMemoryVectorIndex::new(manifest());
    let err = index.search(&[1.0, 0.0], 3).await.unwrap_err();
    assert!(matches!(err, finrag::RagError::VectorStoreError { .. }));
}

fn unit(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    v[axis % DIM] = 1.0;
    v
}

fn tagged_entry(document_id: &str, ordinal: usize, tag: &str) -> IndexEntry {
    let text = format!("{tag} chunk {ordinal}");
    IndexEntry {
        chunk: Chunk {
            document_id: document_id.to_string(),
            ordinal,
            start: 0,
            end: text.chars().count(),
            text,
            overlap: 0,
            metadata: HashMap::new(),
        },
        embedding: unit(ordinal),
    }
}

/// Searches running while a writer replaces and deletes a document see
/// either none of its chunks or one complete version of them.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_searches_never_observe_a_partial_batch() {
    const CHUNKS: usize = 12;
    const ROUNDS: usize = 300;

    let index = Arc::new(InMemoryVectorIndex::new(manifest()));
    let stable: Vec<IndexEntry> = (0..3).map(|i| tagged_entry("stable", i, "fixed")).collect();
    index.upsert(stable).await.unwrap();

    let writer = {
        let index = Arc::clone(&index);
        tokio::spawn(async move {
            for round in 0..ROUNDS {
                if round % 3 == 0 {
                    index.delete_document("churn").await.unwrap();
                } else {
                    let tag = format!("v{round}");
                    let batch = (0..CHUNKS).map(|i| tagged_entry("churn", i, &tag)).collect();
                    index.upsert(batch).await.unwrap();
                }
                tokio::task::yield_now().await;
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|reader| {
            let index = Arc::clone(&index);
            tokio::spawn(async move {
                for _ in 0..ROUNDS {
                    let results = index.search(&unit(reader), CHUNKS + 10).await.unwrap();
                    let churn: Vec<_> =
                        results.iter().filter(|r| r.chunk.document_id == "churn").collect();
                    let stable = results.iter().filter(|r| r.chunk.document_id == "stable").count();

                    assert!(churn.is_empty() || churn.len() == CHUNKS, "saw {} chunks", churn.len());
                    let versions: HashSet<&str> = churn
                        .iter()
                        .map(|r| r.chunk.text.split(' ').next().unwrap_or_default())
                        .collect();
                    assert!(versions.len() <= 1, "mixed versions {versions:?}");
                    assert_eq!(stable, 3);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(index.len().await, 3 + CHUNKS);
}
