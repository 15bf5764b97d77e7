//! Criterion benchmarks for the sealdex search index.
//!
//! Covers tokenization, indexing a full contact list and running queries
//! against an indexed list.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use sealdex::analysis::{AlphanumericTokenizer, Tokenizer};
use sealdex::config::SealdexConfig;
use sealdex::context::SearchContext;
use sealdex::crypto::AesIndexCipher;
use sealdex::entity::id::timestamp_to_generated_id;
use sealdex::entity::{Contact, EntityKind, IdTuple, MemoryRestClient};
use sealdex::search::SearchRestriction;
use sealdex::store::MemoryStore;
use tokio::runtime::Runtime;

const FIRST_NAMES: &[&str] = &[
    "anne", "andrew", "bob", "carla", "david", "emma", "felix", "grace", "henry", "iris",
];
const LAST_NAMES: &[&str] = &[
    "smith", "jones", "garcia", "miller", "davis", "lopez", "wilson", "moore",
];

/// Generate contact texts for benchmarking.
fn generate_texts(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            format!(
                "{} {} <{}.{}@example.org> {}",
                FIRST_NAMES[i % FIRST_NAMES.len()],
                LAST_NAMES[(i * 7) % LAST_NAMES.len()],
                FIRST_NAMES[i % FIRST_NAMES.len()],
                LAST_NAMES[(i * 7) % LAST_NAMES.len()],
                i
            )
        })
        .collect()
}

/// A context whose remote service holds `count` contacts.
fn context_with_contacts(count: usize) -> SearchContext {
    let rest = Arc::new(MemoryRestClient::new());
    rest.create_list(EntityKind::Contact, "contacts");
    for i in 0..count {
        let id = IdTuple::new("contacts", timestamp_to_generated_id((i as u64 + 1) * 1_000));
        let contact = Contact::new(
            id,
            "contactGroup",
            FIRST_NAMES[i % FIRST_NAMES.len()],
            LAST_NAMES[(i * 7) % LAST_NAMES.len()],
        );
        rest.put(&contact).unwrap();
    }
    let context =
        SearchContext::new(Arc::new(MemoryStore::new()), rest, SealdexConfig::default()).unwrap();
    context.db().initialize(Arc::new(AesIndexCipher::generate()));
    context
}

fn bench_tokenization(c: &mut Criterion) {
    let mut group = c.benchmark_group("tokenization");
    let tokenizer = AlphanumericTokenizer::new();
    let texts = generate_texts(100);

    group.throughput(Throughput::Elements(texts.len() as u64));
    group.bench_function("tokenize_batch", |b| {
        b.iter(|| {
            for text in &texts {
                let tokens: Vec<_> = tokenizer.tokenize(black_box(text)).unwrap().collect();
                black_box(tokens);
            }
        })
    });

    group.finish();
}

fn bench_indexing(c: &mut Criterion) {
    let mut group = c.benchmark_group("indexing");
    group.sample_size(20);
    let runtime = Runtime::new().unwrap();

    for count in [100, 500] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(format!("index_full_contact_list_{count}"), |b| {
            b.to_async(&runtime).iter_batched(
                || context_with_contacts(count),
                |context| async move {
                    context
                        .contact_indexer()
                        .index_full_list("contacts", "contactGroup")
                        .await
                        .unwrap();
                    black_box(context);
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    let runtime = Runtime::new().unwrap();
    let context = context_with_contacts(1_000);
    runtime
        .block_on(
            context
                .contact_indexer()
                .index_full_list("contacts", "contactGroup"),
        )
        .unwrap();

    for (name, query, max_results) in [
        ("single_token", "anne", None),
        ("and_query", "anne smith", None),
        ("first_page", "smith", Some(10)),
    ] {
        group.bench_function(name, |b| {
            b.to_async(&runtime).iter(|| async {
                let result = context
                    .search(
                        black_box(query),
                        SearchRestriction::new(EntityKind::Contact),
                        0,
                        max_results,
                    )
                    .await
                    .unwrap();
                black_box(result)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_tokenization, bench_indexing, bench_search);
criterion_main!(benches);
