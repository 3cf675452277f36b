//! Criterion benchmarks for shardline-core.
//!
//! ## Benchmark groups
//!
//! 1. **router**: Partition hashing and range resolution.
//! 2. **validation**: Filter and sort validation, including relation paths.
//! 3. **render**: Query building and SQL rendering.
//! 4. **execution**: A validated list query against a populated SQLite shard.
//!
//! ## Running
//!
//! ```sh
//! cargo bench --manifest-path crates/shardline-core/Cargo.toml
//! # Run only the validation group:
//! cargo bench --manifest-path crates/shardline-core/Cargo.toml -- validation
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use indexmap::IndexMap;
use serde_json::json;

use shardline_core::config::QueryConfig;
use shardline_core::query::{
    filters_from_arguments, parse_sort, validate_filters, validate_sorts, Page, QueryBuilder,
};
use shardline_core::schema::{Attribute, DataType, Entity, SchemaRegistry, View};
use shardline_core::store::database::Database;
use shardline_core::store::sharding::{KeyRange, ShardGroup, ShardRouter};
use shardline_core::store::sql::render_select;
use shardline_core::store::{Migrator, SqliteMigrator};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn registry() -> SchemaRegistry {
    let user = Entity::new(
        "user",
        "users",
        "id",
        Some("name".into()),
        None,
        vec![
            Attribute::new("id", DataType::Int),
            Attribute::new("name", DataType::Text),
        ],
    )
    .unwrap();
    let post = Entity::new(
        "post",
        "posts",
        "id",
        Some("title".into()),
        None,
        vec![
            Attribute::new("id", DataType::Int),
            Attribute::new("title", DataType::Text),
            Attribute::new("views", DataType::Int),
            Attribute::new(
                "author",
                DataType::Relation {
                    entity: "user".into(),
                },
            )
            .optional(),
        ],
    )
    .unwrap();
    SchemaRegistry::new(vec![user, post]).unwrap()
}

fn arguments() -> IndexMap<String, serde_json::Value> {
    serde_json::from_value(json!({
        "title": {"contains": "rust", "logical": "or", "starts_with": "Intro"},
        "views": {"gte": "10", "lt": 1000},
        "author.name": {"in": ["ada", "grace", "linus"]},
    }))
    .unwrap()
}

/// A router over `n` equal ranges. Connections are never opened.
fn router(dir: &tempfile::TempDir, n: u64) -> ShardRouter {
    let end = 1u64 << 32;
    let width = end / n;
    let groups = (0..n)
        .map(|i| {
            let leader = Database::open(dir.path().join(format!("shard-{i}.db"))).unwrap();
            let stop = if i + 1 == n { end } else { (i + 1) * width };
            ShardGroup::new(format!("shard-{i}"), leader, Vec::new(), KeyRange::new(i * width, stop))
        })
        .collect();
    ShardRouter::new(groups, end).unwrap()
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

fn bench_router(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mut group = c.benchmark_group("router");
    for n in [2u64, 16, 128] {
        let router = router(&dir, n);
        group.bench_with_input(BenchmarkId::new("resolve_str", n), &router, |b, router| {
            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                black_box(router.resolve_str(&format!("tenant-{i}")).unwrap().name());
            });
        });
    }
    group.finish();
}

fn bench_validation(c: &mut Criterion) {
    let registry = registry();
    let post = registry.entity("post").unwrap();
    let args = arguments();
    let sorts = vec![parse_sort("-views"), parse_sort("title")];

    let mut group = c.benchmark_group("validation");
    group.bench_function("filters", |b| {
        b.iter(|| {
            let raw = filters_from_arguments(&post, black_box(&args), true).unwrap();
            black_box(validate_filters(&post, &raw, &registry).unwrap());
        });
    });
    group.bench_function("sorts", |b| {
        b.iter(|| black_box(validate_sorts(&post, black_box(&sorts), &registry).unwrap()));
    });
    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let registry = registry();
    let post = registry.entity("post").unwrap();
    let builder = QueryBuilder::new(&QueryConfig::default());
    let raw = filters_from_arguments(&post, &arguments(), true).unwrap();
    let filters = validate_filters(&post, &raw, &registry).unwrap();
    let sorts = validate_sorts(&post, &[parse_sort("-views")], &registry).unwrap();
    let selection = builder.resolve_selection(&post, &[], View::List).unwrap();

    let mut group = c.benchmark_group("render");
    group.bench_function("build_list", |b| {
        b.iter(|| {
            black_box(
                builder
                    .list(&post, &selection, &filters, &sorts, &Page::default())
                    .unwrap(),
            )
        });
    });
    let stmt = builder
        .list(&post, &selection, &filters, &sorts, &Page::default())
        .unwrap()
        .unwrap();
    group.bench_function("render_select", |b| {
        b.iter(|| black_box(render_select(black_box(&stmt)).unwrap()));
    });
    group.finish();
}

fn bench_execution(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry();
    let db = Database::open(dir.path().join("bench.db")).unwrap();
    let migrator = SqliteMigrator::new(db.clone());
    for entity in registry.entities() {
        migrator.ensure_table(entity).unwrap();
    }
    let conn = db.connect().unwrap();
    for i in 0..50 {
        conn.execute(
            "INSERT INTO users(id, name) VALUES (?1, ?2)",
            rusqlite::params![i, format!("user-{i}")],
        )
        .unwrap();
    }
    for i in 0..2000 {
        conn.execute(
            "INSERT INTO posts(title, views, author) VALUES (?1, ?2, ?3)",
            rusqlite::params![format!("Intro to rust #{i}"), i % 500, i % 50],
        )
        .unwrap();
    }

    let post = registry.entity("post").unwrap();
    let builder = QueryBuilder::new(&QueryConfig::default());
    let args: IndexMap<String, serde_json::Value> =
        serde_json::from_value(json!({"author.name": "user-7", "views": {"gte": 100}})).unwrap();
    let raw = filters_from_arguments(&post, &args, true).unwrap();
    let filters = validate_filters(&post, &raw, &registry).unwrap();
    let selection = builder.resolve_selection(&post, &[], View::List).unwrap();
    let stmt = builder
        .list(&post, &selection, &filters, &[], &Page::default())
        .unwrap()
        .unwrap();

    let mut group = c.benchmark_group("execution");
    group.sample_size(20);
    group.bench_function("list_with_relation_filter", |b| {
        b.iter(|| black_box(db.query_rows(&stmt).unwrap()));
    });
    group.finish();
}

// ---------------------------------------------------------------------------
// Register all benchmark groups
// ---------------------------------------------------------------------------

criterion_group!(
    benches,
    bench_router,
    bench_validation,
    bench_render,
    bench_execution,
);
criterion_main!(benches);
