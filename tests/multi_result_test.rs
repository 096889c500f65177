//! Integration tests for multi-result-set materialization and multi-type
//! row mapping against SQLite.

use multidb_repository::db::{CallContext, ExecutorSettings, MappingRegistry, StaticResolver};
use multidb_repository::error::ErrorKind;
use multidb_repository::models::{CommandSpec, ResultShape, ShapeSlot};
use multidb_repository::repository::Repository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Dept {
    id: i64,
    title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Person {
    id: i64,
    name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Overview {
    headcount: i64,
    depts: Vec<Dept>,
    #[serde(default)]
    cached_at: Option<String>,
    largest: Option<Dept>,
    names: Vec<String>,
}

impl ResultShape for Overview {
    fn slots() -> &'static [ShapeSlot] {
        const SLOTS: &[ShapeSlot] = &[
            ShapeSlot::scalar("headcount"),
            ShapeSlot::list("depts"),
            ShapeSlot::ignore("cached_at"),
            ShapeSlot::scalar("largest"),
            ShapeSlot::list("names"),
        ];
        SLOTS
    }
}

async fn setup() -> (Repository, CallContext, TempDir) {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}", dir.path().join("org.db").to_str().unwrap());
    let resolver = StaticResolver::new().with_url("org", &url).unwrap();
    let repo = Repository::new(
        Arc::new(resolver),
        Arc::new(MappingRegistry::new()),
        ExecutorSettings::default(),
    );
    let ctx = CallContext::new("org");

    repo.execute(
        &ctx,
        &CommandSpec::text(
            "CREATE TABLE depts (id INTEGER PRIMARY KEY, title TEXT NOT NULL);
             CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT NOT NULL, dept_id INTEGER);
             INSERT INTO depts (id, title) VALUES (1, 'eng'), (2, 'ops');
             INSERT INTO people (id, name, dept_id) VALUES
                (10, 'ann', 1), (11, 'ben', 1), (12, 'cy', 2), (13, 'di', NULL);",
        ),
    )
    .await
    .unwrap();

    (repo, ctx, dir)
}

#[tokio::test]
async fn test_get_complex_fills_slots_in_order() {
    let (repo, ctx, _dir) = setup().await;

    let spec = CommandSpec::text(
        "SELECT COUNT(*) AS headcount FROM people;
         SELECT id, title FROM depts ORDER BY id;
         SELECT d.id, d.title FROM depts d JOIN people p ON p.dept_id = d.id
            GROUP BY d.id ORDER BY COUNT(*) DESC LIMIT 1;
         SELECT name FROM people ORDER BY id;",
    );
    let overview: Overview = repo.get_complex(&ctx, &spec).await.unwrap();

    assert_eq!(overview.headcount, 4);
    assert_eq!(overview.depts.len(), 2);
    assert_eq!(overview.depts[1].title, "ops");
    assert!(overview.cached_at.is_none());
    assert_eq!(overview.largest, Some(Dept { id: 1, title: "eng".into() }));
    assert_eq!(overview.names, vec!["ann", "ben", "cy", "di"]);
}

#[tokio::test]
async fn test_get_complex_empty_set_keeps_default() {
    let (repo, ctx, _dir) = setup().await;

    let spec = CommandSpec::text(
        "SELECT COUNT(*) AS headcount FROM people WHERE id < 0;
         SELECT id, title FROM depts WHERE id < 0;",
    );
    let overview: Overview = repo.get_complex(&ctx, &spec).await.unwrap();

    assert_eq!(overview.headcount, 0);
    assert!(overview.depts.is_empty());
    assert!(overview.largest.is_none());
    assert!(overview.names.is_empty());
}

#[tokio::test]
async fn test_get_multiple_data_reads_sets_sequentially() {
    let (repo, ctx, _dir) = setup().await;

    let spec = CommandSpec::text(
        "SELECT id, title FROM depts ORDER BY id;
         SELECT id, name FROM people WHERE dept_id = 1 ORDER BY id;",
    );
    let mut sets = repo.get_multiple_data(&ctx, &spec).await.unwrap();
    assert_eq!(sets.remaining(), 2);

    let depts: Vec<Dept> = sets.read().unwrap();
    assert_eq!(depts.len(), 2);
    let first: Option<Person> = sets.read_first().unwrap();
    assert_eq!(first.map(|p| p.name).as_deref(), Some("ann"));

    assert!(sets.is_consumed());
    let err = sets.read::<Dept>().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn test_query_multi_map_splits_rows() {
    let (repo, ctx, _dir) = setup().await;

    let spec = CommandSpec::text(
        "SELECT p.id, p.name, d.id, d.title
         FROM people p LEFT JOIN depts d ON d.id = p.dept_id
         WHERE p.id >= @from
         ORDER BY p.id",
    )
    .param("from", 11i64);

    let pairs = repo
        .query_multi_map(&ctx, &spec, &["id"], |segments| {
            let person: Person = segments.get(0)?;
            let dept: Option<Dept> = segments.get_opt(1)?;
            Ok((person, dept))
        })
        .await
        .unwrap();

    assert_eq!(pairs.len(), 3);
    assert_eq!(pairs[0].0.name, "ben");
    assert_eq!(pairs[0].1.as_ref().map(|d| d.title.as_str()), Some("eng"));
    assert_eq!(pairs[1].1.as_ref().map(|d| d.id), Some(2));
    assert_eq!(pairs[2].0.name, "di");
    assert!(pairs[2].1.is_none(), "outer join miss maps to None");
}

#[tokio::test]
async fn test_query_multi_map_missing_split_column() {
    let (repo, ctx, _dir) = setup().await;

    let spec = CommandSpec::text("SELECT id, name FROM people");
    let err = repo
        .query_multi_map(&ctx, &spec, &["dept_id"], |segments| segments.get::<Person>(0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(repo.stats().open(), 0);
}
