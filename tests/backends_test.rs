//! Repository tests against live PostgreSQL and MySQL servers.
//!
//! Set `TEST_POSTGRES_URL` and/or `TEST_MYSQL_URL` to run them; each test
//! returns early when its variable is not set.

use chrono::{DateTime, Utc};
use multidb_repository::db::{CallContext, ExecutorSettings, MappingRegistry, StaticResolver};
use multidb_repository::impl_entity;
use multidb_repository::models::{CommandSpec, DatabaseType};
use multidb_repository::repository::Repository;
use multidb_repository::sql::Filter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Widget {
    id: i64,
    label: String,
    weight: Option<f64>,
    created_on: Option<DateTime<Utc>>,
    modified_on: Option<DateTime<Utc>>,
}

impl_entity!(
    Widget,
    table = "repo_it_widgets",
    key = "id",
    columns = ["label", "weight", "created_on", "modified_on"]
);

impl Widget {
    fn new(label: &str, weight: Option<f64>) -> Self {
        Self {
            id: 0,
            label: label.to_string(),
            weight,
            created_on: None,
            modified_on: None,
        }
    }
}

fn ddl(db_type: DatabaseType) -> &'static str {
    match db_type {
        DatabaseType::PostgreSQL => {
            "CREATE TABLE repo_it_widgets (
                id BIGSERIAL PRIMARY KEY,
                label TEXT NOT NULL,
                weight DOUBLE PRECISION,
                created_on TIMESTAMPTZ,
                modified_on TIMESTAMPTZ
            )"
        }
        DatabaseType::MySQL => {
            "CREATE TABLE repo_it_widgets (
                id BIGINT AUTO_INCREMENT PRIMARY KEY,
                label VARCHAR(100) NOT NULL,
                weight DOUBLE,
                created_on TIMESTAMP(6) NULL,
                modified_on TIMESTAMP(6) NULL
            )"
        }
        DatabaseType::SQLite => unreachable!("SQLite is covered by the file-based tests"),
    }
}

async fn run_scenario(product: &str, url: &str, db_type: DatabaseType) {
    let resolver = StaticResolver::new().with_url(product, url).unwrap();
    let repo = Repository::new(
        Arc::new(resolver),
        Arc::new(MappingRegistry::new()),
        ExecutorSettings::default(),
    );
    let ctx = CallContext::new(product);

    repo.execute(&ctx, &CommandSpec::text("DROP TABLE IF EXISTS repo_it_widgets"))
        .await
        .unwrap();
    repo.execute(&ctx, &CommandSpec::text(ddl(db_type))).await.unwrap();

    let stored = repo.insert(&ctx, &mut Widget::new("bolt", Some(1.5))).await.unwrap();
    assert!(stored.id > 0);
    assert!(stored.created_on.is_some());

    let ids = repo
        .insert_multiple(&ctx, &[Widget::new("nut", None), Widget::new("gear", Some(3.0))])
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);
    let gear: Widget = repo.get(&ctx, ids[1]).await.unwrap().unwrap();
    assert_eq!(gear.label, "gear");

    let mut changed = stored.clone();
    changed.weight = None;
    let outcome = repo.upsert(&ctx, changed).await.unwrap();
    assert!(!outcome.is_inserted());

    let weightless: Vec<Widget> = repo
        .get_list(&ctx, &Filter::new().is_null("weight"))
        .await
        .unwrap();
    assert_eq!(weightless.len(), 2);

    let spec = CommandSpec::text("SELECT label FROM repo_it_widgets WHERE label <> @label ORDER BY id")
        .param("label", "bolt");
    let labels: Vec<String> = repo.query(&ctx, &spec).await.unwrap();
    assert_eq!(labels, vec!["nut", "gear"]);

    assert!(repo.delete(&ctx, &gear).await.unwrap());
    assert_eq!(repo.get_all::<Widget>(&ctx).await.unwrap().len(), 2);

    repo.execute(&ctx, &CommandSpec::text("DROP TABLE repo_it_widgets"))
        .await
        .unwrap();

    let stats = repo.stats();
    assert_eq!(stats.opened, stats.released);
}

#[tokio::test]
async fn test_postgres_repository() {
    let Ok(url) = std::env::var("TEST_POSTGRES_URL") else {
        eprintln!("TEST_POSTGRES_URL not set, skipping");
        return;
    };
    run_scenario("pg", &url, DatabaseType::PostgreSQL).await;
}

#[tokio::test]
async fn test_mysql_repository() {
    let Ok(url) = std::env::var("TEST_MYSQL_URL") else {
        eprintln!("TEST_MYSQL_URL not set, skipping");
        return;
    };
    run_scenario("my", &url, DatabaseType::MySQL).await;
}
