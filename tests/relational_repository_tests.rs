//! # Relational Repository Integration Tests
//!
//! SQL issued by the relational repository against a recording pool, and
//! cache behaviour around writes and transactions.

mod common;

use common::{memory_cache, RecordingPool, RecordingConnection};
use futures::FutureExt;
use newsroom_data::caching::CacheStore;
use newsroom_data::core::error::DataError;
use newsroom_data::core::types::{entity, Criteria, QueryOptions, Returning, WriteOptions};
use newsroom_data::repository::relational::{KeyType, RelationalRepository, SqlConnection, SqlValue};
use newsroom_data::repository::{Repository, RepositorySettings};
use serde_json::json;
use std::sync::Arc;

fn users(pool: &RecordingPool) -> (RelationalRepository<RecordingPool>, newsroom_data::InMemoryCache) {
    let (client, cache) = memory_cache();
    let repo = RelationalRepository::new(
        Arc::new(pool.clone()),
        "users",
        client,
        &RepositorySettings::default(),
    )
    .unwrap();
    (repo, cache)
}

#[tokio::test]
async fn test_operator_criteria_become_parameterized_sql() {
    let pool = RecordingPool::new();
    let (repo, _) = users(&pool);
    pool.respond_rows(vec![entity(json!({"id": "u1", "age": 30}))]);

    let found = repo
        .find(&entity(json!({"age": {"$gt": 18}})), &QueryOptions::new())
        .await
        .unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(
        pool.statements(),
        vec![(
            "SELECT * FROM \"users\" WHERE \"age\" > $1".to_string(),
            vec![SqlValue::Integer(18)]
        )]
    );
}

#[tokio::test]
async fn test_unknown_operator_fails_before_io() {
    let pool = RecordingPool::new();
    let (repo, _) = users(&pool);

    let err = repo
        .find(&entity(json!({"age": {"$foo": 1}})), &QueryOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DataError::UnsupportedOperator { ref field, ref operator } if field == "age" && operator == "$foo"
    ));
    assert!(pool.statements().is_empty());
    assert_eq!(pool.column_lookups(), 0);
}

fn typed_articles() -> (RecordingPool, RelationalRepository<RecordingPool>) {
    let pool = RecordingPool::new().with_column_types(&[
        ("id", "text"),
        ("title", "text"),
        ("published_at", "timestamp with time zone"),
        ("author_id", "uuid"),
        ("deleted_at", "timestamp with time zone"),
    ]);
    let (client, _) = memory_cache();
    let repo = RelationalRepository::new(
        Arc::new(pool.clone()),
        "articles",
        client,
        &RepositorySettings::default(),
    )
    .unwrap();
    (pool, repo)
}

#[tokio::test]
async fn test_writes_cast_to_column_types() {
    let (pool, repo) = typed_articles();
    pool.respond_rows(vec![entity(json!({"id": "a1"}))]);
    pool.respond_rows(vec![entity(json!({"id": "a1", "deleted_at": null}))]);

    repo.create(
        entity(json!({
            "id": "a1",
            "published_at": "2024-01-01T00:00:00Z",
            "author_id": "7d2b0b9e-5f4e-4a53-9a43-07d6c1b2f7a1"
        })),
        &WriteOptions::new(),
    )
    .await
    .unwrap();
    repo.update("a1", entity(json!({"deleted_at": null})), &WriteOptions::new())
        .await
        .unwrap();

    let statements = pool.statements();
    assert_eq!(
        statements[0].0,
        "INSERT INTO \"articles\" (\"id\", \"published_at\", \"author_id\") \
         VALUES ($1::text, $2::timestamp with time zone, $3::uuid) RETURNING *"
    );
    assert_eq!(
        statements[1].0,
        "UPDATE \"articles\" SET \"deleted_at\" = $1::timestamp with time zone \
         WHERE \"id\" = $2::text RETURNING *"
    );
    assert_eq!(statements[1].1[0], SqlValue::Null);
    assert_eq!(pool.column_lookups(), 1);
}

#[tokio::test]
async fn test_range_criteria_cast_to_column_types() {
    let (pool, repo) = typed_articles();

    repo.find(
        &entity(json!({"published_at": {"$gt": "2023-01-01"}})),
        &QueryOptions::new(),
    )
    .await
    .unwrap();
    repo.count(&entity(json!({"deleted_at": null, "title": {"$ilike": "%rust%"}})), &QueryOptions::new())
        .await
        .unwrap();

    assert_eq!(
        pool.sql(),
        vec![
            "SELECT * FROM \"articles\" WHERE \"published_at\" > $1::timestamp with time zone",
            "SELECT COUNT(*) AS \"count\" FROM \"articles\" WHERE \"deleted_at\" IS NULL \
             AND \"title\"::text ILIKE $1",
        ]
    );
}

#[tokio::test]
async fn test_find_one_appends_limit() {
    let pool = RecordingPool::new();
    let (repo, _) = users(&pool);

    let found = repo
        .find_one(&entity(json!({"email": "ana@example.com"})), &QueryOptions::new().limit(50))
        .await
        .unwrap();

    assert!(found.is_none());
    assert_eq!(
        pool.sql(),
        vec!["SELECT * FROM \"users\" WHERE \"email\" = $1 LIMIT 1"]
    );
}

#[tokio::test]
async fn test_find_by_id_is_served_from_cache() {
    let pool = RecordingPool::new();
    let (repo, _) = users(&pool);
    pool.respond_rows(vec![entity(json!({"id": "u1", "name": "Ana"}))]);

    let first = repo.find_by_id("u1", &QueryOptions::new()).await.unwrap();
    let second = repo.find_by_id("u1", &QueryOptions::new()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(pool.sql().len(), 1);
}

#[tokio::test]
async fn test_create_returning_primary_key() {
    let pool = RecordingPool::new();
    let (repo, _) = users(&pool);
    pool.respond_rows(vec![entity(json!({"id": "u9"}))]);

    let created = repo
        .create(
            entity(json!({"email": "ben@example.com"})),
            &WriteOptions::new().returning(Returning::PrimaryKey),
        )
        .await
        .unwrap();

    assert_eq!(created, entity(json!({"id": "u9"})));
    assert_eq!(
        pool.sql(),
        vec!["INSERT INTO \"users\" (\"email\") VALUES ($1) RETURNING \"id\""]
    );
}

#[tokio::test]
async fn test_update_without_match_is_none() {
    let pool = RecordingPool::new();
    let (repo, cache) = users(&pool);
    pool.respond_rows(vec![entity(json!({"id": "u1", "name": "Ana"}))]);
    repo.find_by_id("u1", &QueryOptions::new()).await.unwrap();

    let updated = repo
        .update("missing", entity(json!({"name": "X"})), &WriteOptions::new())
        .await
        .unwrap();

    assert!(updated.is_none());
    assert!(cache.exists(&repo.cache().key_for_id("u1")).await.unwrap());
}

#[tokio::test]
async fn test_delete_reports_affected_rows() {
    let pool = RecordingPool::new();
    let (repo, cache) = users(&pool);
    pool.respond_rows(vec![entity(json!({"id": "u1"}))]);
    repo.find_by_id("u1", &QueryOptions::new()).await.unwrap();

    pool.respond_affected(1);
    let outcome = repo.delete("u1", &WriteOptions::new()).await.unwrap();
    assert!(outcome.deleted);
    assert!(outcome.entity.is_none());
    assert!(!cache.exists(&repo.cache().key_for_id("u1")).await.unwrap());

    pool.respond_affected(0);
    let outcome = repo.delete("u1", &WriteOptions::new()).await.unwrap();
    assert!(!outcome.deleted);
}

#[tokio::test]
async fn test_count_and_exists_read_aliases() {
    let pool = RecordingPool::new();
    let (repo, _) = users(&pool);
    pool.respond_rows(vec![entity(json!({"count": 3}))]);
    pool.respond_rows(vec![entity(json!({"exists": true}))]);

    let criteria = entity(json!({"role": ["editor", "admin"]}));
    assert_eq!(repo.count(&criteria, &QueryOptions::new()).await.unwrap(), 3);
    assert!(repo.exists(&criteria, &QueryOptions::new()).await.unwrap());
}

#[tokio::test]
async fn test_integer_primary_key_rejects_text_id() {
    let pool = RecordingPool::new();
    let (repo, _) = users(&pool);
    let repo = repo.with_primary_key("user_id", KeyType::Integer).unwrap();

    let err = repo
        .find_by_id("abc", &QueryOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_query_build_error());
    assert!(pool.statements().is_empty());
}

#[tokio::test]
async fn test_transaction_rolls_back_on_error() {
    let pool = RecordingPool::new();
    let (repo, cache) = users(&pool);
    repo.find(&Criteria::new(), &QueryOptions::new()).await.unwrap();
    let collection_key = repo.cache().collection_key();
    assert!(cache.exists(&collection_key).await.unwrap());

    let result: Result<(), DataError> = repo
        .transaction(|conn: &mut RecordingConnection| {
            async move {
                conn.query("UPDATE \"users\" SET \"tier\" = $1", &[SqlValue::Text("premium".into())])
                    .await?;
                Err::<(), _>(DataError::validation("tier change rejected"))
            }
            .boxed()
        })
        .await;

    assert!(matches!(result, Err(DataError::Validation { .. })));
    assert_eq!(
        &pool.sql()[1..],
        &["BEGIN", "UPDATE \"users\" SET \"tier\" = $1", "ROLLBACK"]
    );
    assert!(!pool.sql().iter().any(|sql| sql == "COMMIT"));
    assert_eq!(pool.acquired(), 1);
    assert_eq!(pool.released(), 1);
    assert!(cache.exists(&collection_key).await.unwrap());
}

#[tokio::test]
async fn test_transaction_commit_invalidates_collection() {
    let pool = RecordingPool::new();
    let (repo, cache) = users(&pool);
    repo.find(&Criteria::new(), &QueryOptions::new()).await.unwrap();

    let affected = repo
        .transaction(|conn: &mut RecordingConnection| {
            async move {
                let output = conn.query("DELETE FROM \"users\" WHERE \"tier\" = $1", &[
                    SqlValue::Text("free".into()),
                ])
                .await?;
                Ok::<_, DataError>(output.rows_affected)
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(affected, 0);
    assert_eq!(pool.sql().last().map(String::as_str), Some("COMMIT"));
    assert_eq!(pool.released(), 1);
    assert!(!cache.exists(&repo.cache().collection_key()).await.unwrap());
}

#[tokio::test]
async fn test_pool_timeout_propagates() {
    let pool = RecordingPool::new();
    let (repo, _) = users(&pool);
    pool.respond_error(DataError::PoolTimeout);

    let err = repo
        .find(&Criteria::new(), &QueryOptions::new().use_cache(false))
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::PoolTimeout));
}
