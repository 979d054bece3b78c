//! PgRemoteStore against a live Postgres. Set DATABASE_URL to run; each test
//! works in its own throwaway schema.

use sav_core::remote::{Filter, PgRemoteStore, RemoteId, RemoteStore, Table};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

const SCHEMA_DDL: [&str; 2] = [
    r#"
CREATE TABLE notification_templates (
    id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
    template_type text NOT NULL,
    header_text text,
    footer_text text,
    fields jsonb,
    is_active boolean NOT NULL DEFAULT false,
    updated_at timestamptz
)"#,
    r#"
CREATE TABLE telegram_profiles (
    id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
    telegram_id bigint NOT NULL UNIQUE,
    first_name text,
    username text,
    updated_at timestamptz
)"#,
];

/// Single-connection pool whose search_path points at a fresh schema.
async fn scratch_pool(name: &str) -> Option<(PgPool, String)> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping {}", name);
        return None;
    };
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .expect("Failed to connect to Postgres");

    let schema = format!("sav_test_{}", uuid::Uuid::new_v4().simple());
    sqlx::query(&format!("CREATE SCHEMA {}", schema))
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(&format!("SET search_path TO {}", schema))
        .execute(&pool)
        .await
        .unwrap();
    for ddl in SCHEMA_DDL {
        sqlx::query(ddl).execute(&pool).await.unwrap();
    }
    Some((pool, schema))
}

async fn drop_schema(pool: &PgPool, schema: &str) {
    sqlx::query(&format!("DROP SCHEMA {} CASCADE", schema))
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_insert_then_update_by_id() {
    let Some((pool, schema)) = scratch_pool("test_insert_then_update_by_id").await else {
        return;
    };
    let store = PgRemoteStore::new(pool.clone());

    let id = store
        .insert(
            Table::NotificationTemplates,
            json!({
                "template_type": "new_client",
                "header_text": "Hello",
                "fields": [{"key": "name"}],
                "is_active": true
            }),
        )
        .await
        .unwrap();

    store
        .update(
            Table::NotificationTemplates,
            &id,
            json!({"footer_text": "Bye", "updated_at": "2026-01-02T03:04:05Z"}),
        )
        .await
        .unwrap();

    let row = store
        .select_one(Table::NotificationTemplates, &[Filter::eq("id", id.as_str())])
        .await
        .unwrap()
        .expect("row inserted");
    assert_eq!(row["header_text"], "Hello");
    assert_eq!(row["footer_text"], "Bye");
    assert_eq!(row["fields"][0]["key"], "name");
    assert_eq!(RemoteId::from_row(&row), Some(id));

    let missing = RemoteId::new(uuid::Uuid::new_v4().to_string());
    assert!(store
        .update(Table::NotificationTemplates, &missing, json!({"footer_text": "x"}))
        .await
        .is_err());

    drop_schema(&pool, &schema).await;
}

#[tokio::test]
async fn test_upsert_updates_on_conflict() {
    let Some((pool, schema)) = scratch_pool("test_upsert_updates_on_conflict").await else {
        return;
    };
    let store = PgRemoteStore::new(pool.clone());

    let first = store
        .upsert(
            Table::TelegramProfiles,
            json!({"telegram_id": 42, "first_name": "Ivan", "username": "ivan"}),
            "telegram_id",
        )
        .await
        .unwrap();
    let second = store
        .upsert(
            Table::TelegramProfiles,
            json!({"telegram_id": 42, "first_name": "Ivan Petrov"}),
            "telegram_id",
        )
        .await
        .unwrap();
    assert_eq!(first, second);

    let rows = store
        .select(Table::TelegramProfiles, &[Filter::eq("telegram_id", 42)], None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["first_name"], "Ivan Petrov");
    // columns absent from the second payload keep their value
    assert_eq!(rows[0]["username"], "ivan");

    drop_schema(&pool, &schema).await;
}

#[tokio::test]
async fn test_select_filters_by_text_form() {
    let Some((pool, schema)) = scratch_pool("test_select_filters_by_text_form").await else {
        return;
    };
    let store = PgRemoteStore::new(pool.clone());

    for (template_type, active) in [("new_client", false), ("new_client", true), ("payment", true)] {
        store
            .insert(
                Table::NotificationTemplates,
                json!({"template_type": template_type, "is_active": active, "header_text": template_type}),
            )
            .await
            .unwrap();
    }

    let active = store
        .select(
            Table::NotificationTemplates,
            &[Filter::eq("template_type", "new_client"), Filter::eq("is_active", true)],
            None,
        )
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["is_active"], true);

    let all_active = store
        .select(Table::NotificationTemplates, &[Filter::eq("is_active", true)], Some(1))
        .await
        .unwrap();
    assert_eq!(all_active.len(), 1);

    assert!(store.health().await.unwrap().starts_with("PostgreSQL"));

    drop_schema(&pool, &schema).await;
}
