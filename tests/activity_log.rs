use chrono::{Duration as ChronoDuration, Utc};
use lead_import::auth::Role;
use lead_import::import::events::{ImportStats, recent_imports};
use lead_import::import::{Actor, EventRecorder, ImportEvent, PgEventRecorder, UI_EVENT_SOURCE};
use lead_import::routes::leads::import_history;
use lead_import::test_support::{TestRocketBuilder, bearer_token, test_auth_state};
use rocket::http::{Header, Status};
use rocket::routes;
use rocket_db_pools::sqlx::postgres::PgPoolOptions;
use rocket_db_pools::sqlx::{self, PgPool};
use serde_json::Value;
use sqlx::migrate::Migrator;
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::testcontainers::ContainerAsync;
use testcontainers_modules::testcontainers::runners::AsyncRunner;

static TEST_MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Disposable Postgres with the activity log schema applied.
struct TestDatabase {
    pool: PgPool,
    _container: ContainerAsync<Postgres>,
}

impl TestDatabase {
    /// `None` when no container runtime is reachable.
    async fn start() -> Option<Self> {
        let container = match Postgres::default().start().await {
            Ok(container) => container,
            Err(err) => {
                eprintln!("skipping activity log test: cannot start postgres container: {err}");
                return None;
            }
        };

        let host = container.get_host().await.expect("container host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("container port");
        let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .expect("connect to test database");
        TEST_MIGRATOR.run(&pool).await.expect("migrations run");

        Some(Self {
            pool,
            _container: container,
        })
    }
}

fn stats(source_name: &str, success_count: usize) -> ImportStats {
    ImportStats {
        source_name: source_name.to_string(),
        total_leads: success_count + 1,
        valid_leads: success_count,
        success_count,
        error_count: 1,
        ..ImportStats::default()
    }
}

async fn seed(pool: &PgPool) {
    let recorder = PgEventRecorder::new(pool.clone());
    let actor = Actor::new("17", Some("operator@example.com".to_string()));
    let now = Utc::now();

    let mut oldest = ImportEvent::succeeded(&stats("Q4 list", 3), UI_EVENT_SOURCE, &actor);
    oldest.occurred_at = now - ChronoDuration::minutes(30);
    let mut middle = ImportEvent::succeeded(&stats("Q4_100%", 8), UI_EVENT_SOURCE, &actor);
    middle.occurred_at = now - ChronoDuration::minutes(20);
    let mut newest = ImportEvent::failed(&stats("Webinar", 0), "timeout", UI_EVENT_SOURCE, &actor);
    newest.occurred_at = now - ChronoDuration::minutes(10);

    for event in [&oldest, &middle, &newest] {
        recorder.record(event).await.expect("record event");
    }
}

#[tokio::test]
async fn migrations_apply_and_revert_cleanly() {
    let Some(db) = TestDatabase::start().await else {
        return;
    };

    let table_count = |pool: PgPool| async move {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = 'public' AND table_name = 'lead_activity_log'",
        )
        .fetch_one(&pool)
        .await
        .expect("lookup succeeded")
    };

    assert_eq!(table_count(db.pool.clone()).await, 1);

    TEST_MIGRATOR
        .undo(&db.pool, 0)
        .await
        .expect("migrations revert");
    assert_eq!(table_count(db.pool.clone()).await, 0);

    TEST_MIGRATOR.run(&db.pool).await.expect("migrations rerun");
    assert_eq!(table_count(db.pool.clone()).await, 1);
}

#[tokio::test]
async fn recorded_events_read_back_newest_first() {
    let Some(db) = TestDatabase::start().await else {
        return;
    };
    seed(&db.pool).await;

    let entries = recent_imports(&db.pool, None, 20).await.expect("history");

    let sources: Vec<&str> = entries
        .iter()
        .map(|entry| entry.metadata["source_name"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(sources, vec!["Webinar", "Q4_100%", "Q4 list"]);

    assert_eq!(entries[0].event_type, "BULK_IMPORT_FAILED");
    assert_eq!(entries[0].metadata["failure_kind"], "timeout");
    assert_eq!(entries[1].event_type, "BULK_IMPORT");
    assert_eq!(entries[1].metadata["success_count"], 8);
    assert_eq!(entries[1].source, UI_EVENT_SOURCE);
    assert_eq!(entries[1].actor_id, "17");
    assert_eq!(entries[1].actor_email.as_deref(), Some("operator@example.com"));

    let limited = recent_imports(&db.pool, None, 1).await.expect("history");
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn filter_wildcards_match_literally() {
    let Some(db) = TestDatabase::start().await else {
        return;
    };
    seed(&db.pool).await;

    // Unescaped, `_` would also match the space in "Q4 list".
    let underscore = recent_imports(&db.pool, Some("q4_"), 20).await.expect("history");
    assert_eq!(underscore.len(), 1);
    assert_eq!(underscore[0].metadata["source_name"], "Q4_100%");

    let percent = recent_imports(&db.pool, Some("100%"), 20).await.expect("history");
    assert_eq!(percent.len(), 1);

    // Unescaped, this would match "Q4 list".
    let none = recent_imports(&db.pool, Some("q4%list"), 20).await.expect("history");
    assert!(none.is_empty());

    let by_description = recent_imports(&db.pool, Some("failed: timeout"), 20)
        .await
        .expect("history");
    assert_eq!(by_description.len(), 1);
}

#[rocket::async_test]
async fn history_route_lists_recent_imports() {
    let Some(db) = TestDatabase::start().await else {
        return;
    };
    seed(&db.pool).await;

    let client = TestRocketBuilder::new()
        .mount_api_routes(routes![import_history])
        .manage_auth(test_auth_state())
        .manage_pool(db.pool.clone())
        .async_client()
        .await;

    let response = client
        .get("/api/v1/leads/imports?q=Q4&limit=5")
        .header(Header::new("Authorization", bearer_token("17", Role::Admin)))
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Ok);
    let payload: Value = response.into_json().await.expect("json history");
    let data = payload["data"].as_array().expect("data array");
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["eventType"], "BULK_IMPORT");
    assert!(data[0]["id"].is_string());
}
