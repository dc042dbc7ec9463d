pub mod auth;
pub mod catchers;
pub mod db;
pub mod error;
pub mod import;
pub mod models;
pub mod request_logger;
pub mod routes;

use crate::auth::{AuthConfig, AuthState};
use crate::db::LeadsDb;
use crate::import::{ImportConfig, LeadImporter, PgEventRecorder, UI_EVENT_SOURCE};
use crate::request_logger::RequestLogger;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::{Arc, Once};

static LOGGER: Once = Once::new();

pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![Method::Get, Method::Post]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .allow_credentials(true)
        .to_cors()
        .expect("Error creating CORS");

    rocket::build()
        .attach(RequestLogger)
        .attach(LeadsDb::init())
        .attach(cors)
        // Run database migrations on startup
        .attach(AdHoc::try_on_ignite(
            "Run Migrations",
            |rocket| async move {
                match LeadsDb::fetch(&rocket) {
                    Some(db) => {
                        let pool = (**db).clone();
                        match db::run_migrations(&pool).await {
                            Ok(_) => Ok(rocket),
                            Err(e) => {
                                log::error!("database migrations failed: {}", e);
                                Err(rocket)
                            }
                        }
                    }
                    None => {
                        log::error!("database pool not available for migrations");
                        Err(rocket)
                    }
                }
            },
        ))
        .attach(AdHoc::try_on_ignite("Manage DB Pool", |rocket| async move {
            match LeadsDb::fetch(&rocket) {
                Some(db) => {
                    let pool = (**db).clone();
                    Ok(rocket.manage(pool))
                }
                None => Err(rocket),
            }
        }))
        .attach(AdHoc::try_on_ignite(
            "Auth Configuration",
            |rocket| async move {
                match AuthConfig::from_env().and_then(AuthState::from_config) {
                    Ok(state) => Ok(rocket.manage(state)),
                    Err(err) => {
                        log::error!("failed to initialize auth: {}", err);
                        Err(rocket)
                    }
                }
            },
        ))
        .attach(AdHoc::try_on_ignite(
            "Lead Import Pipeline",
            |rocket| async move {
                let Some(pool) = rocket.state::<PgPool>().cloned() else {
                    log::error!("database pool not available for the import pipeline");
                    return Err(rocket);
                };

                let config = ImportConfig::from_env();
                let recorder = Arc::new(PgEventRecorder::new(pool));
                match LeadImporter::from_config(&config, recorder, UI_EVENT_SOURCE) {
                    Ok(importer) => Ok(rocket.manage(importer)),
                    Err(err) => {
                        log::error!("failed to initialize normalizer client: {}", err);
                        Err(rocket)
                    }
                }
            },
        ))
        // Abort in-flight imports instead of letting them outlive the server
        .attach(AdHoc::on_shutdown("Cancel Imports", |rocket| {
            Box::pin(async move {
                if let Some(importer) = rocket.state::<LeadImporter>() {
                    log::info!("shutdown requested, cancelling in-flight imports");
                    importer.shutdown();
                }
            })
        }))
        .register("/", catchers::catchers())
        .mount(
            "/api/v1",
            openapi_get_routes![
                routes::health::health_check,
                routes::leads::import_leads,
                routes::leads::import_leads_csv,
                routes::leads::preview_import,
                routes::leads::import_history,
            ],
        )
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Lead Import API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use reqwest::StatusCode;
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use rocket_db_pools::sqlx::PgPool;

    use crate::auth::{AuthConfig, AuthState, JwtService, Role};
    use crate::import::events::{EventError, EventRecorder, ImportEvent};
    use crate::import::{
        BatchTransport, Dispatcher, LeadImporter, OutboundBatch, RetryPolicy, TransportError,
        TransportResponse, UI_EVENT_SOURCE,
    };

    pub const TEST_JWT_SECRET: &str = "lead-import-test-secret";

    enum ReplyKind {
        Response { status: StatusCode, body: Vec<u8> },
        Network(String),
    }

    /// One scripted answer of the fake normalization backend.
    pub struct ScriptedReply {
        kind: ReplyKind,
        delay: Option<Duration>,
    }

    impl ScriptedReply {
        pub fn status(status: StatusCode) -> Self {
            Self::json(status, "")
        }

        pub fn json(status: StatusCode, body: &str) -> Self {
            Self {
                kind: ReplyKind::Response {
                    status,
                    body: body.as_bytes().to_vec(),
                },
                delay: None,
            }
        }

        pub fn network(message: &str) -> Self {
            Self {
                kind: ReplyKind::Network(message.to_string()),
                delay: None,
            }
        }

        /// Hold the reply back, e.g. to exercise timeouts and cancellation.
        pub fn delayed(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    /// Fake normalization backend replaying scripted replies in order and
    /// capturing every batch it receives.
    #[derive(Default)]
    pub struct ScriptedTransport {
        replies: Mutex<VecDeque<ScriptedReply>>,
        requests: Mutex<Vec<OutboundBatch>>,
    }

    impl ScriptedTransport {
        pub fn new(replies: Vec<ScriptedReply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn attempts(&self) -> usize {
            self.requests.lock().expect("requests lock").len()
        }

        pub fn requests(&self) -> Vec<OutboundBatch> {
            self.requests.lock().expect("requests lock").clone()
        }
    }

    #[rocket::async_trait]
    impl BatchTransport for ScriptedTransport {
        async fn send(&self, batch: &OutboundBatch) -> Result<TransportResponse, TransportError> {
            self.requests
                .lock()
                .expect("requests lock")
                .push(batch.clone());
            let reply = self.replies.lock().expect("replies lock").pop_front();

            let Some(reply) = reply else {
                return Err(TransportError::Network("no scripted reply left".to_string()));
            };
            if let Some(delay) = reply.delay {
                tokio::time::sleep(delay).await;
            }

            match reply.kind {
                ReplyKind::Response { status, body } => Ok(TransportResponse { status, body }),
                ReplyKind::Network(message) => Err(TransportError::Network(message)),
            }
        }
    }

    /// Event recorder that keeps events in memory, or fails or stalls every
    /// call.
    #[derive(Default)]
    pub struct RecordingEventRecorder {
        events: tokio::sync::Mutex<Vec<ImportEvent>>,
        fail: bool,
        delay: Option<Duration>,
    }

    impl RecordingEventRecorder {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub async fn events(&self) -> Vec<ImportEvent> {
            self.events.lock().await.clone()
        }
    }

    #[rocket::async_trait]
    impl EventRecorder for RecordingEventRecorder {
        async fn record(&self, event: &ImportEvent) -> Result<(), EventError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
                return Err(EventError::Encode(err));
            }
            self.events.lock().await.push(event.clone());
            Ok(())
        }
    }

    /// Retry policy with millisecond delays for fast tests.
    pub fn fast_retry_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            request_timeout: Duration::from_secs(2),
            overall_timeout: None,
        }
    }

    /// Importer wired to the given fake transport and recorder.
    pub fn test_importer(
        transport: Arc<ScriptedTransport>,
        recorder: Arc<RecordingEventRecorder>,
        max_batch_size: usize,
    ) -> LeadImporter {
        LeadImporter::new(
            max_batch_size,
            Dispatcher::new(transport, fast_retry_policy()),
            recorder,
            UI_EVENT_SOURCE,
        )
    }

    pub fn test_auth_config() -> AuthConfig {
        AuthConfig {
            issuer: "https://leads.test".into(),
            audience: "leads-admin".into(),
            access_token_ttl_secs: 900,
            jwt_secret: TEST_JWT_SECRET.into(),
            jwt_kid: None,
        }
    }

    pub fn test_auth_state() -> AuthState {
        AuthState::from_config(test_auth_config()).expect("test auth state")
    }

    /// Signed bearer token for `role`, valid against [`test_auth_state`].
    pub fn bearer_token(subject: &str, role: Role) -> String {
        let service = JwtService::from_config(&test_auth_config()).expect("jwt service");
        let token = service
            .issue_access_token(subject, Some("operator@example.com"), role)
            .expect("issue token");
        format!("Bearer {}", token.token)
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        importer: Option<LeadImporter>,
        auth: Option<AuthState>,
        pool: Option<PgPool>,
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false))
                .merge(("limits.string", "5 MiB"));

            Self {
                figment,
                mounts: Vec::new(),
                importer: None,
                auth: None,
                pool: None,
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        pub fn manage_importer(mut self, importer: LeadImporter) -> Self {
            self.importer = Some(importer);
            self
        }

        pub fn manage_auth(mut self, auth: AuthState) -> Self {
            self.auth = Some(auth);
            self
        }

        /// Manage a pool directly, bypassing the `LeadsDb` fairing.
        pub fn manage_pool(mut self, pool: PgPool) -> Self {
            self.pool = Some(pool);
            self
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment)
                .attach(crate::request_logger::RequestLogger)
                .register("/", crate::catchers::catchers());

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(importer) = self.importer {
                rocket = rocket.manage(importer);
            }

            if let Some(auth) = self.auth {
                rocket = rocket.manage(auth);
            }

            if let Some(pool) = self.pool {
                rocket = rocket.manage(pool);
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
