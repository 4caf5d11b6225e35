use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::RoleAssignmentSource;
use crate::docs;
use crate::events::AccessLog;
use crate::jwt::JwtConfig;
use crate::routes::{engine, health, tasks};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub access_log: AccessLog,
    pub role_source: Arc<dyn RoleAssignmentSource>,
    pub task_locks: TaskLocks,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        jwt: JwtConfig,
        access_log: AccessLog,
        role_source: Arc<dyn RoleAssignmentSource>,
    ) -> Self {
        Self {
            pool,
            jwt: Arc::new(jwt),
            access_log,
            role_source,
            task_locks: TaskLocks::default(),
        }
    }
}

/// One async mutex per task id; assignment changes on a task are serialized.
#[derive(Clone, Default)]
pub struct TaskLocks {
    inner: Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl TaskLocks {
    pub async fn acquire(&self, task_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            // entries nobody holds or waits on
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(map.entry(task_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let engine_routes = Router::new()
        .route("/authorize", post(engine::authorize))
        .route("/search-predicate", post(engine::search_predicate))
        .route("/auto-assignee", post(engine::auto_assignee))
        .route("/classify-action", post(engine::classify_action));

    let task_routes = Router::new()
        .route("/search", post(tasks::search_tasks))
        .route("/:id", get(tasks::get_task))
        .route("/:id/claim", post(tasks::claim_task))
        .route("/:id/unclaim", post(tasks::unclaim_task))
        .route("/:id/assign", post(tasks::assign_task))
        .route("/:id/auto-assign", post(tasks::auto_assign_task));

    Router::new()
        .route("/api/health", get(health::health))
        .nest("/engine", engine_routes)
        .nest("/tasks", task_routes)
        .with_state(state)
        .merge(docs::swagger_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
