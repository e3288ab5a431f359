//! Route handlers. JSON envelope: `{"ok": bool, ...}`.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use raceday_scheduler::tasks::{Schedule, TaskConfig, TaskDefinition, TaskKind, TaskScope};

use super::server::AppState;

fn ok(value: serde_json::Value) -> Json<serde_json::Value> {
    let mut body = serde_json::json!({"ok": true});
    if let (Some(obj), Some(extra)) = (body.as_object_mut(), value.as_object()) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }
    Json(body)
}

fn fail(error: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": false, "error": error.to_string()}))
}

/// GET /api/v1/info
pub async fn info(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    ok(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "scheduler_running": state.engine.is_running(),
        "registered_kinds": state.engine.registry().kinds(),
    }))
}

/// GET /api/v1/tasks
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match state.engine.store().list_tasks() {
        Ok(tasks) => ok(serde_json::json!({"tasks": tasks})),
        Err(e) => fail(e),
    }
}

/// POST /api/v1/tasks — create a custom definition.
/// Body: {"name", "kind", "schedule": {"type": "interval", "every_secs": ..},
///        "tenant_id"?, "config"?}
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let Some(name) = body["name"].as_str() else {
        return fail("missing field: name");
    };
    let Some(kind) = body["kind"].as_str() else {
        return fail("missing field: kind");
    };
    let schedule: Schedule = match serde_json::from_value(body["schedule"].clone()) {
        Ok(s) => s,
        Err(e) => return fail(format!("bad schedule: {e}")),
    };
    let config: TaskConfig = match body.get("config") {
        None => TaskConfig::new(),
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(c) => c,
            Err(e) => return fail(format!("bad config: {e}")),
        },
    };
    let scope = match body["tenant_id"].as_str() {
        Some(tenant) => TaskScope::Tenant(tenant.to_string()),
        None => TaskScope::Global,
    };

    let def = TaskDefinition::custom(name, TaskKind::parse(kind), scope, schedule, config);
    match state.engine.store().create_custom(&def) {
        Ok(()) => ok(serde_json::json!({"task": def})),
        Err(e) => fail(e),
    }
}

/// PUT /api/v1/tasks/{id} — update a custom definition.
pub async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let existing = match state.engine.store().get_task(&id) {
        Ok(Some(t)) => t,
        Ok(None) => return fail(format!("no task '{id}'")),
        Err(e) => return fail(e),
    };

    let name = body["name"].as_str().unwrap_or(&existing.name).to_string();
    let schedule: Schedule = match body.get("schedule") {
        None => existing.schedule.clone(),
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(s) => s,
            Err(e) => return fail(format!("bad schedule: {e}")),
        },
    };
    let config: TaskConfig = match body.get("config") {
        None => existing.config.clone(),
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(c) => c,
            Err(e) => return fail(format!("bad config: {e}")),
        },
    };

    match state.engine.store().update_custom(&id, &name, &schedule, &config) {
        Ok(true) => ok(serde_json::json!({"id": id})),
        Ok(false) => fail("built-in tasks are code-owned and cannot be updated here"),
        Err(e) => fail(e),
    }
}

/// DELETE /api/v1/tasks/{id} — custom definitions only.
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.engine.store().delete_custom(&id) {
        Ok(true) => ok(serde_json::json!({"id": id})),
        Ok(false) => fail("not found, or a built-in task (not deletable)"),
        Err(e) => fail(e),
    }
}

/// POST /api/v1/tasks/{id}/enable
pub async fn enable_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    set_active(&state, &id, true)
}

/// POST /api/v1/tasks/{id}/disable
pub async fn disable_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    set_active(&state, &id, false)
}

fn set_active(state: &AppState, id: &str, active: bool) -> Json<serde_json::Value> {
    match state.engine.store().set_active(id, active) {
        Ok(true) => ok(serde_json::json!({"id": id, "is_active": active})),
        Ok(false) => fail(format!("no task '{id}'")),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// GET /api/v1/tasks/{id}/executions
pub async fn task_executions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Json<serde_json::Value> {
    match state.engine.store().executions(&id, query.limit) {
        Ok(records) => ok(serde_json::json!({"executions": records})),
        Err(e) => fail(e),
    }
}

/// GET /api/v1/notifications
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> Json<serde_json::Value> {
    match state.notify.recent(query.limit) {
        Ok(records) => ok(serde_json::json!({"notifications": records})),
        Err(e) => fail(e),
    }
}

/// GET /api/v1/scheduler/status
pub async fn scheduler_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    ok(serde_json::json!({
        "running": state.engine.is_running(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use raceday_core::config::SchedulerConfig;
    use raceday_core::events::EventBus;
    use raceday_domain::DomainDb;
    use raceday_notify::NotifyDb;
    use raceday_scheduler::{HandlerRegistry, SchedulerDb, SchedulerEngine, TaskContext};

    fn test_state() -> Arc<AppState> {
        let store = Arc::new(SchedulerDb::open_in_memory().unwrap());
        let db = Arc::new(DomainDb::open_in_memory().unwrap());
        let ctx = TaskContext::new(
            db.clone(),
            db.clone(),
            db.clone(),
            db,
            Arc::new(EventBus::new()),
        );
        let engine = Arc::new(SchedulerEngine::new(
            store,
            Arc::new(HandlerRegistry::new()),
            ctx,
            SchedulerConfig::default(),
        ));
        Arc::new(AppState {
            engine,
            notify: Arc::new(NotifyDb::open_in_memory().unwrap()),
            start_time: std::time::Instant::now(),
        })
    }

    #[tokio::test]
    async fn test_create_list_delete_roundtrip() {
        let state = test_state();

        let body = serde_json::json!({
            "name": "Nightly digest",
            "kind": "tenant-digest",
            "tenant_id": "t1",
            "schedule": {"type": "interval", "every_secs": 86400},
            "config": {"hour": 3},
        });
        let created = create_task(State(state.clone()), Json(body)).await;
        assert_eq!(created.0["ok"], true);
        let id = created.0["task"]["id"].as_str().unwrap().to_string();

        let listed = list_tasks(State(state.clone())).await;
        assert_eq!(listed.0["tasks"].as_array().unwrap().len(), 1);

        let deleted = delete_task(State(state.clone()), Path(id)).await;
        assert_eq!(deleted.0["ok"], true);
        let listed = list_tasks(State(state)).await;
        assert!(listed.0["tasks"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_bad_schedule() {
        let state = test_state();
        let body = serde_json::json!({
            "name": "Broken",
            "kind": "x",
            "schedule": {"type": "weekly"},
        });
        let res = create_task(State(state), Json(body)).await;
        assert_eq!(res.0["ok"], false);
    }

    #[tokio::test]
    async fn test_enable_disable() {
        let state = test_state();
        let body = serde_json::json!({
            "name": "Digest",
            "kind": "digest",
            "schedule": {"type": "interval", "every_secs": 60},
        });
        let created = create_task(State(state.clone()), Json(body)).await;
        let id = created.0["task"]["id"].as_str().unwrap().to_string();

        let res = disable_task(State(state.clone()), Path(id.clone())).await;
        assert_eq!(res.0["is_active"], false);
        let res = enable_task(State(state.clone()), Path(id)).await;
        assert_eq!(res.0["is_active"], true);

        let res = disable_task(State(state), Path("missing".into())).await;
        assert_eq!(res.0["ok"], false);
    }

    #[tokio::test]
    async fn test_status_reports_not_running() {
        let state = test_state();
        let res = scheduler_status(State(state)).await;
        assert_eq!(res.0["running"], false);
    }
}
