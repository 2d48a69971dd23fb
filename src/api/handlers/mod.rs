use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::db::Database;
use crate::forest::{self, Diagnostics, ForestReport};
use crate::models::*;

type ApiResult<T> = Result<T, ApiError>;

/// Resolve a single task for a response body.
fn resolve_one(db: &Database, task: Task) -> ApiResult<ResolvedTask> {
    let mut diagnostics = Diagnostics::new();
    forest::resolve_tasks(db, std::slice::from_ref(&task), &mut diagnostics)?
        .pop()
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("Task {} has no resolvable creator", task.id)))
}

fn resolve_organization(db: &Database, org: Organization) -> ApiResult<OrganizationView> {
    forest::resolve_organizations(db, std::slice::from_ref(&org))?
        .pop()
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("Organization view missing")))
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Auth
// ============================================================

pub async fn signup(
    State(state): State<AppState>,
    Json(input): Json<SignupInput>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let (user, tokens) = state.sessions.signup(input)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: ResolvedUser::from(&user),
            tokens,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginInput>,
) -> ApiResult<Json<AuthResponse>> {
    let (user, tokens) = state.sessions.login(input)?;
    Ok(Json(AuthResponse {
        user: ResolvedUser::from(&user),
        tokens,
    }))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(input): Json<RefreshInput>,
) -> ApiResult<Json<TokenPair>> {
    Ok(Json(state.sessions.refresh(&input.refresh_token)?))
}

pub async fn invalidate_tokens(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<StatusCode> {
    state.sessions.invalidate(caller.user_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================
// Users
// ============================================================

pub async fn current_user(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<ResolvedUser>> {
    state
        .db
        .get_user(caller.user_id)?
        .map(|user| Json(ResolvedUser::from(&user)))
        .ok_or_else(|| ApiError::not_found("User"))
}

pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Vec<ResolvedUser>>> {
    let users = state.db.get_all_users()?;
    Ok(Json(users.iter().map(ResolvedUser::from).collect()))
}

// ============================================================
// Organizations
// ============================================================

pub async fn list_organizations(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<OrganizationView>>> {
    let orgs = state.db.get_all_organizations()?;
    Ok(Json(forest::resolve_organizations(&state.db, &orgs)?))
}

pub async fn get_organization(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<OrganizationView>> {
    let org = state
        .db
        .get_organization(id)?
        .ok_or_else(|| ApiError::not_found("Organization"))?;
    Ok(Json(resolve_organization(&state.db, org)?))
}

pub async fn create_organization(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(input): Json<CreateOrganizationInput>,
) -> ApiResult<(StatusCode, Json<OrganizationView>)> {
    if input.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Organization name is required".to_string()));
    }
    let org = state.db.create_organization(caller.user_id, input)?;
    tracing::info!(organization_id = %org.id, creator_id = %caller.user_id, "Organization created");
    Ok((StatusCode::CREATED, Json(resolve_organization(&state.db, org)?)))
}

// ============================================================
// Task forest
// ============================================================

/// Query parameters for the task tree.
#[derive(Debug, Deserialize)]
pub struct TaskTreeQuery {
    /// Accepted for compatibility; private tasks are currently always included.
    #[serde(default)]
    pub include_private: bool,
}

/// Every task of an organization as a flat list, with user references resolved.
///
/// Unknown organizations yield an empty list rather than 404.
pub async fn get_task_tree(
    State(state): State<AppState>,
    Path(organization_id): Path<Uuid>,
    Query(query): Query<TaskTreeQuery>,
) -> ApiResult<Json<ForestReport>> {
    let report =
        forest::resolve_task_forest(&state.db, &state.db, organization_id, query.include_private)?;
    if report.is_degraded() {
        tracing::warn!(
            %organization_id,
            diagnostics = report.diagnostics.len(),
            "Task forest resolved with anomalies"
        );
    }
    Ok(Json(report))
}

// ============================================================
// Tasks
// ============================================================

pub async fn create_task(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(organization_id): Path<Uuid>,
    Json(input): Json<CreateTaskInput>,
) -> ApiResult<(StatusCode, Json<ResolvedTask>)> {
    if input.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Task name is required".to_string()));
    }
    let task = state
        .db
        .create_task(organization_id, caller.user_id, input)?;
    Ok((StatusCode::CREATED, Json(resolve_one(&state.db, task)?)))
}

/// All tasks across organizations, with user references resolved.
pub async fn list_tasks(State(state): State<AppState>) -> ApiResult<Json<ForestReport>> {
    let tasks = state.db.get_all_tasks()?;
    let mut diagnostics = Diagnostics::new();
    let tasks = forest::resolve_tasks(&state.db, &tasks, &mut diagnostics)?;
    Ok(Json(ForestReport {
        tasks,
        diagnostics: diagnostics.into_vec(),
    }))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ResolvedTask>> {
    let task = state
        .db
        .get_task(id)?
        .ok_or_else(|| ApiError::not_found("Task"))?;
    Ok(Json(resolve_one(&state.db, task)?))
}

pub async fn update_task_properties(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateTaskPropertiesInput>,
) -> ApiResult<Json<ResolvedTask>> {
    if input.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
        return Err(ApiError::BadRequest("Task name must not be empty".to_string()));
    }
    let task = state
        .db
        .update_task_properties(id, input)?
        .ok_or_else(|| ApiError::not_found("Task"))?;
    Ok(Json(resolve_one(&state.db, task)?))
}

fn ensure_user_exists(db: &Database, user_id: Uuid) -> ApiResult<()> {
    db.get_user(user_id)?
        .map(|_| ())
        .ok_or_else(|| ApiError::not_found("User"))
}

pub async fn add_task_watcher(
    State(state): State<AppState>,
    Path((task_id, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<TaskUpdateResponse>> {
    ensure_user_exists(&state.db, user_id)?;
    Ok(Json(state.db.add_task_watcher(task_id, user_id)?))
}

pub async fn remove_task_watcher(
    State(state): State<AppState>,
    Path((task_id, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<TaskUpdateResponse>> {
    Ok(Json(state.db.remove_task_watcher(task_id, user_id)?))
}

pub async fn add_task_assignee(
    State(state): State<AppState>,
    Path((task_id, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<TaskUpdateResponse>> {
    ensure_user_exists(&state.db, user_id)?;
    Ok(Json(state.db.add_task_assignee(task_id, user_id)?))
}

pub async fn remove_task_assignee(
    State(state): State<AppState>,
    Path((task_id, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<TaskUpdateResponse>> {
    Ok(Json(state.db.remove_task_assignee(task_id, user_id)?))
}
