// handlers/projects.rs - /projects handlers

use axum::{extract::State, Extension};
use uuid::Uuid;

use crate::database::models::Project;
use crate::database::paginated::WithMeta;
use crate::filter::QueryParams;
use crate::middleware::{ApiResponse, ApiResult, AuthUser, Json, Path, Query};
use crate::services::{CreateProjectDto, UpdateProjectDto};
use crate::AppState;

/// GET /projects
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<WithMeta<Project>> {
    let projects = state.projects.get_projects(&user, QueryParams::from_pairs(pairs)).await?;
    Ok(ApiResponse::success(projects))
}

/// POST /projects
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(dto): Json<CreateProjectDto>,
) -> ApiResult<Project> {
    Ok(ApiResponse::created(state.projects.create(&user, dto).await?))
}

/// GET /projects/:id
pub async fn show(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Project> {
    Ok(ApiResponse::success(state.projects.get_project(id).await?))
}

/// PATCH /projects/:id
pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(dto): Json<UpdateProjectDto>,
) -> ApiResult<Project> {
    Ok(ApiResponse::success(state.projects.update(&user, id, dto).await?))
}

/// DELETE /projects/:id
pub async fn delete(State(state): State<AppState>, Extension(user): Extension<AuthUser>, Path(id): Path<Uuid>) -> ApiResult<()> {
    state.projects.delete(&user, id).await?;
    Ok(ApiResponse::no_content())
}
