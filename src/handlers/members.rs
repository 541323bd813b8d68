// handlers/members.rs - /projects/:id/members handlers

use axum::{extract::State, Extension};
use uuid::Uuid;

use crate::database::models::ProjectMember;
use crate::database::paginated::WithMeta;
use crate::filter::QueryParams;
use crate::middleware::{ApiResponse, ApiResult, AuthUser, Path, Query};
use crate::AppState;

/// GET /projects/:id/members
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(project_id): Path<Uuid>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<WithMeta<ProjectMember>> {
    let members = state.members.list(&user, project_id, QueryParams::from_pairs(pairs)).await?;
    Ok(ApiResponse::success(members))
}

/// GET /projects/:id/members/:username
pub async fn show(State(state): State<AppState>, Path((project_id, username)): Path<(Uuid, String)>) -> ApiResult<ProjectMember> {
    Ok(ApiResponse::success(state.members.find_active(project_id, &username).await?))
}

/// POST /projects/:id/members/:username/invite
pub async fn invite(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((project_id, username)): Path<(Uuid, String)>,
) -> ApiResult<ProjectMember> {
    Ok(ApiResponse::created(state.members.invite(&user, project_id, &username).await?))
}

/// POST /projects/:id/members/join
pub async fn join(State(state): State<AppState>, Extension(user): Extension<AuthUser>, Path(project_id): Path<Uuid>) -> ApiResult<ProjectMember> {
    Ok(ApiResponse::created(state.members.request_to_join(&user, project_id).await?))
}

/// POST /projects/:id/members/accept
pub async fn accept(State(state): State<AppState>, Extension(user): Extension<AuthUser>, Path(project_id): Path<Uuid>) -> ApiResult<ProjectMember> {
    Ok(ApiResponse::success(state.members.accept(&user, project_id).await?))
}

/// POST /projects/:id/members/:username/approve
pub async fn approve(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((project_id, username)): Path<(Uuid, String)>,
) -> ApiResult<ProjectMember> {
    Ok(ApiResponse::success(state.members.approve(&user, project_id, &username).await?))
}

/// POST /projects/:id/members/:username/transfer
pub async fn transfer(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((project_id, username)): Path<(Uuid, String)>,
) -> ApiResult<Vec<ProjectMember>> {
    Ok(ApiResponse::success(state.members.transfer(&user, project_id, &username).await?))
}

/// DELETE /projects/:id/members
pub async fn leave(State(state): State<AppState>, Extension(user): Extension<AuthUser>, Path(project_id): Path<Uuid>) -> ApiResult<()> {
    state.members.leave(&user, project_id).await?;
    Ok(ApiResponse::no_content())
}

/// DELETE /projects/:id/members/:username
pub async fn kick(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((project_id, username)): Path<(Uuid, String)>,
) -> ApiResult<()> {
    state.members.kick(&user, project_id, &username).await?;
    Ok(ApiResponse::no_content())
}
