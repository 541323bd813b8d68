// handlers/profiles.rs - /profiles handlers

use axum::{extract::State, Extension};

use crate::database::paginated::WithMeta;
use crate::filter::QueryParams;
use crate::middleware::{ApiResponse, ApiResult, AuthUser, Json, Path, Query};
use crate::services::{CreateProfileDto, ProfileView, UpdateProfileDto};
use crate::AppState;

/// GET /profiles
pub async fn list(State(state): State<AppState>, Query(pairs): Query<Vec<(String, String)>>) -> ApiResult<WithMeta<ProfileView>> {
    let profiles = state.profiles.list(QueryParams::from_pairs(pairs)).await?;
    Ok(ApiResponse::success(profiles))
}

/// GET /profiles/others
pub async fn list_others(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<WithMeta<ProfileView>> {
    let profiles = state.profiles.list_others(&user.username, QueryParams::from_pairs(pairs)).await?;
    Ok(ApiResponse::success(profiles))
}

/// POST /profiles
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(dto): Json<CreateProfileDto>,
) -> ApiResult<ProfileView> {
    let profile = state.profiles.create(&user.username, dto).await?;
    Ok(ApiResponse::created(profile))
}

/// GET /profiles/:username
pub async fn show(State(state): State<AppState>, Path(username): Path<String>) -> ApiResult<ProfileView> {
    Ok(ApiResponse::success(state.profiles.find_by_username(&username).await?))
}

/// PATCH /profiles/me
pub async fn update_me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(dto): Json<UpdateProfileDto>,
) -> ApiResult<ProfileView> {
    Ok(ApiResponse::success(state.profiles.update_me(&user.username, dto).await?))
}
