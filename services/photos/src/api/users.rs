use super::{ApiResult, AppState, CurrentUser, PageQuery};
use crate::error::PhotoError;
use crate::models::User;
use crate::workflow::{NewUser, UserUpdate};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/:user_id", get(get_user).put(update_user).delete(delete_user))
}

async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<NewUser>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let user = state.users.register(request).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn list_users(
    State(state): State<AppState>,
    _caller: CurrentUser,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.users.list(query.page()?).await?))
}

async fn get_user(
    State(state): State<AppState>,
    _caller: CurrentUser,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<User>> {
    Ok(Json(state.users.get(user_id).await?))
}

async fn update_user(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(user_id): Path<i64>,
    Json(update): Json<UserUpdate>,
) -> ApiResult<Json<User>> {
    require_self(&caller, user_id)?;
    Ok(Json(state.users.update(user_id, update).await?))
}

async fn delete_user(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(user_id): Path<i64>,
) -> ApiResult<StatusCode> {
    require_self(&caller, user_id)?;
    state.users.delete(user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Accounts can only be changed by their owner
fn require_self(caller: &User, user_id: i64) -> Result<(), PhotoError> {
    if caller.id != user_id {
        return Err(PhotoError::Forbidden("user"));
    }
    Ok(())
}
