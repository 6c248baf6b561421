use super::{ApiResult, AppState, CurrentUser, PageQuery};
use crate::models::{Album, AlbumChanges, Photo};
use crate::workflow::AlbumPhotoCount;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateAlbumRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AlbumCount {
    pub total: i64,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_albums).post(create_album))
        .route("/stats/count", get(album_count))
        .route(
            "/:album_id",
            get(get_album).patch(update_album).delete(delete_album),
        )
        .route("/:album_id/photos", get(album_photos))
        .route(
            "/:album_id/photos/:photo_id",
            post(add_photo).delete(remove_photo),
        )
        .route("/:album_id/stats/count", get(album_photo_count))
}

async fn create_album(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<CreateAlbumRequest>,
) -> ApiResult<(StatusCode, Json<Album>)> {
    let album = state
        .albums
        .create(user.id, &request.name, request.description.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(album)))
}

async fn list_albums(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Vec<Album>>> {
    Ok(Json(state.albums.list(user.id, query.page()?).await?))
}

async fn get_album(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(album_id): Path<Uuid>,
) -> ApiResult<Json<Album>> {
    Ok(Json(state.albums.get_owned(user.id, album_id).await?))
}

async fn update_album(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(album_id): Path<Uuid>,
    Json(changes): Json<AlbumChanges>,
) -> ApiResult<Json<Album>> {
    Ok(Json(state.albums.update(user.id, album_id, changes).await?))
}

async fn delete_album(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(album_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.albums.delete(user.id, album_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn album_photos(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(album_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Vec<Photo>>> {
    Ok(Json(
        state
            .albums
            .photos(user.id, album_id, query.page()?)
            .await?,
    ))
}

async fn add_photo(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((album_id, photo_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    state.albums.add_photo(user.id, album_id, photo_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_photo(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((album_id, photo_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    state.albums.remove_photo(user.id, album_id, photo_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn album_count(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<AlbumCount>> {
    let total = state.albums.count(user.id).await?;
    Ok(Json(AlbumCount { total }))
}

async fn album_photo_count(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(album_id): Path<Uuid>,
) -> ApiResult<Json<AlbumPhotoCount>> {
    Ok(Json(state.albums.photo_count(user.id, album_id).await?))
}

#[cfg(test)]
mod tests {
    use crate::ai_generator::MockAiImageGenerator;
    use crate::api::test_support::*;
    use axum::http::StatusCode;
    use serde_json::json;

    async fn create_album(app: &TestApp, token: &str, name: &str) -> String {
        let (status, body) = app
            .send(send_json(
                "POST",
                "/api/v1/albums",
                Some(token),
                json!({"name": name, "description": "trip"}),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    async fn create_photo(app: &TestApp, token: &str) -> String {
        let (status, body) = app
            .send(send_json(
                "POST",
                "/api/v1/photos",
                Some(token),
                json!({"storage_path": "imports/a.jpg", "status": "processed"}),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_album_membership_flow() {
        let app = test_app(MockAiImageGenerator::new());
        let (_, token) = app.login("alice").await;
        let album = create_album(&app, &token, "Summer").await;
        let photo = create_photo(&app, &token).await;
        let member = format!("/api/v1/albums/{album}/photos/{photo}");

        let (status, _) = app.send(empty("POST", &member, &token)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = app.send(empty("POST", &member, &token)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Photo not found or already in album");

        let (_, body) = app
            .send(get(&format!("/api/v1/albums/{album}/photos"), &token))
            .await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (_, body) = app
            .send(get(&format!("/api/v1/albums/{album}/stats/count"), &token))
            .await;
        assert_eq!(body["total"], 1);

        let (status, _) = app.send(empty("DELETE", &member, &token)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.send(empty("DELETE", &member, &token)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = app.send(get("/api/v1/albums/stats/count", &token)).await;
        assert_eq!(body, json!({"total": 1}));
    }

    #[tokio::test]
    async fn test_foreign_album_access() {
        let app = test_app(MockAiImageGenerator::new());
        let (_, alice) = app.login("alice").await;
        let (_, bob) = app.login("bob").await;
        let album = create_album(&app, &alice, "Private").await;
        let bob_photo = create_photo(&app, &bob).await;
        let uri = format!("/api/v1/albums/{album}");

        let (status, _) = app.send(get(&uri, &bob)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // Adding to someone else's album looks the same as a missing photo
        let (status, body) = app
            .send(empty("POST", &format!("{uri}/photos/{bob_photo}"), &bob))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "NOT_ASSOCIABLE");

        let (status, body) = app
            .send(send_json("PATCH", &uri, Some(&alice), json!({"name": "Shared"})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Shared");

        let (status, _) = app.send(empty("DELETE", &uri, &alice)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.send(get(&uri, &alice)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
