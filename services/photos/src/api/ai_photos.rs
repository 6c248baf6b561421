use super::photos::{multipart_error, read_file, StoredPhotoResponse};
use super::{ApiResult, AppState, CurrentUser};
use crate::error::PhotoError;
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};

const DEFAULT_ASPECT_RATIO: &str = "1:1";

#[derive(Debug, Deserialize)]
pub struct GenerateForm {
    pub prompt: String,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
}

fn default_aspect_ratio() -> String {
    DEFAULT_ASPECT_RATIO.to_string()
}

#[derive(Debug, Serialize)]
pub struct AspectRatioInfo {
    pub ratio: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Serialize)]
pub struct SupportedAspectRatios {
    pub supported_aspect_ratios: Vec<AspectRatioInfo>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/generate", post(generate))
        .route("/generate-from-reference", post(generate_from_reference))
        .route("/supported-aspect-ratios", get(supported_aspect_ratios))
}

async fn generate(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Form(form): Form<GenerateForm>,
) -> ApiResult<(StatusCode, Json<StoredPhotoResponse>)> {
    let stored = state
        .photos
        .generate_from_text(&user, &form.prompt, &form.aspect_ratio)
        .await?;
    Ok((StatusCode::CREATED, Json(stored.into())))
}

async fn generate_from_reference(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<StoredPhotoResponse>)> {
    let mut prompt = None;
    let mut aspect_ratio = None;
    let mut reference = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("prompt") => prompt = Some(field.text().await.map_err(multipart_error)?),
            Some("aspect_ratio") => {
                aspect_ratio = Some(field.text().await.map_err(multipart_error)?)
            }
            Some("reference_image") => reference = Some(read_file(field).await?),
            _ => {}
        }
    }

    let prompt = prompt.ok_or_else(|| PhotoError::validation("Missing prompt field"))?;
    let reference =
        reference.ok_or_else(|| PhotoError::validation("Missing reference_image field"))?;
    let aspect_ratio = aspect_ratio.unwrap_or_else(default_aspect_ratio);

    let stored = state
        .photos
        .generate_from_reference(&user, &prompt, &aspect_ratio, reference)
        .await?;
    Ok((StatusCode::CREATED, Json(stored.into())))
}

async fn supported_aspect_ratios(State(state): State<AppState>) -> Json<SupportedAspectRatios> {
    let supported_aspect_ratios = state
        .photos
        .supported_aspect_ratios()
        .into_iter()
        .map(|ratio| AspectRatioInfo {
            ratio: ratio.as_str(),
            description: ratio.description(),
        })
        .collect();

    Json(SupportedAspectRatios {
        supported_aspect_ratios,
    })
}

#[cfg(test)]
mod tests {
    use crate::ai_generator::{AspectRatio, GeneratedImage, MockAiImageGenerator};
    use crate::api::test_support::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};

    fn generator() -> MockAiImageGenerator {
        let mut generator = MockAiImageGenerator::new();
        generator
            .expect_supported_aspect_ratios()
            .returning(|| AspectRatio::ALL.to_vec());
        generator
            .expect_model_name()
            .returning(|| "gemini-2.5-flash-image".to_string());
        generator
    }

    fn form(token: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/ai-photos/generate")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_generate_stores_photo_with_provenance() {
        let mut generator = generator();
        generator
            .expect_generate()
            .withf(|prompt, ratio| prompt.to_string() == "a red fox" && *ratio == AspectRatio::Horizontal16x9)
            .times(1)
            .returning(|_, _| {
                Ok(GeneratedImage {
                    bytes: vec![0x89, b'P', b'N', b'G'],
                    mime_type: "image/png".to_string(),
                })
            });
        let app = test_app(generator);
        let (_, token) = app.login("alice").await;

        let (status, body) = app
            .send(form(&token, "prompt=a+red+fox&aspect_ratio=16%3A9"))
            .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "processed");
        let path = body["storage_path"].as_str().unwrap();
        assert!(path.ends_with(".png"));

        let id = body["id"].as_str().unwrap();
        let document = app.documents.document(id).unwrap();
        assert_eq!(document["ai_generated"], true);
        assert_eq!(document["ai_prompt"], "a red fox");
        assert_eq!(document["ai_aspect_ratio"], "16:9");
    }

    #[tokio::test]
    async fn test_generate_rejects_unknown_ratio_without_calling_model() {
        let mut generator = generator();
        generator.expect_generate().times(0);
        let app = test_app(generator);
        let (_, token) = app.login("alice").await;

        let (status, body) = app.send(form(&token, "prompt=fox&aspect_ratio=7%3A3")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Invalid aspect ratio"));
        assert_eq!(app.relational.photo_count(), 0);
    }

    #[tokio::test]
    async fn test_generation_failure_stores_nothing() {
        let mut generator = generator();
        generator
            .expect_generate()
            .returning(|_, _| Err(anyhow::anyhow!("No image generated in response")));
        let app = test_app(generator);
        let (_, token) = app.login("alice").await;

        let (status, body) = app.send(form(&token, "prompt=fox")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "GENERATION_ERROR");
        assert!(app.objects.is_empty());
        assert_eq!(app.relational.photo_count(), 0);
    }

    #[tokio::test]
    async fn test_generate_from_reference() {
        let mut generator = generator();
        generator
            .expect_generate_with_reference()
            .withf(|prompt, reference, mime, ratio| {
                prompt.to_string() == "make it night"
                    && reference == &vec![0xFF, 0xD8, 0xFF]
                    && mime.to_string() == "image/jpeg"
                    && *ratio == AspectRatio::Square
            })
            .times(1)
            .returning(|_, _, _, _| {
                Ok(GeneratedImage {
                    bytes: vec![1, 2, 3],
                    mime_type: "image/png".to_string(),
                })
            });
        let app = test_app(generator);
        let (_, token) = app.login("alice").await;

        let request = multipart(
            "/api/v1/ai-photos/generate-from-reference",
            &token,
            "reference_image",
            "street.jpg",
            "image/jpeg",
            &[0xFF, 0xD8, 0xFF],
            &[("prompt", "make it night")],
        );
        let (status, body) = app.send(request).await;

        assert_eq!(status, StatusCode::CREATED);
        let document = app.documents.document(body["id"].as_str().unwrap()).unwrap();
        assert_eq!(document["ai_reference_image"], "street.jpg");
    }

    #[tokio::test]
    async fn test_supported_aspect_ratios() {
        let app = test_app(generator());
        let request = Request::builder()
            .uri("/api/v1/ai-photos/supported-aspect-ratios")
            .body(Body::empty())
            .unwrap();

        let (status, body) = app.send(request).await;

        assert_eq!(status, StatusCode::OK);
        let ratios = body["supported_aspect_ratios"].as_array().unwrap();
        assert_eq!(ratios.len(), 10);
        assert_eq!(ratios[0]["ratio"], "1:1");
        assert_eq!(ratios[0]["description"], "Square (1024x1024)");
    }
}
