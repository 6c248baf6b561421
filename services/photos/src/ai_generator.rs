//! Image generation through the Gemini `generateContent` REST API.

use crate::config::AiConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Aspect ratios accepted by the image model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AspectRatio {
    Square,
    Portrait2x3,
    Landscape3x2,
    Portrait3x4,
    Landscape4x3,
    Portrait4x5,
    Landscape5x4,
    Vertical9x16,
    Horizontal16x9,
    UltraWide21x9,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 10] = [
        AspectRatio::Square,
        AspectRatio::Portrait2x3,
        AspectRatio::Landscape3x2,
        AspectRatio::Portrait3x4,
        AspectRatio::Landscape4x3,
        AspectRatio::Portrait4x5,
        AspectRatio::Landscape5x4,
        AspectRatio::Vertical9x16,
        AspectRatio::Horizontal16x9,
        AspectRatio::UltraWide21x9,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait2x3 => "2:3",
            AspectRatio::Landscape3x2 => "3:2",
            AspectRatio::Portrait3x4 => "3:4",
            AspectRatio::Landscape4x3 => "4:3",
            AspectRatio::Portrait4x5 => "4:5",
            AspectRatio::Landscape5x4 => "5:4",
            AspectRatio::Vertical9x16 => "9:16",
            AspectRatio::Horizontal16x9 => "16:9",
            AspectRatio::UltraWide21x9 => "21:9",
        }
    }

    /// Human-readable shape and output resolution
    pub fn description(&self) -> &'static str {
        match self {
            AspectRatio::Square => "Square (1024x1024)",
            AspectRatio::Portrait2x3 => "Portrait (832x1248)",
            AspectRatio::Landscape3x2 => "Landscape (1248x832)",
            AspectRatio::Portrait3x4 => "Portrait (864x1184)",
            AspectRatio::Landscape4x3 => "Landscape (1184x864)",
            AspectRatio::Portrait4x5 => "Portrait (896x1152)",
            AspectRatio::Landscape5x4 => "Landscape (1152x896)",
            AspectRatio::Vertical9x16 => "Vertical (768x1344)",
            AspectRatio::Horizontal16x9 => "Horizontal (1344x768)",
            AspectRatio::UltraWide21x9 => "Ultra-wide (1536x672)",
        }
    }

    /// Ratio with the colon replaced, for filenames (`16:9` -> `16x9`)
    pub fn file_token(&self) -> String {
        self.as_str().replace(':', "x")
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported aspect ratio: {0}")]
pub struct UnsupportedAspectRatio(pub String);

impl FromStr for AspectRatio {
    type Err = UnsupportedAspectRatio;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        AspectRatio::ALL
            .into_iter()
            .find(|r| r.as_str() == trimmed)
            .ok_or_else(|| UnsupportedAspectRatio(s.to_string()))
    }
}

/// Image bytes returned by the model
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Generative image model
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AiImageGenerator: Send + Sync {
    /// Generate an image from a text prompt
    async fn generate(&self, prompt: &str, aspect_ratio: AspectRatio) -> Result<GeneratedImage>;

    /// Generate an image from a text prompt and a reference image
    async fn generate_with_reference(
        &self,
        prompt: &str,
        reference: Vec<u8>,
        reference_mime: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<GeneratedImage>;

    /// Model identifier recorded as provenance
    fn model_name(&self) -> String;

    fn supported_aspect_ratios(&self) -> Vec<AspectRatio> {
        AspectRatio::ALL.to_vec()
    }
}

// Wire types for the generateContent endpoint

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    image_config: ImageConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

fn build_request(
    prompt: &str,
    reference: Option<(&[u8], &str)>,
    aspect_ratio: AspectRatio,
) -> GenerateRequest {
    let mut parts = Vec::with_capacity(2);

    if let Some((bytes, mime_type)) = reference {
        parts.push(Part {
            text: None,
            inline_data: Some(InlineData {
                mime_type: Some(mime_type.to_string()),
                data: STANDARD.encode(bytes),
            }),
        });
    }

    parts.push(Part {
        text: Some(prompt.to_string()),
        inline_data: None,
    });

    GenerateRequest {
        contents: vec![Content { parts }],
        generation_config: GenerationConfig {
            response_modalities: vec!["IMAGE"],
            image_config: ImageConfig {
                aspect_ratio: aspect_ratio.as_str(),
            },
        },
    }
}

/// Pull the first inline image out of a response
fn extract_image(response: GenerateResponse) -> Result<GeneratedImage> {
    let inline = response
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .find_map(|p| p.inline_data)
        .ok_or_else(|| anyhow!("No image generated in response"))?;

    let bytes = STANDARD
        .decode(inline.data.as_bytes())
        .context("Generated image is not valid base64")?;

    Ok(GeneratedImage {
        bytes,
        mime_type: inline.mime_type.unwrap_or_else(|| "image/png".to_string()),
    })
}

/// Gemini image model client
pub struct GeminiImageGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiImageGenerator {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        info!(model = %config.model, "Image generator initialized");

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    async fn call(&self, request: &GenerateRequest) -> Result<GeneratedImage> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .context("Image generation request failed")?
            .error_for_status()
            .context("Image generation API returned an error")?;

        let body: GenerateResponse = response
            .json()
            .await
            .context("Failed to decode image generation response")?;

        let image = extract_image(body)?;
        debug!(
            size_bytes = image.bytes.len(),
            mime_type = %image.mime_type,
            "Image generated"
        );
        Ok(image)
    }
}

#[async_trait]
impl AiImageGenerator for GeminiImageGenerator {
    #[instrument(skip(self, prompt), fields(aspect_ratio = %aspect_ratio))]
    async fn generate(&self, prompt: &str, aspect_ratio: AspectRatio) -> Result<GeneratedImage> {
        let request = build_request(prompt, None, aspect_ratio);
        self.call(&request).await.context("Failed to generate image")
    }

    #[instrument(skip(self, prompt, reference), fields(aspect_ratio = %aspect_ratio))]
    async fn generate_with_reference(
        &self,
        prompt: &str,
        reference: Vec<u8>,
        reference_mime: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<GeneratedImage> {
        let request = build_request(prompt, Some((&reference, reference_mime)), aspect_ratio);
        self.call(&request)
            .await
            .context("Failed to generate image from reference")
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_aspect_ratios() {
        let ratios: Vec<&str> = AspectRatio::ALL.iter().map(|r| r.as_str()).collect();
        assert_eq!(
            ratios,
            vec!["1:1", "2:3", "3:2", "3:4", "4:3", "4:5", "5:4", "9:16", "16:9", "21:9"]
        );
    }

    #[test]
    fn test_parse_aspect_ratio() {
        assert_eq!("16:9".parse::<AspectRatio>().unwrap(), AspectRatio::Horizontal16x9);
        assert_eq!(" 1:1 ".parse::<AspectRatio>().unwrap(), AspectRatio::Square);
        assert!("2:1".parse::<AspectRatio>().is_err());
        assert!("".parse::<AspectRatio>().is_err());
        assert_eq!(AspectRatio::UltraWide21x9.file_token(), "21x9");
    }

    #[test]
    fn test_build_request_text_only() {
        let request = build_request("a red fox", None, AspectRatio::Square);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["contents"][0]["parts"][0]["text"], "a red fox");
        assert!(json["contents"][0]["parts"][0].get("inlineData").is_none());
        assert_eq!(json["generationConfig"]["responseModalities"][0], "IMAGE");
        assert_eq!(json["generationConfig"]["imageConfig"]["aspectRatio"], "1:1");
    }

    #[test]
    fn test_build_request_with_reference() {
        let request = build_request(
            "make it snow",
            Some((b"abc", "image/png")),
            AspectRatio::Vertical9x16,
        );
        let json = serde_json::to_value(&request).unwrap();

        let parts = json["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[0]["inlineData"]["data"], STANDARD.encode(b"abc"));
        assert_eq!(parts[1]["text"], "make it snow");
        assert_eq!(json["generationConfig"]["imageConfig"]["aspectRatio"], "9:16");
    }

    #[test]
    fn test_extract_image_from_response() {
        let body = serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": [
                        {"text": "Here is your image"},
                        {"inlineData": {"mimeType": "image/png", "data": STANDARD.encode(b"png-bytes")}}
                    ]
                }
            }]
        });

        let response: GenerateResponse = serde_json::from_value(body).unwrap();
        let image = extract_image(response).unwrap();
        assert_eq!(image.bytes, b"png-bytes");
        assert_eq!(image.mime_type, "image/png");
    }

    #[test]
    fn test_extract_image_without_image_part() {
        let body = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "I cannot draw that"}]}}]
        });

        let response: GenerateResponse = serde_json::from_value(body).unwrap();
        let err = extract_image(response).unwrap_err();
        assert!(err.to_string().contains("No image generated"));
    }
}
