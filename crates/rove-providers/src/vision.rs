//! Image description through a multimodal provider.

use anyhow::{Context, Result};
use base64::Engine;
use std::path::Path;
use tracing::debug;

use crate::{CompletionRequest, ImageContent, LLMProvider, Message, MessageRole};

/// Read an image file and encode it for a multimodal message
pub fn load_image(path: &Path) -> Result<ImageContent> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read image {}", path.display()))?;

    let media_type = ImageContent::media_type_from_bytes(&bytes)
        .or_else(|| {
            path.extension()
                .and_then(|e| e.to_str())
                .and_then(ImageContent::media_type_from_extension)
        })
        .unwrap_or("image/png");

    let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
    Ok(ImageContent::new(media_type, data))
}

/// Send a prompt together with one or more screenshots and return the model's text
pub async fn analyze_images(
    provider: &dyn LLMProvider,
    paths: &[impl AsRef<Path>],
    prompt: &str,
) -> Result<String> {
    if !provider.supports_images() {
        anyhow::bail!("Provider '{}' does not accept images", provider.name());
    }

    let images = paths
        .iter()
        .map(|p| load_image(p.as_ref()))
        .collect::<Result<Vec<_>>>()?;

    debug!(
        "Analyzing {} image(s) with provider '{}'",
        images.len(),
        provider.name()
    );

    let request = CompletionRequest {
        messages: vec![Message::with_images(
            MessageRole::User,
            prompt.to_string(),
            images,
        )],
        max_tokens: Some(provider.max_tokens()),
        temperature: Some(provider.temperature()),
    };

    let response = provider
        .complete(request)
        .await
        .context("Image analysis request failed")?;

    Ok(crate::strip_code_fences(&response.content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockProvider, MockResponse};
    use tempfile::TempDir;

    const PNG_HEADER: [u8; 16] = [
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13, 0x49, 0x48, 0x44, 0x52,
    ];

    #[test]
    fn test_load_image_detects_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shot.bin");
        std::fs::write(&path, PNG_HEADER).unwrap();

        let image = load_image(&path).unwrap();
        assert_eq!(image.media_type, "image/png");
        assert!(!image.data.is_empty());
    }

    #[tokio::test]
    async fn test_analyze_images_attaches_all_images() {
        let dir = TempDir::new().unwrap();
        let paths: Vec<_> = (0..2)
            .map(|i| {
                let p = dir.path().join(format!("shot_{}.png", i));
                std::fs::write(&p, PNG_HEADER).unwrap();
                p
            })
            .collect();

        let provider = MockProvider::new()
            .with_images(true)
            .with_response(MockResponse::text("A table of orders with an Export button"));

        let text = analyze_images(&provider, &paths, "Describe the page").await.unwrap();
        assert_eq!(text, "A table of orders with an Export button");

        let requests = provider.get_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[0].images.len(), 2);
    }

    #[tokio::test]
    async fn test_analyze_images_requires_support() {
        let provider = MockProvider::new();
        let paths: Vec<std::path::PathBuf> = Vec::new();
        assert!(analyze_images(&provider, &paths, "x").await.is_err());
    }
}
