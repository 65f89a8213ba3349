use serde::{Deserialize, Serialize};

use crate::generation::GenerationRequest;

/// Input rule attached to a model kind. Each kind owns its own rule so a new
/// kind only needs a new implementor plus its enum arm.
pub trait InputConstraint: Send + Sync {
    fn is_satisfied_by(&self, request: &GenerationRequest) -> bool;

    /// Whether image references are forwarded to the backend at all.
    fn consumes_images(&self) -> bool;

    /// Whether the prompt is forwarded to the backend.
    fn consumes_prompt(&self) -> bool {
        true
    }
}

/// key: catalog-kind -> input requirements per backend capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    TextToImage,
    TextOptionalImageToImage,
    TextRequiredImageToImage,
    ImageToImage,
    BackgroundRemoval,
}

impl ModelKind {
    pub fn constraint(&self) -> &'static dyn InputConstraint {
        match self {
            ModelKind::TextToImage => &TextOnly,
            ModelKind::TextOptionalImageToImage => &TextWithOptionalImage,
            ModelKind::TextRequiredImageToImage => &TextWithRequiredImage,
            ModelKind::ImageToImage => &ImageConditioned,
            ModelKind::BackgroundRemoval => &CutOut,
        }
    }

    pub fn is_satisfied_by(&self, request: &GenerationRequest) -> bool {
        self.constraint().is_satisfied_by(request)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::TextToImage => "text-to-image",
            ModelKind::TextOptionalImageToImage => "text-optional-image-to-image",
            ModelKind::TextRequiredImageToImage => "text-required-image-to-image",
            ModelKind::ImageToImage => "image-to-image",
            ModelKind::BackgroundRemoval => "background-removal",
        }
    }
}

/// Prompt required; image references are not accepted.
struct TextOnly;

impl InputConstraint for TextOnly {
    fn is_satisfied_by(&self, request: &GenerationRequest) -> bool {
        request.has_prompt() && request.images.is_empty()
    }

    fn consumes_images(&self) -> bool {
        false
    }
}

struct TextWithOptionalImage;

impl InputConstraint for TextWithOptionalImage {
    fn is_satisfied_by(&self, request: &GenerationRequest) -> bool {
        request.has_prompt()
    }

    fn consumes_images(&self) -> bool {
        true
    }
}

struct TextWithRequiredImage;

impl InputConstraint for TextWithRequiredImage {
    fn is_satisfied_by(&self, request: &GenerationRequest) -> bool {
        request.has_prompt() && !request.images.is_empty()
    }

    fn consumes_images(&self) -> bool {
        true
    }
}

/// Image required, prompt optional.
struct ImageConditioned;

impl InputConstraint for ImageConditioned {
    fn is_satisfied_by(&self, request: &GenerationRequest) -> bool {
        !request.images.is_empty()
    }

    fn consumes_images(&self) -> bool {
        true
    }
}

/// Image required; any prompt is ignored.
struct CutOut;

impl InputConstraint for CutOut {
    fn is_satisfied_by(&self, request: &GenerationRequest) -> bool {
        !request.images.is_empty()
    }

    fn consumes_images(&self) -> bool {
        true
    }

    fn consumes_prompt(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ImageReference;

    fn request(prompt: Option<&str>, images: usize) -> GenerationRequest {
        GenerationRequest {
            account_id: 1,
            prompt: prompt.map(str::to_string),
            images: (0..images)
                .map(|idx| ImageReference::new(format!("https://cdn.test/{idx}.png")))
                .collect(),
            aspect_ratio: "1:1".to_string(),
            unit_count: 1,
        }
    }

    #[test]
    fn text_to_image_rejects_images_and_blank_prompts() {
        let kind = ModelKind::TextToImage;
        assert!(kind.is_satisfied_by(&request(Some("a fox"), 0)));
        assert!(!kind.is_satisfied_by(&request(Some("a fox"), 1)));
        assert!(!kind.is_satisfied_by(&request(Some("   "), 0)));
        assert!(!kind.is_satisfied_by(&request(None, 0)));
    }

    #[test]
    fn required_image_kind_needs_both_inputs() {
        let kind = ModelKind::TextRequiredImageToImage;
        assert!(kind.is_satisfied_by(&request(Some("make it blue"), 2)));
        assert!(!kind.is_satisfied_by(&request(Some("make it blue"), 0)));
        assert!(!kind.is_satisfied_by(&request(None, 1)));
    }

    #[test]
    fn optional_image_kind_only_needs_prompt() {
        let kind = ModelKind::TextOptionalImageToImage;
        assert!(kind.is_satisfied_by(&request(Some("a fox"), 0)));
        assert!(kind.is_satisfied_by(&request(Some("a fox"), 3)));
        assert!(!kind.is_satisfied_by(&request(None, 3)));
    }

    #[test]
    fn background_removal_ignores_prompt() {
        let kind = ModelKind::BackgroundRemoval;
        assert!(kind.is_satisfied_by(&request(None, 1)));
        assert!(kind.is_satisfied_by(&request(Some("ignored"), 1)));
        assert!(!kind.is_satisfied_by(&request(None, 0)));
        assert!(!kind.constraint().consumes_prompt());
    }

    #[test]
    fn kinds_serialize_kebab_case() {
        let value = serde_json::to_value(ModelKind::TextRequiredImageToImage).unwrap();
        assert_eq!(value, serde_json::json!("text-required-image-to-image"));
        assert_eq!(ModelKind::ImageToImage.as_str(), "image-to-image");
    }
}
