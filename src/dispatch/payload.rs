use std::collections::HashSet;

use serde_json::{json, Map, Value};

use super::dimensions::dimensions_for;
use crate::generation::GenerationRequest;
use crate::resolver::ResolvedVariant;

/// Backends that take the aspect ratio string itself instead of a pixel size.
/// These are explicit per-backend exceptions, not a rule derived from kind.
const ASPECT_RATIO_PASSTHROUGH: &[&str] = &[
    "fal-ai/nano-banana",
    "fal-ai/nano-banana/edit",
    "fal-ai/flux-pro/kontext",
    "fal-ai/flux-pro/kontext/text-to-image",
    "fal-ai/flux-pro/kontext/multi",
    "fal-ai/ideogram/v3",
];

/// key: dispatch-payload -> per-backend submission overrides
#[derive(Debug, Clone)]
pub struct PayloadRules {
    aspect_ratio_passthrough: HashSet<String>,
    pixel_budget: u64,
}

impl PayloadRules {
    pub fn new<I, S>(aspect_ratio_passthrough: I, pixel_budget: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            aspect_ratio_passthrough: aspect_ratio_passthrough.into_iter().map(Into::into).collect(),
            pixel_budget,
        }
    }

    pub fn standard(pixel_budget: u64) -> Self {
        Self::new(ASPECT_RATIO_PASSTHROUGH.iter().copied(), pixel_budget)
    }

    pub fn passes_ratio_through(&self, backend_id: &str) -> bool {
        self.aspect_ratio_passthrough.contains(backend_id)
    }

    /// Builds the provider input for one resolved variant.
    pub fn build(&self, variant: &ResolvedVariant, request: &GenerationRequest) -> Value {
        let constraint = variant.kind.constraint();
        let mut input = Map::new();

        if constraint.consumes_prompt() {
            if let Some(prompt) = request.prompt_text() {
                input.insert("prompt".into(), json!(prompt));
            }
            input.insert("num_images".into(), json!(request.unit_count.max(1)));

            if self.passes_ratio_through(&variant.backend_id) {
                input.insert("aspect_ratio".into(), json!(request.aspect_ratio.trim()));
            } else {
                let size = dimensions_for(
                    &request.aspect_ratio,
                    request.reference_dimensions(),
                    self.pixel_budget,
                );
                input.insert("image_size".into(), json!(size));
            }
        }

        if constraint.consumes_images() && !request.images.is_empty() {
            if variant.supports_image_array {
                let urls: Vec<&str> = request
                    .images
                    .iter()
                    .map(|image| image.url.as_str())
                    .collect();
                input.insert("image_urls".into(), json!(urls));
            } else if let Some(first) = request.images.first() {
                input.insert("image_url".into(), json!(first.url));
            }
        }

        Value::Object(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelKind;
    use crate::generation::ImageReference;

    fn variant(backend_id: &str, kind: ModelKind, supports_image_array: bool) -> ResolvedVariant {
        ResolvedVariant {
            model_id: "model".to_string(),
            backend_id: backend_id.to_string(),
            kind,
            credits_per_unit: 1,
            supports_image_array,
        }
    }

    fn request(prompt: Option<&str>, aspect_ratio: &str, images: Vec<ImageReference>) -> GenerationRequest {
        GenerationRequest {
            account_id: 1,
            prompt: prompt.map(str::to_string),
            images,
            aspect_ratio: aspect_ratio.to_string(),
            unit_count: 2,
        }
    }

    #[test]
    fn text_to_image_derives_pixel_size() {
        let rules = PayloadRules::standard(1_048_576);
        let payload = rules.build(
            &variant("fal-ai/flux/dev", ModelKind::TextToImage, false),
            &request(Some("  a fox  "), "16:9", vec![]),
        );
        assert_eq!(
            payload,
            json!({
                "prompt": "a fox",
                "num_images": 2,
                "image_size": { "width": 1344, "height": 768 },
            })
        );
    }

    #[test]
    fn passthrough_backends_receive_ratio_verbatim() {
        let rules = PayloadRules::standard(1_048_576);
        let payload = rules.build(
            &variant("fal-ai/nano-banana", ModelKind::TextToImage, true),
            &request(Some("a fox"), "auto", vec![]),
        );
        assert_eq!(payload["aspect_ratio"], "auto");
        assert!(payload.get("image_size").is_none());
    }

    #[test]
    fn image_field_shape_follows_array_support() {
        let rules = PayloadRules::standard(1_048_576);
        let images = vec![
            ImageReference::new("https://cdn.test/a.png").with_dimensions(1600, 900),
            ImageReference::new("https://cdn.test/b.png"),
        ];

        let single = rules.build(
            &variant("fal-ai/flux/dev/image-to-image", ModelKind::TextRequiredImageToImage, false),
            &request(Some("edit"), "auto", images.clone()),
        );
        assert_eq!(single["image_url"], "https://cdn.test/a.png");
        assert!(single.get("image_urls").is_none());
        assert_eq!(single["image_size"], json!({ "width": 1360, "height": 768 }));

        let multi = rules.build(
            &variant("fal-ai/bytedance/seedream/v4/edit", ModelKind::TextRequiredImageToImage, true),
            &request(Some("edit"), "1:1", images),
        );
        assert_eq!(
            multi["image_urls"],
            json!(["https://cdn.test/a.png", "https://cdn.test/b.png"])
        );
        assert!(multi.get("image_url").is_none());
    }

    #[test]
    fn text_to_image_drops_image_references() {
        let rules = PayloadRules::standard(1_048_576);
        let payload = rules.build(
            &variant("fal-ai/flux/dev", ModelKind::TextToImage, false),
            &request(Some("a fox"), "1:1", vec![ImageReference::new("https://cdn.test/a.png")]),
        );
        assert!(payload.get("image_url").is_none());
        assert!(payload.get("image_urls").is_none());
        assert_eq!(payload["prompt"], "a fox");
    }

    #[test]
    fn background_removal_sends_only_the_image() {
        let rules = PayloadRules::standard(1_048_576);
        let payload = rules.build(
            &variant("fal-ai/birefnet/v2", ModelKind::BackgroundRemoval, false),
            &request(Some("ignored"), "16:9", vec![ImageReference::new("https://cdn.test/a.png")]),
        );
        assert_eq!(payload, json!({ "image_url": "https://cdn.test/a.png" }));
    }

    #[test]
    fn custom_rules_override_the_standard_table() {
        let rules = PayloadRules::new(["synthetic/backend"], 1_048_576);
        assert!(rules.passes_ratio_through("synthetic/backend"));
        assert!(!rules.passes_ratio_through("fal-ai/nano-banana"));
    }
}
