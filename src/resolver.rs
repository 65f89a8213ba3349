use serde::Serialize;
use thiserror::Error;

use crate::catalog::{ModelCatalog, ModelKind};
use crate::generation::GenerationRequest;

/// The concrete backend a logical model resolved to for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedVariant {
    pub model_id: String,
    pub backend_id: String,
    pub kind: ModelKind,
    pub credits_per_unit: u32,
    pub supports_image_array: bool,
}

impl ResolvedVariant {
    /// Every billed action costs at least one credit.
    pub fn credits_for(&self, unit_count: u32) -> i64 {
        credits_required(self.credits_per_unit, unit_count)
    }
}

pub fn credits_required(credits_per_unit: u32, unit_count: u32) -> i64 {
    (i64::from(credits_per_unit) * i64::from(unit_count)).max(1)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown model `{0}`")]
    UnknownModel(String),
    #[error("model `{model_id}` accepts at most {max} input images, got {given}")]
    TooManyImages {
        model_id: String,
        max: u32,
        given: usize,
    },
    #[error("model `{0}` has no variant compatible with the supplied inputs")]
    IncompatibleModel(String),
}

/// key: compatibility-resolver -> first satisfied candidate wins
///
/// A descriptor is its own sole candidate when its composer chain is empty.
/// A text-only descriptor is tried before its chain; every other descriptor
/// with a chain defers entirely to the chain, in declaration order.
///
/// Image references are forbidden for a text-only model that has a chain (they
/// route the request to an image-capable entry) and ignored for one without.
pub fn resolve(
    catalog: &ModelCatalog,
    request: &GenerationRequest,
    model_id: &str,
) -> Result<ResolvedVariant, ResolveError> {
    let descriptor = catalog
        .get(model_id)
        .ok_or_else(|| ResolveError::UnknownModel(model_id.to_string()))?;

    if descriptor.max_input_images > 0
        && request.images.len() > descriptor.max_input_images as usize
    {
        return Err(ResolveError::TooManyImages {
            model_id: descriptor.id.clone(),
            max: descriptor.max_input_images,
            given: request.images.len(),
        });
    }

    let base_satisfied = match (descriptor.composer_chain.is_empty(), descriptor.kind) {
        // nothing else could take the images, so they are dropped
        (true, ModelKind::TextToImage) => request.has_prompt(),
        (true, kind) | (false, kind @ ModelKind::TextToImage) => kind.is_satisfied_by(request),
        (false, _) => false,
    };
    if base_satisfied {
        return Ok(ResolvedVariant {
            model_id: descriptor.id.clone(),
            backend_id: descriptor.backend_id.clone(),
            kind: descriptor.kind,
            credits_per_unit: descriptor.credits_per_unit,
            supports_image_array: descriptor.supports_image_array,
        });
    }

    descriptor
        .composer_chain
        .iter()
        .find(|variant| variant.kind.is_satisfied_by(request))
        .map(|variant| ResolvedVariant {
            model_id: descriptor.id.clone(),
            backend_id: variant.backend_id.clone(),
            kind: variant.kind,
            credits_per_unit: variant.credits_per_unit,
            supports_image_array: variant.supports_image_array,
        })
        .ok_or_else(|| ResolveError::IncompatibleModel(descriptor.id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ComposerVariant, ModelDescriptor};
    use crate::generation::ImageReference;

    fn request(prompt: Option<&str>, images: usize) -> GenerationRequest {
        GenerationRequest {
            account_id: 7,
            prompt: prompt.map(str::to_string),
            images: (0..images)
                .map(|idx| ImageReference::new(format!("https://cdn.test/{idx}.png")))
                .collect(),
            aspect_ratio: "1:1".to_string(),
            unit_count: 1,
        }
    }

    fn chained_catalog() -> ModelCatalog {
        ModelCatalog::new(vec![
            ModelDescriptor::new("composer", "base/optional", ModelKind::TextOptionalImageToImage, 9)
                .with_max_input_images(3)
                .with_variant(ComposerVariant::new("chain/text", ModelKind::TextToImage, 2))
                .with_variant(ComposerVariant::new(
                    "chain/edit",
                    ModelKind::TextRequiredImageToImage,
                    4,
                ))
                .with_variant(
                    ComposerVariant::new("chain/edit-multi", ModelKind::TextRequiredImageToImage, 6)
                        .with_image_array(),
                ),
            ModelDescriptor::new("plain", "base/plain", ModelKind::TextToImage, 3),
            ModelDescriptor::new("free", "base/free", ModelKind::TextToImage, 0),
            ModelDescriptor::new("cutout", "base/cutout", ModelKind::BackgroundRemoval, 1)
                .with_max_input_images(1),
        ])
        .unwrap()
    }

    #[test]
    fn picks_first_satisfied_chain_entry() {
        let catalog = chained_catalog();
        let resolved = resolve(&catalog, &request(Some("edit this"), 2), "composer").unwrap();
        // chain/edit-multi is also compatible but declared later
        assert_eq!(resolved.backend_id, "chain/edit");
        assert_eq!(resolved.credits_per_unit, 4);
        assert_eq!(resolved.kind, ModelKind::TextRequiredImageToImage);
        assert_eq!(resolved.model_id, "composer");
    }

    #[test]
    fn text_only_requests_walk_to_text_variant() {
        let catalog = chained_catalog();
        let resolved = resolve(&catalog, &request(Some("a lighthouse"), 0), "composer").unwrap();
        assert_eq!(resolved.backend_id, "chain/text");
        assert_eq!(resolved.credits_per_unit, 2);
    }

    #[test]
    fn chainless_descriptor_is_its_own_candidate() {
        let catalog = chained_catalog();
        let resolved = resolve(&catalog, &request(Some("a lighthouse"), 0), "plain").unwrap();
        assert_eq!(resolved.backend_id, "base/plain");

        let err = resolve(&catalog, &request(None, 0), "plain").unwrap_err();
        assert_eq!(err, ResolveError::IncompatibleModel("plain".to_string()));
    }

    #[test]
    fn chainless_text_model_ignores_images() {
        let catalog = chained_catalog();
        let resolved = resolve(&catalog, &request(Some("a lighthouse"), 1), "plain").unwrap();
        assert_eq!(resolved.backend_id, "base/plain");
        assert_eq!(resolved.kind, ModelKind::TextToImage);

        let err = resolve(&catalog, &request(None, 1), "plain").unwrap_err();
        assert_eq!(err, ResolveError::IncompatibleModel("plain".to_string()));
    }

    #[test]
    fn no_matching_entry_is_incompatible() {
        let catalog = chained_catalog();
        let err = resolve(&catalog, &request(None, 1), "composer").unwrap_err();
        assert_eq!(err, ResolveError::IncompatibleModel("composer".to_string()));
    }

    #[test]
    fn unknown_models_and_excess_images_are_rejected() {
        let catalog = chained_catalog();
        assert_eq!(
            resolve(&catalog, &request(Some("x"), 0), "missing").unwrap_err(),
            ResolveError::UnknownModel("missing".to_string())
        );
        assert!(matches!(
            resolve(&catalog, &request(None, 2), "cutout").unwrap_err(),
            ResolveError::TooManyImages { max: 1, given: 2, .. }
        ));
    }

    #[test]
    fn background_removal_resolves_without_prompt() {
        let catalog = chained_catalog();
        let resolved = resolve(&catalog, &request(None, 1), "cutout").unwrap();
        assert_eq!(resolved.backend_id, "base/cutout");
    }

    #[test]
    fn charge_never_drops_below_one_credit() {
        assert_eq!(credits_required(0, 5), 1);
        assert_eq!(credits_required(3, 4), 12);
        assert_eq!(credits_required(10, 1), 10);

        let catalog = chained_catalog();
        let resolved = resolve(&catalog, &request(Some("free lunch"), 0), "free").unwrap();
        assert_eq!(resolved.credits_for(5), 1);
    }
}
