pub mod kind;
pub mod models;

use std::collections::HashMap;

use thiserror::Error;

pub use kind::{InputConstraint, ModelKind};
pub use models::{ComposerVariant, ModelDescriptor};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("model `{0}` is registered more than once")]
    DuplicateModel(String),
    #[error("model `{0}` has an empty backend id")]
    MissingBackend(String),
}

/// key: model-catalog -> immutable registry injected at startup
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    descriptors: Vec<ModelDescriptor>,
    index: HashMap<String, usize>,
}

impl ModelCatalog {
    pub fn new(descriptors: Vec<ModelDescriptor>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(descriptors.len());
        for (position, descriptor) in descriptors.iter().enumerate() {
            let blank_variant = descriptor
                .composer_chain
                .iter()
                .any(|variant| variant.backend_id.trim().is_empty());
            if descriptor.backend_id.trim().is_empty() || blank_variant {
                return Err(CatalogError::MissingBackend(descriptor.id.clone()));
            }
            if index.insert(descriptor.id.clone(), position).is_some() {
                return Err(CatalogError::DuplicateModel(descriptor.id.clone()));
            }
        }
        Ok(Self { descriptors, index })
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelDescriptor> {
        self.index
            .get(model_id)
            .and_then(|position| self.descriptors.get(*position))
    }

    pub fn descriptors(&self) -> &[ModelDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Models offered by the hosted deployment.
    pub fn standard() -> Self {
        let descriptors = vec![
            ModelDescriptor::new("flux-schnell", "fal-ai/flux/schnell", ModelKind::TextToImage, 1),
            ModelDescriptor::new("flux-dev", "fal-ai/flux/dev", ModelKind::TextToImage, 2)
                .with_max_input_images(1)
                .with_variant(ComposerVariant::new(
                    "fal-ai/flux/dev/image-to-image",
                    ModelKind::TextRequiredImageToImage,
                    2,
                )),
            ModelDescriptor::new(
                "flux-kontext-pro",
                "fal-ai/flux-pro/kontext",
                ModelKind::TextOptionalImageToImage,
                4,
            )
            .with_max_input_images(4)
            .with_variant(ComposerVariant::new(
                "fal-ai/flux-pro/kontext/text-to-image",
                ModelKind::TextToImage,
                4,
            ))
            .with_variant(
                ComposerVariant::new(
                    "fal-ai/flux-pro/kontext/multi",
                    ModelKind::TextRequiredImageToImage,
                    5,
                )
                .with_image_array(),
            ),
            ModelDescriptor::new(
                "seedream-v4",
                "fal-ai/bytedance/seedream/v4/text-to-image",
                ModelKind::TextToImage,
                3,
            )
            .with_max_input_images(10)
            .with_image_array()
            .with_variant(
                ComposerVariant::new(
                    "fal-ai/bytedance/seedream/v4/edit",
                    ModelKind::TextRequiredImageToImage,
                    3,
                )
                .with_image_array(),
            ),
            ModelDescriptor::new("nano-banana", "fal-ai/nano-banana", ModelKind::TextToImage, 2)
                .with_max_input_images(4)
                .with_image_array()
                .with_variant(
                    ComposerVariant::new(
                        "fal-ai/nano-banana/edit",
                        ModelKind::TextRequiredImageToImage,
                        2,
                    )
                    .with_image_array(),
                ),
            ModelDescriptor::new("ideogram-v3", "fal-ai/ideogram/v3", ModelKind::TextToImage, 3),
            ModelDescriptor::new(
                "sdxl-lightning",
                "fal-ai/fast-lightning-sdxl",
                ModelKind::TextToImage,
                0,
            ),
            ModelDescriptor::new(
                "clarity-upscaler",
                "fal-ai/clarity-upscaler",
                ModelKind::ImageToImage,
                2,
            )
            .with_max_input_images(1),
            ModelDescriptor::new(
                "background-removal",
                "fal-ai/birefnet/v2",
                ModelKind::BackgroundRemoval,
                1,
            )
            .with_max_input_images(1),
        ];

        Self::new(descriptors).expect("standard catalog is well formed")
    }
}
