use serde::{Deserialize, Serialize};

use super::kind::ModelKind;

/// key: catalog-models -> logical model + composer chain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub id: String,
    pub backend_id: String,
    pub kind: ModelKind,
    pub credits_per_unit: u32,
    pub max_input_images: u32,
    pub supports_image_array: bool,
    #[serde(default)]
    pub composer_chain: Vec<ComposerVariant>,
}

/// One concrete backend a logical model can fall back to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposerVariant {
    pub backend_id: String,
    pub kind: ModelKind,
    pub credits_per_unit: u32,
    #[serde(default)]
    pub supports_image_array: bool,
}

impl ModelDescriptor {
    pub fn new(
        id: impl Into<String>,
        backend_id: impl Into<String>,
        kind: ModelKind,
        credits_per_unit: u32,
    ) -> Self {
        Self {
            id: id.into(),
            backend_id: backend_id.into(),
            kind,
            credits_per_unit,
            max_input_images: 0,
            supports_image_array: false,
            composer_chain: Vec::new(),
        }
    }

    pub fn with_max_input_images(mut self, max_input_images: u32) -> Self {
        self.max_input_images = max_input_images;
        self
    }

    pub fn with_image_array(mut self) -> Self {
        self.supports_image_array = true;
        self
    }

    pub fn with_variant(mut self, variant: ComposerVariant) -> Self {
        self.composer_chain.push(variant);
        self
    }
}

impl ComposerVariant {
    pub fn new(backend_id: impl Into<String>, kind: ModelKind, credits_per_unit: u32) -> Self {
        Self {
            backend_id: backend_id.into(),
            kind,
            credits_per_unit,
            supports_image_array: false,
        }
    }

    pub fn with_image_array(mut self) -> Self {
        self.supports_image_array = true;
        self
    }
}
