use serde::Serialize;

/// Concrete pixel size sent to backends that do not take a ratio string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

pub const AUTO_ASPECT_RATIO: &str = "auto";

pub const SQUARE: ImageSize = ImageSize::new(1024, 1024);

const RATIO_TABLE: &[(&str, ImageSize)] = &[
    ("1:1", SQUARE),
    ("16:9", ImageSize::new(1344, 768)),
    ("9:16", ImageSize::new(768, 1344)),
    ("4:3", ImageSize::new(1152, 896)),
    ("3:4", ImageSize::new(896, 1152)),
    ("3:2", ImageSize::new(1216, 832)),
    ("2:3", ImageSize::new(832, 1216)),
    ("21:9", ImageSize::new(1536, 640)),
    ("9:21", ImageSize::new(640, 1536)),
];

/// key: dispatch-dimensions -> ratio lookup with square fallback
pub fn dimensions_for(
    aspect_ratio: &str,
    reference: Option<(u32, u32)>,
    pixel_budget: u64,
) -> ImageSize {
    let ratio = aspect_ratio.trim();
    if ratio.eq_ignore_ascii_case(AUTO_ASPECT_RATIO) {
        return reference
            .and_then(|(width, height)| fit_to_budget(width, height, pixel_budget))
            .unwrap_or(SQUARE);
    }

    RATIO_TABLE
        .iter()
        .find(|(name, _)| *name == ratio)
        .map(|(_, size)| *size)
        .unwrap_or(SQUARE)
}

/// Largest size with the reference's proportions whose area stays within the
/// budget, each side rounded down to a multiple of 8.
pub fn fit_to_budget(width: u32, height: u32, pixel_budget: u64) -> Option<ImageSize> {
    if width == 0 || height == 0 || pixel_budget < 64 {
        return None;
    }

    let scale = (pixel_budget as f64 / (f64::from(width) * f64::from(height))).sqrt();
    let fitted_width = round_down_to_8(f64::from(width) * scale);
    let fitted_height = round_down_to_8(f64::from(height) * scale);
    if u64::from(fitted_width) * u64::from(fitted_height) <= pixel_budget {
        return Some(ImageSize::new(fitted_width, fitted_height));
    }

    // the short side was clamped up to 8 (or float error tipped us over):
    // keep the short side and give the long side whatever budget remains
    let (short, landscape) = if fitted_width >= fitted_height {
        (fitted_height, true)
    } else {
        (fitted_width, false)
    };
    let long = longest_side_within(pixel_budget, short);
    Some(if landscape {
        ImageSize::new(long, short)
    } else {
        ImageSize::new(short, long)
    })
}

fn longest_side_within(pixel_budget: u64, short: u32) -> u32 {
    let long = (pixel_budget / u64::from(short) / 8).saturating_mul(8);
    u32::try_from(long).unwrap_or(u32::MAX - 7).max(8)
}

fn round_down_to_8(value: f64) -> u32 {
    // absorb float error such as 767.9999 for an exact 768
    let whole = (value + 1e-6).floor().max(8.0) as u32;
    (whole / 8).max(1) * 8
}
