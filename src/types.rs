use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Which worker implementation drives a run.
///
/// - `Invoke`: line-oriented CLI commands with the richer flag set
///   (seamless, symmetry, masks, fine-tunes).
/// - `Xl`: `generate {json}` commands, base + refiner two-phase pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Invoke,
    Xl,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Invoke
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Invoke => write!(f, "invoke"),
            BackendKind::Xl => write!(f, "xl"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "invoke" => Ok(BackendKind::Invoke),
            "xl" | "sdxl" => Ok(BackendKind::Xl),
            other => Err(format!(
                "invalid backend: {other} (expected \"invoke\" or \"xl\")"
            )),
        }
    }
}

/// How a source image is used by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageMode {
    /// Plain image-to-image with a strength value.
    InitImage,
    /// Inpainting with a mask image.
    ImageMask,
    /// Inpainting with a mask described in text.
    TextMask,
    /// Outpainting of transparent regions.
    Outpainting,
}

impl Default for ImageMode {
    fn default() -> Self {
        ImageMode::InitImage
    }
}

/// Tiling mode for seamless textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeamlessMode {
    Disabled,
    Both,
    Horizontal,
    Vertical,
}

impl Default for SeamlessMode {
    fn default() -> Self {
        SeamlessMode::Disabled
    }
}

/// Mirror symmetry applied during sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymmetryMode {
    Disabled,
    Horizontal,
    Vertical,
    Both,
}

impl Default for SymmetryMode {
    fn default() -> Self {
        SymmetryMode::Disabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!("SDXL".parse::<BackendKind>(), Ok(BackendKind::Xl));
        assert_eq!(" invoke".parse::<BackendKind>(), Ok(BackendKind::Invoke));
        assert!("comfy".parse::<BackendKind>().is_err());
    }
}
