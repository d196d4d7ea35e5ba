//! Image promotion between GitOps environment overlays.

use regex::{Captures, Regex};
use tap_common::types::Environment;

/// Matches `image:` keys, optionally as a list item, with an optionally
/// quoted value.
const IMAGE_LINE: &str = r#"(?m)^(?P<key>[ \t]*(?:-[ \t]+)?image:[ \t]*)(?P<quote>["']?)(?P<image>[^"'\s#]+)["']?"#;

#[derive(Debug, thiserror::Error)]
pub enum PromotionError {
    #[error("manifest has no image reference")]
    NoImage,
    #[error("invalid image pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Deployment patch holding the image for `component` in `environment`.
pub fn overlay_path(component: &str, environment: Environment) -> String {
    format!("components/{component}/overlays/{environment}/deployment-patch.yaml")
}

fn image_line() -> Result<Regex, PromotionError> {
    Ok(Regex::new(IMAGE_LINE)?)
}

/// First image reference in `manifest`.
pub fn extract_image(manifest: &str) -> Result<String, PromotionError> {
    image_line()?
        .captures(manifest)
        .map(|caps| caps["image"].to_string())
        .ok_or(PromotionError::NoImage)
}

/// Point every `image:` entry of `manifest` at `image`, keeping indentation
/// and quoting. Errors if there was nothing to replace.
pub fn replace_image(manifest: &str, image: &str) -> Result<String, PromotionError> {
    let pattern = image_line()?;
    if !pattern.is_match(manifest) {
        return Err(PromotionError::NoImage);
    }
    let rewritten = pattern.replace_all(manifest, |caps: &Captures<'_>| {
        let quote = &caps["quote"];
        format!("{}{quote}{image}{quote}", &caps["key"])
    });
    Ok(rewritten.into_owned())
}
