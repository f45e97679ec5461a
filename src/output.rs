//! Saving generated images from the `generate` command.

use std::path::{Path, PathBuf};

use image::ImageFormat;

use crate::error::BotError;

/// File name for a prompt: up to 50 kebab-case characters, a timestamp and
/// the extension matching `mime_type`.
#[must_use]
pub fn auto_filename(prompt: &str, mime_type: &str) -> String {
    let stem = sanitize_for_filename(prompt, 50);
    let timestamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    format!("{stem}-{timestamp}.{}", extension_for_mime(mime_type))
}

/// Lowercase ASCII words joined by single hyphens, at most `max_len` long.
#[must_use]
pub fn sanitize_for_filename(input: &str, max_len: usize) -> String {
    let mut result = String::with_capacity(max_len);
    let mut pending_hyphen = false;

    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            let needed = usize::from(pending_hyphen) + 1;
            if result.len() + needed > max_len {
                break;
            }
            if pending_hyphen {
                result.push('-');
            }
            result.push(ch.to_ascii_lowercase());
            pending_hyphen = false;
        } else if !result.is_empty() {
            pending_hyphen = true;
        }
    }

    if result.is_empty() {
        "image".to_string()
    } else {
        result
    }
}

fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

/// Output path: the explicit one, or a generated name in the working directory.
#[must_use]
pub fn resolve_output_path(explicit: Option<&Path>, prompt: &str, mime_type: &str) -> PathBuf {
    explicit.map_or_else(|| PathBuf::from(auto_filename(prompt, mime_type)), Path::to_path_buf)
}

/// Write image bytes, converting when the path's extension asks for a
/// different format than `mime_type`.
///
/// # Errors
///
/// Returns an error if the image cannot be converted or the file written.
pub fn save_image(data: &[u8], mime_type: &str, path: &Path) -> Result<(), BotError> {
    let target = path.extension().and_then(ImageFormat::from_extension);
    let source = ImageFormat::from_mime_type(mime_type);

    match target {
        Some(target) if Some(target) != source => {
            let img = image::load_from_memory(data)
                .map_err(|e| BotError::InvalidArgument(format!("Failed to decode image: {e}")))?;
            let img = if target == ImageFormat::Jpeg {
                image::DynamicImage::ImageRgb8(img.to_rgb8())
            } else {
                img
            };
            img.save_with_format(path, target).map_err(|e| {
                BotError::InvalidArgument(format!("Failed to save {}: {e}", path.display()))
            })
        }
        _ => Ok(std::fs::write(path, data)?),
    }
}
