//! Image encoding: `DynamicImage` → inline base64 PNG [`ImageReference`].
//!
//! The layout service accepts either a reference it can resolve itself (a
//! path or URL on its side) or the page pixels inline in the JSON body.
//! PNG is lossless; compression artefacts on rendered text shift detector
//! boxes.

use crate::client::protocol::ImageReference;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a page image as an inline base64 PNG reference.
pub fn encode_image(img: &DynamicImage) -> Result<ImageReference, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let data = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} page → {} bytes base64",
        img.width(),
        img.height(),
        data.len()
    );

    Ok(ImageReference::Inline {
        data,
        mime_type: "image/png".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([255, 0, 0])));
        let reference = encode_image(&img).expect("encode should succeed");
        match reference {
            ImageReference::Inline { data, mime_type } => {
                assert_eq!(mime_type, "image/png");
                let decoded = STANDARD.decode(&data).expect("valid base64");
                assert_eq!(&decoded[1..4], b"PNG");
            }
            other => panic!("expected inline reference, got {other:?}"),
        }
    }
}
