use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use thiserror::Error;

/// One submitted photo, still encoded.
#[derive(Debug, Clone)]
pub enum Photo {
    /// Encoded image file contents (PNG, JPEG, ...).
    Bytes(Vec<u8>),
    /// Base64 text, optionally a `data:image/...;base64,` URL.
    Base64(String),
}

#[derive(Debug, Error)]
pub enum DecodeFailure {
    #[error("empty photo payload")]
    Empty,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unreadable image: {0}")]
    Image(#[from] image::ImageError),
}

impl Photo {
    pub fn decode(&self) -> Result<DynamicImage, DecodeFailure> {
        match self {
            Photo::Bytes(bytes) => decode_bytes(bytes),
            Photo::Base64(text) => {
                let payload = strip_data_url(text).trim();
                if payload.is_empty() {
                    return Err(DecodeFailure::Empty);
                }
                decode_bytes(&STANDARD.decode(payload)?)
            }
        }
    }
}

fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage, DecodeFailure> {
    if bytes.is_empty() {
        return Err(DecodeFailure::Empty);
    }
    Ok(image::load_from_memory(bytes)?)
}

/// Everything after the first comma of a data URL; other input unchanged.
pub fn strip_data_url(payload: &str) -> &str {
    match payload.split_once(',') {
        Some((_, data)) => data,
        None => payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn strips_data_url_prefix() {
        assert_eq!(strip_data_url("data:image/jpeg;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_url("QUJD"), "QUJD");
    }

    #[test]
    fn decodes_raw_bytes() {
        let img = Photo::Bytes(png(4, 3)).decode().unwrap();
        assert_eq!(img.dimensions(), (4, 3));
    }

    #[test]
    fn decodes_data_url() {
        let payload = format!("data:image/png;base64,{}", STANDARD.encode(png(2, 5)));
        let img = Photo::Base64(payload).decode().unwrap();
        assert_eq!(img.dimensions(), (2, 5));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            Photo::Base64("data:image/png;base64,@@@".into()).decode(),
            Err(DecodeFailure::Base64(_))
        ));
        assert!(matches!(
            Photo::Base64(STANDARD.encode(b"not an image")).decode(),
            Err(DecodeFailure::Image(_))
        ));
        assert!(matches!(Photo::Base64("   ".into()).decode(), Err(DecodeFailure::Empty)));
        assert!(matches!(Photo::Bytes(vec![]).decode(), Err(DecodeFailure::Empty)));
    }
}
