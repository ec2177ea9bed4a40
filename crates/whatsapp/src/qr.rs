//! Rendering of pairing challenges into scannable PNG images.

use std::io::Cursor;

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    bytes::Bytes,
    image::{ImageFormat, Luma},
    qrcode::QrCode,
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum QrError {
    #[error("pairing payload cannot be encoded: {0}")]
    Encode(#[from] qrcode::types::QrError),
    #[error("png encoding failed: {0}")]
    Png(#[from] image::ImageError),
    #[error("pairing payload is empty")]
    Empty,
}

/// A rendered QR code, PNG encoded. Never empty.
#[derive(Clone, PartialEq, Eq)]
pub struct QrImage {
    png: Bytes,
}

impl QrImage {
    pub fn render(payload: &str) -> Result<Self, QrError> {
        if payload.is_empty() {
            return Err(QrError::Empty);
        }
        let code = QrCode::new(payload.as_bytes())?;
        let image = code
            .render::<Luma<u8>>()
            .min_dimensions(264, 264)
            .build();
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png)?;
        Ok(Self {
            png: Bytes::from(out.into_inner()),
        })
    }

    pub fn png(&self) -> &[u8] {
        &self.png
    }

    /// `data:image/png;base64,...`, ready for an `<img src>`.
    pub fn to_data_url(&self) -> String {
        format!("data:image/png;base64,{}", STANDARD.encode(&self.png))
    }
}

impl std::fmt::Debug for QrImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QrImage")
            .field("png_bytes", &self.png.len())
            .finish()
    }
}
