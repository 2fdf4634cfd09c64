//! QR code rendering for the pairing endpoint.

use base64::Engine as _;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QrError {
    #[error("QR encode error: {0}")]
    Encode(#[from] qrcode::types::QrError),

    #[error("PNG encode error: {0}")]
    Png(#[from] image::ImageError),
}

/// Render a pairing string as a PNG data URL, at least 256x256.
pub fn data_url(code: &str) -> Result<String, QrError> {
    let qr = qrcode::QrCode::new(code.as_bytes())?;
    let image = qr
        .render::<image::Luma<u8>>()
        .min_dimensions(256, 256)
        .build();

    let mut png = Vec::new();
    image.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)?;

    Ok(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    ))
}
