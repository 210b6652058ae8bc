//! Pairing-code rendering.

use {
    base64::Engine,
    image::{ExtendedColorType, ImageEncoder, codecs::png::PngEncoder},
    qrcode::QrCode,
};

use wagate_common::{Error, Result};

/// Render a raw pairing code into a `data:image/png;base64,…` URL suitable
/// for direct display in an `<img>` tag.
pub fn render_data_url(code: &str) -> Result<String> {
    let qr = QrCode::new(code.as_bytes()).map_err(|e| Error::external("qr encode", e))?;
    let img = qr
        .render::<image::Luma<u8>>()
        .min_dimensions(256, 256)
        .build();

    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(&img, img.width(), img.height(), ExtendedColorType::L8)
        .map_err(|e| Error::external("png encode", e))?;

    Ok(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    ))
}
