#![cfg(feature = "web")]

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageDecoder, ImageReader, Rgb, RgbImage};
use std::io::Cursor;
use thiserror::Error;

/// Longest side, in pixels, of a photo sent by email
pub const MAX_PHOTO_SIDE: u32 = 1400;
const PHOTO_QUALITY: u8 = 85;
const SIGNATURE_QUALITY: u8 = 90;
const THUMB_SIDE: u32 = 120;
const THUMB_QUALITY: u8 = 70;

/// Background of the signature pads (#fafafa)
const PAD_BACKGROUND: [u8; 3] = [0xfa, 0xfa, 0xfa];

/// Below this channel standard deviation a signature pad is considered untouched
const BLANK_STDDEV: f64 = 1.0;

#[derive(Debug, Error)]
pub enum PhotoError {
    #[error("Error procesando la imagen: {0}")]
    Image(#[from] image::ImageError),
    #[error("Error procesando la imagen: {0}")]
    Io(#[from] std::io::Error),
    #[error("Firma no válida: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Firma no válida: {0}")]
    DataUrl(String),
}

/// A file ready to be attached to the report email
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub mime: String,
}

impl Attachment {
    pub fn jpeg(filename: impl Into<String>, content: Vec<u8>) -> Self {
        Attachment {
            filename: filename.into(),
            content,
            mime: "image/jpeg".to_string(),
        }
    }
}

/// Name for the n-th camera capture of a session (1-based)
pub fn camera_name(position: usize) -> String {
    format!("foto_{:02}", position)
}

/// File name without its last extension, as uploaded from the gallery
pub fn gallery_name(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => base.to_string(),
    }
}

/// Sanitize an uploaded photo
///
/// Phones store the camera orientation in EXIF instead of rotating the
/// pixels, and mail clients ignore it. The photo is rotated upright, shrunk to
/// fit [`MAX_PHOTO_SIDE`] and re-encoded as a JPEG, which also strips the
/// metadata (GPS position included).
///
/// # Arguments
/// * `name` - Attachment name without extension
/// * `content` - Raw bytes as uploaded (JPEG, PNG or WebP)
///
/// # Returns
/// * `Result<Attachment, PhotoError>` - `<name>.jpg` as `image/jpeg`
pub fn sanitize_image(name: &str, content: &[u8]) -> Result<Attachment, PhotoError> {
    let img = decode_upright(content)?;
    let img = shrink_to_fit(img, MAX_PHOTO_SIDE);
    let jpeg = encode_jpeg(&img.to_rgb8(), PHOTO_QUALITY)?;

    Ok(Attachment::jpeg(format!("{}.jpg", name), jpeg))
}

fn decode_upright(content: &[u8]) -> Result<DynamicImage, PhotoError> {
    let mut decoder = ImageReader::new(Cursor::new(content))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

// Like a thumbnail: keeps the aspect ratio and never enlarges
fn shrink_to_fit(img: DynamicImage, side: u32) -> DynamicImage {
    if img.width() <= side && img.height() <= side {
        img
    } else {
        img.thumbnail(side, side)
    }
}

fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, PhotoError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(img)?;
    Ok(out)
}

/// Turn a signature pad export into a JPEG
///
/// The pad posts `canvas.toDataURL()`. An empty field, or a canvas with no
/// visible strokes, means nobody signed.
///
/// # Returns
/// * `Ok(None)` - the pad was left blank
/// * `Ok(Some(jpeg))` - the signature flattened on the pad background
pub fn signature_from_data_url(data_url: &str) -> Result<Option<Vec<u8>>, PhotoError> {
    let data_url = data_url.trim();
    if data_url.is_empty() {
        return Ok(None);
    }

    let (meta, payload) = data_url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(','))
        .ok_or_else(|| PhotoError::DataUrl("expected a data: URL".to_string()))?;
    if !meta.ends_with(";base64") {
        return Err(PhotoError::DataUrl("expected base64 content".to_string()));
    }

    let bytes = STANDARD.decode(payload)?;
    let rgba = image::load_from_memory(&bytes)?.to_rgba8();

    if channel_stddev(rgba.as_raw()) < BLANK_STDDEV {
        return Ok(None);
    }

    let flat = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as f32 / 255.0;
        let blend = |c: u8, bg: u8| (c as f32 * alpha + bg as f32 * (1.0 - alpha)).round() as u8;
        Rgb([
            blend(r, PAD_BACKGROUND[0]),
            blend(g, PAD_BACKGROUND[1]),
            blend(b, PAD_BACKGROUND[2]),
        ])
    });

    Ok(Some(encode_jpeg(&flat, SIGNATURE_QUALITY)?))
}

/// Population standard deviation over every channel byte.
pub fn channel_stddev(bytes: &[u8]) -> f64 {
    if bytes.is_empty() {
        return 0.0;
    }
    let n = bytes.len() as f64;
    let mean = bytes.iter().map(|&b| b as f64).sum::<f64>() / n;
    let variance = bytes
        .iter()
        .map(|&b| {
            let d = b as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    variance.sqrt()
}

/// Small base64 JPEG preview for the gallery strip
pub fn thumbnail_b64(content: &[u8]) -> Result<String, PhotoError> {
    let img = image::load_from_memory(content)?;
    let img = shrink_to_fit(img, THUMB_SIDE);
    let jpeg = encode_jpeg(&img.to_rgb8(), THUMB_QUALITY)?;
    Ok(STANDARD.encode(jpeg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};

    fn png(img: &RgbaImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn data_url(img: &RgbaImage) -> String {
        format!("data:image/png;base64,{}", STANDARD.encode(png(img)))
    }

    #[test]
    fn test_large_photo_is_shrunk_and_reencoded() {
        let img = RgbaImage::from_pixel(2800, 1400, Rgba([120, 80, 40, 255]));
        let att = sanitize_image("IMG_0001", &png(&img)).unwrap();

        assert_eq!(att.filename, "IMG_0001.jpg");
        assert_eq!(att.mime, "image/jpeg");
        let out = image::load_from_memory(&att.content).unwrap();
        assert_eq!((out.width(), out.height()), (1400, 700));
        assert_eq!(image::guess_format(&att.content).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_small_photo_is_not_enlarged() {
        let img = RgbaImage::from_pixel(640, 480, Rgba([10, 10, 10, 255]));
        let att = sanitize_image("foto_01", &png(&img)).unwrap();
        let out = image::load_from_memory(&att.content).unwrap();
        assert_eq!((out.width(), out.height()), (640, 480));
    }

    // JPEG with an EXIF block carrying only the orientation tag
    fn jpeg_with_orientation(img: &RgbImage, orientation: u8) -> Vec<u8> {
        let plain = encode_jpeg(img, 95).unwrap();

        let mut tiff = Vec::new();
        tiff.extend_from_slice(b"II*\0");
        tiff.extend_from_slice(&8u32.to_le_bytes());
        tiff.extend_from_slice(&1u16.to_le_bytes());
        tiff.extend_from_slice(&0x0112u16.to_le_bytes());
        tiff.extend_from_slice(&3u16.to_le_bytes());
        tiff.extend_from_slice(&1u32.to_le_bytes());
        tiff.extend_from_slice(&[orientation, 0, 0, 0]);
        tiff.extend_from_slice(&0u32.to_le_bytes());

        let mut app1 = b"Exif\0\0".to_vec();
        app1.extend_from_slice(&tiff);
        let length = (app1.len() + 2) as u16;

        let mut out = plain[..2].to_vec();
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&app1);
        out.extend_from_slice(&plain[2..]);
        out
    }

    #[test]
    fn test_exif_orientation_is_applied() {
        let img = RgbImage::from_fn(64, 32, |x, _| {
            if x < 32 {
                Rgb([220, 20, 20])
            } else {
                Rgb([20, 20, 220])
            }
        });
        // 6: rotate 90° clockwise to display
        let att = sanitize_image("foto_01", &jpeg_with_orientation(&img, 6)).unwrap();
        let out = image::load_from_memory(&att.content).unwrap().to_rgb8();

        assert_eq!((out.width(), out.height()), (32, 64));
        // The left half of the stored pixels ends up on top
        let top = out.get_pixel(16, 8).0;
        let bottom = out.get_pixel(16, 56).0;
        assert!(top[0] > top[2], "top should be red, got {:?}", top);
        assert!(bottom[2] > bottom[0], "bottom should be blue, got {:?}", bottom);
    }

    #[test]
    fn test_garbage_upload_is_rejected() {
        assert!(sanitize_image("broken", b"definitely not an image").is_err());
    }

    #[test]
    fn test_names() {
        assert_eq!(camera_name(1), "foto_01");
        assert_eq!(camera_name(12), "foto_12");
        assert_eq!(gallery_name("obra.final.PNG"), "obra.final");
        assert_eq!(gallery_name("C:\\fotos\\suelo.jpg"), "suelo");
        assert_eq!(gallery_name("sin_extension"), "sin_extension");
        assert_eq!(gallery_name(".hidden"), ".hidden");
    }

    #[test]
    fn test_blank_signature_is_none() {
        let blank = RgbaImage::from_pixel(300, 140, Rgba([250, 250, 250, 255]));
        assert_eq!(signature_from_data_url(&data_url(&blank)).unwrap(), None);
        assert_eq!(signature_from_data_url("").unwrap(), None);

        let transparent = RgbaImage::from_pixel(300, 140, Rgba([0, 0, 0, 0]));
        assert_eq!(signature_from_data_url(&data_url(&transparent)).unwrap(), None);
    }

    #[test]
    fn test_drawn_signature_becomes_jpeg() {
        let mut pad = RgbaImage::from_pixel(300, 140, Rgba([250, 250, 250, 255]));
        for x in 20..280 {
            for y in 60..64 {
                pad.put_pixel(x, y, Rgba([26, 26, 26, 255]));
            }
        }

        let jpeg = signature_from_data_url(&data_url(&pad)).unwrap().unwrap();
        let out = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((out.width(), out.height()), (300, 140));
    }

    #[test]
    fn test_malformed_data_url() {
        assert!(signature_from_data_url("not-a-data-url").is_err());
        assert!(signature_from_data_url("data:image/png,plain").is_err());
        assert!(signature_from_data_url("data:image/png;base64,@@@").is_err());
    }

    #[test]
    fn test_stddev() {
        assert_eq!(channel_stddev(&[5, 5, 5, 5]), 0.0);
        assert_eq!(channel_stddev(&[0, 2]), 1.0);
        assert_eq!(channel_stddev(&[]), 0.0);
    }

    #[test]
    fn test_thumbnail_is_base64_jpeg() {
        let img = RgbaImage::from_pixel(800, 600, Rgba([200, 100, 50, 255]));
        let b64 = thumbnail_b64(&png(&img)).unwrap();
        let bytes = STANDARD.decode(b64).unwrap();
        let out = image::load_from_memory(&bytes).unwrap();
        assert_eq!((out.width(), out.height()), (120, 90));
    }
}
