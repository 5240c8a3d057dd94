//! Image XObject decoding
//!
//! Turns an image stream into a luminance grid. Only what a scanned or
//! generated QR image plausibly uses is supported: gray, RGB, CMYK, ICC
//! based and indexed color, 1 to 16 bit samples, stencil masks, and
//! Flate/LZW/ASCII85 or baseline JPEG encoding.

use image::ImageFormat;
use lopdf::{Dictionary, Document, Object, Stream};

use crate::error::{Error, Result};

/// Images with more pixels than this are refused before decoding
pub const MAX_PIXELS: usize = 16 * 1024 * 1024;

/// A decoded pixel grid, one luminance byte per pixel, row major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pub width: usize,
    pub height: usize,
    pub luma: Vec<u8>,
}

impl RasterImage {
    /// Wrap an existing luminance buffer
    pub fn new(width: usize, height: usize, luma: Vec<u8>) -> Result<Self> {
        let pixels = pixel_count(width, height)?;
        if width == 0 || height == 0 || luma.len() != pixels {
            return Err(Error::UnsupportedImage(format!(
                "{} luminance bytes do not describe a {}x{} image",
                luma.len(),
                width,
                height
            )));
        }
        Ok(Self { width, height, luma })
    }

    /// Luminance at (x, y)
    pub fn luminance(&self, x: usize, y: usize) -> u8 {
        self.luma[y * self.width + x]
    }

    /// Decode an image XObject stream
    pub fn from_stream(doc: &Document, stream: &Stream) -> Result<Self> {
        let dict = &stream.dict;
        let filters = stream.filters().unwrap_or_default();

        match filters.last().copied() {
            Some(b"DCTDecode") | Some(b"DCT") => {
                if filters.len() > 1 {
                    return Err(unsupported("DCTDecode combined with other filters"));
                }
                return decode_jpeg(&stream.content);
            }
            Some(b"JPXDecode") | Some(b"CCITTFaxDecode") | Some(b"JBIG2Decode") => {
                return Err(unsupported(&format!(
                    "{} images",
                    String::from_utf8_lossy(filters[filters.len() - 1])
                )));
            }
            _ => {}
        }

        let data = stream.get_plain_content()?;
        let width = positive_int(doc, dict, b"Width")?;
        let height = positive_int(doc, dict, b"Height")?;
        let pixels = pixel_count(width, height)?;

        let is_mask = deref(doc, dict.get(b"ImageMask").ok())
            .and_then(|o| o.as_bool().ok())
            .unwrap_or(false);

        let bits = if is_mask {
            1
        } else {
            deref(doc, dict.get(b"BitsPerComponent").ok())
                .and_then(|o| o.as_i64().ok())
                .unwrap_or(8) as u32
        };
        if !matches!(bits, 1 | 2 | 4 | 8 | 16) {
            return Err(unsupported(&format!("{} bits per component", bits)));
        }

        let space = if is_mask {
            ColorSpace::Gray
        } else {
            let object = deref(doc, dict.get(b"ColorSpace").ok())
                .ok_or_else(|| unsupported("image without color space"))?;
            ColorSpace::parse(doc, object)?
        };

        let components = space.components();
        let decode = decode_ranges(doc, dict, components, bits, &space);
        let samples = unpack_samples(&data, width, height, components, bits)?;
        let max = ((1u32 << bits) - 1) as f32;

        let mut luma = Vec::with_capacity(pixels);
        for pixel in samples.chunks_exact(components) {
            let value = if is_mask {
                // Sample mapped to 0 through Decode marks painted (black) pixels
                let painted = decode[0].apply(pixel[0] as f32 / max) < 0.5;
                if painted { 0 } else { 255 }
            } else {
                let mut unit = [0f32; 4];
                for (i, sample) in pixel.iter().enumerate() {
                    unit[i] = match space {
                        ColorSpace::Indexed { .. } => {
                            decode[i].apply_raw(*sample as f32, max)
                        }
                        _ => decode[i].apply(*sample as f32 / max),
                    };
                }
                space.luminance(&unit[..components])
            };
            luma.push(value);
        }

        Self::new(width, height, luma)
    }
}

fn unsupported(what: &str) -> Error {
    Error::UnsupportedImage(what.to_string())
}

/// `width * height`, refusing dimensions past [`MAX_PIXELS`]
fn pixel_count(width: usize, height: usize) -> Result<usize> {
    match width.checked_mul(height) {
        Some(pixels) if pixels <= MAX_PIXELS => Ok(pixels),
        _ => Err(unsupported(&format!("{}x{} image is too large", width, height))),
    }
}

fn deref<'a>(doc: &'a Document, object: Option<&'a Object>) -> Option<&'a Object> {
    doc.dereference(object?).ok().map(|(_, o)| o)
}

fn positive_int(doc: &Document, dict: &Dictionary, key: &[u8]) -> Result<usize> {
    match deref(doc, dict.get(key).ok()).and_then(|o| o.as_i64().ok()) {
        Some(n) if n > 0 => Ok(n as usize),
        _ => Err(unsupported(&format!(
            "missing or invalid {}",
            String::from_utf8_lossy(key)
        ))),
    }
}

fn decode_jpeg(bytes: &[u8]) -> Result<RasterImage> {
    let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
        .map_err(|e| unsupported(&format!("JPEG: {}", e)))?;
    let gray = decoded.to_luma8();
    let (width, height) = gray.dimensions();
    RasterImage::new(width as usize, height as usize, gray.into_raw())
}

/// Color spaces an image can be painted in
#[derive(Debug, Clone, PartialEq)]
enum ColorSpace {
    Gray,
    Rgb,
    Cmyk,
    /// Single colorant; a tint of 1 is full ink
    Separation,
    Indexed { base: Box<ColorSpace>, palette: Vec<u8> },
}

impl ColorSpace {
    fn parse(doc: &Document, object: &Object) -> Result<Self> {
        match object {
            Object::Name(name) => Self::from_name(name),
            Object::Array(items) => {
                let family = items
                    .first()
                    .and_then(|o| deref(doc, Some(o)))
                    .and_then(|o| o.as_name().ok())
                    .ok_or_else(|| unsupported("color space array without family"))?;
                match family {
                    b"CalGray" => Ok(Self::Gray),
                    b"CalRGB" | b"Lab" => Ok(Self::Rgb),
                    b"ICCBased" => {
                        let profile = items
                            .get(1)
                            .and_then(|o| deref(doc, Some(o)))
                            .and_then(|o| o.as_stream().ok())
                            .ok_or_else(|| unsupported("ICCBased without profile stream"))?;
                        let n = deref(doc, profile.dict.get(b"N").ok())
                            .and_then(|o| o.as_i64().ok())
                            .unwrap_or(0);
                        match n {
                            1 => Ok(Self::Gray),
                            3 => Ok(Self::Rgb),
                            4 => Ok(Self::Cmyk),
                            _ => Err(unsupported(&format!("ICCBased with {} components", n))),
                        }
                    }
                    b"Indexed" | b"I" => Self::parse_indexed(doc, items),
                    b"Separation" => Ok(Self::Separation),
                    other => Err(unsupported(&format!(
                        "{} color space",
                        String::from_utf8_lossy(other)
                    ))),
                }
            }
            _ => Err(unsupported("color space of unexpected type")),
        }
    }

    fn from_name(name: &[u8]) -> Result<Self> {
        match name {
            b"DeviceGray" | b"G" | b"CalGray" => Ok(Self::Gray),
            b"DeviceRGB" | b"RGB" | b"CalRGB" => Ok(Self::Rgb),
            b"DeviceCMYK" | b"CMYK" => Ok(Self::Cmyk),
            other => Err(unsupported(&format!(
                "{} color space",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    fn parse_indexed(doc: &Document, items: &[Object]) -> Result<Self> {
        let base = items
            .get(1)
            .and_then(|o| deref(doc, Some(o)))
            .ok_or_else(|| unsupported("Indexed without base"))
            .and_then(|o| Self::parse(doc, o))?;
        if matches!(base, Self::Indexed { .. }) {
            return Err(unsupported("nested Indexed color space"));
        }
        let palette = match items.get(3).and_then(|o| deref(doc, Some(o))) {
            Some(Object::String(bytes, _)) => bytes.clone(),
            Some(Object::Stream(stream)) => stream.get_plain_content()?,
            _ => return Err(unsupported("Indexed without lookup table")),
        };
        Ok(Self::Indexed {
            base: Box::new(base),
            palette,
        })
    }

    fn components(&self) -> usize {
        match self {
            Self::Gray | Self::Separation | Self::Indexed { .. } => 1,
            Self::Rgb => 3,
            Self::Cmyk => 4,
        }
    }

    /// Luminance of one pixel given components in the unit range
    ///
    /// For indexed color the single component is the palette index.
    fn luminance(&self, unit: &[f32]) -> u8 {
        let to_byte = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u32;
        match self {
            Self::Gray => to_byte(unit[0]) as u8,
            Self::Separation => (255 - to_byte(unit[0])) as u8,
            Self::Rgb => rgb_luminance(to_byte(unit[0]), to_byte(unit[1]), to_byte(unit[2])),
            Self::Cmyk => {
                let k = unit[3];
                let r = to_byte(1.0 - (unit[0] + k).min(1.0));
                let g = to_byte(1.0 - (unit[1] + k).min(1.0));
                let b = to_byte(1.0 - (unit[2] + k).min(1.0));
                rgb_luminance(r, g, b)
            }
            Self::Indexed { base, palette } => {
                let n = base.components();
                let index = unit[0].max(0.0) as usize;
                let entry = match palette.get(index * n..index * n + n) {
                    Some(entry) => entry,
                    None => return 255,
                };
                let mut base_unit = [0f32; 4];
                for (i, byte) in entry.iter().enumerate() {
                    base_unit[i] = *byte as f32 / 255.0;
                }
                base.luminance(&base_unit[..n])
            }
        }
    }
}

/// Same weighting the QR binarizer expects for RGB sources
fn rgb_luminance(r: u32, g: u32, b: u32) -> u8 {
    ((r + 2 * g + b) / 4) as u8
}

/// One `Decode` array entry
#[derive(Debug, Clone, Copy)]
struct DecodeRange {
    min: f32,
    max: f32,
}

impl DecodeRange {
    fn apply(&self, unit: f32) -> f32 {
        self.min + unit * (self.max - self.min)
    }

    /// Indexed samples map raw values, not unit values
    fn apply_raw(&self, raw: f32, max_raw: f32) -> f32 {
        (self.min + raw * (self.max - self.min) / max_raw).round()
    }
}

fn decode_ranges(
    doc: &Document,
    dict: &Dictionary,
    components: usize,
    bits: u32,
    space: &ColorSpace,
) -> Vec<DecodeRange> {
    let default = match space {
        ColorSpace::Indexed { .. } => DecodeRange {
            min: 0.0,
            max: ((1u32 << bits) - 1) as f32,
        },
        _ => DecodeRange { min: 0.0, max: 1.0 },
    };

    let values: Vec<f32> = deref(doc, dict.get(b"Decode").ok())
        .and_then(|o| o.as_array().ok())
        .map(|items| items.iter().filter_map(|o| o.as_float().ok()).collect())
        .unwrap_or_default();

    (0..components)
        .map(|i| match (values.get(2 * i), values.get(2 * i + 1)) {
            (Some(min), Some(max)) => DecodeRange { min: *min, max: *max },
            _ => default,
        })
        .collect()
}

/// Split packed sample data into one value per component
///
/// Rows start on byte boundaries. 16 bit samples keep their high byte's
/// precision only as far as the unit conversion needs it.
fn unpack_samples(
    data: &[u8],
    width: usize,
    height: usize,
    components: usize,
    bits: u32,
) -> Result<Vec<u16>> {
    let bits = bits as usize;
    let too_large = || unsupported(&format!("{}x{} image is too large", width, height));
    let row_samples = width.checked_mul(components).ok_or_else(too_large)?;
    let row_bytes = row_samples
        .checked_mul(bits)
        .map(|row_bits| row_bits.div_ceil(8))
        .ok_or_else(too_large)?;
    let total_bytes = row_bytes.checked_mul(height).ok_or_else(too_large)?;
    let total_samples = row_samples.checked_mul(height).ok_or_else(too_large)?;
    if data.len() < total_bytes {
        return Err(unsupported(&format!(
            "image data truncated: {} of {} bytes",
            data.len(),
            total_bytes
        )));
    }

    let mut samples = Vec::with_capacity(total_samples);
    for row in data.chunks_exact(row_bytes).take(height) {
        for i in 0..row_samples {
            let value = match bits {
                8 => row[i] as u16,
                16 => u16::from_be_bytes([row[2 * i], row[2 * i + 1]]),
                _ => {
                    let bit = i * bits;
                    let byte = row[bit / 8];
                    let shift = 8 - bits - (bit % 8);
                    ((byte >> shift) as u16) & ((1 << bits) - 1)
                }
            };
            samples.push(value);
        }
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, StringFormat};

    fn image_stream(dict: Dictionary, data: Vec<u8>) -> Stream {
        let mut full = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
        };
        full.extend(&dict);
        Stream::new(full, data)
    }

    #[test]
    fn test_gray_8bit() {
        let doc = Document::new();
        let stream = image_stream(
            dictionary! { "Width" => 2, "Height" => 1, "ColorSpace" => "DeviceGray", "BitsPerComponent" => 8 },
            vec![10, 200],
        );
        let image = RasterImage::from_stream(&doc, &stream).unwrap();
        assert_eq!(image.luma, vec![10, 200]);
    }

    #[test]
    fn test_gray_1bit_rows_are_byte_aligned() {
        let doc = Document::new();
        // Width 3: each row uses the top three bits of one byte
        let stream = image_stream(
            dictionary! { "Width" => 3, "Height" => 2, "ColorSpace" => "DeviceGray", "BitsPerComponent" => 1 },
            vec![0b1010_0000, 0b0110_0000],
        );
        let image = RasterImage::from_stream(&doc, &stream).unwrap();
        assert_eq!(image.luma, vec![255, 0, 255, 0, 255, 255]);
    }

    #[test]
    fn test_decode_array_inverts() {
        let doc = Document::new();
        let stream = image_stream(
            dictionary! {
                "Width" => 2, "Height" => 1, "ColorSpace" => "DeviceGray", "BitsPerComponent" => 8,
                "Decode" => vec![1.into(), 0.into()],
            },
            vec![0, 255],
        );
        let image = RasterImage::from_stream(&doc, &stream).unwrap();
        assert_eq!(image.luma, vec![255, 0]);
    }

    #[test]
    fn test_rgb_and_cmyk() {
        let doc = Document::new();
        let rgb = image_stream(
            dictionary! { "Width" => 2, "Height" => 1, "ColorSpace" => "DeviceRGB", "BitsPerComponent" => 8 },
            vec![255, 255, 255, 0, 0, 0],
        );
        assert_eq!(RasterImage::from_stream(&doc, &rgb).unwrap().luma, vec![255, 0]);

        let cmyk = image_stream(
            dictionary! { "Width" => 2, "Height" => 1, "ColorSpace" => "DeviceCMYK", "BitsPerComponent" => 8 },
            vec![0, 0, 0, 0, 0, 0, 0, 255],
        );
        assert_eq!(RasterImage::from_stream(&doc, &cmyk).unwrap().luma, vec![255, 0]);
    }

    #[test]
    fn test_indexed_palette() {
        let doc = Document::new();
        let space: Vec<Object> = vec![
            "Indexed".into(),
            "DeviceRGB".into(),
            1.into(),
            Object::String(vec![0, 0, 0, 255, 255, 255], StringFormat::Hexadecimal),
        ];
        let stream = image_stream(
            dictionary! { "Width" => 2, "Height" => 1, "ColorSpace" => space, "BitsPerComponent" => 8 },
            vec![1, 0],
        );
        assert_eq!(RasterImage::from_stream(&doc, &stream).unwrap().luma, vec![255, 0]);
    }

    #[test]
    fn test_image_mask() {
        let doc = Document::new();
        let stream = image_stream(
            dictionary! { "Width" => 2, "Height" => 1, "ImageMask" => true },
            vec![0b0100_0000],
        );
        assert_eq!(RasterImage::from_stream(&doc, &stream).unwrap().luma, vec![0, 255]);
    }

    #[test]
    fn test_flate_compressed() {
        let doc = Document::new();
        let mut stream = image_stream(
            dictionary! { "Width" => 64, "Height" => 64, "ColorSpace" => "DeviceGray", "BitsPerComponent" => 8 },
            vec![128; 64 * 64],
        );
        stream.compress().unwrap();
        assert!(stream.dict.get(b"Filter").is_ok());

        let image = RasterImage::from_stream(&doc, &stream).unwrap();
        assert_eq!(image.luma.len(), 64 * 64);
        assert!(image.luma.iter().all(|&v| v == 128));
    }

    #[test]
    fn test_truncated_and_unsupported() {
        let doc = Document::new();
        let short = image_stream(
            dictionary! { "Width" => 4, "Height" => 4, "ColorSpace" => "DeviceGray", "BitsPerComponent" => 8 },
            vec![0; 5],
        );
        assert!(matches!(
            RasterImage::from_stream(&doc, &short),
            Err(Error::UnsupportedImage(_))
        ));

        let jbig2 = image_stream(
            dictionary! { "Width" => 1, "Height" => 1, "Filter" => "JBIG2Decode" },
            vec![0],
        );
        assert!(RasterImage::from_stream(&doc, &jbig2).is_err());

        let garbage_jpeg = image_stream(
            dictionary! { "Width" => 1, "Height" => 1, "Filter" => "DCTDecode" },
            vec![1, 2, 3],
        );
        assert!(RasterImage::from_stream(&doc, &garbage_jpeg).is_err());
    }

    #[test]
    fn test_oversized_dimensions_are_refused() {
        let doc = Document::new();
        let huge = image_stream(
            dictionary! {
                "Width" => 4_294_967_296i64, "Height" => 4_294_967_296i64,
                "ColorSpace" => "DeviceGray", "BitsPerComponent" => 8,
            },
            vec![0; 16],
        );
        assert!(matches!(
            RasterImage::from_stream(&doc, &huge),
            Err(Error::UnsupportedImage(_))
        ));

        let wide = image_stream(
            dictionary! {
                "Width" => (MAX_PIXELS + 1) as i64, "Height" => 1,
                "ColorSpace" => "DeviceRGB", "BitsPerComponent" => 16,
            },
            vec![0; 16],
        );
        assert!(matches!(
            RasterImage::from_stream(&doc, &wide),
            Err(Error::UnsupportedImage(_))
        ));

        assert!(unpack_samples(&[0; 16], usize::MAX / 2, 3, 4, 16).is_err());
        assert!(RasterImage::new(usize::MAX, 2, vec![]).is_err());
    }

    #[test]
    fn test_new_rejects_mismatched_buffer() {
        assert!(RasterImage::new(2, 2, vec![0; 3]).is_err());
        assert!(RasterImage::new(0, 0, vec![]).is_err());
        assert_eq!(RasterImage::new(1, 1, vec![7]).unwrap().luminance(0, 0), 7);
    }
}
