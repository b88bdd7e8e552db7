use std::io::Read;

use flate2::read::ZlibDecoder;
use serde::Serialize;

use crate::error::MmitError;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Row-major 2D grid of ion intensities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntensityGrid {
    pub width: usize,
    pub height: usize,
    pub values: Vec<f64>,
}

impl IntensityGrid {
    pub fn new(width: usize, height: usize, values: Vec<f64>) -> Result<Self, MmitError> {
        if width.checked_mul(height) != Some(values.len()) {
            return Err(MmitError::ImageDecode(format!(
                "{width}x{height} grid does not hold {} values",
                values.len()
            )));
        }
        Ok(Self {
            width,
            height,
            values,
        })
    }

    pub fn get(&self, x: usize, y: usize) -> Option<f64> {
        (x < self.width && y < self.height).then(|| self.values[y * self.width + x])
    }

    /// Mean over strictly positive pixels; NaN when there are none.
    pub fn mean_positive(&self) -> f64 {
        mean_positive(&self.values)
    }

    /// Decodes an isotope image PNG and rescales its first channel from the
    /// sample range onto `[min_intensity, max_intensity]`. Fully transparent
    /// pixels are outside the sample area and read as zero.
    pub fn from_png(
        bytes: &[u8],
        min_intensity: f64,
        max_intensity: f64,
    ) -> Result<Self, MmitError> {
        let image = decode_png(bytes)?;
        let span = max_intensity - min_intensity;
        let values = image
            .levels
            .iter()
            .zip(&image.opaque)
            .map(|(level, opaque)| {
                if *opaque {
                    min_intensity + level * span
                } else {
                    0.0
                }
            })
            .collect();
        Self::new(image.width, image.height, values)
    }
}

pub fn mean_positive(values: &[f64]) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|value| **value > 0.0)
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        return f64::NAN;
    }
    sum / count as f64
}

/// First-channel levels normalized to `[0, 1]` plus the alpha mask.
#[derive(Debug, Clone)]
pub struct DecodedPng {
    pub width: usize,
    pub height: usize,
    pub levels: Vec<f64>,
    pub opaque: Vec<bool>,
}

struct Header {
    width: usize,
    height: usize,
    bit_depth: u8,
    channels: usize,
    has_alpha: bool,
}

/// Decodes non-interlaced 8/16-bit grayscale, gray+alpha, RGB and RGBA PNGs.
pub fn decode_png(bytes: &[u8]) -> Result<DecodedPng, MmitError> {
    if bytes.len() < PNG_SIGNATURE.len() || bytes[..8] != PNG_SIGNATURE {
        return Err(MmitError::ImageDecode("not a PNG file".to_string()));
    }

    let mut header = None;
    let mut idat = Vec::new();
    let mut pos = PNG_SIGNATURE.len();
    while pos + 8 <= bytes.len() {
        let length =
            u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
                as usize;
        let kind = &bytes[pos + 4..pos + 8];
        let start = pos + 8;
        let end = start
            .checked_add(length)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| MmitError::ImageDecode("truncated chunk".to_string()))?;
        let data = &bytes[start..end];
        match kind {
            b"IHDR" => header = Some(parse_header(data)?),
            b"IDAT" => idat.extend_from_slice(data),
            b"IEND" => break,
            _ => {}
        }
        // chunk CRC is not verified
        pos = end + 4;
    }

    let header = header.ok_or_else(|| MmitError::ImageDecode("missing IHDR".to_string()))?;
    let mut raw = Vec::new();
    ZlibDecoder::new(idat.as_slice())
        .read_to_end(&mut raw)
        .map_err(|err| MmitError::ImageDecode(format!("inflate: {err}")))?;

    let sample_bytes = usize::from(header.bit_depth / 8);
    let bpp = header.channels * sample_bytes;
    let oversized = || {
        MmitError::ImageDecode(format!(
            "{}x{} image is too large",
            header.width, header.height
        ))
    };
    let stride = header.width.checked_mul(bpp).ok_or_else(oversized)?;
    let expected = stride
        .checked_add(1)
        .and_then(|line| line.checked_mul(header.height))
        .ok_or_else(oversized)?;
    if raw.len() < expected {
        return Err(MmitError::ImageDecode(format!(
            "expected {expected} bytes of scanlines, got {}",
            raw.len()
        )));
    }
    // raw holds at least one byte per pixel, so this cannot overflow
    let pixels = header.width * header.height;

    let max_level = if sample_bytes == 2 { 65535.0 } else { 255.0 };
    let mut levels = Vec::with_capacity(pixels);
    let mut opaque = Vec::with_capacity(pixels);
    let mut prev = vec![0u8; stride];
    let mut row = vec![0u8; stride];
    for y in 0..header.height {
        let offset = y * (stride + 1);
        let filter = raw[offset];
        row.copy_from_slice(&raw[offset + 1..offset + 1 + stride]);
        unfilter(filter, &mut row, &prev, bpp)?;

        for x in 0..header.width {
            let pixel = &row[x * bpp..(x + 1) * bpp];
            levels.push(f64::from(read_sample(pixel, 0, sample_bytes)) / max_level);
            let alpha = if header.has_alpha {
                read_sample(pixel, header.channels - 1, sample_bytes)
            } else {
                1
            };
            opaque.push(alpha > 0);
        }
        std::mem::swap(&mut prev, &mut row);
    }

    Ok(DecodedPng {
        width: header.width,
        height: header.height,
        levels,
        opaque,
    })
}

fn parse_header(data: &[u8]) -> Result<Header, MmitError> {
    if data.len() < 13 {
        return Err(MmitError::ImageDecode("short IHDR".to_string()));
    }
    let width = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let height = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
    let bit_depth = data[8];
    let color_type = data[9];
    let interlace = data[12];

    let (channels, has_alpha) = match color_type {
        0 => (1, false),
        2 => (3, false),
        4 => (2, true),
        6 => (4, true),
        other => {
            return Err(MmitError::ImageDecode(format!(
                "unsupported PNG color type {other}"
            )));
        }
    };
    if bit_depth != 8 && bit_depth != 16 {
        return Err(MmitError::ImageDecode(format!(
            "unsupported PNG bit depth {bit_depth}"
        )));
    }
    if interlace != 0 {
        return Err(MmitError::ImageDecode("interlaced PNG".to_string()));
    }
    Ok(Header {
        width,
        height,
        bit_depth,
        channels,
        has_alpha,
    })
}

fn unfilter(filter: u8, row: &mut [u8], prev: &[u8], bpp: usize) -> Result<(), MmitError> {
    match filter {
        0 => {}
        1 => {
            for i in bpp..row.len() {
                row[i] = row[i].wrapping_add(row[i - bpp]);
            }
        }
        2 => {
            for i in 0..row.len() {
                row[i] = row[i].wrapping_add(prev[i]);
            }
        }
        3 => {
            for i in 0..row.len() {
                let left = if i >= bpp { u16::from(row[i - bpp]) } else { 0 };
                let up = u16::from(prev[i]);
                row[i] = row[i].wrapping_add(((left + up) / 2) as u8);
            }
        }
        4 => {
            for i in 0..row.len() {
                let left = if i >= bpp { row[i - bpp] } else { 0 };
                let upper_left = if i >= bpp { prev[i - bpp] } else { 0 };
                row[i] = row[i].wrapping_add(paeth(left, prev[i], upper_left));
            }
        }
        other => {
            return Err(MmitError::ImageDecode(format!(
                "unknown scanline filter {other}"
            )));
        }
    }
    Ok(())
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = i16::from(a) + i16::from(b) - i16::from(c);
    let pa = (p - i16::from(a)).abs();
    let pb = (p - i16::from(b)).abs();
    let pc = (p - i16::from(c)).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

fn read_sample(pixel: &[u8], channel: usize, sample_bytes: usize) -> u16 {
    let at = channel * sample_bytes;
    if sample_bytes == 2 {
        u16::from_be_bytes([pixel[at], pixel[at + 1]])
    } else {
        u16::from(pixel[at])
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    use super::*;

    fn chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(data);
        out.extend_from_slice(&[0, 0, 0, 0]);
    }

    fn png(width: u32, height: u32, color_type: u8, scanlines: &[u8]) -> Vec<u8> {
        let mut ihdr = Vec::new();
        ihdr.extend_from_slice(&width.to_be_bytes());
        ihdr.extend_from_slice(&height.to_be_bytes());
        ihdr.extend_from_slice(&[8, color_type, 0, 0, 0]);

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(scanlines).unwrap();
        let idat = encoder.finish().unwrap();

        let mut out = PNG_SIGNATURE.to_vec();
        chunk(&mut out, b"IHDR", &ihdr);
        chunk(&mut out, b"IDAT", &idat);
        chunk(&mut out, b"IEND", &[]);
        out
    }

    #[test]
    fn mean_excludes_non_positive_pixels() {
        assert_eq!(mean_positive(&[0.0, 0.0, 4.0, 2.0]), 3.0);
        assert!(mean_positive(&[0.0, 0.0, 0.0]).is_nan());
        assert!(mean_positive(&[]).is_nan());
        assert_eq!(mean_positive(&[-1.0, 5.0]), 5.0);
    }

    #[test]
    fn decode_gray_alpha_with_sub_filter() {
        // row 0: filter none, pixels (255, a255) (0, a0)
        // row 1: filter sub, pixels (51, a255) (102, a255) encoded as deltas
        let scanlines = [0, 255, 255, 0, 0, 1, 51, 255, 51, 0];
        let image = decode_png(&png(2, 2, 4, &scanlines)).unwrap();
        assert_eq!((image.width, image.height), (2, 2));
        assert_eq!(image.opaque, vec![true, false, true, true]);
        assert_eq!(image.levels[0], 1.0);
        assert!((image.levels[3] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn rescales_to_intensity_range() {
        let scanlines = [0, 255, 255, 0, 0, 2, 0, 0, 0, 255];
        let grid = IntensityGrid::from_png(&png(2, 2, 4, &scanlines), 10.0, 110.0).unwrap();
        assert_eq!(grid.get(0, 0), Some(110.0));
        assert_eq!(grid.get(1, 0), Some(0.0));
        // row 1 uses the up filter: (0, a0) + (0, a255) becomes (0, a255)
        assert_eq!(grid.get(0, 1), Some(110.0));
        assert_eq!(grid.get(1, 1), Some(10.0));
    }

    #[test]
    fn huge_dimensions_are_a_decode_error() {
        let mut ihdr = Vec::new();
        ihdr.extend_from_slice(&u32::MAX.to_be_bytes());
        ihdr.extend_from_slice(&u32::MAX.to_be_bytes());
        ihdr.extend_from_slice(&[16, 6, 0, 0, 0]);
        let idat = ZlibEncoder::new(Vec::new(), Compression::default())
            .finish()
            .unwrap();
        let mut bytes = PNG_SIGNATURE.to_vec();
        chunk(&mut bytes, b"IHDR", &ihdr);
        chunk(&mut bytes, b"IDAT", &idat);
        chunk(&mut bytes, b"IEND", &[]);

        let err = decode_png(&bytes).unwrap_err();
        assert!(matches!(err, MmitError::ImageDecode(_)));

        // plausible header, scanlines missing
        let err = decode_png(&png(4000, 4000, 4, &[0, 1, 2])).unwrap_err();
        assert!(err.to_string().contains("bytes of scanlines"));
    }

    #[test]
    fn rejects_palette_images() {
        let err = decode_png(&png(1, 1, 3, &[0, 0])).unwrap_err();
        assert!(err.to_string().contains("color type 3"));
    }
}
