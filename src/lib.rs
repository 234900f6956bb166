//! Hide a raster image inside the low-order bits of another raster image,
//! and recover it exactly. Payload pixels are serialized into a compressible
//! text envelope, packed into 6-bit symbols, and written into the two
//! low-order bits of each carrier sample.

pub mod carrier;
pub mod error;
pub mod payload;

use std::convert::TryFrom;
use std::fmt;

use image::{DynamicImage, GrayImage, RgbImage};

pub use crate::carrier::Carrier;
pub use crate::error::{Result, StegoError};
pub use crate::payload::Payload;

pub(crate) const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";
pub(crate) const PAYLOAD_CLOSE_TAG: &[u8] = b"</payload>";
pub(crate) const MAGIC: &[u8] = b"<?xml";
pub(crate) const MAGIC_GROUPS: usize = 7;

/// The two pixel layouts an envelope can describe.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PayloadKind {
    Color,
    Gray,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PayloadKind::Color => "Color",
            PayloadKind::Gray => "Gray",
        })
    }
}

impl TryFrom<&str> for PayloadKind {
    type Error = StegoError;

    fn try_from(v: &str) -> Result<Self> {
        match v {
            "Color" => Ok(PayloadKind::Color),
            "Gray" => Ok(PayloadKind::Gray),
            _ => Err(StegoError::MalformedEnvelope(format!(
                "unknown payload type {:?}",
                v
            ))),
        }
    }
}

/// Deflate level for the envelope body. `NONE` stores the body verbatim.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CompressionLevel(i8);

impl CompressionLevel {
    pub const NONE: CompressionLevel = CompressionLevel(-1);

    pub fn new(level: i8) -> Result<Self> {
        if (-1..=9).contains(&level) {
            Ok(CompressionLevel(level))
        } else {
            Err(StegoError::InvalidCompressionLevel(level))
        }
    }

    pub(crate) fn level(self) -> Option<u32> {
        if self.0 < 0 {
            None
        } else {
            Some(self.0 as u32)
        }
    }
}

impl TryFrom<i8> for CompressionLevel {
    type Error = StegoError;

    fn try_from(v: i8) -> Result<Self> {
        CompressionLevel::new(v)
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        CompressionLevel::NONE
    }
}

/// A pixel array in one of the two supported layouts: 8-bit grayscale
/// (rows × cols) or 8-bit interleaved RGB (rows × cols × 3).
#[derive(Clone)]
pub enum ImageMatrix {
    Gray(GrayImage),
    Color(RgbImage),
}

impl ImageMatrix {
    pub fn kind(&self) -> PayloadKind {
        match self {
            ImageMatrix::Gray(_) => PayloadKind::Gray,
            ImageMatrix::Color(_) => PayloadKind::Color,
        }
    }

    pub fn rows(&self) -> u32 {
        match self {
            ImageMatrix::Gray(img) => img.height(),
            ImageMatrix::Color(img) => img.height(),
        }
    }

    pub fn cols(&self) -> u32 {
        match self {
            ImageMatrix::Gray(img) => img.width(),
            ImageMatrix::Color(img) => img.width(),
        }
    }

    /// Flattened sample stream: row-major, channel-interleaved for color.
    pub fn samples(&self) -> &[u8] {
        match self {
            ImageMatrix::Gray(img) => img.as_raw(),
            ImageMatrix::Color(img) => img.as_raw(),
        }
    }

    pub(crate) fn samples_mut(&mut self) -> &mut [u8] {
        match self {
            ImageMatrix::Gray(img) => &mut **img,
            ImageMatrix::Color(img) => &mut **img,
        }
    }

    // Envelope body order: the red plane, then green, then blue. Gray is a
    // straight copy of the single plane.
    pub(crate) fn channel_major(&self) -> Vec<u8> {
        match self {
            ImageMatrix::Gray(img) => img.as_raw().clone(),
            ImageMatrix::Color(img) => {
                let raw = img.as_raw();
                let mut planes = Vec::with_capacity(raw.len());
                for channel in 0..3 {
                    planes.extend(raw.iter().skip(channel).step_by(3));
                }
                planes
            }
        }
    }
}

impl From<GrayImage> for ImageMatrix {
    fn from(img: GrayImage) -> Self {
        ImageMatrix::Gray(img)
    }
}

impl From<RgbImage> for ImageMatrix {
    fn from(img: RgbImage) -> Self {
        ImageMatrix::Color(img)
    }
}

impl TryFrom<DynamicImage> for ImageMatrix {
    type Error = StegoError;

    fn try_from(img: DynamicImage) -> Result<Self> {
        match img {
            DynamicImage::ImageLuma8(buf) => Ok(ImageMatrix::Gray(buf)),
            DynamicImage::ImageRgb8(buf) => Ok(ImageMatrix::Color(buf)),
            other => Err(StegoError::UnsupportedLayout(format!(
                "{:?}",
                other.color()
            ))),
        }
    }
}

impl PartialEq for ImageMatrix {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind()
            && self.rows() == other.rows()
            && self.cols() == other.cols()
            && self.samples() == other.samples()
    }
}

impl Eq for ImageMatrix {}

impl fmt::Debug for ImageMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}x{}", self.kind(), self.rows(), self.cols())
    }
}

pub(crate) mod radix64 {
    use base64::engine::{GeneralPurpose, GeneralPurposeConfig};
    use base64::{alphabet, Engine};

    use crate::error::{Result, StegoError};

    // Symbol streams read back from a carrier end in garbage groups, so the
    // final base64 quantum routinely has non-zero discarded bits.
    const ENGINE: GeneralPurpose = GeneralPurpose::new(
        &alphabet::STANDARD,
        GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
    );

    const CHAR_FOR_SYMBOL: &[u8; 64] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    const SYMBOL_FOR_CHAR: [u8; 256] = symbol_table();

    const fn symbol_table() -> [u8; 256] {
        let mut table = [0xFFu8; 256];
        let mut symbol = 0;
        while symbol < 64 {
            table[CHAR_FOR_SYMBOL[symbol] as usize] = symbol as u8;
            symbol += 1;
        }
        table
    }

    /// Base64-encode `bytes` and map the characters (padding stripped) to
    /// their 6-bit alphabet indices.
    pub fn to_symbols(bytes: &[u8]) -> Vec<u8> {
        ENGINE
            .encode(bytes)
            .trim_end_matches('=')
            .bytes()
            .map(|c| SYMBOL_FOR_CHAR[c as usize])
            .collect()
    }

    /// Inverse of [`to_symbols`]: map symbols back to base64 characters,
    /// restore padding from the symbol count, and decode.
    pub fn from_symbols(symbols: &[u8]) -> Result<Vec<u8>> {
        let mut chars = Vec::with_capacity(symbols.len() + 2);
        for &symbol in symbols {
            if symbol > 63 {
                return Err(StegoError::InvalidSymbol(symbol));
            }
            chars.push(CHAR_FOR_SYMBOL[symbol as usize]);
        }

        // A stripped base64 encoding is never 1 mod 4 characters long; that
        // length only appears when the read window ran past the envelope.
        if chars.len() % 4 == 1 {
            chars.pop();
        }

        match (chars.len() * 3) % 4 {
            2 => chars.extend_from_slice(b"=="),
            1 => chars.push(b'='),
            _ => {}
        }

        Ok(ENGINE.decode(&chars)?)
    }

}
