//! The envelope codec: serializes a payload image into a self-describing
//! text envelope and back, and converts the envelope to and from the 6-bit
//! symbol stream that gets embedded into carriers.

use std::convert::TryFrom;
use std::io::Read;

use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use image::{GrayImage, RgbImage};
use log::debug;

use crate::error::{Result, StegoError};
use crate::{
    radix64, CompressionLevel, ImageMatrix, PayloadKind, PAYLOAD_CLOSE_TAG, XML_DECLARATION,
};

/// A payload image together with its embeddable symbol stream.
///
/// The two fields are views of the same logical content: `content` is always
/// exactly the radix-64 encoding of the image's serialized envelope with
/// trailing padding stripped, whichever side the payload was built from.
#[derive(Clone)]
pub struct Payload {
    image: ImageMatrix,
    content: Vec<u8>,
}

impl Payload {
    /// Build a payload from a source image, serializing it into an envelope
    /// at the given compression level.
    pub fn from_image(image: ImageMatrix, level: CompressionLevel) -> Result<Self> {
        let flat = image.channel_major();

        let (body, compressed) = match level.level() {
            Some(level) => {
                let mut data = Vec::new();
                let mut encoder = ZlibEncoder::new(&flat[..], Compression::new(level));
                encoder.read_to_end(&mut data)?;
                debug!(
                    "compression ratio: {:.4}%",
                    (data.len() as f64) / (flat.len() as f64) * 100.0
                );
                (data, true)
            }
            None => (flat, false),
        };

        let text = render_envelope(image.kind(), image.rows(), image.cols(), compressed, &body);
        let content = radix64::to_symbols(text.as_bytes());
        debug!(
            "serialized {} payload {}x{} as {} symbols",
            image.kind(),
            image.rows(),
            image.cols(),
            content.len()
        );

        Ok(Payload { image, content })
    }

    /// Rebuild a payload from a recovered symbol stream.
    ///
    /// The stream may run past the true envelope (a carrier is read to its
    /// full capacity); everything after the envelope's closing tag is
    /// discarded and `content` is stored in canonical truncated form.
    pub fn from_content(content: &[u8]) -> Result<Self> {
        let decoded = radix64::from_symbols(content)?;

        let tag = decoded
            .windows(PAYLOAD_CLOSE_TAG.len())
            .position(|window| window == PAYLOAD_CLOSE_TAG)
            .ok_or_else(|| malformed("missing closing tag"))?;
        let envelope = &decoded[..tag + PAYLOAD_CLOSE_TAG.len()];

        let image = parse_envelope(envelope)?;
        let content = radix64::to_symbols(envelope);

        Ok(Payload { image, content })
    }

    pub fn image(&self) -> &ImageMatrix {
        &self.image
    }

    /// The 6-bit symbol stream embedded into a carrier, one value per pixel
    /// group.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn into_image(self) -> ImageMatrix {
        self.image
    }
}

fn render_envelope(
    kind: PayloadKind,
    rows: u32,
    cols: u32,
    compressed: bool,
    body: &[u8],
) -> String {
    let values: Vec<String> = body.iter().map(|b| b.to_string()).collect();

    let mut text = String::with_capacity(XML_DECLARATION.len() + 64 + values.len() * 4);
    text.push_str(XML_DECLARATION);
    text.push_str(&format!(
        "<payload type=\"{}\" size=\"{},{}\" compressed=\"{}\">",
        kind,
        rows,
        cols,
        if compressed { "True" } else { "False" }
    ));
    text.push_str(&values.join(","));
    text.push_str("</payload>");
    text
}

fn parse_envelope(envelope: &[u8]) -> Result<ImageMatrix> {
    let text =
        std::str::from_utf8(envelope).map_err(|_| malformed("envelope is not valid UTF-8"))?;

    let (kind, rest) = attribute(text, "type=\"")?;
    let (size, rest) = attribute(rest, "size=\"")?;
    let (compressed, rest) = attribute(rest, "compressed=\"")?;

    let kind = PayloadKind::try_from(kind)?;

    let (rows, cols) = size
        .split_once(',')
        .and_then(|(r, c)| Some((r.parse::<u32>().ok()?, c.parse::<u32>().ok()?)))
        .ok_or_else(|| malformed("size attribute is not \"rows,cols\""))?;

    let compressed = match compressed {
        "True" => true,
        "False" => false,
        other => return Err(malformed(&format!("bad compressed flag {:?}", other))),
    };

    let body = rest
        .strip_prefix('>')
        .and_then(|r| r.strip_suffix("</payload>"))
        .ok_or_else(|| malformed("missing envelope body"))?;

    let mut data = Vec::with_capacity(body.len() / 2);
    for value in body.split(',') {
        data.push(
            value
                .parse::<u8>()
                .map_err(|_| malformed(&format!("bad byte value {:?}", value)))?,
        );
    }

    let data = if compressed {
        let mut out = Vec::new();
        ZlibDecoder::new(&data[..]).read_to_end(&mut out)?;
        out
    } else {
        data
    };

    debug!(
        "parsed {} envelope {}x{} compressed={} ({} bytes)",
        kind,
        rows,
        cols,
        compressed,
        data.len()
    );

    match kind {
        PayloadKind::Gray => GrayImage::from_raw(cols, rows, data)
            .map(ImageMatrix::Gray)
            .ok_or_else(|| malformed("pixel data does not match the size attribute")),
        PayloadKind::Color => {
            if data.len() != rows as usize * cols as usize * 3 {
                return Err(malformed("pixel data does not match the size attribute"));
            }
            let plane = data.len() / 3;
            let mut raw = Vec::with_capacity(data.len());
            for i in 0..plane {
                raw.push(data[i]);
                raw.push(data[plane + i]);
                raw.push(data[2 * plane + i]);
            }
            RgbImage::from_raw(cols, rows, raw)
                .map(ImageMatrix::Color)
                .ok_or_else(|| malformed("pixel data does not match the size attribute"))
        }
    }
}

// Attributes appear in a fixed order, so each one is searched for from where
// the previous one ended.
fn attribute<'a>(text: &'a str, marker: &str) -> Result<(&'a str, &'a str)> {
    let start = text
        .find(marker)
        .ok_or_else(|| malformed(&format!("missing {}...\" attribute", marker)))?;
    let rest = &text[start + marker.len()..];
    let end = rest
        .find('"')
        .ok_or_else(|| malformed("unterminated attribute"))?;
    Ok((&rest[..end], &rest[end + 1..]))
}

fn malformed(reason: &str) -> StegoError {
    StegoError::MalformedEnvelope(reason.to_string())
}
