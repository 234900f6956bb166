//! The carrier engine: maps envelope symbols onto pixel low-order bits,
//! reverses the mapping, detects an embedded envelope, and randomizes low
//! bits to destroy one.

use log::debug;
use rand::Rng;

use crate::error::{Result, StegoError};
use crate::payload::Payload;
use crate::{radix64, ImageMatrix, MAGIC, MAGIC_GROUPS};

/// A host image addressed as pixel groups of three samples each.
///
/// For a three-channel carrier a group is one (R, G, B) pixel; for a
/// single-channel carrier it is three consecutive samples in row-major
/// order. Every producing operation returns a new pixel array and leaves
/// the original untouched.
pub struct Carrier {
    image: ImageMatrix,
}

impl Carrier {
    pub fn new(image: ImageMatrix) -> Self {
        Carrier { image }
    }

    pub fn image(&self) -> &ImageMatrix {
        &self.image
    }

    /// Number of symbols this carrier can hold, one per pixel group.
    pub fn capacity(&self) -> usize {
        self.image.samples().len() / 3
    }

    /// Probe the first [`MAGIC_GROUPS`] pixel groups for an envelope
    /// header. Bounded cost; never scans the whole carrier.
    pub fn payload_exists(&self) -> bool {
        let samples = self.image.samples();
        let window = &samples[..samples.len().min(3 * MAGIC_GROUPS)];
        let symbols = read_symbols(window);
        if symbols.len() < MAGIC_GROUPS {
            return false;
        }
        match radix64::from_symbols(&symbols) {
            Ok(prefix) => prefix == MAGIC,
            Err(_) => false,
        }
    }

    /// Embed `payload` into a copy of the carrier pixels.
    ///
    /// Fails if the payload does not fit, or if the carrier already holds a
    /// payload and `override_existing` is not set. Pixel groups past the
    /// payload's symbol count are copied unchanged.
    pub fn embed_payload(
        &self,
        payload: &Payload,
        override_existing: bool,
    ) -> Result<ImageMatrix> {
        let required = payload.content().len();
        let available = self.capacity();
        debug!(
            "carrier capacity: {} groups, payload size: {} symbols, utilisation: {:.4}%",
            available,
            required,
            (required as f64) / (available as f64) * 100.0
        );

        if required > available {
            return Err(StegoError::CapacityExceeded {
                required,
                available,
            });
        }

        if !override_existing && self.payload_exists() {
            return Err(StegoError::PayloadPresent);
        }

        let mut output = self.image.clone();
        for (group, &symbol) in output
            .samples_mut()
            .chunks_exact_mut(3)
            .zip(payload.content())
        {
            group[0] = (group[0] & !0x03) | (symbol & 0x03);
            group[1] = (group[1] & !0x03) | ((symbol >> 2) & 0x03);
            group[2] = (group[2] & !0x03) | ((symbol >> 4) & 0x03);
        }
        Ok(output)
    }

    /// Read back every pixel group of the carrier and rebuild the payload.
    ///
    /// The recovered stream covers the carrier's full capacity; the envelope
    /// codec discards everything past the closing tag.
    pub fn extract_payload(&self) -> Result<Payload> {
        if !self.payload_exists() {
            return Err(StegoError::NoPayload);
        }

        let symbols = read_symbols(self.image.samples());
        debug!("read {} symbols from carrier", symbols.len());
        Payload::from_content(&symbols)
    }

    /// Return a copy of the carrier with every sample XOR-ed against an
    /// independent random 2-bit value, destroying any embedded payload.
    /// Each call draws fresh randomness.
    pub fn clean(&self) -> ImageMatrix {
        let mut rng = rand::thread_rng();
        let mut output = self.image.clone();
        for sample in output.samples_mut() {
            *sample ^= rng.gen_range(0..4);
        }
        output
    }
}

// One decode routine for both scan extents: detection reads the first
// MAGIC_GROUPS groups, extraction reads them all. A partial trailing group
// carries no symbol.
fn read_symbols(samples: &[u8]) -> Vec<u8> {
    samples
        .chunks_exact(3)
        .map(|group| (group[0] & 0x03) | ((group[1] & 0x03) << 2) | ((group[2] & 0x03) << 4))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompressionLevel;
    use image::{GrayImage, RgbImage};

    fn gray_matrix(rows: u32, cols: u32, f: impl Fn(usize) -> u8) -> ImageMatrix {
        let samples = (0..(rows * cols) as usize).map(f).collect();
        ImageMatrix::Gray(GrayImage::from_raw(cols, rows, samples).unwrap())
    }

    fn color_matrix(rows: u32, cols: u32, f: impl Fn(usize) -> u8) -> ImageMatrix {
        let samples = (0..(rows * cols * 3) as usize).map(f).collect();
        ImageMatrix::Color(RgbImage::from_raw(cols, rows, samples).unwrap())
    }

    fn small_payload() -> Payload {
        let image = color_matrix(2, 5, |i| (i * 5) as u8);
        Payload::from_image(image, CompressionLevel::NONE).unwrap()
    }

    #[test]
    fn test_read_symbols_groups_of_three() {
        // symbol = low bits of sample 0, 1, 2 at weights 1, 4, 16
        assert_eq!(vec![0b11_10_01], read_symbols(&[1, 2, 3]));
        assert_eq!(vec![63, 0], read_symbols(&[255, 255, 255, 4, 8, 252]));
        // partial trailing group is ignored
        assert_eq!(vec![0], read_symbols(&[0, 0, 0, 1, 1]));
    }

    #[test]
    fn test_embed_and_extract_color_carrier() {
        let payload = small_payload();
        let carrier = Carrier::new(color_matrix(24, 24, |i| (i % 251) as u8));
        assert!(!carrier.payload_exists());

        let embedded = Carrier::new(carrier.embed_payload(&payload, false).unwrap());
        assert!(embedded.payload_exists());

        let recovered = embedded.extract_payload().unwrap();
        assert_eq!(payload.image(), recovered.image());
        assert_eq!(payload.content(), recovered.content());
    }

    #[test]
    fn test_embed_and_extract_gray_carrier() {
        let payload = small_payload();
        let carrier = Carrier::new(gray_matrix(24, 72, |i| (i % 241) as u8));

        let embedded = Carrier::new(carrier.embed_payload(&payload, false).unwrap());
        assert!(embedded.payload_exists());

        let recovered = embedded.extract_payload().unwrap();
        assert_eq!(payload.image(), recovered.image());
    }

    #[test]
    fn test_high_bits_and_tail_are_preserved() {
        let payload = small_payload();
        let original = color_matrix(24, 24, |i| (i % 251) as u8);
        let carrier = Carrier::new(original.clone());

        let embedded = carrier.embed_payload(&payload, false).unwrap();
        let touched = payload.content().len() * 3;
        for (i, (before, after)) in original
            .samples()
            .iter()
            .zip(embedded.samples())
            .enumerate()
        {
            if i < touched {
                assert_eq!(before & !0x03, after & !0x03);
            } else {
                assert_eq!(before, after);
            }
        }
    }

    #[test]
    fn test_operations_do_not_mutate_the_carrier() {
        let payload = small_payload();
        let original = gray_matrix(24, 72, |i| (i % 239) as u8);
        let carrier = Carrier::new(original.clone());

        carrier.payload_exists();
        let embedded = carrier.embed_payload(&payload, false).unwrap();
        carrier.clean();
        assert_eq!(&original, carrier.image());

        let stego = Carrier::new(embedded);
        stego.extract_payload().unwrap();
        stego.payload_exists();
        stego.clean();
        assert_ne!(&original, stego.image());
        assert_eq!(original.samples().len(), stego.image().samples().len());
    }

    #[test]
    fn test_capacity_boundary() {
        let payload = small_payload();
        let exact = Carrier::new(gray_matrix(3, payload.content().len() as u32, |_| 0x80));
        assert_eq!(payload.content().len(), exact.capacity());
        assert!(exact.embed_payload(&payload, false).is_ok());

        let short = Carrier::new(gray_matrix(3, payload.content().len() as u32 - 1, |_| 0x80));
        match short.embed_payload(&payload, false) {
            Err(StegoError::CapacityExceeded {
                required,
                available,
            }) => {
                assert_eq!(payload.content().len(), required);
                assert_eq!(payload.content().len() - 1, available);
            }
            _ => panic!("expected CapacityExceeded"),
        }
    }

    #[test]
    fn test_collision_requires_override() {
        let first = small_payload();
        let second = Payload::from_image(
            gray_matrix(2, 3, |i| (40 + i * 9) as u8),
            CompressionLevel::NONE,
        )
        .unwrap();

        let carrier = Carrier::new(color_matrix(24, 24, |i| (i % 247) as u8));
        let occupied = Carrier::new(carrier.embed_payload(&first, false).unwrap());

        assert!(matches!(
            occupied.embed_payload(&second, false),
            Err(StegoError::PayloadPresent)
        ));

        let replaced = Carrier::new(occupied.embed_payload(&second, true).unwrap());
        let recovered = replaced.extract_payload().unwrap();
        assert_eq!(second.image(), recovered.image());
        assert_ne!(first.image(), recovered.image());
    }

    #[test]
    fn test_extract_requires_a_payload() {
        let carrier = Carrier::new(color_matrix(8, 8, |i| (i % 256) as u8));
        assert!(matches!(
            carrier.extract_payload(),
            Err(StegoError::NoPayload)
        ));
    }

    #[test]
    fn test_detection_needs_seven_full_groups() {
        let tiny = Carrier::new(gray_matrix(1, 20, |_| 0));
        assert!(!tiny.payload_exists());
    }

    #[test]
    fn test_clean_randomizes_low_bits_only() {
        let carrier = Carrier::new(color_matrix(10, 10, |i| (i % 250) as u8));

        let first = carrier.clean();
        let second = carrier.clean();
        assert_ne!(carrier.image(), &first);
        assert_ne!(carrier.image(), &second);
        assert_ne!(first, second);

        for (before, after) in carrier.image().samples().iter().zip(first.samples()) {
            assert_eq!(before & !0x03, after & !0x03);
        }
    }

    #[test]
    fn test_clean_destroys_an_embedded_payload() {
        let payload = small_payload();
        let carrier = Carrier::new(color_matrix(24, 24, |i| (i % 251) as u8));
        let embedded = Carrier::new(carrier.embed_payload(&payload, false).unwrap());

        let cleaned = Carrier::new(embedded.clean());
        assert!(!cleaned.payload_exists());
    }
}
