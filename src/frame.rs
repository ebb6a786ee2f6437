//! Raw pixel frames and pixel stream synchronisation.
//!
//! A pixel dump is a stream of bytes read from the pixel burst register.
//! The first pixel of a frame carries the start-of-frame marker in its two
//! upper bits; the low six bits of every byte are the pixel value.

use std::fmt::Write as _;

use crate::errors::{DriverError, Result};

/// Pixels per row and column of the sensor array.
pub const FRAME_WIDTH: usize = 30;

/// Pixels in one full frame.
pub const FRAME_PIXELS: usize = FRAME_WIDTH * FRAME_WIDTH;

/// Bytes pulled from the pixel burst register per capture. Larger than a
/// frame so the start marker can be found after leading filler bytes.
pub const PIXEL_DUMP_LEN: usize = 1024;

/// Any byte at or above this value marks the first pixel of a frame.
pub const START_OF_FRAME: u8 = 0xC0;

/// Valid pixel bits.
pub const PIXEL_MASK: u8 = 0x3F;

/// One captured 30x30 image, 6-bit grey levels in row-major order.
#[derive(Clone, PartialEq, Eq)]
pub struct RawFrame {
    pixels: [u8; FRAME_PIXELS],
}

impl RawFrame {
    pub fn new() -> Self {
        Self {
            pixels: [0; FRAME_PIXELS],
        }
    }

    pub fn pixels(&self) -> &[u8; FRAME_PIXELS] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8; FRAME_PIXELS] {
        &mut self.pixels
    }

    /// Hex listing with eight pixels per line.
    pub fn hex_dump(&self) -> String {
        let mut out = String::with_capacity(FRAME_PIXELS * 3 + FRAME_PIXELS / 8);
        for chunk in self.pixels.chunks(8) {
            for (i, px) in chunk.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                let _ = write!(out, "{px:02X}");
            }
            out.push('\n');
        }
        out
    }
}

impl Default for RawFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let max = self.pixels.iter().copied().max().unwrap_or(0);
        let sum: u32 = self.pixels.iter().map(|&p| p as u32).sum();
        f.debug_struct("RawFrame")
            .field("pixels", &FRAME_PIXELS)
            .field("max", &max)
            .field("sum", &sum)
            .finish()
    }
}

/// Position of the first start-of-frame byte, if any.
pub fn find_frame_start(stream: &[u8]) -> Option<usize> {
    stream.iter().position(|&b| b >= START_OF_FRAME)
}

/// Synchronise on the start marker and copy one frame of masked pixels.
///
/// `out` is only written when a full frame is available after the marker;
/// on any error it is left exactly as it was.
pub fn extract_frame(stream: &[u8], out: &mut [u8; FRAME_PIXELS]) -> Result<usize> {
    let start = find_frame_start(stream).ok_or_else(|| {
        DriverError::SyncLost(format!(
            "no start-of-frame marker in {} byte pixel dump",
            stream.len()
        ))
    })?;

    let available = stream.len() - start;
    if available < FRAME_PIXELS {
        return Err(DriverError::SyncLost(format!(
            "start-of-frame at offset {start} leaves only {available} of {FRAME_PIXELS} pixels"
        )));
    }

    for (dst, src) in out.iter_mut().zip(&stream[start..start + FRAME_PIXELS]) {
        *dst = src & PIXEL_MASK;
    }
    Ok(FRAME_PIXELS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_with_marker_at(offset: usize, len: usize) -> Vec<u8> {
        let mut stream = vec![0x15u8; len];
        stream[offset] = 0xC0 | 0x2A;
        for (i, b) in stream.iter_mut().enumerate().skip(offset + 1) {
            // bit 7 set on ordinary pixels, bit 6 clear
            *b = 0x80 | (i as u8 & PIXEL_MASK);
        }
        stream
    }

    #[test]
    fn finds_first_marker() {
        assert_eq!(find_frame_start(&[0x00, 0xBF, 0xC0, 0xFF]), Some(2));
        assert_eq!(find_frame_start(&[0x00, 0x3F, 0xBF]), None);
    }

    #[test]
    fn extracts_masked_frame_after_marker() {
        let stream = stream_with_marker_at(17, PIXEL_DUMP_LEN);
        let mut out = [0u8; FRAME_PIXELS];
        assert_eq!(extract_frame(&stream, &mut out).unwrap(), FRAME_PIXELS);
        assert_eq!(out[0], 0x2A);
        assert_eq!(out[1], 18 & PIXEL_MASK);
        assert!(out.iter().all(|&p| p <= 63));
    }

    #[test]
    fn no_marker_leaves_buffer_untouched() {
        let stream = vec![0xBFu8; PIXEL_DUMP_LEN];
        let mut out = [7u8; FRAME_PIXELS];
        let err = extract_frame(&stream, &mut out).unwrap_err();
        assert!(matches!(err, DriverError::SyncLost(_)));
        assert!(out.iter().all(|&p| p == 7));
    }

    #[test]
    fn late_marker_fails_closed() {
        let stream = stream_with_marker_at(PIXEL_DUMP_LEN - FRAME_PIXELS + 1, PIXEL_DUMP_LEN);
        let mut out = [9u8; FRAME_PIXELS];
        assert!(extract_frame(&stream, &mut out).is_err());
        assert!(out.iter().all(|&p| p == 9));
    }

    #[test]
    fn marker_at_last_valid_offset_succeeds() {
        let stream = stream_with_marker_at(PIXEL_DUMP_LEN - FRAME_PIXELS, PIXEL_DUMP_LEN);
        let mut out = [0u8; FRAME_PIXELS];
        assert_eq!(extract_frame(&stream, &mut out).unwrap(), FRAME_PIXELS);
    }

    #[test]
    fn every_pixel_is_six_bit_for_arbitrary_streams() {
        // deterministic pseudo-random streams
        let mut seed: u32 = 0x1234_5678;
        for _ in 0..64 {
            let stream: Vec<u8> = (0..PIXEL_DUMP_LEN)
                .map(|_| {
                    seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                    (seed >> 16) as u8
                })
                .collect();
            let mut out = [0u8; FRAME_PIXELS];
            match extract_frame(&stream, &mut out) {
                Ok(n) => {
                    assert_eq!(n, FRAME_PIXELS);
                    assert!(out.iter().all(|&p| p <= 63));
                }
                Err(_) => assert!(out.iter().all(|&p| p == 0)),
            }
        }
    }

    #[test]
    fn hex_dump_has_eight_pixels_per_line() {
        let mut frame = RawFrame::new();
        frame.pixels_mut()[0] = 0x3F;
        frame.pixels_mut()[9] = 0x0A;
        let dump = frame.hex_dump();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), FRAME_PIXELS.div_ceil(8));
        assert_eq!(lines[0], "3F 00 00 00 00 00 00 00");
        assert_eq!(lines[1], "00 0A 00 00 00 00 00 00");
        assert_eq!(lines.last().unwrap(), &"00 00 00 00");
    }
}
