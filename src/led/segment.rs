/// `led/segment.rs` - segment model and packed colour helpers
///
/// Colours are packed 32-bit values: white/alpha in bits 24-31, then red,
/// green and blue. The bridge never interprets them, the strip just stores them.
use serde::{Deserialize, Serialize};

/// Inclusive pixel range inside one segment, in absolute strip coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentAddress {
    pub segment: u8,
    pub start: u16,
    pub end: u16,
}

impl SegmentAddress {
    pub fn new(segment: u8, start: u16, end: u16) -> Self {
        Self { segment, start, end }
    }

    /// `start > end` addresses nothing.
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

impl std::fmt::Display for SegmentAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "segment {} [{}..={}]", self.segment, self.start, self.end)
    }
}

/// A contiguous span of the strip with one colour slot per pixel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// First pixel, inclusive.
    pub start: u16,
    /// Last pixel, inclusive.
    pub stop: u16,
    pixels: Vec<u32>,
}

impl Segment {
    /// `start` must not exceed `stop`.
    pub fn new(start: u16, stop: u16) -> Self {
        let len = usize::from(stop - start) + 1;
        Self {
            start,
            stop,
            pixels: vec![0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn contains(&self, index: u16) -> bool {
        index >= self.start && index <= self.stop
    }

    /// Colour of absolute strip pixel `index`, if the segment covers it.
    pub fn color(&self, index: u16) -> Option<u32> {
        if !self.contains(index) {
            return None;
        }
        self.pixels.get(usize::from(index - self.start)).copied()
    }

    /// Returns `false` when `index` lies outside the segment.
    pub fn set_color(&mut self, index: u16, color: u32) -> bool {
        if !self.contains(index) {
            return false;
        }
        match self.pixels.get_mut(usize::from(index - self.start)) {
            Some(slot) => {
                *slot = color;
                true
            }
            None => false,
        }
    }

    pub fn colors(&self) -> &[u32] {
        &self.pixels
    }

    /// Move the segment to `[start, stop]`. Pixels still covered keep their colour.
    pub fn reposition(&mut self, start: u16, stop: u16) {
        let mut moved = Segment::new(start, stop);
        for index in start..=stop {
            if let Some(color) = self.color(index) {
                moved.set_color(index, color);
            }
        }
        *self = moved;
    }
}

/// Split a colour word into `(w, r, g, b)`.
pub fn unpack_color(color: u32) -> (u8, u8, u8, u8) {
    let [w, r, g, b] = color.to_be_bytes();
    (w, r, g, b)
}
