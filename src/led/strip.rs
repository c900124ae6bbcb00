/// `led/strip.rs` - the LED capability handed to the script bindings
///
/// `LedStrip` is the only surface the sandbox can reach. Firmware builds
/// implement it over the real pixel buffer; `MemoryStrip` is the in-memory
/// version used by the demo binary and the tests.
use std::sync::{Arc, Mutex};

use thiserror::Error;

use super::segment::Segment;

/// Segment slots available on the strip (ESP32 firmware limit).
pub const MAX_NUM_SEGMENTS: u8 = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StripError {
    #[error("segment id {id} exceeds the {max} available segments")]
    SegmentIdOutOfRange { id: u8, max: u8 },
    #[error("segment {0} is not active")]
    NoSuchSegment(u8),
    #[error("invalid range [{start}..={end}] for a strip of {length} pixels")]
    InvalidRange { start: u16, end: u16, length: u16 },
    #[error("pixel {index} is outside segment {segment}")]
    PixelOutOfRange { segment: u8, index: u16 },
}

/// Capability over the firmware's segment/pixel state.
pub trait LedStrip: Send {
    /// Reposition/resize segment `id` to cover `[start, end]` inclusive.
    fn set_segment(&mut self, id: u8, start: u16, end: u16) -> Result<(), StripError>;

    /// Inclusive bounds of an active segment.
    fn segment_bounds(&self, id: u8) -> Option<(u16, u16)>;

    /// Write one packed colour to absolute pixel `index` of segment `id`.
    fn set_pixel_color(&mut self, id: u8, index: u16, color: u32) -> Result<(), StripError>;
}

/// Shared handle passed into the bindings at construction time.
pub type SharedStrip = Arc<Mutex<dyn LedStrip>>;

/// Wrap a strip for sharing with the script engine.
pub fn shared<S: LedStrip + 'static>(strip: S) -> Arc<Mutex<S>> {
    Arc::new(Mutex::new(strip))
}

// ── MemoryStrip ───────────────────────────────────────────────────────────────

/// Pixel buffer held in RAM. Segment 0 spans the whole strip on creation.
#[derive(Debug, Clone)]
pub struct MemoryStrip {
    length: u16,
    segments: Vec<Option<Segment>>,
}

impl MemoryStrip {
    pub fn new(length: u16) -> Self {
        let mut segments: Vec<Option<Segment>> = vec![None; usize::from(MAX_NUM_SEGMENTS)];
        if length > 0 {
            segments[0] = Some(Segment::new(0, length - 1));
        }
        Self { length, segments }
    }

    /// Physical pixel count.
    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn segment(&self, id: u8) -> Option<&Segment> {
        self.segments.get(usize::from(id)).and_then(Option::as_ref)
    }

    /// Colour of absolute pixel `index` as seen through segment `id`.
    pub fn pixel(&self, id: u8, index: u16) -> Option<u32> {
        self.segment(id).and_then(|s| s.color(index))
    }

    pub fn active_segments(&self) -> usize {
        self.segments.iter().filter(|s| s.is_some()).count()
    }

    fn slot_mut(&mut self, id: u8) -> Result<&mut Option<Segment>, StripError> {
        self.segments
            .get_mut(usize::from(id))
            .ok_or(StripError::SegmentIdOutOfRange {
                id,
                max: MAX_NUM_SEGMENTS,
            })
    }
}

impl LedStrip for MemoryStrip {
    fn set_segment(&mut self, id: u8, start: u16, end: u16) -> Result<(), StripError> {
        let length = self.length;
        let invalid = StripError::InvalidRange { start, end, length };
        if start >= length {
            return Err(invalid);
        }
        // Same as the firmware: the end is cut back to the physical strip.
        let stop = end.min(length - 1);
        if start > stop {
            return Err(invalid);
        }

        let slot = self.slot_mut(id)?;
        match slot {
            Some(seg) => seg.reposition(start, stop),
            None => *slot = Some(Segment::new(start, stop)),
        }
        log::debug!("segment {id} now covers [{start}..={stop}]");
        Ok(())
    }

    fn segment_bounds(&self, id: u8) -> Option<(u16, u16)> {
        self.segment(id).map(|s| (s.start, s.stop))
    }

    fn set_pixel_color(&mut self, id: u8, index: u16, color: u32) -> Result<(), StripError> {
        let seg = self
            .slot_mut(id)?
            .as_mut()
            .ok_or(StripError::NoSuchSegment(id))?;
        if seg.set_color(index, color) {
            Ok(())
        } else {
            Err(StripError::PixelOutOfRange { segment: id, index })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_strip_has_full_length_segment_zero() {
        let strip = MemoryStrip::new(30);
        assert_eq!(strip.segment_bounds(0), Some((0, 29)));
        assert_eq!(strip.active_segments(), 1);
        assert_eq!(strip.segment_bounds(1), None);
    }

    #[test]
    fn set_segment_clamps_end_to_strip() {
        let mut strip = MemoryStrip::new(30);
        strip.set_segment(2, 25, 100).unwrap();
        assert_eq!(strip.segment_bounds(2), Some((25, 29)));
    }

    #[test]
    fn set_segment_rejects_bad_ranges() {
        let mut strip = MemoryStrip::new(30);
        assert!(matches!(
            strip.set_segment(0, 30, 40),
            Err(StripError::InvalidRange { .. })
        ));
        assert!(matches!(
            strip.set_segment(0, 5, 4),
            Err(StripError::InvalidRange { .. })
        ));
        assert!(matches!(
            strip.set_segment(MAX_NUM_SEGMENTS, 0, 4),
            Err(StripError::SegmentIdOutOfRange { .. })
        ));
        assert_eq!(strip.segment_bounds(0), Some((0, 29)), "failed calls must not touch segment 0");
    }

    #[test]
    fn set_pixel_color_checks_segment_bounds() {
        let mut strip = MemoryStrip::new(10);
        strip.set_pixel_color(0, 9, 0xAB).unwrap();
        assert_eq!(strip.pixel(0, 9), Some(0xAB));
        assert_eq!(
            strip.set_pixel_color(0, 10, 1),
            Err(StripError::PixelOutOfRange { segment: 0, index: 10 })
        );
        assert_eq!(strip.set_pixel_color(3, 0, 1), Err(StripError::NoSuchSegment(3)));
    }

    #[test]
    fn empty_strip_rejects_everything() {
        let mut strip = MemoryStrip::new(0);
        assert_eq!(strip.active_segments(), 0);
        assert!(strip.set_segment(0, 0, 0).is_err());
    }
}
