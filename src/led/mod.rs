/// `led/` - LED segment capability consumed by the script bindings
///
/// The bindings only ever see `SharedStrip`; they never reach a global strip.
pub mod segment;
pub mod strip;

pub use segment::{unpack_color, Segment, SegmentAddress};
pub use strip::{shared, LedStrip, MemoryStrip, SharedStrip, StripError, MAX_NUM_SEGMENTS};
