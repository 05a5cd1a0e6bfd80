// Emulated media-source primitives backing the playback bridge.

mod buffer;
mod media_source;
mod parts;

pub use buffer::{AppendApplied, AppendError, Fragment, FragmentBuffer, PreparedAppend};
pub use media_source::VirtualMediaSource;
pub use parts::{PlayerPart, PlayerPartsState, derive_parts_state};
