// Minimal fMP4/ISOBMFF helpers: box walking and fragment timing extraction.

mod boxes;
mod timing;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use timing::{FragmentTiming, read_fragment_timing};
