pub mod raw;

pub use raw::{FrameSource, RawScanLog};
