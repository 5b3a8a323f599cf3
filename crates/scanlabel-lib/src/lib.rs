pub mod config;
pub mod features;
pub mod io;
pub mod scan;
pub mod session;
pub mod store;

pub use config::SessionConfig;
pub use features::{FeatureExtractor, SegmentFeatures};
pub use io::{FrameSource, RawScanLog};
pub use scan::*;
pub use session::{LabelingSession, Playback, SessionStatus, Toggles};
pub use store::{RecordKind, RecordStore, StoreError, StorePaths, StoreResult};
