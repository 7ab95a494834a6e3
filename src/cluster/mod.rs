pub mod detector;
pub mod keys;

pub use detector::{ClusterDetector, CooldownMarker};
pub use keys::{bucket_start, normalize_address, ClusterKeys};
