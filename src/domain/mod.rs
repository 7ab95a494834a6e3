pub mod bucket;
pub mod event;
pub mod signal;
pub mod state;

pub use bucket::*;
pub use event::*;
pub use signal::*;
pub use state::*;
