pub mod output;
pub mod stub;

pub use output::{JsonNearMissFormatter, NearMissFormatter, PlainTextNearMissFormatter};
