#![forbid(unsafe_code)]

mod jobs;
mod workers;

pub use jobs::*;
pub use workers::*;
