pub mod asset;
pub mod forecast;
pub mod job;
pub mod problem;
pub mod solution;

pub use asset::*;
pub use forecast::*;
pub use job::*;
pub use problem::*;
pub use solution::*;
