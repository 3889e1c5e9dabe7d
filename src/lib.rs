pub mod algorithm;
pub mod error;
pub mod graph;
pub mod mm;
pub mod utils;
