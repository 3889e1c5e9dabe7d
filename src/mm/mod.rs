pub mod fmm;
pub use fmm::*;
pub mod model;
pub use model::*;
pub mod traj;
pub use traj::*;
