pub mod network;
pub use network::*;
pub mod dijkstra;
pub use dijkstra::*;
pub mod cache;
pub use cache::*;
pub mod index;
pub use index::*;
