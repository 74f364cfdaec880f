pub mod compare;
pub mod dp;
pub mod grid;
pub mod simulate;
mod step;
pub mod types;

pub use compare::*;
pub use dp::*;
pub use grid::*;
pub use simulate::*;
pub use types::*;
