pub mod basin;
pub mod constraints;
pub mod horizon;
pub mod network;
pub mod scenario;
pub mod trajectory;
pub mod turbine;

pub use basin::*;
pub use constraints::*;
pub use horizon::*;
pub use network::*;
pub use scenario::*;
pub use trajectory::*;
pub use turbine::*;
