pub mod apikey;
pub mod ids;
pub mod indicator;
pub mod instance;
pub mod percent;
pub mod side;
pub mod strategy;
pub mod wire;

pub use apikey::*;
pub use ids::*;
pub use indicator::*;
pub use instance::*;
pub use percent::*;
pub use side::*;
pub use strategy::*;
