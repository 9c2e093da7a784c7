mod bar;
mod lookback;
mod position;
mod simulator;
mod strategy;

pub use bar::*;
pub use lookback::*;
pub use position::*;
pub use simulator::*;
pub use strategy::*;
