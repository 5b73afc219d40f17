mod beam;
mod common;
mod objective;
mod plan;
mod structure;

pub use beam::*;
pub use common::*;
pub use objective::*;
pub use plan::*;
pub use structure::*;
