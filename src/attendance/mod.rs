pub mod guard;
pub mod sheet;
pub mod stats;
pub mod store;

pub use guard::*;
pub use sheet::*;
pub use stats::*;
pub use store::*;
