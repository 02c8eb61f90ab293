pub mod enums;
pub mod project;
pub mod run;
pub mod structured;

pub use enums::*;
pub use project::*;
pub use run::*;
pub use structured::*;
