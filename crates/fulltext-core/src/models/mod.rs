pub mod artifact;
pub mod format;
pub mod record;

pub use artifact::*;
pub use format::*;
pub use record::*;
