pub mod ext;
pub mod generic;
pub mod macros;
pub mod stack;
pub mod status_code;

// Publicly re-export the error types so callers only need the crate root.
pub use ext::*;
pub use generic::*;
pub use macros::*;
pub use stack::*;
pub use status_code::*;

pub type BusResult<T> = Result<T, StackError>;
