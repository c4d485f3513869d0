pub mod code;
pub mod events;
pub mod session;

pub use code::*;
pub use events::*;
pub use session::*;
