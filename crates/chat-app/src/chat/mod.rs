pub mod message;
pub mod reducer;
pub mod session;

pub use message::{Message, Role};
pub use reducer::{Reduction, apply_event};
pub use session::ChatSession;
