mod id;

pub use id::{Allocator, SessionId};
