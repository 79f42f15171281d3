pub mod parser;
pub mod session;
pub mod types;

pub use parser::{Parser, StratumMessage};
pub use session::{StratumSession, StratumSessionFactory};
pub use types::{Method, Request, Response};
