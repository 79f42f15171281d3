mod extended;
mod repository;
mod template;

pub use extended::{ExtendedJob, EXTRANONCE2_SIZE};
pub use repository::{Notification, Repository};
pub use template::StratumJob;
