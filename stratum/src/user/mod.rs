mod registry;

pub use registry::{ApiUser, Registry, WorkerRecord};
