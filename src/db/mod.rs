pub mod database;
pub mod record;

pub use database::JobDatabase;
pub use record::{JobRecord, JobStatus};
