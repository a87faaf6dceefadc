pub mod manager;
pub mod state;

pub use manager::QueueManager;
pub use state::{QueueSnapshot, QueueState};
