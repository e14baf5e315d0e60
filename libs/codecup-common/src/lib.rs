pub mod config;
pub mod coordinator;
pub mod error;
pub mod redis;
pub mod security;
pub mod store;
pub mod tasks;
pub mod types;

pub use coordinator::{JobCoordinator, SubmitOutcome};
pub use error::{CoordinatorError, StoreError, TaskError};
pub use security::SecurityAnalyzer;
pub use store::{JobQueue, JobStore, MemoryJobQueue, MemoryJobStore};
pub use tasks::{HiddenTestCase, JsonTaskProvider, Task, TaskProvider};
