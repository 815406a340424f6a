//! 后台任务的登记、持久化、轮询与恢复

pub mod admission;
pub mod context;
pub mod error;
pub mod manager;
pub mod registry;
pub mod restore;
pub mod scheduler;
pub mod store;
pub mod timings;

pub use admission::{AdmissionDecision, SpaceAdmissionController};
pub use error::{StoreError, TaskError};
pub use manager::TaskManager;
pub use registry::{TaskEvent, TaskRegistry};
pub use restore::RestoreReport;
pub use scheduler::{PollingScheduler, TickFlow, TickHandler, TimerHandle};
pub use store::{FileKvStore, KvStore, MemoryKvStore, Namespace, PersistedRecord, PersistentTaskStore};
pub use timings::{PollPolicy, TaskTimings};
