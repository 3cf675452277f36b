pub mod projection;
pub mod reader;
pub mod worker;

pub use projection::{Projection, SearchDocument, SearchProjection};
pub use reader::{RecordReader, ShardedRecordReader};
pub use worker::{DeliveryPolicy, SyncWorker, WorkerState, WorkerStats};
