mod app;
mod error;
mod receive;
mod send;
mod sweeper;

pub use app::{build_router, AppState, Dependencies, HttpSettings};
pub use error::{DependencyStage, TransferError};
pub use receive::ReceiveWorkflow;
pub use send::{SendRequest, SendSettings, SendWorkflow, UploadedFile};
pub use sweeper::ExpirySweeper;
