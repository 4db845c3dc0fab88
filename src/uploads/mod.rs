mod session;
pub use session::ChunkInfo;
pub use session::SessionState;
pub use session::UploadSession;
pub use session::{MAX_CHUNK_SIZE, MAX_FILE_SIZE, MIN_CHUNK_SIZE};

mod table;
pub use table::SessionJanitor;
pub use table::SessionTable;
pub use table::SESSION_SWEEP_PERIOD;

mod coordinator;
pub use coordinator::CancelOutcome;
pub use coordinator::ChunkOutcome;
pub use coordinator::CompleteReceipt;
pub use coordinator::FinalizeOutcome;
pub use coordinator::InitReceipt;
pub use coordinator::UploadCoordinator;
