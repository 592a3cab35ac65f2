mod delete;
mod sync;

pub use delete::{
    Confirmation, ConfirmedDeletion, DeletionPlan, DeletionPreview, DeletionReport,
};
pub use sync::{SyncReport, run_sync, sample_recent};
