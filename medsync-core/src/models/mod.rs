mod collection;
mod envelope;
mod mutation;
mod record;
mod sync_run;

pub use collection::Collection;
pub use envelope::{ApiEnvelope, ListPage, ListQuery, Pagination};
pub use mutation::{rewrite_id_references, MutationOp, MutationStatus, PendingMutation};
pub use record::{
    is_temporary_id, new_temporary_id, record_id, CachedRecord, TEMP_ID_PREFIX,
};
pub use sync_run::{SyncRun, SyncRunError};
