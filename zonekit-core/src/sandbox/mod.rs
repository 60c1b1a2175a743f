//! Progression sandboxing.
//!
//! ```text
//!  enter ─► capture ─► baseline rows ─► store ─► CSV (+gzip)
//!                                         │
//!  exit  ─► capture ─► diff ─► delta rows ┴─► journal (JSONL)
//!                                │
//!                                └─► cleanup ─► restore ─► validate
//! ```
//!
//! - [`capture`]: reads progression components and zone entities from the host.
//! - [`diff`]: pure component, tech and entity set differences.
//! - [`persistence`]: CSV baseline/delta files.
//! - [`restore`]: rollback, entity cleanup and validation.
//! - [`session`]: the coordinator wiring all of it into lifecycle steps.

pub mod capture;
pub mod diff;
pub mod journal;
pub mod persistence;
pub mod restore;
pub mod session;
pub mod snapshot;
pub mod store;

pub use capture::{
    DEFAULT_PROGRESSION_KEYWORDS, SnapshotCaptureService, build_baseline_rows, build_snapshot_id,
    payload_hash, session_row,
};
pub use diff::{
    DEFAULT_TECH_MARKERS, collect_tech_ids, compute_component_delta, compute_entity_delta,
    extract_opened_tech, extract_opened_tech_with,
};
pub use journal::{JournalEntry, JournalEvent, JournalOp, ProgressionJournal};
pub use persistence::{read_baseline, read_delta, write_baseline, write_delta};
pub use restore::{CleanupReport, ProgressionRestoreService, RestoreReport, RestoreValidation};
pub use session::{SandboxCoordinator, SandboxEnterStep, SandboxExitStep, SandboxOutcome};
pub use snapshot::{
    BaselineRow, BaselineRowType, ComponentState, DeltaKind, DeltaRow, SandboxProgressionSnapshot,
    SnapshotStamp, ZoneEntityEntry,
};
pub use store::{SandboxSession, SandboxSnapshotStore};
