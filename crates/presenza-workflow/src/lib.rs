//! Attendance attestation workflow over geofenced signing requests.
//!
//! This crate implements the session lifecycle that turns a class roster
//! into single-use signing requests, resolves incoming attestations against
//! deadline and geofence gates, and settles everything left open when the
//! session closes.
//!
//! # Architecture
//!
//! Components talk to persistence through the [`WorkflowStorage`] port, to
//! mail through the [`notify::Notifier`] port, and to enrollment through the
//! [`roster::RosterProvider`] port, so the whole surface runs against
//! PostgreSQL and SMTP in production and against in-memory mocks in tests.
//! A launch-to-close pass looks like this:
//!
//! 1. **Launch** - expand the class roster into pending signing requests
//! 2. **Notify** - fan invitation mail out to every issued request
//! 3. **Resolve** - check deadline and geofence, then write the attendance
//!    record and flip the request to signed in one transaction
//! 4. **Close** - expire whatever is still pending and seal the session
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use presenza_core::{storage::Storage, RealClock};
//! use presenza_workflow::{
//!     notify::NoopNotifier, roster::PostgresRosterProvider,
//!     storage::PostgresWorkflowStorage, AttendanceSessionManager,
//! };
//! use sqlx::PgPool;
//!
//! # async fn example(pool: PgPool) {
//! let storage = Arc::new(Storage::new(pool.clone()));
//! let manager = AttendanceSessionManager::new(
//!     Arc::new(PostgresWorkflowStorage::new(storage)),
//!     Arc::new(PostgresRosterProvider::new(pool)),
//!     Arc::new(NoopNotifier),
//!     Arc::new(RealClock),
//! );
//! # let _ = manager;
//! # }
//! ```

pub mod error;
pub mod notify;
pub mod records;
pub mod roster;
pub mod session;
pub mod storage;
pub mod token;
pub mod workflow;

// Re-export main public API
pub use error::{Result, WorkflowError};
pub use records::AttendanceRecordStore;
pub use session::{AttendanceSessionManager, CancelOutcome, CloseOutcome, LaunchOutcome};
pub use storage::WorkflowStorage;
pub use workflow::{
    AttestationSubmission, IssueFailure, IssueOutcome, ResolvedAttestation, SigningRequestWorkflow,
};

/// Default geofence radius in meters for new sessions.
pub const DEFAULT_ALLOWED_RADIUS_M: f64 = 100.0;

/// Length of each random token segment.
pub const TOKEN_SEGMENT_LEN: usize = 6;
