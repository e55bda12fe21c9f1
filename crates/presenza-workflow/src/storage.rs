//! Storage abstraction layer for the attestation workflow.
//!
//! Provides trait-based abstractions over storage operations to enable
//! testability without database dependencies. Production implementations
//! use the concrete `presenza_core::storage::Storage` while tests can
//! provide mock implementations for deterministic behavior validation.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, NaiveDate, Utc};
use presenza_core::{
    error::Result,
    models::{
        AttendanceRecord, AttendanceSession, ClassId, NewAttendanceRecord, RequestId, SessionId,
        SignatureCapture, SigningRequest, StatusCounts, StudentId,
    },
};

/// Storage operations required by the attestation workflow.
///
/// This trait abstracts all database operations needed by the session,
/// request, and record components, enabling both production PostgreSQL
/// implementations and lightweight test doubles. The separation allows
/// testing lifecycle logic, geofence gating, and error handling without
/// database overhead.
pub trait WorkflowStorage: Send + Sync + 'static {
    /// Persists a draft session.
    fn create_session(
        &self,
        session: AttendanceSession,
    ) -> Pin<Box<dyn Future<Output = Result<AttendanceSession>> + Send + '_>>;

    /// Finds a session by identifier.
    fn find_session(
        &self,
        session_id: SessionId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<AttendanceSession>>> + Send + '_>>;

    /// Lists the sessions of a class, newest first.
    fn list_sessions_for_class(
        &self,
        class_id: ClassId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<AttendanceSession>>> + Send + '_>>;

    /// Flips a draft session to active, freezing the expected roster size.
    ///
    /// Conditional on the draft status so concurrent launches settle on
    /// exactly one winner; returns `None` when the flip found no draft.
    fn mark_session_launched(
        &self,
        session_id: SessionId,
        total_expected: i32,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<AttendanceSession>>> + Send + '_>>;

    /// Expires every pending request of an active session and flips the
    /// session to closed, as one transaction.
    ///
    /// Returns the closed session and the number of requests expired, or
    /// `None` without writing anything when the session is not active.
    fn close_session(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<(AttendanceSession, u64)>>> + Send + '_>>;

    /// Cancels every pending request of a draft or active session and flips
    /// the session to cancelled, as one transaction.
    fn cancel_session(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<(AttendanceSession, u64)>>> + Send + '_>>;

    /// Persists a pending signing request.
    ///
    /// The unique indexes on the token and on (session, student) are
    /// enforced here; violations surface as constraint errors.
    fn create_request(
        &self,
        request: SigningRequest,
    ) -> Pin<Box<dyn Future<Output = Result<SigningRequest>> + Send + '_>>;

    /// Finds a request by identifier.
    fn find_request(
        &self,
        request_id: RequestId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SigningRequest>>> + Send + '_>>;

    /// Finds a request by its signing token.
    fn find_request_by_token<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SigningRequest>>> + Send + 'a>>;

    /// Lists every request of a session in creation order.
    fn list_requests(
        &self,
        session_id: SessionId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SigningRequest>>> + Send + '_>>;

    /// Writes the attendance record and flips the pending request to signed
    /// as one transaction, record first.
    ///
    /// Returns `None` without any visible write when the request is no
    /// longer pending, which is how a lost resolve race is detected.
    fn finalize_attestation(
        &self,
        request_id: RequestId,
        record: NewAttendanceRecord,
        capture: SignatureCapture,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<(SigningRequest, AttendanceRecord)>>> + Send + '_>>;

    /// Flips a pending request to declined; `None` when no longer pending.
    fn mark_request_declined(
        &self,
        request_id: RequestId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SigningRequest>>> + Send + '_>>;

    /// Flips a pending request to cancelled; `None` when no longer pending.
    fn mark_request_cancelled(
        &self,
        request_id: RequestId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SigningRequest>>> + Send + '_>>;

    /// Increments the reminder counter of a pending request and stamps the
    /// send time; `None` when no longer pending.
    fn record_reminder(
        &self,
        request_id: RequestId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SigningRequest>>> + Send + '_>>;

    /// Expires every pending request of a session, returning how many rows
    /// changed. Idempotent.
    fn expire_pending_requests(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>>;

    /// Upserts one attendance record, last write wins on the composite key.
    fn upsert_record(
        &self,
        record: NewAttendanceRecord,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<AttendanceRecord>> + Send + '_>>;

    /// Upserts a batch of attendance records; all rows commit together or
    /// none do.
    fn upsert_records(
        &self,
        records: Vec<NewAttendanceRecord>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<AttendanceRecord>>> + Send + '_>>;

    /// Per-status tallies for one student, optionally narrowed by class and
    /// inclusive date range.
    fn student_status_counts(
        &self,
        student_id: StudentId,
        class_id: Option<ClassId>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Pin<Box<dyn Future<Output = Result<StatusCounts>> + Send + '_>>;

    /// Per-status tallies for one class on one date.
    fn class_status_counts(
        &self,
        class_id: ClassId,
        date: NaiveDate,
    ) -> Pin<Box<dyn Future<Output = Result<StatusCounts>> + Send + '_>>;
}

/// Production storage implementation using PostgreSQL.
///
/// Wraps the concrete `presenza_core::storage::Storage` to implement the
/// `WorkflowStorage` trait. All database operations go through the
/// repository pattern for consistency and type safety.
pub struct PostgresWorkflowStorage {
    storage: Arc<presenza_core::storage::Storage>,
}

impl PostgresWorkflowStorage {
    /// Creates a new PostgreSQL storage adapter.
    pub fn new(storage: Arc<presenza_core::storage::Storage>) -> Self {
        Self { storage }
    }
}

impl WorkflowStorage for PostgresWorkflowStorage {
    fn create_session(
        &self,
        session: AttendanceSession,
    ) -> Pin<Box<dyn Future<Output = Result<AttendanceSession>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.sessions.create(&session).await })
    }

    fn find_session(
        &self,
        session_id: SessionId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<AttendanceSession>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.sessions.find_by_id(session_id).await })
    }

    fn list_sessions_for_class(
        &self,
        class_id: ClassId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<AttendanceSession>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.sessions.find_by_class(class_id).await })
    }

    fn mark_session_launched(
        &self,
        session_id: SessionId,
        total_expected: i32,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<AttendanceSession>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.sessions.mark_launched(session_id, total_expected, now).await })
    }

    fn close_session(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<(AttendanceSession, u64)>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.close_session(session_id, now).await })
    }

    fn cancel_session(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<(AttendanceSession, u64)>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.cancel_session(session_id, now).await })
    }

    fn create_request(
        &self,
        request: SigningRequest,
    ) -> Pin<Box<dyn Future<Output = Result<SigningRequest>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.signing_requests.create(&request).await })
    }

    fn find_request(
        &self,
        request_id: RequestId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SigningRequest>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.signing_requests.find_by_id(request_id).await })
    }

    fn find_request_by_token<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SigningRequest>>> + Send + 'a>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.signing_requests.find_by_token(token).await })
    }

    fn list_requests(
        &self,
        session_id: SessionId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SigningRequest>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.signing_requests.find_by_session(session_id).await })
    }

    fn finalize_attestation(
        &self,
        request_id: RequestId,
        record: NewAttendanceRecord,
        capture: SignatureCapture,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<(SigningRequest, AttendanceRecord)>>> + Send + '_>>
    {
        let storage = self.storage.clone();
        Box::pin(async move { storage.finalize_attestation(request_id, &record, &capture, now).await })
    }

    fn mark_request_declined(
        &self,
        request_id: RequestId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SigningRequest>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.signing_requests.mark_declined(request_id, now).await })
    }

    fn mark_request_cancelled(
        &self,
        request_id: RequestId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SigningRequest>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.signing_requests.mark_cancelled(request_id, now).await })
    }

    fn record_reminder(
        &self,
        request_id: RequestId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SigningRequest>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.signing_requests.record_reminder(request_id, now).await })
    }

    fn expire_pending_requests(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.signing_requests.expire_pending(session_id, now).await })
    }

    fn upsert_record(
        &self,
        record: NewAttendanceRecord,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<AttendanceRecord>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.attendance_records.upsert(&record, now).await })
    }

    fn upsert_records(
        &self,
        records: Vec<NewAttendanceRecord>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<AttendanceRecord>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.attendance_records.upsert_many(&records, now).await })
    }

    fn student_status_counts(
        &self,
        student_id: StudentId,
        class_id: Option<ClassId>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Pin<Box<dyn Future<Output = Result<StatusCounts>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage.attendance_records.status_counts(student_id, class_id, from, to).await
        })
    }

    fn class_status_counts(
        &self,
        class_id: ClassId,
        date: NaiveDate,
    ) -> Pin<Box<dyn Future<Output = Result<StatusCounts>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.attendance_records.class_status_counts(class_id, date).await })
    }
}

pub mod mock {
    //! Mock storage implementation for testing.
    //!
    //! Provides deterministic, in-memory storage for testing workflow logic
    //! without database dependencies. Mirrors the conditional flips, the
    //! uniqueness backstops, and the transactional pairing of the Postgres
    //! adapter, and supports injecting failures at the two spots tests need
    //! to break: request creation and the gap between the two finalize
    //! writes.

    use std::{
        collections::{HashMap, HashSet},
        future::Future,
        pin::Pin,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    };

    use chrono::{DateTime, NaiveDate, Utc};
    use presenza_core::{
        error::Result,
        models::{AttendanceStatus, RecordId, RequestStatus, SessionStatus},
        CoreError,
    };
    use tokio::sync::RwLock;

    use super::{
        AttendanceRecord, AttendanceSession, ClassId, NewAttendanceRecord, RequestId, SessionId,
        SignatureCapture, SigningRequest, StatusCounts, StudentId, WorkflowStorage,
    };

    /// Composite identity of an attendance record.
    type RecordKey = (StudentId, ClassId, Option<SessionId>, NaiveDate);

    /// Mock storage for testing workflow logic without a database.
    ///
    /// Stores data in-memory with configurable behavior. Supports injecting
    /// failures, seeding state directly, and verifying outcomes.
    pub struct MockWorkflowStorage {
        sessions: Arc<RwLock<HashMap<SessionId, AttendanceSession>>>,
        requests: Arc<RwLock<HashMap<RequestId, SigningRequest>>>,
        records: Arc<RwLock<HashMap<RecordKey, AttendanceRecord>>>,
        failing_recipients: Arc<RwLock<HashSet<String>>>,
        crash_after_record_write: Arc<AtomicBool>,
    }

    impl MockWorkflowStorage {
        /// Creates a new mock storage with empty state.
        pub fn new() -> Self {
            Self {
                sessions: Arc::new(RwLock::new(HashMap::new())),
                requests: Arc::new(RwLock::new(HashMap::new())),
                records: Arc::new(RwLock::new(HashMap::new())),
                failing_recipients: Arc::new(RwLock::new(HashSet::new())),
                crash_after_record_write: Arc::new(AtomicBool::new(false)),
            }
        }

        /// Seeds a session directly, bypassing validation.
        pub async fn add_session(&self, session: AttendanceSession) {
            self.sessions.write().await.insert(session.id, session);
        }

        /// Seeds a request directly, bypassing the uniqueness backstops.
        pub async fn add_request(&self, request: SigningRequest) {
            self.requests.write().await.insert(request.id, request);
        }

        /// Makes request creation fail for one recipient address.
        pub async fn inject_create_failure(&self, email: impl Into<String>) {
            self.failing_recipients.write().await.insert(email.into());
        }

        /// Makes the next finalize fail after the record write, leaving the
        /// request pending. One-shot.
        pub fn inject_crash_after_record_write(&self) {
            self.crash_after_record_write.store(true, Ordering::SeqCst);
        }

        /// Current status of a session, if it exists.
        pub async fn session_status(&self, session_id: SessionId) -> Option<SessionStatus> {
            self.sessions.read().await.get(&session_id).map(|s| s.status)
        }

        /// Current status of a request, if it exists.
        pub async fn request_status(&self, request_id: RequestId) -> Option<RequestStatus> {
            self.requests.read().await.get(&request_id).map(|r| r.status)
        }

        /// Number of requests belonging to a session.
        pub async fn request_count(&self, session_id: SessionId) -> usize {
            self.requests.read().await.values().filter(|r| r.session_id == session_id).count()
        }

        /// Number of attendance records stored.
        pub async fn record_count(&self) -> usize {
            self.records.read().await.len()
        }
    }

    impl Default for MockWorkflowStorage {
        fn default() -> Self {
            Self::new()
        }
    }

    fn record_key(record: &NewAttendanceRecord) -> RecordKey {
        (record.student_id, record.class_id, record.session_id, record.date)
    }

    /// Applies one upsert, preserving identity and creation time on conflict
    /// the way `ON CONFLICT DO UPDATE` does.
    fn upsert_into(
        records: &mut HashMap<RecordKey, AttendanceRecord>,
        record: &NewAttendanceRecord,
        now: DateTime<Utc>,
    ) -> AttendanceRecord {
        let key = record_key(record);
        let (id, created_at) = records
            .get(&key)
            .map_or((RecordId::new(), now), |existing| (existing.id, existing.created_at));
        let stored = AttendanceRecord {
            id,
            student_id: record.student_id,
            class_id: record.class_id,
            session_id: record.session_id,
            date: record.date,
            status: record.status,
            late_minutes: record.late_minutes,
            signature_url: record.signature_url.clone(),
            location: record.location,
            location_accuracy: record.location_accuracy,
            location_verified: record.location_verified,
            marked_by: record.marked_by.clone(),
            notes: record.notes.clone(),
            created_at,
            updated_at: now,
        };
        records.insert(key, stored.clone());
        stored
    }

    /// Puts a key back to its pre-transaction value.
    fn restore(
        records: &mut HashMap<RecordKey, AttendanceRecord>,
        key: RecordKey,
        previous: Option<AttendanceRecord>,
    ) {
        match previous {
            Some(record) => {
                records.insert(key, record);
            },
            None => {
                records.remove(&key);
            },
        }
    }

    fn tally<'a>(records: impl Iterator<Item = &'a AttendanceRecord>) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for record in records {
            counts.total += 1;
            match record.status {
                AttendanceStatus::Present => counts.present += 1,
                AttendanceStatus::Absent => counts.absent += 1,
                AttendanceStatus::Late => counts.late += 1,
                AttendanceStatus::Excused => counts.excused += 1,
            }
        }
        counts
    }

    impl WorkflowStorage for MockWorkflowStorage {
        fn create_session(
            &self,
            session: AttendanceSession,
        ) -> Pin<Box<dyn Future<Output = Result<AttendanceSession>> + Send + '_>> {
            let sessions = self.sessions.clone();
            Box::pin(async move {
                sessions.write().await.insert(session.id, session.clone());
                Ok(session)
            })
        }

        fn find_session(
            &self,
            session_id: SessionId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<AttendanceSession>>> + Send + '_>> {
            let sessions = self.sessions.clone();
            Box::pin(async move { Ok(sessions.read().await.get(&session_id).cloned()) })
        }

        fn list_sessions_for_class(
            &self,
            class_id: ClassId,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<AttendanceSession>>> + Send + '_>> {
            let sessions = self.sessions.clone();
            Box::pin(async move {
                let mut matching: Vec<AttendanceSession> = sessions
                    .read()
                    .await
                    .values()
                    .filter(|s| s.class_id == class_id)
                    .cloned()
                    .collect();
                matching.sort_by(|a, b| {
                    b.date.cmp(&a.date).then_with(|| b.created_at.cmp(&a.created_at))
                });
                Ok(matching)
            })
        }

        fn mark_session_launched(
            &self,
            session_id: SessionId,
            total_expected: i32,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<Option<AttendanceSession>>> + Send + '_>> {
            let sessions = self.sessions.clone();
            Box::pin(async move {
                let mut sessions = sessions.write().await;
                let Some(session) = sessions.get_mut(&session_id) else {
                    return Ok(None);
                };
                if session.status != SessionStatus::Draft {
                    return Ok(None);
                }
                session.status = SessionStatus::Active;
                session.total_expected = total_expected;
                session.launched_at = Some(now);
                session.updated_at = now;
                Ok(Some(session.clone()))
            })
        }

        fn close_session(
            &self,
            session_id: SessionId,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<Option<(AttendanceSession, u64)>>> + Send + '_>>
        {
            let sessions = self.sessions.clone();
            let requests = self.requests.clone();
            Box::pin(async move {
                let mut sessions = sessions.write().await;
                let Some(session) = sessions.get_mut(&session_id) else {
                    return Ok(None);
                };
                if session.status != SessionStatus::Active {
                    return Ok(None);
                }
                let mut requests = requests.write().await;
                let mut expired = 0u64;
                for request in requests.values_mut() {
                    if request.session_id == session_id && request.status == RequestStatus::Pending
                    {
                        request.status = RequestStatus::Expired;
                        request.updated_at = now;
                        expired += 1;
                    }
                }
                session.status = SessionStatus::Closed;
                session.closed_at = Some(now);
                session.updated_at = now;
                Ok(Some((session.clone(), expired)))
            })
        }

        fn cancel_session(
            &self,
            session_id: SessionId,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<Option<(AttendanceSession, u64)>>> + Send + '_>>
        {
            let sessions = self.sessions.clone();
            let requests = self.requests.clone();
            Box::pin(async move {
                let mut sessions = sessions.write().await;
                let Some(session) = sessions.get_mut(&session_id) else {
                    return Ok(None);
                };
                if !matches!(session.status, SessionStatus::Draft | SessionStatus::Active) {
                    return Ok(None);
                }
                let mut requests = requests.write().await;
                let mut cancelled = 0u64;
                for request in requests.values_mut() {
                    if request.session_id == session_id && request.status == RequestStatus::Pending
                    {
                        request.status = RequestStatus::Cancelled;
                        request.updated_at = now;
                        cancelled += 1;
                    }
                }
                session.status = SessionStatus::Cancelled;
                session.closed_at = Some(now);
                session.updated_at = now;
                Ok(Some((session.clone(), cancelled)))
            })
        }

        fn create_request(
            &self,
            request: SigningRequest,
        ) -> Pin<Box<dyn Future<Output = Result<SigningRequest>> + Send + '_>> {
            let requests = self.requests.clone();
            let failing = self.failing_recipients.clone();
            Box::pin(async move {
                if failing.read().await.contains(&request.recipient_email) {
                    return Err(CoreError::Database(format!(
                        "injected create failure for {}",
                        request.recipient_email
                    )));
                }
                let mut requests = requests.write().await;
                let duplicate = requests.values().any(|existing| {
                    existing.token == request.token
                        || (existing.session_id == request.session_id
                            && existing.student_id == request.student_id)
                });
                if duplicate {
                    return Err(CoreError::ConstraintViolation(format!(
                        "unique constraint violation: request for student {} in session {}",
                        request.student_id, request.session_id
                    )));
                }
                requests.insert(request.id, request.clone());
                Ok(request)
            })
        }

        fn find_request(
            &self,
            request_id: RequestId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<SigningRequest>>> + Send + '_>> {
            let requests = self.requests.clone();
            Box::pin(async move { Ok(requests.read().await.get(&request_id).cloned()) })
        }

        fn find_request_by_token<'a>(
            &'a self,
            token: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<Option<SigningRequest>>> + Send + 'a>> {
            let requests = self.requests.clone();
            Box::pin(async move {
                Ok(requests.read().await.values().find(|r| r.token == token).cloned())
            })
        }

        fn list_requests(
            &self,
            session_id: SessionId,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<SigningRequest>>> + Send + '_>> {
            let requests = self.requests.clone();
            Box::pin(async move {
                let mut matching: Vec<SigningRequest> = requests
                    .read()
                    .await
                    .values()
                    .filter(|r| r.session_id == session_id)
                    .cloned()
                    .collect();
                // Token is the tiebreak so batches issued in one instant come
                // back in a stable order.
                matching.sort_by(|a, b| {
                    a.created_at.cmp(&b.created_at).then_with(|| a.token.cmp(&b.token))
                });
                Ok(matching)
            })
        }

        fn finalize_attestation(
            &self,
            request_id: RequestId,
            record: NewAttendanceRecord,
            capture: SignatureCapture,
            now: DateTime<Utc>,
        ) -> Pin<
            Box<dyn Future<Output = Result<Option<(SigningRequest, AttendanceRecord)>>> + Send + '_>,
        > {
            let requests = self.requests.clone();
            let records = self.records.clone();
            let crash = self.crash_after_record_write.clone();
            Box::pin(async move {
                let mut records = records.write().await;
                let key = record_key(&record);
                let previous = records.get(&key).cloned();
                let stored = upsert_into(&mut records, &record, now);

                if crash.swap(false, Ordering::SeqCst) {
                    // The record write stays behind; the request is never
                    // touched, so a retry can still resolve it.
                    return Err(CoreError::Database(
                        "injected failure after record write".to_string(),
                    ));
                }

                let mut requests = requests.write().await;
                let Some(request) = requests.get_mut(&request_id) else {
                    restore(&mut records, key, previous);
                    return Ok(None);
                };
                if request.status != RequestStatus::Pending {
                    restore(&mut records, key, previous);
                    return Ok(None);
                }

                request.status = RequestStatus::Signed;
                request.signed_at = Some(now);
                request.attendance_record_id = Some(stored.id);
                request.signature_data = capture.signature_data;
                request.location = capture.location;
                request.location_accuracy = capture.location_accuracy;
                request.location_verified = capture.location_verified;
                request.ip_address = capture.ip_address;
                request.user_agent = capture.user_agent;
                request.updated_at = now;

                Ok(Some((request.clone(), stored)))
            })
        }

        fn mark_request_declined(
            &self,
            request_id: RequestId,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<Option<SigningRequest>>> + Send + '_>> {
            let requests = self.requests.clone();
            Box::pin(async move {
                let mut requests = requests.write().await;
                let Some(request) = requests.get_mut(&request_id) else {
                    return Ok(None);
                };
                if request.status != RequestStatus::Pending {
                    return Ok(None);
                }
                request.status = RequestStatus::Declined;
                request.updated_at = now;
                Ok(Some(request.clone()))
            })
        }

        fn mark_request_cancelled(
            &self,
            request_id: RequestId,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<Option<SigningRequest>>> + Send + '_>> {
            let requests = self.requests.clone();
            Box::pin(async move {
                let mut requests = requests.write().await;
                let Some(request) = requests.get_mut(&request_id) else {
                    return Ok(None);
                };
                if request.status != RequestStatus::Pending {
                    return Ok(None);
                }
                request.status = RequestStatus::Cancelled;
                request.updated_at = now;
                Ok(Some(request.clone()))
            })
        }

        fn record_reminder(
            &self,
            request_id: RequestId,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<Option<SigningRequest>>> + Send + '_>> {
            let requests = self.requests.clone();
            Box::pin(async move {
                let mut requests = requests.write().await;
                let Some(request) = requests.get_mut(&request_id) else {
                    return Ok(None);
                };
                if request.status != RequestStatus::Pending {
                    return Ok(None);
                }
                request.reminder_count += 1;
                request.last_reminder_at = Some(now);
                request.updated_at = now;
                Ok(Some(request.clone()))
            })
        }

        fn expire_pending_requests(
            &self,
            session_id: SessionId,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
            let requests = self.requests.clone();
            Box::pin(async move {
                let mut requests = requests.write().await;
                let mut expired = 0u64;
                for request in requests.values_mut() {
                    if request.session_id == session_id && request.status == RequestStatus::Pending
                    {
                        request.status = RequestStatus::Expired;
                        request.updated_at = now;
                        expired += 1;
                    }
                }
                Ok(expired)
            })
        }

        fn upsert_record(
            &self,
            record: NewAttendanceRecord,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<AttendanceRecord>> + Send + '_>> {
            let records = self.records.clone();
            Box::pin(async move { Ok(upsert_into(&mut *records.write().await, &record, now)) })
        }

        fn upsert_records(
            &self,
            new_records: Vec<NewAttendanceRecord>,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<AttendanceRecord>>> + Send + '_>> {
            let records = self.records.clone();
            Box::pin(async move {
                let mut records = records.write().await;
                let stored =
                    new_records.iter().map(|record| upsert_into(&mut records, record, now)).collect();
                Ok(stored)
            })
        }

        fn student_status_counts(
            &self,
            student_id: StudentId,
            class_id: Option<ClassId>,
            from: Option<NaiveDate>,
            to: Option<NaiveDate>,
        ) -> Pin<Box<dyn Future<Output = Result<StatusCounts>> + Send + '_>> {
            let records = self.records.clone();
            Box::pin(async move {
                let records = records.read().await;
                let counts = tally(records.values().filter(|record| {
                    record.student_id == student_id
                        && class_id.map_or(true, |c| record.class_id == c)
                        && from.map_or(true, |f| record.date >= f)
                        && to.map_or(true, |t| record.date <= t)
                }));
                Ok(counts)
            })
        }

        fn class_status_counts(
            &self,
            class_id: ClassId,
            date: NaiveDate,
        ) -> Pin<Box<dyn Future<Output = Result<StatusCounts>> + Send + '_>> {
            let records = self.records.clone();
            Box::pin(async move {
                let records = records.read().await;
                let counts = tally(
                    records
                        .values()
                        .filter(|record| record.class_id == class_id && record.date == date),
                );
                Ok(counts)
            })
        }
    }
}
