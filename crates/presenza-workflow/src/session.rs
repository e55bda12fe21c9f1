//! Session lifecycle: create, launch, close, cancel, bulk re-send.
//!
//! The manager owns the session state machine and its fan-out points. A
//! launch snapshots the eligible roster once, issues the whole batch through
//! the request workflow and only then flips the session, so a launch that
//! loses a race leaves the winner's requests untouched. Close and cancel run
//! as single transactions in storage and are idempotent when repeated.

use std::sync::Arc;

use futures::future::join_all;
use presenza_core::{
    geo::GeoPoint,
    models::{
        AttendanceSession, ClassId, NewAttendanceSession, RequestStatus, SessionId, SessionStatus,
        SigningRequest,
    },
    time::Clock,
};
use tracing::{info, warn};

use crate::{
    error::{Result, WorkflowError},
    notify::{NotificationOutcome, Notifier},
    roster::RosterProvider,
    storage::WorkflowStorage,
    workflow::{invitation, IssueFailure, IssueOutcome, SigningRequestWorkflow},
};

/// Outcome of launching a session.
#[derive(Debug)]
pub struct LaunchOutcome {
    /// The session in its active state.
    pub session: AttendanceSession,
    /// Requests issued as pending.
    pub issued: Vec<SigningRequest>,
    /// Recipients whose request could not be persisted.
    pub issue_failures: Vec<IssueFailure>,
    /// Invitation dispatch tallies; all zero when dispatch was off.
    pub notifications: NotificationOutcome,
}

/// Outcome of closing a session.
#[derive(Debug, Clone)]
pub struct CloseOutcome {
    /// The session in its closed state.
    pub session: AttendanceSession,
    /// Requests newly expired by this close; zero on a repeated close.
    pub expired_requests: u64,
}

/// Outcome of cancelling a session.
#[derive(Debug, Clone)]
pub struct CancelOutcome {
    /// The session in its cancelled state.
    pub session: AttendanceSession,
    /// Requests newly cancelled by this call; zero on a repeat.
    pub cancelled_requests: u64,
}

/// Coordinates attendance sessions and their signing requests.
#[derive(Clone)]
pub struct AttendanceSessionManager {
    storage: Arc<dyn WorkflowStorage>,
    roster: Arc<dyn RosterProvider>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    workflow: SigningRequestWorkflow,
}

impl AttendanceSessionManager {
    /// Creates a manager over the given ports and wires a request workflow
    /// to the same storage, notifier and clock.
    pub fn new(
        storage: Arc<dyn WorkflowStorage>,
        roster: Arc<dyn RosterProvider>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let workflow =
            SigningRequestWorkflow::new(storage.clone(), notifier.clone(), clock.clone());
        Self {
            storage,
            roster,
            notifier,
            clock,
            workflow,
        }
    }

    /// The request workflow wired to the same ports.
    pub fn workflow(&self) -> &SigningRequestWorkflow {
        &self.workflow
    }

    /// Validates and persists a draft session.
    ///
    /// The expected-recipient count is a snapshot of the current enrollment;
    /// launch freezes the authoritative number later.
    pub async fn create(&self, new: NewAttendanceSession) -> Result<AttendanceSession> {
        if new.title.trim().is_empty() {
            return Err(WorkflowError::validation("session title is empty"));
        }
        if !new.allowed_radius_m.is_finite() || new.allowed_radius_m <= 0.0 {
            return Err(WorkflowError::validation(format!(
                "allowed radius must be positive, got {}",
                new.allowed_radius_m
            )));
        }
        let now = self.clock.now_utc();
        if new.closes_at <= now {
            return Err(WorkflowError::validation("session deadline is in the past"));
        }
        if let (Some(starts), Some(ends)) = (new.starts_at, new.ends_at) {
            if ends <= starts {
                return Err(WorkflowError::validation(
                    "session window ends before it starts",
                ));
            }
        }
        if let Some(point) = new.reference_point {
            GeoPoint::new(point.latitude, point.longitude)?;
        }

        let expected = self.roster.eligible_recipients(new.class_id).await?.len();
        let session =
            AttendanceSession::draft(new, i32::try_from(expected).unwrap_or(i32::MAX), now);
        let session = self.storage.create_session(session).await?;
        info!(session_id = %session.id, class_id = %session.class_id, "created draft session");
        Ok(session)
    }

    /// Launches a draft session.
    ///
    /// Snapshots the eligible roster once, issues one request per recipient
    /// (manual sessions activate without issuing), freezes the expected
    /// count at the roster size and flips the session to active. When
    /// `notify` is set, one invitation per issued request is dispatched
    /// concurrently; dispatch failures are tallied, never fatal. An empty
    /// roster launches cleanly with nothing issued.
    pub async fn launch(&self, session_id: SessionId, notify: bool) -> Result<LaunchOutcome> {
        let session = self
            .storage
            .find_session(session_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("session {session_id}")))?;
        if !session.status.can_transition_to(SessionStatus::Active) {
            return Err(WorkflowError::conflict(format!(
                "session is already {}",
                session.status
            )));
        }

        let roster = self.roster.eligible_recipients(session.class_id).await?;

        let outcome = if session.mode.issues_requests() {
            self.workflow.issue(&session, &roster).await
        } else {
            IssueOutcome::default()
        };

        let now = self.clock.now_utc();
        let Some(session) = self
            .storage
            .mark_session_launched(
                session_id,
                i32::try_from(roster.len()).unwrap_or(i32::MAX),
                now,
            )
            .await?
        else {
            // A concurrent launch won the flip; its requests stand and ours
            // were rejected by the uniqueness backstop.
            return match self.storage.find_session(session_id).await? {
                Some(current) => Err(WorkflowError::conflict(format!(
                    "session is already {}",
                    current.status
                ))),
                None => Err(WorkflowError::not_found(format!("session {session_id}"))),
            };
        };

        let notifications = if notify && !outcome.issued.is_empty() {
            self.dispatch_invitations(&session, &outcome.issued).await
        } else {
            NotificationOutcome::default()
        };

        info!(
            session_id = %session.id,
            issued = outcome.issued.len(),
            failed = outcome.failed.len(),
            notified = notifications.succeeded,
            "launched session"
        );
        Ok(LaunchOutcome {
            session,
            issued: outcome.issued,
            issue_failures: outcome.failed,
            notifications,
        })
    }

    /// Closes an active session, expiring its pending requests in the same
    /// transaction. Closing an already closed session is an idempotent no-op
    /// with zero newly expired requests.
    pub async fn close(&self, session_id: SessionId) -> Result<CloseOutcome> {
        let now = self.clock.now_utc();
        if let Some((session, expired)) = self.storage.close_session(session_id, now).await? {
            info!(session_id = %session.id, expired, "closed session");
            return Ok(CloseOutcome {
                session,
                expired_requests: expired,
            });
        }
        match self.storage.find_session(session_id).await? {
            Some(session) if session.status == SessionStatus::Closed => Ok(CloseOutcome {
                session,
                expired_requests: 0,
            }),
            Some(session) => Err(WorkflowError::conflict(format!(
                "cannot close a {} session",
                session.status
            ))),
            None => Err(WorkflowError::not_found(format!("session {session_id}"))),
        }
    }

    /// Cancels a draft or active session, cancelling its pending requests in
    /// the same transaction. Repeating a cancel is an idempotent no-op.
    pub async fn cancel(&self, session_id: SessionId) -> Result<CancelOutcome> {
        let now = self.clock.now_utc();
        if let Some((session, cancelled)) = self.storage.cancel_session(session_id, now).await? {
            info!(session_id = %session.id, cancelled, "cancelled session");
            return Ok(CancelOutcome {
                session,
                cancelled_requests: cancelled,
            });
        }
        match self.storage.find_session(session_id).await? {
            Some(session) if session.status == SessionStatus::Cancelled => Ok(CancelOutcome {
                session,
                cancelled_requests: 0,
            }),
            Some(session) => Err(WorkflowError::conflict(format!(
                "cannot cancel a {} session",
                session.status
            ))),
            None => Err(WorkflowError::not_found(format!("session {session_id}"))),
        }
    }

    /// Re-sends the invitation to every still-pending request of an active
    /// session, all sends concurrent. Per-request failures are tallied.
    pub async fn remind_pending(&self, session_id: SessionId) -> Result<NotificationOutcome> {
        let session = self
            .storage
            .find_session(session_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("session {session_id}")))?;
        if session.status != SessionStatus::Active {
            return Err(WorkflowError::conflict(format!(
                "cannot remind for a {} session",
                session.status
            )));
        }

        let pending: Vec<SigningRequest> = self
            .storage
            .list_requests(session_id)
            .await?
            .into_iter()
            .filter(|request| request.status == RequestStatus::Pending)
            .collect();

        let reminders = pending.iter().map(|request| {
            let workflow = self.workflow.clone();
            let request_id = request.id;
            async move { workflow.remind(request_id).await }
        });

        let mut outcome = NotificationOutcome {
            total: pending.len(),
            ..NotificationOutcome::default()
        };
        for result in join_all(reminders).await {
            match result {
                Ok(_) => outcome.succeeded += 1,
                Err(error) => {
                    warn!(error = %error, "reminder dispatch failed");
                    outcome.failed += 1;
                }
            }
        }
        Ok(outcome)
    }

    /// Fetches a session by identifier.
    pub async fn find(&self, session_id: SessionId) -> Result<AttendanceSession> {
        self.storage
            .find_session(session_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("session {session_id}")))
    }

    /// Lists the sessions of a class, newest first.
    pub async fn list_for_class(&self, class_id: ClassId) -> Result<Vec<AttendanceSession>> {
        Ok(self.storage.list_sessions_for_class(class_id).await?)
    }

    async fn dispatch_invitations(
        &self,
        session: &AttendanceSession,
        requests: &[SigningRequest],
    ) -> NotificationOutcome {
        let sends = requests.iter().map(|request| {
            let notification = invitation(session, request, false);
            let notifier = self.notifier.clone();
            async move { notifier.send(&notification).await }
        });

        let mut outcome = NotificationOutcome {
            total: requests.len(),
            ..NotificationOutcome::default()
        };
        for result in join_all(sends).await {
            match result {
                Ok(()) => outcome.succeeded += 1,
                Err(error) => {
                    warn!(error = %error, "invitation dispatch failed");
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }
}
