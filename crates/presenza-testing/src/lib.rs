//! Test infrastructure and utilities for deterministic testing.
//!
//! Wires the attendance workflow components to in-memory ports and a
//! controllable clock, so integration tests drive complete session
//! lifecycles without a database or an SMTP relay. Fixture builders and
//! ready-made scenarios cover the data those tests need.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{sync::Arc, time::SystemTime};

use chrono::{DateTime, Utc};
use presenza_core::models::ClassId;
use presenza_workflow::{
    notify::mock::MockNotifier,
    roster::{mock::MockRoster, Recipient},
    storage::mock::MockWorkflowStorage,
    AttendanceRecordStore, AttendanceSessionManager, SigningRequestWorkflow,
};

pub mod fixtures;

pub use fixtures::{base_date, base_time, scenarios, RecipientBuilder, SessionBuilder};
pub use presenza_core::{Clock, RealClock, TestClock};

/// Fully mocked environment for workflow integration tests.
///
/// Every component shares the same in-memory storage, notifier, roster and
/// clock, so a test can seed state, drive the public surface and inspect
/// each side effect through the mock handles.
pub struct TestContext {
    /// In-memory storage shared by every component.
    pub storage: Arc<MockWorkflowStorage>,
    /// Captures each notification the components send.
    pub notifier: Arc<MockNotifier>,
    /// Enrollment source consulted at create and launch.
    pub roster: Arc<MockRoster>,
    /// Controllable wall clock shared by every component.
    pub clock: TestClock,
    /// Session manager under test.
    pub manager: AttendanceSessionManager,
    /// Record store under test.
    pub records: AttendanceRecordStore,
}

impl TestContext {
    /// Creates a context with the clock pinned to [`fixtures::base_time`].
    pub fn new() -> Self {
        Self::starting_at(fixtures::base_time())
    }

    /// Creates a context with the clock pinned to `start`.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        let storage = Arc::new(MockWorkflowStorage::new());
        let notifier = Arc::new(MockNotifier::new());
        let roster = Arc::new(MockRoster::new());
        let clock = TestClock::starting_at(SystemTime::from(start));

        let manager = AttendanceSessionManager::new(
            storage.clone(),
            roster.clone(),
            notifier.clone(),
            Arc::new(clock.clone()),
        );
        let records = AttendanceRecordStore::new(storage.clone(), Arc::new(clock.clone()));

        Self {
            storage,
            notifier,
            roster,
            clock,
            manager,
            records,
        }
    }

    /// The request workflow wired to the same ports as the manager.
    pub fn workflow(&self) -> &SigningRequestWorkflow {
        self.manager.workflow()
    }

    /// Registers a roster of `n` generated recipients under a fresh class
    /// and returns both.
    pub async fn seed_class(&self, n: usize) -> (ClassId, Vec<Recipient>) {
        let class_id = ClassId::new();
        let roster = fixtures::scenarios::class_roster(n);
        self.roster.set_roster(class_id, roster.clone()).await;
        (class_id, roster)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
