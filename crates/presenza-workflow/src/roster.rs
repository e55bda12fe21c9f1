//! Roster port and Postgres adapter.
//!
//! Launch expands a class roster into signing requests. The roster itself is
//! owned by the surrounding product, so components read it through the
//! [`RosterProvider`] port: one query at launch time returning every
//! enrollment that can actually receive a request.

use async_trait::async_trait;
use presenza_core::{error::Result, ClassId, CoreError, StudentId};
use sqlx::PgPool;

/// One launchable roster entry.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Recipient {
    /// Student behind the enrollment.
    pub student_id: StudentId,

    /// Display name used in notifications.
    pub name: String,

    /// Address notifications go to.
    pub email: String,
}

/// Source of launch-eligible recipients for a class.
#[async_trait]
pub trait RosterProvider: Send + Sync + std::fmt::Debug {
    /// Returns the recipients eligible for signing requests.
    ///
    /// Eligible means the enrollment is confirmed or active and carries a
    /// usable address; everyone else is silently excluded.
    ///
    /// # Errors
    ///
    /// Returns error if the roster cannot be read.
    async fn eligible_recipients(&self, class_id: ClassId) -> Result<Vec<Recipient>>;
}

/// Roster provider reading enrollments from Postgres.
#[derive(Debug, Clone)]
pub struct PostgresRosterProvider {
    pool: PgPool,
}

impl PostgresRosterProvider {
    /// Creates a provider over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RosterProvider for PostgresRosterProvider {
    async fn eligible_recipients(&self, class_id: ClassId) -> Result<Vec<Recipient>> {
        let recipients = sqlx::query_as::<_, Recipient>(
            r#"
            SELECT e.student_id, s.full_name AS name, s.email
            FROM enrollments e
            JOIN students s ON s.id = e.student_id
            WHERE e.class_id = $1
              AND e.status IN ('confirmed', 'active')
              AND s.email IS NOT NULL
              AND s.email <> ''
            ORDER BY s.full_name ASC
            "#,
        )
        .bind(class_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::from)?;

        Ok(recipients)
    }
}

pub mod mock {
    //! In-memory roster for tests.

    use std::{collections::HashMap, sync::Arc};

    use async_trait::async_trait;
    use presenza_core::{error::Result, ClassId, CoreError};
    use tokio::sync::RwLock;

    use super::{Recipient, RosterProvider};

    /// Serves rosters registered by the test.
    #[derive(Debug, Default)]
    pub struct MockRoster {
        rosters: Arc<RwLock<HashMap<ClassId, Vec<Recipient>>>>,
        fail: Arc<RwLock<bool>>,
    }

    impl MockRoster {
        /// Creates an empty roster source.
        pub fn new() -> Self {
            Self::default()
        }

        /// Registers the roster returned for `class_id`.
        pub async fn set_roster(&self, class_id: ClassId, recipients: Vec<Recipient>) {
            self.rosters.write().await.insert(class_id, recipients);
        }

        /// Makes every roster read fail from now on.
        pub async fn fail_reads(&self) {
            *self.fail.write().await = true;
        }
    }

    #[async_trait]
    impl RosterProvider for MockRoster {
        async fn eligible_recipients(&self, class_id: ClassId) -> Result<Vec<Recipient>> {
            if *self.fail.read().await {
                return Err(CoreError::Database("injected roster failure".to_string()));
            }
            Ok(self.rosters.read().await.get(&class_id).cloned().unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use presenza_core::StudentId;

    use super::{mock::MockRoster, *};

    #[tokio::test]
    async fn unknown_class_yields_empty_roster() {
        let roster = MockRoster::new();
        let recipients = roster.eligible_recipients(ClassId::new()).await.unwrap();
        assert!(recipients.is_empty());
    }

    #[tokio::test]
    async fn registered_roster_is_served() {
        let roster = MockRoster::new();
        let class_id = ClassId::new();
        roster
            .set_roster(class_id, vec![Recipient {
                student_id: StudentId::new(),
                name: "Ada Lovelace".to_string(),
                email: "ada@example.org".to_string(),
            }])
            .await;

        let recipients = roster.eligible_recipients(class_id).await.unwrap();
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].email, "ada@example.org");
    }

    #[tokio::test]
    async fn injected_failure_surfaces_as_error() {
        let roster = MockRoster::new();
        roster.fail_reads().await;
        assert!(roster.eligible_recipients(ClassId::new()).await.is_err());
    }
}
