//! Presenza attendance attestation service.
//!
//! Entry point for provisioning the service. Initializes structured logging,
//! connects to Postgres, creates the attendance schema, and verifies storage
//! and mail relay configuration before handing the database over to the
//! embedding product.

use std::time::Duration;

use anyhow::{Context, Result};
use presenza_core::storage::Storage;
use presenza_workflow::notify::{SmtpConfig, SmtpNotifier};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with structured logging
    init_tracing();

    info!("Starting Presenza attendance service");

    // Load configuration from environment
    let config = Config::from_env()?;
    info!(
        database_url = %config.database_url_masked(),
        max_connections = config.database_max_connections,
        smtp_configured = config.smtp.is_some(),
        "Configuration loaded"
    );

    // Create database connection pool
    let db_pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    // Run database migrations
    run_migrations(&db_pool).await?;
    info!("Database migrations completed");

    // Verify the storage stack end to end
    let storage = Storage::new(db_pool.clone());
    storage.health_check().await.context("Storage health check failed")?;
    info!("Storage health check passed");

    // Validate the mail relay configuration without connecting
    match &config.smtp {
        Some(smtp) => {
            SmtpNotifier::new(smtp).context("Invalid SMTP configuration")?;
            info!(host = %smtp.host, port = smtp.port, "SMTP relay configured");
        },
        None => {
            info!("SMTP relay not configured, invitations stay disabled");
        },
    }

    // Close database connections
    db_pool.close().await;
    info!("Database connections closed");

    info!("Presenza schema is ready");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,presenza=debug,sqlx=warn"))
        .expect("Invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    let mut retries = 0;
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                // Verify connection works
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "Database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}

/// Runs database migrations.
async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    // TODO: Use sqlx::migrate! macro once migrations are set up
    // For now, ensure tables exist

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS students (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            full_name TEXT NOT NULL,
            email TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create students table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS enrollments (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            class_id UUID NOT NULL,
            student_id UUID NOT NULL REFERENCES students(id),
            status TEXT NOT NULL DEFAULT 'active',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE(class_id, student_id)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create enrollments table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attendance_sessions (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            class_id UUID NOT NULL,
            title TEXT NOT NULL,
            date DATE NOT NULL,
            status TEXT NOT NULL DEFAULT 'draft',
            mode TEXT NOT NULL DEFAULT 'electronic',
            starts_at TIMESTAMPTZ,
            ends_at TIMESTAMPTZ,
            require_signature BOOLEAN NOT NULL DEFAULT TRUE,
            require_geolocation BOOLEAN NOT NULL DEFAULT FALSE,
            reference_latitude DOUBLE PRECISION,
            reference_longitude DOUBLE PRECISION,
            allowed_radius_m DOUBLE PRECISION NOT NULL,
            closes_at TIMESTAMPTZ NOT NULL,
            total_expected INTEGER NOT NULL DEFAULT 0,
            launched_at TIMESTAMPTZ,
            closed_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create attendance_sessions table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS signing_requests (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            session_id UUID NOT NULL REFERENCES attendance_sessions(id),
            student_id UUID NOT NULL,
            recipient_name TEXT NOT NULL,
            recipient_email TEXT NOT NULL,
            token TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'pending',
            signed_at TIMESTAMPTZ,
            attendance_record_id UUID,
            signature_data TEXT,
            latitude DOUBLE PRECISION,
            longitude DOUBLE PRECISION,
            location_accuracy DOUBLE PRECISION,
            location_verified BOOLEAN NOT NULL DEFAULT FALSE,
            ip_address TEXT,
            user_agent TEXT,
            reminder_count INTEGER NOT NULL DEFAULT 0,
            last_reminder_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE(session_id, student_id)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create signing_requests table")?;

    // The composite key must treat NULL session ids as equal, otherwise
    // manual records for the same student and day would never conflict.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attendance_records (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            student_id UUID NOT NULL,
            class_id UUID NOT NULL,
            session_id UUID REFERENCES attendance_sessions(id),
            date DATE NOT NULL,
            status TEXT NOT NULL,
            late_minutes INTEGER NOT NULL DEFAULT 0,
            signature_url TEXT,
            latitude DOUBLE PRECISION,
            longitude DOUBLE PRECISION,
            location_accuracy DOUBLE PRECISION,
            location_verified BOOLEAN NOT NULL DEFAULT FALSE,
            marked_by TEXT,
            notes TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE NULLS NOT DISTINCT (student_id, class_id, session_id, date)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create attendance_records table")?;

    // Create indexes
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_enrollments_class
        ON enrollments(class_id, status)
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create enrollments class index")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_attendance_sessions_class
        ON attendance_sessions(class_id, date DESC, created_at DESC)
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create attendance_sessions class index")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_signing_requests_session
        ON signing_requests(session_id, status)
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create signing_requests session index")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_attendance_records_student
        ON attendance_records(student_id, class_id, date)
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create attendance_records student index")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_attendance_records_class_date
        ON attendance_records(class_id, date)
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create attendance_records class index")?;

    Ok(())
}

/// Service configuration.
struct Config {
    /// PostgreSQL connection string
    database_url: String,
    /// Maximum database connections
    database_max_connections: u32,
    /// Optional SMTP relay for invitation mail
    smtp: Option<SmtpConfig>,
}

impl Config {
    /// Loads configuration from environment variables.
    fn from_env() -> Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL environment variable not set")?;

        let database_max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let smtp = match std::env::var("SMTP_HOST") {
            Ok(host) => {
                let port = std::env::var("SMTP_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(587);
                let username = std::env::var("SMTP_USERNAME").unwrap_or_default();
                let password = std::env::var("SMTP_PASSWORD").unwrap_or_default();
                let from = std::env::var("SMTP_FROM")
                    .context("SMTP_FROM environment variable not set while SMTP_HOST is")?;

                Some(SmtpConfig { host, port, username, password, from })
            },
            Err(_) => None,
        };

        Ok(Self { database_url, database_max_connections, smtp })
    }

    /// Returns database URL with password masked for logging.
    fn database_url_masked(&self) -> String {
        if let Some(at_pos) = self.database_url.find('@') {
            if let Some(password_start) = self.database_url[..at_pos].rfind(':') {
                if let Some(user_start) = self.database_url[..password_start].rfind('/') {
                    return format!(
                        "{}//{}:***@{}",
                        &self.database_url[..user_start],
                        &self.database_url[user_start + 2..password_start],
                        &self.database_url[at_pos + 1..]
                    );
                }
            }
        }
        // Fallback: just return postgresql://***
        "postgresql://***".to_string()
    }
}
