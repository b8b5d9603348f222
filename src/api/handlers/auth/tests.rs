//! Auth module tests.

use super::rate_limit::{RateLimitDecision, RateLimitPolicy, RateLimiter};
use super::session::Role;
use super::storage::{
    ApproveOutcome, ConfirmOutcome, DenyOutcome, RegistrationOutcome, admin_email_taken,
    approve_registration, confirm_registration, delete_expired_registrations, deny_registration,
    insert_registration, list_pending_registrations, lookup_admin,
};
use super::utils::generate_confirmation_token;
use anyhow::{Context, Result, anyhow, bail};
use sqlx::{Connection, PgConnection, PgPool, Row, postgres::PgPoolOptions};
use uuid::Uuid;

const PANEL_SCHEMA_SQL: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

const SCHEMA_LOCK: i64 = 727_274;

const TEST_POLICY: RateLimitPolicy = RateLimitPolicy::new(3, 15, 30);

struct TestDb {
    pool: PgPool,
}

impl TestDb {
    async fn new() -> Result<Self> {
        let Ok(dsn) = std::env::var("POSTKESTO_TEST_DSN") else {
            eprintln!("Skipping database test: POSTKESTO_TEST_DSN is not set");
            return Err(anyhow!("POSTKESTO_TEST_DSN is not set"));
        };

        apply_schema(&dsn).await?;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&dsn)
            .await
            .context("failed to connect test pool")?;

        Ok(Self { pool })
    }
}

pub(crate) async fn apply_schema(dsn: &str) -> Result<()> {
    let mut connection = PgConnection::connect(dsn)
        .await
        .context("failed to connect for schema setup")?;

    // CREATE TABLE IF NOT EXISTS still races when two connections run it at
    // the same time, so schema application is serialized across test threads.
    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(SCHEMA_LOCK)
        .execute(&mut connection)
        .await
        .context("failed to take the schema lock")?;

    let outcome = run_schema(&mut connection).await;

    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(SCHEMA_LOCK)
        .execute(&mut connection)
        .await
        .context("failed to release the schema lock")?;

    outcome
}

async fn run_schema(connection: &mut PgConnection) -> Result<()> {
    for (index, statement) in split_sql_statements(PANEL_SCHEMA_SQL).iter().enumerate() {
        sqlx::query(statement)
            .execute(&mut *connection)
            .await
            .with_context(|| format!("failed to execute schema statement {}", index + 1))?;
    }

    Ok(())
}

fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        if trimmed.ends_with(';') {
            let statement = current.trim();
            if !statement.is_empty() {
                statements.push(statement.to_string());
            }
            current.clear();
        }
    }

    let leftover = current.trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}

fn unique_key(prefix: &str) -> String {
    format!("{prefix}:{}", Uuid::new_v4().simple())
}

fn unique_email(tag: &str) -> String {
    format!("{tag}-{}@example.com", Uuid::new_v4().simple())
}

async fn registration_id(pool: &PgPool, email: &str) -> Result<i64> {
    let row = sqlx::query("SELECT id FROM admin_registrations WHERE email = $1")
        .bind(email)
        .fetch_one(pool)
        .await
        .context("registration row missing")?;

    Ok(row.get("id"))
}

async fn registration_exists(pool: &PgPool, email: &str) -> Result<bool> {
    let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM admin_registrations WHERE email = $1) AS present")
        .bind(email)
        .fetch_one(pool)
        .await?;

    Ok(row.get("present"))
}

async fn outbox_count(pool: &PgPool, to_email: &str, template: &str) -> Result<i64> {
    let row =
        sqlx::query("SELECT COUNT(*) AS total FROM email_outbox WHERE to_email = $1 AND template = $2")
            .bind(to_email)
            .bind(template)
            .fetch_one(pool)
            .await?;

    Ok(row.get("total"))
}

#[test]
fn split_sql_statements_skips_comment_lines() {
    let sql = "-- heading;\nCREATE TABLE a (\n  id BIGINT\n);\n\n-- trailer;\nCREATE INDEX b ON a (id);\n";
    let statements = split_sql_statements(sql);

    assert_eq!(statements.len(), 2);
    assert!(statements[0].starts_with("CREATE TABLE a"));
    assert!(statements[1].starts_with("CREATE INDEX b"));
}

#[test]
fn panel_schema_splits_into_statements() {
    let statements = split_sql_statements(PANEL_SCHEMA_SQL);

    assert!(statements.len() >= 10);
    assert!(statements.iter().all(|statement| statement.ends_with(';')));
}

#[tokio::test]
async fn fresh_key_is_admitted_with_remaining_budget() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };
    let limiter = RateLimiter::new(db.pool.clone());
    let key = unique_key("ip");

    let decision = limiter.check(&key, TEST_POLICY).await?;

    assert_eq!(decision, RateLimitDecision::Allowed { remaining: 2 });
    Ok(())
}

#[tokio::test]
async fn repeated_probes_escalate_to_a_block() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };
    let limiter = RateLimiter::new(db.pool.clone());
    let key = unique_key("ip");

    assert_eq!(
        limiter.check(&key, TEST_POLICY).await?,
        RateLimitDecision::Allowed { remaining: 2 }
    );
    assert_eq!(
        limiter.check(&key, TEST_POLICY).await?,
        RateLimitDecision::Allowed { remaining: 1 }
    );
    // The probe that exhausts the budget installs the block and reports the
    // full block duration.
    assert_eq!(
        limiter.check(&key, TEST_POLICY).await?,
        RateLimitDecision::Blocked {
            retry_after_seconds: 1800
        }
    );
    Ok(())
}

#[tokio::test]
async fn blocked_probes_do_not_extend_the_block() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };
    let limiter = RateLimiter::new(db.pool.clone());
    let key = unique_key("ip");

    for _ in 0..3 {
        limiter.check(&key, TEST_POLICY).await?;
    }

    let before = sqlx::query(
        "SELECT attempts, blocked_until::text AS blocked_until FROM panel_rate_limits WHERE key = $1",
    )
    .bind(&key)
    .fetch_one(&db.pool)
    .await?;

    let decision = limiter.check(&key, TEST_POLICY).await?;
    let RateLimitDecision::Blocked {
        retry_after_seconds,
    } = decision
    else {
        bail!("expected an active block, got {decision:?}");
    };
    assert!((1..=1800).contains(&retry_after_seconds));

    let after = sqlx::query(
        "SELECT attempts, blocked_until::text AS blocked_until FROM panel_rate_limits WHERE key = $1",
    )
    .bind(&key)
    .fetch_one(&db.pool)
    .await?;

    assert_eq!(before.get::<i32, _>("attempts"), 3);
    assert_eq!(after.get::<i32, _>("attempts"), 3);
    assert_eq!(
        before.get::<String, _>("blocked_until"),
        after.get::<String, _>("blocked_until")
    );
    Ok(())
}

#[tokio::test]
async fn an_expired_block_restarts_the_counter() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };
    let limiter = RateLimiter::new(db.pool.clone());
    let key = unique_key("ip");

    for _ in 0..3 {
        limiter.check(&key, TEST_POLICY).await?;
    }

    sqlx::query("UPDATE panel_rate_limits SET blocked_until = NOW() - INTERVAL '1 second' WHERE key = $1")
        .bind(&key)
        .execute(&db.pool)
        .await?;

    let decision = limiter.check(&key, TEST_POLICY).await?;
    assert_eq!(decision, RateLimitDecision::Allowed { remaining: 2 });

    let attempts: i32 = sqlx::query("SELECT attempts FROM panel_rate_limits WHERE key = $1")
        .bind(&key)
        .fetch_one(&db.pool)
        .await?
        .get("attempts");
    assert_eq!(attempts, 1);
    Ok(())
}

#[tokio::test]
async fn a_stale_window_restarts_the_counter() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };
    let limiter = RateLimiter::new(db.pool.clone());
    let policy = RateLimitPolicy::new(5, 15, 30);
    let key = unique_key("ip");

    limiter.check(&key, policy).await?;
    limiter.check(&key, policy).await?;

    sqlx::query("UPDATE panel_rate_limits SET last_attempt = NOW() - INTERVAL '20 minutes' WHERE key = $1")
        .bind(&key)
        .execute(&db.pool)
        .await?;

    let decision = limiter.check(&key, policy).await?;
    assert_eq!(decision, RateLimitDecision::Allowed { remaining: 4 });
    Ok(())
}

#[tokio::test]
async fn reset_clears_the_key() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };
    let limiter = RateLimiter::new(db.pool.clone());
    let key = unique_key("ip");

    limiter.check(&key, TEST_POLICY).await?;
    limiter.check(&key, TEST_POLICY).await?;
    limiter.reset(&key).await?;

    let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM panel_rate_limits WHERE key = $1) AS present")
        .bind(&key)
        .fetch_one(&db.pool)
        .await?;
    assert!(!row.get::<bool, _>("present"));

    let decision = limiter.check(&key, TEST_POLICY).await?;
    assert_eq!(decision, RateLimitDecision::Allowed { remaining: 2 });
    Ok(())
}

#[tokio::test]
async fn sweep_removes_only_idle_rows() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };
    let limiter = RateLimiter::new(db.pool.clone());
    let idle = unique_key("idle");
    let active = unique_key("active");
    let blocked = unique_key("blocked");

    limiter.check(&idle, TEST_POLICY).await?;
    limiter.check(&active, TEST_POLICY).await?;
    for _ in 0..3 {
        limiter.check(&blocked, TEST_POLICY).await?;
    }

    sqlx::query("UPDATE panel_rate_limits SET last_attempt = NOW() - INTERVAL '2 hours' WHERE key = $1")
        .bind(&idle)
        .execute(&db.pool)
        .await?;
    // The blocked row keeps a future blocked_until, so backdating its last
    // attempt must not make it sweepable.
    sqlx::query("UPDATE panel_rate_limits SET last_attempt = NOW() - INTERVAL '2 hours' WHERE key = $1")
        .bind(&blocked)
        .execute(&db.pool)
        .await?;

    let swept = limiter.sweep(60).await?;
    assert!(swept >= 1);

    let remaining: Vec<bool> = {
        let mut found = Vec::new();
        for key in [&idle, &active, &blocked] {
            let row =
                sqlx::query("SELECT EXISTS(SELECT 1 FROM panel_rate_limits WHERE key = $1) AS present")
                    .bind(key)
                    .fetch_one(&db.pool)
                    .await?;
            found.push(row.get("present"));
        }
        found
    };
    assert_eq!(remaining, vec![false, true, true]);
    Ok(())
}

#[tokio::test]
async fn registration_flow_confirms_once() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };
    let email = unique_email("reg");
    let token = generate_confirmation_token()?;

    let outcome = insert_registration(
        &db.pool,
        &email,
        "$argon2id$v=19$stub",
        "runs the family mail host",
        &token,
        48,
        "https://panel.example.com/v1/auth/confirm/abc",
    )
    .await?;
    assert!(matches!(outcome, RegistrationOutcome::Created));
    assert!(admin_email_taken(&db.pool, &email).await?);

    let duplicate_token = generate_confirmation_token()?;
    let duplicate = insert_registration(
        &db.pool,
        &email,
        "$argon2id$v=19$stub",
        "second try",
        &duplicate_token,
        48,
        "https://panel.example.com/v1/auth/confirm/def",
    )
    .await?;
    assert!(matches!(duplicate, RegistrationOutcome::Conflict));

    // The conflicting insert rolled back, so only one confirmation email is
    // queued.
    assert_eq!(outbox_count(&db.pool, &email, "registration-confirm").await?, 1);

    let ConfirmOutcome::Confirmed { email: confirmed } =
        confirm_registration(&db.pool, &token).await?
    else {
        bail!("expected the first confirmation to succeed");
    };
    assert_eq!(confirmed, email);

    assert!(matches!(
        confirm_registration(&db.pool, &token).await?,
        ConfirmOutcome::Invalid
    ));
    assert!(matches!(
        confirm_registration(&db.pool, "no-such-token").await?,
        ConfirmOutcome::Invalid
    ));
    Ok(())
}

#[tokio::test]
async fn confirmed_registrations_notify_super_admins() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };
    let super_admin = unique_email("super");
    sqlx::query("INSERT INTO admin_users (email, password_hash, role) VALUES ($1, '$argon2id$v=19$stub', 'super_admin')")
        .bind(&super_admin)
        .execute(&db.pool)
        .await?;

    let email = unique_email("reg");
    let token = generate_confirmation_token()?;
    insert_registration(
        &db.pool,
        &email,
        "$argon2id$v=19$stub",
        "needs a mailbox for the club",
        &token,
        48,
        "https://panel.example.com/v1/auth/confirm/abc",
    )
    .await?;
    confirm_registration(&db.pool, &token).await?;

    assert!(outbox_count(&db.pool, &super_admin, "registration-received").await? >= 1);
    Ok(())
}

#[tokio::test]
async fn moderation_approves_confirmed_registrations() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };
    let email = unique_email("mod");
    let token = generate_confirmation_token()?;
    insert_registration(
        &db.pool,
        &email,
        "$argon2id$v=19$stub",
        "keeps the backups honest",
        &token,
        48,
        "https://panel.example.com/v1/auth/confirm/abc",
    )
    .await?;
    let id = registration_id(&db.pool, &email).await?;

    assert!(matches!(
        approve_registration(&db.pool, id).await?,
        ApproveOutcome::Unconfirmed
    ));

    confirm_registration(&db.pool, &token).await?;

    let pending = list_pending_registrations(&db.pool).await?;
    let row = pending
        .iter()
        .find(|row| row.email == email)
        .context("confirmed registration missing from the pending list")?;
    assert_eq!(row.reason, "keeps the backups honest");
    assert!(!row.created_at.is_empty());

    let ApproveOutcome::Approved { email: approved } = approve_registration(&db.pool, id).await?
    else {
        bail!("expected the approval to succeed");
    };
    assert_eq!(approved, email);

    let record = lookup_admin(&db.pool, &email)
        .await?
        .context("approved admin missing")?;
    assert_eq!(record.role, Role::Admin);
    assert_eq!(record.password_hash, "$argon2id$v=19$stub");

    assert!(!registration_exists(&db.pool, &email).await?);
    assert!(admin_email_taken(&db.pool, &email).await?);
    assert_eq!(outbox_count(&db.pool, &email, "registration-approved").await?, 1);

    assert!(matches!(
        approve_registration(&db.pool, id).await?,
        ApproveOutcome::NotFound
    ));
    Ok(())
}

#[tokio::test]
async fn approval_refuses_emails_that_became_admins() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };
    let email = unique_email("clash");
    let token = generate_confirmation_token()?;
    insert_registration(
        &db.pool,
        &email,
        "$argon2id$v=19$stub",
        "wants in twice",
        &token,
        48,
        "https://panel.example.com/v1/auth/confirm/abc",
    )
    .await?;
    confirm_registration(&db.pool, &token).await?;

    sqlx::query("INSERT INTO admin_users (email, password_hash, role) VALUES ($1, '$argon2id$v=19$stub', 'admin')")
        .bind(&email)
        .execute(&db.pool)
        .await?;

    let id = registration_id(&db.pool, &email).await?;
    assert!(matches!(
        approve_registration(&db.pool, id).await?,
        ApproveOutcome::Conflict
    ));

    // The conflicting approval rolled back without consuming the
    // registration.
    assert!(registration_exists(&db.pool, &email).await?);
    Ok(())
}

#[tokio::test]
async fn denial_discards_the_registration() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };
    let email = unique_email("deny");
    let token = generate_confirmation_token()?;
    insert_registration(
        &db.pool,
        &email,
        "$argon2id$v=19$stub",
        "no stated reason",
        &token,
        48,
        "https://panel.example.com/v1/auth/confirm/abc",
    )
    .await?;
    let id = registration_id(&db.pool, &email).await?;

    // Denial does not require a prior confirmation.
    let DenyOutcome::Denied { email: denied } = deny_registration(&db.pool, id).await? else {
        bail!("expected the denial to succeed");
    };
    assert_eq!(denied, email);

    assert!(!registration_exists(&db.pool, &email).await?);
    assert_eq!(outbox_count(&db.pool, &email, "registration-denied").await?, 1);

    assert!(matches!(
        deny_registration(&db.pool, id).await?,
        DenyOutcome::NotFound
    ));
    Ok(())
}

#[tokio::test]
async fn expired_unconfirmed_registrations_are_swept() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };
    let expired = unique_email("expired");
    let kept = unique_email("kept");

    insert_registration(
        &db.pool,
        &expired,
        "$argon2id$v=19$stub",
        "never opened the email",
        &generate_confirmation_token()?,
        0,
        "https://panel.example.com/v1/auth/confirm/abc",
    )
    .await?;

    let kept_token = generate_confirmation_token()?;
    insert_registration(
        &db.pool,
        &kept,
        "$argon2id$v=19$stub",
        "confirmed in time",
        &kept_token,
        48,
        "https://panel.example.com/v1/auth/confirm/def",
    )
    .await?;
    confirm_registration(&db.pool, &kept_token).await?;
    // Confirmed rows stay until moderation even when their deadline passes.
    sqlx::query("UPDATE admin_registrations SET expires_at = NOW() - INTERVAL '1 hour' WHERE email = $1")
        .bind(&kept)
        .execute(&db.pool)
        .await?;

    let swept = delete_expired_registrations(&db.pool).await?;
    assert!(swept >= 1);

    assert!(!registration_exists(&db.pool, &expired).await?);
    assert!(registration_exists(&db.pool, &kept).await?);
    Ok(())
}
