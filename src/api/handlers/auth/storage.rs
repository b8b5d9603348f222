//! Database helpers for panel sessions, admin accounts, and registration state.

use anyhow::{Context, Result, anyhow};
use serde_json::json;
use sqlx::{PgPool, Row};
use tracing::{Instrument, warn};

use super::session::{Role, SessionData};
use super::utils::is_unique_violation;

/// Outcome when queueing a new admin registration.
#[derive(Debug)]
pub(super) enum RegistrationOutcome {
    Created,
    Conflict,
}

/// Outcome when consuming a registration confirmation token.
#[derive(Debug)]
pub(super) enum ConfirmOutcome {
    Confirmed { email: String },
    Invalid,
}

/// Outcome when a super admin approves a registration.
#[derive(Debug)]
pub(super) enum ApproveOutcome {
    Approved { email: String },
    Unconfirmed,
    Conflict,
    NotFound,
}

/// Outcome when a super admin denies a registration.
#[derive(Debug)]
pub(super) enum DenyOutcome {
    Denied { email: String },
    NotFound,
}

/// Admin account fields needed for login and role checks.
pub(super) struct AdminRecord {
    pub(super) id: i64,
    pub(super) email: String,
    pub(super) password_hash: String,
    pub(super) role: Role,
}

/// Confirmed registration awaiting super admin review.
pub(super) struct RegistrationRow {
    pub(super) id: i64,
    pub(super) email: String,
    pub(super) reason: String,
    pub(super) created_at: String,
}

/// Fetch session data for a validated id; expired rows count as absent.
pub(super) async fn load_session(pool: &PgPool, id: &str) -> Result<Option<SessionData>> {
    let query = r"
        SELECT data
        FROM panel_sessions
        WHERE id = $1
          AND expires_at > NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to load session")?;

    let Some(row) = row else {
        return Ok(None);
    };

    // A row that no longer decodes is treated as a missing session.
    let raw: String = row.get("data");
    match serde_json::from_str(&raw) {
        Ok(data) => Ok(Some(data)),
        Err(err) => {
            warn!("Discarding undecodable session payload: {err}");
            Ok(None)
        }
    }
}

/// Upsert the session row and push its expiry a full TTL into the future.
pub(super) async fn save_session(
    pool: &PgPool,
    id: &str,
    data: &SessionData,
    ttl_seconds: i64,
) -> Result<()> {
    let payload = serde_json::to_string(data).context("failed to serialize session data")?;

    let query = r"
        INSERT INTO panel_sessions (id, data, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        ON CONFLICT (id) DO UPDATE
        SET data = EXCLUDED.data,
            expires_at = EXCLUDED.expires_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(id)
        .bind(payload)
        .bind(ttl_seconds)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to save session")?;
    Ok(())
}

/// Remove a single session row; deleting an absent row is fine.
pub(super) async fn delete_session(pool: &PgPool, id: &str) -> Result<()> {
    let query = "DELETE FROM panel_sessions WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

/// Sweep sessions whose expiry has passed, returning how many were removed.
pub(crate) async fn delete_expired_sessions(pool: &PgPool) -> Result<u64> {
    let query = "DELETE FROM panel_sessions WHERE expires_at <= NOW()";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete expired sessions")?;
    Ok(result.rows_affected())
}

/// Look up an admin account by email for login.
pub(super) async fn lookup_admin(pool: &PgPool, email: &str) -> Result<Option<AdminRecord>> {
    let query = "SELECT id, email, password_hash, role FROM admin_users WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup admin account")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let role: String = row.get("role");
    let role = role
        .parse::<Role>()
        .map_err(|err| anyhow!("invalid role stored for admin account: {err}"))?;

    Ok(Some(AdminRecord {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role,
    }))
}

/// An address is taken if an admin account or a still-open registration holds it.
pub(super) async fn admin_email_taken(pool: &PgPool, email: &str) -> Result<bool> {
    let query = r"
        SELECT EXISTS (SELECT 1 FROM admin_users WHERE email = $1)
            OR EXISTS (SELECT 1 FROM admin_registrations WHERE email = $1) AS taken
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to check admin email availability")?;
    Ok(row.get("taken"))
}

/// Create a registration plus its confirmation email in one transaction.
pub(super) async fn insert_registration(
    pool: &PgPool,
    email: &str,
    password_hash: &str,
    reason: &str,
    token: &str,
    ttl_hours: i64,
    confirm_url: &str,
) -> Result<RegistrationOutcome> {
    let mut tx = pool.begin().await.context("begin registration transaction")?;

    let query = r"
        INSERT INTO admin_registrations
            (email, password_hash, reason, confirmation_token, expires_at)
        VALUES ($1, $2, $3, $4, NOW() + ($5 * INTERVAL '1 hour'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(email)
        .bind(password_hash)
        .bind(reason)
        .bind(token)
        .bind(ttl_hours)
        .execute(&mut *tx)
        .instrument(span)
        .await;

    if let Err(err) = result {
        if is_unique_violation(&err) {
            let _ = tx.rollback().await;
            return Ok(RegistrationOutcome::Conflict);
        }
        return Err(err).context("failed to insert registration");
    }

    enqueue_email(
        &mut tx,
        email,
        "registration-confirm",
        &json!({
            "email": email,
            "confirm_url": confirm_url,
        }),
    )
    .await?;

    tx.commit().await.context("commit registration transaction")?;

    Ok(RegistrationOutcome::Created)
}

/// Mark a registration confirmed and notify every super admin.
pub(super) async fn confirm_registration(pool: &PgPool, token: &str) -> Result<ConfirmOutcome> {
    let mut tx = pool.begin().await.context("begin confirm transaction")?;

    let query = r"
        UPDATE admin_registrations
        SET confirmed = TRUE
        WHERE confirmation_token = $1
          AND NOT confirmed
          AND expires_at > NOW()
        RETURNING email, reason
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to confirm registration")?;

    let Some(row) = row else {
        tx.commit().await.context("commit confirm noop")?;
        return Ok(ConfirmOutcome::Invalid);
    };

    let email: String = row.get("email");
    let reason: String = row.get("reason");

    for to_email in super_admin_emails(&mut tx).await? {
        enqueue_email(
            &mut tx,
            &to_email,
            "registration-received",
            &json!({
                "email": email,
                "reason": reason,
            }),
        )
        .await?;
    }

    tx.commit().await.context("commit confirm transaction")?;

    Ok(ConfirmOutcome::Confirmed { email })
}

/// List confirmed registrations in the order they arrived.
pub(super) async fn list_pending_registrations(pool: &PgPool) -> Result<Vec<RegistrationRow>> {
    let query = r"
        SELECT id, email, reason, created_at::text AS created_at
        FROM admin_registrations
        WHERE confirmed
        ORDER BY created_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list registrations")?;

    Ok(rows
        .into_iter()
        .map(|row| RegistrationRow {
            id: row.get("id"),
            email: row.get("email"),
            reason: row.get("reason"),
            created_at: row.get("created_at"),
        })
        .collect())
}

/// Promote a confirmed registration into a real admin account.
///
/// The account insert, registration removal, and notification email commit
/// together or not at all.
pub(super) async fn approve_registration(pool: &PgPool, id: i64) -> Result<ApproveOutcome> {
    let mut tx = pool.begin().await.context("begin approve transaction")?;

    let query = r"
        SELECT email, password_hash, confirmed
        FROM admin_registrations
        WHERE id = $1
        FOR UPDATE
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(id)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to lookup registration")?;

    let Some(row) = row else {
        tx.commit().await.context("commit approve noop")?;
        return Ok(ApproveOutcome::NotFound);
    };

    let confirmed: bool = row.get("confirmed");
    if !confirmed {
        tx.commit().await.context("commit approve noop")?;
        return Ok(ApproveOutcome::Unconfirmed);
    }

    let email: String = row.get("email");
    let password_hash: String = row.get("password_hash");

    let query = r"
        INSERT INTO admin_users (email, password_hash, role)
        VALUES ($1, $2, 'admin')
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(&email)
        .bind(&password_hash)
        .execute(&mut *tx)
        .instrument(span)
        .await;

    if let Err(err) = result {
        if is_unique_violation(&err) {
            let _ = tx.rollback().await;
            return Ok(ApproveOutcome::Conflict);
        }
        return Err(err).context("failed to insert admin account");
    }

    let query = "DELETE FROM admin_registrations WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to delete registration")?;

    enqueue_email(
        &mut tx,
        &email,
        "registration-approved",
        &json!({
            "email": email,
        }),
    )
    .await?;

    tx.commit().await.context("commit approve transaction")?;

    Ok(ApproveOutcome::Approved { email })
}

/// Drop a registration and tell the applicant it was denied.
pub(super) async fn deny_registration(pool: &PgPool, id: i64) -> Result<DenyOutcome> {
    let mut tx = pool.begin().await.context("begin deny transaction")?;

    let query = "DELETE FROM admin_registrations WHERE id = $1 RETURNING email";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(id)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to delete registration")?;

    let Some(row) = row else {
        tx.commit().await.context("commit deny noop")?;
        return Ok(DenyOutcome::NotFound);
    };

    let email: String = row.get("email");
    enqueue_email(
        &mut tx,
        &email,
        "registration-denied",
        &json!({
            "email": email,
        }),
    )
    .await?;

    tx.commit().await.context("commit deny transaction")?;

    Ok(DenyOutcome::Denied { email })
}

/// Sweep registrations that expired without ever being confirmed.
pub(crate) async fn delete_expired_registrations(pool: &PgPool) -> Result<u64> {
    let query = r"
        DELETE FROM admin_registrations
        WHERE NOT confirmed
          AND expires_at <= NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete expired registrations")?;
    Ok(result.rows_affected())
}

/// Queue an outbox row inside the caller's transaction.
async fn enqueue_email(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    to_email: &str,
    template: &str,
    payload: &serde_json::Value,
) -> Result<()> {
    let payload_text =
        serde_json::to_string(payload).context("failed to serialize email payload")?;

    let query = r"
        INSERT INTO email_outbox (to_email, template, payload_json)
        VALUES ($1, $2, $3::jsonb)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(to_email)
        .bind(template)
        .bind(payload_text)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert email outbox row")?;
    Ok(())
}

async fn super_admin_emails(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>) -> Result<Vec<String>> {
    let query = "SELECT email FROM admin_users WHERE role = 'super_admin'";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .fetch_all(&mut **tx)
        .instrument(span)
        .await
        .context("failed to list super admin emails")?;
    Ok(rows.into_iter().map(|row| row.get("email")).collect())
}
