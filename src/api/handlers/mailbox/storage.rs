//! Database helpers for ownership-scoped mailbox provisioning.
//!
//! Every lookup is scoped to the calling admin's ownership rows, so a
//! mailbox an admin does not own is indistinguishable from one that does
//! not exist. Mutations also queue pending rows; the external provisioning
//! worker consumes those out of band and this service's contract ends at
//! the row existing.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;

use super::super::auth::recovery::SealedEnvelope;
use super::super::auth::utils::is_unique_violation;

#[derive(Debug)]
pub(super) enum CreateOutcome {
    Created,
    Conflict,
}

/// Create and update share this: the source column is unique, so either
/// write can lose to an existing alias.
#[derive(Debug)]
pub(super) enum AliasOutcome {
    Applied(i64),
    Conflict,
}

/// One alias visible to the caller.
pub(super) struct AliasRow {
    pub(super) id: i64,
    pub(super) source: String,
    pub(super) destination: String,
}

/// One row of the caller's mailbox listing.
pub(super) struct MailboxRow {
    pub(super) email: String,
    pub(super) active: bool,
}

pub(super) async fn list_mailboxes(pool: &PgPool, admin_id: i64) -> Result<Vec<MailboxRow>> {
    let query = r"
        SELECT vu.email, vu.active
        FROM virtual_users vu
        JOIN mailbox_ownerships mo ON mo.user_id = vu.id
        WHERE mo.admin_id = $1
        ORDER BY vu.email
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(admin_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list mailboxes")?;

    Ok(rows
        .into_iter()
        .map(|row| MailboxRow {
            email: row.get("email"),
            active: row.get("active"),
        })
        .collect())
}

/// Resolve a domain name to its id, but only when the admin owns it.
/// An unknown domain and a domain owned by someone else both come back as
/// `None`.
pub(super) async fn domain_owned(
    pool: &PgPool,
    admin_id: i64,
    domain: &str,
) -> Result<Option<i64>> {
    let query = r"
        SELECT vd.id
        FROM virtual_domains vd
        JOIN domain_ownerships dom ON dom.domain_id = vd.id
        WHERE dom.admin_id = $1 AND vd.name = $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(admin_id)
        .bind(domain)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to resolve domain ownership")?;

    Ok(row.map(|row| row.get("id")))
}

pub(super) async fn count_owned_mailboxes(pool: &PgPool, admin_id: i64) -> Result<i64> {
    let query = "SELECT COUNT(*) AS total FROM mailbox_ownerships WHERE admin_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(admin_id)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count owned mailboxes")?;

    Ok(row.get("total"))
}

/// Resolve a mailbox address to its user id, scoped to the admin's
/// ownership.
pub(super) async fn owned_mailbox(
    pool: &PgPool,
    admin_id: i64,
    email: &str,
) -> Result<Option<i64>> {
    let query = r"
        SELECT vu.id
        FROM virtual_users vu
        JOIN mailbox_ownerships mo ON mo.user_id = vu.id
        WHERE mo.admin_id = $1 AND vu.email = $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(admin_id)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to resolve mailbox ownership")?;

    Ok(row.map(|row| row.get("id")))
}

/// Resolve a mailbox address to its domain id, scoped to the admin's
/// ownership. Aliases live on their destination's domain.
pub(super) async fn owned_mailbox_domain(
    pool: &PgPool,
    admin_id: i64,
    email: &str,
) -> Result<Option<i64>> {
    let query = r"
        SELECT vu.domain_id
        FROM virtual_users vu
        JOIN mailbox_ownerships mo ON mo.user_id = vu.id
        WHERE mo.admin_id = $1 AND vu.email = $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(admin_id)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to resolve mailbox domain")?;

    Ok(row.map(|row| row.get("domain_id")))
}

/// Aliases targeting any mailbox the admin owns.
pub(super) async fn list_aliases(pool: &PgPool, admin_id: i64) -> Result<Vec<AliasRow>> {
    let query = r"
        SELECT va.id, va.source, va.destination
        FROM virtual_aliases va
        JOIN virtual_users vu ON vu.email = va.destination
        JOIN mailbox_ownerships mo ON mo.user_id = vu.id
        WHERE mo.admin_id = $1
        ORDER BY va.source
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(admin_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list aliases")?;

    Ok(rows
        .into_iter()
        .map(|row| AliasRow {
            id: row.get("id"),
            source: row.get("source"),
            destination: row.get("destination"),
        })
        .collect())
}

/// Fetch an alias by id, but only when its destination is a mailbox the
/// admin owns. Unknown and unowned ids both come back as `None`.
pub(super) async fn owned_alias(
    pool: &PgPool,
    admin_id: i64,
    alias_id: i64,
) -> Result<Option<AliasRow>> {
    let query = r"
        SELECT va.id, va.source, va.destination
        FROM virtual_aliases va
        JOIN virtual_users vu ON vu.email = va.destination
        JOIN mailbox_ownerships mo ON mo.user_id = vu.id
        WHERE mo.admin_id = $1 AND va.id = $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(admin_id)
        .bind(alias_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to resolve alias ownership")?;

    Ok(row.map(|row| AliasRow {
        id: row.get("id"),
        source: row.get("source"),
        destination: row.get("destination"),
    }))
}

pub(super) async fn count_aliases_for(pool: &PgPool, destination: &str) -> Result<i64> {
    let query = "SELECT COUNT(*) AS total FROM virtual_aliases WHERE destination = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(destination)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count aliases")?;

    Ok(row.get("total"))
}

pub(super) async fn create_alias(
    pool: &PgPool,
    domain_id: i64,
    source: &str,
    destination: &str,
) -> Result<AliasOutcome> {
    let query = r"
        INSERT INTO virtual_aliases (domain_id, source, destination)
        VALUES ($1, $2, $3)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(domain_id)
        .bind(source)
        .bind(destination)
        .fetch_one(pool)
        .instrument(span)
        .await;

    match result {
        Ok(row) => Ok(AliasOutcome::Applied(row.get("id"))),
        Err(err) if is_unique_violation(&err) => Ok(AliasOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert alias"),
    }
}

/// Rewrite both sides of an alias; the caller has already verified the new
/// destination. A source clash with another alias surfaces as `Conflict`.
pub(super) async fn update_alias(
    pool: &PgPool,
    alias_id: i64,
    domain_id: i64,
    source: &str,
    destination: &str,
) -> Result<AliasOutcome> {
    let query = r"
        UPDATE virtual_aliases
        SET domain_id = $2, source = $3, destination = $4
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(alias_id)
        .bind(domain_id)
        .bind(source)
        .bind(destination)
        .execute(pool)
        .instrument(span)
        .await;

    match result {
        Ok(_) => Ok(AliasOutcome::Applied(alias_id)),
        Err(err) if is_unique_violation(&err) => Ok(AliasOutcome::Conflict),
        Err(err) => Err(err).context("failed to update alias"),
    }
}

pub(super) async fn delete_alias(pool: &PgPool, alias_id: i64) -> Result<()> {
    let query = "DELETE FROM virtual_aliases WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(alias_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete alias")?;

    Ok(())
}

/// Insert the user, its ownership, its recovery envelope and the
/// creation-pending signal in one transaction. A duplicate address rolls
/// the whole transaction back.
pub(super) async fn create_mailbox(
    pool: &PgPool,
    admin_id: i64,
    domain_id: i64,
    email: &str,
    password_hash: &str,
    envelope: &SealedEnvelope,
    hint: &str,
) -> Result<CreateOutcome> {
    let mut tx = pool.begin().await.context("begin mailbox transaction")?;

    let query = r"
        INSERT INTO virtual_users (domain_id, email, password_hash)
        VALUES ($1, $2, $3)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(domain_id)
        .bind(email)
        .bind(password_hash)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await;

    let user_id: i64 = match result {
        Ok(row) => row.get("id"),
        Err(err) if is_unique_violation(&err) => {
            let _ = tx.rollback().await;
            return Ok(CreateOutcome::Conflict);
        }
        Err(err) => return Err(err).context("failed to insert mailbox user"),
    };

    let query = "INSERT INTO mailbox_ownerships (admin_id, user_id) VALUES ($1, $2)";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(admin_id)
        .bind(user_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert mailbox ownership")?;

    let query = r"
        INSERT INTO recovery_envelopes (user_id, wrapped_key, sealed_password, hint)
        VALUES ($1, $2, $3, $4)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(&envelope.wrapped_key)
        .bind(&envelope.sealed_password)
        .bind(hint)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert recovery envelope")?;

    let query = "INSERT INTO creation_pending (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to queue mailbox creation")?;

    tx.commit().await.context("commit mailbox transaction")?;

    Ok(CreateOutcome::Created)
}

/// Swap the stored hash, reseal the envelope and queue the rekey signal in
/// one transaction.
pub(super) async fn update_mailbox_password(
    pool: &PgPool,
    user_id: i64,
    password_hash: &str,
    envelope: &SealedEnvelope,
    hint: &str,
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin rekey transaction")?;

    let query = "UPDATE virtual_users SET password_hash = $2 WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to update mailbox password")?;

    let query = r"
        INSERT INTO recovery_envelopes (user_id, wrapped_key, sealed_password, hint)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id) DO UPDATE SET
            wrapped_key = EXCLUDED.wrapped_key,
            sealed_password = EXCLUDED.sealed_password,
            hint = EXCLUDED.hint,
            updated_at = NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(&envelope.wrapped_key)
        .bind(&envelope.sealed_password)
        .bind(hint)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to reseal recovery envelope")?;

    let query = "INSERT INTO rekey_pending (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to queue mailbox rekey")?;

    tx.commit().await.context("commit rekey transaction")?;

    Ok(())
}

pub(super) async fn fetch_envelope(pool: &PgPool, user_id: i64) -> Result<Option<SealedEnvelope>> {
    let query = "SELECT wrapped_key, sealed_password FROM recovery_envelopes WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch recovery envelope")?;

    Ok(row.map(|row| SealedEnvelope {
        wrapped_key: row.get("wrapped_key"),
        sealed_password: row.get("sealed_password"),
    }))
}

pub(super) async fn fetch_hint(pool: &PgPool, user_id: i64) -> Result<Option<String>> {
    let query = "SELECT hint FROM recovery_envelopes WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch recovery hint")?;

    Ok(row.map(|row| row.get("hint")))
}

/// Drop the user row (ownership, envelope and pending signals cascade),
/// drop the aliases pointing at it and record the address for the external
/// worker to tear down.
pub(super) async fn delete_mailbox(pool: &PgPool, user_id: i64, email: &str) -> Result<()> {
    let mut tx = pool.begin().await.context("begin delete transaction")?;

    let query = "DELETE FROM virtual_aliases WHERE destination = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to delete mailbox aliases")?;

    let query = "DELETE FROM virtual_users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to delete mailbox user")?;

    let query = "INSERT INTO deletion_pending (email) VALUES ($1)";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to queue mailbox deletion")?;

    tx.commit().await.context("commit delete transaction")?;

    Ok(())
}
