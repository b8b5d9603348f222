use crate::api;
use anyhow::Result;
use secrecy::SecretString;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub base_url: String,
    pub session_secret: SecretString,
    pub session_ttl_seconds: i64,
    pub login_max_attempts: i32,
    pub login_window_minutes: i64,
    pub login_block_minutes: i64,
    pub registration_max_attempts: i32,
    pub registration_window_minutes: i64,
    pub registration_block_minutes: i64,
    pub registration_ttl_hours: i64,
    pub mailbox_scheme: api::MailboxScheme,
    pub max_mailboxes_per_admin: i64,
    pub max_aliases_per_mailbox: i64,
    pub outbox_poll_seconds: u64,
    pub outbox_batch_size: usize,
    pub outbox_max_attempts: u32,
    pub outbox_backoff_base_seconds: u64,
    pub outbox_backoff_max_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub rate_limit_retention_minutes: i64,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if the database pool cannot connect or the listener fails to bind.
pub async fn execute(args: Args) -> Result<()> {
    let config = api::PanelConfig::new(args.base_url, args.session_secret)
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_login_policy(api::RateLimitPolicy::new(
            args.login_max_attempts,
            args.login_window_minutes,
            args.login_block_minutes,
        ))
        .with_registration_policy(api::RateLimitPolicy::new(
            args.registration_max_attempts,
            args.registration_window_minutes,
            args.registration_block_minutes,
        ))
        .with_registration_ttl_hours(args.registration_ttl_hours)
        .with_mailbox_scheme(args.mailbox_scheme)
        .with_max_mailboxes_per_admin(args.max_mailboxes_per_admin)
        .with_max_aliases_per_mailbox(args.max_aliases_per_mailbox);

    let email_config = api::EmailWorkerConfig::new()
        .with_poll_interval_seconds(args.outbox_poll_seconds)
        .with_batch_size(args.outbox_batch_size)
        .with_max_attempts(args.outbox_max_attempts)
        .with_backoff_base_seconds(args.outbox_backoff_base_seconds)
        .with_backoff_max_seconds(args.outbox_backoff_max_seconds);

    let maintenance_config = api::MaintenanceConfig::new()
        .with_sweep_interval_seconds(args.sweep_interval_seconds)
        .with_rate_limit_retention_minutes(args.rate_limit_retention_minutes);

    api::new(args.port, args.dsn, config, email_config, maintenance_config).await
}
