use anyhow::Result;
use clap::{Arg, ArgMatches, Command};

pub const ARG_LOGIN_MAX_ATTEMPTS: &str = "login-max-attempts";
pub const ARG_LOGIN_WINDOW_MINUTES: &str = "login-window-minutes";
pub const ARG_LOGIN_BLOCK_MINUTES: &str = "login-block-minutes";
pub const ARG_REGISTRATION_MAX_ATTEMPTS: &str = "registration-max-attempts";
pub const ARG_REGISTRATION_WINDOW_MINUTES: &str = "registration-window-minutes";
pub const ARG_REGISTRATION_BLOCK_MINUTES: &str = "registration-block-minutes";
pub const ARG_REGISTRATION_TTL_HOURS: &str = "registration-ttl-hours";
pub const ARG_SWEEP_INTERVAL_SECONDS: &str = "sweep-interval-seconds";
pub const ARG_RATE_LIMIT_RETENTION_MINUTES: &str = "rate-limit-retention-minutes";

#[derive(Debug, Clone)]
pub struct Options {
    pub login_max_attempts: i32,
    pub login_window_minutes: i64,
    pub login_block_minutes: i64,
    pub registration_max_attempts: i32,
    pub registration_window_minutes: i64,
    pub registration_block_minutes: i64,
    pub registration_ttl_hours: i64,
    pub sweep_interval_seconds: u64,
    pub rate_limit_retention_minutes: i64,
}

impl Options {
    /// Parse rate limit and sweeper arguments from matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            login_max_attempts: required(matches, ARG_LOGIN_MAX_ATTEMPTS)?,
            login_window_minutes: required(matches, ARG_LOGIN_WINDOW_MINUTES)?,
            login_block_minutes: required(matches, ARG_LOGIN_BLOCK_MINUTES)?,
            registration_max_attempts: required(matches, ARG_REGISTRATION_MAX_ATTEMPTS)?,
            registration_window_minutes: required(matches, ARG_REGISTRATION_WINDOW_MINUTES)?,
            registration_block_minutes: required(matches, ARG_REGISTRATION_BLOCK_MINUTES)?,
            registration_ttl_hours: required(matches, ARG_REGISTRATION_TTL_HOURS)?,
            sweep_interval_seconds: required(matches, ARG_SWEEP_INTERVAL_SECONDS)?,
            rate_limit_retention_minutes: required(matches, ARG_RATE_LIMIT_RETENTION_MINUTES)?,
        })
    }
}

fn required<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Result<T> {
    matches
        .get_one::<T>(id)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_login_args(command);
    let command = with_registration_args(command);
    with_sweeper_args(command)
}

fn with_login_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOGIN_MAX_ATTEMPTS)
                .long(ARG_LOGIN_MAX_ATTEMPTS)
                .help("Login attempts allowed per key inside the window")
                .env("POSTKESTO_LOGIN_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(i32)),
        )
        .arg(
            Arg::new(ARG_LOGIN_WINDOW_MINUTES)
                .long(ARG_LOGIN_WINDOW_MINUTES)
                .help("Window for counting login attempts, in minutes")
                .env("POSTKESTO_LOGIN_WINDOW_MINUTES")
                .default_value("15")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_LOGIN_BLOCK_MINUTES)
                .long(ARG_LOGIN_BLOCK_MINUTES)
                .help("Block duration once the login budget is spent, in minutes")
                .env("POSTKESTO_LOGIN_BLOCK_MINUTES")
                .default_value("30")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_registration_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_REGISTRATION_MAX_ATTEMPTS)
                .long(ARG_REGISTRATION_MAX_ATTEMPTS)
                .help("Registration attempts allowed per key inside the window")
                .env("POSTKESTO_REGISTRATION_MAX_ATTEMPTS")
                .default_value("3")
                .value_parser(clap::value_parser!(i32)),
        )
        .arg(
            Arg::new(ARG_REGISTRATION_WINDOW_MINUTES)
                .long(ARG_REGISTRATION_WINDOW_MINUTES)
                .help("Window for counting registration attempts, in minutes")
                .env("POSTKESTO_REGISTRATION_WINDOW_MINUTES")
                .default_value("60")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_REGISTRATION_BLOCK_MINUTES)
                .long(ARG_REGISTRATION_BLOCK_MINUTES)
                .help("Block duration once the registration budget is spent, in minutes")
                .env("POSTKESTO_REGISTRATION_BLOCK_MINUTES")
                .default_value("60")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_REGISTRATION_TTL_HOURS)
                .long(ARG_REGISTRATION_TTL_HOURS)
                .help("Hours an unconfirmed registration stays claimable")
                .env("POSTKESTO_REGISTRATION_TTL_HOURS")
                .default_value("48")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_sweeper_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL_SECONDS)
                .long(ARG_SWEEP_INTERVAL_SECONDS)
                .help("Interval between maintenance sweeps of expired rows, in seconds")
                .env("POSTKESTO_SWEEP_INTERVAL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_RETENTION_MINUTES)
                .long(ARG_RATE_LIMIT_RETENTION_MINUTES)
                .help("Idle rate limit rows older than this are swept, in minutes")
                .env("POSTKESTO_RATE_LIMIT_RETENTION_MINUTES")
                .default_value("60")
                .value_parser(clap::value_parser!(i64)),
        )
}
