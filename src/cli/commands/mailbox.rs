use crate::api::MailboxScheme;
use anyhow::Result;
use clap::{Arg, ArgMatches, Command, builder::ValueParser};

pub const ARG_MAILBOX_HASH_SCHEME: &str = "mailbox-hash-scheme";
pub const ARG_MAX_MAILBOXES_PER_ADMIN: &str = "max-mailboxes-per-admin";
pub const ARG_MAX_ALIASES_PER_MAILBOX: &str = "max-aliases-per-mailbox";

#[derive(Debug, Clone)]
pub struct Options {
    pub scheme: MailboxScheme,
    pub max_mailboxes_per_admin: i64,
    pub max_aliases_per_mailbox: i64,
}

impl Options {
    /// Parse mailbox provisioning arguments from matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let scheme = matches
            .get_one::<MailboxScheme>(ARG_MAILBOX_HASH_SCHEME)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_MAILBOX_HASH_SCHEME}"))?;
        let max_mailboxes_per_admin = matches
            .get_one::<i64>(ARG_MAX_MAILBOXES_PER_ADMIN)
            .copied()
            .ok_or_else(|| {
                anyhow::anyhow!("missing required argument: --{ARG_MAX_MAILBOXES_PER_ADMIN}")
            })?;

        let max_aliases_per_mailbox = matches
            .get_one::<i64>(ARG_MAX_ALIASES_PER_MAILBOX)
            .copied()
            .ok_or_else(|| {
                anyhow::anyhow!("missing required argument: --{ARG_MAX_ALIASES_PER_MAILBOX}")
            })?;

        Ok(Self {
            scheme,
            max_mailboxes_per_admin,
            max_aliases_per_mailbox,
        })
    }
}

#[must_use]
pub fn validator_scheme() -> ValueParser {
    ValueParser::from(
        move |scheme: &str| -> std::result::Result<MailboxScheme, String> {
            scheme
                .parse::<MailboxScheme>()
                .map_err(|err| err.to_string())
        },
    )
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MAILBOX_HASH_SCHEME)
                .long(ARG_MAILBOX_HASH_SCHEME)
                .help(
                    "Password scheme for new mailbox hashes: argon2id, argon2i, bcrypt, \
                     sha512-crypt, sha256-crypt or pbkdf2",
                )
                .env("POSTKESTO_MAILBOX_HASH_SCHEME")
                .default_value("argon2id")
                .value_parser(validator_scheme()),
        )
        .arg(
            Arg::new(ARG_MAX_MAILBOXES_PER_ADMIN)
                .long(ARG_MAX_MAILBOXES_PER_ADMIN)
                .help("Mailboxes a single admin may own")
                .env("POSTKESTO_MAX_MAILBOXES_PER_ADMIN")
                .default_value("50")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_MAX_ALIASES_PER_MAILBOX)
                .long(ARG_MAX_ALIASES_PER_MAILBOX)
                .help("Aliases that may point at a single mailbox")
                .env("POSTKESTO_MAX_ALIASES_PER_MAILBOX")
                .default_value("100")
                .value_parser(clap::value_parser!(i64)),
        )
}
