//! Request/response types for mailbox provisioning and recovery endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One mailbox owned by the calling admin.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MailboxSummary {
    pub email: String,
    pub active: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreateMailboxRequest {
    pub email: String,
    pub password: String,
}

/// Returned once at creation; the recovery phrase is not retrievable later.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MailboxCreated {
    pub email: String,
    pub recovery_phrase: String,
    pub recovery_hint: String,
}

/// One forwarding alias, always pointing at a mailbox the caller owns.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AliasSummary {
    pub id: i64,
    pub source: String,
    pub destination: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreateAliasRequest {
    pub source: String,
    pub destination: String,
}

/// Replaces both sides of an alias; the new destination must also be an
/// owned mailbox.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UpdateAliasRequest {
    pub source: String,
    pub destination: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ChangePasswordRequest {
    pub password: String,
}

/// Fresh recovery material after a password change.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RekeyResponse {
    pub recovery_phrase: String,
    pub recovery_hint: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RecoveryHintResponse {
    pub recovery_hint: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RecoverRequest {
    pub recovery_phrase: String,
}

/// The cleartext mailbox password released by a successful recovery.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RecoveredPassword {
    pub mailbox_password: String,
}
