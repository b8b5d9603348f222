//! API handlers for the panel.
//!
//! `auth` owns sessions, CSRF, login throttling and admin registration,
//! `mailbox` the ownership-scoped provisioning routes, and `health` the
//! probe endpoint.

pub mod auth;
pub mod health;
pub mod mailbox;
