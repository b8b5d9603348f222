use super::handlers::{auth, health, mailbox};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI spec.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` spec. Handlers sharing a path are
/// registered in one `routes!` call. Routes added outside (like `OPTIONS
/// /health`) are intentionally not documented.
pub(crate) fn api_router() -> OpenApiRouter {
    // `routes!` reads #[utoipa::path] to bind HTTP method + path and add the route to OpenAPI.
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(auth::login::session_info))
        .routes(routes!(auth::login::login))
        .routes(routes!(auth::login::logout))
        .routes(routes!(auth::register::register))
        .routes(routes!(auth::register::confirm))
        .routes(routes!(auth::moderation::list_registrations))
        .routes(routes!(auth::moderation::approve))
        .routes(routes!(auth::moderation::deny))
        .routes(routes!(
            mailbox::provision::list_mailboxes,
            mailbox::provision::create_mailbox
        ))
        .routes(routes!(mailbox::provision::delete_mailbox))
        .routes(routes!(
            mailbox::alias::list_aliases,
            mailbox::alias::create_alias
        ))
        .routes(routes!(
            mailbox::alias::update_alias,
            mailbox::alias::delete_alias
        ))
        .routes(routes!(mailbox::recover::change_password))
        .routes(routes!(
            mailbox::recover::recovery_hint,
            mailbox::recover::recover_password
        ));

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Sessions, login and admin registration".to_string());

    let mut admin_tag = Tag::new("admin");
    admin_tag.description = Some("Super admin moderation of registrations".to_string());

    let mut mailbox_tag = Tag::new("mailbox");
    mailbox_tag.description = Some("Ownership-scoped mailbox provisioning and recovery".to_string());

    let mut alias_tag = Tag::new("alias");
    alias_tag.description = Some("Forwarding aliases scoped to owned mailboxes".to_string());

    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Service and database probes".to_string());

    router.get_openapi_mut().tags =
        Some(vec![auth_tag, admin_tag, mailbox_tag, alias_tag, health_tag]);

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.split_once('<') {
        Some((name, rest)) => {
            let name = name.trim();
            let email = rest.trim_end_matches('>').trim();
            (
                (!name.is_empty()).then_some(name),
                (!email.is_empty()).then_some(email),
            )
        }
        None => {
            let name = author.trim();
            ((!name.is_empty()).then_some(name), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let spec = openapi();
        assert_eq!(spec.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(
            spec.info.description.as_deref(),
            Some(env!("CARGO_PKG_DESCRIPTION"))
        );

        let contact = spec.info.contact;
        assert!(contact.is_some());
        if let Some(contact) = contact {
            assert_eq!(contact.name.as_deref(), Some("Team Postkesto"));
            assert_eq!(contact.email.as_deref(), Some("team@postkesto.dev"));
        }

        let license = spec.info.license;
        assert!(license.is_some());
        if let Some(license) = license {
            assert_eq!(license.name, "BSD-3-Clause");
            assert_eq!(license.identifier.as_deref(), Some("BSD-3-Clause"));
        }
    }

    #[test]
    fn openapi_tags_and_paths() {
        let spec = openapi();
        let tags = spec.tags.clone().unwrap_or_default();
        assert!(tags.iter().any(|tag| tag.name == "auth"));
        assert!(tags.iter().any(|tag| tag.name == "admin"));
        assert!(tags.iter().any(|tag| tag.name == "mailbox"));
        assert!(tags.iter().any(|tag| tag.name == "alias"));

        assert!(spec.paths.paths.contains_key("/v1/auth/login"));
        assert!(spec.paths.paths.contains_key("/v1/mailboxes/{email}/recovery"));
        assert!(spec.paths.paths.contains_key("/v1/aliases"));
        assert!(spec.paths.paths.contains_key("/v1/aliases/{id}"));
        assert!(
            spec.paths
                .paths
                .contains_key("/v1/admin/registrations/{id}/approve")
        );
    }
}
