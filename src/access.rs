//! Role gating at the edge.
//!
//! The identity gateway in front of this service sets `x-studio-role` on
//! every request. [`authorize`] is the single capability check; [`gate`]
//! applies it to every route: pages are redirected, admin API calls get 403.

use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

/// Header carrying the caller's role
pub const ROLE_HEADER: &str = "x-studio-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    None,
}

impl Role {
    /// Unknown or missing values are treated as signed out
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|r| r.trim().to_ascii_lowercase()).as_deref() {
            Some("admin") => Role::Admin,
            Some("user") => Role::User,
            _ => Role::None,
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::parse(headers.get(ROLE_HEADER).and_then(|v| v.to_str().ok()))
    }

    pub fn is_logged_in(&self) -> bool {
        !matches!(self, Role::None)
    }
}

/// Result of the capability check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    Redirect(&'static str),
    Forbidden,
}

fn within(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

pub fn authorize(role: Role, path: &str) -> Access {
    if within(path, "/api/admin") {
        return match role {
            Role::Admin => Access::Allow,
            _ => Access::Forbidden,
        };
    }

    if within(path, "/admin") {
        return match role {
            Role::Admin => Access::Allow,
            Role::User => Access::Redirect("/dashboard"),
            Role::None => Access::Redirect("/auth"),
        };
    }

    if within(path, "/dashboard") {
        return match role {
            Role::User => Access::Allow,
            Role::Admin => Access::Redirect("/admin"),
            Role::None => Access::Redirect("/auth"),
        };
    }

    if within(path, "/auth") {
        return match role {
            Role::None => Access::Allow,
            Role::Admin => Access::Redirect("/admin"),
            Role::User => Access::Redirect("/dashboard"),
        };
    }

    Access::Allow
}

/// Middleware applying [`authorize`] to every request
pub async fn gate(request: Request<Body>, next: Next) -> Response {
    let role = Role::from_headers(request.headers());
    let path = request.uri().path().to_string();

    match authorize(role, &path) {
        Access::Allow => next.run(request).await,
        Access::Redirect(target) => {
            debug!(path = %path, ?role, location = target, "Redirecting");
            (StatusCode::SEE_OTHER, [(header::LOCATION, target)]).into_response()
        }
        Access::Forbidden => {
            debug!(path = %path, ?role, "Forbidden");
            (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "error": {
                        "message": "Admin access required",
                        "type": "forbidden"
                    }
                })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse(Some("admin")), Role::Admin);
        assert_eq!(Role::parse(Some(" User ")), Role::User);
        assert_eq!(Role::parse(Some("root")), Role::None);
        assert_eq!(Role::parse(None), Role::None);
    }

    #[test]
    fn test_admin_pages() {
        assert_eq!(authorize(Role::Admin, "/admin"), Access::Allow);
        assert_eq!(authorize(Role::User, "/admin/gallery"), Access::Redirect("/dashboard"));
        assert_eq!(authorize(Role::None, "/admin"), Access::Redirect("/auth"));
    }

    #[test]
    fn test_dashboard_pages() {
        assert_eq!(authorize(Role::User, "/dashboard"), Access::Allow);
        assert_eq!(authorize(Role::Admin, "/dashboard"), Access::Redirect("/admin"));
        assert_eq!(authorize(Role::None, "/dashboard/bookings"), Access::Redirect("/auth"));
    }

    #[test]
    fn test_auth_page_bounces_signed_in() {
        assert_eq!(authorize(Role::None, "/auth"), Access::Allow);
        assert_eq!(authorize(Role::Admin, "/auth"), Access::Redirect("/admin"));
        assert_eq!(authorize(Role::User, "/auth"), Access::Redirect("/dashboard"));
    }

    #[test]
    fn test_admin_api_forbidden() {
        assert_eq!(authorize(Role::Admin, "/api/admin/collections/faq"), Access::Allow);
        assert_eq!(authorize(Role::User, "/api/admin/collections/faq"), Access::Forbidden);
        assert_eq!(authorize(Role::None, "/api/admin"), Access::Forbidden);
    }

    #[test]
    fn test_prefix_is_segment_aware() {
        assert_eq!(authorize(Role::None, "/administrator"), Access::Allow);
        assert_eq!(authorize(Role::None, "/authors"), Access::Allow);
        assert_eq!(authorize(Role::None, "/api/chat"), Access::Allow);
        assert_eq!(authorize(Role::None, "/"), Access::Allow);
        // /api/auth/check is public, not the /auth page
        assert_eq!(authorize(Role::Admin, "/api/auth/check"), Access::Allow);
    }
}
