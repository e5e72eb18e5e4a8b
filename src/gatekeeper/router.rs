//! Route table and access decisions.
//!
//! Paths are normalized, matched against a static prefix table and turned
//! into a [`RouteDecision`] for the caller's [`AccessContext`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where unauthenticated users are sent away from admin pages.
pub const HOME_PATH: &str = "/";

/// Where authenticated users are sent away from login/register pages.
pub const DASHBOARD_PATH: &str = "/dashboard/";

// ── Route kinds ──────────────────────────────────────────────────

/// Access class of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    /// Open to everyone.
    Public,
    /// Requires an active user session.
    Protected,
    /// Requires an active admin session.
    Admin,
    /// Login and registration pages.
    Auth,
}

impl RouteKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Public => "public",
            Self::Protected => "protected",
            Self::Admin => "admin",
            Self::Auth => "auth",
        }
    }
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the route table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub prefix: String,
    pub kind: RouteKind,
}

/// Result of classifying a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteMatch {
    /// The normalized path.
    pub path: String,
    pub kind: RouteKind,
    /// The table prefix that matched; `None` for unknown paths.
    pub prefix: Option<String>,
}

// ── Decisions ────────────────────────────────────────────────────

/// Who is asking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessContext {
    /// An active user session exists.
    pub authenticated: bool,
    /// An active admin session exists.
    pub admin: bool,
}

/// What the caller should do with the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RouteDecision {
    Allow,
    /// Show the login prompt, then come back to `return_to`.
    PromptLogin { return_to: String },
    Deny { redirect: String },
    Redirect { to: String },
}

impl RouteDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

impl fmt::Display for RouteDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("allow"),
            Self::PromptLogin { return_to } => write!(f, "prompt login (return to {return_to})"),
            Self::Deny { redirect } => write!(f, "deny (redirect to {redirect})"),
            Self::Redirect { to } => write!(f, "redirect to {to}"),
        }
    }
}

// ── Normalization ────────────────────────────────────────────────

/// Canonical form of a request path.
///
/// Drops query and fragment, lower-cases, collapses repeated slashes,
/// resolves `.` and `..` segments (never above `/`), maps `.../index.html`
/// to its directory and guarantees a leading `/`.
pub fn normalize_path(raw: &str) -> String {
    let end = raw.find(['?', '#']).unwrap_or(raw.len());
    let lowered = raw[..end].trim().to_lowercase();

    let mut segments: Vec<&str> = Vec::new();
    let mut trailing = false;
    for segment in lowered.split('/') {
        trailing = false;
        match dot_segment(segment) {
            _ if segment.is_empty() => trailing = true,
            Some(DotSegment::Current) => trailing = true,
            Some(DotSegment::Parent) => {
                segments.pop();
                trailing = true;
            }
            None => segments.push(segment),
        }
    }

    if segments.last() == Some(&"index.html") {
        segments.pop();
        trailing = true;
    }

    let mut path = String::with_capacity(lowered.len() + 1);
    path.push('/');
    path.push_str(&segments.join("/"));
    if trailing && !segments.is_empty() {
        path.push('/');
    }
    path
}

enum DotSegment {
    Current,
    Parent,
}

/// `.` and `..`, including their `%2e` spellings.
fn dot_segment(segment: &str) -> Option<DotSegment> {
    match segment.replace("%2e", ".").as_str() {
        "." => Some(DotSegment::Current),
        ".." => Some(DotSegment::Parent),
        _ => None,
    }
}

/// Whether `prefix` covers `path` on a segment boundary.
fn covers(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return path == "/";
    }
    let prefix = prefix.trim_end_matches('/');
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

// ── Route table ──────────────────────────────────────────────────

/// Static prefix table. The longest matching prefix wins.
#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::default_table()
    }
}

impl RouteTable {
    pub fn new(rules: impl IntoIterator<Item = RouteRule>) -> Self {
        let mut rules: Vec<RouteRule> = rules
            .into_iter()
            .map(|rule| RouteRule {
                prefix: normalize_path(&rule.prefix),
                kind: rule.kind,
            })
            .collect();
        // Longest first so the first hit is the most specific
        rules.sort_by(|a, b| {
            b.prefix
                .trim_end_matches('/')
                .len()
                .cmp(&a.prefix.trim_end_matches('/').len())
        });
        Self { rules }
    }

    /// The site's page layout.
    pub fn default_table() -> Self {
        let rule = |prefix: &str, kind| RouteRule {
            prefix: prefix.into(),
            kind,
        };
        Self::new([
            rule("/", RouteKind::Public),
            rule("/about/", RouteKind::Public),
            rule("/contact/", RouteKind::Public),
            rule("/services/", RouteKind::Public),
            rule("/education/", RouteKind::Public),
            rule("/consulting/", RouteKind::Public),
            rule("/resources/", RouteKind::Public),
            rule("/legal/", RouteKind::Public),
            rule("/dashboard/", RouteKind::Protected),
            rule("/profile/", RouteKind::Protected),
            rule("/settings/", RouteKind::Protected),
            rule("/admin/", RouteKind::Admin),
            rule("/auth/", RouteKind::Auth),
            rule("/login/", RouteKind::Auth),
            rule("/register/", RouteKind::Auth),
        ])
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Classify a raw path. Unknown paths are public.
    pub fn classify(&self, raw: &str) -> RouteMatch {
        let path = normalize_path(raw);
        match self.rules.iter().find(|rule| covers(&rule.prefix, &path)) {
            Some(rule) => RouteMatch {
                kind: rule.kind,
                prefix: Some(rule.prefix.clone()),
                path,
            },
            None => RouteMatch {
                path,
                kind: RouteKind::Public,
                prefix: None,
            },
        }
    }

    /// Decide what to do with a request for `raw`.
    pub fn decide(&self, raw: &str, ctx: &AccessContext) -> RouteDecision {
        let route = self.classify(raw);
        let decision = match route.kind {
            RouteKind::Public => RouteDecision::Allow,
            RouteKind::Protected if ctx.authenticated => RouteDecision::Allow,
            RouteKind::Protected => RouteDecision::PromptLogin {
                return_to: route.path.clone(),
            },
            RouteKind::Admin if ctx.admin => RouteDecision::Allow,
            RouteKind::Admin => RouteDecision::Deny {
                redirect: HOME_PATH.into(),
            },
            RouteKind::Auth if ctx.authenticated => RouteDecision::Redirect {
                to: DASHBOARD_PATH.into(),
            },
            RouteKind::Auth => RouteDecision::Allow,
        };
        tracing::debug!(path = %route.path, kind = %route.kind, decision = %decision, "Route checked");
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANON: AccessContext = AccessContext {
        authenticated: false,
        admin: false,
    };
    const USER: AccessContext = AccessContext {
        authenticated: true,
        admin: false,
    };
    const ADMIN: AccessContext = AccessContext {
        authenticated: false,
        admin: true,
    };

    fn make_table() -> RouteTable {
        RouteTable::default_table()
    }

    #[test]
    fn normalize_strips_query_and_fragment() {
        assert_eq!(normalize_path("/dashboard/?tab=1#top"), "/dashboard/");
        assert_eq!(normalize_path("/about#team"), "/about");
    }

    #[test]
    fn normalize_lowercases_and_collapses_slashes() {
        assert_eq!(normalize_path("//Dashboard///Profile"), "/dashboard/profile");
        assert_eq!(normalize_path("ADMIN/"), "/admin/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn normalize_maps_index_html_to_directory() {
        assert_eq!(normalize_path("/index.html"), "/");
        assert_eq!(normalize_path("/dashboard/index.html"), "/dashboard/");
        assert_eq!(normalize_path("/Admin/INDEX.HTML?x=1"), "/admin/");
        // Only a whole segment counts
        assert_eq!(normalize_path("/myindex.html"), "/myindex.html");
    }

    #[test]
    fn normalize_resolves_dot_segments() {
        assert_eq!(normalize_path("/about/../admin/"), "/admin/");
        assert_eq!(normalize_path("/./admin/"), "/admin/");
        assert_eq!(normalize_path("/../../admin"), "/admin");
        assert_eq!(normalize_path("/dashboard/.."), "/");
        assert_eq!(normalize_path("/dashboard/./courses/."), "/dashboard/courses/");
        assert_eq!(normalize_path("/about/%2E%2E/admin/"), "/admin/");
        // Dots inside a name are not segments
        assert_eq!(normalize_path("/v1..2/notes.txt"), "/v1..2/notes.txt");
    }

    #[test]
    fn classification_is_stable_for_core_pages() {
        let table = make_table();
        for _ in 0..3 {
            assert_eq!(table.classify("/").kind, RouteKind::Public);
            assert_eq!(table.classify("/dashboard/").kind, RouteKind::Protected);
            assert_eq!(table.classify("/admin/").kind, RouteKind::Admin);
        }
    }

    #[test]
    fn classify_nested_and_index_paths() {
        let table = make_table();
        assert_eq!(table.classify("/dashboard/courses/intro").kind, RouteKind::Protected);
        assert_eq!(table.classify("/dashboard").kind, RouteKind::Protected);
        assert_eq!(table.classify("/admin/index.html").kind, RouteKind::Admin);
        assert_eq!(table.classify("/ADMIN/users").kind, RouteKind::Admin);
        assert_eq!(table.classify("/auth/login.html").kind, RouteKind::Auth);
    }

    #[test]
    fn prefix_does_not_over_match_sibling_paths() {
        let table = make_table();
        let m = table.classify("/administrator-guide/");
        assert_eq!(m.kind, RouteKind::Public);
        assert_eq!(m.prefix, None);
        assert_eq!(table.classify("/dashboards").kind, RouteKind::Public);

        // Dot segments cannot smuggle an admin path past the prefix check
        assert_eq!(table.classify("/about/../admin/").kind, RouteKind::Admin);
        assert_eq!(table.classify("/./admin/").kind, RouteKind::Admin);
        assert_eq!(
            table.decide("/about/../admin/", &ANON),
            RouteDecision::Deny {
                redirect: HOME_PATH.into()
            }
        );
        assert_eq!(
            table.decide("/public/../dashboard/", &ANON),
            RouteDecision::PromptLogin {
                return_to: "/dashboard/".into()
            }
        );
    }

    #[test]
    fn longest_prefix_wins() {
        let table = RouteTable::new([
            RouteRule {
                prefix: "/dashboard/".into(),
                kind: RouteKind::Protected,
            },
            RouteRule {
                prefix: "/dashboard/public/".into(),
                kind: RouteKind::Public,
            },
        ]);
        assert_eq!(table.classify("/dashboard/public/faq").kind, RouteKind::Public);
        assert_eq!(table.classify("/dashboard/private").kind, RouteKind::Protected);
    }

    #[test]
    fn unknown_paths_are_public() {
        let table = make_table();
        let m = table.classify("/blog/2024/post");
        assert_eq!(m.kind, RouteKind::Public);
        assert!(table.decide("/blog/2024/post", &ANON).is_allowed());
    }

    #[test]
    fn protected_prompts_login_when_anonymous() {
        let table = make_table();
        assert_eq!(
            table.decide("/Dashboard/index.html?x=1", &ANON),
            RouteDecision::PromptLogin {
                return_to: "/dashboard/".into()
            }
        );
        assert_eq!(table.decide("/dashboard/", &USER), RouteDecision::Allow);
    }

    #[test]
    fn admin_requires_admin_session() {
        let table = make_table();
        assert_eq!(
            table.decide("/admin/", &USER),
            RouteDecision::Deny {
                redirect: "/".into()
            }
        );
        assert_eq!(table.decide("/admin/", &ADMIN), RouteDecision::Allow);
    }

    #[test]
    fn auth_pages_redirect_when_logged_in() {
        let table = make_table();
        assert_eq!(table.decide("/login/", &ANON), RouteDecision::Allow);
        assert_eq!(
            table.decide("/register/", &USER),
            RouteDecision::Redirect {
                to: "/dashboard/".into()
            }
        );
    }

    #[test]
    fn decision_serializes_with_tag() {
        let json = serde_json::to_value(RouteDecision::PromptLogin {
            return_to: "/profile/".into(),
        })
        .unwrap();
        assert_eq!(json["decision"], "prompt_login");
        assert_eq!(json["return_to"], "/profile/");
    }
}
