//! Route gate for the site's pages.
//!
//! Every page request is classified against a static prefix table as
//! public, protected, admin or auth, then allowed, prompted, redirected or
//! denied depending on whether a user session and an admin session exist.
//!
//! ## Matching
//! - paths are normalized first (see [`router::normalize_path`])
//! - prefixes match on path-segment boundaries only
//! - the longest matching prefix wins
//! - unknown paths are public

pub mod router;

pub use router::{AccessContext, RouteDecision, RouteKind, RouteMatch, RouteRule, RouteTable};
