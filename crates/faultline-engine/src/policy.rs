//! The repair selection policy.
//!
//! Currently a single policy exists: select incidents whose issue belongs
//! to the infrastructure category. Matching is an exact category check
//! first, then a substring heuristic over the issue-type tag so records
//! written with unrecognized-but-clearly-infrastructure tags (e.g. a newer
//! generator's `fiber_flap`) are still picked up.

use faultline_core::event::{Issue, IssueCategory};

/// Substrings of issue-type tags treated as infrastructure when the exact
/// category tag does not match.
const INFRA_TOKENS: &[&str] = &["infra", "fiber", "tower", "backhaul"];

/// True when the issue falls under the infrastructure repair policy.
#[must_use]
pub fn is_infrastructure(issue: &Issue) -> bool {
    if issue.category == IssueCategory::Infrastructure {
        return true;
    }
    let tag = issue.detail.type_tag();
    INFRA_TOKENS.iter().any(|token| tag.contains(token))
}
