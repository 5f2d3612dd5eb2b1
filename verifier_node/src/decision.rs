//! Denylist evaluation.
//!
//! Matches are collected by walking the denylist in configuration order, so
//! both the `{mods}` text and the choice of per-mod message are deterministic
//! for a given policy.

use crate::config::Policy;
use crate::protocol::AttestationReport;
use crate::template::{MessageTemplate, Substitutions};

/// Result of evaluating one attestation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No denylisted identifier was reported
    Accept,
    /// At least one denylisted identifier was reported
    Reject {
        /// Matched identifiers in denylist order
        matches: Vec<String>,
        /// Rendered disconnect message
        message: String,
    },
}

impl Decision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Decision::Accept)
    }
}

/// Denylisted identifiers present in `report`, in denylist order.
pub fn find_matches(report: &AttestationReport, policy: &Policy) -> Vec<String> {
    policy
        .denylist
        .iter()
        .filter(|id| report.contains(id))
        .map(str::to_string)
        .collect()
}

/// First per-mod template among `matches`, falling back to the default.
pub fn select_template<'p>(matches: &[String], policy: &'p Policy) -> &'p MessageTemplate {
    matches
        .iter()
        .find_map(|id| policy.message_templates.get(id))
        .unwrap_or(&policy.default_rejection_template)
}

/// Evaluate a report for the session named `player`.
pub fn evaluate(report: &AttestationReport, policy: &Policy, player: &str) -> Decision {
    let matches = find_matches(report, policy);
    if matches.is_empty() {
        return Decision::Accept;
    }

    let template = select_template(&matches, policy);
    let message = template.render(
        &Substitutions {
            player,
            mods: &matches,
        },
        policy.translate_color_codes,
    );

    Decision::Reject { matches, message }
}

/// Render the timeout message for `player`.
pub fn timeout_message(policy: &Policy, player: &str) -> String {
    policy.timeout_template.render(
        &Substitutions { player, mods: &[] },
        policy.translate_color_codes,
    )
}
