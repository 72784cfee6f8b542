//! Approval gate for review-gated environments.
//!
//! The gate reads required approver groups from the environment definition
//! and compares them against the approvals recorded on a review. It never
//! escalates and never times out: an unapproved review stays `Pending`
//! until a human acts.

use std::collections::{BTreeMap, BTreeSet};

use uplift_core::{Environment, SyncPolicy};

/// Outcome of an approval check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalCheck {
    /// Every required group has approved and the approval count is met.
    Satisfied,
    /// One or more requirements are unmet. `missing_groups` lists the
    /// groups with no approving member yet; it is empty when group
    /// coverage is complete but the distinct-approver count is short.
    Pending {
        /// Groups still lacking an approval.
        missing_groups: BTreeSet<String>,
    },
}

impl ApprovalCheck {
    /// Whether the gate releases the review.
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

/// Checks review approvals against environment policy.
#[derive(Debug, Clone, Default)]
pub struct ApprovalGate {
    /// Group name to member logins.
    membership: BTreeMap<String, BTreeSet<String>>,
}

impl ApprovalGate {
    /// Build a gate from group membership configuration.
    pub fn new(membership: BTreeMap<String, BTreeSet<String>>) -> Self {
        Self { membership }
    }

    /// Evaluate the gate for a review's approvers.
    ///
    /// Auto-sync environments are trivially satisfied (they never route
    /// through a review). For manual environments, every configured
    /// approver group needs at least one approving member, and the number
    /// of distinct approvers must reach the environment's
    /// `required_approvals`.
    pub fn check(&self, environment: &Environment, approvers: &BTreeSet<String>) -> ApprovalCheck {
        let SyncPolicy::Manual {
            required_approvals,
            approver_groups,
        } = &environment.sync_policy
        else {
            return ApprovalCheck::Satisfied;
        };

        let missing_groups: BTreeSet<String> = approver_groups
            .iter()
            .filter(|group| {
                let members = self.membership.get(*group);
                !members.is_some_and(|members| !members.is_disjoint(approvers))
            })
            .cloned()
            .collect();

        if !missing_groups.is_empty() {
            return ApprovalCheck::Pending { missing_groups };
        }
        if (approvers.len() as u32) < *required_approvals {
            return ApprovalCheck::Pending {
                missing_groups: BTreeSet::new(),
            };
        }
        ApprovalCheck::Satisfied
    }
}
