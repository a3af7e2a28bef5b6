use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The category of a gated operation a provider asks the core to authorize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    Tool,
    Write,
    Command,
}

/// Per-kind approval policy, mirroring this codebase's existing tool
/// approval engine (`Auto` runs without asking, `Ask` gates on a
/// `permission_request`, `Deny` refuses outright).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicy {
    Auto,
    Ask,
    Deny,
}

/// A named permission posture declared by the provider at handshake time
/// (§ GLOSSARY "Mode"). `availableModes` on the Agent snapshot is built from
/// a list of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeDescriptor {
    pub id: String,
    pub title: String,
    policies: HashMap<PermissionKind, ApprovalPolicy>,
}

impl ModeDescriptor {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            policies: HashMap::new(),
        }
    }

    pub fn with_policy(mut self, kind: PermissionKind, policy: ApprovalPolicy) -> Self {
        self.policies.insert(kind, policy);
        self
    }

    /// Policy for a kind not explicitly configured defaults to `Ask` — the
    /// safest posture, matching this codebase's existing tool policy engine
    /// falling back to `Ask` for unmatched commands.
    pub fn policy_for(&self, kind: PermissionKind) -> ApprovalPolicy {
        self.policies.get(&kind).copied().unwrap_or(ApprovalPolicy::Ask)
    }

    /// The three built-in modes named in `SPEC_FULL.md`'s scenarios.
    pub fn builtin_modes() -> Vec<ModeDescriptor> {
        vec![
            ModeDescriptor::new("read-only", "Read-only")
                .with_policy(PermissionKind::Tool, ApprovalPolicy::Auto)
                .with_policy(PermissionKind::Write, ApprovalPolicy::Ask)
                .with_policy(PermissionKind::Command, ApprovalPolicy::Ask),
            ModeDescriptor::new("auto", "Auto")
                .with_policy(PermissionKind::Tool, ApprovalPolicy::Auto)
                .with_policy(PermissionKind::Write, ApprovalPolicy::Ask)
                .with_policy(PermissionKind::Command, ApprovalPolicy::Ask),
            ModeDescriptor::new("full-access", "Full access")
                .with_policy(PermissionKind::Tool, ApprovalPolicy::Auto)
                .with_policy(PermissionKind::Write, ApprovalPolicy::Auto)
                .with_policy(PermissionKind::Command, ApprovalPolicy::Auto),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unspecified_kind_defaults_to_ask() {
        let mode = ModeDescriptor::new("custom", "Custom");
        assert_eq!(mode.policy_for(PermissionKind::Write), ApprovalPolicy::Ask);
    }

    #[test]
    fn read_only_gates_writes_and_commands() {
        let modes = ModeDescriptor::builtin_modes();
        let read_only = modes.iter().find(|m| m.id == "read-only").unwrap();
        assert_eq!(read_only.policy_for(PermissionKind::Write), ApprovalPolicy::Ask);
        assert_eq!(read_only.policy_for(PermissionKind::Command), ApprovalPolicy::Ask);
    }

    #[test]
    fn full_access_auto_approves_everything() {
        let modes = ModeDescriptor::builtin_modes();
        let full = modes.iter().find(|m| m.id == "full-access").unwrap();
        assert_eq!(full.policy_for(PermissionKind::Write), ApprovalPolicy::Auto);
        assert_eq!(full.policy_for(PermissionKind::Command), ApprovalPolicy::Auto);
        assert_eq!(full.policy_for(PermissionKind::Tool), ApprovalPolicy::Auto);
    }
}
