//! Rule evaluation over decoded API calls.
//!
//! Evaluation algorithm:
//!
//! 1. Visit rules in `Rule::ALL` order, skipping disabled ones entirely.
//! 2. Each rule inspects the call and yields at most one violation. The role
//!    rule is the exception: it checks the policy document and the
//!    assume-role policy document separately and can yield one of each.
//! 3. Violations carry the call's time, name, region and source IP plus the
//!    log file the call came from.

use tracing::debug;

use trailwatch_contracts::record::ApiCall;
use trailwatch_contracts::violation::{Violation, ViolationKind};

use crate::rule::{Rule, RuleSet};

/// Commands a Lightsail bootstrap script must run to count as SSH-hardened.
pub const LIGHTSAIL_HARDENING_MARKERS: [&str; 4] = [
    "rm /home/ubuntu/.ssh/authorized_keys",
    "rm /root/.ssh/authorized_keys",
    "systemctl disable ssh.service",
    "systemctl stop ssh.service",
];

/// Source address CloudTrail records for calls CloudFormation makes itself.
const CLOUDFORMATION_SOURCE: &str = "cloudformation.amazonaws.com";

/// The compiled rule set with its toggles.
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    rules: RuleSet,
}

impl RuleEngine {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Run every enabled rule against `call`.
    pub fn evaluate(&self, call: &ApiCall, file_path: &str) -> Vec<Violation> {
        let mut found = Vec::new();
        for rule in self.rules.enabled_rules() {
            found.extend(
                check(rule, call)
                    .into_iter()
                    .map(|kind| Violation::from_event(kind, call, file_path)),
            );
        }

        if !found.is_empty() {
            debug!(
                event = call.event_name.as_deref().unwrap_or("-"),
                count = found.len(),
                "record matched rules"
            );
        }
        found
    }
}

fn check(rule: Rule, call: &ApiCall) -> Vec<ViolationKind> {
    match rule {
        Rule::SshSession => remote_session(call).into_iter().collect(),
        Rule::SafeBringup => safe_bringup(call).into_iter().collect(),
        Rule::RolePolicy => role_policy(call),
        Rule::SecretLookup => secret_lookup(call).into_iter().collect(),
        Rule::FlowLogs => flow_logs(call).into_iter().collect(),
        Rule::RunCommand => run_command(call).into_iter().collect(),
        Rule::DeleteLogs => delete_logs(call).into_iter().collect(),
    }
}

// ── Rules ─────────────────────────────────────────────────────────────────────

fn remote_session(call: &ApiCall) -> Option<ViolationKind> {
    call.is("ssm.amazonaws.com", "StartSession")
        .then_some(ViolationKind::SshSessionInitiated)
}

fn safe_bringup(call: &ApiCall) -> Option<ViolationKind> {
    if call.is("ec2.amazonaws.com", "RunInstances") {
        let keyed = call
            .request_parameters
            .as_ref()
            .and_then(|p| p.instances_set.as_ref())
            .and_then(|s| s.items.as_ref())
            .is_some_and(|items| items.iter().any(|i| i.key_name.is_some()));
        return keyed.then_some(ViolationKind::SshEnabledOnBringup);
    }

    if call.is("lightsail.amazonaws.com", "CreateInstances") {
        let user_data = call
            .request_parameters
            .as_ref()
            .and_then(|p| p.user_data.as_deref());
        return match user_data {
            None => Some(ViolationKind::LightsailNoUserData),
            Some(script) if LIGHTSAIL_HARDENING_MARKERS.iter().all(|m| script.contains(m)) => None,
            Some(_) => Some(ViolationKind::LightsailSshNotDisabled),
        };
    }

    None
}

fn role_policy(call: &ApiCall) -> Vec<ViolationKind> {
    let Some(params) = call.request_parameters.as_ref() else {
        return Vec::new();
    };

    let mut kinds = Vec::new();
    if params
        .policy_document
        .as_ref()
        .is_some_and(|d| d.grants_aws_principal())
    {
        kinds.push(ViolationKind::RolePolicyChange);
    }
    if params
        .assume_role_policy_document
        .as_ref()
        .is_some_and(|d| d.grants_aws_principal())
    {
        kinds.push(ViolationKind::AssumeRolePolicyChange);
    }
    kinds
}

fn secret_lookup(call: &ApiCall) -> Option<ViolationKind> {
    let human = matches!(call.identity_type(), Some("Root" | "IAMUser"));
    let lookup = ["GetParameter", "GetParameters", "GetParametersByPath"]
        .iter()
        .any(|name| call.is("ssm.amazonaws.com", name));
    (human && lookup).then_some(ViolationKind::SecretLookedUp)
}

fn flow_logs(call: &ApiCall) -> Option<ViolationKind> {
    call.is("ec2.amazonaws.com", "CreateFlowLogs")
        .then_some(ViolationKind::FlowLogsCreated)
}

fn run_command(call: &ApiCall) -> Option<ViolationKind> {
    (call.event_name.as_deref() == Some("SendCommand")).then_some(ViolationKind::RunCommandExecuted)
}

fn delete_logs(call: &ApiCall) -> Option<ViolationKind> {
    let deletion = matches!(
        call.event_name.as_deref(),
        Some("DeleteLogGroup" | "DeleteLogStream")
    );
    let by_stack = call.source_ip_address.as_deref() == Some(CLOUDFORMATION_SOURCE);
    (deletion && !by_stack).then_some(ViolationKind::LogsDeleted)
}
