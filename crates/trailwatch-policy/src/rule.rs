//! Rule identities and the toggle set.
//!
//! The rules themselves are compiled in; configuration only switches them on
//! or off. Every rule is on unless the TOML says otherwise:
//!
//! ```toml
//! ssh_session = true
//! safe_bringup = true
//! role_policy = false
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use trailwatch_contracts::error::{TrailwatchError, TrailwatchResult};

/// One compiled rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    SshSession,
    SafeBringup,
    RolePolicy,
    SecretLookup,
    FlowLogs,
    RunCommand,
    DeleteLogs,
}

impl Rule {
    /// Every rule, in evaluation order.
    pub const ALL: [Rule; 7] = [
        Rule::SshSession,
        Rule::SafeBringup,
        Rule::RolePolicy,
        Rule::SecretLookup,
        Rule::FlowLogs,
        Rule::RunCommand,
        Rule::DeleteLogs,
    ];

    /// The TOML key that toggles this rule.
    pub fn id(self) -> &'static str {
        match self {
            Self::SshSession => "ssh_session",
            Self::SafeBringup => "safe_bringup",
            Self::RolePolicy => "role_policy",
            Self::SecretLookup => "secret_lookup",
            Self::FlowLogs => "flow_logs",
            Self::RunCommand => "run_command",
            Self::DeleteLogs => "delete_logs",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::SshSession => "Session Manager session started (ssm StartSession)",
            Self::SafeBringup => {
                "Instance launched with an SSH key, or Lightsail launched without SSH hardening"
            }
            Self::RolePolicy => "Role or trust policy grants an AWS account principal",
            Self::SecretLookup => "Root or IAM user read a Parameter Store value",
            Self::FlowLogs => "VPC flow logs created",
            Self::RunCommand => "Run Command invoked (SendCommand)",
            Self::DeleteLogs => "CloudWatch log group or stream deleted outside CloudFormation",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.id() == id)
    }
}

fn enabled() -> bool {
    true
}

/// Which rules run. Absent keys default to enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default = "enabled")]
    pub ssh_session: bool,
    #[serde(default = "enabled")]
    pub safe_bringup: bool,
    #[serde(default = "enabled")]
    pub role_policy: bool,
    #[serde(default = "enabled")]
    pub secret_lookup: bool,
    #[serde(default = "enabled")]
    pub flow_logs: bool,
    #[serde(default = "enabled")]
    pub run_command: bool,
    #[serde(default = "enabled")]
    pub delete_logs: bool,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::all_enabled()
    }
}

impl RuleSet {
    pub fn all_enabled() -> Self {
        Self::uniform(true)
    }

    pub fn all_disabled() -> Self {
        Self::uniform(false)
    }

    fn uniform(on: bool) -> Self {
        Self {
            ssh_session: on,
            safe_bringup: on,
            role_policy: on,
            secret_lookup: on,
            flow_logs: on,
            run_command: on,
            delete_logs: on,
        }
    }

    /// Parse a rule toggle table.
    ///
    /// Returns `TrailwatchError::Config` when the TOML is malformed or a
    /// value is not a boolean.
    pub fn from_toml_str(s: &str) -> TrailwatchResult<Self> {
        toml::from_str(s).map_err(|e| TrailwatchError::Config {
            reason: format!("failed to parse rule TOML: {e}"),
        })
    }

    pub fn from_file(path: &Path) -> TrailwatchResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| TrailwatchError::Config {
            reason: format!("failed to read rule file '{}': {e}", path.display()),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn is_enabled(&self, rule: Rule) -> bool {
        *self.slot(rule)
    }

    pub fn set(&mut self, rule: Rule, on: bool) {
        *self.slot_mut(rule) = on;
    }

    /// Only `rule` enabled.
    pub fn only(rule: Rule) -> Self {
        let mut set = Self::all_disabled();
        set.set(rule, true);
        set
    }

    pub fn enabled_rules(&self) -> impl Iterator<Item = Rule> + '_ {
        Rule::ALL.into_iter().filter(|r| self.is_enabled(*r))
    }

    fn slot(&self, rule: Rule) -> &bool {
        match rule {
            Rule::SshSession => &self.ssh_session,
            Rule::SafeBringup => &self.safe_bringup,
            Rule::RolePolicy => &self.role_policy,
            Rule::SecretLookup => &self.secret_lookup,
            Rule::FlowLogs => &self.flow_logs,
            Rule::RunCommand => &self.run_command,
            Rule::DeleteLogs => &self.delete_logs,
        }
    }

    fn slot_mut(&mut self, rule: Rule) -> &mut bool {
        match rule {
            Rule::SshSession => &mut self.ssh_session,
            Rule::SafeBringup => &mut self.safe_bringup,
            Rule::RolePolicy => &mut self.role_policy,
            Rule::SecretLookup => &mut self.secret_lookup,
            Rule::FlowLogs => &mut self.flow_logs,
            Rule::RunCommand => &mut self.run_command,
            Rule::DeleteLogs => &mut self.delete_logs,
        }
    }
}
