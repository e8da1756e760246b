//! Audit findings.
//!
//! A `Violation` is either a security-rule match on a decoded record or an
//! integrity failure found while verifying digests and log files. The
//! collection is append-only and displayed in insertion order.

use serde::{Serialize, Serializer};

use crate::record::ApiCall;

/// Every category of finding the auditor can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    // Rule matches.
    SshSessionInitiated,
    SshEnabledOnBringup,
    LightsailSshNotDisabled,
    LightsailNoUserData,
    RolePolicyChange,
    AssumeRolePolicyChange,
    SecretLookedUp,
    FlowLogsCreated,
    RunCommandExecuted,
    LogsDeleted,

    // Integrity failures.
    WrongSha256,
    MissingLogFile,
    MissingLogRecords,
    CouldNotLoadRecord,
    UnknownSigningKey,
    CorruptedTrailFile,
    MalformedDigest,
    BrokenDigestChain,
}

impl ViolationKind {
    /// The operator-facing name shown in reports.
    pub fn name(self) -> &'static str {
        match self {
            Self::SshSessionInitiated => "SSH session initiated",
            Self::SshEnabledOnBringup => "SSH enabled on bringup",
            Self::LightsailSshNotDisabled => "Lightsail disable SSH not detected",
            Self::LightsailNoUserData => "No UserData on Lightsail bringup",
            Self::RolePolicyChange => "Role policy change",
            Self::AssumeRolePolicyChange => "Assume role policy change",
            Self::SecretLookedUp => "Secret looked up",
            Self::FlowLogsCreated => "Created flow logs",
            Self::RunCommandExecuted => "Run command executed",
            Self::LogsDeleted => "LogGroup/LogStream Deleted",
            Self::WrongSha256 => "Wrong SHA-256",
            Self::MissingLogFile => "Missing Log File",
            Self::MissingLogRecords => "Missing Log Records",
            Self::CouldNotLoadRecord => "Couldn't load record",
            Self::UnknownSigningKey => "Couldn't find public key with fingerprint",
            Self::CorruptedTrailFile => "Corrupted Trail File",
            Self::MalformedDigest => "Missing or malformed digest record",
            Self::BrokenDigestChain => "Missing previous digest link",
        }
    }

    /// True for findings about trail integrity rather than account activity.
    pub fn is_integrity(self) -> bool {
        matches!(
            self,
            Self::WrongSha256
                | Self::MissingLogFile
                | Self::MissingLogRecords
                | Self::CouldNotLoadRecord
                | Self::UnknownSigningKey
                | Self::CorruptedTrailFile
                | Self::MalformedDigest
                | Self::BrokenDigestChain
        )
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for ViolationKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// One recorded finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    #[serde(rename = "name")]
    pub kind: ViolationKind,
    pub event_time: Option<String>,
    pub event_name: Option<String>,
    pub aws_region: Option<String>,
    #[serde(rename = "sourceIP")]
    pub source_ip: Option<String>,
    pub file_path: Option<String>,
}

impl Violation {
    /// A rule match, carrying the event's time, name, region and source IP.
    pub fn from_event(kind: ViolationKind, call: &ApiCall, file_path: &str) -> Self {
        Self {
            kind,
            event_time: call.event_time.clone(),
            event_name: call.event_name.clone(),
            aws_region: call.aws_region.clone(),
            source_ip: call.source_ip_address.clone(),
            file_path: Some(file_path.to_string()),
        }
    }

    /// An integrity failure on a file, optionally attributed to a region.
    pub fn integrity(kind: ViolationKind, region: Option<&str>, file_path: impl Into<String>) -> Self {
        Self {
            kind,
            event_time: None,
            event_name: None,
            aws_region: region.map(str::to_string),
            source_ip: None,
            file_path: Some(file_path.into()),
        }
    }
}
