//! # trailwatch-policy
//!
//! The fixed CloudTrail security rule set.
//!
//! ## Overview
//!
//! This crate provides [`RuleEngine`], which runs every enabled [`Rule`]
//! against a decoded API call and returns the resulting violations. Rules are
//! compiled in; a TOML table of booleans ([`RuleSet`]) only switches them on
//! or off. It also tracks the latest CodeDeploy revision per application
//! ([`DeploymentTracker`]), which is reported alongside violations but is not
//! one. Deployments are ranked by event time and then by [`WalkPosition`], so
//! concurrent log scanning cannot change which one is latest.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use trailwatch_policy::{RuleEngine, RuleSet};
//!
//! let engine = RuleEngine::new(RuleSet::from_toml_str("role_policy = false")?);
//! let violations = engine.evaluate(&call, "/tmp/audit/AWSLogs/.../log.json.gz");
//! ```

pub mod deploy;
pub mod engine;
pub mod rule;

pub use deploy::{deployment_target, Deployment, DeploymentTracker, WalkPosition};
pub use engine::RuleEngine;
pub use rule::{Rule, RuleSet};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use trailwatch_contracts::error::TrailwatchError;
    use trailwatch_contracts::record::ApiCall;
    use trailwatch_contracts::violation::ViolationKind;

    use crate::{DeploymentTracker, Rule, RuleEngine, RuleSet, WalkPosition};

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn call(raw: Value) -> ApiCall {
        serde_json::from_value(raw).unwrap()
    }

    fn kinds(engine: &RuleEngine, call: &ApiCall) -> Vec<ViolationKind> {
        engine
            .evaluate(call, "/tmp/log.json.gz")
            .into_iter()
            .map(|v| v.kind)
            .collect()
    }

    fn run_instances(key_name: Option<&str>) -> ApiCall {
        let mut item = json!({ "imageId": "ami-0abc" });
        if let Some(name) = key_name {
            item["keyName"] = json!(name);
        }
        call(json!({
            "eventSource": "ec2.amazonaws.com",
            "eventName": "RunInstances",
            "eventTime": "2024-03-05T10:00:00Z",
            "awsRegion": "us-east-1",
            "sourceIPAddress": "203.0.113.7",
            "requestParameters": { "instancesSet": { "items": [item] } }
        }))
    }

    fn lightsail(user_data: Option<&str>) -> ApiCall {
        let mut params = json!({});
        if let Some(data) = user_data {
            params["userData"] = json!(data);
        }
        call(json!({
            "eventSource": "lightsail.amazonaws.com",
            "eventName": "CreateInstances",
            "requestParameters": params
        }))
    }

    // ── Rule scenarios ────────────────────────────────────────────────────────

    /// RunInstances with a key pair yields exactly one bringup violation.
    #[test]
    fn test_run_instances_with_key_name() {
        let engine = RuleEngine::default();
        let violations = engine.evaluate(&run_instances(Some("prod-key")), "/tmp/a.json.gz");

        assert_eq!(violations.len(), 1);
        let vio = &violations[0];
        assert_eq!(vio.kind, ViolationKind::SshEnabledOnBringup);
        assert_eq!(vio.kind.name(), "SSH enabled on bringup");
        assert_eq!(vio.event_time.as_deref(), Some("2024-03-05T10:00:00Z"));
        assert_eq!(vio.aws_region.as_deref(), Some("us-east-1"));
        assert_eq!(vio.source_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(vio.file_path.as_deref(), Some("/tmp/a.json.gz"));
    }

    #[test]
    fn test_run_instances_without_key_name() {
        assert!(kinds(&RuleEngine::default(), &run_instances(None)).is_empty());
    }

    /// Log deletions made by CloudFormation are not flagged.
    #[test]
    fn test_delete_log_group_by_cloudformation() {
        let engine = RuleEngine::default();
        let by_stack = call(json!({
            "eventSource": "logs.amazonaws.com",
            "eventName": "DeleteLogGroup",
            "sourceIPAddress": "cloudformation.amazonaws.com"
        }));
        assert!(kinds(&engine, &by_stack).is_empty());

        let by_operator = call(json!({
            "eventSource": "logs.amazonaws.com",
            "eventName": "DeleteLogStream",
            "sourceIPAddress": "198.51.100.4"
        }));
        assert_eq!(kinds(&engine, &by_operator), vec![ViolationKind::LogsDeleted]);
    }

    #[test]
    fn test_start_session() {
        let c = call(json!({ "eventSource": "ssm.amazonaws.com", "eventName": "StartSession" }));
        assert_eq!(
            kinds(&RuleEngine::default(), &c),
            vec![ViolationKind::SshSessionInitiated]
        );
    }

    /// Lightsail launches need user data carrying every hardening command.
    #[test]
    fn test_lightsail_bringup() {
        let engine = RuleEngine::default();
        let hardened = "#!/bin/bash\nrm /home/ubuntu/.ssh/authorized_keys\nrm /root/.ssh/authorized_keys\nsystemctl disable ssh.service\nsystemctl stop ssh.service\n";

        assert!(kinds(&engine, &lightsail(Some(hardened))).is_empty());
        assert_eq!(
            kinds(&engine, &lightsail(Some("rm /root/.ssh/authorized_keys"))),
            vec![ViolationKind::LightsailSshNotDisabled]
        );
        assert_eq!(
            kinds(&engine, &lightsail(None)),
            vec![ViolationKind::LightsailNoUserData]
        );
    }

    /// Policy and trust documents are reported separately.
    #[test]
    fn test_role_policy_documents() {
        let engine = RuleEngine::default();
        let doc = json!({
            "Statement": [
                { "Effect": "Allow", "Principal": { "AWS": "arn:aws:iam::444455556666:root" } },
                { "Effect": "Allow", "Principal": { "AWS": ["arn:aws:iam::777788889999:root"] } }
            ]
        });
        let c = call(json!({
            "eventSource": "iam.amazonaws.com",
            "eventName": "UpdateAssumeRolePolicy",
            "requestParameters": {
                "policyDocument": doc.to_string(),
                "assumeRolePolicyDocument": doc
            }
        }));

        assert_eq!(
            kinds(&engine, &c),
            vec![
                ViolationKind::RolePolicyChange,
                ViolationKind::AssumeRolePolicyChange
            ]
        );
    }

    #[test]
    fn test_service_principal_not_flagged() {
        let c = call(json!({
            "eventName": "CreateRole",
            "requestParameters": {
                "assumeRolePolicyDocument": {
                    "Statement": [{ "Principal": { "Service": "lambda.amazonaws.com" } }]
                }
            }
        }));
        assert!(kinds(&RuleEngine::default(), &c).is_empty());
    }

    /// Only human identities reading parameters count as secret lookups.
    #[test]
    fn test_secret_lookup_identity() {
        let engine = RuleEngine::default();
        for (identity, expected) in [("IAMUser", true), ("Root", true), ("AssumedRole", false)] {
            let c = call(json!({
                "eventSource": "ssm.amazonaws.com",
                "eventName": "GetParametersByPath",
                "userIdentity": { "type": identity }
            }));
            assert_eq!(!kinds(&engine, &c).is_empty(), expected, "identity {identity}");
        }
    }

    #[test]
    fn test_flow_logs_and_run_command() {
        let engine = RuleEngine::default();
        let flow = call(json!({ "eventSource": "ec2.amazonaws.com", "eventName": "CreateFlowLogs" }));
        let send = call(json!({ "eventSource": "ssm.amazonaws.com", "eventName": "SendCommand" }));

        assert_eq!(kinds(&engine, &flow), vec![ViolationKind::FlowLogsCreated]);
        assert_eq!(kinds(&engine, &send), vec![ViolationKind::RunCommandExecuted]);
    }

    // ── Toggles ───────────────────────────────────────────────────────────────

    /// A rule fires only when it is the enabled one.
    #[test]
    fn test_rule_isolation() {
        let c = run_instances(Some("prod-key"));
        for rule in Rule::ALL {
            let engine = RuleEngine::new(RuleSet::only(rule));
            let found = kinds(&engine, &c);
            if rule == Rule::SafeBringup {
                assert_eq!(found, vec![ViolationKind::SshEnabledOnBringup]);
            } else {
                assert!(found.is_empty(), "{} fired on RunInstances", rule.id());
            }
        }

        assert!(kinds(&RuleEngine::new(RuleSet::all_disabled()), &c).is_empty());
    }

    /// Absent keys default to enabled.
    #[test]
    fn test_rule_set_from_toml() {
        let set = RuleSet::from_toml_str("role_policy = false\nflow_logs = false").unwrap();
        assert!(!set.is_enabled(Rule::RolePolicy));
        assert!(!set.is_enabled(Rule::FlowLogs));
        assert!(set.is_enabled(Rule::SshSession));
        assert_eq!(set.enabled_rules().count(), 5);

        assert_eq!(RuleSet::from_toml_str("").unwrap(), RuleSet::all_enabled());
    }

    #[test]
    fn test_rule_set_rejects_bad_toml() {
        assert!(matches!(
            RuleSet::from_toml_str("ssh_session = \"yes\""),
            Err(TrailwatchError::Config { .. })
        ));
    }

    #[test]
    fn test_rule_ids_round_trip() {
        for rule in Rule::ALL {
            assert_eq!(Rule::from_id(rule.id()), Some(rule));
        }
        assert_eq!(Rule::from_id("nope"), None);
    }

    // ── Deployments ───────────────────────────────────────────────────────────

    fn deployment(key: &str, event_time: Option<&str>) -> ApiCall {
        let mut raw = json!({
            "eventSource": "codedeploy.amazonaws.com",
            "eventName": "CreateDeployment",
            "requestParameters": {
                "applicationName": "web",
                "revision": {
                    "revisionType": "S3",
                    "s3Location": { "bucket": "builds", "key": key }
                }
            }
        });
        if let Some(at) = event_time {
            raw["eventTime"] = json!(at);
        }
        call(raw)
    }

    fn at_link(link: u32) -> WalkPosition {
        WalkPosition {
            link,
            ..WalkPosition::default()
        }
    }

    fn latest_web(tracker: &DeploymentTracker) -> Option<String> {
        tracker.latest().get("web").cloned()
    }

    /// Without event times the deployment nearest the chain root is kept,
    /// whichever order the observations arrive in.
    #[test]
    fn test_deployment_walk_position_decides() {
        let mut tracker = DeploymentTracker::default();
        assert!(tracker.observe(&deployment("web-v1.zip", None), at_link(3)));
        assert!(tracker.observe(&deployment("web-v2.zip", None), at_link(0)));
        assert!(!tracker.observe(&deployment("web-v0.zip", None), at_link(7)));

        assert_eq!(
            latest_web(&tracker).as_deref(),
            Some("https://s3.amazonaws.com/builds/web-v2.zip")
        );
        assert!(kinds(&RuleEngine::default(), &deployment("x.zip", None)).is_empty());
    }

    /// Earlier records in a log outrank later ones in the same log.
    #[test]
    fn test_deployment_record_order_within_log() {
        let mut tracker = DeploymentTracker::default();
        let second = WalkPosition {
            record: 1,
            ..WalkPosition::default()
        };
        assert!(tracker.observe(&deployment("web-b.zip", None), second));
        assert!(tracker.observe(&deployment("web-a.zip", None), WalkPosition::default()));
        assert_eq!(
            latest_web(&tracker).as_deref(),
            Some("https://s3.amazonaws.com/builds/web-a.zip")
        );
    }

    /// A later event time wins even when it sits further down the walk.
    #[test]
    fn test_deployment_event_time_decides() {
        let mut tracker = DeploymentTracker::default();
        assert!(tracker.observe(
            &deployment("web-old.zip", Some("2024-03-05T09:00:00Z")),
            at_link(0)
        ));
        assert!(tracker.observe(
            &deployment("web-new.zip", Some("2024-03-05T11:30:00+01:00")),
            at_link(4)
        ));
        assert!(!tracker.observe(
            &deployment("web-older.zip", Some("2024-03-04T23:00:00Z")),
            at_link(0)
        ));

        assert_eq!(
            latest_web(&tracker).as_deref(),
            Some("https://s3.amazonaws.com/builds/web-new.zip")
        );
    }

    /// Every arrival order of the same observations gives the same answer.
    #[test]
    fn test_deployment_order_independent() {
        let observations: Vec<(ApiCall, WalkPosition)> = (0..6u32)
            .map(|i| (deployment(&format!("web-v{i}.zip"), None), at_link(5 - i)))
            .collect();

        for rotation in 0..observations.len() {
            let mut tracker = DeploymentTracker::default();
            let mut order = observations.clone();
            order.rotate_left(rotation);
            for (c, position) in order.into_iter().rev() {
                tracker.observe(&c, position);
            }
            assert_eq!(
                latest_web(&tracker).as_deref(),
                Some("https://s3.amazonaws.com/builds/web-v5.zip"),
                "rotation {rotation}"
            );
        }
    }

    #[test]
    fn test_incomplete_deployment_ignored() {
        let c = call(json!({
            "eventName": "CreateDeployment",
            "requestParameters": { "applicationName": "web", "revision": { "revisionType": "GitHub" } }
        }));
        let mut tracker = DeploymentTracker::default();
        assert!(!tracker.observe(&c, WalkPosition::default()));
        assert!(tracker.is_empty());
    }
}
