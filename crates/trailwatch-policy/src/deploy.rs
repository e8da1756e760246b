//! Latest-deployment tracking.
//!
//! CodeDeploy `CreateDeployment` calls name an application and the S3
//! revision being rolled out. Logs are scanned concurrently, so the order in
//! which calls arrive says nothing. Each observation carries its event time
//! and its place in the digest walk, and the tracker keeps the one that
//! ranks latest.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use trailwatch_contracts::record::ApiCall;

/// One application's deployed revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub application: String,
    pub url: String,
}

/// Extract the deployment named by `call`, if it is a `CreateDeployment`
/// with an application and a complete S3 location.
pub fn deployment_target(call: &ApiCall) -> Option<Deployment> {
    if call.event_name.as_deref() != Some("CreateDeployment") {
        return None;
    }
    let params = call.request_parameters.as_ref()?;
    let application = params.application_name.clone()?;
    let location = params.revision.as_ref()?.s3_location.as_ref()?;
    let bucket = location.bucket.as_deref()?;
    let key = location.key.as_deref()?;

    Some(Deployment {
        application,
        url: format!("https://s3.amazonaws.com/{bucket}/{key}"),
    })
}

/// Where a record sits in the newest-to-oldest digest walk.
///
/// Ordered so that a smaller position was reached earlier by a sequential
/// walk: fewer links behind the region's root, then the log's place in its
/// digest, then the record's place in its log. The region only breaks ties.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct WalkPosition {
    /// Links behind the region's root digest; 0 is the root.
    pub link: u32,
    /// Index of the log in its digest's file list.
    pub log: u32,
    /// Index of the record in its log.
    pub record: u32,
    pub region: String,
}

#[derive(Debug, Clone)]
struct Observed {
    url: String,
    at: Option<DateTime<Utc>>,
    position: WalkPosition,
}

impl Observed {
    /// Later event time wins; without one, the earlier walk position wins.
    fn outranks(&self, other: &Observed) -> bool {
        match self.at.cmp(&other.at) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.position < other.position,
        }
    }
}

/// Application → latest revision URL.
#[derive(Debug, Clone, Default)]
pub struct DeploymentTracker {
    latest: BTreeMap<String, Observed>,
}

impl DeploymentTracker {
    /// Record `call`, seen at `position`, if it is a deployment that ranks
    /// later than the one held for its application.
    ///
    /// Returns true when the map changed. The result does not depend on the
    /// order of calls.
    pub fn observe(&mut self, call: &ApiCall, position: WalkPosition) -> bool {
        let Some(deployment) = deployment_target(call) else {
            return false;
        };
        let candidate = Observed {
            url: deployment.url,
            at: call
                .event_time
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc)),
            position,
        };

        match self.latest.get(&deployment.application) {
            Some(held) if !candidate.outranks(held) => false,
            _ => {
                self.latest.insert(deployment.application, candidate);
                true
            }
        }
    }

    pub fn latest(&self) -> BTreeMap<String, String> {
        self.latest
            .iter()
            .map(|(app, seen)| (app.clone(), seen.url.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}
