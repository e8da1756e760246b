//! Decoded CloudTrail API-call records.
//!
//! CloudTrail writes loosely-typed JSON: fields appear, disappear, and change
//! shape between services. Every nested field here decodes leniently, so a
//! field that does not fit its type is left `None` instead of failing the
//! whole record.

use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Deserialize `T` from whatever JSON is present.
///
/// Absent, `null`, and ill-typed values all become `None`.
pub fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// A JSON field that may hold a single value or an array of them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::One(_) => false,
            Self::Many(items) => items.is_empty(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            Self::One(item) => std::slice::from_ref(item).iter(),
            Self::Many(items) => items.iter(),
        }
    }
}

/// One API call event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCall {
    #[serde(default, deserialize_with = "lenient")]
    pub event_source: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub event_time: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub event_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub aws_region: Option<String>,
    #[serde(rename = "sourceIPAddress", default, deserialize_with = "lenient")]
    pub source_ip_address: Option<String>,
    #[serde(rename = "eventID", default, deserialize_with = "lenient")]
    pub event_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub user_identity: Option<UserIdentity>,
    #[serde(default, deserialize_with = "lenient")]
    pub request_parameters: Option<RequestParameters>,
}

impl ApiCall {
    /// True when the event came from `source` and is named `name`.
    pub fn is(&self, source: &str, name: &str) -> bool {
        self.event_source.as_deref() == Some(source) && self.event_name.as_deref() == Some(name)
    }

    pub fn identity_type(&self) -> Option<&str> {
        self.user_identity.as_ref().and_then(|id| id.kind.as_deref())
    }
}

/// The actor behind an event. Only the identity kind matters to the rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserIdentity {
    /// `Root`, `IAMUser`, `AssumedRole`, `AWSService`, ...
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub kind: Option<String>,
}

/// The request parameters of an event, restricted to the shapes the rules
/// inspect.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestParameters {
    #[serde(default, deserialize_with = "lenient")]
    pub instances_set: Option<InstancesSet>,
    #[serde(default, deserialize_with = "policy_document_field")]
    pub policy_document: Option<PolicyDocument>,
    #[serde(default, deserialize_with = "policy_document_field")]
    pub assume_role_policy_document: Option<PolicyDocument>,
    #[serde(default, deserialize_with = "lenient")]
    pub application_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub revision: Option<Revision>,
    /// Lightsail bootstrap script.
    #[serde(default, deserialize_with = "lenient")]
    pub user_data: Option<String>,
}

/// Decode a policy document that is either inline JSON or a JSON string.
///
/// IAM records the document as an object for some calls and as an escaped
/// JSON string for others. The string form may carry a second level of
/// escaping and embedded newlines.
fn policy_document_field<'de, D>(deserializer: D) -> Result<Option<PolicyDocument>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(value @ Value::Object(_)) => serde_json::from_value(value).ok(),
        Some(Value::String(raw)) => PolicyDocument::from_escaped(&raw),
        _ => None,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InstancesSet {
    #[serde(default, deserialize_with = "lenient")]
    pub items: Option<Vec<InstanceItem>>,
}

/// One instance in a `RunInstances` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceItem {
    #[serde(default, deserialize_with = "lenient")]
    pub image_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub key_name: Option<String>,
}

/// A CodeDeploy revision pointer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    #[serde(default, deserialize_with = "lenient")]
    pub revision_type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub s3_location: Option<S3Location>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct S3Location {
    #[serde(default, deserialize_with = "lenient")]
    pub bucket: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub key: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub version: Option<String>,
}

// ── Policy documents ──────────────────────────────────────────────────────────

/// An IAM policy document.
///
/// `Statement` normally holds a list of statements. When it does not decode
/// as one, an object-valued `Statement` is kept as an opaque dictionary and
/// anything else is dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyDocument {
    pub statement: Option<Vec<Statement>>,
    pub statement_dictionary: Option<Map<String, Value>>,
}

impl PolicyDocument {
    /// Decode a policy document delivered as a JSON string.
    ///
    /// Tries the string verbatim first, then with `\"` unescaped and
    /// newlines stripped.
    pub fn from_escaped(raw: &str) -> Option<Self> {
        if let Ok(doc) = serde_json::from_str(raw) {
            return Some(doc);
        }
        let cleaned = raw.replace("\\\"", "\"").replace('\n', "");
        serde_json::from_str(&cleaned).ok()
    }

    /// Structured statements, or an empty slice for the dictionary form.
    pub fn statements(&self) -> &[Statement] {
        self.statement.as_deref().unwrap_or(&[])
    }

    /// True when any structured statement names an AWS account principal.
    pub fn grants_aws_principal(&self) -> bool {
        self.statements().iter().any(Statement::names_aws_principal)
    }
}

impl<'de> Deserialize<'de> for PolicyDocument {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "Statement", default)]
            statement: Option<Value>,
        }

        let raw = Raw::deserialize(deserializer)?;
        let Some(statement) = raw.statement else {
            return Ok(Self::default());
        };

        match serde_json::from_value::<Vec<Statement>>(statement.clone()) {
            Ok(list) => Ok(Self {
                statement: Some(list),
                statement_dictionary: None,
            }),
            Err(_) => Ok(Self {
                statement: None,
                statement_dictionary: match statement {
                    Value::Object(map) => Some(map),
                    _ => None,
                },
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Statement {
    #[serde(rename = "Effect", default, deserialize_with = "lenient")]
    pub effect: Option<String>,
    #[serde(rename = "Principal", default, deserialize_with = "lenient")]
    pub principal: Option<Principal>,
    #[serde(rename = "Action", default, deserialize_with = "lenient")]
    pub action: Option<OneOrMany<String>>,
}

impl Statement {
    pub fn names_aws_principal(&self) -> bool {
        self.principal
            .as_ref()
            .and_then(|p| p.aws.as_ref())
            .is_some_and(|aws| !aws.is_empty())
    }
}

/// Who a statement applies to: AWS accounts/roles or AWS services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Principal {
    #[serde(rename = "AWS", default, deserialize_with = "lenient")]
    pub aws: Option<OneOrMany<String>>,
    #[serde(rename = "Service", default, deserialize_with = "lenient")]
    pub service: Option<OneOrMany<String>>,
}
