//! ST-003: CloudFormation template model and intrinsic functions.
//!
//! Properties are kept as `serde_json::Value` so each resource builder can
//! write the provider's property names verbatim. Object keys serialize in
//! sorted order, which keeps rendering deterministic.

use super::types::DeletionPolicy;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const FORMAT_VERSION: &str = "2010-09-09";

/// A complete deployment template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,

    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "Parameters", default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, Parameter>,

    #[serde(rename = "Resources")]
    pub resources: IndexMap<String, CfnResource>,

    #[serde(rename = "Outputs", default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, Output>,
}

/// A template parameter resolved by the engine at deploy time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub parameter_type: String,

    #[serde(rename = "Default", default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A single resource declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfnResource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    #[serde(rename = "Properties", default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,

    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(rename = "DeletionPolicy", default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,

    #[serde(rename = "UpdateReplacePolicy", default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<DeletionPolicy>,
}

impl CfnResource {
    /// New resource from a type and a JSON object of properties.
    /// Non-object `properties` values are ignored.
    pub fn new(resource_type: &str, properties: Value) -> Self {
        let properties = match properties {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            resource_type: resource_type.to_string(),
            properties,
            depends_on: Vec::new(),
            deletion_policy: None,
            update_replace_policy: None,
        }
    }

    pub fn depends_on(mut self, logical_id: &str) -> Self {
        if !self.depends_on.iter().any(|d| d == logical_id) {
            self.depends_on.push(logical_id.to_string());
        }
        self
    }

    /// Apply the same policy on deletion and on replacement.
    pub fn removal(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = Some(policy);
        self.update_replace_policy = Some(policy);
        self
    }

    pub fn prop(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// A stack output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    #[serde(rename = "Value")]
    pub value: Value,

    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Template {
    pub fn new(description: Option<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            description,
            parameters: IndexMap::new(),
            resources: IndexMap::new(),
            outputs: IndexMap::new(),
        }
    }

    /// All resources of one type, in declaration order.
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a CfnResource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r.resource_type == resource_type)
    }

    pub fn resource_count(&self, resource_type: &str) -> usize {
        self.resources_of_type(resource_type).count()
    }

    /// The single resource of a type, if there is exactly one.
    pub fn only_resource<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> Option<(&'a String, &'a CfnResource)> {
        let mut it = self.resources_of_type(resource_type);
        match (it.next(), it.next()) {
            (Some(found), None) => Some(found),
            _ => None,
        }
    }
}

// ============================================================================
// Intrinsic functions
// ============================================================================

/// `{"Ref": id}`
pub fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

/// `{"Fn::GetAtt": [id, attr]}`
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [delimiter, parts] })
}

pub fn select(index: usize, list: Value) -> Value {
    json!({ "Fn::Select": [index, list] })
}

pub fn split(delimiter: &str, source: Value) -> Value {
    json!({ "Fn::Split": [delimiter, source] })
}

/// Availability zones of the deployment region.
pub fn get_azs() -> Value {
    json!({ "Fn::GetAZs": "" })
}

pub fn base64(value: Value) -> Value {
    json!({ "Fn::Base64": value })
}

/// `arn:<partition>:iam::aws:policy/<name>` for an AWS managed policy.
pub fn managed_policy_arn(name: &str) -> Value {
    join(
        "",
        vec![
            json!("arn:"),
            reference("AWS::Partition"),
            json!(format!(":iam::aws:policy/{}", name)),
        ],
    )
}

/// The logical ID a `{"Ref": ...}` value points at.
pub fn ref_target(value: &Value) -> Option<&str> {
    value.get("Ref").and_then(Value::as_str)
}

/// The logical ID a `{"Fn::GetAtt": [id, attr]}` value points at.
pub fn get_att_target(value: &Value) -> Option<&str> {
    value
        .get("Fn::GetAtt")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .and_then(Value::as_str)
}

/// The logical ID referenced by either `Ref` or `Fn::GetAtt`.
pub fn target(value: &Value) -> Option<&str> {
    ref_target(value).or_else(|| get_att_target(value))
}

/// Standard `Name` tag list.
pub fn name_tag(name: &str) -> Value {
    json!([{ "Key": "Name", "Value": name }])
}
