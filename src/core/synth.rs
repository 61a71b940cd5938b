//! ST-004: Logical-ID allocation, stack builder, and template rendering.
//!
//! Resources are addressed by construct paths such as `VPC/publicSubnet1/Subnet`.
//! A logical ID is the path with non-alphanumerics stripped (components named
//! `Resource` are left out of the readable part) followed by the first 8 hex
//! digits of the BLAKE3 digest of the full path. Single-component paths keep
//! their readable ID with no digest.

use super::error::{Error, Result};
use super::template::{CfnResource, Output, Parameter, Template};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const MAX_LOGICAL_ID_LEN: usize = 255;
const DIGEST_LEN: usize = 8;
const HIDDEN_COMPONENT: &str = "Resource";

/// Strip everything that is not ASCII alphanumeric.
pub fn sanitize(component: &str) -> String {
    component.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// First 8 uppercase hex digits of the BLAKE3 digest of `a/b/c`.
pub fn path_digest(path: &[&str]) -> String {
    let hash = blake3::hash(path.join("/").as_bytes());
    hash.to_hex()[..DIGEST_LEN].to_uppercase()
}

/// Allocate the logical ID for a construct path.
pub fn logical_id(path: &[&str]) -> String {
    if let [only] = path {
        let mut id = sanitize(only);
        id.truncate(MAX_LOGICAL_ID_LEN);
        return id;
    }
    let mut human: String = path
        .iter()
        .filter(|c| **c != HIDDEN_COMPONENT)
        .map(|c| sanitize(c))
        .collect();
    human.truncate(MAX_LOGICAL_ID_LEN - DIGEST_LEN);
    format!("{}{}", human, path_digest(path))
}

/// Accumulates resources, parameters and outputs under unique logical IDs.
#[derive(Debug)]
pub struct StackBuilder {
    stack_name: String,
    template: Template,
    taken: HashSet<String>,
}

impl StackBuilder {
    pub fn new(stack_name: &str, description: Option<String>) -> Self {
        Self {
            stack_name: stack_name.to_string(),
            template: Template::new(description),
            taken: HashSet::new(),
        }
    }

    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    /// `stack/a/b`, used for Name tags and descriptions.
    pub fn qualified_name(&self, path: &[&str]) -> String {
        let mut parts = vec![self.stack_name.as_str()];
        parts.extend(path.iter().filter(|c| **c != HIDDEN_COMPONENT));
        parts.join("/")
    }

    fn claim(&mut self, path: &[&str]) -> Result<String> {
        let id = logical_id(path);
        if id.is_empty() {
            return Err(Error::Template(format!(
                "path '{}' yields an empty logical ID",
                path.join("/")
            )));
        }
        if !self.taken.insert(id.clone()) {
            return Err(Error::Template(format!(
                "duplicate logical ID '{}' for path '{}'",
                id,
                path.join("/")
            )));
        }
        Ok(id)
    }

    /// Declare a resource; returns its logical ID.
    pub fn add(&mut self, path: &[&str], resource: CfnResource) -> Result<String> {
        let id = self.claim(path)?;
        tracing::debug!(logical_id = %id, resource_type = %resource.resource_type, "declared resource");
        self.template.resources.insert(id.clone(), resource);
        Ok(id)
    }

    /// Amend a resource declared earlier.
    pub fn resource_mut(&mut self, logical_id: &str) -> Option<&mut CfnResource> {
        self.template.resources.get_mut(logical_id)
    }

    pub fn add_parameter(&mut self, path: &[&str], parameter: Parameter) -> Result<String> {
        let id = self.claim(path)?;
        self.template.parameters.insert(id.clone(), parameter);
        Ok(id)
    }

    pub fn add_output(&mut self, name: &str, value: Value, description: Option<String>) -> Result<String> {
        let id = self.claim(&[name])?;
        self.template
            .outputs
            .insert(id.clone(), Output { value, description });
        Ok(id)
    }

    pub fn build(self) -> Template {
        self.template
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Template output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TemplateFormat {
    #[default]
    Json,
    Yaml,
}

impl TemplateFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }
}

impl FromStr for TemplateFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(format!("unknown template format '{}' (json, yaml)", other)),
        }
    }
}

/// Render a template as text.
pub fn render(template: &Template, format: TemplateFormat) -> Result<String> {
    match format {
        TemplateFormat::Json => {
            let mut s = serde_json::to_string_pretty(template)?;
            s.push('\n');
            Ok(s)
        }
        TemplateFormat::Yaml => Ok(serde_yaml_ng::to_string(template)?),
    }
}

/// `<out_dir>/<stack>.template.<ext>`
pub fn template_path(out_dir: &Path, stack: &str, format: TemplateFormat) -> PathBuf {
    out_dir.join(format!("{}.template.{}", stack, format.extension()))
}

/// Render and write a template, creating the output directory.
pub fn write_template(
    out_dir: &Path,
    stack: &str,
    template: &Template,
    format: TemplateFormat,
) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir)?;
    let path = template_path(out_dir, stack, format);
    std::fs::write(&path, render(template, format)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_st004_single_component_keeps_name() {
        assert_eq!(logical_id(&["VPC"]), "VPC");
        assert_eq!(logical_id(&["secret_name"]), "secretname");
    }

    #[test]
    fn test_st004_resource_component_hidden() {
        let id = logical_id(&["web-sec-group", "Resource"]);
        assert!(id.starts_with("websecgroup"));
        assert_eq!(id.len(), "websecgroup".len() + 8);
    }

    #[test]
    fn test_st004_digest_distinguishes_hidden_component() {
        assert_ne!(
            logical_id(&["Db", "Resource"]),
            logical_id(&["Db", "Other", "Resource"])
        );
        assert_ne!(logical_id(&["a-b", "c"]), logical_id(&["ab", "c"]));
    }

    #[test]
    fn test_st004_length_capped() {
        let long = "x".repeat(400);
        let id = logical_id(&[&long, "Child"]);
        assert_eq!(id.len(), MAX_LOGICAL_ID_LEN);
        assert_eq!(logical_id(&[&long]).len(), MAX_LOGICAL_ID_LEN);
    }

    #[test]
    fn test_st004_builder_rejects_duplicates() {
        let mut b = StackBuilder::new("demo", None);
        b.add(&["VPC"], CfnResource::new("AWS::EC2::VPC", json!({}))).unwrap();
        let err = b.add(&["VPC"], CfnResource::new("AWS::EC2::VPC", json!({})));
        assert!(matches!(err, Err(Error::Template(m)) if m.contains("duplicate")));
    }

    #[test]
    fn test_st004_builder_rejects_empty_id() {
        let mut b = StackBuilder::new("demo", None);
        assert!(b.add(&["--"], CfnResource::new("AWS::EC2::VPC", json!({}))).is_err());
    }

    #[test]
    fn test_st004_qualified_name() {
        let b = StackBuilder::new("demo", None);
        assert_eq!(b.qualified_name(&["VPC", "publicSubnet1", "Resource"]), "demo/VPC/publicSubnet1");
    }

    #[test]
    fn test_st004_format_parse() {
        assert_eq!("json".parse::<TemplateFormat>().unwrap(), TemplateFormat::Json);
        assert_eq!("yml".parse::<TemplateFormat>().unwrap(), TemplateFormat::Yaml);
        assert!("toml".parse::<TemplateFormat>().is_err());
    }

    #[test]
    fn test_st004_write_template() {
        let dir = tempfile::tempdir().unwrap();
        let mut b = StackBuilder::new("demo", None);
        b.add(&["VPC"], CfnResource::new("AWS::EC2::VPC", json!({"CidrBlock": "10.0.0.0/16"})))
            .unwrap();
        let t = b.build();
        let out = dir.path().join("cdk.out");
        let path = write_template(&out, "demo", &t, TemplateFormat::Json).unwrap();
        assert_eq!(path, out.join("demo.template.json"));
        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: Template = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, t);
    }

    #[test]
    fn test_st004_render_yaml() {
        let mut b = StackBuilder::new("demo", Some("d".into()));
        b.add(&["VPC"], CfnResource::new("AWS::EC2::VPC", json!({}))).unwrap();
        let yaml = render(&b.build(), TemplateFormat::Yaml).unwrap();
        assert!(yaml.contains("AWSTemplateFormatVersion"));
        assert!(yaml.contains("AWS::EC2::VPC"));
    }

    proptest! {
        #[test]
        fn prop_logical_id_alphanumeric(parts in proptest::collection::vec("[ -~]{1,20}", 1..5)) {
            let path: Vec<&str> = parts.iter().map(String::as_str).collect();
            let id = logical_id(&path);
            prop_assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
            prop_assert!(id.len() <= MAX_LOGICAL_ID_LEN);
        }

        #[test]
        fn prop_logical_id_deterministic(parts in proptest::collection::vec("[a-zA-Z0-9_-]{1,12}", 2..5)) {
            let path: Vec<&str> = parts.iter().map(String::as_str).collect();
            prop_assert_eq!(logical_id(&path), logical_id(&path));
        }
    }
}
