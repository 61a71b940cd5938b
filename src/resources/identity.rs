//! ST-014: Instance identity: role, managed policies, inline secret-read policy.
//!
//! The inline policy grants retrieval of a secret value whose name is already
//! known. `secretsmanager:ListSecrets` is not granted.

use crate::core::error::Result;
use crate::core::synth::StackBuilder;
use crate::core::template::{managed_policy_arn, reference, CfnResource};
use crate::core::types::IdentityConfig;
use serde_json::json;

const POLICY_VERSION: &str = "2012-10-17";
const TRUSTED_SERVICE: &str = "ec2.amazonaws.com";

#[derive(Debug, Clone)]
pub struct IdentityHandles {
    pub role: String,
    pub secret_policy: String,
}

pub fn build(b: &mut StackBuilder, cfg: &IdentityConfig) -> Result<IdentityHandles> {
    let role = b.add(
        &["InstanceRole", "Resource"],
        CfnResource::new(
            "AWS::IAM::Role",
            json!({
                "AssumeRolePolicyDocument": {
                    "Statement": [{
                        "Action": "sts:AssumeRole",
                        "Effect": "Allow",
                        "Principal": { "Service": TRUSTED_SERVICE },
                    }],
                    "Version": POLICY_VERSION,
                },
                "ManagedPolicyArns": cfg
                    .managed_policies
                    .iter()
                    .map(|p| managed_policy_arn(p))
                    .collect::<Vec<_>>(),
            }),
        ),
    )?;

    let policy_path = ["secret-read-only", "Resource"];
    let policy_name = crate::core::synth::logical_id(&policy_path);
    let secret_policy = b.add(
        &policy_path,
        CfnResource::new(
            "AWS::IAM::Policy",
            json!({
                "PolicyDocument": {
                    "Statement": [{
                        "Action": single_or_list(&cfg.secret_actions),
                        "Effect": "Allow",
                        "Resource": single_or_list(&cfg.secret_resources),
                    }],
                    "Version": POLICY_VERSION,
                },
                "PolicyName": policy_name,
                "Roles": [reference(&role)],
            }),
        ),
    )?;

    Ok(IdentityHandles {
        role,
        secret_policy,
    })
}

fn single_or_list(items: &[String]) -> serde_json::Value {
    match items {
        [one] => json!(one),
        many => json!(many),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::template::Template;

    fn build_default() -> (Template, IdentityHandles) {
        let mut b = StackBuilder::new("demo", None);
        let h = build(&mut b, &IdentityConfig::default()).unwrap();
        (b.build(), h)
    }

    #[test]
    fn test_st014_trust_only_ec2() {
        let (t, h) = build_default();
        let doc = t.resources[&h.role].prop("AssumeRolePolicyDocument").unwrap();
        let statements = doc["Statement"].as_array().unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0]["Principal"], json!({"Service": "ec2.amazonaws.com"}));
        assert_eq!(statements[0]["Action"], json!("sts:AssumeRole"));
    }

    #[test]
    fn test_st014_two_managed_policies() {
        let (t, h) = build_default();
        let arns = t.resources[&h.role].prop("ManagedPolicyArns").unwrap();
        let arns = arns.as_array().unwrap();
        assert_eq!(arns.len(), 2);
        assert!(arns[0].to_string().contains("AmazonSSMManagedInstanceCore"));
        assert!(arns[1].to_string().contains("AWSCloudFormationReadOnlyAccess"));
    }

    #[test]
    fn test_st014_inline_policy_get_only() {
        let (t, h) = build_default();
        let policy = &t.resources[&h.secret_policy];
        let statement = &policy.prop("PolicyDocument").unwrap()["Statement"][0];
        assert_eq!(statement["Action"], json!("secretsmanager:GetSecretValue"));
        assert_eq!(statement["Resource"], json!("arn:aws:secretsmanager:*"));
        assert!(!statement.to_string().contains("ListSecrets"));
        assert_eq!(policy.prop("Roles"), Some(&json!([reference(&h.role)])));
    }

    #[test]
    fn test_st014_policy_name_matches_logical_id() {
        let (t, h) = build_default();
        assert_eq!(
            t.resources[&h.secret_policy].prop("PolicyName"),
            Some(&json!(h.secret_policy))
        );
    }

    #[test]
    fn test_st014_multiple_actions_render_as_list() {
        let cfg = IdentityConfig {
            secret_actions: vec![
                "secretsmanager:GetSecretValue".to_string(),
                "secretsmanager:DescribeSecret".to_string(),
            ],
            ..IdentityConfig::default()
        };
        let mut b = StackBuilder::new("demo", None);
        let h = build(&mut b, &cfg).unwrap();
        let t = b.build();
        let statement = &t.resources[&h.secret_policy].prop("PolicyDocument").unwrap()["Statement"][0];
        assert_eq!(statement["Action"].as_array().map(Vec::len), Some(2));
    }
}
