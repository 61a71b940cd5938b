//! ST-011: Access-control groups and permission rules.
//!
//! Each group allows all outbound traffic. Inbound flows are denied unless a
//! rule adds them; rules are one-directional and additive. Address-range peers
//! become inline ingress entries on the group, group peers become standalone
//! `AWS::EC2::SecurityGroupIngress` resources so groups never reference each
//! other directly.

use crate::core::error::{Error, Result};
use crate::core::synth::StackBuilder;
use crate::core::template::{get_att, reference, CfnResource};
use crate::core::types::StackConfig;
use serde_json::{json, Value};

/// Logical IDs of the three groups.
#[derive(Debug, Clone)]
pub struct SecurityGroups {
    pub web: String,
    pub database: String,
    pub cache: String,
}

/// Source of an inbound flow.
#[derive(Debug, Clone, Copy)]
pub enum Peer<'a> {
    /// An address range such as `0.0.0.0/0`
    Cidr(&'a str),
    /// Another group, by logical ID
    Group(&'a str),
}

/// Declare the web, database and cache groups inside the VPC.
pub fn build(b: &mut StackBuilder, config: &StackConfig, vpc: &str) -> Result<SecurityGroups> {
    Ok(SecurityGroups {
        database: declare_group(b, vpc, &config.database.security_group)?,
        web: declare_group(b, vpc, &config.web.security_group)?,
        cache: declare_group(b, vpc, &config.cache.security_group)?,
    })
}

fn declare_group(b: &mut StackBuilder, vpc: &str, name: &str) -> Result<String> {
    let description = b.qualified_name(&[name]);
    b.add(
        &[name, "Resource"],
        CfnResource::new(
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": description,
                "GroupName": name,
                "SecurityGroupEgress": [{
                    "CidrIp": "0.0.0.0/0",
                    "Description": "Allow all outbound traffic by default",
                    "IpProtocol": "-1",
                }],
                "VpcId": reference(vpc),
            }),
        ),
    )
}

/// Permit TCP `port` from `peer` into the group `target`.
pub fn allow_ingress(
    b: &mut StackBuilder,
    target: &str,
    peer: Peer<'_>,
    port: u16,
    description: &str,
) -> Result<()> {
    match peer {
        Peer::Cidr(cidr) => {
            let group = b
                .resource_mut(target)
                .ok_or_else(|| Error::Template(format!("unknown security group '{}'", target)))?;
            let rule = json!({
                "CidrIp": cidr,
                "Description": description,
                "FromPort": port,
                "IpProtocol": "tcp",
                "ToPort": port,
            });
            match group
                .properties
                .entry("SecurityGroupIngress")
                .or_insert_with(|| Value::Array(Vec::new()))
            {
                Value::Array(rules) => rules.push(rule),
                _ => {
                    return Err(Error::Template(format!(
                        "SecurityGroupIngress of '{}' is not a list",
                        target
                    )))
                }
            }
        }
        Peer::Group(source) => {
            let rule_id = format!("from {}:{}", source, port);
            b.add(
                &[target, &rule_id],
                CfnResource::new(
                    "AWS::EC2::SecurityGroupIngress",
                    json!({
                        "Description": description,
                        "FromPort": port,
                        "GroupId": get_att(target, "GroupId"),
                        "IpProtocol": "tcp",
                        "SourceSecurityGroupId": get_att(source, "GroupId"),
                        "ToPort": port,
                    }),
                ),
            )?;
        }
    }
    Ok(())
}

/// The three flows of the topology: internet → web, web → database, web → cache.
pub fn authorize(b: &mut StackBuilder, groups: &SecurityGroups, config: &StackConfig) -> Result<()> {
    allow_ingress(
        b,
        &groups.web,
        Peer::Cidr(&config.web.ingress_cidr),
        config.web.app_port,
        "web application",
    )?;
    allow_ingress(
        b,
        &groups.database,
        Peer::Group(&groups.web),
        config.database.port,
        "Allow MySQL connection",
    )?;
    allow_ingress(
        b,
        &groups.cache,
        Peer::Group(&groups.web),
        config.cache.port,
        &format!("Allow {} connection", config.cache.engine),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::template::Template;

    fn build_groups() -> (Template, SecurityGroups) {
        let config = StackConfig::default();
        let mut b = StackBuilder::new("demo", None);
        let vpc = b
            .add(&["VPC"], CfnResource::new("AWS::EC2::VPC", json!({})))
            .unwrap();
        let groups = build(&mut b, &config, &vpc).unwrap();
        authorize(&mut b, &groups, &config).unwrap();
        (b.build(), groups)
    }

    #[test]
    fn test_st011_three_groups() {
        let (t, g) = build_groups();
        assert_eq!(t.resource_count("AWS::EC2::SecurityGroup"), 3);
        assert!(g.web.starts_with("websecgroup"));
        assert!(g.database.starts_with("dbsecgroup"));
        assert!(g.cache.starts_with("redissecgroup"));
    }

    #[test]
    fn test_st011_all_outbound_allowed() {
        let (t, _) = build_groups();
        for (_, sg) in t.resources_of_type("AWS::EC2::SecurityGroup") {
            let egress = sg.prop("SecurityGroupEgress").unwrap();
            assert_eq!(egress[0]["IpProtocol"], json!("-1"));
            assert_eq!(egress[0]["CidrIp"], json!("0.0.0.0/0"));
        }
    }

    #[test]
    fn test_st011_web_open_on_app_port() {
        let (t, g) = build_groups();
        let ingress = t.resources[&g.web].prop("SecurityGroupIngress").unwrap();
        assert_eq!(ingress.as_array().unwrap().len(), 1);
        assert_eq!(ingress[0]["CidrIp"], json!("0.0.0.0/0"));
        assert_eq!(ingress[0]["FromPort"], json!(8008));
        assert_eq!(ingress[0]["ToPort"], json!(8008));
    }

    #[test]
    fn test_st011_group_rules_reference_web() {
        let (t, g) = build_groups();
        let rules: Vec<_> = t.resources_of_type("AWS::EC2::SecurityGroupIngress").collect();
        assert_eq!(rules.len(), 2);
        for (_, r) in &rules {
            assert_eq!(r.prop("SourceSecurityGroupId"), Some(&get_att(&g.web, "GroupId")));
        }
        let db_rule = rules
            .iter()
            .find(|(_, r)| r.prop("GroupId") == Some(&get_att(&g.database, "GroupId")))
            .unwrap();
        assert_eq!(db_rule.1.prop("FromPort"), Some(&json!(3306)));
        let cache_rule = rules
            .iter()
            .find(|(_, r)| r.prop("GroupId") == Some(&get_att(&g.cache, "GroupId")))
            .unwrap();
        assert_eq!(cache_rule.1.prop("FromPort"), Some(&json!(6379)));
    }

    #[test]
    fn test_st011_database_and_cache_closed_to_cidrs() {
        let (t, g) = build_groups();
        assert!(t.resources[&g.database].prop("SecurityGroupIngress").is_none());
        assert!(t.resources[&g.cache].prop("SecurityGroupIngress").is_none());
    }

    #[test]
    fn test_st011_unknown_target() {
        let mut b = StackBuilder::new("demo", None);
        let r = allow_ingress(&mut b, "Ghost", Peer::Cidr("0.0.0.0/0"), 80, "x");
        assert!(r.is_err());
    }
}
