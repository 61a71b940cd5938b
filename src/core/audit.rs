//! ST-007: Synthesis-time assertions over a template.
//!
//! Each check inspects the rendered resource graph, not the configuration, so
//! it holds for whatever the builders actually produced:
//! - resource counts of the topology
//! - database and cache ports reachable only from the web group
//! - web server in a public subnet, data stores in private subnets only
//! - database and cache destructible, VPC on the engine's default policy

use super::template::{ref_target, target, CfnResource, Template};
use super::types::DeletionPolicy;
use crate::resources::network::{subnet_tier, SubnetTier};
use crate::resources::outputs;
use serde_json::{Map, Value};
use std::fmt;

/// One failed assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub check: &'static str,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.check, self.message)
    }
}

const EXPECTED_COUNTS: [(&str, usize); 6] = [
    ("AWS::EC2::VPC", 1),
    ("AWS::EC2::SecurityGroup", 3),
    ("AWS::RDS::DBInstance", 1),
    ("AWS::ElastiCache::CacheCluster", 1),
    ("AWS::EC2::Instance", 1),
    ("AWS::IAM::Role", 1),
];

/// Run every check. Empty result = the template passes.
pub fn audit(template: &Template) -> Vec<Finding> {
    let mut findings = Vec::new();
    check_counts(template, &mut findings);
    check_isolation(template, &mut findings);
    check_placement(template, &mut findings);
    check_destructible(template, &mut findings);
    tracing::info!(findings = findings.len(), "audit finished");
    findings
}

fn finding(check: &'static str, message: String) -> Finding {
    Finding { check, message }
}

fn check_counts(t: &Template, findings: &mut Vec<Finding>) {
    for (resource_type, expected) in EXPECTED_COUNTS {
        let got = t.resource_count(resource_type);
        if got != expected {
            findings.push(finding(
                "count",
                format!("expected {} {}, found {}", expected, resource_type, got),
            ));
        }
    }
    for name in outputs::NAMES {
        let key = crate::core::synth::sanitize(name);
        if !t.outputs.contains_key(&key) {
            findings.push(finding("count", format!("missing output '{}'", name)));
        }
    }
    if t.outputs.len() != outputs::NAMES.len() {
        findings.push(finding(
            "count",
            format!("expected {} outputs, found {}", outputs::NAMES.len(), t.outputs.len()),
        ));
    }
}

// ============================================================================
// Port isolation
// ============================================================================

/// An inbound rule flattened from either form.
#[derive(Debug)]
struct Ingress<'a> {
    group: &'a str,
    from_port: i64,
    to_port: i64,
    all_protocols: bool,
    source_group: Option<&'a str>,
    source_cidr: Option<&'a str>,
}

impl Ingress<'_> {
    fn covers(&self, port: i64) -> bool {
        self.all_protocols || (self.from_port <= port && port <= self.to_port)
    }
}

fn port_of(props: &Map<String, Value>, key: &str) -> Option<i64> {
    match props.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn ingress_rule<'a>(group: &'a str, rule: &'a Map<String, Value>) -> Ingress<'a> {
    Ingress {
        group,
        from_port: port_of(rule, "FromPort").unwrap_or(-1),
        to_port: port_of(rule, "ToPort").unwrap_or(-1),
        all_protocols: matches!(rule.get("IpProtocol").and_then(Value::as_str), Some("-1")),
        source_group: rule.get("SourceSecurityGroupId").and_then(target),
        source_cidr: rule
            .get("CidrIp")
            .or_else(|| rule.get("CidrIpv6"))
            .and_then(Value::as_str),
    }
}

/// Every inbound rule in the template, inline or standalone.
fn all_ingress(t: &Template) -> Vec<Ingress<'_>> {
    let mut rules = Vec::new();
    for (id, sg) in t.resources_of_type("AWS::EC2::SecurityGroup") {
        if let Some(Value::Array(inline)) = sg.prop("SecurityGroupIngress") {
            rules.extend(
                inline
                    .iter()
                    .filter_map(Value::as_object)
                    .map(|r| ingress_rule(id, r)),
            );
        }
    }
    for (_, r) in t.resources_of_type("AWS::EC2::SecurityGroupIngress") {
        if let Some(group) = r.prop("GroupId").and_then(target) {
            rules.push(ingress_rule(group, &r.properties));
        }
    }
    rules
}

/// Groups a resource is attached to through a list property.
fn attached_groups<'a>(resource: &'a CfnResource, key: &str) -> Vec<&'a str> {
    match resource.prop(key) {
        Some(Value::Array(items)) => items.iter().filter_map(target).collect(),
        _ => Vec::new(),
    }
}

fn port_prop(resource: &CfnResource) -> Option<i64> {
    port_of(&resource.properties, "Port")
}

fn check_isolation(t: &Template, findings: &mut Vec<Finding>) {
    let Some((_, web)) = t.only_resource("AWS::EC2::Instance") else {
        return;
    };
    let web_groups = attached_groups(web, "SecurityGroupIds");
    let rules = all_ingress(t);

    let stores = [
        ("AWS::RDS::DBInstance", "VPCSecurityGroups", "database"),
        ("AWS::ElastiCache::CacheCluster", "VpcSecurityGroupIds", "cache"),
    ];
    for (resource_type, groups_key, label) in stores {
        let Some((id, store)) = t.only_resource(resource_type) else {
            continue;
        };
        let Some(port) = port_prop(store) else {
            findings.push(finding("isolation", format!("{} '{}' has no port", label, id)));
            continue;
        };
        for group in attached_groups(store, groups_key) {
            let mut from_web = 0;
            for rule in rules.iter().filter(|r| r.group == group && r.covers(port)) {
                match (rule.source_group, rule.source_cidr) {
                    (Some(src), _) if web_groups.contains(&src) => from_web += 1,
                    (Some(src), _) => findings.push(finding(
                        "isolation",
                        format!("{} port {} on '{}' open to group '{}'", label, port, group, src),
                    )),
                    (None, Some(cidr)) => findings.push(finding(
                        "isolation",
                        format!("{} port {} on '{}' open to {}", label, port, group, cidr),
                    )),
                    (None, None) => findings.push(finding(
                        "isolation",
                        format!("{} port {} on '{}' has a rule without a source", label, port, group),
                    )),
                }
            }
            if from_web == 0 {
                findings.push(finding(
                    "isolation",
                    format!("{} port {} on '{}' is unreachable from the web server", label, port, group),
                ));
            }
        }
    }
}

// ============================================================================
// Placement
// ============================================================================

fn tier_of(t: &Template, subnet_ref: &Value) -> Option<SubnetTier> {
    let id = ref_target(subnet_ref)?;
    let subnet = t.resources.get(id)?;
    if subnet.resource_type != "AWS::EC2::Subnet" {
        return None;
    }
    subnet_tier(subnet)
}

fn check_subnet_group(
    t: &Template,
    owner: &CfnResource,
    group_key: &str,
    label: &str,
    findings: &mut Vec<Finding>,
) {
    let group = owner
        .prop(group_key)
        .and_then(ref_target)
        .and_then(|id| t.resources.get(id));
    let Some(group) = group else {
        findings.push(finding("placement", format!("{} has no subnet group", label)));
        return;
    };
    let subnets = match group.prop("SubnetIds") {
        Some(Value::Array(items)) => items.as_slice(),
        _ => &[],
    };
    if subnets.is_empty() {
        findings.push(finding("placement", format!("{} subnet group is empty", label)));
    }
    for s in subnets {
        if tier_of(t, s) != Some(SubnetTier::Private) {
            findings.push(finding(
                "placement",
                format!("{} subnet group contains non-private subnet {}", label, s),
            ));
        }
    }
}

fn check_placement(t: &Template, findings: &mut Vec<Finding>) {
    if let Some((id, web)) = t.only_resource("AWS::EC2::Instance") {
        let tier = web.prop("SubnetId").and_then(|s| tier_of(t, s));
        if tier != Some(SubnetTier::Public) {
            findings.push(finding(
                "placement",
                format!("web server '{}' is not in a public subnet", id),
            ));
        }
    }
    if let Some((_, db)) = t.only_resource("AWS::RDS::DBInstance") {
        check_subnet_group(t, db, "DBSubnetGroupName", "database", findings);
        if db.prop("PubliclyAccessible") == Some(&Value::Bool(true)) {
            findings.push(finding("placement", "database is publicly accessible".to_string()));
        }
    }
    if let Some((_, cache)) = t.only_resource("AWS::ElastiCache::CacheCluster") {
        check_subnet_group(t, cache, "CacheSubnetGroupName", "cache", findings);
    }
}

// ============================================================================
// Destructibility
// ============================================================================

fn check_destructible(t: &Template, findings: &mut Vec<Finding>) {
    for resource_type in ["AWS::RDS::DBInstance", "AWS::ElastiCache::CacheCluster"] {
        for (id, r) in t.resources_of_type(resource_type) {
            if r.deletion_policy != Some(DeletionPolicy::Delete) {
                findings.push(finding(
                    "destructible",
                    format!(
                        "'{}' deletion policy is {}",
                        id,
                        r.deletion_policy.map_or("unset".to_string(), |p| p.to_string())
                    ),
                ));
            }
            if r.prop("DeletionProtection") == Some(&Value::Bool(true)) {
                findings.push(finding(
                    "destructible",
                    format!("'{}' has deletion protection enabled", id),
                ));
            }
        }
    }
    for (id, vpc) in t.resources_of_type("AWS::EC2::VPC") {
        if vpc.deletion_policy.is_some() {
            findings.push(finding(
                "destructible",
                format!("VPC '{}' overrides the default deletion policy", id),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::template::{get_att, reference};
    use crate::core::topology::tests::default_template;
    use serde_json::json;

    #[test]
    fn test_st007_default_topology_passes() {
        let findings = audit(&default_template());
        assert!(findings.is_empty(), "{:?}", findings);
    }

    #[test]
    fn test_st007_db_open_to_world() {
        let mut t = default_template();
        let (db_id, _) = t.only_resource("AWS::RDS::DBInstance").unwrap();
        let group = t.resources[db_id].prop("VPCSecurityGroups").unwrap()[0]
            .get("Fn::GetAtt")
            .unwrap()[0]
            .as_str()
            .unwrap()
            .to_string();
        t.resources[&group].properties.insert(
            "SecurityGroupIngress".into(),
            json!([{"CidrIp": "0.0.0.0/0", "FromPort": 3306, "ToPort": 3306, "IpProtocol": "tcp"}]),
        );
        let findings = audit(&t);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].check, "isolation");
        assert!(findings[0].message.contains("0.0.0.0/0"));
    }

    #[test]
    fn test_st007_cache_open_to_db_group() {
        let mut t = default_template();
        let (_, cache) = t.only_resource("AWS::ElastiCache::CacheCluster").unwrap();
        let cache_group = target(&cache.prop("VpcSecurityGroupIds").unwrap()[0]).unwrap().to_string();
        let (_, db) = t.only_resource("AWS::RDS::DBInstance").unwrap();
        let db_group = target(&db.prop("VPCSecurityGroups").unwrap()[0]).unwrap().to_string();
        t.resources.insert(
            "Extra".into(),
            CfnResource::new(
                "AWS::EC2::SecurityGroupIngress",
                json!({
                    "GroupId": get_att(&cache_group, "GroupId"),
                    "SourceSecurityGroupId": get_att(&db_group, "GroupId"),
                    "FromPort": 6379,
                    "ToPort": 6379,
                    "IpProtocol": "tcp",
                }),
            ),
        );
        let findings = audit(&t);
        assert!(findings.iter().any(|f| f.check == "isolation" && f.message.contains(&db_group)));
    }

    #[test]
    fn test_st007_web_in_private_subnet() {
        let mut t = default_template();
        let (_, cache) = t.only_resource("AWS::ElastiCache::CacheCluster").unwrap();
        let group_id = ref_target(cache.prop("CacheSubnetGroupName").unwrap()).unwrap().to_string();
        let private = t.resources[&group_id].prop("SubnetIds").unwrap()[0].clone();
        let vm_id = t.only_resource("AWS::EC2::Instance").unwrap().0.clone();
        t.resources[&vm_id].properties.insert("SubnetId".into(), private);
        let findings = audit(&t);
        assert!(findings.iter().any(|f| f.check == "placement" && f.message.contains("public")));
    }

    #[test]
    fn test_st007_db_subnet_group_with_public_subnet() {
        let mut t = default_template();
        let vm_subnet = t.only_resource("AWS::EC2::Instance").unwrap().1.prop("SubnetId").unwrap().clone();
        let (_, db) = t.only_resource("AWS::RDS::DBInstance").unwrap();
        let group_id = ref_target(db.prop("DBSubnetGroupName").unwrap()).unwrap().to_string();
        t.resources[&group_id]
            .properties
            .insert("SubnetIds".into(), json!([vm_subnet]));
        let findings = audit(&t);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("database subnet group"));
    }

    #[test]
    fn test_st007_retained_database_flagged() {
        let mut t = default_template();
        let db_id = t.only_resource("AWS::RDS::DBInstance").unwrap().0.clone();
        t.resources[&db_id].deletion_policy = Some(DeletionPolicy::Retain);
        t.resources[&db_id]
            .properties
            .insert("DeletionProtection".into(), json!(true));
        let findings = audit(&t);
        assert_eq!(findings.iter().filter(|f| f.check == "destructible").count(), 2);
    }

    #[test]
    fn test_st007_vpc_policy_flagged() {
        let mut t = default_template();
        t.resources["VPC"].deletion_policy = Some(DeletionPolicy::Retain);
        let findings = audit(&t);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("VPC"));
    }

    #[test]
    fn test_st007_missing_output_and_extra_group() {
        let mut t = default_template();
        t.outputs.shift_remove("redisendpoint");
        t.resources.insert(
            "Stray".into(),
            CfnResource::new("AWS::EC2::SecurityGroup", json!({"VpcId": reference("VPC")})),
        );
        let findings = audit(&t);
        assert!(findings.iter().any(|f| f.message.contains("redis_endpoint")));
        assert!(findings.iter().any(|f| f.message.contains("expected 3 AWS::EC2::SecurityGroup")));
    }

    #[test]
    fn test_st007_finding_display() {
        let f = finding("count", "expected 1 AWS::EC2::VPC, found 0".to_string());
        assert_eq!(f.to_string(), "[count] expected 1 AWS::EC2::VPC, found 0");
    }
}
