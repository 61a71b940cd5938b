//! ST-013: Managed cache cluster placed through a named subnet grouping.

use crate::core::error::Result;
use crate::core::synth::StackBuilder;
use crate::core::template::{get_att, reference, CfnResource};
use crate::core::types::{CacheConfig, CacheEngine, DeletionPolicy};
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct CacheHandles {
    pub cluster: String,
    pub subnet_group: String,
}

/// Declare the subnet grouping over every private subnet.
pub fn build_subnet_group(
    b: &mut StackBuilder,
    cfg: &CacheConfig,
    private_subnets: &[String],
) -> Result<String> {
    b.add(
        &["CacheSubnetGroup"],
        CfnResource::new(
            "AWS::ElastiCache::SubnetGroup",
            json!({
                "Description": format!("subnet group for {}", cfg.engine),
                "SubnetIds": private_subnets.iter().map(|s| reference(s)).collect::<Vec<_>>(),
            }),
        ),
    )
}

/// Declare the cluster inside `subnet_group`, guarded by `security_group`.
pub fn build_cluster(
    b: &mut StackBuilder,
    cfg: &CacheConfig,
    subnet_group: &str,
    security_group: &str,
) -> Result<CacheHandles> {
    let cluster = b.add(
        &["CacheCluster"],
        CfnResource::new(
            "AWS::ElastiCache::CacheCluster",
            json!({
                "CacheNodeType": cfg.node_type,
                "CacheSubnetGroupName": reference(subnet_group),
                "Engine": cfg.engine.to_string(),
                "NumCacheNodes": cfg.nodes,
                "Port": cfg.port,
                "VpcSecurityGroupIds": [get_att(security_group, "GroupId")],
            }),
        )
        .removal(DeletionPolicy::Delete),
    )?;
    Ok(CacheHandles {
        cluster,
        subnet_group: subnet_group.to_string(),
    })
}

/// Endpoint address attribute for the cluster's engine.
pub fn endpoint(cfg: &CacheConfig, cluster: &str) -> Value {
    match cfg.engine {
        CacheEngine::Redis => get_att(cluster, "RedisEndpoint.Address"),
        CacheEngine::Memcached => get_att(cluster, "ConfigurationEndpoint.Address"),
    }
}
