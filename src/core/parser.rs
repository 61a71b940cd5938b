//! ST-002: YAML parsing and validation.
//!
//! Parses stack.yaml and rejects property combinations the provisioning
//! engine would refuse, so they fail at synthesis instead of mid-deploy:
//! - Version must be "1.0", stack and database names must match engine rules
//! - Address plan must fit: every tier × zone subnet inside the VPC block
//! - NAT count within 1..=max_azs (the private tier needs egress)
//! - Service ports valid and distinct
//! - Cache engine / node count combinations
//! - VPC block given as its network address, image flavours that are published

use super::error::{Error, Result};
use super::types::*;
use crate::resources::network::Ipv4Cidr;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static STACK_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]{0,127}$").expect("static regex"));

static DB_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]{0,63}$").expect("static regex"));

/// Number of address-range tiers (public, private).
pub const SUBNET_TIERS: u32 = 2;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a stack.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<StackConfig> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Parse a stack.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<StackConfig> {
    Ok(serde_yaml_ng::from_str(yaml)?)
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &StackConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut err = |message: String| errors.push(ValidationError { message });

    if config.version != "1.0" {
        err(format!("version must be \"1.0\", got \"{}\"", config.version));
    }
    if !STACK_NAME.is_match(&config.name) {
        err(format!(
            "stack name '{}' must start with a letter and contain only letters, digits and hyphens",
            config.name
        ));
    }

    // Network
    let net = &config.network;
    match net.cidr.parse::<Ipv4Cidr>() {
        Ok(cidr) => {
            if u32::from(cidr.addr) != cidr.network() {
                err(format!(
                    "network cidr {} has host bits set (network address is {}/{})",
                    net.cidr,
                    std::net::Ipv4Addr::from(cidr.network()),
                    cidr.prefix
                ));
            }
            if !(16..=28).contains(&cidr.prefix) {
                err(format!("network cidr prefix must be /16../28, got /{}", cidr.prefix));
            }
            if net.subnet_mask <= cidr.prefix || net.subnet_mask > 28 {
                err(format!(
                    "subnet_mask /{} must be longer than /{} and at most /28",
                    net.subnet_mask, cidr.prefix
                ));
            } else {
                let available = 1u64 << (net.subnet_mask - cidr.prefix);
                let needed = u64::from(SUBNET_TIERS) * u64::from(net.max_azs);
                if needed > available {
                    err(format!(
                        "{} subnets of /{} do not fit in {}",
                        needed, net.subnet_mask, net.cidr
                    ));
                }
            }
        }
        Err(e) => err(format!("network cidr: {}", e)),
    }
    if !(1..=6).contains(&net.max_azs) {
        err(format!("max_azs must be 1..=6, got {}", net.max_azs));
    }
    if net.nat_gateways == 0 {
        err("nat_gateways must be at least 1: the private tier needs egress".to_string());
    } else if net.nat_gateways > net.max_azs {
        err(format!(
            "nat_gateways ({}) cannot exceed max_azs ({})",
            net.nat_gateways, net.max_azs
        ));
    }

    // Ports
    let ports = [
        ("web.app_port", config.web.app_port),
        ("database.port", config.database.port),
        ("cache.port", config.cache.port),
    ];
    for (field, port) in ports {
        if port == 0 {
            err(format!("{} must be 1..=65535", field));
        }
    }
    for (i, (a, pa)) in ports.iter().enumerate() {
        for (b, pb) in &ports[i + 1..] {
            if pa == pb {
                err(format!("{} and {} share port {}", a, b, pa));
            }
        }
    }

    if let Err(e) = config.web.ingress_cidr.parse::<Ipv4Cidr>() {
        err(format!("web.ingress_cidr: {}", e));
    }
    if config.web.user_data.trim().is_empty() {
        err("web.user_data must name a bootstrap script".to_string());
    }

    // Security group names must be distinct within the VPC
    let groups = [
        &config.web.security_group,
        &config.database.security_group,
        &config.cache.security_group,
    ];
    for (i, a) in groups.iter().enumerate() {
        if a.is_empty() {
            err("security group names must not be empty".to_string());
        }
        if groups[i + 1..].contains(a) {
            err(format!("security group name '{}' is used twice", a));
        }
    }

    // Database
    let db = &config.database;
    if !DB_NAME.is_match(&db.name) {
        err(format!(
            "database name '{}' must start with a letter and contain only letters, digits and underscores",
            db.name
        ));
    }
    if !DB_NAME.is_match(&db.username) {
        err(format!("database username '{}' is not a valid identifier", db.username));
    }
    if !(20..=65536).contains(&db.allocated_storage) {
        err(format!(
            "database allocated_storage must be 20..=65536 GiB, got {}",
            db.allocated_storage
        ));
    }

    // Cache
    let cache = &config.cache;
    match cache.engine {
        CacheEngine::Redis if cache.nodes != 1 => {
            err(format!("redis cache clusters take exactly 1 node, got {}", cache.nodes));
        }
        CacheEngine::Memcached if !(1..=40).contains(&cache.nodes) => {
            err(format!("memcached clusters take 1..=40 nodes, got {}", cache.nodes));
        }
        _ => {}
    }

    // Image
    let image = &config.image;
    if image.edition == ImageEdition::Minimal && image.storage != ImageStorage::Ebs {
        err("minimal image edition is only published with ebs storage".to_string());
    }
    if image.virtualization == Virtualization::Pv {
        err("Amazon Linux 2 images are only published for hvm virtualization".to_string());
    }
    if let Some(ref ami) = image.pinned_ami {
        if !ami.starts_with("ami-") {
            err(format!("pinned_ami '{}' is not an AMI ID", ami));
        }
    }

    // Identity
    if config.identity.secret_actions.is_empty() || config.identity.secret_resources.is_empty() {
        err("identity needs at least one secret action and one secret resource".to_string());
    }

    errors
}
