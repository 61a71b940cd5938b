//! ST-001: Stack configuration, lock, plan and provenance types.
//!
//! `stack.yaml` describes the desired topology. Every field carries a default,
//! and the defaults reproduce the reference web + MySQL + Redis stack, so an
//! empty section (or no file at all) still yields a complete topology.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Top-level stack.yaml
// ============================================================================

/// Root configuration: the desired state of the topology.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StackConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Stack name, used as the CloudFormation stack name
    pub name: String,

    /// Optional template description
    pub description: Option<String>,

    pub network: NetworkConfig,
    pub web: WebConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub image: ImageConfig,
    pub identity: IdentityConfig,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: "cdk-redis-stack".to_string(),
            description: None,
            network: NetworkConfig::default(),
            web: WebConfig::default(),
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            image: ImageConfig::default(),
            identity: IdentityConfig::default(),
        }
    }
}

// ============================================================================
// Network
// ============================================================================

/// Isolated address space with a public and a private tier per zone.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct NetworkConfig {
    /// VPC address block
    pub cidr: String,

    /// Number of availability zones to spread subnets over
    pub max_azs: u32,

    /// Managed NAT gateways providing egress to the private tier
    pub nat_gateways: u32,

    /// Prefix length of every subnet
    pub subnet_mask: u8,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cidr: "10.0.0.0/16".to_string(),
            max_azs: 2,
            nat_gateways: 1,
            subnet_mask: 24,
        }
    }
}

// ============================================================================
// Web tier
// ============================================================================

/// Public-facing web server.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct WebConfig {
    pub security_group: String,

    /// Application port opened to `ingress_cidr`
    pub app_port: u16,

    pub ingress_cidr: String,

    pub instance_type: String,

    /// Bootstrap script, passed through verbatim as user data
    pub user_data: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            security_group: "web-sec-group".to_string(),
            app_port: 8008,
            ingress_cidr: "0.0.0.0/0".to_string(),
            instance_type: "t3.small".to_string(),
            user_data: "./userdata.sh".to_string(),
        }
    }
}

// ============================================================================
// Database
// ============================================================================

/// Managed MySQL instance in the private tier.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DatabaseConfig {
    pub security_group: String,
    pub engine_version: String,
    pub instance_class: String,
    pub port: u16,

    /// Initial database name
    pub name: String,

    /// Master username; the password is generated into the secret store
    pub username: String,

    /// Storage in GiB
    pub allocated_storage: u32,

    pub storage_encrypted: bool,
    pub iam_authentication: bool,
    pub deletion_protection: bool,
    pub removal_policy: RemovalPolicy,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            security_group: "db-sec-group".to_string(),
            engine_version: "8.0.28".to_string(),
            instance_class: "db.t3.medium".to_string(),
            port: 3306,
            name: "appdb".to_string(),
            username: "admin".to_string(),
            allocated_storage: 100,
            storage_encrypted: true,
            iam_authentication: true,
            deletion_protection: false,
            removal_policy: RemovalPolicy::Destroy,
        }
    }
}

/// What happens to a resource when the stack is withdrawn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    #[default]
    Destroy,
    Retain,
    Snapshot,
}

impl RemovalPolicy {
    /// The CloudFormation `DeletionPolicy` this maps to.
    pub fn deletion_policy(self) -> DeletionPolicy {
        match self {
            Self::Destroy => DeletionPolicy::Delete,
            Self::Retain => DeletionPolicy::Retain,
            Self::Snapshot => DeletionPolicy::Snapshot,
        }
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Managed in-memory cache cluster in the private tier.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CacheConfig {
    pub security_group: String,
    pub engine: CacheEngine,
    pub node_type: String,
    pub nodes: u32,
    pub port: u16,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            security_group: "redis-sec-group".to_string(),
            engine: CacheEngine::Redis,
            node_type: "cache.t3.small".to_string(),
            nodes: 1,
            port: 6379,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CacheEngine {
    #[default]
    Redis,
    Memcached,
}

impl fmt::Display for CacheEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redis => write!(f, "redis"),
            Self::Memcached => write!(f, "memcached"),
        }
    }
}

// ============================================================================
// Machine image
// ============================================================================

/// Amazon Linux 2 image selection.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ImageConfig {
    pub edition: ImageEdition,
    pub virtualization: Virtualization,
    pub storage: ImageStorage,
    pub arch: String,

    /// Literal AMI ID. When unset the latest image is resolved at deploy time.
    pub pinned_ami: Option<String>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            edition: ImageEdition::Standard,
            virtualization: Virtualization::Hvm,
            storage: ImageStorage::GeneralPurpose,
            arch: "x86_64".to_string(),
            pinned_ami: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ImageEdition {
    #[default]
    Standard,
    Minimal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Virtualization {
    #[default]
    Hvm,
    Pv,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ImageStorage {
    #[default]
    GeneralPurpose,
    Ebs,
}

// ============================================================================
// Identity
// ============================================================================

/// Instance role: managed policies plus a narrow secret-read inline policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct IdentityConfig {
    /// AWS managed policy names
    pub managed_policies: Vec<String>,
    pub secret_actions: Vec<String>,
    pub secret_resources: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            managed_policies: vec![
                "AmazonSSMManagedInstanceCore".to_string(),
                "AWSCloudFormationReadOnlyAccess".to_string(),
            ],
            secret_actions: vec!["secretsmanager:GetSecretValue".to_string()],
            secret_resources: vec!["arn:aws:secretsmanager:*".to_string()],
        }
    }
}

// ============================================================================
// Deletion policy
// ============================================================================

/// CloudFormation `DeletionPolicy` / `UpdateReplacePolicy` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    Delete,
    Retain,
    Snapshot,
}

impl fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delete => write!(f, "Delete"),
            Self::Retain => write!(f, "Retain"),
            Self::Snapshot => write!(f, "Snapshot"),
        }
    }
}

// ============================================================================
// State / Lock file
// ============================================================================

/// Record of the last template submitted for a stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackLock {
    pub schema: String,
    pub stack: String,
    pub generated_at: String,
    pub generator: String,

    /// BLAKE3 hash of the rendered template
    pub template_hash: String,

    /// Per-logical-ID state, in creation order
    pub resources: IndexMap<String, ResourceLock>,
}

/// Per-resource lock entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    #[serde(rename = "type")]
    pub resource_type: String,

    /// BLAKE3 hash of the resource's declaration
    pub hash: String,

    #[serde(default)]
    pub deletion_policy: Option<DeletionPolicy>,

    #[serde(default)]
    pub deletion_protection: bool,
}

// ============================================================================
// Plan
// ============================================================================

/// Action the provisioning engine will take on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    Destroy,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Destroy => write!(f, "DESTROY"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub logical_id: String,
    pub resource_type: String,
    pub action: PlanAction,
    pub description: String,
}

/// Diff of a synthesized template against the last submitted one.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Stack name
    pub name: String,

    pub changes: Vec<PlannedChange>,

    /// Creation order (logical IDs)
    pub creation_order: Vec<String>,

    pub to_create: u32,
    pub to_update: u32,
    pub to_destroy: u32,
    pub unchanged: u32,
}

impl ExecutionPlan {
    pub fn has_changes(&self) -> bool {
        self.to_create + self.to_update + self.to_destroy > 0
    }
}

/// Fate of one resource when the stack is withdrawn.
#[derive(Debug, Clone)]
pub struct TeardownEntry {
    pub logical_id: String,
    pub resource_type: String,
    pub policy: DeletionPolicy,
    pub deletion_protection: bool,
}

impl TeardownEntry {
    /// Whether withdrawal removes the resource outright.
    pub fn destructible(&self) -> bool {
        self.policy == DeletionPolicy::Delete && !self.deletion_protection
    }
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    SynthCompleted {
        stack: String,
        template_hash: String,
        resources: u32,
    },
    DeployStarted {
        stack: String,
        run_id: String,
        stackforge_version: String,
    },
    DeployCompleted {
        stack: String,
        run_id: String,
        to_create: u32,
        to_update: u32,
        to_destroy: u32,
        total_seconds: f64,
    },
    DeployFailed {
        stack: String,
        run_id: String,
        error: String,
    },
    DestroyRequested {
        stack: String,
        run_id: String,
        retained: Vec<String>,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_st001_config_parse_minimal() {
        let yaml = r#"
version: "1.0"
name: demo
"#;
        let config: StackConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.name, "demo");
        assert_eq!(config.network.cidr, "10.0.0.0/16");
        assert_eq!(config.web.app_port, 8008);
        assert_eq!(config.database.port, 3306);
        assert_eq!(config.cache.port, 6379);
        assert_eq!(config.cache.engine, CacheEngine::Redis);
    }

    #[test]
    fn test_st001_partial_section_keeps_defaults() {
        let yaml = r#"
version: "1.0"
name: demo
database:
  instance_class: db.t3.large
  removal_policy: snapshot
"#;
        let config: StackConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.database.instance_class, "db.t3.large");
        assert_eq!(config.database.engine_version, "8.0.28");
        assert_eq!(config.database.removal_policy, RemovalPolicy::Snapshot);
    }

    #[test]
    fn test_st001_single_section_without_header() {
        let config: StackConfig = serde_yaml_ng::from_str("network:\n  max_azs: 3\n").unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.name, "cdk-redis-stack");
        assert_eq!(config.network.max_azs, 3);
        assert_eq!(config.network.nat_gateways, 1);

        let config: StackConfig = serde_yaml_ng::from_str("version: \"1.0\"\n").unwrap();
        assert_eq!(config.name, "cdk-redis-stack");
    }

    #[test]
    fn test_st001_defaults_match_reference_stack() {
        let c = StackConfig::default();
        assert_eq!(c.network.max_azs, 2);
        assert_eq!(c.network.nat_gateways, 1);
        assert_eq!(c.web.instance_type, "t3.small");
        assert_eq!(c.database.instance_class, "db.t3.medium");
        assert!(c.database.storage_encrypted);
        assert!(!c.database.deletion_protection);
        assert_eq!(c.cache.node_type, "cache.t3.small");
        assert_eq!(c.cache.nodes, 1);
        assert_eq!(c.identity.managed_policies.len(), 2);
        assert!(c.image.pinned_ami.is_none());
    }

    #[test]
    fn test_st001_removal_policy_mapping() {
        assert_eq!(RemovalPolicy::Destroy.deletion_policy(), DeletionPolicy::Delete);
        assert_eq!(RemovalPolicy::Retain.deletion_policy(), DeletionPolicy::Retain);
        assert_eq!(RemovalPolicy::Snapshot.deletion_policy(), DeletionPolicy::Snapshot);
    }

    #[test]
    fn test_st001_deletion_policy_serializes_pascal_case() {
        let json = serde_json::to_string(&DeletionPolicy::Delete).unwrap();
        assert_eq!(json, "\"Delete\"");
    }

    #[test]
    fn test_st001_plan_action_display() {
        assert_eq!(PlanAction::Create.to_string(), "CREATE");
        assert_eq!(PlanAction::NoOp.to_string(), "NO-OP");
    }

    #[test]
    fn test_st001_teardown_destructible() {
        let mut e = TeardownEntry {
            logical_id: "Db".to_string(),
            resource_type: "AWS::RDS::DBInstance".to_string(),
            policy: DeletionPolicy::Delete,
            deletion_protection: false,
        };
        assert!(e.destructible());
        e.deletion_protection = true;
        assert!(!e.destructible());
        e.deletion_protection = false;
        e.policy = DeletionPolicy::Snapshot;
        assert!(!e.destructible());
    }

    #[test]
    fn test_st001_provenance_event_serde() {
        let event = ProvenanceEvent::DeployStarted {
            stack: "demo".to_string(),
            run_id: "r-abc".to_string(),
            stackforge_version: "0.3.0".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"deploy_started\""));
        assert!(json.contains("\"run_id\":\"r-abc\""));
    }

    #[test]
    fn test_st001_cache_engine_display() {
        assert_eq!(CacheEngine::Redis.to_string(), "redis");
        assert_eq!(CacheEngine::Memcached.to_string(), "memcached");
    }
}
