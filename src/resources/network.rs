//! ST-010: Network. VPC, public and private subnets per zone, IGW and NAT egress.

use crate::core::error::{Error, Result};
use crate::core::synth::StackBuilder;
use crate::core::template::{get_att, get_azs, name_tag, reference, select, CfnResource};
use crate::core::types::NetworkConfig;
use serde_json::{json, Value};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Tag carrying the subnet tier, read back by the audit.
pub const TIER_TAG: &str = "stackforge:subnet-tier";
const NAME_TAG: &str = "stackforge:subnet-name";
const ANYWHERE: &str = "0.0.0.0/0";

/// An IPv4 address block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    pub addr: Ipv4Addr,
    pub prefix: u8,
}

impl FromStr for Ipv4Cidr {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| format!("'{}' is not in a.b.c.d/n form", s))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|e| format!("'{}': invalid address: {}", s, e))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| format!("'{}': invalid prefix length", s))?;
        if prefix > 32 {
            return Err(format!("'{}': prefix length must be <= 32", s));
        }
        Ok(Self { addr, prefix })
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl Ipv4Cidr {
    /// Network address with host bits cleared.
    pub fn network(&self) -> u32 {
        let a = u32::from(self.addr);
        if self.prefix == 0 {
            0
        } else {
            a & (u32::MAX << (32 - self.prefix))
        }
    }

    /// The `index`-th block of length `prefix` inside this one.
    pub fn subnet(&self, prefix: u8, index: u32) -> Option<Ipv4Cidr> {
        if prefix < self.prefix || prefix > 32 {
            return None;
        }
        let count = 1u64 << (prefix - self.prefix);
        if u64::from(index) >= count {
            return None;
        }
        let size = 1u64 << (32 - prefix);
        let addr = u64::from(self.network()) + u64::from(index) * size;
        let addr = u32::try_from(addr).ok()?;
        Some(Ipv4Cidr {
            addr: Ipv4Addr::from(addr),
            prefix,
        })
    }
}

/// Address-range tier of a subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetTier {
    Public,
    Private,
}

impl SubnetTier {
    fn label(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }

    fn tag_value(self) -> &'static str {
        match self {
            Self::Public => "Public",
            Self::Private => "Private",
        }
    }
}

/// Read the tier tag of an `AWS::EC2::Subnet`.
pub fn subnet_tier(subnet: &CfnResource) -> Option<SubnetTier> {
    let tags = subnet.prop("Tags")?.as_array()?;
    let value = tags
        .iter()
        .find(|t| t.get("Key").and_then(Value::as_str) == Some(TIER_TAG))?
        .get("Value")?
        .as_str()?;
    match value {
        "Public" => Some(SubnetTier::Public),
        "Private" => Some(SubnetTier::Private),
        _ => None,
    }
}

/// Logical IDs of the network pieces other builders attach to.
#[derive(Debug, Clone)]
pub struct NetworkHandles {
    pub vpc: String,
    pub public_subnets: Vec<String>,
    pub private_subnets: Vec<String>,
    pub nat_gateways: Vec<String>,
}

/// Declare the VPC and its subnets. Public subnets are allocated first, then
/// private, one block per zone, in address order.
pub fn build(b: &mut StackBuilder, cfg: &NetworkConfig) -> Result<NetworkHandles> {
    let cidr: Ipv4Cidr = cfg
        .cidr
        .parse()
        .map_err(|e| Error::Template(format!("network cidr: {}", e)))?;

    let vpc_name = b.qualified_name(&["VPC"]);
    let vpc = b.add(
        &["VPC"],
        CfnResource::new(
            "AWS::EC2::VPC",
            json!({
                "CidrBlock": cfg.cidr,
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "InstanceTenancy": "default",
                "Tags": name_tag(&vpc_name),
            }),
        ),
    )?;

    let igw = b.add(
        &["VPC", "IGW"],
        CfnResource::new(
            "AWS::EC2::InternetGateway",
            json!({ "Tags": name_tag(&vpc_name) }),
        ),
    )?;
    let gateway_attachment = b.add(
        &["VPC", "VPCGW"],
        CfnResource::new(
            "AWS::EC2::VPCGatewayAttachment",
            json!({ "InternetGatewayId": reference(&igw), "VpcId": reference(&vpc) }),
        ),
    )?;

    let mut next_block = 0u32;
    let mut allocate = || -> Result<Ipv4Cidr> {
        let block = cidr.subnet(cfg.subnet_mask, next_block).ok_or_else(|| {
            Error::Template(format!(
                "subnet #{} of /{} does not fit in {}",
                next_block, cfg.subnet_mask, cidr
            ))
        })?;
        next_block += 1;
        Ok(block)
    };

    let mut handles = NetworkHandles {
        vpc: vpc.clone(),
        public_subnets: Vec::new(),
        private_subnets: Vec::new(),
        nat_gateways: Vec::new(),
    };

    for az in 0..cfg.max_azs {
        let block = allocate()?;
        let subnet = declare_subnet(b, &vpc, SubnetTier::Public, az, block)?;

        let base = subnet_base(SubnetTier::Public, az);
        let route = b.add(
            &["VPC", &base, "DefaultRoute"],
            CfnResource::new(
                "AWS::EC2::Route",
                json!({
                    "DestinationCidrBlock": ANYWHERE,
                    "GatewayId": reference(&igw),
                    "RouteTableId": reference(&subnet.route_table),
                }),
            )
            .depends_on(&gateway_attachment),
        )?;

        if az < cfg.nat_gateways {
            let name = b.qualified_name(&["VPC", &base]);
            let eip = b.add(
                &["VPC", &base, "EIP"],
                CfnResource::new(
                    "AWS::EC2::EIP",
                    json!({ "Domain": "vpc", "Tags": name_tag(&name) }),
                ),
            )?;
            let nat = b.add(
                &["VPC", &base, "NATGateway"],
                CfnResource::new(
                    "AWS::EC2::NatGateway",
                    json!({
                        "AllocationId": get_att(&eip, "AllocationId"),
                        "SubnetId": reference(&subnet.subnet),
                        "Tags": name_tag(&name),
                    }),
                )
                .depends_on(&route)
                .depends_on(&subnet.association),
            )?;
            handles.nat_gateways.push(nat);
        }
        handles.public_subnets.push(subnet.subnet);
    }

    if handles.nat_gateways.is_empty() {
        return Err(Error::Template(
            "private subnets need at least one NAT gateway".to_string(),
        ));
    }

    for az in 0..cfg.max_azs {
        let block = allocate()?;
        let subnet = declare_subnet(b, &vpc, SubnetTier::Private, az, block)?;
        let nat = &handles.nat_gateways[az as usize % handles.nat_gateways.len()];
        b.add(
            &["VPC", &subnet_base(SubnetTier::Private, az), "DefaultRoute"],
            CfnResource::new(
                "AWS::EC2::Route",
                json!({
                    "DestinationCidrBlock": ANYWHERE,
                    "NatGatewayId": reference(nat),
                    "RouteTableId": reference(&subnet.route_table),
                }),
            ),
        )?;
        handles.private_subnets.push(subnet.subnet);
    }

    Ok(handles)
}

struct DeclaredSubnet {
    subnet: String,
    route_table: String,
    association: String,
}

fn subnet_base(tier: SubnetTier, az: u32) -> String {
    format!("{}Subnet{}", tier.label(), az + 1)
}

fn declare_subnet(
    b: &mut StackBuilder,
    vpc: &str,
    tier: SubnetTier,
    az: u32,
    block: Ipv4Cidr,
) -> Result<DeclaredSubnet> {
    let base = subnet_base(tier, az);
    let name = b.qualified_name(&["VPC", &base]);
    let subnet = b.add(
        &["VPC", &base, "Subnet"],
        CfnResource::new(
            "AWS::EC2::Subnet",
            json!({
                "AvailabilityZone": select(az as usize, get_azs()),
                "CidrBlock": block.to_string(),
                "MapPublicIpOnLaunch": tier == SubnetTier::Public,
                "VpcId": reference(vpc),
                "Tags": [
                    { "Key": "Name", "Value": name },
                    { "Key": NAME_TAG, "Value": tier.label() },
                    { "Key": TIER_TAG, "Value": tier.tag_value() },
                ],
            }),
        ),
    )?;
    let route_table = b.add(
        &["VPC", &base, "RouteTable"],
        CfnResource::new(
            "AWS::EC2::RouteTable",
            json!({ "VpcId": reference(vpc), "Tags": name_tag(&name) }),
        ),
    )?;
    let association = b.add(
        &["VPC", &base, "RouteTableAssociation"],
        CfnResource::new(
            "AWS::EC2::SubnetRouteTableAssociation",
            json!({ "RouteTableId": reference(&route_table), "SubnetId": reference(&subnet) }),
        ),
    )?;
    Ok(DeclaredSubnet {
        subnet,
        route_table,
        association,
    })
}
