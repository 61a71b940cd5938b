//! ST-017: The five stack outputs.

use super::cache;
use super::database;
use crate::core::error::Result;
use crate::core::synth::{sanitize, StackBuilder};
use crate::core::template::get_att;
use crate::core::types::CacheConfig;

pub const SECRET_NAME: &str = "secret_name";
pub const MYSQL_ENDPOINT: &str = "mysql_endpoint";
pub const REDIS_ENDPOINT: &str = "redis_endpoint";
pub const WEBSERVER_PUBLIC_IP: &str = "webserver_public_ip";
pub const WEBSERVER_PUBLIC_URL: &str = "webserver_public_url";

/// Output names in the order they are declared and printed.
pub const NAMES: [&str; 5] = [
    SECRET_NAME,
    MYSQL_ENDPOINT,
    REDIS_ENDPOINT,
    WEBSERVER_PUBLIC_IP,
    WEBSERVER_PUBLIC_URL,
];

/// Logical IDs the outputs point at.
#[derive(Debug, Clone)]
pub struct OutputSources<'a> {
    pub secret: &'a str,
    pub database: &'a str,
    pub cache: &'a str,
    pub instance: &'a str,
}

pub fn build(b: &mut StackBuilder, sources: &OutputSources<'_>, cache_cfg: &CacheConfig) -> Result<()> {
    b.add_output(
        SECRET_NAME,
        database::secret_name(sources.secret),
        Some("Name of the secret holding the database credential".to_string()),
    )?;
    b.add_output(
        MYSQL_ENDPOINT,
        get_att(sources.database, "Endpoint.Address"),
        Some("Database endpoint address".to_string()),
    )?;
    b.add_output(
        REDIS_ENDPOINT,
        cache::endpoint(cache_cfg, sources.cache),
        Some("Cache endpoint address".to_string()),
    )?;
    b.add_output(
        WEBSERVER_PUBLIC_IP,
        get_att(sources.instance, "PublicIp"),
        Some("Web server public IP address".to_string()),
    )?;
    b.add_output(
        WEBSERVER_PUBLIC_URL,
        get_att(sources.instance, "PublicDnsName"),
        Some("Web server public DNS name".to_string()),
    )?;
    Ok(())
}

/// Map an engine-reported output key (`secretname`) back to its name
/// (`secret_name`). Unknown keys are returned unchanged.
pub fn display_name(output_key: &str) -> &str {
    NAMES
        .iter()
        .find(|n| sanitize(n) == output_key)
        .copied()
        .unwrap_or(output_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sources() -> OutputSources<'static> {
        OutputSources {
            secret: "Sec",
            database: "Db",
            cache: "Cache",
            instance: "Vm",
        }
    }

    #[test]
    fn test_st017_five_outputs_in_order() {
        let mut b = StackBuilder::new("demo", None);
        build(&mut b, &sources(), &CacheConfig::default()).unwrap();
        let t = b.build();
        let keys: Vec<&str> = t.outputs.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "secretname",
                "mysqlendpoint",
                "redisendpoint",
                "webserverpublicip",
                "webserverpublicurl"
            ]
        );
    }

    #[test]
    fn test_st017_output_values() {
        let mut b = StackBuilder::new("demo", None);
        build(&mut b, &sources(), &CacheConfig::default()).unwrap();
        let t = b.build();
        assert_eq!(t.outputs["mysqlendpoint"].value, get_att("Db", "Endpoint.Address"));
        assert_eq!(t.outputs["redisendpoint"].value, get_att("Cache", "RedisEndpoint.Address"));
        assert_eq!(t.outputs["webserverpublicip"].value, get_att("Vm", "PublicIp"));
        assert_eq!(t.outputs["webserverpublicurl"].value, get_att("Vm", "PublicDnsName"));
        assert!(t.outputs["secretname"].value.to_string().contains(&json!({"Ref": "Sec"}).to_string()));
    }

    #[test]
    fn test_st017_display_name() {
        assert_eq!(display_name("secretname"), "secret_name");
        assert_eq!(display_name("webserverpublicurl"), "webserver_public_url");
        assert_eq!(display_name("SomethingElse"), "SomethingElse");
    }
}
