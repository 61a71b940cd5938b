//! ST-012: Managed MySQL instance with a generated credential.
//!
//! The master password never appears in the template: a Secrets Manager secret
//! generates it and the instance reads it through dynamic references.

use crate::core::error::Result;
use crate::core::synth::StackBuilder;
use crate::core::template::{get_att, join, reference, select, split, CfnResource};
use crate::core::types::{DatabaseConfig, DeletionPolicy};
use serde_json::{json, Value};

const CONSTRUCT: &str = "Database";
const EXCLUDED_PASSWORD_CHARS: &str = " %+~`#$&*()|[]{}:;<>?!'/@\"\\";

/// Logical IDs of the database pieces.
#[derive(Debug, Clone)]
pub struct DatabaseHandles {
    pub instance: String,
    pub secret: String,
    pub subnet_group: String,
}

/// Declare the subnet group, credential secret, instance and secret attachment.
pub fn build(
    b: &mut StackBuilder,
    cfg: &DatabaseConfig,
    private_subnets: &[String],
    security_group: &str,
) -> Result<DatabaseHandles> {
    let qualified = b.qualified_name(&[CONSTRUCT]);

    let subnet_group = b.add(
        &[CONSTRUCT, "SubnetGroup", "Default"],
        CfnResource::new(
            "AWS::RDS::DBSubnetGroup",
            json!({
                "DBSubnetGroupDescription": format!("Subnet group for {} database", qualified),
                "SubnetIds": private_subnets.iter().map(|s| reference(s)).collect::<Vec<_>>(),
            }),
        ),
    )?;

    let removal = cfg.removal_policy.deletion_policy();

    let secret = b.add(
        &[CONSTRUCT, "Secret", "Resource"],
        CfnResource::new(
            "AWS::SecretsManager::Secret",
            json!({
                "Description": format!("Generated by stackforge for {}", qualified),
                "GenerateSecretString": {
                    "ExcludeCharacters": EXCLUDED_PASSWORD_CHARS,
                    "GenerateStringKey": "password",
                    "PasswordLength": 30,
                    "SecretStringTemplate": json!({ "username": cfg.username }).to_string(),
                },
            }),
        )
        .removal(DeletionPolicy::Delete),
    )?;

    let instance = b.add(
        &[CONSTRUCT, "Resource"],
        CfnResource::new(
            "AWS::RDS::DBInstance",
            json!({
                "AllocatedStorage": cfg.allocated_storage.to_string(),
                "CopyTagsToSnapshot": true,
                "DBInstanceClass": cfg.instance_class,
                "DBName": cfg.name,
                "DBSubnetGroupName": reference(&subnet_group),
                "DeletionProtection": cfg.deletion_protection,
                "EnableIAMDatabaseAuthentication": cfg.iam_authentication,
                "Engine": "mysql",
                "EngineVersion": cfg.engine_version,
                "MasterUsername": secret_field(&secret, "username"),
                "MasterUserPassword": secret_field(&secret, "password"),
                "Port": cfg.port.to_string(),
                "PubliclyAccessible": false,
                "StorageEncrypted": cfg.storage_encrypted,
                "StorageType": "gp2",
                "VPCSecurityGroups": [get_att(security_group, "GroupId")],
            }),
        )
        .removal(removal),
    )?;

    b.add(
        &[CONSTRUCT, "Secret", "Attachment", "Resource"],
        CfnResource::new(
            "AWS::SecretsManager::SecretTargetAttachment",
            json!({
                "SecretId": reference(&secret),
                "TargetId": reference(&instance),
                "TargetType": "AWS::RDS::DBInstance",
            }),
        ),
    )?;

    Ok(DatabaseHandles {
        instance,
        secret,
        subnet_group,
    })
}

/// `{{resolve:secretsmanager:<arn>:SecretString:<field>::}}`
fn secret_field(secret: &str, field: &str) -> Value {
    join(
        "",
        vec![
            json!("{{resolve:secretsmanager:"),
            reference(secret),
            json!(format!(":SecretString:{}::}}}}", field)),
        ],
    )
}

/// Secret name recovered from its ARN
/// (`arn:aws:secretsmanager:<region>:<account>:secret:<name>-<suffix>`).
/// Generated names carry one hyphen before the six-character suffix.
pub fn secret_name(secret: &str) -> Value {
    let resource = select(6, split(":", reference(secret)));
    let parts = split("-", resource);
    join("-", vec![select(0, parts.clone()), select(1, parts)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::template::Template;
    use crate::core::types::RemovalPolicy;

    fn build_db(cfg: &DatabaseConfig) -> (Template, DatabaseHandles) {
        let mut b = StackBuilder::new("demo", None);
        let private = vec!["PrivA".to_string(), "PrivB".to_string()];
        let h = build(&mut b, cfg, &private, "DbSg").unwrap();
        (b.build(), h)
    }

    #[test]
    fn test_st012_instance_properties() {
        let (t, h) = build_db(&DatabaseConfig::default());
        let db = &t.resources[&h.instance];
        assert_eq!(db.resource_type, "AWS::RDS::DBInstance");
        assert_eq!(db.prop("Engine"), Some(&json!("mysql")));
        assert_eq!(db.prop("EngineVersion"), Some(&json!("8.0.28")));
        assert_eq!(db.prop("DBInstanceClass"), Some(&json!("db.t3.medium")));
        assert_eq!(db.prop("StorageEncrypted"), Some(&json!(true)));
        assert_eq!(db.prop("EnableIAMDatabaseAuthentication"), Some(&json!(true)));
        assert_eq!(db.prop("PubliclyAccessible"), Some(&json!(false)));
        assert_eq!(db.prop("Port"), Some(&json!("3306")));
        assert_eq!(db.prop("VPCSecurityGroups"), Some(&json!([get_att("DbSg", "GroupId")])));
    }

    #[test]
    fn test_st012_destructible_by_default() {
        let (t, h) = build_db(&DatabaseConfig::default());
        let db = &t.resources[&h.instance];
        assert_eq!(db.deletion_policy, Some(DeletionPolicy::Delete));
        assert_eq!(db.update_replace_policy, Some(DeletionPolicy::Delete));
        assert_eq!(db.prop("DeletionProtection"), Some(&json!(false)));
    }

    #[test]
    fn test_st012_snapshot_policy() {
        let cfg = DatabaseConfig {
            removal_policy: RemovalPolicy::Snapshot,
            ..DatabaseConfig::default()
        };
        let (t, h) = build_db(&cfg);
        assert_eq!(t.resources[&h.instance].deletion_policy, Some(DeletionPolicy::Snapshot));
    }

    #[test]
    fn test_st012_placed_in_private_subnets() {
        let (t, h) = build_db(&DatabaseConfig::default());
        let group = &t.resources[&h.subnet_group];
        assert_eq!(
            group.prop("SubnetIds"),
            Some(&json!([reference("PrivA"), reference("PrivB")]))
        );
        assert_eq!(
            t.resources[&h.instance].prop("DBSubnetGroupName"),
            Some(&reference(&h.subnet_group))
        );
    }

    #[test]
    fn test_st012_password_not_in_template() {
        let (t, h) = build_db(&DatabaseConfig::default());
        let password = t.resources[&h.instance].prop("MasterUserPassword").unwrap().to_string();
        assert!(password.contains("resolve:secretsmanager"));
        assert!(password.contains(":SecretString:password::}}"));
        assert!(password.contains(&h.secret));
    }

    #[test]
    fn test_st012_secret_template_carries_username() {
        let cfg = DatabaseConfig {
            username: "dbadmin".to_string(),
            ..DatabaseConfig::default()
        };
        let (t, h) = build_db(&cfg);
        let generated = t.resources[&h.secret].prop("GenerateSecretString").unwrap();
        assert_eq!(generated["SecretStringTemplate"], json!("{\"username\":\"dbadmin\"}"));
        assert_eq!(generated["GenerateStringKey"], json!("password"));
    }

    #[test]
    fn test_st012_secret_attached() {
        let (t, h) = build_db(&DatabaseConfig::default());
        let (_, att) = t.only_resource("AWS::SecretsManager::SecretTargetAttachment").unwrap();
        assert_eq!(att.prop("TargetId"), Some(&reference(&h.instance)));
        assert_eq!(att.prop("SecretId"), Some(&reference(&h.secret)));
    }

    #[test]
    fn test_st012_secret_name_expression() {
        let v = secret_name("Sec");
        assert_eq!(v["Fn::Join"][0], json!("-"));
        assert!(v.to_string().contains("{\"Ref\":\"Sec\"}"));
    }
}
