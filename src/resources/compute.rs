//! ST-016: Web server instance.
//!
//! Boots into the first public subnet with the instance profile wrapping the
//! identity role. The bootstrap script is passed through as user data without
//! interpretation.

use super::identity::IdentityHandles;
use super::image::ImageRef;
use crate::core::error::{Error, Result};
use crate::core::synth::StackBuilder;
use crate::core::template::{base64, get_att, get_azs, name_tag, reference, select, CfnResource};
use crate::core::types::WebConfig;
use serde_json::json;

const CONSTRUCT: &str = "Webserver";

#[derive(Debug, Clone)]
pub struct ComputeHandles {
    pub instance: String,
    pub instance_profile: String,
}

/// Declare the instance profile and the instance.
pub fn build(
    b: &mut StackBuilder,
    cfg: &WebConfig,
    script: &str,
    public_subnets: &[String],
    security_group: &str,
    identity: &IdentityHandles,
    image: &ImageRef,
) -> Result<ComputeHandles> {
    let subnet = public_subnets.first().ok_or_else(|| {
        Error::Template("web server needs a public subnet".to_string())
    })?;

    let instance_profile = b.add(
        &[CONSTRUCT, "InstanceProfile"],
        CfnResource::new(
            "AWS::IAM::InstanceProfile",
            json!({ "Roles": [reference(&identity.role)] }),
        ),
    )?;

    let name = b.qualified_name(&[CONSTRUCT]);
    let instance = b.add(
        &[CONSTRUCT, "Resource"],
        CfnResource::new(
            "AWS::EC2::Instance",
            json!({
                "AvailabilityZone": select(0, get_azs()),
                "IamInstanceProfile": reference(&instance_profile),
                "ImageId": image.image_id(),
                "InstanceType": cfg.instance_type,
                "SecurityGroupIds": [get_att(security_group, "GroupId")],
                "SubnetId": reference(subnet),
                "Tags": name_tag(&name),
                "UserData": base64(json!(script)),
            }),
        )
        .depends_on(&identity.secret_policy)
        .depends_on(&identity.role),
    )?;

    tracing::debug!(instance = %instance, subnet = %subnet, "web server placed");
    Ok(ComputeHandles {
        instance,
        instance_profile,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::template::Template;

    fn build_web(image: ImageRef) -> (Template, ComputeHandles) {
        let mut b = StackBuilder::new("demo", None);
        let identity = IdentityHandles {
            role: "Role".to_string(),
            secret_policy: "Policy".to_string(),
        };
        let public = vec!["PubA".to_string(), "PubB".to_string()];
        let h = build(
            &mut b,
            &WebConfig::default(),
            "#!/bin/bash\necho hi\n",
            &public,
            "WebSg",
            &identity,
            &image,
        )
        .unwrap();
        (b.build(), h)
    }

    fn latest() -> ImageRef {
        ImageRef::Latest {
            parameter: "AmiParam".to_string(),
            ssm_path: "/x".to_string(),
        }
    }

    #[test]
    fn test_st016_first_public_subnet() {
        let (t, h) = build_web(latest());
        let vm = &t.resources[&h.instance];
        assert_eq!(vm.prop("SubnetId"), Some(&reference("PubA")));
        assert_eq!(vm.prop("InstanceType"), Some(&json!("t3.small")));
        assert_eq!(vm.prop("SecurityGroupIds"), Some(&json!([get_att("WebSg", "GroupId")])));
    }

    #[test]
    fn test_st016_user_data_verbatim() {
        let (t, h) = build_web(latest());
        assert_eq!(
            t.resources[&h.instance].prop("UserData"),
            Some(&json!({"Fn::Base64": "#!/bin/bash\necho hi\n"}))
        );
    }

    #[test]
    fn test_st016_profile_wraps_role() {
        let (t, h) = build_web(latest());
        assert_eq!(
            t.resources[&h.instance_profile].prop("Roles"),
            Some(&json!([reference("Role")]))
        );
        let vm = &t.resources[&h.instance];
        assert_eq!(vm.prop("IamInstanceProfile"), Some(&reference(&h.instance_profile)));
        assert_eq!(vm.depends_on, vec!["Policy", "Role"]);
    }

    #[test]
    fn test_st016_image_id_source() {
        let (t, h) = build_web(latest());
        assert_eq!(t.resources[&h.instance].prop("ImageId"), Some(&reference("AmiParam")));
        let (t, h) = build_web(ImageRef::Pinned("ami-0abc".to_string()));
        assert_eq!(t.resources[&h.instance].prop("ImageId"), Some(&json!("ami-0abc")));
    }

    #[test]
    fn test_st016_no_public_subnet() {
        let mut b = StackBuilder::new("demo", None);
        let identity = IdentityHandles {
            role: "Role".to_string(),
            secret_policy: "Policy".to_string(),
        };
        let err = build(&mut b, &WebConfig::default(), "", &[], "WebSg", &identity, &latest());
        assert!(err.is_err());
    }
}
