//! ST-015: Machine image resolution.
//!
//! By default the image ID is a template parameter backed by the public SSM
//! parameter for the latest Amazon Linux 2 build, so the engine resolves it at
//! every deploy. Two deploys of the same template may boot different images.
//! `pinned_ami` replaces the parameter with a literal ID.

use crate::core::error::Result;
use crate::core::synth::StackBuilder;
use crate::core::template::{reference, Parameter};
use crate::core::types::{ImageConfig, ImageEdition, ImageStorage, Virtualization};
use serde_json::{json, Value};

const SSM_PREFIX: &str = "/aws/service/ami-amazon-linux-latest";
const SSM_IMAGE_TYPE: &str = "AWS::SSM::Parameter::Value<AWS::EC2::Image::Id>";

/// How the instance obtains its image ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// Resolved at deploy time from this parameter (logical ID)
    Latest { parameter: String, ssm_path: String },
    /// Fixed AMI ID
    Pinned(String),
}

impl ImageRef {
    /// Value for the instance's `ImageId` property.
    pub fn image_id(&self) -> Value {
        match self {
            Self::Latest { parameter, .. } => reference(parameter),
            Self::Pinned(ami) => json!(ami),
        }
    }
}

/// Public SSM parameter name for the configured image flavour.
pub fn ssm_parameter_path(cfg: &ImageConfig) -> String {
    let edition = match cfg.edition {
        ImageEdition::Standard => "",
        ImageEdition::Minimal => "minimal-",
    };
    let virtualization = match cfg.virtualization {
        Virtualization::Hvm => "hvm",
        Virtualization::Pv => "pv",
    };
    let storage = match cfg.storage {
        ImageStorage::GeneralPurpose => "gp2",
        ImageStorage::Ebs => "ebs",
    };
    format!(
        "{}/amzn2-ami-{}{}-{}-{}",
        SSM_PREFIX, edition, virtualization, cfg.arch, storage
    )
}

pub fn resolve(b: &mut StackBuilder, cfg: &ImageConfig) -> Result<ImageRef> {
    if let Some(ref ami) = cfg.pinned_ami {
        tracing::info!(ami = %ami, "using pinned machine image");
        return Ok(ImageRef::Pinned(ami.clone()));
    }
    let ssm_path = ssm_parameter_path(cfg);
    let parameter = b.add_parameter(
        &["SsmParameterValue", &ssm_path, "Parameter"],
        Parameter {
            parameter_type: SSM_IMAGE_TYPE.to_string(),
            default: Some(ssm_path.clone()),
            description: Some("Latest Amazon Linux 2 image, resolved at deploy time".to_string()),
        },
    )?;
    Ok(ImageRef::Latest {
        parameter,
        ssm_path,
    })
}
