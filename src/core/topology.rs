//! ST-006: Topology definition. Drives the resource builders in construction order.
//!
//! The bootstrap script is read before any resource is declared. Everything
//! after that is pure: the same configuration and script always produce the
//! same template.

use super::error::{Error, Result};
use super::resolver;
use super::synth::StackBuilder;
use super::template::Template;
use super::types::StackConfig;
use crate::resources::{cache, compute, database, identity, image, network, outputs, security};
use std::path::{Path, PathBuf};

/// A validated configuration paired with its bootstrap script.
#[derive(Debug, Clone)]
pub struct Topology {
    pub config: StackConfig,
    pub script: String,
    pub script_path: PathBuf,
}

/// Where a relative `user_data` path points.
pub fn script_location(config: &StackConfig, base_dir: &Path) -> PathBuf {
    let p = Path::new(&config.web.user_data);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

impl Topology {
    /// Read the bootstrap script. Relative paths resolve against `base_dir`.
    pub fn load(config: StackConfig, base_dir: &Path) -> Result<Self> {
        let script_path = script_location(&config, base_dir);
        let script = std::fs::read_to_string(&script_path).map_err(|e| Error::BootstrapScript {
            path: script_path.clone(),
            source: e,
        })?;
        tracing::debug!(path = %script_path.display(), bytes = script.len(), "read bootstrap script");
        Ok(Self::with_script(config, script, script_path))
    }

    /// Pair a configuration with an in-memory script.
    pub fn with_script(config: StackConfig, script: String, script_path: PathBuf) -> Self {
        Self {
            config,
            script,
            script_path,
        }
    }

    /// Build the template. Leaves are declared first; every reference is
    /// checked once the graph is complete.
    pub fn synthesize(&self) -> Result<Template> {
        let cfg = &self.config;
        let mut b = StackBuilder::new(&cfg.name, cfg.description.clone());

        let net = network::build(&mut b, &cfg.network)?;
        let groups = security::build(&mut b, cfg, &net.vpc)?;
        let cache_subnets = cache::build_subnet_group(&mut b, &cfg.cache, &net.private_subnets)?;
        security::authorize(&mut b, &groups, cfg)?;
        let ident = identity::build(&mut b, &cfg.identity)?;
        let db = database::build(&mut b, &cfg.database, &net.private_subnets, &groups.database)?;
        let cluster = cache::build_cluster(&mut b, &cfg.cache, &cache_subnets, &groups.cache)?;
        let ami = image::resolve(&mut b, &cfg.image)?;
        let web = compute::build(
            &mut b,
            &cfg.web,
            &self.script,
            &net.public_subnets,
            &groups.web,
            &ident,
            &ami,
        )?;
        outputs::build(
            &mut b,
            &outputs::OutputSources {
                secret: &db.secret,
                database: &db.instance,
                cache: &cluster.cluster,
                instance: &web.instance,
            },
            &cfg.cache,
        )?;

        let template = b.build();
        resolver::check_references(&template)?;
        resolver::build_creation_order(&template)?;
        tracing::info!(
            stack = %cfg.name,
            resources = template.resources.len(),
            parameters = template.parameters.len(),
            outputs = template.outputs.len(),
            "synthesized template"
        );
        Ok(template)
    }
}
