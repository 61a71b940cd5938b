//! stackforge: a web + MySQL + Redis topology declared as data.
//!
//! A `stack.yaml` is validated, synthesized into a deterministic CloudFormation
//! template, audited for isolation and teardown properties, then handed to the
//! provisioning engine. Submitted templates are recorded in BLAKE3-hashed lock
//! files with a JSONL provenance log.

pub mod cli;
pub mod core;
pub mod resources;
pub mod transport;
pub mod tripwire;
