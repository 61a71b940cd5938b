//! Resource builders. Each declares one part of the topology into a
//! `StackBuilder` and returns the logical IDs later builders reference.

pub mod cache;
pub mod compute;
pub mod database;
pub mod identity;
pub mod image;
pub mod network;
pub mod outputs;
pub mod security;
