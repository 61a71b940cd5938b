//! Core synthesis logic: types, parsing, template model, ordering, planning, state.

pub mod audit;
pub mod error;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod state;
pub mod synth;
pub mod template;
pub mod topology;
pub mod types;
