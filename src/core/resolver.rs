//! ST-005: Reference resolution and dependency DAG construction.
//!
//! Collects `Ref` and `Fn::GetAtt` targets from resource properties, outputs
//! and `DependsOn`, checks that each one names a declared resource or
//! parameter, and computes a creation order using Kahn's algorithm with
//! deterministic (alphabetical) tie-breaking.

use super::error::{Error, Result};
use super::template::{CfnResource, Template};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

const PSEUDO_PREFIX: &str = "AWS::";

/// Every logical ID referenced anywhere inside `value`.
pub fn collect_references(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(id)) = map.get("Ref") {
                out.insert(id.clone());
            }
            match map.get("Fn::GetAtt") {
                Some(Value::Array(parts)) => {
                    if let Some(Value::String(id)) = parts.first() {
                        out.insert(id.clone());
                    }
                }
                Some(Value::String(dotted)) => {
                    if let Some((id, _)) = dotted.split_once('.') {
                        out.insert(id.to_string());
                    }
                }
                _ => {}
            }
            for v in map.values() {
                collect_references(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_references(v, out);
            }
        }
        _ => {}
    }
}

/// Logical IDs a resource must wait for: explicit `DependsOn` plus every
/// resource its properties reference. Pseudo parameters are skipped.
pub fn resource_dependencies(resource: &CfnResource) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();
    for v in resource.properties.values() {
        collect_references(v, &mut refs);
    }
    refs.extend(resource.depends_on.iter().cloned());
    refs.retain(|r| !r.starts_with(PSEUDO_PREFIX));
    refs
}

/// References that name neither a resource nor a parameter, as
/// `(referencing site, missing target)` pairs.
pub fn dangling_references(template: &Template) -> Vec<(String, String)> {
    let known = |id: &str| {
        id.starts_with(PSEUDO_PREFIX)
            || template.resources.contains_key(id)
            || template.parameters.contains_key(id)
    };

    let mut dangling = Vec::new();
    for (id, resource) in &template.resources {
        for target in resource_dependencies(resource) {
            if !known(&target) {
                dangling.push((id.clone(), target));
            }
        }
    }
    for (name, output) in &template.outputs {
        let mut refs = BTreeSet::new();
        collect_references(&output.value, &mut refs);
        for target in refs {
            if !known(&target) {
                dangling.push((format!("output {}", name), target));
            }
        }
    }
    dangling
}

/// Fail on the first dangling reference.
pub fn check_references(template: &Template) -> Result<()> {
    match dangling_references(template).into_iter().next() {
        Some((site, target)) => Err(Error::Template(format!(
            "'{}' references undeclared '{}'",
            site, target
        ))),
        None => Ok(()),
    }
}

/// Build a topological creation order over the template's resources.
/// Uses Kahn's algorithm with alphabetical tie-breaking for determinism.
/// References to parameters impose no ordering.
pub fn build_creation_order(template: &Template) -> Result<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

    for id in template.resources.keys() {
        in_degree.insert(id, 0);
        adjacency.insert(id, Vec::new());
    }

    for (id, resource) in &template.resources {
        for dep in resource_dependencies(resource) {
            if template.parameters.contains_key(&dep) {
                continue;
            }
            let Some((dep_id, _)) = template.resources.get_key_value(&dep) else {
                return Err(Error::Template(format!(
                    "resource '{}' depends on unknown '{}'",
                    id, dep
                )));
            };
            if let Some(edges) = adjacency.get_mut(dep_id.as_str()) {
                edges.push(id);
            }
            if let Some(degree) = in_degree.get_mut(id.as_str()) {
                *degree += 1;
            }
        }
    }

    // Kahn's algorithm with sorted tie-breaking
    let mut zero_degree: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| *id)
        .collect();
    zero_degree.sort_unstable();
    let mut queue: VecDeque<&str> = zero_degree.into_iter().collect();

    let mut order = Vec::with_capacity(template.resources.len());
    while let Some(current) = queue.pop_front() {
        order.push(current.to_string());

        let mut next_ready: Vec<&str> = Vec::new();
        if let Some(neighbors) = adjacency.get(current) {
            for neighbor in neighbors {
                if let Some(degree) = in_degree.get_mut(neighbor) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(neighbor);
                    }
                }
            }
        }
        next_ready.sort_unstable();
        queue.extend(next_ready);
    }

    if order.len() != template.resources.len() {
        let ordered: HashSet<&str> = order.iter().map(String::as_str).collect();
        let mut members: Vec<&str> = template
            .resources
            .keys()
            .map(String::as_str)
            .filter(|id| !ordered.contains(id))
            .collect();
        members.sort_unstable();
        return Err(Error::Cycle(members.join(", ")));
    }

    Ok(order)
}
