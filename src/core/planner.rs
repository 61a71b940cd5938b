//! ST-008: Plan generation. Diff a synthesized template against the lock.

use super::error::Result;
use super::resolver;
use super::template::{CfnResource, Template};
use super::types::*;
use crate::tripwire::hasher;

/// Generate an execution plan by comparing the template to the last lock.
/// Changes follow creation order; destroys come last, newest first.
pub fn plan(stack: &str, template: &Template, lock: Option<&StackLock>) -> Result<ExecutionPlan> {
    let creation_order = resolver::build_creation_order(template)?;
    let mut changes = Vec::new();
    let mut to_create = 0u32;
    let mut to_update = 0u32;
    let mut to_destroy = 0u32;
    let mut unchanged = 0u32;

    for logical_id in &creation_order {
        let Some(resource) = template.resources.get(logical_id) else {
            continue;
        };
        let action = determine_action(logical_id, resource, lock)?;
        match action {
            PlanAction::Create => to_create += 1,
            PlanAction::Update => to_update += 1,
            PlanAction::Destroy => to_destroy += 1,
            PlanAction::NoOp => unchanged += 1,
        }
        changes.push(PlannedChange {
            logical_id: logical_id.clone(),
            resource_type: resource.resource_type.clone(),
            description: describe_action(logical_id, &resource.resource_type, &action),
            action,
        });
    }

    if let Some(lock) = lock {
        for (logical_id, rl) in lock.resources.iter().rev() {
            if template.resources.contains_key(logical_id) {
                continue;
            }
            to_destroy += 1;
            changes.push(PlannedChange {
                logical_id: logical_id.clone(),
                resource_type: rl.resource_type.clone(),
                description: describe_action(logical_id, &rl.resource_type, &PlanAction::Destroy),
                action: PlanAction::Destroy,
            });
        }
    }

    Ok(ExecutionPlan {
        name: stack.to_string(),
        changes,
        creation_order,
        to_create,
        to_update,
        to_destroy,
        unchanged,
    })
}

/// Determine what the engine will do with one resource.
fn determine_action(
    logical_id: &str,
    resource: &CfnResource,
    lock: Option<&StackLock>,
) -> Result<PlanAction> {
    let Some(rl) = lock.and_then(|l| l.resources.get(logical_id)) else {
        return Ok(PlanAction::Create);
    };
    if rl.resource_type != resource.resource_type {
        // Type changes force replacement, reported as an update
        return Ok(PlanAction::Update);
    }
    if rl.hash == hasher::hash_resource(resource)? {
        Ok(PlanAction::NoOp)
    } else {
        Ok(PlanAction::Update)
    }
}

/// Generate a human-readable description of a planned action.
fn describe_action(logical_id: &str, resource_type: &str, action: &PlanAction) -> String {
    match action {
        PlanAction::Create => format!("{}: create {}", logical_id, resource_type),
        PlanAction::Update => format!("{}: update (declaration changed)", logical_id),
        PlanAction::Destroy => format!("{}: destroy {}", logical_id, resource_type),
        PlanAction::NoOp => format!("{}: no changes", logical_id),
    }
}

/// Policy the engine applies when none is declared.
pub fn default_deletion_policy(resource_type: &str) -> DeletionPolicy {
    match resource_type {
        "AWS::RDS::DBInstance" | "AWS::RDS::DBCluster" => DeletionPolicy::Snapshot,
        _ => DeletionPolicy::Delete,
    }
}

/// What withdrawing the stack does to each resource, in reverse creation order.
pub fn plan_teardown(lock: &StackLock) -> Vec<TeardownEntry> {
    lock.resources
        .iter()
        .rev()
        .map(|(logical_id, rl)| TeardownEntry {
            logical_id: logical_id.clone(),
            resource_type: rl.resource_type.clone(),
            policy: rl
                .deletion_policy
                .unwrap_or_else(|| default_deletion_policy(&rl.resource_type)),
            deletion_protection: rl.deletion_protection,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::new_lock;
    use crate::core::template::reference;
    use serde_json::json;

    fn make_template() -> Template {
        let mut t = Template::new(None);
        t.resources.insert(
            "Vpc".into(),
            CfnResource::new("AWS::EC2::VPC", json!({"CidrBlock": "10.0.0.0/16"})),
        );
        t.resources.insert(
            "Subnet".into(),
            CfnResource::new("AWS::EC2::Subnet", json!({"VpcId": reference("Vpc")})),
        );
        t.resources.insert(
            "Db".into(),
            CfnResource::new("AWS::RDS::DBInstance", json!({"SubnetId": reference("Subnet")}))
                .removal(DeletionPolicy::Delete),
        );
        t
    }

    fn lock_for(t: &Template) -> StackLock {
        let order = resolver::build_creation_order(t).unwrap();
        new_lock("demo", t, &order).unwrap()
    }

    #[test]
    fn test_st008_plan_all_create() {
        let t = make_template();
        let plan = plan("demo", &t, None).unwrap();
        assert_eq!(plan.to_create, 3);
        assert_eq!(plan.to_update, 0);
        assert_eq!(plan.unchanged, 0);
        assert!(plan.changes.iter().all(|c| c.action == PlanAction::Create));
        assert_eq!(plan.creation_order, vec!["Vpc", "Subnet", "Db"]);
        assert!(plan.has_changes());
    }

    #[test]
    fn test_st008_plan_all_unchanged() {
        let t = make_template();
        let lock = lock_for(&t);
        let plan = plan("demo", &t, Some(&lock)).unwrap();
        assert_eq!(plan.unchanged, 3);
        assert_eq!(plan.to_create, 0);
        assert!(!plan.has_changes());
    }

    #[test]
    fn test_st008_plan_update_on_hash_mismatch() {
        let t = make_template();
        let lock = lock_for(&t);
        let mut changed = t.clone();
        changed.resources["Vpc"]
            .properties
            .insert("CidrBlock".into(), json!("10.1.0.0/16"));
        let plan = plan("demo", &changed, Some(&lock)).unwrap();
        assert_eq!(plan.to_update, 1);
        assert_eq!(plan.unchanged, 2);
        assert_eq!(plan.changes[0].action, PlanAction::Update);
    }

    #[test]
    fn test_st008_plan_destroy_removed() {
        let t = make_template();
        let lock = lock_for(&t);
        let mut shrunk = t.clone();
        shrunk.resources.shift_remove("Db");
        let plan = plan("demo", &shrunk, Some(&lock)).unwrap();
        assert_eq!(plan.to_destroy, 1);
        let last = plan.changes.last().unwrap();
        assert_eq!(last.logical_id, "Db");
        assert_eq!(last.action, PlanAction::Destroy);
        assert!(last.description.contains("destroy AWS::RDS::DBInstance"));
    }

    #[test]
    fn test_st008_teardown_reverse_order() {
        let lock = lock_for(&make_template());
        let teardown = plan_teardown(&lock);
        let ids: Vec<_> = teardown.iter().map(|e| e.logical_id.as_str()).collect();
        assert_eq!(ids, vec!["Db", "Subnet", "Vpc"]);
        assert!(teardown.iter().all(TeardownEntry::destructible));
    }

    #[test]
    fn test_st008_teardown_default_policies() {
        let mut t = make_template();
        t.resources["Db"].deletion_policy = None;
        let teardown = plan_teardown(&lock_for(&t));
        assert_eq!(teardown[0].policy, DeletionPolicy::Snapshot);
        assert!(!teardown[0].destructible());
        assert_eq!(teardown[2].policy, DeletionPolicy::Delete);
    }

    #[test]
    fn test_st008_describe_action() {
        assert_eq!(
            describe_action("Vpc", "AWS::EC2::VPC", &PlanAction::Create),
            "Vpc: create AWS::EC2::VPC"
        );
        assert_eq!(describe_action("Vpc", "AWS::EC2::VPC", &PlanAction::NoOp), "Vpc: no changes");
    }
}
