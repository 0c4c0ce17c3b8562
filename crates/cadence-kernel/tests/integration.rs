//! Integration tests for the cadence-kernel crate.
//!
//! These tests exercise the agent registry as shared, concurrently mutated
//! process state.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use cadence_kernel::{AgentInfo, AgentRegistry, KernelError};

// ═══════════════════════════════════════════════════════════════════════
//  Concurrent registration
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn concurrent_registration_assigns_unique_node_names() {
    let registry: AgentRegistry<Arc<String>> = AgentRegistry::new();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let registry = registry.clone();
            thread::spawn(move || {
                // Every thread registers an id that sanitizes to "worker".
                let id = format!("Worker{}", "!".repeat(i));
                registry
                    .register(id, "collides", Arc::new(format!("handle-{i}")))
                    .unwrap()
            })
        })
        .collect();

    let names: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(names.len(), 8, "every registration must get its own node name");
    assert!(names.contains("worker"));
    for suffix in 1..8 {
        assert!(names.contains(&format!("worker_{suffix}")));
    }
    assert_eq!(registry.count().unwrap(), 8);
}

#[test]
fn readers_see_consistent_maps_during_churn() {
    let registry: AgentRegistry<u32> = AgentRegistry::new();
    registry.register("stable", "always present", 0).unwrap();

    let writer = {
        let registry = registry.clone();
        thread::spawn(move || {
            for i in 0..200u32 {
                registry.register("churn", "comes and goes", i).unwrap();
                registry.unregister("churn").unwrap();
            }
        })
    };

    let reader = {
        let registry = registry.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                let (info, handle) = registry.get_by_node("stable").unwrap();
                assert_eq!(info.id, "stable");
                assert_eq!(handle, 0);

                // If the churn agent is visible by id, it must also be
                // visible by node name.
                if let Ok(node) = registry.resolve_node("churn") {
                    match registry.get_by_node(&node) {
                        Ok((info, _)) => assert_eq!(info.id, "churn"),
                        Err(KernelError::NodeNotFound { .. }) => {}
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                }
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();
    assert_eq!(registry.count().unwrap(), 1);
}

// ═══════════════════════════════════════════════════════════════════════
//  Snapshots
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn agent_info_serializes() {
    let registry: AgentRegistry<()> = AgentRegistry::new();
    registry.register("Token Swap", "swaps tokens", ()).unwrap();

    let info: AgentInfo = registry.list().unwrap().remove(0);
    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["id"], "Token Swap");
    assert_eq!(json["node_name"], "token_swap");
    assert_eq!(json["description"], "swaps tokens");
}
