// tests/integration/rejoin_remove_test.rs

//! Integration tests for rejoining and removing single members, and for the
//! status report

use super::sandbox::{CLUSTER, ROUTER, Sandbox, address, server_uuid};
use super::test_helpers::admin;
use groupwarden::core::admin::{RebootOptions, RemoveOptions};
use groupwarden::core::errors::ClusterAdminError;
use groupwarden::core::instance::MemberState;
use groupwarden::core::metadata::MemberRef;

fn by_address(i: usize) -> MemberRef {
    MemberRef::Address(address(i))
}

// ===== Rejoin =====

#[tokio::test]
async fn test_rejoin_member_that_left() {
    let sandbox = Sandbox::new(3);
    sandbox.stop_group(2);
    let mut handle = admin(&sandbox).get_cluster(CLUSTER).await.unwrap();

    handle.rejoin_instance(&by_address(2)).await.unwrap();

    assert_eq!(sandbox.group_of(0), vec![0, 1, 2]);
    assert_eq!(sandbox.state(2), MemberState::Online);
    assert!(sandbox.log().contains(&format!("join {}", address(2))));
    assert_eq!(sandbox.locks_held(), 0);
    assert_eq!(sandbox.open_sessions(), 0);
}

#[tokio::test]
async fn test_rejoin_by_server_uuid() {
    let sandbox = Sandbox::new(3);
    sandbox.stop_group(1);
    let mut handle = admin(&sandbox).get_cluster(CLUSTER).await.unwrap();

    handle
        .rejoin_instance(&MemberRef::Uuid(server_uuid(1)))
        .await
        .unwrap();
    assert_eq!(sandbox.group_of(0), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_rejoin_refusals() {
    let sandbox = Sandbox::new(3);
    let mut handle = admin(&sandbox).get_cluster(CLUSTER).await.unwrap();

    let err = handle.rejoin_instance(&by_address(1)).await.unwrap_err();
    assert!(matches!(err, ClusterAdminError::InvalidState(_)));

    let err = handle.rejoin_instance(&by_address(9)).await.unwrap_err();
    assert!(matches!(err, ClusterAdminError::NotAClusterMember(..)));

    sandbox.kill(2);
    let err = handle.rejoin_instance(&by_address(2)).await.unwrap_err();
    assert!(matches!(err, ClusterAdminError::InstanceUnreachable(_)));

    assert!(sandbox.log().is_empty());
    assert_eq!(sandbox.locks_held(), 0);
}

#[tokio::test]
async fn test_rejoin_refuses_errant_transactions() {
    let sandbox = Sandbox::new(3);
    sandbox.stop_group(2);
    sandbox.diverge(2, 1);
    let mut handle = admin(&sandbox).get_cluster(CLUSTER).await.unwrap();

    let err = handle.rejoin_instance(&by_address(2)).await.unwrap_err();

    assert!(matches!(err, ClusterAdminError::InvalidState(_)));
    assert_eq!(sandbox.state(2), MemberState::Offline);
    assert_eq!(sandbox.group_of(0), vec![0, 1]);
    assert_eq!(sandbox.locks_held(), 0);
    assert_eq!(sandbox.open_sessions(), 0);
}

#[tokio::test]
async fn test_rejoin_without_group_points_to_reboot() {
    let sandbox = Sandbox::new(3);
    let mut handle = admin(&sandbox).get_cluster(CLUSTER).await.unwrap();
    sandbox.complete_outage();

    let err = handle.rejoin_instance(&by_address(1)).await.unwrap_err();
    match err {
        ClusterAdminError::InvalidState(message) => assert!(message.contains("reboot")),
        other => panic!("expected InvalidState, got {other:?}"),
    }
}

#[tokio::test]
async fn test_targeted_rejoin_after_partial_reboot() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();
    sandbox.fail_start(2, true);
    let admin = admin(&sandbox);

    let err = admin
        .reboot_cluster_from_complete_outage(CLUSTER, RebootOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterAdminError::PartialPlan { .. }));
    assert_eq!(sandbox.state(2), MemberState::Error);

    sandbox.fail_start(2, false);
    let mut handle = admin.get_cluster(CLUSTER).await.unwrap();
    handle.rejoin_instance(&by_address(2)).await.unwrap();

    assert_eq!(sandbox.group_of(0), vec![0, 1, 2]);
    let member = handle
        .catalog()
        .find_member(&by_address(2))
        .cloned()
        .unwrap();
    assert_eq!(member.last_known_state, Some(MemberState::Online));
}

// ===== Remove =====

#[tokio::test]
async fn test_remove_secondary() {
    let sandbox = Sandbox::new(3);
    let mut handle = admin(&sandbox).get_cluster(CLUSTER).await.unwrap();

    handle
        .remove_instance(&by_address(2), RemoveOptions::default())
        .await
        .unwrap();

    assert_eq!(handle.catalog().members().len(), 2);
    assert_eq!(handle.catalog().cluster().view_generation, 2);
    assert_eq!(sandbox.group_of(0), vec![0, 1]);
    assert_eq!(sandbox.state(2), MemberState::Offline);
    let replicated = sandbox.cluster(1).unwrap();
    assert!(replicated.member_by_uuid(&server_uuid(2)).is_none());
    assert_eq!(sandbox.locks_held(), 0);

    // The removed member is no longer known.
    let err = handle.rejoin_instance(&by_address(2)).await.unwrap_err();
    assert!(matches!(err, ClusterAdminError::NotAClusterMember(..)));
}

#[tokio::test]
async fn test_remove_unreachable_member_needs_force() {
    let sandbox = Sandbox::new(3);
    sandbox.kill(2);
    let mut handle = admin(&sandbox).get_cluster(CLUSTER).await.unwrap();

    let err = handle
        .remove_instance(&by_address(2), RemoveOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterAdminError::InstanceUnreachable(_)));
    assert_eq!(sandbox.catalog_writes(), 0);

    handle
        .remove_instance(&by_address(2), RemoveOptions { force: true })
        .await
        .unwrap();
    assert!(handle.catalog().find_member(&by_address(2)).is_none());
    assert_eq!(handle.catalog().members().len(), 2);
}

#[tokio::test]
async fn test_remove_refuses_primary_and_last_member() {
    let sandbox = Sandbox::new(3);
    let mut handle = admin(&sandbox).get_cluster(CLUSTER).await.unwrap();
    let err = handle
        .remove_instance(&by_address(0), RemoveOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterAdminError::InvalidState(_)));
    assert_eq!(sandbox.group_of(0), vec![0, 1, 2]);

    let single = Sandbox::new(1);
    let mut handle = admin(&single).get_cluster(CLUSTER).await.unwrap();
    let err = handle
        .remove_instance(&by_address(0), RemoveOptions { force: true })
        .await
        .unwrap_err();
    match err {
        ClusterAdminError::InvalidState(message) => assert!(message.contains("last member")),
        other => panic!("expected InvalidState, got {other:?}"),
    }
    assert_eq!(single.catalog_writes(), 0);
}

// ===== Status =====

#[tokio::test]
async fn test_status_report_json() {
    let sandbox = Sandbox::new(3);
    sandbox.kill(2);
    let handle = admin(&sandbox).get_cluster(CLUSTER).await.unwrap();

    let status = handle.status().await.unwrap();
    let json = serde_json::to_value(&status).unwrap();

    assert_eq!(json["cluster"], CLUSTER);
    assert_eq!(json["classification"], "Healthy");
    assert_eq!(json["topology_mode"], "single-primary");
    assert_eq!(json["view_generation"], 1);
    assert_eq!(json["primary"], address(0).to_string());

    let members = json["members"].as_object().unwrap();
    let keys: Vec<&String> = members.keys().collect();
    assert_eq!(
        keys,
        vec![
            &address(0).to_string(),
            &address(1).to_string(),
            &address(2).to_string()
        ]
    );
    let primary = &members[&address(0).to_string()];
    assert_eq!(primary["role"], "PRIMARY");
    assert_eq!(primary["state"], "ONLINE");
    assert_eq!(primary["label"], "node-0");
    assert_eq!(primary["super_read_only"], false);
    let down = &members[&address(2).to_string()];
    assert_eq!(down["reachability"], "Unreachable");
    assert!(down["state"].is_null());
    assert!(down["error"].is_string());

    assert!(json["routers"][ROUTER].is_object());
}
