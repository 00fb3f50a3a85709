// tests/integration/catalog_test.rs

//! Integration tests for reading and writing the membership catalog

use super::sandbox::{CLUSTER, ROUTER, Sandbox, address, cluster_id, server_uuid};
use super::test_helpers::{admin, context, load_catalog};
use groupwarden::core::admin::RemoveOptions;
use groupwarden::core::errors::ClusterAdminError;
use groupwarden::core::instance::{Address, MemberState};
use groupwarden::core::metadata::{
    MemberDescriptor, MemberRef, MemberRole, MembershipCatalog, RouterDescriptor, SCHEMA_CURRENT,
    SchemaVersion,
};
use groupwarden::core::recovery::ClusterLockManager;
use uuid::Uuid;

fn router(name: &str) -> RouterDescriptor {
    RouterDescriptor {
        name: name.to_string(),
        address: Address::new("127.0.0.1", 6450),
        cluster_id: cluster_id(),
        version: None,
        last_check_in: None,
    }
}

// ===== Loading =====

#[tokio::test]
async fn test_freshest_copy_wins() {
    let sandbox = Sandbox::new(3);
    // Member 2 leaves first, so its copy misses the removal below.
    sandbox.stop_group(2);
    let mut handle = admin(&sandbox).get_cluster(CLUSTER).await.unwrap();
    handle
        .remove_instance(&MemberRef::Address(address(2)), RemoveOptions::default())
        .await
        .unwrap();
    let ctx = context(&sandbox);

    let stale = MembershipCatalog::load(&ctx, CLUSTER, &[address(2)])
        .await
        .unwrap();
    assert_eq!(stale.cluster().view_generation, 1);
    assert_eq!(stale.members().len(), 3);

    let fresh = MembershipCatalog::load(&ctx, CLUSTER, &[address(2), address(1)])
        .await
        .unwrap();
    assert_eq!(fresh.cluster().view_generation, 2);
    assert_eq!(fresh.members().len(), 2);
    assert_eq!(fresh.source(), &address(1));
}

#[tokio::test]
async fn test_load_errors() {
    let sandbox = Sandbox::new(3);
    let ctx = context(&sandbox);

    let err = MembershipCatalog::load(&ctx, CLUSTER, &[]).await.unwrap_err();
    assert!(matches!(err, ClusterAdminError::InvalidOptions(_)));

    let err = MembershipCatalog::load(&ctx, "staging", &sandbox.addresses())
        .await
        .unwrap_err();
    assert_eq!(err, ClusterAdminError::ClusterNotFound("staging".to_string()));

    let err = MembershipCatalog::load(&ctx, CLUSTER, &[address(8)])
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterAdminError::Unavailable(_)));

    // A running group without any catalog is not ours to manage.
    sandbox.drop_all_catalogs();
    let err = MembershipCatalog::load(&ctx, CLUSTER, &sandbox.addresses())
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterAdminError::NotManaged(_)));
}

#[tokio::test]
async fn test_load_skips_members_without_catalog() {
    let sandbox = Sandbox::new(3);
    sandbox.drop_catalog(0);
    sandbox.kill(1);

    let catalog = load_catalog(&sandbox).await;
    assert_eq!(catalog.source(), &address(2));
    assert_eq!(catalog.cluster_id(), cluster_id());
}

#[tokio::test]
async fn test_schema_gating() {
    let sandbox = Sandbox::new(1);
    let snapshot = sandbox.catalog(0).unwrap();

    let mut old = snapshot.clone();
    old.schema_version = SchemaVersion::new(1, 9, 0);
    let err = MembershipCatalog::from_snapshot(old, CLUSTER, address(0)).unwrap_err();
    assert!(matches!(err, ClusterAdminError::SchemaTooOld { .. }));

    let mut new = snapshot.clone();
    new.schema_version = SchemaVersion::new(3, 0, 0);
    let err = MembershipCatalog::from_snapshot(new, CLUSTER, address(0)).unwrap_err();
    assert!(matches!(err, ClusterAdminError::SchemaTooNew { .. }));

    let catalog = MembershipCatalog::from_snapshot(snapshot, CLUSTER, address(0)).unwrap();
    assert_eq!(catalog.schema_version(), SCHEMA_CURRENT);
}

// ===== Lookups =====

#[tokio::test]
async fn test_lookups() {
    let sandbox = Sandbox::new(3);
    let catalog = load_catalog(&sandbox).await;

    let by_address = catalog
        .find_member(&MemberRef::Address(address(1)))
        .unwrap();
    let by_uuid = catalog
        .find_member(&MemberRef::Uuid(server_uuid(1)))
        .unwrap();
    assert_eq!(by_address, by_uuid);
    assert_eq!(by_address.role, MemberRole::Secondary);

    let err = catalog
        .require_member(&MemberRef::Address(address(9)))
        .unwrap_err();
    assert!(matches!(err, ClusterAdminError::NotAClusterMember(..)));

    let primary = catalog.get_primary(&cluster_id()).unwrap().unwrap();
    assert_eq!(primary.server_uuid, server_uuid(0));
    assert_eq!(catalog.list_members(&cluster_id()).unwrap().len(), 3);
    assert!(matches!(
        catalog.list_members(&Uuid::nil()),
        Err(ClusterAdminError::ClusterNotFound(_))
    ));

    let routers = catalog.list_routers(&cluster_id());
    assert_eq!(routers.len(), 1);
    assert_eq!(routers[0].name, ROUTER);
    assert!(catalog.list_routers(&Uuid::nil()).is_empty());
}

// ===== Writes =====

#[tokio::test]
async fn test_writes_replicate_through_lease() {
    let sandbox = Sandbox::new(3);
    let ctx = context(&sandbox);
    let mut catalog = load_catalog(&sandbox).await;
    let mut lease = ClusterLockManager::new(&ctx)
        .acquire(cluster_id(), &address(0))
        .await
        .unwrap();

    catalog
        .add_router(&ctx, &mut lease, router("router-2"))
        .await
        .unwrap();
    catalog
        .record_state(&ctx, &mut lease, server_uuid(2), MemberState::Unreachable)
        .await
        .unwrap();
    catalog.remove_router(&ctx, &mut lease, ROUTER).await.unwrap();

    // Rejected locally, never sent.
    let err = catalog
        .remove_router(&ctx, &mut lease, "router-9")
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterAdminError::InvalidState(_)));
    lease.release().await.unwrap();

    assert_eq!(sandbox.catalog_writes(), 3);
    let replicated = sandbox.catalog(2).unwrap();
    assert_eq!(&replicated, catalog.snapshot());
    assert_eq!(replicated.routers.len(), 1);
    assert_eq!(replicated.routers[0].name, "router-2");
    assert_eq!(
        sandbox
            .cluster(1)
            .unwrap()
            .member_by_uuid(&server_uuid(2))
            .unwrap()
            .last_known_state,
        Some(MemberState::Unreachable)
    );
}

#[tokio::test]
async fn test_write_through_secondary_fails() {
    let sandbox = Sandbox::new(3);
    let ctx = context(&sandbox);
    let mut catalog = load_catalog(&sandbox).await;
    let before = catalog.snapshot().clone();
    let mut lease = ClusterLockManager::new(&ctx)
        .acquire(cluster_id(), &address(1))
        .await
        .unwrap();

    let err = catalog
        .record_state(&ctx, &mut lease, server_uuid(2), MemberState::Offline)
        .await
        .unwrap_err();
    lease.release().await.unwrap();

    assert!(matches!(err, ClusterAdminError::Instance { .. }));
    assert_eq!(catalog.snapshot(), &before);
    assert_eq!(sandbox.catalog_writes(), 0);
}

#[tokio::test]
async fn test_invalid_changes_rejected() {
    let sandbox = Sandbox::new(3);
    let ctx = context(&sandbox);
    let mut catalog = load_catalog(&sandbox).await;
    let mut lease = ClusterLockManager::new(&ctx)
        .acquire(cluster_id(), &address(0))
        .await
        .unwrap();

    let duplicate = MemberDescriptor::new(server_uuid(1), address(1), MemberRole::Secondary);
    let err = catalog
        .add_member(&ctx, &mut lease, duplicate)
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterAdminError::InvalidState(_)));

    let taken_address = MemberDescriptor::new(Uuid::new_v4(), address(2), MemberRole::Secondary);
    let err = catalog
        .add_member(&ctx, &mut lease, taken_address)
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterAdminError::InvalidState(_)));

    let err = catalog
        .remove_member(&ctx, &mut lease, &MemberRef::Uuid(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterAdminError::NotAClusterMember(..)));
    lease.release().await.unwrap();

    assert_eq!(sandbox.catalog_writes(), 0);
}

#[tokio::test]
async fn test_add_member_then_remove() {
    let sandbox = Sandbox::new(3);
    let ctx = context(&sandbox);
    let mut catalog = load_catalog(&sandbox).await;
    let mut lease = ClusterLockManager::new(&ctx)
        .acquire(cluster_id(), &address(0))
        .await
        .unwrap();

    let member = MemberDescriptor::new(server_uuid(5), address(5), MemberRole::ReadReplica);
    catalog.add_member(&ctx, &mut lease, member).await.unwrap();
    assert_eq!(catalog.members().len(), 4);

    let removed = catalog
        .remove_member(&ctx, &mut lease, &MemberRef::Address(address(5)))
        .await
        .unwrap();
    lease.release().await.unwrap();

    assert_eq!(removed.server_uuid, server_uuid(5));
    assert_eq!(catalog.members().len(), 3);
    assert_eq!(sandbox.catalog_writes(), 2);
}

#[tokio::test]
async fn test_lease_for_other_cluster_rejected() {
    let sandbox = Sandbox::new(3);
    let ctx = context(&sandbox);
    let mut catalog = load_catalog(&sandbox).await;
    let mut lease = ClusterLockManager::new(&ctx)
        .acquire(Uuid::new_v4(), &address(0))
        .await
        .unwrap();

    let err = catalog
        .bump_generation(&ctx, &mut lease)
        .await
        .unwrap_err();
    lease.release().await.unwrap();

    assert!(matches!(err, ClusterAdminError::InvalidState(_)));
    assert_eq!(catalog.cluster().view_generation, 1);
    assert_eq!(sandbox.catalog_writes(), 0);
}
