// tests/integration/reboot_test.rs

//! Integration tests for rebooting a cluster after a complete outage

use super::sandbox::{CLUSTER, PASSWORD, Sandbox, USER, address, server_uuid};
use super::test_helpers::{admin, admin_with_cancellation, credentials, fast_settings};
use groupwarden::core::admin::{ClusterAdmin, RebootOptions};
use groupwarden::core::errors::ClusterAdminError;
use groupwarden::core::instance::{Credentials, MemberState};
use groupwarden::core::metadata::{MemberRef, SchemaVersion};
use groupwarden::core::recovery::reboot::RebootStage;
use groupwarden::core::recovery::seed::SeedReason;
use groupwarden::core::recovery::{Classification, PlanAction};
use tokio_util::sync::CancellationToken;

fn assert_clean(sandbox: &Sandbox) {
    assert_eq!(sandbox.locks_held(), 0, "cluster lock left behind");
    assert_eq!(sandbox.open_sessions(), 0, "sessions left open");
}

// ===== End-to-end scenarios =====

#[tokio::test]
async fn test_full_outage_three_equal_members() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();

    let (handle, report) = admin(&sandbox)
        .reboot_with_report(CLUSTER, RebootOptions::default())
        .await
        .unwrap();

    let plan = &report.plan;
    assert!(plan.classification.allows_reboot());
    assert_eq!(plan.seed.address, address(0));
    assert_eq!(plan.seed.reason, SeedReason::MostAdvanced);
    let actions: Vec<(PlanAction, _)> = plan
        .plan
        .steps()
        .iter()
        .map(|s| (s.action, s.address.clone()))
        .collect();
    assert_eq!(
        actions,
        vec![
            (PlanAction::BootstrapGroup, address(0)),
            (PlanAction::RejoinMember, address(1)),
            (PlanAction::RejoinMember, address(2)),
        ]
    );
    assert_eq!(report.outcome.failed_count(), 0);
    assert!(!report.dry_run);

    assert!(sandbox.is_primary(0));
    assert_eq!(sandbox.group_of(0), vec![0, 1, 2]);
    for i in 0..3 {
        assert_eq!(sandbox.state(i), MemberState::Online);
    }
    assert_eq!(sandbox.bootstraps(), 1);
    assert!(!sandbox.bootstrap_flag(0), "bootstrap flag must be switched off");

    let status = handle.status().await.unwrap();
    assert_eq!(status.classification, Classification::Healthy);
    assert_eq!(status.primary, Some(address(0)));
    assert_eq!(handle.catalog().cluster().view_generation, 2);
    assert_clean(&sandbox);
}

#[tokio::test]
async fn test_full_outage_with_unreachable_member_requires_confirmation() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();
    sandbox.kill(2);
    let admin = admin(&sandbox);

    let err = admin
        .reboot_cluster_from_complete_outage(CLUSTER, RebootOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterAdminError::UnreachableMembers(_)));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(sandbox.bootstraps(), 0);
    assert_clean(&sandbox);

    let (handle, report) = admin
        .reboot_with_report(CLUSTER, RebootOptions::default().force(true))
        .await
        .unwrap();
    assert_eq!(report.plan.classification, Classification::FullOutage);
    assert_eq!(report.plan.seed.address, address(0));

    let step = report.plan.plan.step_for(&server_uuid(2)).unwrap();
    assert_eq!(step.action, PlanAction::NoOp);
    assert!(step.note.is_some());
    assert_eq!(report.plan.warnings.len(), 1);
    assert!(report.plan.warnings[0].contains(&address(2).to_string()));

    assert_eq!(sandbox.state(0), MemberState::Online);
    assert_eq!(sandbox.state(1), MemberState::Online);
    assert_eq!(sandbox.state(2), MemberState::Unreachable);

    // The missing member stays in the catalog, marked as such.
    let member = handle
        .catalog()
        .find_member(&MemberRef::Address(address(2)))
        .cloned()
        .unwrap();
    assert_eq!(member.last_known_state, Some(MemberState::Unreachable));
    let replicated = sandbox.cluster(1).unwrap();
    assert_eq!(replicated.members.len(), 3);
    assert_clean(&sandbox);
}

#[tokio::test]
async fn test_single_reachable_member_bootstraps_alone() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();
    sandbox.kill(1);
    sandbox.kill(2);

    let (_, report) = admin(&sandbox)
        .reboot_with_report(CLUSTER, RebootOptions::default().force(true))
        .await
        .unwrap();

    assert_eq!(report.plan.classification, Classification::FullOutage);
    assert_eq!(report.plan.seed.address, address(0));
    assert_eq!(report.plan.plan.count(PlanAction::BootstrapGroup), 1);
    assert_eq!(report.plan.plan.count(PlanAction::RejoinMember), 0);
    assert_eq!(report.plan.plan.count(PlanAction::NoOp), 2);
    assert_eq!(sandbox.group_of(0), vec![0]);
    assert_clean(&sandbox);
}

#[tokio::test]
async fn test_conflicting_lists_rejected_before_locking() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();

    let options = RebootOptions::default()
        .rejoin(address(1))
        .remove(server_uuid(1));
    let err = admin(&sandbox)
        .reboot_cluster_from_complete_outage(CLUSTER, options)
        .await
        .unwrap_err();

    assert!(matches!(err, ClusterAdminError::RejectConflictingLists(_)));
    assert!(sandbox.log().is_empty());
    assert_eq!(sandbox.catalog_writes(), 0);
    assert_clean(&sandbox);
}

#[tokio::test]
async fn test_unreachable_rejoin_target_rejected() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();
    sandbox.kill(2);

    let err = admin(&sandbox)
        .reboot_cluster_from_complete_outage(CLUSTER, RebootOptions::default().rejoin(address(2)))
        .await
        .unwrap_err();

    assert!(matches!(err, ClusterAdminError::RejectUnreachableRejoin(_)));
    assert!(err.to_string().contains(&address(2).to_string()));
    assert!(sandbox.log().is_empty());
    assert_clean(&sandbox);
}

#[tokio::test]
async fn test_divergent_histories_refused() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();
    sandbox.diverge(0, 2);
    sandbox.diverge(1, 1);

    let err = admin(&sandbox)
        .reboot_cluster_from_complete_outage(CLUSTER, RebootOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ClusterAdminError::DivergentHistories(_)));
    assert_eq!(sandbox.bootstraps(), 0);
    assert_clean(&sandbox);
}

// ===== Seed selection =====

#[tokio::test]
async fn test_most_advanced_member_becomes_seed() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();
    sandbox.advance(2, 3);

    let (_, report) = admin(&sandbox)
        .reboot_with_report(CLUSTER, RebootOptions::default())
        .await
        .unwrap();

    assert_eq!(report.plan.seed.address, address(2));
    assert!(sandbox.is_primary(2));
    assert_eq!(sandbox.group_of(2), vec![0, 1, 2]);
    // Members that caught up hold everything the seed had.
    assert!(report.plan.seed.gtid_executed.is_subset(&sandbox.gtid(0)));
    assert_clean(&sandbox);
}

#[tokio::test]
async fn test_lagging_primary_needs_force() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();
    sandbox.advance(2, 3);
    let admin = admin(&sandbox);

    let err = admin
        .reboot_cluster_from_complete_outage(
            CLUSTER,
            RebootOptions::default().with_primary(address(0)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterAdminError::DivergentHistories(_)));
    assert_eq!(sandbox.bootstraps(), 0);

    // Forcing it bootstraps from the lagging member; the ahead one cannot rejoin.
    let err = admin
        .reboot_cluster_from_complete_outage(
            CLUSTER,
            RebootOptions::default()
                .with_primary(address(0))
                .force(true),
        )
        .await
        .unwrap_err();
    match &err {
        ClusterAdminError::PartialPlan { failed, total, .. } => {
            assert_eq!(*failed, 1);
            assert_eq!(*total, 3);
        }
        other => panic!("expected PartialPlan, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 4);
    assert!(sandbox.is_primary(0));
    assert_eq!(sandbox.state(1), MemberState::Online);
    assert_ne!(sandbox.state(2), MemberState::Online);
    assert_clean(&sandbox);
}

#[tokio::test]
async fn test_explicit_primary_must_be_catalog_member() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();

    let err = admin(&sandbox)
        .plan_reboot(
            CLUSTER,
            &RebootOptions::default().with_primary(address(7)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterAdminError::NotAClusterMember(..)));
}

#[tokio::test]
async fn test_explicit_primary_chosen_when_it_dominates() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();

    let plan = admin(&sandbox)
        .plan_reboot(
            CLUSTER,
            &RebootOptions::default().with_primary(address(1)),
        )
        .await
        .unwrap();
    assert_eq!(plan.seed.address, address(1));
    assert_eq!(plan.seed.reason, SeedReason::OperatorChoice);
    assert_eq!(plan.plan.steps()[0].address, address(1));
}

// ===== Refusals =====

#[tokio::test]
async fn test_second_reboot_is_refused_without_changes() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();
    let admin = admin(&sandbox);
    admin
        .reboot_cluster_from_complete_outage(CLUSTER, RebootOptions::default())
        .await
        .unwrap();

    let writes = sandbox.catalog_writes();
    let log = sandbox.log();
    let err = admin
        .reboot_cluster_from_complete_outage(CLUSTER, RebootOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ClusterAdminError::UseForceQuorumOrNothing(_)));
    assert_eq!(sandbox.catalog_writes(), writes);
    assert_eq!(sandbox.log(), log);
    assert_clean(&sandbox);
}

#[tokio::test]
async fn test_healthy_cluster_is_not_rebooted() {
    let sandbox = Sandbox::new(3);

    let err = admin(&sandbox)
        .reboot_cluster_from_complete_outage(CLUSTER, RebootOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterAdminError::UseForceQuorumOrNothing(_)));
    assert_eq!(sandbox.catalog_writes(), 0);
}

#[tokio::test]
async fn test_lost_quorum_points_to_force_quorum() {
    let sandbox = Sandbox::new(3);
    sandbox.kill(1);
    sandbox.kill(2);

    let err = admin(&sandbox)
        .reboot_cluster_from_complete_outage(CLUSTER, RebootOptions::default().force(true))
        .await
        .unwrap_err();
    match err {
        ClusterAdminError::UseForceQuorumOrNothing(message) => {
            assert!(message.contains("force-quorum"));
        }
        other => panic!("expected UseForceQuorumOrNothing, got {other:?}"),
    }
    assert_eq!(sandbox.bootstraps(), 0);
}

#[tokio::test]
async fn test_foreign_group_is_not_managed() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();
    for i in 0..3 {
        sandbox.start_foreign_group(i);
    }

    let err = admin(&sandbox)
        .reboot_cluster_from_complete_outage(CLUSTER, RebootOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterAdminError::NotManaged(_)));
}

#[tokio::test]
async fn test_nothing_reachable_is_unavailable() {
    let sandbox = Sandbox::new(3);
    sandbox.kill_all();

    let err = admin(&sandbox)
        .reboot_cluster_from_complete_outage(CLUSTER, RebootOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterAdminError::Unavailable(_)));
}

#[tokio::test]
async fn test_incompatible_schema_refused() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();
    sandbox.set_schema_version(SchemaVersion::new(1, 0, 0));
    let admin = admin(&sandbox);

    let err = admin
        .reboot_cluster_from_complete_outage(CLUSTER, RebootOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterAdminError::SchemaTooOld { .. }));

    sandbox.set_schema_version(SchemaVersion::new(3, 0, 0));
    let err = admin
        .reboot_cluster_from_complete_outage(CLUSTER, RebootOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterAdminError::SchemaTooNew { .. }));
    assert_eq!(sandbox.bootstraps(), 0);
}

#[tokio::test]
async fn test_unknown_cluster() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();

    let err = admin(&sandbox)
        .reboot_cluster_from_complete_outage("staging", RebootOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterAdminError::ClusterNotFound(_)));
}

#[tokio::test]
async fn test_wrong_password_is_not_unreachability() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();
    let admin = ClusterAdmin::new(
        sandbox.connector(),
        Credentials::new(USER, "wrong"),
        fast_settings(),
        sandbox.addresses(),
    );

    let err = admin
        .reboot_cluster_from_complete_outage(CLUSTER, RebootOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterAdminError::NotAuthorized { .. }));

    // Per-call credentials take precedence over the configured ones.
    let options = RebootOptions {
        cluster_admin: Some(Credentials::new(USER, PASSWORD)),
        ..RebootOptions::default()
    };
    admin
        .reboot_cluster_from_complete_outage(CLUSTER, options)
        .await
        .unwrap();
    assert_eq!(sandbox.group_of(0).len(), 3);
}

// ===== Options =====

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();

    let (handle, report) = admin(&sandbox)
        .reboot_with_report(CLUSTER, RebootOptions::default().dry_run(true))
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.plan.plan.len(), 3);
    assert!(report.outcome.outcomes.is_empty());
    assert!(sandbox.log().is_empty());
    assert_eq!(sandbox.catalog_writes(), 0);
    assert_eq!(handle.catalog().cluster().view_generation, 1);
    assert_clean(&sandbox);
}

#[tokio::test]
async fn test_plan_reboot_reports_without_side_effects() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();
    sandbox.kill(2);

    let plan = admin(&sandbox)
        .plan_reboot(CLUSTER, &RebootOptions::default().force(true))
        .await
        .unwrap();
    assert_eq!(plan.cluster, CLUSTER);
    assert_eq!(plan.classification, Classification::FullOutage);
    assert_eq!(plan.probes.len(), 3);
    assert_eq!(plan.plan.len(), 3);
    assert!(sandbox.log().is_empty());
    assert_clean(&sandbox);
}

#[tokio::test]
async fn test_remove_list_drops_members_from_catalog() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();
    sandbox.kill(2);

    // Listing the unreachable member for removal is consent enough.
    let (handle, report) = admin(&sandbox)
        .reboot_with_report(CLUSTER, RebootOptions::default().remove(address(2)))
        .await
        .unwrap();

    assert_eq!(
        report.plan.plan.step_for(&server_uuid(2)).unwrap().action,
        PlanAction::RemoveMember
    );
    assert_eq!(handle.catalog().members().len(), 2);
    let replicated = sandbox.cluster(1).unwrap();
    assert!(replicated.member_by_uuid(&server_uuid(2)).is_none());
    assert_eq!(sandbox.group_of(0), vec![0, 1]);
    assert_clean(&sandbox);
}

#[tokio::test]
async fn test_rejoin_list_limits_rejoined_members() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();

    let (_, report) = admin(&sandbox)
        .reboot_with_report(CLUSTER, RebootOptions::default().rejoin(address(1)))
        .await
        .unwrap();

    let left_out = report.plan.plan.step_for(&server_uuid(2)).unwrap();
    assert_eq!(left_out.action, PlanAction::NoOp);
    assert_eq!(sandbox.group_of(0), vec![0, 1]);
    assert_eq!(sandbox.state(2), MemberState::Offline);
}

#[tokio::test]
async fn test_read_replicas_are_left_alone() {
    let sandbox = Sandbox::with_read_replicas(3, 1);
    sandbox.complete_outage();

    let (_, report) = admin(&sandbox)
        .reboot_with_report(CLUSTER, RebootOptions::default())
        .await
        .unwrap();

    assert_eq!(report.plan.plan.len(), 4);
    let replica = report.plan.plan.step_for(&server_uuid(3)).unwrap();
    assert_eq!(replica.action, PlanAction::NoOp);
    assert_eq!(sandbox.group_of(0), vec![0, 1, 2]);
    assert_eq!(sandbox.state(3), MemberState::Offline);
}

#[tokio::test]
async fn test_hanging_member_counts_as_unreachable() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();
    sandbox.freeze(2);

    let (_, report) = admin(&sandbox)
        .reboot_with_report(CLUSTER, RebootOptions::default().force(true))
        .await
        .unwrap();

    let step = report.plan.plan.step_for(&server_uuid(2)).unwrap();
    assert_eq!(step.action, PlanAction::NoOp);
    assert_eq!(sandbox.group_of(0), vec![0, 1]);
}

#[tokio::test]
async fn test_failed_rejoin_is_reported_and_lock_released() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();
    sandbox.fail_start(2, true);

    let err = admin(&sandbox)
        .reboot_cluster_from_complete_outage(CLUSTER, RebootOptions::default())
        .await
        .unwrap_err();

    match &err {
        ClusterAdminError::PartialPlan { failed, summary, .. } => {
            assert_eq!(*failed, 1);
            assert!(summary.contains(&address(2).to_string()));
        }
        other => panic!("expected PartialPlan, got {other:?}"),
    }
    assert_eq!(sandbox.group_of(0), vec![0, 1]);
    assert_clean(&sandbox);
}

#[tokio::test]
async fn test_failed_bootstrap_aborts_plan() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();
    sandbox.fail_start(0, true);

    let err = admin(&sandbox)
        .reboot_cluster_from_complete_outage(
            CLUSTER,
            RebootOptions::default().with_primary(address(0)),
        )
        .await
        .unwrap_err();

    match &err {
        ClusterAdminError::Instance { address: from, message } => {
            assert_eq!(from, &address(0).to_string());
            assert!(message.contains("START GROUP_REPLICATION"));
        }
        other => panic!("expected the bootstrap error, got {other:?}"),
    }
    assert_ne!(err.exit_code(), 4);
    assert_eq!(sandbox.bootstraps(), 0);
    assert!(
        !sandbox.log().iter().any(|e| e.starts_with("join")),
        "no member may be rejoined without a bootstrapped group"
    );
    assert_eq!(sandbox.state(1), MemberState::Offline);
    assert_eq!(sandbox.state(2), MemberState::Offline);
    assert_eq!(sandbox.catalog_writes(), 0);
    assert_clean(&sandbox);
}

#[tokio::test]
async fn test_handle_debug_omits_credentials() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();

    let handle = admin(&sandbox)
        .reboot_cluster_from_complete_outage(CLUSTER, RebootOptions::default())
        .await
        .unwrap();
    let shown = format!("{handle:?}");
    assert!(shown.starts_with("ClusterHandle"));
    assert!(shown.contains(CLUSTER));
    assert!(!shown.contains(PASSWORD));
    assert_clean(&sandbox);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();
    let token = CancellationToken::new();
    token.cancel();

    let err = admin_with_cancellation(&sandbox, token)
        .reboot_cluster_from_complete_outage(CLUSTER, RebootOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, ClusterAdminError::Cancelled);
    assert_eq!(err.exit_code(), 130);
    assert!(sandbox.log().is_empty());
    assert_clean(&sandbox);
}

#[tokio::test]
async fn test_zero_timeout_override_rejected() {
    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();
    let options = RebootOptions {
        connect_timeout: Some(std::time::Duration::ZERO),
        ..RebootOptions::default()
    };

    let err = admin(&sandbox)
        .reboot_cluster_from_complete_outage(CLUSTER, options)
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterAdminError::InvalidOptions(_)));
}

#[tokio::test]
async fn test_orchestrator_stages() {
    use groupwarden::core::metadata::MembershipCatalog;
    use groupwarden::core::recovery::RecoveryContext;
    use groupwarden::core::recovery::reboot::RebootOrchestrator;

    let sandbox = Sandbox::new(3);
    sandbox.complete_outage();
    let ctx = RecoveryContext::new(sandbox.connector(), credentials(), fast_settings());
    let catalog = MembershipCatalog::load(&ctx, CLUSTER, &sandbox.addresses())
        .await
        .unwrap();
    let options = RebootOptions::default();

    let mut orchestrator = RebootOrchestrator::new(&ctx, catalog, &options);
    assert_eq!(orchestrator.stage(), RebootStage::Start);
    orchestrator.plan().await.unwrap();
    assert_eq!(orchestrator.stage(), RebootStage::Plan);
    assert!(sandbox.log().is_empty());
}
