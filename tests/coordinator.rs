use std::time::Duration;

use tokio_test::assert_ok;
use uuid::Uuid;
use warden::error::Error;
use warden::models::{BudgetEntry, ProjectBudget, ResourceKey, UnitPricing};
use warden::{Coordinator, PaidOutcome, WardenConfig};

fn open_coordinator() -> Coordinator {
    Coordinator::open_memory(WardenConfig::default()).expect("Failed to open coordinator")
}

#[tokio::test]
async fn run_guarded_releases_after_the_work_completes() {
    let coordinator = open_coordinator();
    let key = ResourceKey::file(Uuid::new_v4(), "src/a.ts");
    let agent = Uuid::new_v4();

    let value = coordinator
        .run_guarded(agent, &key, Duration::from_millis(100), |lease| async move {
            assert_eq!(lease.agent_id, agent);
            Ok(42)
        })
        .await
        .unwrap();
    assert_eq!(value, 42);

    // The key is free again.
    let lease = coordinator
        .locks()
        .acquire(Uuid::new_v4(), &key, Duration::from_millis(50))
        .await;
    assert_ok!(lease);
}

#[tokio::test]
async fn run_guarded_releases_on_the_error_path() {
    let coordinator = open_coordinator();
    let key = ResourceKey::file(Uuid::new_v4(), "src/a.ts");

    let result: Result<(), _> = coordinator
        .run_guarded(
            Uuid::new_v4(),
            &key,
            Duration::from_millis(100),
            |_lease| async move { Err(Error::InvalidInput("work went sideways".to_string())) },
        )
        .await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));

    // A failed unit of work must not leak its lease.
    let lease = coordinator
        .locks()
        .acquire(Uuid::new_v4(), &key, Duration::from_millis(50))
        .await;
    assert_ok!(lease);
}

#[tokio::test]
async fn paid_call_records_the_realized_cost() {
    let coordinator = open_coordinator();
    let project = Uuid::new_v4();
    let pricing = UnitPricing::new(0.001);

    let outcome = coordinator
        .paid_call(project, 1_000, &pricing, || async move {
            // The realized cost may differ from the 1.00 estimate.
            Ok(("summary".to_string(), 1.25))
        })
        .await
        .unwrap();

    match outcome {
        PaidOutcome::Completed { value, cost_usd } => {
            assert_eq!(value, "summary");
            assert_eq!(cost_usd, 1.25);
        }
        PaidOutcome::Denied(decision) => panic!("Expected completion, got {:?}", decision),
    }

    // The ledger saw the spend.
    match coordinator.budget().check_daily(project).unwrap() {
        warden::models::BudgetStatus::Ok { spent, .. } => assert!((spent - 1.25).abs() < 1e-9),
        other => panic!("Expected Ok status, got {:?}", other),
    }
}

#[tokio::test]
async fn paid_call_never_runs_denied_work() {
    let coordinator = open_coordinator();
    let project = Uuid::new_v4();

    coordinator
        .budget()
        .set_project_budget(&ProjectBudget {
            project_id: project,
            daily_limit_usd: 1.0,
            alert_threshold: 0.8,
        })
        .unwrap();
    coordinator
        .budget()
        .record_usage(BudgetEntry::new(project, 1.5))
        .unwrap();

    let outcome: PaidOutcome<()> = coordinator
        .paid_call(project, 1, &UnitPricing::new(0.001), || async move {
            panic!("denied work must not run");
        })
        .await
        .unwrap();

    assert!(!outcome.is_completed());
}

#[tokio::test]
async fn components_share_one_database() {
    let coordinator = open_coordinator();
    let project = Uuid::new_v4();

    let session = coordinator.sessions().create_session().unwrap();
    coordinator.sessions().switch_project(session.id, project).unwrap();

    let root = coordinator.agents().spawn_orchestrator(project).unwrap();
    let agents = coordinator.agents().agents_for_project(project).unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].id, root.id);

    let recovered = coordinator.sessions().recover(session.id).unwrap();
    assert_eq!(recovered.current_project_id, Some(project));
}
