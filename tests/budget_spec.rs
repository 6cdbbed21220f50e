use speculate2::speculate;
use uuid::Uuid;
use warden::budget::BudgetController;
use warden::config::WardenConfig;
use warden::db::Database;
use warden::models::{AdmissionDecision, BudgetEntry, BudgetStatus, ProjectBudget, UnitPricing};

fn ten_dollar_config() -> WardenConfig {
    WardenConfig {
        default_daily_limit_usd: 10.0,
        default_alert_threshold: 0.8,
        ..WardenConfig::default()
    }
}

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
        let controller = BudgetController::new(db.clone(), &ten_dollar_config());
        let project = Uuid::new_v4();
    }

    describe "check_daily" {
        it "reports Ok with zero spend" {
            match controller.check_daily(project).unwrap() {
                BudgetStatus::Ok { spent, limit } => {
                    assert_eq!(spent, 0.0);
                    assert_eq!(limit, 10.0);
                }
                other => panic!("Expected Ok, got {:?}", other),
            }
        }

        it "moves from Ok to Warning to Exceeded as spend grows" {
            controller.record_usage(BudgetEntry::new(project, 3.5)).unwrap();
            assert!(matches!(
                controller.check_daily(project).unwrap(),
                BudgetStatus::Ok { .. }
            ));

            controller.record_usage(BudgetEntry::new(project, 5.0)).unwrap();
            match controller.check_daily(project).unwrap() {
                BudgetStatus::Warning { spent, limit, threshold } => {
                    assert!((spent - 8.5).abs() < 1e-9);
                    assert_eq!(limit, 10.0);
                    assert_eq!(threshold, 0.8);
                }
                other => panic!("Expected Warning, got {:?}", other),
            }

            controller.record_usage(BudgetEntry::new(project, 2.0)).unwrap();
            assert!(matches!(
                controller.check_daily(project).unwrap(),
                BudgetStatus::Exceeded { .. }
            ));
        }

        it "reports Exceeded once three 3.50 entries pass a 10.00 limit" {
            for _ in 0..3 {
                controller.record_usage(BudgetEntry::new(project, 3.5)).unwrap();
            }

            match controller.check_daily(project).unwrap() {
                BudgetStatus::Exceeded { spent, limit } => {
                    assert!((spent - 10.5).abs() < 1e-9);
                    assert_eq!(limit, 10.0);
                }
                other => panic!("Expected Exceeded, got {:?}", other),
            }
        }
    }

    describe "estimate_and_check" {
        it "allows work that fits under the limit" {
            let pricing = UnitPricing::new(0.001);

            match controller.estimate_and_check(project, 2_000, &pricing).unwrap() {
                AdmissionDecision::Allowed { estimated_cost } => {
                    assert!((estimated_cost - 2.0).abs() < 1e-9);
                }
                other => panic!("Expected Allowed, got {:?}", other),
            }
        }

        it "reports WouldExceed when the estimate crosses the limit" {
            controller.record_usage(BudgetEntry::new(project, 9.0)).unwrap();
            let pricing = UnitPricing::new(0.001);

            match controller.estimate_and_check(project, 2_000, &pricing).unwrap() {
                AdmissionDecision::WouldExceed { current, estimated, limit } => {
                    assert!((current - 9.0).abs() < 1e-9);
                    assert!((estimated - 2.0).abs() < 1e-9);
                    assert_eq!(limit, 10.0);
                }
                other => panic!("Expected WouldExceed, got {:?}", other),
            }
        }

        it "blocks outright once the limit is already crossed" {
            controller.record_usage(BudgetEntry::new(project, 10.5)).unwrap();

            match controller.estimate_and_check(project, 1, &UnitPricing::new(0.001)).unwrap() {
                AdmissionDecision::Blocked { reason } => {
                    assert!(reason.contains("daily budget exceeded"));
                }
                other => panic!("Expected Blocked, got {:?}", other),
            }
        }

        it "prices per-million-token models correctly" {
            let pricing = UnitPricing::per_million_tokens(15.0);

            match controller.estimate_and_check(project, 200_000, &pricing).unwrap() {
                AdmissionDecision::Allowed { estimated_cost } => {
                    assert!((estimated_cost - 3.0).abs() < 1e-9);
                }
                other => panic!("Expected Allowed, got {:?}", other),
            }
        }
    }

    describe "project_budget" {
        it "falls back to the configured defaults" {
            let budget = controller.project_budget(project).unwrap();
            assert_eq!(budget.daily_limit_usd, 10.0);
            assert_eq!(budget.alert_threshold, 0.8);
        }

        it "honors a per-project override" {
            controller.set_project_budget(&ProjectBudget {
                project_id: project,
                daily_limit_usd: 2.0,
                alert_threshold: 0.5,
            }).unwrap();

            controller.record_usage(BudgetEntry::new(project, 1.5)).unwrap();

            // 1.5 of 2.0 is past the 0.5 threshold but under the limit.
            match controller.check_daily(project).unwrap() {
                BudgetStatus::Warning { spent, limit, .. } => {
                    assert!((spent - 1.5).abs() < 1e-9);
                    assert_eq!(limit, 2.0);
                }
                other => panic!("Expected Warning, got {:?}", other),
            }
        }

        it "does not leak spend across projects" {
            let other_project = Uuid::new_v4();
            controller.record_usage(BudgetEntry::new(other_project, 50.0)).unwrap();

            assert!(matches!(
                controller.check_daily(project).unwrap(),
                BudgetStatus::Ok { .. }
            ));
        }
    }
}
