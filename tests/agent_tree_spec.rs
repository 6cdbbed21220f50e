use speculate2::speculate;
use uuid::Uuid;
use warden::agents::AgentTree;
use warden::db::Database;
use warden::error::Error;
use warden::models::{AgentStatus, AgentType};

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
        let tree = AgentTree::new(db.clone());
        let project = Uuid::new_v4();
    }

    describe "spawn_orchestrator" {
        it "creates a pending root agent" {
            let root = tree.spawn_orchestrator(project).unwrap();

            assert!(root.is_root());
            assert_eq!(root.agent_type, AgentType::Orchestrator);
            assert_eq!(root.status, AgentStatus::Pending);
            assert_eq!(root.project_id, project);
        }
    }

    describe "spawn_child" {
        it "inherits the parent's project" {
            let root = tree.spawn_orchestrator(project).unwrap();

            let coder = tree.spawn_child(root.id, AgentType::Coder, None).unwrap();

            assert_eq!(coder.parent_id, Some(root.id));
            assert_eq!(coder.project_id, project);
        }

        it "binds a worker to a feature when given one" {
            let root = tree.spawn_orchestrator(project).unwrap();
            let feature = Uuid::new_v4();

            let coder = tree.spawn_child(root.id, AgentType::Coder, Some(feature)).unwrap();
            assert_eq!(coder.feature_id, Some(feature));
        }

        it "rejects an orchestrator below the root" {
            let root = tree.spawn_orchestrator(project).unwrap();

            let result = tree.spawn_child(root.id, AgentType::Orchestrator, None);
            assert!(matches!(result, Err(Error::InvalidInput(_))));
        }

        it "rejects a missing parent" {
            let result = tree.spawn_child(Uuid::new_v4(), AgentType::Planner, None);
            assert!(matches!(result, Err(Error::AgentNotFound(_))));
        }

        it "rejects spawning under a finished parent" {
            let root = tree.spawn_orchestrator(project).unwrap();
            tree.mark_running(root.id).unwrap();
            tree.mark_finished(root.id, true).unwrap();

            let result = tree.spawn_child(root.id, AgentType::Reviewer, None);
            assert!(matches!(result, Err(Error::InvalidInput(_))));
        }
    }

    describe "status_transitions" {
        it "runs pending to running to success" {
            let root = tree.spawn_orchestrator(project).unwrap();

            let running = tree.mark_running(root.id).unwrap();
            assert_eq!(running.status, AgentStatus::Running);

            let finished = tree.mark_finished(root.id, true).unwrap();
            assert_eq!(finished.status, AgentStatus::Success);
        }

        it "records failure" {
            let root = tree.spawn_orchestrator(project).unwrap();
            tree.mark_running(root.id).unwrap();

            let finished = tree.mark_finished(root.id, false).unwrap();
            assert_eq!(finished.status, AgentStatus::Failed);
        }

        it "rejects finishing an agent that never ran" {
            let root = tree.spawn_orchestrator(project).unwrap();

            let result = tree.mark_finished(root.id, true);
            assert!(matches!(result, Err(Error::InvalidInput(_))));
        }

        it "rejects re-running a finished agent" {
            let root = tree.spawn_orchestrator(project).unwrap();
            tree.mark_running(root.id).unwrap();
            tree.mark_finished(root.id, true).unwrap();

            let result = tree.mark_running(root.id);
            assert!(matches!(result, Err(Error::InvalidInput(_))));
        }
    }

    describe "cancel" {
        it "cancels the whole subtree but spares finished work" {
            let root = tree.spawn_orchestrator(project).unwrap();
            let planner = tree.spawn_child(root.id, AgentType::Planner, None).unwrap();
            let coder = tree.spawn_child(planner.id, AgentType::Coder, None).unwrap();
            let done = tree.spawn_child(planner.id, AgentType::Tester, None).unwrap();
            tree.mark_running(done.id).unwrap();
            tree.mark_finished(done.id, true).unwrap();

            let cancelled = tree.cancel(root.id).unwrap();
            assert_eq!(cancelled, 3);

            assert_eq!(tree.get(root.id).unwrap().status, AgentStatus::Cancelled);
            assert_eq!(tree.get(planner.id).unwrap().status, AgentStatus::Cancelled);
            assert_eq!(tree.get(coder.id).unwrap().status, AgentStatus::Cancelled);
            assert_eq!(tree.get(done.id).unwrap().status, AgentStatus::Success);
        }
    }

    describe "queries" {
        it "lists direct children in spawn order" {
            let root = tree.spawn_orchestrator(project).unwrap();
            let planner = tree.spawn_child(root.id, AgentType::Planner, None).unwrap();
            let reviewer = tree.spawn_child(root.id, AgentType::Reviewer, None).unwrap();
            tree.spawn_child(planner.id, AgentType::Coder, None).unwrap();

            let children = tree.children(root.id).unwrap();
            assert_eq!(children.len(), 2);
            assert_eq!(children[0].id, planner.id);
            assert_eq!(children[1].id, reviewer.id);
        }

        it "associates agents with their project" {
            let root = tree.spawn_orchestrator(project).unwrap();
            tree.spawn_child(root.id, AgentType::Coder, None).unwrap();
            tree.spawn_orchestrator(Uuid::new_v4()).unwrap();

            let agents = tree.agents_for_project(project).unwrap();
            assert_eq!(agents.len(), 2);
        }

        it "survives a restart by reloading from storage" {
            let root = tree.spawn_orchestrator(project).unwrap();
            let coder = tree.spawn_child(root.id, AgentType::Coder, None).unwrap();

            let reloaded_tree = AgentTree::new(db.clone());
            let reloaded = reloaded_tree.get(coder.id).unwrap();
            assert_eq!(reloaded.parent_id, Some(root.id));
        }
    }
}
