use directive_engine::db::Database;
use directive_engine::models::*;
use speculate2::speculate;
use uuid::Uuid;

fn create_directive(db: &Database, key: &str, declared_type: &str) -> Directive {
    db.create_directive(&CreateDirectiveInput {
        key: key.to_string(),
        title: format!("Directive {}", key),
        declared_type: declared_type.to_string(),
        priority: None,
        parent_id: None,
    })
    .expect("Failed to create directive")
}

fn new_child(key: &str, depends_on: Option<Uuid>) -> NewChild {
    NewChild {
        id: Uuid::new_v4(),
        key: key.to_string(),
        title: format!("Child {}", key),
        declared_type: "feature".to_string(),
        priority: Priority::Medium,
        depends_on,
    }
}

fn usage(is_fallback: bool) -> ProfileUsage<'static> {
    ProfileUsage {
        quick_fix_prefix: "QF-",
        quick_fix_type: "quick_fix",
        is_fallback,
    }
}

fn profile_input(sd_type: &str) -> CreateProfileInput {
    CreateProfileInput {
        sd_type: sd_type.to_string(),
        lead_weight: 25,
        plan_weight: 25,
        exec_weight: 25,
        verify_weight: 15,
        final_weight: 10,
        requires_prd: true,
        requires_deliverables: true,
        requires_e2e_tests: false,
        requires_sub_agents: false,
        requires_retrospective: false,
        min_handoffs: 1,
    }
}

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
    }

    describe "open" {
        it "creates the database file and its directory" {
            let dir = tempfile::tempdir().expect("Failed to create temp dir");
            let path = dir.path().join("nested").join("engine.db");

            let file_db = Database::open(path.clone()).expect("Failed to open database");
            file_db.migrate().expect("Failed to migrate");

            assert!(path.exists());
            assert!(file_db.get_profile("feature").expect("Query failed").is_some());
        }
    }

    describe "directives" {
        it "creates a standalone directive in draft" {
            let directive = create_directive(&db, "SD-AUTH-001", "security");

            assert_eq!(directive.status, DirectiveStatus::Draft);
            assert_eq!(directive.relationship_type, RelationshipType::Standalone);
            assert_eq!(directive.priority, Priority::Medium);
            assert_eq!(directive.progress_cache, 0);

            let found = db
                .get_directive(directive.id)
                .expect("Query failed")
                .expect("Directive not found");
            assert_eq!(found.key, "SD-AUTH-001");
            assert_eq!(found.declared_type, "security");
        }

        it "looks directives up by key" {
            let directive = create_directive(&db, "SD-KEY-001", "feature");

            let found = db.get_directive_by_key("SD-KEY-001").expect("Query failed");
            assert_eq!(found.map(|d| d.id), Some(directive.id));
            assert!(db.get_directive_by_key("SD-NOPE").expect("Query failed").is_none());
        }

        it "rejects duplicate keys" {
            create_directive(&db, "SD-DUP-001", "feature");

            let result = db.create_directive(&CreateDirectiveInput {
                key: "SD-DUP-001".to_string(),
                title: "Again".to_string(),
                declared_type: "feature".to_string(),
                priority: None,
                parent_id: None,
            });
            assert!(result.is_err());
        }

        it "lists only top-level directives" {
            let parent = create_directive(&db, "SD-B-PARENT", "orchestrator");
            create_directive(&db, "SD-A-OTHER", "feature");
            db.append_children(parent.id, &[new_child("SD-B-1", None)])
                .expect("Append failed");

            let keys: Vec<String> = db
                .list_directives()
                .expect("Query failed")
                .into_iter()
                .map(|d| d.key)
                .collect();
            assert_eq!(keys, vec!["SD-A-OTHER", "SD-B-PARENT"]);
        }
    }

    describe "append_children" {
        it "inserts a chain and promotes the parent" {
            let parent = create_directive(&db, "SD-P-001", "orchestrator");
            let first = new_child("SD-P-001-A", None);
            let second = new_child("SD-P-001-B", Some(first.id));

            let appended = db
                .append_children(parent.id, &[first.clone(), second.clone()])
                .expect("Append failed");
            assert!(appended);

            let children = db.get_children(parent.id).expect("Query failed");
            assert_eq!(children.len(), 2);
            assert!(children.iter().all(|c| c.relationship_type == RelationshipType::Child));
            assert!(children.iter().all(|c| c.status == DirectiveStatus::Draft));

            let parent = db.get_directive(parent.id).expect("Query failed").unwrap();
            assert_eq!(parent.relationship_type, RelationshipType::Parent);
        }

        it "refuses a second head" {
            let parent = create_directive(&db, "SD-P-002", "orchestrator");
            db.append_children(parent.id, &[new_child("SD-P-002-A", None)])
                .expect("Append failed");

            let appended = db
                .append_children(parent.id, &[new_child("SD-P-002-B", None)])
                .expect("Append failed");
            assert!(!appended);
            assert_eq!(db.get_children(parent.id).expect("Query failed").len(), 1);
        }

        it "refuses to fork an existing predecessor and writes nothing" {
            let parent = create_directive(&db, "SD-P-003", "orchestrator");
            let first = new_child("SD-P-003-A", None);
            let second = new_child("SD-P-003-B", Some(first.id));
            db.append_children(parent.id, &[first.clone(), second])
                .expect("Append failed");

            let tail_ok = new_child("SD-P-003-C", None);
            let fork = new_child("SD-P-003-D", Some(first.id));
            let appended = db
                .append_children(parent.id, &[fork, tail_ok])
                .expect("Append failed");

            assert!(!appended);
            assert_eq!(db.get_children(parent.id).expect("Query failed").len(), 2);
        }

        it "refuses children under a completed parent" {
            let parent = create_directive(&db, "SD-P-004", "orchestrator");
            for (expected, target) in [
                (DirectiveStatus::Draft, DirectiveStatus::Active),
                (DirectiveStatus::Active, DirectiveStatus::Completed),
            ] {
                assert!(db
                    .compare_and_set_status(&StatusUpdate {
                        id: parent.id,
                        expected,
                        target,
                        require_children_complete: false,
                    })
                    .expect("Update failed"));
            }

            let appended = db
                .append_children(parent.id, &[new_child("SD-P-004-A", None)])
                .expect("Append failed");
            assert!(!appended);
        }
    }

    describe "compare_and_set_status" {
        it "applies when the expected status matches" {
            let directive = create_directive(&db, "SD-CAS-001", "feature");

            let applied = db
                .compare_and_set_status(&StatusUpdate {
                    id: directive.id,
                    expected: DirectiveStatus::Draft,
                    target: DirectiveStatus::Active,
                    require_children_complete: false,
                })
                .expect("Update failed");

            assert!(applied);
            let updated = db.get_directive(directive.id).expect("Query failed").unwrap();
            assert_eq!(updated.status, DirectiveStatus::Active);
            assert!(updated.completed_at.is_none());
        }

        it "does nothing when the expected status is stale" {
            let directive = create_directive(&db, "SD-CAS-002", "feature");

            let applied = db
                .compare_and_set_status(&StatusUpdate {
                    id: directive.id,
                    expected: DirectiveStatus::Active,
                    target: DirectiveStatus::Review,
                    require_children_complete: false,
                })
                .expect("Update failed");

            assert!(!applied);
            let unchanged = db.get_directive(directive.id).expect("Query failed").unwrap();
            assert_eq!(unchanged.status, DirectiveStatus::Draft);
            assert_eq!(unchanged.updated_at, directive.updated_at);
        }

        it "blocks a child whose predecessor is not completed" {
            let parent = create_directive(&db, "SD-CAS-P", "orchestrator");
            let first = new_child("SD-CAS-P-A", None);
            let second = new_child("SD-CAS-P-B", Some(first.id));
            db.append_children(parent.id, &[first.clone(), second.clone()])
                .expect("Append failed");

            let activate = |id| StatusUpdate {
                id,
                expected: DirectiveStatus::Draft,
                target: DirectiveStatus::Active,
                require_children_complete: false,
            };

            assert!(!db.compare_and_set_status(&activate(second.id)).expect("Update failed"));
            assert!(db.compare_and_set_status(&activate(first.id)).expect("Update failed"));
            assert!(db
                .compare_and_set_status(&StatusUpdate {
                    id: first.id,
                    expected: DirectiveStatus::Active,
                    target: DirectiveStatus::Completed,
                    require_children_complete: false,
                })
                .expect("Update failed"));
            assert!(db.compare_and_set_status(&activate(second.id)).expect("Update failed"));
        }

        it "stamps completion and snaps the cache to 100" {
            let directive = create_directive(&db, "SD-CAS-003", "feature");
            for (expected, target) in [
                (DirectiveStatus::Draft, DirectiveStatus::InProgress),
                (DirectiveStatus::InProgress, DirectiveStatus::Completed),
            ] {
                db.compare_and_set_status(&StatusUpdate {
                    id: directive.id,
                    expected,
                    target,
                    require_children_complete: false,
                })
                .expect("Update failed");
            }

            let completed = db.get_directive(directive.id).expect("Query failed").unwrap();
            assert_eq!(completed.status, DirectiveStatus::Completed);
            assert_eq!(completed.progress_cache, 100);
            assert!(completed.completed_at.is_some());
        }

        it "requires children complete when asked" {
            let parent = create_directive(&db, "SD-CAS-004", "orchestrator");
            db.append_children(parent.id, &[new_child("SD-CAS-004-A", None)])
                .expect("Append failed");
            db.compare_and_set_status(&StatusUpdate {
                id: parent.id,
                expected: DirectiveStatus::Draft,
                target: DirectiveStatus::Active,
                require_children_complete: false,
            })
            .expect("Update failed");

            let applied = db
                .compare_and_set_status(&StatusUpdate {
                    id: parent.id,
                    expected: DirectiveStatus::Active,
                    target: DirectiveStatus::Completed,
                    require_children_complete: true,
                })
                .expect("Update failed");
            assert!(!applied);
        }

        it "refuses to complete straight from draft" {
            let d = create_directive(&db, "SD-CAS-005", "feature");

            let applied = db
                .compare_and_set_status(&StatusUpdate {
                    id: d.id,
                    expected: DirectiveStatus::Draft,
                    target: DirectiveStatus::Completed,
                    require_children_complete: false,
                })
                .expect("Update failed");

            assert!(!applied);
            let unchanged = db.get_directive(d.id).expect("Query failed").unwrap();
            assert_eq!(unchanged.status, DirectiveStatus::Draft);
            assert!(unchanged.completed_at.is_none());
        }
    }

    describe "profiles" {
        it "seeds the standard profiles" {
            let profiles = db.list_profiles().expect("Query failed");
            let types: Vec<&str> = profiles.iter().map(|p| p.sd_type.as_str()).collect();

            for expected in ["bugfix", "documentation", "feature", "quick_fix", "security"] {
                assert!(types.contains(&expected), "missing profile {}", expected);
            }
            assert!(profiles.iter().all(|p| p.weight_sum() == 100));
        }

        it "seeds quick_fix as exec-heavy with no handoffs" {
            let quick_fix = db.get_profile("quick_fix").expect("Query failed").unwrap();
            assert_eq!(quick_fix.lead_weight, 10);
            assert_eq!(quick_fix.exec_weight, 90);
            assert_eq!(quick_fix.min_handoffs, 0);
            assert!(!quick_fix.requires_prd);
            assert!(quick_fix.requires_deliverables);
        }

        it "inserts a new profile" {
            let stored = db
                .put_profile_if_unreferenced(&profile_input("research"), usage(false))
                .expect("Write failed")
                .expect("Profile was refused");

            assert_eq!(stored.sd_type, "research");
            assert_eq!(stored.min_handoffs, 1);
            let found = db.get_profile("research").expect("Query failed").unwrap();
            assert_eq!(found.weight_sum(), 100);
        }

        it "replaces an unreferenced profile" {
            let mut input = profile_input("research");
            db.put_profile_if_unreferenced(&input, usage(false)).expect("Write failed");

            input.min_handoffs = 2;
            let stored = db
                .put_profile_if_unreferenced(&input, usage(false))
                .expect("Write failed")
                .expect("Profile was refused");
            assert_eq!(stored.min_handoffs, 2);
        }

        it "refuses to replace a profile a directive declares" {
            create_directive(&db, "SD-SEC-001", "security");

            let refused = db
                .put_profile_if_unreferenced(&profile_input("security"), usage(false))
                .expect("Write failed");
            assert!(refused.is_none());

            let security = db.get_profile("security").expect("Query failed").unwrap();
            assert_eq!(security.exec_weight, 25);
            assert_eq!(security.verify_weight, 20);
        }

        it "refuses to replace a profile selected by key prefix" {
            create_directive(&db, "QF-20260101-001", "feature");

            let mut input = profile_input("quick_fix");
            input.min_handoffs = 0;
            let refused = db
                .put_profile_if_unreferenced(&input, usage(false))
                .expect("Write failed");
            assert!(refused.is_none());
        }

        it "refuses to replace the fallback while an unregistered type leans on it" {
            create_directive(&db, "SD-RES-001", "research");

            let refused = db
                .put_profile_if_unreferenced(&profile_input("feature"), usage(true))
                .expect("Write failed");
            assert!(refused.is_none());

            let feature = db.get_profile("feature").expect("Query failed").unwrap();
            assert_eq!(feature.exec_weight, 30);
        }

        it "replaces the fallback once every directive has its own profile" {
            create_directive(&db, "SD-SEC-002", "security");

            let stored = db
                .put_profile_if_unreferenced(&profile_input("feature"), usage(true))
                .expect("Write failed")
                .expect("Profile was refused");
            assert_eq!(stored.exec_weight, 25);
        }
    }

    describe "signals" {
        it "finds requirements docs only in acceptable states" {
            let directive = create_directive(&db, "SD-PRD-001", "feature");
            db.create_requirements_doc(directive.id, CreateRequirementsDocInput {
                status: PrdStatus::Draft,
            }).expect("Insert failed");

            assert!(!db.requirements_doc_exists(directive.id, &PrdStatus::ACCEPTABLE).expect("Query failed"));

            db.create_requirements_doc(directive.id, CreateRequirementsDocInput {
                status: PrdStatus::Approved,
            }).expect("Insert failed");

            assert!(db.requirements_doc_exists(directive.id, &PrdStatus::ACCEPTABLE).expect("Query failed"));
            assert!(!db.requirements_doc_exists(directive.id, &[]).expect("Query failed"));
        }

        it "updates deliverable completion" {
            let directive = create_directive(&db, "SD-DEL-001", "feature");
            let deliverable = db.create_deliverable(directive.id, CreateDeliverableInput {
                name: "API endpoint".to_string(),
                priority: DeliverablePriority::Required,
                completion_status: None,
            }).expect("Insert failed");
            assert!(deliverable.is_blocking());

            let updated = db
                .update_deliverable(deliverable.id, UpdateDeliverableInput {
                    completion_status: CompletionStatus::Completed,
                })
                .expect("Update failed")
                .expect("Deliverable missing");

            assert_eq!(updated.directive_id, directive.id);
            assert!(!updated.is_blocking());

            let listed = db.list_deliverables(directive.id).expect("Query failed");
            assert_eq!(listed.len(), 1);
            assert_eq!(listed[0].completion_status, CompletionStatus::Completed);
        }

        it "returns None when updating a missing deliverable" {
            let missing = db
                .update_deliverable(Uuid::new_v4(), UpdateDeliverableInput {
                    completion_status: CompletionStatus::Completed,
                })
                .expect("Update failed");
            assert!(missing.is_none());
        }

        it "merges partial user story updates" {
            let directive = create_directive(&db, "SD-US-001", "feature");
            let story = db.create_user_story(directive.id, CreateUserStoryInput {
                title: "Login works".to_string(),
                validation_status: None,
                e2e_test_status: Some(E2eTestStatus::Failing),
            }).expect("Insert failed");
            assert!(!story.is_verified());

            let updated = db
                .update_user_story(story.id, UpdateUserStoryInput {
                    validation_status: Some(ValidationStatus::Validated),
                    e2e_test_status: None,
                })
                .expect("Update failed")
                .expect("Story missing");

            assert_eq!(updated.validation_status, ValidationStatus::Validated);
            assert_eq!(updated.e2e_test_status, E2eTestStatus::Failing);
            assert!(updated.is_verified());
        }

        it "counts distinct accepted handoff types" {
            let directive = create_directive(&db, "SD-HO-001", "feature");
            let add = |from, to, status| {
                db.create_handoff(directive.id, CreateHandoffInput {
                    from_phase: from,
                    to_phase: to,
                    status: Some(status),
                }).expect("Insert failed")
            };

            add(HandoffPhase::Lead, HandoffPhase::Plan, HandoffStatus::Accepted);
            add(HandoffPhase::Lead, HandoffPhase::Plan, HandoffStatus::Accepted);
            add(HandoffPhase::Plan, HandoffPhase::Exec, HandoffStatus::Accepted);
            let pending = add(HandoffPhase::Exec, HandoffPhase::Plan, HandoffStatus::PendingAcceptance);

            assert_eq!(db.count_accepted_handoff_types(directive.id).expect("Query failed"), 2);

            let owner = db.accept_handoff(pending.id).expect("Update failed");
            assert_eq!(owner, Some(directive.id));
            assert_eq!(db.count_accepted_handoff_types(directive.id).expect("Query failed"), 3);
        }

        it "records a retrospective once" {
            let directive = create_directive(&db, "SD-RETRO-001", "feature");
            assert!(!db.retrospective_exists(directive.id).expect("Query failed"));

            let first = db.record_retrospective(directive.id).expect("Insert failed");
            let second = db.record_retrospective(directive.id).expect("Insert failed");

            assert_eq!(first, second);
            assert!(db.retrospective_exists(directive.id).expect("Query failed"));
        }

        it "keeps only the latest verdict per agent" {
            let directive = create_directive(&db, "SD-VERD-001", "feature");
            let record = |agent: &str, verdict| {
                db.record_verdict(directive.id, CreateVerdictInput {
                    agent_code: agent.to_string(),
                    verdict,
                }).expect("Insert failed")
            };

            record("TESTING", Verdict::Fail);
            record("SECURITY", Verdict::ConditionalPass);
            record("TESTING", Verdict::Pass);

            let latest = db.latest_verdicts(directive.id).expect("Query failed");
            assert_eq!(latest.len(), 2);
            assert_eq!(latest[0].agent_code, "SECURITY");
            assert_eq!(latest[1].agent_code, "TESTING");
            assert_eq!(latest[1].verdict, Verdict::Pass);
        }
    }
}
