use std::sync::Arc;

use directive_engine::config::EngineConfig;
use directive_engine::db::Database;
use directive_engine::engine::*;
use directive_engine::models::*;
use speculate2::speculate;
use uuid::Uuid;

struct Unreachable;

impl SubAgentVerifier for Unreachable {
    fn all_verified(&self, _directive_id: Uuid) -> Result<bool, VerifierError> {
        Err(VerifierError::Unavailable("connection refused".to_string()))
    }
}

fn directive(engine: &ProgressEngine, key: &str, declared_type: &str) -> Directive {
    engine
        .create_directive(CreateDirectiveInput {
            key: key.to_string(),
            title: format!("Directive {}", key),
            declared_type: declared_type.to_string(),
            priority: None,
            parent_id: None,
        })
        .expect("Failed to create directive")
}

fn child(key: &str, priority: Priority) -> CreateChildInput {
    CreateChildInput {
        key: key.to_string(),
        title: format!("Child {}", key),
        declared_type: None,
        priority: Some(priority),
    }
}

/// Record every signal a `feature` directive needs to reach 100.
fn satisfy_feature(db: &Database, id: Uuid) {
    db.create_requirements_doc(id, CreateRequirementsDocInput {
        status: PrdStatus::Approved,
    })
    .expect("Insert failed");
    db.record_retrospective(id).expect("Insert failed");
    for (from, to) in [
        (HandoffPhase::Lead, HandoffPhase::Plan),
        (HandoffPhase::Plan, HandoffPhase::Exec),
        (HandoffPhase::Exec, HandoffPhase::Plan),
    ] {
        db.create_handoff(id, CreateHandoffInput {
            from_phase: from,
            to_phase: to,
            status: Some(HandoffStatus::Accepted),
        })
        .expect("Insert failed");
    }
}

fn phase(breakdown: &PhaseBreakdown, name: Phase) -> &PhaseResult {
    breakdown
        .phases
        .iter()
        .find(|p| p.name == name)
        .expect("Phase missing from breakdown")
}

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
        let engine = ProgressEngine::new(db.clone(), &EngineConfig::default());
    }

    describe "profiles" {
        it "keeps every registered profile at 100 total weight" {
            let profiles = engine.profiles().list().expect("Query failed");
            assert!(!profiles.is_empty());
            for profile in profiles {
                assert_eq!(profile.weight_sum(), 100, "{} does not sum to 100", profile.sd_type);
            }
        }

        it "rejects a profile whose weights do not sum to 100" {
            let result = engine.register_profile(CreateProfileInput {
                sd_type: "research".to_string(),
                lead_weight: 20,
                plan_weight: 20,
                exec_weight: 20,
                verify_weight: 20,
                final_weight: 10,
                requires_prd: false,
                requires_deliverables: false,
                requires_e2e_tests: false,
                requires_sub_agents: false,
                requires_retrospective: false,
                min_handoffs: 0,
            });

            assert!(matches!(result, Err(EngineError::InvalidProfile(_))));
            assert!(engine.profiles().get("research").expect("Query failed").is_none());
        }

        it "refuses to replace a profile in use" {
            directive(&engine, "SD-DOC-001", "documentation");

            let result = engine.register_profile(CreateProfileInput {
                sd_type: "documentation".to_string(),
                lead_weight: 50,
                plan_weight: 50,
                exec_weight: 0,
                verify_weight: 0,
                final_weight: 0,
                requires_prd: false,
                requires_deliverables: false,
                requires_e2e_tests: false,
                requires_sub_agents: false,
                requires_retrospective: false,
                min_handoffs: 0,
            });

            assert!(matches!(result, Err(EngineError::ProfileInUse(t)) if t == "documentation"));
        }

        it "refuses to replace the fallback profile an unregistered type is scored with" {
            let d = directive(&engine, "SD-RES-001", "research");
            engine.transition(d.id, DirectiveStatus::Active).expect("Transition failed");
            let before = engine.calculate(d.id).expect("Calculate failed");

            let result = engine.register_profile(CreateProfileInput {
                sd_type: "feature".to_string(),
                lead_weight: 100,
                plan_weight: 0,
                exec_weight: 0,
                verify_weight: 0,
                final_weight: 0,
                requires_prd: false,
                requires_deliverables: false,
                requires_e2e_tests: false,
                requires_sub_agents: false,
                requires_retrospective: false,
                min_handoffs: 0,
            });

            assert!(matches!(result, Err(EngineError::ProfileInUse(t)) if t == "feature"));
            assert_eq!(engine.calculate(d.id).expect("Calculate failed"), before);
        }

        it "selects the quick-fix profile from the key prefix" {
            let d = directive(&engine, "QF-20260101-001", "feature");

            let breakdown = engine.breakdown(d.id).expect("Breakdown failed");
            assert_eq!(breakdown.profile, QUICK_FIX_TYPE);
            assert!(!breakdown.profile_fallback);
        }

        it "falls back to the feature profile for unknown types and says so" {
            let d = directive(&engine, "SD-ODD-001", "interpretive_dance");

            let breakdown = engine.breakdown(d.id).expect("Breakdown failed");
            assert_eq!(breakdown.profile, "feature");
            assert!(breakdown.profile_fallback);
            assert!(breakdown.warnings.iter().any(|w| w.contains("interpretive_dance")));
        }
    }

    describe "evaluation" {
        it "reports the same total from breakdown and calculate" {
            let d = directive(&engine, "SD-EVAL-001", "feature");
            engine.transition(d.id, DirectiveStatus::Active).expect("Transition failed");

            let breakdown = engine.breakdown(d.id).expect("Breakdown failed");
            let calculated = engine.calculate(d.id).expect("Calculate failed");
            let summed: u32 = breakdown
                .phases
                .iter()
                .filter(|p| p.satisfied)
                .map(|p| u32::from(p.weight))
                .sum();

            assert_eq!(breakdown.total, calculated);
            assert_eq!(u32::from(calculated), summed);
        }

        it "is idempotent without collaborator changes" {
            let d = directive(&engine, "SD-EVAL-002", "security");

            let first = engine.breakdown(d.id).expect("Breakdown failed");
            let second = engine.breakdown(d.id).expect("Breakdown failed");
            assert_eq!(first, second);
        }

        it "treats no deliverables as a satisfied EXEC gate" {
            let d = directive(&engine, "SD-EVAL-003", "feature");

            let breakdown = engine.breakdown(d.id).expect("Breakdown failed");
            assert!(phase(&breakdown, Phase::ExecImplementation).satisfied);
            assert!(!phase(&breakdown, Phase::LeadApproval).satisfied);
            assert!(!phase(&breakdown, Phase::PlanPrd).satisfied);
        }

        it "fails the EXEC gate on an unfinished required deliverable" {
            let d = directive(&engine, "SD-EVAL-004", "feature");
            db.create_deliverable(d.id, CreateDeliverableInput {
                name: "Migration".to_string(),
                priority: DeliverablePriority::Required,
                completion_status: None,
            }).expect("Insert failed");
            db.create_deliverable(d.id, CreateDeliverableInput {
                name: "Nice to have".to_string(),
                priority: DeliverablePriority::Low,
                completion_status: None,
            }).expect("Insert failed");

            let breakdown = engine.breakdown(d.id).expect("Breakdown failed");
            let exec = phase(&breakdown, Phase::ExecImplementation);
            assert!(!exec.satisfied);
            assert_eq!(exec.raw_signals["blocking"], serde_json::json!(["Migration"]));
        }

        it "reaches 100 for an active quick fix with nothing outstanding" {
            let d = directive(&engine, "QF-20260101-002", "feature");
            engine.transition(d.id, DirectiveStatus::Active).expect("Transition failed");

            assert_eq!(engine.calculate(d.id).expect("Calculate failed"), 100);
            let report = engine.progress(d.id).expect("Progress failed");
            assert_eq!(report.total, 100);
            assert!(report.can_complete);
        }

        it "reaches 100 once every feature signal is in" {
            let d = directive(&engine, "SD-EVAL-005", "feature");
            engine.transition(d.id, DirectiveStatus::InProgress).expect("Transition failed");
            assert!(engine.calculate(d.id).expect("Calculate failed") < 100);

            satisfy_feature(&db, d.id);

            let breakdown = engine.breakdown(d.id).expect("Breakdown failed");
            assert_eq!(breakdown.total, 100);
            assert!(breakdown.missing_phases().is_empty());
        }

        it "counts only accepted handoffs of distinct types" {
            let d = directive(&engine, "SD-EVAL-006", "feature");
            engine.transition(d.id, DirectiveStatus::Active).expect("Transition failed");
            db.create_requirements_doc(d.id, CreateRequirementsDocInput {
                status: PrdStatus::Accepted,
            }).expect("Insert failed");
            db.record_retrospective(d.id).expect("Insert failed");
            for _ in 0..3 {
                db.create_handoff(d.id, CreateHandoffInput {
                    from_phase: HandoffPhase::Lead,
                    to_phase: HandoffPhase::Plan,
                    status: Some(HandoffStatus::Accepted),
                }).expect("Insert failed");
            }

            let breakdown = engine.breakdown(d.id).expect("Breakdown failed");
            assert!(!phase(&breakdown, Phase::LeadFinalApproval).satisfied);
            assert_eq!(breakdown.total, 85);
        }

        it "fails the verification gate on a failing sub-agent verdict" {
            let d = directive(&engine, "SD-EVAL-007", "feature");
            db.record_verdict(d.id, CreateVerdictInput {
                agent_code: "TESTING".to_string(),
                verdict: Verdict::Fail,
            }).expect("Insert failed");

            let breakdown = engine.breakdown(d.id).expect("Breakdown failed");
            assert!(!phase(&breakdown, Phase::PlanVerification).satisfied);
        }

        it "passes the verification gate when the verifier is unreachable" {
            let engine = ProgressEngine::from_parts(
                Arc::new(db.clone()),
                Arc::new(db.clone()),
                SignalAdapters {
                    requirements: Arc::new(db.clone()),
                    deliverables: Arc::new(db.clone()),
                    stories: Arc::new(db.clone()),
                    verifier: Arc::new(Unreachable),
                    retrospectives: Arc::new(db.clone()),
                    handoffs: Arc::new(db.clone()),
                },
                &EngineConfig::default(),
            );
            let d = directive(&engine, "SD-EVAL-008", "feature");

            let breakdown = engine.breakdown(d.id).expect("Breakdown failed");
            let verification = phase(&breakdown, Phase::PlanVerification);
            assert!(verification.satisfied);
            assert_eq!(verification.raw_signals["verifier"], "fail_open");
            assert!(breakdown.warnings.iter().any(|w| w.contains("connection refused")));
        }

        it "reports missing directives as not found" {
            let missing = Uuid::new_v4();
            assert!(matches!(engine.breakdown(missing), Err(EngineError::NotFound(id)) if id == missing));
        }
    }

    describe "transitions" {
        it "moves a draft directive to a working status" {
            let d = directive(&engine, "SD-TR-001", "feature");

            let updated = engine.transition(d.id, DirectiveStatus::Review).expect("Transition failed");
            assert_eq!(updated.status, DirectiveStatus::Review);
        }

        it "treats a transition to the current status as a no-op" {
            let d = directive(&engine, "SD-TR-002", "feature");
            engine.transition(d.id, DirectiveStatus::Active).expect("Transition failed");

            let again = engine.transition(d.id, DirectiveStatus::Active).expect("Transition failed");
            assert_eq!(again.status, DirectiveStatus::Active);
        }

        it "never completes through a plain transition" {
            let d = directive(&engine, "QF-20260101-003", "feature");
            engine.transition(d.id, DirectiveStatus::Active).expect("Transition failed");

            let result = engine.transition(d.id, DirectiveStatus::Completed);
            assert!(matches!(result, Err(EngineError::InvalidTransition(_))));
        }

        it "refuses to move back to draft" {
            let d = directive(&engine, "SD-TR-003", "feature");
            engine.transition(d.id, DirectiveStatus::Active).expect("Transition failed");

            let result = engine.transition(d.id, DirectiveStatus::Draft);
            assert!(matches!(result, Err(EngineError::InvalidTransition(_))));
        }

        it "blocks a child until its predecessor completes and changes nothing" {
            let parent = directive(&engine, "SD-CHAIN-001", "orchestrator");
            let children = engine
                .create_children(parent.id, CreateChildrenInput {
                    children: vec![child("QF-CHAIN-1", Priority::High), child("QF-CHAIN-2", Priority::High)],
                })
                .expect("Decomposition failed");
            let (first, second) = (&children[0], &children[1]);

            let result = engine.transition(second.id, DirectiveStatus::Active);
            match result {
                Err(EngineError::DependencyNotSatisfied { directive_id, predecessor_id, predecessor_status }) => {
                    assert_eq!(directive_id, second.id);
                    assert_eq!(predecessor_id, first.id);
                    assert_eq!(predecessor_status, DirectiveStatus::Draft);
                }
                other => panic!("expected DependencyNotSatisfied, got {:?}", other.map(|d| d.status)),
            }

            let unchanged = engine.get_directive(second.id).expect("Query failed");
            assert_eq!(unchanged.status, DirectiveStatus::Draft);
            assert_eq!(unchanged.updated_at, second.updated_at);
        }
    }

    describe "hierarchy" {
        it "chains children in the order given" {
            let parent = directive(&engine, "SD-H-001", "orchestrator");
            engine
                .create_children(parent.id, CreateChildrenInput {
                    children: vec![
                        child("SD-H-001-A", Priority::Critical),
                        child("SD-H-001-B", Priority::Low),
                        child("SD-H-001-C", Priority::Medium),
                    ],
                })
                .expect("Decomposition failed");

            let ordered = engine.children(parent.id).expect("Query failed");
            let keys: Vec<&str> = ordered.iter().map(|c| c.key.as_str()).collect();
            assert_eq!(keys, vec!["SD-H-001-A", "SD-H-001-B", "SD-H-001-C"]);
            assert_eq!(ordered[0].depends_on, None);
            assert_eq!(ordered[1].depends_on, Some(ordered[0].id));
            assert_eq!(ordered[2].depends_on, Some(ordered[1].id));
            assert!(ordered.iter().all(|c| c.declared_type == "orchestrator"));

            let parent = engine.get_directive(parent.id).expect("Query failed");
            assert_eq!(parent.relationship_type, RelationshipType::Parent);
        }

        it "appends a single child to the end of the chain" {
            let parent = directive(&engine, "SD-H-002", "orchestrator");
            engine
                .create_children(parent.id, CreateChildrenInput {
                    children: vec![child("SD-H-002-A", Priority::Medium)],
                })
                .expect("Decomposition failed");

            let appended = engine
                .create_directive(CreateDirectiveInput {
                    key: "SD-H-002-B".to_string(),
                    title: "Second".to_string(),
                    declared_type: "feature".to_string(),
                    priority: Some(Priority::High),
                    parent_id: Some(parent.id),
                })
                .expect("Append failed");

            let chain = engine.scheduler().chain(parent.id).expect("Chain failed");
            assert_eq!(chain.len(), 2);
            assert_eq!(chain.tail(), Some(appended.id));
            assert_eq!(appended.relationship_type, RelationshipType::Child);
        }

        it "rejects duplicate keys" {
            directive(&engine, "SD-H-003", "feature");

            let result = engine.create_directive(CreateDirectiveInput {
                key: "SD-H-003".to_string(),
                title: "Again".to_string(),
                declared_type: "feature".to_string(),
                priority: None,
                parent_id: None,
            });
            assert!(matches!(result, Err(EngineError::Conflict(_))));
        }

        it "refuses to nest below a child" {
            let parent = directive(&engine, "SD-H-004", "orchestrator");
            let children = engine
                .create_children(parent.id, CreateChildrenInput {
                    children: vec![child("SD-H-004-A", Priority::Medium)],
                })
                .expect("Decomposition failed");

            let result = engine.create_children(children[0].id, CreateChildrenInput {
                children: vec![child("SD-H-004-A-1", Priority::Medium)],
            });
            assert!(matches!(result, Err(EngineError::InvalidTransition(_))));
        }

        it "reports the priority-weighted aggregate for a parent" {
            let parent = directive(&engine, "SD-H-005", "orchestrator");
            let children = engine
                .create_children(parent.id, CreateChildrenInput {
                    children: vec![
                        child("QF-H-005-A", Priority::Critical),
                        child("QF-H-005-B", Priority::Low),
                    ],
                })
                .expect("Decomposition failed");

            engine.transition(children[0].id, DirectiveStatus::Active).expect("Transition failed");
            engine.mark_complete(children[0].id).expect("Completion failed");

            // Draft quick fix: EXEC passes vacuously, LEAD does not.
            assert_eq!(engine.calculate(children[1].id).expect("Calculate failed"), 90);

            // (100*40 + 90*10) / 50
            let report = engine.progress(parent.id).expect("Progress failed");
            assert_eq!(report.total, 98);
            assert!(!report.can_complete);

            let parent = engine.get_directive(parent.id).expect("Query failed");
            assert_eq!(parent.progress_cache, 98);
        }

        it "completes the parent when the last child completes" {
            let parent = directive(&engine, "SD-H-006", "orchestrator");
            let children = engine
                .create_children(parent.id, CreateChildrenInput {
                    children: vec![
                        child("QF-H-006-A", Priority::High),
                        child("QF-H-006-B", Priority::Medium),
                    ],
                })
                .expect("Decomposition failed");

            for c in &children {
                engine.transition(c.id, DirectiveStatus::Active).expect("Transition failed");
                engine.mark_complete(c.id).expect("Completion failed");

                let parent = engine.get_directive(parent.id).expect("Query failed");
                if c.id == children[0].id {
                    assert_eq!(parent.status, DirectiveStatus::InProgress);
                }
            }

            let parent = engine.get_directive(parent.id).expect("Query failed");
            assert_eq!(parent.status, DirectiveStatus::Completed);
            assert_eq!(parent.progress_cache, 100);
            assert!(parent.completed_at.is_some());
        }

        it "starts a draft parent once its first child leaves draft" {
            let parent = directive(&engine, "SD-H-008", "orchestrator");
            let children = engine
                .create_children(parent.id, CreateChildrenInput {
                    children: vec![child("QF-H-008-A", Priority::Medium)],
                })
                .expect("Decomposition failed");
            assert_eq!(
                engine.get_directive(parent.id).expect("Query failed").status,
                DirectiveStatus::Draft
            );

            engine.transition(children[0].id, DirectiveStatus::Active).expect("Transition failed");

            let parent = engine.get_directive(parent.id).expect("Query failed");
            assert_eq!(parent.status, DirectiveStatus::InProgress);
        }

        it "refuses children under a completed parent" {
            let parent = directive(&engine, "QF-H-007", "feature");
            engine.transition(parent.id, DirectiveStatus::Active).expect("Transition failed");
            engine.mark_complete(parent.id).expect("Completion failed");

            let result = engine.create_children(parent.id, CreateChildrenInput {
                children: vec![child("QF-H-007-A", Priority::Medium)],
            });
            assert!(matches!(result, Err(EngineError::InvalidTransition(_))));
        }
    }

    describe "completion" {
        it "lists the missing phases when the gate fails" {
            let d = directive(&engine, "SD-C-001", "feature");
            engine.transition(d.id, DirectiveStatus::Active).expect("Transition failed");

            match engine.mark_complete(d.id) {
                Err(EngineError::IncompleteGate { missing_phases, incomplete_children }) => {
                    assert!(missing_phases.contains(&Phase::PlanPrd));
                    assert!(missing_phases.contains(&Phase::LeadFinalApproval));
                    assert!(!missing_phases.contains(&Phase::LeadApproval));
                    assert!(incomplete_children.is_empty());
                }
                other => panic!("expected IncompleteGate, got {:?}", other.map(|d| d.status)),
            }

            let unchanged = engine.get_directive(d.id).expect("Query failed");
            assert_eq!(unchanged.status, DirectiveStatus::Active);
        }

        it "completes a feature once every gate passes" {
            let d = directive(&engine, "SD-C-002", "feature");
            engine.transition(d.id, DirectiveStatus::PendingApproval).expect("Transition failed");
            satisfy_feature(&db, d.id);

            let check = engine.check_completion(d.id).expect("Check failed");
            assert!(check.can_complete);
            assert_eq!(check.calculated, 100);

            let completed = engine.mark_complete(d.id).expect("Completion failed");
            assert_eq!(completed.status, DirectiveStatus::Completed);
            assert_eq!(completed.progress_cache, 100);
        }

        it "refuses to complete a draft even when every weighted phase passes" {
            engine.register_profile(CreateProfileInput {
                sd_type: "chore".to_string(),
                lead_weight: 0,
                plan_weight: 0,
                exec_weight: 100,
                verify_weight: 0,
                final_weight: 0,
                requires_prd: false,
                requires_deliverables: true,
                requires_e2e_tests: false,
                requires_sub_agents: false,
                requires_retrospective: false,
                min_handoffs: 0,
            }).expect("Register failed");
            let d = directive(&engine, "SD-CHORE-1", "chore");

            let check = engine.check_completion(d.id).expect("Check failed");
            assert_eq!(check.calculated, 100);
            assert!(!check.can_complete);

            assert!(matches!(engine.mark_complete(d.id), Err(EngineError::InvalidTransition(_))));
            let unchanged = engine.get_directive(d.id).expect("Query failed");
            assert_eq!(unchanged.status, DirectiveStatus::Draft);
            assert!(unchanged.completed_at.is_none());

            engine.transition(d.id, DirectiveStatus::Active).expect("Transition failed");
            let completed = engine.mark_complete(d.id).expect("Completion failed");
            assert_eq!(completed.status, DirectiveStatus::Completed);
        }

        it "refuses to complete twice" {
            let d = directive(&engine, "QF-C-003", "feature");
            engine.transition(d.id, DirectiveStatus::Active).expect("Transition failed");
            engine.mark_complete(d.id).expect("Completion failed");

            let check = engine.check_completion(d.id).expect("Check failed");
            assert!(check.already_completed);
            assert!(!check.can_complete);
            assert!(matches!(engine.mark_complete(d.id), Err(EngineError::InvalidTransition(_))));
        }

        it "refuses a child whose predecessor is still open" {
            let parent = directive(&engine, "SD-C-004", "orchestrator");
            let children = engine
                .create_children(parent.id, CreateChildrenInput {
                    children: vec![child("QF-C-004-A", Priority::Medium), child("QF-C-004-B", Priority::Medium)],
                })
                .expect("Decomposition failed");

            let result = engine.mark_complete(children[1].id);
            assert!(matches!(
                result,
                Err(EngineError::DependencyNotSatisfied { predecessor_id, .. }) if predecessor_id == children[0].id
            ));
        }

        it "refuses a parent with open children" {
            let parent = directive(&engine, "QF-C-005", "feature");
            engine.transition(parent.id, DirectiveStatus::Active).expect("Transition failed");
            let children = engine
                .create_children(parent.id, CreateChildrenInput {
                    children: vec![child("QF-C-005-A", Priority::Medium)],
                })
                .expect("Decomposition failed");

            match engine.mark_complete(parent.id) {
                Err(EngineError::IncompleteGate { incomplete_children, .. }) => {
                    assert_eq!(incomplete_children, vec![children[0].id]);
                }
                other => panic!("expected IncompleteGate, got {:?}", other.map(|d| d.status)),
            }
        }
    }
}
