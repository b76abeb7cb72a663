//! Deployment pipeline tests

use std::sync::Arc;
use std::time::Duration;

use deployd::build::Bundle;
use deployd::deploy::engine::EngineEvent;
use deployd::deploy::fsm::DeploymentState;
use deployd::deploy::orchestrator::DeployRequest;
use deployd::errors::{BroadcastError, PipelineError};
use deployd::models::build::{BuildStatus, DeployOutcome};
use deployd::registry::memory::MemoryRegistry;
use deployd::registry::Registry;

use crate::support::{
    bundle, dockerfile_bundle, drain, orchestrator, wait_for_lines, FlakyRegistry, ParkedRegistry,
    ScriptedEngine,
};

fn request(name: &str, bundle: Bundle) -> DeployRequest {
    DeployRequest {
        name: name.to_string(),
        bundle,
    }
}

fn log(text: &str) -> EngineEvent {
    EngineEvent::Log(text.to_string())
}

#[tokio::test]
async fn test_deploy_streams_logs_and_creates_service() {
    let workspace = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::new();
    let registry = Arc::new(MemoryRegistry::new());
    let orchestrator = orchestrator(engine.clone(), registry.clone(), workspace.path());
    let build = engine.live();

    let ticket = orchestrator
        .submit(request("Demo App", dockerfile_bundle()))
        .await
        .unwrap();
    assert_eq!(ticket.key, "demo-app");
    assert_eq!(ticket.application.slug, "demo-app");
    assert_eq!(ticket.application.name, "Demo App");
    assert_eq!(
        registry.get_application("demo-app").await.unwrap(),
        ticket.application
    );

    // joins before any output
    let early = orchestrator.hub().join("demo-app").unwrap();
    assert!(early.snapshot().is_empty());

    build.send(log("Step 1/2 : FROM scratch")).unwrap();
    build.send(log("Step 2/2 : COPY app /app")).unwrap();
    wait_for_lines(orchestrator.hub(), "demo-app", 2).await;

    // joins midway
    let late = orchestrator.hub().join("demo-app").unwrap();

    build.send(log("Successfully tagged demo-app:latest")).unwrap();
    build
        .send(EngineEvent::Succeeded {
            image: "demo-app".to_string(),
        })
        .unwrap();

    let snapshot = orchestrator.wait("demo-app").await.unwrap();
    assert_eq!(snapshot.state, DeploymentState::Released);
    assert_eq!(snapshot.build_status, BuildStatus::Succeeded);
    assert_eq!(snapshot.image_tag.as_deref(), Some("demo-app"));
    assert_eq!(snapshot.service_id.as_deref(), Some("svc-1"));
    let expected = DeployOutcome::Succeeded {
        service_id: "svc-1".to_string(),
    };
    assert_eq!(snapshot.outcome, Some(expected.clone()));

    let all = vec![
        "Step 1/2 : FROM scratch",
        "Step 2/2 : COPY app /app",
        "Successfully tagged demo-app:latest",
    ];

    let early = drain(early).await;
    assert!(early.snapshot.is_empty());
    assert_eq!(early.live, all);
    assert_eq!(early.outcome, Some(expected.clone()));

    let late = drain(late).await;
    assert_eq!(late.snapshot, all[..2].to_vec());
    assert_eq!(late.live, all[2..].to_vec());
    assert_eq!(late.outcome, Some(expected));

    // service launched from the image and recorded against the application
    assert_eq!(
        engine.services(),
        vec![("demo-app".to_string(), "demo-app".to_string())]
    );
    let services = registry.services();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].id, "svc-1");
    assert_eq!(services[0].application_id, ticket.application.id);

    // logs are gone, and so is the working directory
    assert_eq!(
        orchestrator.hub().join("demo-app").err(),
        Some(BroadcastError::Unavailable("demo-app".to_string()))
    );
    let contexts = engine.contexts();
    assert_eq!(contexts.len(), 1);
    assert!(contexts[0].1, "context should hold the extracted Dockerfile");
    assert!(!contexts[0].0.exists());
    assert!(orchestrator.active_builds().is_empty());
}

#[tokio::test]
async fn test_failed_build_creates_no_service() {
    let workspace = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::new();
    let registry = Arc::new(MemoryRegistry::new());
    let orchestrator = orchestrator(engine.clone(), registry.clone(), workspace.path());
    let build = engine.live();

    orchestrator
        .submit(request("Broken App", dockerfile_bundle()))
        .await
        .unwrap();
    let observer = orchestrator.hub().join("broken-app").unwrap();

    build.send(log("Step 1/1 : RUN false")).unwrap();
    build
        .send(EngineEvent::Error(
            "The command '/bin/sh -c false' returned a non-zero code: 1".to_string(),
        ))
        .unwrap();
    build
        .send(EngineEvent::Failed {
            detail: "The command '/bin/sh -c false' returned a non-zero code: 1".to_string(),
        })
        .unwrap();

    let snapshot = orchestrator.wait("broken-app").await.unwrap();
    assert_eq!(snapshot.state, DeploymentState::Released);
    assert_eq!(snapshot.build_status, BuildStatus::Failed);
    assert!(snapshot.service_id.is_none());
    assert!(matches!(snapshot.outcome, Some(DeployOutcome::BuildFailed { .. })));

    let observed = drain(observer).await;
    assert_eq!(observed.live[0], "Step 1/1 : RUN false");
    assert!(observed.errors[0].contains("non-zero code"));
    // the failure summary is the last error
    assert!(observed.errors.last().unwrap().starts_with("Build failed"));
    assert!(matches!(observed.outcome, Some(DeployOutcome::BuildFailed { .. })));

    assert!(engine.services().is_empty());
    assert!(registry.services().is_empty());
}

#[tokio::test]
async fn test_build_output_ending_early_is_a_failure() {
    let workspace = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::new();
    engine.script(vec![log("Step 1/3 : FROM python")]);
    let orchestrator = orchestrator(engine.clone(), Arc::new(MemoryRegistry::new()), workspace.path());

    orchestrator.submit(request("app", dockerfile_bundle())).await.unwrap();
    let snapshot = orchestrator.wait("app").await.unwrap();

    assert!(matches!(snapshot.outcome, Some(DeployOutcome::BuildFailed { .. })));
    assert!(engine.services().is_empty());
}

#[tokio::test]
async fn test_corrupt_bundle_fails_extraction() {
    let workspace = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::new();
    let orchestrator = orchestrator(engine.clone(), Arc::new(MemoryRegistry::new()), workspace.path());

    orchestrator
        .submit(request("app", Bundle::new(b"this is not a zip".to_vec())))
        .await
        .unwrap();
    let snapshot = orchestrator.wait("app").await.unwrap();

    assert!(matches!(
        snapshot.outcome,
        Some(DeployOutcome::ExtractionFailed { .. })
    ));
    assert_eq!(snapshot.build_status, BuildStatus::Failed);
    assert!(engine.contexts().is_empty());
    // nothing left behind in the workspace
    assert_eq!(std::fs::read_dir(workspace.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_path_traversal_bundle_is_rejected() {
    let workspace = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::new();
    let orchestrator = orchestrator(engine.clone(), Arc::new(MemoryRegistry::new()), workspace.path());

    let evil = bundle(&[("Dockerfile", "FROM scratch\n"), ("../../../evil.sh", "rm -rf /")]);
    orchestrator.submit(request("app", evil)).await.unwrap();
    let snapshot = orchestrator.wait("app").await.unwrap();

    match snapshot.outcome {
        Some(DeployOutcome::ExtractionFailed { detail }) => assert!(detail.contains("evil.sh")),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(engine.contexts().is_empty());
    assert!(!workspace.path().join("evil.sh").exists());
    assert!(!workspace.path().parent().unwrap().join("evil.sh").exists());
}

#[tokio::test]
async fn test_service_creation_failure_is_distinct() {
    let workspace = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::with_service(Err("network apps not found".to_string()));
    engine.script(vec![
        log("Step 1/1 : FROM scratch"),
        EngineEvent::Succeeded {
            image: "app".to_string(),
        },
    ]);
    let registry = Arc::new(MemoryRegistry::new());
    let orchestrator = orchestrator(engine.clone(), registry.clone(), workspace.path());

    orchestrator.submit(request("app", dockerfile_bundle())).await.unwrap();
    let snapshot = orchestrator.wait("app").await.unwrap();

    match snapshot.outcome {
        Some(DeployOutcome::ServiceCreationFailed { image, detail }) => {
            assert_eq!(image, "app");
            assert!(detail.contains("network apps not found"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(snapshot.build_status, BuildStatus::Succeeded);
    assert!(snapshot.error.is_some());
    assert!(registry.services().is_empty());
}

#[tokio::test]
async fn test_persistence_failure_is_reported_as_inconsistency() {
    let workspace = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::new();
    engine.script(vec![EngineEvent::Succeeded {
        image: "app".to_string(),
    }]);
    let registry = FlakyRegistry::failing_services();
    let orchestrator = orchestrator(engine.clone(), registry.clone(), workspace.path());

    orchestrator.submit(request("app", dockerfile_bundle())).await.unwrap();
    let snapshot = orchestrator.wait("app").await.unwrap();

    match snapshot.outcome {
        Some(DeployOutcome::PersistenceFailed { service_id, detail }) => {
            assert_eq!(service_id, "svc-1");
            assert!(detail.contains("database is locked"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    // the service runs even though it was not recorded
    assert_eq!(snapshot.service_id.as_deref(), Some("svc-1"));
    assert_eq!(engine.services().len(), 1);
    assert!(registry.inner.services().is_empty());
}

#[tokio::test]
async fn test_concurrent_build_for_same_key_is_rejected() {
    let workspace = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::new();
    let registry = Arc::new(MemoryRegistry::new());
    let orchestrator = orchestrator(engine.clone(), registry.clone(), workspace.path());
    let first = engine.live();

    let ticket = orchestrator
        .submit(request("Demo App", dockerfile_bundle()))
        .await
        .unwrap();

    let err = orchestrator
        .submit(request("demo app", dockerfile_bundle()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::ConcurrentBuildConflict { ref key } if key == "demo-app"
    ));
    assert_eq!(orchestrator.active_builds().len(), 1);

    first
        .send(EngineEvent::Succeeded {
            image: "demo-app".to_string(),
        })
        .unwrap();
    orchestrator.wait("demo-app").await.unwrap();

    // once released the key can be deployed again, under the same application
    engine.script(vec![EngineEvent::Succeeded {
        image: "demo-app".to_string(),
    }]);
    let again = orchestrator
        .submit(request("Demo App", dockerfile_bundle()))
        .await
        .unwrap();
    assert_eq!(again.application.id, ticket.application.id);
    let redeployed = orchestrator.wait("demo-app").await.unwrap();
    assert_eq!(registry.applications().len(), 1);

    // the redeploy updates the running service instead of colliding with it
    assert_eq!(
        redeployed.outcome,
        Some(DeployOutcome::Succeeded {
            service_id: "svc-1".to_string()
        })
    );
    assert_eq!(
        engine.services(),
        vec![
            ("demo-app".to_string(), "demo-app".to_string()),
            ("demo-app".to_string(), "demo-app".to_string()),
        ]
    );
    assert_eq!(registry.services().len(), 1);
}

#[tokio::test]
async fn test_simultaneous_requests_for_same_key_admit_one() {
    let workspace = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::new();
    let registry = Arc::new(ParkedRegistry::default());
    let orchestrator = orchestrator(engine.clone(), registry.clone(), workspace.path());
    let _build = engine.live();

    // the first request parks inside registration while the second arrives
    let release = async {
        registry.entered.notified().await;
        tokio::task::yield_now().await;
        registry.gate.notify_one();
    };
    let (first, second, ()) = tokio::join!(
        orchestrator.submit(request("Demo App", dockerfile_bundle())),
        orchestrator.submit(request("demo app", dockerfile_bundle())),
        release,
    );

    let (admitted, rejected): (Vec<_>, Vec<_>) = [first, second].into_iter().partition(|r| r.is_ok());
    assert_eq!(admitted.len(), 1);
    assert_eq!(rejected.len(), 1);
    assert!(matches!(
        rejected[0],
        Err(PipelineError::ConcurrentBuildConflict { ref key }) if key == "demo-app"
    ));
    assert_eq!(orchestrator.active_builds().len(), 1);
    assert_eq!(registry.inner.applications().len(), 1);
}

#[tokio::test]
async fn test_invalid_requests_are_rejected_synchronously() {
    let workspace = tempfile::tempdir().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    let orchestrator = orchestrator(ScriptedEngine::new(), registry.clone(), workspace.path());

    for (name, bundle) in [
        ("", dockerfile_bundle()),
        ("   ", dockerfile_bundle()),
        ("!!!", dockerfile_bundle()),
        ("Demo App", Bundle::new(Vec::new())),
    ] {
        let err = orchestrator.submit(request(name, bundle)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)), "{:?}", err);
    }

    assert!(registry.applications().is_empty());
    assert!(orchestrator.hub().is_empty());
}

#[tokio::test]
async fn test_registry_failure_rejects_request() {
    let workspace = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(
        ScriptedEngine::new(),
        FlakyRegistry::failing_applications(),
        workspace.path(),
    );

    let err = orchestrator
        .submit(request("Demo App", dockerfile_bundle()))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Registry(_)));

    // the key is free again and no room lingers
    assert!(!orchestrator.hub().contains("demo-app"));
    assert!(orchestrator.active_builds().is_empty());
    assert!(orchestrator.status("demo-app").is_none());
}

#[tokio::test]
async fn test_shutdown_cancels_running_builds() {
    let workspace = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::new();
    let orchestrator = orchestrator(engine.clone(), Arc::new(MemoryRegistry::new()), workspace.path());
    let build = engine.live();

    orchestrator.submit(request("Slow App", dockerfile_bundle())).await.unwrap();
    build.send(log("Step 1/9 : FROM ubuntu")).unwrap();
    wait_for_lines(orchestrator.hub(), "slow-app", 1).await;
    let observer = orchestrator.hub().join("slow-app").unwrap();

    let contexts = engine.contexts();
    assert_eq!(contexts.len(), 1);
    assert!(contexts[0].0.exists());

    orchestrator.shutdown(Duration::from_millis(50)).await;

    let observed = drain(observer).await;
    assert_eq!(observed.snapshot, vec!["Step 1/9 : FROM ubuntu"]);
    assert!(matches!(observed.outcome, Some(DeployOutcome::Cancelled { .. })));

    let snapshot = orchestrator.status("slow-app").unwrap();
    assert_eq!(snapshot.state, DeploymentState::Released);
    assert!(matches!(snapshot.outcome, Some(DeployOutcome::Cancelled { .. })));
    assert!(!contexts[0].0.exists());
    assert!(!orchestrator.hub().contains("slow-app"));

    // no new work once shut down
    let err = orchestrator
        .submit(request("Other", dockerfile_bundle()))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ShuttingDown));
}

#[tokio::test]
async fn test_shutdown_waits_for_builds_that_finish_in_time() {
    let workspace = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::new();
    let orchestrator = orchestrator(engine.clone(), Arc::new(MemoryRegistry::new()), workspace.path());
    let build = engine.live();

    orchestrator.submit(request("app", dockerfile_bundle())).await.unwrap();
    let finisher = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        build
            .send(EngineEvent::Succeeded {
                image: "app".to_string(),
            })
            .unwrap();
    });

    orchestrator.shutdown(Duration::from_secs(5)).await;
    finisher.await.unwrap();

    let snapshot = orchestrator.status("app").unwrap();
    assert!(matches!(snapshot.outcome, Some(DeployOutcome::Succeeded { .. })));
}

#[tokio::test]
async fn test_history_lists_finished_builds() {
    let workspace = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::new();
    let orchestrator = orchestrator(engine.clone(), Arc::new(MemoryRegistry::new()), workspace.path());

    for name in ["one", "two"] {
        engine.script(vec![EngineEvent::Failed {
            detail: "no Dockerfile".to_string(),
        }]);
        orchestrator.submit(request(name, dockerfile_bundle())).await.unwrap();
        orchestrator.wait(name).await.unwrap();
    }

    let keys: Vec<String> = orchestrator.history().into_iter().map(|s| s.key).collect();
    assert_eq!(keys, vec!["two", "one"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_during_extraction_leaves_no_workdir() {
    let workspace = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::new();
    let orchestrator = orchestrator(engine.clone(), Arc::new(MemoryRegistry::new()), workspace.path());
    let _build = engine.live();

    let names: Vec<String> = (0..5000).map(|i| format!("src/file{}.txt", i)).collect();
    let mut entries: Vec<(&str, &str)> = names.iter().map(|name| (name.as_str(), "x")).collect();
    entries.push(("Dockerfile", "FROM scratch\n"));

    orchestrator.submit(request("Big App", bundle(&entries))).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while std::fs::read_dir(workspace.path()).unwrap().next().is_none() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("extraction never started");

    orchestrator.shutdown(Duration::ZERO).await;

    tokio::time::timeout(Duration::from_secs(10), async {
        while std::fs::read_dir(workspace.path()).unwrap().next().is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("working directory leaked");

    let snapshot = orchestrator.status("big-app").unwrap();
    assert_eq!(snapshot.state, DeploymentState::Released);
    assert!(matches!(snapshot.outcome, Some(DeployOutcome::Cancelled { .. })));
}

#[test]
fn test_submit_on_stopped_runtime_concludes_build() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let handle = runtime.handle().clone();
    // tasks spawned from here on are dropped without running
    drop(runtime);

    let workspace = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(
        ScriptedEngine::new(),
        Arc::new(MemoryRegistry::new()),
        workspace.path(),
    );

    let (tx, rx) = std::sync::mpsc::channel();
    let submitter = orchestrator.clone();
    std::thread::spawn(move || {
        let result = handle.block_on(submitter.submit(request("Demo App", dockerfile_bundle())));
        let _ = tx.send(result.map(|ticket| ticket.key));
    });
    let key = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("submit never returned")
        .unwrap();

    let snapshot = orchestrator.status(&key).unwrap();
    assert_eq!(snapshot.state, DeploymentState::Released);
    assert!(matches!(snapshot.outcome, Some(DeployOutcome::Cancelled { .. })));
    assert!(orchestrator.active_builds().is_empty());
    assert!(!orchestrator.hub().contains(&key));
}
