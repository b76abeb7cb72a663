//! Shared fixtures: a scripted build engine, zip bundles and registries that
//! fail on demand

use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, Notify};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use deployd::broadcast::{LogHub, RoomEvent, Subscription};
use deployd::build::Bundle;
use deployd::deploy::engine::{BuildEngine, EngineEvent, EngineStream};
use deployd::deploy::orchestrator::{Orchestrator, PipelineOptions};
use deployd::errors::{EngineError, RegistryError};
use deployd::filesys::dir::Dir;
use deployd::models::application::{Application, Service};
use deployd::models::build::DeployOutcome;
use deployd::registry::memory::MemoryRegistry;
use deployd::registry::Registry;

/// A zip bundle holding `entries`
pub fn bundle(entries: &[(&str, &str)]) -> Bundle {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    Bundle::new(writer.finish().unwrap().into_inner())
}

pub fn dockerfile_bundle() -> Bundle {
    bundle(&[("Dockerfile", "FROM scratch\nCOPY app /app\n"), ("app/main.py", "print('hi')\n")])
}

/// Build engine whose output is fed by the test. Like a swarm it keeps one
/// service per name; creating an existing name updates that service.
pub struct ScriptedEngine {
    builds: Mutex<VecDeque<mpsc::UnboundedReceiver<EngineEvent>>>,
    service: Result<String, String>,
    contexts: Mutex<Vec<(PathBuf, bool)>>,
    services: Mutex<Vec<(String, String)>>,
    by_name: Mutex<HashMap<String, String>>,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Self::with_service(Ok("svc-1".to_string()))
    }

    pub fn with_service(service: Result<String, String>) -> Arc<Self> {
        Arc::new(Self {
            builds: Mutex::new(VecDeque::new()),
            service,
            contexts: Mutex::new(Vec::new()),
            services: Mutex::new(Vec::new()),
            by_name: Mutex::new(HashMap::new()),
        })
    }

    /// Queue a build whose events are sent through the returned sender
    pub fn live(&self) -> mpsc::UnboundedSender<EngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.builds.lock().unwrap().push_back(rx);
        tx
    }

    /// Queue a build that emits `events` and ends
    pub fn script(&self, events: Vec<EngineEvent>) {
        let tx = self.live();
        for event in events {
            tx.send(event).unwrap();
        }
    }

    /// Build contexts handed to the engine, and whether they held a Dockerfile
    pub fn contexts(&self) -> Vec<(PathBuf, bool)> {
        self.contexts.lock().unwrap().clone()
    }

    /// (image, name) of every service creation attempt
    pub fn services(&self) -> Vec<(String, String)> {
        self.services.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildEngine for ScriptedEngine {
    async fn build_image(&self, context: &Path, _tag: &str) -> Result<EngineStream, EngineError> {
        self.contexts
            .lock()
            .unwrap()
            .push((context.to_path_buf(), context.join("Dockerfile").exists()));

        let rx = self
            .builds
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| EngineError::UnexpectedOutput("no build scripted".to_string()))?;

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }

    async fn create_service(&self, image: &str, name: &str) -> Result<String, EngineError> {
        self.services
            .lock()
            .unwrap()
            .push((image.to_string(), name.to_string()));
        let mut by_name = self.by_name.lock().unwrap();
        if let Some(existing) = by_name.get(name) {
            return Ok(existing.clone());
        }
        let service_id = self.service.clone().map_err(|stderr| EngineError::CommandFailed {
            command: "docker service create".to_string(),
            status: "exit status: 1".to_string(),
            stderr,
        })?;
        by_name.insert(name.to_string(), service_id.clone());
        Ok(service_id)
    }
}

/// Registry wrapper that fails selected calls
pub struct FlakyRegistry {
    pub inner: MemoryRegistry,
    pub fail_applications: bool,
    pub fail_services: bool,
}

impl FlakyRegistry {
    pub fn failing_services() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryRegistry::new(),
            fail_applications: false,
            fail_services: true,
        })
    }

    pub fn failing_applications() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryRegistry::new(),
            fail_applications: true,
            fail_services: false,
        })
    }
}

#[async_trait]
impl Registry for FlakyRegistry {
    async fn create_application(&self, name: &str, slug: &str) -> Result<Application, RegistryError> {
        if self.fail_applications {
            return Err(RegistryError::Status {
                status: 503,
                body: "registry down".to_string(),
            });
        }
        self.inner.create_application(name, slug).await
    }

    async fn get_application(&self, slug: &str) -> Result<Application, RegistryError> {
        self.inner.get_application(slug).await
    }

    async fn create_service(
        &self,
        service_id: &str,
        application_id: &str,
    ) -> Result<Service, RegistryError> {
        if self.fail_services {
            return Err(RegistryError::Status {
                status: 500,
                body: "database is locked".to_string(),
            });
        }
        self.inner.create_service(service_id, application_id).await
    }
}

/// Registry whose `create_application` holds until the test lets it go
#[derive(Default)]
pub struct ParkedRegistry {
    pub inner: MemoryRegistry,
    pub entered: Notify,
    pub gate: Notify,
}

#[async_trait]
impl Registry for ParkedRegistry {
    async fn create_application(&self, name: &str, slug: &str) -> Result<Application, RegistryError> {
        self.entered.notify_one();
        self.gate.notified().await;
        self.inner.create_application(name, slug).await
    }

    async fn get_application(&self, slug: &str) -> Result<Application, RegistryError> {
        self.inner.get_application(slug).await
    }

    async fn create_service(
        &self,
        service_id: &str,
        application_id: &str,
    ) -> Result<Service, RegistryError> {
        self.inner.create_service(service_id, application_id).await
    }
}

pub fn orchestrator(
    engine: Arc<dyn BuildEngine>,
    registry: Arc<dyn Registry>,
    workspace: &Path,
) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(
        Arc::new(LogHub::default()),
        engine,
        registry,
        PipelineOptions {
            workspace: Dir::new(workspace),
            max_extracted_bytes: 1024 * 1024,
            history_capacity: 10,
        },
    ))
}

/// Wait until the room for `key` holds at least `count` lines
pub async fn wait_for_lines(hub: &LogHub, key: &str, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok((lines, _)) = hub.snapshot(key) {
                if lines.len() >= count {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("lines never arrived");
}

/// Drain a subscription: snapshot text, live line text, error texts and the
/// outcome if one arrived
pub struct Drained {
    pub snapshot: Vec<String>,
    pub live: Vec<String>,
    pub errors: Vec<String>,
    pub outcome: Option<DeployOutcome>,
}

pub async fn drain(mut subscription: Subscription) -> Drained {
    let snapshot = subscription
        .take_snapshot()
        .into_iter()
        .map(|line| line.text)
        .collect();
    let mut drained = Drained {
        snapshot,
        live: Vec::new(),
        errors: Vec::new(),
        outcome: None,
    };

    let receive = async {
        while let Some(event) = subscription.recv().await {
            match event {
                RoomEvent::Lines(lines) => drained.live.extend(lines.into_iter().map(|l| l.text)),
                RoomEvent::Error(text) => drained.errors.push(text),
                RoomEvent::Finished(outcome) => {
                    drained.outcome = Some(outcome);
                    break;
                }
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), receive)
        .await
        .expect("subscription never ended");
    drained
}
