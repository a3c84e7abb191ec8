//! Fleet operations over a provider and a remote executor.
//!
//! Every operation takes one directory snapshot up front and works against
//! it; nothing is cached between calls.

pub mod dispatch;
pub mod naming;
pub mod report;
pub mod resolve;

use std::sync::Arc;

use crate::exec::SshCredentials;
use crate::provider::{CloudBox, Image, Provider, ProviderError, SpawnRequest};

pub use dispatch::{DispatchReport, Dispatcher};
pub use report::BatchReport;
pub use resolve::resolve;

#[derive(thiserror::Error, Debug)]
pub enum FleetError {
    #[error("box not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub type DeleteReport = BatchReport<(), ProviderError>;

/// Provider settings applied to every box in a spawn.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub image: String,
    pub region: String,
    pub size: String,
    pub ssh_fingerprint: String,
    pub tags: Vec<String>,
}

pub struct FleetService {
    provider: Arc<dyn Provider>,
    dispatcher: Dispatcher,
}

impl FleetService {
    pub fn new(provider: Arc<dyn Provider>, dispatcher: Dispatcher) -> Self {
        Self {
            provider,
            dispatcher,
        }
    }

    pub async fn list_boxes(&self) -> Result<Vec<CloudBox>, FleetError> {
        Ok(self.provider.list_boxes().await?)
    }

    pub async fn get_fleet(&self, name: &str) -> Result<Vec<CloudBox>, FleetError> {
        let boxes = self.provider.list_boxes().await?;
        Ok(naming::fleet_members(name, &boxes))
    }

    pub async fn get_box(&self, name: &str) -> Result<CloudBox, FleetError> {
        let boxes = self.provider.list_boxes().await?;
        boxes
            .into_iter()
            .find(|b| b.label == name)
            .ok_or_else(|| FleetError::NotFound(name.to_string()))
    }

    /// Add `count` boxes to fleet `name`, returning the names requested.
    pub async fn spawn_fleet(
        &self,
        name: &str,
        count: usize,
        opts: SpawnOptions,
    ) -> Result<Vec<String>, FleetError> {
        let existing = self.get_fleet(name).await?;
        let names = naming::compute_new_names(name, count, &existing);

        tracing::info!(
            fleet = %name,
            existing = existing.len(),
            count,
            "spawning fleet members"
        );

        self.provider
            .spawn_boxes(SpawnRequest {
                names: names.clone(),
                region: opts.region,
                size: opts.size,
                image: opts.image,
                ssh_fingerprint: opts.ssh_fingerprint,
                tags: opts.tags,
            })
            .await?;

        Ok(names)
    }

    /// Delete what `name` resolves to: one box on an exact match, otherwise
    /// the whole fleet. Individual failures are collected, not fatal.
    pub async fn delete_fleet(&self, name: &str) -> Result<DeleteReport, FleetError> {
        let boxes = self.provider.list_boxes().await?;
        let target = resolve(name, &boxes);

        if target.is_empty() {
            tracing::info!(fleet = %name, "nothing matched, nothing to delete");
            return Ok(DeleteReport::default());
        }
        tracing::info!(fleet = %name, matched = target.len(), "deleting");

        let mut report = DeleteReport::default();
        for cloud_box in target.into_boxes() {
            let result = self.provider.delete_box(&cloud_box.id).await;
            if let Err(e) = &result {
                tracing::warn!(
                    box_label = %cloud_box.label,
                    box_id = %cloud_box.id,
                    error = %e,
                    "delete failed"
                );
            }
            report.push(cloud_box, result);
        }
        Ok(report)
    }

    /// Run `command` on what `name` resolves to and wait for every box.
    pub async fn run_command(
        &self,
        name: &str,
        command: &str,
        creds: &SshCredentials,
    ) -> Result<DispatchReport, FleetError> {
        let boxes = self.provider.list_boxes().await?;
        let target = resolve(name, &boxes);
        if target.is_empty() {
            tracing::info!(fleet = %name, "nothing matched, no command sent");
        }
        Ok(self.dispatcher.dispatch(target, command, creds).await)
    }

    pub async fn list_images(&self) -> Result<Vec<Image>, FleetError> {
        Ok(self.provider.list_images().await?)
    }

    /// Snapshot the box labelled exactly `box_name` into image `label`.
    pub async fn create_image(&self, box_name: &str, label: &str) -> Result<(), FleetError> {
        let cloud_box = self.get_box(box_name).await?;
        self.provider.snapshot(&cloud_box.id, label).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use crate::exec::{ExecError, ExecOutput, RemoteExecutor, SshTarget};

    struct MockProvider {
        boxes: StdMutex<Vec<CloudBox>>,
        list_calls: StdMutex<usize>,
        spawned: StdMutex<Vec<SpawnRequest>>,
        deleted: StdMutex<Vec<String>>,
        snapshots: StdMutex<Vec<(String, String)>>,
        fail_delete_id: Option<String>,
    }

    impl MockProvider {
        fn new(labels: &[&str]) -> Self {
            let boxes = labels
                .iter()
                .enumerate()
                .map(|(i, l)| CloudBox {
                    id: format!("{}", 1000 + i),
                    label: l.to_string(),
                    group: String::new(),
                    status: "active".into(),
                    ip: format!("10.1.0.{}", i + 1),
                })
                .collect();
            Self {
                boxes: StdMutex::new(boxes),
                list_calls: StdMutex::new(0),
                spawned: StdMutex::new(Vec::new()),
                deleted: StdMutex::new(Vec::new()),
                snapshots: StdMutex::new(Vec::new()),
                fail_delete_id: None,
            }
        }

        fn deleted_labels(&self) -> Vec<String> {
            let boxes = self.boxes.lock().unwrap();
            let mut labels: Vec<String> = self
                .deleted
                .lock()
                .unwrap()
                .iter()
                .filter_map(|id| boxes.iter().find(|b| &b.id == id).map(|b| b.label.clone()))
                .collect();
            labels.sort();
            labels
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        async fn list_boxes(&self) -> Result<Vec<CloudBox>, ProviderError> {
            *self.list_calls.lock().unwrap() += 1;
            Ok(self.boxes.lock().unwrap().clone())
        }
        async fn spawn_boxes(&self, req: SpawnRequest) -> Result<(), ProviderError> {
            self.spawned.lock().unwrap().push(req);
            Ok(())
        }
        async fn delete_box(&self, id: &str) -> Result<(), ProviderError> {
            if self.fail_delete_id.as_deref() == Some(id) {
                return Err(ProviderError::Api {
                    status: 500,
                    body: "internal".into(),
                });
            }
            self.deleted.lock().unwrap().push(id.to_string());
            Ok(())
        }
        async fn snapshot(&self, box_id: &str, label: &str) -> Result<(), ProviderError> {
            self.snapshots
                .lock()
                .unwrap()
                .push((box_id.to_string(), label.to_string()));
            Ok(())
        }
        async fn list_images(&self) -> Result<Vec<Image>, ProviderError> {
            Ok(vec![Image {
                id: "42".into(),
                name: "base".into(),
                status: "available".into(),
                size_gigabytes: 2.5,
            }])
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl Provider for FailingProvider {
        async fn list_boxes(&self) -> Result<Vec<CloudBox>, ProviderError> {
            Err(ProviderError::Api {
                status: 401,
                body: "unauthorized".into(),
            })
        }
        async fn spawn_boxes(&self, _req: SpawnRequest) -> Result<(), ProviderError> {
            unreachable!("spawn must not run after a failed listing")
        }
        async fn delete_box(&self, _id: &str) -> Result<(), ProviderError> {
            unreachable!("delete must not run after a failed listing")
        }
        async fn snapshot(&self, _box_id: &str, _label: &str) -> Result<(), ProviderError> {
            unreachable!()
        }
        async fn list_images(&self) -> Result<Vec<Image>, ProviderError> {
            Ok(vec![])
        }
    }

    struct RecordingExecutor {
        ips: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteExecutor for RecordingExecutor {
        async fn run_command(
            &self,
            _command: &str,
            target: &SshTarget,
        ) -> Result<ExecOutput, ExecError> {
            self.ips.lock().unwrap().push(target.address.clone());
            Ok(ExecOutput::default())
        }
    }

    fn service(provider: Arc<dyn Provider>) -> (FleetService, Arc<RecordingExecutor>) {
        let exec = Arc::new(RecordingExecutor {
            ips: StdMutex::new(Vec::new()),
        });
        let dispatcher = Dispatcher::new(exec.clone(), None);
        (FleetService::new(provider, dispatcher), exec)
    }

    fn creds() -> SshCredentials {
        SshCredentials {
            port: 22,
            username: "op".into(),
            password: None,
        }
    }

    #[tokio::test]
    async fn spawn_continues_numbering() {
        let provider = Arc::new(MockProvider::new(&["web-1", "web-2", "db-1"]));
        let (svc, _) = service(provider.clone());

        let names = svc
            .spawn_fleet(
                "web",
                2,
                SpawnOptions {
                    image: "ubuntu-22-04-x64".into(),
                    region: "nyc1".into(),
                    size: "s-1vcpu-1gb".into(),
                    ssh_fingerprint: "fp".into(),
                    tags: vec!["t".into()],
                },
            )
            .await
            .unwrap();

        assert_eq!(names, vec!["web-3", "web-4"]);
        let spawned = provider.spawned.lock().unwrap();
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].names, names);
        assert_eq!(spawned[0].region, "nyc1");
        assert_eq!(spawned[0].tags, vec!["t"]);
    }

    #[tokio::test]
    async fn get_box_unknown_is_not_found() {
        let (svc, _) = service(Arc::new(MockProvider::new(&["bot-1"])));
        let err = svc.get_box("bot").await.unwrap_err();
        assert!(matches!(err, FleetError::NotFound(ref n) if n == "bot"));
        assert_eq!(svc.get_box("bot-1").await.unwrap().label, "bot-1");
    }

    #[tokio::test]
    async fn get_fleet_is_idempotent() {
        let (svc, _) = service(Arc::new(MockProvider::new(&["bot-1", "bot-2", "x"])));
        let first = svc.get_fleet("bot").await.unwrap();
        let second = svc.get_fleet("bot").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn delete_exact_match_spares_fleet() {
        let provider = Arc::new(MockProvider::new(&["api", "api-1", "api-2"]));
        let (svc, _) = service(provider.clone());

        let report = svc.delete_fleet("api").await.unwrap();

        assert_eq!(report.len(), 1);
        assert_eq!(provider.deleted_labels(), vec!["api"]);
    }

    #[tokio::test]
    async fn delete_prefix_removes_whole_fleet() {
        let provider = Arc::new(MockProvider::new(&["api-1", "api-2", "web-1"]));
        let (svc, _) = service(provider.clone());

        let report = svc.delete_fleet("api").await.unwrap();

        assert!(report.is_success());
        assert_eq!(provider.deleted_labels(), vec!["api-1", "api-2"]);
    }

    #[tokio::test]
    async fn delete_unknown_is_noop() {
        let provider = Arc::new(MockProvider::new(&["api-1"]));
        let (svc, _) = service(provider.clone());

        let report = svc.delete_fleet("ghost").await.unwrap();

        assert!(report.is_empty());
        assert!(provider.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_continues_past_failures() {
        let mut mock = MockProvider::new(&["api-1", "api-2", "api-3"]);
        mock.fail_delete_id = Some("1001".into());
        let provider = Arc::new(mock);
        let (svc, _) = service(provider.clone());

        let report = svc.delete_fleet("api").await.unwrap();

        assert_eq!(report.len(), 3);
        assert_eq!(report.failure_count(), 1);
        assert_eq!(provider.deleted_labels(), vec!["api-1", "api-3"]);
    }

    #[tokio::test]
    async fn delete_and_dispatch_agree() {
        let provider = Arc::new(MockProvider::new(&["api", "api-1", "api-2"]));
        let (svc, exec) = service(provider.clone());

        let run = svc.run_command("api", "uptime", &creds()).await.unwrap();
        let del = svc.delete_fleet("api").await.unwrap();

        let ran: Vec<_> = run.outcomes.iter().map(|o| o.target.label.clone()).collect();
        let removed: Vec<_> = del.outcomes.iter().map(|o| o.target.label.clone()).collect();
        assert_eq!(ran, removed);
        assert_eq!(*exec.ips.lock().unwrap(), vec!["10.1.0.1"]);
    }

    #[tokio::test]
    async fn run_command_on_fleet_uses_one_listing() {
        let provider = Arc::new(MockProvider::new(&["bot-1", "bot-2", "bot-3"]));
        let (svc, exec) = service(provider.clone());

        let report = svc.run_command("bot", "uptime", &creds()).await.unwrap();

        assert_eq!(report.len(), 3);
        assert_eq!(*provider.list_calls.lock().unwrap(), 1);
        let mut ips = exec.ips.lock().unwrap().clone();
        ips.sort();
        assert_eq!(ips, vec!["10.1.0.1", "10.1.0.2", "10.1.0.3"]);
    }

    #[tokio::test]
    async fn run_command_unknown_fleet_is_empty() {
        let (svc, exec) = service(Arc::new(MockProvider::new(&["bot-1"])));
        let report = svc.run_command("ghost", "uptime", &creds()).await.unwrap();
        assert!(report.is_empty());
        assert!(exec.ips.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_is_returned_not_fatal() {
        let (svc, _) = service(Arc::new(FailingProvider));
        let err = svc.delete_fleet("api").await.unwrap_err();
        assert!(matches!(err, FleetError::Provider(ProviderError::Api { status: 401, .. })));
        assert!(svc.run_command("api", "id", &creds()).await.is_err());
        assert!(svc.spawn_fleet("api", 1, SpawnOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn create_image_snapshots_exact_box() {
        let provider = Arc::new(MockProvider::new(&["scanner", "scanner-1"]));
        let (svc, _) = service(provider.clone());

        svc.create_image("scanner", "nightly").await.unwrap();
        assert_eq!(
            *provider.snapshots.lock().unwrap(),
            vec![("1000".to_string(), "nightly".to_string())]
        );

        let err = svc.create_image("ghost", "x").await.unwrap_err();
        assert!(matches!(err, FleetError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_images_passes_through() {
        let (svc, _) = service(Arc::new(MockProvider::new(&[])));
        let images = svc.list_images().await.unwrap();
        assert_eq!(images[0].name, "base");
    }
}
