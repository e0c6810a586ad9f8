//! Provisioning orchestrator - admission and dispatch for guest import and
//! creation.
//!
//! Per guest: `Idle --admit--> Preparing --dispatch--> Running --complete-->
//! Terminal --release--> Idle`. Validation failures return synchronously and
//! never touch the registry; failures inside dispatched work are reported as
//! [`TaskResult`]s and always release the guest.

use std::sync::Arc;

use a3s_guest_core::config::GuestConfig;
use a3s_guest_core::error::{GuestError, Result};
use a3s_guest_core::event::{events, EventEmitter, EventStream, GuestEvent};
use a3s_guest_core::request::{
    self, EsxiCreateConfig, GuestId, ImportConfig, LibvirtCreateConfig, LibvirtImportConfig,
    LibvirtServer,
};
use a3s_guest_core::task::{RequestContext, TaskResult};
use a3s_guest_core::validate;
use async_trait::async_trait;
use serde_json::json;

use crate::dispatcher::{Finalizer, Task, TaskDispatcher, TaskTicket};
use crate::provisioner::GuestProvisioner;
use crate::registry::{Admission, AdmissionGuard, GuestRegistry, GuestState};

/// Guest provisioning orchestrator.
pub struct ProvisioningOrchestrator {
    registry: Arc<GuestRegistry>,
    dispatcher: TaskDispatcher,
    provisioner: Arc<dyn GuestProvisioner>,
    event_emitter: EventEmitter,
}

impl ProvisioningOrchestrator {
    /// Assemble an orchestrator from explicitly owned parts.
    pub fn new(
        registry: Arc<GuestRegistry>,
        dispatcher: TaskDispatcher,
        provisioner: Arc<dyn GuestProvisioner>,
    ) -> Self {
        let event_emitter = dispatcher.event_emitter().clone();
        Self {
            registry,
            dispatcher,
            provisioner,
            event_emitter,
        }
    }

    /// Build a fresh registry, event channel and dispatcher from `config`.
    pub fn from_config(config: &GuestConfig, provisioner: Arc<dyn GuestProvisioner>) -> Self {
        let event_emitter = EventEmitter::new(config.event_capacity);
        let dispatcher = TaskDispatcher::new(&config.dispatcher, event_emitter);
        Self::new(Arc::new(GuestRegistry::new()), dispatcher, provisioner)
    }

    pub fn registry(&self) -> &Arc<GuestRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &TaskDispatcher {
        &self.dispatcher
    }

    /// Current provisioning state of a guest.
    pub fn guest_state(&self, guest_id: &str) -> GuestState {
        self.registry.state(guest_id)
    }

    /// Subscribe to every event.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<GuestEvent> {
        self.event_emitter.subscribe()
    }

    /// Subscribe to the events of one guest.
    pub fn subscribe_guest(&self, guest_id: &str) -> EventStream {
        self.event_emitter.subscribe_guest(guest_id)
    }

    /// Validate a libvirt import and dispatch it.
    ///
    /// No admission happens here; each listed server is admitted individually
    /// once the dispatched work reaches it, and servers already being
    /// provisioned are skipped.
    pub fn prepare_import_from_libvirt(
        &self,
        ctx: RequestContext,
        config: LibvirtImportConfig,
    ) -> Result<TaskTicket> {
        validate::validate_libvirt_import(&config)?;
        Ok(self.submit_import(ctx, config))
    }

    /// Admit a creation for `guest_id`.
    ///
    /// Fails with `Conflict` while another operation holds the guest. The
    /// returned admission is what `guest_create_*` dispatches on.
    pub fn prepare_create(&self, guest_id: &str) -> Result<Admission> {
        let admission = self.registry.admit(guest_id)?;
        self.event_emitter
            .emit(GuestEvent::empty(events::GUEST_ADMITTED).for_guest(guest_id));
        Ok(admission)
    }

    /// Give up an admission obtained by `prepare_create` that was never
    /// dispatched.
    pub fn abort_prepare(&self, admission: &Admission) -> bool {
        let abandoned = self.registry.abandon(admission);
        if abandoned {
            let guest_id = admission.guest_id();
            tracing::info!(guest_id, "Prepared creation aborted");
            self.event_emitter
                .emit(GuestEvent::empty(events::GUEST_RELEASED).for_guest(guest_id));
        }
        abandoned
    }

    /// Dispatch creation of a prepared guest from a libvirt descriptor.
    pub fn guest_create_from_libvirt(
        &self,
        ctx: RequestContext,
        admission: &Admission,
        config: LibvirtCreateConfig,
    ) -> Result<TaskTicket> {
        validate::validate_libvirt_create(&config)?;
        self.dispatch_create(ctx, admission, CreateSource::Libvirt(config))
    }

    /// Dispatch creation of a prepared guest from an ESXi export.
    pub fn guest_create_from_esxi(
        &self,
        ctx: RequestContext,
        admission: &Admission,
        config: EsxiCreateConfig,
    ) -> Result<TaskTicket> {
        validate::validate_esxi_create(&config)?;
        self.dispatch_create(ctx, admission, CreateSource::Esxi(config))
    }

    /// Validate a decoded request, then admit and dispatch it.
    ///
    /// Creation requests need `guest_id`. Validation runs before admission,
    /// so a rejected request leaves no registry entry behind.
    pub fn submit_request(
        &self,
        ctx: RequestContext,
        guest_id: Option<&str>,
        config: ImportConfig,
    ) -> Result<TaskTicket> {
        validate::validate(&config)?;
        tracing::debug!(kind = config.kind(), ?guest_id, "Request validated");

        let (guest_id, source) = match (config, guest_id) {
            (ImportConfig::LibvirtImport(config), _) => {
                return Ok(self.submit_import(ctx, config));
            }
            (ImportConfig::LibvirtCreate(config), Some(id)) => (id, CreateSource::Libvirt(config)),
            (ImportConfig::EsxiCreate(config), Some(id)) => (id, CreateSource::Esxi(config)),
            (_, None) => return Err(GuestError::missing("guest_id")),
        };
        let admission = self.prepare_create(guest_id)?;
        self.dispatch_create(ctx, &admission, source).inspect_err(|_| {
            self.abort_prepare(&admission);
        })
    }

    /// Decode, validate and dispatch a raw libvirt import body.
    pub fn handle_import_from_libvirt(
        &self,
        ctx: RequestContext,
        body: &serde_json::Value,
    ) -> Result<TaskTicket> {
        let config = request::decode_libvirt_import(body)?;
        self.submit_request(ctx, None, config.into())
    }

    /// Decode, validate, admit and dispatch a raw libvirt create body.
    pub fn handle_create_from_libvirt(
        &self,
        ctx: RequestContext,
        guest_id: &str,
        body: &serde_json::Value,
    ) -> Result<TaskTicket> {
        let config = request::decode_libvirt_create(body)?;
        self.submit_request(ctx, Some(guest_id), config.into())
    }

    /// Decode, validate, admit and dispatch a raw ESXi create body.
    pub fn handle_create_from_esxi(
        &self,
        ctx: RequestContext,
        guest_id: &str,
        body: &serde_json::Value,
    ) -> Result<TaskTicket> {
        let config = request::decode_esxi_create(body)?;
        self.submit_request(ctx, Some(guest_id), config.into())
    }

    fn submit_import(&self, ctx: RequestContext, config: LibvirtImportConfig) -> TaskTicket {
        tracing::info!(
            xml_file_path = %config.xml_file_path,
            servers = config.servers.len(),
            "Dispatching libvirt import"
        );
        let task = ImportFromLibvirtTask {
            config,
            registry: Arc::clone(&self.registry),
            provisioner: Arc::clone(&self.provisioner),
            event_emitter: self.event_emitter.clone(),
        };
        self.dispatcher.submit(ctx, Box::new(task), None)
    }

    fn dispatch_create(
        &self,
        ctx: RequestContext,
        admission: &Admission,
        source: CreateSource,
    ) -> Result<TaskTicket> {
        self.registry.mark_running(admission)?;
        let guest_id = admission.guest_id();
        tracing::info!(guest_id, source = source.kind(), "Dispatching guest creation");

        let task = CreateTask {
            guest_id: guest_id.to_string(),
            source,
            provisioner: Arc::clone(&self.provisioner),
            event_emitter: self.event_emitter.clone(),
        };
        let guard = AdmissionGuard::new(Arc::clone(&self.registry), admission.duplicate());
        let finalizer = release_finalizer(
            Arc::clone(&self.registry),
            self.event_emitter.clone(),
            guard,
        );
        Ok(self.dispatcher.submit(ctx, Box::new(task), Some(finalizer)))
    }
}

/// Record the outcome, release the guest, then publish the terminal event.
///
/// Release precedes publication so an observer of the outcome can
/// immediately prepare the guest again.
fn release_finalizer(
    registry: Arc<GuestRegistry>,
    event_emitter: EventEmitter,
    guard: AdmissionGuard,
) -> Finalizer {
    Box::new(move |result: &TaskResult| {
        let guest_id = guard.guest_id().to_string();
        if let Err(e) = registry.mark_result(&guest_id, result) {
            tracing::error!(guest_id = %guest_id, error = %e, "Failed to record task result");
        }
        guard.release();

        let key = match result {
            TaskResult::Success { .. } => events::GUEST_CREATE_SUCCEEDED,
            TaskResult::Failure { .. } => events::GUEST_CREATE_FAILED,
            TaskResult::Cancelled { .. } => events::GUEST_CREATE_CANCELLED,
        };
        event_emitter.emit(GuestEvent::with_result(key, result.clone()).for_guest(&guest_id));
    })
}

enum CreateSource {
    Libvirt(LibvirtCreateConfig),
    Esxi(EsxiCreateConfig),
}

impl CreateSource {
    fn kind(&self) -> &'static str {
        match self {
            Self::Libvirt(_) => "libvirt",
            Self::Esxi(_) => "esxi",
        }
    }
}

/// Creation of one prepared guest.
struct CreateTask {
    guest_id: GuestId,
    source: CreateSource,
    provisioner: Arc<dyn GuestProvisioner>,
    event_emitter: EventEmitter,
}

#[async_trait]
impl Task for CreateTask {
    async fn execute(&self, _ctx: &RequestContext) -> Result<serde_json::Value> {
        self.event_emitter.emit(
            GuestEvent::with_string(events::GUEST_CREATE_STARTED, self.source.kind())
                .for_guest(&self.guest_id),
        );
        match &self.source {
            CreateSource::Libvirt(config) => {
                self.provisioner
                    .create_from_libvirt(&self.guest_id, config)
                    .await
            }
            CreateSource::Esxi(config) => {
                self.provisioner.create_from_esxi(&self.guest_id, config).await
            }
        }
    }

    fn task_type(&self) -> &str {
        match self.source {
            CreateSource::Libvirt(_) => "guest_create_from_libvirt",
            CreateSource::Esxi(_) => "guest_create_from_esxi",
        }
    }

    fn guest_id(&self) -> Option<&str> {
        Some(&self.guest_id)
    }
}

/// Import of every server listed in a libvirt dump.
struct ImportFromLibvirtTask {
    config: LibvirtImportConfig,
    registry: Arc<GuestRegistry>,
    provisioner: Arc<dyn GuestProvisioner>,
    event_emitter: EventEmitter,
}

impl ImportFromLibvirtTask {
    async fn import_server(&self, guard: &AdmissionGuard, server: &LibvirtServer) -> TaskResult {
        let guest_id = guard.guest_id();
        if let Err(e) = self.registry.mark_running(guard.admission()) {
            return TaskResult::failure(e.kind(), e.to_string());
        }
        self.event_emitter
            .emit(GuestEvent::empty(events::GUEST_IMPORT_STARTED).for_guest(guest_id));

        let result: TaskResult = self
            .provisioner
            .import_libvirt_server(&self.config, server)
            .await
            .into();

        if let Err(e) = self.registry.mark_result(guest_id, &result) {
            tracing::error!(guest_id, error = %e, "Failed to record import result");
        }
        result
    }
}

#[async_trait]
impl Task for ImportFromLibvirtTask {
    async fn execute(&self, ctx: &RequestContext) -> Result<serde_json::Value> {
        let mut imported = Vec::new();
        let mut failed = Vec::new();
        let mut skipped = Vec::new();

        for server in &self.config.servers {
            if let Some(reason) = ctx.cancel_reason() {
                skipped.push(json!({"uuid": server.uuid, "reason": reason}));
                continue;
            }

            let guard = match AdmissionGuard::admit(Arc::clone(&self.registry), &server.uuid) {
                Ok(guard) => guard,
                Err(e) => {
                    tracing::warn!(guest_id = %server.uuid, error = %e, "Skipping server import");
                    self.event_emitter.emit(
                        GuestEvent::with_string(events::GUEST_IMPORT_SKIPPED, e.to_string())
                            .for_guest(&server.uuid),
                    );
                    skipped.push(json!({"uuid": server.uuid, "reason": e.to_string()}));
                    continue;
                }
            };

            let result = self.import_server(&guard, server).await;
            guard.release();

            let key = if result.is_success() {
                events::GUEST_IMPORT_SUCCEEDED
            } else {
                events::GUEST_IMPORT_FAILED
            };
            self.event_emitter
                .emit(GuestEvent::with_result(key, result.clone()).for_guest(&server.uuid));

            match result {
                TaskResult::Success { data } => {
                    imported.push(json!({"uuid": server.uuid, "result": data}))
                }
                other => failed.push(json!({"uuid": server.uuid, "result": other})),
            }
        }

        tracing::info!(
            imported = imported.len(),
            failed = failed.len(),
            skipped = skipped.len(),
            "Libvirt import finished"
        );
        Ok(json!({
            "imported": imported,
            "failed": failed,
            "skipped": skipped,
        }))
    }

    fn task_type(&self) -> &str {
        "prepare_import_from_libvirt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use a3s_guest_core::config::DispatcherConfig;
    use a3s_guest_core::error::ErrorKind;
    use a3s_guest_core::request::{DatastoreAccessInfo, EsxiAccessInfo};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Provisioner that records calls and optionally blocks until released.
    #[derive(Default)]
    struct MockProvisioner {
        calls: Mutex<Vec<String>>,
        imported: Mutex<Vec<LibvirtServer>>,
        gate: Option<Arc<Notify>>,
        fail_guest: Option<String>,
    }

    impl MockProvisioner {
        fn gated(gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Default::default()
            }
        }

        fn failing(guest_id: &str) -> Self {
            Self {
                fail_guest: Some(guest_id.to_string()),
                ..Default::default()
            }
        }

        async fn run(&self, guest_id: &str) -> Result<serde_json::Value> {
            self.calls.lock().unwrap().push(guest_id.to_string());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail_guest.as_deref() == Some(guest_id) {
                return Err(GuestError::BadRequest(format!("disk for {} missing", guest_id)));
            }
            Ok(json!({"guest_id": guest_id}))
        }
    }

    #[async_trait]
    impl GuestProvisioner for MockProvisioner {
        async fn import_libvirt_server(
            &self,
            _config: &LibvirtImportConfig,
            server: &LibvirtServer,
        ) -> Result<serde_json::Value> {
            self.imported.lock().unwrap().push(server.clone());
            self.run(&server.uuid).await
        }

        async fn create_from_libvirt(
            &self,
            guest_id: &GuestId,
            _config: &LibvirtCreateConfig,
        ) -> Result<serde_json::Value> {
            self.run(guest_id).await
        }

        async fn create_from_esxi(
            &self,
            guest_id: &GuestId,
            _config: &EsxiCreateConfig,
        ) -> Result<serde_json::Value> {
            self.run(guest_id).await
        }
    }

    fn orchestrator(provisioner: Arc<MockProvisioner>) -> ProvisioningOrchestrator {
        let dispatcher = TaskDispatcher::new(&DispatcherConfig::default(), EventEmitter::new(64));
        ProvisioningOrchestrator::new(Arc::new(GuestRegistry::new()), dispatcher, provisioner)
    }

    fn libvirt_create() -> LibvirtCreateConfig {
        LibvirtCreateConfig {
            desc: json!({"name": "srv-1"}),
            disks_path: json!({"disk-0": "/data/srv-1.qcow2"}),
            monitor_path: None,
        }
    }

    fn esxi_create() -> EsxiCreateConfig {
        EsxiCreateConfig {
            desc: json!({"name": "vm"}),
            esxi_access_info: EsxiAccessInfo {
                datastore: DatastoreAccessInfo {
                    vcenter_id: "vc-1".to_string(),
                    host: "10.0.0.5".to_string(),
                    port: 443,
                    account: "root".to_string(),
                    password: "secret".to_string(),
                    private_id: None,
                },
                host_ip: "10.0.0.9".to_string(),
                guest_ext_id: "vm-42".to_string(),
            },
        }
    }

    async fn wait(ticket: TaskTicket) -> TaskResult {
        tokio::time::timeout(Duration::from_secs(2), ticket.wait())
            .await
            .expect("Timeout")
    }

    #[tokio::test]
    async fn test_create_from_libvirt_releases_after_success() {
        let orch = orchestrator(Arc::new(MockProvisioner::default()));

        let admission = orch.prepare_create("srv-1").unwrap();
        assert_eq!(orch.guest_state("srv-1"), GuestState::Preparing);

        let ticket = orch
            .guest_create_from_libvirt(RequestContext::background(), &admission, libvirt_create())
            .unwrap();
        assert_eq!(ticket.guest_id(), Some("srv-1"));

        let result = wait(ticket).await;
        assert_eq!(result, TaskResult::success(json!({"guest_id": "srv-1"})));
        assert_eq!(orch.guest_state("srv-1"), GuestState::Idle);
        let _again = orch.prepare_create("srv-1").unwrap();
    }

    #[tokio::test]
    async fn test_prepare_create_twice_conflicts() {
        let orch = orchestrator(Arc::new(MockProvisioner::default()));
        let _admission = orch.prepare_create("srv-2").unwrap();
        let err = orch.prepare_create("srv-2").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.to_string(), "Creation already in progress for guest srv-2");
    }

    #[tokio::test]
    async fn test_conflict_while_running() {
        let gate = Arc::new(Notify::new());
        let orch = orchestrator(Arc::new(MockProvisioner::gated(Arc::clone(&gate))));

        let admission = orch.prepare_create("srv-1").unwrap();
        let ticket = orch
            .guest_create_from_esxi(RequestContext::background(), &admission, esxi_create())
            .unwrap();
        assert_eq!(orch.guest_state("srv-1"), GuestState::Running);
        assert_eq!(
            orch.prepare_create("srv-1").unwrap_err().kind(),
            ErrorKind::Conflict
        );

        // The same admission cannot be dispatched twice
        let err = orch
            .guest_create_from_esxi(RequestContext::background(), &admission, esxi_create())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        gate.notify_one();
        assert!(wait(ticket).await.is_success());
        let _again = orch.prepare_create("srv-1").unwrap();
    }

    #[tokio::test]
    async fn test_failed_create_still_releases() {
        let orch = orchestrator(Arc::new(MockProvisioner::failing("srv-3")));
        let admission = orch.prepare_create("srv-3").unwrap();
        let ticket = orch
            .guest_create_from_libvirt(RequestContext::background(), &admission, libvirt_create())
            .unwrap();

        let result = wait(ticket).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::BadRequest));
        assert_eq!(orch.guest_state("srv-3"), GuestState::Idle);
    }

    #[tokio::test]
    async fn test_cancelled_create_releases() {
        let provisioner = Arc::new(MockProvisioner::default());
        let orch = orchestrator(Arc::clone(&provisioner));
        let (ctx, handle) = RequestContext::with_cancel();
        handle.cancel();

        let admission = orch.prepare_create("srv-4").unwrap();
        let ticket = orch
            .guest_create_from_libvirt(ctx, &admission, libvirt_create())
            .unwrap();
        assert_eq!(wait(ticket).await.error_kind(), Some(ErrorKind::Cancelled));
        assert_eq!(orch.guest_state("srv-4"), GuestState::Idle);
        assert!(provisioner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validation_failure_leaves_registry_untouched() {
        let orch = orchestrator(Arc::new(MockProvisioner::default()));
        let admission = orch.prepare_create("srv-5").unwrap();

        let mut config = libvirt_create();
        config.desc = json!("not a map");
        let err = orch
            .guest_create_from_libvirt(RequestContext::background(), &admission, config)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputParameter);
        assert_eq!(orch.guest_state("srv-5"), GuestState::Preparing);
        assert_eq!(orch.dispatcher().stats().completed, 0);

        assert!(orch.abort_prepare(&admission));
        assert_eq!(orch.guest_state("srv-5"), GuestState::Idle);
    }

    #[tokio::test]
    async fn test_create_with_aborted_admission_rejected() {
        let orch = orchestrator(Arc::new(MockProvisioner::default()));
        let admission = orch.prepare_create("srv-6").unwrap();
        assert!(orch.abort_prepare(&admission));

        let err = orch
            .guest_create_from_libvirt(RequestContext::background(), &admission, libvirt_create())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(orch.guest_state("srv-6"), GuestState::Idle);
    }

    #[tokio::test]
    async fn test_admission_only_dispatches_its_own_entry() {
        let provisioner = Arc::new(MockProvisioner::default());
        let orch = orchestrator(Arc::clone(&provisioner));
        let stale = orch.prepare_create("srv-6").unwrap();
        assert!(orch.abort_prepare(&stale));
        let current = orch.prepare_create("srv-6").unwrap();

        let err = orch
            .guest_create_from_libvirt(RequestContext::background(), &stale, libvirt_create())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(!orch.abort_prepare(&stale));
        assert_eq!(orch.guest_state("srv-6"), GuestState::Preparing);
        assert!(provisioner.calls.lock().unwrap().is_empty());

        let ticket = orch
            .guest_create_from_libvirt(RequestContext::background(), &current, libvirt_create())
            .unwrap();
        assert!(wait(ticket).await.is_success());
        assert_eq!(orch.guest_state("srv-6"), GuestState::Idle);
    }

    #[tokio::test]
    async fn test_submit_request_requires_guest_id_for_create() {
        let orch = orchestrator(Arc::new(MockProvisioner::default()));
        let err = orch
            .submit_request(RequestContext::background(), None, libvirt_create().into())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingParameter);
        assert!(orch.registry().is_empty());
    }

    #[tokio::test]
    async fn test_handle_create_rejects_before_admission() {
        let orch = orchestrator(Arc::new(MockProvisioner::default()));
        let body = json!({"desc": "srv", "disks_path": {}});
        let err = orch
            .handle_create_from_libvirt(RequestContext::background(), "srv-7", &body)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputParameter);
        assert!(orch.registry().is_empty());

        let body = json!({"desc": {}});
        let err = orch
            .handle_create_from_esxi(RequestContext::background(), "srv-7", &body)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingParameter);
        assert!(orch.registry().is_empty());
    }

    #[tokio::test]
    async fn test_handle_create_from_esxi_dispatches() {
        let orch = orchestrator(Arc::new(MockProvisioner::default()));
        let body = serde_json::to_value(esxi_create()).unwrap();
        let mut events = orch.subscribe_guest("srv-8");

        let ticket = orch
            .handle_create_from_esxi(RequestContext::background(), "srv-8", &body)
            .unwrap();
        assert_eq!(ticket.task_type(), "guest_create_from_esxi");
        assert!(wait(ticket).await.is_success());

        let mut keys = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(100), events.recv()).await
        {
            keys.push(event.key);
        }
        assert_eq!(
            keys,
            vec![
                events::GUEST_ADMITTED.to_string(),
                events::GUEST_CREATE_STARTED.to_string(),
                events::GUEST_CREATE_SUCCEEDED.to_string(),
                events::TASK_COMPLETED.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_import_admits_each_server_and_skips_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let xml = dir.path().join("domains.xml");
        std::fs::write(&xml, "<domains/>").unwrap();

        let provisioner = Arc::new(MockProvisioner::failing("srv-c"));
        let orch = orchestrator(Arc::clone(&provisioner));
        let _held = orch.prepare_create("srv-b").unwrap();

        let config = LibvirtImportConfig {
            xml_file_path: xml.display().to_string(),
            monitor_path: Some(dir.path().display().to_string()),
            servers: ["srv-a", "srv-b", "srv-c"]
                .into_iter()
                .map(LibvirtServer::new)
                .collect(),
        };
        let ticket = orch
            .prepare_import_from_libvirt(RequestContext::background(), config)
            .unwrap();
        assert!(ticket.guest_id().is_none());

        let data = match wait(ticket).await {
            TaskResult::Success { data } => data,
            other => panic!("unexpected result: {:?}", other),
        };
        assert_eq!(data["imported"][0]["uuid"], "srv-a");
        assert_eq!(data["skipped"][0]["uuid"], "srv-b");
        assert_eq!(data["failed"][0]["uuid"], "srv-c");
        assert_eq!(data["failed"][0]["result"]["kind"], "bad_request");

        assert_eq!(
            *provisioner.calls.lock().unwrap(),
            vec!["srv-a".to_string(), "srv-c".to_string()]
        );
        // Only the independently prepared guest is still held
        assert_eq!(orch.registry().len(), 1);
        assert_eq!(orch.guest_state("srv-b"), GuestState::Preparing);
    }

    #[tokio::test]
    async fn test_import_passes_each_server_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let xml = dir.path().join("domains.xml");
        std::fs::write(&xml, "<domains/>").unwrap();

        let provisioner = Arc::new(MockProvisioner::default());
        let orch = orchestrator(Arc::clone(&provisioner));

        let mut first = LibvirtServer::new("srv-a");
        first.mac_ip.insert("52:54:00:00:00:01".into(), "10.0.0.1".into());
        let mut second = LibvirtServer::new("srv-b");
        second.mac_ip.insert("52:54:00:00:00:02".into(), "10.0.0.2".into());

        let config = LibvirtImportConfig {
            xml_file_path: xml.display().to_string(),
            monitor_path: None,
            servers: vec![first.clone(), second.clone()],
        };
        let ticket = orch
            .prepare_import_from_libvirt(RequestContext::background(), config)
            .unwrap();
        assert!(wait(ticket).await.is_success());
        assert_eq!(*provisioner.imported.lock().unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_import_rejects_duplicate_uuids() {
        let dir = tempfile::tempdir().unwrap();
        let xml = dir.path().join("domains.xml");
        std::fs::write(&xml, "<domains/>").unwrap();

        let provisioner = Arc::new(MockProvisioner::default());
        let orch = orchestrator(Arc::clone(&provisioner));

        let mut again = LibvirtServer::new("srv-a");
        again.mac_ip.insert("52:54:00:00:00:02".into(), "10.0.0.2".into());
        let config = LibvirtImportConfig {
            xml_file_path: xml.display().to_string(),
            monitor_path: None,
            servers: vec![LibvirtServer::new("srv-a"), again],
        };
        let err = orch
            .prepare_import_from_libvirt(RequestContext::background(), config)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputParameter);
        assert!(orch.registry().is_empty());
        assert!(provisioner.imported.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_import_validation_is_synchronous() {
        let orch = orchestrator(Arc::new(MockProvisioner::default()));
        let err = orch
            .handle_import_from_libvirt(
                RequestContext::background(),
                &json!({"xml_file_path": "", "servers": ["srv-1"]}),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingParameter);
        assert_eq!(orch.dispatcher().stats().completed, 0);
        assert_eq!(orch.dispatcher().stats().pending, 0);
    }
}
