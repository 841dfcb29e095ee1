//! `Core`: owns C1–C6 per configured project/group and exposes typed
//! methods instead of a string-keyed operations map (design §9).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::archive::Archive;
use crate::bus::{BusConfig, BusManager, CanTransport, TxRemapIds};
use crate::classifier::SlotStatusClassifier;
use crate::codec::SignalDatabase;
use crate::config::{decode_payload, FunctionConfig, ProjectConfig};
use crate::diag::{DiagStackFactory, MultiSlotDiagEngine};
use crate::dispatch::{AppFrameTable, RxDispatcher};
use crate::error::CoreError;
use crate::group::{GroupConfig, GroupController, GroupState, SwitchMessage};
use crate::power::PowerSupply;
use crate::security::SecurityAlgorithm;

/// External collaborators a project needs that the core does not
/// construct itself (design §6): the vendor signal database, the ISO-TP
/// stack factory, the seed/key callback and the power-supply driver.
pub struct ProjectDeps {
    pub transport: Arc<Mutex<dyn CanTransport>>,
    pub database: Arc<dyn SignalDatabase>,
    pub diag_factory: Arc<dyn DiagStackFactory>,
    pub security_algorithm: SecurityAlgorithm,
    pub power_supply: Arc<dyn PowerSupply>,
}

struct DispatchWorker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DispatchWorker {
    fn spawn(bus: Arc<BusManager>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            while !worker_stop.load(Ordering::Relaxed) {
                if bus.poll_once(Duration::from_millis(100)).is_err() {
                    break;
                }
            }
        });
        Self { stop, handle: Some(handle) }
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DispatchWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

struct ProjectRuntime {
    group: Arc<GroupController>,
    dispatch: Mutex<DispatchWorker>,
    power_supply: Arc<dyn PowerSupply>,
}

/// Owns every configured project's full C1–C6 stack, keyed by project
/// name. One `Core` drives the whole process; there is no ownership cycle
/// between it and the group controllers it hands out (design §9).
pub struct Core {
    projects: BTreeMap<String, ProjectRuntime>,
    archive: Arc<dyn Archive>,
}

impl Core {
    /// Builds the bus, codec, dispatcher, classifier, diagnostic engine and
    /// group controller for every named project. A failure on any project
    /// aborts the whole build (design §7 category 4: fatal at startup).
    pub fn build(
        function_config: &FunctionConfig,
        projects: BTreeMap<String, (ProjectConfig, ProjectDeps)>,
        archive: Arc<dyn Archive>,
    ) -> Result<Self, CoreError> {
        let mut built = BTreeMap::new();
        for (name, (project, deps)) in projects {
            let runtime = Self::build_project(function_config, &project, deps, Arc::clone(&archive))?;
            built.insert(name, runtime);
        }
        Ok(Self { projects: built, archive })
    }

    fn build_project(
        function_config: &FunctionConfig,
        project: &ProjectConfig,
        deps: ProjectDeps,
        archive: Arc<dyn Archive>,
    ) -> Result<ProjectRuntime, CoreError> {
        let bus_config = BusConfig {
            interface: function_config.interface.clone(),
            arbitration_bitrate: function_config.arbitration_bitrate,
            data_bitrate: function_config.data_bitrate,
            fd_enabled: function_config.fd_enabled,
            receive_own_messages: true,
        };
        let remap = match (&project.id_of_tx_msg1, &project.id_of_tx_msg2) {
            (Some(m1), Some(m2)) => Some(TxRemapIds { id_of_tx_msg1: m1.id, id_of_tx_msg2: m2.id }),
            _ => None,
        };
        let bus = Arc::new(BusManager::new(deps.transport, &bus_config, Arc::clone(&deps.database), remap).map_err(CoreError::Transport)?);

        let max_slots = function_config.slots_per_group;
        let ranges = project.classifier_ranges(function_config.dark_current);
        let classifier = Arc::new(SlotStatusClassifier::new(max_slots, ranges));

        let app_rx1_table = Arc::new(AppFrameTable::new(max_slots));
        let app_rx2_table = Arc::new(AppFrameTable::new(max_slots));
        let dispatcher = Arc::new(RxDispatcher::new(
            max_slots,
            function_config.channel_remap,
            project.id_of_rx_msg1,
            project.id_of_rx_msg2,
            Arc::clone(&deps.database),
            Arc::clone(&classifier) as Arc<dyn crate::dispatch::StatusSink + Send + Sync>,
            Some(Arc::clone(&app_rx1_table) as Arc<dyn crate::dispatch::AppSink + Send + Sync>),
            Some(Arc::clone(&app_rx2_table) as Arc<dyn crate::dispatch::AppSink + Send + Sync>),
        ));
        let dispatcher_listener = Arc::clone(&dispatcher);
        bus.register_listener(Box::new(move |frame| {
            dispatcher_listener.on_frame(frame.id, &frame.data, frame.timestamp);
        }));

        let dids = project.did_specs().map_err(CoreError::Config)?;
        let diag = Arc::new(
            MultiSlotDiagEngine::build(
                max_slots,
                function_config.channel_remap,
                dids,
                deps.security_algorithm,
                Duration::from_millis(project.diagnostic.request_timeout_ms),
                deps.diag_factory.as_ref(),
            )
            .map_err(|e| CoreError::InvalidState(e.to_string()))?,
        );

        let switch_msg1 = project.id_of_tx_msg1.as_ref().map(|m| switch_message(m)).transpose()?;
        let switch_msg2 = project.id_of_tx_msg2.as_ref().map(|m| switch_message(m)).transpose()?;

        let group_config = GroupConfig {
            project_name: project.name.clone(),
            max_slots,
            aging_hours: Some(project.aging_hours_default),
            non_recoverable: function_config.non_recoverable_status.clone(),
            alarm_delay: Duration::from_secs(function_config.alarm_delay_secs),
            switch_msg1,
            switch_msg2,
            periodic_diag_interval: Duration::from_secs(project.diagnostic.periodic_interval_secs),
            periodic_rediag_interval: Duration::from_secs(project.diagnostic.periodic_rediag_interval_secs),
        };

        let group = Arc::new(GroupController::new(
            group_config,
            Arc::clone(&bus),
            classifier,
            diag,
            archive,
            app_rx1_table,
            app_rx2_table,
        ));
        let dispatch = DispatchWorker::spawn(bus);

        Ok(ProjectRuntime { group, dispatch: Mutex::new(dispatch), power_supply: deps.power_supply })
    }

    pub fn group(&self, project: &str) -> Result<&Arc<GroupController>, CoreError> {
        self.projects.get(project).map(|p| &p.group).ok_or_else(|| CoreError::Config(crate::error::ConfigError::UnknownProject(project.to_string())))
    }

    /// Turns the project's power supply on, then starts its group (design
    /// §6 "core invokes this once at startup").
    pub fn start(&self, project: &str) -> Result<(), CoreError> {
        let runtime = self.projects.get(project).ok_or_else(|| CoreError::Config(crate::error::ConfigError::UnknownProject(project.to_string())))?;
        runtime.power_supply.set_output(true, project).map_err(|e| CoreError::InvalidState(e.to_string()))?;
        runtime.group.start()
    }

    /// Stops the group, then turns its power supply off.
    pub fn stop(&self, project: &str) -> Result<(), CoreError> {
        let runtime = self.projects.get(project).ok_or_else(|| CoreError::Config(crate::error::ConfigError::UnknownProject(project.to_string())))?;
        runtime.group.stop()?;
        runtime.power_supply.set_output(false, project).map_err(|e| CoreError::InvalidState(e.to_string()))?;
        Ok(())
    }

    /// Stops every running project's group and its dispatch thread, then
    /// closes the shared archive exactly once (the archive is cloned across
    /// every project's [`GroupController`], so only `Core` — the sole
    /// collaborator that outlives every individual group — closes it).
    /// Use in preparation for process exit (e.g. from a `ctrl_c` handler).
    pub fn shutdown_all(&self) {
        for (name, runtime) in &self.projects {
            if runtime.group.state() == GroupState::Running || runtime.group.state() == GroupState::Paused {
                if let Err(error) = self.stop(name) {
                    tracing::error!(project = %name, %error, "failed to stop group during shutdown");
                }
            }
            runtime.dispatch.lock().unwrap().stop();
        }
        self.archive.close();
    }
}

fn switch_message(msg: &crate::config::TxMessageConfig) -> Result<SwitchMessage, CoreError> {
    let payloads = msg.payloads.iter().map(|p| decode_payload(p)).collect::<Result<Vec<_>, _>>().map_err(CoreError::Config)?;
    Ok(SwitchMessage { id: msg.id, fd: msg.fd, payloads })
}
