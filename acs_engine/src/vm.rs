//! The script virtual machine: owns the loaded image, variable stores, live
//! instances and the cross-map deferred queue, and advances everything by
//! one tick at a time.

use std::collections::BTreeSet;

use anyhow::{bail, ensure, Context, Result};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use acs_formats::{ScriptImage, MAX_SPECIAL_ARGS};

use crate::config::VmConfig;
use crate::deferred::{ActionKind, DeferredAction, DeferredQueue, ScriptRequest};
use crate::dispatch::{Dispatcher, PrintBuffer, Step};
use crate::host::ScriptHost;
use crate::instance::{ScriptInstance, ScriptState, ScriptStatus, Trigger};
use crate::scheduler::InstanceTable;
use crate::vars::{MapVars, WorldVars};

/// What a start/suspend/terminate request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Started,
    /// A suspended instance was set running again.
    Resumed,
    Suspended,
    Terminating,
    /// The request names another map and went to the deferred queue.
    /// `queued` is false when an identical execute was already waiting.
    Deferred { queued: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("script {0} is not defined on this map")]
    UnknownScript(i32),
    #[error("script {0} is already running")]
    AlreadyRunning(i32),
    #[error("script {0} is not running")]
    NotRunning(i32),
    #[error("script {0} is already suspended")]
    AlreadySuspended(i32),
    #[error("script {0} is already terminating")]
    AlreadyTerminating(i32),
}

/// Persistable VM state. The image itself is not included; it is reloaded
/// from the map and handed back to [`Vm::restore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSnapshot {
    pub map: i32,
    pub world_vars: WorldVars,
    pub map_vars: MapVars,
    pub instances: InstanceTable,
    pub deferred: DeferredQueue,
}

pub struct Vm {
    config: VmConfig,
    image: ScriptImage,
    map: i32,
    world_vars: WorldVars,
    map_vars: MapVars,
    instances: InstanceTable,
    deferred: DeferredQueue,
    print: PrintBuffer,
    rng: SmallRng,
}

impl Vm {
    pub fn new(config: VmConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Vm {
            print: PrintBuffer::new(config.print_buffer_limit),
            config,
            image: ScriptImage::empty(),
            map: 0,
            world_vars: WorldVars::default(),
            map_vars: MapVars::default(),
            instances: InstanceTable::new(),
            deferred: DeferredQueue::new(),
            rng,
        }
    }

    /// Parses `bytes` as the image for `map` and enters the map. A malformed
    /// image still enters the map, with scripting disabled, and reports the
    /// parse error.
    pub fn load_map(&mut self, map: i32, bytes: &[u8]) -> Result<()> {
        match ScriptImage::parse(bytes) {
            Ok(image) => {
                self.load_map_image(map, image);
                Ok(())
            }
            Err(err) => {
                log::warn!("map {map}: script image rejected; scripting disabled");
                self.load_map_image(map, ScriptImage::empty());
                Err(err).with_context(|| format!("loading scripts for map {map}"))
            }
        }
    }

    /// Enters `map` with an already parsed image: drops every instance from
    /// the previous map, clears map variables, starts the open scripts, then
    /// applies deferred actions aimed at this map.
    pub fn load_map_image(&mut self, map: i32, image: ScriptImage) {
        self.image = image;
        self.map = map;
        self.instances.clear();
        self.map_vars.clear();
        self.print.clear();

        let open: Vec<usize> = self
            .image
            .scripts()
            .iter()
            .enumerate()
            .filter_map(|(definition, info)| info.open.then_some(definition))
            .collect();
        for definition in open {
            let info = &self.image.scripts()[definition];
            let mut instance =
                ScriptInstance::new(definition, info, &[0; MAX_SPECIAL_ARGS], Trigger::none());
            instance.delay = self.config.open_script_delay;
            log::debug!("map {map}: open script {} scheduled", info.number);
            self.instances.insert(instance);
        }

        log::info!(
            "map {map}: {} scripts, {} strings, {} open",
            self.image.scripts().len(),
            self.image.strings().len(),
            self.instances.len()
        );

        for action in self.deferred.drain_for(map) {
            self.apply_deferred(action);
        }
    }

    fn apply_deferred(&mut self, action: DeferredAction) {
        let result = match action.kind {
            ActionKind::Execute => {
                let result = self.start_local(action.script, action.args, Trigger::none());
                if let Ok(Outcome::Started) = result {
                    if let Some(handle) = self.instances.find_handle(action.script) {
                        if let Some(instance) = self.instances.get_mut(handle) {
                            instance.delay = self.config.deferred_start_delay;
                        }
                    }
                }
                result
            }
            ActionKind::Suspend => self.suspend_local(action.script),
            ActionKind::Terminate => self.terminate_local(action.script),
        };
        if let Err(err) = result {
            log::debug!("deferred {:?} for map {}: {err}", action.kind, action.map);
        }
    }

    /// Starts script `number`, or resumes it if it is suspended. A nonzero
    /// `map` other than the current one defers the start until that map
    /// loads.
    pub fn start_script(
        &mut self,
        number: i32,
        map: i32,
        args: [i32; MAX_SPECIAL_ARGS],
        trigger: Trigger,
    ) -> Result<Outcome, RequestError> {
        if self.is_other_map(map) {
            return Ok(self.defer(number, map, ActionKind::Execute, args));
        }
        self.start_local(number, args, trigger)
    }

    /// Marks script `number` suspended. It keeps its state and resumes on
    /// the next start request.
    pub fn suspend_script(&mut self, number: i32, map: i32) -> Result<Outcome, RequestError> {
        if self.is_other_map(map) {
            return Ok(self.defer(number, map, ActionKind::Suspend, [0; MAX_SPECIAL_ARGS]));
        }
        self.suspend_local(number)
    }

    /// Marks script `number` for teardown at its next scheduling pass.
    pub fn terminate_script(&mut self, number: i32, map: i32) -> Result<Outcome, RequestError> {
        if self.is_other_map(map) {
            return Ok(self.defer(number, map, ActionKind::Terminate, [0; MAX_SPECIAL_ARGS]));
        }
        self.terminate_local(number)
    }

    fn is_other_map(&self, map: i32) -> bool {
        map != 0 && map != self.map
    }

    fn defer(
        &mut self,
        script: i32,
        map: i32,
        kind: ActionKind,
        args: [i32; MAX_SPECIAL_ARGS],
    ) -> Outcome {
        let queued = self.deferred.enqueue(DeferredAction {
            script,
            map,
            kind,
            args,
        });
        Outcome::Deferred { queued }
    }

    fn start_local(
        &mut self,
        number: i32,
        args: [i32; MAX_SPECIAL_ARGS],
        trigger: Trigger,
    ) -> Result<Outcome, RequestError> {
        let Some((definition, info)) = self.image.find_script(number) else {
            log::warn!("map {}: start of unknown script {number}", self.map);
            return Err(RequestError::UnknownScript(number));
        };
        if let Some(handle) = self.instances.find_handle(number) {
            let instance = self
                .instances
                .get_mut(handle)
                .ok_or(RequestError::NotRunning(number))?;
            if instance.state == ScriptState::Suspended {
                instance.state = ScriptState::Running;
                return Ok(Outcome::Resumed);
            }
            return Err(RequestError::AlreadyRunning(number));
        }
        let instance = ScriptInstance::new(definition, info, &args, trigger);
        self.instances.insert(instance);
        Ok(Outcome::Started)
    }

    fn suspend_local(&mut self, number: i32) -> Result<Outcome, RequestError> {
        let instance = self.live_instance(number)?;
        match instance.state {
            ScriptState::Suspended => Err(RequestError::AlreadySuspended(number)),
            ScriptState::Terminating => Err(RequestError::AlreadyTerminating(number)),
            _ => {
                instance.state = ScriptState::Suspended;
                Ok(Outcome::Suspended)
            }
        }
    }

    fn terminate_local(&mut self, number: i32) -> Result<Outcome, RequestError> {
        let instance = self.live_instance(number)?;
        if instance.state == ScriptState::Terminating {
            return Err(RequestError::AlreadyTerminating(number));
        }
        instance.state = ScriptState::Terminating;
        Ok(Outcome::Terminating)
    }

    fn live_instance(&mut self, number: i32) -> Result<&mut ScriptInstance, RequestError> {
        self.instances
            .find_handle(number)
            .and_then(|handle| self.instances.get_mut(handle))
            .ok_or(RequestError::NotRunning(number))
    }

    /// Advances every live instance by one tick, in creation order.
    pub fn tick(&mut self, host: &mut dyn ScriptHost) {
        for handle in self.instances.active_handles() {
            let Some(state) = self.instances.get(handle).map(|instance| instance.state) else {
                continue;
            };
            let still_waiting = match state {
                ScriptState::Terminating => {
                    self.finish(handle);
                    continue;
                }
                ScriptState::Suspended => continue,
                ScriptState::Running => false,
                ScriptState::WaitingOnTag(tag) => host.tag_busy(tag),
                ScriptState::WaitingOnPoly(poly) => host.poly_busy(poly),
                ScriptState::WaitingOnScript(number) => self.instances.contains_script(number),
            };
            if still_waiting {
                continue;
            }

            let Some(instance) = self.instances.get_mut(handle) else {
                continue;
            };
            instance.state = ScriptState::Running;
            if instance.delay > 0 {
                instance.delay -= 1;
                continue;
            }

            let mut requests = Vec::new();
            let mut dispatcher = Dispatcher {
                image: &self.image,
                world: &mut self.world_vars,
                map: &mut self.map_vars,
                print: &mut self.print,
                rng: &mut self.rng,
                host: &mut *host,
                requests: &mut requests,
            };
            match dispatcher.run_slice(instance, self.config.runaway_limit) {
                Step::Continue | Step::Yield => {}
                Step::Terminate => self.finish(handle),
                Step::Fault(fault) => {
                    log::error!(
                        "map {}: script {} faulted at cell {}: {fault}",
                        self.map,
                        instance.number,
                        instance.pc
                    );
                    self.finish(handle);
                }
            }

            for request in requests {
                self.apply_request(request);
            }
        }
    }

    fn apply_request(&mut self, request: ScriptRequest) {
        let result = match request.kind {
            ActionKind::Execute => {
                self.start_script(request.script, request.map, request.args, request.trigger)
            }
            ActionKind::Suspend => self.suspend_script(request.script, request.map),
            ActionKind::Terminate => self.terminate_script(request.script, request.map),
        };
        match result {
            Ok(outcome) => log::trace!("script {} {:?}: {outcome:?}", request.script, request.kind),
            Err(err) => log::debug!("{:?} request ignored: {err}", request.kind),
        }
    }

    /// Removes an instance and wakes scripts waiting for it.
    fn finish(&mut self, handle: u32) {
        if let Some(instance) = self.instances.remove(handle) {
            log::debug!("map {}: script {} finished", self.map, instance.number);
            self.wake(ScriptState::WaitingOnScript(instance.number));
        }
    }

    fn wake(&mut self, waiting: ScriptState) {
        for handle in self.instances.active_handles() {
            if let Some(instance) = self.instances.get_mut(handle) {
                if instance.state == waiting {
                    instance.state = ScriptState::Running;
                }
            }
        }
    }

    /// Wakes scripts waiting on sector tag `tag`.
    pub fn tag_finished(&mut self, tag: i32) {
        self.wake(ScriptState::WaitingOnTag(tag));
    }

    /// Wakes scripts waiting on polyobject `poly`.
    pub fn poly_finished(&mut self, poly: i32) {
        self.wake(ScriptState::WaitingOnPoly(poly));
    }

    /// Resets game-wide state: world variables, deferred actions and every
    /// live instance.
    pub fn new_game(&mut self) {
        self.world_vars.clear();
        self.deferred.clear();
        self.instances.clear();
        self.map_vars.clear();
    }

    pub fn script_status(&self, number: i32) -> ScriptStatus {
        ScriptStatus::from(self.instances.state_of(number))
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn current_map(&self) -> i32 {
        self.map
    }

    pub fn image(&self) -> &ScriptImage {
        &self.image
    }

    pub fn world_vars(&self) -> &WorldVars {
        &self.world_vars
    }

    pub fn map_vars(&self) -> &MapVars {
        &self.map_vars
    }

    pub fn instances(&self) -> &InstanceTable {
        &self.instances
    }

    pub fn deferred(&self) -> &DeferredQueue {
        &self.deferred
    }

    pub fn snapshot(&self) -> VmSnapshot {
        VmSnapshot {
            map: self.map,
            world_vars: self.world_vars.clone(),
            map_vars: self.map_vars.clone(),
            instances: self.instances.clone(),
            deferred: self.deferred.clone(),
        }
    }

    /// Reinstates a snapshot on top of `image`, which must be the image the
    /// snapshot's map was running. Open scripts are not restarted.
    pub fn restore(&mut self, image: ScriptImage, snapshot: VmSnapshot) -> Result<()> {
        if let Some(last) = snapshot.instances.active_handles().last() {
            ensure!(
                snapshot.instances.next_handle() > *last,
                "next handle {} would reuse live handle #{last}",
                snapshot.instances.next_handle()
            );
        }
        let mut numbers = BTreeSet::new();
        for (handle, instance) in snapshot.instances.iter() {
            ensure!(
                numbers.insert(instance.number),
                "instance #{handle} duplicates script {}",
                instance.number
            );
            let Some(info) = image.scripts().get(instance.definition) else {
                bail!("instance #{handle} refers to missing definition {}", instance.definition);
            };
            if info.number != instance.number {
                bail!(
                    "instance #{handle} is script {} but definition {} is script {}",
                    instance.number,
                    instance.definition,
                    info.number
                );
            }
            if !image.program().is_instruction_boundary(instance.pc) {
                bail!("instance #{handle} resumes at cell {} which is not code", instance.pc);
            }
            if !instance.stack.validate() {
                bail!("instance #{handle} has an oversized operand stack");
            }
        }

        self.image = image;
        self.map = snapshot.map;
        self.world_vars = snapshot.world_vars;
        self.map_vars = snapshot.map_vars;
        self.instances = snapshot.instances;
        self.deferred = snapshot.deferred;
        self.print.clear();
        log::info!(
            "map {}: restored {} script instances",
            self.map,
            self.instances.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_log::RecordingHost;
    use acs_formats::{ImageBuilder, Opcode};

    fn vm_with(builder: &ImageBuilder) -> Vm {
        let mut vm = Vm::new(VmConfig {
            rng_seed: Some(1),
            ..VmConfig::default()
        });
        vm.load_map(1, &builder.build()).expect("image loads");
        vm
    }

    #[test]
    fn start_then_restart_while_running_is_refused() {
        let mut builder = ImageBuilder::new();
        builder.script(3, 0).op(Opcode::Suspend).op(Opcode::Terminate);
        let mut vm = vm_with(&builder);

        assert_eq!(
            vm.start_script(3, 0, [0; 5], Trigger::none()),
            Ok(Outcome::Started)
        );
        assert_eq!(
            vm.start_script(3, 1, [0; 5], Trigger::none()),
            Err(RequestError::AlreadyRunning(3))
        );
        assert_eq!(
            vm.start_script(4, 0, [0; 5], Trigger::none()),
            Err(RequestError::UnknownScript(4))
        );
    }

    #[test]
    fn suspend_and_terminate_guard_their_states() {
        let mut builder = ImageBuilder::new();
        builder.script(3, 0).op1(Opcode::DelayDirect, 100).op(Opcode::Terminate);
        let mut vm = vm_with(&builder);

        assert_eq!(vm.suspend_script(3, 0), Err(RequestError::NotRunning(3)));
        vm.start_script(3, 0, [0; 5], Trigger::none()).unwrap();
        assert_eq!(vm.suspend_script(3, 0), Ok(Outcome::Suspended));
        assert_eq!(vm.suspend_script(3, 0), Err(RequestError::AlreadySuspended(3)));
        assert_eq!(vm.terminate_script(3, 0), Ok(Outcome::Terminating));
        assert_eq!(
            vm.terminate_script(3, 0),
            Err(RequestError::AlreadyTerminating(3))
        );
        assert_eq!(vm.script_status(3), ScriptStatus::Terminating);

        let mut host = RecordingHost::new();
        vm.tick(&mut host);
        assert_eq!(vm.script_status(3), ScriptStatus::Stopped);
    }

    #[test]
    fn malformed_image_disables_scripting() {
        let mut vm = Vm::new(VmConfig::default());
        let mut bytes = b"ACS\0".to_vec();
        bytes.extend_from_slice(&1000u32.to_le_bytes());
        assert!(vm.load_map(2, &bytes).is_err());
        assert_eq!(vm.current_map(), 2);
        assert!(vm.image().is_empty());
    }

    fn snapshot_json(vm: &Vm) -> serde_json::Value {
        serde_json::to_value(vm.snapshot()).expect("snapshot serializes")
    }

    fn two_script_image() -> ImageBuilder {
        let mut builder = ImageBuilder::new();
        builder.script(1, 0).op(Opcode::Suspend).op(Opcode::Terminate);
        builder.script(2, 0).op(Opcode::Suspend).op(Opcode::Terminate);
        builder
    }

    #[test]
    fn restore_rejects_handle_counter_behind_live_handles() {
        let builder = two_script_image();
        let mut vm = vm_with(&builder);
        vm.start_script(1, 0, [0; 5], Trigger::none()).unwrap();

        let mut json = snapshot_json(&vm);
        json["instances"]["next_handle"] = serde_json::json!(1);
        let snapshot: VmSnapshot = serde_json::from_value(json).unwrap();

        let mut restored = Vm::new(VmConfig::default());
        let image = ScriptImage::parse(&builder.build()).unwrap();
        assert!(restored.restore(image, snapshot).is_err());
        assert!(restored.instances().is_empty());
    }

    #[test]
    fn restore_rejects_two_instances_of_one_script() {
        let builder = two_script_image();
        let mut vm = vm_with(&builder);
        vm.start_script(1, 0, [0; 5], Trigger::none()).unwrap();

        let mut json = snapshot_json(&vm);
        let record = json["instances"]["records"]["1"].clone();
        json["instances"]["records"]["7"] = record;
        json["instances"]["next_handle"] = serde_json::json!(8);
        let snapshot: VmSnapshot = serde_json::from_value(json).unwrap();

        let mut restored = Vm::new(VmConfig::default());
        let image = ScriptImage::parse(&builder.build()).unwrap();
        assert!(restored.restore(image, snapshot).is_err());
    }

    #[test]
    fn restored_table_keeps_existing_instances_on_new_starts() {
        let builder = two_script_image();
        let mut vm = vm_with(&builder);
        vm.start_script(1, 0, [0; 5], Trigger::none()).unwrap();
        let snapshot = vm.snapshot();

        let mut restored = Vm::new(VmConfig::default());
        let image = ScriptImage::parse(&builder.build()).unwrap();
        restored.restore(image, snapshot).unwrap();
        restored.start_script(2, 0, [0; 5], Trigger::none()).unwrap();

        assert_eq!(restored.script_status(1), ScriptStatus::Running);
        assert_eq!(restored.script_status(2), ScriptStatus::Running);
        assert_eq!(restored.instances().len(), 2);
    }

    #[test]
    fn restore_rejects_foreign_image() {
        let mut builder = ImageBuilder::new();
        builder
            .script(1, 0)
            .op(Opcode::Nop)
            .op(Opcode::Suspend)
            .op(Opcode::Terminate);
        let mut vm = vm_with(&builder);
        vm.start_script(1, 0, [0; 5], Trigger::none()).unwrap();
        let snapshot = vm.snapshot();

        let mut other = ImageBuilder::new();
        other.script(2, 0).op(Opcode::Terminate);
        let image = ScriptImage::parse(&other.build()).unwrap();
        assert!(vm.restore(image, snapshot).is_err());
    }
}
