use acs_engine::instance::ScriptInstance;
use acs_engine::{
    ActorId, HostEvent, LineId, LineSide, Outcome, RecordingHost, RequestError, ScriptStatus,
    SoundOrigin, Trigger, Vm, VmConfig, VmSnapshot,
};
use acs_formats::{ImageBuilder, Opcode, ScriptImage};
use anyhow::Result;

fn config() -> VmConfig {
    VmConfig {
        rng_seed: Some(42),
        ..VmConfig::default()
    }
}

fn load(builder: &ImageBuilder, map: i32) -> Vm {
    let mut vm = Vm::new(config());
    vm.load_map(map, &builder.build()).expect("image loads");
    vm
}

fn instance(vm: &Vm, number: i32) -> &ScriptInstance {
    let handle = vm
        .instances()
        .find_handle(number)
        .expect("script should be live");
    vm.instances().get(handle).expect("handle should be live")
}

fn run_ticks(vm: &mut Vm, host: &mut RecordingHost, ticks: u32) {
    for _ in 0..ticks {
        vm.tick(host);
        host.advance();
    }
}

#[test]
fn map_load_resets_map_vars_and_keeps_world_vars() {
    let mut builder = ImageBuilder::new();
    builder
        .script(1, 0)
        .push(5)
        .op1(Opcode::AssignMapVar, 3)
        .push(7)
        .op1(Opcode::AssignWorldVar, 12)
        .op(Opcode::Terminate);
    let mut vm = load(&builder, 1);
    let mut host = RecordingHost::new();

    vm.start_script(1, 0, [0; 5], Trigger::none()).unwrap();
    vm.tick(&mut host);
    assert_eq!(vm.map_vars().get(3), 5);
    assert_eq!(vm.world_vars().get(12), 7);

    vm.load_map(2, &builder.build()).unwrap();
    assert_eq!(vm.map_vars().get(3), 0);
    assert_eq!(vm.world_vars().get(12), 7);

    vm.load_map(3, &[]).unwrap();
    assert!(vm.image().is_empty());
    assert_eq!(vm.world_vars().get(12), 7);
}

#[test]
fn second_start_fails_and_suspended_start_resumes_in_place() {
    let mut builder = ImageBuilder::new();
    builder
        .script(1, 0)
        .op1(Opcode::IncScriptVar, 0)
        .op(Opcode::Suspend)
        .op1(Opcode::IncScriptVar, 0)
        .op(Opcode::Suspend)
        .op(Opcode::Terminate);
    let mut vm = load(&builder, 1);
    let mut host = RecordingHost::new();

    assert_eq!(
        vm.start_script(1, 0, [0; 5], Trigger::none()),
        Ok(Outcome::Started)
    );
    let entry = instance(&vm, 1).pc;
    assert_eq!(
        vm.start_script(1, 0, [0; 5], Trigger::none()),
        Err(RequestError::AlreadyRunning(1))
    );
    assert_eq!(instance(&vm, 1).pc, entry);

    vm.tick(&mut host);
    assert_eq!(vm.script_status(1), ScriptStatus::Suspended);
    let saved_pc = instance(&vm, 1).pc;
    assert_ne!(saved_pc, entry);
    assert_eq!(instance(&vm, 1).locals.get(0), 1);

    vm.tick(&mut host);
    assert_eq!(instance(&vm, 1).locals.get(0), 1);

    assert_eq!(
        vm.start_script(1, 0, [9, 9, 9, 9, 9], Trigger::none()),
        Ok(Outcome::Resumed)
    );
    assert_eq!(vm.script_status(1), ScriptStatus::Running);
    assert_eq!(instance(&vm, 1).pc, saved_pc);
    assert_eq!(instance(&vm, 1).locals.get(0), 1);

    vm.tick(&mut host);
    assert_eq!(instance(&vm, 1).locals.get(0), 2);
}

#[test]
fn resumed_script_keeps_its_operand_stack() {
    let mut builder = ImageBuilder::new();
    builder
        .script(1, 0)
        .push(9)
        .op(Opcode::Suspend)
        .push(1)
        .op(Opcode::Add)
        .op1(Opcode::AssignMapVar, 0)
        .op(Opcode::Terminate);
    let mut vm = load(&builder, 1);
    let mut host = RecordingHost::new();

    vm.start_script(1, 0, [0; 5], Trigger::none()).unwrap();
    vm.tick(&mut host);
    assert_eq!(instance(&vm, 1).stack.as_slice(), &[9]);

    vm.start_script(1, 0, [0; 5], Trigger::none()).unwrap();
    vm.tick(&mut host);
    assert_eq!(vm.map_vars().get(0), 10);
    assert_eq!(vm.script_status(1), ScriptStatus::Stopped);
}

#[test]
fn zero_divisor_terminates_only_the_offender() {
    let mut builder = ImageBuilder::new();
    let top = builder.new_label();
    builder
        .script(1, 0)
        .push(1)
        .push(0)
        .op(Opcode::Divide)
        .op(Opcode::Terminate);
    builder
        .script(2, 0)
        .push(0)
        .op1(Opcode::ModScriptVar, 0)
        .op(Opcode::Terminate);
    builder
        .script(3, 0)
        .bind(top)
        .op1(Opcode::IncMapVar, 0)
        .op1(Opcode::DelayDirect, 1)
        .branch(Opcode::Goto, top);
    let mut vm = load(&builder, 1);
    let mut host = RecordingHost::new();

    for number in [3, 1, 2] {
        vm.start_script(number, 0, [0; 5], Trigger::none()).unwrap();
    }
    vm.tick(&mut host);

    assert_eq!(vm.script_status(1), ScriptStatus::Stopped);
    assert_eq!(vm.script_status(2), ScriptStatus::Stopped);
    assert_eq!(vm.script_status(3), ScriptStatus::Running);
    assert_eq!(vm.map_vars().get(0), 1);

    run_ticks(&mut vm, &mut host, 2);
    assert_eq!(vm.map_vars().get(0), 2);
}

#[test]
fn runaway_ceiling_is_inclusive() {
    let limit = 10;
    let mut builder = ImageBuilder::new();
    builder.script(1, 0);
    for _ in 0..limit - 1 {
        builder.op(Opcode::Nop);
    }
    builder.op(Opcode::Suspend).op(Opcode::Terminate);
    builder.script(2, 0);
    for _ in 0..limit {
        builder.op(Opcode::Nop);
    }
    builder.op(Opcode::Suspend).op(Opcode::Terminate);

    let mut vm = Vm::new(VmConfig {
        runaway_limit: limit,
        ..config()
    });
    vm.load_map(1, &builder.build()).unwrap();
    let mut host = RecordingHost::new();

    vm.start_script(1, 0, [0; 5], Trigger::none()).unwrap();
    vm.start_script(2, 0, [0; 5], Trigger::none()).unwrap();
    vm.tick(&mut host);

    assert_eq!(vm.script_status(1), ScriptStatus::Suspended);
    assert_eq!(vm.script_status(2), ScriptStatus::Stopped);
}

#[test]
fn infinite_loop_is_cut_off() {
    let mut builder = ImageBuilder::new();
    let top = builder.new_label();
    builder.script(1, 0).bind(top).branch(Opcode::Goto, top);
    let mut vm = Vm::new(VmConfig {
        runaway_limit: 1_000,
        ..config()
    });
    vm.load_map(1, &builder.build()).unwrap();
    let mut host = RecordingHost::new();

    vm.start_script(1, 0, [0; 5], Trigger::none()).unwrap();
    vm.tick(&mut host);
    assert_eq!(vm.script_status(1), ScriptStatus::Stopped);
}

#[test]
fn case_jump_pops_and_branches_only_on_match() {
    let mut builder = ImageBuilder::new();
    let seven = builder.new_label();
    let five = builder.new_label();
    builder
        .script(1, 0)
        .push(5)
        .case_goto(7, seven)
        .case_goto(5, five)
        .op(Opcode::Terminate)
        .bind(seven)
        .push(7)
        .op1(Opcode::AssignMapVar, 0)
        .op(Opcode::Terminate)
        .bind(five)
        .push(5)
        .op1(Opcode::AssignMapVar, 0)
        .op(Opcode::Suspend)
        .op(Opcode::Terminate);
    let mut vm = load(&builder, 1);
    let mut host = RecordingHost::new();

    vm.start_script(1, 0, [0; 5], Trigger::none()).unwrap();
    vm.tick(&mut host);
    assert_eq!(vm.map_vars().get(0), 5);
    assert!(instance(&vm, 1).stack.is_empty());
}

#[test]
fn duplicate_deferred_execute_keeps_one_entry() {
    let mut builder = ImageBuilder::new();
    builder.script(1, 0).op(Opcode::Terminate);
    let mut vm = load(&builder, 1);

    assert_eq!(
        vm.start_script(5, 2, [1, 0, 0, 0, 0], Trigger::none()),
        Ok(Outcome::Deferred { queued: true })
    );
    assert_eq!(
        vm.start_script(5, 2, [2, 0, 0, 0, 0], Trigger::none()),
        Ok(Outcome::Deferred { queued: false })
    );
    assert_eq!(vm.deferred().len(), 1);
}

#[test]
fn map_load_flushes_only_its_own_deferred_actions() {
    let mut first = ImageBuilder::new();
    first.script(1, 0).op(Opcode::Terminate);
    let mut vm = load(&first, 1);

    vm.start_script(5, 2, [4, 0, 0, 0, 0], Trigger::none()).unwrap();
    vm.terminate_script(6, 2).unwrap();
    vm.start_script(7, 3, [0; 5], Trigger::none()).unwrap();
    assert_eq!(vm.deferred().len(), 3);

    let mut second = ImageBuilder::new();
    second
        .script(5, 1)
        .op1(Opcode::PushScriptVar, 0)
        .op1(Opcode::AssignMapVar, 0)
        .op(Opcode::Terminate);
    vm.load_map(2, &second.build()).unwrap();

    assert_eq!(vm.deferred().len(), 1);
    assert_eq!(vm.deferred().iter().next().map(|a| a.map), Some(3));
    assert_eq!(vm.script_status(5), ScriptStatus::Running);
    assert_eq!(instance(&vm, 5).delay, vm.config().deferred_start_delay);

    let mut host = RecordingHost::new();
    run_ticks(&mut vm, &mut host, 35);
    assert_eq!(vm.map_vars().get(0), 0);
    vm.tick(&mut host);
    assert_eq!(vm.map_vars().get(0), 4);
}

#[test]
fn open_scripts_start_after_one_second() {
    let mut builder = ImageBuilder::new();
    builder
        .script(1001, 0)
        .op1(Opcode::IncWorldVar, 0)
        .op(Opcode::Terminate);
    let mut vm = load(&builder, 1);
    let mut host = RecordingHost::new();

    assert_eq!(vm.script_status(1), ScriptStatus::Running);
    assert!(vm.image().find_script(1).is_some_and(|(_, info)| info.open));
    run_ticks(&mut vm, &mut host, 35);
    assert_eq!(vm.world_vars().get(0), 0);
    vm.tick(&mut host);
    assert_eq!(vm.world_vars().get(0), 1);
    assert_eq!(vm.script_status(1), ScriptStatus::Stopped);
}

#[test]
fn tag_wait_resumes_when_host_reports_idle() {
    let mut builder = ImageBuilder::new();
    builder
        .script(1, 0)
        .op1(Opcode::TagWaitDirect, 4)
        .op1(Opcode::IncMapVar, 0)
        .op(Opcode::Terminate);
    let mut vm = load(&builder, 1);
    let mut host = RecordingHost::new();
    host.set_tag_busy(4, true);

    vm.start_script(1, 0, [0; 5], Trigger::none()).unwrap();
    run_ticks(&mut vm, &mut host, 3);
    assert_eq!(vm.script_status(1), ScriptStatus::Waiting);
    assert_eq!(vm.map_vars().get(0), 0);

    host.set_tag_busy(4, false);
    vm.tick(&mut host);
    assert_eq!(vm.map_vars().get(0), 1);
    assert_eq!(vm.script_status(1), ScriptStatus::Stopped);
}

#[test]
fn explicit_poly_notification_wakes_waiters() {
    let mut builder = ImageBuilder::new();
    builder
        .script(1, 0)
        .op1(Opcode::PolyWaitDirect, 2)
        .op1(Opcode::IncMapVar, 0)
        .op(Opcode::Terminate);
    let mut vm = load(&builder, 1);
    let mut host = RecordingHost::new();
    host.set_poly_busy(2, true);

    vm.start_script(1, 0, [0; 5], Trigger::none()).unwrap();
    run_ticks(&mut vm, &mut host, 2);
    assert_eq!(vm.map_vars().get(0), 0);

    vm.poly_finished(2);
    vm.tick(&mut host);
    assert_eq!(vm.map_vars().get(0), 1);
}

#[test]
fn script_wait_follows_target_lifetime() {
    let mut builder = ImageBuilder::new();
    builder
        .script(1, 0)
        .op1(Opcode::ScriptWaitDirect, 2)
        .op1(Opcode::IncMapVar, 0)
        .op(Opcode::Terminate);
    builder
        .script(2, 0)
        .op1(Opcode::DelayDirect, 3)
        .op(Opcode::Terminate);
    let mut vm = load(&builder, 1);
    let mut host = RecordingHost::new();

    vm.start_script(2, 0, [0; 5], Trigger::none()).unwrap();
    vm.start_script(1, 0, [0; 5], Trigger::none()).unwrap();
    run_ticks(&mut vm, &mut host, 4);
    assert_eq!(vm.script_status(1), ScriptStatus::Waiting);
    assert_eq!(vm.map_vars().get(0), 0);

    vm.tick(&mut host);
    assert_eq!(vm.script_status(2), ScriptStatus::Stopped);
    assert_eq!(vm.map_vars().get(0), 1);
}

#[test]
fn terminate_request_is_honoured_on_next_pass() {
    let mut builder = ImageBuilder::new();
    builder
        .script(1, 0)
        .op1(Opcode::TagWaitDirect, 8)
        .op(Opcode::Terminate);
    let mut vm = load(&builder, 1);
    let mut host = RecordingHost::new();
    host.set_tag_busy(8, true);

    vm.start_script(1, 0, [0; 5], Trigger::none()).unwrap();
    vm.tick(&mut host);
    assert_eq!(vm.terminate_script(1, 0), Ok(Outcome::Terminating));
    assert_eq!(vm.script_status(1), ScriptStatus::Terminating);
    assert_eq!(
        vm.start_script(1, 0, [0; 5], Trigger::none()),
        Err(RequestError::AlreadyRunning(1))
    );
    vm.tick(&mut host);
    assert_eq!(vm.script_status(1), ScriptStatus::Stopped);
    assert_eq!(vm.terminate_script(1, 0), Err(RequestError::NotRunning(1)));
}

#[test]
fn script_control_specials_start_other_scripts() {
    let mut builder = ImageBuilder::new();
    builder
        .script(1, 0)
        .ops(Opcode::LSpec5Direct, &[80, 2, 0, 11, 0, 0])
        .ops(Opcode::LSpec3Direct, &[80, 9, 4, 1])
        .op(Opcode::Terminate);
    builder
        .script(2, 1)
        .op1(Opcode::PushScriptVar, 0)
        .op1(Opcode::AssignMapVar, 0)
        .op(Opcode::Terminate);
    let mut vm = load(&builder, 1);
    let mut host = RecordingHost::new();

    vm.start_script(1, 0, [0; 5], Trigger::none()).unwrap();
    vm.tick(&mut host);
    assert!(host.events().is_empty());
    assert_eq!(vm.script_status(2), ScriptStatus::Running);
    assert_eq!(vm.map_vars().get(0), 0);
    assert_eq!(vm.deferred().len(), 1);
    assert_eq!(vm.deferred().iter().next().map(|a| (a.script, a.map)), Some((9, 4)));

    vm.tick(&mut host);
    assert_eq!(vm.map_vars().get(0), 11);
}

#[test]
fn line_trigger_routes_line_scoped_effects() {
    let mut builder = ImageBuilder::new();
    let quake = builder.string("Quake");
    let door = builder.string("DoorOpen");
    builder
        .script(1, 0)
        .op(Opcode::LineSide)
        .op1(Opcode::AssignMapVar, 0)
        .op(Opcode::ClearLineSpecial)
        .push(quake)
        .push(100)
        .op(Opcode::SectorSound)
        .push(17)
        .push(door)
        .push(64)
        .op(Opcode::ThingSound)
        .op(Opcode::BeginPrint)
        .push(i32::from(b'A'))
        .op(Opcode::PrintCharacter)
        .op(Opcode::EndPrint)
        .op(Opcode::Terminate);
    let mut vm = load(&builder, 1);
    let mut host = RecordingHost::new();

    let trigger = Trigger::line(Some(ActorId(2)), LineId(40), LineSide::Back);
    vm.start_script(1, 0, [0; 5], trigger).unwrap();
    vm.tick(&mut host);

    assert_eq!(vm.map_vars().get(0), 1);
    assert_eq!(
        host.events(),
        &[
            HostEvent::ClearLineSpecial { line: LineId(40) },
            HostEvent::Sound {
                sound: "Quake".to_string(),
                volume: 100,
                origin: SoundOrigin::LineSector(LineId(40)),
            },
            HostEvent::Sound {
                sound: "DoorOpen".to_string(),
                volume: 64,
                origin: SoundOrigin::Things(17),
            },
            HostEvent::Print {
                text: "A".to_string(),
                recipient: Some(ActorId(2)),
                style: acs_engine::PrintStyle::Normal,
            },
        ]
    );
}

#[test]
fn game_queries_read_from_host() {
    let mut builder = ImageBuilder::new();
    builder
        .script(1, 0)
        .op(Opcode::PlayerCount)
        .op1(Opcode::AssignMapVar, 0)
        .op(Opcode::GameType)
        .op1(Opcode::AssignMapVar, 1)
        .op(Opcode::GameSkill)
        .op1(Opcode::AssignMapVar, 2)
        .op(Opcode::Timer)
        .op1(Opcode::AssignMapVar, 3)
        .ops(Opcode::ThingCountDirect, &[30, 5])
        .op1(Opcode::AssignMapVar, 4)
        .op(Opcode::Terminate);
    let mut vm = load(&builder, 1);
    let mut host = RecordingHost::new();
    host.set_game(4, acs_engine::GameType::Deathmatch, 3);
    host.set_thing_count(30, 5, 6);
    host.advance();
    host.advance();

    vm.start_script(1, 0, [0; 5], Trigger::none()).unwrap();
    vm.tick(&mut host);
    assert_eq!(&vm.map_vars().as_slice()[..5], &[4, 2, 3, 2, 6]);
}

#[test]
fn restart_jumps_back_to_entry() {
    let mut builder = ImageBuilder::new();
    builder
        .script(1, 0)
        .op1(Opcode::IncMapVar, 0)
        .op1(Opcode::DelayDirect, 1)
        .op(Opcode::Restart);
    let mut vm = load(&builder, 1);
    let mut host = RecordingHost::new();

    vm.start_script(1, 0, [0; 5], Trigger::none()).unwrap();
    run_ticks(&mut vm, &mut host, 5);
    assert_eq!(vm.map_vars().get(0), 3);
}

#[test]
fn unknown_opcode_faults_when_reached() {
    let mut builder = ImageBuilder::new();
    builder.script(1, 0).op1(Opcode::IncMapVar, 0).raw(555);
    let mut vm = load(&builder, 1);
    let mut host = RecordingHost::new();

    vm.start_script(1, 0, [0; 5], Trigger::none()).unwrap();
    vm.tick(&mut host);
    assert_eq!(vm.map_vars().get(0), 1);
    assert_eq!(vm.script_status(1), ScriptStatus::Stopped);
}

#[test]
fn new_game_clears_world_state() {
    let mut builder = ImageBuilder::new();
    builder
        .script(1, 0)
        .op1(Opcode::IncWorldVar, 1)
        .op(Opcode::Suspend)
        .op(Opcode::Terminate);
    let mut vm = load(&builder, 1);
    let mut host = RecordingHost::new();

    vm.start_script(1, 0, [0; 5], Trigger::none()).unwrap();
    vm.start_script(3, 5, [0; 5], Trigger::none()).unwrap();
    vm.tick(&mut host);
    assert_eq!(vm.world_vars().get(1), 1);

    vm.new_game();
    assert_eq!(vm.world_vars().get(1), 0);
    assert!(vm.deferred().is_empty());
    assert_eq!(vm.script_status(1), ScriptStatus::Stopped);
}

#[test]
fn snapshot_survives_json_and_resumes() -> Result<()> {
    let mut builder = ImageBuilder::new();
    builder
        .script(1, 2)
        .op1(Opcode::PushScriptVar, 0)
        .op1(Opcode::DelayDirect, 2)
        .op1(Opcode::PushScriptVar, 1)
        .op(Opcode::Multiply)
        .op1(Opcode::AssignWorldVar, 0)
        .op(Opcode::Terminate);
    let bytes = builder.build();
    let mut vm = load(&builder, 1);
    let mut host = RecordingHost::new();

    vm.start_script(1, 0, [6, 7, 0, 0, 0], Trigger::actor(ActorId(1)))
        .unwrap();
    vm.start_script(4, 9, [0; 5], Trigger::none()).unwrap();
    vm.tick(&mut host);

    let json = serde_json::to_string(&vm.snapshot())?;
    let snapshot: VmSnapshot = serde_json::from_str(&json)?;

    let mut restored = Vm::new(config());
    restored.restore(ScriptImage::parse(&bytes)?, snapshot)?;
    assert_eq!(restored.current_map(), 1);
    assert_eq!(restored.deferred().len(), 1);
    assert_eq!(instance(&restored, 1).stack.as_slice(), &[6]);

    run_ticks(&mut restored, &mut host, 3);
    assert_eq!(restored.world_vars().get(0), 42);
    Ok(())
}
