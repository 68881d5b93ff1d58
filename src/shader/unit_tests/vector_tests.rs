use crate::shader::command::{DecodeCommandKind, DecodeState};
use crate::shader::config::VectorShaderConfig;
use crate::shader::emulator::TraceEmulator;
use crate::shader::inst::{DynInst, VectorInstruction};
use crate::shader::isa::{Bank, Operand};
use crate::shader::unit_tests::common::{texture_result, vector_inst, VectorBench};

fn narrow_config() -> VectorShaderConfig {
    let mut cfg = VectorShaderConfig::default();
    cfg.vector_threads = 4;
    cfg.vector_length = 4;
    cfg.alu_width = 2;
    cfg.alu_config = "simd4".to_string();
    cfg
}

#[test]
fn lanes_complete_one_alu_pass_apart() {
    let mut bench = VectorBench::vector(narrow_config());
    assert_eq!(1, bench.engine.instr_cycle());

    // mov: 3 + 1 cycles, lanes 0-1 issue on cycle 1 and lanes 2-3 on cycle 2
    bench.feed(vec![vector_inst("mov r0, i0", 0, 0, 4)]);
    bench.step();
    // hazard state is recorded at decode, before lanes 2-3 issue
    let r0 = Operand::new(Bank::Temp, 0);
    let regs = &bench.engine.thread_control(0).unwrap().regs;
    assert!(regs.raw_pending(r0));
    assert!(regs.waw_blocked(r0, 5).unwrap());
    assert!(!regs.waw_blocked(r0, 6).unwrap());

    bench.run_to(5);
    assert_eq!(0, bench.engine.stats().executed);
    assert_eq!(1, bench.engine.thread_control(0).unwrap().pending);
    bench.step();
    assert_eq!(2, bench.engine.stats().executed);
    assert_eq!(0, bench.engine.thread_control(0).unwrap().pending);
    bench.step();
    assert_eq!(4, bench.engine.stats().executed);
}

#[test]
fn stalled_fetch_is_kept_in_decode() {
    let mut bench = VectorBench::vector(narrow_config());
    bench.feed(vec![vector_inst("addi r0, i0, #1", 0, 0, 4)]);
    bench.run_to(3);

    // r0 is written back on cycle 4
    bench.feed(vec![vector_inst("mov r1, r0", 1, 0, 4)]);
    bench.step();
    assert_eq!(Some(DecodeState::Busy), bench.state);
    assert_eq!(1, bench.engine.thread_control(0).unwrap().pending);

    bench.step();
    assert_eq!(1, bench.engine.thread_control(0).unwrap().pending);
    assert!(bench.sent(DecodeCommandKind::RepeatLast).is_empty());
    assert_eq!(0, bench.engine.stats().removed);

    bench.run_to(10);
    assert_eq!(8, bench.engine.stats().executed);
}

#[test]
fn stalled_fetch_is_repeated() {
    let mut cfg = narrow_config();
    cfg.wait_on_stall = false;
    let mut bench = VectorBench::vector(cfg);
    bench.feed(vec![vector_inst("addi r0, i0, #1", 0, 0, 4)]);
    bench.run_to(3);
    bench.feed(vec![vector_inst("mov r1, r0", 1, 0, 4)]);
    bench.step();

    let repeats = bench.sent(DecodeCommandKind::RepeatLast);
    assert_eq!(1, repeats.len());
    assert_eq!((3, 0, 1), (repeats[0].0, repeats[0].1.thread, repeats[0].1.pc));
    assert_eq!(1, bench.engine.stats().removed);
    assert_eq!(Some(DecodeState::Ready), bench.state);
}

#[test]
fn dual_issue_splits_on_repeat() {
    let mut cfg = narrow_config();
    cfg.alu_config = "simd4+scalar".to_string();
    let mut bench = VectorBench::vector(cfg);
    assert_eq!(2, bench.engine.instr_cycle());

    // second slot reads the first slot's result
    bench.feed(vec![
        vector_inst("mov r0, i0", 0, 1, 4),
        vector_inst("mov r1.x, r0", 1, 1, 4),
    ]);
    bench.step();
    let repeats = bench.sent(DecodeCommandKind::RepeatLast);
    assert_eq!(1, repeats.len());
    assert_eq!(1, repeats[0].1.thread);
    assert_eq!(1, repeats[0].1.pc);
    assert_eq!(1, bench.engine.stats().removed);
    assert_eq!(1, bench.engine.thread_control(1).unwrap().pending);
}

#[test]
fn jump_resolves_at_last_lane() {
    let emulator = TraceEmulator::default().with_jump_budget(1);
    let mut bench = VectorBench::vector_with(narrow_config(), emulator);

    // jmp: 1 + 1 cycles, last lane pair issues on cycle 2
    bench.feed(vec![vector_inst("jmp p0, 7", 2, 0, 4)]);
    bench.step();
    let blocks = bench.sent(DecodeCommandKind::BlockThread);
    assert_eq!(1, blocks.len());
    assert_eq!(2, blocks[0].1.pc);
    assert!(bench.engine.thread_control(0).unwrap().pending_jump);

    bench.run_to(4);
    assert!(bench.sent(DecodeCommandKind::NewPc).is_empty());
    bench.step();
    let new_pcs = bench.sent(DecodeCommandKind::NewPc);
    assert_eq!(1, new_pcs.len());
    assert_eq!((4, 7), (new_pcs[0].0, new_pcs[0].1.pc));
    let unblocks = bench.sent(DecodeCommandKind::UnblockThread);
    assert_eq!(1, unblocks.len());
    assert_eq!(4, unblocks[0].0);
    // NEW_PC goes out ahead of the unblock
    let order: Vec<_> = bench.received.iter().map(|(_, cmd)| cmd.kind).collect();
    assert_eq!(
        vec![DecodeCommandKind::BlockThread, DecodeCommandKind::NewPc, DecodeCommandKind::UnblockThread],
        order
    );
    let thread = bench.engine.thread_control(0).unwrap();
    assert!(!thread.pending_jump);
    assert!(thread.ready);
    assert_eq!(1, bench.engine.stats().new_pcs);
}

#[test]
fn texture_wakes_thread_when_all_elements_return() {
    let mut bench = VectorBench::vector(narrow_config());
    bench.grant_tickets(0);
    bench.feed(vec![vector_inst("tex r1, i0, t0", 0, 0, 4)]);
    bench.step();
    assert_eq!(0, bench.engine.texture_tickets(0));
    assert_eq!(4, bench.engine.thread_control(0).unwrap().pending_tex_elements);
    assert_eq!(1, bench.sent(DecodeCommandKind::BlockThread).len());

    // the stamp is complete once lanes 2-3 executed on cycle 2
    bench.run_to(4);
    assert_eq!(1, bench.requests.len());
    assert_eq!(2, bench.requests[0].0);
    let request = bench.requests[0].1.clone();

    bench.complete_texture(0, &request);
    bench.step();
    assert_eq!(0, bench.engine.thread_control(0).unwrap().pending_tex_elements);
    assert!(bench.sent(DecodeCommandKind::UnblockThread).is_empty());

    bench.step();
    let unblocks = bench.sent(DecodeCommandKind::UnblockThread);
    assert_eq!(1, unblocks.len());
    assert_eq!((5, 0, 1), (unblocks[0].0, unblocks[0].1.thread, unblocks[0].1.pc));
    let thread = bench.engine.thread_control(0).unwrap();
    assert!(thread.ready);
    assert!(!thread.wait_texture);
}

#[test]
fn texture_without_tickets_stalls() {
    let mut bench = VectorBench::vector(narrow_config());
    bench.feed(vec![vector_inst("tex r1, i0, t0", 0, 0, 4)]);
    bench.step();
    assert_eq!(Some(DecodeState::Busy), bench.state);
    assert_eq!(0, bench.engine.thread_control(0).unwrap().pending);

    bench.grant_tickets(0);
    bench.step();
    assert_eq!(1, bench.engine.thread_control(0).unwrap().pending);
    assert_eq!(1, bench.sent(DecodeCommandKind::BlockThread).len());
}

#[test]
fn fetch_during_execution_is_rejected() {
    let mut bench = VectorBench::vector(narrow_config());
    bench.feed(vec![vector_inst("mov r0, i0", 0, 0, 4)]);
    bench.step();
    bench.feed(vec![vector_inst("mov r1, i0", 0, 1, 4)]);
    assert!(bench.engine.clock(bench.cycle).is_err());
}

#[test]
fn fake_lanes_count_once_per_slot() {
    let mut bench = VectorBench::vector(narrow_config());
    let fake = VectorInstruction::new((0..4).map(|element| DynInst::fake(0, element, 0)).collect());
    bench.feed(vec![fake]);
    bench.run_to(4);
    assert_eq!(1, bench.engine.stats().faked);
    assert_eq!(0, bench.engine.stats().executed);
}

#[test]
fn explicit_block_waits_at_wait_point() {
    let mut cfg = narrow_config();
    cfg.explicit_block = true;
    let mut bench = VectorBench::vector(cfg);
    bench.grant_tickets(0);
    bench.feed(vec![vector_inst("tex r1, i0, t0", 0, 0, 4)]);
    bench.step();
    assert!(bench.sent(DecodeCommandKind::BlockThread).is_empty());
    assert_eq!(4, bench.engine.thread_control(0).unwrap().pending_tex_elements);
    assert!(bench.engine.thread_control(0).unwrap().ready);

    bench.run_to(3);
    bench.feed(vec![vector_inst("@mov r2, i1", 1, 0, 4)]);
    bench.step();
    let blocks = bench.sent(DecodeCommandKind::BlockThread);
    assert_eq!(1, blocks.len());
    assert_eq!((3, 1), (blocks[0].0, blocks[0].1.pc));
    assert_eq!(1, bench.requests.len());

    let request = bench.requests[0].1.clone();
    bench.complete_texture(0, &request);
    bench.run_to(6);
    let unblocks = bench.sent(DecodeCommandKind::UnblockThread);
    assert_eq!(1, unblocks.len());
    assert_eq!((5, 0), (unblocks[0].0, unblocks[0].1.thread));
}

#[test]
fn fast_gpu_clock_delivers_several_wakeups_per_shader_cycle() {
    let mut cfg = narrow_config();
    cfg.gpu_clock_mhz = 1000;
    cfg.shader_clock_mhz = 500;
    let mut bench = VectorBench::vector(cfg);

    bench.grant_tickets(0);
    bench.step();
    bench.grant_tickets(0);
    bench.feed(vec![vector_inst("tex r1, i0, t0", 0, 0, 4)]);
    bench.step();
    bench.run_to(4);
    bench.feed(vec![vector_inst("tex r1, i0, t0", 0, 1, 4)]);
    bench.step();
    bench.run_to(10);
    assert_eq!(2, bench.requests.len());
    assert_eq!(0, bench.engine.texture_tickets(0));

    // both stamps return on consecutive GPU edges inside one shader cycle
    let first = texture_result(&bench.requests[0].1);
    let second = texture_result(&bench.requests[1].1);
    bench.units[0].results.write(9, first).unwrap();
    bench.units[0].results.write(10, second).unwrap();
    bench.engine.gpu_clock(10).unwrap();
    bench.engine.gpu_clock(11).unwrap();
    bench.engine.shader_clock(10).unwrap();

    let unblocks = bench.fetch.control.read_all(11).unwrap();
    assert_eq!(2, unblocks.len());
    assert!(unblocks.iter().all(|cmd| cmd.kind == DecodeCommandKind::UnblockThread));
    assert_eq!(vec![0, 1], unblocks.iter().map(|cmd| cmd.thread).collect::<Vec<_>>());
    assert!(bench.engine.thread_control(0).unwrap().ready);
    assert!(bench.engine.thread_control(1).unwrap().ready);
}

#[test]
fn zexport_reported_at_first_lane() {
    let mut bench = VectorBench::vector(narrow_config());
    // zxp: 3 + 1 cycles, lane 0 writes back on cycle 5
    bench.feed(vec![vector_inst("zxp i0", 2, 0, 4)]);
    bench.step();
    assert!(bench.engine.thread_control(0).unwrap().zexport);

    bench.run_to(7);
    let exports = bench.sent(DecodeCommandKind::ZexportThread);
    assert_eq!(1, exports.len());
    assert_eq!((5, 0, 3), (exports[0].0, exports[0].1.thread, exports[0].1.pc));
    assert_eq!(1, bench.engine.stats().zexports);
    assert!(!bench.engine.thread_control(0).unwrap().zexport);
}

#[test]
fn end_waits_for_outstanding_texture() {
    let mut cfg = narrow_config();
    cfg.explicit_block = true;
    let mut bench = VectorBench::vector(cfg);
    bench.grant_tickets(0);
    bench.feed(vec![vector_inst("tex r1, i0, t0", 0, 0, 4)]);
    bench.step();
    bench.run_to(3);

    // end: 1 + 1 cycles, last lane written back on cycle 6
    bench.feed(vec![vector_inst("end", 1, 0, 4)]);
    bench.step();
    assert_eq!(1, bench.sent(DecodeCommandKind::BlockThread).len());
    bench.run_to(7);
    assert!(bench.sent(DecodeCommandKind::EndThread).is_empty());
    assert_eq!(0, bench.engine.thread_control(0).unwrap().pending);

    let request = bench.requests[0].1.clone();
    bench.complete_texture(0, &request);
    bench.step();
    assert!(bench.sent(DecodeCommandKind::EndThread).is_empty());
    bench.step();
    let ends = bench.sent(DecodeCommandKind::EndThread);
    assert_eq!(1, ends.len());
    assert_eq!((8, 0), (ends[0].0, ends[0].1.thread));
    assert!(bench.sent(DecodeCommandKind::UnblockThread).is_empty());
    let thread = bench.engine.thread_control(0).unwrap();
    assert!(!thread.end);
    assert!(!thread.wait_texture);
}

#[test]
fn ended_thread_texture_load_is_dropped_without_texture_units() {
    let mut cfg = narrow_config();
    cfg.texture_units = 0;
    let mut bench = VectorBench::vector(cfg);
    bench.feed(vec![vector_inst("end", 0, 0, 4)]);
    bench.step();
    bench.run_to(3);

    bench.feed(vec![vector_inst("tex r1, i0, t0", 1, 0, 4)]);
    bench.step();
    assert_eq!(1, bench.engine.stats().removed);
}
