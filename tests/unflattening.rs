//! Integration tests for control flow unflattening.
//!
//! Each test builds a small flattened function the way an OLLVM-style
//! obfuscator lays it out (entry assigns the first key, a chain of `jz`
//! blocks dispatches on the state variable, every case assigns the next key
//! and jumps back) and checks the rewritten graph.

use deflatten::{prelude::*, Result};

const ENTRY: u64 = 0x0040_1000;

/// Balanced keys: exactly half of their bits are set.
const K_A: u64 = 0x3C5A_96F0;
const K_B: u64 = 0x5A0F_C3A5;
const K_C: u64 = 0x96C3_5A0F;

fn state() -> Operand {
    Operand::reg(8, 4)
}

fn temp() -> Operand {
    Operand::reg(12, 4)
}

fn slot() -> Operand {
    Operand::stack(-0x14, 4)
}

/// Jump target of a block's terminator.
fn exit_of(func: &Function, block: usize) -> Option<usize> {
    func.block(block)?.tail()?.jump_target()
}

/// Entry -> case A -> case B -> exit, with B reached through two keys.
fn straight_line(ea: u64, first: u64, second: u64) -> Result<Function> {
    FunctionBuilder::new(ea).build_with(|f| {
        f.block(0, |b| {
            b.mov_num(first, state());
        });
        f.block(1, |b| {
            b.jz(state(), first, 4);
        });
        f.block(2, |b| {
            b.jz(state(), second, 5);
        });
        f.block(3, |b| {
            b.ret();
        });
        f.block(4, |b| {
            b.call("step_a", Operand::Empty).mov_num(second, state()).goto(1);
        });
        f.block(5, |b| {
            b.call("step_b", Operand::Empty).ret();
        });
    })
}

/// An `if` inside case A: both arms assign a temporary that the shared tail
/// block copies into the state variable.
fn with_conditional() -> Result<Function> {
    FunctionBuilder::new(ENTRY).build_with(|f| {
        f.block(0, |b| {
            b.mov_num(K_A, state());
        });
        f.block(1, |b| {
            b.jz(state(), K_A, 5);
        });
        f.block(2, |b| {
            b.jz(state(), K_B, 8);
        });
        f.block(3, |b| {
            b.jz(state(), K_C, 9);
        });
        f.block(4, |b| {
            b.ret();
        });
        f.block(5, |b| {
            b.call("cond", Operand::reg(0, 4))
                .mov_num(K_B, temp())
                .jcc(Opcode::Jnz, Operand::reg(0, 4), Operand::number(0, 4), 7);
        });
        f.block(6, |b| {
            b.mov_num(K_C, temp());
        });
        f.block(7, |b| {
            b.mov(temp(), state()).goto(1);
        });
        f.block(8, |b| {
            b.call("then_arm", Operand::Empty).mov_num(K_C, state()).goto(1);
        });
        f.block(9, |b| {
            b.ret();
        });
    })
}

#[test]
fn test_single_target_reconnects_cases() -> Result<()> {
    // 0x41414141 / 0x42424242 have a set-bit fraction of 0.25; the host
    // vouches for the function, so the entropy check is skipped.
    let mut func = straight_line(ENTRY, 0x4141_4141, 0x4242_4242)?;
    let session = Session::new();
    session.whitelist(ENTRY);

    let changed = Unflattener::new().optimize(&mut func, &session)?;
    assert!(changed > 0);
    func.verify()?;

    // Dispatcher blocks 1-3 are pruned: 0 -> 1 (case A) -> 2 (case B).
    assert_eq!(func.block_count(), 3);
    assert_eq!(exit_of(&func, 0), Some(1));
    assert_eq!(exit_of(&func, 1), Some(2));
    assert!(func.top_instructions().all(|(_, insn)| insn.opcode != Opcode::Jz));
    assert!(func.top_instructions().all(|(_, insn)| !insn.is_numeric_mov()));

    let stats = session.stats();
    assert_eq!(stats.blocks_reconnected, 2);
    assert_eq!(stats.blocks_removed, 3);
    assert_eq!(stats.instructions_removed, 2);
    assert_eq!(stats.dispatchers, 1);
    assert_eq!(stats.functions_transformed, 1);
    Ok(())
}

#[test]
fn test_conditional_recovery() -> Result<()> {
    let mut func = with_conditional()?;
    let session = Session::new();

    let changed = Unflattener::new().optimize(&mut func, &session)?;
    assert!(changed > 0);
    func.verify()?;

    // Survivors, renumbered: 0 entry, 1 cond, 2 else arm, 3 then tail,
    // 4 case B, 5 exit.
    assert_eq!(func.block_count(), 6);
    assert_eq!(exit_of(&func, 0), Some(1));
    assert_eq!(exit_of(&func, 1), Some(3));
    assert_eq!(func.block(1).map(|b| b.succs().len()), Some(2));
    assert_eq!(exit_of(&func, 2), Some(5));
    assert_eq!(exit_of(&func, 3), Some(4));
    assert_eq!(exit_of(&func, 4), Some(5));
    assert_eq!(func.block(5).map(|b| b.preds().len()), Some(2));

    assert!(func.top_instructions().all(|(_, insn)| !insn.is_mov()));
    assert!(func.chains_dirty());
    assert!(func.local_opt_requested());
    assert_eq!(session.stats().conditionals_recovered, 1);
    Ok(())
}

#[test]
fn test_conditional_recovery_can_be_disabled() -> Result<()> {
    let mut func = with_conditional()?;
    let session = Session::new();
    let config = UnflattenConfig {
        conditional_recovery: false,
        ..UnflattenConfig::default()
    };

    Unflattener::with_config(config)?.optimize(&mut func, &session)?;
    func.verify()?;

    // The shared tail still returns to the dispatcher, which stays alive.
    assert_eq!(func.block_count(), 10);
    assert_eq!(exit_of(&func, 7), Some(1));
    assert!(!func.chains_dirty());
    assert_eq!(session.stats().conditionals_recovered, 0);
    Ok(())
}

#[test]
fn test_low_entropy_function_is_blacklisted() -> Result<()> {
    let mut func = FunctionBuilder::new(ENTRY).build_with(|f| {
        f.block(0, |b| {
            b.mov_num(1, state());
        });
        f.block(1, |b| {
            b.jz(state(), 1, 4);
        });
        f.block(2, |b| {
            b.jz(state(), 2, 5);
        });
        f.block(3, |b| {
            b.jz(state(), 3, 5);
        });
        f.block(4, |b| {
            b.mov_num(2, state()).goto(1);
        });
        f.block(5, |b| {
            b.ret();
        });
    })?;
    let before: Vec<String> = func.top_instructions().map(|(_, i)| i.to_string()).collect();

    let session = Session::new();
    assert_eq!(Unflattener::new().optimize(&mut func, &session)?, 0);
    assert!(session.is_blacklisted(ENTRY));

    let after: Vec<String> = func.top_instructions().map(|(_, i)| i.to_string()).collect();
    assert_eq!(before, after);
    assert_eq!(func.block_count(), 6);

    // A blacklisted function is not analysed again, even at a new maturity.
    let mut later = func.clone();
    later.set_maturity(Maturity::Calls);
    assert_eq!(Unflattener::new().optimize(&mut later, &session)?, 0);
    assert_eq!(session.stats().blacklisted, 1);
    Ok(())
}

#[test]
fn test_computed_key_keeps_dispatcher_edge() -> Result<()> {
    let mut func = FunctionBuilder::new(ENTRY).build_with(|f| {
        f.block(0, |b| {
            b.mov_num(K_A, state());
        });
        f.block(1, |b| {
            b.jz(state(), K_A, 4);
        });
        f.block(2, |b| {
            b.jz(state(), K_B, 5);
        });
        f.block(3, |b| {
            b.ret();
        });
        f.block(4, |b| {
            b.binary(Opcode::Xor, state(), Operand::number(0x6655_5555, 4), state())
                .goto(1);
        });
        f.block(5, |b| {
            b.ret();
        });
    })?;

    let session = Session::new();
    let changed = Unflattener::new().optimize(&mut func, &session)?;
    assert!(changed > 0);
    func.verify()?;

    // Only the entry is redirected; the dispatcher is still reachable from
    // case A and nothing is pruned.
    assert_eq!(func.block_count(), 6);
    assert_eq!(exit_of(&func, 0), Some(4));
    assert_eq!(exit_of(&func, 4), Some(1));
    assert!(func.block(1).is_some_and(|b| b.preds() == [4]));
    Ok(())
}

#[test]
fn test_clobbered_copy_is_not_traced() -> Result<()> {
    let mut func = FunctionBuilder::new(ENTRY).build_with(|f| {
        f.block(0, |b| {
            b.mov_num(K_A, state());
        });
        f.block(1, |b| {
            b.jz(state(), K_A, 4);
        });
        f.block(2, |b| {
            b.jz(state(), K_B, 5);
        });
        f.block(3, |b| {
            b.ret();
        });
        f.block(4, |b| {
            b.mov_num(K_B, temp())
                .call("may_clobber", Operand::reg(0, 4))
                .mov(temp(), state())
                .goto(1);
        });
        f.block(5, |b| {
            b.ret();
        });
    })?;

    let session = Session::new();
    Unflattener::new().optimize(&mut func, &session)?;
    func.verify()?;

    assert_eq!(exit_of(&func, 4), Some(1));
    let case = func.block(4).map(|b| b.instructions().to_vec()).unwrap_or_default();
    assert!(case[0].is_numeric_mov());
    assert!(case[2].is_mov());
    Ok(())
}

#[test]
fn test_stack_slot_forward_fallback() -> Result<()> {
    let build = || {
        FunctionBuilder::new(ENTRY).build_with(|f| {
            f.block(0, |b| {
                b.mov_num(K_A, state());
            });
            f.block(1, |b| {
                b.jz(state(), K_A, 4);
            });
            f.block(2, |b| {
                b.jz(state(), K_B, 5);
            });
            f.block(3, |b| {
                b.ret();
            });
            f.block(4, |b| {
                b.mov_num(K_B, slot())
                    .call("work", Operand::reg(0, 4))
                    .mov(slot(), state())
                    .goto(1);
            });
            f.block(5, |b| {
                b.ret();
            });
        })
    };

    let mut func = build()?;
    let session = Session::new();
    Unflattener::new().optimize(&mut func, &session)?;
    func.verify()?;
    assert_eq!(func.block_count(), 3);
    assert_eq!(exit_of(&func, 1), Some(2));
    // The slot initialization is left for later dead store elimination.
    let case = func.block(1).map(|b| b.instructions().to_vec()).unwrap_or_default();
    assert!(case[0].is_numeric_mov());
    assert!(case[2].is_nop());

    let mut func = build()?;
    let session = Session::new();
    let config = UnflattenConfig {
        stack_forward_fallback: false,
        ..UnflattenConfig::default()
    };
    Unflattener::with_config(config)?.optimize(&mut func, &session)?;
    func.verify()?;
    assert_eq!(exit_of(&func, 4), Some(1));
    Ok(())
}

#[test]
fn test_goto_chains_are_collapsed_first() -> Result<()> {
    let mut func = FunctionBuilder::new(ENTRY).build_with(|f| {
        f.block(0, |b| {
            b.mov_num(K_A, state());
        });
        f.block(1, |b| {
            b.jz(state(), K_A, 4);
        });
        f.block(2, |b| {
            b.jz(state(), K_B, 6);
        });
        f.block(3, |b| {
            b.ret();
        });
        f.block(4, |b| {
            b.mov_num(K_B, state()).goto(5);
        });
        f.block(5, |b| {
            b.goto(1);
        });
        f.block(6, |b| {
            b.ret();
        });
    })?;

    let session = Session::new();
    Unflattener::new().optimize(&mut func, &session)?;
    func.verify()?;

    assert_eq!(func.block_count(), 3);
    assert_eq!(exit_of(&func, 0), Some(1));
    assert_eq!(exit_of(&func, 1), Some(2));
    assert!(session.events.has(EventKind::GotoCollapsed));
    Ok(())
}

#[test]
fn test_handoff_through_temporary() -> Result<()> {
    let mut func = FunctionBuilder::new(ENTRY).build_with(|f| {
        f.block(0, |b| {
            b.mov_num(K_A, temp());
        });
        f.block(1, |b| {
            b.mov(temp(), state());
        });
        f.block(2, |b| {
            b.jz(state(), K_A, 5);
        });
        f.block(3, |b| {
            b.jz(state(), K_B, 6);
        });
        f.block(4, |b| {
            b.ret();
        });
        f.block(5, |b| {
            b.call("body", Operand::Empty).mov_num(K_B, temp()).goto(1);
        });
        f.block(6, |b| {
            b.ret();
        });
    })?;

    let session = Session::new();
    let pass = Unflattener::new();
    let info = pass.dispatch_info(&func, &session)?;
    assert_eq!(info.dispatcher(), 1);
    assert!(info.assign_var().equal_ignore_size(&temp()));

    session.reset();
    pass.optimize(&mut func, &session)?;
    func.verify()?;
    assert_eq!(func.block_count(), 3);
    assert_eq!(exit_of(&func, 0), Some(1));
    assert_eq!(exit_of(&func, 1), Some(2));
    Ok(())
}

#[test]
fn test_key_mapping_is_injective() -> Result<()> {
    let func = with_conditional()?;
    let session = Session::new();
    let info = Unflattener::new().dispatch_info(&func, &session)?;

    assert_eq!(info.case_count(), 3);
    for (key, block) in info.cases() {
        assert_eq!(info.key_for_block(block), Some(key));
    }
    assert_eq!(info.block_for_key(K_A), Some(5));
    assert_eq!(info.block_for_key(K_B), Some(8));
    assert_eq!(info.block_for_key(K_C), Some(9));
    assert_eq!(info.cluster_head(7), Some(5));
    assert_eq!(info.cluster_head(6), Some(5));
    assert_eq!(info.cluster_head(3), None);
    Ok(())
}

#[test]
fn test_shared_case_block_rejected() -> Result<()> {
    let mut func = FunctionBuilder::new(ENTRY).build_with(|f| {
        f.block(0, |b| {
            b.mov_num(K_A, state());
        });
        f.block(1, |b| {
            b.jz(state(), K_A, 3);
        });
        f.block(2, |b| {
            b.jz(state(), K_B, 3);
        });
        f.block(3, |b| {
            b.mov_num(K_B, state()).goto(1);
        });
    })?;
    let before: Vec<String> = func.top_instructions().map(|(_, i)| i.to_string()).collect();

    let session = Session::new();
    session.whitelist(ENTRY);
    let unflattener = Unflattener::new();
    assert!(unflattener.dispatch_info(&func, &session).is_err());
    assert!(session.events.has(EventKind::Warning));

    assert_eq!(unflattener.optimize(&mut func, &session)?, 0);
    assert!(!session.is_blacklisted(ENTRY));

    let after: Vec<String> = func.top_instructions().map(|(_, i)| i.to_string()).collect();
    assert_eq!(before, after);
    assert_eq!(exit_of(&func, 3), Some(1));
    Ok(())
}

#[test]
fn test_run_all_batch() -> Result<()> {
    let mut funcs = vec![
        straight_line(0x1000, K_A, K_B)?,
        straight_line(0x2000, K_B, K_C)?,
        straight_line(0x3000, 1, 2)?,
        with_conditional()?,
    ];

    let session = Session::new();
    let changed = session.run_all(&Unflattener::new(), &mut funcs);
    assert!(changed > 0);

    assert_eq!(funcs[0].block_count(), 3);
    assert_eq!(funcs[1].block_count(), 3);
    assert_eq!(funcs[2].block_count(), 6);
    assert_eq!(funcs[3].block_count(), 6);
    for func in &funcs {
        func.verify()?;
    }

    assert!(session.is_blacklisted(0x3000));
    let stats = session.stats();
    assert_eq!(stats.functions_transformed, 3);
    assert_eq!(stats.dispatchers, 3);
    assert_eq!(stats.errors, 0);
    Ok(())
}

#[test]
fn test_scheduler_runs_once_per_maturity() -> Result<()> {
    let mut funcs = vec![straight_line(0x1000, K_A, K_B)?];
    let mut scheduler = PassScheduler::default();
    scheduler.add_pass(Unflattener::new());
    assert_eq!(scheduler.pass_names(), vec!["cff-unflattening"]);

    let session = Session::new();
    assert!(scheduler.run(&mut funcs, &session) > 0);
    assert_eq!(scheduler.run(&mut funcs, &session), 0);
    assert_eq!(session.last_maturity(0x1000), Some(Maturity::LocalOpt));
    Ok(())
}
