//! Unreachable block removal.

use crate::{
    analysis::ir::Function,
    compiler::{EventKind, EventLog},
    utils::graph::reachable_from,
    Result,
};

/// Removes every block that cannot be reached from the entry block.
///
/// Unreachable blocks first lose their instructions and their edges in both
/// directions, then they are compacted out of the function and every block
/// reference in the surviving instructions and edge lists is renumbered.
///
/// # Arguments
///
/// * `func` - The function to prune.
/// * `events` - Receives one [`EventKind::BlockRemoved`] per removed block.
///
/// # Returns
///
/// The number of blocks removed.
///
/// # Errors
///
/// Returns an error if the edge lists reference blocks outside the function.
pub fn prune_unreachable(func: &mut Function, events: &EventLog) -> Result<usize> {
    if func.block_count() == 0 {
        return Ok(0);
    }

    let reachable = reachable_from(&*func, 0);
    let dead: Vec<usize> = (0..func.block_count())
        .filter(|&serial| !reachable.contains(serial))
        .collect();

    for &serial in &dead {
        // Unreachable predecessors are still attached to other dead blocks.
        let preds = func.block(serial).map(|b| b.preds().to_vec()).unwrap_or_default();
        for pred in preds {
            func.remove_edge(pred, serial)?;
        }
        func.delete_block(serial)?;
        events
            .record(EventKind::BlockRemoved)
            .at(func.entry_ea(), serial);
    }

    func.remove_blocks(&dead);
    Ok(dead.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ir::FunctionBuilder;

    #[test]
    fn test_prune_renumbers_survivors() {
        let mut func = FunctionBuilder::new(0)
            .build_with(|f| {
                f.block(0, |b| {
                    b.goto(3);
                });
                f.block(1, |b| {
                    b.goto(2);
                });
                f.block(2, |b| {
                    b.goto(1);
                });
                f.block(3, |b| {
                    b.ret();
                });
            })
            .unwrap();
        let events = EventLog::new();

        assert_eq!(prune_unreachable(&mut func, &events).unwrap(), 2);
        assert_eq!(func.block_count(), 2);
        assert_eq!(func.block(0).unwrap().tail().unwrap().jump_target(), Some(1));
        assert_eq!(func.block(1).unwrap().preds(), &[0]);
        assert_eq!(events.count_kind(EventKind::BlockRemoved), 2);
        func.verify().unwrap();
    }

    #[test]
    fn test_prune_keeps_reachable_graph() {
        let mut func = FunctionBuilder::new(0)
            .build_with(|f| {
                f.block(0, |b| {
                    b.nop();
                });
                f.block(1, |b| {
                    b.ret();
                });
            })
            .unwrap();

        assert_eq!(prune_unreachable(&mut func, &EventLog::new()).unwrap(), 0);
        assert_eq!(func.block_count(), 2);
    }
}
