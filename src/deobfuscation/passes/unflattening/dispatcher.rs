//! Dispatcher recognition.
//!
//! A flattened function keeps its original blocks but routes every transfer
//! through one dispatcher: each case block stores the key of its successor
//! into a state variable and jumps back to a comparison tree that selects
//! the next case with `jz state, #key`. This module finds that structure and
//! records everything the rewrite needs in a [`DispatchInfo`].
//!
//! Recognition proceeds in stages, and the first one that fails rejects the
//! function:
//!
//! 1. The operand compared against immediates most often is the candidate
//!    state variable.
//! 2. Unless the function was whitelisted earlier, the compared constants
//!    must be numerous enough and look random: the fraction of set bits has
//!    to fall in the configured band. Functions failing this are
//!    blacklisted for the rest of the session.
//! 3. The first block and the dispatcher are found by following the single
//!    successor chain from the entry to the first block with several
//!    predecessors.
//! 4. The first block's constant assignments name the variable that carries
//!    the next key, either the state variable itself or a variable copied
//!    into it.
//! 5. Every `jz` on the state variable contributes a key to case mapping.
//! 6. Each case target's dominator set becomes its cluster.

use std::collections::BTreeMap;

use crate::{
    analysis::ir::{Function, Opcode, Operand},
    compiler::{EventKind, EventLog},
    deobfuscation::{passes::unflattening::tracer::key_value, Session, UnflattenConfig},
    utils::graph::compute_dominance,
};

/// Operands compared against immediates, with the immediates they were
/// compared to.
#[derive(Debug, Clone)]
struct ComparisonGroup {
    operand: Operand,
    constants: Vec<Operand>,
}

/// The recovered dispatcher layout of a flattened function.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchInfo {
    compare_var: Operand,
    assign_var: Operand,
    first_block: usize,
    dispatcher: usize,
    first_key: u64,
    key_to_block: BTreeMap<u64, usize>,
    block_to_key: BTreeMap<usize, u64>,
    clusters: Vec<Option<usize>>,
}

impl DispatchInfo {
    /// Recognizes the dispatcher of `func`.
    ///
    /// Updates the session's blacklist and whitelist as a side effect and
    /// records a [`EventKind::DispatcherIdentified`] event on success.
    ///
    /// # Returns
    ///
    /// `None` if the function does not look flattened.
    #[must_use]
    pub fn extract(
        func: &Function,
        session: &Session,
        config: &UnflattenConfig,
        events: &EventLog,
    ) -> Option<Self> {
        let ea = func.entry_ea();

        let Some(group) = collect_comparisons(func) else {
            session.blacklist(ea);
            return None;
        };

        if !session.is_whitelisted(ea) {
            if group.constants.len() < config.min_comparisons {
                session.blacklist(ea);
                return None;
            }
            let fraction = set_bit_fraction(&group.constants);
            if fraction < config.entropy_min || fraction > config.entropy_max {
                events
                    .record(EventKind::Info)
                    .function(ea)
                    .message(format!(
                        "set-bit fraction {fraction:.3} outside [{}, {}]",
                        config.entropy_min, config.entropy_max
                    ));
                session.blacklist(ea);
                return None;
            }
            session.whitelist(ea);
        }

        let (first_block, dispatcher) = find_first_block(func)?;
        let compare_var = group.operand;
        let (assign_var, first_key) =
            resolve_assign_var(func, first_block, &compare_var, config.key_size)?;

        let (key_to_block, block_to_key) =
            map_keys(func, dispatcher, &compare_var, &assign_var, events)?;
        if key_to_block.is_empty() {
            return None;
        }

        let dominance = compute_dominance(func);
        let mut clusters = vec![None; func.block_count()];
        for &target in block_to_key.keys() {
            if let Some(dominated) = dominance.dominated_by(target) {
                for block in dominated.iter() {
                    if let Some(slot) = clusters.get_mut(block) {
                        *slot = Some(target);
                    }
                }
            }
        }

        events
            .record(EventKind::DispatcherIdentified)
            .at(ea, dispatcher)
            .message(format!(
                "first block {first_block}, state {compare_var}, assigned via {assign_var}, {} cases",
                key_to_block.len()
            ));

        Some(Self {
            compare_var,
            assign_var,
            first_block,
            dispatcher,
            first_key,
            key_to_block,
            block_to_key,
            clusters,
        })
    }

    /// The variable the dispatcher compares.
    #[must_use]
    pub fn compare_var(&self) -> &Operand {
        &self.compare_var
    }

    /// The variable case blocks assign the next key to. Equal to
    /// [`DispatchInfo::compare_var`] unless the key is handed off through a
    /// copy.
    #[must_use]
    pub fn assign_var(&self) -> &Operand {
        &self.assign_var
    }

    /// The last block before the dispatcher on the entry path.
    #[must_use]
    pub fn first_block(&self) -> usize {
        self.first_block
    }

    /// The dispatcher's entry block.
    #[must_use]
    pub fn dispatcher(&self) -> usize {
        self.dispatcher
    }

    /// Key assigned in the first block.
    #[must_use]
    pub fn first_key(&self) -> u64 {
        self.first_key
    }

    /// Case block selected by `key`.
    #[must_use]
    pub fn block_for_key(&self, key: u64) -> Option<usize> {
        self.key_to_block.get(&key).copied()
    }

    /// Key that selects `block`.
    #[must_use]
    pub fn key_for_block(&self, block: usize) -> Option<u64> {
        self.block_to_key.get(&block).copied()
    }

    /// Iterates over `(key, block)` pairs in key order.
    pub fn cases(&self) -> impl Iterator<Item = (u64, usize)> + '_ {
        self.key_to_block.iter().map(|(k, b)| (*k, *b))
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn case_count(&self) -> usize {
        self.key_to_block.len()
    }

    /// Returns the case block whose cluster contains `block`.
    ///
    /// The first block is its own cluster head.
    #[must_use]
    pub fn cluster_head(&self, block: usize) -> Option<usize> {
        if block == self.first_block {
            return Some(block);
        }
        self.clusters.get(block).copied().flatten()
    }
}

/// Finds the operand compared against immediates most often.
///
/// Ties keep the operand seen first.
fn collect_comparisons(func: &Function) -> Option<ComparisonGroup> {
    let mut groups: Vec<ComparisonGroup> = Vec::new();
    for (_, insn) in func.top_instructions() {
        if !matches!(insn.opcode, Opcode::Jz | Opcode::Jg) || !insn.right.is_number() {
            continue;
        }
        match groups.iter_mut().find(|g| g.operand.equal_ignore_size(&insn.left)) {
            Some(group) => group.constants.push(insn.right.clone()),
            None => groups.push(ComparisonGroup {
                operand: insn.left.clone(),
                constants: vec![insn.right.clone()],
            }),
        }
    }

    let mut best: Option<ComparisonGroup> = None;
    for group in groups {
        if best.as_ref().map_or(true, |b| group.constants.len() > b.constants.len()) {
            best = Some(group);
        }
    }
    best
}

/// Fraction of set bits across `constants`, each counted at its own width.
pub(crate) fn set_bit_fraction(constants: &[Operand]) -> f64 {
    let (ones, bits) = constants
        .iter()
        .filter_map(|c| Some((key_value(c)?.count_ones(), u32::from(c.size()?) * 8)))
        .fold((0u32, 0u32), |(o, b), (co, cb)| (o + co, b + cb));
    if bits == 0 {
        return 0.0;
    }
    f64::from(ones) / f64::from(bits)
}

/// Follows single-successor blocks from the entry until one whose successor
/// has several predecessors.
///
/// # Returns
///
/// `(first_block, dispatcher)`.
fn find_first_block(func: &Function) -> Option<(usize, usize)> {
    let mut current = 0;
    for _ in 0..func.block_count() {
        let block = func.block(current)?;
        if block.nsucc() != 1 {
            return None;
        }
        let succ = block.succ(0)?;
        if func.block(succ)?.npred() != 1 {
            return Some((current, succ));
        }
        current = succ;
    }
    None
}

/// Determines which variable carries the next key and the key assigned in
/// the first block.
fn resolve_assign_var(
    func: &Function,
    first_block: usize,
    compare_var: &Operand,
    key_size: u8,
) -> Option<(Operand, u64)> {
    let assignments: Vec<(&Operand, u64)> = func
        .block(first_block)?
        .instructions()
        .iter()
        .filter(|insn| insn.is_numeric_mov() && insn.left.size() == Some(key_size))
        .filter_map(|insn| Some((&insn.dest, key_value(&insn.left)?)))
        .collect();

    if let Some((_, key)) = assignments.iter().find(|(dest, _)| dest.equal_ignore_size(compare_var)) {
        return Some((compare_var.clone(), *key));
    }

    // The key may be assigned to a temporary that is copied into the state
    // variable right before the dispatcher. Accept that only when exactly
    // one first-block variable is copied that way.
    let mut handoffs: Vec<&Operand> = Vec::new();
    for (_, insn) in func.top_instructions() {
        if !insn.is_mov() || !insn.dest.equal_ignore_size(compare_var) {
            continue;
        }
        if let Some((dest, _)) = assignments.iter().find(|(dest, _)| dest.equal_ignore_size(&insn.left)) {
            if !handoffs.iter().any(|h| h.equal_ignore_size(dest)) {
                handoffs.push(dest);
            }
        }
    }

    let [assign] = handoffs.as_slice() else {
        return None;
    };
    let (_, key) = assignments.iter().find(|(dest, _)| dest.equal_ignore_size(assign))?;
    Some(((*assign).clone(), *key))
}

type KeyMaps = (BTreeMap<u64, usize>, BTreeMap<usize, u64>);

/// Builds the key to case block mapping from `jz` instructions.
///
/// Returns `None` if one key selects two different blocks or two keys select
/// the same block.
fn map_keys(
    func: &Function,
    dispatcher: usize,
    compare_var: &Operand,
    assign_var: &Operand,
    events: &EventLog,
) -> Option<KeyMaps> {
    let mut key_to_block = BTreeMap::new();
    let mut block_to_key = BTreeMap::new();

    for (serial, insn) in func.top_instructions() {
        if insn.opcode != Opcode::Jz {
            continue;
        }
        let Some(key) = key_value(&insn.right) else {
            continue;
        };
        let on_state = insn.left.equal_ignore_size(compare_var)
            || (serial == dispatcher && insn.left.equal_ignore_size(assign_var));
        if !on_state {
            continue;
        }
        let Some(target) = insn.dest.as_block() else {
            continue;
        };

        if let Some(&existing) = key_to_block.get(&key) {
            if existing != target {
                events
                    .record(EventKind::Warning)
                    .at(func.entry_ea(), serial)
                    .message(format!("key {key:#x} selects both {existing} and {target}"));
                return None;
            }
        }
        if let Some(&other) = block_to_key.get(&target) {
            if other != key {
                events
                    .record(EventKind::Warning)
                    .at(func.entry_ea(), serial)
                    .message(format!("block {target} selected by both {other:#x} and {key:#x}"));
                return None;
            }
        }
        key_to_block.insert(key, target);
        block_to_key.insert(target, key);
    }

    Some((key_to_block, block_to_key))
}
