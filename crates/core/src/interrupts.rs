//! Interrupt descriptors and the per-device interrupt table.
//!
//! Raising an interrupt only sets its flag bit in the bound flag
//! register; arbitration happens in the external CPU stepper, which
//! queries [`InterruptTable::pending`] once per simulated cycle and
//! acknowledges the vector it takes. A handle that failed to resolve at
//! build time is `None` and raising through it is a silent no-op, so
//! peripheral code never special-cases missing interrupts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::dataspace::DataSpace;

/// Opaque handle into the interrupt table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntId(pub(crate) usize);

#[derive(Debug)]
pub struct Interrupt {
    pub name: String,
    pub vector: u16,
    priority: u8,
    /// Flag bit binding: (physical register, bit mask). Unresolved → inert.
    flag: Option<(u16, u8)>,
    enabled: bool,
    /// Trigger mode for external lines (edge/level select value).
    mode: u8,
    /// Modules notified when this interrupt raises (USI timer clocking).
    callbacks: Vec<usize>,
}

impl Interrupt {
    pub fn new(name: &str, vector: u16) -> Self {
        Interrupt {
            name: name.to_string(),
            vector,
            priority: 0,
            flag: None,
            enabled: false,
            mode: 0,
            callbacks: Vec::new(),
        }
    }

    pub fn with_flag(mut self, flag: Option<(u16, u8)>) -> Self {
        self.flag = flag;
        self
    }

    pub fn with_priority(mut self, prio: u8) -> Self {
        self.priority = prio;
        self
    }
}

/// A pending interrupt as seen by the CPU stepper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingIrq {
    pub id: IntId,
    pub vector: u16,
    pub priority: u8,
}

pub struct InterruptTable {
    list: Vec<Interrupt>,
    by_name: HashMap<String, usize>,
    global_enable: bool,
}

impl InterruptTable {
    pub fn new() -> Self {
        InterruptTable { list: Vec::new(), by_name: HashMap::new(), global_enable: false }
    }

    /// Register an interrupt. Duplicate vectors or names are a degraded
    /// condition: logged and skipped, the device still builds.
    pub fn add(&mut self, int: Interrupt) -> Option<IntId> {
        if self.by_name.contains_key(&int.name) {
            log::warn!("interrupt {} redefined, skipped", int.name);
            return None;
        }
        if self.list.iter().any(|i| i.vector == int.vector) {
            log::warn!("interrupt {} duplicates vector {:#x}, skipped", int.name, int.vector);
            return None;
        }
        let id = self.list.len();
        self.by_name.insert(int.name.clone(), id);
        self.list.push(int);
        Some(IntId(id))
    }

    pub fn id(&self, name: &str) -> Option<IntId> {
        self.by_name.get(name).copied().map(IntId)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn name(&self, id: IntId) -> &str {
        &self.list[id.0].name
    }

    pub fn vector(&self, id: IntId) -> u16 {
        self.list[id.0].vector
    }

    pub fn priority(&self, id: IntId) -> u8 {
        self.list[id.0].priority
    }

    pub fn mode(&self, id: IntId) -> u8 {
        self.list[id.0].mode
    }

    pub fn is_enabled(&self, id: IntId) -> bool {
        self.list[id.0].enabled
    }

    /// Flag bit set in the register space, regardless of enables.
    pub fn is_flagged(&self, id: IntId, regs: &DataSpace) -> bool {
        match self.list[id.0].flag {
            Some((addr, mask)) => regs.read_phys(addr) & mask != 0,
            None => false,
        }
    }

    /// Flagged and enabled (global enable not considered: the stepper
    /// applies it through [`InterruptTable::pending`]).
    pub fn is_pending(&self, id: IntId, regs: &DataSpace) -> bool {
        self.list[id.0].enabled && self.is_flagged(id, regs)
    }

    pub fn set_enabled(&mut self, id: usize, en: bool) {
        if let Some(i) = self.list.get_mut(id) {
            i.enabled = en;
        }
    }

    pub fn set_priority(&mut self, id: usize, prio: u8) {
        if let Some(i) = self.list.get_mut(id) {
            i.priority = prio;
        }
    }

    pub fn set_mode(&mut self, id: usize, mode: u8) {
        if let Some(i) = self.list.get_mut(id) {
            i.mode = mode;
        }
    }

    pub fn set_global(&mut self, en: bool) {
        self.global_enable = en;
    }

    pub fn global_enabled(&self) -> bool {
        self.global_enable
    }

    pub(crate) fn flag_of(&self, id: IntId) -> Option<(u16, u8)> {
        self.list[id.0].flag
    }

    pub(crate) fn callbacks_of(&self, id: IntId) -> &[usize] {
        &self.list[id.0].callbacks
    }

    /// Subscribe/unsubscribe a module for raise notifications.
    pub(crate) fn set_callback(&mut self, id: IntId, module: usize, on: bool) {
        let cbs = &mut self.list[id.0].callbacks;
        if on {
            if !cbs.contains(&module) {
                cbs.push(module);
            }
        } else {
            cbs.retain(|&m| m != module);
        }
    }

    /// Highest-priority enabled+flagged interrupt, or `None`. Ties go to
    /// the lowest vector number so arbitration is deterministic.
    pub fn pending(&self, regs: &DataSpace) -> Option<PendingIrq> {
        if !self.global_enable {
            return None;
        }
        let mut best: Option<PendingIrq> = None;
        for (idx, int) in self.list.iter().enumerate() {
            let id = IntId(idx);
            if !self.is_pending(id, regs) {
                continue;
            }
            let cand = PendingIrq { id, vector: int.vector, priority: int.priority };
            best = match best {
                None => Some(cand),
                Some(b)
                    if cand.priority > b.priority
                        || (cand.priority == b.priority && cand.vector < b.vector) =>
                {
                    Some(cand)
                }
                keep => keep,
            };
        }
        best
    }

    /// Clear the flag bit (CPU acknowledged the vector).
    pub fn acknowledge(&self, id: IntId, regs: &mut DataSpace) {
        if let Some((addr, mask)) = self.list[id.0].flag {
            regs.set_bit_phys(addr, mask, false);
        }
    }

    /// Per-interrupt runtime state for save/restore.
    pub(crate) fn save(&self) -> Vec<IrqState> {
        self.list
            .iter()
            .map(|i| IrqState { enabled: i.enabled, priority: i.priority, mode: i.mode })
            .collect()
    }

    pub(crate) fn restore(&mut self, saved: &[IrqState]) {
        for (i, s) in self.list.iter_mut().zip(saved) {
            i.enabled = s.enabled;
            i.priority = s.priority;
            i.mode = s.mode;
        }
    }

    pub(crate) fn reset(&mut self) {
        self.global_enable = false;
        for i in &mut self.list {
            i.enabled = false;
            i.mode = 0;
        }
    }
}

impl Default for InterruptTable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrqState {
    pub enabled: bool,
    pub priority: u8,
    pub mode: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_and_regs() -> (InterruptTable, DataSpace) {
        let mut regs = DataSpace::new();
        regs.resize(0x60);
        regs.define_reg("TIFR", 0x38, 0, None);
        let mut t = InterruptTable::new();
        t.add(Interrupt::new("T0OVF", 9).with_flag(Some((0x38, 0x02))));
        t.add(Interrupt::new("T0COMP", 10).with_flag(Some((0x38, 0x01))).with_priority(1));
        (t, regs)
    }

    #[test]
    fn test_raise_is_flag_only() {
        let (t, mut regs) = table_and_regs();
        let id = t.id("T0OVF").unwrap();
        let (addr, mask) = t.flag_of(id).unwrap();
        regs.set_bit_phys(addr, mask, true);
        assert!(t.is_flagged(id, &regs));
        assert!(!t.is_pending(id, &regs), "disabled interrupt never pends");
    }

    #[test]
    fn test_priority_arbitration() {
        let (mut t, mut regs) = table_and_regs();
        let ovf = t.id("T0OVF").unwrap();
        let comp = t.id("T0COMP").unwrap();
        regs.set_bit_phys(0x38, 0x03, true);
        t.set_enabled(ovf.0, true);
        t.set_enabled(comp.0, true);
        assert!(t.pending(&regs).is_none(), "gated by global enable");
        t.set_global(true);
        let p = t.pending(&regs).unwrap();
        assert_eq!(p.id, comp, "higher priority wins");
        t.acknowledge(comp, &mut regs);
        assert_eq!(t.pending(&regs).unwrap().id, ovf);
    }

    #[test]
    fn test_duplicate_vector_skipped() {
        let (mut t, _) = table_and_regs();
        assert!(t.add(Interrupt::new("DUP", 9)).is_none());
        assert_eq!(t.len(), 2);
    }
}
