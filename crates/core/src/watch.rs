//! Register-watch dispatch bus.
//!
//! Every peripheral reaction in the device flows through this table:
//! (physical address, access kind) → ordered subscriber list. Invocation
//! is synchronous, inside the triggering register access, in registration
//! order — interrupt-enable bits, mode bits and data registers may share
//! one physical register, so subscriber order is a correctness property,
//! not a nicety.

use std::collections::HashMap;

use crate::dataspace::RegBits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// Who receives a dispatched register event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchTarget {
    /// Peripheral module by index in the device's module list.
    Module(usize),
    /// Interrupt by index in the interrupt table.
    Irq(usize),
    /// The device itself (global interrupt enable).
    Device,
}

/// What the access means to the receiver. One flat event vocabulary
/// replaces the original's bound member-function pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegEvent {
    ConfigA,
    ConfigB,
    ModuleEnable,
    CountWriteL,
    CountWriteH,
    CountRead,
    OcrWrite { unit: u8, high: bool },
    PortOut,
    PortDir,
    PortIntMask,
    UartTx,
    UartRxRead,
    UartEnable { rx: bool },
    AdcMux,
    TwiData,
    TwiAddr,
    TwiStatus,
    SpiData,
    SpiStatus,
    RomAddrL,
    RomAddrH,
    IrqEnable,
    IrqPriority,
    IrqMode,
    IrqGlobalEnable,
}

/// One subscriber entry. When `bits` is present the handler receives the
/// extracted bit-group sub-value instead of the whole register byte.
#[derive(Debug, Clone, Copy)]
pub struct Subscription {
    pub target: WatchTarget,
    pub event: RegEvent,
    pub bits: Option<RegBits>,
}

/// The subscription table.
pub struct RegWatch {
    reads: HashMap<u16, Vec<Subscription>>,
    writes: HashMap<u16, Vec<Subscription>>,
}

impl RegWatch {
    pub fn new() -> Self {
        RegWatch { reads: HashMap::new(), writes: HashMap::new() }
    }

    pub fn subscribe(&mut self, addr: u16, kind: AccessKind, sub: Subscription) {
        let table = match kind {
            AccessKind::Read => &mut self.reads,
            AccessKind::Write => &mut self.writes,
        };
        table.entry(addr).or_default().push(sub);
    }

    /// Subscribers for one access, in registration order.
    pub fn subs(&self, addr: u16, kind: AccessKind) -> &[Subscription] {
        let table = match kind {
            AccessKind::Read => &self.reads,
            AccessKind::Write => &self.writes,
        };
        table.get(&addr).map_or(&[], Vec::as_slice)
    }
}

impl Default for RegWatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_order_preserved() {
        let mut w = RegWatch::new();
        for i in 0..5 {
            w.subscribe(
                0x2E,
                AccessKind::Write,
                Subscription { target: WatchTarget::Module(i), event: RegEvent::ConfigA, bits: None },
            );
        }
        let order: Vec<usize> = w
            .subs(0x2E, AccessKind::Write)
            .iter()
            .map(|s| match s.target {
                WatchTarget::Module(i) => i,
                _ => usize::MAX,
            })
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert!(w.subs(0x2E, AccessKind::Read).is_empty());
    }
}
