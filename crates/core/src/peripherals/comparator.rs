//! Analog comparator.
//!
//! Compares the positive and negative input pin voltages on every edge
//! of either pin; the output bit mirrors the result in its bound status
//! bit, and the interrupt raises per the configured sense mode (toggle,
//! falling, rising).

use std::any::Any;

use crate::dataspace::RegBits;
use crate::interrupts::IntId;
use crate::mcu::McuCtx;
use crate::pins::PinId;
use crate::savestate::{CompSave, ModuleState};
use crate::watch::RegEvent;

use super::McuModule;

pub struct Comparator {
    name: String,
    pub(crate) pin_p: Option<PinId>,
    pub(crate) pin_n: Option<PinId>,
    /// Output bit (ACO) binding.
    pub(crate) bit_out: Option<(u16, u8)>,
    /// Disable bit and sense-mode bit group, read live.
    pub(crate) bits_disable: Option<RegBits>,
    pub(crate) bits_sense: Option<RegBits>,
    pub(crate) irq: Option<IntId>,
    state: bool,
}

impl Comparator {
    pub fn new(name: &str) -> Self {
        Comparator {
            name: name.to_string(),
            pin_p: None,
            pin_n: None,
            bit_out: None,
            bits_disable: None,
            bits_sense: None,
            irq: None,
            state: false,
        }
    }

    pub fn output(&self) -> bool {
        self.state
    }
}

impl McuModule for Comparator {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self, _ctx: &mut McuCtx) {
        self.state = false;
    }

    fn reg_event(&mut self, _ev: RegEvent, _value: u8, _ctx: &mut McuCtx) {
        // Configuration bits are read live on each comparison.
    }

    fn pin_event(&mut self, _pin: PinId, ctx: &mut McuCtx) {
        if self.bits_disable.map_or(false, |rb| ctx.regs.read_bits(rb) != 0) {
            return;
        }
        let vp = self.pin_p.map_or(0.0, |p| ctx.pin_voltage(p));
        let vn = self.pin_n.map_or(0.0, |p| ctx.pin_voltage(p));
        let out = vp > vn;
        if out == self.state {
            return;
        }
        self.state = out;
        if let Some((addr, mask)) = self.bit_out {
            ctx.regs.set_bit_phys(addr, mask, out);
        }
        let sense = self.bits_sense.map_or(0, |rb| ctx.regs.read_bits(rb));
        let fire = match sense {
            0 => true,   // toggle
            2 => !out,   // falling edge
            3 => out,    // rising edge
            _ => false,
        };
        if fire {
            ctx.raise_irq(self.irq);
        }
    }

    fn state(&self) -> ModuleState {
        ModuleState::Comp(CompSave { state: self.state })
    }

    fn restore(&mut self, st: &ModuleState) {
        if let ModuleState::Comp(s) = st {
            self.state = s.state;
        }
    }

    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}
