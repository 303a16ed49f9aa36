//! Watchdog timer.
//!
//! The configuration register selects enable, interrupt mode and a
//! prescaler-list timeout. On expiry the watchdog either raises its
//! interrupt (interrupt mode) or latches the device's watchdog-reset
//! flag for the CPU stepper. The `wdr` instruction restarts the
//! countdown through [`Wdt::restart`].

use std::any::Any;

use crate::dataspace::RegBits;
use crate::interrupts::IntId;
use crate::mcu::McuCtx;
use crate::savestate::{ModuleState, WdtSave};
use crate::watch::RegEvent;

use super::McuModule;

pub struct Wdt {
    name: String,
    pub(crate) bits_en: Option<RegBits>,
    pub(crate) bits_int: Option<RegBits>,
    pub(crate) presc_sel: Option<RegBits>,
    pub(crate) presc_list: Vec<u32>,
    pub(crate) irq: Option<IntId>,
    enabled: bool,
    int_mode: bool,
    timeout: u64,
    deadline: u64,
}

impl Wdt {
    pub fn new(name: &str) -> Self {
        Wdt {
            name: name.to_string(),
            bits_en: None,
            bits_int: None,
            presc_sel: None,
            presc_list: Vec::new(),
            irq: None,
            enabled: false,
            int_mode: false,
            timeout: 0,
            deadline: 0,
        }
    }

    /// Watchdog-reset instruction: push the deadline out.
    pub fn restart(&mut self, cycle: u64) {
        self.deadline = cycle + self.timeout;
    }
}

impl McuModule for Wdt {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self, _ctx: &mut McuCtx) {
        self.enabled = false;
        self.int_mode = false;
        self.timeout = 0;
        self.deadline = 0;
    }

    fn reg_event(&mut self, ev: RegEvent, value: u8, ctx: &mut McuCtx) {
        if ev != RegEvent::ConfigA {
            return;
        }
        self.enabled = self.bits_en.map_or(false, |rb| rb.is_set(value));
        self.int_mode = self.bits_int.map_or(false, |rb| rb.is_set(value));
        let sel = self.presc_sel.map_or(0, |rb| ctx.regs.read_bits(rb)) as usize;
        self.timeout = self.presc_list.get(sel).copied().unwrap_or(0) as u64;
        self.deadline = ctx.cycle + self.timeout;
    }

    fn run_to(&mut self, cycle: u64, ctx: &mut McuCtx) {
        if !self.enabled || self.timeout == 0 {
            return;
        }
        while cycle >= self.deadline {
            if self.int_mode {
                ctx.raise_irq(self.irq);
            } else {
                ctx.watchdog_expired = true;
            }
            self.deadline += self.timeout;
        }
    }

    fn state(&self) -> ModuleState {
        ModuleState::Wdt(WdtSave {
            enabled: self.enabled,
            int_mode: self.int_mode,
            timeout: self.timeout,
            deadline: self.deadline,
        })
    }

    fn restore(&mut self, st: &ModuleState) {
        if let ModuleState::Wdt(s) = st {
            self.enabled = s.enabled;
            self.int_mode = s.int_mode;
            self.timeout = s.timeout;
            self.deadline = s.deadline;
        }
    }

    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}
