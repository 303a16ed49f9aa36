//! EEPROM controller.
//!
//! The address register pair and data register bind by name; the control
//! register's strobes drive the operation: the read strobe loads the
//! addressed EEPROM byte into the data register immediately (and
//! self-clears), the write strobe — armed by the master-enable window —
//! commits the data register after a simulated write delay and raises
//! the ready interrupt.

use std::any::Any;

use crate::dataspace::RegBits;
use crate::interrupts::IntId;
use crate::mcu::{EventTarget, McuCtx};
use crate::savestate::{EepromSave, ModuleState};
use crate::watch::RegEvent;

use super::McuModule;

const TAG_WRITE_DONE: u8 = 0;
/// Simulated EEPROM write time in CPU cycles.
const WRITE_CYCLES: u64 = 8448;
/// Master-enable window in cycles.
const ARM_WINDOW: u64 = 4;

pub struct Eeprom {
    name: String,
    pub(crate) index: usize,
    pub(crate) data_reg: Option<u16>,
    pub(crate) bits_read: Option<RegBits>,
    pub(crate) bits_write: Option<RegBits>,
    pub(crate) bits_master: Option<RegBits>,
    pub(crate) irq: Option<IntId>,
    addr_l: u8,
    addr_h: u8,
    armed_until: u64,
    writing: bool,
    pending_addr: u16,
    pending_val: u8,
}

impl Eeprom {
    pub fn new(name: &str, index: usize) -> Self {
        Eeprom {
            name: name.to_string(),
            index,
            data_reg: None,
            bits_read: None,
            bits_write: None,
            bits_master: None,
            irq: None,
            addr_l: 0,
            addr_h: 0,
            armed_until: 0,
            writing: false,
            pending_addr: 0,
            pending_val: 0,
        }
    }

    fn address(&self) -> u16 {
        ((self.addr_h as u16) << 8) | self.addr_l as u16
    }
}

impl McuModule for Eeprom {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self, _ctx: &mut McuCtx) {
        self.addr_l = 0;
        self.addr_h = 0;
        self.armed_until = 0;
        self.writing = false;
    }

    fn reg_event(&mut self, ev: RegEvent, value: u8, ctx: &mut McuCtx) {
        match ev {
            RegEvent::RomAddrL => self.addr_l = value,
            RegEvent::RomAddrH => self.addr_h = value,
            RegEvent::ConfigA => {
                let addr = self.address();
                if self.bits_master.map_or(false, |rb| rb.is_set(value)) {
                    self.armed_until = ctx.cycle + ARM_WINDOW;
                }
                if self.bits_write.map_or(false, |rb| rb.is_set(value))
                    && ctx.cycle <= self.armed_until
                    && !self.writing
                {
                    self.writing = true;
                    self.pending_addr = addr;
                    self.pending_val = self.data_reg.map_or(0, |d| ctx.regs.read_phys(d));
                    ctx.schedule(
                        WRITE_CYCLES,
                        EventTarget::Module { index: self.index, tag: TAG_WRITE_DONE },
                    );
                }
                if self.bits_read.map_or(false, |rb| rb.is_set(value)) {
                    let b = ctx.eeprom.get(addr as usize).copied().unwrap_or(0xFF);
                    if let Some(d) = self.data_reg {
                        ctx.regs.write_phys(d, b);
                    }
                    if let Some(rb) = self.bits_read {
                        // Read strobe self-clears.
                        ctx.regs.set_bit_phys(rb.addr, rb.mask, false);
                    }
                }
            }
            _ => {}
        }
    }

    fn scheduled(&mut self, tag: u8, ctx: &mut McuCtx) {
        if tag != TAG_WRITE_DONE {
            return;
        }
        self.writing = false;
        if let Some(b) = ctx.eeprom.get_mut(self.pending_addr as usize) {
            *b = self.pending_val;
        }
        if let Some(rb) = self.bits_write {
            ctx.regs.set_bit_phys(rb.addr, rb.mask, false);
        }
        ctx.raise_irq(self.irq);
    }

    fn state(&self) -> ModuleState {
        ModuleState::Eeprom(EepromSave {
            addr_l: self.addr_l,
            addr_h: self.addr_h,
            armed_until: self.armed_until,
            writing: self.writing,
            pending_addr: self.pending_addr,
            pending_val: self.pending_val,
        })
    }

    fn restore(&mut self, st: &ModuleState) {
        if let ModuleState::Eeprom(s) = st {
            self.addr_l = s.addr_l;
            self.addr_h = s.addr_h;
            self.armed_until = s.armed_until;
            self.writing = s.writing;
            self.pending_addr = s.pending_addr;
            self.pending_val = s.pending_val;
        }
    }

    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}
