//! Two-wire (I²C-style) bus master, byte level.
//!
//! Control bits (enable, start, stop, flag-clear) drive a small master
//! state machine: start and byte transfers complete after a prescaled
//! delay through the scheduled-event queue, the status register receives
//! the conventional status codes, and the module interrupt raises when
//! an operation finishes. The SDA line is driven for start/stop edges so
//! an attached circuit can observe bus activity; no slave is modeled —
//! the host picks whether transfers are acknowledged.

use std::any::Any;

use crate::dataspace::RegBits;
use crate::interrupts::IntId;
use crate::mcu::{EventTarget, McuCtx};
use crate::savestate::{ModuleState, TwiSave};
use crate::watch::RegEvent;

use super::McuModule;

const TAG_START_DONE: u8 = 0;
const TAG_BYTE_DONE: u8 = 1;

// Master status codes.
const ST_START: u8 = 0x08;
const ST_ADDR_ACK: u8 = 0x18;
const ST_ADDR_NACK: u8 = 0x20;
const ST_DATA_ACK: u8 = 0x28;
const ST_DATA_NACK: u8 = 0x30;

pub struct Twi {
    name: String,
    pub(crate) index: usize,
    pub(crate) status_reg: Option<u16>,
    pub(crate) bits_en: Option<RegBits>,
    pub(crate) bits_flag: Option<RegBits>,
    pub(crate) bits_start: Option<RegBits>,
    pub(crate) bits_stop: Option<RegBits>,
    pub(crate) presc_sel: Option<RegBits>,
    pub(crate) presc_list: Vec<u32>,
    pub(crate) sda: Option<crate::pins::PinId>,
    pub(crate) irq: Option<IntId>,
    /// Host-controlled: whether transfers see an acknowledge.
    pub ack: bool,
    enabled: bool,
    started: bool,
    addr_done: bool,
    shift: u8,
    own_addr: u8,
}

impl Twi {
    pub fn new(name: &str, index: usize) -> Self {
        Twi {
            name: name.to_string(),
            index,
            status_reg: None,
            bits_en: None,
            bits_flag: None,
            bits_start: None,
            bits_stop: None,
            presc_sel: None,
            presc_list: Vec::new(),
            sda: None,
            irq: None,
            ack: true,
            enabled: false,
            started: false,
            addr_done: false,
            shift: 0,
            own_addr: 0,
        }
    }

    fn period(&self, ctx: &McuCtx) -> u64 {
        let sel = self.presc_sel.map_or(0, |rb| ctx.regs.read_bits(rb)) as usize;
        self.presc_list.get(sel).copied().unwrap_or(16) as u64
    }

    fn set_status(&self, code: u8, ctx: &mut McuCtx) {
        if let Some(sr) = self.status_reg {
            // Low status bits hold the prescaler select; keep them.
            let keep = self.presc_sel.filter(|rb| rb.addr == sr).map_or(0, |rb| rb.mask);
            let old = ctx.regs.read_phys(sr);
            ctx.regs.write_phys(sr, (code & !keep) | (old & keep));
        }
    }
}

impl McuModule for Twi {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self, _ctx: &mut McuCtx) {
        self.enabled = false;
        self.started = false;
        self.addr_done = false;
        self.shift = 0;
    }

    fn reg_event(&mut self, ev: RegEvent, value: u8, ctx: &mut McuCtx) {
        match ev {
            RegEvent::ConfigA => {
                self.enabled = self.bits_en.map_or(false, |rb| rb.is_set(value));
                if !self.enabled {
                    self.started = false;
                    self.addr_done = false;
                    return;
                }
                if self.bits_stop.map_or(false, |rb| rb.is_set(value)) {
                    if let Some(p) = self.sda {
                        ctx.set_pin_out(p, true); // stop: data rises
                    }
                    self.started = false;
                    self.addr_done = false;
                    if let Some(rb) = self.bits_stop {
                        // Stop bit self-clears once the condition is out.
                        ctx.regs.set_bit_phys(rb.addr, rb.mask, false);
                    }
                    return;
                }
                let flag_cleared = self.bits_flag.map_or(false, |rb| rb.is_set(value));
                if flag_cleared {
                    // Writing 1 clears the flag; it re-raises at completion.
                    if let Some(rb) = self.bits_flag {
                        ctx.regs.set_bit_phys(rb.addr, rb.mask, false);
                    }
                }
                if self.bits_start.map_or(false, |rb| rb.is_set(value)) && !self.started {
                    if let Some(p) = self.sda {
                        ctx.set_pin_out(p, false); // start: data falls
                    }
                    ctx.schedule(
                        self.period(ctx),
                        EventTarget::Module { index: self.index, tag: TAG_START_DONE },
                    );
                } else if flag_cleared && self.started {
                    // Flag written: shift the staged byte out.
                    ctx.schedule(
                        8 * self.period(ctx),
                        EventTarget::Module { index: self.index, tag: TAG_BYTE_DONE },
                    );
                }
            }
            RegEvent::TwiData => self.shift = value,
            RegEvent::TwiAddr => self.own_addr = value >> 1,
            RegEvent::TwiStatus => {} // prescaler bits are read live
            _ => {}
        }
    }

    fn scheduled(&mut self, tag: u8, ctx: &mut McuCtx) {
        match tag {
            TAG_START_DONE => {
                self.started = true;
                self.addr_done = false;
                self.set_status(ST_START, ctx);
                ctx.raise_irq(self.irq);
            }
            TAG_BYTE_DONE => {
                let code = match (self.addr_done, self.ack) {
                    (false, true) => ST_ADDR_ACK,
                    (false, false) => ST_ADDR_NACK,
                    (true, true) => ST_DATA_ACK,
                    (true, false) => ST_DATA_NACK,
                };
                self.addr_done = true;
                self.set_status(code, ctx);
                ctx.raise_irq(self.irq);
            }
            _ => {}
        }
    }

    fn state(&self) -> ModuleState {
        ModuleState::Twi(TwiSave {
            enabled: self.enabled,
            started: self.started,
            addr_done: self.addr_done,
            shift: self.shift,
            own_addr: self.own_addr,
        })
    }

    fn restore(&mut self, st: &ModuleState) {
        if let ModuleState::Twi(s) = st {
            self.enabled = s.enabled;
            self.started = s.started;
            self.addr_done = s.addr_done;
            self.shift = s.shift;
            self.own_addr = s.own_addr;
        }
    }

    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}
