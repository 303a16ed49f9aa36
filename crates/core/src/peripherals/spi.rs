//! SPI bus master, byte level.
//!
//! A data-register write starts one prescaled 8-bit transfer; when it
//! completes, the host-fed MISO byte lands in the data register and the
//! transfer-complete interrupt raises. Transmitted bytes accumulate in a
//! host-visible buffer. The status register's double-speed bit halves
//! the transfer period.

use std::any::Any;

use crate::dataspace::RegBits;
use crate::interrupts::IntId;
use crate::mcu::{EventTarget, McuCtx};
use crate::savestate::{ModuleState, SpiSave};
use crate::watch::RegEvent;

use super::McuModule;

const TAG_XFER_DONE: u8 = 0;

pub struct Spi {
    name: String,
    pub(crate) index: usize,
    pub(crate) data_reg: Option<u16>,
    pub(crate) bits_en: Option<RegBits>,
    pub(crate) bits_2x: Option<RegBits>,
    pub(crate) presc_sel: Option<RegBits>,
    pub(crate) presc_list: Vec<u32>,
    pub(crate) irq: Option<IntId>,
    enabled: bool,
    double: bool,
    busy: bool,
    miso_in: u8,
    out: Vec<u8>,
}

impl Spi {
    pub fn new(name: &str, index: usize) -> Self {
        Spi {
            name: name.to_string(),
            index,
            data_reg: None,
            bits_en: None,
            bits_2x: None,
            presc_sel: None,
            presc_list: Vec::new(),
            irq: None,
            enabled: false,
            double: false,
            busy: false,
            miso_in: 0xFF,
            out: Vec::new(),
        }
    }

    /// Next MISO byte (host side).
    pub fn set_input(&mut self, byte: u8) {
        self.miso_in = byte;
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }

    fn period(&self, ctx: &McuCtx) -> u64 {
        let sel = self.presc_sel.map_or(0, |rb| ctx.regs.read_bits(rb)) as usize;
        let p = self.presc_list.get(sel).copied().unwrap_or(4) as u64;
        if self.double {
            (p / 2).max(1)
        } else {
            p.max(1)
        }
    }
}

impl McuModule for Spi {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self, _ctx: &mut McuCtx) {
        self.enabled = false;
        self.double = false;
        self.busy = false;
        self.miso_in = 0xFF;
        self.out.clear();
    }

    fn reg_event(&mut self, ev: RegEvent, value: u8, ctx: &mut McuCtx) {
        match ev {
            RegEvent::ConfigA => {
                self.enabled = self.bits_en.map_or(true, |rb| rb.is_set(value));
            }
            RegEvent::SpiStatus => {
                self.double = self.bits_2x.map_or(false, |rb| rb.is_set(value));
            }
            RegEvent::SpiData => {
                if !self.enabled || self.busy {
                    return;
                }
                self.busy = true;
                self.out.push(value);
                ctx.schedule(
                    8 * self.period(ctx),
                    EventTarget::Module { index: self.index, tag: TAG_XFER_DONE },
                );
            }
            _ => {}
        }
    }

    fn scheduled(&mut self, tag: u8, ctx: &mut McuCtx) {
        if tag != TAG_XFER_DONE {
            return;
        }
        self.busy = false;
        if let Some(d) = self.data_reg {
            ctx.regs.write_phys(d, self.miso_in);
        }
        ctx.raise_irq(self.irq);
    }

    fn state(&self) -> ModuleState {
        ModuleState::Spi(SpiSave {
            enabled: self.enabled,
            double: self.double,
            busy: self.busy,
            miso_in: self.miso_in,
        })
    }

    fn restore(&mut self, st: &ModuleState) {
        if let ModuleState::Spi(s) = st {
            self.enabled = s.enabled;
            self.double = s.double;
            self.busy = s.busy;
            self.miso_in = s.miso_in;
        }
    }

    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}
