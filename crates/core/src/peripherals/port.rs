//! GPIO port module.
//!
//! Binds the descriptor's out/in/dir registers to a group of pins.
//! Writing the out register drives output pins (and, on AVR parts, sets
//! the pull-up of input pins); the direction register may be inverted
//! with a leading `!` in the descriptor; the in register is refreshed on
//! every pin edge so plain reads see live pin state. A pin-change
//! interrupt fires for edges admitted by the watched mask register.

use std::any::Any;

use crate::interrupts::IntId;
use crate::mcu::McuCtx;
use crate::pins::PinId;
use crate::savestate::{ModuleState, PortSave};
use crate::watch::RegEvent;

use super::McuModule;

pub struct Port {
    name: String,
    pub(crate) pins: Vec<PinId>,
    pub(crate) in_addr: Option<u16>,
    pub(crate) dir_inv: bool,
    /// PORT bit doubles as pull-up select on input pins (AVR).
    pub(crate) dyn_pullups: bool,
    pub(crate) irq: Option<IntId>,
    int_mask: u8,
    prev_in: u8,
}

impl Port {
    pub fn new(name: &str) -> Self {
        Port {
            name: name.to_string(),
            pins: Vec::new(),
            in_addr: None,
            dir_inv: false,
            dyn_pullups: false,
            irq: None,
            int_mask: 0,
            prev_in: 0,
        }
    }

    /// Rebuild the in-register byte from live pin state; raise the
    /// pin-change interrupt for masked-in edges.
    fn refresh_in(&mut self, ctx: &mut McuCtx) {
        let mut byte = 0u8;
        for (i, &pin) in self.pins.iter().enumerate() {
            if ctx.pin_inp(pin) {
                byte |= 1 << i;
            }
        }
        if let Some(a) = self.in_addr {
            ctx.regs.write_phys(a, byte);
        }
        let changed = byte ^ self.prev_in;
        self.prev_in = byte;
        if changed & self.int_mask != 0 {
            ctx.raise_irq(self.irq);
        }
    }
}

impl McuModule for Port {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self, ctx: &mut McuCtx) {
        self.int_mask = 0;
        self.prev_in = 0;
        for &pin in &self.pins {
            ctx.set_pin_out(pin, false);
            ctx.set_pin_dir(pin, self.dir_inv);
        }
        self.refresh_in(ctx);
    }

    fn reg_event(&mut self, ev: RegEvent, value: u8, ctx: &mut McuCtx) {
        match ev {
            RegEvent::PortOut => {
                for (i, &pin) in self.pins.iter().enumerate() {
                    let bit = value & (1 << i) != 0;
                    ctx.set_pin_out(pin, bit);
                    if self.dyn_pullups && !ctx.pins.get(pin).driving() {
                        ctx.set_pin_pullup(pin, bit);
                    }
                }
                self.refresh_in(ctx);
            }
            RegEvent::PortDir => {
                for (i, &pin) in self.pins.iter().enumerate() {
                    let out = (value & (1 << i) != 0) ^ self.dir_inv;
                    ctx.set_pin_dir(pin, out);
                }
                self.refresh_in(ctx);
            }
            RegEvent::PortIntMask => self.int_mask = value,
            _ => {}
        }
    }

    fn pin_event(&mut self, _pin: PinId, ctx: &mut McuCtx) {
        self.refresh_in(ctx);
    }

    fn state(&self) -> ModuleState {
        ModuleState::Port(PortSave { int_mask: self.int_mask, prev_in: self.prev_in })
    }

    fn restore(&mut self, st: &ModuleState) {
        if let ModuleState::Port(s) = st {
            self.int_mask = s.int_mask;
            self.prev_in = s.prev_in;
        }
    }

    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}
