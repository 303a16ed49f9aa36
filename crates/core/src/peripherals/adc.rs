//! Analog-to-digital converter.
//!
//! The multiplex register selects one of the descriptor-listed input
//! pins. Setting the start bit while the converter is enabled begins a
//! conversion that completes after 13 prescaled clocks; the selected
//! pin's analog voltage is quantized against VREF into the data register
//! pair and the conversion-complete interrupt raises. The start bit is
//! cleared in place when the result lands.

use std::any::Any;

use crate::dataspace::RegBits;
use crate::interrupts::IntId;
use crate::mcu::{EventTarget, McuCtx};
use crate::pins::PinId;
use crate::savestate::{AdcSave, ModuleState};
use crate::watch::RegEvent;

use super::McuModule;

const TAG_CONVERSION: u8 = 0;
/// ADC clocks per conversion.
const CONVERSION_CLOCKS: u64 = 13;
const VREF: f64 = 5.0;

pub struct Adc {
    name: String,
    pub(crate) index: usize,
    pub(crate) max_value: u32,
    pub(crate) data_l: Option<u16>,
    pub(crate) data_h: Option<u16>,
    pub(crate) pins: Vec<PinId>,
    pub(crate) presc_sel: Option<RegBits>,
    pub(crate) presc_list: Vec<u32>,
    pub(crate) bits_en: Option<RegBits>,
    pub(crate) bits_start: Option<RegBits>,
    pub(crate) irq: Option<IntId>,
    channel: u8,
    converting: bool,
}

impl Adc {
    pub fn new(name: &str, index: usize) -> Self {
        Adc {
            name: name.to_string(),
            index,
            max_value: 1023,
            data_l: None,
            data_h: None,
            pins: Vec::new(),
            presc_sel: None,
            presc_list: Vec::new(),
            bits_en: None,
            bits_start: None,
            irq: None,
            channel: 0,
            converting: false,
        }
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }
}

impl McuModule for Adc {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self, _ctx: &mut McuCtx) {
        self.channel = 0;
        self.converting = false;
    }

    fn reg_event(&mut self, ev: RegEvent, value: u8, ctx: &mut McuCtx) {
        match ev {
            RegEvent::ConfigA => {
                let enabled = self.bits_en.map_or(true, |rb| rb.is_set(value));
                let start = self.bits_start.map_or(false, |rb| rb.is_set(value));
                if enabled && start && !self.converting {
                    self.converting = true;
                    let sel = self.presc_sel.map_or(0, |rb| ctx.regs.read_bits(rb)) as usize;
                    let presc = self.presc_list.get(sel).copied().unwrap_or(2) as u64;
                    ctx.schedule(
                        CONVERSION_CLOCKS * presc.max(1),
                        EventTarget::Module { index: self.index, tag: TAG_CONVERSION },
                    );
                }
            }
            RegEvent::AdcMux => self.channel = value & 0x0F,
            _ => {}
        }
    }

    fn scheduled(&mut self, tag: u8, ctx: &mut McuCtx) {
        if tag != TAG_CONVERSION {
            return;
        }
        self.converting = false;
        let volts = self
            .pins
            .get(self.channel as usize)
            .map_or(0.0, |&p| ctx.pin_voltage(p));
        let raw = ((volts / VREF) * self.max_value as f64).round();
        let raw = raw.clamp(0.0, self.max_value as f64) as u32;
        if let Some(a) = self.data_l {
            ctx.regs.write_phys(a, raw as u8);
        }
        if let Some(a) = self.data_h {
            ctx.regs.write_phys(a, (raw >> 8) as u8);
        }
        if let Some(rb) = self.bits_start {
            ctx.regs.set_bit_phys(rb.addr, rb.mask, false);
        }
        ctx.raise_irq(self.irq);
    }

    fn state(&self) -> ModuleState {
        ModuleState::Adc(AdcSave { channel: self.channel, converting: self.converting })
    }

    fn restore(&mut self, st: &ModuleState) {
        if let ModuleState::Adc(s) = st {
            self.channel = s.channel;
            self.converting = s.converting;
        }
    }

    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}
