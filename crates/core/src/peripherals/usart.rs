//! USART with independent transmit/receive sub-units.
//!
//! Byte-level model: a write to the tx register starts one frame
//! (start bit driven low on the tx pin, restored at completion, the byte
//! appended to a host-visible output buffer) and raises the tx interrupt
//! when the frame finishes. The host feeds received bytes into a FIFO;
//! each read of the rx register hands the front byte over through the
//! read-side dispatch, clearing the rx flag when the FIFO drains. Tx and
//! rx may share one register address, as on parts with a combined data
//! register.

use std::any::Any;
use std::collections::VecDeque;

use crate::interrupts::IntId;
use crate::mcu::{EventTarget, McuCtx};
use crate::savestate::{ModuleState, UsartSave};
use crate::watch::RegEvent;

use super::McuModule;

const TAG_TX_DONE: u8 = 0;
/// Bits per frame: start + 8 data + stop.
const FRAME_BITS: u64 = 10;

pub struct Usart {
    name: String,
    pub(crate) index: usize,
    pub(crate) number: u8,
    pub(crate) tx_pin: Option<crate::pins::PinId>,
    pub(crate) rx_reg: Option<u16>,
    pub(crate) tx_irq: Option<IntId>,
    pub(crate) rx_irq: Option<IntId>,
    /// Cycles per bit; zero means next-cycle completion.
    pub(crate) period: u64,
    tx_en: bool,
    rx_en: bool,
    busy: bool,
    rx_fifo: VecDeque<u8>,
    out: Vec<u8>,
}

impl Usart {
    pub fn new(name: &str, index: usize, number: u8) -> Self {
        Usart {
            name: name.to_string(),
            index,
            number,
            tx_pin: None,
            rx_reg: None,
            tx_irq: None,
            rx_irq: None,
            period: 0,
            tx_en: false,
            rx_en: false,
            busy: false,
            rx_fifo: VecDeque::new(),
            out: Vec::new(),
        }
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    fn frame_cycles(&self) -> u64 {
        (self.period.max(1)) * FRAME_BITS
    }

    /// Transmitted bytes since last taken (host side).
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }

    /// Host feeds one received byte.
    pub fn feed(&mut self, byte: u8, ctx: &mut McuCtx) {
        if !self.rx_en {
            return;
        }
        self.rx_fifo.push_back(byte);
        ctx.raise_irq(self.rx_irq);
    }
}

impl McuModule for Usart {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self, _ctx: &mut McuCtx) {
        self.tx_en = false;
        self.rx_en = false;
        self.busy = false;
        self.rx_fifo.clear();
        self.out.clear();
    }

    fn reg_event(&mut self, ev: RegEvent, value: u8, ctx: &mut McuCtx) {
        match ev {
            RegEvent::UartTx => {
                if !self.tx_en {
                    return;
                }
                self.out.push(value);
                self.busy = true;
                if let Some(p) = self.tx_pin {
                    ctx.set_pin_out(p, false); // start bit
                }
                ctx.schedule(
                    self.frame_cycles(),
                    EventTarget::Module { index: self.index, tag: TAG_TX_DONE },
                );
            }
            RegEvent::UartRxRead => {
                // Read subscribers run before the CPU sees the byte:
                // hand the FIFO front over through the register.
                if let Some(b) = self.rx_fifo.pop_front() {
                    if let Some(r) = self.rx_reg {
                        ctx.regs.write_phys(r, b);
                    }
                }
                if self.rx_fifo.is_empty() {
                    ctx.clear_irq(self.rx_irq);
                }
            }
            RegEvent::UartEnable { rx } => {
                if rx {
                    self.rx_en = value != 0;
                } else {
                    self.tx_en = value != 0;
                }
            }
            _ => {}
        }
    }

    fn scheduled(&mut self, tag: u8, ctx: &mut McuCtx) {
        if tag == TAG_TX_DONE {
            self.busy = false;
            if let Some(p) = self.tx_pin {
                ctx.set_pin_out(p, true); // idle line
            }
            ctx.raise_irq(self.tx_irq);
        }
    }

    fn state(&self) -> ModuleState {
        ModuleState::Usart(UsartSave {
            tx_en: self.tx_en,
            rx_en: self.rx_en,
            rx_fifo: self.rx_fifo.iter().copied().collect(),
            busy: self.busy,
        })
    }

    fn restore(&mut self, st: &ModuleState) {
        if let ModuleState::Usart(s) = st {
            self.tx_en = s.tx_en;
            self.rx_en = s.rx_en;
            self.rx_fifo = s.rx_fifo.iter().copied().collect();
            self.busy = s.busy;
        }
    }

    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}
