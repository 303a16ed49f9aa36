//! Peripheral module framework.
//!
//! Every peripheral is a [`McuModule`] owned by the device and addressed
//! by its index in the module list. Modules never hold references into
//! the device; each callback receives `&mut McuCtx` (register space,
//! interrupt table, pins, event queue) instead, so ownership stays in one
//! place and dispatch order stays deterministic.
//!
//! - [`Timer`] — 8/16-bit timer/counter family, one shared counting and
//!   compare engine (waveform modes, prescalers, output-compare units)
//! - [`Usi`] — universal serial interface (3-wire/2-wire shift engine)
//! - [`Port`] — GPIO port with pin-change interrupt
//! - [`Usart`] — serial transmitter/receiver pair
//! - [`Adc`] — prescaled analog-to-digital conversion
//! - [`Comparator`] — analog comparator on two input pins
//! - [`Twi`] / [`Spi`] — byte-level bus masters
//! - [`Wdt`] — watchdog timeout
//! - [`Eeprom`] — strobed EEPROM read/write controller

mod adc;
mod comparator;
mod eeprom;
mod port;
mod spi;
mod timer;
mod twi;
mod usart;
mod usi;
mod wdt;

pub use adc::Adc;
pub use comparator::Comparator;
pub use eeprom::Eeprom;
pub use port::Port;
pub use spi::Spi;
pub use timer::{Timer, TimerKind};
pub use twi::Twi;
pub use usart::Usart;
pub use usi::Usi;
pub use wdt::Wdt;

use std::any::Any;

use crate::mcu::McuCtx;
use crate::pins::PinId;
use crate::savestate::ModuleState;
use crate::watch::RegEvent;

/// A peripheral state machine driven entirely by the dispatch bus, pin
/// edges, interrupt callbacks and scheduled events.
pub trait McuModule {
    fn name(&self) -> &str;

    /// Return to power-on state. Register contents are reset separately
    /// by the data space.
    fn reset(&mut self, ctx: &mut McuCtx);

    /// A watched register access happened. `value` is the stored register
    /// byte, or the extracted sub-value for bit-group subscriptions.
    fn reg_event(&mut self, ev: RegEvent, value: u8, ctx: &mut McuCtx);

    /// Edge callback: a pin this module subscribed to changed input state.
    fn pin_event(&mut self, pin: PinId, ctx: &mut McuCtx) {
        let _ = (pin, ctx);
    }

    /// An interrupt this module subscribed to was raised (timer-compare
    /// clocking).
    fn irq_callback(&mut self, ctx: &mut McuCtx) {
        let _ = ctx;
    }

    /// A scheduled event with this module's tag came due.
    fn scheduled(&mut self, tag: u8, ctx: &mut McuCtx) {
        let _ = (tag, ctx);
    }

    /// Catch internal time up to `cycle`. Called from `Mcu::advance`.
    fn run_to(&mut self, cycle: u64, ctx: &mut McuCtx) {
        let _ = (cycle, ctx);
    }

    fn state(&self) -> ModuleState {
        ModuleState::None
    }

    fn restore(&mut self, st: &ModuleState) {
        let _ = st;
    }

    /// Host-side access for frontends and tests.
    fn as_any(&mut self) -> &mut dyn Any;
}
