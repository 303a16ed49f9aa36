//! Timer/counter family.
//!
//! One counting and compare engine serves every width and family
//! variant: 8-bit and 16-bit differ only in register layout (single byte
//! vs low/high pair) and top-value range, never in algorithm. Waveform
//! modes (normal, CTC, fast PWM, phase-correct PWM) come from the WGM bit
//! group; the effective clock comes from a descriptor-supplied prescaler
//! list indexed by the prescaler-select bit group, or from an external
//! clock pin. An invalid or zero prescaler selection stops the timer.
//!
//! Counting is lazy: the engine settles elapsed cycles on every
//! observation point (count read/write, configuration change,
//! `run_to`), computing wrap and compare crossings arithmetically so a
//! large coalesced advance raises each interrupt exactly once per event,
//! never once per sub-tick.

use std::any::Any;

use crate::dataspace::RegBits;
use crate::interrupts::IntId;
use crate::mcu::McuCtx;
use crate::pins::PinId;
use crate::savestate::{ModuleState, TimerSave};
use crate::watch::RegEvent;

use super::McuModule;

/// Family/width variant tag. The closed set replaces the original's
/// subclass chain; all variants share [`Timer::advance_ticks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// AVR 8-bit timer with waveform generation.
    Avr8,
    /// AVR 16-bit timer with waveform generation.
    Avr16,
    /// Plain up-counter with overflow interrupt (PIC14 / 8051 timers).
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wgm {
    Normal,
    Ctc,
    Fast,
    Phase,
}

/// Output-compare sub-unit: compare register, optional output pin with a
/// COM action bit group, own interrupt.
pub(crate) struct OcUnit {
    pub(crate) pin: Option<PinId>,
    pub(crate) irq: Option<IntId>,
    pub(crate) com: Option<RegBits>,
    pub(crate) compare: u32,
}

pub struct Timer {
    name: String,
    kind: TimerKind,
    width_mask: u32,
    // Wiring, resolved at build time.
    pub(crate) count_l: Option<u16>,
    pub(crate) count_h: Option<u16>,
    pub(crate) wgm_lo: Option<RegBits>,
    pub(crate) wgm_hi: Option<RegBits>,
    pub(crate) presc_sel: Option<RegBits>,
    pub(crate) presc_list: Vec<u32>,
    pub(crate) ext_pin: Option<PinId>,
    pub(crate) irq: Option<IntId>,
    pub(crate) ocs: Vec<OcUnit>,
    pub(crate) default_enabled: bool,
    // Runtime state.
    enabled: bool,
    prescale: u32,
    wgm: Wgm,
    top_is_ocra: bool,
    fixed_top: u32,
    count: u32,
    down: bool,
    last_sync: u64,
    ext_prev: bool,
}

/// Arrivals at `point` within `(start, start + ticks]` on a cycle of
/// `period` positions.
fn crossings(start: u64, ticks: u64, period: u64, point: u64) -> u64 {
    if period == 0 || point >= period {
        return 0;
    }
    let d0 = (point + period - (start % period)) % period;
    let d = if d0 == 0 { period } else { d0 };
    if ticks >= d {
        (ticks - d) / period + 1
    } else {
        0
    }
}

impl Timer {
    pub fn new(name: &str, kind: TimerKind) -> Self {
        Timer {
            name: name.to_string(),
            kind,
            width_mask: match kind {
                TimerKind::Avr16 => 0xFFFF,
                _ => 0xFF,
            },
            count_l: None,
            count_h: None,
            wgm_lo: None,
            wgm_hi: None,
            presc_sel: None,
            presc_list: Vec::new(),
            ext_pin: None,
            irq: None,
            ocs: Vec::new(),
            default_enabled: true,
            enabled: true,
            prescale: 0,
            wgm: Wgm::Normal,
            top_is_ocra: false,
            fixed_top: match kind {
                TimerKind::Avr16 => 0xFFFF,
                _ => 0xFF,
            },
            count: 0,
            down: false,
            last_sync: 0,
            ext_prev: false,
        }
    }

    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Attach one output-compare sub-unit; returns its unit index.
    pub(crate) fn add_oc(&mut self, pin: Option<PinId>, com: Option<RegBits>) -> usize {
        self.ocs.push(OcUnit { pin, irq: None, com, compare: 0 });
        self.ocs.len() - 1
    }

    pub(crate) fn set_oc_irq(&mut self, unit: usize, irq: Option<IntId>) {
        if let Some(oc) = self.ocs.get_mut(unit) {
            oc.irq = irq;
        }
    }

    pub(crate) fn oc_irq(&self, unit: usize) -> Option<IntId> {
        self.ocs.get(unit).and_then(|oc| oc.irq)
    }

    fn top(&self) -> u32 {
        if self.top_is_ocra {
            let ocra = self.ocs.first().map_or(0, |oc| oc.compare);
            if ocra > 0 {
                ocra & self.width_mask
            } else {
                self.width_mask
            }
        } else {
            self.fixed_top
        }
    }

    /// Re-read waveform mode and prescaler selection from the stored
    /// configuration registers. Called on every config event, after
    /// settling elapsed time under the old configuration.
    fn reconfigure(&mut self, ctx: &mut McuCtx) {
        self.sync(ctx.cycle, ctx);

        self.prescale = if self.ext_pin.is_some() {
            0
        } else {
            let sel = self.presc_sel.map_or(0, |rb| ctx.regs.read_bits(rb)) as usize;
            self.presc_list.get(sel).copied().unwrap_or(0)
        };

        if self.kind == TimerKind::Generic {
            return;
        }

        let lo = self.wgm_lo.map_or(0, |rb| ctx.regs.read_bits(rb));
        let hi = self.wgm_hi.map_or(0, |rb| ctx.regs.read_bits(rb));
        let w = lo | (hi << 2);

        let (wgm, top_is_ocra, fixed) = match self.kind {
            TimerKind::Avr8 => match w {
                1 => (Wgm::Phase, false, 0xFF),
                2 => (Wgm::Ctc, true, 0),
                3 => (Wgm::Fast, false, 0xFF),
                5 => (Wgm::Phase, true, 0),
                7 => (Wgm::Fast, true, 0),
                _ => (Wgm::Normal, false, 0xFF),
            },
            TimerKind::Avr16 => match w {
                1 => (Wgm::Phase, false, 0xFF),
                2 => (Wgm::Phase, false, 0x1FF),
                3 => (Wgm::Phase, false, 0x3FF),
                4 | 12 => (Wgm::Ctc, true, 0),
                5 => (Wgm::Fast, false, 0xFF),
                6 => (Wgm::Fast, false, 0x1FF),
                7 => (Wgm::Fast, false, 0x3FF),
                8..=11 => (Wgm::Phase, true, 0),
                14 | 15 => (Wgm::Fast, true, 0),
                _ => (Wgm::Normal, false, 0xFFFF),
            },
            TimerKind::Generic => unreachable!(),
        };
        self.wgm = wgm;
        self.top_is_ocra = top_is_ocra;
        if fixed > 0 {
            self.fixed_top = fixed;
        }
        if self.wgm != Wgm::Phase {
            self.down = false;
        }
    }

    /// Settle elapsed cycles into counter ticks.
    fn sync(&mut self, cycle: u64, ctx: &mut McuCtx) {
        if self.prescale == 0 || !self.enabled {
            self.last_sync = cycle;
            return;
        }
        let elapsed = cycle.saturating_sub(self.last_sync);
        let ticks = elapsed / self.prescale as u64;
        if ticks == 0 {
            return;
        }
        self.last_sync += ticks * self.prescale as u64;
        self.advance_ticks(ticks, ctx);
    }

    /// The shared counting/compare algorithm.
    fn advance_ticks(&mut self, ticks: u64, ctx: &mut McuCtx) {
        let top = self.top() as u64;

        if self.wgm == Wgm::Phase && top > 0 {
            // Triangle count: position runs over a 2*top cycle, the
            // overflow condition is the arrival at bottom.
            let period = 2 * top;
            let clamped = (self.count as u64).min(top);
            let start = if self.down { (2 * top - clamped) % period } else { clamped };
            let wraps = crossings(start, ticks, period, 0);
            if wraps > 0 {
                ctx.raise_irq(self.irq);
            }
            for i in 0..self.ocs.len() {
                let c = self.ocs[i].compare as u64;
                if c > top {
                    continue;
                }
                let mut matches = crossings(start, ticks, period, c);
                let mirror = (period - c) % period;
                if mirror != c {
                    matches += crossings(start, ticks, period, mirror);
                }
                self.oc_fire(i, matches, ctx);
            }
            let pos = (start + ticks) % period;
            if pos <= top {
                self.count = pos as u32;
                self.down = false;
            } else {
                self.count = (period - pos) as u32;
                self.down = true;
            }
            return;
        }

        // Normal / CTC / fast PWM: wrap to zero after top.
        let period = top + 1;
        let start = (self.count as u64).min(period - 1);
        let wraps = crossings(start, ticks, period, 0);
        if wraps > 0 && self.wgm != Wgm::Ctc {
            // CTC signals through the compare unit at top instead.
            ctx.raise_irq(self.irq);
        }
        for i in 0..self.ocs.len() {
            let c = self.ocs[i].compare as u64;
            if c >= period {
                continue;
            }
            let matches = crossings(start, ticks, period, c);
            self.oc_fire(i, matches, ctx);
        }
        self.count = ((start + ticks) % period) as u32;
    }

    /// Apply one compare unit's pin action and interrupt for `matches`
    /// match events (coalesced: toggle keeps parity, the interrupt is
    /// raised once).
    fn oc_fire(&mut self, unit: usize, matches: u64, ctx: &mut McuCtx) {
        if matches == 0 {
            return;
        }
        let oc = &self.ocs[unit];
        if let Some(pin) = oc.pin {
            let com = oc.com.map_or(0, |rb| ctx.regs.read_bits(rb));
            match com {
                1 => {
                    if matches & 1 == 1 {
                        ctx.toggle_pin(pin);
                    }
                }
                2 => ctx.set_pin_out(pin, false),
                3 => ctx.set_pin_out(pin, true),
                _ => {}
            }
        }
        ctx.raise_irq(self.ocs[unit].irq);
    }

    fn mirror_count(&self, ctx: &mut McuCtx) {
        if let Some(a) = self.count_l {
            ctx.regs.write_phys(a, self.count as u8);
        }
        if let Some(a) = self.count_h {
            ctx.regs.write_phys(a, (self.count >> 8) as u8);
        }
    }
}

impl McuModule for Timer {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self, _ctx: &mut McuCtx) {
        self.enabled = self.default_enabled;
        self.prescale = 0;
        self.wgm = Wgm::Normal;
        self.top_is_ocra = false;
        self.fixed_top = self.width_mask;
        self.count = 0;
        self.down = false;
        self.last_sync = 0;
        self.ext_prev = false;
        for oc in &mut self.ocs {
            oc.compare = 0;
        }
    }

    fn reg_event(&mut self, ev: RegEvent, value: u8, ctx: &mut McuCtx) {
        match ev {
            RegEvent::ConfigA | RegEvent::ConfigB => self.reconfigure(ctx),
            RegEvent::ModuleEnable => {
                self.sync(ctx.cycle, ctx);
                self.enabled = value != 0;
                self.last_sync = ctx.cycle;
                self.reconfigure(ctx);
            }
            RegEvent::CountWriteL => {
                self.sync(ctx.cycle, ctx);
                self.count = (self.count & !0xFF) | value as u32;
            }
            RegEvent::CountWriteH => {
                self.sync(ctx.cycle, ctx);
                self.count = (self.count & 0xFF) | ((value as u32) << 8);
            }
            RegEvent::CountRead => {
                self.sync(ctx.cycle, ctx);
                self.mirror_count(ctx);
            }
            RegEvent::OcrWrite { unit, high } => {
                self.sync(ctx.cycle, ctx);
                if let Some(oc) = self.ocs.get_mut(unit as usize) {
                    oc.compare = if high {
                        (oc.compare & 0xFF) | ((value as u32) << 8)
                    } else {
                        (oc.compare & !0xFF) | value as u32
                    };
                }
            }
            _ => {}
        }
    }

    fn pin_event(&mut self, pin: PinId, ctx: &mut McuCtx) {
        if self.ext_pin != Some(pin) {
            return;
        }
        let state = ctx.pin_inp(pin);
        if state && !self.ext_prev && self.enabled {
            self.advance_ticks(1, ctx);
            self.mirror_count(ctx);
        }
        self.ext_prev = state;
    }

    fn run_to(&mut self, cycle: u64, ctx: &mut McuCtx) {
        self.sync(cycle, ctx);
    }

    fn state(&self) -> ModuleState {
        ModuleState::Timer(TimerSave {
            count: self.count,
            down: self.down,
            prescale: self.prescale,
            enabled: self.enabled,
            last_sync: self.last_sync,
            ext_prev: self.ext_prev,
            wgm: match self.wgm {
                Wgm::Normal => 0,
                Wgm::Ctc => 1,
                Wgm::Fast => 2,
                Wgm::Phase => 3,
            },
            compares: self.ocs.iter().map(|oc| oc.compare).collect(),
        })
    }

    fn restore(&mut self, st: &ModuleState) {
        let ModuleState::Timer(s) = st else { return };
        self.count = s.count;
        self.down = s.down;
        self.prescale = s.prescale;
        self.enabled = s.enabled;
        self.last_sync = s.last_sync;
        self.ext_prev = s.ext_prev;
        self.wgm = match s.wgm {
            1 => Wgm::Ctc,
            2 => Wgm::Fast,
            3 => Wgm::Phase,
            _ => Wgm::Normal,
        };
        for (oc, c) in self.ocs.iter_mut().zip(&s.compares) {
            oc.compare = *c;
        }
    }

    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossings() {
        // Counting 0..=255, one wrap per 256 ticks.
        assert_eq!(crossings(0, 255, 256, 0), 0);
        assert_eq!(crossings(0, 256, 256, 0), 1);
        assert_eq!(crossings(0, 512, 256, 0), 2);
        // Compare point ahead of the start position.
        assert_eq!(crossings(10, 5, 256, 15), 1);
        assert_eq!(crossings(10, 4, 256, 15), 0);
        // Start sitting on the point does not count as an arrival.
        assert_eq!(crossings(15, 255, 256, 15), 0);
        assert_eq!(crossings(15, 256, 256, 15), 1);
        // Out-of-range point never fires.
        assert_eq!(crossings(0, 1000, 256, 300), 0);
    }
}
