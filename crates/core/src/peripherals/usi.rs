//! Universal serial interface (shift-register engine).
//!
//! One control-register write reconfigures the whole unit: wire mode
//! (disabled / three-wire / two-wire / two-wire with clock hold) assigns
//! pin roles and edge subscriptions, the clock-source field rebinds the
//! counter and shift clock between a software strobe, external clock
//! edges and the timer0 compare-match callback. A 4-bit counter counts
//! qualifying clock events and raises the module interrupt exactly once
//! when it reaches 8, wrapping to zero; the shift register moves one bit
//! MSB-first per shift clock, driving the data-out pin and capturing the
//! data-in pin. Two-wire mode layers a start/stop-condition detector on
//! the data line without touching the counting or shifting path.

use std::any::Any;

use crate::dataspace::RegBits;
use crate::interrupts::IntId;
use crate::mcu::McuCtx;
use crate::pins::PinId;
use crate::savestate::{ModuleState, UsiSave};
use crate::watch::RegEvent;

use super::McuModule;

/// Counter wraps (and the interrupt raises) after this many clock events.
const COUNTER_OVERFLOW: u8 = 8;

pub struct Usi {
    name: String,
    index: usize,
    // Wiring, resolved at build time.
    pub(crate) data_reg: Option<u16>,
    pub(crate) buffer_reg: Option<u16>,
    pub(crate) status_reg: Option<u16>,
    pub(crate) bits_tc: Option<RegBits>,
    pub(crate) bits_clk: Option<RegBits>,
    pub(crate) bits_cs: Option<RegBits>,
    pub(crate) bits_wm: Option<RegBits>,
    pub(crate) bits_cnt: Option<RegBits>,
    pub(crate) flag_start: Option<(u16, u8)>,
    pub(crate) flag_stop: Option<(u16, u8)>,
    pub(crate) do_pin: Option<PinId>,
    pub(crate) di_pin: Option<PinId>,
    pub(crate) ck_pin: Option<PinId>,
    pub(crate) irq: Option<IntId>,
    /// Timer0 compare interrupts hooked as the clock source.
    pub(crate) timer_irqs: Vec<IntId>,
    // Runtime state.
    mode: u8,
    clock_mode: u8,
    counter: u8,
    ext_clk: bool,
    usi_clk: bool,
    clk_edge: bool,
    clk_state: bool,
    timer_clk: bool,
    sda_prev: bool,
    held: bool,
}

impl Usi {
    pub fn new(name: &str, index: usize) -> Self {
        Usi {
            name: name.to_string(),
            index,
            data_reg: None,
            buffer_reg: None,
            status_reg: None,
            bits_tc: None,
            bits_clk: None,
            bits_cs: None,
            bits_wm: None,
            bits_cnt: None,
            flag_start: None,
            flag_stop: None,
            do_pin: None,
            di_pin: None,
            ck_pin: None,
            irq: None,
            timer_irqs: Vec::new(),
            mode: 0,
            clock_mode: 0,
            counter: 0,
            ext_clk: false,
            usi_clk: false,
            clk_edge: false,
            clk_state: false,
            timer_clk: false,
            sda_prev: false,
            held: false,
        }
    }

    pub fn counter(&self) -> u8 {
        self.counter
    }

    /// One qualifying counter clock. At overflow: latch the shifted byte
    /// into the buffer register, raise the interrupt, and in held
    /// two-wire mode pull the clock line low.
    fn step_counter(&mut self, ctx: &mut McuCtx) {
        self.counter += 1;
        if self.counter == COUNTER_OVERFLOW {
            self.counter = 0;
            if let (Some(d), Some(b)) = (self.data_reg, self.buffer_reg) {
                let v = ctx.regs.read_phys(d);
                ctx.regs.write_phys(b, v);
            }
            ctx.raise_irq(self.irq);
            if self.mode == 3 {
                if let Some(ck) = self.ck_pin {
                    ctx.set_pin_out(ck, false);
                    self.held = true;
                }
            }
        }
        // Status register mirrors the running count.
        if let (Some(sr), Some(rb)) = (self.status_reg, self.bits_cnt) {
            let byte = ctx.regs.read_phys(sr);
            ctx.regs.write_phys(sr, rb.insert(byte, self.counter));
        }
    }

    /// One shift clock: MSB out to the data-out pin, data-in captured
    /// into bit 0.
    fn shift_data(&mut self, ctx: &mut McuCtx) {
        let Some(d) = self.data_reg else { return };
        let di = self.di_pin.map_or(false, |p| ctx.pin_inp(p));
        let v = (ctx.regs.read_phys(d) << 1) | di as u8;
        ctx.regs.write_phys(d, v);
        if let Some(dp) = self.do_pin {
            ctx.set_pin_out(dp, v & 0x80 != 0);
        }
    }

    fn configure(&mut self, value: u8, ctx: &mut McuCtx) {
        let mode = self.bits_wm.map_or(0, |rb| rb.extract(value));
        if mode != self.mode {
            self.mode = mode;
            let three_wire = mode == 1;
            let two_wire = mode >= 2;

            if let Some(dp) = self.do_pin {
                ctx.set_pin_forced_out(dp, three_wire);
            }
            if let Some(di) = self.di_pin {
                ctx.set_pin_callback(di, self.index, two_wire);
                ctx.set_pin_open_col(di, two_wire);
                if two_wire {
                    self.sda_prev = ctx.pin_inp(di);
                }
            }
            if let Some(ck) = self.ck_pin {
                ctx.set_pin_open_col(ck, two_wire);
            }
        }
        if self.mode == 0 {
            return;
        }

        let clock_mode = self.bits_cs.map_or(0, |rb| rb.extract(value));
        if clock_mode != self.clock_mode {
            self.clock_mode = clock_mode;
            self.clk_edge = clock_mode == 2;
            let ext = clock_mode >= 2;
            let timer = clock_mode == 1;

            if ext != self.ext_clk {
                self.ext_clk = ext;
                if let Some(ck) = self.ck_pin {
                    ctx.set_pin_callback(ck, self.index, ext);
                    if ext {
                        self.clk_state = ctx.pin_inp(ck);
                    }
                }
            }
            if timer != self.timer_clk {
                self.timer_clk = timer;
                for irq in self.timer_irqs.clone() {
                    ctx.set_irq_callback(Some(irq), self.index, timer);
                }
            }
        }
        if self.timer_clk {
            return;
        }

        let usi_tc = self.bits_tc.map_or(false, |rb| rb.is_set(value));
        if usi_tc {
            if let Some(ck) = self.ck_pin {
                ctx.toggle_pin(ck);
            }
        }
        self.usi_clk = self.bits_clk.map_or(false, |rb| rb.is_set(value));
        if self.usi_clk {
            if !self.ext_clk {
                // Software strobe clocks shifter and counter together.
                self.shift_data(ctx);
                self.step_counter(ctx);
            } else if usi_tc {
                self.step_counter(ctx);
            }
        }

        // Strobe bits always read back as zero.
        let strip = self.bits_tc.map_or(0, |rb| rb.mask) | self.bits_clk.map_or(0, |rb| rb.mask);
        ctx.override_reg(value & !strip);
    }
}

impl McuModule for Usi {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self, ctx: &mut McuCtx) {
        if self.ext_clk {
            if let Some(ck) = self.ck_pin {
                ctx.set_pin_callback(ck, self.index, false);
            }
        }
        if self.mode >= 2 {
            if let Some(di) = self.di_pin {
                ctx.set_pin_callback(di, self.index, false);
                ctx.set_pin_open_col(di, false);
            }
            if let Some(ck) = self.ck_pin {
                ctx.set_pin_open_col(ck, false);
            }
        }
        if self.timer_clk {
            for irq in self.timer_irqs.clone() {
                ctx.set_irq_callback(Some(irq), self.index, false);
            }
        }
        if let Some(dp) = self.do_pin {
            ctx.set_pin_forced_out(dp, false);
        }
        self.mode = 0;
        self.clock_mode = 0;
        self.counter = 0;
        self.ext_clk = false;
        self.usi_clk = false;
        self.clk_edge = false;
        self.clk_state = false;
        self.timer_clk = false;
        self.sda_prev = false;
        self.held = false;
    }

    fn reg_event(&mut self, ev: RegEvent, value: u8, ctx: &mut McuCtx) {
        match ev {
            RegEvent::ConfigA => self.configure(value, ctx),
            RegEvent::ConfigB => {
                // Counter value is writable through the status register.
                self.counter = self.bits_cnt.map_or(0, |rb| rb.extract(value));
                if self.held {
                    self.held = false;
                    if let Some(ck) = self.ck_pin {
                        ctx.set_pin_out(ck, true);
                    }
                }
            }
            _ => {}
        }
    }

    fn pin_event(&mut self, pin: PinId, ctx: &mut McuCtx) {
        if self.ck_pin == Some(pin) {
            let clk = ctx.pin_inp(pin);
            if clk == self.clk_state {
                return;
            }
            let rising = !self.clk_state && clk;
            if (self.clk_edge && rising) || (!self.clk_edge && !rising) {
                self.shift_data(ctx);
            }
            if !self.usi_clk {
                // Counter counts both external edges.
                self.step_counter(ctx);
            }
            self.clk_state = clk;
            return;
        }
        if self.di_pin == Some(pin) && self.mode >= 2 {
            // Start/stop detector: data transitions while clock is high.
            let sda = ctx.pin_inp(pin);
            let clk_high = self.ck_pin.map_or(false, |ck| ctx.pin_inp(ck));
            if clk_high && sda != self.sda_prev {
                let flag = if self.sda_prev { self.flag_start } else { self.flag_stop };
                if let Some((addr, mask)) = flag {
                    ctx.regs.set_bit_phys(addr, mask, true);
                }
            }
            self.sda_prev = sda;
        }
    }

    fn irq_callback(&mut self, ctx: &mut McuCtx) {
        // Timer0 compare match selected as clock source.
        if self.timer_clk {
            self.shift_data(ctx);
            self.step_counter(ctx);
        }
    }

    fn state(&self) -> ModuleState {
        ModuleState::Usi(UsiSave {
            mode: self.mode,
            clock_mode: self.clock_mode,
            counter: self.counter,
            ext_clk: self.ext_clk,
            usi_clk: self.usi_clk,
            clk_edge: self.clk_edge,
            clk_state: self.clk_state,
            timer_clk: self.timer_clk,
            sda_prev: self.sda_prev,
            held: self.held,
        })
    }

    fn restore(&mut self, st: &ModuleState) {
        let ModuleState::Usi(s) = st else { return };
        self.mode = s.mode;
        self.clock_mode = s.clock_mode;
        self.counter = s.counter;
        self.ext_clk = s.ext_clk;
        self.usi_clk = s.usi_clk;
        self.clk_edge = s.clk_edge;
        self.clk_state = s.clk_state;
        self.timer_clk = s.timer_clk;
        self.sda_prev = s.sda_prev;
        self.held = s.held;
    }

    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}
