//! The device-model owning context.
//!
//! [`Mcu`] is the single owner of everything the descriptor built:
//! register space, interrupt table, pins, program memory, EEPROM, the
//! peripheral module list and the dispatch bus. The external CPU stepper
//! drives it through [`Mcu::read_data`] / [`Mcu::write_data`] (which run
//! the dispatch bus synchronously) and [`Mcu::advance`], and consumes
//! [`Mcu::pending_irq`] once per simulated cycle. The external circuit
//! layer talks to pins through [`crate::pins::PinId`] handles.
//!
//! Modules receive [`McuCtx`] — every owned resource except the module
//! list itself — so a module can mutate registers, raise interrupts and
//! drive pins while it is the one borrowed module. Reactions that would
//! re-enter the module list (edge callbacks, interrupt callbacks) are
//! queued and drained before the triggering access returns, still within
//! the same simulated cycle and in enqueue order.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use crate::dataspace::DataSpace;
use crate::interrupts::{IntId, InterruptTable, PendingIrq};
use crate::peripherals::{McuModule, Spi, Usart, Wdt};
use crate::pins::{PinDrive, PinId, PinSet};
use crate::savestate::{McuState, SavedEvent};
use crate::watch::{AccessKind, RegEvent, RegWatch, Subscription, WatchTarget};

/// Instruction-decoding engine family declared by the descriptor root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreFamily {
    Avr,
    Pic14,
    I51,
    Unknown,
}

impl CoreFamily {
    pub fn from_tag(tag: &str) -> CoreFamily {
        match tag {
            "AVR" => CoreFamily::Avr,
            "Pic14" => CoreFamily::Pic14,
            "8051" => CoreFamily::I51,
            _ => CoreFamily::Unknown,
        }
    }
}

/// Core-facing facts resolved at the end of the build: family, program
/// word size, ticks per instruction, and the stack-pointer binding.
#[derive(Debug, Clone)]
pub struct CoreSpec {
    pub family: CoreFamily,
    pub word_size: u8,
    pub inst_cycle: f64,
    pub spl: Option<u16>,
    pub sph: Option<u16>,
    /// Stack pointer moves before (true) or after (false) the access.
    pub sp_pre: bool,
    /// +1 or -1 per push.
    pub sp_inc: i8,
}

impl Default for CoreSpec {
    fn default() -> Self {
        CoreSpec {
            family: CoreFamily::Unknown,
            word_size: 2,
            inst_cycle: 1.0,
            spl: None,
            sph: None,
            sp_pre: false,
            sp_inc: -1,
        }
    }
}

/// A deferred same-cycle module notification.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Notify {
    Pin { module: usize, pin: PinId },
    Irq { module: usize },
}

/// Target of a scheduled (simulated-time-delayed) event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum EventTarget {
    PinState { pin: PinId, state: bool },
    Module { index: usize, tag: u8 },
}

#[derive(Debug, Clone, Copy)]
struct Scheduled {
    due: u64,
    seq: u64,
    target: EventTarget,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}
impl Eq for Scheduled {}
impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// Everything a module may touch during a callback.
pub struct McuCtx {
    pub regs: DataSpace,
    pub irqs: InterruptTable,
    pub pins: PinSet,
    pub eeprom: Vec<u8>,
    pub cycle: u64,
    /// Latched when the watchdog expires with its interrupt disabled;
    /// the CPU stepper consumes it as a reset request.
    pub watchdog_expired: bool,
    pub(crate) prog: Vec<u16>,
    pub(crate) cfg_words: HashMap<u16, u16>,
    events: BinaryHeap<Reverse<Scheduled>>,
    seq: u64,
    notify: VecDeque<Notify>,
    reg_override: Option<u8>,
}

impl McuCtx {
    fn new() -> Self {
        McuCtx {
            regs: DataSpace::new(),
            irqs: InterruptTable::new(),
            pins: PinSet::new(),
            eeprom: Vec::new(),
            cycle: 0,
            watchdog_expired: false,
            prog: Vec::new(),
            cfg_words: HashMap::new(),
            events: BinaryHeap::new(),
            seq: 0,
            notify: VecDeque::new(),
            reg_override: None,
        }
    }

    /// Set the interrupt's flag bit. A `None` handle is a safe no-op.
    pub fn raise_irq(&mut self, irq: Option<IntId>) {
        let Some(id) = irq else { return };
        if let Some((addr, mask)) = self.irqs.flag_of(id) {
            self.regs.set_bit_phys(addr, mask, true);
        }
        for &m in self.irqs.callbacks_of(id) {
            self.notify.push_back(Notify::Irq { module: m });
        }
    }

    /// Clear the interrupt's flag bit.
    pub fn clear_irq(&mut self, irq: Option<IntId>) {
        let Some(id) = irq else { return };
        if let Some((addr, mask)) = self.irqs.flag_of(id) {
            self.regs.set_bit_phys(addr, mask, false);
        }
    }

    /// One-shot override of the register byte being written; applied
    /// after all write subscribers ran (control bits that read as zero).
    pub fn override_reg(&mut self, v: u8) {
        self.reg_override = Some(v);
    }

    /// Queue an event `delay` cycles from now.
    pub fn schedule(&mut self, delay: u64, target: EventTarget) {
        let s = Scheduled { due: self.cycle + delay, seq: self.seq, target };
        self.seq += 1;
        self.events.push(Reverse(s));
    }

    pub fn pin_inp(&self, pin: PinId) -> bool {
        self.pins.get(pin).inp_state()
    }

    pub fn pin_voltage(&self, pin: PinId) -> f64 {
        self.pins.get(pin).voltage
    }

    /// Drive a pin from a module. Edge callbacks fire before the
    /// triggering register access returns.
    pub fn set_pin_out(&mut self, pin: PinId, state: bool) {
        let before = self.pins.get(pin).inp_state();
        self.pins.get_mut(pin).out_state = state;
        self.edge_check(pin, before);
    }

    pub fn toggle_pin(&mut self, pin: PinId) {
        let state = !self.pins.get(pin).out_state;
        self.set_pin_out(pin, state);
    }

    pub(crate) fn set_pin_ext(&mut self, pin: PinId, state: bool) {
        let before = self.pins.get(pin).inp_state();
        let p = self.pins.get_mut(pin);
        p.ext_driven = true;
        p.ext_state = state;
        self.edge_check(pin, before);
    }

    fn edge_check(&mut self, pin: PinId, before: bool) {
        if self.pins.get(pin).inp_state() == before {
            return;
        }
        for &m in &self.pins.get(pin).callbacks {
            self.notify.push_back(Notify::Pin { module: m, pin });
        }
    }

    /// Module takes/releases direction control of a pin (USI DO).
    pub fn set_pin_forced_out(&mut self, pin: PinId, on: bool) {
        self.pins.get_mut(pin).forced_out = on;
    }

    pub fn set_pin_open_col(&mut self, pin: PinId, on: bool) {
        self.pins.get_mut(pin).open_col = on;
    }

    pub fn set_pin_pullup(&mut self, pin: PinId, on: bool) {
        self.pins.get_mut(pin).pullup = on;
    }

    pub fn set_pin_dir(&mut self, pin: PinId, out: bool) {
        let before = self.pins.get(pin).inp_state();
        self.pins.get_mut(pin).out_enabled = out;
        self.edge_check(pin, before);
    }

    pub fn set_pin_callback(&mut self, pin: PinId, module: usize, on: bool) {
        self.pins.set_callback(pin, module, on);
    }

    pub fn set_irq_callback(&mut self, irq: Option<IntId>, module: usize, on: bool) {
        if let Some(id) = irq {
            self.irqs.set_callback(id, module, on);
        }
    }

    pub(crate) fn pop_notify(&mut self) -> Option<Notify> {
        self.notify.pop_front()
    }

    fn pop_due(&mut self, cycle: u64) -> Option<Scheduled> {
        if let Some(Reverse(s)) = self.events.peek() {
            if s.due <= cycle {
                return self.events.pop().map(|Reverse(s)| s);
            }
        }
        None
    }

    fn peek_due(&self) -> Option<u64> {
        self.events.peek().map(|Reverse(s)| s.due)
    }
}

/// The built device.
pub struct Mcu {
    pub(crate) ctx: McuCtx,
    pub(crate) modules: Vec<Box<dyn McuModule>>,
    pub(crate) watch: RegWatch,
    pub core: CoreSpec,
    pub(crate) wdt_index: Option<usize>,
    /// Clock frequency in Hz, set by the embedding simulator.
    pub freq: f64,
}

impl std::fmt::Debug for Mcu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mcu")
            .field("modules", &self.modules.iter().map(|m| m.name()).collect::<Vec<_>>())
            .field("core", &self.core)
            .field("freq", &self.freq)
            .finish()
    }
}

impl Mcu {
    pub(crate) fn new() -> Self {
        Mcu {
            ctx: McuCtx::new(),
            modules: Vec::new(),
            watch: RegWatch::new(),
            core: CoreSpec::default(),
            wdt_index: None,
            freq: 0.0,
        }
    }

    // --- CPU stepper interface ---

    /// Read one data-space byte, running read subscribers first (a timer
    /// refreshes its count register here, a UART pops its FIFO). Unmapped
    /// addresses read 0 and dispatch nothing.
    pub fn read_data(&mut self, addr: u16) -> u8 {
        let Some(phys) = self.ctx.regs.map(addr) else { return 0 };
        let byte = self.ctx.regs.read_phys(phys);
        self.dispatch(phys, AccessKind::Read, byte);
        self.drain_notifications();
        self.ctx.regs.read_phys(phys)
    }

    /// Write one data-space byte. The write mask is applied, the masked
    /// byte stored, then write subscribers run in registration order; a
    /// subscriber may override the stored byte. Unmapped addresses are
    /// discarded without dispatch.
    pub fn write_data(&mut self, addr: u16, value: u8) {
        let Some(phys) = self.ctx.regs.map(addr) else { return };
        let old = self.ctx.regs.read_phys(phys);
        let mask = self.ctx.regs.write_mask(phys);
        let stored = (value & mask) | (old & !mask);
        self.ctx.regs.write_phys(phys, stored);
        self.ctx.reg_override = None;
        self.dispatch(phys, AccessKind::Write, stored);
        if let Some(ov) = self.ctx.reg_override.take() {
            self.ctx.regs.write_phys(phys, ov);
        }
        self.drain_notifications();
    }

    /// Advance simulated time, draining due scheduled events in
    /// (due-cycle, insertion) order and letting time-based modules catch
    /// up. Everything completes before this returns.
    pub fn advance(&mut self, cycles: u64) {
        let target = self.ctx.cycle + cycles;
        while let Some(due) = self.ctx.peek_due() {
            if due > target {
                break;
            }
            self.ctx.cycle = self.ctx.cycle.max(due);
            let now = self.ctx.cycle;
            while let Some(ev) = self.ctx.pop_due(now) {
                match ev.target {
                    EventTarget::PinState { pin, state } => self.ctx.set_pin_out(pin, state),
                    EventTarget::Module { index, tag } => {
                        if let Some(m) = self.modules.get_mut(index) {
                            m.scheduled(tag, &mut self.ctx);
                        }
                    }
                }
                self.drain_notifications();
            }
        }
        self.ctx.cycle = target;
        for m in &mut self.modules {
            m.run_to(target, &mut self.ctx);
        }
        self.drain_notifications();
    }

    pub fn cycle(&self) -> u64 {
        self.ctx.cycle
    }

    /// Highest-priority enabled+flagged interrupt, if the global enable
    /// is set. Queried by the stepper once per cycle.
    pub fn pending_irq(&self) -> Option<PendingIrq> {
        self.ctx.irqs.pending(&self.ctx.regs)
    }

    /// CPU took the vector: clear its flag bit.
    pub fn ack_irq(&mut self, id: IntId) {
        self.ctx.irqs.acknowledge(id, &mut self.ctx.regs);
    }

    pub fn interrupt(&self, name: &str) -> Option<IntId> {
        self.ctx.irqs.id(name)
    }

    pub fn irqs(&self) -> &InterruptTable {
        &self.ctx.irqs
    }

    /// Raise an interrupt from outside the module system (tests, host
    /// glue). `None` is a no-op.
    pub fn raise_irq(&mut self, irq: Option<IntId>) {
        self.ctx.raise_irq(irq);
        self.drain_notifications();
    }

    /// Current stack-pointer value assembled from the bound SP registers.
    pub fn stack_pointer(&self) -> u32 {
        let lo = self.core.spl.map_or(0, |a| self.ctx.regs.read_phys(a)) as u32;
        let hi = self.core.sph.map_or(0, |a| self.ctx.regs.read_phys(a)) as u32;
        (hi << 8) | lo
    }

    // --- Raw access (no dispatch) ---

    pub fn read_raw(&self, addr: u16) -> u8 {
        self.ctx.regs.read_raw(addr)
    }

    pub fn write_raw(&mut self, addr: u16, v: u8) {
        self.ctx.regs.write_raw(addr, v);
    }

    pub fn regs(&self) -> &DataSpace {
        &self.ctx.regs
    }

    // --- Program memory / EEPROM ---

    pub fn flash_size(&self) -> usize {
        self.ctx.prog.len()
    }

    pub fn get_flash_value(&self, address: usize) -> u16 {
        self.ctx.prog.get(address).copied().unwrap_or(0xFFFF)
    }

    pub fn set_flash_value(&mut self, address: usize, value: u16) {
        if let Some(w) = self.ctx.prog.get_mut(address) {
            *w = value;
        }
    }

    pub fn rom_size(&self) -> usize {
        self.ctx.eeprom.len()
    }

    pub fn get_rom_value(&self, address: usize) -> u8 {
        self.ctx.eeprom.get(address).copied().unwrap_or(0xFF)
    }

    pub fn set_rom_value(&mut self, address: usize, value: u8) {
        if let Some(b) = self.ctx.eeprom.get_mut(address) {
            *b = value;
        }
    }

    pub fn eeprom(&self) -> &[u8] {
        &self.ctx.eeprom
    }

    /// Load an Intel HEX image into program memory and reset the device.
    ///
    /// Returns the number of bytes loaded.
    pub fn load_hex(&mut self, hex_str: &str) -> Result<usize, String> {
        let word = self.core.word_size.max(1) as usize;
        let mut bytes = vec![0xFFu8; self.ctx.prog.len() * word];
        let size = crate::hex::parse_hex(hex_str, &mut bytes)?;
        for (i, w) in self.ctx.prog.iter_mut().enumerate() {
            *w = match word {
                1 => bytes[i] as u16,
                _ => bytes[i * word] as u16 | ((bytes[i * word + 1] as u16) << 8),
            };
        }
        self.reset();
        Ok(size)
    }

    // --- Config words ---

    /// Declare a config word at `addr` with its erased/default value.
    /// Only declared words accept [`Mcu::set_cfg_word`].
    pub fn define_cfg_word(&mut self, addr: u16, value: u16) {
        self.ctx.cfg_words.insert(addr, value);
    }

    pub fn set_cfg_word(&mut self, addr: u16, data: u16) -> bool {
        match self.ctx.cfg_words.get_mut(&addr) {
            Some(w) => {
                *w = data;
                true
            }
            None => false,
        }
    }

    pub fn get_cfg_word(&self, addr: u16) -> u16 {
        self.ctx.cfg_words.get(&addr).copied().unwrap_or(0xFFFF)
    }

    // --- Circuit-layer pin interface ---

    pub fn pin(&self, name: &str) -> Option<PinId> {
        self.ctx.pins.id(name)
    }

    /// What the device drives on the wire.
    pub fn pin_drive(&self, pin: PinId) -> PinDrive {
        self.ctx.pins.get(pin).drive()
    }

    pub fn pin_state(&self, pin: PinId) -> bool {
        self.ctx.pins.get(pin).inp_state()
    }

    /// External circuit drives a digital level onto the pin; edge
    /// callbacks run synchronously.
    pub fn set_pin_input(&mut self, pin: PinId, state: bool) {
        self.ctx.set_pin_ext(pin, state);
        self.drain_notifications();
    }

    /// Set the pin's analog level. Edge subscribers are notified so
    /// analog consumers (comparator) re-evaluate; digital-only modules
    /// see an unchanged logic state and ignore the callback.
    pub fn set_pin_voltage(&mut self, pin: PinId, volts: f64) {
        let p = self.ctx.pins.get_mut(pin);
        if p.voltage == volts {
            return;
        }
        p.voltage = volts;
        for m in self.ctx.pins.get(pin).callbacks.clone() {
            if let Some(module) = self.modules.get_mut(m) {
                module.pin_event(pin, &mut self.ctx);
            }
        }
        self.drain_notifications();
    }

    pub fn pin_voltage(&self, pin: PinId) -> f64 {
        self.ctx.pins.get(pin).voltage
    }

    /// Schedule a pin-state change `delay` cycles ahead (simulated
    /// propagation delay, not concurrency).
    pub fn schedule_pin(&mut self, pin: PinId, state: bool, delay: u64) {
        self.ctx.schedule(delay, EventTarget::PinState { pin, state });
    }

    pub fn pin_pullup(&self, pin: PinId) -> bool {
        self.ctx.pins.get(pin).pullup
    }

    /// Toggle the pin's pull-up from the circuit layer (an externally
    /// fitted resistor). Edge subscribers observe any input change.
    pub fn set_pin_pullup(&mut self, pin: PinId, on: bool) {
        let before = self.ctx.pins.get(pin).inp_state();
        self.ctx.pins.get_mut(pin).pullup = on;
        self.ctx.edge_check(pin, before);
        self.drain_notifications();
    }

    pub fn pin_open_col(&self, pin: PinId) -> bool {
        self.ctx.pins.get(pin).open_col
    }

    pub fn set_pin_open_col(&mut self, pin: PinId, on: bool) {
        let before = self.ctx.pins.get(pin).inp_state();
        self.ctx.pins.get_mut(pin).open_col = on;
        self.ctx.edge_check(pin, before);
        self.drain_notifications();
    }

    // --- Watchdog ---

    /// Watchdog-reset instruction executed by the CPU.
    pub fn wdr(&mut self) {
        let Some(idx) = self.wdt_index else { return };
        let cycle = self.ctx.cycle;
        if let Some(w) = self.modules[idx].as_any().downcast_mut::<Wdt>() {
            w.restart(cycle);
        }
    }

    pub fn watchdog_expired(&self) -> bool {
        self.ctx.watchdog_expired
    }

    pub fn clear_watchdog_expired(&mut self) {
        self.ctx.watchdog_expired = false;
    }

    // --- Host access to serial modules ---

    pub fn module_index(&self, name: &str) -> Option<usize> {
        self.modules.iter().position(|m| m.name() == name)
    }

    /// Bytes the named USART transmitted since last taken.
    pub fn uart_take_output(&mut self, name: &str) -> Vec<u8> {
        let Some(idx) = self.module_index(name) else { return Vec::new() };
        self.modules[idx]
            .as_any()
            .downcast_mut::<Usart>()
            .map(Usart::take_output)
            .unwrap_or_default()
    }

    /// Feed one received byte into the named USART.
    pub fn uart_feed(&mut self, name: &str, byte: u8) {
        let Some(idx) = self.module_index(name) else { return };
        let (modules, ctx) = (&mut self.modules, &mut self.ctx);
        if let Some(u) = modules[idx].as_any().downcast_mut::<Usart>() {
            u.feed(byte, ctx);
        }
        self.drain_notifications();
    }

    /// Next byte the named SPI master will clock in on MISO.
    pub fn spi_set_input(&mut self, name: &str, byte: u8) {
        let Some(idx) = self.module_index(name) else { return };
        if let Some(s) = self.modules[idx].as_any().downcast_mut::<Spi>() {
            s.set_input(byte);
        }
    }

    /// Bytes the named SPI master shifted out since last taken.
    pub fn spi_take_output(&mut self, name: &str) -> Vec<u8> {
        let Some(idx) = self.module_index(name) else { return Vec::new() };
        self.modules[idx]
            .as_any()
            .downcast_mut::<Spi>()
            .map(Spi::take_output)
            .unwrap_or_default()
    }

    // --- Lifecycle ---

    /// Power-on reset: registers to reset values, modules to power-on
    /// state, cycle counter cleared. Program memory and EEPROM persist.
    pub fn reset(&mut self) {
        self.ctx.cycle = 0;
        self.ctx.events.clear();
        self.ctx.notify.clear();
        self.ctx.reg_override = None;
        self.ctx.watchdog_expired = false;
        self.ctx.regs.reset();
        self.ctx.irqs.reset();
        for m in &mut self.modules {
            m.reset(&mut self.ctx);
        }
        self.drain_notifications();
    }

    // --- Internals ---

    fn dispatch(&mut self, phys: u16, kind: AccessKind, byte: u8) {
        // Subscriber lists are tiny; clone so handlers may subscribe pins
        // or mutate state without aliasing the table.
        let subs: Vec<Subscription> = self.watch.subs(phys, kind).to_vec();
        for s in subs {
            let v = match s.bits {
                Some(b) => b.extract(byte),
                None => byte,
            };
            match s.target {
                WatchTarget::Module(i) => {
                    if let Some(m) = self.modules.get_mut(i) {
                        m.reg_event(s.event, v, &mut self.ctx);
                    }
                }
                WatchTarget::Irq(i) => match s.event {
                    RegEvent::IrqEnable => self.ctx.irqs.set_enabled(i, v != 0),
                    RegEvent::IrqPriority => self.ctx.irqs.set_priority(i, v),
                    RegEvent::IrqMode => self.ctx.irqs.set_mode(i, v),
                    _ => {}
                },
                WatchTarget::Device => {
                    if s.event == RegEvent::IrqGlobalEnable {
                        self.ctx.irqs.set_global(v != 0);
                    }
                }
            }
        }
    }

    fn drain_notifications(&mut self) {
        while let Some(n) = self.ctx.pop_notify() {
            match n {
                Notify::Pin { module, pin } => {
                    if let Some(m) = self.modules.get_mut(module) {
                        m.pin_event(pin, &mut self.ctx);
                    }
                }
                Notify::Irq { module } => {
                    if let Some(m) = self.modules.get_mut(module) {
                        m.irq_callback(&mut self.ctx);
                    }
                }
            }
        }
    }

    // --- Save state ---

    pub fn save_state(&self) -> McuState {
        McuState {
            cycle: self.ctx.cycle,
            mem: self.ctx.regs.mem().to_vec(),
            eeprom: self.ctx.eeprom.clone(),
            cfg_words: {
                let mut v: Vec<(u16, u16)> = self.ctx.cfg_words.iter().map(|(&a, &d)| (a, d)).collect();
                v.sort();
                v
            },
            irqs: self.ctx.irqs.save(),
            global_irq: self.ctx.irqs.global_enabled(),
            pins: self.ctx.pins.save(),
            modules: self.modules.iter().map(|m| m.state()).collect(),
            events: self
                .ctx
                .events
                .iter()
                .map(|Reverse(s)| SavedEvent { due: s.due, seq: s.seq, target: s.target })
                .collect(),
            watchdog_expired: self.ctx.watchdog_expired,
        }
    }

    pub fn load_state(&mut self, st: &McuState) {
        self.ctx.cycle = st.cycle;
        let mem = self.ctx.regs.mem_mut();
        let n = mem.len().min(st.mem.len());
        mem[..n].copy_from_slice(&st.mem[..n]);
        let n = self.ctx.eeprom.len().min(st.eeprom.len());
        self.ctx.eeprom[..n].copy_from_slice(&st.eeprom[..n]);
        self.ctx.cfg_words = st.cfg_words.iter().copied().collect();
        self.ctx.irqs.restore(&st.irqs);
        self.ctx.irqs.set_global(st.global_irq);
        self.ctx.pins.restore(&st.pins);
        for (m, s) in self.modules.iter_mut().zip(&st.modules) {
            m.restore(s);
        }
        self.ctx.events.clear();
        let mut max_seq = 0;
        for e in &st.events {
            self.ctx.events.push(Reverse(Scheduled { due: e.due, seq: e.seq, target: e.target }));
            max_seq = max_seq.max(e.seq + 1);
        }
        self.ctx.seq = self.ctx.seq.max(max_seq);
        self.ctx.watchdog_expired = st.watchdog_expired;
    }

    // --- Build-time wiring (used by the builder) ---

    pub(crate) fn subscribe(&mut self, addr: u16, kind: AccessKind, sub: Subscription) {
        self.watch.subscribe(addr, kind, sub);
    }

    pub(crate) fn add_module(&mut self, m: Box<dyn McuModule>) -> usize {
        self.modules.push(m);
        self.modules.len() - 1
    }
}
