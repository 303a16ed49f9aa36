//! Descriptor interpreter: wires a complete [`Mcu`] from a descriptor.
//!
//! One top-down traversal per descriptor file. Root attributes establish
//! memory sizes and the core family tag first; child elements are then
//! dispatched in document order to element-specific builders, and
//! `include` elements recurse into sibling files (relative to the
//! including descriptor's directory), merging register and interrupt
//! definitions into the same device. Stack resolution is deferred until
//! the whole element list — including later includes — has been
//! processed, because the SP register pair may be defined anywhere.
//!
//! Failure policy: an unparseable document or failing include aborts the
//! build before a device is exposed; an out-of-range block, an
//! unsupported core/peripheral combination or an unresolvable name is
//! logged and skipped while the rest of the device still builds.

use std::collections::HashMap;
use std::path::Path;

use crate::descriptor::{name_list, parse_document, parse_uint, Element};
use crate::error::BuildError;
use crate::interrupts::{IntId, Interrupt};
use crate::mcu::{CoreFamily, Mcu};
use crate::peripherals::{
    Adc, Comparator, Eeprom, Port, Spi, Timer, TimerKind, Twi, Usart, Usi, Wdt,
};
use crate::pins::PinId;
use crate::watch::{AccessKind, RegEvent, Subscription, WatchTarget};

const R_READ: AccessKind = AccessKind::Read;
const R_WRITE: AccessKind = AccessKind::Write;

pub struct McuBuilder {
    mcu: Mcu,
    family: CoreFamily,
    stack_el: Option<Element>,
    tx_reg_name: String,
    /// Output-compare interrupts per timer, for USI clock hookup.
    timer_oc_irqs: HashMap<String, Vec<IntId>>,
}

impl McuBuilder {
    /// Build a device from a descriptor file on disk.
    pub fn build_file(path: &Path) -> Result<Mcu, BuildError> {
        let mut b = McuBuilder::new();
        b.process_file(path)?;
        b.finish()
    }

    /// Build from in-memory descriptor text; `include` elements resolve
    /// against `base_dir`.
    pub fn build_str(text: &str, base_dir: &Path) -> Result<Mcu, BuildError> {
        let mut b = McuBuilder::new();
        b.process_text(text, base_dir)?;
        b.finish()
    }

    fn new() -> Self {
        McuBuilder {
            mcu: Mcu::new(),
            family: CoreFamily::Unknown,
            stack_el: None,
            tx_reg_name: String::new(),
            timer_oc_irqs: HashMap::new(),
        }
    }

    /// A partially built device is never exposed: this is the only exit.
    fn finish(mut self) -> Result<Mcu, BuildError> {
        if self.mcu.ctx.regs.size() == 0 {
            return Err(BuildError::NoDataMem);
        }
        self.mcu.core.family = self.family;
        if let Some(el) = self.stack_el.take() {
            self.create_stack(&el);
        }
        self.mcu.reset();
        Ok(self.mcu)
    }

    fn process_file(&mut self, path: &Path) -> Result<(), BuildError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BuildError::Io { path: path.to_path_buf(), source: e })?;
        let base = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        self.process_text(&text, &base)
    }

    fn process_text(&mut self, text: &str, base: &Path) -> Result<(), BuildError> {
        let root = parse_document(text)?;

        if let Some(core) = root.attr("core") {
            self.family = CoreFamily::from_tag(core);
        }
        if let Some(size) = root.attr_uint("data") {
            self.mcu.ctx.regs.resize(size as usize);
        }
        if let Some(size) = root.attr_uint("prog") {
            self.mcu.ctx.prog = vec![0xFFFF; size as usize];
        }
        if let Some(size) = root.attr_uint("eeprom") {
            if size > 0 {
                self.mcu.ctx.eeprom = vec![0xFF; size as usize];
            }
        }
        if let Some(w) = root.attr_uint("progword") {
            self.mcu.core.word_size = w as u8;
        }
        if let Some(c) = root.attr("inst_cycle") {
            if let Ok(v) = c.parse::<f64>() {
                self.mcu.core.inst_cycle = v;
            }
        }

        for el in &root.children {
            match el.tag.as_str() {
                "regblock" => self.create_registers(el),
                "datablock" => self.create_data_block(el),
                "stack" => self.stack_el = Some(el.clone()),
                "interrupts" => self.create_interrupts(el),
                "port" => self.create_port(el),
                "timer" => self.create_timer(el),
                "usart" => self.create_usart(el),
                "adc" => self.create_adc(el),
                "acomp" => self.create_acomp(el),
                "twi" => self.create_twi(el),
                "spi" => self.create_spi(el),
                "wdt" => self.create_wdt(el),
                "eeprom" => self.create_eeprom(el),
                "usi" => self.create_usi(el),
                "include" => {
                    let file = el.attr("file").unwrap_or_default().to_string();
                    let path = base.join(&file);
                    self.process_file(&path)
                        .map_err(|e| BuildError::Include { file, source: Box::new(e) })?;
                }
                other => log::warn!("unknown element <{other}> ignored"),
            }
        }
        Ok(())
    }

    // --- Register space ---

    fn create_registers(&mut self, e: &Element) {
        let end = e.attr_uint("end").unwrap_or(0);
        let offset = e.attr_uint("offset").unwrap_or(0) as u16;
        if end as usize >= self.mcu.ctx.regs.size() {
            log::warn!(
                "regblock end {:#x} outside data memory ({:#x}), block skipped",
                end,
                self.mcu.ctx.regs.size()
            );
            return;
        }
        self.get_registers(e, offset);
    }

    fn get_registers(&mut self, e: &Element, offset: u16) {
        let streg = e.attr("streg").unwrap_or_default().to_string();

        for el in &e.children {
            if el.tag == "register" {
                let Some(name) = el.attr("name") else { continue };
                let Some(addr) = el.attr_uint("addr") else {
                    log::warn!("register {name} has no address, skipped");
                    continue;
                };
                let addr = addr as u16 + offset;
                let reset = el.attr_uint("reset").unwrap_or(0) as u8;
                let mask = el.attr_mask("mask");
                self.mcu.ctx.regs.define_reg(name, addr, reset, mask);

                if let Some(bits) = el.attr("bits") {
                    let bit_list: Vec<String> =
                        bits.split(',').map(|s| s.trim().to_string()).collect();
                    for (i, bit_name) in bit_list.iter().enumerate() {
                        if bit_name == "0" || bit_name.is_empty() {
                            continue;
                        }
                        // Bit name variations: aliases across chip
                        // revisions all resolve to the same bit.
                        for alias in bit_name.split('|') {
                            self.mcu.ctx.regs.define_bit(alias, addr, i as u8);
                        }
                    }
                    if !streg.is_empty() && name == streg {
                        self.mcu.ctx.regs.set_status_reg(addr, bit_list);
                    }
                }
            } else if el.tag == "mapped" {
                let (Some(addr), Some(mapto)) = (el.attr_uint("addr"), el.attr_uint("mapto"))
                else {
                    continue;
                };
                self.mcu.ctx.regs.map_to(addr as u16 + offset, mapto as u16);
            }
        }
    }

    fn create_data_block(&mut self, d: &Element) {
        let start = d.attr_uint("start").unwrap_or(0);
        let end = d.attr_uint("end").unwrap_or(0);
        if end as usize >= self.mcu.ctx.regs.size() || end < start {
            log::warn!(
                "datablock {:#x}..{:#x} outside data memory ({:#x}), block skipped",
                start,
                end,
                self.mcu.ctx.regs.size()
            );
            return;
        }
        let mut map_to = d.attr_uint("mapto").unwrap_or(start) as u16;
        for a in start..=end {
            self.mcu.ctx.regs.map_to(a as u16, map_to);
            map_to = map_to.wrapping_add(1);
        }
        self.get_registers(d, 0);
    }

    // --- Interrupts ---

    fn create_interrupts(&mut self, i: &Element) {
        if let Some(enable) = i.attr("enable") {
            self.watch_bit_names(enable, R_WRITE, WatchTarget::Device, RegEvent::IrqGlobalEnable);
        }
        for el in &i.children {
            if el.tag == "interrupt" {
                self.create_interrupt(el);
            }
        }
    }

    fn create_interrupt(&mut self, el: &Element) {
        let Some(name) = el.attr("name") else { return };
        let vector = el.attr_uint("vector").unwrap_or(0) as u16;

        let flag = el.attr("flag").and_then(|f| {
            let hit = self.mcu.ctx.regs.bit(f);
            if hit.is_none() {
                log::warn!("interrupt {name}: flag bit {f} unresolved, flag inert");
            }
            hit
        });

        let mut int = Interrupt::new(name, vector).with_flag(flag);

        let mut prio_bits: Option<&str> = None;
        if let Some(p) = el.attr("priority") {
            match parse_uint(p) {
                Some(v) => int = int.with_priority(v as u8),
                None => prio_bits = Some(p),
            }
        }

        let Some(id) = self.mcu.ctx.irqs.add(int) else { return };
        let target = WatchTarget::Irq(id.0);

        if let Some(enable) = el.attr("enable") {
            self.watch_bit_names(enable, R_WRITE, target, RegEvent::IrqEnable);
        }
        if let Some(p) = prio_bits {
            // Priority bound to a configurable bit group: runtime-changeable.
            self.watch_bit_names(p, R_WRITE, target, RegEvent::IrqPriority);
        }
        if let Some(mode) = el.attr("mode") {
            self.watch_bit_names(mode, R_WRITE, target, RegEvent::IrqMode);
        }
    }

    /// Resolve a peripheral's child `interrupt` element by name lookup.
    /// A missing name yields an inert handle, never an error.
    fn lookup_interrupt(&self, el: &Element) -> Option<IntId> {
        let name = el.attr("name")?;
        let id = self.mcu.ctx.irqs.id(name);
        if id.is_none() {
            log::warn!("interrupt {name} not declared, binding inert");
        }
        id
    }

    // --- Ports ---

    fn create_port(&mut self, p: &Element) {
        let Some(name) = p.attr("name") else { return };
        let num_pins = p.attr_uint("pins").unwrap_or(8).min(8) as usize;
        let idx = self.mcu.modules.len();

        let mut port = Port::new(name);
        port.dyn_pullups = self.family == CoreFamily::Avr;

        for i in 0..num_pins {
            let pid = self.mcu.ctx.pins.add(&format!("{name}{i}"));
            self.mcu.ctx.pins.set_callback(pid, idx, true);
            port.pins.push(pid);
        }

        if let Some(out) = p.attr("outreg") {
            self.watch_reg_names(out, R_WRITE, WatchTarget::Module(idx), RegEvent::PortOut);
        }
        if let Some(inreg) = p.attr("inreg") {
            port.in_addr = self.reg_addr_or_warn(inreg);
        }
        if let Some(dirreg) = p.attr("dirreg") {
            let (inv, reg) = match dirreg.strip_prefix('!') {
                Some(r) => (true, r),
                None => (false, dirreg),
            };
            port.dir_inv = inv;
            self.watch_reg_names(reg, R_WRITE, WatchTarget::Module(idx), RegEvent::PortDir);
        }

        if let Some(mask) = p.attr_mask("outmask") {
            for (i, &pid) in port.pins.iter().enumerate() {
                self.mcu.ctx.pins.get_mut(pid).out_mask = mask & (1 << i) != 0;
            }
        }
        if let Some(mask) = p.attr_mask("inpmask") {
            for (i, &pid) in port.pins.iter().enumerate() {
                self.mcu.ctx.pins.get_mut(pid).inp_mask = mask & (1 << i) != 0;
            }
        }
        if let Some(mask) = p.attr_mask("pullups") {
            for (i, &pid) in port.pins.iter().enumerate() {
                self.mcu.ctx.pins.get_mut(pid).pullup = mask & (1 << i) != 0;
            }
        }
        if let Some(mask) = p.attr_mask("opencol") {
            for (i, &pid) in port.pins.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    self.mcu.ctx.pins.get_mut(pid).open_col = true;
                }
            }
        }

        for el in &p.children {
            if el.tag == "interrupt" {
                port.irq = self.lookup_interrupt(el); // pin change interrupt
                if let Some(mask_reg) = el.attr("mask") {
                    self.watch_reg_names(
                        mask_reg,
                        R_WRITE,
                        WatchTarget::Module(idx),
                        RegEvent::PortIntMask,
                    );
                }
            }
        }

        self.mcu.add_module(Box::new(port));
    }

    // --- Timers ---

    fn create_timer(&mut self, t: &Element) {
        let Some(name) = t.attr("name") else { return };
        let ty = t.attr("type").unwrap_or("");

        let kind = match self.family {
            CoreFamily::Avr => {
                if ty.starts_with("16") {
                    TimerKind::Avr16
                } else {
                    TimerKind::Avr8
                }
            }
            CoreFamily::Pic14 | CoreFamily::I51 => TimerKind::Generic,
            CoreFamily::Unknown => {
                log::warn!("timer {name}: unsupported core family, skipped");
                return;
            }
        };
        let idx = self.mcu.modules.len();
        let mut timer = Timer::new(name, kind);
        let target = WatchTarget::Module(idx);

        if let Some(counter) = t.attr("counter") {
            let (low, high) = split_pair(counter);
            if let Some(low) = low {
                timer.count_l = self.reg_addr_or_warn(low);
                self.watch_reg_names(low, R_WRITE, target, RegEvent::CountWriteL);
                self.watch_reg_names(low, R_READ, target, RegEvent::CountRead);
            }
            if let Some(high) = high {
                timer.count_h = self.reg_addr_or_warn(high);
                self.watch_reg_names(high, R_WRITE, target, RegEvent::CountWriteH);
                self.watch_reg_names(high, R_READ, target, RegEvent::CountRead);
            }
        }
        if let Some(enable) = t.attr("enable") {
            timer.default_enabled = false;
            self.watch_bit_names(enable, R_WRITE, target, RegEvent::ModuleEnable);
        }
        self.set_config_regs(t, target);

        // Waveform-mode bits resolve by conventional name with the timer
        // number suffix, as the peripheral family defines them.
        if kind != TimerKind::Generic {
            let n: String = name.chars().filter(|c| c.is_ascii_digit()).collect();
            timer.wgm_lo = self.mcu.ctx.regs.reg_bits(&format!("WGM{n}0,WGM{n}1"));
            timer.wgm_hi = match kind {
                TimerKind::Avr16 => self.mcu.ctx.regs.reg_bits(&format!("WGM{n}2,WGM{n}3")),
                _ => self.mcu.ctx.regs.reg_bits(&format!("WGM{n}2")),
            };
        }

        for el in &t.children {
            match el.tag.as_str() {
                "interrupt" => timer.irq = self.lookup_interrupt(el),
                "prescaler" => {
                    if let Some(sel) = el.attr("select") {
                        timer.presc_sel = self.mcu.ctx.regs.reg_bits(sel);
                        if timer.presc_sel.is_none() {
                            log::warn!("timer {name}: prescaler select \"{sel}\" unresolved");
                        }
                    }
                    timer.presc_list = value_list(el.attr("values").unwrap_or_default());
                }
                "extclock" => {
                    if let Some(pin) = el.attr("pin").and_then(|p| self.pin_or_warn(p)) {
                        timer.ext_pin = Some(pin);
                        self.mcu.ctx.pins.set_callback(pin, idx, true);
                    }
                }
                "ocunit" => {
                    let oc_name = el.attr("name").unwrap_or("OC");
                    let pin = el.attr("pin").and_then(|p| self.pin_or_warn(p));
                    let com = el.attr("configbits").and_then(|b| {
                        let rb = self.mcu.ctx.regs.reg_bits(b);
                        if rb.is_none() {
                            log::warn!("ocunit {oc_name}: configbits \"{b}\" unresolved");
                        }
                        rb
                    });
                    let unit = timer.add_oc(pin, com);

                    if let Some(ocreg) = el.attr("ocreg") {
                        let (low, high) = split_pair(ocreg);
                        if let Some(low) = low {
                            self.watch_reg_names(
                                low,
                                R_WRITE,
                                target,
                                RegEvent::OcrWrite { unit: unit as u8, high: false },
                            );
                        }
                        if let Some(high) = high {
                            self.watch_reg_names(
                                high,
                                R_WRITE,
                                target,
                                RegEvent::OcrWrite { unit: unit as u8, high: true },
                            );
                        }
                    }
                    for el1 in &el.children {
                        if el1.tag == "interrupt" {
                            let irq = self.lookup_interrupt(el1);
                            timer.set_oc_irq(unit, irq);
                        }
                    }
                }
                _ => {}
            }
        }

        let oc_irqs: Vec<IntId> =
            (0..8).filter_map(|u| timer.oc_irq(u)).collect();
        self.timer_oc_irqs.insert(name.to_string(), oc_irqs);

        self.mcu.add_module(Box::new(timer));
    }

    // --- USART ---

    fn create_usart(&mut self, u: &Element) {
        let Some(name) = u.attr("name") else { return };
        if self.family == CoreFamily::Unknown {
            log::warn!("usart {name}: unsupported core family, skipped");
            return;
        }
        let number = u.attr_uint("number").unwrap_or(0) as u8;
        let idx = self.mcu.modules.len();
        let mut usart = Usart::new(name, idx, number);
        let target = WatchTarget::Module(idx);

        self.set_config_regs(u, target);

        for el in &u.children {
            match el.tag.as_str() {
                "trunit" => {
                    let ty = el.attr("type").unwrap_or_default();
                    match ty {
                        "tx" => {
                            if let Some(reg) = el.attr("register") {
                                self.tx_reg_name = reg.to_string();
                                self.watch_reg_names(reg, R_WRITE, target, RegEvent::UartTx);
                            }
                            usart.tx_pin = el.attr("pin").and_then(|p| self.pin_or_warn(p));
                            if let Some(enable) = el.attr("enable") {
                                self.watch_bit_names(
                                    enable,
                                    R_WRITE,
                                    target,
                                    RegEvent::UartEnable { rx: false },
                                );
                            }
                            for el1 in &el.children {
                                if el1.tag == "interrupt" {
                                    usart.tx_irq = self.lookup_interrupt(el1);
                                }
                            }
                        }
                        "rx" => {
                            // Tx and rx may share one register address.
                            let reg = el
                                .attr("register")
                                .map(str::to_string)
                                .unwrap_or_else(|| self.tx_reg_name.clone());
                            usart.rx_reg = self.reg_addr_or_warn(&reg);
                            self.watch_reg_names(&reg, R_READ, target, RegEvent::UartRxRead);
                            if let Some(enable) = el.attr("enable") {
                                self.watch_bit_names(
                                    enable,
                                    R_WRITE,
                                    target,
                                    RegEvent::UartEnable { rx: true },
                                );
                            }
                            for el1 in &el.children {
                                if el1.tag == "interrupt" {
                                    usart.rx_irq = self.lookup_interrupt(el1);
                                }
                            }
                        }
                        _ => {}
                    }
                }
                "interrupt" => {
                    // Module-level interrupt: transmit-complete unless the
                    // tx unit declared its own.
                    if usart.tx_irq.is_none() {
                        usart.tx_irq = self.lookup_interrupt(el);
                    }
                }
                _ => {}
            }
        }

        self.mcu.add_module(Box::new(usart));
    }

    // --- ADC ---

    fn create_adc(&mut self, e: &Element) {
        let Some(name) = e.attr("name") else { return };
        if self.family != CoreFamily::Avr {
            log::warn!("adc {name}: unsupported core family, skipped");
            return;
        }
        let idx = self.mcu.modules.len();
        let mut adc = Adc::new(name, idx);
        let target = WatchTarget::Module(idx);

        self.set_config_regs(e, target);

        if let Some(bits) = e.attr_uint("bits") {
            adc.max_value = (1u32 << bits.min(16)) - 1;
        }
        if let Some(dataregs) = e.attr("dataregs") {
            let (low, high) = split_pair(dataregs);
            adc.data_l = low.and_then(|r| self.reg_addr_or_warn(r));
            adc.data_h = high.and_then(|r| self.reg_addr_or_warn(r));
        }
        if let Some(mux) = e.attr("multiplex") {
            self.watch_reg_names(mux, R_WRITE, target, RegEvent::AdcMux);
        }
        adc.bits_en = self.mcu.ctx.regs.reg_bits("ADEN");
        adc.bits_start = self.mcu.ctx.regs.reg_bits("ADSC");

        for el in &e.children {
            match el.tag.as_str() {
                "interrupt" => adc.irq = self.lookup_interrupt(el),
                "prescaler" => {
                    if let Some(sel) = el.attr("select") {
                        adc.presc_sel = self.mcu.ctx.regs.reg_bits(sel);
                    }
                    adc.presc_list = value_list(el.attr("values").unwrap_or_default());
                }
                "inputs" => {
                    if el.attr("type") == Some("PIN") {
                        for pin_name in name_list(el.attr("source").unwrap_or_default()) {
                            if let Some(pin) = self.pin_or_warn(pin_name) {
                                adc.pins.push(pin);
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        self.mcu.add_module(Box::new(adc));
    }

    // --- Analog comparator ---

    fn create_acomp(&mut self, e: &Element) {
        let Some(name) = e.attr("name") else { return };
        if self.family != CoreFamily::Avr {
            log::warn!("acomp {name}: unsupported core family, skipped");
            return;
        }
        let idx = self.mcu.modules.len();
        let mut comp = Comparator::new(name);
        let target = WatchTarget::Module(idx);

        self.set_config_regs(e, target);
        comp.bit_out = self.mcu.ctx.regs.bit("ACO");
        comp.bits_disable = self.mcu.ctx.regs.reg_bits("ACD");
        comp.bits_sense = self.mcu.ctx.regs.reg_bits("ACIS0,ACIS1");

        for el in &e.children {
            match el.tag.as_str() {
                "interrupt" => comp.irq = self.lookup_interrupt(el),
                "inputpin" => {
                    if let Some(pin) = el.attr("pin").and_then(|p| self.pin_or_warn(p)) {
                        self.mcu.ctx.pins.set_callback(pin, idx, true);
                        match el.attr("name") {
                            Some("positive") => comp.pin_p = Some(pin),
                            Some("negative") => comp.pin_n = Some(pin),
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }

        self.mcu.add_module(Box::new(comp));
    }

    // --- TWI ---

    fn create_twi(&mut self, e: &Element) {
        let Some(name) = e.attr("name") else { return };
        if self.family != CoreFamily::Avr {
            log::warn!("twi {name}: unsupported core family, skipped");
            return;
        }
        let idx = self.mcu.modules.len();
        let mut twi = Twi::new(name, idx);
        let target = WatchTarget::Module(idx);

        self.set_config_regs(e, target);
        if let Some(datareg) = e.attr("dataregs") {
            self.watch_reg_names(datareg, R_WRITE, target, RegEvent::TwiData);
        }
        if let Some(addrreg) = e.attr("addressreg") {
            self.watch_reg_names(addrreg, R_WRITE, target, RegEvent::TwiAddr);
        }
        if let Some(statreg) = e.attr("statusreg") {
            twi.status_reg = self.reg_addr_or_warn(statreg);
            self.watch_reg_names(statreg, R_WRITE, target, RegEvent::TwiStatus);
        }
        twi.bits_en = self.mcu.ctx.regs.reg_bits("TWEN");
        twi.bits_flag = self.mcu.ctx.regs.reg_bits("TWINT");
        twi.bits_start = self.mcu.ctx.regs.reg_bits("TWSTA");
        twi.bits_stop = self.mcu.ctx.regs.reg_bits("TWSTO");

        for el in &e.children {
            match el.tag.as_str() {
                "interrupt" => twi.irq = self.lookup_interrupt(el),
                "prescaler" => {
                    if let Some(sel) = el.attr("select") {
                        twi.presc_sel = self.mcu.ctx.regs.reg_bits(sel);
                    }
                    twi.presc_list = value_list(el.attr("values").unwrap_or_default());
                }
                "inputpin" => {
                    if let Some(pin) = el.attr("pin").and_then(|p| self.pin_or_warn(p)) {
                        if el.attr("name") == Some("sda") {
                            twi.sda = Some(pin);
                        }
                    }
                }
                _ => {}
            }
        }

        self.mcu.add_module(Box::new(twi));
    }

    // --- SPI ---

    fn create_spi(&mut self, e: &Element) {
        let Some(name) = e.attr("name") else { return };
        if self.family != CoreFamily::Avr {
            log::warn!("spi {name}: unsupported core family, skipped");
            return;
        }
        let idx = self.mcu.modules.len();
        let mut spi = Spi::new(name, idx);
        let target = WatchTarget::Module(idx);

        self.set_config_regs(e, target);
        if let Some(datareg) = e.attr("dataregs") {
            spi.data_reg = self.reg_addr_or_warn(datareg);
            self.watch_reg_names(datareg, R_WRITE, target, RegEvent::SpiData);
        }
        if let Some(statreg) = e.attr("statusreg") {
            self.watch_reg_names(statreg, R_WRITE, target, RegEvent::SpiStatus);
        }
        spi.bits_en = self.mcu.ctx.regs.reg_bits("SPE");
        spi.bits_2x = self.mcu.ctx.regs.reg_bits("SPI2X");

        for el in &e.children {
            match el.tag.as_str() {
                "interrupt" => spi.irq = self.lookup_interrupt(el),
                "prescaler" => {
                    if let Some(sel) = el.attr("select") {
                        spi.presc_sel = self.mcu.ctx.regs.reg_bits(sel);
                    }
                    spi.presc_list = value_list(el.attr("values").unwrap_or_default());
                }
                "inputpin" => {} // byte-level model: bus pins carry no data
                _ => {}
            }
        }

        self.mcu.add_module(Box::new(spi));
    }

    // --- Watchdog ---

    fn create_wdt(&mut self, e: &Element) {
        let Some(name) = e.attr("name") else { return };
        if self.family != CoreFamily::Avr {
            log::warn!("wdt {name}: unsupported core family, skipped");
            return;
        }
        let idx = self.mcu.modules.len();
        let mut wdt = Wdt::new(name);
        let target = WatchTarget::Module(idx);

        self.set_config_regs(e, target);
        wdt.bits_en = self.mcu.ctx.regs.reg_bits("WDE");
        wdt.bits_int = self.mcu.ctx.regs.reg_bits("WDIE");

        for el in &e.children {
            match el.tag.as_str() {
                "interrupt" => wdt.irq = self.lookup_interrupt(el),
                "prescaler" => {
                    if let Some(sel) = el.attr("select") {
                        wdt.presc_sel = self.mcu.ctx.regs.reg_bits(sel);
                    }
                    wdt.presc_list = value_list(el.attr("values").unwrap_or_default());
                }
                _ => {}
            }
        }

        self.mcu.wdt_index = Some(idx);
        self.mcu.add_module(Box::new(wdt));
    }

    // --- EEPROM controller ---

    fn create_eeprom(&mut self, e: &Element) {
        let Some(name) = e.attr("name") else { return };
        if self.family != CoreFamily::Avr {
            log::warn!("eeprom {name}: unsupported core family, skipped");
            return;
        }
        let idx = self.mcu.modules.len();
        let mut eeprom = Eeprom::new(name, idx);
        let target = WatchTarget::Module(idx);

        self.set_config_regs(e, target);
        if let Some(datareg) = e.attr("dataregs") {
            eeprom.data_reg = self.reg_addr_or_warn(datareg);
        }
        if let Some(addrreg) = e.attr("addressreg") {
            let (low, high) = split_pair(addrreg);
            if let Some(low) = low {
                self.watch_reg_names(low, R_WRITE, target, RegEvent::RomAddrL);
            }
            if let Some(high) = high {
                self.watch_reg_names(high, R_WRITE, target, RegEvent::RomAddrH);
            }
        }
        eeprom.bits_read = self.mcu.ctx.regs.reg_bits("EERE");
        eeprom.bits_write = self.mcu.ctx.regs.reg_bits("EEPE");
        eeprom.bits_master = self.mcu.ctx.regs.reg_bits("EEMPE");

        for el in &e.children {
            if el.tag == "interrupt" {
                eeprom.irq = self.lookup_interrupt(el);
            }
        }

        self.mcu.add_module(Box::new(eeprom));
    }

    // --- USI ---

    fn create_usi(&mut self, e: &Element) {
        let Some(name) = e.attr("name") else { return };
        if self.family != CoreFamily::Avr {
            log::warn!("usi {name}: unsupported core family, skipped");
            return;
        }
        let idx = self.mcu.modules.len();
        let mut usi = Usi::new(name, idx);
        let target = WatchTarget::Module(idx);

        self.set_config_regs(e, target);
        if let Some(datareg) = e.attr("dataregs") {
            usi.data_reg = self.reg_addr_or_warn(datareg);
        }
        if let Some(bufreg) = e.attr("bufferreg") {
            usi.buffer_reg = self.reg_addr_or_warn(bufreg);
        }
        if let Some(statreg) = e.attr("statusreg") {
            usi.status_reg = self.reg_addr_or_warn(statreg);
        }

        let regs = &self.mcu.ctx.regs;
        usi.bits_tc = regs.reg_bits("USITC");
        usi.bits_clk = regs.reg_bits("USICLK");
        usi.bits_cs = regs.reg_bits("USICS0,USICS1");
        usi.bits_wm = regs.reg_bits("USIWM0,USIWM1");
        usi.bits_cnt = regs.reg_bits("USICNT0,USICNT1,USICNT2,USICNT3");
        usi.flag_start = regs.bit("USISIF");
        usi.flag_stop = regs.bit("USIPF");

        // Timer0 compare matches are one of the USI clock sources.
        usi.timer_irqs = self.timer_oc_irqs.get("TIMER0").cloned().unwrap_or_default();

        for el in &e.children {
            match el.tag.as_str() {
                "interrupt" => usi.irq = self.lookup_interrupt(el),
                "inputpin" => {
                    if let Some(pin) = el.attr("pin").and_then(|p| self.pin_or_warn(p)) {
                        match el.attr("name") {
                            Some("do") => usi.do_pin = Some(pin),
                            Some("di") => usi.di_pin = Some(pin),
                            Some("ck") => usi.ck_pin = Some(pin),
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }

        self.mcu.add_module(Box::new(usi));
    }

    // --- Core / stack ---

    fn create_stack(&mut self, s: &Element) {
        if let Some(spreg) = s.attr("spreg") {
            let (low, high) = split_pair(spreg);
            self.mcu.core.spl = low.and_then(|r| self.reg_addr_or_warn(r));
            self.mcu.core.sph = high.and_then(|r| self.reg_addr_or_warn(r));
        }
        let inc = s.attr("increment").unwrap_or_default();
        self.mcu.core.sp_pre = inc.contains("pre");
        self.mcu.core.sp_inc = if inc.contains("inc") { 1 } else { -1 };
    }

    // --- Wiring helpers ---

    /// Watch a comma-separated register-name list; unresolved names are
    /// logged and omitted.
    fn watch_reg_names(
        &mut self,
        list: &str,
        kind: AccessKind,
        target: WatchTarget,
        event: RegEvent,
    ) {
        for name in name_list(list) {
            match self.mcu.ctx.regs.reg_addr(name) {
                Some(addr) => {
                    self.mcu.subscribe(addr, kind, Subscription { target, event, bits: None })
                }
                None => log::warn!("register {name} not defined, {event:?} binding omitted"),
            }
        }
    }

    /// Watch a bit-name list as one group; the handler receives the
    /// extracted sub-value.
    fn watch_bit_names(
        &mut self,
        names: &str,
        kind: AccessKind,
        target: WatchTarget,
        event: RegEvent,
    ) {
        match self.mcu.ctx.regs.reg_bits(names) {
            Some(rb) => {
                self.mcu.subscribe(rb.addr, kind, Subscription { target, event, bits: Some(rb) });
            }
            None => log::warn!("bit group \"{names}\" unresolved, {event:?} binding omitted"),
        }
    }

    /// Wire the generic configure handlers declared on any peripheral.
    fn set_config_regs(&mut self, u: &Element, target: WatchTarget) {
        if let Some(regs) = u.attr("configregsA") {
            self.watch_reg_names(regs, R_WRITE, target, RegEvent::ConfigA);
        }
        if let Some(regs) = u.attr("configregsB") {
            self.watch_reg_names(regs, R_WRITE, target, RegEvent::ConfigB);
        }
        if let Some(bits) = u.attr("configbitsA") {
            self.watch_bit_names(bits, R_WRITE, target, RegEvent::ConfigA);
        }
        if let Some(bits) = u.attr("configbitsB") {
            self.watch_bit_names(bits, R_WRITE, target, RegEvent::ConfigB);
        }
    }

    fn reg_addr_or_warn(&self, name: &str) -> Option<u16> {
        let addr = self.mcu.ctx.regs.reg_addr(name);
        if addr.is_none() {
            log::warn!("register {name} not defined, binding omitted");
        }
        addr
    }

    fn pin_or_warn(&self, name: &str) -> Option<PinId> {
        let pin = self.mcu.ctx.pins.id(name);
        if pin.is_none() {
            log::warn!("pin {name} not defined, binding omitted");
        }
        pin
    }
}

/// Split `"REG"` or `"LOW,HIGH"` into its register names.
fn split_pair(s: &str) -> (Option<&str>, Option<&str>) {
    let mut parts = s.split(',').map(str::trim).filter(|p| !p.is_empty());
    (parts.next(), parts.next())
}

/// Parse a comma-separated prescaler value list.
fn value_list(s: &str) -> Vec<u32> {
    name_list(s)
        .into_iter()
        .filter_map(|v| {
            let parsed = parse_uint(v);
            if parsed.is_none() {
                log::warn!("value \"{v}\" not numeric, dropped from list");
            }
            parsed
        })
        .collect()
}
