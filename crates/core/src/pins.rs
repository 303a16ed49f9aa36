//! Pin capability boundary between peripherals and the circuit layer.
//!
//! Pins live in the device's [`PinSet`]; the external circuit addresses
//! them through copyable [`PinId`] handles. A pin combines a driven
//! output level, a direction (register-controlled, module-forced, or
//! permanently masked by the descriptor), pull-up and open-collector
//! attributes, an externally-driven input level, an analog voltage for
//! ADC/comparator sampling, and an ordered edge-callback list of module
//! indices.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque pin handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinId(pub(crate) usize);

/// What the pin presents to the external circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinDrive {
    HighZ,
    Low,
    High,
}

#[derive(Debug, Clone)]
pub struct McuPin {
    name: String,
    pub(crate) out_state: bool,
    pub(crate) out_enabled: bool,
    /// Module took direction control (USI DO in three-wire mode).
    pub(crate) forced_out: bool,
    /// Descriptor masks: permanently output / permanently input.
    pub(crate) out_mask: bool,
    pub(crate) inp_mask: bool,
    pub(crate) pullup: bool,
    pub(crate) open_col: bool,
    pub(crate) ext_driven: bool,
    pub(crate) ext_state: bool,
    pub(crate) voltage: f64,
    /// Module indices notified on input-state edges, in order.
    pub(crate) callbacks: Vec<usize>,
}

impl McuPin {
    fn new(name: String) -> Self {
        McuPin {
            name,
            out_state: false,
            out_enabled: false,
            forced_out: false,
            out_mask: false,
            inp_mask: false,
            pullup: false,
            open_col: false,
            ext_driven: false,
            ext_state: false,
            voltage: 0.0,
            callbacks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The pin is actively driven by the device.
    pub fn driving(&self) -> bool {
        (self.out_enabled || self.out_mask || self.forced_out) && !self.inp_mask
    }

    /// Logic level seen looking *into* the pin (what peripherals sample).
    pub fn inp_state(&self) -> bool {
        if self.driving() {
            if self.open_col && self.out_state {
                // Released open-collector line: external or pull-up wins.
                if self.ext_driven {
                    self.ext_state
                } else {
                    true
                }
            } else {
                self.out_state
            }
        } else if self.ext_driven {
            self.ext_state
        } else {
            self.pullup
        }
    }

    /// What the circuit layer sees on the wire.
    pub fn drive(&self) -> PinDrive {
        if !self.driving() {
            return PinDrive::HighZ;
        }
        if self.open_col {
            if self.out_state {
                PinDrive::HighZ
            } else {
                PinDrive::Low
            }
        } else if self.out_state {
            PinDrive::High
        } else {
            PinDrive::Low
        }
    }
}

pub struct PinSet {
    pins: Vec<McuPin>,
    by_name: HashMap<String, usize>,
}

impl PinSet {
    pub fn new() -> Self {
        PinSet { pins: Vec::new(), by_name: HashMap::new() }
    }

    pub fn add(&mut self, name: &str) -> PinId {
        if let Some(&i) = self.by_name.get(name) {
            return PinId(i);
        }
        let id = self.pins.len();
        self.pins.push(McuPin::new(name.to_string()));
        self.by_name.insert(name.to_string(), id);
        PinId(id)
    }

    pub fn id(&self, name: &str) -> Option<PinId> {
        self.by_name.get(name).copied().map(PinId)
    }

    pub fn get(&self, id: PinId) -> &McuPin {
        &self.pins[id.0]
    }

    pub(crate) fn get_mut(&mut self, id: PinId) -> &mut McuPin {
        &mut self.pins[id.0]
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Register a module for edge callbacks on this pin.
    pub(crate) fn set_callback(&mut self, id: PinId, module: usize, on: bool) {
        let cbs = &mut self.pins[id.0].callbacks;
        if on {
            if !cbs.contains(&module) {
                cbs.push(module);
            }
        } else {
            cbs.retain(|&m| m != module);
        }
    }

    pub(crate) fn save(&self) -> Vec<PinState> {
        self.pins
            .iter()
            .map(|p| PinState {
                out_state: p.out_state,
                out_enabled: p.out_enabled,
                forced_out: p.forced_out,
                pullup: p.pullup,
                open_col: p.open_col,
                ext_driven: p.ext_driven,
                ext_state: p.ext_state,
                voltage: p.voltage,
            })
            .collect()
    }

    pub(crate) fn restore(&mut self, saved: &[PinState]) {
        for (p, s) in self.pins.iter_mut().zip(saved) {
            p.out_state = s.out_state;
            p.out_enabled = s.out_enabled;
            p.forced_out = s.forced_out;
            p.pullup = s.pullup;
            p.open_col = s.open_col;
            p.ext_driven = s.ext_driven;
            p.ext_state = s.ext_state;
            p.voltage = s.voltage;
        }
    }
}

impl Default for PinSet {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinState {
    pub out_state: bool,
    pub out_enabled: bool,
    pub forced_out: bool,
    pub pullup: bool,
    pub open_col: bool,
    pub ext_driven: bool,
    pub ext_state: bool,
    pub voltage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_resolution() {
        let mut set = PinSet::new();
        let id = set.add("PB0");
        assert_eq!(set.get(id).drive(), PinDrive::HighZ);
        assert!(!set.get(id).inp_state(), "floating without pull-up reads low");

        set.get_mut(id).pullup = true;
        assert!(set.get(id).inp_state(), "pull-up floats high");

        set.get_mut(id).ext_driven = true;
        set.get_mut(id).ext_state = false;
        assert!(!set.get(id).inp_state(), "external driver beats pull-up");
    }

    #[test]
    fn test_open_collector() {
        let mut set = PinSet::new();
        let id = set.add("SDA");
        let p = set.get_mut(id);
        p.out_enabled = true;
        p.open_col = true;
        p.out_state = true;
        assert_eq!(set.get(id).drive(), PinDrive::HighZ, "released line");
        set.get_mut(id).out_state = false;
        assert_eq!(set.get(id).drive(), PinDrive::Low);
        assert!(!set.get(id).inp_state());
    }

    #[test]
    fn test_out_mask_forces_drive() {
        let mut set = PinSet::new();
        let id = set.add("PA0");
        set.get_mut(id).out_mask = true;
        set.get_mut(id).out_state = true;
        assert_eq!(set.get(id).drive(), PinDrive::High, "driven without direction config");
    }
}
