//! Device save/load state.
//!
//! Captures the full device state — register space, EEPROM, interrupt
//! and pin runtime state, every module's internal state and the pending
//! scheduled events — using bincode serialization with deflate
//! compression, so an embedding simulator can snapshot and restore a
//! running device.
//!
//! ## File format
//!
//! ```text
//! +------------------+
//! | Magic "MCDS"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode payload
//! +------------------+
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::interrupts::IrqState;
use crate::mcu::EventTarget;
use crate::pins::PinState;

/// Magic bytes identifying a device state file.
const MAGIC: &[u8; 4] = b"MCDS";
/// Current save state format version.
const FORMAT_VERSION: u32 = 1;

// ─── Per-module state ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerSave {
    pub count: u32,
    pub down: bool,
    pub prescale: u32,
    pub enabled: bool,
    pub last_sync: u64,
    pub ext_prev: bool,
    pub wgm: u8,
    pub compares: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsiSave {
    pub mode: u8,
    pub clock_mode: u8,
    pub counter: u8,
    pub ext_clk: bool,
    pub usi_clk: bool,
    pub clk_edge: bool,
    pub clk_state: bool,
    pub timer_clk: bool,
    pub sda_prev: bool,
    pub held: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSave {
    pub int_mask: u8,
    pub prev_in: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsartSave {
    pub tx_en: bool,
    pub rx_en: bool,
    pub rx_fifo: Vec<u8>,
    pub busy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdcSave {
    pub channel: u8,
    pub converting: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompSave {
    pub state: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwiSave {
    pub enabled: bool,
    pub started: bool,
    pub addr_done: bool,
    pub shift: u8,
    pub own_addr: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpiSave {
    pub enabled: bool,
    pub double: bool,
    pub busy: bool,
    pub miso_in: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WdtSave {
    pub enabled: bool,
    pub int_mode: bool,
    pub timeout: u64,
    pub deadline: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EepromSave {
    pub addr_l: u8,
    pub addr_h: u8,
    pub armed_until: u64,
    pub writing: bool,
    pub pending_addr: u16,
    pub pending_val: u8,
}

/// One module's internal state, tagged by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ModuleState {
    None,
    Timer(TimerSave),
    Usi(UsiSave),
    Port(PortSave),
    Usart(UsartSave),
    Adc(AdcSave),
    Comp(CompSave),
    Twi(TwiSave),
    Spi(SpiSave),
    Wdt(WdtSave),
    Eeprom(EepromSave),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedEvent {
    pub due: u64,
    pub seq: u64,
    pub target: EventTarget,
}

// ─── Top-level device state ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McuState {
    pub cycle: u64,
    pub mem: Vec<u8>,
    pub eeprom: Vec<u8>,
    pub cfg_words: Vec<(u16, u16)>,
    pub irqs: Vec<IrqState>,
    pub global_irq: bool,
    pub pins: Vec<PinState>,
    pub modules: Vec<ModuleState>,
    pub events: Vec<SavedEvent>,
    pub watchdog_expired: bool,
}

// ─── File I/O ───────────────────────────────────────────────────────────────

/// Save device state to a file with header and deflate compression.
pub fn save_to_file(state: &McuState, path: &Path) -> Result<(), String> {
    let payload = bincode::serialize(state).map_err(|e| format!("Serialize error: {}", e))?;

    let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

    let mut out = Vec::with_capacity(8 + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&compressed);

    std::fs::write(path, &out).map_err(|e| format!("Write error: {}", e))
}

/// Load device state from a file, verifying magic and version.
pub fn load_from_file(path: &Path) -> Result<McuState, String> {
    let data = std::fs::read(path).map_err(|e| format!("Read error: {}", e))?;

    if data.len() < 8 {
        return Err("File too small".into());
    }
    if &data[0..4] != MAGIC {
        return Err("Invalid device state file (bad magic)".into());
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(format!(
            "Unsupported state version {} (expected {})",
            version, FORMAT_VERSION
        ));
    }

    let decompressed = miniz_oxide::inflate::decompress_to_vec(&data[8..])
        .map_err(|e| format!("Decompress error: {:?}", e))?;

    bincode::deserialize(&decompressed).map_err(|e| format!("Deserialize error: {}", e))
}
