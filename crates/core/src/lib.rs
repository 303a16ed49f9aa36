//! # mcusim-core
//!
//! Descriptor-driven microcontroller device-model engine (v0.3).
//!
//! Builds a concrete register-address space and a set of peripheral
//! modules from a declarative hardware descriptor, dispatches register
//! reads/writes to subscribed peripheral logic with bit-level precision,
//! and manages interrupt flags, priorities and vectors — one generic
//! substrate instead of per-chip hand-written glue, rebuildable at
//! runtime for any supported chip variant (AVR, PIC14 and 8051
//! peripheral families).
//!
//! The CPU instruction decoder, the analog circuit solver and any
//! visual layer are external collaborators: the engine owns the register
//! space the CPU reads and writes, exposes the interrupt table the CPU
//! arbitrates, and meets the circuit at the pin boundary.
//!
//! ## Architecture
//!
//! - [`Mcu`] — the built device: owns register space, interrupt table,
//!   pins, program memory, EEPROM and every peripheral module
//! - [`McuBuilder`] — descriptor interpreter producing a wired [`Mcu`]
//! - [`descriptor`] — element-tree parser for the descriptor format
//! - [`dataspace`] — register storage, address remapping, write masks,
//!   symbolic register/bit name resolution
//! - [`watch`] — the dispatch bus: (address, access) → ordered handlers
//! - [`interrupts`] — vectors, priorities, enable/flag bit bindings
//! - [`pins`] — the pin capability shared with the circuit layer
//! - [`peripherals`] — timer family, USI, port, USART, ADC, comparator,
//!   TWI, SPI, watchdog, EEPROM controller
//! - [`hex`] — Intel HEX firmware loading
//! - [`savestate`] — full-device snapshots (bincode + deflate)
//!
//! ## Determinism
//!
//! Everything is single-threaded and cycle-stepped: each register access
//! finishes all subscriber dispatch before returning, subscribers run in
//! registration order, and scheduled events drain in (due, insertion)
//! order. Two runs over the same inputs observe identical state.
//!
//! ## Example
//!
//! ```no_run
//! use mcusim_core::McuBuilder;
//!
//! let mut mcu = McuBuilder::build_file(std::path::Path::new("attiny85.mcu")).unwrap();
//! mcu.write_data(0x2E, 0b0000_0001); // peripherals react synchronously
//! mcu.advance(256);
//! if let Some(irq) = mcu.pending_irq() {
//!     mcu.ack_irq(irq.id);
//! }
//! ```

pub mod builder;
pub mod dataspace;
pub mod descriptor;
pub mod error;
pub mod hex;
pub mod interrupts;
pub mod mcu;
pub mod peripherals;
pub mod pins;
pub mod savestate;
pub mod watch;

pub use builder::McuBuilder;
pub use dataspace::{DataSpace, RegBits, RegInfo, NOT_MAPPED};
pub use error::BuildError;
pub use interrupts::{IntId, Interrupt, InterruptTable, PendingIrq};
pub use mcu::{CoreFamily, CoreSpec, Mcu};
pub use pins::{PinDrive, PinId};
pub use watch::{AccessKind, RegEvent};
