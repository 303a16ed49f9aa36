//! Save/load state round-trips and firmware loading.

use std::path::Path;

use mcusim_core::{savestate, McuBuilder};

const TINY: &str = include_str!("tiny_test.mcu");

fn build() -> mcusim_core::Mcu {
    McuBuilder::build_str(TINY, Path::new(".")).expect("descriptor builds")
}

#[test]
fn test_state_roundtrip_restores_running_timer() {
    let mut mcu = build();
    mcu.write_data(0x2E, 0x01); // timer0 at /1
    mcu.advance(100);
    assert_eq!(mcu.read_data(0x32), 100);

    let snapshot = mcu.save_state();

    mcu.advance(57);
    mcu.write_data(0x80, 9);
    assert_eq!(mcu.read_data(0x32), 157);

    mcu.load_state(&snapshot);
    assert_eq!(mcu.cycle(), 100);
    assert_eq!(mcu.read_data(0x32), 100, "mid-count timer state restored");
    assert_eq!(mcu.read_data(0x80), 0, "RAM restored");

    // The restored timer keeps counting from where it was.
    mcu.advance(56);
    assert_eq!(mcu.read_data(0x32), 156);
}

#[test]
fn test_state_roundtrip_restores_usi_counter() {
    let mut mcu = build();
    mcu.write_data(0x2C, 0x10); // three-wire
    for _ in 0..3 {
        mcu.write_data(0x2C, 0x12); // strobe
    }
    assert_eq!(mcu.read_data(0x2D) & 0x0F, 3);

    let snapshot = mcu.save_state();
    mcu.write_data(0x2C, 0x12);
    mcu.write_data(0x2C, 0x12);
    assert_eq!(mcu.read_data(0x2D) & 0x0F, 5);

    mcu.load_state(&snapshot);
    assert_eq!(mcu.read_data(0x2D) & 0x0F, 3);
    mcu.write_data(0x2C, 0x12);
    assert_eq!(mcu.read_data(0x2D) & 0x0F, 4, "counter continues from restore");
}

#[test]
fn test_state_file_roundtrip() {
    let mut mcu = build();
    mcu.write_data(0x2E, 0x01);
    mcu.advance(42);
    let state = mcu.save_state();

    let path = std::env::temp_dir().join(format!("mcusim_state_{}.mcds", std::process::id()));
    savestate::save_to_file(&state, &path).unwrap();
    let loaded = savestate::load_from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded.cycle, 42);
    assert_eq!(loaded.mem, state.mem);

    let mut mcu2 = build();
    mcu2.load_state(&loaded);
    assert_eq!(mcu2.cycle(), 42);
    assert_eq!(mcu2.read_data(0x32), 42);
}

#[test]
fn test_state_file_rejects_bad_magic() {
    let path = std::env::temp_dir().join(format!("mcusim_junk_{}.mcds", std::process::id()));
    std::fs::write(&path, b"NOPE\x01\x00\x00\x00junk").unwrap();
    assert!(savestate::load_from_file(&path).is_err());
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_load_hex_fills_program_words() {
    let mut mcu = build();
    let hex = ":100000000C9434000C944E000C944E000C944E00A4\n:00000001FF\n";
    let size = mcu.load_hex(hex).unwrap();
    assert_eq!(size, 16);
    assert_eq!(mcu.get_flash_value(0), 0x940C, "little-endian word packing");
    assert_eq!(mcu.get_flash_value(1), 0x0034);
    assert_eq!(mcu.get_flash_value(8), 0xFFFF, "untouched flash stays erased");
    assert_eq!(mcu.cycle(), 0, "load resets the device");
}

#[test]
fn test_load_hex_rejects_bad_checksum() {
    let mut mcu = build();
    let hex = ":100000000C9434000C944E000C944E000C944E00FF\n";
    assert!(mcu.load_hex(hex).is_err());
}

#[test]
fn test_eeprom_survives_reset() {
    let mut mcu = build();
    mcu.set_rom_value(3, 0x42);
    mcu.write_data(0x80, 0x99);
    mcu.reset();
    assert_eq!(mcu.get_rom_value(3), 0x42, "EEPROM is persistent storage");
    assert_eq!(mcu.read_data(0x80), 0, "RAM clears");
}

#[test]
fn test_cfg_words() {
    let mut mcu = build();
    assert_eq!(mcu.get_cfg_word(0), 0xFFFF, "unknown address reads erased");
    assert!(!mcu.set_cfg_word(0, 0x1234), "only declared words are writable");

    mcu.define_cfg_word(0x2007, 0x3FFF);
    assert_eq!(mcu.get_cfg_word(0x2007), 0x3FFF);
    assert!(mcu.set_cfg_word(0x2007, 0x2F84));
    assert_eq!(mcu.get_cfg_word(0x2007), 0x2F84);

    let state = mcu.save_state();
    let mut mcu2 = build();
    mcu2.load_state(&state);
    assert_eq!(mcu2.get_cfg_word(0x2007), 0x2F84, "config words ride the snapshot");
}
