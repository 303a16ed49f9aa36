//! End-to-end descriptor scenarios: register masks, address remapping,
//! port masks, interrupt priorities, include composition and the
//! degraded-build policy.

use std::path::Path;

use mcusim_core::{BuildError, CoreFamily, McuBuilder};

const TINY: &str = include_str!("tiny_test.mcu");

fn build() -> mcusim_core::Mcu {
    McuBuilder::build_str(TINY, Path::new(".")).expect("descriptor builds")
}

#[test]
fn test_root_attributes() {
    let mcu = build();
    assert_eq!(mcu.core.family, CoreFamily::Avr);
    assert_eq!(mcu.core.word_size, 2);
    assert_eq!(mcu.flash_size(), 0x400);
    assert_eq!(mcu.rom_size(), 64);
    assert_eq!(mcu.regs().size(), 0x100);
}

#[test]
fn test_stack_binding_resolved_after_elements() {
    let mut mcu = build();
    // SP registers are defined inside the regblock; the stack element
    // still resolved even though its registers appear later in the file.
    assert_eq!(mcu.core.spl, Some(0x5D));
    assert_eq!(mcu.core.sph, Some(0x5E));
    assert!(!mcu.core.sp_pre);
    assert_eq!(mcu.core.sp_inc, -1);
    mcu.write_data(0x5D, 0xFF);
    mcu.write_data(0x5E, 0x02);
    assert_eq!(mcu.stack_pointer(), 0x02FF);
}

#[test]
fn test_write_mask_preserves_unwritable_bits() {
    let mut mcu = build();
    // MASKED: reset 0xA0, write mask 0x0F.
    assert_eq!(mcu.read_data(0x3C), 0xA0);
    mcu.write_data(0x3C, 0xFF);
    assert_eq!(mcu.read_data(0x3C), 0xAF);
    mcu.write_data(0x3C, 0x00);
    assert_eq!(mcu.read_data(0x3C), 0xA0);
}

#[test]
fn test_unmapped_address_is_inert() {
    let mut mcu = build();
    // 0x00..0x1F is outside every block: no storage, no dispatch, no panic.
    mcu.write_data(0x10, 0xFF);
    assert_eq!(mcu.read_data(0x10), 0);
}

#[test]
fn test_register_mirror_dispatches() {
    let mut mcu = build();
    // 0x20 is mapped onto PORTB (0x38): writing the mirror drives pins.
    mcu.write_data(0x37, 0xFF); // DDRB all output
    mcu.write_data(0x20, 0x55);
    assert_eq!(mcu.read_data(0x38), 0x55);
    let pb0 = mcu.pin("PORTB0").unwrap();
    assert_eq!(mcu.pin_drive(pb0), mcusim_core::PinDrive::High);
}

#[test]
fn test_ram_datablock() {
    let mut mcu = build();
    mcu.write_data(0x80, 0x5A);
    assert_eq!(mcu.read_data(0x80), 0x5A);
}

#[test]
fn test_scenario_timer_config_and_bit_resolver() {
    let mut mcu = build();
    // Writing CS00=1 to TCCR0 reaches the timer's configure handler:
    // the timer starts counting with prescaler 1.
    mcu.write_data(0x2E, 0b0000_0001);

    let (addr, mask) = mcu.regs().bit("CS00").expect("CS00 resolves");
    assert_eq!((addr, mask), (0x2E, 0x01));
    assert_ne!(mcu.read_raw(0x2E) & mask, 0, "CS00 reads true");

    let ovf = mcu.interrupt("TIMER0_OVF").unwrap();
    mcu.advance(255);
    assert!(!mcu.irqs().is_flagged(ovf, mcu.regs()));
    mcu.advance(1);
    assert!(mcu.irqs().is_flagged(ovf, mcu.regs()), "overflow after 256 ticks");
}

#[test]
fn test_scenario_outmask_pin_permanently_driven() {
    let mut mcu = build();
    // PORTA outmask bit 0: driven even though DDRA is never configured.
    let pa0 = mcu.pin("PORTA0").unwrap();
    assert_eq!(mcu.pin_drive(pa0), mcusim_core::PinDrive::Low);
    mcu.write_data(0x3B, 0x01);
    assert_eq!(mcu.pin_drive(pa0), mcusim_core::PinDrive::High);
}

#[test]
fn test_permanent_pullup_reads_high() {
    let mut mcu = build();
    // PORTA pullups bit 1: input pin floats high in the in-register.
    assert_eq!(mcu.read_data(0x39) & 0x02, 0x02);
}

#[test]
fn test_scenario_priority_fixed_and_bound() {
    let mut mcu = build();
    let fixed = mcu.interrupt("FIXED_PRIO").unwrap();
    assert_eq!(mcu.irqs().priority(fixed), 2);

    // PRIO_TEST priority is bound to the PRIO0,PRIO1 bit group: it
    // changes when those bits are written.
    let bound = mcu.interrupt("PRIO_TEST").unwrap();
    assert_eq!(mcu.irqs().priority(bound), 0);
    mcu.write_data(0x3D, 0b10);
    assert_eq!(mcu.irqs().priority(bound), 2);
    mcu.write_data(0x3D, 0b01);
    assert_eq!(mcu.irqs().priority(bound), 1);
}

#[test]
fn test_circuit_layer_toggles_pin_attributes() {
    let mut mcu = build();
    // An externally fitted pull-up on an undriven pin reads high, and
    // the port's in register follows through the edge callback.
    let pb5 = mcu.pin("PORTB5").unwrap();
    assert!(!mcu.pin_pullup(pb5));
    mcu.set_pin_pullup(pb5, true);
    assert!(mcu.pin_pullup(pb5));
    assert_eq!(mcu.read_data(0x36) & 0x20, 0x20);
    mcu.set_pin_pullup(pb5, false);
    assert_eq!(mcu.read_data(0x36) & 0x20, 0);

    // Open collector: a driven-high line releases instead of sourcing.
    mcu.write_data(0x37, 0x20); // DDRB bit 5
    mcu.write_data(0x38, 0x20);
    assert_eq!(mcu.pin_drive(pb5), mcusim_core::PinDrive::High);
    mcu.set_pin_open_col(pb5, true);
    assert!(mcu.pin_open_col(pb5));
    assert_eq!(mcu.pin_drive(pb5), mcusim_core::PinDrive::HighZ);
}

#[test]
fn test_pin_change_interrupt_masked() {
    let mut mcu = build();
    let pcint = mcu.interrupt("PCINT0").unwrap();
    mcu.write_data(0x34, 0x01); // PCMSK: only pin 0 admitted
    mcu.write_data(0x5B, 0x20); // GIMSK: PCIE
    mcu.write_data(0x5F, 0x80); // SREG: I

    let pb1 = mcu.pin("PORTB1").unwrap();
    mcu.set_pin_input(pb1, true);
    assert!(mcu.pending_irq().is_none(), "masked-out pin stays silent");

    let pb0 = mcu.pin("PORTB0").unwrap();
    mcu.set_pin_input(pb0, true);
    assert_eq!(mcu.read_data(0x36) & 0x01, 0x01, "in register follows the pin");
    let p = mcu.pending_irq().expect("pin change pends");
    assert_eq!(p.id, pcint);
    mcu.ack_irq(p.id);
    assert!(mcu.pending_irq().is_none());
}

#[test]
fn test_global_enable_gates_pending() {
    let mut mcu = build();
    mcu.write_data(0x2E, 0b0000_0001); // timer0 running
    mcu.write_data(0x59, 0x02); // TIMSK: TOIE0
    mcu.advance(256);
    assert!(mcu.pending_irq().is_none(), "I bit clear");
    mcu.write_data(0x5F, 0x80);
    let p = mcu.pending_irq().unwrap();
    assert_eq!(mcu.irqs().name(p.id), "TIMER0_OVF");
}

#[test]
fn test_malformed_document_is_fatal() {
    let err = McuBuilder::build_str("<parts core=\"AVR\" data=\"64\"><oops></parts>", Path::new("."))
        .unwrap_err();
    assert!(matches!(err, BuildError::Parse { .. }));
    assert_eq!(err.code(), 1);
}

#[test]
fn test_missing_data_mem_is_fatal() {
    let err = McuBuilder::build_str("<parts core=\"AVR\"></parts>", Path::new(".")).unwrap_err();
    assert!(matches!(err, BuildError::NoDataMem));
}

#[test]
fn test_out_of_range_block_degrades() {
    // regblock beyond data memory: skipped, build continues.
    let doc = r#"
        <parts core="AVR" data="0x40">
            <regblock start="0x200" end="0x2FF">
                <register name="GHOST" addr="0x210" />
            </regblock>
            <regblock start="0x20" end="0x3F">
                <register name="REAL" addr="0x20" />
            </regblock>
        </parts>"#;
    let mcu = McuBuilder::build_str(doc, Path::new(".")).unwrap();
    assert!(mcu.regs().reg_addr("GHOST").is_none());
    assert_eq!(mcu.regs().reg_addr("REAL"), Some(0x20));
}

#[test]
fn test_include_composition_unions_registers() {
    let dir = std::env::temp_dir().join(format!("mcusim_inc_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("root.mcu"),
        r#"<parts core="AVR" data="0x100">
             <include file="frag_a.mcu" />
             <include file="frag_b.mcu" />
           </parts>"#,
    )
    .unwrap();
    std::fs::write(
        dir.join("frag_a.mcu"),
        r#"<parts>
             <regblock start="0x20" end="0x2F">
               <register name="RA" addr="0x20" reset="0x11" />
             </regblock>
           </parts>"#,
    )
    .unwrap();
    std::fs::write(
        dir.join("frag_b.mcu"),
        r#"<parts>
             <regblock start="0x28" end="0x3F">
               <register name="RB" addr="0x28" reset="0x22" />
             </regblock>
           </parts>"#,
    )
    .unwrap();

    let mut mcu = McuBuilder::build_file(&dir.join("root.mcu")).unwrap();
    assert_eq!(mcu.regs().reg_addr("RA"), Some(0x20));
    assert_eq!(mcu.regs().reg_addr("RB"), Some(0x28));
    assert_eq!(mcu.read_data(0x20), 0x11);
    assert_eq!(mcu.read_data(0x28), 0x22);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_failing_include_aborts_build() {
    let dir = std::env::temp_dir().join(format!("mcusim_badinc_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("root.mcu"),
        r#"<parts core="AVR" data="0x100"><include file="missing.mcu" /></parts>"#,
    )
    .unwrap();

    let err = McuBuilder::build_file(&dir.join("root.mcu")).unwrap_err();
    assert!(matches!(err, BuildError::Include { .. }));
    assert_eq!(err.code(), 2, "inner I/O code propagates");

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_unresolved_interrupt_is_inert() {
    // A peripheral naming an undeclared interrupt must still build, and
    // raising through the null handle must be a no-op.
    let doc = r#"
        <parts core="AVR" data="0x100">
            <regblock start="0x20" end="0x5F">
                <register name="TCCR0" addr="0x2E" bits="CS00,CS01,CS02" />
                <register name="TCNT0" addr="0x32" />
            </regblock>
            <timer name="TIMER0" type="80" counter="TCNT0" configregsA="TCCR0">
                <interrupt name="NOT_DECLARED" />
                <prescaler select="CS00,CS01,CS02" values="0,1,8" />
            </timer>
        </parts>"#;
    let mut mcu = McuBuilder::build_str(doc, Path::new(".")).unwrap();
    mcu.write_data(0x2E, 1);
    mcu.advance(1024); // overflows raise a null interrupt: no crash
    assert_eq!(mcu.cycle(), 1024);
    assert!(mcu.interrupt("NOT_DECLARED").is_none());
}

#[test]
fn test_unsupported_core_family_skips_peripheral() {
    let doc = r#"
        <parts core="Z80" data="0x100">
            <regblock start="0x20" end="0x5F">
                <register name="ACSR" addr="0x28" />
            </regblock>
            <acomp name="COMP" configregsA="ACSR" />
        </parts>"#;
    let mcu = McuBuilder::build_str(doc, Path::new(".")).unwrap();
    assert_eq!(mcu.core.family, CoreFamily::Unknown);
    assert!(mcu.module_index("COMP").is_none(), "peripheral skipped, not fatal");
}
