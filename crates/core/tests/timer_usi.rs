//! Timer-family and USI behavior: waveform modes, prescalers, coalesced
//! advances, output compare, external clocking, shift/counter engine.

use std::path::Path;

use mcusim_core::{McuBuilder, PinDrive};

const TINY: &str = include_str!("tiny_test.mcu");

fn build() -> mcusim_core::Mcu {
    McuBuilder::build_str(TINY, Path::new(".")).expect("descriptor builds")
}

// ─── Timer family ───────────────────────────────────────────────────────────

#[test]
fn test_overflow_once_per_256_ticks() {
    let mut mcu = build();
    mcu.write_data(0x2E, 0x01); // CS=1
    mcu.write_data(0x59, 0x02); // TOIE0
    mcu.write_data(0x5F, 0x80); // I

    mcu.advance(256);
    let p = mcu.pending_irq().expect("first overflow");
    assert_eq!(mcu.irqs().name(p.id), "TIMER0_OVF");
    mcu.ack_irq(p.id);

    mcu.advance(255);
    assert!(mcu.pending_irq().is_none(), "no sub-tick raise");
    mcu.advance(1);
    assert!(mcu.pending_irq().is_some(), "next period completes");
}

#[test]
fn test_coalesced_ticks_raise_flag_once() {
    let mut mcu = build();
    mcu.write_data(0x2E, 0x01);
    mcu.write_data(0x59, 0x02);
    mcu.write_data(0x5F, 0x80);

    // Four whole periods in one advance: the flag bit is observed once.
    mcu.advance(1024);
    let p = mcu.pending_irq().unwrap();
    mcu.ack_irq(p.id);
    assert!(mcu.pending_irq().is_none());
    assert_eq!(mcu.read_data(0x32), 0, "counter at a period boundary");
}

#[test]
fn test_prescaler_divides_clock() {
    let mut mcu = build();
    mcu.write_data(0x2E, 0x02); // CS=2 → /8
    let ovf = mcu.interrupt("TIMER0_OVF").unwrap();
    mcu.advance(256 * 8 - 1);
    assert!(!mcu.irqs().is_flagged(ovf, mcu.regs()));
    mcu.advance(1);
    assert!(mcu.irqs().is_flagged(ovf, mcu.regs()));
}

#[test]
fn test_invalid_prescaler_selection_stops_timer() {
    let mut mcu = build();
    mcu.write_data(0x2E, 0x07); // CS=7: outside the 6-entry value list
    let ovf = mcu.interrupt("TIMER0_OVF").unwrap();
    mcu.advance(100_000);
    assert!(!mcu.irqs().is_flagged(ovf, mcu.regs()));
    assert_eq!(mcu.read_data(0x32), 0, "counter never advanced");
}

#[test]
fn test_counter_write_and_read_back() {
    let mut mcu = build();
    mcu.write_data(0x2E, 0x01);
    mcu.write_data(0x32, 100);
    mcu.advance(10);
    assert_eq!(mcu.read_data(0x32), 110);
}

#[test]
fn test_ctc_8bit_compare_period() {
    let mut mcu = build();
    mcu.write_data(0x29, 10); // OCR0A
    mcu.write_data(0x2E, 0x81); // WGM01 | CS00 → CTC, /1
    mcu.write_data(0x59, 0x04); // OCIE0A
    mcu.write_data(0x5F, 0x80);

    let ovf = mcu.interrupt("TIMER0_OVF").unwrap();
    mcu.advance(11);
    let p = mcu.pending_irq().expect("compare match at top");
    assert_eq!(mcu.irqs().name(p.id), "TIMER0_COMPA");
    assert!(!mcu.irqs().is_flagged(ovf, mcu.regs()), "no TOV in CTC");
    mcu.ack_irq(p.id);
    mcu.advance(11);
    assert!(mcu.pending_irq().is_some(), "period is OCR0A+1");
}

#[test]
fn test_phase_correct_counts_down_after_top() {
    let mut mcu = build();
    mcu.write_data(0x2E, 0x41); // WGM00 | CS00 → phase-correct, top 0xFF
    let ovf = mcu.interrupt("TIMER0_OVF").unwrap();

    mcu.advance(300);
    assert_eq!(mcu.read_data(0x32), 210, "reversed at top");
    assert!(!mcu.irqs().is_flagged(ovf, mcu.regs()));
    mcu.advance(210);
    assert_eq!(mcu.read_data(0x32), 0);
    assert!(mcu.irqs().is_flagged(ovf, mcu.regs()), "overflow at bottom");
}

#[test]
fn test_16bit_ctc_with_compare_toggle() {
    let mut mcu = build();
    mcu.write_data(0x37, 0x10); // DDRB: OC pin PORTB4 as output
    mcu.write_data(0x4A, 0xF4); // OCR1A = 500
    mcu.write_data(0x4B, 0x01);
    mcu.write_data(0x4F, 0x40); // COM1A0 → toggle on match
    mcu.write_data(0x4E, 0x09); // WGM12 | CS10 → CTC, /1

    let pb4 = mcu.pin("PORTB4").unwrap();
    let compa = mcu.interrupt("TIMER1_COMPA").unwrap();

    assert_eq!(mcu.pin_drive(pb4), PinDrive::Low);
    mcu.advance(501);
    assert!(mcu.irqs().is_flagged(compa, mcu.regs()));
    assert_eq!(mcu.pin_drive(pb4), PinDrive::High, "toggled on match");
    mcu.advance(501);
    assert_eq!(mcu.pin_drive(pb4), PinDrive::Low, "toggled back next period");
}

#[test]
fn test_16bit_counter_pair_read() {
    let mut mcu = build();
    mcu.write_data(0x4E, 0x01); // CS10, normal mode
    mcu.advance(0x0234);
    assert_eq!(mcu.read_data(0x4C), 0x34);
    assert_eq!(mcu.read_data(0x4D), 0x02);
}

#[test]
fn test_external_clock_counts_pin_edges() {
    let doc = r#"
        <parts core="AVR" data="0x100">
            <regblock start="0x20" end="0x5F">
                <register name="PINX"  addr="0x36" />
                <register name="DDRX"  addr="0x37" />
                <register name="PORTX" addr="0x38" />
                <register name="TCNT0" addr="0x32" />
                <register name="TIFR"  addr="0x58" bits="0,TOV0" />
            </regblock>
            <interrupts>
                <interrupt name="OVF" vector="1" flag="TOV0" />
            </interrupts>
            <port name="PX" pins="4" outreg="PORTX" inreg="PINX" dirreg="DDRX" />
            <timer name="TIMER0" type="80" counter="TCNT0">
                <interrupt name="OVF" />
                <extclock pin="PX0" />
            </timer>
        </parts>"#;
    let mut mcu = McuBuilder::build_str(doc, Path::new(".")).unwrap();
    let px0 = mcu.pin("PX0").unwrap();

    for _ in 0..10 {
        mcu.set_pin_input(px0, true);
        mcu.set_pin_input(px0, false);
    }
    assert_eq!(mcu.read_data(0x32), 10, "one tick per rising edge");

    let ovf = mcu.interrupt("OVF").unwrap();
    for _ in 0..246 {
        mcu.set_pin_input(px0, true);
        mcu.set_pin_input(px0, false);
    }
    assert!(mcu.irqs().is_flagged(ovf, mcu.regs()), "overflow after 256 edges");
}

#[test]
fn test_generic_timer_with_enable_bit() {
    let doc = r#"
        <parts core="8051" data="0x100">
            <regblock start="0x80" end="0xFF">
                <register name="TCON" addr="0x88" bits="IT0,IE0,IT1,IE1,TR0,TF0" />
                <register name="TL0"  addr="0x8A" />
            </regblock>
            <interrupts>
                <interrupt name="T0OVF" vector="1" flag="TF0" />
            </interrupts>
            <timer name="TIMER0" counter="TL0" enable="TR0">
                <interrupt name="T0OVF" />
                <prescaler values="12" />
            </timer>
        </parts>"#;
    let mut mcu = McuBuilder::build_str(doc, Path::new(".")).unwrap();
    let ovf = mcu.interrupt("T0OVF").unwrap();

    mcu.advance(10_000);
    assert_eq!(mcu.read_data(0x8A), 0, "disabled until TR0 set");

    mcu.write_data(0x88, 1 << 4); // TR0
    mcu.advance(12 * 256);
    assert!(mcu.irqs().is_flagged(ovf, mcu.regs()));
}

// ─── USI ────────────────────────────────────────────────────────────────────

#[test]
fn test_usi_software_strobe_shifts_and_counts() {
    let mut mcu = build();
    mcu.write_data(0x2C, 0x10); // three-wire mode
    let di = mcu.pin("PORTB0").unwrap();
    mcu.set_pin_input(di, true);
    mcu.write_data(0x2F, 0xC0); // USIDR

    mcu.write_data(0x2C, 0x12); // USIWM0 | USICLK strobe
    assert_eq!(mcu.read_data(0x2F), 0x81, "MSB out, DI captured into bit 0");
    assert_eq!(mcu.read_data(0x2D) & 0x0F, 1, "counter visible in status");

    let pdo = mcu.pin("PORTB1").unwrap();
    assert_eq!(mcu.pin_drive(pdo), PinDrive::High, "DO driven with new MSB");
}

#[test]
fn test_usi_strobe_bits_read_as_zero() {
    let mut mcu = build();
    mcu.write_data(0x2C, 0x13); // USIWM0 | USICLK | USITC
    assert_eq!(
        mcu.read_data(0x2C),
        0x10,
        "USICLK/USITC strip from the stored control byte"
    );
}

#[test]
fn test_usi_counter_overflow_latches_buffer() {
    let mut mcu = build();
    mcu.write_data(0x2C, 0x10);
    let di = mcu.pin("PORTB0").unwrap();
    mcu.set_pin_input(di, true);

    let usi_ovf = mcu.interrupt("USI_OVF").unwrap();
    for i in 0..8 {
        assert_eq!(mcu.read_data(0x2D) & 0x0F, i, "running count mid-sequence");
        mcu.write_data(0x2C, 0x12);
    }
    assert_eq!(mcu.read_data(0x2D) & 0x0F, 0, "counter wrapped");
    assert!(mcu.irqs().is_flagged(usi_ovf, mcu.regs()), "overflow raised");
    assert_eq!(mcu.read_data(0x2F), 0xFF, "eight ones shifted in");
    assert_eq!(mcu.read_data(0x30), 0xFF, "buffer latched at overflow");
}

#[test]
fn test_usi_external_clock_counts_both_edges() {
    let mut mcu = build();
    mcu.write_data(0x2C, 0x18); // three-wire, external positive edge
    let ck = mcu.pin("PORTB3").unwrap();
    let usi_ovf = mcu.interrupt("USI_OVF").unwrap();

    for i in 0..3 {
        mcu.set_pin_input(ck, true);
        mcu.set_pin_input(ck, false);
        assert_eq!(mcu.read_data(0x2D) & 0x0F, 2 * (i + 1));
    }
    assert!(!mcu.irqs().is_flagged(usi_ovf, mcu.regs()));

    mcu.set_pin_input(ck, true);
    assert_eq!(mcu.read_data(0x2D) & 0x0F, 7);
    mcu.set_pin_input(ck, false);
    assert!(
        mcu.irqs().is_flagged(usi_ovf, mcu.regs()),
        "interrupt exactly at the eighth edge"
    );
    mcu.ack_irq(usi_ovf);

    for _ in 0..3 {
        mcu.set_pin_input(ck, true);
        mcu.set_pin_input(ck, false);
    }
    assert!(!mcu.irqs().is_flagged(usi_ovf, mcu.regs()), "six edges: not yet");
    mcu.set_pin_input(ck, true);
    mcu.set_pin_input(ck, false);
    assert!(mcu.irqs().is_flagged(usi_ovf, mcu.regs()), "once per eight edges");
}

#[test]
fn test_usi_two_wire_start_stop_detector() {
    let mut mcu = build();
    let di = mcu.pin("PORTB0").unwrap();
    let ck = mcu.pin("PORTB3").unwrap();
    mcu.set_pin_input(di, true);
    mcu.set_pin_input(ck, true);

    mcu.write_data(0x2C, 0x20); // two-wire mode

    mcu.set_pin_input(di, false); // data falls while clock high
    assert_ne!(mcu.read_data(0x2D) & 0x80, 0, "start condition flagged");

    mcu.set_pin_input(di, true); // data rises while clock high
    assert_ne!(mcu.read_data(0x2D) & 0x20, 0, "stop condition flagged");
}

#[test]
fn test_usi_two_wire_pins_go_open_collector() {
    let mut mcu = build();
    mcu.write_data(0x37, 0x09); // DDRB: DI(0) and CK(3) outputs
    mcu.write_data(0x38, 0x09); // drive both high
    let di = mcu.pin("PORTB0").unwrap();
    let ck = mcu.pin("PORTB3").unwrap();
    assert_eq!(mcu.pin_drive(di), PinDrive::High);

    mcu.write_data(0x2C, 0x20); // two-wire mode
    assert_eq!(mcu.pin_drive(di), PinDrive::HighZ, "released open-collector line");
    assert_eq!(mcu.pin_drive(ck), PinDrive::HighZ);

    mcu.write_data(0x38, 0x00); // drive low: open collector sinks
    assert_eq!(mcu.pin_drive(di), PinDrive::Low);
}
