//! Emulated SPI buses for the two radio front-ends.
//!
//! The radios have no bus of their own: their registers are reached by
//! writing address and data bytes into a per-radio window on page 2 of the
//! concentrator and pulsing a fake chip select. [`Radio`] performs that
//! emulation; [`DirectSpi`] drives the same 1-3 byte frames over a real
//! spidev node for boards where a radio is wired out directly. Either way
//! the radio's own protocol driver only sees [`RadioBus`].

use crate::registers::*;
use crate::{Bus, Concentrator, Error, Phase, Result};
use log::{debug, error, warn};
use spidev::{Spidev, SpidevTransfer};
use std::sync::{Arc, Mutex, PoisonError};

/// Radio register frames are an address byte plus at most two data bytes.
pub const MAX_TRANSFER_LEN: usize = 3;

/// One logical transfer on a radio sub-bus: an optional outgoing frame
/// (address byte first) and an optional readback buffer. Buffers must hold
/// at least `len` bytes; on reads only the final byte is populated.
pub struct Transfer<'a> {
    pub tx: Option<&'a [u8]>,
    pub rx: Option<&'a mut [u8]>,
    pub len: usize,
}

impl<'a> Transfer<'a> {
    pub fn write(tx: &'a [u8]) -> Self {
        Self {
            len: tx.len(),
            tx: Some(tx),
            rx: None,
        }
    }

    pub fn read(rx: &'a mut [u8]) -> Self {
        let len = rx.len();
        Self {
            tx: None,
            rx: Some(rx),
            len,
        }
    }

    /// Reject malformed requests before any bus activity: the frame must
    /// be 1-3 bytes and every supplied buffer must cover `len`.
    fn check(&self) -> Result<()> {
        if self.len == 0 || self.len > MAX_TRANSFER_LEN {
            return Err(Error::InvalidLength(self.len));
        }
        if self.tx.is_some_and(|tx| tx.len() < self.len)
            || self.rx.as_deref().is_some_and(|rx| rx.len() < self.len)
        {
            return Err(Error::InvalidLength(self.len));
        }
        Ok(())
    }
}

/// Bus capability handed to a radio's protocol driver, chosen at
/// construction time: emulated through the concentrator or direct.
pub trait RadioBus {
    fn transfer_one(&mut self, xfr: &mut Transfer) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RadioPort {
    A,
    B,
}

impl RadioPort {
    pub fn base(self) -> u8 {
        match self {
            RadioPort::A => RADIO_A_BASE,
            RadioPort::B => RADIO_B_BASE,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RadioPort::A => "radio-a",
            RadioPort::B => "radio-b",
        }
    }
}

/// A radio sub-bus emulated through the parent's paged registers. Both
/// ports share one [`Concentrator`] behind a mutex: the page selection is
/// process state on the parent, so transfers from the two radios must
/// never interleave.
pub struct Radio<B: Bus> {
    conc: Arc<Mutex<Concentrator<B>>>,
    port: RadioPort,
    page: Page,
    base: u8,
}

impl<B: Bus> Clone for Radio<B> {
    fn clone(&self) -> Self {
        Self {
            conc: self.conc.clone(),
            port: self.port,
            page: self.page,
            base: self.base,
        }
    }
}

impl<B: Bus> Radio<B> {
    pub(crate) fn new(conc: Arc<Mutex<Concentrator<B>>>, port: RadioPort) -> Self {
        Self {
            conc,
            port,
            page: Page::Page2,
            base: port.base(),
        }
    }

    pub fn port(&self) -> RadioPort {
        self.port
    }

    pub fn label(&self) -> &'static str {
        self.port.label()
    }

    /// Latch the frame into the radio by toggling the emulated CS bit.
    /// Best effort: failures are logged and the pulse carries on with a
    /// CS value of 0. A lost CS toggle must not abort a transfer whose
    /// address and data phases already completed.
    fn pulse_cs(&self, conc: &mut Concentrator<B>) {
        let cs = match conc.read(self.base + RADIO_CS) {
            Ok(cs) => cs,
            Err(e) => {
                warn!("{}: failed to read CS ({e})", self.label());
                0
            }
        };

        if let Err(e) = conc.write(self.base + RADIO_CS, cs | RadioCs::CS.bits()) {
            warn!("{}: failed to assert CS ({e})", self.label());
        }
        if let Err(e) = conc.write(self.base + RADIO_CS, cs & !RadioCs::CS.bits()) {
            warn!("{}: failed to deassert CS ({e})", self.label());
        }
    }
}

impl<B: Bus> RadioBus for Radio<B> {
    fn transfer_one(&mut self, xfr: &mut Transfer) -> Result<()> {
        xfr.check()?;

        debug!("{}: transferring one ({})", self.label(), xfr.len);

        // cur_page is only ever updated after a successful write, so a
        // poisoned lock still holds a consistent cache.
        let mut conc = self.conc.lock().unwrap_or_else(PoisonError::into_inner);

        conc.page_switch(self.page).map_err(|e| {
            error!("{}: failed to switch page for transfer", self.label());
            Error::Transfer(Phase::PageSwitch, e)
        })?;

        if let Some(tx) = xfr.tx {
            conc.write(self.base + RADIO_ADDR, tx.first().copied().unwrap_or(0))
                .map_err(|e| {
                    error!("{}: SPI radio address write failed", self.label());
                    Error::Transfer(Phase::Address, e)
                })?;

            let data = if xfr.len >= 2 { tx[1] } else { 0 };
            conc.write(self.base + RADIO_DATA, data).map_err(|e| {
                error!("{}: SPI radio data write failed", self.label());
                Error::Transfer(Phase::Data, e)
            })?;

            self.pulse_cs(&mut conc);
        }

        if let Some(rx) = xfr.rx.as_deref_mut() {
            let val = conc.read(self.base + RADIO_DATA_READBACK).map_err(|e| {
                error!("{}: SPI radio data read failed", self.label());
                Error::Transfer(Phase::ReadBack, e)
            })?;
            // The hardware only latches the last byte of a frame.
            rx[xfr.len - 1] = val;
        }

        Ok(())
    }
}

/// A radio wired straight to its own spidev node; the same frames, no
/// emulation.
pub struct DirectSpi {
    spi: Spidev,
}

impl DirectSpi {
    pub fn new(spi: Spidev) -> Self {
        Self { spi }
    }
}

impl RadioBus for DirectSpi {
    fn transfer_one(&mut self, xfr: &mut Transfer) -> Result<()> {
        xfr.check()?;

        let len = xfr.len;
        match (xfr.tx, xfr.rx.as_deref_mut()) {
            (Some(tx), Some(rx)) => self
                .spi
                .transfer(&mut SpidevTransfer::read_write(&tx[..len], &mut rx[..len]))?,
            (Some(tx), None) => self.spi.transfer(&mut SpidevTransfer::write(&tx[..len]))?,
            (None, Some(rx)) => self.spi.transfer(&mut SpidevTransfer::read(&mut rx[..len]))?,
            (None, None) => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ops_of, MockBus, Op};

    fn radio(bus: MockBus, port: RadioPort) -> (Radio<MockBus>, Arc<Mutex<Vec<Op>>>) {
        let ops = bus.ops.clone();
        let conc = Arc::new(Mutex::new(Concentrator::new(bus)));
        (Radio::new(conc, port), ops)
    }

    #[test]
    fn write_transfer_sequence() {
        let (mut radio, ops) = radio(MockBus::default(), RadioPort::A);

        let tx = [0x05, 0x10];
        radio.transfer_one(&mut Transfer::write(&tx)).unwrap();

        assert_eq!(
            ops_of(&ops),
            vec![
                Op::Write(REG_PAGE_RESET, 2),
                Op::Write(35, 0x05),
                Op::Write(33, 0x10),
                Op::Read(37),
                Op::Write(37, 0x01),
                Op::Write(37, 0x00),
            ]
        );
    }

    #[test]
    fn cs_pulse_preserves_other_cs_bits() {
        let mut bus = MockBus::default();
        bus.regs.insert(37, 0x10);
        let (mut radio, ops) = radio(bus, RadioPort::A);

        radio.transfer_one(&mut Transfer::write(&[0x05])).unwrap();

        let ops = ops_of(&ops);
        assert_eq!(&ops[3..], &[Op::Read(37), Op::Write(37, 0x11), Op::Write(37, 0x10)]);
    }

    #[test]
    fn write_op_count_is_length_independent() {
        for len in 1..=3usize {
            let (mut radio, ops) = radio(MockBus::default(), RadioPort::B);
            let tx = [0xAA, 0xBB, 0xCC];
            radio
                .transfer_one(&mut Transfer::write(&tx[..len]))
                .unwrap();

            // 1 page switch + addr + data + CS read + 2 CS writes.
            let ops = ops_of(&ops);
            assert_eq!(ops.len(), 6, "len {len}");
            assert_eq!(ops[1], Op::Write(40, 0xAA));
            let data = if len >= 2 { 0xBB } else { 0 };
            assert_eq!(ops[2], Op::Write(38, data));
        }
    }

    #[test]
    fn read_transfer_populates_only_last_byte() {
        let mut bus = MockBus::default();
        bus.regs.insert(34, 0x5A);
        let (mut radio, ops) = radio(bus, RadioPort::A);

        let mut rx = [0xEE, 0xEE, 0xEE];
        radio.transfer_one(&mut Transfer::read(&mut rx)).unwrap();

        assert_eq!(rx, [0xEE, 0xEE, 0x5A]);
        assert_eq!(
            ops_of(&ops),
            vec![Op::Write(REG_PAGE_RESET, 2), Op::Read(34)]
        );
    }

    #[test]
    fn invalid_length_touches_no_hardware() {
        let (mut radio, ops) = radio(MockBus::default(), RadioPort::A);

        let tx = [0u8; 4];
        let mut long = Transfer {
            tx: Some(&tx),
            rx: None,
            len: 4,
        };
        let mut empty = Transfer {
            tx: None,
            rx: None,
            len: 0,
        };

        assert!(matches!(
            radio.transfer_one(&mut long),
            Err(Error::InvalidLength(4))
        ));
        assert!(matches!(
            radio.transfer_one(&mut empty),
            Err(Error::InvalidLength(0))
        ));
        assert!(ops_of(&ops).is_empty());
    }

    #[test]
    fn cs_read_failure_degrades_instead_of_aborting() {
        let mut bus = MockBus::default();
        bus.fail_read.insert(37);
        let (mut radio, ops) = radio(bus, RadioPort::A);

        radio.transfer_one(&mut Transfer::write(&[0x05])).unwrap();

        // Best-effort CS value of 0 after the failed read.
        let ops = ops_of(&ops);
        assert_eq!(&ops[3..], &[Op::Read(37), Op::Write(37, 0x01), Op::Write(37, 0x00)]);
    }

    #[test]
    fn cs_write_failure_does_not_abort() {
        let mut bus = MockBus::default();
        bus.fail_write.insert(37);
        let (mut radio, ops) = radio(bus, RadioPort::A);

        radio
            .transfer_one(&mut Transfer::write(&[0x05, 0x10]))
            .unwrap();

        // Both CS writes are attempted and the transfer still completes.
        assert_eq!(
            ops_of(&ops),
            vec![
                Op::Write(REG_PAGE_RESET, 2),
                Op::Write(35, 0x05),
                Op::Write(33, 0x10),
                Op::Read(37),
                Op::Write(37, 0x01),
                Op::Write(37, 0x00),
            ]
        );
    }

    #[test]
    fn undersized_buffer_is_rejected_before_bus_activity() {
        let (mut radio, ops) = radio(MockBus::default(), RadioPort::A);

        let tx = [0x05];
        let mut short_tx = Transfer {
            tx: Some(&tx),
            rx: None,
            len: 2,
        };
        assert!(matches!(
            radio.transfer_one(&mut short_tx),
            Err(Error::InvalidLength(2))
        ));

        let mut rx = [0u8; 1];
        let mut short_rx = Transfer {
            tx: None,
            rx: Some(&mut rx),
            len: 3,
        };
        assert!(matches!(
            radio.transfer_one(&mut short_rx),
            Err(Error::InvalidLength(3))
        ));

        assert!(ops_of(&ops).is_empty());
    }

    #[test]
    fn address_write_failure_aborts_before_data_phase() {
        let mut bus = MockBus::default();
        bus.fail_write.insert(35);
        let (mut radio, ops) = radio(bus, RadioPort::A);

        let err = radio
            .transfer_one(&mut Transfer::write(&[0x05, 0x10]))
            .unwrap_err();
        assert!(matches!(err, Error::Transfer(Phase::Address, _)));

        // Nothing after the failed address write; no rollback either.
        assert_eq!(
            ops_of(&ops),
            vec![Op::Write(REG_PAGE_RESET, 2), Op::Write(35, 0x05)]
        );
    }

    #[test]
    fn page_switch_failure_is_phase_tagged() {
        let mut bus = MockBus::default();
        bus.fail_write.insert(REG_PAGE_RESET);
        let (mut radio, ops) = radio(bus, RadioPort::A);

        let err = radio
            .transfer_one(&mut Transfer::write(&[0x05]))
            .unwrap_err();
        assert!(matches!(err, Error::Transfer(Phase::PageSwitch, _)));
        assert_eq!(ops_of(&ops), vec![Op::Write(REG_PAGE_RESET, 2)]);
    }

    #[test]
    fn sibling_transfers_share_one_page_switch() {
        let bus = MockBus::default();
        let ops = bus.ops.clone();
        let conc = Arc::new(Mutex::new(Concentrator::new(bus)));
        let mut radio_a = Radio::new(conc.clone(), RadioPort::A);
        let mut radio_b = Radio::new(conc, RadioPort::B);

        radio_a.transfer_one(&mut Transfer::write(&[0x05])).unwrap();
        radio_b.transfer_one(&mut Transfer::write(&[0x06])).unwrap();

        let switches = ops_of(&ops)
            .iter()
            .filter(|op| matches!(op, Op::Write(REG_PAGE_RESET, _)))
            .count();
        assert_eq!(switches, 1);
    }

    #[test]
    fn direct_spi_validates_without_touching_the_bus() {
        // /dev/null stands in for a spidev node; validation failures must
        // return before any ioctl is issued.
        let spi = Spidev::open("/dev/null").unwrap();
        let mut direct = DirectSpi::new(spi);

        let tx = [0u8; 4];
        let mut long = Transfer {
            tx: Some(&tx),
            rx: None,
            len: 4,
        };
        assert!(matches!(
            direct.transfer_one(&mut long),
            Err(Error::InvalidLength(4))
        ));

        let mut empty = Transfer {
            tx: None,
            rx: None,
            len: 0,
        };
        assert!(matches!(
            direct.transfer_one(&mut empty),
            Err(Error::InvalidLength(0))
        ));

        // A buffer-less frame of valid length is a no-op, not an ioctl.
        let mut idle = Transfer {
            tx: None,
            rx: None,
            len: 1,
        };
        direct.transfer_one(&mut idle).unwrap();
    }

    #[test]
    fn combined_transfer_runs_write_then_readback() {
        let mut bus = MockBus::default();
        bus.regs.insert(34, 0x7F);
        let (mut radio, ops) = radio(bus, RadioPort::A);

        let tx = [0x05, 0x10];
        let mut rx = [0u8; 2];
        let mut xfr = Transfer {
            tx: Some(&tx),
            rx: Some(&mut rx),
            len: 2,
        };
        radio.transfer_one(&mut xfr).unwrap();

        assert_eq!(rx, [0, 0x7F]);
        let ops = ops_of(&ops);
        assert_eq!(ops.last(), Some(&Op::Read(34)));
        assert_eq!(ops.len(), 7);
    }
}
