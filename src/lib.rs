use log::{debug, error};
use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};
use std::{io, path::Path};
use thiserror::Error;

pub mod bringup;
pub mod radio;
pub mod registers;

use registers::*;

pub use bringup::{attach, detach, ControllerRegistry, GpioReset, ResetLine, Sx1301};
pub use radio::{DirectSpi, Radio, RadioBus, RadioPort, Transfer};

#[derive(Error, Debug)]
pub enum Error {
    #[error("SPI communication failed")]
    Io(#[from] io::Error),
    #[error("GPIO access failed")]
    Gpio(#[from] gpiocdev::Error),
    #[error("invalid transfer length: {0}")]
    InvalidLength(usize),
    #[error("unexpected version: {0}")]
    UnexpectedVersion(u8),
    #[error("radio transfer failed during {0}")]
    Transfer(Phase, #[source] io::Error),
}

/// Point of a radio transfer at which the parent bus failed. The CS pulse
/// never shows up here: that step degrades to a best-effort value instead
/// of aborting (see [`radio`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    PageSwitch,
    Address,
    Data,
    ReadBack,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            Phase::PageSwitch => "page switch",
            Phase::Address => "address write",
            Phase::Data => "data write",
            Phase::ReadBack => "data readback",
        })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Byte-wide register transport to the concentrator. One call is one bus
/// exchange; the implementation sets the direction tag (address bit 7) and
/// never retries.
pub trait Bus {
    fn read(&mut self, reg: u8) -> io::Result<u8>;
    fn write(&mut self, reg: u8, val: u8) -> io::Result<()>;

    /// Word width / timing setup, run once at attach.
    fn setup(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct SpiBus {
    spi: Spidev,
}

impl Bus for SpiBus {
    fn read(&mut self, reg: u8) -> io::Result<u8> {
        let addr = [reg & 0x7f];
        let mut val = [0u8; 1];
        self.spi.transfer_multiple(&mut [
            SpidevTransfer::write(&addr),
            SpidevTransfer::read(&mut val),
        ])?;
        Ok(val[0])
    }

    fn write(&mut self, reg: u8, val: u8) -> io::Result<()> {
        let buf = [reg | 0x80, val];
        self.spi.transfer(&mut SpidevTransfer::write(&buf))
    }

    fn setup(&mut self) -> io::Result<()> {
        let options = SpidevOptions::new().bits_per_word(8).build();
        self.spi.configure(&options)
    }
}

pub fn open<P: AsRef<Path>>(path: P) -> io::Result<SpiBus> {
    let mut spi = Spidev::open(path)?;
    let options = SpidevOptions::new()
        .bits_per_word(8)
        .max_speed_hz(8_000_000)
        .mode(SpiModeFlags::SPI_MODE_0)
        .build();
    spi.configure(&options)?;
    Ok(SpiBus { spi })
}

/// One physical SX1301 behind one bus endpoint. Tracks which register page
/// the chip currently has selected so redundant page switches can be
/// skipped; `None` means unknown, forcing a switch on the next access.
pub struct Concentrator<B: Bus> {
    bus: B,
    cur_page: Option<Page>,
}

impl<B: Bus> Concentrator<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            cur_page: None,
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn read(&mut self, reg: u8) -> io::Result<u8> {
        self.bus.read(reg)
    }

    pub fn write(&mut self, reg: u8, val: u8) -> io::Result<()> {
        self.bus.write(reg, val)
    }

    /// Read-modify-write a single register.
    pub fn rmw(&mut self, reg: u8, f: impl FnOnce(u8) -> u8) -> io::Result<()> {
        let val = self.bus.read(reg)?;
        self.bus.write(reg, f(val))
    }

    /// Select a register page, skipping the write if the chip already has
    /// it selected. On failure the cached page is left untouched, so the
    /// next access retries the switch instead of trusting unknown hardware
    /// state.
    pub fn page_switch(&mut self, page: Page) -> io::Result<()> {
        if self.cur_page == Some(page) {
            return Ok(());
        }

        debug!("switching to page {}", u8::from(page));
        // The page selector shares REG_PAGE_RESET with the soft reset
        // trigger; the Page type keeps the upper bits zero.
        self.bus.write(REG_PAGE_RESET, u8::from(page)).map_err(|e| {
            error!("switching to page {} failed", u8::from(page));
            e
        })?;

        self.cur_page = Some(page);
        Ok(())
    }

    // TODO: the chip loses its page selection across a soft reset but
    // cur_page keeps the cached value. Bring-up writes page 0 immediately
    // before resetting so the two stay consistent; revisit if soft_reset
    // grows callers outside bringup.
    pub fn soft_reset(&mut self) -> io::Result<()> {
        self.bus.write(REG_PAGE_RESET, PageReset::SOFT_RESET.bits())
    }
}
