//! Bring-up and teardown of the concentrator and its two radio buses.
//!
//! The sequence mirrors the chip's power-on requirements: hardware reset
//! pulse, version check, soft reset, clock/global gating, then the shared
//! radio enable/reset dance on page 2. The hold times are hardware
//! constants, not tunables. Any failure aborts the whole bring-up and
//! unwinds whatever was already registered, newest first.

use crate::radio::{Radio, RadioPort};
use crate::registers::*;
use crate::{Bus, Concentrator, Error, Result};
use gpiocdev::line::Value;
use gpiocdev::Request;
use log::{debug, error, info};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Reset line collaborator. Injected so bring-up can be exercised with a
/// fake; the line is optional because some boards tie reset off-host.
pub trait ResetLine {
    fn set_active(&mut self, active: bool) -> Result<()>;
}

/// Reset line driven through the GPIO character device.
pub struct GpioReset {
    line: Request,
    offset: u32,
}

impl GpioReset {
    pub fn new(chip: impl Into<PathBuf>, offset: u32) -> Result<Self> {
        let line = Request::builder()
            .on_chip(chip.into())
            .with_line(offset)
            .as_output(Value::Inactive)
            .request()?;
        Ok(Self { line, offset })
    }
}

impl ResetLine for GpioReset {
    fn set_active(&mut self, active: bool) -> Result<()> {
        let value = if active { Value::Active } else { Value::Inactive };
        self.line.set_value(self.offset, value)?;
        Ok(())
    }
}

/// Seam to whatever framework exposes the radio sub-buses to their
/// protocol drivers. Registration order is A then B; unregistration must
/// be the reverse.
pub trait ControllerRegistry<B: Bus> {
    fn register(&mut self, radio: &Radio<B>) -> Result<()>;
    fn unregister(&mut self, radio: &Radio<B>);
}

/// A live concentrator with both radio buses registered.
pub struct Sx1301<B: Bus, R: ResetLine> {
    shared: Arc<Mutex<Concentrator<B>>>,
    reset: Option<R>,
    pub radio_a: Radio<B>,
    pub radio_b: Radio<B>,
}

impl<B: Bus, R: ResetLine> Sx1301<B, R> {
    /// Shared register path, the same one the radio endpoints use.
    pub fn concentrator(&self) -> Arc<Mutex<Concentrator<B>>> {
        self.shared.clone()
    }

    pub fn reset_line(&mut self) -> Option<&mut R> {
        self.reset.as_mut()
    }
}

fn hardware_reset(reset: &mut impl ResetLine) -> Result<()> {
    reset.set_active(true)?;
    thread::sleep(Duration::from_millis(100));
    reset.set_active(false)?;
    thread::sleep(Duration::from_millis(100));
    Ok(())
}

/// Bring up the concentrator behind `bus` and register both radio buses
/// with `registry`. Fail-fast: the first error aborts bring-up, nothing
/// stays half-registered.
pub fn attach<B: Bus, R: ResetLine>(
    mut bus: B,
    mut reset: Option<R>,
    registry: &mut impl ControllerRegistry<B>,
) -> Result<Sx1301<B, R>> {
    if let Some(rst) = reset.as_mut() {
        hardware_reset(rst)?;
    }

    bus.setup()?;

    let version = bus.read(REG_VERSION).map_err(|e| {
        error!("version read failed");
        e
    })?;
    if version != VERSION {
        error!("unexpected version: {version}");
        return Err(Error::UnexpectedVersion(version));
    }

    let mut conc = Concentrator::new(bus);

    // Start from a known page before leaning on the switch cache, then
    // put the digital core through a soft reset.
    conc.page_switch(Page::Page0).map_err(|e| {
        error!("page/reset write failed");
        e
    })?;
    conc.soft_reset().map_err(|e| {
        error!("soft reset failed");
        e
    })?;

    conc.rmw(REG_GLOBAL_CFG, |v| v & !GlobalCfg::GLOBAL_EN.bits())
        .map_err(|e| {
            error!("global enable clear failed");
            e
        })?;
    conc.rmw(REG_CLK_CFG, |v| v & !ClkCfg::CLK32M_EN.bits())
        .map_err(|e| {
            error!("32M clock enable clear failed");
            e
        })?;

    conc.page_switch(Page::Page2).map_err(|e| {
        error!("page 2 switch failed");
        e
    })?;

    // The hardware only exposes a combined enable for the two radios.
    conc.rmw(REG_RADIO_CFG, |v| {
        v | (RadioCfg::RADIO_A_EN | RadioCfg::RADIO_B_EN).bits()
    })
    .map_err(|e| {
        error!("radio enable failed");
        e
    })?;

    // Analog settling time before the shared reset pulse. Resetting one
    // radio without pulsing the other is not possible.
    thread::sleep(Duration::from_millis(500));
    conc.rmw(REG_RADIO_CFG, |v| v | RadioCfg::RADIO_RST.bits())
        .map_err(|e| {
            error!("radio reset assert failed");
            e
        })?;
    thread::sleep(Duration::from_millis(5));
    conc.rmw(REG_RADIO_CFG, |v| v & !RadioCfg::RADIO_RST.bits())
        .map_err(|e| {
            error!("radio reset deassert failed");
            e
        })?;

    let shared = Arc::new(Mutex::new(conc));
    let radio_a = Radio::new(shared.clone(), RadioPort::A);
    let radio_b = Radio::new(shared.clone(), RadioPort::B);

    info!("registering radio A SPI");
    registry.register(&radio_a).map_err(|e| {
        error!("radio A SPI register failed");
        e
    })?;

    info!("registering radio B SPI");
    if let Err(e) = registry.register(&radio_b) {
        error!("radio B SPI register failed");
        registry.unregister(&radio_a);
        return Err(e);
    }

    debug!("SX1301 module attached");

    Ok(Sx1301 {
        shared,
        reset,
        radio_a,
        radio_b,
    })
}

/// Tear the device down again: radio buses first, newest registration
/// first, then the concentrator itself when `dev` drops.
pub fn detach<B: Bus, R: ResetLine>(dev: Sx1301<B, R>, registry: &mut impl ControllerRegistry<B>) {
    registry.unregister(&dev.radio_b);
    registry.unregister(&dev.radio_a);
    info!("SX1301 module removed");
}
