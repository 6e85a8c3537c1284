/* Register map for the SX1301 paged register file.
 *
 * The chip exposes 128 registers at a time; registers 0 and 1 are visible
 * on every page, everything else depends on the page selected through
 * REG_PAGE_RESET. Only pages 0 and 2 are touched by this driver.
 */
use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Page select (bits 0-1) and soft reset (bit 7), visible on every page.
pub const REG_PAGE_RESET: u8 = 0;
/// Chip version, read-only, visible on every page.
pub const REG_VERSION: u8 = 1;

/// Value REG_VERSION reads back on a live SX1301.
pub const VERSION: u8 = 103;

/// Page 0: global function enable.
pub const REG_GLOBAL_CFG: u8 = 16;
/// Page 0: clock gating.
pub const REG_CLK_CFG: u8 = 17;
/// Page 2: radio enable/reset bits, shared by both radios.
pub const REG_RADIO_CFG: u8 = 43;

/// Page 2: base of the emulated SPI window for radio A.
pub const RADIO_A_BASE: u8 = 33;
/// Page 2: base of the emulated SPI window for radio B.
pub const RADIO_B_BASE: u8 = 38;

/* Offsets within a radio window. The two windows have the same layout;
 * offset 3 is unused by this driver. */
pub const RADIO_DATA: u8 = 0;
pub const RADIO_DATA_READBACK: u8 = 1;
pub const RADIO_ADDR: u8 = 2;
pub const RADIO_CS: u8 = 4;

/// One of the four register pages selectable through REG_PAGE_RESET.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Page {
    Page0 = 0,
    Page1 = 1,
    Page2 = 2,
    Page3 = 3,
}

bitflags! {
    /// REG_PAGE_RESET bits beyond the page selector. Writing SOFT_RESET
    /// restarts the digital core, so page switches must keep it clear.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PageReset: u8 {
        const SOFT_RESET = 1 << 7;
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct GlobalCfg: u8 {
        const GLOBAL_EN = 1 << 3;
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ClkCfg: u8 {
        const CLK32M_EN = 1 << 0;
    }

    /// REG_RADIO_CFG. The reset bit pulses both radios at once; the
    /// hardware has no per-radio reset.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RadioCfg: u8 {
        const RADIO_A_EN = 1 << 0;
        const RADIO_B_EN = 1 << 1;
        const RADIO_RST  = 1 << 2;
    }

    /// CS control register of a radio window (base + RADIO_CS).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RadioCs: u8 {
        const CS = 1 << 0;
    }
}
