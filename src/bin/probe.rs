// Bring-up check for an SX1301 concentrator card: resets the chip,
// verifies the version register, enables both radios and reads one byte
// back through each emulated radio bus.
use anyhow::Result;
use clap::Parser;
use sx1301::{attach, detach, Bus, ControllerRegistry, GpioReset, Radio, RadioBus, Transfer};

#[derive(Parser)]
struct Args {
    /// Concentrator spidev node
    #[arg(long, default_value = "/dev/spidev0.0")]
    spi: String,
    /// GPIO chip holding the reset line
    #[arg(long, default_value = "/dev/gpiochip0")]
    chip: String,
    /// Reset line offset; omit if reset is not host-controlled
    #[arg(long)]
    reset_line: Option<u32>,
    /// Radio register to read through each emulated bus
    #[arg(long, default_value_t = 0x10)]
    reg: u8,
}

struct PrintRegistry;

impl<B: Bus> ControllerRegistry<B> for PrintRegistry {
    fn register(&mut self, radio: &Radio<B>) -> sx1301::Result<()> {
        println!("registered {}", radio.label());
        Ok(())
    }

    fn unregister(&mut self, radio: &Radio<B>) {
        println!("unregistered {}", radio.label());
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let bus = sx1301::open(&args.spi)?;
    let reset = match args.reset_line {
        Some(offset) => Some(GpioReset::new(args.chip.as_str(), offset)?),
        None => None,
    };

    let mut registry = PrintRegistry;
    let mut dev = attach(bus, reset, &mut registry)?;

    for radio in [&mut dev.radio_a, &mut dev.radio_b] {
        let label = radio.label();

        // Clock out the register address, then fetch the latched answer.
        radio.transfer_one(&mut Transfer::write(&[args.reg & 0x7f]))?;
        let mut rx = [0u8; 2];
        radio.transfer_one(&mut Transfer::read(&mut rx))?;
        println!("{label}: reg {:#04x} = {:#04x}", args.reg, rx[1]);
    }

    detach(dev, &mut registry);
    Ok(())
}
