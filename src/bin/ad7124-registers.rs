//! Reset and configure the AD7124 and print its register file.
//!
//! Registers that differ from their reset value are marked. A non-zero ERROR register is
//! reported as a warning. With `--no-configure` the registers are dumped straight after reset.
use ad7124::{Ad7124, Register};
use rppal::hal::Delay;

use cryostand::{hardware, logger, settings::Args};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Args { settings, free, .. } = Args::from_env()?;
    logger::init(settings.log_level());

    let mut adc = Ad7124::new(hardware::spi(&settings.spi)?);
    let mut delay = Delay::new();
    let id = adc.init(&mut delay)?;
    if !free.iter().any(|a| a == "--no-configure") {
        adc.configure(&settings.adc.setup())?;
    }

    println!("ID {id:#04x}");
    println!("{:<12} {:>4} {:>8} {:>8}", "register", "addr", "value", "reset");
    for reg in Register::iter() {
        let value = adc.read_register(reg)?;
        let reset = reg.reset_value();
        let width = 2 * reg.size();
        println!(
            "{:<12} {:>#4x} {:>8} {:>8} {}",
            reg.to_string(),
            reg.addr().value(),
            format!("{:0width$x}", value.value()),
            format!("{:0width$x}", reset.value()),
            if value != reset { "*" } else { "" },
        );
    }

    let error = adc.error()?.value();
    if error != 0 {
        log::warn!("ERROR register {error:#08x}");
    }
    Ok(())
}
