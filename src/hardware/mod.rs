//! Raspberry Pi bus setup
//!
//! The ADC sits on a spidev device, the PMBus supply on an i2c-dev bus. Both are accessed
//! through their embedded-hal 1.0 implementations.
use rppal::hal::Delay;
use rppal::i2c::I2c;
use rppal::spi::{Bus, Mode, SimpleHalSpiDevice, SlaveSelect, Spi};

use ad7124::Ad7124;
use pmbus::PowerSupply;

use crate::acquisition::{Acquisition, Converter};
use crate::settings::{self, Settings};
use crate::Error;

pub type AdcBus = SimpleHalSpiDevice;

pub fn spi(cfg: &settings::Spi) -> Result<AdcBus, Error> {
    let bus = match *cfg.bus {
        0 => Bus::Spi0,
        1 => Bus::Spi1,
        2 => Bus::Spi2,
        3 => Bus::Spi3,
        4 => Bus::Spi4,
        5 => Bus::Spi5,
        6 => Bus::Spi6,
        b => return Err(Error::Settings(format!("no SPI bus {b}"))),
    };
    let ss = match *cfg.chip_select {
        0 => SlaveSelect::Ss0,
        1 => SlaveSelect::Ss1,
        2 => SlaveSelect::Ss2,
        s => return Err(Error::Settings(format!("no SPI chip select {s}"))),
    };
    let mode = match *cfg.mode {
        0 => Mode::Mode0,
        1 => Mode::Mode1,
        2 => Mode::Mode2,
        3 => Mode::Mode3,
        m => return Err(Error::Settings(format!("no SPI mode {m}"))),
    };
    let spi = Spi::new(bus, ss, *cfg.clock, mode)?;
    log::info!(
        "SPI{} CS{} {} Hz {:?}",
        cfg.bus,
        cfg.chip_select,
        cfg.clock,
        mode
    );
    Ok(SimpleHalSpiDevice::new(spi))
}

pub fn i2c(cfg: &settings::Supply) -> Result<I2c, Error> {
    let i2c = I2c::with_bus(*cfg.bus)?;
    log::info!("I2C{} PMBus address {:#04x}", cfg.bus, *cfg.address);
    Ok(i2c)
}

/// Reset, identify and configure the ADC.
pub fn adc(settings: &Settings) -> Result<Acquisition<AdcBus, Delay>, Error> {
    let mut adc = Ad7124::new(spi(&settings.spi)?);
    let mut delay = Delay::new();
    adc.init(&mut delay)?;
    adc.configure(&settings.adc.setup())?;
    Ok(Acquisition::new(
        adc,
        delay,
        *settings.adc.inputs,
        settings.adc.poll(),
        Converter {
            calibration: settings.calibration,
            ..Default::default()
        },
    ))
}

pub fn supply<I: embedded_hal::i2c::I2c>(
    i2c: I,
    cfg: &settings::Supply,
) -> PowerSupply<I> {
    PowerSupply::new(i2c, *cfg.address, &cfg.pages)
}
