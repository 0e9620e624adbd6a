//! PMBus power supply driver
//!
//! Multi-output supplies expose one PMBus page per output module. Every command is preceded by
//! a PAGE write selecting the module it applies to. Setpoints use the ULINEAR16 format with a
//! fixed exponent, read-backs of current and temperature use LINEAR11.
#![cfg_attr(not(test), no_std)]

use embedded_hal::i2c::{self, I2c};
use num_enum::IntoPrimitive;
use num_traits::float::FloatCore;

/// Default 7-bit address (A6..A0 = 101_0000).
pub const ADDRESS: u8 = 0x50;

/// Maximum number of module pages tracked.
pub const PAGES: usize = 8;

/// VOUT_MODE exponent of the supported supplies.
pub const VOUT_EXPONENT: i32 = -8;

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Invalid module page {0}")]
    InvalidPage(u8),
    #[error("Value out of range")]
    Range,
    #[error("I2C {0:?}")]
    Bus(i2c::ErrorKind),
}

impl<E: i2c::Error> From<E> for Error {
    fn from(value: E) -> Self {
        Self::Bus(value.kind())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum Command {
    Page = 0x00,
    Operation = 0x01,
    VoutCommand = 0x21,
    IoutOcFaultLimit = 0x46,
    OtFaultLimit = 0x4f,
    OtWarnLimit = 0x51,
    ReadVout = 0x8b,
    ReadIout = 0x8c,
    ReadTemperature1 = 0x8d,
}

/// OPERATION command values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum Operation {
    Off = 0x00,
    On = 0x80,
}

/// Decode a LINEAR11 word: 5 bit two's complement exponent, 11 bit two's complement mantissa.
pub fn linear11(word: u16) -> f64 {
    let exponent = (word as i16) >> 11;
    let mantissa = ((word << 5) as i16) >> 5;
    mantissa as f64 * FloatCore::powi(2.0f64, exponent as i32)
}

/// Encode a LINEAR11 word with the given exponent, truncating toward zero.
pub fn to_linear11(value: f64, exponent: i8) -> Result<u16, Error> {
    if !(-16..16).contains(&exponent) {
        return Err(Error::Range);
    }
    let mantissa = value * FloatCore::powi(2.0f64, -(exponent as i32));
    if !(-1024.0..1024.0).contains(&mantissa) {
        return Err(Error::Range);
    }
    let mantissa = (mantissa as i16 as u16) & 0x7ff;
    Ok(((exponent as u16) << 11) | mantissa)
}

/// Decode an unsigned 16 bit mantissa with the VOUT_MODE exponent.
pub fn ulinear16(word: u16) -> f64 {
    word as f64 * FloatCore::powi(2.0f64, VOUT_EXPONENT)
}

/// Encode an unsigned 16 bit mantissa with the VOUT_MODE exponent, truncating toward zero.
pub fn to_ulinear16(value: f64) -> Result<u16, Error> {
    let word = value * FloatCore::powi(2.0f64, -VOUT_EXPONENT);
    if !(0.0..65536.0).contains(&word) {
        return Err(Error::Range);
    }
    Ok(word as u16)
}

pub struct PowerSupply<I> {
    i2c: I,
    address: u8,
    pages: heapless::Vec<u8, PAGES>,
}

impl<I: I2c> PowerSupply<I> {
    /// Pages beyond [PAGES] are ignored.
    pub fn new(i2c: I, address: u8, pages: &[u8]) -> Self {
        Self {
            i2c,
            address,
            pages: pages.iter().copied().take(PAGES).collect(),
        }
    }

    pub fn release(self) -> I {
        self.i2c
    }

    pub fn pages(&self) -> &[u8] {
        &self.pages
    }

    fn write_byte(&mut self, cmd: Command, data: u8) -> Result<(), Error> {
        Ok(self.i2c.write(self.address, &[cmd.into(), data])?)
    }

    fn write_word(&mut self, cmd: Command, data: u16) -> Result<(), Error> {
        let [lo, hi] = data.to_le_bytes();
        Ok(self.i2c.write(self.address, &[cmd.into(), lo, hi])?)
    }

    fn read_word(&mut self, cmd: Command) -> Result<u16, Error> {
        let mut data = [0; 2];
        self.i2c.write_read(self.address, &[cmd.into()], &mut data)?;
        Ok(u16::from_le_bytes(data))
    }

    /// Select the module addressed by subsequent commands.
    pub fn set_page(&mut self, page: u8) -> Result<(), Error> {
        if !self.pages.contains(&page) {
            return Err(Error::InvalidPage(page));
        }
        self.write_byte(Command::Page, page)
    }

    pub fn operation(&mut self, page: u8, op: Operation) -> Result<(), Error> {
        self.set_page(page)?;
        self.write_byte(Command::Operation, op.into())?;
        log::info!("Module {page} {op:?}");
        Ok(())
    }

    pub fn on(&mut self, page: u8) -> Result<(), Error> {
        self.operation(page, Operation::On)
    }

    pub fn off(&mut self, page: u8) -> Result<(), Error> {
        self.operation(page, Operation::Off)
    }

    /// Program the output voltage (V).
    pub fn set_voltage(&mut self, page: u8, volts: f64) -> Result<(), Error> {
        let word = to_ulinear16(volts)?;
        self.set_page(page)?;
        self.write_word(Command::VoutCommand, word)?;
        log::debug!("Module {page} VOUT_COMMAND {volts} V ({word:#06x})");
        Ok(())
    }

    /// Program the output current limit (A).
    pub fn set_current(&mut self, page: u8, amps: f64) -> Result<(), Error> {
        let word = to_ulinear16(amps)?;
        self.set_page(page)?;
        self.write_word(Command::IoutOcFaultLimit, word)?;
        log::debug!("Module {page} IOUT_OC_FAULT_LIMIT {amps} A ({word:#06x})");
        Ok(())
    }

    pub fn read_voltage(&mut self, page: u8) -> Result<f64, Error> {
        self.set_page(page)?;
        Ok(ulinear16(self.read_word(Command::ReadVout)?))
    }

    pub fn read_current(&mut self, page: u8) -> Result<f64, Error> {
        self.set_page(page)?;
        Ok(linear11(self.read_word(Command::ReadIout)?))
    }

    /// Module temperature (°C).
    pub fn read_temperature(&mut self, page: u8) -> Result<f64, Error> {
        self.set_page(page)?;
        Ok(linear11(self.read_word(Command::ReadTemperature1)?))
    }

    /// Output power (W) from voltage and current read-back.
    pub fn read_power(&mut self, page: u8) -> Result<f64, Error> {
        Ok(self.read_voltage(page)? * self.read_current(page)?)
    }

    /// Over-temperature warning limit (°C).
    pub fn set_temp_warning_limit(
        &mut self,
        page: u8,
        celsius: f64,
    ) -> Result<(), Error> {
        let word = to_linear11(celsius, 0)?;
        self.set_page(page)?;
        self.write_word(Command::OtWarnLimit, word)
    }

    /// Over-temperature fault limit (°C).
    pub fn set_temp_fault_limit(
        &mut self,
        page: u8,
        celsius: f64,
    ) -> Result<(), Error> {
        let word = to_linear11(celsius, 0)?;
        self.set_page(page)?;
        self.write_word(Command::OtFaultLimit, word)
    }
}
