//! AD7124-8 SPI driver
//!
//! Register access goes through the communications register: every transaction starts with one
//! byte holding the target register address and the read/write direction, followed by the
//! register contents (MSB first). Register widths are 8, 16 or 24 bits.
#![cfg_attr(not(test), no_std)]

use arbitrary_int::{u11, u2, u24, u3, u4, u5, u6};
use bitbybit::{bitenum, bitfield};
use core::fmt;
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{self, Operation, SpiDevice};
use fugit::MicrosDurationU32;
use serde::{Deserialize, Serialize};

/// Device-ID nibble of the AD7124-8 in the ID register (the low nibble is the silicon revision).
pub const DEVICE_ID: u8 = 0x1;

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Invalid device ID {0:#04x}")]
    Id(u8),
    #[error("Conversion not ready before timeout")]
    Timeout,
    #[error("SPI {0:?}")]
    Bus(spi::ErrorKind),
}

impl<E: spi::Error> From<E> for Error {
    fn from(value: E) -> Self {
        Self::Bus(value.kind())
    }
}

/// On-chip registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Register {
    Status,
    AdcControl,
    Data,
    IoControl1,
    IoControl2,
    Id,
    Error,
    ErrorEn,
    MclkCount,
    Channel(u4),
    Config(u3),
    Filter(u3),
    Offset(u3),
    Gain(u3),
}

impl Register {
    /// Number of addressable registers.
    pub const COUNT: usize = 57;

    pub fn addr(&self) -> u6 {
        let addr = match *self {
            Self::Status => 0x00,
            Self::AdcControl => 0x01,
            Self::Data => 0x02,
            Self::IoControl1 => 0x03,
            Self::IoControl2 => 0x04,
            Self::Id => 0x05,
            Self::Error => 0x06,
            Self::ErrorEn => 0x07,
            Self::MclkCount => 0x08,
            Self::Channel(n) => 0x09 + n.value(),
            Self::Config(n) => 0x19 + n.value(),
            Self::Filter(n) => 0x21 + n.value(),
            Self::Offset(n) => 0x29 + n.value(),
            Self::Gain(n) => 0x31 + n.value(),
        };
        u6::new(addr)
    }

    pub fn from_addr(addr: u6) -> Option<Self> {
        let a = addr.value();
        Some(match a {
            0x00 => Self::Status,
            0x01 => Self::AdcControl,
            0x02 => Self::Data,
            0x03 => Self::IoControl1,
            0x04 => Self::IoControl2,
            0x05 => Self::Id,
            0x06 => Self::Error,
            0x07 => Self::ErrorEn,
            0x08 => Self::MclkCount,
            0x09..=0x18 => Self::Channel(u4::new(a - 0x09)),
            0x19..=0x20 => Self::Config(u3::new(a - 0x19)),
            0x21..=0x28 => Self::Filter(u3::new(a - 0x21)),
            0x29..=0x30 => Self::Offset(u3::new(a - 0x29)),
            0x31..=0x38 => Self::Gain(u3::new(a - 0x31)),
            _ => return None,
        })
    }

    /// All registers in address order.
    pub fn iter() -> impl Iterator<Item = Self> {
        (0..Self::COUNT as u8).filter_map(|a| Self::from_addr(u6::new(a)))
    }

    /// Register width in bytes.
    pub fn size(&self) -> usize {
        match self {
            Self::Status | Self::Id | Self::MclkCount => 1,
            Self::AdcControl
            | Self::IoControl2
            | Self::Channel(_)
            | Self::Config(_) => 2,
            Self::Data
            | Self::IoControl1
            | Self::Error
            | Self::ErrorEn
            | Self::Filter(_)
            | Self::Offset(_)
            | Self::Gain(_) => 3,
        }
    }

    /// Power-on value as listed in the register map.
    pub fn reset_value(&self) -> u24 {
        u24::new(match self {
            Self::Id => 0x17,
            Self::ErrorEn => 0x00_0040,
            Self::Channel(n) if n.value() == 0 => 0x8001,
            Self::Channel(_) => 0x0001,
            Self::Config(_) => 0x0860,
            Self::Filter(_) => 0x06_0180,
            Self::Offset(_) => 0x80_0000,
            Self::Gain(_) => 0x00_0001,
            _ => 0,
        })
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status => write!(f, "STATUS"),
            Self::AdcControl => write!(f, "ADC_CONTROL"),
            Self::Data => write!(f, "DATA"),
            Self::IoControl1 => write!(f, "IO_CONTROL_1"),
            Self::IoControl2 => write!(f, "IO_CONTROL_2"),
            Self::Id => write!(f, "ID"),
            Self::Error => write!(f, "ERROR"),
            Self::ErrorEn => write!(f, "ERROR_EN"),
            Self::MclkCount => write!(f, "MCLK_COUNT"),
            Self::Channel(n) => write!(f, "CHANNEL_{}", n.value()),
            Self::Config(n) => write!(f, "CONFIG_{}", n.value()),
            Self::Filter(n) => write!(f, "FILTER_{}", n.value()),
            Self::Offset(n) => write!(f, "OFFSET_{}", n.value()),
            Self::Gain(n) => write!(f, "GAIN_{}", n.value()),
        }
    }
}

#[bitfield(u8, default = 0x00)]
#[derive(Debug, PartialEq)]
pub struct Comms {
    #[bits(0..=5, rw)]
    pub addr: u6,
    #[bit(6, rw)]
    pub read: bool,
    /// Must be low for the byte to be accepted.
    #[bit(7, rw)]
    pub wen_n: bool,
}

impl Comms {
    pub fn to(reg: Register, read: bool) -> Self {
        Self::default().with_addr(reg.addr()).with_read(read)
    }
}

#[bitfield(u8, default = 0x00)]
#[derive(Debug, PartialEq)]
pub struct Status {
    #[bits(0..=3, r)]
    pub channel: u4,
    #[bit(4, r)]
    pub por_flag: bool,
    #[bit(6, r)]
    pub error_flag: bool,
    /// Conversion result not yet available (RDY is active low).
    #[bit(7, r)]
    pub not_ready: bool,
}

#[bitenum(u2, exhaustive = true)]
#[derive(Debug, PartialEq)]
pub enum PowerMode {
    Low = 0,
    Mid = 1,
    _Full = 2,
    Full = 3,
}

/// Operating modes of the ADC_CONTROL register.
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(u8)]
pub enum Mode {
    Continuous = 0,
    Single = 1,
    Standby = 2,
    PowerDown = 3,
    Idle = 4,
}

#[bitfield(u16, default = 0x0000)]
#[derive(Debug, PartialEq)]
pub struct AdcControl {
    #[bits(0..=1, rw)]
    pub clk_sel: u2,
    #[bits(2..=5, rw)]
    pub mode: u4,
    #[bits(6..=7, rw)]
    pub power_mode: PowerMode,
    #[bit(8, rw)]
    pub ref_en: bool,
    #[bit(9, rw)]
    pub cs_en: bool,
    #[bit(10, rw)]
    pub data_status: bool,
    #[bit(11, rw)]
    pub cont_read: bool,
    #[bit(12, rw)]
    pub dout_rdy_del: bool,
}

impl AdcControl {
    pub fn with_operating_mode(self, mode: Mode) -> Self {
        self.with_mode(u4::new(mode as u8))
    }
}

/// Excitation current source magnitude.
#[bitenum(u3, exhaustive = true)]
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub enum Iout {
    Off = 0,
    Ua50 = 1,
    Ua100 = 2,
    Ua250 = 3,
    Ua500 = 4,
    Ua750 = 5,
    Ua1000 = 6,
    _Ua1000 = 7,
}

#[bitfield(u24, default = 0x000000)]
#[derive(Debug, PartialEq)]
pub struct IoControl1 {
    #[bits(0..=3, rw)]
    pub iout0_ch: u4,
    #[bits(4..=7, rw)]
    pub iout1_ch: u4,
    #[bits(8..=10, rw)]
    pub iout0: Iout,
    #[bits(11..=13, rw)]
    pub iout1: Iout,
    #[bit(15, rw)]
    pub pdsw: bool,
}

#[bitfield(u16, default = 0x0001)]
#[derive(Debug, PartialEq)]
pub struct Channel {
    #[bits(0..=4, rw)]
    pub ainm: u5,
    #[bits(5..=9, rw)]
    pub ainp: u5,
    #[bits(12..=14, rw)]
    pub setup: u3,
    #[bit(15, rw)]
    pub enable: bool,
}

/// Programmable gain amplifier setting.
#[bitenum(u3, exhaustive = true)]
#[derive(Debug, PartialEq, Serialize, Deserialize, Default)]
pub enum Pga {
    #[default]
    G1 = 0,
    G2 = 1,
    G4 = 2,
    G8 = 3,
    G16 = 4,
    G32 = 5,
    G64 = 6,
    G128 = 7,
}

impl Pga {
    pub const fn gain(self) -> u8 {
        1 << self as u8
    }
}

#[bitenum(u2, exhaustive = true)]
#[derive(Debug, PartialEq)]
pub enum RefSel {
    Refin1 = 0,
    Refin2 = 1,
    Internal = 2,
    Avdd = 3,
}

#[bitenum(u2, exhaustive = true)]
#[derive(Debug, PartialEq)]
pub enum Burnout {
    Off = 0,
    Ua0p5 = 1,
    Ua2 = 2,
    Ua4 = 3,
}

#[bitfield(u16, default = 0x0860)]
#[derive(Debug, PartialEq)]
pub struct Config {
    #[bits(0..=2, rw)]
    pub pga: Pga,
    #[bits(3..=4, rw)]
    pub ref_sel: RefSel,
    #[bit(5, rw)]
    pub ain_bufm: bool,
    #[bit(6, rw)]
    pub ain_bufp: bool,
    #[bit(7, rw)]
    pub ref_bufm: bool,
    #[bit(8, rw)]
    pub ref_bufp: bool,
    #[bits(9..=10, rw)]
    pub burnout: Burnout,
    #[bit(11, rw)]
    pub bipolar: bool,
}

#[bitfield(u24, default = 0x060180)]
#[derive(Debug, PartialEq)]
pub struct Filter {
    /// Output data rate select.
    #[bits(0..=10, rw)]
    pub fs: u11,
    #[bit(16, rw)]
    pub single_cycle: bool,
    #[bits(17..=19, rw)]
    pub post_filter: u3,
    #[bit(20, rw)]
    pub rej60: bool,
    /// 0: sinc4, 2: sinc3, 4: fast sinc4, 5: fast sinc3, 7: post filter
    #[bits(21..=23, rw)]
    pub filter: u3,
}

/// Output data rate presets for setup 0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum DataRate {
    /// FS = 1
    High,
    /// FS = 120
    Medium,
    /// FS = 255
    #[default]
    Low,
}

impl DataRate {
    pub fn fs(self) -> u11 {
        u11::new(match self {
            Self::High => 1,
            Self::Medium => 0b0111_1000,
            Self::Low => 0b1111_1111,
        })
    }
}

/// Measurement setup applied by [Ad7124::configure].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Setup {
    pub data_rate: DataRate,
    pub gain: Pga,
    /// Excitation current source output pin.
    pub excitation_pin: u4,
    pub excitation: Iout,
    /// Initial input pair of channel 0.
    pub ainp: u5,
    pub ainm: u5,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            data_rate: DataRate::Low,
            gain: Pga::G16,
            excitation_pin: u4::new(7),
            excitation: Iout::Ua50,
            ainp: u5::new(1),
            ainm: u5::new(0),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ad7124<B> {
    bus: B,
}

impl<B: SpiDevice<u8>> Ad7124<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn release(self) -> B {
        self.bus
    }

    pub fn write_register(
        &mut self,
        reg: Register,
        value: u24,
    ) -> Result<(), Error> {
        let data = value.to_be_bytes();
        Ok(self.bus.transaction(&mut [
            Operation::Write(&Comms::to(reg, false).raw_value().to_be_bytes()),
            Operation::Write(&data[3 - reg.size()..]),
        ])?)
    }

    pub fn read_register(&mut self, reg: Register) -> Result<u24, Error> {
        let mut data = [0; 3];
        self.bus.transaction(&mut [
            Operation::Write(&Comms::to(reg, true).raw_value().to_be_bytes()),
            Operation::Read(&mut data[3 - reg.size()..]),
        ])?;
        Ok(u24::from_be_bytes(data))
    }

    /// Serial interface reset: at least 64 consecutive ones.
    ///
    /// All registers return to their reset values.
    pub fn reset(&mut self) -> Result<(), Error> {
        Ok(self.bus.write(&[0xff; 8])?)
    }

    pub fn id(&mut self) -> Result<u8, Error> {
        Ok(self.read_register(Register::Id)?.value() as u8)
    }

    /// Reset the device and verify its identity.
    pub fn init(&mut self, delay: &mut impl DelayNs) -> Result<u8, Error> {
        self.reset()?;
        // t_POWERUP after a reset
        delay.delay_ms(1);
        let id = self.id()?;
        if id >> 4 != DEVICE_ID {
            return Err(Error::Id(id));
        }
        log::info!("AD7124-8 rev {} initialized", id & 0xf);
        Ok(id)
    }

    /// Program setup 0 and channel 0 for ratiometric RTD measurement.
    pub fn configure(&mut self, setup: &Setup) -> Result<(), Error> {
        self.write_register(
            Register::Filter(u3::new(0)),
            Filter::new_with_raw_value(u24::new(0))
                .with_fs(setup.data_rate.fs())
                .raw_value(),
        )?;
        self.select_channel(setup.ainp, setup.ainm)?;
        self.write_register(
            Register::IoControl1,
            IoControl1::default()
                .with_iout0_ch(setup.excitation_pin)
                .with_iout0(setup.excitation)
                .raw_value(),
        )?;
        let config = Config::default()
            .with_pga(setup.gain)
            .with_ref_sel(RefSel::Refin1)
            .with_ain_bufm(true)
            .with_ain_bufp(true)
            .with_ref_bufm(true)
            .with_ref_bufp(true)
            .with_bipolar(false);
        self.write_register(
            Register::Config(u3::new(0)),
            u24::new(config.raw_value() as u32),
        )?;
        let control = AdcControl::default()
            .with_power_mode(PowerMode::Full)
            .with_operating_mode(Mode::Continuous);
        self.write_register(
            Register::AdcControl,
            u24::new(control.raw_value() as u32),
        )?;
        log::debug!("AD7124 configured: {setup:?}");
        Ok(())
    }

    /// Route an input pair to channel 0 (setup 0, enabled).
    ///
    /// Writing the channel register restarts the conversion sequence.
    pub fn select_channel(&mut self, ainp: u5, ainm: u5) -> Result<(), Error> {
        let channel = Channel::default()
            .with_enable(true)
            .with_setup(u3::new(0))
            .with_ainp(ainp)
            .with_ainm(ainm);
        self.write_register(
            Register::Channel(u4::new(0)),
            u24::new(channel.raw_value() as u32),
        )
    }

    pub fn status(&mut self) -> Result<Status, Error> {
        let status = self.read_register(Register::Status)?;
        Ok(Status::new_with_raw_value(status.value() as u8))
    }

    /// Poll the status register until a new conversion result is available.
    ///
    /// Sleeps `interval` between polls and gives up with [Error::Timeout] once `timeout` has
    /// elapsed.
    pub fn wait_ready(
        &mut self,
        delay: &mut impl DelayNs,
        interval: MicrosDurationU32,
        timeout: MicrosDurationU32,
    ) -> Result<Status, Error> {
        let polls = timeout.ticks() / interval.ticks().max(1);
        for poll in 0..=polls {
            let status = self.status()?;
            if !status.not_ready() {
                return Ok(status);
            }
            if poll < polls {
                delay.delay_us(interval.ticks());
            }
        }
        Err(Error::Timeout)
    }

    /// Latest 24 bit conversion result.
    pub fn read_data(&mut self) -> Result<u24, Error> {
        self.read_register(Register::Data)
    }

    pub fn error(&mut self) -> Result<u24, Error> {
        self.read_register(Register::Error)
    }
}
