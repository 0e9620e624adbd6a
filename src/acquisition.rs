//! RTD temperature acquisition
//!
//! The four sensors share one AD7124 channel. A scan routes each sensor's input pair to channel
//! 0, waits for the next conversion and converts the raw code through the two-point calibration
//! and the RTD table.

use ad7124::{Ad7124, Error};
use arbitrary_int::{u24, u5};
use embedded_hal::{delay::DelayNs, spi::SpiDevice};
use fugit::MicrosDurationU32;

use crate::convert::{in_range, Calibration, Pt100, Rtd};

/// Number of RTD sensors.
pub const SENSORS: usize = 4;

/// Default (AINP, AINM) input pairs of sensors 0 to 3.
pub const INPUTS: [[u5; 2]; SENSORS] = [
    [u5::new(4), u5::new(3)],
    [u5::new(3), u5::new(2)],
    [u5::new(2), u5::new(1)],
    [u5::new(1), u5::new(0)],
];

/// Result of one channel scan.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Reading {
    Valid { code: u32, ohms: f64, kelvin: f64 },
    /// Resistance outside the conversion table.
    OutOfRange { code: u32, ohms: f64 },
    /// No conversion result within the poll timeout.
    Timeout,
}

impl Reading {
    pub fn kelvin(&self) -> Option<f64> {
        match self {
            Self::Valid { kelvin, .. } => Some(*kelvin),
            _ => None,
        }
    }

    /// Temperature, or `0.0` for anything but a valid reading.
    pub fn kelvin_or_zero(&self) -> f64 {
        self.kelvin().unwrap_or(0.)
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

/// One reading per sensor, in sensor order.
pub type SensorSet = [Reading; SENSORS];

/// Conversion of raw codes to readings.
#[derive(Copy, Clone, Debug, Default)]
pub struct Converter<R = Pt100> {
    pub calibration: Calibration,
    pub rtd: R,
}

impl<R: Rtd> Converter<R> {
    pub fn reading(&self, code: u24) -> Reading {
        let code = code.value();
        let ohms = self.calibration.ohms(code);
        if in_range(ohms) {
            Reading::Valid {
                code,
                ohms,
                kelvin: self.rtd.kelvin(ohms),
            }
        } else {
            Reading::OutOfRange { code, ohms }
        }
    }
}

/// Data-ready polling policy.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Poll {
    pub interval: MicrosDurationU32,
    pub timeout: MicrosDurationU32,
}

impl Default for Poll {
    fn default() -> Self {
        Self {
            interval: MicrosDurationU32::millis(1),
            timeout: MicrosDurationU32::millis(500),
        }
    }
}

pub struct Acquisition<B, D, R = Pt100> {
    adc: Ad7124<B>,
    delay: D,
    inputs: [[u5; 2]; SENSORS],
    poll: Poll,
    converter: Converter<R>,
}

impl<B, D, R> Acquisition<B, D, R>
where
    B: SpiDevice<u8>,
    D: DelayNs,
    R: Rtd,
{
    /// The ADC is expected to be initialized and configured.
    pub fn new(
        adc: Ad7124<B>,
        delay: D,
        inputs: [[u5; 2]; SENSORS],
        poll: Poll,
        converter: Converter<R>,
    ) -> Self {
        Self {
            adc,
            delay,
            inputs,
            poll,
            converter,
        }
    }

    pub fn adc(&mut self) -> &mut Ad7124<B> {
        &mut self.adc
    }

    pub fn release(self) -> (Ad7124<B>, D) {
        (self.adc, self.delay)
    }

    /// Scan one sensor.
    ///
    /// `None` for a sensor index without an input pair. The bus is not touched in that case.
    pub fn read(&mut self, sensor: usize) -> Result<Option<Reading>, Error> {
        let Some(&pair) = self.inputs.get(sensor) else {
            return Ok(None);
        };
        self.scan(sensor, pair).map(Some)
    }

    fn scan(
        &mut self,
        sensor: usize,
        [ainp, ainm]: [u5; 2],
    ) -> Result<Reading, Error> {
        self.adc.select_channel(ainp, ainm)?;
        match self.adc.wait_ready(
            &mut self.delay,
            self.poll.interval,
            self.poll.timeout,
        ) {
            Ok(_) => {}
            Err(Error::Timeout) => {
                log::warn!("RTD {sensor}: no conversion result");
                return Ok(Reading::Timeout);
            }
            Err(e) => return Err(e),
        }
        let reading = self.converter.reading(self.adc.read_data()?);
        if let Reading::OutOfRange { code, ohms } = reading {
            log::warn!("RTD {sensor}: {ohms:.2} Ω (code {code}) out of range");
        }
        log::trace!("RTD {sensor}: {reading:?}");
        Ok(reading)
    }

    /// Scan all sensors in order.
    ///
    /// Bus errors abort the scan. Timeouts and out-of-range resistances are reported per sensor.
    pub fn acquire(&mut self) -> Result<SensorSet, Error> {
        let mut set = [Reading::Timeout; SENSORS];
        for (sensor, reading) in set.iter_mut().enumerate() {
            *reading = self.scan(sensor, self.inputs[sensor])?;
        }
        Ok(set)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::convert::{Anchor, ZERO_CELSIUS};

    #[test]
    fn reading_variants() {
        let conv = Converter::<Pt100>::default();
        // Midway between the anchors: 114.74 Ω
        let r = conv.reading(u24::new((11_054_300 + 1_660_520) / 2));
        assert!(r.is_valid());
        assert!(r.kelvin_or_zero() > ZERO_CELSIUS + 30.);
        // Far below the low anchor
        let r = conv.reading(u24::new(0));
        assert!(matches!(r, Reading::OutOfRange { code: 0, .. }));
        assert_eq!(r.kelvin_or_zero(), 0.);
        assert_eq!(r.kelvin(), None);
        assert_eq!(Reading::Timeout.kelvin_or_zero(), 0.);
    }

    #[test]
    fn range_guard() {
        let mut conv = Converter::<Pt100>::default();
        // Anchors chosen so that code == ohms * 1000
        conv.calibration.high = Anchor::new(200_000, 200.);
        conv.calibration.low = Anchor::new(100_000, 100.);
        for code in [0, 10_000, 18_990, 390_010, 400_000, 0xff_ffff] {
            assert!(!conv.reading(u24::new(code)).is_valid(), "{code}");
        }
        for (code, celsius) in [(100_000, 0.), (138_505, 100.)] {
            let k = conv.reading(u24::new(code)).kelvin().unwrap();
            assert!((k - celsius - ZERO_CELSIUS).abs() < 1e-2);
        }
    }
}
