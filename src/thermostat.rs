//! Temperature regulation of the module heaters
//!
//! Each control loop maps one RTD reading through a PID controller to the voltage or current
//! setpoint of one power supply module.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use dsp::{Pid, PidController};
use embedded_hal::{delay::DelayNs, i2c::I2c, spi::SpiDevice};
use miniconf::{Leaf, Tree};
use pmbus::PowerSupply;
use serde::{Deserialize, Serialize};

use crate::acquisition::{Acquisition, Reading, SensorSet, SENSORS};
use crate::convert::Rtd;
use crate::telemetry::{now, Point, Sink};
use crate::Error;

/// Number of control loops.
pub const LOOPS: usize = 4;

/// Supply quantity driven by a control loop.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quantity {
    #[default]
    Voltage,
    Current,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Setpoint {
    /// Output voltage (V)
    Voltage(f64),
    /// Output current limit (A)
    Current(f64),
}

impl Quantity {
    pub fn setpoint(self, value: f64) -> Setpoint {
        match self {
            Self::Voltage => Setpoint::Voltage(value),
            Self::Current => Setpoint::Current(value),
        }
    }
}

/// Sink of control loop outputs.
pub trait Actuator {
    type Error;

    fn actuate(&mut self, module: u8, setpoint: Setpoint)
        -> Result<(), Self::Error>;
}

impl<I: I2c> Actuator for PowerSupply<I> {
    type Error = pmbus::Error;

    fn actuate(
        &mut self,
        module: u8,
        setpoint: Setpoint,
    ) -> Result<(), pmbus::Error> {
        match setpoint {
            Setpoint::Voltage(v) => self.set_voltage(module, v),
            Setpoint::Current(i) => self.set_current(module, i),
        }
    }
}

/// Exclusive access for the whole setpoint write, so another user of the bus cannot re-page
/// between PAGE and the command.
impl<A: Actuator> Actuator for &Mutex<A> {
    type Error = A::Error;

    fn actuate(
        &mut self,
        module: u8,
        setpoint: Setpoint,
    ) -> Result<(), A::Error> {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .actuate(module, setpoint)
    }
}

/// Control loop configuration.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, Tree)]
#[serde(default)]
pub struct ControlLoop {
    pub enabled: Leaf<bool>,
    /// RTD sensor index (0 to 3)
    pub sensor: Leaf<u8>,
    /// Power supply module page
    pub module: Leaf<u8>,
    pub quantity: Leaf<Quantity>,
    pub pid: Pid,
}

impl Default for ControlLoop {
    fn default() -> Self {
        Self {
            enabled: Leaf(false),
            sensor: Leaf(0),
            module: Leaf(1),
            quantity: Leaf(Quantity::Voltage),
            pid: Pid::default(),
        }
    }
}

impl ControlLoop {
    /// An enabled voltage loop from `sensor` to `module`.
    pub fn new(sensor: u8, module: u8, pid: Pid) -> Self {
        Self {
            enabled: Leaf(true),
            sensor: Leaf(sensor),
            module: Leaf(module),
            quantity: Leaf(Quantity::Voltage),
            pid,
        }
    }

    pub fn with_quantity(mut self, quantity: Quantity) -> Self {
        *self.quantity = quantity;
        self
    }

    /// The heater loop of the stand: RTD 1 regulated to 330 K with module 4 voltage.
    pub fn heater() -> Self {
        Self::new(
            1,
            4,
            Pid::new(6.5, 1.0, 7.0, 330.0).with_limits(0.0, 40.0),
        )
    }
}

pub fn default_loops() -> [ControlLoop; LOOPS] {
    let mut loops = [ControlLoop::default(); LOOPS];
    loops[0] = ControlLoop::heater();
    loops
}

#[derive(Debug)]
struct Channel {
    sensor: usize,
    module: u8,
    quantity: Quantity,
    pid: PidController,
}

/// The set of enabled control loops with their controller state.
#[derive(Debug)]
pub struct Thermostat {
    channels: [Option<Channel>; LOOPS],
}

impl Thermostat {
    /// Set up the enabled loops.
    ///
    /// Every enabled loop must read an existing sensor and drive one of the installed module
    /// `pages`.
    pub fn new(
        loops: &[ControlLoop; LOOPS],
        pages: &[u8],
    ) -> Result<Self, Error> {
        let mut channels: [Option<Channel>; LOOPS] = Default::default();
        for (i, (cfg, channel)) in
            loops.iter().zip(channels.iter_mut()).enumerate()
        {
            if !*cfg.enabled {
                continue;
            }
            let (sensor, module) = (*cfg.sensor, *cfg.module);
            if sensor as usize >= SENSORS {
                return Err(Error::Settings(format!(
                    "loop {i}: no RTD sensor {sensor}"
                )));
            }
            if !pages.contains(&module) {
                return Err(Error::Settings(format!(
                    "loop {i}: module {module} not in {pages:?}"
                )));
            }
            log::info!(
                "Loop {i}: RTD {sensor} -> module {module} {:?}, {:?}",
                *cfg.quantity,
                cfg.pid
            );
            *channel = Some(Channel {
                sensor: sensor as usize,
                module,
                quantity: *cfg.quantity,
                pid: PidController::new(cfg.pid),
            });
        }
        Ok(Self { channels })
    }

    /// Indices of the enabled loops.
    pub fn enabled(&self) -> impl Iterator<Item = usize> + '_ {
        self.channels
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|_| i))
    }

    /// Run one control cycle.
    ///
    /// Loops whose sensor has no valid reading are skipped and their output is held. Returns the
    /// new output of every loop that was updated.
    pub fn update<A: Actuator>(
        &mut self,
        readings: &SensorSet,
        actuator: &mut A,
    ) -> Result<[Option<f64>; LOOPS], A::Error> {
        let mut outputs = [None; LOOPS];
        for (i, (channel, output)) in
            self.channels.iter_mut().zip(outputs.iter_mut()).enumerate()
        {
            let Some(channel) = channel else {
                continue;
            };
            let kelvin = match readings[channel.sensor] {
                Reading::Valid { kelvin, .. } => kelvin,
                other => {
                    log::warn!(
                        "Loop {i}: holding output, RTD {} {other:?}",
                        channel.sensor
                    );
                    continue;
                }
            };
            let y = channel.pid.update(kelvin);
            actuator.actuate(channel.module, channel.quantity.setpoint(y))?;
            log::debug!("Loop {i}: {kelvin:.3} K -> {y:.3}");
            *output = Some(y);
        }
        Ok(outputs)
    }
}

/// Acquire, regulate and log every `period` for `cycles` cycles (forever if `None`).
pub fn run<B, D, R, A>(
    acquisition: &mut Acquisition<B, D, R>,
    thermostat: &mut Thermostat,
    actuator: &mut A,
    sink: &mut dyn Sink,
    measurement: &str,
    period: Duration,
    cycles: Option<u64>,
) -> Result<(), Error>
where
    B: SpiDevice<u8>,
    D: DelayNs,
    R: Rtd,
    A: Actuator,
    Error: From<A::Error>,
{
    let mut cycle = 0;
    while cycles.map_or(true, |n| cycle < n) {
        let start = Instant::now();
        let readings = acquisition.acquire()?;
        let outputs = thermostat.update(&readings, actuator)?;
        sink.write(
            &Point::new(measurement, now())
                .temperatures(&readings)
                .outputs(&outputs),
        )?;
        cycle += 1;
        std::thread::sleep(period.saturating_sub(start.elapsed()));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct Record(Vec<(u8, Setpoint)>);

    impl Actuator for Record {
        type Error = ();

        fn actuate(
            &mut self,
            module: u8,
            setpoint: Setpoint,
        ) -> Result<(), ()> {
            self.0.push((module, setpoint));
            Ok(())
        }
    }

    fn valid(kelvin: f64) -> Reading {
        Reading::Valid {
            code: 0,
            ohms: 100.,
            kelvin,
        }
    }

    const PAGES: [u8; 4] = [1, 2, 3, 4];

    #[test]
    fn defaults() {
        let loops = default_loops();
        let t = Thermostat::new(&loops, &PAGES).unwrap();
        assert_eq!(t.enabled().collect::<Vec<_>>(), [0]);
        assert_eq!(*loops[0].module, 4);
        assert_eq!(*loops[0].pid.setpoint, 330.);
    }

    #[test]
    fn invalid_sensor() {
        let mut loops = default_loops();
        *loops[2].enabled = true;
        *loops[2].sensor = 4;
        assert!(matches!(
            Thermostat::new(&loops, &PAGES),
            Err(Error::Settings(_))
        ));
    }

    #[test]
    fn module_not_installed() {
        let mut loops = default_loops();
        *loops[2].enabled = true;
        *loops[2].module = 7;
        assert!(matches!(
            Thermostat::new(&loops, &PAGES),
            Err(Error::Settings(_))
        ));
        // The default heater module is missing from a 3-module supply
        assert!(matches!(
            Thermostat::new(&default_loops(), &[1, 2, 3]),
            Err(Error::Settings(_))
        ));
        // Disabled loops are not checked
        *loops[2].enabled = false;
        assert!(Thermostat::new(&loops, &PAGES).is_ok());
    }

    #[test]
    fn skips_invalid() {
        let mut loops = [ControlLoop::default(); LOOPS];
        for (i, l) in loops.iter_mut().enumerate().take(3) {
            *l = ControlLoop::new(
                i as u8,
                i as u8 + 1,
                Pid::new(1.0, 0.0, 0.0, 300.0),
            );
        }
        loops[2] = loops[2].with_quantity(Quantity::Current);
        let mut t = Thermostat::new(&loops, &PAGES).unwrap();
        let mut rec = Record::default();
        let readings = [
            valid(290.),
            Reading::Timeout,
            valid(295.),
            Reading::OutOfRange { code: 0, ohms: 0. },
        ];
        let out = t.update(&readings, &mut rec).unwrap();
        assert_eq!(out, [Some(10.), None, Some(5.), None]);
        assert_eq!(
            rec.0,
            [(1, Setpoint::Voltage(10.)), (3, Setpoint::Current(5.))]
        );
    }

    #[test]
    fn shared_actuator() {
        let record = Mutex::new(Record::default());
        let mut t = Thermostat::new(&default_loops(), &PAGES).unwrap();
        let readings = [
            Reading::Timeout,
            valid(329.),
            Reading::Timeout,
            Reading::Timeout,
        ];
        t.update(&readings, &mut &record).unwrap();
        assert_eq!(
            record.into_inner().unwrap().0,
            [(4, Setpoint::Voltage(6.5 + 1. + 7.))]
        );
    }
}
