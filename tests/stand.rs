use std::sync::Mutex;
use std::time::Duration;

use ad7124::Ad7124;
use embedded_hal::{
    delay::DelayNs,
    i2c::{self, I2c},
    spi::{self, ErrorKind, Operation, SpiDevice},
};
use pmbus::PowerSupply;

use cryostand::{
    acquisition::{Acquisition, Converter, Poll, Reading, INPUTS},
    convert::{Anchor, Calibration, Pt100},
    telemetry::{read_modules, Csv},
    thermostat::{self, Actuator, ControlLoop, Setpoint, Thermostat, LOOPS},
};
use dsp::Pid;

/// AD7124 behind a four-way RTD multiplexer.
///
/// A sensor without code never signals data ready.
struct Stand {
    codes: [Option<u32>; 4],
    sensor: usize,
    channels: Vec<u16>,
    status_reads: usize,
    fail: bool,
}

impl Stand {
    fn new(codes: [Option<u32>; 4]) -> Self {
        Self {
            codes,
            sensor: 0,
            channels: Vec::new(),
            status_reads: 0,
            fail: false,
        }
    }
}

impl spi::ErrorType for Stand {
    type Error = ErrorKind;
}

impl SpiDevice<u8> for Stand {
    fn transaction(
        &mut self,
        operations: &mut [Operation<'_, u8>],
    ) -> Result<(), ErrorKind> {
        if self.fail {
            return Err(ErrorKind::Other);
        }
        match operations {
            // CHANNEL_0
            [Operation::Write([0x09]), Operation::Write(data)] => {
                let channel = u16::from_be_bytes([data[0], data[1]]);
                self.sensor = 4 - ((channel >> 5) & 0x1f) as usize;
                self.channels.push(channel);
            }
            // STATUS
            [Operation::Write([0x40]), Operation::Read(buf)] => {
                self.status_reads += 1;
                buf[0] = if self.codes[self.sensor].is_some() {
                    0x00
                } else {
                    0x80
                };
            }
            // DATA
            [Operation::Write([0x42]), Operation::Read(buf)] => {
                let code = self.codes[self.sensor].unwrap_or(0);
                buf.copy_from_slice(&code.to_be_bytes()[1..]);
            }
            _ => panic!("unexpected transaction"),
        }
        Ok(())
    }
}

struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

/// Supply modules recording their setpoints.
#[derive(Default)]
struct Modules(Vec<(u8, Setpoint)>);

impl Actuator for Modules {
    type Error = pmbus::Error;

    fn actuate(
        &mut self,
        module: u8,
        setpoint: Setpoint,
    ) -> Result<(), pmbus::Error> {
        self.0.push((module, setpoint));
        Ok(())
    }
}

/// PMBus supply with a single PAGE register.
///
/// Records the page every VOUT_COMMAND lands on.
#[derive(Default)]
struct Paged {
    page: u8,
    vout: Vec<u8>,
}

impl i2c::ErrorType for Paged {
    type Error = i2c::ErrorKind;
}

impl I2c for Paged {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [i2c::Operation<'_>],
    ) -> Result<(), i2c::ErrorKind> {
        assert_eq!(address, pmbus::ADDRESS);
        match operations {
            [i2c::Operation::Write([0x00, page])] => {
                self.page = *page;
                // Give the other thread a chance to re-page
                std::thread::yield_now();
            }
            [i2c::Operation::Write([0x21, _, _])] => self.vout.push(self.page),
            [i2c::Operation::Write([_]), i2c::Operation::Read(buf)] => {
                buf.fill(0);
                std::thread::yield_now();
            }
            _ => panic!("unexpected transaction"),
        }
        Ok(())
    }
}

/// One code per milliohm.
fn converter() -> Converter<Pt100> {
    Converter {
        calibration: Calibration {
            high: Anchor::new(200_000, 200.),
            low: Anchor::new(100_000, 100.),
        },
        rtd: Pt100,
    }
}

fn acquisition(stand: Stand) -> Acquisition<Stand, NoDelay> {
    Acquisition::new(
        Ad7124::new(stand),
        NoDelay,
        INPUTS,
        Poll {
            interval: fugit::MicrosDurationU32::millis(1),
            timeout: fugit::MicrosDurationU32::millis(5),
        },
        converter(),
    )
}

fn stand() -> Stand {
    Stand::new([Some(100_000), None, Some(5_000), Some(138_506)])
}

#[test]
fn scan() {
    let mut acq = acquisition(stand());
    let set = acq.acquire().unwrap();
    assert_eq!(
        set[0],
        Reading::Valid {
            code: 100_000,
            ohms: 100.,
            kelvin: 273.15
        }
    );
    assert_eq!(set[1], Reading::Timeout);
    assert!(matches!(set[2], Reading::OutOfRange { code: 5_000, .. }));
    assert!((set[3].kelvin().unwrap() - 373.15).abs() < 1e-2);
    assert_eq!(set.map(|r| r.kelvin_or_zero())[1..3], [0., 0.]);

    let (adc, _) = acq.release();
    let stand = adc.release();
    assert_eq!(stand.channels, [0x8083, 0x8062, 0x8041, 0x8020]);
    // 3 ready sensors plus 6 polls of the silent one
    assert_eq!(stand.status_reads, 3 + 6);
}

#[test]
fn bus_error_aborts() {
    let mut s = stand();
    s.fail = true;
    let mut acq = acquisition(s);
    assert_eq!(
        acq.acquire(),
        Err(ad7124::Error::Bus(ErrorKind::Other))
    );
}

#[test]
fn read_single() {
    let mut acq = acquisition(stand());
    assert_eq!(acq.read(1), Ok(Some(Reading::Timeout)));
    assert_eq!(acq.read(4), Ok(None));
    assert_eq!(acq.read(usize::MAX), Ok(None));
    let (adc, _) = acq.release();
    // Only sensor 1 was routed
    assert_eq!(adc.release().channels, [0x8062]);
}

#[test]
fn regulate() {
    let mut loops = [ControlLoop::default(); LOOPS];
    loops[0] = ControlLoop::new(
        0,
        4,
        Pid::new(1.0, 0.0, 0.0, 283.15).with_limits(0., 40.),
    );
    // Follows the silent sensor: never updated
    loops[3] = ControlLoop::new(1, 2, Pid::default());
    let mut thermostat = Thermostat::new(&loops, &[1, 2, 3, 4]).unwrap();
    let mut acq = acquisition(stand());
    let mut modules = Modules::default();
    let mut csv = Csv::new(Vec::new());
    thermostat::run(
        &mut acq,
        &mut thermostat,
        &mut modules,
        &mut csv,
        "stand",
        Duration::ZERO,
        Some(2),
    )
    .unwrap();

    assert_eq!(modules.0.len(), 2);
    for (module, setpoint) in modules.0 {
        assert_eq!(module, 4);
        let Setpoint::Voltage(v) = setpoint else {
            panic!("{setpoint:?}");
        };
        assert!((v - 10.).abs() < 1e-9);
    }

    let out = String::from_utf8(csv.into_inner()).unwrap();
    let lines: Vec<_> = out.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(
        lines[0],
        "time,rtd0,rtd1,rtd2,rtd3,loop0,loop1,loop2,loop3"
    );
    for row in &lines[1..] {
        let cells: Vec<_> = row.split(',').collect();
        assert_eq!(cells.len(), 9);
        assert_eq!(cells[1], "273.15");
        assert_eq!(cells[2..4], ["", ""]);
        let y: f64 = cells[5].parse().unwrap();
        assert!((y - 10.).abs() < 1e-9, "{y}");
        assert_eq!(cells[6..], ["", "", ""]);
    }
}

#[test]
fn shared_supply_keeps_pages() {
    let supply = Mutex::new(PowerSupply::new(
        Paged::default(),
        pmbus::ADDRESS,
        &[1, 2, 3, 4],
    ));
    std::thread::scope(|s| {
        s.spawn(|| {
            let mut heater = &supply;
            for _ in 0..200 {
                heater.actuate(4, Setpoint::Voltage(12.5)).unwrap();
            }
        });
        s.spawn(|| {
            for _ in 0..50 {
                let modules = read_modules(&supply, &[1, 2, 3]);
                assert_eq!(modules.len(), 3);
            }
        });
    });
    let vout = supply.into_inner().unwrap().release().vout;
    assert_eq!(vout.len(), 200);
    assert!(vout.iter().all(|&page| page == 4));
}
