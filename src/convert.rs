use miniconf::{Leaf, Tree};
use serde::{Deserialize, Serialize};

include!(concat!(env!("OUT_DIR"), "/pt100_table.rs"));

/// Offset between the Celsius and Kelvin scales.
pub const ZERO_CELSIUS: f64 = 273.15;

/// Resistance bounds (Ω, exclusive) of trusted readings.
pub const R_MIN: f64 = 19.0;
pub const R_MAX: f64 = 390.0;

/// Resistance to temperature conversion of an RTD.
pub trait Rtd {
    /// Temperature in degrees Celsius for a resistance within `(R_MIN, R_MAX)`.
    fn celsius(&self, ohms: f64) -> f64;

    fn kelvin(&self, ohms: f64) -> f64 {
        self.celsius(ohms) + ZERO_CELSIUS
    }
}

/// IEC 60751 platinum RTD, R(0 °C) = 100 Ω.
///
/// Piecewise linear in a table of one entry per degree from -200 °C to 850 °C.
#[derive(Copy, Clone, Debug, Default)]
pub struct Pt100;

impl Rtd for Pt100 {
    fn celsius(&self, ohms: f64) -> f64 {
        let i = PT100
            .partition_point(|r| *r <= ohms)
            .clamp(1, PT100.len() - 1);
        let (r0, r1) = (PT100[i - 1], PT100[i]);
        (PT100_T_MIN + i as i32 - 1) as f64 + (ohms - r0) / (r1 - r0)
    }
}

/// A point of the ADC code to resistance relation.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, Tree)]
pub struct Anchor {
    pub code: Leaf<u32>,
    pub ohms: Leaf<f64>,
}

impl Anchor {
    pub const fn new(code: u32, ohms: f64) -> Self {
        Self {
            code: Leaf(code),
            ohms: Leaf(ohms),
        }
    }
}

/// Two-point linear calibration from ADC code to RTD resistance.
///
/// The anchors must be measured on the actual front-end (reference resistors in place of the
/// RTD). The defaults are the reference values of the stand and are not known to be physically
/// consistent.
///
/// An anchor missing from a settings file keeps its default. A given anchor needs both values.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, Tree)]
#[serde(default)]
pub struct Calibration {
    pub high: Anchor,
    pub low: Anchor,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            high: Anchor::new(11_054_300, 199.5),
            low: Anchor::new(1_660_520, 29.98),
        }
    }
}

impl Calibration {
    /// Resistance in Ω for a raw 24 bit ADC code.
    pub fn ohms(&self, code: u32) -> f64 {
        let Self { high, low } = self;
        let t = (code as f64 - *high.code as f64)
            / (*low.code as f64 - *high.code as f64);
        // Exact at both anchors
        (1. - t) * *high.ohms + t * *low.ohms
    }
}

/// Whether a resistance is inside the trusted range of the conversion.
pub fn in_range(ohms: f64) -> bool {
    ohms > R_MIN && ohms < R_MAX
}
