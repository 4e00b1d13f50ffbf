//! US-EPA air quality index computation for the two SDS011 channels,
//! per the published 24-hour breakpoint tables.

use crate::errors::ForwarderError;
use crate::sensor::Measurement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pollutant {
    Pm25,
    Pm10,
}

struct Breakpoint {
    c_lo: f64,
    c_hi: f64,
    i_lo: f64,
    i_hi: f64,
}

const PM25_BREAKPOINTS: &[Breakpoint] = &[
    Breakpoint { c_lo: 0.0, c_hi: 12.0, i_lo: 0.0, i_hi: 50.0 },
    Breakpoint { c_lo: 12.1, c_hi: 35.4, i_lo: 51.0, i_hi: 100.0 },
    Breakpoint { c_lo: 35.5, c_hi: 55.4, i_lo: 101.0, i_hi: 150.0 },
    Breakpoint { c_lo: 55.5, c_hi: 150.4, i_lo: 151.0, i_hi: 200.0 },
    Breakpoint { c_lo: 150.5, c_hi: 250.4, i_lo: 201.0, i_hi: 300.0 },
    Breakpoint { c_lo: 250.5, c_hi: 350.4, i_lo: 301.0, i_hi: 400.0 },
    Breakpoint { c_lo: 350.5, c_hi: 500.4, i_lo: 401.0, i_hi: 500.0 },
];

const PM10_BREAKPOINTS: &[Breakpoint] = &[
    Breakpoint { c_lo: 0.0, c_hi: 54.0, i_lo: 0.0, i_hi: 50.0 },
    Breakpoint { c_lo: 55.0, c_hi: 154.0, i_lo: 51.0, i_hi: 100.0 },
    Breakpoint { c_lo: 155.0, c_hi: 254.0, i_lo: 101.0, i_hi: 150.0 },
    Breakpoint { c_lo: 255.0, c_hi: 354.0, i_lo: 151.0, i_hi: 200.0 },
    Breakpoint { c_lo: 355.0, c_hi: 424.0, i_lo: 201.0, i_hi: 300.0 },
    Breakpoint { c_lo: 425.0, c_hi: 504.0, i_lo: 301.0, i_hi: 400.0 },
    Breakpoint { c_lo: 505.0, c_hi: 604.0, i_lo: 401.0, i_hi: 500.0 },
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AirQualityIndex {
    pub combined: f64,
    pub pm25: f64,
    pub pm10: f64,
}

/// Index value for a single pollutant channel. Negative, non-finite, or
/// above-scale concentrations are per-reading errors.
pub fn pollutant_aqi(pollutant: Pollutant, concentration: f64) -> Result<f64, ForwarderError> {
    if !concentration.is_finite() || concentration < 0.0 {
        return Err(ForwarderError::InvalidInput(format!(
            "concentration {concentration} for {pollutant:?} is not a non-negative number"
        )));
    }
    let (table, truncated) = match pollutant {
        // PM2.5 reports to 0.1 ug/m3, PM10 to whole ug/m3
        Pollutant::Pm25 => (PM25_BREAKPOINTS, (concentration * 10.0).floor() / 10.0),
        Pollutant::Pm10 => (PM10_BREAKPOINTS, concentration.floor()),
    };
    let bp = table
        .iter()
        .find(|bp| truncated >= bp.c_lo && truncated <= bp.c_hi)
        .ok_or_else(|| {
            ForwarderError::InvalidInput(format!(
                "concentration {concentration} for {pollutant:?} is beyond the index scale"
            ))
        })?;
    let index =
        (bp.i_hi - bp.i_lo) / (bp.c_hi - bp.c_lo) * (truncated - bp.c_lo) + bp.i_lo;
    Ok(index.round())
}

/// Index for a full measurement; the combined value is the worst channel.
pub fn compute(measurement: &Measurement) -> Result<AirQualityIndex, ForwarderError> {
    let pm25 = pollutant_aqi(Pollutant::Pm25, measurement.pm25)?;
    let pm10 = pollutant_aqi(Pollutant::Pm10, measurement.pm10)?;
    Ok(AirQualityIndex {
        combined: pm25.max(pm10),
        pm25,
        pm10,
    })
}
