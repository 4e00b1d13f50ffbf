use crate::errors::ForwarderError;
use std::io::{Read, Write};
use std::time::{Duration, SystemTime};

// Particulate concentrations in ug/m3.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub pm25: f64,
    pub pm10: f64,
    pub captured_at: SystemTime,
}

/// Produces raw pollutant readings on demand. `Ok(None)` is an empty read,
/// distinct from a hard failure.
pub trait SensorAdapter {
    fn read(&mut self) -> Result<Option<Measurement>, ForwarderError>;
}

const FRAME_HEAD: u8 = 0xAA;
const FRAME_TAIL: u8 = 0xAB;
const CMD_QUERY: u8 = 0xB4;
const REPLY_QUERY: u8 = 0xC0;
const REPLY_LEN: usize = 10;

const SERIAL_BAUD: u32 = 9600;
const SERIAL_TIMEOUT_SECS: u64 = 1;

/// Query-mode reader for the SDS011 dust sensor: one query command per
/// `read()`, one reply frame back.
pub struct Sds011Reader {
    port: Box<dyn serialport::SerialPort>,
}

impl Sds011Reader {
    pub fn open(path: &str) -> Result<Self, ForwarderError> {
        let port = serialport::new(path, SERIAL_BAUD)
            .timeout(Duration::from_secs(SERIAL_TIMEOUT_SECS))
            .open()
            .map_err(|e| ForwarderError::Sensor(format!("can't open {path}: {e}")))?;
        Ok(Sds011Reader { port })
    }

    fn query_frame() -> [u8; 19] {
        let mut frame = [0u8; 19];
        frame[0] = FRAME_HEAD;
        frame[1] = CMD_QUERY;
        frame[2] = 0x04; // query data command
        frame[15] = 0xFF; // device id: any
        frame[16] = 0xFF;
        frame[17] = checksum(&frame[2..17]);
        frame[18] = FRAME_TAIL;
        frame
    }
}

fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

pub fn parse_reply(frame: &[u8]) -> Result<Measurement, ForwarderError> {
    if frame.len() != REPLY_LEN {
        return Err(ForwarderError::Sensor(format!(
            "short reply: {} bytes",
            frame.len()
        )));
    }
    if frame[0] != FRAME_HEAD || frame[1] != REPLY_QUERY || frame[9] != FRAME_TAIL {
        return Err(ForwarderError::Sensor("malformed reply frame".to_string()));
    }
    if checksum(&frame[2..8]) != frame[8] {
        return Err(ForwarderError::Sensor("reply checksum mismatch".to_string()));
    }
    let pm25 = u16::from_le_bytes([frame[2], frame[3]]) as f64 / 10.0;
    let pm10 = u16::from_le_bytes([frame[4], frame[5]]) as f64 / 10.0;
    Ok(Measurement {
        pm25,
        pm10,
        captured_at: SystemTime::now(),
    })
}

impl SensorAdapter for Sds011Reader {
    fn read(&mut self) -> Result<Option<Measurement>, ForwarderError> {
        self.port
            .write_all(&Self::query_frame())
            .map_err(|e| ForwarderError::Sensor(format!("query write failed: {e}")))?;
        let mut reply = [0u8; REPLY_LEN];
        match self.port.read_exact(&mut reply) {
            Ok(()) => parse_reply(&reply).map(Some),
            // a timed-out read is an empty read, not a fault
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(ForwarderError::Sensor(format!("reply read failed: {e}"))),
        }
    }
}
