//! The request/response exchange some devices offer before streaming.
//!
//! A request is a two byte frame `[code, crc]`; the device answers with a
//! fixed 20 byte block. The probe settings answer is the important one: it
//! says which probe sits on which input, and therefore how many channels
//! each input will stream.

use crate::error::{Error, Result};
use crate::frame::ConfigFrame;
use crate::transport::{BlockReader, Link};
use log::{debug, info};
use nom::{
    bytes::complete::take,
    combinator::{all_consuming, map},
    number::complete::u8 as byte,
    sequence::tuple,
    Finish, IResult,
};
use std::fmt;
use std::net::TcpStream;

/// Every answer is exactly this long.
pub const RESPONSE_LEN: usize = 20;

/// Inputs described by a probe settings answer.
pub const INPUTS: usize = 10;

/// Channels streamed by each probe type code.
const CHANNELS_BY_PROBE: [usize; 16] = [0, 14, 22, 38, 46, 70, 102, 0, 0, 0, 0, 0, 0, 0, 0, 0];

/// What can be asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Code 1, the probe type on each input
    ProbeSettings,
    /// Code 2, the firmware string
    FirmwareVersion,
    /// Code 3, the battery charge
    BatteryLevel,
}

impl Request {
    /// The code byte on the wire.
    pub fn code(self) -> u8 {
        match self {
            Request::ProbeSettings => 1,
            Request::FirmwareVersion => 2,
            Request::BatteryLevel => 3,
        }
    }

    /// Inverse of [`Request::code`].
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Request::ProbeSettings),
            2 => Some(Request::FirmwareVersion),
            3 => Some(Request::BatteryLevel),
            _ => None,
        }
    }

    /// `[code, crc]`
    pub fn frame(self) -> ConfigFrame {
        ConfigFrame::sealed(vec![self.code()])
    }
}

/// Which probe is plugged into each input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeSettings {
    probes: [u8; INPUTS],
}

impl ProbeSettings {
    /// Fails if any code is outside the known probe table.
    pub fn new(probes: [u8; INPUTS]) -> Result<Self> {
        if let Some(bad) = probes
            .iter()
            .find(|&&p| p as usize >= CHANNELS_BY_PROBE.len())
        {
            return Err(Error::MalformedResponse(format!(
                "unknown probe type {bad}"
            )));
        }
        Ok(Self { probes })
    }

    /// Raw probe type codes, input 1 first.
    pub fn probe_codes(&self) -> &[u8; INPUTS] {
        &self.probes
    }

    /// Channels streamed by `input` (zero based); zero means nothing is
    /// plugged in or the probe is unknown.
    pub fn channels(&self, input: usize) -> usize {
        self.probes
            .get(input)
            .map_or(0, |&code| CHANNELS_BY_PROBE[code as usize])
    }

    /// The answer a device would send for these settings.
    pub fn to_response(&self) -> [u8; RESPONSE_LEN] {
        let mut response = [0u8; RESPONSE_LEN];
        response[0] = Request::ProbeSettings.code();
        response[1..=INPUTS].copy_from_slice(&self.probes);
        response
    }
}

/// Firmware identification, as sent by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareVersion(pub Vec<u8>);

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        let trimmed = &self.0[..end];
        match std::str::from_utf8(trimmed) {
            Ok(text) if text.chars().all(|c| c.is_ascii_graphic() || c == ' ') => {
                write!(f, "{text}")
            }
            _ => {
                let parts: Vec<String> = trimmed.iter().map(u8::to_string).collect();
                write!(f, "{}", parts.join("."))
            }
        }
    }
}

type Parsed<'a, T> = IResult<&'a [u8], T>;

/// `[echo][10 probe codes][8 reserved][error code]`
fn parse_settings(input: &[u8]) -> Parsed<([u8; INPUTS], u8)> {
    map(
        all_consuming(tuple((byte, take(INPUTS), take(8usize), byte))),
        |(_echo, probes, _reserved, error): (u8, &[u8], &[u8], u8)| {
            let mut codes = [0u8; INPUTS];
            codes.copy_from_slice(probes);
            (codes, error)
        },
    )(input)
}

/// `[echo][payload...]`
fn parse_payload(input: &[u8]) -> Parsed<&[u8]> {
    map(
        all_consuming(tuple((byte, take(RESPONSE_LEN - 1)))),
        |(_echo, payload)| payload,
    )(input)
}

fn malformed(e: nom::error::Error<&[u8]>) -> Error {
    Error::MalformedResponse(format!(
        "{:?} with {} bytes left",
        e.code,
        e.input.len()
    ))
}

impl TryFrom<&[u8]> for ProbeSettings {
    type Error = Error;

    fn try_from(response: &[u8]) -> Result<Self> {
        let (_, (probes, error)) = parse_settings(response).finish().map_err(malformed)?;
        if error != 0 {
            return Err(Error::HandshakeRejected(error));
        }
        Self::new(probes)
    }
}

impl TryFrom<&[u8]> for FirmwareVersion {
    type Error = Error;

    fn try_from(response: &[u8]) -> Result<Self> {
        let (_, payload) = parse_payload(response).finish().map_err(malformed)?;
        Ok(Self(payload.to_vec()))
    }
}

/// Battery charge in percent, taken from the first payload byte.
pub fn parse_battery(response: &[u8]) -> Result<u8> {
    let (_, payload) = parse_payload(response).finish().map_err(malformed)?;
    Ok(payload[0])
}

/// Drives requests over an open link before acquisition starts.
pub struct Handshake<'a> {
    link: &'a mut Link,
    reader: BlockReader<TcpStream>,
}

impl<'a> Handshake<'a> {
    /// Start a handshake over `link`.
    pub fn new(link: &'a mut Link) -> Result<Self> {
        let reader = link.reader()?;
        Ok(Self { link, reader })
    }

    /// Send `request` and wait for its 20 byte answer.
    pub fn exchange(&mut self, request: Request) -> Result<Vec<u8>> {
        self.link.send_frame(&request.frame())?;
        let response = self.reader.read_block(RESPONSE_LEN)?;
        debug!("{:?} answered {:02X?}", request, response);
        Ok(response)
    }

    /// Ask for the firmware string.
    pub fn firmware_version(&mut self) -> Result<FirmwareVersion> {
        let version = FirmwareVersion::try_from(self.exchange(Request::FirmwareVersion)?.as_slice())?;
        info!("Firmware version: {}", version);
        Ok(version)
    }

    /// Ask for the battery charge, in percent.
    pub fn battery_level(&mut self) -> Result<u8> {
        let level = parse_battery(&self.exchange(Request::BatteryLevel)?)?;
        info!("Battery level: {}%", level);
        Ok(level)
    }

    /// Fails with [`Error::HandshakeRejected`] when the device reports an
    /// error, before any probe code is looked at.
    pub fn probe_settings(&mut self) -> Result<ProbeSettings> {
        let settings = ProbeSettings::try_from(self.exchange(Request::ProbeSettings)?.as_slice())?;
        info!("Probe configuration: {:?}", settings.probe_codes());
        Ok(settings)
    }
}
