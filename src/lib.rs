//! biolink acquires continuous multi-channel biosignal telemetry (EMG, EEG,
//! IMU) from networked laboratory data-loggers. It builds the binary command
//! frames that start and stop each device family, reassembles the TCP byte
//! stream into fixed-size blocks, decodes 16 and 24 bit two's complement
//! samples into physical units, splits composite links into their
//! sub-devices and keeps a sliding window of the most recent samples for
//! whatever wants to draw them.
//!
//! The usual path through the crate is a [`config::AcquisitionConfig`] that
//! opens a [`transport::Link`] and yields a [`plan::AcquisitionPlan`], which a
//! [`session::Session`] then runs on a background thread. The
//! [`simulator`] speaks the same protocol for testing without hardware.

#![warn(missing_docs)]
pub mod args;
pub mod bitfield;
pub mod checksum;
pub mod component;
pub mod config;
pub mod decoder;
pub mod demux;
pub mod error;
pub mod family;
pub mod frame;
pub mod handshake;
pub mod plan;
pub mod profile;
pub mod ring_buffer;
pub mod session;
pub mod simulator;
pub mod stats;
pub mod transport;
pub mod window;

pub use error::{Error, Result};
