//! Byte-stream connections and the framing that turns them into blocks.
//!
//! TCP delivers whatever it has, in pieces of any size. [`BlockReader`]
//! accumulates those pieces and only ever hands out whole blocks of the
//! requested size; a partial block is kept until the rest arrives.

use crate::error::{Error, Result};
use crate::frame::ConfigFrame;
use log::{debug, info};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

const SCRATCH_SIZE: usize = 64 * 1024;

/// Reassembles an unbounded byte stream into fixed-size blocks.
#[derive(Debug)]
pub struct BlockReader<R> {
    inner: R,
    pending: Vec<u8>,
    scratch: Vec<u8>,
}

impl<R: Read> BlockReader<R> {
    /// Frame blocks read from `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            scratch: vec![0; SCRATCH_SIZE],
        }
    }

    /// Bytes received but not yet handed out as part of a block.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Give back the wrapped stream. Pending bytes are lost.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Try to assemble one block of exactly `block_size` bytes.
    ///
    /// Returns `Ok(None)` when the underlying read timed out before the block
    /// was complete; whatever arrived so far is kept for the next call. A
    /// zero-length read means the peer is gone and fails with
    /// [`Error::ConnectionClosed`].
    pub fn poll_block(&mut self, block_size: usize) -> Result<Option<Vec<u8>>> {
        if block_size == 0 {
            return Err(Error::invalid("block size must be at least one byte"));
        }

        while self.pending.len() < block_size {
            match self.inner.read(&mut self.scratch) {
                Ok(0) => return Err(Error::ConnectionClosed),
                Ok(n) => self.pending.extend_from_slice(&self.scratch[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None)
                }
                Err(e) => return Err(e.into()),
            }
        }

        let rest = self.pending.split_off(block_size);
        Ok(Some(std::mem::replace(&mut self.pending, rest)))
    }

    /// Block until a whole block of `block_size` bytes is available.
    pub fn read_block(&mut self, block_size: usize) -> Result<Vec<u8>> {
        loop {
            if let Some(block) = self.poll_block(block_size)? {
                return Ok(block);
            }
        }
    }
}

/// An established connection to a data-logger.
#[derive(Debug)]
pub struct Link {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Link {
    /// Dial the device (Quattrocento, Novecento, SyncStation).
    pub fn connect(addr: impl ToSocketAddrs, read_timeout: Option<Duration>) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream, read_timeout)
    }

    /// Listen on `bind` and wait for the device to dial in (Sessantaquattro+,
    /// Muovi, Quattro+, Due+). Only one connection is ever accepted.
    pub fn accept(bind: impl ToSocketAddrs, read_timeout: Option<Duration>) -> Result<Self> {
        let listener = TcpListener::bind(bind)?;
        info!("Waiting for a device on {}", listener.local_addr()?);
        Self::accept_on(&listener, read_timeout)
    }

    /// Accept one connection on an already bound listener.
    pub fn accept_on(listener: &TcpListener, read_timeout: Option<Duration>) -> Result<Self> {
        let (stream, _) = listener.accept()?;
        Self::from_stream(stream, read_timeout)
    }

    fn from_stream(stream: TcpStream, read_timeout: Option<Duration>) -> Result<Self> {
        stream.set_read_timeout(read_timeout)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        info!("Connected to {}", peer);
        Ok(Self { stream, peer })
    }

    /// Address of the device.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Change how long a single receive may wait before a poll gives up.
    pub fn set_read_timeout(&self, read_timeout: Option<Duration>) -> Result<()> {
        Ok(self.stream.set_read_timeout(read_timeout)?)
    }

    /// Write a whole frame.
    pub fn send_frame(&mut self, frame: &ConfigFrame) -> Result<()> {
        debug!("Sending {} to {}", frame, self.peer);
        self.stream.write_all(frame.as_bytes())?;
        self.stream.flush()?;
        Ok(())
    }

    /// A block reader over a second handle to the same socket.
    pub fn reader(&self) -> Result<BlockReader<TcpStream>> {
        Ok(BlockReader::new(self.stream.try_clone()?))
    }

    /// Close both directions. Closing an already dead socket is not an error.
    pub fn shutdown(&self) -> Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => Ok(other?),
        }
    }
}
