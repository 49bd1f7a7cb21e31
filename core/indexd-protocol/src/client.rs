//! Blocking client for the indexd socket.
//!
//! One `Client` is one session: filters and language set through it stay in
//! effect until it is dropped.

use std::io::{BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use crate::{Command, ProtocolError, Request, Response, MAGIC};

pub struct Client {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl Client {
    /// Connects and sends the connection-opening magic token.
    pub fn connect(socket: &Path) -> Result<Self, ProtocolError> {
        let mut writer = UnixStream::connect(socket)?;
        writer.write_all(MAGIC)?;
        writer.flush()?;
        let reader = BufReader::new(writer.try_clone()?);
        Ok(Self { reader, writer })
    }

    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), ProtocolError> {
        self.writer.set_read_timeout(timeout)?;
        self.writer.set_write_timeout(timeout)?;
        Ok(())
    }

    /// Sends one request and waits for its response.
    pub fn send(&mut self, request: &Request) -> Result<Response, ProtocolError> {
        tracing::debug!(command = %request.command, "Sending indexd request");
        self.writer.write_all(request.encode().as_bytes())?;
        self.writer.flush()?;
        Response::read_from(&mut self.reader)
    }

    /// Writes raw bytes and reads one response, for callers that build their
    /// own request lines.
    pub fn send_raw(&mut self, payload: &[u8]) -> Result<Response, ProtocolError> {
        self.writer.write_all(payload)?;
        self.writer.flush()?;
        Response::read_from(&mut self.reader)
    }

    pub fn list(&mut self) -> Result<Response, ProtocolError> {
        self.send(&Request::new(Command::List))
    }

    pub fn command(&mut self, command: &str) -> Result<Response, ProtocolError> {
        self.send(&Request::new(Command::parse(command)))
    }

    pub fn command_with(
        &mut self,
        command: &str,
        argument: impl Into<String>,
    ) -> Result<Response, ProtocolError> {
        self.send(&Request::with_argument(Command::parse(command), argument))
    }
}
