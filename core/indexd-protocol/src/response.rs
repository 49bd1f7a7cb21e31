//! Response framing: magic token, `key: value` headers, blank line, optional
//! body terminated by a second blank line.

use std::fmt::Display;
use std::io::BufRead;

use crate::{
    read_line, ErrorCode, ProtocolError, HEADER_CMD, HEADER_DESC, HEADER_ERROR,
    HEADER_ERROR_CMD, HEADER_LEN, HEADER_STATUS, MAGIC,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    headers: Vec<(String, String)>,
    body: Vec<String>,
}

impl Response {
    /// Successful response: `cmd: <command>` and `status: 0`.
    pub fn ok(command: impl Display) -> Self {
        Self::default()
            .with_header(HEADER_CMD, command)
            .with_header(HEADER_STATUS, 0)
    }

    pub fn error(command: impl Display, code: ErrorCode, desc: impl Display) -> Self {
        Self::default()
            .with_header(HEADER_ERROR_CMD, command)
            .with_header(HEADER_STATUS, code.status())
            .with_header(HEADER_ERROR, code.label())
            .with_header(HEADER_DESC, desc)
    }

    pub fn with_header(mut self, key: &str, value: impl Display) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    /// Attaches a body and the matching `len` header.
    pub fn with_body(mut self, lines: Vec<String>) -> Self {
        self.headers
            .push((HEADER_LEN.to_string(), lines.len().to_string()));
        self.body = lines;
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &[String] {
        &self.body
    }

    pub fn status(&self) -> Option<u8> {
        self.header(HEADER_STATUS)?.parse().ok()
    }

    pub fn is_error(&self) -> bool {
        self.header(HEADER_ERROR_CMD).is_some()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.body.iter().map(String::len).sum::<usize>());
        out.extend_from_slice(MAGIC);
        for (key, value) in &self.headers {
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(single_line(value).as_bytes());
            out.push(b'\n');
        }
        out.push(b'\n');

        if !self.body.is_empty() {
            for line in &self.body {
                out.extend_from_slice(single_line(line).as_bytes());
                out.push(b'\n');
            }
            out.push(b'\n');
        }
        out
    }

    /// Reads one complete response, magic token included.
    pub fn read_from<R: BufRead>(reader: &mut R) -> Result<Self, ProtocolError> {
        let mut magic = [0u8; MAGIC.len()];
        reader.read_exact(&mut magic).map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                ProtocolError::UnexpectedEof
            } else {
                ProtocolError::Io(err)
            }
        })?;
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic {
                expected: String::from_utf8_lossy(MAGIC).into_owned(),
                got: String::from_utf8_lossy(&magic).into_owned(),
            });
        }

        let mut response = Self::default();
        loop {
            let line = read_line(reader)?.ok_or(ProtocolError::UnexpectedEof)?;
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                break;
            }
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;
            let value = value.strip_prefix(' ').unwrap_or(value);
            response.headers.push((key.to_string(), value.to_string()));
        }

        let body_len = match response.header(HEADER_LEN) {
            Some(value) => value
                .parse::<usize>()
                .map_err(|_| ProtocolError::MalformedHeader(format!("{HEADER_LEN}: {value}")))?,
            None => 0,
        };
        if body_len == 0 {
            return Ok(response);
        }

        for _ in 0..body_len {
            let line = read_line(reader)?.ok_or(ProtocolError::UnexpectedEof)?;
            response
                .body
                .push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        let terminator = read_line(reader)?.ok_or(ProtocolError::UnexpectedEof)?;
        if !terminator.trim_end_matches(['\n', '\r']).is_empty() {
            return Err(ProtocolError::MissingTerminator);
        }
        Ok(response)
    }
}

fn single_line(value: &str) -> std::borrow::Cow<'_, str> {
    if value.contains(['\n', '\r']) {
        std::borrow::Cow::Owned(value.replace(['\n', '\r'], " "))
    } else {
        std::borrow::Cow::Borrowed(value)
    }
}
