// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A minimal blocking SMTP client.
//!
//! Just enough of RFC 5321 to relay through the operator's smarthost:
//! HELO, MAIL FROM, RCPT TO, DATA with dot-stuffing, QUIT. Reply codes
//! map onto the pool's retry policy: socket trouble is a connection
//! error, 4xx is transient, 5xx is fatal.

use mixnode::{Mailer, SendError};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;
use tracing::{debug, warn};

const IO_TIMEOUT: Duration = Duration::from_secs(30);

struct Connection {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

/// Lazily-connected SMTP relay client.
pub struct SmtpClient {
    host: String,
    port: u16,
    helo_name: String,
    conn: Option<Connection>,
}

impl SmtpClient {
    pub fn new(host: &str, port: u16, helo_name: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            helo_name: helo_name.to_string(),
            conn: None,
        }
    }

    /// Close the session politely; errors on the way out are ignored.
    pub fn quit(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.stream.write_all(b"QUIT\r\n");
            debug!("SMTP session closed");
        }
    }

    fn connect(&mut self) -> Result<&mut Connection, SendError> {
        if self.conn.is_none() {
            let stream = TcpStream::connect((self.host.as_str(), self.port))
                .map_err(|e| SendError::connection(format!("{}:{}: {}", self.host, self.port, e)))?;
            stream
                .set_read_timeout(Some(IO_TIMEOUT))
                .and_then(|_| stream.set_write_timeout(Some(IO_TIMEOUT)))
                .map_err(|e| SendError::connection(e.to_string()))?;
            let reader = BufReader::new(
                stream
                    .try_clone()
                    .map_err(|e| SendError::connection(e.to_string()))?,
            );
            let mut conn = Connection { stream, reader };

            let (code, line) = read_reply(&mut conn)?;
            if code != 220 {
                return Err(SendError::connection(format!("greeting: {} {}", code, line)));
            }
            command(&mut conn, &format!("HELO {}", self.helo_name), 250)
                .map_err(|e| SendError::connection(e.detail))?;
            debug!("SMTP session open to {}:{}", self.host, self.port);
            self.conn = Some(conn);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| SendError::connection("no session"))
    }

    /// Drop the session after a socket-level failure so the next send
    /// starts clean.
    fn reset_on_connection_error(&mut self, err: &SendError) {
        if matches!(err.kind, mixnode::SendErrorKind::Connection) {
            self.conn = None;
        }
    }
}

impl Mailer for SmtpClient {
    fn sendmail(&mut self, from: &str, to: &str, message: &str) -> Result<(), SendError> {
        let result = (|| {
            let conn = self.connect()?;
            command(conn, &format!("MAIL FROM:<{}>", from), 250)?;
            if let Err(e) = command(conn, &format!("RCPT TO:<{}>", to), 250) {
                // Reset the transaction so the session stays usable for
                // the rest of the pool slice.
                let _ = command(conn, "RSET", 250);
                return Err(e);
            }
            command(conn, "DATA", 354)?;
            write_data(conn, message)?;
            let (code, line) = read_reply(conn)?;
            classify(code, &line)
        })();
        if let Err(ref e) = result {
            self.reset_on_connection_error(e);
            warn!("sendmail to {} failed: {}", to, e);
        }
        result
    }
}

fn command(conn: &mut Connection, line: &str, want: u16) -> Result<(), SendError> {
    conn.stream
        .write_all(format!("{}\r\n", line).as_bytes())
        .map_err(|e| SendError::connection(e.to_string()))?;
    let (code, text) = read_reply(conn)?;
    if code == want {
        Ok(())
    } else {
        classify(code, &text)
    }
}

/// Map a non-success reply code to the retry policy.
fn classify(code: u16, text: &str) -> Result<(), SendError> {
    match code {
        200..=399 => Ok(()),
        400..=499 => Err(SendError::transient(format!("{} {}", code, text))),
        _ => Err(SendError::fatal(format!("{} {}", code, text))),
    }
}

/// Read one (possibly multiline) SMTP reply.
fn read_reply(conn: &mut Connection) -> Result<(u16, String), SendError> {
    let mut last = String::new();
    loop {
        let mut line = String::new();
        let n = conn
            .reader
            .read_line(&mut line)
            .map_err(|e| SendError::connection(e.to_string()))?;
        if n == 0 {
            return Err(SendError::connection("server closed the connection"));
        }
        let line = line.trim_end().to_string();
        if line.len() < 4 {
            return Err(SendError::connection(format!("short reply: {:?}", line)));
        }
        let code: u16 = line[..3]
            .parse()
            .map_err(|_| SendError::connection(format!("unparseable reply: {:?}", line)))?;
        let cont = line.as_bytes()[3] == b'-';
        last = line[4..].to_string();
        if !cont {
            return Ok((code, last));
        }
    }
}

/// Send the DATA body with dot-stuffing and CRLF line endings.
fn write_data(conn: &mut Connection, message: &str) -> Result<(), SendError> {
    let mut out = String::with_capacity(message.len() + 64);
    for line in message.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    out.push_str(".\r\n");
    conn.stream
        .write_all(out.as_bytes())
        .map_err(|e| SendError::connection(e.to_string()))
}
