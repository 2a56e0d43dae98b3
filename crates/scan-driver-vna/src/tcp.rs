//! Raw SCPI socket transport.
//!
//! Most LAN-enabled analysers expose a raw SCPI socket (port 5025). Resource
//! strings are accepted in VISA socket form or as plain `host:port`:
//!
//! - `TCPIP0::192.168.0.10::5025::SOCKET`
//! - `192.168.0.10:5025`
//! - `192.168.0.10` (default port)
//!
//! HiSLIP and VXI-11 resources (`...::hislip0::INSTR`, `...::INSTR`) need a
//! VISA library and are rejected here; see the `instrument_visa` feature.

use async_trait::async_trait;
use scan_core::{BusTransport, ScanError, ScanResult};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Default raw SCPI socket port
pub const DEFAULT_PORT: u16 = 5025;

/// Connection establishment timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Host and port of a socket resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketAddress {
    /// Hostname or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

/// Parse a socket resource string.
pub fn parse_resource(resource: &str) -> ScanResult<SocketAddress> {
    let resource = resource.trim();
    let invalid = |why: &str| ScanError::connection(resource, why);

    if resource.to_ascii_uppercase().starts_with("TCPIP") {
        let parts: Vec<&str> = resource.split("::").collect();
        return match parts.as_slice() {
            [_, host, port, suffix] if suffix.eq_ignore_ascii_case("SOCKET") => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| invalid("invalid port in socket resource"))?;
                Ok(SocketAddress {
                    host: host.to_string(),
                    port,
                })
            }
            _ => Err(invalid(
                "only ::SOCKET resources are supported over a raw socket; use the visa driver",
            )),
        };
    }

    if resource.is_empty() {
        return Err(invalid("empty resource"));
    }

    match resource.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| invalid("invalid port in host:port resource"))?;
            Ok(SocketAddress {
                host: host.to_string(),
                port,
            })
        }
        None => Ok(SocketAddress {
            host: resource.to_string(),
            port: DEFAULT_PORT,
        }),
    }
}

/// Line-oriented transport over a TCP socket.
///
/// Bytes of an unfinished line are kept across calls, so a `read_line`
/// cancelled by a timeout resumes the same line instead of losing its head.
pub struct TcpTransport {
    resource: String,
    stream: Option<BufReader<TcpStream>>,
    partial: Vec<u8>,
}

impl TcpTransport {
    /// Connect to the instrument named by `resource`.
    ///
    /// # Errors
    /// [`ScanError::Connection`] if the resource is malformed, unreachable or
    /// does not accept the connection within [`CONNECT_TIMEOUT`].
    pub async fn connect(resource: &str) -> ScanResult<Self> {
        let address = parse_resource(resource)?;

        let stream = timeout(
            CONNECT_TIMEOUT,
            TcpStream::connect((address.host.as_str(), address.port)),
        )
        .await
        .map_err(|_| ScanError::connection(resource, "connection timed out"))?
        .map_err(|e| ScanError::connection(resource, e.to_string()))?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        tracing::info!(host = %address.host, port = address.port, "Connected to SCPI socket");

        Ok(Self {
            resource: resource.to_string(),
            stream: Some(BufReader::new(stream)),
            partial: Vec::new(),
        })
    }

    fn stream(&mut self) -> ScanResult<&mut BufReader<TcpStream>> {
        let resource = &self.resource;
        self.stream
            .as_mut()
            .ok_or_else(|| ScanError::connection(resource, "socket is closed"))
    }
}

#[async_trait]
impl BusTransport for TcpTransport {
    async fn write(&mut self, data: &[u8]) -> ScanResult<()> {
        let stream = self.stream()?;
        stream.get_mut().write_all(data).await?;
        stream.get_mut().flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> ScanResult<String> {
        let resource = &self.resource;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ScanError::connection(resource, "socket is closed"))?;

        // read_until appends to `partial` as bytes arrive
        let n = stream.read_until(b'\n', &mut self.partial).await?;
        if n == 0 || self.partial.last() != Some(&b'\n') {
            return Err(ScanError::connection(resource, "connection closed by instrument"));
        }

        let line = std::mem::take(&mut self.partial);
        String::from_utf8(line)
            .map_err(|e| ScanError::Decode(format!("reply is not valid UTF-8: {}", e)))
    }

    async fn clear(&mut self) -> ScanResult<()> {
        if !self.partial.is_empty() {
            tracing::debug!("Dropping {} bytes of an unfinished reply", self.partial.len());
            self.partial.clear();
        }
        let stream = self.stream()?;

        // Consume any data in BufReader's internal buffer
        let buffered = stream.buffer().len();
        if buffered > 0 {
            tracing::debug!("Flushing {} bytes from buffer", buffered);
            stream.consume(buffered);
        }

        // Drain whatever is already waiting on the socket
        let mut discard = [0u8; 256];
        loop {
            match stream.get_mut().try_read(&mut discard) {
                Ok(0) => break,
                Ok(n) => tracing::debug!("Flushed {} stale bytes from stream", n),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> ScanResult<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.get_mut().shutdown().await?;
        }
        Ok(())
    }

    fn resource(&self) -> &str {
        &self.resource
    }
}
