//! VISA transport (feature `instrument_visa`).
//!
//! Reaches resources a raw socket cannot, such as HiSLIP
//! (`TCPIP::169.254.86.175::hislip0::INSTR`), VXI-11 and USBTMC, through the
//! system VISA library. VISA calls block, so each one runs on tokio's
//! blocking pool.
//!
//! A read abandoned by the session's timeout keeps running on its blocking
//! thread until VISA's own timeout fires; the following `clear` waits for it
//! and then drops whatever it delivered.

use async_trait::async_trait;
use parking_lot::Mutex;
use scan_core::{BusTransport, ScanError, ScanResult};
use std::ffi::CString;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use visa_rs::prelude::*;

/// Timeout for opening the VISA session
pub const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

const READ_CHUNK: usize = 4096;

struct VisaLink {
    // Instrument sessions close with their resource manager, so both live here.
    instrument: Option<Instrument>,
    manager: Option<DefaultRM>,
    pending: Vec<u8>,
}

impl VisaLink {
    fn read_line(&mut self, resource: &str) -> ScanResult<String> {
        loop {
            if let Some(line) = take_line(&mut self.pending) {
                return line;
            }
            let mut handle: &Instrument = self
                .instrument
                .as_ref()
                .ok_or_else(|| ScanError::connection(resource, "VISA session is closed"))?;
            let mut chunk = [0u8; READ_CHUNK];
            let n = handle.read(&mut chunk)?;
            if n == 0 {
                return Err(ScanError::connection(resource, "VISA read returned no data"));
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Split the first complete line (terminator included) off `pending`.
fn take_line(pending: &mut Vec<u8>) -> Option<ScanResult<String>> {
    let end = pending.iter().position(|&b| b == b'\n')?;
    let line: Vec<u8> = pending.drain(..=end).collect();
    Some(
        String::from_utf8(line)
            .map_err(|e| ScanError::Decode(format!("reply is not valid UTF-8: {}", e))),
    )
}

/// Line-oriented transport over a VISA session.
pub struct VisaTransport {
    resource: String,
    link: Arc<Mutex<VisaLink>>,
}

impl VisaTransport {
    /// Open `resource` through the default VISA resource manager.
    ///
    /// # Errors
    /// [`ScanError::Connection`] when no VISA library is installed or the
    /// resource cannot be opened within [`OPEN_TIMEOUT`].
    pub async fn open(resource: &str) -> ScanResult<Self> {
        let name = CString::new(resource)
            .map_err(|_| ScanError::connection(resource, "resource contains a NUL byte"))?;
        let owned = resource.to_string();

        let (manager, instrument) = tokio::task::spawn_blocking(move || {
            let manager = DefaultRM::new().map_err(|e| {
                ScanError::connection(&owned, format!("VISA resource manager unavailable: {}", e))
            })?;
            let instrument = manager
                .open(&name.into(), AccessMode::NO_LOCK, OPEN_TIMEOUT)
                .map_err(|e| ScanError::connection(&owned, e.to_string()))?;
            Ok::<_, ScanError>((manager, instrument))
        })
        .await
        .map_err(|e| ScanError::connection(resource, format!("VISA open task failed: {}", e)))??;

        tracing::info!(resource = %resource, "Opened VISA session");
        Ok(Self {
            resource: resource.to_string(),
            link: Arc::new(Mutex::new(VisaLink {
                instrument: Some(instrument),
                manager: Some(manager),
                pending: Vec::new(),
            })),
        })
    }

    async fn with_link<T, F>(&self, op: F) -> ScanResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut VisaLink, &str) -> ScanResult<T> + Send + 'static,
    {
        let link = Arc::clone(&self.link);
        let resource = self.resource.clone();
        tokio::task::spawn_blocking(move || op(&mut link.lock(), &resource))
            .await
            .map_err(|e| ScanError::connection(&self.resource, format!("VISA I/O task failed: {}", e)))?
    }
}

#[async_trait]
impl BusTransport for VisaTransport {
    async fn write(&mut self, data: &[u8]) -> ScanResult<()> {
        let data = data.to_vec();
        self.with_link(move |link, resource| {
            let instrument = link
                .instrument
                .as_mut()
                .ok_or_else(|| ScanError::connection(resource, "VISA session is closed"))?;
            instrument.write_all(&data)?;
            instrument.flush()?;
            Ok(())
        })
        .await
    }

    async fn read_line(&mut self) -> ScanResult<String> {
        self.with_link(|link, resource| link.read_line(resource)).await
    }

    async fn clear(&mut self) -> ScanResult<()> {
        self.with_link(|link, _| {
            if !link.pending.is_empty() {
                tracing::debug!("Dropping {} buffered VISA bytes", link.pending.len());
                link.pending.clear();
            }
            Ok(())
        })
        .await
    }

    async fn close(&mut self) -> ScanResult<()> {
        self.with_link(|link, _| {
            link.instrument.take();
            link.manager.take();
            link.pending.clear();
            Ok(())
        })
        .await
    }

    fn resource(&self) -> &str {
        &self.resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lines_and_keeps_the_tail() {
        let mut pending = b"+1\n1.5E+00,2.5E+00\n-3".to_vec();

        assert_eq!(take_line(&mut pending).unwrap().unwrap(), "+1\n");
        assert_eq!(take_line(&mut pending).unwrap().unwrap(), "1.5E+00,2.5E+00\n");
        assert!(take_line(&mut pending).is_none());
        assert_eq!(pending, b"-3");
    }

    #[test]
    fn invalid_utf8_is_a_decode_error() {
        let mut pending = vec![0xff, 0xfe, b'\n'];
        let err = take_line(&mut pending).unwrap().unwrap_err();
        assert!(matches!(err, ScanError::Decode(_)));
        assert!(pending.is_empty());
    }
}
