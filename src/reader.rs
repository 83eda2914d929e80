//! The reader task: sole consumer of the transport's read half.
//!
//! It decodes one frame at a time and hands each one to the dispatch
//! tables. A missing or corrupt frame just means "try again"; a transport
//! failure stops the loop, records the fault and cancels every waiter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::AsyncRead;
use tokio::task::JoinHandle;

use crate::dispatch::DispatchTables;
use crate::error::{Error, Result};
use crate::protocol::frame::read_frame;
use crate::transport::TransportBuffer;

/// Run flag and terminal fault shared between the reader and the driver.
#[derive(Debug)]
pub struct ReaderStatus {
    running: AtomicBool,
    fault: Mutex<Option<String>>,
}

impl Default for ReaderStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaderStatus {
    /// Creates a status in the running state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            fault: Mutex::new(None),
        }
    }

    /// Returns true while the reader should keep going.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Asks the reader to stop after its current read.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Returns the fault that stopped the reader, if any.
    #[must_use]
    pub fn fault(&self) -> Option<String> {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fails with [`Error::ReaderStopped`] once the reader has faulted.
    pub fn check(&self) -> Result<()> {
        match self.fault() {
            Some(reason) => Err(Error::ReaderStopped { reason }),
            None => Ok(()),
        }
    }

    fn record_fault(&self, reason: String) {
        self.running.store(false, Ordering::Release);
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
    }
}

/// Runs the read loop until stopped or the transport fails.
pub async fn run<R>(
    mut buffer: TransportBuffer<R>,
    tables: Arc<DispatchTables>,
    status: Arc<ReaderStatus>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    tracing::debug!("reader started");
    while status.is_running() {
        match read_frame(&mut buffer).await {
            Ok(Some(frame)) => {
                tracing::trace!("frame {} with {} payload bytes", frame.code, frame.payload.len());
                let outcome = tables.route(tables.classify(frame));
                tracing::trace!("routed: {:?}", outcome);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!("reader stopped: {}", e);
                status.record_fault(e.to_string());
                tables.cancel_all();
                return Err(e);
            }
        }
    }
    tracing::debug!("reader stopped on request");
    Ok(())
}

/// Spawns [`run`] on the current runtime.
pub fn spawn<R>(
    buffer: TransportBuffer<R>,
    tables: Arc<DispatchTables>,
    status: Arc<ReaderStatus>,
) -> JoinHandle<Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(run(buffer, tables, status))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::protocol::command::codes;
    use crate::protocol::frame::encode;
    use crate::protocol::wire::ByteOrder;

    #[tokio::test]
    async fn test_reader_routes_reply() {
        let (mut device, host) = tokio::io::duplex(1024);
        let tables = Arc::new(DispatchTables::new(ByteOrder::Little));
        let status = Arc::new(ReaderStatus::new());
        let handle = spawn(
            TransportBuffer::with_timeout(host, Duration::from_millis(20)),
            Arc::clone(&tables),
            Arc::clone(&status),
        );

        let correlator = tables.register_single_slot(codes::SYS_PING.sync_reply());
        device.write_all(&[0x00, 0xFF]).await.unwrap();
        device
            .write_all(&encode(codes::SYS_PING.sync_reply(), &[0x79, 0x01]).unwrap())
            .await
            .unwrap();

        let payload = correlator.wait(Duration::from_secs(2)).await.unwrap();
        assert_eq!(&payload.unwrap().into_bytes().unwrap()[..], &[0x79, 0x01]);

        status.stop();
        assert!(handle.await.unwrap().is_ok());
        assert!(status.fault().is_none());
    }

    #[tokio::test]
    async fn test_transport_failure_cancels_waiters() {
        let (device, host) = tokio::io::duplex(1024);
        let tables = Arc::new(DispatchTables::new(ByteOrder::Little));
        let status = Arc::new(ReaderStatus::new());
        let correlator = tables.register_single_slot(codes::SYS_PING.sync_reply());

        let handle = spawn(
            TransportBuffer::with_timeout(host, Duration::from_millis(20)),
            Arc::clone(&tables),
            Arc::clone(&status),
        );
        drop(device);

        assert!(matches!(handle.await.unwrap(), Err(Error::Transport(_))));
        assert!(!status.is_running());
        assert!(matches!(status.check(), Err(Error::ReaderStopped { .. })));
        assert!(matches!(
            correlator.wait(Duration::from_secs(1)).await,
            Err(Error::ShutDown)
        ));
    }
}
