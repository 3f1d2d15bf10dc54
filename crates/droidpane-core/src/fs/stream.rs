//! Cancellable byte streaming and progress throttling.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreResult};
use crate::fs::backend::ProgressFn;

/// Default buffer size for streamed copies.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Rate limiter for progress updates.
///
/// [`Throttle::ready`] returns `true` at most once per interval; the first
/// call always passes.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// Returns `true` when an update may be emitted now.
    pub fn ready(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock();
        match *last {
            Some(prev) if now.duration_since(prev) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// Copies `reader` into `writer` chunk by chunk.
///
/// Cancellation is polled before every chunk and while a read is pending.
/// `progress` receives the cumulative byte count after each chunk; callers
/// wrap it in a [`Throttle`] when forwarding to the UI. Returns the number
/// of bytes copied.
pub async fn copy_stream<R, W>(
    reader: &mut R,
    writer: &mut W,
    chunk_size: usize,
    cancel: &CancellationToken,
    progress: ProgressFn<'_>,
) -> CoreResult<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut copied = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
            read = reader.read(&mut buf) => read?,
        };
        if n == 0 {
            break;
        }

        writer.write_all(&buf[..n]).await?;
        copied += n as u64;
        progress(copied);
    }

    writer.flush().await?;
    writer.shutdown().await?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn throttle_first_call_passes() {
        let throttle = Throttle::new(Duration::from_secs(60));
        assert!(throttle.ready());
        assert!(!throttle.ready());
    }

    #[test]
    fn zero_interval_always_passes() {
        let throttle = Throttle::new(Duration::ZERO);
        assert!(throttle.ready());
        assert!(throttle.ready());
    }

    #[tokio::test]
    async fn copies_all_bytes_and_reports_progress() {
        let data = vec![7u8; 10_000];
        let mut reader: &[u8] = &data;
        let mut out: Vec<u8> = Vec::new();
        let seen = AtomicU64::new(0);
        let cancel = CancellationToken::new();

        let copied = copy_stream(&mut reader, &mut out, 4096, &cancel, &|n| {
            seen.store(n, Ordering::SeqCst);
        })
        .await
        .unwrap();

        assert_eq!(copied, 10_000);
        assert_eq!(out, data);
        assert_eq!(seen.load(Ordering::SeqCst), 10_000);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_chunk() {
        let data = vec![1u8; 100];
        let mut reader: &[u8] = &data;
        let mut out: Vec<u8> = Vec::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = copy_stream(&mut reader, &mut out, 16, &cancel, &|_| {}).await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
        assert!(out.is_empty());
    }
}
