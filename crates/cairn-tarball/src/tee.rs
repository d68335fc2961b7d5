use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use cairn_common::CancelToken;
use cairn_storage::TarballWriter;
use futures::AsyncRead;

/// Streams bytes from an upstream tarball fetch to the caller while
/// write-through-caching the same bytes locally (§4.5 step 3f). Modeled on
/// the "wrap the inner reader, do a side effect per chunk" shape used for
/// integrity-checking a tarball stream, generalized so the side effect is
/// itself a cache write rather than a hash update.
///
/// The cache is strictly write-through: every byte reaches the caller
/// straight from `inner`, never from the write side.
pub struct TeeReader {
    inner: Box<dyn AsyncRead + Unpin + Send>,
    writer: Option<Box<dyn TarballWriter>>,
    /// The most recently read chunk, staged for the writer before the next
    /// pull from `inner`.
    pending: Option<(Vec<u8>, usize)>,
    cancel: CancelToken,
}

impl TeeReader {
    pub fn new(
        inner: Box<dyn AsyncRead + Unpin + Send>,
        writer: Option<Box<dyn TarballWriter>>,
        cancel: CancelToken,
    ) -> Self {
        TeeReader {
            inner,
            writer,
            pending: None,
            cancel,
        }
    }

    fn abort_writer(&mut self) {
        if let Some(writer) = self.writer.take() {
            async_std::task::spawn(async move {
                if let Err(e) = writer.abort().await {
                    tracing::warn!("failed to clean up cache staging file: {e}");
                }
            });
        }
    }

    fn finish_writer(&mut self) {
        if let Some(writer) = self.writer.take() {
            async_std::task::spawn(async move {
                if let Err(e) = writer.commit().await {
                    tracing::warn!("failed to finalize cached tarball: {e}");
                }
            });
        }
    }
}

impl Drop for TeeReader {
    fn drop(&mut self) {
        // Any reader dropped before EOF was cancelled one way or another
        // (explicit token, or the caller simply going away) — the staging
        // file must not survive it (§5, P6).
        self.abort_writer();
    }
}

impl AsyncRead for TeeReader {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, out: &mut [u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if this.cancel.is_cancelled() {
            this.abort_writer();
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::Interrupted, "cancelled")));
        }

        if let Some((buf, offset)) = this.pending.as_mut() {
            if let Some(writer) = this.writer.as_mut() {
                while *offset < buf.len() {
                    match Pin::new(writer.as_mut()).poll_write(cx, &buf[*offset..]) {
                        Poll::Ready(Ok(n)) if n > 0 => *offset += n,
                        Poll::Ready(Ok(_)) | Poll::Ready(Err(_)) => {
                            this.abort_writer();
                            break;
                        }
                        Poll::Pending => return Poll::Pending,
                    }
                }
            }
            this.pending = None;
        }

        match Pin::new(&mut this.inner).poll_read(cx, out) {
            Poll::Ready(Ok(0)) => {
                this.finish_writer();
                Poll::Ready(Ok(0))
            }
            Poll::Ready(Ok(amt)) => {
                if this.writer.is_some() {
                    this.pending = Some((out[..amt].to_vec(), 0));
                }
                Poll::Ready(Ok(amt))
            }
            Poll::Ready(Err(e)) => {
                this.abort_writer();
                Poll::Ready(Err(e))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
