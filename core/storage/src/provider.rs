//! Object backend trait definition.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::io::ReaderStream;

use cosi_common::{Error, ObjectKey, Result};

use crate::context::OpContext;

/// Byte stream type for uploads.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Sink that downloads are written into.
pub type ByteSink<'a> = &'a mut (dyn AsyncWrite + Unpin + Send);

/// Uniform object storage interface implemented by every backend.
///
/// Implementations own one client handle and one bucket name, and are safe
/// to share between tasks. Nothing is retried here; retry policy belongs to
/// the caller or the wrapped client.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Get the backend name (e.g., "s3", "azure").
    fn name(&self) -> &str;

    /// Bucket or container this backend operates on.
    fn bucket(&self) -> &str;

    /// Upload `data` under `key`, replacing any existing object.
    ///
    /// # Preconditions
    /// - `size` is the number of bytes `data` will yield. Backends that sign
    ///   a declared length require it to be exact; others treat it as a hint.
    ///
    /// # Postconditions
    /// - On success exactly one remote object exists under `key`
    /// - On failure no new object is committed
    ///
    /// # Errors
    /// - `SizeMismatch` when a length-exact backend sees more or fewer bytes
    /// - `Transport` when the remote service or network fails
    /// - `Cancelled` when `ctx` fires
    async fn put(&self, ctx: &OpContext, key: &ObjectKey, data: ByteStream, size: u64)
        -> Result<()>;

    /// Stream the object `key` into `sink`, returning the bytes written.
    ///
    /// Bytes already written to `sink` stay there if the call fails.
    ///
    /// # Errors
    /// - `Transport` with kind `NotFound` when the object does not exist
    /// - `Transport` or `Io` on failures mid-stream
    /// - `Cancelled` when `ctx` fires
    async fn get(&self, ctx: &OpContext, key: &ObjectKey, sink: ByteSink<'_>) -> Result<u64>;

    /// Delete the object `key`.
    ///
    /// Whether deleting a missing key succeeds is backend-defined.
    async fn delete(&self, ctx: &OpContext, key: &ObjectKey) -> Result<()>;
}

/// Build an upload stream from an in-memory buffer.
pub fn stream_from_bytes(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    if data.is_empty() {
        Box::pin(stream::empty::<Result<Bytes>>())
    } else {
        Box::pin(stream::once(async move { Ok(data) }))
    }
}

/// Build an upload stream from an async reader such as a file.
pub fn stream_from_reader<R>(reader: R) -> ByteStream
where
    R: AsyncRead + Send + 'static,
{
    Box::pin(ReaderStream::new(reader).map(|chunk| chunk.map_err(Error::from)))
}
