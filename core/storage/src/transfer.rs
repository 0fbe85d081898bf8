//! Streaming transfer helpers over an `object_store` client.
//!
//! Backends keep their own client and bucket; these functions only move
//! bytes and translate client errors into the common taxonomy.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use object_store::{path::Path, ObjectStore, PutPayload, WriteMultipart};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use cosi_common::{Error, ObjectKey, Operation, Result, TransportKind};

use crate::provider::{ByteSink, ByteStream};

/// Part size for multipart uploads. Uploads up to this size are sent whole.
pub(crate) const PART_SIZE: usize = 5 * 1024 * 1024;

/// Parts allowed in flight during a multipart upload.
const MAX_CONCURRENT_PARTS: usize = 4;

/// How strictly an upload honors its declared size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LengthPolicy {
    /// The stream must yield exactly the declared number of bytes.
    Exact,
    /// The declared size only sizes the first buffer.
    Hint,
}

/// Map an object key onto a store path.
pub(crate) fn object_path(key: &ObjectKey) -> Result<Path> {
    Path::parse(key.as_str())
        .map_err(|e| Error::InvalidInput(format!("Invalid object key '{}': {}", key, e)))
}

/// Wrap a client error with the operation context.
pub(crate) fn transport_error(
    backend: &str,
    operation: Operation,
    key: &ObjectKey,
    err: object_store::Error,
) -> Error {
    let kind = match &err {
        object_store::Error::NotFound { .. } => TransportKind::NotFound,
        object_store::Error::PermissionDenied { .. } => TransportKind::PermissionDenied,
        object_store::Error::Unauthenticated { .. } => TransportKind::Unauthenticated,
        _ => TransportKind::Other,
    };

    Error::Transport {
        backend: backend.to_string(),
        operation,
        key: key.to_string(),
        kind,
        message: err.to_string(),
    }
}

fn size_mismatch(key: &ObjectKey, declared: u64, actual: u64) -> Error {
    Error::SizeMismatch {
        key: key.to_string(),
        declared,
        actual,
    }
}

/// Upload a stream, switching to multipart once it outgrows one part.
pub(crate) async fn upload(
    store: &dyn ObjectStore,
    backend: &str,
    key: &ObjectKey,
    mut data: ByteStream,
    size: u64,
    policy: LengthPolicy,
) -> Result<()> {
    let path = object_path(key)?;
    let initial = usize::try_from(size).unwrap_or(PART_SIZE).min(PART_SIZE);
    let mut buffer = BytesMut::with_capacity(initial);
    let mut received = 0u64;

    while let Some(chunk) = data.next().await {
        let chunk = chunk?;
        received += chunk.len() as u64;
        if policy == LengthPolicy::Exact && received > size {
            return Err(size_mismatch(key, size, received));
        }
        buffer.extend_from_slice(&chunk);

        if buffer.len() > PART_SIZE {
            let head = buffer.freeze();
            return upload_multipart(store, backend, key, &path, head, data, received, size, policy)
                .await;
        }
    }

    if policy == LengthPolicy::Exact && received != size {
        return Err(size_mismatch(key, size, received));
    }

    store
        .put(&path, PutPayload::from(buffer.freeze()))
        .await
        .map_err(|e| transport_error(backend, Operation::Put, key, e))?;

    debug!("{} uploaded {} bytes to '{}' in one request", backend, received, key);
    Ok(())
}

/// A multipart upload that has been started but not completed.
///
/// Dropping it before `finish` or `abort` (e.g. when a cancelled context
/// drops the upload future) aborts the upload on a background task, so the
/// remote side does not keep the uploaded parts.
struct PendingMultipart {
    key: String,
    writer: Option<WriteMultipart>,
}

impl PendingMultipart {
    fn new(key: &ObjectKey, writer: WriteMultipart) -> Self {
        Self {
            key: key.to_string(),
            writer: Some(writer),
        }
    }

    async fn put(&mut self, chunk: Bytes) -> object_store::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.wait_for_capacity(MAX_CONCURRENT_PARTS).await?;
            writer.put(chunk);
        }
        Ok(())
    }

    async fn finish(mut self) -> object_store::Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finish().await?;
        }
        Ok(())
    }

    async fn abort(mut self) -> object_store::Result<()> {
        match self.writer.take() {
            Some(writer) => writer.abort().await,
            None => Ok(()),
        }
    }
}

impl Drop for PendingMultipart {
    fn drop(&mut self) {
        let Some(writer) = self.writer.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Multipart upload of '{}' interrupted, aborting", self.key);
                let key = std::mem::take(&mut self.key);
                handle.spawn(async move {
                    if let Err(e) = writer.abort().await {
                        warn!("Failed to abort multipart upload of '{}': {}", key, e);
                    }
                });
            }
            Err(_) => warn!(
                "Multipart upload of '{}' dropped outside a runtime and left open",
                self.key
            ),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn upload_multipart(
    store: &dyn ObjectStore,
    backend: &str,
    key: &ObjectKey,
    path: &Path,
    head: Bytes,
    mut data: ByteStream,
    mut received: u64,
    size: u64,
    policy: LengthPolicy,
) -> Result<()> {
    let upload = store
        .put_multipart(path)
        .await
        .map_err(|e| transport_error(backend, Operation::Put, key, e))?;

    let mut pending =
        PendingMultipart::new(key, WriteMultipart::new_with_chunk_size(upload, PART_SIZE));

    let streamed = async {
        pending
            .put(head)
            .await
            .map_err(|e| transport_error(backend, Operation::Put, key, e))?;

        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            received += chunk.len() as u64;
            if policy == LengthPolicy::Exact && received > size {
                return Err(size_mismatch(key, size, received));
            }
            pending
                .put(chunk)
                .await
                .map_err(|e| transport_error(backend, Operation::Put, key, e))?;
        }

        if policy == LengthPolicy::Exact && received != size {
            return Err(size_mismatch(key, size, received));
        }
        Ok::<(), Error>(())
    }
    .await;

    match streamed {
        Ok(()) => {
            pending
                .finish()
                .await
                .map_err(|e| transport_error(backend, Operation::Put, key, e))?;
            debug!("{} uploaded {} bytes to '{}' in parts", backend, received, key);
            Ok(())
        }
        Err(err) => {
            warn!("Aborting multipart upload of '{}': {}", key, err);
            if let Err(abort_err) = pending.abort().await {
                warn!("Failed to abort multipart upload of '{}': {}", key, abort_err);
            }
            Err(err)
        }
    }
}

/// Stream an object into `sink`, returning the bytes written.
pub(crate) async fn download(
    store: &dyn ObjectStore,
    backend: &str,
    key: &ObjectKey,
    sink: ByteSink<'_>,
) -> Result<u64> {
    let path = object_path(key)?;
    let result = store
        .get(&path)
        .await
        .map_err(|e| transport_error(backend, Operation::Get, key, e))?;

    let mut stream = result.into_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| transport_error(backend, Operation::Get, key, e))?;
        sink.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    sink.flush().await?;

    debug!("{} downloaded {} bytes from '{}'", backend, written, key);
    Ok(written)
}

/// Delete an object.
pub(crate) async fn remove(store: &dyn ObjectStore, backend: &str, key: &ObjectKey) -> Result<()> {
    let path = object_path(key)?;
    store
        .delete(&path)
        .await
        .map_err(|e| transport_error(backend, Operation::Delete, key, e))?;

    debug!("{} deleted '{}'", backend, key);
    Ok(())
}
