//! Framed connection handling: one length-prefixed request per connection,
//! one response document, then close.
//!
//! Frame format: ASCII decimal byte count, a single `\n`, then exactly that
//! many bytes of UTF-8 payload. The response is the document bytes followed
//! by `\n`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::router::Router;
use crate::protocol::error_document;

#[derive(Debug, thiserror::Error)]
enum FrameError {
    #[error("read timed out")]
    Timeout,

    #[error("invalid length prefix: {0:?}")]
    BadLength(String),

    #[error("frame exceeds {0} bytes")]
    TooLarge(usize),

    #[error("payload is not valid UTF-8")]
    NotUtf8,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct ConnectionHandler {
    router: Arc<Router>,
    read_timeout: Duration,
    max_frame_bytes: usize,
}

impl ConnectionHandler {
    pub fn new(router: Arc<Router>, read_timeout_secs: u64, max_frame_bytes: usize) -> Self {
        Self {
            router,
            read_timeout: Duration::from_secs(read_timeout_secs),
            max_frame_bytes,
        }
    }

    pub async fn handle(&self, mut stream: TcpStream, peer: SocketAddr) {
        let (read_half, mut write_half) = stream.split();
        let mut reader = BufReader::new(read_half);

        let payload =
            match read_frame(&mut reader, self.read_timeout, self.max_frame_bytes).await {
                Ok(payload) => payload,
                Err(e @ (FrameError::Timeout | FrameError::Io(_))) => {
                    // Nothing sensible to answer; drop without a response.
                    debug!(%peer, "dropping connection: {e}");
                    return;
                }
                Err(e) => {
                    warn!(%peer, "bad frame: {e}");
                    let doc = error_document(&e.to_string());
                    let _ = write_response(&mut write_half, &doc).await;
                    return;
                }
            };

        debug!(%peer, bytes = payload.len(), "request received");
        let response = self.router.dispatch(&payload).await;

        if let Err(e) = write_response(&mut write_half, &response).await {
            debug!(%peer, "failed to write response: {e}");
        }
    }
}

async fn read_frame<R>(
    reader: &mut R,
    read_timeout: Duration,
    max_frame_bytes: usize,
) -> Result<String, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = timeout(read_timeout, reader.read_line(&mut line))
        .await
        .map_err(|_| FrameError::Timeout)??;
    if n == 0 {
        return Err(FrameError::BadLength(String::new()));
    }

    let announced: usize = line
        .trim()
        .parse()
        .map_err(|_| FrameError::BadLength(line.trim().to_string()))?;
    if announced > max_frame_bytes {
        return Err(FrameError::TooLarge(max_frame_bytes));
    }

    // read_exact drains partial reads until the announced count arrives or
    // the peer closes (surfacing UnexpectedEof).
    let mut payload = vec![0u8; announced];
    timeout(read_timeout, reader.read_exact(&mut payload))
        .await
        .map_err(|_| FrameError::Timeout)??;

    String::from_utf8(payload).map_err(|_| FrameError::NotUtf8)
}

async fn write_response<W>(writer: &mut W, document: &str) -> std::io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    writer.write_all(document.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    const TIMEOUT: Duration = Duration::from_secs(1);

    async fn read_from(bytes: &[u8]) -> Result<String, FrameError> {
        let mut reader = BufReader::new(bytes);
        read_frame(&mut reader, TIMEOUT, 1024).await
    }

    #[tokio::test]
    async fn reads_a_well_formed_frame() {
        let payload = assert_ok!(read_from(b"9\n<create/>").await);
        assert_eq!(payload, "<create/>");
    }

    #[tokio::test]
    async fn trailing_bytes_beyond_the_count_are_ignored() {
        let payload = read_from(b"4\nabcdEXTRA").await.unwrap();
        assert_eq!(payload, "abcd");
    }

    #[tokio::test]
    async fn rejects_a_non_numeric_length() {
        assert!(matches!(
            read_from(b"abc\nxyz").await,
            Err(FrameError::BadLength(_))
        ));
    }

    #[tokio::test]
    async fn rejects_an_oversized_announcement() {
        assert!(matches!(
            read_from(b"99999\nx").await,
            Err(FrameError::TooLarge(_))
        ));
    }

    #[tokio::test]
    async fn short_payload_surfaces_as_io_error() {
        assert!(matches!(
            read_from(b"10\nabc").await,
            Err(FrameError::Io(_))
        ));
    }

    #[tokio::test]
    async fn empty_stream_is_a_bad_frame() {
        assert!(matches!(
            read_from(b"").await,
            Err(FrameError::BadLength(_))
        ));
    }
}
