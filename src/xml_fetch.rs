//! Bounded-memory accumulation for description/SCPD/SOAP-reply bodies.
//!
//! Every HTTP response this crate parses as XML is read through
//! `bytes_stream()` into a capped buffer instead of `.text()`, so a peer
//! that serves an oversized document can't exhaust memory; the existing
//! slice-based [`crate::FromXml`] readers then parse the buffer in one
//! pass the same way they always have.

use axum::body::Bytes;
use tokio_stream::{Stream, StreamExt};

/// Device/SCPD/SOAP documents are a handful of KB; this caps a single
/// response well above any reasonable one while still bounding a
/// misbehaving or hostile peer's ability to grow the buffer unchecked.
pub(crate) const MAX_XML_BODY_BYTES: usize = 4 * 1024 * 1024;

pub(crate) async fn read_body_bounded(response: reqwest::Response) -> anyhow::Result<Vec<u8>> {
    accumulate_bounded(response.bytes_stream(), MAX_XML_BODY_BYTES).await
}

async fn accumulate_bounded<S, E>(mut stream: S, max_bytes: usize) -> anyhow::Result<Vec<u8>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        anyhow::ensure!(
            buf.len() + chunk.len() <= max_bytes,
            "xml response body exceeded {max_bytes} byte cap"
        );
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NeverErr;

    impl std::fmt::Display for NeverErr {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "never")
        }
    }

    impl std::error::Error for NeverErr {}

    #[tokio::test]
    async fn accumulates_chunks_in_order() {
        let chunks: Vec<Result<Bytes, NeverErr>> = vec![
            Ok(Bytes::from_static(b"<a>")),
            Ok(Bytes::from_static(b"b</a>")),
        ];
        let body = accumulate_bounded(tokio_stream::iter(chunks), 1024)
            .await
            .unwrap();
        assert_eq!(body, b"<a>b</a>");
    }

    #[tokio::test]
    async fn rejects_body_over_cap() {
        let chunks: Vec<Result<Bytes, NeverErr>> = vec![Ok(Bytes::from_static(b"0123456789"))];
        let err = accumulate_bounded(tokio_stream::iter(chunks), 4)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exceeded"));
    }
}
