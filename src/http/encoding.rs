//! Request body decoding for the Git service endpoints.
//!
//! Git gzips large upload-pack negotiation bodies.  Those are inflated on the
//! blocking pool as they arrive and handed to the bridge chunk by chunk;
//! uncompressed bodies stream straight through.

use std::io::{self, Read};

use axum::body::Body;
use axum::http::{header, HeaderMap};
use bytes::Bytes;
use flate2::read::GzDecoder;
use futures::{stream, StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::debug;

use super::handler::AppError;
use crate::git::RequestBody;

/// Largest inflated body accepted.
const MAX_INFLATED_BODY: u64 = 256 * 1024 * 1024;
const INFLATE_CHUNK: usize = 64 * 1024;
const CHANNEL_DEPTH: usize = 4;

/// Wrap `body` according to its `Content-Encoding`.
///
/// Call this only once the request has been authorized: a gzip body starts
/// inflating as soon as this returns.
pub async fn request_body(headers: &HeaderMap, body: Body) -> Result<RequestBody, AppError> {
    let encoding = match headers.get(header::CONTENT_ENCODING) {
        None => None,
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| AppError::UnsupportedMediaType("unreadable Content-Encoding".into()))?
                .trim()
                .to_ascii_lowercase(),
        ),
    };

    match encoding.as_deref() {
        None | Some("") | Some("identity") => Ok(passthrough(body)),
        Some("gzip") | Some("x-gzip") => inflate_body(body).await,
        Some(other) => Err(AppError::UnsupportedMediaType(format!(
            "unsupported Content-Encoding: {other}"
        ))),
    }
}

/// The `Content-Encoding` is one this module can decode.
pub fn is_supported_encoding(headers: &HeaderMap) -> bool {
    match headers.get(header::CONTENT_ENCODING).map(|v| v.to_str()) {
        None => true,
        Some(Ok(v)) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "" | "identity" | "gzip" | "x-gzip"
        ),
        Some(Err(_)) => false,
    }
}

fn passthrough(body: Body) -> RequestBody {
    body.into_data_stream().map_err(io::Error::other).boxed()
}

/// Inflate `body` incrementally.
///
/// The first inflated chunk is awaited before returning so that a body that
/// is not gzip at all is reported as a bad request rather than as a
/// truncated stream.
async fn inflate_body(body: Body) -> Result<RequestBody, AppError> {
    let reader = StreamReader::new(passthrough(body));
    let bridge = SyncIoBridge::new(reader);
    let (tx, mut rx) = mpsc::channel(CHANNEL_DEPTH);

    tokio::task::spawn_blocking(move || gunzip_into(bridge, tx));

    match rx.recv().await {
        None => Ok(stream::empty().boxed()),
        Some(Err(e)) => Err(AppError::BadRequest(format!("invalid gzip body: {e}"))),
        Some(Ok(first)) => Ok(stream::once(async move { Ok(first) })
            .chain(ReceiverStream::new(rx))
            .boxed()),
    }
}

/// Blocking half of [`inflate_body`]: read, inflate and forward until the
/// body ends, the limit is hit, or the receiver goes away.
fn gunzip_into(input: impl Read, tx: mpsc::Sender<io::Result<Bytes>>) {
    let mut decoder = GzDecoder::new(input).take(MAX_INFLATED_BODY + 1);
    let mut total: u64 = 0;
    loop {
        let mut buf = vec![0u8; INFLATE_CHUNK];
        let item = match decoder.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                total += n as u64;
                if total > MAX_INFLATED_BODY {
                    Err(io::Error::new(io::ErrorKind::InvalidData, "inflated body too large"))
                } else {
                    buf.truncate(n);
                    Ok(Bytes::from(buf))
                }
            }
            Err(e) => Err(e),
        };

        let failed = item.is_err();
        if tx.blocking_send(item).is_err() {
            debug!("gzip body consumer went away");
            break;
        }
        if failed {
            break;
        }
    }
    debug!(bytes = total, "gzip body inflated");
}
