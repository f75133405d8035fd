//! Pkt-line framing for the smart HTTP service advertisement.
//!
//! `git upload-pack --advertise-refs` does not emit the `# service=` header
//! itself; the HTTP transport must prepend it.

use bytes::{BufMut, Bytes, BytesMut};

use super::service::Service;

/// Flush packet: a pkt-line with length `0000` and no payload.
pub const FLUSH_PKT: &[u8; 4] = b"0000";

/// Largest payload a single pkt-line may carry (65520 total minus the
/// 4-byte length prefix).
const MAX_PKT_PAYLOAD: usize = 65516;

/// Append `payload` to `buf` as one pkt-line: a 4-hex-digit, zero-padded
/// length that counts itself, followed by the payload bytes.
fn put_pkt_line(buf: &mut BytesMut, payload: &[u8]) {
    debug_assert!(payload.len() <= MAX_PKT_PAYLOAD);
    buf.put_slice(format!("{:04x}", payload.len() + 4).as_bytes());
    buf.put_slice(payload);
}

/// The header that must precede the advertisement body:
/// `LLLL# service=<name>\n0000`.
pub fn service_header(service: Service) -> Bytes {
    let line = format!("# service={}\n", service.http_name());
    let mut buf = BytesMut::with_capacity(line.len() + 8);
    put_pkt_line(&mut buf, line.as_bytes());
    buf.put_slice(FLUSH_PKT);
    buf.freeze()
}
