//! Opaque continuation tokens
//!
//! ## Token layout (before base64url encoding)
//!
//! ```text
//! [format: u8][scan_epoch: u64 BE][tenant_len: u16 BE][tenant bytes]
//! [after_len: u16 BE][after bytes][crc32: u32 BE]
//! ```
//!
//! The CRC covers everything before it, so a token that was edited or
//! truncated by the caller is rejected rather than silently resuming at the
//! wrong position.

use crate::record::{StudentId, TenantId};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::{Buf, BufMut, BytesMut};

const CURSOR_FORMAT_V1: u8 = 1;
const CURSOR_CRC_LEN: usize = 4;
/// format + epoch + two length prefixes
const CURSOR_HEADER_LEN: usize = 1 + 8 + 2 + 2;
/// Tokens longer than this are rejected before decoding
pub const CURSOR_TOKEN_LEN_MAX: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    #[error("malformed cursor: {0}")]
    Malformed(&'static str),
    #[error("cursor was issued for a different tenant")]
    ForeignTenant,
    #[error("cursor was issued by a different store incarnation")]
    Stale,
}

/// Decoded scan position: the last key a caller has already seen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCursor {
    pub tenant_id: TenantId,
    pub after: StudentId,
    /// Identity of the store instance that issued the cursor
    pub scan_epoch: u64,
}

impl ScanCursor {
    pub fn new(tenant_id: TenantId, after: StudentId, scan_epoch: u64) -> Self {
        ScanCursor {
            tenant_id,
            after,
            scan_epoch,
        }
    }

    pub fn encode(&self) -> String {
        let tenant = self.tenant_id.as_str().as_bytes();
        let after = self.after.as_str().as_bytes();
        // TigerStyle: identifiers are bounded well below u16::MAX
        debug_assert!(tenant.len() <= u16::MAX as usize);
        debug_assert!(after.len() <= u16::MAX as usize);

        let mut buf =
            BytesMut::with_capacity(CURSOR_HEADER_LEN + tenant.len() + after.len() + CURSOR_CRC_LEN);
        buf.put_u8(CURSOR_FORMAT_V1);
        buf.put_u64(self.scan_epoch);
        buf.put_u16(tenant.len() as u16);
        buf.put_slice(tenant);
        buf.put_u16(after.len() as u16);
        buf.put_slice(after);
        let crc = crc32fast::hash(&buf);
        buf.put_u32(crc);

        URL_SAFE_NO_PAD.encode(&buf)
    }

    pub fn decode(token: &str) -> Result<Self, CursorError> {
        if token.is_empty() || token.len() > CURSOR_TOKEN_LEN_MAX {
            return Err(CursorError::Malformed("bad token length"));
        }
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| CursorError::Malformed("not base64url"))?;
        if raw.len() < CURSOR_HEADER_LEN + CURSOR_CRC_LEN {
            return Err(CursorError::Malformed("truncated"));
        }

        let (payload, mut crc_bytes) = raw.split_at(raw.len() - CURSOR_CRC_LEN);
        if crc32fast::hash(payload) != crc_bytes.get_u32() {
            return Err(CursorError::Malformed("checksum mismatch"));
        }

        let mut buf = payload;
        if buf.get_u8() != CURSOR_FORMAT_V1 {
            return Err(CursorError::Malformed("unknown format"));
        }
        let scan_epoch = buf.get_u64();
        let tenant = read_string(&mut buf)?;
        let after = read_string(&mut buf)?;
        if buf.has_remaining() {
            return Err(CursorError::Malformed("trailing bytes"));
        }

        let tenant_id = TenantId::parse(&tenant).map_err(|_| CursorError::Malformed("tenant"))?;
        let after = StudentId::parse(&after).map_err(|_| CursorError::Malformed("position"))?;

        Ok(ScanCursor {
            tenant_id,
            after,
            scan_epoch,
        })
    }

    /// Reject cursors issued for another tenant or another store instance
    pub fn validate(&self, tenant_id: &TenantId, scan_epoch: u64) -> Result<(), CursorError> {
        if &self.tenant_id != tenant_id {
            return Err(CursorError::ForeignTenant);
        }
        if self.scan_epoch != scan_epoch {
            return Err(CursorError::Stale);
        }
        Ok(())
    }
}

fn read_string(buf: &mut &[u8]) -> Result<String, CursorError> {
    if buf.remaining() < 2 {
        return Err(CursorError::Malformed("truncated"));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(CursorError::Malformed("truncated"));
    }
    let value = String::from_utf8(buf[..len].to_vec())
        .map_err(|_| CursorError::Malformed("not utf-8"))?;
    buf.advance(len);
    Ok(value)
}
