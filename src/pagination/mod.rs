//! Pagination Cursor Protocol
//!
//! Lets a caller retrieve a tenant's entire record set through repeated
//! bounded `scan_page` calls. The store keeps no per-scan state: every bit
//! of scan position lives in the opaque cursor the caller hands back.
//!
//! Callers start with no cursor and must present the exact `next_cursor`
//! of the previous page. A `None` cursor ends the scan. The protocol
//! resumes after the last-seen key and does not promise a global snapshot
//! (see the consistency notes on `crate::store`).

mod cursor;
mod pager;

pub use cursor::{CursorError, ScanCursor, CURSOR_TOKEN_LEN_MAX};
pub use pager::RecordPager;
