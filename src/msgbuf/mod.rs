//! Message buffers and batches
//!
//! A message buffer is a fixed-size record inside a channel's pool: a
//! 64-byte header followed by headroom and payload. Buffers self-identify
//! through their `index` field and chain into larger messages through the
//! `next` link, so a whole message is published by enqueuing a single slot
//! index. The header's `magic`, `index` and `size` fields are written once
//! at pool initialization and never change afterwards.

mod batch;
mod buf;

pub use batch::{MsgBufBatch, MAX_BURST};
pub use buf::{
    FlowKey, MsgBuf, MSGBUF_FLAG_CHAINED, MSGBUF_FLAG_FIRST, MSGBUF_FLAG_LAST,
    MSGBUF_HEADROOM_MAX, MSGBUF_MAGIC, MSGBUF_NEXT_NONE,
};

/// Upper bound on the total length of a multi-buffer message, in bytes.
pub const MSG_MAX_LEN: u32 = 8 * 1024 * 1024;
