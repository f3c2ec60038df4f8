//! Control queue entries
//!
//! The control queue pair carries the slow-path verbs (listen, connect,
//! close) and their completions. Entries are fixed 64-byte records so the
//! control rings use the same bulk ring machinery as the data rings. The
//! payload is opaque to the channel core; the engine's RPC layer interprets
//! it.

use crate::msgbuf::FlowKey;

/// Request the engine to start listening on a local address
pub const CTRL_OP_LISTEN: u32 = 1;
/// Request the engine to open a flow to a remote address
pub const CTRL_OP_CONNECT: u32 = 2;
/// Request the engine to close a flow
pub const CTRL_OP_CLOSE: u32 = 3;

/// Completion status: success
pub const CTRL_STATUS_OK: u32 = 0;
/// Completion status: the request failed
pub const CTRL_STATUS_FAILURE: u32 = 1;

/// Bytes of opaque payload carried by a control entry
pub const CTRL_PAYLOAD_LEN: usize = 32;

/// One entry on the control submission or completion ring
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtrlQueueEntry {
    /// Request identifier chosen by the submitter; echoed in the completion
    pub id: u64,
    /// One of the `CTRL_OP_*` verbs
    pub opcode: u32,
    /// `CTRL_STATUS_*`; meaningful on completions only
    pub status: u32,
    /// Flow the request or completion refers to
    pub flow: FlowKey,
    /// Opaque payload interpreted by the control plane
    pub payload: [u8; CTRL_PAYLOAD_LEN],
}

impl CtrlQueueEntry {
    /// Build a request entry
    pub fn request(id: u64, opcode: u32, flow: FlowKey) -> Self {
        Self {
            id,
            opcode,
            status: CTRL_STATUS_OK,
            flow,
            payload: [0; CTRL_PAYLOAD_LEN],
        }
    }

    /// Build the completion for a request, echoing its id and opcode
    pub fn completion(req: &CtrlQueueEntry, status: u32) -> Self {
        Self {
            id: req.id,
            opcode: req.opcode,
            status,
            flow: req.flow,
            payload: req.payload,
        }
    }
}

impl Default for CtrlQueueEntry {
    fn default() -> Self {
        Self {
            id: 0,
            opcode: 0,
            status: CTRL_STATUS_OK,
            flow: FlowKey::default(),
            payload: [0; CTRL_PAYLOAD_LEN],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_is_64_bytes() {
        assert_eq!(std::mem::size_of::<CtrlQueueEntry>(), 64);
    }

    #[test]
    fn test_completion_echoes_request() {
        let flow = FlowKey::new(1, 2, 3, 4, 6);
        let req = CtrlQueueEntry::request(77, CTRL_OP_CONNECT, flow);
        let cqe = CtrlQueueEntry::completion(&req, CTRL_STATUS_FAILURE);
        assert_eq!(cqe.id, 77);
        assert_eq!(cqe.opcode, CTRL_OP_CONNECT);
        assert_eq!(cqe.status, CTRL_STATUS_FAILURE);
        assert_eq!(cqe.flow, flow);
    }
}
