//! The single event type consumed by the capture manager's worker loop.
//! Every input (live device, trace file, HEP listener) funnels into the
//! same `tokio::sync::mpsc::Sender<Event>`.

use bytes::Bytes;
use sipwatch_core::Address;

use crate::error::CaptureError;
use crate::input::InputId;

#[derive(Debug)]
pub enum Event {
    /// One raw frame ready for dissection, with the capture-level metadata
    /// already known (link-layer framing is still intact in `frame`).
    PacketReady {
        input: InputId,
        src_hint: Option<Address>,
        dst_hint: Option<Address>,
        unix_secs: i64,
        unix_nanos: u32,
        frame: Bytes,
    },
    InputReady(InputId),
    InputExhausted(InputId),
    InputError(InputId, CaptureError),
}
