//! Carrier-side media streaming.
//!
//! Speaks the carrier's media-stream WebSocket sub-protocol: ordered inbound
//! events, real-time paced outbound media, mark echo tracking, and clear on
//! barge-in. Outbound dialing goes through the carrier's REST API.

pub mod dial;
pub mod protocol;
pub mod session;

use async_trait::async_trait;
use bytes::Bytes;

use crate::audio::SequencedFrame;
pub use dial::{CarrierDialer, DialError};
pub use protocol::{CarrierProtocolError, StartInfo};
pub use session::{CarrierSession, CarrierStats};

/// Ordered events produced by a carrier session.
#[derive(Debug)]
pub enum CarrierEvent {
    /// Socket-level handshake frame; the carrier is live but media has not
    /// begun.
    Connected,
    /// Media stream opened; carries the resolved call identity.
    Start(StartInfo),
    /// One inbound μ-law frame, decoded from its wire encoding.
    Media(SequencedFrame),
    /// A previously sent mark was played out by the carrier.
    MarkEchoed { name: String },
    /// Caller pressed a keypad digit.
    Dtmf { digit: String },
    /// Carrier ended the media stream.
    Stop { reason: String },
    /// The underlying socket closed without a stop frame.
    Closed,
    /// Unrecoverable protocol violation; fatal for the call.
    ProtocolError(String),
}

/// Duplex interface the orchestrator holds toward the carrier leg.
///
/// The production implementation is [`CarrierSession`] over an accepted
/// WebSocket; tests substitute channel-backed fakes.
#[async_trait]
pub trait CarrierTransport: Send {
    /// Next inbound event, in strict arrival order. `None` once the session
    /// is finished and all events have been drained.
    async fn receive(&mut self) -> Option<CarrierEvent>;

    /// Queues outbound μ-law audio. Chunked into 20 ms frames and paced at
    /// real time by the session; never blocks.
    fn send_media(&self, ulaw: Bytes);

    /// Queues a marker the carrier echoes back once all audio ahead of it
    /// has played.
    fn send_mark(&self, name: &str);

    /// Discards all queued outbound audio and tells the carrier to flush its
    /// own playback buffer. Used on barge-in.
    fn send_clear(&self);

    /// Frames currently waiting in the paced outbound queue.
    fn outbound_depth(&self) -> usize;

    /// Number of outbound frames dropped to queue overflow so far.
    fn dropped_outbound(&self) -> u64;

    /// Number of inbound frames the carrier's sequence numbers show as lost.
    fn dropped_inbound(&self) -> u64;

    /// Closes the carrier leg.
    async fn close(&mut self, reason: &str);
}
