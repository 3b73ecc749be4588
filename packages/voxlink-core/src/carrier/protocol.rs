//! Carrier media-stream frame vocabulary.
//!
//! The carrier speaks JSON text frames over the WebSocket it opens toward the
//! gateway. Inbound frame types: connected, start, media, mark, dtmf, stop.
//! Outbound: media, mark, clear. Media payloads are base64-encoded μ-law,
//! 8 kHz mono, 20 ms per frame.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::call::CallDirection;

/// Errors raised while parsing inbound carrier frames.
#[derive(Debug, Error)]
pub enum CarrierProtocolError {
    /// Frame was not valid JSON or not a known event type.
    #[error("Unparseable carrier frame: {0}")]
    Malformed(String),

    /// Media payload was not valid base64.
    #[error("Invalid media payload encoding: {0}")]
    Payload(#[from] base64::DecodeError),

    /// Start frame arrived without a stream identifier.
    #[error("Start frame missing stream identifier")]
    MissingStreamId,
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound Frames
// ─────────────────────────────────────────────────────────────────────────────

/// Raw inbound frame envelope, tagged by the `event` field.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundFrame {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },
    Start {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        start: StartMeta,
    },
    Media {
        media: MediaMeta,
    },
    Mark {
        mark: MarkMeta,
    },
    Dtmf {
        dtmf: DtmfMeta,
    },
    Stop {
        #[serde(default)]
        stop: Option<StopMeta>,
    },
}

/// Metadata carried on a start frame.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMeta {
    #[serde(default)]
    pub stream_sid: Option<String>,
    #[serde(default)]
    pub call_sid: Option<String>,
    /// Caller-supplied parameters; the dial leg passes direction/from/to here.
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
    #[serde(default)]
    pub media_format: Option<MediaFormatMeta>,
}

/// Declared media format on the start frame. Informational only — the
/// carrier protocol fixes μ-law 8 kHz mono regardless.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormatMeta {
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u8>,
}

/// Metadata carried on a media frame.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMeta {
    /// Frame counter assigned by the carrier, as a decimal string.
    #[serde(default)]
    pub chunk: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    pub payload: String,
}

#[derive(Debug, Deserialize)]
pub struct MarkMeta {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct DtmfMeta {
    pub digit: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopMeta {
    #[serde(default)]
    pub call_sid: Option<String>,
}

/// Resolved call identity extracted from a start frame.
#[derive(Debug, Clone)]
pub struct StartInfo {
    /// Carrier-assigned media stream identifier.
    pub stream_id: String,
    /// Carrier-side call identifier.
    pub call_id: String,
    pub direction: CallDirection,
    /// Remote party number.
    pub from: String,
    /// Local party number.
    pub to: String,
}

impl StartInfo {
    /// Builds call identity from a start frame.
    ///
    /// Direction, from, and to ride in the custom parameters set up by the
    /// dial leg. A stream with no direction parameter is inbound: the gateway
    /// only receives unsolicited streams for calls it is answering.
    pub fn from_start(
        stream_sid: Option<String>,
        meta: StartMeta,
    ) -> Result<Self, CarrierProtocolError> {
        let stream_id = stream_sid
            .or(meta.stream_sid)
            .ok_or(CarrierProtocolError::MissingStreamId)?;
        let call_id = meta.call_sid.unwrap_or_else(|| stream_id.clone());

        let direction = match meta.custom_parameters.get("direction").map(String::as_str) {
            Some("outbound") => CallDirection::Outbound,
            _ => CallDirection::Inbound,
        };
        let from = meta
            .custom_parameters
            .get("from")
            .cloned()
            .unwrap_or_default();
        let to = meta
            .custom_parameters
            .get("to")
            .cloned()
            .unwrap_or_default();

        Ok(Self {
            stream_id,
            call_id,
            direction,
            from,
            to,
        })
    }
}

/// Decodes a media payload into raw μ-law bytes.
pub fn decode_media_payload(media: &MediaMeta) -> Result<Bytes, CarrierProtocolError> {
    Ok(Bytes::from(BASE64.decode(&media.payload)?))
}

/// Parses one inbound text frame.
pub fn parse_frame(text: &str) -> Result<InboundFrame, CarrierProtocolError> {
    serde_json::from_str(text).map_err(|e| {
        // Keep a short head of the offending frame for protocol-error logs
        let head: String = text.chars().take(120).collect();
        CarrierProtocolError::Malformed(format!("{e} in frame starting {head:?}"))
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound Frames
// ─────────────────────────────────────────────────────────────────────────────

/// Outbound frame envelope, tagged by the `event` field.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundFrame {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: OutboundMark,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

#[derive(Debug, Serialize)]
pub struct OutboundMark {
    pub name: String,
}

impl OutboundFrame {
    pub fn media(stream_sid: &str, ulaw: &[u8]) -> Self {
        Self::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                payload: BASE64.encode(ulaw),
            },
        }
    }

    pub fn mark(stream_sid: &str, name: &str) -> Self {
        Self::Mark {
            stream_sid: stream_sid.to_string(),
            mark: OutboundMark {
                name: name.to_string(),
            },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        Self::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }

    /// Serializes to the wire text representation.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).expect("outbound frame serialization cannot fail")
    }
}
