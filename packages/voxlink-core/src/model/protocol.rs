//! Wire messages for the model's bidirectional streaming protocol.
//!
//! The model session speaks JSON over a WebSocket: the client sends `setup`,
//! `realtimeInput`, `clientContent`, and `toolResponse` messages; the server
//! answers with `setupComplete`, `serverContent`, `toolCall`,
//! `sessionResumptionUpdate`, and `goAway`. Realtime audio rides base64 in
//! both directions.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::config::{SessionConfig, VadSensitivity};
use crate::protocol_constants::MODEL_INPUT_MIME;

// ─────────────────────────────────────────────────────────────────────────────
// Client → Server
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the setup message sent as the first frame of every connection.
///
/// When `resumption_handle` is present the server resumes the previous
/// conversation instead of starting fresh.
pub fn setup_message(config: &SessionConfig, resumption_handle: Option<&str>) -> String {
    let mut setup = json!({
        "model": format!("models/{}", config.model),
        "generationConfig": {
            "responseModalities": ["AUDIO"],
            "speechConfig": {
                "voiceConfig": {
                    "prebuiltVoiceConfig": { "voiceName": config.voice.as_str() }
                },
                "languageCode": config.language,
            },
        },
        "systemInstruction": {
            "parts": [{ "text": config.system_prompt }]
        },
        "realtimeInputConfig": {
            "automaticActivityDetection": vad_config(config),
        },
        // Resumption handles are only issued when resumption is requested.
        "sessionResumption": resumption_handle
            .map_or_else(|| json!({}), |h| json!({ "handle": h })),
    });

    let setup_obj = setup.as_object_mut().expect("setup is an object");
    if config.input_transcription {
        setup_obj.insert("inputAudioTranscription".into(), json!({}));
    }
    if config.output_transcription {
        setup_obj.insert("outputAudioTranscription".into(), json!({}));
    }
    if config.context_compression {
        setup_obj.insert(
            "contextWindowCompression".into(),
            json!({ "slidingWindow": {} }),
        );
    }

    json!({ "setup": setup }).to_string()
}

fn vad_config(config: &SessionConfig) -> Value {
    if !config.vad.automatic {
        return json!({ "disabled": true });
    }

    let mut vad = json!({
        "prefixPaddingMs": config.vad.prefix_padding_ms,
        "silenceDurationMs": config.vad.silence_duration_ms,
    });
    let obj = vad.as_object_mut().expect("vad is an object");
    // Med is the server default and stays off the wire.
    if let Some(s) = start_sensitivity_str(config.vad.start_sensitivity) {
        obj.insert("startOfSpeechSensitivity".into(), json!(s));
    }
    if let Some(s) = end_sensitivity_str(config.vad.end_sensitivity) {
        obj.insert("endOfSpeechSensitivity".into(), json!(s));
    }
    vad
}

fn start_sensitivity_str(s: VadSensitivity) -> Option<&'static str> {
    match s {
        VadSensitivity::Low => Some("START_SENSITIVITY_LOW"),
        VadSensitivity::Med => None,
        VadSensitivity::High => Some("START_SENSITIVITY_HIGH"),
    }
}

fn end_sensitivity_str(s: VadSensitivity) -> Option<&'static str> {
    match s {
        VadSensitivity::Low => Some("END_SENSITIVITY_LOW"),
        VadSensitivity::Med => None,
        VadSensitivity::High => Some("END_SENSITIVITY_HIGH"),
    }
}

/// Builds a realtime audio input message (PCM s16le, 16 kHz, base64).
pub fn realtime_audio_message(pcm16k: &[u8]) -> String {
    json!({
        "realtimeInput": {
            "audio": {
                "data": BASE64.encode(pcm16k),
                "mimeType": MODEL_INPUT_MIME,
            }
        }
    })
    .to_string()
}

/// Builds a manual activity-start marker (automatic VAD disabled only).
pub fn activity_start_message() -> String {
    json!({ "realtimeInput": { "activityStart": {} } }).to_string()
}

/// Builds a manual activity-end marker (automatic VAD disabled only).
pub fn activity_end_message() -> String {
    json!({ "realtimeInput": { "activityEnd": {} } }).to_string()
}

/// Announces intentional inbound silence.
pub fn audio_stream_end_message() -> String {
    json!({ "realtimeInput": { "audioStreamEnd": true } }).to_string()
}

/// Builds a synthetic user text turn.
pub fn client_text_message(text: &str) -> String {
    json!({
        "clientContent": {
            "turns": [{ "role": "user", "parts": [{ "text": text }] }],
            "turnComplete": true,
        }
    })
    .to_string()
}

/// Scheduling hint on a tool response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolScheduling {
    /// Model waits for the response before continuing.
    Blocking,
    Interrupt,
    WhenIdle,
    Silent,
}

impl ToolScheduling {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Blocking => "blocking",
            Self::Interrupt => "interrupt",
            Self::WhenIdle => "when-idle",
            Self::Silent => "silent",
        }
    }
}

/// Completes a tool call initiated by the model.
pub fn tool_response_message(
    id: &str,
    name: &str,
    response: &Value,
    scheduling: ToolScheduling,
) -> String {
    json!({
        "toolResponse": {
            "functionResponses": [{
                "id": id,
                "name": name,
                "response": response,
                "scheduling": scheduling,
            }]
        }
    })
    .to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Server → Client
// ─────────────────────────────────────────────────────────────────────────────

/// One server frame. Exactly one of the fields is populated per frame; frames
/// with none the client recognizes (e.g. usage metadata) are skipped.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ToolCallMessage>,
    pub session_resumption_update: Option<ResumptionUpdate>,
    pub go_away: Option<GoAwayMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub generation_complete: bool,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<TurnPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnPart {
    pub inline_data: Option<InlineData>,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: Option<String>,
    pub data: String,
}

impl InlineData {
    /// Decodes the base64 audio payload.
    pub fn decode(&self) -> Result<Bytes, base64::DecodeError> {
        Ok(Bytes::from(BASE64.decode(&self.data)?))
    }
}

#[derive(Debug, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallMessage {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumptionUpdate {
    #[serde(default)]
    pub new_handle: String,
    #[serde(default)]
    pub resumable: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAwayMessage {
    /// Remaining session time as a protobuf duration string, e.g. "10s".
    pub time_left: Option<String>,
}

impl GoAwayMessage {
    /// Parses the remaining time; defaults to zero when absent or malformed.
    pub fn time_left_secs(&self) -> u64 {
        self.time_left
            .as_deref()
            .and_then(|s| s.strip_suffix('s'))
            .and_then(|s| s.parse::<f64>().ok())
            .map_or(0, |secs| secs.max(0.0) as u64)
    }
}

/// Parses one server frame. Unknown fields are ignored.
pub fn parse_server_message(text: &str) -> Result<ServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::VadTuning;

    fn config() -> SessionConfig {
        SessionConfig::builder()
            .model("gemini-2.0-flash-live-001")
            .voice("Puck")
            .language("en-US")
            .system_prompt("Answer the phone.")
            .transcription(true, true)
            .build()
            .unwrap()
    }

    #[test]
    fn setup_message_carries_model_and_voice() {
        let text = setup_message(&config(), None);
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["setup"]["model"], "models/gemini-2.0-flash-live-001");
        assert_eq!(
            v["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Puck"
        );
        assert_eq!(
            v["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert!(v["setup"]["inputAudioTranscription"].is_object());
        assert!(v["setup"]["outputAudioTranscription"].is_object());
    }

    #[test]
    fn setup_message_includes_resumption_handle() {
        let text = setup_message(&config(), Some("handle-1"));
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["setup"]["sessionResumption"]["handle"], "handle-1");
    }

    #[test]
    fn setup_omits_default_sensitivities() {
        let text = setup_message(&config(), None);
        let v: Value = serde_json::from_str(&text).unwrap();
        let vad = &v["setup"]["realtimeInputConfig"]["automaticActivityDetection"];
        assert!(vad.get("startOfSpeechSensitivity").is_none());
        assert_eq!(vad["silenceDurationMs"], 800);
    }

    #[test]
    fn setup_disables_vad_when_manual() {
        let mut cfg = config();
        cfg.vad = VadTuning {
            automatic: false,
            ..VadTuning::default()
        };
        let text = setup_message(&cfg, None);
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            v["setup"]["realtimeInputConfig"]["automaticActivityDetection"]["disabled"],
            true
        );
    }

    #[test]
    fn setup_declares_context_compression() {
        let cfg = SessionConfig::builder()
            .model("gemini-2.0-flash-live-001")
            .voice("Kore")
            .language("en-US")
            .system_prompt("x")
            .context_compression(true)
            .build()
            .unwrap();
        let v: Value = serde_json::from_str(&setup_message(&cfg, None)).unwrap();
        assert!(v["setup"]["contextWindowCompression"]["slidingWindow"].is_object());
    }

    #[test]
    fn realtime_audio_round_trips() {
        let pcm = vec![1u8, 2, 3, 4];
        let text = realtime_audio_message(&pcm);
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["realtimeInput"]["audio"]["mimeType"], MODEL_INPUT_MIME);
        let decoded = BASE64
            .decode(v["realtimeInput"]["audio"]["data"].as_str().unwrap())
            .unwrap();
        assert_eq!(decoded, pcm);
    }

    #[test]
    fn parses_audio_server_content() {
        let text = format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{}"}}}}]}}}}}}"#,
            BASE64.encode([0u8, 1, 2, 3])
        );
        let msg = parse_server_message(&text).unwrap();
        let content = msg.server_content.unwrap();
        let part = &content.model_turn.unwrap().parts[0];
        let audio = part.inline_data.as_ref().unwrap().decode().unwrap();
        assert_eq!(audio.as_ref(), &[0u8, 1, 2, 3]);
    }

    #[test]
    fn parses_interrupted_and_turn_complete() {
        let msg = parse_server_message(r#"{"serverContent":{"interrupted":true}}"#).unwrap();
        assert!(msg.server_content.unwrap().interrupted);

        let msg = parse_server_message(
            r#"{"serverContent":{"turnComplete":true,"generationComplete":true}}"#,
        )
        .unwrap();
        let content = msg.server_content.unwrap();
        assert!(content.turn_complete);
        assert!(content.generation_complete);
    }

    #[test]
    fn parses_resumption_update_and_go_away() {
        let msg = parse_server_message(
            r#"{"sessionResumptionUpdate":{"newHandle":"h2","resumable":true}}"#,
        )
        .unwrap();
        let update = msg.session_resumption_update.unwrap();
        assert_eq!(update.new_handle, "h2");
        assert!(update.resumable);

        let msg = parse_server_message(r#"{"goAway":{"timeLeft":"5s"}}"#).unwrap();
        assert_eq!(msg.go_away.unwrap().time_left_secs(), 5);
    }

    #[test]
    fn go_away_defaults_to_zero_on_malformed_duration() {
        let msg = parse_server_message(r#"{"goAway":{"timeLeft":"soon"}}"#).unwrap();
        assert_eq!(msg.go_away.unwrap().time_left_secs(), 0);
    }

    #[test]
    fn tool_response_carries_id_and_scheduling() {
        let text = tool_response_message(
            "fc-1",
            "lookup",
            &serde_json::json!({"result": "ok"}),
            ToolScheduling::WhenIdle,
        );
        let v: Value = serde_json::from_str(&text).unwrap();
        let fr = &v["toolResponse"]["functionResponses"][0];
        assert_eq!(fr["id"], "fc-1");
        assert_eq!(fr["name"], "lookup");
        assert_eq!(fr["scheduling"], "WHEN_IDLE");
    }

    #[test]
    fn unknown_server_fields_are_skipped() {
        let msg = parse_server_message(r#"{"usageMetadata":{"totalTokenCount":10}}"#).unwrap();
        assert!(msg.setup_complete.is_none());
        assert!(msg.server_content.is_none());
    }
}
