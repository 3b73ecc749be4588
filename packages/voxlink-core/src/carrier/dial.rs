//! Outbound call placement through the carrier's REST API.
//!
//! The gateway does not manage telephony state itself: it asks the carrier to
//! place a call whose media is streamed back to the gateway's own WebSocket
//! endpoint, and the accepted connection then runs through the same
//! orchestrator as an inbound call.

use reqwest::Client;
use thiserror::Error;

/// Errors from the carrier's dial API.
#[derive(Debug, Error)]
pub enum DialError {
    /// HTTP request to the carrier failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Carrier rejected the dial request.
    #[error("Carrier returned {0}: {1}")]
    Status(u16, String),

    /// Dial response did not contain a call identifier.
    #[error("Carrier response missing call sid")]
    MissingCallSid,
}

/// Client for the carrier's call-placement API.
pub struct CarrierDialer {
    http: Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
    /// Number outbound calls are placed from.
    dialout_number: String,
    /// Public URL of this gateway's media-stream endpoint.
    stream_url: String,
}

impl CarrierDialer {
    pub fn new(
        http: Client,
        api_base: String,
        account_sid: String,
        auth_token: String,
        dialout_number: String,
        stream_url: String,
    ) -> Self {
        Self {
            http,
            api_base,
            account_sid,
            auth_token,
            dialout_number,
            stream_url,
        }
    }

    /// Places an outbound call to `to`, directing its media stream back at
    /// this gateway. Returns the carrier's call identifier.
    ///
    /// The TwiML connects the answered call to the gateway's WebSocket and
    /// passes direction/from/to as custom parameters so the start frame
    /// resolves the same way inbound calls do.
    pub async fn dial(&self, to: &str) -> Result<String, DialError> {
        let twiml = self.connect_twiml(to);
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.api_base, self.account_sid
        );

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("To", to),
                ("From", self.dialout_number.as_str()),
                ("Twiml", twiml.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DialError::Status(status.as_u16(), body));
        }

        let body: serde_json::Value = response.json().await?;
        let call_sid = body
            .get("sid")
            .and_then(|v| v.as_str())
            .ok_or(DialError::MissingCallSid)?
            .to_string();

        log::info!("[Dial] Outbound call placed: to={}, sid={}", to, call_sid);
        Ok(call_sid)
    }

    /// TwiML that bridges the answered call into the gateway's stream.
    fn connect_twiml(&self, to: &str) -> String {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                "<Response><Connect><Stream url=\"{url}\">",
                "<Parameter name=\"direction\" value=\"outbound\"/>",
                "<Parameter name=\"from\" value=\"{from}\"/>",
                "<Parameter name=\"to\" value=\"{to}\"/>",
                "</Stream></Connect></Response>"
            ),
            url = xml_escape(&self.stream_url),
            from = xml_escape(&self.dialout_number),
            to = xml_escape(to),
        )
    }
}

/// Escapes the five XML special characters for attribute values.
fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialer() -> CarrierDialer {
        CarrierDialer::new(
            Client::new(),
            "https://api.example.com".into(),
            "AC123".into(),
            "token".into(),
            "+15550009000".into(),
            "wss://gw.example.com/twilio".into(),
        )
    }

    #[test]
    fn twiml_carries_stream_url_and_parameters() {
        let twiml = dialer().connect_twiml("+15550001111");
        assert!(twiml.contains("wss://gw.example.com/twilio"));
        assert!(twiml.contains(r#"name="direction" value="outbound""#));
        assert!(twiml.contains(r#"name="to" value="+15550001111""#));
        assert!(twiml.contains(r#"name="from" value="+15550009000""#));
    }

    #[test]
    fn xml_escape_handles_specials() {
        assert_eq!(xml_escape(r#"a&b<c>"d'"#), "a&amp;b&lt;c&gt;&quot;d&apos;");
    }
}
