//! Message codecs
//!
//! Outgoing values are turned into line text by an encode function and
//! incoming lines are turned back into values by a decode function. Both are
//! chosen once, when a session is built, either by naming a built-in
//! strategy ([`Mode`]) or by handing in a closure.
//!
//! Values travel as [`serde_json::Value`] so that text, JSON and custom
//! strategies share one payload type.

use crate::error::{Result, TransportError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Encode function: value to line text (without delimiter)
pub type EncodeFn = Arc<dyn Fn(&Value) -> anyhow::Result<String> + Send + Sync>;

/// Decode function: line text (without delimiter) to value
pub type DecodeFn = Arc<dyn Fn(&str) -> anyhow::Result<Value> + Send + Sync>;

/// Operating mode of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Lines are plain strings
    #[default]
    Text,
    /// Every line is one JSON document
    Json,
    /// Raw bytes, no framing and no message decoding
    Binary,
}

impl Mode {
    /// Name of the mode as accepted by [`Mode::from_str`]
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Text => "text",
            Mode::Json => "json",
            Mode::Binary => "binary",
        }
    }

    /// Whether framing and decoding are bypassed
    pub fn is_binary(&self) -> bool {
        matches!(self, Mode::Binary)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Mode::Text),
            "json" => Ok(Mode::Json),
            "binary" => Ok(Mode::Binary),
            other => Err(TransportError::InvalidArgument(format!(
                "unknown mode '{}', expected text, json or binary",
                other
            ))),
        }
    }
}

/// Character encoding used between line bytes and line text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    /// UTF-8; invalid sequences decode to U+FFFD
    #[default]
    #[serde(alias = "utf-8")]
    Utf8,
    /// ISO-8859-1, one byte per character
    #[serde(alias = "latin-1", alias = "iso-8859-1")]
    Latin1,
}

impl TextEncoding {
    /// Turn received bytes into text
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        }
    }

    /// Turn text into bytes for the child's stdin
    ///
    /// Characters outside Latin-1 are written as `?`.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            TextEncoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }
}

impl FromStr for TextEncoding {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(TextEncoding::Utf8),
            "latin1" | "latin-1" | "iso-8859-1" => Ok(TextEncoding::Latin1),
            other => Err(TransportError::InvalidArgument(format!(
                "unsupported text encoding '{}'",
                other
            ))),
        }
    }
}

/// Which output stream of the child something came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Standard output, the message channel
    Stdout,
    /// Standard error, the diagnostic channel
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => f.write_str("stdout"),
            StreamKind::Stderr => f.write_str("stderr"),
        }
    }
}

/// Built-in encode and decode strategies
pub mod builtin {
    use serde_json::Value;

    /// Strings pass through, `null` becomes empty, anything else is stringified
    pub fn encode_text(value: &Value) -> anyhow::Result<String> {
        Ok(match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    /// Compact JSON serialization
    pub fn encode_json(value: &Value) -> anyhow::Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    /// The line itself, as a string value
    pub fn decode_text(line: &str) -> anyhow::Result<Value> {
        Ok(Value::String(line.to_string()))
    }

    /// Parse the line as one JSON document
    pub fn decode_json(line: &str) -> anyhow::Result<Value> {
        Ok(serde_json::from_str(line)?)
    }
}

/// Outbound strategy: a built-in mode or a custom function
#[derive(Clone)]
pub enum Encoder {
    /// Built-in strategy selected by mode
    BuiltIn(Mode),
    /// Caller-supplied function
    Custom(EncodeFn),
}

impl Encoder {
    /// Resolve a built-in encoder by name
    pub fn named(name: &str) -> Result<Self> {
        Ok(Self::BuiltIn(name.parse()?))
    }

    /// Wrap a custom encode function
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Resolve to a concrete function
    ///
    /// Binary mode encodes like text; the caller is responsible for not
    /// appending a delimiter.
    pub fn resolve(&self) -> EncodeFn {
        match self {
            Encoder::BuiltIn(Mode::Json) => Arc::new(builtin::encode_json),
            Encoder::BuiltIn(Mode::Text | Mode::Binary) => Arc::new(builtin::encode_text),
            Encoder::Custom(f) => Arc::clone(f),
        }
    }
}

impl fmt::Debug for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoder::BuiltIn(mode) => f.debug_tuple("BuiltIn").field(mode).finish(),
            Encoder::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Inbound strategy: a built-in mode or a custom function
#[derive(Clone)]
pub enum Decoder {
    /// Built-in strategy selected by mode
    BuiltIn(Mode),
    /// Caller-supplied function
    Custom(DecodeFn),
}

impl Decoder {
    /// Resolve a built-in decoder by name
    pub fn named(name: &str) -> Result<Self> {
        Ok(Self::BuiltIn(name.parse()?))
    }

    /// Wrap a custom decode function
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Resolve to a concrete function; binary has none
    pub fn resolve(&self) -> Option<DecodeFn> {
        match self {
            Decoder::BuiltIn(Mode::Json) => Some(Arc::new(builtin::decode_json)),
            Decoder::BuiltIn(Mode::Text) => Some(Arc::new(builtin::decode_text)),
            Decoder::BuiltIn(Mode::Binary) => None,
            Decoder::Custom(f) => Some(Arc::clone(f)),
        }
    }
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decoder::BuiltIn(mode) => f.debug_tuple("BuiltIn").field(mode).finish(),
            Decoder::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A decode function rejected a line
///
/// Clones share the underlying failure, so the full error chain survives
/// being handed from a listener to a caller.
#[derive(Debug, Clone)]
pub struct DecodeError {
    /// Stream the line arrived on
    pub stream: StreamKind,
    /// The offending line
    pub line: String,
    source: Arc<anyhow::Error>,
}

impl DecodeError {
    /// Create a decode error for a line
    pub fn new(stream: StreamKind, line: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            stream,
            line: line.into(),
            source: Arc::new(source),
        }
    }

    /// The underlying failure reported by the decode function
    pub fn cause(&self) -> &anyhow::Error {
        &self.source
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to decode {} line {:?}: {}",
            self.stream, self.line, self.source
        )
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&**self.source)
    }
}

/// Encode and decode functions fixed for the lifetime of a session
#[derive(Clone)]
pub struct ResolvedCodec {
    mode: Mode,
    encode: EncodeFn,
    decode: Option<DecodeFn>,
    decode_stderr: Option<DecodeFn>,
}

impl ResolvedCodec {
    /// Resolve the codec for a mode, honouring any overrides
    ///
    /// In binary mode no decoder is kept, whatever was requested.
    pub fn resolve(
        mode: Mode,
        encoder: Option<&Encoder>,
        decoder: Option<&Decoder>,
        stderr_decoder: Option<&Decoder>,
    ) -> Self {
        let encode = encoder
            .cloned()
            .unwrap_or(Encoder::BuiltIn(mode))
            .resolve();

        let (decode, decode_stderr) = if mode.is_binary() {
            if decoder.is_some() || stderr_decoder.is_some() {
                tracing::debug!("ignoring custom decoders in binary mode");
            }
            (None, None)
        } else {
            let default = Decoder::BuiltIn(mode);
            (
                decoder.unwrap_or(&default).resolve(),
                stderr_decoder.unwrap_or(&default).resolve(),
            )
        };

        Self {
            mode,
            encode,
            decode,
            decode_stderr,
        }
    }

    /// Mode this codec was resolved for
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Whether lines from this stream are decoded at all
    pub fn decodes(&self, stream: StreamKind) -> bool {
        match stream {
            StreamKind::Stdout => self.decode.is_some(),
            StreamKind::Stderr => self.decode_stderr.is_some(),
        }
    }

    /// Encode an outgoing value
    pub fn encode(&self, value: &Value) -> Result<String> {
        (self.encode)(value).map_err(|e| TransportError::Codec(e.to_string()))
    }

    /// Decode one line received on a stream
    ///
    /// Returns `None` when the stream is not decoded (binary mode).
    pub fn decode(
        &self,
        stream: StreamKind,
        line: &str,
    ) -> Option<std::result::Result<Value, DecodeError>> {
        let decode = match stream {
            StreamKind::Stdout => self.decode.as_ref(),
            StreamKind::Stderr => self.decode_stderr.as_ref(),
        }?;
        Some(decode(line).map_err(|e| DecodeError::new(stream, line, e)))
    }
}

impl fmt::Debug for ResolvedCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCodec")
            .field("mode", &self.mode)
            .field("decodes_stdout", &self.decode.is_some())
            .field("decodes_stderr", &self.decode_stderr.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("text", Mode::Text)]
    #[case("JSON", Mode::Json)]
    #[case(" binary ", Mode::Binary)]
    fn test_mode_from_str(#[case] input: &str, #[case] expected: Mode) {
        assert_eq!(input.parse::<Mode>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let err = "xml".parse::<Mode>().unwrap_err();
        assert!(matches!(err, TransportError::InvalidArgument(_)));
        assert!(Encoder::named("yaml").is_err());
    }

    #[test]
    fn test_mode_serde_lowercase() {
        let mode: Mode = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(mode, Mode::Json);
        assert_eq!(serde_json::to_string(&Mode::Binary).unwrap(), "\"binary\"");
    }

    #[rstest]
    #[case(json!("already text"), "already text")]
    #[case(json!(null), "")]
    #[case(json!(42), "42")]
    #[case(json!({"a": 1}), "{\"a\":1}")]
    fn test_text_encode(#[case] value: Value, #[case] expected: &str) {
        assert_eq!(builtin::encode_text(&value).unwrap(), expected);
    }

    #[test]
    fn test_json_encode_quotes_strings() {
        assert_eq!(builtin::encode_json(&json!("hi")).unwrap(), "\"hi\"");
    }

    #[test]
    fn test_json_decode_rejects_malformed_line() {
        let codec = ResolvedCodec::resolve(Mode::Json, None, None, None);
        let err = codec
            .decode(StreamKind::Stdout, "{not json")
            .unwrap()
            .unwrap_err();
        assert_eq!(err.stream, StreamKind::Stdout);
        assert_eq!(err.line, "{not json");
        assert!(err.to_string().contains("stdout"));
    }

    #[test]
    fn test_decode_error_clone_keeps_source_chain() {
        let codec = ResolvedCodec::resolve(Mode::Json, None, None, None);
        let err = codec
            .decode(StreamKind::Stdout, "{not json")
            .unwrap()
            .unwrap_err();
        let copy = err.clone();

        assert!(copy.cause().downcast_ref::<serde_json::Error>().is_some());
        let source = std::error::Error::source(&copy).unwrap();
        assert_eq!(source.to_string(), err.cause().to_string());
    }

    #[test]
    fn test_json_decode_value() {
        let codec = ResolvedCodec::resolve(Mode::Json, None, None, None);
        let value = codec.decode(StreamKind::Stdout, "{\"a\":1}").unwrap().unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_stderr_decoder_is_independent() {
        let codec = ResolvedCodec::resolve(
            Mode::Json,
            None,
            None,
            Some(&Decoder::BuiltIn(Mode::Text)),
        );
        let value = codec
            .decode(StreamKind::Stderr, "Traceback (most recent call last):")
            .unwrap()
            .unwrap();
        assert_eq!(value, json!("Traceback (most recent call last):"));
        assert!(codec.decode(StreamKind::Stdout, "Traceback").unwrap().is_err());
    }

    #[test]
    fn test_custom_functions_are_used() {
        let encoder = Encoder::custom(|v| Ok(format!("<{}>", v)));
        let decoder = Decoder::custom(|line| Ok(json!({ "len": line.len() })));
        let codec = ResolvedCodec::resolve(Mode::Text, Some(&encoder), Some(&decoder), None);

        assert_eq!(codec.encode(&json!(1)).unwrap(), "<1>");
        assert_eq!(
            codec.decode(StreamKind::Stdout, "abcd").unwrap().unwrap(),
            json!({"len": 4})
        );
        // stderr keeps the mode default
        assert_eq!(
            codec.decode(StreamKind::Stderr, "abcd").unwrap().unwrap(),
            json!("abcd")
        );
    }

    #[test]
    fn test_custom_encoder_failure_maps_to_codec_error() {
        let encoder = Encoder::custom(|_| Err(anyhow::anyhow!("refused")));
        let codec = ResolvedCodec::resolve(Mode::Text, Some(&encoder), None, None);
        let err = codec.encode(&json!(1)).unwrap_err();
        assert!(matches!(err, TransportError::Codec(ref msg) if msg == "refused"));
    }

    #[test]
    fn test_binary_mode_has_no_decoders() {
        let codec = ResolvedCodec::resolve(
            Mode::Binary,
            None,
            Some(&Decoder::BuiltIn(Mode::Json)),
            None,
        );
        assert!(!codec.decodes(StreamKind::Stdout));
        assert!(!codec.decodes(StreamKind::Stderr));
        assert!(codec.decode(StreamKind::Stdout, "x").is_none());
    }

    #[test]
    fn test_latin1_round_trip_and_replacement() {
        let enc = TextEncoding::Latin1;
        assert_eq!(enc.decode(&[0x63, 0x61, 0x66, 0xe9]), "café");
        assert_eq!(enc.encode("café"), vec![0x63, 0x61, 0x66, 0xe9]);
        assert_eq!(enc.encode("€"), b"?".to_vec());
    }

    #[test]
    fn test_utf8_decode_is_lossy() {
        assert_eq!(TextEncoding::Utf8.decode(&[0x61, 0xff]), "a\u{fffd}");
        assert_eq!("utf-8".parse::<TextEncoding>().unwrap(), TextEncoding::Utf8);
    }
}
