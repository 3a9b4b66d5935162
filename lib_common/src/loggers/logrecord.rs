use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use thiserror::Error;

use super::highlight::Highlight;

/// # Log Line Error
///
/// Reasons a rendered line cannot be turned back into a [`LogRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogLineError {
    /// One of the leading `time`, `level`, `server`, `msg` fields is absent or out of order.
    #[error("missing `{0}` field")]
    MissingField(&'static str),

    /// The `level` field holds something other than DEBUG, INFO, WARN or ERROR.
    #[error("unknown log level `{0}`")]
    UnknownLevel(String),

    /// The `time` field is not an RFC 3339 timestamp.
    #[error("invalid timestamp `{value}`: {reason}")]
    InvalidTimestamp { value: String, reason: String },

    /// A quoted value runs to the end of the line.
    #[error("unterminated quoted value for key `{0}`")]
    UnterminatedQuote(String),

    /// A token is not a `key=value` pair.
    #[error("malformed field `{0}`")]
    MalformedField(String),
}

/// # Level
///
/// Severity of a record, rendered in upper case like the rest of the fleet's logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = LogLineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBUG" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARN" => Ok(Level::Warn),
            "ERROR" => Ok(Level::Error),
            other => Err(LogLineError::UnknownLevel(other.to_string())),
        }
    }
}

/// # Log Record
///
/// One structured log event: when it happened, how severe it is, which
/// service emitted it, the message, and an ordered list of attributes.
///
/// Attributes keep insertion order so the rendered line reads the way the
/// call site wrote it.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Creation time, truncated to whole seconds (the rendered precision).
    pub time: DateTime<Utc>,
    /// Severity.
    pub level: Level,
    /// Service tag rendered as `server=<tag>`.
    pub server: String,
    /// Human readable message.
    pub message: String,
    /// Extra `key=value` pairs, in insertion order.
    pub attrs: Vec<(String, String)>,
}

impl LogRecord {
    /// Creates a record stamped with the current time.
    pub fn new(level: Level, server: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            time: Utc::now().trunc_subsecs(0),
            level,
            server: server.into(),
            message: message.into(),
            attrs: Vec::new(),
        }
    }

    /// Overrides the timestamp.
    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.time = time.trunc_subsecs(0);
        self
    }

    /// Appends one attribute.
    pub fn with(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.attrs.push((key.into(), value.to_string()));
        self
    }

    /// Renders the record as a plain line.
    pub fn to_line(&self) -> LogLine {
        self.render(None)
    }

    /// Renders the record with the message painted in `highlight`.
    pub fn to_line_painted(&self, highlight: Highlight) -> LogLine {
        self.render(Some(highlight))
    }

    fn render(&self, highlight: Option<Highlight>) -> LogLine {
        let mut out = String::with_capacity(96 + self.message.len());
        out.push_str("time=");
        out.push_str(&self.time.to_rfc3339_opts(SecondsFormat::Secs, true));
        out.push_str(" level=");
        out.push_str(self.level.as_str());
        out.push_str(" server=");
        push_value(&mut out, &self.server);
        out.push_str(" msg=");
        match highlight {
            Some(highlight) => push_value(&mut out, &highlight.paint(&self.message)),
            None => push_value(&mut out, &self.message),
        }
        for (key, value) in &self.attrs {
            out.push(' ');
            push_key(&mut out, key);
            out.push('=');
            push_value(&mut out, value);
        }
        out.push('\n');
        LogLine(out)
    }
}

impl FromStr for LogRecord {
    type Err = LogLineError;

    /// Parses a rendered line (with or without its trailing line break).
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\n', '\r']);
        let mut fields = split_fields(line)?.into_iter();

        let time = expect_field(&mut fields, "time")?;
        let level = expect_field(&mut fields, "level")?;
        let server = expect_field(&mut fields, "server")?;
        let message = expect_field(&mut fields, "msg")?;

        let time = DateTime::parse_from_rfc3339(&time)
            .map_err(|e| LogLineError::InvalidTimestamp {
                value: time.clone(),
                reason: e.to_string(),
            })?
            .with_timezone(&Utc);

        Ok(Self {
            time,
            level: level.parse()?,
            server,
            message,
            attrs: fields.collect(),
        })
    }
}

/// # Log Line
///
/// The rendered, newline-terminated text form of a [`LogRecord`]. This is the
/// unit that travels through the outbound queue, the pipe, and into the
/// aggregated log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine(String);

impl LogLine {
    /// Wraps already-rendered text, adding the line break if it is missing.
    pub fn new(text: impl Into<String>) -> Self {
        let mut text = text.into();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        LogLine(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Length in bytes, line break included.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses the line back into its record.
    pub fn parse(&self) -> Result<LogRecord, LogLineError> {
        self.0.parse()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '=' || c == '"' || c.is_control())
}

fn push_value(out: &mut String, value: &str) {
    if !needs_quoting(value) {
        out.push_str(value);
        return;
    }
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
}

// Keys are never quoted; anything that would break tokenizing becomes '_'.
fn push_key(out: &mut String, key: &str) {
    if key.is_empty() {
        out.push('_');
        return;
    }
    out.extend(key.chars().map(|c| {
        if c.is_whitespace() || c == '=' || c == '"' || c.is_control() {
            '_'
        } else {
            c
        }
    }));
}

fn expect_field(
    fields: &mut impl Iterator<Item = (String, String)>,
    name: &'static str,
) -> Result<String, LogLineError> {
    match fields.next() {
        Some((key, value)) if key == name => Ok(value),
        _ => Err(LogLineError::MissingField(name)),
    }
}

fn split_fields(line: &str) -> Result<Vec<(String, String)>, LogLineError> {
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.next_if_eq(&' ').is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        loop {
            match chars.next() {
                Some('=') => break,
                Some(' ') | None => return Err(LogLineError::MalformedField(key)),
                Some(c) => key.push(c),
            }
        }

        let mut value = String::new();
        if chars.next_if_eq(&'"').is_some() {
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some('n') => value.push('\n'),
                        Some('r') => value.push('\r'),
                        Some('t') => value.push('\t'),
                        Some(c) => value.push(c),
                        None => return Err(LogLineError::UnterminatedQuote(key)),
                    },
                    Some(c) => value.push(c),
                    None => return Err(LogLineError::UnterminatedQuote(key)),
                }
            }
            if chars.peek().is_some_and(|c| *c != ' ') {
                return Err(LogLineError::MalformedField(key));
            }
        } else {
            while let Some(c) = chars.next_if(|c| *c != ' ') {
                value.push(c);
            }
        }
        fields.push((key, value));
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 30).unwrap()
    }

    #[test]
    fn renders_fields_in_order() {
        let record = LogRecord::new(Level::Info, "1", "start")
            .at(fixed_time())
            .with("conn", 3)
            .with("color", "green");

        assert_eq!(
            record.to_line().as_str(),
            "time=2024-03-09T14:05:30Z level=INFO server=1 msg=start conn=3 color=green\n"
        );
    }

    #[test]
    fn quotes_values_with_spaces_and_escapes() {
        let record = LogRecord::new(Level::Error, "2", "error while reading from conn")
            .at(fixed_time())
            .with("err", "broken \"pipe\"\nretry=no")
            .with("empty", "");

        let line = record.to_line();
        assert_eq!(
            line.as_str(),
            "time=2024-03-09T14:05:30Z level=ERROR server=2 msg=\"error while reading from conn\" \
             err=\"broken \\\"pipe\\\"\\nretry=no\" empty=\"\"\n"
        );
        assert_eq!(line.as_str().matches('\n').count(), 1);
    }

    #[test]
    fn parse_recovers_every_field() {
        let record = LogRecord::new(Level::Warn, "2", "Stop serving - client disconnected")
            .at(fixed_time())
            .with("conn", 17)
            .with("path", "C:\\tmp")
            .with("note", "tab\there");

        let parsed = record.to_line().parse().unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn parse_keeps_attribute_order_and_duplicates() {
        let parsed: LogRecord =
            "time=2024-03-09T14:05:30Z level=DEBUG server=1 msg=x b=2 a=1 b=3".parse().unwrap();
        assert_eq!(
            parsed.attrs,
            vec![
                ("b".to_string(), "2".to_string()),
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn parse_accepts_offsets() {
        let parsed: LogRecord = "time=2024-03-09T17:05:30+03:00 level=INFO server=1 msg=x"
            .parse()
            .unwrap();
        assert_eq!(parsed.time, fixed_time());
    }

    #[test]
    fn parse_rejects_malformed_lines() {
        assert_eq!(
            "level=INFO server=1 msg=x".parse::<LogRecord>(),
            Err(LogLineError::MissingField("time"))
        );
        assert_eq!(
            "time=2024-03-09T14:05:30Z level=LOUD server=1 msg=x".parse::<LogRecord>(),
            Err(LogLineError::UnknownLevel("LOUD".to_string()))
        );
        assert_eq!(
            "time=2024-03-09T14:05:30Z level=INFO server=1 msg=\"open".parse::<LogRecord>(),
            Err(LogLineError::UnterminatedQuote("msg".to_string()))
        );
        assert_eq!(
            "time=2024-03-09T14:05:30Z level=INFO server=1 msg=x dangling".parse::<LogRecord>(),
            Err(LogLineError::MalformedField("dangling".to_string()))
        );
        assert!(matches!(
            "time=yesterday level=INFO server=1 msg=x".parse::<LogRecord>(),
            Err(LogLineError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn awkward_keys_are_sanitized() {
        let line = LogRecord::new(Level::Info, "1", "m")
            .at(fixed_time())
            .with("bad key=", "v")
            .to_line();
        assert!(line.as_str().ends_with(" bad_key_=v\n"));
    }

    #[test]
    fn painted_message_survives_a_round_trip() {
        colored::control::set_override(true);
        let record = LogRecord::new(Level::Info, "1", "color changed").at(fixed_time());

        let parsed = record.to_line_painted(Highlight::Green).parse().unwrap();
        assert_eq!(parsed.message, Highlight::Green.paint("color changed"));
        assert_ne!(parsed.message, "color changed");
    }

    #[test]
    fn log_line_new_terminates_text() {
        assert_eq!(LogLine::new("a=b").as_str(), "a=b\n");
        assert_eq!(LogLine::new("a=b\n").len(), 4);
    }
}
