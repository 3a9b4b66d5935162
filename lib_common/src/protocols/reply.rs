use std::io;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Session failures shared by both protocols.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("error while reading from conn: {0}")]
    Read(#[source] io::Error),

    #[error("error while writing to conn: {0}")]
    Write(#[source] io::Error),

    #[error("client closed the connection")]
    ClientClosed,

    #[error("session cancelled by shutdown")]
    Cancelled,
}

/// Timestamp layout of a reply line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStyle {
    /// `time=2024-03-09T14:05:30Z message=...`
    Rfc3339,
    /// `time=09 Mar 24 14:05 UTC, message=...`
    Rfc822,
}

/// Renders one reply line, line break included.
pub fn format_reply(style: ReplyStyle, now: DateTime<Utc>, message: &str) -> String {
    match style {
        ReplyStyle::Rfc3339 => format!(
            "time={} message={}\n",
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
            message
        ),
        ReplyStyle::Rfc822 => format!(
            "time={}, message={}\n",
            now.format("%d %b %y %H:%M UTC"),
            message
        ),
    }
}

/// Sends `message` as one reply line in a single write.
pub async fn send_message<W>(
    writer: &mut W,
    style: ReplyStyle,
    message: &str,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let line = format_reply(style, Utc::now(), message);
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(ProtocolError::Write)?;
    writer.flush().await.map_err(ProtocolError::Write)
}

/// One read of at most `buf.len()` bytes, abandoned on shutdown.
///
/// No reassembly: whatever the first read returns is the client's input.
/// End of stream is [`ProtocolError::ClientClosed`].
pub async fn read_once<R>(
    reader: &mut R,
    buf: &mut [u8],
    shutdown: &CancellationToken,
) -> Result<usize, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let n = tokio::select! {
        _ = shutdown.cancelled() => return Err(ProtocolError::Cancelled),
        read = reader.read(buf) => read.map_err(ProtocolError::Read)?,
    };
    if n == 0 {
        return Err(ProtocolError::ClientClosed);
    }
    Ok(n)
}

/// Input with surrounding whitespace and line breaks removed.
/// `None` when the bytes are not UTF-8.
pub fn trimmed_input(bytes: &[u8]) -> Option<&str> {
    std::str::from_utf8(bytes).ok().map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 30).unwrap()
    }

    #[test]
    fn rfc3339_reply() {
        assert_eq!(
            format_reply(ReplyStyle::Rfc3339, at(), "color changed"),
            "time=2024-03-09T14:05:30Z message=color changed\n"
        );
    }

    #[test]
    fn rfc822_reply() {
        assert_eq!(
            format_reply(ReplyStyle::Rfc822, at(), "available memory in Mb - 512"),
            "time=09 Mar 24 14:05 UTC, message=available memory in Mb - 512\n"
        );
    }

    #[test]
    fn trims_line_oriented_input() {
        assert_eq!(trimmed_input(b"green\r\n"), Some("green"));
        assert_eq!(trimmed_input(b" 2 "), Some("2"));
        assert_eq!(trimmed_input(&[0xff, 0xfe]), None);
    }

    #[tokio::test]
    async fn read_once_reports_closed_and_cancelled() {
        let token = CancellationToken::new();
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let mut buf = [0u8; 8];
        assert!(matches!(
            read_once(&mut server, &mut buf, &token).await,
            Err(ProtocolError::ClientClosed)
        ));

        let (_client, mut server) = tokio::io::duplex(64);
        token.cancel();
        assert!(matches!(
            read_once(&mut server, &mut buf, &token).await,
            Err(ProtocolError::Cancelled)
        ));
    }
}
