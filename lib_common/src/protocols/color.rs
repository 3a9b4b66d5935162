//! # Attribute Negotiation
//!
//! Service 1. The client sends a colour name, the server applies it to the
//! shared [`ColorState`] if recognized and answers with one line. One read,
//! one reply, close; an unknown name is answered, never retried.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use super::reply::{read_once, send_message, trimmed_input, ProtocolError, ReplyStyle};
use crate::core::admission::{Connection, ConnectionHandler};
use crate::loggers::highlight::{ColorState, Highlight};
use crate::loggers::loggerpipe::PipeLogger;

/// Largest colour name read from a client.
pub const MAX_ATTRIBUTE_LEN: usize = 128;

pub const COLOR_CHANGED: &str = "color changed";
pub const UNSUPPORTED_COLOR: &str = "unsupported color";

/// Result of one negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorOutcome {
    Changed(Highlight),
    /// The raw input, lossily decoded and trimmed.
    Unsupported(String),
}

pub struct ColorNegotiation {
    state: Arc<ColorState>,
    logger: Arc<PipeLogger>,
}

impl ColorNegotiation {
    pub fn new(state: Arc<ColorState>, logger: Arc<PipeLogger>) -> Self {
        Self { state, logger }
    }

    pub fn state(&self) -> &Arc<ColorState> {
        &self.state
    }

    /// Runs one session and logs its start, result and end.
    pub async fn serve<S>(&self, mut conn: Connection<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let ordinal = conn.ordinal.to_string();
        self.logger
            .info("start serving", &[("conn", ordinal.clone())])
            .await;

        match self.negotiate(&mut conn).await {
            Ok(outcome) => {
                let color = match &outcome {
                    ColorOutcome::Changed(highlight) => highlight.name().to_string(),
                    ColorOutcome::Unsupported(raw) => raw.clone(),
                };
                let message = match outcome {
                    ColorOutcome::Changed(_) => COLOR_CHANGED,
                    ColorOutcome::Unsupported(_) => UNSUPPORTED_COLOR,
                };
                self.logger
                    .info(message, &[("color", color), ("conn", ordinal.clone())])
                    .await;
            }
            Err(ProtocolError::ClientClosed | ProtocolError::Cancelled) => {}
            Err(e) => {
                self.logger
                    .error(&e.to_string(), &[("conn", ordinal.clone())])
                    .await;
            }
        }

        self.logger.info("stop serving", &[("conn", ordinal)]).await;
    }

    /// Reads the colour name, applies it and replies.
    ///
    /// On a read or write error nothing (further) is sent.
    pub async fn negotiate<S>(&self, conn: &mut Connection<S>) -> Result<ColorOutcome, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut input = [0u8; MAX_ATTRIBUTE_LEN];
        let n = read_once(&mut conn.stream, &mut input, &conn.shutdown).await?;

        let outcome = match trimmed_input(&input[..n]).and_then(Highlight::from_name) {
            Some(highlight) => {
                self.state.set(highlight);
                ColorOutcome::Changed(highlight)
            }
            None => ColorOutcome::Unsupported(
                String::from_utf8_lossy(&input[..n]).trim().to_string(),
            ),
        };

        let reply = match outcome {
            ColorOutcome::Changed(_) => COLOR_CHANGED,
            ColorOutcome::Unsupported(_) => UNSUPPORTED_COLOR,
        };
        send_message(&mut conn.stream, ReplyStyle::Rfc3339, reply).await?;
        Ok(outcome)
    }
}

impl ConnectionHandler for ColorNegotiation {
    async fn handle(&self, conn: Connection) {
        self.serve(conn).await
    }
}
