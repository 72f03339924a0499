//! Newline-delimited JSON-RPC over stdio and TCP.

use crate::protocol::handler::{ProtocolHandler, ProtocolState};
use crate::protocol::jsonrpc::{ProtocolError, Response};
use crate::server::Server;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Longest request line accepted before the line is rejected unread.
pub const MAX_LINE_BYTES: usize = 1 << 20;

enum Frame {
    /// A complete line is in the buffer, terminator stripped
    Line,
    TooLong,
    Eof,
}

/// Serves one connection: a request per line in, a response per line out.
///
/// Ends at end of input, when the client sends `shutdown`, or when the server
/// shuts down. Lines that are not UTF-8 or exceed [`MAX_LINE_BYTES`] get a
/// parse error and the connection carries on.
pub async fn serve_lines<R, W>(server: Arc<Server>, reader: R, writer: W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    serve_lines_with_limit(server, reader, writer, MAX_LINE_BYTES).await
}

pub async fn serve_lines_with_limit<R, W>(
    server: Arc<Server>,
    mut reader: R,
    mut writer: W,
    max_line: usize,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let shutdown = server.shutdown_token();
    let mut handler = ProtocolHandler::new(server);
    let mut buf = Vec::new();

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = read_frame(&mut reader, &mut buf, max_line) => frame?,
        };
        let response = match frame {
            Frame::Eof => {
                debug!("peer closed input");
                break;
            }
            Frame::TooLong => {
                warn!(max_line, "request line too long, skipped");
                Some(Response::error(
                    None,
                    ProtocolError::parse_error(format!("request exceeds {} bytes", max_line)),
                ))
            }
            Frame::Line => match std::str::from_utf8(&buf) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => handler.handle_message(line).await,
                Err(e) => {
                    warn!("request is not valid UTF-8: {}", e);
                    Some(Response::error(None, ProtocolError::parse_error("invalid UTF-8")))
                }
            },
        };

        if let Some(response) = response {
            let mut out = serde_json::to_string(&response)?;
            out.push('\n');
            writer.write_all(out.as_bytes()).await?;
            writer.flush().await?;
        }
        if handler.state() == ProtocolState::Closed {
            debug!("client shut down the connection");
            break;
        }
    }
    Ok(())
}

/// Reads one line into `buf`, never buffering more than `max_line + 1` bytes of it.
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>, max_line: usize) -> io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let read = (&mut *reader)
        .take(max_line as u64 + 1)
        .read_until(b'\n', buf)
        .await?;
    if read == 0 {
        return Ok(Frame::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > max_line {
        buf.clear();
        skip_line(reader).await?;
        return Ok(Frame::TooLong);
    }
    // a final line without a terminator still counts
    Ok(Frame::Line)
}

async fn skip_line<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (used, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            }
        };
        reader.consume(used);
        if done {
            return Ok(());
        }
    }
}

pub async fn serve_stdio(server: Arc<Server>) -> io::Result<()> {
    info!("serving JSON-RPC on stdio");
    serve_lines(server, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

pub async fn serve_tcp(server: Arc<Server>, bind: &str) -> io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    serve_listener(server, listener).await
}

/// Accepts connections until shutdown; each connection has its own protocol state.
pub async fn serve_listener(server: Arc<Server>, listener: TcpListener) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, "serving JSON-RPC over TCP");
    let shutdown = server.shutdown_token();
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };
        debug!(%peer, "client connected");
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            let (read_half, write_half) = stream.into_split();
            if let Err(e) = serve_lines(server, BufReader::new(read_half), write_half).await {
                error!(%peer, "connection error: {}", e);
            }
            debug!(%peer, "client disconnected");
        });
    }
    Ok(())
}
