//! Per-connection session handling.
//!
//! Each accepted connection gets exactly one session running this loop: read
//! a line, decode it, dispatch it, encode the response, write it back. Lines
//! are processed strictly in order, so clients see responses in the order
//! they sent requests.
//!
//! The handler is generic over the stream so it works against a real
//! `TcpStream` and against in-memory pipes in tests.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace, warn};

use crate::dispatch::Dispatch;
use crate::protocol::{self, ClientResponse, INTERNAL_ERROR_CODE};

const MAX_LINE_LENGTH: usize = 4 * 1024;

/// Run the session loop until the peer disconnects.
///
/// Decode and dispatch failures are reported to the client as error responses
/// and never end the session; only end-of-stream or a transport error does.
/// Returns `Ok(())` on a clean disconnect. All stream resources are released
/// when this future completes, whichever way it exits.
pub async fn run_session<S>(stream: S, dispatcher: Arc<dyn Dispatch>) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut line = String::with_capacity(MAX_LINE_LENGTH);

    loop {
        line.clear();

        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            // EOF: the client hung up, which is the normal way out.
            trace!("Connection closed by client");
            return Ok(());
        }

        let raw = line.trim_end_matches(|c| c == '\r' || c == '\n');
        let response = process_line(raw, dispatcher.as_ref()).await;

        let mut encoded = protocol::encode(&response);
        encoded.push('\n');
        writer.write_all(encoded.as_bytes()).await?;
        writer.flush().await?;
    }
}

/// Decode one line and run it through the dispatch boundary.
///
/// Every failure path collapses into an error-carrying [`ClientResponse`];
/// this function cannot fail.
async fn process_line(raw: &str, dispatcher: &dyn Dispatch) -> ClientResponse {
    let request = match protocol::decode(raw) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Failed to decode request");
            return ClientResponse::from_error(e.code(), e.to_string());
        }
    };

    trace!(?request, "Dispatching request");

    match dispatcher.handle(request).await {
        Ok(response) => response,
        Err(e) => {
            debug!(error = %e, "Dispatch boundary failed");
            ClientResponse::from_error(INTERNAL_ERROR_CODE, e.to_string())
        }
    }
}
