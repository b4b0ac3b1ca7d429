use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::http::parser::{ParseError, declared_content_length, find_headers_end, parse_http_request};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::proxy::Dispatcher;

/// One client connection and its request/response cycle
pub struct Connection<S> {
    stream: S,
    buffer: Vec<u8>,
    state: ConnectionState,
    dispatcher: Arc<Dispatcher>,
    max_request_bytes: usize,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Closed,
}

/// What came off the wire when reading a request
enum ReadOutcome {
    Request(Request),
    Malformed(ParseError),
    Eof,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, dispatcher: Arc<Dispatcher>, max_request_bytes: usize) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(4096),
            state: ConnectionState::Reading,
            dispatcher,
            max_request_bytes,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            let state = std::mem::replace(&mut self.state, ConnectionState::Closed);

            self.state = match state {
                ConnectionState::Reading => match self.read_request().await? {
                    ReadOutcome::Request(req) => ConnectionState::Processing(req),
                    ReadOutcome::Malformed(e) => {
                        tracing::warn!(error = ?e, "Rejecting malformed request");
                        let writer = ResponseWriter::new(&e.to_response(), false);
                        ConnectionState::Writing(writer, false)
                    }
                    ReadOutcome::Eof => ConnectionState::Closed,
                },

                ConnectionState::Processing(req) => {
                    let keep_alive = req.keep_alive();

                    match self.handle_request(&req).await {
                        Some(response) => {
                            let writer = ResponseWriter::new(&response, keep_alive);
                            ConnectionState::Writing(writer, keep_alive)
                        }
                        None => ConnectionState::Closed,
                    }
                }

                ConnectionState::Writing(mut writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    if keep_alive {
                        ConnectionState::Reading // go back for next request
                    } else {
                        ConnectionState::Closed
                    }
                }

                ConnectionState::Closed => break,
            };
        }

        Ok(())
    }

    async fn read_request(&mut self) -> anyhow::Result<ReadOutcome> {
        loop {
            // Try parsing whatever we already have
            match parse_http_request(&self.buffer) {
                Ok((request, consumed)) => {
                    self.buffer.drain(..consumed);
                    return Ok(ReadOutcome::Request(request));
                }

                Err(ParseError::Incomplete) => {
                    if self.exceeds_limit() {
                        return Ok(ReadOutcome::Malformed(ParseError::TooLarge));
                    }
                }

                Err(e) => return Ok(ReadOutcome::Malformed(e)),
            }

            // Read more data
            let mut temp = [0u8; 4096];
            let n = self.stream.read(&mut temp).await?;

            if n == 0 {
                // Client closed connection
                return Ok(ReadOutcome::Eof);
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }

    fn exceeds_limit(&self) -> bool {
        match find_headers_end(&self.buffer) {
            Some(head_len) => declared_content_length(&self.buffer)
                .is_some_and(|len| head_len + 4 + len > self.max_request_bytes),
            None => self.buffer.len() > self.max_request_bytes,
        }
    }

    /// Dispatch while watching the client socket.
    ///
    /// Returns `None` if the client hung up first; dropping the dispatch
    /// future closes the upstream connection. Once pipelined input passes
    /// `max_request_bytes` the socket is left unread until the response is
    /// ready, and the next read reports the request as too large.
    async fn handle_request(&mut self, req: &Request) -> Option<Response> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let dispatch = dispatcher.dispatch(req);
        tokio::pin!(dispatch);

        let mut scratch = [0u8; 1024];
        loop {
            let room = self.buffer.len() <= self.max_request_bytes;

            tokio::select! {
                response = &mut dispatch => return Some(response),
                read = self.stream.read(&mut scratch), if room => match read {
                    Ok(0) | Err(_) => {
                        tracing::debug!(path = %req.path, "Client disconnected, cancelling upstream request");
                        return None;
                    }
                    // Pipelined bytes belong to the next request
                    Ok(n) => self.buffer.extend_from_slice(&scratch[..n]),
                },
            }
        }
    }
}
