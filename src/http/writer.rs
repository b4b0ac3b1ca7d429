use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::response::Response;

/// A response serialized for the client, written out in one or more passes
pub struct ResponseWriter {
    buffer: Vec<u8>,
    written: usize,
}

impl ResponseWriter {
    /// Serialize `response`, stamping our own `Connection` header over any
    /// the upstream sent.
    pub fn new(response: &Response, keep_alive: bool) -> Self {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\n",
            response.status.as_u16(),
            response.status.reason_phrase()
        );

        for (name, value) in response
            .headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("Connection"))
        {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }

        head.push_str(if keep_alive {
            "Connection: keep-alive\r\n\r\n"
        } else {
            "Connection: close\r\n\r\n"
        });

        let mut buffer = head.into_bytes();
        buffer.extend_from_slice(&response.body);

        Self { buffer, written: 0 }
    }

    /// Write whatever has not been written yet, then flush
    pub async fn write_to_stream<W>(&mut self, stream: &mut W) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(rest) = self.buffer.get(self.written..).filter(|r| !r.is_empty()) {
            match stream.write(rest).await? {
                0 => anyhow::bail!("connection closed while writing"),
                n => self.written += n,
            }
        }

        stream.flush().await?;
        Ok(())
    }
}
