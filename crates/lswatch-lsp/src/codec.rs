//! `Content-Length` framing for JSON-RPC over stdio.

use crate::types::LspError;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Write one framed message and flush.
pub async fn write_message<W>(writer: &mut W, body: &str) -> Result<(), LspError>
where
    W: AsyncWrite + Unpin,
{
    let message = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
    writer.write_all(message.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message. Returns `None` at end of stream.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<String>, LspError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }

        let line = line.trim();
        if line.is_empty() {
            // Tolerate stray blank lines between messages.
            if content_length.is_some() {
                break;
            }
            continue;
        }

        let Some((name, value)) = line.split_once(':') else {
            return Err(LspError::Protocol(format!("Malformed header: {line}")));
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            let length = value
                .trim()
                .parse()
                .map_err(|_| LspError::Protocol(format!("Invalid Content-Length: {}", value.trim())))?;
            content_length = Some(length);
        } else {
            trace!(header = name, "Ignoring header");
        }
    }

    let Some(content_length) = content_length else {
        return Err(LspError::Protocol("Missing Content-Length header".to_string()));
    };

    let mut content = vec![0u8; content_length];
    reader.read_exact(&mut content).await?;
    String::from_utf8(content)
        .map(Some)
        .map_err(|e| LspError::Protocol(format!("Invalid UTF-8 in message: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_reads_consecutive_messages() {
        let input = "Content-Length: 2\r\n\r\n{}Content-Length: 13\r\nContent-Type: application/vscode-jsonrpc\r\n\r\n{\"id\":1,\"a\":}";
        let mut reader = BufReader::new(input.as_bytes());

        assert_eq!(read_message(&mut reader).await.unwrap().as_deref(), Some("{}"));
        assert_eq!(
            read_message(&mut reader).await.unwrap().as_deref(),
            Some("{\"id\":1,\"a\":}")
        );
        assert_eq!(read_message(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_multibyte_body_length_is_in_bytes() {
        let (mut client, server) = tokio::io::duplex(1024);
        write_message(&mut client, "{\"name\":\"café\"}").await.unwrap();
        drop(client);

        let mut reader = BufReader::new(server);
        let body = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(body, "{\"name\":\"café\"}");
    }

    #[tokio::test]
    async fn test_missing_length_is_an_error() {
        let mut reader = BufReader::new("Content-Type: text\r\n\r\n{}".as_bytes());
        assert!(matches!(
            read_message(&mut reader).await,
            Err(LspError::Protocol(_))
        ));
    }
}
