use bytes::{Bytes, BytesMut};
use compact_str::{format_compact, CompactString};
use tokio::io::{AsyncBufRead, AsyncReadExt};

use crate::errors::ServerError;
use crate::server_impl::{
    decode_header_fields, encode_header_fields, read_message_line, Headers, CRLF,
};

/// One response, decoded from a gateway script's stdout and written back to
/// the client verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub http_version: CompactString,
    pub status: u16,
    pub message: CompactString,
    pub headers: Headers,
    pub body: Bytes,
}

/// Decodes a response from the stream, reading the body through to
/// end-of-stream (gateway scripts do not declare lengths, they just exit).
/// A `Content-Length` header is synthesized when the script omitted one, so
/// the client can frame the relayed response. `Ok(None)` on an empty stream.
pub async fn decode_response<R>(reader: &mut R) -> Result<Option<HttpResponse>, ServerError>
where
    R: AsyncBufRead + Unpin,
{
    let Some(line) = read_message_line(reader).await? else {
        return Ok(None);
    };

    // `version status message`, where the message keeps its internal spaces
    let Some((http_version, rest)) = line.split_once(char::is_whitespace) else {
        return Err(ServerError::Decode(format!(
            "malformed status line: {line:?}"
        )));
    };
    let Some((status, message)) = rest.trim_start().split_once(char::is_whitespace) else {
        return Err(ServerError::Decode(format!(
            "malformed status line: {line:?}"
        )));
    };

    let status = status
        .parse::<u16>()
        .map_err(|_| ServerError::Decode(format!("non-numeric status code: {status:?}")))?;

    let mut headers = decode_header_fields(reader).await?;

    let mut body = Vec::new();
    reader.read_to_end(&mut body).await?;

    if !headers.contains("Content-Length") {
        headers.insert("Content-Length", format_compact!("{}", body.len()));
    }

    Ok(Some(HttpResponse {
        http_version: http_version.into(),
        status,
        message: message.trim_start().into(),
        headers,
        body: body.into(),
    }))
}

impl HttpResponse {
    /// Serializes the response into wire bytes. A `Content-Length` computed
    /// from the body is appended when the header map lacks one; the map
    /// itself is never mutated, so encoding stays idempotent.
    pub fn to_bytes(&self) -> Bytes {
        let mut head = format!(
            "{} {} {}{CRLF}",
            self.http_version, self.status, self.message
        );
        encode_header_fields(&mut head, &self.headers);
        if !self.headers.contains("Content-Length") {
            head.push_str(&format!("Content-Length: {}{CRLF}", self.body.len()));
        }
        head.push_str(CRLF);

        let mut buf = BytesMut::with_capacity(head.len() + self.body.len());
        buf.extend_from_slice(head.as_bytes());
        buf.extend_from_slice(&self.body);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn success_with_content_length() {
        let mut stream: &[u8] = b"HTTP/1.1 200 OK\r\n\
            Content-Type: text/html\r\n\
            Content-Length: 13\r\n\
            \r\n\
            Hello World!\n";

        let response = decode_response(&mut stream).await.unwrap().unwrap();

        assert_eq!(response.http_version, "HTTP/1.1");
        assert_eq!(response.status, 200);
        assert_eq!(response.message, "OK");
        assert_eq!(response.headers.get("Content-Type"), Some("text/html"));
        assert_eq!(response.headers.get("Content-Length"), Some("13"));
        assert_eq!(response.body.as_ref(), b"Hello World!\n");
    }

    #[tokio::test]
    async fn content_length_is_synthesized() {
        let mut stream: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\nHello\n";

        let response = decode_response(&mut stream).await.unwrap().unwrap();

        assert_eq!(response.headers.get("Content-Length"), Some("6"));
        assert_eq!(response.body.as_ref(), b"Hello\n");
    }

    #[tokio::test]
    async fn message_keeps_its_spaces() {
        let mut stream: &[u8] = b"HTTP/1.1 404 Not Found\r\n\r\n";

        let response = decode_response(&mut stream).await.unwrap().unwrap();

        assert_eq!(response.status, 404);
        assert_eq!(response.message, "Not Found");
    }

    #[tokio::test]
    async fn end_of_stream_is_not_an_error() {
        let mut stream: &[u8] = b"";
        assert!(decode_response(&mut stream).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_numeric_status_is_rejected() {
        let mut stream: &[u8] = b"HTTP/1.1 abc OK\r\n\r\n";
        let result = decode_response(&mut stream).await;

        assert!(matches!(result, Err(ServerError::Decode(_))));
    }

    #[tokio::test]
    async fn missing_message_is_rejected() {
        let mut stream: &[u8] = b"HTTP/1.1 200\r\n\r\n";
        let result = decode_response(&mut stream).await;

        assert!(matches!(result, Err(ServerError::Decode(_))));
    }

    #[test]
    fn build_is_byte_exact() {
        let mut headers = Headers::default();
        headers.insert("Content-Type", "text/html");
        headers.insert("Content-Length", "13");

        let response = HttpResponse {
            http_version: "HTTP/1.1".into(),
            status: 200,
            message: "OK".into(),
            headers,
            body: Bytes::from_static(b"Hello World!\n"),
        };

        let plain = b"HTTP/1.1 200 OK\r\n\
            Content-Type: text/html\r\n\
            Content-Length: 13\r\n\
            \r\n\
            Hello World!\n";

        assert_eq!(response.to_bytes().as_ref(), plain);
    }

    #[test]
    fn build_appends_missing_content_length() {
        let mut headers = Headers::default();
        headers.insert("Content-Type", "text/plain");

        let response = HttpResponse {
            http_version: "HTTP/1.1".into(),
            status: 200,
            message: "OK".into(),
            headers,
            body: Bytes::from_static(b"hey"),
        };

        let plain = b"HTTP/1.1 200 OK\r\n\
            Content-Type: text/plain\r\n\
            Content-Length: 3\r\n\
            \r\n\
            hey";

        assert_eq!(response.to_bytes().as_ref(), plain);
        assert_eq!(response.to_bytes(), response.to_bytes());
    }

    #[tokio::test]
    async fn encode_decode_round_trip() {
        let mut headers = Headers::default();
        headers.insert("Content-Type", "text/plain");
        headers.insert("Content-Length", "5");

        let response = HttpResponse {
            http_version: "HTTP/1.1".into(),
            status: 200,
            message: "OK".into(),
            headers,
            body: Bytes::from_static(b"hello"),
        };

        let encoded = response.to_bytes();
        let mut stream = encoded.as_ref();
        let decoded = decode_response(&mut stream).await.unwrap().unwrap();

        assert_eq!(decoded, response);
    }
}
