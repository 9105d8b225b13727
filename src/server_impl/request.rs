use bytes::{Bytes, BytesMut};
use compact_str::CompactString;
use tokio::io::{AsyncBufRead, AsyncReadExt};

use crate::errors::ServerError;
use crate::server_impl::{
    decode_header_fields, encode_header_fields, read_message_line, Headers, CRLF,
};

/// One parsed request. Owned by a single connection handler for the duration
/// of one exchange and discarded once the response is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: CompactString,
    pub target: CompactString,
    pub http_version: CompactString,
    pub headers: Headers,
    pub body: Bytes,
}

/// Decodes one request from the stream. `Ok(None)` means the peer closed the
/// connection before sending another request, which is not an error.
pub async fn decode_request<R>(reader: &mut R) -> Result<Option<HttpRequest>, ServerError>
where
    R: AsyncBufRead + Unpin,
{
    let Some(line) = read_message_line(reader).await? else {
        return Ok(None);
    };

    let mut tokens = line.split_whitespace();
    let (Some(method), Some(target), Some(http_version)) =
        (tokens.next(), tokens.next(), tokens.next())
    else {
        return Err(ServerError::Decode(format!(
            "malformed request line: {line:?}"
        )));
    };

    let (method, target, http_version) = (method.into(), target.into(), http_version.into());

    let headers = decode_header_fields(reader).await?;

    // absent or non-numeric lengths read as an empty body rather than failing
    let content_length = headers
        .get("Content-Length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = vec![0; content_length];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                ServerError::Decode("stream closed inside message body".into())
            }
            _ => ServerError::Io(err),
        })?;

    Ok(Some(HttpRequest {
        method,
        target,
        http_version,
        headers,
        body: body.into(),
    }))
}

impl HttpRequest {
    /// Serializes the request back into wire bytes. Headers come out in the
    /// order they went in; the body is appended untouched.
    pub fn to_bytes(&self) -> Bytes {
        let mut head = format!(
            "{} {} {}{CRLF}",
            self.method, self.target, self.http_version
        );
        encode_header_fields(&mut head, &self.headers);
        head.push_str(CRLF);

        let mut buf = BytesMut::with_capacity(head.len() + self.body.len());
        buf.extend_from_slice(head.as_bytes());
        buf.extend_from_slice(&self.body);
        buf.freeze()
    }
}
