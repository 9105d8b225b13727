//! Hand-rolled HTTP/1.1 framing and the pieces built on top of it: the
//! streaming message codec, the script gateway and the connection loop.

pub mod gateway;
pub mod request;
pub mod response;
pub mod server;

use compact_str::CompactString;
use derive_more::{Deref, DerefMut};
use memchr::memchr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::errors::ServerError;

pub(crate) const CRLF: &str = "\r\n";

/// Header fields in the order they were parsed.
///
/// Names stay case-sensitive exactly as received so a decoded message
/// serializes back byte-identically. [`Headers::insert`] is last-wins on an
/// exact name match and keeps the first occurrence's position; lookups are
/// case-insensitive, which is what reads of `Content-Length` and
/// `Connection` need.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deref, DerefMut)]
pub struct Headers(Vec<(CompactString, CompactString)>);

impl Headers {
    pub fn insert(&mut self, name: impl Into<CompactString>, value: impl Into<CompactString>) {
        let name = name.into();
        let value = value.into();

        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| unicase::eq(existing.as_str(), name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

fn trim_crlf(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Reads the next CRLF-terminated line, or `None` if the stream ended before
/// any bytes arrived.
pub(crate) async fn read_message_line<R>(reader: &mut R) -> Result<Option<String>, ServerError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line).await? == 0 {
        return Ok(None);
    }

    let line = std::str::from_utf8(trim_crlf(&line))
        .map_err(|_| ServerError::Decode("message line is not valid UTF-8".into()))?;

    Ok(Some(line.to_owned()))
}

/// Parses header fields up to (and consuming) the empty line that terminates
/// the header block. The stream ending first is a framing error.
pub(crate) async fn decode_header_fields<R>(reader: &mut R) -> Result<Headers, ServerError>
where
    R: AsyncBufRead + Unpin,
{
    let mut headers = Headers::default();
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Err(ServerError::Decode(
                "stream closed inside header block".into(),
            ));
        }

        let field = trim_crlf(&line);
        if field.is_empty() {
            return Ok(headers);
        }

        let colon = memchr(b':', field).ok_or_else(|| {
            ServerError::Decode(format!(
                "header field without a colon: {:?}",
                String::from_utf8_lossy(field)
            ))
        })?;

        let name = std::str::from_utf8(&field[..colon])
            .map_err(|_| ServerError::Decode("header name is not valid UTF-8".into()))?;
        let value = std::str::from_utf8(&field[colon + 1..])
            .map_err(|_| ServerError::Decode("header value is not valid UTF-8".into()))?;

        headers.insert(name, value.trim());
    }
}

pub(crate) fn encode_header_fields(buf: &mut String, headers: &Headers) {
    for (name, value) in headers.iter() {
        buf.push_str(name);
        buf.push_str(": ");
        buf.push_str(value);
        buf.push_str(CRLF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_preserves_first_occurrence_order() {
        let mut headers = Headers::default();
        headers.insert("Host", "a");
        headers.insert("Accept", "*/*");
        headers.insert("Host", "b");

        let names: Vec<_> = headers.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["Host", "Accept"]);
        assert_eq!(headers.get("Host"), Some("b"));
    }

    #[test]
    fn lookups_ignore_case_but_storage_does_not() {
        let mut headers = Headers::default();
        headers.insert("content-length", "3");

        assert_eq!(headers.get("Content-Length"), Some("3"));
        assert!(headers.contains("CONTENT-LENGTH"));
        assert_eq!(headers[0].0, "content-length");
    }

    #[tokio::test]
    async fn header_field_values_are_trimmed() {
        let mut stream: &[u8] = b"Host:   localhost  \r\nUser-Agent:test\r\n\r\n";
        let headers = decode_header_fields(&mut stream).await.unwrap();

        assert_eq!(headers.get("Host"), Some("localhost"));
        assert_eq!(headers.get("User-Agent"), Some("test"));
    }

    #[tokio::test]
    async fn field_without_colon_is_fatal() {
        let mut stream: &[u8] = b"Host localhost\r\n\r\n";
        let result = decode_header_fields(&mut stream).await;

        assert!(matches!(result, Err(ServerError::Decode(_))));
    }

    #[tokio::test]
    async fn truncated_header_block_is_fatal() {
        let mut stream: &[u8] = b"Host: localhost\r\n";
        let result = decode_header_fields(&mut stream).await;

        assert!(matches!(result, Err(ServerError::Decode(_))));
    }
}
