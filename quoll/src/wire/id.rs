use futures::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::WireError;
use crate::Result;

/// Cap on a single identification line, per RFC 4253 §4.2.
const MAX_ID_LEN: usize = 255;

/// Lines a server may send before its identification string; bounded so a
/// hostile peer cannot stream preamble forever.
const MAX_PREAMBLE_LINES: usize = 64;

/// The `SSH-protoversion-softwareversion` identification string exchanged
/// as the first line of the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Id(String);

impl Id {
    /// Build a protocol version `2.0` identifier from a software version
    /// and an optional comment.
    pub fn v2(software: impl AsRef<str>, comment: Option<&str>) -> Self {
        match comment {
            Some(comment) => Self(format!("SSH-2.0-{} {comment}", software.as_ref())),
            None => Self(format!("SSH-2.0-{}", software.as_ref())),
        }
    }

    /// The identification line, without the trailing CRLF.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Write the identification line followed by CRLF.
    pub async fn to_writer<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(self.0.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;

        Ok(())
    }

    /// Read the peer identification, skipping any preamble lines that do
    /// not start with `SSH-`.
    pub async fn from_reader<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Self> {
        for _ in 0..MAX_PREAMBLE_LINES {
            let mut line = Vec::with_capacity(64);

            let read = reader
                .take((MAX_ID_LEN + 2) as u64)
                .read_until(b'\n', &mut line)
                .await?;
            if read == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
            if !line.ends_with(b"\n") {
                return Err(WireError::BadId.into());
            }

            while matches!(line.last(), Some(b'\r' | b'\n')) {
                line.pop();
            }

            if line.starts_with(b"SSH-") {
                let line = String::from_utf8(line).map_err(|_| WireError::BadId)?;

                return if line.starts_with("SSH-2.0-") || line.starts_with("SSH-1.99-") {
                    Ok(Self(line))
                } else {
                    Err(WireError::BadId.into())
                };
            }

            tracing::debug!("Skipped a banner line before the peer identification");
        }

        Err(WireError::BadId.into())
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identification_roundtrip() {
        futures::executor::block_on(async {
            let id = Id::v2("test_1.0", None);

            let mut wire = Vec::new();
            id.to_writer(&mut wire).await.expect("writable");
            assert_eq!(wire, b"SSH-2.0-test_1.0\r\n");

            let mut reader = futures::io::Cursor::new(wire);
            assert_eq!(Id::from_reader(&mut reader).await.expect("readable"), id);
        });
    }

    #[test]
    fn preamble_lines_are_skipped() {
        futures::executor::block_on(async {
            let mut reader =
                futures::io::Cursor::new(&b"welcome\r\nto the machine\r\nSSH-2.0-srv\r\n"[..]);

            let id = Id::from_reader(&mut reader).await.expect("readable");
            assert_eq!(id.as_str(), "SSH-2.0-srv");
        });
    }

    #[test]
    fn oversized_line_is_rejected() {
        futures::executor::block_on(async {
            let mut wire = vec![b'x'; 512];
            wire.extend_from_slice(b"\r\nSSH-2.0-srv\r\n");

            let mut reader = futures::io::Cursor::new(wire);
            assert!(Id::from_reader(&mut reader).await.is_err());
        });
    }

    #[test]
    fn old_protocol_version_is_rejected() {
        futures::executor::block_on(async {
            let mut reader = futures::io::Cursor::new(&b"SSH-1.5-old\r\n"[..]);
            assert!(Id::from_reader(&mut reader).await.is_err());
        });
    }
}
