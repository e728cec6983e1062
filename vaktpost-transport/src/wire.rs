//! Line framing shared by both ends of the stream.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use vaktpost_core::events::Verdict;

use crate::TransportError;

/// Server answer to one submitted flow record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Verdict(Verdict),
    Rejected { reason: String },
}

impl Reply {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Reply::Rejected {
            reason: reason.into(),
        }
    }
}

/// Longest line either side accepts unless configured otherwise.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// One newline-delimited frame as read off the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete UTF-8 line without its terminator.
    Line(String),
    /// A line that cannot be decoded. The stream is positioned after it.
    Invalid(String),
}

/// Read the next frame, never buffering more than `max_len + 1` bytes.
///
/// An oversized line is skipped up to its newline and reported as
/// [`Frame::Invalid`]. A final line without a terminator is still returned.
/// `None` means the peer closed the stream.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Frame>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(max_len as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if read == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > max_len {
        discard_line(reader).await?;
        return Ok(Some(Frame::Invalid(format!(
            "line exceeds {max_len} bytes"
        ))));
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }

    Ok(Some(match String::from_utf8(buf) {
        Ok(line) => Frame::Line(line),
        Err(e) => Frame::Invalid(format!(
            "line is not valid UTF-8 (byte {})",
            e.utf8_error().valid_up_to()
        )),
    }))
}

/// Consume input up to and including the next newline, in buffer-sized steps.
async fn discard_line<R>(reader: &mut R) -> Result<(), TransportError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (consumed, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(pos) => (pos + 1, true),
                None => (available.len(), false),
            }
        };
        reader.consume(consumed);
        if done {
            return Ok(());
        }
    }
}

/// Serialize `value` as one JSON line and flush it.
pub async fn write_line<W, T>(writer: &mut W, value: &T) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut buf = serde_json::to_vec(value)?;
    buf.push(b'\n');
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaktpost_core::events::{Direction, FlowRecord, Protocol, Severity};

    #[test]
    fn reply_shapes() {
        let record = FlowRecord::new(
            "2024-05-01 10:00:00 +0000 UTC",
            Direction::Incoming,
            "10.0.0.5",
            "192.168.1.10",
            "22",
            Protocol::Tcp,
        );
        let verdict = Reply::Verdict(Verdict::new(record, Severity::High));
        let text = serde_json::to_string(&verdict).unwrap();
        assert!(text.starts_with(r#"{"verdict":{"#));
        assert!(text.contains(r#""severity":"HIGH""#));
        assert!(text.contains(r#""type":"Incoming""#));

        let rejected = serde_json::to_string(&Reply::rejected("bad time")).unwrap();
        assert_eq!(rejected, r#"{"rejected":{"reason":"bad time"}}"#);
    }

    #[tokio::test]
    async fn lines_are_newline_terminated() {
        let mut out = Vec::new();
        write_line(&mut out, &Reply::rejected("x")).await.unwrap();
        write_line(&mut out, &Reply::rejected("y")).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with('\n'));
    }

    #[tokio::test]
    async fn frames_split_on_newlines() {
        let mut input: &[u8] = b"first\r\nsecond\nlast";
        assert_eq!(
            read_frame(&mut input, 64).await.unwrap(),
            Some(Frame::Line("first".into()))
        );
        assert_eq!(
            read_frame(&mut input, 64).await.unwrap(),
            Some(Frame::Line("second".into()))
        );
        assert_eq!(
            read_frame(&mut input, 64).await.unwrap(),
            Some(Frame::Line("last".into()))
        );
        assert_eq!(read_frame(&mut input, 64).await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_line_is_skipped_whole() {
        let mut data = vec![b'a'; 100];
        data.extend_from_slice(b"\nnext\n");
        let mut input = tokio::io::BufReader::with_capacity(8, data.as_slice());

        let frame = read_frame(&mut input, 16).await.unwrap();
        assert!(matches!(frame, Some(Frame::Invalid(ref r)) if r.contains("16 bytes")));
        assert_eq!(
            read_frame(&mut input, 16).await.unwrap(),
            Some(Frame::Line("next".into()))
        );
    }

    #[tokio::test]
    async fn line_of_exactly_the_limit_is_accepted() {
        let mut input: &[u8] = b"abcd\n";
        assert_eq!(
            read_frame(&mut input, 4).await.unwrap(),
            Some(Frame::Line("abcd".into()))
        );
    }

    #[tokio::test]
    async fn invalid_utf8_is_reported_not_raised() {
        let mut input: &[u8] = b"{\"time\":\"\xff\xfe\"}\nok\n";
        let frame = read_frame(&mut input, 64).await.unwrap();
        assert!(matches!(frame, Some(Frame::Invalid(ref r)) if r.contains("UTF-8")));
        assert_eq!(
            read_frame(&mut input, 64).await.unwrap(),
            Some(Frame::Line("ok".into()))
        );
    }
}
