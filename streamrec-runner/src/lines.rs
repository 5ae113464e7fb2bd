use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Splits a child output pipe into lines.
///
/// `\n`, `\r` and `\r\n` all end a line, so the encoder's carriage-return
/// progress updates arrive one by one instead of as a single growing line.
/// Bytes that are not valid UTF-8 are replaced rather than failing the read.
///
/// A line longer than the maximum length is handed out in pieces of that
/// length, so a stream that never ends a line cannot grow the buffer forever.
///
/// `next_line` is cancel safe: a partially read line is kept in the reader
/// and completed by the next call, so it can sit in a `tokio::select!`.
pub struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    skip_lf: bool,
    max_line_length: usize,
}

/// Longest line returned in one piece
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
            skip_lf: false,
            max_line_length: MAX_LINE_LENGTH,
        }
    }

    #[cfg(test)]
    fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max.max(1);
        self
    }

    /// Next line without its terminator. `Ok(None)` means the pipe is closed;
    /// `Ok(Some(""))` is a blank line.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            let available = self.reader.fill_buf().await?;

            if available.is_empty() {
                self.skip_lf = false;
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }

            if self.skip_lf {
                self.skip_lf = false;
                if available[0] == b'\n' {
                    self.reader.consume(1);
                    continue;
                }
            }

            let room = self.max_line_length.saturating_sub(self.buf.len());
            let window = &available[..available.len().min(room)];

            match window.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(end) => {
                    self.skip_lf = window[end] == b'\r';
                    self.buf.extend_from_slice(&window[..end]);
                    self.reader.consume(end + 1);
                    return Ok(Some(self.take_line()));
                }
                None => {
                    let len = window.len();
                    self.buf.extend_from_slice(window);
                    self.reader.consume(len);
                    if self.buf.len() >= self.max_line_length {
                        return Ok(Some(self.take_line()));
                    }
                }
            }
        }
    }

    fn take_line(&mut self) -> String {
        let bytes = std::mem::take(&mut self.buf);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(input: &[u8]) -> Vec<String> {
        let mut reader = LineReader::new(input);
        let mut lines = Vec::new();
        while let Some(line) = reader.next_line().await.unwrap() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_blank_lines_are_not_end_of_stream() {
        let lines = collect(b"first\n\n\nlast\n").await;
        assert_eq!(lines, vec!["first", "", "", "last"]);
    }

    #[tokio::test]
    async fn test_final_line_without_newline() {
        let lines = collect(b"one\ntwo").await;
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_carriage_return_terminators() {
        let lines = collect(b"frame=1\rframe=2\rdone\r\nnext\n").await;
        assert_eq!(lines, vec!["frame=1", "frame=2", "done", "next"]);
    }

    #[tokio::test]
    async fn test_empty_input_is_closed() {
        let mut reader = LineReader::new(&b""[..]);
        assert_eq!(reader.next_line().await.unwrap(), None);
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let lines = collect(b"title=\xff\xfe\nok\n").await;
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("title="));
        assert_eq!(lines[1], "ok");
    }

    #[tokio::test]
    async fn test_overlong_line_is_split() {
        let mut reader = LineReader::new(&b"abcdefghij\nxy\n"[..]).with_max_line_length(4);
        let mut lines = Vec::new();
        while let Some(line) = reader.next_line().await.unwrap() {
            lines.push(line);
        }
        assert_eq!(lines, vec!["abcd", "efgh", "ij", "xy"]);
    }

    #[tokio::test]
    async fn test_unterminated_stream_stays_bounded() {
        let (mut tx, rx) = tokio::io::duplex(1024);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            tx.write_all(&[b'x'; 10_000]).await.unwrap();
            tx
        });

        let mut reader = LineReader::new(rx).with_max_line_length(1000);
        for _ in 0..10 {
            let line = reader.next_line().await.unwrap().unwrap();
            assert_eq!(line.len(), 1000);
        }
        let tx = writer.await.unwrap();
        drop(tx);
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_line_split_across_reads() {
        let (mut tx, rx) = tokio::io::duplex(8);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            tx.write_all(b"a fairly long line that spans reads\nshort\n")
                .await
                .unwrap();
        });

        let mut reader = LineReader::new(rx);
        assert_eq!(
            reader.next_line().await.unwrap().as_deref(),
            Some("a fairly long line that spans reads")
        );
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("short"));
        writer.await.unwrap();
        assert_eq!(reader.next_line().await.unwrap(), None);
    }
}
