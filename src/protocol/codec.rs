use std::io::Read;
use std::net::TcpStream;
use std::time::Duration;

use crate::protocol::messages::InboundRecord;

/// Maximum number of reads the codec will absorb while waiting for a `\r\n`
/// delimiter to appear. A stream that never delivers one is either a
/// misbehaving host or a desynchronised connection; either way we must not
/// grow the buffer without bound.
const MAX_SEGMENTS_WITHOUT_DELIMITER: usize = 10;

/// Frames newline-delimited JSON records off a TCP stream, carrying any
/// partial tail across reads.
pub struct Codec {
    stream: TcpStream,
    buffer: Vec<u8>,
    segments_without_delimiter: usize,
}

impl Codec {
    pub fn new(stream: TcpStream) -> anyhow::Result<Self> {
        stream.set_read_timeout(Some(Duration::from_secs(1)))?;
        Ok(Self { stream, buffer: Vec::new(), segments_without_delimiter: 0 })
    }

    pub fn try_clone_stream(&self) -> anyhow::Result<TcpStream> {
        Ok(self.stream.try_clone()?)
    }

    /// Performs one `read()` and returns every complete record that read
    /// produced, in order. An empty vec with `Ok` means "no record yet, try
    /// again" (either a timeout or a read that only extended a partial
    /// record). Malformed JSON records are logged and dropped, not surfaced
    /// as errors, since the stream itself is still healthy.
    pub fn poll(&mut self) -> anyhow::Result<Vec<InboundRecord>> {
        let mut chunk = [0u8; 4096];
        let read = match self.stream.read(&mut chunk) {
            Ok(read) => read,
            Err(err) if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) =>
                return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            anyhow::bail!("host closed the connection");
        }
        self.buffer.extend_from_slice(&chunk[..read]);

        let mut records = Vec::new();
        while let Some(pos) = find_delimiter(&self.buffer) {
            let line: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let line = &line[..line.len() - 2];
            self.segments_without_delimiter = 0;
            if line.is_empty() {
                continue;
            }
            match std::str::from_utf8(line) {
                Ok(text) => match serde_json::from_str::<InboundRecord>(text) {
                    Ok(record) => records.push(record),
                    Err(err) => log::warn!("dropping unparsable record: {err} ({text:?})"),
                },
                Err(err) => log::warn!("dropping non-UTF8 record: {err}"),
            }
        }

        if records.is_empty() {
            self.segments_without_delimiter += 1;
            if self.segments_without_delimiter > MAX_SEGMENTS_WITHOUT_DELIMITER {
                anyhow::bail!(
                    "runaway read buffer: {} reads without a record delimiter",
                    self.segments_without_delimiter
                );
            }
        }

        Ok(records)
    }
}

fn find_delimiter(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_delimiter_in_buffer() {
        assert_eq!(find_delimiter(b"abc\r\ndef"), Some(3));
        assert_eq!(find_delimiter(b"abc"), None);
    }

    /// Scenario 6 of the decision log: a stream chunked mid-record must
    /// still yield exactly the three well-formed records, in order.
    #[test]
    fn reassembles_records_split_across_reads() {
        use std::io::Write;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"{\"Event\":\"Polling\",\"Timestamp\":1.0,\"Host\":\"a\",\"Inst\":1}\r\n{\"Event\":\"Version").unwrap();
            stream.flush().unwrap();
            std::thread::sleep(Duration::from_millis(50));
            stream.write_all(b"\",\"Timestamp\":1.0,\"Host\":\"a\",\"Inst\":1}\r\n{\"Event\":\"Signal\",\"Timestamp\":1.0,\"Host\":\"a\",\"Inst\":1}\r\n").unwrap();
            stream.flush().unwrap();
        });

        let (server_stream, _) = listener.accept().unwrap();
        let mut codec = Codec::new(server_stream).unwrap();

        let mut records = Vec::new();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while records.len() < 3 && std::time::Instant::now() < deadline {
            records.extend(codec.poll().unwrap());
        }
        client.join().unwrap();

        assert_eq!(records.len(), 3);
    }
}
