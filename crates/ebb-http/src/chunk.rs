//! HTTP/1.1 chunked transfer coding.
//!
//! ```text
//! <hex size>[;ext]\r\n<size bytes>\r\n   ... repeated
//! 0\r\n[trailer fields\r\n]\r\n          terminator
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{HttpError, HttpResult};

/// The frame that ends a chunked body.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Longest size or trailer line accepted by [`ChunkDecoder`].
const MAX_LINE: usize = 4096;

/// Frame `data` as one chunk. `data` must not be empty: an empty chunk is
/// the terminator.
pub fn encode_chunk(data: &[u8]) -> Bytes {
    debug_assert!(!data.is_empty(), "empty chunk would end the body");
    let size = format!("{:x}\r\n", data.len());
    let mut frame = BytesMut::with_capacity(size.len() + data.len() + 2);
    frame.put_slice(size.as_bytes());
    frame.put_slice(data);
    frame.put_slice(b"\r\n");
    frame.freeze()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    Data { remaining: usize },
    DataCr,
    DataLf,
    Trailer,
    Done,
}

/// Incremental decoder for a chunked body.
///
/// Input may be split anywhere. Chunk extensions are ignored and trailer
/// fields are skipped.
#[derive(Debug)]
pub struct ChunkDecoder {
    state: State,
    line: Vec<u8>,
    decoded: BytesMut,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Size,
            line: Vec::new(),
            decoded: BytesMut::new(),
        }
    }

    /// Whether the terminating chunk and trailer section were seen.
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Decode as much of `input` as possible.
    pub fn feed(&mut self, mut input: &[u8]) -> HttpResult<()> {
        while !input.is_empty() {
            match self.state {
                State::Size => {
                    let Some(line) = self.read_line(&mut input)? else {
                        return Ok(());
                    };
                    let size = parse_size(&line)?;
                    self.state = if size == 0 {
                        State::Trailer
                    } else {
                        State::Data { remaining: size }
                    };
                }
                State::Data { remaining } => {
                    let n = remaining.min(input.len());
                    self.decoded.extend_from_slice(&input[..n]);
                    input = &input[n..];
                    self.state = if n == remaining {
                        State::DataCr
                    } else {
                        State::Data {
                            remaining: remaining - n,
                        }
                    };
                }
                State::DataCr => {
                    expect_byte(&mut input, b'\r')?;
                    self.state = State::DataLf;
                }
                State::DataLf => {
                    expect_byte(&mut input, b'\n')?;
                    self.state = State::Size;
                }
                State::Trailer => {
                    let Some(line) = self.read_line(&mut input)? else {
                        return Ok(());
                    };
                    if line.is_empty() {
                        self.state = State::Done;
                    }
                }
                State::Done => {
                    return Err(HttpError::InvalidChunk(format!(
                        "{} bytes after the last chunk",
                        input.len()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Take the payload decoded so far.
    pub fn take_decoded(&mut self) -> Bytes {
        self.decoded.split().freeze()
    }

    /// The remaining payload, or an error if the body was cut short.
    pub fn finish(mut self) -> HttpResult<Bytes> {
        if !self.is_done() {
            return Err(HttpError::IncompleteChunkedBody);
        }
        Ok(self.take_decoded())
    }

    /// Accumulate up to a CRLF. Returns the line without its terminator,
    /// or `None` if more input is needed.
    fn read_line(&mut self, input: &mut &[u8]) -> HttpResult<Option<Vec<u8>>> {
        match input.iter().position(|&b| b == b'\n') {
            Some(end) => {
                self.line.extend_from_slice(&input[..end]);
                *input = &input[end + 1..];
                let mut line = std::mem::take(&mut self.line);
                if line.pop() != Some(b'\r') {
                    return Err(HttpError::InvalidChunk("bare LF in chunk line".into()));
                }
                Ok(Some(line))
            }
            None => {
                self.line.extend_from_slice(input);
                *input = &[];
                if self.line.len() > MAX_LINE {
                    return Err(HttpError::InvalidChunk("chunk line too long".into()));
                }
                Ok(None)
            }
        }
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_size(line: &[u8]) -> HttpResult<usize> {
    let size = match line.iter().position(|&b| b == b';') {
        Some(ext) => &line[..ext],
        None => line,
    };
    let size = std::str::from_utf8(size)
        .map_err(|_| HttpError::InvalidChunk("size is not ASCII".into()))?
        .trim_matches([' ', '\t']);
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(HttpError::InvalidChunk(format!("bad chunk size {size:?}")));
    }
    usize::from_str_radix(size, 16)
        .map_err(|_| HttpError::InvalidChunk(format!("chunk size {size} overflows")))
}

fn expect_byte(input: &mut &[u8], expected: u8) -> HttpResult<()> {
    match input.split_first() {
        Some((&b, rest)) if b == expected => {
            *input = rest;
            Ok(())
        }
        _ => Err(HttpError::InvalidChunk(
            "chunk data not followed by CRLF".into(),
        )),
    }
}

/// Decode a complete chunked body.
pub fn dechunk(wire: &[u8]) -> HttpResult<Bytes> {
    let mut decoder = ChunkDecoder::new();
    decoder.feed(wire)?;
    decoder.finish()
}
