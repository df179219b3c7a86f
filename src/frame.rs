//! Splitting an input stream into message frames.

use std::io::{self, BufRead};

/// One serialized message unit, without its delimiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Zero-based position in the stream
    pub index: usize,
    pub bytes: Vec<u8>,
    /// Set on the frame that ends at end-of-stream
    pub is_last: bool,
}

/// Reads frames from a buffered stream.
///
/// Without a delimiter the whole stream is one frame. With a delimiter every
/// occurrence ends a frame and whatever follows the last occurrence, even
/// nothing at all, is the final frame. The sequence is not restartable: after
/// the final frame or a read error the reader yields nothing more.
pub struct FrameReader<R> {
    reader: R,
    delimiter: Option<u8>,
    next_index: usize,
    finished: bool,
}

impl<R: BufRead> FrameReader<R> {
    pub fn new(reader: R, delimiter: Option<u8>) -> Self {
        Self {
            reader,
            delimiter,
            next_index: 0,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Read the next frame. Returns `Ok(None)` once the final frame was read.
    pub fn next_frame(&mut self) -> io::Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        let mut bytes = Vec::new();
        let read = match self.delimiter {
            None => self.reader.read_to_end(&mut bytes).map(|_| true),
            Some(delimiter) => self.reader.read_until(delimiter, &mut bytes).map(|_| {
                if bytes.last() == Some(&delimiter) {
                    bytes.pop();
                    false
                } else {
                    true
                }
            }),
        };

        let is_last = match read {
            Ok(is_last) => is_last,
            Err(e) => {
                self.finished = true;
                return Err(e);
            }
        };

        let frame = Frame {
            index: self.next_index,
            bytes,
            is_last,
        };
        self.next_index += 1;
        self.finished = is_last;
        Ok(Some(frame))
    }
}

impl<R: BufRead> Iterator for FrameReader<R> {
    type Item = io::Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}
