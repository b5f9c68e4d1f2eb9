//! The byte-stream seam between the protocol engine and whatever carries it.
//!
//! The engine only needs blocking reads and writes plus one escape hatch:
//! discarding input that arrived while the instrument was streaming samples.

use std::io::{Read, Write};

/// An open bidirectional byte stream to the instrument.
///
/// Reads and writes block until satisfied or the underlying transport fails;
/// the read timeout must be configured generously enough to outlast the
/// firmware's worst-case response latency.
pub trait Transport: Read + Write {
    /// Throw away any bytes received but not yet read.
    ///
    /// Used when leaving sampling mode: sample bytes still in flight would
    /// otherwise be mistaken for the next command's response.
    fn discard_input(&mut self) -> std::io::Result<()>;
}

impl Transport for Box<dyn serialport::SerialPort> {
    fn discard_input(&mut self) -> std::io::Result<()> {
        self.clear(serialport::ClearBuffer::Input)
            .map_err(std::io::Error::from)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::Transport;
    use std::io::{Read, Write};

    /// Scripted in-memory transport: records everything written and serves
    /// reads from a canned response buffer.
    #[derive(Debug)]
    pub(crate) struct MockTransport {
        pub written: Vec<u8>,
        pub responses: Vec<u8>,
        pub read_pos: usize,
        pub discards: usize,
    }

    impl MockTransport {
        pub fn new(responses: Vec<u8>) -> Self {
            Self {
                written: Vec::new(),
                responses,
                read_pos: 0,
                discards: 0,
            }
        }

        pub fn unread(&self) -> &[u8] {
            &self.responses[self.read_pos..]
        }
    }

    impl Read for MockTransport {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let available = &self.responses[self.read_pos..];
            let n = available.len().min(buf.len());
            buf[..n].copy_from_slice(&available[..n]);
            self.read_pos += n;
            Ok(n)
        }
    }

    impl Write for MockTransport {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Transport for MockTransport {
        fn discard_input(&mut self) -> std::io::Result<()> {
            self.read_pos = self.responses.len();
            self.discards += 1;
            Ok(())
        }
    }
}
