use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

use crate::error::Result;
use crate::transport::framing::{FramedReader, FramedWriter};
use crate::transport::{FrameReader, FrameWriter, Transport};

const DEFAULT_BUFFER: usize = 64 * 1024;

/// In-process transport over a tokio duplex pipe
///
/// Uses the same framing as the socket transports, so everything above it
/// behaves exactly as it would on a real connection.
pub struct MemoryTransport {
    reader: FramedReader<ReadHalf<DuplexStream>>,
    writer: FramedWriter<WriteHalf<DuplexStream>>,
    label: &'static str,
}

impl MemoryTransport {
    /// Create a pair of transports connected to each other.
    ///
    /// Frames sent on the first are received by the second and vice versa.
    pub fn pair() -> (Self, Self) {
        Self::pair_with_buffer(DEFAULT_BUFFER)
    }

    /// Like [`MemoryTransport::pair`] with a custom pipe buffer size in bytes
    pub fn pair_with_buffer(buffer: usize) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(buffer);
        (Self::wrap(a, "memory://a"), Self::wrap(b, "memory://b"))
    }

    fn wrap(stream: DuplexStream, label: &'static str) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: FramedReader::new(read),
            writer: FramedWriter::new(write),
            label,
        }
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_frame(bytes).await
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        self.reader.read_frame().await
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await
    }

    fn into_split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let this = *self;
        (Box::new(this.reader), Box::new(this.writer))
    }

    fn peer(&self) -> String {
        self.label.to_string()
    }
}
