use cosim_transport::TransportStream;

use crate::error::Result;
use crate::socket::{SocketChannelReader, SocketChannelWriter};

#[cfg(target_os = "linux")]
use crate::local::{LocalChannelReader, LocalChannelWriter};

/// Reading half of a channel.
///
/// A tagged union over the transport variants, so the protocol codec stays
/// transport-agnostic. All multi-byte reads are little-endian.
pub enum ChannelReader {
    Socket(SocketChannelReader),
    #[cfg(target_os = "linux")]
    Local(LocalChannelReader),
}

impl ChannelReader {
    /// Read exactly `dst.len()` bytes of the incoming frame stream.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<()> {
        match self {
            ChannelReader::Socket(reader) => reader.read(dst),
            #[cfg(target_os = "linux")]
            ChannelReader::Local(reader) => reader.read(dst),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.read(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    fn disconnect(&mut self) {
        match self {
            ChannelReader::Socket(reader) => reader.disconnect(),
            #[cfg(target_os = "linux")]
            ChannelReader::Local(reader) => reader.disconnect(),
        }
    }
}

/// Writing half of a channel. All multi-byte writes are little-endian.
pub enum ChannelWriter {
    Socket(SocketChannelWriter),
    #[cfg(target_os = "linux")]
    Local(LocalChannelWriter),
}

impl ChannelWriter {
    /// Append bytes to the current frame.
    pub fn write(&mut self, src: &[u8]) -> Result<()> {
        match self {
            ChannelWriter::Socket(writer) => writer.write(src),
            #[cfg(target_os = "linux")]
            ChannelWriter::Local(writer) => writer.write(src),
        }
    }

    /// Finalize the current frame and deliver it atomically.
    ///
    /// Must be called exactly once per logical frame.
    pub fn end_write(&mut self) -> Result<()> {
        match self {
            ChannelWriter::Socket(writer) => writer.end_write(),
            #[cfg(target_os = "linux")]
            ChannelWriter::Local(writer) => writer.end_write(),
        }
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write(&value.to_le_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write(&value.to_le_bytes())
    }

    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.write(&value.to_le_bytes())
    }

    /// Length-prefixed UTF-8 string, no terminator.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_u32(value.len() as u32)?;
        self.write(value.as_bytes())
    }

    fn disconnect(&mut self) {
        match self {
            ChannelWriter::Socket(writer) => writer.disconnect(),
            #[cfg(target_os = "linux")]
            ChannelWriter::Local(writer) => writer.disconnect(),
        }
    }
}

/// A bidirectional frame channel.
///
/// Each direction is single-producer, single-consumer; the reader and
/// writer halves are independent apart from `disconnect`, which tears the
/// whole channel down.
pub struct Channel {
    reader: ChannelReader,
    writer: ChannelWriter,
}

impl Channel {
    /// Wrap a connected stream in a socket channel.
    pub fn from_stream(stream: TransportStream) -> Result<Self> {
        let writer_stream = stream.try_clone()?;
        Ok(Self {
            reader: ChannelReader::Socket(SocketChannelReader::new(stream)),
            writer: ChannelWriter::Socket(SocketChannelWriter::new(writer_stream)),
        })
    }

    #[cfg(target_os = "linux")]
    pub(crate) fn from_local_parts(
        reader: LocalChannelReader,
        writer: LocalChannelWriter,
    ) -> Self {
        Self {
            reader: ChannelReader::Local(reader),
            writer: ChannelWriter::Local(writer),
        }
    }

    pub fn reader(&mut self) -> &mut ChannelReader {
        &mut self.reader
    }

    pub fn writer(&mut self) -> &mut ChannelWriter {
        &mut self.writer
    }

    /// Split the channel so the two halves can live on different threads.
    pub fn into_split(self) -> (ChannelReader, ChannelWriter) {
        (self.reader, self.writer)
    }

    /// Tear the channel down. Idempotent; unblocks any in-flight read.
    pub fn disconnect(&mut self) {
        self.writer.disconnect();
        self.reader.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_pair() -> (Channel, Channel) {
        let (left, right) = TransportStream::pair().unwrap();
        (
            Channel::from_stream(left).unwrap(),
            Channel::from_stream(right).unwrap(),
        )
    }

    #[test]
    fn typed_values_roundtrip_little_endian() {
        let (mut sender, mut receiver) = channel_pair();

        sender.writer().write_u8(0x7F).unwrap();
        sender.writer().write_u16(0xBEEF).unwrap();
        sender.writer().write_u32(0xDEAD_BEEF).unwrap();
        sender.writer().write_u64(0x0123_4567_89AB_CDEF).unwrap();
        sender.writer().write_i64(-42).unwrap();
        sender.writer().write_string("Grüße").unwrap();
        sender.writer().end_write().unwrap();

        assert_eq!(receiver.reader().read_u8().unwrap(), 0x7F);
        assert_eq!(receiver.reader().read_u16().unwrap(), 0xBEEF);
        assert_eq!(receiver.reader().read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(receiver.reader().read_u64().unwrap(), 0x0123_4567_89AB_CDEF);
        assert_eq!(receiver.reader().read_i64().unwrap(), -42);

        let len = receiver.reader().read_u32().unwrap() as usize;
        let mut bytes = vec![0u8; len];
        receiver.reader().read(&mut bytes).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "Grüße");
    }

    #[test]
    fn split_halves_work_across_threads() {
        let (sender, mut receiver) = channel_pair();
        let (_sender_reader, mut sender_writer) = sender.into_split();

        let handle = std::thread::spawn(move || {
            sender_writer.write_u32(7).unwrap();
            sender_writer.end_write().unwrap();
        });

        assert_eq!(receiver.reader().read_u32().unwrap(), 7);
        handle.join().unwrap();
    }
}
