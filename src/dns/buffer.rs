//! Low-level buffers for reading and writing DNS packets

use derive_more::{Display, Error};

/// Largest datagram the server will accept, per the DNS-over-UDP contract
pub const MAX_PACKET_SIZE: usize = 512;

/// Longest label permitted in a domain name
pub const MAX_LABEL_LENGTH: usize = 63;

#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum BufferError {
    #[display(fmt = "read or write past the end of the buffer")]
    EndOfBuffer,
    #[display(fmt = "domain label exceeds 63 octets")]
    LabelTooLong,
}

type Result<T> = std::result::Result<T, BufferError>;

/// Common interface between the codec and raw packet bytes.
///
/// Multi-byte integers are always big-endian, as everywhere in the DNS wire
/// format. Every primitive operation is bounds-checked; untrusted input can
/// never cause a read outside the underlying storage.
pub trait PacketBuffer {
    fn read(&mut self) -> Result<u8>;
    fn get(&self, pos: usize) -> Result<u8>;
    fn get_range(&self, start: usize, len: usize) -> Result<&[u8]>;
    fn write(&mut self, val: u8) -> Result<()>;
    fn set(&mut self, pos: usize, val: u8) -> Result<()>;
    fn pos(&self) -> usize;
    fn seek(&mut self, pos: usize) -> Result<()>;
    fn step(&mut self, steps: usize) -> Result<()>;

    fn read_u16(&mut self) -> Result<u16> {
        let res = ((self.read()? as u16) << 8) | (self.read()? as u16);

        Ok(res)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let res = ((self.read()? as u32) << 24)
            | ((self.read()? as u32) << 16)
            | ((self.read()? as u32) << 8)
            | (self.read()? as u32);

        Ok(res)
    }

    fn write_u8(&mut self, val: u8) -> Result<()> {
        self.write(val)
    }

    fn write_u16(&mut self, val: u16) -> Result<()> {
        self.write((val >> 8) as u8)?;
        self.write((val & 0xFF) as u8)?;

        Ok(())
    }

    fn write_u32(&mut self, val: u32) -> Result<()> {
        self.write(((val >> 24) & 0xFF) as u8)?;
        self.write(((val >> 16) & 0xFF) as u8)?;
        self.write(((val >> 8) & 0xFF) as u8)?;
        self.write((val & 0xFF) as u8)?;

        Ok(())
    }

    fn set_u16(&mut self, pos: usize, val: u16) -> Result<()> {
        self.set(pos, (val >> 8) as u8)?;
        self.set(pos + 1, (val & 0xFF) as u8)?;

        Ok(())
    }

    /// Read a length-prefixed domain name into an ordered label sequence.
    ///
    /// Compression pointers are not followed; the question section of a
    /// query addressed to an authoritative server has no preceding name to
    /// point at. A length octet promising more bytes than the buffer holds
    /// fails with `EndOfBuffer` before anything is read out of bounds.
    fn read_qname(&mut self, labels: &mut Vec<String>) -> Result<()> {
        loop {
            let len = self.read()? as usize;
            if len == 0 {
                break;
            }

            let start = self.pos();
            let raw = self.get_range(start, len)?;
            labels.push(String::from_utf8_lossy(raw).into_owned());
            self.step(len)?;
        }

        Ok(())
    }

    /// Write an ordered label sequence as length-prefixed labels followed by
    /// the terminating zero octet.
    fn write_qname(&mut self, labels: &[String]) -> Result<()> {
        for label in labels {
            if label.len() > MAX_LABEL_LENGTH {
                return Err(BufferError::LabelTooLong);
            }

            self.write_u8(label.len() as u8)?;
            for b in label.as_bytes() {
                self.write_u8(*b)?;
            }
        }

        self.write_u8(0)?;

        Ok(())
    }
}

/// Fixed-size buffer holding a single inbound datagram.
///
/// `len` is the length of the datagram actually received; reads are bounded
/// by it, so a query whose label lengths promise more bytes than arrived
/// fails instead of consuming the zeroed tail of the array.
pub struct BytePacketBuffer {
    pub buf: [u8; MAX_PACKET_SIZE],
    pub len: usize,
    pub pos: usize,
}

impl BytePacketBuffer {
    pub fn new() -> BytePacketBuffer {
        BytePacketBuffer {
            buf: [0; MAX_PACKET_SIZE],
            len: MAX_PACKET_SIZE,
            pos: 0,
        }
    }

    /// Copy raw bytes into a fresh buffer. Anything beyond 512 bytes is
    /// outside the protocol contract and ignored.
    pub fn from_slice(data: &[u8]) -> BytePacketBuffer {
        let mut buffer = BytePacketBuffer::new();
        let len = data.len().min(MAX_PACKET_SIZE);
        buffer.buf[..len].copy_from_slice(&data[..len]);
        buffer.len = len;
        buffer
    }
}

impl Default for BytePacketBuffer {
    fn default() -> Self {
        BytePacketBuffer::new()
    }
}

impl PacketBuffer for BytePacketBuffer {
    fn read(&mut self) -> Result<u8> {
        if self.pos >= self.len {
            return Err(BufferError::EndOfBuffer);
        }

        let res = self.buf[self.pos];
        self.pos += 1;

        Ok(res)
    }

    fn get(&self, pos: usize) -> Result<u8> {
        if pos >= self.len {
            return Err(BufferError::EndOfBuffer);
        }

        Ok(self.buf[pos])
    }

    fn get_range(&self, start: usize, len: usize) -> Result<&[u8]> {
        if start + len > self.len {
            return Err(BufferError::EndOfBuffer);
        }

        Ok(&self.buf[start..start + len])
    }

    fn write(&mut self, val: u8) -> Result<()> {
        if self.pos >= self.len {
            return Err(BufferError::EndOfBuffer);
        }

        self.buf[self.pos] = val;
        self.pos += 1;

        Ok(())
    }

    fn set(&mut self, pos: usize, val: u8) -> Result<()> {
        if pos >= self.len {
            return Err(BufferError::EndOfBuffer);
        }

        self.buf[pos] = val;

        Ok(())
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.len {
            return Err(BufferError::EndOfBuffer);
        }

        self.pos = pos;

        Ok(())
    }

    fn step(&mut self, steps: usize) -> Result<()> {
        if self.pos + steps > self.len {
            return Err(BufferError::EndOfBuffer);
        }

        self.pos += steps;

        Ok(())
    }
}

/// Growable buffer used when assembling a response
#[derive(Default)]
pub struct VectorPacketBuffer {
    pub buffer: Vec<u8>,
    pub pos: usize,
}

impl VectorPacketBuffer {
    pub fn new() -> VectorPacketBuffer {
        VectorPacketBuffer {
            buffer: Vec::new(),
            pos: 0,
        }
    }

    /// The assembled packet so far
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }
}

impl PacketBuffer for VectorPacketBuffer {
    fn read(&mut self) -> Result<u8> {
        if self.pos >= self.buffer.len() {
            return Err(BufferError::EndOfBuffer);
        }

        let res = self.buffer[self.pos];
        self.pos += 1;

        Ok(res)
    }

    fn get(&self, pos: usize) -> Result<u8> {
        if pos >= self.buffer.len() {
            return Err(BufferError::EndOfBuffer);
        }

        Ok(self.buffer[pos])
    }

    fn get_range(&self, start: usize, len: usize) -> Result<&[u8]> {
        if start + len > self.buffer.len() {
            return Err(BufferError::EndOfBuffer);
        }

        Ok(&self.buffer[start..start + len])
    }

    fn write(&mut self, val: u8) -> Result<()> {
        if self.pos < self.buffer.len() {
            self.buffer[self.pos] = val;
        } else {
            self.buffer.push(val);
        }
        self.pos += 1;

        Ok(())
    }

    fn set(&mut self, pos: usize, val: u8) -> Result<()> {
        if pos >= self.buffer.len() {
            return Err(BufferError::EndOfBuffer);
        }

        self.buffer[pos] = val;

        Ok(())
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.buffer.len() {
            return Err(BufferError::EndOfBuffer);
        }

        self.pos = pos;

        Ok(())
    }

    fn step(&mut self, steps: usize) -> Result<()> {
        if self.pos + steps > self.buffer.len() {
            return Err(BufferError::EndOfBuffer);
        }

        self.pos += steps;

        Ok(())
    }
}
