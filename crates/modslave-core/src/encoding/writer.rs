use crate::EncodeError;

/// A byte writer that encodes into a caller-owned buffer.
///
/// Writers never grow the destination: a write that does not fit fails with
/// [`EncodeError::BufferTooSmall`] and leaves the position unchanged.
#[derive(Debug)]
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub const fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn as_written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), EncodeError> {
        self.write_all(&[value])
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        if self.remaining() < data.len() {
            return Err(EncodeError::BufferTooSmall);
        }
        let end = self.pos + data.len();
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    pub fn write_be_u16(&mut self, value: u16) -> Result<(), EncodeError> {
        self.write_all(&value.to_be_bytes())
    }

    /// Writes each register big-endian, all or nothing.
    pub fn write_be_u16s(&mut self, values: &[u16]) -> Result<(), EncodeError> {
        if self.remaining() < values.len() * 2 {
            return Err(EncodeError::BufferTooSmall);
        }
        for value in values {
            self.write_be_u16(*value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Writer;
    use crate::EncodeError;

    #[test]
    fn writes_registers_big_endian() {
        let mut buf = [0u8; 7];
        let mut w = Writer::new(&mut buf);
        w.write_u8(0x06).unwrap();
        w.write_be_u16s(&[0x022B, 0x0001, 0x0064]).unwrap();
        assert_eq!(w.as_written(), &[0x06, 0x02, 0x2B, 0x00, 0x01, 0x00, 0x64]);
        assert_eq!(w.remaining(), 0);
    }

    #[test]
    fn oversized_write_leaves_position() {
        let mut buf = [0u8; 3];
        let mut w = Writer::new(&mut buf);
        w.write_u8(0x02).unwrap();
        assert_eq!(
            w.write_be_u16s(&[0x0001, 0x0002]).unwrap_err(),
            EncodeError::BufferTooSmall
        );
        assert_eq!(w.position(), 1);
        w.write_be_u16(0xABCD).unwrap();
        assert_eq!(w.write_u8(0).unwrap_err(), EncodeError::BufferTooSmall);
    }
}
