//! Big-endian cursors over fixed-layout device structures.

use crate::error::{AdminqError, Result};

/// Sequential big-endian writer into a byte buffer.
///
/// Layouts written through it are static, so running past the end is a bug in the
/// caller and panics like a slice index would.
pub struct WireWrite<'a>(
    /// The buffer to write into.
    pub &'a mut [u8],
    /// The current write position within the buffer.
    pub usize,
);

impl<'a> WireWrite<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        WireWrite(buf, 0)
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.0[self.1..self.1 + bytes.len()].copy_from_slice(bytes);
        self.1 += bytes.len();
        self
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.bytes(&[v])
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.bytes(&v.to_be_bytes())
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.bytes(&v.to_be_bytes())
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.bytes(&v.to_be_bytes())
    }

    /// Leaves `n` bytes untouched (reserved or padding fields).
    pub fn skip(&mut self, n: usize) -> &mut Self {
        self.1 += n;
        self
    }

    pub fn position(&self) -> usize {
        self.1
    }
}

/// Sequential big-endian reader over bytes that came from the device.
///
/// Every read is bounds checked; a short buffer is a protocol violation.
pub struct WireRead<'a>(
    /// The buffer to read from.
    pub &'a [u8],
    /// The current read position within the buffer.
    pub usize,
);

impl<'a> WireRead<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        WireRead(buf, 0)
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.1.checked_add(n).filter(|end| *end <= self.0.len());
        match end {
            Some(end) => {
                let out = &self.0[self.1..end];
                self.1 = end;
                Ok(out)
            }
            None => Err(AdminqError::protocol(format!(
                "truncated structure: need {n} bytes at offset {}, have {}",
                self.1,
                self.0.len()
            ))),
        }
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }

    pub fn position(&self) -> usize {
        self.1
    }
}

//
// ================================================================================================
//   UNITTESTS
// ================================================================================================
//
#[cfg(test)]
mod tests {
    use super::{WireRead, WireWrite};

    #[test]
    fn test_write_big_endian_fields() {
        let mut buf = [0u8; 16];
        let mut w = WireWrite::new(&mut buf);
        w.u32(0x0102_0304)
            .skip(2)
            .u16(0xaabb)
            .u64(0x1122_3344_5566_7788);
        assert_eq!(w.position(), 16);
        let expected: [u8; 16] = [
            1, 2, 3, 4, 0, 0, 0xaa, 0xbb, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88,
        ];
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_short_read_is_protocol_error() {
        let buf = [0u8, 1, 2];
        let mut r = WireRead::new(&buf);
        assert_eq!(r.u16().unwrap(), 1);
        assert!(matches!(r.u32(), Err(crate::AdminqError::Protocol(_))));
        assert_eq!(r.position(), 2);
    }
}
