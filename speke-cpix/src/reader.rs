use std::io::{Cursor, Error, ErrorKind, Read, Result};

/// Big-endian reader over an in-memory box.
#[derive(Clone, Default)]
pub(crate) struct Reader {
    inner: Cursor<Vec<u8>>,
}

impl Reader {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self {
            inner: Cursor::new(data),
        }
    }

    pub(crate) fn has_more_data(&self) -> bool {
        self.inner.position() < self.get_length()
    }

    pub(crate) fn get_length(&self) -> u64 {
        self.inner.get_ref().len() as u64
    }

    pub(crate) fn get_position(&self) -> u64 {
        self.inner.position()
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0; 1];
        self.inner.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0; 4];
        self.inner.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub(crate) fn read_u24(&mut self) -> Result<u32> {
        let mut buf = [0; 3];
        self.inner.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes([0, buf[0], buf[1], buf[2]]))
    }

    pub(crate) fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0; N];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub(crate) fn read_bytes(&mut self, bytes: usize) -> Result<Vec<u8>> {
        let remaining = self.get_length() - self.get_position();

        if bytes as u64 > remaining {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                "Reader reads out of bounds.",
            ));
        }

        let mut buf = vec![0; bytes];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_big_endian() {
        let mut reader = Reader::new(vec![0, 0, 0, 0x34, 1, 0, 0, 2, 0xaa, 0xbb]);
        assert_eq!(reader.read_u32().unwrap(), 0x34);
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert_eq!(reader.read_u24().unwrap(), 2);
        assert_eq!(reader.read_array::<2>().unwrap(), [0xaa, 0xbb]);
        assert!(!reader.has_more_data());
    }

    #[test]
    fn test_read_bytes_out_of_bounds() {
        let mut reader = Reader::new(vec![1, 2, 3]);
        assert!(reader.read_bytes(4).is_err());
        assert_eq!(reader.read_bytes(3).unwrap(), vec![1, 2, 3]);
    }
}
