use crate::error::{Result, VmError};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read, SeekFrom};

/// Big-endian cursor over an in-memory buffer.
///
/// Used both for the class file itself and, wrapped around a method's
/// `Code` bytes, as a frame's program counter.
#[derive(Clone, Debug)]
pub struct ClassReader<T> {
    cursor: Cursor<T>,
}

impl<T: AsRef<[u8]>> ClassReader<T> {
    pub fn new(data: T) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    pub fn len(&self) -> u64 {
        self.cursor.get_ref().as_ref().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remaining(&self) -> usize {
        self.len().saturating_sub(self.position()) as usize
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn ensure(&self, wanted: usize) -> Result<()> {
        let remaining = self.remaining();
        if remaining < wanted {
            return Err(VmError::UnexpectedEof { wanted, remaining });
        }
        Ok(())
    }

    pub fn read_u1(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.cursor.read_u8()?)
    }

    pub fn read_u2(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.cursor.read_u16::<BigEndian>()?)
    }

    pub fn read_u4(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.cursor.read_u32::<BigEndian>()?)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        self.ensure(count)?;
        let mut buffer = vec![0; count];
        self.cursor.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Moves the cursor. Positions past the end are rejected, the end itself is allowed.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => self.position() as i64 + offset,
            SeekFrom::End(offset) => self.len() as i64 + offset,
        };
        if target < 0 || target as u64 > self.len() {
            return Err(VmError::InvalidBranchTarget(target));
        }
        self.cursor.set_position(target as u64);
        Ok(target as u64)
    }
}
