use crate::error::{ErrorBuilder, ErrorContext, ErrorKind};

/// Bounded forward reader over a byte slice. |pos| is the current byte and
/// |bit_offset| the number of bits of that byte already consumed, so reads
/// of a few bits at a time stay cheap and byte-aligned helpers can insist
/// on `bit_offset == 0`.
pub struct InputStream<'a> {
    data: &'a [u8],
    pos: usize,
    bit_offset: usize,
}

impl ErrorContext for InputStream<'_> {}

impl<'a> InputStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        InputStream {
            data,
            pos: 0,
            bit_offset: 0,
        }
    }

    /// Bytes left to read, counting a partially consumed byte as whole.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Read `num_bits` (1..=64) little-endian, LSB-first across bytes.
    pub fn read_bits(&mut self, num_bits: usize) -> Result<u64, ErrorBuilder> {
        if num_bits == 0 || num_bits > 64 {
            return self.corrupted("invalid bit read size");
        }
        let bytes = (num_bits + self.bit_offset + 7) / 8;
        let full_bytes = (num_bits + self.bit_offset) / 8;
        if bytes > self.remaining() {
            return self.raise(
                ErrorKind::InputUnderflow,
                format!("{} bits wanted, {} bytes left", num_bits, self.remaining()),
            );
        }

        let result = read_bits_le(&self.data[self.pos..], num_bits, self.bit_offset);
        self.bit_offset = (num_bits + self.bit_offset) % 8;
        self.pos += full_bytes;
        Ok(result)
    }

    /// Move the bit cursor back so the bits can be read again.
    pub fn rewind_bits(&mut self, num_bits: usize) -> Result<(), ErrorBuilder> {
        let consumed = self.pos * 8 + self.bit_offset;
        if num_bits > consumed {
            return self.corrupted("rewind past the start of the stream");
        }
        let total = consumed - num_bits;
        self.pos = total / 8;
        self.bit_offset = total % 8;
        Ok(())
    }

    /// Discard the rest of the current byte if any of it has been read.
    pub fn align(&mut self) -> Result<(), ErrorBuilder> {
        if self.bit_offset != 0 {
            if self.remaining() == 0 {
                return self.raise(ErrorKind::InputUnderflow, "align past the end".into());
            }
            self.pos += 1;
            self.bit_offset = 0;
        }
        Ok(())
    }

    /// Take `len` whole bytes. The stream must be byte aligned.
    pub fn read_ptr(&mut self, len: usize) -> Result<&'a [u8], ErrorBuilder> {
        if self.bit_offset != 0 {
            return self.corrupted("byte access on an unaligned stream");
        }
        if len > self.remaining() {
            return self.raise(
                ErrorKind::InputUnderflow,
                format!("{} bytes wanted, {} left", len, self.remaining()),
            );
        }
        let chunk = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(chunk)
    }

    /// Skip `len` whole bytes. The stream must be byte aligned.
    pub fn advance(&mut self, len: usize) -> Result<(), ErrorBuilder> {
        self.read_ptr(len).map(|_| ())
    }

    /// Split off a bounded sub-stream of `len` bytes and advance past it.
    pub fn sub_stream(&mut self, len: usize) -> Result<InputStream<'a>, ErrorBuilder> {
        Ok(InputStream::new(self.read_ptr(len)?))
    }
}

/// Bounded writer over a byte slice.
pub struct OutputStream<'a> {
    data: &'a mut [u8],
    pos: usize,
}

impl ErrorContext for OutputStream<'_> {}

impl<'a> OutputStream<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        OutputStream { data, pos: 0 }
    }

    pub fn written(&self) -> usize {
        self.pos
    }

    /// Bytes still free in the destination.
    pub fn space(&self) -> usize {
        self.data.len() - self.pos
    }

    fn full<T>(&self, wanted: usize) -> Result<T, ErrorBuilder> {
        self.raise(
            ErrorKind::OutputOverflow,
            format!("{} bytes wanted, {} left in destination", wanted, self.space()),
        )
    }

    pub fn write_byte(&mut self, symb: u8) -> Result<(), ErrorBuilder> {
        if self.space() == 0 {
            return self.full(1);
        }
        self.data[self.pos] = symb;
        self.pos += 1;
        Ok(())
    }

    pub fn write_slice(&mut self, src: &[u8]) -> Result<(), ErrorBuilder> {
        self.write_ptr(src.len())?.copy_from_slice(src);
        Ok(())
    }

    /// Reserve `len` bytes and hand them out for writing.
    pub fn write_ptr(&mut self, len: usize) -> Result<&mut [u8], ErrorBuilder> {
        if len > self.space() {
            return self.full(len);
        }
        let chunk = &mut self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(chunk)
    }

    /// Extend the output with `len` bytes copied from `offset` bytes back,
    /// one at a time so an offset smaller than the length repeats the
    /// pattern produced so far.
    pub fn copy_match(&mut self, offset: usize, len: usize) -> Result<(), ErrorBuilder> {
        if len > self.space() {
            return self.full(len);
        }
        if offset == 0 || offset > self.pos {
            return self.corrupted("match offset outside the produced output");
        }
        for _ in 0..len {
            self.data[self.pos] = self.data[self.pos - offset];
            self.pos += 1;
        }
        Ok(())
    }
}

/// Read `num_bits` (up to 64) starting `offset` bits into `src`,
/// little-endian. The caller guarantees the range is in bounds.
pub(crate) fn read_bits_le(src: &[u8], num_bits: usize, offset: usize) -> u64 {
    let mut pos = offset / 8;
    let mut bit_offset = offset % 8;
    let mut res: u64 = 0;
    let mut shift = 0;
    let mut left = num_bits as i64;
    while left > 0 {
        let mask = if left >= 8 { 0xff } else { (1u64 << left) - 1 };
        res += ((u64::from(src[pos]) >> bit_offset) & mask) << shift;
        shift += 8 - bit_offset;
        left -= (8 - bit_offset) as i64;
        bit_offset = 0;
        pos += 1;
    }
    res
}

/// Read `bits` from the end of a Huffman or FSE stream: decrement `offset`
/// first, then read at the new position. Once `offset` drops below zero the
/// read is clamped to the start of `src` and the result is shifted up so the
/// missing low bits come in as zeros. Entropy streams rely on exactly this
/// to pad out their final states, so the clamp-and-shift is format
/// behavior, not a convenience.
pub(crate) fn stream_read_bits(src: &[u8], bits: usize, offset: &mut i64) -> u64 {
    *offset -= bits as i64;
    let mut actual_bits = bits as i64;
    let mut actual_off = *offset;
    if *offset < 0 {
        actual_bits += *offset;
        actual_off = 0;
        if actual_bits < 0 {
            // The stream was already exhausted; nothing left to read.
            actual_bits = 0;
        }
    }
    let res = read_bits_le(src, actual_bits as usize, actual_off as usize);
    if *offset < 0 {
        if -*offset >= 64 {
            return 0;
        }
        return res << -*offset;
    }
    res
}

/// Largest `i` with `2^i <= num`, or -1 for zero.
pub(crate) fn highest_set_bit(num: u64) -> i32 {
    if num == 0 {
        -1
    } else {
        num.ilog2() as i32
    }
}
