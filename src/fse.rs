use crate::bit_reader::{highest_set_bit, stream_read_bits, InputStream, OutputStream};
use crate::error::{ErrorBuilder, ErrorContext, ErrorKind, Res};

// Table size is exponential in the accuracy, so the format caps it.
pub const FSE_MAX_ACCURACY_LOG: u8 = 15;
// Symbols must fit in a byte.
pub const FSE_MAX_SYMBS: usize = 256;

/// Decoding table for one FSE stream. The state indexes all three arrays;
/// a step emits `symbols[state]`, reads `num_bits[state]` fresh bits and
/// lands on `new_state_base[state] + bits`.
#[derive(Clone, Default)]
pub struct FseTable {
    symbols: Vec<u8>,
    num_bits: Vec<u8>,
    new_state_base: Vec<u16>,
    accuracy_log: u8,
}

impl ErrorContext for FseTable {}

impl FseTable {
    /// Build the table from normalized frequencies summing to
    /// `1 << accuracy_log`, where -1 marks a "less than one" probability.
    pub fn from_frequencies(norm_freqs: &[i16], accuracy_log: u8) -> Res<FseTable> {
        let mut table = FseTable::default();
        table.check_le(accuracy_log, FSE_MAX_ACCURACY_LOG)?;
        table.check_le(norm_freqs.len(), FSE_MAX_SYMBS)?;

        let size = 1usize << accuracy_log;
        table.accuracy_log = accuracy_log;
        table.symbols = vec![0; size];
        table.num_bits = vec![0; size];
        table.new_state_base = vec![0; size];

        let cells: i64 = norm_freqs
            .iter()
            .map(|&f| if f == -1 { 1 } else { i64::from(f.max(0)) })
            .sum();
        table.check(cells == size as i64, "frequencies do not sum to the table size")?;

        // How many states each symbol owns; bumped while assigning cells so
        // each cell of a symbol sees an increasing state count.
        let mut state_desc = [0u16; FSE_MAX_SYMBS];

        // "Less than one" symbols get a single cell each, filled from the
        // top of the table down. Decoding from such a cell reads a full
        // accuracy_log bits: a complete state reset.
        let mut high_threshold = size;
        for (s, &freq) in norm_freqs.iter().enumerate() {
            if freq == -1 {
                high_threshold -= 1;
                table.symbols[high_threshold] = s as u8;
                state_desc[s] = 1;
            }
        }

        // Remaining symbols are spread over the table with a fixed stride,
        // skipping the cells handed out above. The stride is coprime to the
        // table size, so the walk visits every cell exactly once.
        let step = (size >> 1) + (size >> 3) + 3;
        let mask = size - 1;
        let mut pos = 0usize;
        for (s, &freq) in norm_freqs.iter().enumerate() {
            if freq <= 0 {
                continue;
            }
            state_desc[s] = freq as u16;
            for _ in 0..freq {
                table.symbols[pos] = s as u8;
                loop {
                    pos = (pos + step) & mask;
                    if pos < high_threshold {
                        break;
                    }
                }
            }
        }
        table.check(pos == 0, "frequencies do not fill the table")?;

        for i in 0..size {
            let symbol = usize::from(table.symbols[i]);
            let next_state_desc = state_desc[symbol];
            state_desc[symbol] += 1;
            // More states seen for a symbol means fewer fresh bits; the
            // baseline climbs until the bit width drops, then resets.
            table.num_bits[i] =
                (i32::from(accuracy_log) - highest_set_bit(u64::from(next_state_desc))) as u8;
            table.new_state_base[i] =
                ((u32::from(next_state_desc) << table.num_bits[i]) - size as u32) as u16;
        }
        Ok(table)
    }

    /// Parse an FSE table description from the block stream and build the
    /// table it describes.
    pub fn parse_header(input: &mut InputStream, max_accuracy_log: u8) -> Res<FseTable> {
        input.check_le(max_accuracy_log, FSE_MAX_ACCURACY_LOG)?;

        let accuracy_log = 5 + input.read_bits(4)? as u8;
        input.check_le(accuracy_log, max_accuracy_log)?;
        log::debug!("fse header: accuracy_log={}", accuracy_log);

        // Probabilities are coded with just enough bits for what is still
        // distributable; small values give one bit back.
        let mut remaining = 1i32 << accuracy_log;
        let mut frequencies: Vec<i16> = Vec::new();

        while remaining > 0 && frequencies.len() < FSE_MAX_SYMBS {
            let bits = (highest_set_bit(remaining as u64 + 1) + 1) as usize;
            let mut val = input.read_bits(bits)? as i32;

            let lower_mask = (1i32 << (bits - 1)) - 1;
            let threshold = (1i32 << bits) - 1 - (remaining + 1);
            if (val & lower_mask) < threshold {
                input.rewind_bits(1)?;
                val &= lower_mask;
            } else if val > lower_mask {
                val -= threshold;
            }

            let proba = (val - 1) as i16;
            remaining -= i32::from(proba.abs());
            frequencies.push(proba);

            if proba == 0 {
                // A zero probability is followed by 2-bit repeat flags,
                // chained for as long as they read 3.
                let mut repeat = input.read_bits(2)?;
                loop {
                    for _ in 0..repeat {
                        if frequencies.len() >= FSE_MAX_SYMBS {
                            break;
                        }
                        frequencies.push(0);
                    }
                    if repeat == 3 {
                        repeat = input.read_bits(2)?;
                    } else {
                        break;
                    }
                }
            }
        }
        input.align()?;

        input.check(
            remaining == 0 && frequencies.len() < FSE_MAX_SYMBS,
            "FSE distribution does not sum to the table size",
        )?;

        FseTable::from_frequencies(&frequencies, accuracy_log)
    }

    /// Degenerate table that always yields `symb` and never consumes bits.
    pub fn rle(symb: u8) -> FseTable {
        FseTable {
            symbols: vec![symb],
            num_bits: vec![0],
            new_state_base: vec![0],
            accuracy_log: 0,
        }
    }

    pub fn accuracy_log(&self) -> u8 {
        self.accuracy_log
    }

    /// Symbol for the current state, without touching the stream.
    pub fn peek(&self, state: u16) -> u8 {
        self.symbols[usize::from(state)]
    }

    pub fn init_state(&self, state: &mut u16, src: &[u8], offset: &mut i64) {
        *state = stream_read_bits(src, usize::from(self.accuracy_log), offset) as u16;
    }

    pub fn update_state(&self, state: &mut u16, src: &[u8], offset: &mut i64) {
        let bits = self.num_bits[usize::from(*state)];
        let rest = stream_read_bits(src, usize::from(bits), offset) as u16;
        *state = self.new_state_base[usize::from(*state)] + rest;
    }

    pub fn decode_symbol(&self, state: &mut u16, src: &[u8], offset: &mut i64) -> u8 {
        let symb = self.peek(*state);
        self.update_state(state, src, offset);
        symb
    }

    /// Decode a whole backward stream with two interleaved states (the
    /// encoding used for Huffman weights). Returns the symbol count.
    pub fn decode_interleaved2(
        &self,
        out: &mut OutputStream,
        input: &mut InputStream,
    ) -> Res<usize> {
        let len = input.remaining();
        if len == 0 {
            input.raise::<()>(ErrorKind::InputUnderflow, "empty FSE stream".into())?;
        }
        let src = input.read_ptr(len)?;
        let mut offset = init_stream_offset(self, src)?;

        // State 1 carries the even-indexed symbols, state 2 the odd ones;
        // they alternate until the stream runs dry, at which point the
        // other state still holds one final symbol.
        let mut state1 = 0u16;
        let mut state2 = 0u16;
        self.init_state(&mut state1, src, &mut offset);
        self.init_state(&mut state2, src, &mut offset);

        let mut symbols_written = 0;
        loop {
            out.write_byte(self.decode_symbol(&mut state1, src, &mut offset))?;
            symbols_written += 1;
            if offset < 0 {
                out.write_byte(self.peek(state2))?;
                symbols_written += 1;
                break;
            }

            out.write_byte(self.decode_symbol(&mut state2, src, &mut offset))?;
            symbols_written += 1;
            if offset < 0 {
                out.write_byte(self.peek(state1))?;
                symbols_written += 1;
                break;
            }
        }
        Ok(symbols_written)
    }
}

/// Bit offset of the topmost payload bit of a backward stream: the high bit
/// of the last byte is a marker, everything above it is padding. A zero
/// last byte has no marker and is corrupt.
pub(crate) fn init_stream_offset(ctx: &impl ErrorContext, src: &[u8]) -> Result<i64, ErrorBuilder> {
    let last = src[src.len() - 1];
    ctx.check(last != 0, "entropy stream ends in a zero byte")?;
    let padding = 8 - highest_set_bit(u64::from(last)) as i64;
    Ok(src.len() as i64 * 8 - padding)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell_counts(table: &FseTable) -> [usize; FSE_MAX_SYMBS] {
        let mut counts = [0usize; FSE_MAX_SYMBS];
        for &s in &table.symbols {
            counts[usize::from(s)] += 1;
        }
        counts
    }

    #[test_log::test]
    fn build_spreads_cells_by_frequency() {
        let table = FseTable::from_frequencies(&[2, 1, 1], 2).unwrap();
        assert_eq!(table.symbols, vec![0, 0, 1, 2]);
        assert_eq!(table.num_bits, vec![1, 1, 2, 2]);
        assert_eq!(table.new_state_base, vec![0, 2, 0, 0]);
    }

    #[test_log::test]
    fn low_probability_cells_fill_from_the_top() {
        let table = FseTable::from_frequencies(&[3, -1], 2).unwrap();
        assert_eq!(table.symbols, vec![0, 0, 0, 1]);
        assert_eq!(table.num_bits, vec![1, 0, 0, 2]);
        assert_eq!(table.new_state_base, vec![2, 0, 1, 0]);
    }

    #[test_log::test]
    fn cell_count_equals_frequency() {
        let freqs: &[i16] = &[7, 4, -1, 0, 2, 1, -1];
        let table = FseTable::from_frequencies(freqs, 4).unwrap();
        let counts = cell_counts(&table);
        for (s, &f) in freqs.iter().enumerate() {
            let expect = if f == -1 { 1 } else { f.max(0) as usize };
            assert_eq!(counts[s], expect, "symbol {}", s);
        }
        assert_eq!(counts.iter().sum::<usize>(), 16);
    }

    #[test_log::test]
    fn bad_sum_is_rejected() {
        assert!(FseTable::from_frequencies(&[2, 1], 2).is_err());
        assert!(FseTable::from_frequencies(&[5, 1], 2).is_err());
    }

    #[test_log::test]
    fn rle_table_consumes_no_bits() {
        let table = FseTable::rle(0x42);
        let src = [0x01u8];
        let mut offset = 0i64;
        let mut state = 0u16;
        table.init_state(&mut state, &src, &mut offset);
        assert_eq!(offset, 0);
        for _ in 0..4 {
            assert_eq!(table.decode_symbol(&mut state, &src, &mut offset), 0x42);
        }
        assert_eq!(offset, 0);
    }

    #[test_log::test]
    fn header_parse_round_trip() {
        // accuracy_log 5 (low nibble 0), then probability 24 as the 5-bit
        // small value 25 (one bit handed back), then probability 8 as the
        // 4-bit escaped value 15 -> 15 - 6 = 9.
        let bytes = [0x90u8, 0x1F];
        let mut input = InputStream::new(&bytes);
        let table = FseTable::parse_header(&mut input, 9).unwrap();
        assert_eq!(table.accuracy_log(), 5);
        assert_eq!(input.remaining(), 0);
        let counts = cell_counts(&table);
        assert_eq!(counts[0], 24);
        assert_eq!(counts[1], 8);
    }

    #[test_log::test]
    fn header_respects_the_accuracy_cap() {
        // accuracy_log decodes to 8, above a cap of 7.
        let bytes = [0x93u8, 0x1F];
        let mut input = InputStream::new(&bytes);
        assert!(FseTable::parse_header(&mut input, 7).is_err());
    }

    #[test_log::test]
    fn interleaved_decode_alternates_two_states() {
        // Two symbols with two cells each: states 0..=1 emit symbol 0,
        // states 2..=3 emit symbol 1, every cell refreshing one bit.
        let table = FseTable::from_frequencies(&[2, 2], 2).unwrap();
        assert_eq!(table.symbols, vec![0, 0, 1, 1]);
        assert_eq!(table.num_bits, vec![1, 1, 1, 1]);

        // 0xE4 = marker at bit 7, then (reading down) state1 = 3,
        // state2 = 0, refresh bits 1, 0, 0. The final refresh underflows,
        // so the last symbol is peeked from state1.
        let mut weights = [0u8; 8];
        let mut out = OutputStream::new(&mut weights);
        let mut input = InputStream::new(&[0xE4]);
        let n = table.decode_interleaved2(&mut out, &mut input).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&weights[..n], &[1, 0, 1, 0, 1]);
    }
}
