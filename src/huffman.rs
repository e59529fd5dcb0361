use crate::bit_reader::{highest_set_bit, stream_read_bits, InputStream, OutputStream};
use crate::error::{ErrorContext, ErrorKind, Res};
use crate::fse::{init_stream_offset, FseTable};

// Lookup decoding costs 2^depth memory, so the format caps code lengths.
pub const HUF_MAX_BITS: u8 = 16;
pub const HUF_MAX_SYMBS: usize = 256;

// Weights use at most 7 bits of FSE accuracy.
const WEIGHTS_MAX_ACCURACY_LOG: u8 = 7;

/// Canonical Huffman decoding table. A state of `max_bits` lookahead bits
/// indexes both arrays; the top `num_bits[state]` bits identify the code
/// for `symbols[state]` and the rest carry over into the next state.
#[derive(Clone, Default)]
pub struct HuffmanTable {
    symbols: Vec<u8>,
    num_bits: Vec<u8>,
    max_bits: u8,
}

impl ErrorContext for HuffmanTable {}

impl HuffmanTable {
    /// Build from per-symbol code lengths, zero meaning absent. Codes are
    /// assigned canonically: longest codes first in the table, symbol order
    /// within a length.
    pub fn from_bits(bits: &[u8]) -> Res<HuffmanTable> {
        let mut table = HuffmanTable::default();
        table.check_le(bits.len(), HUF_MAX_SYMBS)?;

        let mut rank_count = [0u32; HUF_MAX_BITS as usize + 1];
        for &b in bits {
            table.check_le(b, HUF_MAX_BITS)?;
            table.max_bits = table.max_bits.max(b);
            rank_count[usize::from(b)] += 1;
        }
        table.check(table.max_bits > 0, "no symbols in Huffman code")?;

        let table_size = 1usize << table.max_bits;

        // Each length-b rank owns a contiguous run; longer codes sit lower.
        // The runs must tile the table exactly, so lay them out and verify
        // before touching any cell.
        let mut rank_idx = [0usize; HUF_MAX_BITS as usize + 1];
        for i in (1..=usize::from(table.max_bits)).rev() {
            rank_idx[i - 1] = rank_idx[i] + rank_count[i] as usize * (1 << (table.max_bits - i as u8));
        }
        table.check_eq(rank_idx[0], table_size)?;

        table.symbols = vec![0; table_size];
        table.num_bits = vec![0; table_size];
        for i in (1..=usize::from(table.max_bits)).rev() {
            for slot in &mut table.num_bits[rank_idx[i]..rank_idx[i - 1]] {
                *slot = i as u8;
            }
        }

        for (symbol, &b) in bits.iter().enumerate() {
            if b == 0 {
                continue;
            }
            // The low `max_bits - b` state bits are don't-cares, so the
            // symbol covers that whole span.
            let code = rank_idx[usize::from(b)];
            let len = 1usize << (table.max_bits - b);
            for slot in &mut table.symbols[code..code + len] {
                *slot = symbol as u8;
            }
            rank_idx[usize::from(b)] += len;
        }
        Ok(table)
    }

    /// Build from the weight representation. The final weight is implied:
    /// it is whatever tops the running sum up to a power of two.
    pub fn from_weights(weights: &[u8]) -> Res<HuffmanTable> {
        let probe = HuffmanTable::default();
        probe.check_le(weights.len() + 1, HUF_MAX_SYMBS)?;

        let mut weight_sum: u64 = 0;
        for &w in weights {
            probe.check_le(w, HUF_MAX_BITS)?;
            if w > 0 {
                weight_sum += 1u64 << (w - 1);
            }
        }
        probe.check(weight_sum > 0, "all Huffman weights are zero")?;

        let max_bits = (highest_set_bit(weight_sum) + 1) as u8;
        probe.check_le(max_bits, HUF_MAX_BITS)?;
        let left_over = (1u64 << max_bits) - weight_sum;
        probe.check(
            left_over & (left_over - 1) == 0,
            "Huffman weights do not leave a power of two for the last symbol",
        )?;
        let last_weight = (highest_set_bit(left_over) + 1) as u8;

        let mut bits: Vec<u8> = weights
            .iter()
            .map(|&w| if w > 0 { max_bits + 1 - w } else { 0 })
            .collect();
        bits.push(max_bits + 1 - last_weight);

        HuffmanTable::from_bits(&bits)
    }

    fn init_state(&self, state: &mut u16, src: &[u8], offset: &mut i64) {
        *state = stream_read_bits(src, usize::from(self.max_bits), offset) as u16;
    }

    fn decode_symbol(&self, state: &mut u16, src: &[u8], offset: &mut i64) -> u8 {
        let symb = self.symbols[usize::from(*state)];
        let bits = self.num_bits[usize::from(*state)];
        let rest = stream_read_bits(src, usize::from(bits), offset) as u32;
        // Shift the used bits out of the state and pull fresh ones in.
        *state = (((u32::from(*state) << bits) + rest) & ((1u32 << self.max_bits) - 1)) as u16;
        symb
    }

    /// Decode one backward Huffman stream to its end. Returns the number of
    /// symbols produced.
    pub fn decompress_1stream(
        &self,
        out: &mut OutputStream,
        input: &mut InputStream,
    ) -> Res<usize> {
        let len = input.remaining();
        if len == 0 {
            input.raise::<()>(ErrorKind::InputUnderflow, "empty Huffman stream".into())?;
        }
        let src = input.read_ptr(len)?;
        let mut offset = init_stream_offset(self, src)?;

        let mut state = 0u16;
        self.init_state(&mut state, src, &mut offset);

        let mut symbols_written = 0;
        while offset > -i64::from(self.max_bits) {
            out.write_byte(self.decode_symbol(&mut state, src, &mut offset))?;
            symbols_written += 1;
        }
        // A fully consumed stream leaves the final state having "read"
        // exactly max_bits of the zero fill; anything else is a stream that
        // did not end on a symbol boundary.
        self.check_eq(offset, -i64::from(self.max_bits))?;
        Ok(symbols_written)
    }

    /// Four back-to-back streams sharing this table, sizes of the first
    /// three given up front as little-endian u16s, decoded in order into
    /// the same writer.
    pub fn decompress_4stream(
        &self,
        out: &mut OutputStream,
        input: &mut InputStream,
    ) -> Res<usize> {
        let csize1 = input.read_bits(16)? as usize;
        let csize2 = input.read_bits(16)? as usize;
        let csize3 = input.read_bits(16)? as usize;

        let mut in1 = input.sub_stream(csize1)?;
        let mut in2 = input.sub_stream(csize2)?;
        let mut in3 = input.sub_stream(csize3)?;
        let rest = input.remaining();
        let mut in4 = input.sub_stream(rest)?;

        let mut total_output = 0;
        total_output += self.decompress_1stream(out, &mut in1)?;
        total_output += self.decompress_1stream(out, &mut in2)?;
        total_output += self.decompress_1stream(out, &mut in3)?;
        total_output += self.decompress_1stream(out, &mut in4)?;
        Ok(total_output)
    }
}

/// Parse a Huffman table description: either direct 4-bit weights or an
/// FSE-compressed weight stream, then the canonical build.
pub fn decode_huffman_table(input: &mut InputStream) -> Res<HuffmanTable> {
    let header = input.read_bits(8)? as usize;

    let mut weights = [0u8; HUF_MAX_SYMBS];
    let num_symbs;
    if header >= 128 {
        // Direct representation: a nibble per weight, high nibble first,
        // padded out to whole bytes.
        num_symbs = header - 127;
        let weight_src = input.read_ptr((num_symbs + 1) / 2)?;
        for (i, weight) in weights[..num_symbs].iter_mut().enumerate() {
            *weight = if i % 2 == 0 {
                weight_src[i / 2] >> 4
            } else {
                weight_src[i / 2] & 0xf
            };
        }
        log::debug!("huffman table: {} direct weights", num_symbs);
    } else {
        // The header byte is the size of an FSE-compressed weight stream.
        let mut fse_stream = input.sub_stream(header)?;
        let dtable = FseTable::parse_header(&mut fse_stream, WEIGHTS_MAX_ACCURACY_LOG)?;
        let mut weight_stream = OutputStream::new(&mut weights);
        num_symbs = dtable.decode_interleaved2(&mut weight_stream, &mut fse_stream)?;
        log::debug!("huffman table: {} FSE-coded weights", num_symbs);
    }

    HuffmanTable::from_weights(&weights[..num_symbs])
}
