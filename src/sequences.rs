use crate::bit_reader::{stream_read_bits, InputStream, OutputStream};
use crate::error::{ErrorBuilder, ErrorContext, ErrorKind, Res};
use crate::frame::FrameContext;
use crate::fse::{init_stream_offset, FseTable};

/// One LZ command: copy `literal_length` bytes from the literals buffer,
/// then `match_length` bytes from `offset` (still the raw pre-resolution
/// value; repeat offsets are resolved at execution time).
#[derive(Debug, Clone, Copy)]
pub struct SequenceCommand {
    pub literal_length: u32,
    pub match_length: u32,
    pub offset: u64,
}

/// The three code streams of the sequences section. Each variant knows its
/// own predefined distribution and limits.
#[derive(Debug, Clone, Copy)]
enum SeqPart {
    LiteralLength,
    Offset,
    MatchLength,
}

// Distributions the format predefines so common blocks can skip table
// descriptions entirely. These values are fixed by the Zstandard
// specification and must match it bit for bit.
const LITERAL_LENGTH_DEFAULT_DIST: [i16; 36] = [
    4, 3, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 1, 1, 1, 2, 2, 2, 2, 2, 2, 2, 2, 2, 3, 2, 1, 1, 1, 1,
    1, -1, -1, -1, -1,
];
const OFFSET_DEFAULT_DIST: [i16; 29] = [
    1, 1, 1, 1, 1, 1, 2, 2, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, -1, -1, -1, -1, -1,
];
const MATCH_LENGTH_DEFAULT_DIST: [i16; 53] = [
    1, 4, 3, 2, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, -1, -1, -1, -1, -1, -1, -1,
];

// Literal-length and match-length codes map to a baseline plus extra bits
// read from the stream; offsets derive their value from the code directly.
const LITERAL_LENGTH_BASELINES: [u32; 36] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 18, 20, 22, 24, 28, 32, 40, 48, 64,
    128, 256, 512, 1024, 2048, 4096, 8192, 16384, 32768, 65536,
];
const LITERAL_LENGTH_EXTRA_BITS: [u8; 36] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 3, 3, 4, 6, 7, 8, 9, 10,
    11, 12, 13, 14, 15, 16,
];
const MATCH_LENGTH_BASELINES: [u32; 53] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
    28, 29, 30, 31, 32, 33, 34, 35, 37, 39, 41, 43, 47, 51, 59, 67, 83, 99, 131, 259, 515, 1027,
    2051, 4099, 8195, 16387, 32771, 65539,
];
const MATCH_LENGTH_EXTRA_BITS: [u8; 53] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 1, 1, 1, 1, 2, 2, 3, 3, 4, 4, 5, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16,
];

// An offset value is built from up to 63 shift bits; anything wider cannot
// appear in a conforming stream.
const MAX_OFFSET_CODE: u8 = 63;

impl SeqPart {
    fn default_distribution(self) -> &'static [i16] {
        match self {
            SeqPart::LiteralLength => &LITERAL_LENGTH_DEFAULT_DIST,
            SeqPart::Offset => &OFFSET_DEFAULT_DIST,
            SeqPart::MatchLength => &MATCH_LENGTH_DEFAULT_DIST,
        }
    }

    fn default_accuracy(self) -> u8 {
        match self {
            SeqPart::LiteralLength => 6,
            SeqPart::Offset => 5,
            SeqPart::MatchLength => 6,
        }
    }

    fn max_accuracy(self) -> u8 {
        match self {
            SeqPart::LiteralLength => 9,
            SeqPart::Offset => 8,
            SeqPart::MatchLength => 9,
        }
    }
}

struct SequenceStates<'t> {
    ll_table: &'t FseTable,
    of_table: &'t FseTable,
    ml_table: &'t FseTable,
    ll_state: u16,
    of_state: u16,
    ml_state: u16,
}

impl ErrorContext for SequenceStates<'_> {}

/// Parse the sequences section of a block: the command count, the three
/// table installs, and the interleaved backward bitstream of commands.
pub fn decode_sequences(
    ctx: &mut FrameContext,
    input: &mut InputStream,
) -> Res<Vec<SequenceCommand>> {
    let header = input.read_bits(8)? as usize;
    let num_sequences = if header == 0 {
        // Literals-only block; the section ends here.
        return Ok(Vec::new());
    } else if header < 128 {
        header
    } else if header < 255 {
        ((header - 128) << 8) + input.read_bits(8)? as usize
    } else {
        input.read_bits(16)? as usize + 0x7F00
    };
    log::debug!("sequences: {} commands", num_sequences);

    // One mode byte selects how each of the three tables is transmitted:
    // bits 7-6 literal lengths, 5-4 offsets, 3-2 match lengths.
    let modes = input.read_bits(8)? as u8;
    input.check(modes & 3 == 0, "reserved sequence mode bits set")?;

    install_table(&mut ctx.ll_dtable, input, SeqPart::LiteralLength, modes >> 6)?;
    install_table(&mut ctx.of_dtable, input, SeqPart::Offset, (modes >> 4) & 3)?;
    install_table(&mut ctx.ml_dtable, input, SeqPart::MatchLength, (modes >> 2) & 3)?;

    decode_sequence_stream(ctx, input, num_sequences)
}

/// Install one of the three FSE tables according to its two mode bits.
fn install_table(
    table: &mut Option<FseTable>,
    input: &mut InputStream,
    part: SeqPart,
    mode: u8,
) -> Res<()> {
    match mode {
        0 => {
            // Predefined distribution baked into the format.
            *table = Some(FseTable::from_frequencies(
                part.default_distribution(),
                part.default_accuracy(),
            )?);
        }
        1 => {
            // A single code repeated for every sequence.
            let symb = input.read_ptr(1)?[0];
            *table = Some(FseTable::rle(symb));
        }
        2 => {
            *table = Some(FseTable::parse_header(input, part.max_accuracy())?);
        }
        _ => {
            // Repeat: keep whatever an earlier block or the dictionary
            // installed.
            if table.is_none() {
                input.corrupted(&format!("{:?} repeat mode without a previous table", part))?;
            }
        }
    }
    Ok(())
}

fn decode_sequence_stream(
    ctx: &FrameContext,
    input: &mut InputStream,
    num_sequences: usize,
) -> Res<Vec<SequenceCommand>> {
    let (Some(ll_table), Some(of_table), Some(ml_table)) =
        (&ctx.ll_dtable, &ctx.of_dtable, &ctx.ml_dtable)
    else {
        return Err(ErrorBuilder::new(ErrorKind::Corruption, "sequence table missing".into()).into());
    };

    // The rest of the block is one backward bitstream: initial states in
    // decode order, then the interleaved command records.
    let len = input.remaining();
    if len == 0 {
        input.raise::<()>(ErrorKind::InputUnderflow, "empty sequence bitstream".into())?;
    }
    let src = input.read_ptr(len)?;
    let mut offset = init_stream_offset(input, src)?;

    let mut states = SequenceStates {
        ll_table,
        of_table,
        ml_table,
        ll_state: 0,
        of_state: 0,
        ml_state: 0,
    };
    states
        .ll_table
        .init_state(&mut states.ll_state, src, &mut offset);
    states
        .of_table
        .init_state(&mut states.of_state, src, &mut offset);
    states
        .ml_table
        .init_state(&mut states.ml_state, src, &mut offset);

    let mut sequences = Vec::with_capacity(num_sequences);
    for _ in 0..num_sequences {
        sequences.push(decode_sequence(&mut states, src, &mut offset)?);
    }
    states.check_eq(offset, 0)?;
    Ok(sequences)
}

/// Decode one command and refresh the states, unless the stream ended.
fn decode_sequence(
    states: &mut SequenceStates,
    src: &[u8],
    offset: &mut i64,
) -> Result<SequenceCommand, ErrorBuilder> {
    let of_code = states.of_table.peek(states.of_state);
    let ll_code = states.ll_table.peek(states.ll_state);
    let ml_code = states.ml_table.peek(states.ml_state);

    states.check_le(ll_code as usize, LITERAL_LENGTH_BASELINES.len() - 1)?;
    states.check_le(ml_code as usize, MATCH_LENGTH_BASELINES.len() - 1)?;
    states.check_le(of_code, MAX_OFFSET_CODE)?;

    // Raw bits come offset first, then match length, then literal length.
    let seq = SequenceCommand {
        offset: (1u64 << of_code) + stream_read_bits(src, usize::from(of_code), offset),
        match_length: MATCH_LENGTH_BASELINES[usize::from(ml_code)]
            + stream_read_bits(
                src,
                usize::from(MATCH_LENGTH_EXTRA_BITS[usize::from(ml_code)]),
                offset,
            ) as u32,
        literal_length: LITERAL_LENGTH_BASELINES[usize::from(ll_code)]
            + stream_read_bits(
                src,
                usize::from(LITERAL_LENGTH_EXTRA_BITS[usize::from(ll_code)]),
                offset,
            ) as u32,
    };

    // State refreshes follow in their own fixed order; a stream that has
    // hit exactly zero is complete and refreshes nothing.
    if *offset != 0 {
        states
            .ll_table
            .update_state(&mut states.ll_state, src, offset);
        states
            .ml_table
            .update_state(&mut states.ml_state, src, offset);
        states
            .of_table
            .update_state(&mut states.of_state, src, offset);
    }

    Ok(seq)
}

/// Interleave literal copies and match copies to produce the block output.
pub fn execute_sequences(
    ctx: &mut FrameContext,
    out: &mut OutputStream,
    literals: &[u8],
    sequences: &[SequenceCommand],
) -> Res<()> {
    let mut offset_hist = ctx.previous_offsets;
    let mut total_output = ctx.current_total_output;
    let mut literals = literals;

    for seq in sequences {
        log::debug!(
            "sequence ll={} ml={} offset_raw={}",
            seq.literal_length,
            seq.match_length,
            seq.offset
        );
        let literal_length = seq.literal_length as usize;
        if literal_length > literals.len() {
            out.corrupted("sequence consumes more literals than the block holds")?;
        }
        out.write_slice(&literals[..literal_length])?;
        literals = &literals[literal_length..];
        total_output += literal_length as u64;

        let offset = resolve_offset(seq, &mut offset_hist, out)?;
        execute_match_copy(ctx, offset, seq.match_length as usize, total_output, out)?;
        total_output += u64::from(seq.match_length);
    }

    // Whatever the commands did not claim flushes to the output verbatim.
    out.write_slice(literals)?;
    total_output += literals.len() as u64;

    ctx.previous_offsets = offset_hist;
    ctx.current_total_output = total_output;
    Ok(())
}

/// Turn a raw offset value into a distance, maintaining the three-deep
/// repeat-offset history. Values 1..=3 select from the history, shifted by
/// one when the sequence copies no literals; everything above 3 is a fresh
/// distance.
fn resolve_offset(
    seq: &SequenceCommand,
    offset_hist: &mut [u64; 3],
    ctx: &impl ErrorContext,
) -> Result<u64, ErrorBuilder> {
    if seq.offset > 3 {
        let offset = seq.offset - 3;
        offset_hist[2] = offset_hist[1];
        offset_hist[1] = offset_hist[0];
        offset_hist[0] = offset;
        return Ok(offset);
    }

    let mut idx = seq.offset as usize - 1;
    if seq.literal_length == 0 {
        idx += 1;
    }
    if idx == 0 {
        return Ok(offset_hist[0]);
    }
    // idx 3 only arises from offset 3 with no literals: most recent minus
    // one, which must still be a real distance.
    let offset = if idx < 3 {
        offset_hist[idx]
    } else {
        ctx.check(offset_hist[0] > 1, "repeat offset underflows to zero")?;
        offset_hist[0] - 1
    };
    if idx > 1 {
        offset_hist[2] = offset_hist[1];
    }
    offset_hist[1] = offset_hist[0];
    offset_hist[0] = offset;
    Ok(offset)
}

/// Copy `match_length` bytes from `offset` back, spilling into the
/// dictionary content for the part that predates the frame output.
fn execute_match_copy(
    ctx: &FrameContext,
    offset: u64,
    mut match_length: usize,
    total_output: u64,
    out: &mut OutputStream,
) -> Res<()> {
    let dict_len = ctx.dict_content.len() as u64;
    if total_output <= ctx.header.window_size {
        if offset > total_output + dict_len {
            out.corrupted("match offset beyond the dictionary")?;
        }
        if offset > total_output {
            // The head of the match predates this frame: take it from the
            // tail of the dictionary content.
            let dict_back = (offset - total_output) as usize;
            let dict_copy = dict_back.min(match_length);
            let dict_offset = ctx.dict_content.len() - dict_back;
            out.write_slice(&ctx.dict_content[dict_offset..dict_offset + dict_copy])?;
            match_length -= dict_copy;
        }
    } else if offset > ctx.header.window_size {
        out.corrupted("match offset beyond the window")?;
    }

    if match_length > 0 {
        out.copy_match(offset as usize, match_length)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameContext;

    #[test_log::test]
    fn predefined_distributions_build() {
        for part in [SeqPart::LiteralLength, SeqPart::Offset, SeqPart::MatchLength] {
            let table =
                FseTable::from_frequencies(part.default_distribution(), part.default_accuracy())
                    .unwrap();
            assert_eq!(table.accuracy_log(), part.default_accuracy());
        }
    }

    #[test_log::test]
    fn literals_only_section() {
        let mut ctx = FrameContext::empty();
        let mut input = InputStream::new(&[0x00]);
        let seqs = decode_sequences(&mut ctx, &mut input).unwrap();
        assert!(seqs.is_empty());
    }

    #[test_log::test]
    fn rle_mode_section_decodes_commands() {
        // One sequence, all three tables in RLE mode (mode byte 0x54),
        // symbols ll=0 of=0 ml=0, and a bitstream that is only a marker.
        let bytes = [0x01u8, 0x54, 0x00, 0x00, 0x00, 0x01];
        let mut ctx = FrameContext::empty();
        let mut input = InputStream::new(&bytes);
        let seqs = decode_sequences(&mut ctx, &mut input).unwrap();
        assert_eq!(seqs.len(), 1);
        assert_eq!(seqs[0].literal_length, 0);
        assert_eq!(seqs[0].match_length, 3);
        assert_eq!(seqs[0].offset, 1);
    }

    #[test_log::test]
    fn rle_mode_reads_offset_extra_bits() {
        // of code 2 with the two extra bits 0b11 -> raw offset 4 + 3 = 7.
        let bytes = [0x01u8, 0x54, 0x00, 0x02, 0x00, 0x07];
        let mut ctx = FrameContext::empty();
        let mut input = InputStream::new(&bytes);
        let seqs = decode_sequences(&mut ctx, &mut input).unwrap();
        assert_eq!(seqs[0].offset, 7);
    }

    #[test_log::test]
    fn reserved_mode_bits_are_corrupt() {
        let bytes = [0x01u8, 0x55, 0x00, 0x00, 0x00, 0x01];
        let mut ctx = FrameContext::empty();
        let mut input = InputStream::new(&bytes);
        assert!(decode_sequences(&mut ctx, &mut input).is_err());
    }

    #[test_log::test]
    fn repeat_mode_without_tables_is_corrupt() {
        // Mode byte 0xFC: all three in repeat mode on a fresh context.
        let bytes = [0x01u8, 0xFC, 0x01];
        let mut ctx = FrameContext::empty();
        let mut input = InputStream::new(&bytes);
        assert!(decode_sequences(&mut ctx, &mut input).is_err());
    }

    fn hist_after(offset: u64, literal_length: u32) -> ([u64; 3], u64) {
        let seq = SequenceCommand {
            literal_length,
            match_length: 3,
            offset,
        };
        let mut hist = [11, 22, 33];
        let probe = FrameContext::empty();
        let resolved = resolve_offset(&seq, &mut hist, &probe).unwrap();
        (hist, resolved)
    }

    #[test_log::test]
    fn repeat_offset_resolution() {
        // With literals: 1..=3 pick history entries in recency order.
        assert_eq!(hist_after(1, 5), ([11, 22, 33], 11));
        assert_eq!(hist_after(2, 5), ([22, 11, 33], 22));
        assert_eq!(hist_after(3, 5), ([33, 11, 22], 33));
        // Without literals everything shifts by one and 3 means "most
        // recent minus one".
        assert_eq!(hist_after(1, 0), ([22, 11, 33], 22));
        assert_eq!(hist_after(2, 0), ([33, 11, 22], 33));
        assert_eq!(hist_after(3, 0), ([10, 11, 22], 10));
        // A fresh offset pushes the history down.
        assert_eq!(hist_after(7, 5), ([4, 11, 22], 4));
    }

    #[test_log::test]
    fn repeat_offset_cannot_reach_zero() {
        let seq = SequenceCommand {
            literal_length: 0,
            match_length: 3,
            offset: 3,
        };
        let mut hist = [1, 4, 8];
        let probe = FrameContext::empty();
        assert!(resolve_offset(&seq, &mut hist, &probe).is_err());
    }

    #[test_log::test]
    fn execution_copies_literals_and_matches() {
        let mut ctx = FrameContext::empty();
        ctx.header.window_size = 1 << 20;
        let mut buf = [0u8; 16];
        let mut out = OutputStream::new(&mut buf);
        let seqs = [
            SequenceCommand {
                literal_length: 4,
                match_length: 3,
                offset: 4 + 3, // resolves to distance 4
            },
            SequenceCommand {
                literal_length: 0,
                match_length: 4,
                offset: 4 + 3, // distance 4 again, pushed onto the history
            },
        ];
        execute_sequences(&mut ctx, &mut out, b"abcdZ", &seqs).unwrap();
        let written = out.written();
        assert_eq!(&buf[..written], b"abcdabcdabcZ");
        assert_eq!(ctx.current_total_output, 12);
        assert_eq!(ctx.previous_offsets, [4, 4, 11]);
    }

    #[test_log::test]
    fn overlapping_match_extends_the_pattern() {
        let mut ctx = FrameContext::empty();
        ctx.header.window_size = 1 << 20;
        let mut buf = [0u8; 8];
        let mut out = OutputStream::new(&mut buf);
        let seqs = [SequenceCommand {
            literal_length: 1,
            match_length: 5,
            offset: 1 + 3, // distance 1
        }];
        execute_sequences(&mut ctx, &mut out, b"q", &seqs).unwrap();
        let written = out.written();
        assert_eq!(&buf[..written], b"qqqqqq");
    }

    #[test_log::test]
    fn literal_underflow_is_corrupt() {
        let mut ctx = FrameContext::empty();
        let mut buf = [0u8; 8];
        let mut out = OutputStream::new(&mut buf);
        let seqs = [SequenceCommand {
            literal_length: 3,
            match_length: 0,
            offset: 4,
        }];
        assert!(execute_sequences(&mut ctx, &mut out, b"ab", &seqs).is_err());
    }

    #[test_log::test]
    fn match_beyond_output_and_dictionary_is_corrupt() {
        let mut ctx = FrameContext::empty();
        ctx.header.window_size = 1 << 20;
        let mut buf = [0u8; 8];
        let mut out = OutputStream::new(&mut buf);
        let seqs = [SequenceCommand {
            literal_length: 2,
            match_length: 2,
            offset: 5 + 3, // distance 5 with only 2 bytes of history
        }];
        assert!(execute_sequences(&mut ctx, &mut out, b"ab", &seqs).is_err());
    }

    #[test_log::test]
    fn match_reaches_into_the_dictionary() {
        let mut ctx = FrameContext::empty();
        ctx.header.window_size = 1 << 20;
        ctx.dict_content = b"WXYZ";
        let mut buf = [0u8; 8];
        let mut out = OutputStream::new(&mut buf);
        let seqs = [SequenceCommand {
            literal_length: 0,
            match_length: 5,
            offset: 3 + 3, // distance 3 into the dictionary tail
        }];
        execute_sequences(&mut ctx, &mut out, b"", &seqs).unwrap();
        let written = out.written();
        assert_eq!(&buf[..written], b"XYZXY");
    }
}
