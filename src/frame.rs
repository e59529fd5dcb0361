use crate::bit_reader::{InputStream, OutputStream};
use crate::dictionary::Dictionary;
use crate::error::{ErrorContext, ErrorKind, Res};
use crate::fse::FseTable;
use crate::huffman::HuffmanTable;
use crate::literals::decode_literals;
use crate::sequences::{decode_sequences, execute_sequences};

const ZSTD_MAGIC_NUMBER: u32 = 0xFD2FB528;

/// Frame header in front of each Zstandard frame.
///
/// Bit number   Field name
/// 7-6          Frame_Content_Size_flag
/// 5            Single_Segment_flag
/// 4            Unused_bit
/// 3            Reserved_bit
/// 2            Content_Checksum_flag
/// 1-0          Dictionary_ID_flag
#[derive(Debug, Default, Clone)]
pub struct FrameHeader {
    /// Back-reference distance the decoder must be able to serve.
    pub window_size: u64,
    /// Declared uncompressed size, 0 when absent.
    pub frame_content_size: u64,
    /// Id of the dictionary the frame was compressed against, 0 when none.
    pub dictionary_id: u32,
    /// Four checksum bytes trail the last block. This decoder skips them.
    pub content_checksum_flag: bool,
    /// The frame is one segment: no window descriptor, and the window is
    /// the content size itself.
    pub single_segment_flag: bool,
}

impl ErrorContext for FrameHeader {}

/// Decode state carried across the blocks of one frame: the running output
/// count, the borrowed dictionary content, the entropy tables blocks leave
/// behind for reuse, and the repeat-offset history.
pub(crate) struct FrameContext<'d> {
    pub header: FrameHeader,
    pub current_total_output: u64,
    pub dict_content: &'d [u8],
    pub literals_dtable: Option<HuffmanTable>,
    pub ll_dtable: Option<FseTable>,
    pub ml_dtable: Option<FseTable>,
    pub of_dtable: Option<FseTable>,
    pub previous_offsets: [u64; 3],
}

impl ErrorContext for FrameContext<'_> {}

impl<'d> FrameContext<'d> {
    fn new(input: &mut InputStream, dict: Option<&'d Dictionary>) -> Res<FrameContext<'d>> {
        let header = parse_frame_header(input)?;
        let mut ctx = FrameContext {
            header,
            current_total_output: 0,
            dict_content: &[],
            literals_dtable: None,
            ll_dtable: None,
            ml_dtable: None,
            of_dtable: None,
            previous_offsets: [1, 4, 8],
        };
        if let Some(dict) = dict {
            dict.apply(&mut ctx)?;
        }
        Ok(ctx)
    }

    #[cfg(test)]
    pub(crate) fn empty() -> FrameContext<'static> {
        FrameContext {
            header: FrameHeader::default(),
            current_total_output: 0,
            dict_content: &[],
            literals_dtable: None,
            ll_dtable: None,
            ml_dtable: None,
            of_dtable: None,
            previous_offsets: [1, 4, 8],
        }
    }
}

/// Decompress one complete Zstandard frame from `src` into `dst`. Returns
/// the number of bytes written.
pub fn decompress(dst: &mut [u8], src: &[u8]) -> Res<usize> {
    decompress_with_dict(dst, src, None)
}

/// Like [`decompress`], with the dictionary the frame was compressed
/// against.
pub fn decompress_with_dict(
    dst: &mut [u8],
    src: &[u8],
    dict: Option<&Dictionary>,
) -> Res<usize> {
    let mut input = InputStream::new(src);
    let mut out = OutputStream::new(dst);
    decode_frame(&mut out, &mut input, dict)?;
    Ok(out.written())
}

/// Parse only as far as the frame header and report the declared content
/// size, or `None` when the frame does not carry one.
pub fn peek_decompressed_size(src: &[u8]) -> Res<Option<u64>> {
    let mut input = InputStream::new(src);
    check_magic(&mut input)?;
    let header = parse_frame_header(&mut input)?;
    if header.frame_content_size == 0 && !header.single_segment_flag {
        Ok(None)
    } else {
        Ok(Some(header.frame_content_size))
    }
}

fn check_magic(input: &mut InputStream) -> Res<()> {
    let magic_number = input.read_bits(32)? as u32;
    if magic_number != ZSTD_MAGIC_NUMBER {
        input.raise::<()>(
            ErrorKind::UnsupportedFrame,
            format!("magic {:#010x} is not a Zstandard frame", magic_number),
        )?;
    }
    Ok(())
}

fn decode_frame(out: &mut OutputStream, input: &mut InputStream, dict: Option<&Dictionary>) -> Res<()> {
    check_magic(input)?;
    let mut ctx = FrameContext::new(input, dict)?;

    let declared = ctx.header.frame_content_size;
    if declared != 0 && declared > out.space() as u64 {
        ctx.raise::<()>(
            ErrorKind::OutputOverflow,
            format!("destination holds {} of {} bytes", out.space(), declared),
        )?;
    }

    decompress_data(&mut ctx, out, input)?;

    // Blocks are self-delimiting, so a declared size that went unmet is
    // only caught here.
    if declared != 0 {
        ctx.check_eq(out.written() as u64, declared)?;
    }
    Ok(())
}

fn parse_frame_header(input: &mut InputStream) -> Res<FrameHeader> {
    let descriptor = input.read_bits(8)? as u8;

    let frame_content_size_flag = descriptor >> 6;
    let single_segment_flag = (descriptor >> 5) & 1 == 1;
    let reserved_bit = (descriptor >> 3) & 1;
    let content_checksum_flag = (descriptor >> 2) & 1 == 1;
    let dictionary_id_flag = descriptor & 3;

    let mut header = FrameHeader {
        single_segment_flag,
        content_checksum_flag,
        ..FrameHeader::default()
    };
    header.check(reserved_bit == 0, "reserved frame header bit set")?;

    if !single_segment_flag {
        // Window_Descriptor: exponent in bits 7-3, mantissa in 2-0.
        let window_descriptor = input.read_bits(8)? as u8;
        let exponent = window_descriptor >> 3;
        let mantissa = window_descriptor & 7;
        let window_base = 1u64 << (10 + u32::from(exponent));
        header.window_size = window_base + (window_base / 8) * u64::from(mantissa);
    }

    if dictionary_id_flag != 0 {
        let bytes = [0, 1, 2, 4][usize::from(dictionary_id_flag)];
        header.dictionary_id = input.read_bits(bytes * 8)? as u32;
    }

    // A single-segment frame always carries a content size, even with a
    // content-size flag of zero.
    if single_segment_flag || frame_content_size_flag != 0 {
        let bytes = [1, 2, 4, 8][usize::from(frame_content_size_flag)];
        header.frame_content_size = input.read_bits(bytes * 8)?;
        if bytes == 2 {
            header.frame_content_size += 256;
        }
    }

    if single_segment_flag {
        header.window_size = header.frame_content_size;
    }
    log::debug!(
        "frame header: window={} content_size={} dict_id={:#x} checksum={}",
        header.window_size,
        header.frame_content_size,
        header.dictionary_id,
        header.content_checksum_flag
    );
    Ok(header)
}

/// Run the block loop to the last-block flag, then skip the checksum.
fn decompress_data(
    ctx: &mut FrameContext,
    out: &mut OutputStream,
    input: &mut InputStream,
) -> Res<()> {
    loop {
        // Block_Header: last_block:1 | block_type:2 | block_size:21, LE.
        let last_block = input.read_bits(1)? == 1;
        let block_type = input.read_bits(2)?;
        let block_len = input.read_bits(21)? as usize;
        log::debug!(
            "block: type={} len={} last={}",
            block_type,
            block_len,
            last_block
        );

        match block_type {
            0 => {
                // Raw: block_size bytes copied through.
                let data = input.read_ptr(block_len)?;
                out.write_slice(data)?;
                ctx.current_total_output += block_len as u64;
            }
            1 => {
                // RLE: one byte regenerated block_size times.
                let byte = input.read_ptr(1)?[0];
                out.write_ptr(block_len)?.fill(byte);
                ctx.current_total_output += block_len as u64;
            }
            2 => {
                let mut block_stream = input.sub_stream(block_len)?;
                decompress_block(ctx, out, &mut block_stream)?;
            }
            _ => {
                input.raise::<()>(ErrorKind::UnsupportedFrame, "reserved block type".into())?;
            }
        }

        if last_block {
            break;
        }
    }

    if ctx.header.content_checksum_flag {
        // Not verified, only skipped.
        input.advance(4)?;
    }
    Ok(())
}

/// A compressed block: a literals section, a sequences section, and the
/// execution that weaves the two into output.
fn decompress_block(
    ctx: &mut FrameContext,
    out: &mut OutputStream,
    input: &mut InputStream,
) -> Res<()> {
    let literals = decode_literals(ctx, input)?;
    let sequences = decode_sequences(ctx, input)?;
    execute_sequences(ctx, out, &literals, &sequences)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &[u8]) -> Res<FrameHeader> {
        parse_frame_header(&mut InputStream::new(bytes))
    }

    #[test_log::test]
    fn window_descriptor_math() {
        // exponent 0, mantissa 0: 1 KiB.
        let header = parse(&[0x00, 0x00]).unwrap();
        assert_eq!(header.window_size, 1 << 10);
        // exponent 3, mantissa 5: 8 KiB + 5 KiB.
        let header = parse(&[0x00, 0x1D]).unwrap();
        assert_eq!(header.window_size, (1 << 13) + 5 * (1 << 10));
        assert_eq!(header.frame_content_size, 0);
    }

    #[test_log::test]
    fn single_segment_window_is_the_content_size() {
        let header = parse(&[0x20, 0x2A]).unwrap();
        assert!(header.single_segment_flag);
        assert_eq!(header.frame_content_size, 42);
        assert_eq!(header.window_size, 42);
    }

    #[test_log::test]
    fn two_byte_content_size_is_offset_by_256() {
        // FCS flag 1 (2 bytes), window descriptor, then 0x0103.
        let header = parse(&[0x40, 0x00, 0x03, 0x01]).unwrap();
        assert_eq!(header.frame_content_size, 0x0103 + 256);
    }

    #[test_log::test]
    fn dictionary_id_sizes() {
        let header = parse(&[0x01, 0x00, 0x7F]).unwrap();
        assert_eq!(header.dictionary_id, 0x7F);
        let header = parse(&[0x02, 0x00, 0x34, 0x12]).unwrap();
        assert_eq!(header.dictionary_id, 0x1234);
        let header = parse(&[0x03, 0x00, 0x78, 0x56, 0x34, 0x12]).unwrap();
        assert_eq!(header.dictionary_id, 0x12345678);
    }

    #[test_log::test]
    fn reserved_descriptor_bit_is_corrupt() {
        let err = parse(&[0x08, 0x00]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Corruption);
    }

    #[test_log::test]
    fn checksum_flag_parses() {
        let header = parse(&[0x24, 0x00]).unwrap();
        assert!(header.content_checksum_flag);
    }
}
