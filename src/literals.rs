use crate::bit_reader::{InputStream, OutputStream};
use crate::error::{ErrorContext, Res};
use crate::frame::FrameContext;
use crate::huffman::decode_huffman_table;

// Regenerated literals never exceed the maximum block content size.
const MAX_LITERALS_SIZE: usize = 128 * 1024;

/// Decode the literals section of a compressed block into its own buffer.
/// Sequence execution later interleaves these bytes with match copies.
pub fn decode_literals(ctx: &mut FrameContext, input: &mut InputStream) -> Res<Vec<u8>> {
    // The first byte starts with two 2-bit fields: the block type and a
    // size format whose meaning depends on the type.
    let block_type = input.read_bits(2)? as u8;
    let size_format = input.read_bits(2)? as u8;
    log::debug!("literals: type={} size_format={}", block_type, size_format);

    if block_type <= 1 {
        decode_literals_simple(input, block_type, size_format)
    } else {
        decode_literals_compressed(ctx, input, block_type, size_format)
    }
}

/// Raw or RLE literals.
fn decode_literals_simple(
    input: &mut InputStream,
    block_type: u8,
    size_format: u8,
) -> Res<Vec<u8>> {
    let size = match size_format {
        // Formats 0b?0 use a single format bit; the second bit read above
        // already belongs to the size.
        0 | 2 => {
            input.rewind_bits(1)?;
            input.read_bits(5)? as usize
        }
        1 => input.read_bits(12)? as usize,
        3 => input.read_bits(20)? as usize,
        _ => input.corrupted("size format out of range")?,
    };
    input.check_le(size, MAX_LITERALS_SIZE)?;

    Ok(match block_type {
        0 => input.read_ptr(size)?.to_vec(),
        _ => {
            let byte = input.read_ptr(1)?[0];
            vec![byte; size]
        }
    })
}

/// Huffman-compressed literals, either with a fresh table description or
/// reusing the table from an earlier block in the frame.
fn decode_literals_compressed(
    ctx: &mut FrameContext,
    input: &mut InputStream,
    block_type: u8,
    size_format: u8,
) -> Res<Vec<u8>> {
    // Only format 0 is a single stream; everything else is four.
    let mut num_streams = 4;
    let (regenerated_size, compressed_size) = match size_format {
        0 | 1 => {
            if size_format == 0 {
                num_streams = 1;
            }
            (input.read_bits(10)? as usize, input.read_bits(10)? as usize)
        }
        2 => (input.read_bits(14)? as usize, input.read_bits(14)? as usize),
        3 => (input.read_bits(18)? as usize, input.read_bits(18)? as usize),
        _ => input.corrupted("size format out of range")?,
    };
    input.check_le(regenerated_size, MAX_LITERALS_SIZE)?;
    log::debug!(
        "literals: {} huffman stream(s), {} -> {} bytes",
        num_streams,
        compressed_size,
        regenerated_size
    );

    let mut huf_stream = input.sub_stream(compressed_size)?;

    if block_type == 2 {
        // A new table description leads the compressed region and replaces
        // whatever the context held.
        ctx.literals_dtable = Some(decode_huffman_table(&mut huf_stream)?);
    }
    // Treeless blocks lean on a table from a previous block or the
    // dictionary.
    let dtable = match &ctx.literals_dtable {
        Some(t) => t,
        None => huf_stream.corrupted("treeless literals without a previous table")?,
    };

    let mut literals = vec![0u8; regenerated_size];
    let mut lit_stream = OutputStream::new(&mut literals);
    let symbols_decoded = if num_streams == 1 {
        dtable.decompress_1stream(&mut lit_stream, &mut huf_stream)?
    } else {
        dtable.decompress_4stream(&mut lit_stream, &mut huf_stream)?
    };
    lit_stream.check_eq(symbols_decoded, regenerated_size)?;

    Ok(literals)
}
