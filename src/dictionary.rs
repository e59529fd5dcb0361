use crate::bit_reader::InputStream;
use crate::error::{ErrorContext, ErrorKind, Res};
use crate::frame::FrameContext;
use crate::fse::FseTable;
use crate::huffman::{decode_huffman_table, HuffmanTable};

const DICT_MAGIC_NUMBER: u32 = 0xEC30A437;

/// A parsed dictionary, reusable across any number of frames. Raw
/// dictionaries are nothing but back-reference content; formatted ones add
/// pre-built entropy tables and a seeded repeat-offset history.
pub struct Dictionary {
    literals_dtable: Option<HuffmanTable>,
    ll_dtable: Option<FseTable>,
    of_dtable: Option<FseTable>,
    ml_dtable: Option<FseTable>,
    content: Vec<u8>,
    previous_offsets: [u64; 3],
    dictionary_id: u32,
}

impl ErrorContext for Dictionary {}

impl Dictionary {
    /// Parse dictionary bytes. Anything that does not open with the
    /// dictionary magic is taken as raw content.
    pub fn parse(src: &[u8]) -> Res<Dictionary> {
        let mut dict = Dictionary {
            literals_dtable: None,
            ll_dtable: None,
            of_dtable: None,
            ml_dtable: None,
            content: Vec::new(),
            previous_offsets: [1, 4, 8],
            dictionary_id: 0,
        };
        dict.check(src.len() >= 8, "dictionary shorter than 8 bytes")?;

        let mut input = InputStream::new(src);
        let magic_number = input.read_bits(32)? as u32;
        if magic_number != DICT_MAGIC_NUMBER {
            dict.content = src.to_vec();
            log::debug!("raw dictionary, {} bytes of content", dict.content.len());
            return Ok(dict);
        }

        dict.dictionary_id = input.read_bits(32)? as u32;

        // Entropy tables in their fixed order: literals Huffman, then the
        // offset, match-length and literal-length FSE tables, each in the
        // same header form a compressed block uses.
        dict.literals_dtable = Some(decode_huffman_table(&mut input)?);
        dict.of_dtable = Some(FseTable::parse_header(&mut input, 8)?);
        dict.ml_dtable = Some(FseTable::parse_header(&mut input, 9)?);
        dict.ll_dtable = Some(FseTable::parse_header(&mut input, 9)?);

        // Three seeded recent offsets, each of which must be a distance
        // the dictionary can actually serve.
        for i in 0..dict.previous_offsets.len() {
            let offset = input.read_bits(32)?;
            dict.check((offset as usize) < src.len(), "dictionary offset too large")?;
            dict.previous_offsets[i] = offset;
        }

        let content_len = input.remaining();
        dict.content = input.read_ptr(content_len)?.to_vec();
        log::debug!(
            "formatted dictionary id={:#x}, {} bytes of content",
            dict.dictionary_id,
            dict.content.len()
        );
        Ok(dict)
    }

    pub fn dictionary_id(&self) -> u32 {
        self.dictionary_id
    }

    /// Seed a fresh frame context from this dictionary: content is
    /// borrowed, entropy tables and the offset history are deep-copied so
    /// the context and the dictionary keep independent lifetimes.
    pub(crate) fn apply<'d>(&'d self, ctx: &mut FrameContext<'d>) -> Res<()> {
        if self.content.is_empty() && self.dictionary_id == 0 {
            return Ok(());
        }

        if ctx.header.dictionary_id != 0 && ctx.header.dictionary_id != self.dictionary_id {
            self.raise::<()>(
                ErrorKind::DictionaryMismatch,
                format!(
                    "frame wants dictionary {:#x}, provided {:#x}",
                    ctx.header.dictionary_id, self.dictionary_id
                ),
            )?;
        }

        ctx.dict_content = &self.content;

        if self.dictionary_id != 0 {
            ctx.literals_dtable = self.literals_dtable.clone();
            ctx.ll_dtable = self.ll_dtable.clone();
            ctx.of_dtable = self.of_dtable.clone();
            ctx.ml_dtable = self.ml_dtable.clone();
            ctx.previous_offsets = self.previous_offsets;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Formatted dictionary with id 0x25, direct-weight Huffman table,
    /// three small FSE tables, offsets {1,4,8} and content "WXYZ".
    fn formatted_dict_bytes() -> Vec<u8> {
        let mut bytes = vec![0x37, 0xA4, 0x30, 0xEC]; // magic, little-endian
        bytes.extend_from_slice(&[0x25, 0x00, 0x00, 0x00]); // id
        bytes.extend_from_slice(&[129, 0x21]); // huffman: weights 2,1
        bytes.extend_from_slice(&[0x90, 0x1F]); // of table
        bytes.extend_from_slice(&[0x90, 0x1F]); // ml table
        bytes.extend_from_slice(&[0x90, 0x1F]); // ll table
        bytes.extend_from_slice(&[1, 0, 0, 0, 4, 0, 0, 0, 8, 0, 0, 0]);
        bytes.extend_from_slice(b"WXYZ");
        bytes
    }

    #[test_log::test]
    fn raw_dictionary_is_all_content() {
        let dict = Dictionary::parse(b"0123456789").unwrap();
        assert_eq!(dict.dictionary_id(), 0);
        assert_eq!(dict.content, b"0123456789");
        assert!(dict.literals_dtable.is_none());
    }

    #[test_log::test]
    fn undersized_dictionary_is_rejected() {
        assert!(Dictionary::parse(b"1234567").is_err());
    }

    #[test_log::test]
    fn formatted_dictionary_parses_tables_and_offsets() {
        let dict = Dictionary::parse(&formatted_dict_bytes()).unwrap();
        assert_eq!(dict.dictionary_id(), 0x25);
        assert_eq!(dict.content, b"WXYZ");
        assert_eq!(dict.previous_offsets, [1, 4, 8]);
        assert!(dict.literals_dtable.is_some());
        assert!(dict.ll_dtable.is_some());
        assert!(dict.of_dtable.is_some());
        assert!(dict.ml_dtable.is_some());
    }

    #[test_log::test]
    fn oversized_seed_offsets_are_rejected() {
        let mut bytes = formatted_dict_bytes();
        // First seeded offset (bytes 16..20): larger than the dictionary.
        bytes[16] = 0xFF;
        bytes[17] = 0xFF;
        assert!(Dictionary::parse(&bytes).is_err());
    }

    #[test_log::test]
    fn apply_copies_tables_into_the_context() {
        let dict = Dictionary::parse(&formatted_dict_bytes()).unwrap();
        let mut ctx = FrameContext::empty();
        ctx.header.dictionary_id = 0x25;
        dict.apply(&mut ctx).unwrap();
        assert_eq!(ctx.dict_content, b"WXYZ");
        assert!(ctx.literals_dtable.is_some());
        assert!(ctx.ll_dtable.is_some());
        assert_eq!(ctx.previous_offsets, [1, 4, 8]);
    }

    #[test_log::test]
    fn mismatched_id_is_rejected() {
        let dict = Dictionary::parse(&formatted_dict_bytes()).unwrap();
        let mut ctx = FrameContext::empty();
        ctx.header.dictionary_id = 0x26;
        let err = dict.apply(&mut ctx).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DictionaryMismatch);
    }

    #[test_log::test]
    fn raw_dictionary_only_lends_content() {
        let dict = Dictionary::parse(b"abcdefgh").unwrap();
        let mut ctx = FrameContext::empty();
        dict.apply(&mut ctx).unwrap();
        assert_eq!(ctx.dict_content, b"abcdefgh");
        assert!(ctx.literals_dtable.is_none());
        assert_eq!(ctx.previous_offsets, [1, 4, 8]);
    }
}
