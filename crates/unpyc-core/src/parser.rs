//! Entry points: header decoding, the whole-file parse, and the format hook.

use tracing::debug;

use crate::{
    blob::{Blob, BlobStore},
    chunk::{self, Chunk},
    code::CodeObject,
    cursor::Cursor,
    error::{ErrorKind, ParseError, ParseResult},
    magic::{self, FormatRevision, HeaderLayout},
    marshal::{Decoder, InternTable, Node, Value},
    options::ParseOptions,
    Span, Spanned,
};

/// Decoded file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PycHeader {
    /// Magic prefix.
    pub magic: Spanned<[u8; 4]>,
    /// Flags word (16-byte headers only).
    pub flags: Option<Spanned<u32>>,
    /// Source modification time.
    pub mtime: Option<Spanned<u32>>,
    /// Source size.
    pub source_size: Option<Spanned<u32>>,
    /// Source hash (hash-based 16-byte headers).
    pub source_hash: Option<Spanned<u64>>,
    /// Whole header.
    pub span: Span,
}

impl PycHeader {
    /// True for hash-based headers (`flags & 1`).
    pub fn is_hash_based(&self) -> bool { self.flags.as_ref().is_some_and(|f| f.value & 1 != 0) }
}

fn u32_field<B: Blob + ?Sized>(cursor: &mut Cursor<'_, B>) -> ParseResult<Spanned<u32>> {
    let at = cursor.offset();
    let v = cursor.read_u32()?;
    Ok(Spanned::new(v, Span::new(at, cursor.offset())))
}

fn read_header<B: Blob + ?Sized>(cursor: &mut Cursor<'_, B>, revision: &FormatRevision) -> ParseResult<PycHeader> {
    let start = cursor.offset();
    let raw = cursor.read_bytes(4)?;
    let magic = <[u8; 4]>::try_from(&*raw).map_err(|_| ParseError::malformed("short magic", start))?;
    let mut header = PycHeader {
        magic: Spanned::new(magic, Span::new(start, start + 4)),
        flags: None,
        mtime: None,
        source_size: None,
        source_hash: None,
        span: Span::new(start, start),
    };
    match revision.header {
        HeaderLayout::Mtime => header.mtime = Some(u32_field(cursor)?),
        HeaderLayout::MtimeSize => {
            header.mtime = Some(u32_field(cursor)?);
            header.source_size = Some(u32_field(cursor)?);
        }
        HeaderLayout::FlagsThenMtimeOrHash => {
            let flags = u32_field(cursor)?;
            let hashed = flags.value & 1 != 0;
            header.flags = Some(flags);
            if hashed {
                let at = cursor.offset();
                let hash = cursor.read_u64()?;
                header.source_hash = Some(Spanned::new(hash, Span::new(at, at + 8)));
            } else {
                header.mtime = Some(u32_field(cursor)?);
                header.source_size = Some(u32_field(cursor)?);
            }
        }
    }
    header.span.end = cursor.offset();
    Ok(header)
}

/// Result of a successful parse; lives only as long as the caller keeps it.
#[derive(Debug, Clone)]
pub struct ParsedPyc {
    /// Detected revision.
    pub revision: &'static FormatRevision,
    /// File header.
    pub header: PycHeader,
    /// Top-level marshal object (almost always a code object).
    pub root: Node,
    /// Interned objects, indexed by back-reference number.
    pub interns: InternTable,
    /// From the magic to the end of the root object.
    pub span: Span,
}

impl ParsedPyc {
    /// Top-level code object, if the root is one.
    pub fn code(&self) -> Option<&CodeObject> {
        match &self.interns.deref(&self.root).value {
            Value::Code(c) => Some(c),
            _ => None,
        }
    }

    /// Every code object, pre-order, with its nesting depth.
    pub fn code_objects(&self) -> Vec<(usize, &CodeObject)> { self.code().map(CodeObject::tree).unwrap_or_default() }

    /// Builds the chunk tree (pure; nothing is attached).
    pub fn to_chunk(&self, options: &ParseOptions) -> Chunk { chunk::emit(self, options) }
}

/// Revision whose magic starts `data`, if any.
pub fn detect(data: &[u8]) -> Option<&'static FormatRevision> { magic::lookup(data) }

/// Parses the pyc file starting at `start`.
///
/// Pure: reads through [`Blob::read_at`] only and touches no storage.
pub fn parse<B: Blob + ?Sized>(blob: &B, start: u64, options: &ParseOptions) -> ParseResult<ParsedPyc> {
    let mut cursor = Cursor::new(blob, start)?;
    let prefix = cursor.clone().read_bytes(4)?;
    let revision = magic::lookup(&prefix)
        .ok_or_else(|| ParseError::new(ErrorKind::NotRecognized { found: prefix.to_vec() }, start))?;
    debug!(revision = revision.label, offset = start, "pyc revision");

    let header = read_header(&mut cursor, revision)?;
    let mut decoder = Decoder::new(cursor, revision, options);
    let root = decoder.read_object()?;
    let end = decoder.offset();
    let (_, interns) = decoder.into_parts();
    Ok(ParsedPyc { revision, header, root, interns, span: Span::new(start, end) })
}

/// Parses, builds the chunk tree and attaches it to `target` in a single call.
///
/// On failure nothing is attached.
pub fn unpyc_blob<T: BlobStore + ?Sized>(target: &mut T, start: u64, options: &ParseOptions) -> ParseResult<()> {
    let parsed = parse(&*target, start, options)?;
    let root = parsed.to_chunk(options);
    debug!(start, end = root.end, chunks = root.walk().count(), "attaching chunks");
    target.attach_chunks(start, root);
    Ok(())
}

/// A parser the surrounding format-detection layer can probe.
pub trait FormatParser {
    /// Stable identifier.
    fn id(&self) -> &'static str;

    /// Magic prefixes this parser accepts.
    fn magics(&self) -> Vec<Vec<u8>>;

    /// True if `prefix` starts with one of [`FormatParser::magics`].
    fn probe(&self, prefix: &[u8]) -> bool { self.magics().iter().any(|m| prefix.starts_with(m)) }

    /// Parses at `start` and attaches the result to `target`.
    fn parse(&self, target: &mut dyn BlobStore, start: u64) -> ParseResult<()>;
}

/// `pyc3`: compiled Python 3 modules.
#[derive(Debug, Clone, Default)]
pub struct PycParser {
    /// Options used for every parse.
    pub options: ParseOptions,
}

impl PycParser {
    /// Parser with explicit options.
    pub const fn new(options: ParseOptions) -> Self { Self { options } }
}

impl FormatParser for PycParser {
    fn id(&self) -> &'static str { "pyc3" }

    fn magics(&self) -> Vec<Vec<u8>> { magic::magics().map(|m| m.to_vec()).collect() }

    fn parse(&self, target: &mut dyn BlobStore, start: u64) -> ParseResult<()> { unpyc_blob(target, start, &self.options) }
}
