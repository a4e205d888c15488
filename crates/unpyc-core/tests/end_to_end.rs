//! Whole-file parses: header, code objects, chunk tree, storage attachment.

mod common;

use common::{node, pyc, rev, text, CodeFixture};
use pretty_assertions::assert_eq;
use unpyc_core::{
    marshal::Writer, parse, unpyc_blob, Chunk, ChunkKind, ErrorKind, MemoryBlob, ParseOptions, ParseResult, Value,
};

fn child(chunk: &Chunk, kind: ChunkKind) -> &Chunk {
    chunk.children.iter().find(|c| c.kind == kind).expect("child of that kind")
}

fn labels(chunk: &Chunk) -> Vec<&str> { chunk.children.iter().filter_map(|c| c.label.as_deref()).collect() }

fn sample_function() -> CodeFixture {
    let mut fx = CodeFixture::new("f");
    fx.consts = vec![node(Value::None)];
    fx.names = vec!["print"];
    fx.bytecode = vec![
        116, 0, // LOAD_GLOBAL print
        100, 0, // LOAD_CONST None
        110, 4, // JUMP_FORWARD
        107, 2, // COMPARE_OP ==
        9, 0, // NOP
        83, 0, // RETURN_VALUE
    ];
    fx.lnotab = vec![4, 1, 6, 1];
    fx
}

#[test]
fn minimal_file() -> ParseResult<()> {
    let data = pyc("3.6", &CodeFixture::new("m"));
    let opts = ParseOptions::default();
    let parsed = parse(&data[..], 0, &opts)?;
    assert_eq!(parsed.code_objects().len(), 1);
    assert_eq!(parsed.revision.label, "3.6");

    let root = parsed.to_chunk(&opts);
    assert_eq!((root.start, root.end), (0, data.len() as u64));
    assert_eq!(root.check_nesting(), Ok(()));
    let kinds: Vec<ChunkKind> = root.children.iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![ChunkKind::Header, ChunkKind::CodeObject]);
    assert_eq!(labels(&root.children[0]), vec!["magic = 3379 (3.6)", "mtime = 1600000000", "source_size = 120"]);

    let code = &root.children[1];
    assert_eq!(code.end, data.len() as u64);
    let order: Vec<ChunkKind> = code.children.iter().map(|c| c.kind).collect();
    assert_eq!(
        order,
        vec![
            ChunkKind::CodeMetadata,
            ChunkKind::InstructionList,
            ChunkKind::ConstantPool,
            ChunkKind::NameTable,
            ChunkKind::MarshalScalar,
            ChunkKind::MarshalScalar,
            ChunkKind::Field,
            ChunkKind::LineTable,
        ]
    );
    assert!(child(code, ChunkKind::ConstantPool).children.is_empty());
    assert!(child(code, ChunkKind::InstructionList).children.is_empty());
    let tables = &child(code, ChunkKind::NameTable).children;
    assert_eq!(tables.len(), 4);
    assert!(tables.iter().all(|t| t.children.is_empty()));
    assert_eq!(child(code, ChunkKind::CodeMetadata).children.len(), 5);
    Ok(())
}

#[test]
fn magic_only_is_unexpected_end() {
    let magic = rev("3.6").magic;
    let err = parse(&magic[..], 0, &ParseOptions::default()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnexpectedEnd { .. }));
    assert_eq!(err.offset, 4);

    let mut blob = MemoryBlob::new(magic.to_vec());
    assert!(unpyc_blob(&mut blob, 0, &ParseOptions::default()).is_err());
    assert!(blob.chunks().is_empty());
}

#[test]
fn reference_at_table_length_is_malformed() {
    let r = rev("3.7");
    let mut w = Writer::for_revision(r);
    w.write_header(r, 0, 0);
    w.write_value(&Value::Ref(0));
    let err = parse(w.as_slice(), 0, &ParseOptions::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::MalformedReference { index: 0, len: 0 });
    assert_eq!(err.offset, 16);
}

#[test]
fn truncated_file_attaches_nothing() {
    let mut data = pyc("3.6", &CodeFixture::new("m"));
    data.pop();
    let len = data.len() as u64;
    let mut blob = MemoryBlob::new(data);
    let err = unpyc_blob(&mut blob, 0, &ParseOptions::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnexpectedEnd { needed: 4, available: 3 });
    assert_eq!(err.offset, len - 3);
    assert!(blob.chunks().is_empty());
}

#[test]
fn instruction_labels() -> ParseResult<()> {
    let data = pyc("3.6", &sample_function());
    let opts = ParseOptions::default();
    let parsed = parse(&data[..], 0, &opts)?;
    let root = parsed.to_chunk(&opts);
    let code = &root.children[1];
    let list = child(code, ChunkKind::InstructionList);
    assert_eq!(list.label.as_deref(), Some("code: 12 bytes, 6 instructions"));
    assert_eq!(
        labels(list),
        vec![
            "LOAD_GLOBAL 0 (print)",
            "LOAD_CONST 0 (None)",
            "JUMP_FORWARD 4 (to 10)",
            "COMPARE_OP 2 (==)",
            "NOP",
            "RETURN_VALUE",
        ]
    );
    let base = parsed.code().and_then(|c| c.bytecode_offset).expect("inline bytecode");
    assert_eq!(list.children[0].start, base);
    assert_eq!(list.children[5].end, base + 12);
    assert_eq!(code.label.as_deref(), Some("code f [ref #0]"));
    assert_eq!(child(code, ChunkKind::LineTable).label.as_deref(), Some("lnotab: 3 line starts"));
    assert_eq!(parsed.code().map(|c| c.line_table()), Some(vec![(0, 1), (4, 2), (10, 3)]));
    Ok(())
}

#[test]
fn shared_names_become_ref_chunks() -> ParseResult<()> {
    let mut fx = CodeFixture::new("f");
    fx.names = vec!["f"];
    let data = pyc("3.6", &fx);
    let opts = ParseOptions::default();
    let root = parse(&data[..], 0, &opts)?.to_chunk(&opts);
    let code = &root.children[1];
    let name = &code.children[5];
    assert_eq!(name.kind, ChunkKind::MarshalRef);
    assert_eq!(name.label.as_deref(), Some("name: ref #1 → 'f'"));
    let names = &child(code, ChunkKind::NameTable).children[0];
    assert_eq!(names.label.as_deref(), Some("names: tuple(1)"));
    assert_eq!(labels(names), vec!["'f' [ref #1]"]);
    Ok(())
}

#[test]
fn chunks_at_offset_after_attachment() -> ParseResult<()> {
    let data = pyc("3.6", &sample_function());
    let mut blob = MemoryBlob::new(data);
    unpyc_blob(&mut blob, 0, &ParseOptions::default())?;
    assert_eq!(blob.chunks().len(), 1);

    let base = parse(blob.bytes(), 0, &ParseOptions::default())?.code().and_then(|c| c.bytecode_offset);
    let at = base.expect("inline bytecode") + 3;
    let path = blob.chunks_at(at);
    let kinds: Vec<ChunkKind> = path.iter().map(|c| c.kind).collect();
    assert_eq!(
        kinds,
        vec![ChunkKind::File, ChunkKind::CodeObject, ChunkKind::InstructionList, ChunkKind::Instruction]
    );
    assert_eq!(path[3].label.as_deref(), Some("LOAD_CONST 0 (None)"));
    assert!(blob.chunks_at(10_000).is_empty());
    Ok(())
}

#[test]
fn nested_code_objects_nest_chunks() -> ParseResult<()> {
    let mut module = CodeFixture::new("<module>");
    module.bytecode = vec![100, 2, 100, 0, 132, 0, 90, 0, 100, 1, 83, 0];
    module.consts = vec![text("f"), node(Value::None)];
    module.nested = vec![sample_function()];
    module.names = vec!["f"];

    let data = pyc("3.7", &module);
    let opts = ParseOptions::default();
    let parsed = parse(&data[..], 0, &opts)?;
    let tree: Vec<(usize, &str)> = parsed.code_objects().into_iter().map(|(d, c)| (d, &*c.name)).collect();
    assert_eq!(tree, vec![(0, "<module>"), (1, "f")]);

    let root = parsed.to_chunk(&opts);
    assert_eq!(root.check_nesting(), Ok(()));
    let pool = child(&root.children[1], ChunkKind::ConstantPool);
    let kinds: Vec<ChunkKind> = pool.children.iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![ChunkKind::MarshalScalar, ChunkKind::MarshalScalar, ChunkKind::CodeObject]);
    let module_list = labels(child(&root.children[1], ChunkKind::InstructionList));
    assert_eq!(module_list[0], "LOAD_CONST 2 (<code f>)");
    assert_eq!(module_list[1], "LOAD_CONST 0 ('f')");
    assert_eq!(module_list[3], "STORE_NAME 0 (f)");
    assert_eq!(module_list[4], "LOAD_CONST 1 (None)");

    // The inner name reuses the interned constant of the outer pool.
    let inner = &pool.children[2];
    assert_eq!(inner.children[5].kind, ChunkKind::MarshalRef);
    Ok(())
}

#[test]
fn variable_width_revision() -> ParseResult<()> {
    let mut fx = CodeFixture::new("f");
    fx.consts = vec![node(Value::None)];
    fx.bytecode = vec![100, 0, 0, 83];
    let data = pyc("3.2", &fx);
    let opts = ParseOptions::default();
    let root = parse(&data[..], 0, &opts)?.to_chunk(&opts);
    assert_eq!(root.children[0].end, 8);
    let list = child(&root.children[1], ChunkKind::InstructionList);
    assert_eq!(labels(list), vec!["LOAD_CONST 0 (None)", "RETURN_VALUE"]);
    assert_eq!(list.children[0].end - list.children[0].start, 3);
    Ok(())
}

#[test]
fn posonly_revision_with_hash_header() -> ParseResult<()> {
    let r = rev("3.8");
    let mut w = Writer::for_revision(r).sharing_strings();
    w.write_hashed_header(r, true, 0x0102_0304_0506_0708);
    common::write_code(&mut w, r, &CodeFixture::new("m"));
    let data = w.into_vec();

    let opts = ParseOptions::default();
    let parsed = parse(&data[..], 0, &opts)?;
    assert!(parsed.header.is_hash_based());
    assert!(parsed.code().is_some_and(|c| c.posonlyargcount.is_some()));
    let root = parsed.to_chunk(&opts);
    assert_eq!(labels(&root.children[0]), vec!["magic = 3413 (3.8)", "flags = 0x3", "source_hash = 0x0102030405060708"]);
    assert_eq!(child(&root.children[1], ChunkKind::CodeMetadata).children.len(), 6);
    Ok(())
}

#[test]
fn options_shape_the_tree() -> ParseResult<()> {
    let mut fx = sample_function();
    fx.consts.push(text("a fairly long constant string"));
    let data = pyc("3.6", &fx);

    let opts = ParseOptions { label_limit: 6, ..ParseOptions::default() }.with_disassemble(false);
    let parsed = parse(&data[..], 0, &opts)?;
    assert!(parsed.code().is_some_and(|c| c.instructions.is_empty()));
    let root = parsed.to_chunk(&opts);
    let code = &root.children[1];
    let list = child(code, ChunkKind::InstructionList);
    assert!(list.children.is_empty());
    assert_eq!(list.label.as_deref(), Some("code: 12 bytes"));
    let pool = labels(child(code, ChunkKind::ConstantPool));
    assert_eq!(pool[1], "'a fair...' [ref #1]");
    Ok(())
}

#[cfg(feature = "serde")]
#[test]
fn chunk_tree_serializes() -> ParseResult<()> {
    let data = pyc("3.6", &CodeFixture::new("m"));
    let opts = ParseOptions::default();
    let root = parse(&data[..], 0, &opts)?.to_chunk(&opts);
    let json = serde_json::to_value(&root).expect("serializable");
    assert_eq!(json["kind"], "file");
    assert_eq!(json["children"][0]["kind"], "header");
    assert_eq!(json["children"][1]["kind"], "code_object");
    assert_eq!(json["end"], data.len());
    Ok(())
}
