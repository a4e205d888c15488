//! unpyc-cli — bibliothèque interne du binaire `unpyc`
//!
//! Everything testable lives here; `main.rs` only maps arguments onto a
//! [`Command`] and calls [`execute`].
//!
//! - `inspect`: chunk tree of a pyc file (text or JSON), or the chunks covering one offset
//! - `disasm`: every code object, instruction by instruction, with line starts
//! - `magic`: the revision registry, or the revision of one file

#![deny(unused_must_use)]
#![forbid(unsafe_code)]

use std::{
    collections::HashMap,
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
#[cfg(feature = "color")]
use owo_colors::{OwoColorize, Stream};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use unpyc_core::{magic, parse, unpyc_blob, Chunk, CodeObject, InternTable, MemoryBlob, ParseOptions};

// ───────────────────────────── Types publics ─────────────────────────────

/// One high-level command (argument parsing stays in main.rs).
#[derive(Clone, Debug)]
pub enum Command {
    /// Chunk tree of a file.
    Inspect(InspectTask),
    /// Instruction listing of every code object.
    Disasm(DisasmTask),
    /// Revision registry or detection.
    Magic(MagicTask),
}

/// Where the bytes come from.
#[derive(Clone, Debug, Default)]
pub enum Input {
    /// File on disk.
    Path(PathBuf),
    /// Standard input.
    #[default]
    Stdin,
    /// Already in memory.
    Bytes(Vec<u8>),
}

/// Rendering of `inspect`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Format {
    /// Indented text, one chunk per line.
    #[default]
    Tree,
    /// Pretty-printed JSON.
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct InspectTask {
    pub input: Input,
    pub offset: u64,      // début du pyc dans le fichier
    pub format: Format,
    pub at: Option<u64>,  // n'afficher que les chunks couvrant cet offset
    pub options: ParseOptions,
}

#[derive(Clone, Debug, Default)]
pub struct DisasmTask {
    pub input: Input,
    pub offset: u64,
    pub options: ParseOptions,
}

#[derive(Clone, Debug, Default)]
pub struct MagicTask {
    pub input: Option<Input>, // None => liste du registre
}

// ───────────────────────────── Initialisation ─────────────────────────────

/// Installs the global `tracing` subscriber on stderr.
///
/// `RUST_LOG` wins over the level derived from `-v`/`-q`.
pub fn init_tracing(verbose: u8, quiet: bool, ansi: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(ansi)
        .with_target(false)
        .try_init();
}

// ───────────────────────────── Exécution ─────────────────────────────

/// Runs `cmd`, writing its report to `out`. Returns the process exit code.
pub fn execute(cmd: Command, out: &mut dyn Write) -> Result<i32> {
    match cmd {
        Command::Inspect(t) => inspect_entry(t, out).map(|()| 0),
        Command::Disasm(t) => disasm_entry(t, out).map(|()| 0),
        Command::Magic(t) => magic_entry(t, out),
    }
}

fn inspect_entry(task: InspectTask, out: &mut dyn Write) -> Result<()> {
    let InspectTask { input, offset, format, at, options } = task;
    let mut blob = MemoryBlob::new(read_input(&input)?);
    unpyc_blob(&mut blob, offset, &options).with_context(|| format!("parsing pyc at offset {offset:#x}"))?;
    let root = blob.chunks().first().ok_or_else(|| anyhow!("no chunk attached at offset {offset:#x}"))?;
    info!(chunks = root.walk().count(), end = root.end, "chunk tree built");

    let selected: Vec<&Chunk> = match at {
        Some(at) => {
            let path = blob.chunks_at(at);
            if path.is_empty() {
                bail!("no chunk covers offset {at:#x}");
            }
            path
        }
        None => vec![root],
    };

    match (format, at) {
        (Format::Json, Some(_)) => {
            let flat: Vec<Chunk> = selected.iter().map(|c| Chunk { children: Vec::new(), ..(*c).clone() }).collect();
            writeln!(out, "{}", serde_json::to_string_pretty(&flat)?)?;
        }
        (Format::Json, None) => writeln!(out, "{}", serde_json::to_string_pretty(root)?)?,
        (Format::Tree, Some(_)) => {
            for (depth, c) in selected.iter().enumerate() {
                writeln!(out, "{:indent$}{c}", "", indent = depth * 2)?;
            }
        }
        (Format::Tree, None) => out.write_all(root.render().as_bytes())?,
    }
    status_ok("INSPECT", root.label.as_deref().unwrap_or("pyc"));
    Ok(())
}

fn disasm_entry(task: DisasmTask, out: &mut dyn Write) -> Result<()> {
    let bytes = read_input(&task.input)?;
    let options = task.options.with_disassemble(true);
    let parsed = parse(&bytes[..], task.offset, &options)
        .with_context(|| format!("parsing pyc at offset {:#x}", task.offset))?;
    let tree = parsed.code_objects();
    if tree.is_empty() {
        bail!("top-level object is not a code object");
    }
    for (depth, code) in tree {
        write_listing(out, depth, code, &parsed.interns, options.label_limit)?;
    }
    status_ok("DISASM", parsed.revision.label);
    Ok(())
}

fn write_listing(
    out: &mut dyn Write,
    depth: usize,
    code: &CodeObject,
    interns: &InternTable,
    limit: usize,
) -> io::Result<()> {
    let pad = "    ".repeat(depth);
    writeln!(out, "{pad}code {} ({}:{})", code.name, code.filename, code.firstlineno.value)?;
    let starts: HashMap<u32, i64> = code.line_table().into_iter().collect();
    for i in code.instructions.iter() {
        let line = starts.get(&i.offset).map(ToString::to_string).unwrap_or_default();
        writeln!(out, "{pad}{line:>5} {:>6} {}", i.offset, i.label(code, interns, limit))?;
    }
    Ok(())
}

fn magic_entry(task: MagicTask, out: &mut dyn Write) -> Result<i32> {
    let Some(input) = task.input else {
        writeln!(out, "{:>6}  {:<5} {:>6}  marshal  disasm", "magic", "rev", "header")?;
        for r in magic::revisions() {
            writeln!(
                out,
                "{:>6}  {:<5} {:>6}  v{:<6} {}",
                r.number(),
                r.label,
                r.header.len(),
                r.marshal_version,
                if r.opcodes.is_some() { "yes" } else { "no" }
            )?;
        }
        return Ok(0);
    };

    let bytes = read_input(&input)?;
    match unpyc_core::parser::detect(&bytes) {
        Some(r) => {
            debug!(revision = r.label, "magic recognized");
            writeln!(out, "{} (magic {})", r.label, r.number())?;
            Ok(0)
        }
        None => {
            let shown = bytes.get(..4).unwrap_or(&bytes);
            writeln!(out, "not a recognized pyc (prefix {shown:02X?})")?;
            Ok(1)
        }
    }
}

// ───────────────────────────── Utilitaires E/S ─────────────────────────────

fn read_input(input: &Input) -> Result<Vec<u8>> {
    match input {
        Input::Stdin => {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf).context("reading stdin")?;
            Ok(buf)
        }
        Input::Path(p) => fs::read(p).with_context(|| format!("reading {}", display(p))),
        Input::Bytes(b) => Ok(b.clone()),
    }
}

fn display(p: &Path) -> String { p.to_string_lossy().to_string() }

// ───────────────────────────── Sorties jolies ─────────────────────────────

fn status_ok(tag: &str, msg: &str) {
    #[cfg(feature = "color")]
    {
        eprintln!("{} {}", tag.if_supports_color(Stream::Stderr, |t| t.green().bold().to_string()), msg);
    }
    #[cfg(not(feature = "color"))]
    {
        eprintln!("{tag} {msg}");
    }
}

// ───────────────────────────── Tests ─────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use unpyc_core::{
        magic::by_label,
        marshal::{tag, Writer},
        Node, Span, Value,
    };

    fn sample_pyc() -> Vec<u8> {
        let rev = by_label("3.6").expect("3.6");
        let s = |t: &str| Value::Str { text: t.into(), interned: true };
        let mut w = Writer::for_revision(rev).sharing_strings();
        w.write_header(rev, 0, 0);
        w.write_tag(tag::CODE, true);
        for v in [0_u32, 0, 0, 1, 0x40] {
            w.write_u32(v);
        }
        w.write_value(&Value::Bytes(vec![100, 0, 83, 0].into()));
        w.write_value(&Value::Tuple(vec![Node::new(Span::default(), None, Value::None)].into()));
        for _ in 0..4 {
            w.write_value(&Value::Tuple(Vec::<Node>::new().into()));
        }
        w.write_value(&s("demo.py"));
        w.write_value(&s("<module>"));
        w.write_u32(1);
        w.write_value(&Value::Bytes(Vec::<u8>::new().into()));
        w.into_vec()
    }

    fn run(cmd: Command) -> (i32, String) {
        let mut out = Vec::new();
        let code = execute(cmd, &mut out).expect("command succeeds");
        (code, String::from_utf8(out).expect("utf-8 output"))
    }

    #[test]
    fn inspect_renders_the_tree() {
        let data = sample_pyc();
        let (code, text) = run(Command::Inspect(InspectTask { input: Input::Bytes(data), ..InspectTask::default() }));
        assert_eq!(code, 0);
        let first = text.lines().next().unwrap_or_default();
        assert!(first.ends_with("file pyc 3.6"), "{first}");
        assert!(text.contains("instruction LOAD_CONST 0 (None)"));
        assert!(text.contains("instruction RETURN_VALUE"));
    }

    #[test]
    fn inspect_json_and_offset_path() -> Result<()> {
        let file = tempfile::NamedTempFile::new()?;
        fs::write(file.path(), sample_pyc())?;

        let task = InspectTask { input: Input::Path(file.path().to_path_buf()), format: Format::Json, ..Default::default() };
        let (_, text) = run(Command::Inspect(task));
        let json: serde_json::Value = serde_json::from_str(&text)?;
        assert_eq!(json["kind"], "file");
        assert_eq!(json["children"][1]["kind"], "code_object");

        let task = InspectTask { input: Input::Path(file.path().to_path_buf()), at: Some(13), ..Default::default() };
        let (_, text) = run(Command::Inspect(task));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[3].trim_start().ends_with("field argcount = 0"), "{}", lines[3]);
        Ok(())
    }

    #[test]
    fn inspect_reports_parse_errors() {
        let mut data = sample_pyc();
        data.truncate(20);
        let mut out = Vec::new();
        let err = execute(Command::Inspect(InspectTask { input: Input::Bytes(data), ..Default::default() }), &mut out)
            .unwrap_err();
        assert!(format!("{err:#}").contains("unexpected end of data"));
        assert!(out.is_empty());
    }

    #[test]
    fn disasm_lists_instructions_with_lines() {
        let (_, text) = run(Command::Disasm(DisasmTask { input: Input::Bytes(sample_pyc()), ..Default::default() }));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["code <module> (demo.py:1)", "    1      0 LOAD_CONST 0 (None)", "           2 RETURN_VALUE"]);
    }

    #[test]
    fn magic_lists_and_detects() {
        let (code, text) = run(Command::Magic(MagicTask::default()));
        assert_eq!(code, 0);
        assert!(text.lines().any(|l| l.contains("3413") && l.contains("3.8")));

        let (code, text) = run(Command::Magic(MagicTask { input: Some(Input::Bytes(sample_pyc())) }));
        assert_eq!((code, text.trim()), (0, "3.6 (magic 3379)"));

        let (code, text) = run(Command::Magic(MagicTask { input: Some(Input::Bytes(b"PK\x03\x04".to_vec())) }));
        assert_eq!(code, 1);
        assert!(text.starts_with("not a recognized pyc"));
    }
}
