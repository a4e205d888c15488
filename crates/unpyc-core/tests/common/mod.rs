//! Fixture builders shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use unpyc_core::{
    magic::{by_label, FormatRevision},
    marshal::{tag, Writer},
    InternTable, Node, Span, Value,
};

/// Registered revision by label.
pub fn rev(label: &str) -> &'static FormatRevision { by_label(label).expect("registered revision") }

/// Node without span nor slot.
pub fn node(value: Value) -> Node { Node::new(Span::default(), None, value) }

/// Interned string node.
pub fn text(t: &str) -> Node { node(Value::Str { text: t.into(), interned: true }) }

/// Code object description written by [`write_code`].
#[derive(Debug, Clone)]
pub struct CodeFixture {
    pub argcount: u32,
    pub bytecode: Vec<u8>,
    pub consts: Vec<Node>,
    pub nested: Vec<CodeFixture>,
    pub names: Vec<&'static str>,
    pub varnames: Vec<&'static str>,
    pub filename: &'static str,
    pub name: &'static str,
    pub firstlineno: u32,
    pub lnotab: Vec<u8>,
}

impl CodeFixture {
    /// Empty code object named `name`.
    pub fn new(name: &'static str) -> Self {
        Self {
            argcount: 0,
            bytecode: Vec::new(),
            consts: Vec::new(),
            nested: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
            filename: "<fixture>",
            name,
            firstlineno: 1,
            lnotab: Vec::new(),
        }
    }
}

fn names(w: &mut Writer, list: &[&str]) {
    w.write_value(&Value::Tuple(list.iter().map(|n| text(n)).collect()));
}

/// Writes a flagged code object the way a compiler would lay it out.
pub fn write_code(w: &mut Writer, revision: &FormatRevision, fx: &CodeFixture) {
    w.write_tag(tag::CODE, true);
    w.write_u32(fx.argcount);
    if revision.code.posonly_args {
        w.write_u32(0);
    }
    for v in [0, u32::try_from(fx.varnames.len()).unwrap_or(0), 2, 0x40] {
        w.write_u32(v);
    }
    w.write_value(&Value::Bytes(fx.bytecode.as_slice().into()));

    let count = fx.consts.len() + fx.nested.len();
    if revision.marshal_version >= 4 {
        w.write_u8(tag::SMALL_TUPLE);
        w.write_u8(u8::try_from(count).expect("small constant pool"));
    } else {
        w.write_u8(tag::TUPLE);
        w.write_i32(i32::try_from(count).expect("small constant pool"));
    }
    for c in &fx.consts {
        w.write_node(c);
    }
    for inner in &fx.nested {
        write_code(w, revision, inner);
    }

    names(w, &fx.names);
    names(w, &fx.varnames);
    names(w, &[]);
    names(w, &[]);
    w.write_value(&text(fx.filename).value);
    w.write_value(&text(fx.name).value);
    w.write_u32(fx.firstlineno);
    w.write_value(&Value::Bytes(fx.lnotab.as_slice().into()));
}

/// Complete pyc file: header followed by `fx`.
pub fn pyc(label: &str, fx: &CodeFixture) -> Vec<u8> {
    let revision = rev(label);
    let mut w = Writer::for_revision(revision).sharing_strings();
    w.write_header(revision, 1_600_000_000, 120);
    write_code(&mut w, revision, fx);
    w.into_vec()
}

/// Replaces every back-reference by (a copy of) the object it points to.
pub fn expand(n: &Node, interns: &InternTable) -> Node {
    let value = match &n.value {
        Value::Ref(i) => return expand(interns.get(*i).expect("resolved reference"), interns),
        Value::Tuple(v) => Value::Tuple(v.iter().map(|c| expand(c, interns)).collect()),
        Value::List(v) => Value::List(v.iter().map(|c| expand(c, interns)).collect()),
        Value::Set(v) => Value::Set(v.iter().map(|c| expand(c, interns)).collect()),
        Value::FrozenSet(v) => Value::FrozenSet(v.iter().map(|c| expand(c, interns)).collect()),
        Value::Dict(v) => Value::Dict(v.iter().map(|(k, x)| (expand(k, interns), expand(x, interns))).collect()),
        Value::Code(c) => {
            let mut code = (**c).clone();
            for member in [
                &mut code.nodes.code,
                &mut code.nodes.consts,
                &mut code.nodes.names,
                &mut code.nodes.varnames,
                &mut code.nodes.freevars,
                &mut code.nodes.cellvars,
                &mut code.nodes.filename,
                &mut code.nodes.name,
                &mut code.nodes.lnotab,
            ] {
                *member = expand(member, interns);
            }
            Value::Code(Arc::new(code))
        }
        other => other.clone(),
    };
    Node::new(n.span, n.slot, value)
}
