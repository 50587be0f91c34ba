//! Restricted pickle deserializer for compiled Ren'Py scripts.
//!
//! A general-purpose unpickler will happily import and call any class the
//! stream names; that is exactly what must never happen here. This reader
//! interprets the opcode stream directly and routes every `GLOBAL` /
//! `STACK_GLOBAL` through a whitelist resolver that yields an inert fake
//! class. Unknown classes become opaque nodes with the same recording
//! behavior: constructor arguments and attributes are stored, nothing is
//! ever executed. Persistent-id and extension-registry opcodes are
//! rejected outright.
//!
//! Containers and objects are reference-counted so memo references and
//! late `BUILD`/`APPENDS` mutations observe shared state, matching the
//! aliasing semantics of the source stream.

use anyhow::{Context, Result, bail};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Node kinds the AST walker understands. Everything else is `Opaque`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Say,
    Menu,
    Label,
    Init,
    Python,
    If,
    While,
    Translate,
    TranslateString,
    TranslateBlock,
    UserStatement,
    Screen,
    SlScreen,
    SlDisplayable,
    SlIf,
    SlShowIf,
    SlFor,
    SlUse,
    SlBlock,
    PyExpr,
    PyCode,
    RevertableContainer,
    Opaque,
}

/// Whitelist resolver: maps `(module, name)` to the fake class kind.
/// Never fails; anything unknown records as an opaque node.
pub fn resolve_class(module: &str, name: &str) -> NodeKind {
    match (module, name) {
        ("renpy.ast", "Say") => NodeKind::Say,
        ("renpy.ast", "Menu") => NodeKind::Menu,
        ("renpy.ast", "Label") => NodeKind::Label,
        ("renpy.ast", "Init") => NodeKind::Init,
        ("renpy.ast", "Python") | ("renpy.ast", "EarlyPython") => NodeKind::Python,
        ("renpy.ast", "If") => NodeKind::If,
        ("renpy.ast", "While") => NodeKind::While,
        ("renpy.ast", "Translate") => NodeKind::Translate,
        ("renpy.ast", "TranslateString") => NodeKind::TranslateString,
        ("renpy.ast", "TranslateBlock") | ("renpy.ast", "TranslateEarlyBlock") => {
            NodeKind::TranslateBlock
        }
        ("renpy.ast", "UserStatement") => NodeKind::UserStatement,
        ("renpy.ast", "Screen") => NodeKind::Screen,
        ("renpy.ast", "PyExpr") | ("renpy.astsupport", "PyExpr") => NodeKind::PyExpr,
        ("renpy.ast", "PyCode") => NodeKind::PyCode,
        ("renpy.sl2.slast", "SLScreen") => NodeKind::SlScreen,
        ("renpy.sl2.slast", "SLDisplayable") => NodeKind::SlDisplayable,
        ("renpy.sl2.slast", "SLIf") => NodeKind::SlIf,
        ("renpy.sl2.slast", "SLShowIf") => NodeKind::SlShowIf,
        ("renpy.sl2.slast", "SLFor") => NodeKind::SlFor,
        ("renpy.sl2.slast", "SLUse") => NodeKind::SlUse,
        ("renpy.sl2.slast", "SLBlock") => NodeKind::SlBlock,
        ("renpy.python", "RevertableList")
        | ("renpy.python", "RevertableDict")
        | ("renpy.python", "RevertableSet")
        | ("renpy.revertable", "RevertableList")
        | ("renpy.revertable", "RevertableDict")
        | ("renpy.revertable", "RevertableSet") => NodeKind::RevertableContainer,
        _ => NodeKind::Opaque,
    }
}

#[derive(Debug)]
pub struct ClassRef {
    pub module: String,
    pub name: String,
    pub kind: NodeKind,
}

/// Inert stand-in for a pickled class instance: records what the stream
/// handed it, exposes it for the walker, does nothing else.
#[derive(Debug)]
pub struct FakeObject {
    pub class: Rc<ClassRef>,
    pub args: Vec<Value>,
    pub attrs: Vec<(String, Value)>,
}

impl FakeObject {
    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Rc<Vec<u8>>),
    Str(Rc<String>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Vec<(Value, Value)>>>),
    Class(Rc<ClassRef>),
    Object(Rc<RefCell<FakeObject>>),
}

impl Value {
    /// Owned string content, looking through PyExpr wrappers (PyExpr is a
    /// str subclass on the Python side; its first constructor argument
    /// carries the expression source).
    pub fn string_value(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.to_string()),
            Value::Object(obj) => {
                let obj = obj.borrow();
                if obj.class.kind == NodeKind::PyExpr {
                    obj.args.first().and_then(|v| v.string_value())
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

pub struct Unpickler<'a> {
    data: &'a [u8],
    pos: usize,
    stack: Vec<Value>,
    marks: Vec<usize>,
    memo: HashMap<u32, Value>,
}

impl<'a> Unpickler<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    pub fn load(mut self) -> Result<Value> {
        loop {
            let op = self.read_u8().context("Unexpected end of pickle stream")?;
            match op {
                0x80 => {
                    // PROTO
                    let _version = self.read_u8()?;
                }
                0x95 => {
                    // FRAME: length prefix only, content follows inline
                    self.read_exact(8)?;
                }
                b'.' => {
                    // STOP
                    return self.stack.pop().context("Pickle stack empty at STOP");
                }
                b'(' => self.marks.push(self.stack.len()),
                b'0' => {
                    // POP
                    self.stack.pop();
                }
                b'1' => {
                    // POP_MARK
                    let mark = self.pop_mark()?;
                    self.stack.truncate(mark);
                }
                b'2' => {
                    // DUP
                    let top = self.top()?.clone();
                    self.stack.push(top);
                }
                b'N' => self.stack.push(Value::None),
                0x88 => self.stack.push(Value::Bool(true)),
                0x89 => self.stack.push(Value::Bool(false)),
                b'I' => {
                    let line = self.read_line()?;
                    match line.as_str() {
                        "00" => self.stack.push(Value::Bool(false)),
                        "01" => self.stack.push(Value::Bool(true)),
                        _ => self
                            .stack
                            .push(Value::Int(line.parse().context("Bad INT literal")?)),
                    }
                }
                b'J' => {
                    let v = i32::from_le_bytes(self.read_array::<4>()?);
                    self.stack.push(Value::Int(v as i64));
                }
                b'K' => {
                    let v = self.read_u8()?;
                    self.stack.push(Value::Int(v as i64));
                }
                b'M' => {
                    let v = u16::from_le_bytes(self.read_array::<2>()?);
                    self.stack.push(Value::Int(v as i64));
                }
                b'L' => {
                    let line = self.read_line()?;
                    let trimmed = line.trim_end_matches('L');
                    self.stack
                        .push(Value::Int(trimmed.parse().unwrap_or_default()));
                }
                0x8a => {
                    // LONG1
                    let n = self.read_u8()? as usize;
                    let bytes = self.read_exact(n)?;
                    self.stack.push(Value::Int(le_signed(bytes)));
                }
                0x8b => {
                    // LONG4
                    let n = u32::from_le_bytes(self.read_array::<4>()?) as usize;
                    let bytes = self.read_exact(n)?;
                    self.stack.push(Value::Int(le_signed(bytes)));
                }
                b'F' => {
                    let line = self.read_line()?;
                    self.stack
                        .push(Value::Float(line.parse().context("Bad FLOAT literal")?));
                }
                b'G' => {
                    let v = f64::from_be_bytes(self.read_array::<8>()?);
                    self.stack.push(Value::Float(v));
                }
                b'S' | b'V' => {
                    // STRING / UNICODE (line form)
                    let line = self.read_line()?;
                    let trimmed = line.trim_matches(|c| c == '\'' || c == '"');
                    self.push_str(trimmed.to_string());
                }
                b'T' => {
                    // BINSTRING
                    let n = u32::from_le_bytes(self.read_array::<4>()?) as usize;
                    let bytes = self.read_exact(n)?;
                    self.push_str(latin1(bytes));
                }
                b'U' => {
                    // SHORT_BINSTRING
                    let n = self.read_u8()? as usize;
                    let bytes = self.read_exact(n)?;
                    self.push_str(latin1(bytes));
                }
                b'X' => {
                    // BINUNICODE
                    let n = u32::from_le_bytes(self.read_array::<4>()?) as usize;
                    let bytes = self.read_exact(n)?;
                    self.push_str(String::from_utf8_lossy(bytes).into_owned());
                }
                0x8c => {
                    // SHORT_BINUNICODE
                    let n = self.read_u8()? as usize;
                    let bytes = self.read_exact(n)?;
                    self.push_str(String::from_utf8_lossy(bytes).into_owned());
                }
                0x8d => {
                    // BINUNICODE8
                    let n = u64::from_le_bytes(self.read_array::<8>()?) as usize;
                    let bytes = self.read_exact(n)?;
                    self.push_str(String::from_utf8_lossy(bytes).into_owned());
                }
                b'B' => {
                    let n = u32::from_le_bytes(self.read_array::<4>()?) as usize;
                    let bytes = self.read_exact(n)?.to_vec();
                    self.stack.push(Value::Bytes(Rc::new(bytes)));
                }
                b'C' => {
                    let n = self.read_u8()? as usize;
                    let bytes = self.read_exact(n)?.to_vec();
                    self.stack.push(Value::Bytes(Rc::new(bytes)));
                }
                0x8e => {
                    let n = u64::from_le_bytes(self.read_array::<8>()?) as usize;
                    let bytes = self.read_exact(n)?.to_vec();
                    self.stack.push(Value::Bytes(Rc::new(bytes)));
                }
                0x96 => {
                    // BYTEARRAY8
                    let n = u64::from_le_bytes(self.read_array::<8>()?) as usize;
                    let bytes = self.read_exact(n)?.to_vec();
                    self.stack.push(Value::Bytes(Rc::new(bytes)));
                }
                b']' => self
                    .stack
                    .push(Value::List(Rc::new(RefCell::new(Vec::new())))),
                b'l' => {
                    let items = self.pop_to_mark()?;
                    self.stack.push(Value::List(Rc::new(RefCell::new(items))));
                }
                b'a' => {
                    // APPEND
                    let item = self.pop()?;
                    match self.top()? {
                        Value::List(list) => list.borrow_mut().push(item),
                        _ => bail!("APPEND target is not a list"),
                    }
                }
                b'e' => {
                    // APPENDS
                    let items = self.pop_to_mark()?;
                    match self.top()? {
                        Value::List(list) => list.borrow_mut().extend(items),
                        _ => bail!("APPENDS target is not a list"),
                    }
                }
                b')' => self.stack.push(Value::Tuple(Rc::new(Vec::new()))),
                b't' => {
                    let items = self.pop_to_mark()?;
                    self.stack.push(Value::Tuple(Rc::new(items)));
                }
                0x85 => {
                    let a = self.pop()?;
                    self.stack.push(Value::Tuple(Rc::new(vec![a])));
                }
                0x86 => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Value::Tuple(Rc::new(vec![a, b])));
                }
                0x87 => {
                    let c = self.pop()?;
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Value::Tuple(Rc::new(vec![a, b, c])));
                }
                b'}' => self
                    .stack
                    .push(Value::Dict(Rc::new(RefCell::new(Vec::new())))),
                b'd' => {
                    let items = self.pop_to_mark()?;
                    let pairs = pair_up(items)?;
                    self.stack.push(Value::Dict(Rc::new(RefCell::new(pairs))));
                }
                b's' => {
                    // SETITEM
                    let value = self.pop()?;
                    let key = self.pop()?;
                    match self.top()? {
                        Value::Dict(dict) => dict.borrow_mut().push((key, value)),
                        _ => bail!("SETITEM target is not a dict"),
                    }
                }
                b'u' => {
                    // SETITEMS
                    let items = self.pop_to_mark()?;
                    let pairs = pair_up(items)?;
                    match self.top()? {
                        Value::Dict(dict) => dict.borrow_mut().extend(pairs),
                        _ => bail!("SETITEMS target is not a dict"),
                    }
                }
                0x8f => self
                    .stack
                    .push(Value::List(Rc::new(RefCell::new(Vec::new())))),
                0x90 => {
                    // ADDITEMS (set)
                    let items = self.pop_to_mark()?;
                    match self.top()? {
                        Value::List(list) => list.borrow_mut().extend(items),
                        _ => bail!("ADDITEMS target is not a set"),
                    }
                }
                0x91 => {
                    // FROZENSET
                    let items = self.pop_to_mark()?;
                    self.stack.push(Value::List(Rc::new(RefCell::new(items))));
                }
                b'c' => {
                    // GLOBAL: two newline-terminated names
                    let module = self.read_line()?;
                    let name = self.read_line()?;
                    self.push_class(&module, &name);
                }
                0x93 => {
                    // STACK_GLOBAL
                    let name = self.pop()?;
                    let module = self.pop()?;
                    let module = module.string_value().context("STACK_GLOBAL module")?;
                    let name = name.string_value().context("STACK_GLOBAL name")?;
                    self.push_class(&module, &name);
                }
                b'R' | 0x81 => {
                    // REDUCE / NEWOBJ: class + argument tuple
                    let args = self.pop()?;
                    let class = self.pop()?;
                    self.push_instance(class, args)?;
                }
                0x92 => {
                    // NEWOBJ_EX: class, args, kwargs
                    let _kwargs = self.pop()?;
                    let args = self.pop()?;
                    let class = self.pop()?;
                    self.push_instance(class, args)?;
                }
                b'o' => {
                    // OBJ: mark, class, args...
                    let mut items = self.pop_to_mark()?;
                    if items.is_empty() {
                        bail!("OBJ with empty stack frame");
                    }
                    let class = items.remove(0);
                    self.push_instance(class, Value::Tuple(Rc::new(items)))?;
                }
                b'i' => {
                    // INST: module/name lines + args from mark
                    let module = self.read_line()?;
                    let name = self.read_line()?;
                    let items = self.pop_to_mark()?;
                    self.push_class(&module, &name);
                    let class = self.pop()?;
                    self.push_instance(class, Value::Tuple(Rc::new(items)))?;
                }
                b'b' => {
                    // BUILD: apply state dict to the object below
                    let state = self.pop()?;
                    self.apply_build(state)?;
                }
                b'g' => {
                    let line = self.read_line()?;
                    let idx: u32 = line.parse().context("Bad GET index")?;
                    self.push_memo(idx)?;
                }
                b'h' => {
                    let idx = self.read_u8()? as u32;
                    self.push_memo(idx)?;
                }
                b'j' => {
                    let idx = u32::from_le_bytes(self.read_array::<4>()?);
                    self.push_memo(idx)?;
                }
                b'p' => {
                    let line = self.read_line()?;
                    let idx: u32 = line.parse().context("Bad PUT index")?;
                    let top = self.top()?.clone();
                    self.memo.insert(idx, top);
                }
                b'q' => {
                    let idx = self.read_u8()? as u32;
                    let top = self.top()?.clone();
                    self.memo.insert(idx, top);
                }
                b'r' => {
                    let idx = u32::from_le_bytes(self.read_array::<4>()?);
                    let top = self.top()?.clone();
                    self.memo.insert(idx, top);
                }
                0x94 => {
                    // MEMOIZE
                    let idx = self.memo.len() as u32;
                    let top = self.top()?.clone();
                    self.memo.insert(idx, top);
                }
                b'P' | b'Q' => {
                    bail!("Persistent-id opcodes are not allowed in script pickles")
                }
                0x82..=0x84 => {
                    bail!("Extension-registry opcodes are not allowed in script pickles")
                }
                other => bail!("Unsupported pickle opcode {other:#04x} at {}", self.pos - 1),
            }
        }
    }

    fn push_class(&mut self, module: &str, name: &str) {
        let kind = resolve_class(module, name);
        self.stack.push(Value::Class(Rc::new(ClassRef {
            module: module.to_string(),
            name: name.to_string(),
            kind,
        })));
    }

    fn push_instance(&mut self, class: Value, args: Value) -> Result<()> {
        let class = match class {
            Value::Class(c) => c,
            // A REDUCE over a non-class callable (e.g. a memoized object)
            // still only records.
            other => {
                let fake = FakeObject {
                    class: Rc::new(ClassRef {
                        module: String::new(),
                        name: format!("{other:?}"),
                        kind: NodeKind::Opaque,
                    }),
                    args: flatten_args(args),
                    attrs: Vec::new(),
                };
                self.stack.push(Value::Object(Rc::new(RefCell::new(fake))));
                return Ok(());
            }
        };
        let fake = FakeObject {
            class,
            args: flatten_args(args),
            attrs: Vec::new(),
        };
        self.stack.push(Value::Object(Rc::new(RefCell::new(fake))));
        Ok(())
    }

    fn apply_build(&mut self, state: Value) -> Result<()> {
        let target = self.top()?.clone();
        let Value::Object(obj) = target else {
            // BUILD on a plain container: the state is discarded, matching
            // the record-only contract.
            return Ok(());
        };

        let mut merge = |dict: &Rc<RefCell<Vec<(Value, Value)>>>| {
            for (k, v) in dict.borrow().iter() {
                if let Some(key) = k.string_value() {
                    obj.borrow_mut().attrs.push((key, v.clone()));
                }
            }
        };

        match state {
            Value::Dict(dict) => merge(&dict),
            Value::Tuple(parts) => {
                // (dict_state, slots_state)
                for part in parts.iter() {
                    if let Value::Dict(dict) = part {
                        merge(dict);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn push_memo(&mut self, idx: u32) -> Result<()> {
        let value = self
            .memo
            .get(&idx)
            .with_context(|| format!("Memo index {idx} not set"))?
            .clone();
        self.stack.push(value);
        Ok(())
    }

    fn push_str(&mut self, s: String) {
        self.stack.push(Value::Str(Rc::new(s)));
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack.pop().context("Pickle stack underflow")
    }

    fn top(&mut self) -> Result<&Value> {
        self.stack.last().context("Pickle stack underflow")
    }

    fn pop_mark(&mut self) -> Result<usize> {
        self.marks.pop().context("Pickle mark stack underflow")
    }

    fn pop_to_mark(&mut self) -> Result<Vec<Value>> {
        let mark = self.pop_mark()?;
        if mark > self.stack.len() {
            bail!("Mark beyond stack");
        }
        Ok(self.stack.split_off(mark))
    }

    fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .context("Unexpected end of pickle data")?;
        self.pos += 1;
        Ok(b)
    }

    fn read_exact(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.data.len())
            .context("Pickle data truncated")?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.read_exact(N)?;
        Ok(slice.try_into().unwrap())
    }

    fn read_line(&mut self) -> Result<String> {
        let start = self.pos;
        while self.pos < self.data.len() && self.data[self.pos] != b'\n' {
            self.pos += 1;
        }
        if self.pos >= self.data.len() {
            bail!("Unterminated pickle line");
        }
        let line = String::from_utf8_lossy(&self.data[start..self.pos]).into_owned();
        self.pos += 1;
        Ok(line)
    }
}

fn pair_up(items: Vec<Value>) -> Result<Vec<(Value, Value)>> {
    if items.len() % 2 != 0 {
        bail!("Odd number of dict items");
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        pairs.push((k, v));
    }
    Ok(pairs)
}

fn flatten_args(args: Value) -> Vec<Value> {
    match args {
        Value::Tuple(items) => items.as_ref().clone(),
        Value::None => Vec::new(),
        other => vec![other],
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn le_signed(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    // Sign-extend from the original width.
    if bytes.len() <= 8 && bytes[bytes.len() - 1] & 0x80 != 0 {
        for b in buf.iter_mut().skip(bytes.len()) {
            *b = 0xFF;
        }
    }
    i64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Hand-assembled pickle streams: the test corpus cannot depend on a
    // Python interpreter.

    #[test]
    fn loads_basic_containers() {
        // protocol 2: {'a': [1, 2], 'b': (True, None)}
        let mut p: Vec<u8> = vec![0x80, 2];
        p.push(b'}'); // dict
        p.extend([b'q', 0]);
        p.push(b'('); // mark
        p.extend([0x8c, 1, b'a']); // 'a'
        p.push(b']'); // list
        p.push(b'('); // mark
        p.extend([b'K', 1, b'K', 2]);
        p.push(b'e'); // appends
        p.extend([0x8c, 1, b'b']); // 'b'
        p.extend([0x88, b'N', 0x86]); // (True, None)
        p.push(b'u'); // setitems
        p.push(b'.');

        let value = Unpickler::new(&p).load().unwrap();
        let Value::Dict(dict) = value else {
            panic!("expected dict")
        };
        let dict = dict.borrow();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict[0].0.string_value().as_deref(), Some("a"));
        let Value::List(list) = &dict[0].1 else {
            panic!("expected list")
        };
        assert_eq!(list.borrow().len(), 2);
    }

    #[test]
    fn unknown_global_becomes_opaque_record() {
        // REDUCE of os.system("echo") must record, never execute.
        let mut p: Vec<u8> = vec![0x80, 2];
        p.extend(b"cos\nsystem\n");
        p.extend([0x8c, 4]);
        p.extend(b"echo");
        p.push(0x85); // TUPLE1
        p.push(b'R');
        p.push(b'.');

        let value = Unpickler::new(&p).load().unwrap();
        let Value::Object(obj) = value else {
            panic!("expected object")
        };
        let obj = obj.borrow();
        assert_eq!(obj.class.module, "os");
        assert_eq!(obj.class.name, "system");
        assert_eq!(obj.class.kind, NodeKind::Opaque);
        assert_eq!(obj.args[0].string_value().as_deref(), Some("echo"));
    }

    #[test]
    fn whitelisted_class_with_build_state() {
        // renpy.ast.Say instance with {'who': 'e', 'what': 'Hello'}
        let mut p: Vec<u8> = vec![0x80, 2];
        p.extend(b"crenpy.ast\nSay\n");
        p.push(b')'); // empty args
        p.push(0x81); // NEWOBJ
        p.push(b'}'); // state dict
        p.push(b'(');
        p.extend([0x8c, 3]);
        p.extend(b"who");
        p.extend([0x8c, 1, b'e']);
        p.extend([0x8c, 4]);
        p.extend(b"what");
        p.extend([0x8c, 5]);
        p.extend(b"Hello");
        p.push(b'u');
        p.push(b'b'); // BUILD
        p.push(b'.');

        let value = Unpickler::new(&p).load().unwrap();
        let Value::Object(obj) = value else {
            panic!("expected object")
        };
        let obj = obj.borrow();
        assert_eq!(obj.class.kind, NodeKind::Say);
        assert_eq!(obj.attr("what").unwrap().string_value().as_deref(), Some("Hello"));
        assert_eq!(obj.attr("who").unwrap().string_value().as_deref(), Some("e"));
    }

    #[test]
    fn memo_shares_mutated_lists() {
        // l = []; memo it; append after memoization; fetch via BINGET.
        let mut p: Vec<u8> = vec![0x80, 2];
        p.push(b']');
        p.extend([b'q', 0]); // BINPUT 0
        p.push(b'(');
        p.extend([0x8c, 2]);
        p.extend(b"hi");
        p.push(b'e'); // APPENDS after the memo write
        p.push(b'0'); // POP the list
        p.extend([b'h', 0]); // BINGET 0
        p.push(b'.');

        let value = Unpickler::new(&p).load().unwrap();
        let Value::List(list) = value else {
            panic!("expected list")
        };
        assert_eq!(list.borrow().len(), 1, "memoized list must see the append");
    }

    #[test]
    fn rejects_persistent_ids() {
        let p: Vec<u8> = vec![0x80, 2, b'Q', b'.'];
        assert!(Unpickler::new(&p).load().is_err());
    }
}
