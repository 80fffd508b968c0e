//! Numpy array pickles
//!
//! `pickle.dump` of a numpy array does not store plain data. The array is
//! rebuilt by calling `numpy.core.multiarray._reconstruct` and applying a
//! BUILD state `(version, shape, dtype, is_fortran, raw_bytes)`, or, on
//! protocol 5, by calling `numpy.core.numeric._frombuffer(buffer, dtype,
//! shape, order)`. `serde-pickle` drops unresolved globals and BUILD state,
//! so this module evaluates the small subset of the pickle machine those
//! streams use and rebuilds integer matrices from the raw buffer.

use crate::error::{FeatureError, Result};
use ndarray::{Array2, ShapeBuilder};
use std::collections::HashMap;

const PROTO: u8 = 0x80;
const FRAME: u8 = 0x95;
const STOP: u8 = b'.';
const MARK: u8 = b'(';
const POP: u8 = b'0';
const GLOBAL: u8 = b'c';
const STACK_GLOBAL: u8 = 0x93;
const BININT: u8 = b'J';
const BININT1: u8 = b'K';
const BININT2: u8 = b'M';
const LONG1: u8 = 0x8a;
const NONE: u8 = b'N';
const NEWTRUE: u8 = 0x88;
const NEWFALSE: u8 = 0x89;
const SHORT_BINUNICODE: u8 = 0x8c;
const BINUNICODE: u8 = b'X';
const BINUNICODE8: u8 = 0x8d;
const SHORT_BINSTRING: u8 = b'U';
const BINSTRING: u8 = b'T';
const SHORT_BINBYTES: u8 = b'C';
const BINBYTES: u8 = b'B';
const BINBYTES8: u8 = 0x8e;
const BYTEARRAY8: u8 = 0x96;
const EMPTY_TUPLE: u8 = b')';
const TUPLE: u8 = b't';
const TUPLE1: u8 = 0x85;
const TUPLE2: u8 = 0x86;
const TUPLE3: u8 = 0x87;
const EMPTY_LIST: u8 = b']';
const APPEND: u8 = b'a';
const APPENDS: u8 = b'e';
const REDUCE: u8 = b'R';
const NEWOBJ: u8 = 0x81;
const BUILD: u8 = b'b';
const BINPUT: u8 = b'q';
const LONG_BINPUT: u8 = b'r';
const MEMOIZE: u8 = 0x94;
const BINGET: u8 = b'h';
const LONG_BINGET: u8 = b'j';

/// Value on the pickle stack
#[derive(Debug, Clone)]
enum Object {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Object>),
    List(Vec<Object>),
    Global {
        module: String,
        name: String,
    },
    Call {
        callable: Box<Object>,
        args: Box<Object>,
        state: Option<Box<Object>>,
    },
}

impl Object {
    fn is_global(&self, module_prefix: &str, global: &str) -> bool {
        matches!(self, Object::Global { module, name } if module.starts_with(module_prefix) && name == global)
    }
}

struct Machine<'a> {
    data: &'a [u8],
    pos: usize,
    stack: Vec<Object>,
    marks: Vec<usize>,
    memo: HashMap<u32, Object>,
}

impl<'a> Machine<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| FeatureError::data_load(format!("truncated pickle at byte {}", self.pos)))?;
        let data = self.data;
        self.pos = end;
        Ok(&data[end - n..end])
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn len_u64(&mut self) -> Result<usize> {
        let len = self.u64()?;
        usize::try_from(len).map_err(|_| FeatureError::data_load(format!("pickle length {} too large", len)))
    }

    fn line(&mut self) -> Result<String> {
        let data = self.data;
        let rest = &data[self.pos..];
        let end = rest
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| FeatureError::data_load("unterminated GLOBAL"))?;
        let text = self.utf8(&rest[..end])?;
        self.pos += end + 1;
        Ok(text)
    }

    fn utf8(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| FeatureError::data_load(format!("invalid utf-8 in pickle: {}", e)))
    }

    fn pop(&mut self) -> Result<Object> {
        self.stack
            .pop()
            .ok_or_else(|| FeatureError::data_load("pickle stack underflow"))
    }

    fn top(&mut self) -> Result<&mut Object> {
        self.stack
            .last_mut()
            .ok_or_else(|| FeatureError::data_load("pickle stack underflow"))
    }

    fn pop_mark(&mut self) -> Result<Vec<Object>> {
        let mark = self
            .marks
            .pop()
            .ok_or_else(|| FeatureError::data_load("pickle MARK missing"))?;
        if mark > self.stack.len() {
            return Err(FeatureError::data_load("pickle MARK past stack end"));
        }
        Ok(self.stack.split_off(mark))
    }

    fn memo_get(&self, key: u32) -> Result<Object> {
        self.memo
            .get(&key)
            .cloned()
            .ok_or_else(|| FeatureError::data_load(format!("pickle memo {} missing", key)))
    }

    fn memo_put(&mut self, key: u32) -> Result<()> {
        let value = self
            .stack
            .last()
            .cloned()
            .ok_or_else(|| FeatureError::data_load("pickle stack underflow"))?;
        self.memo.insert(key, value);
        Ok(())
    }

    fn run(mut self) -> Result<Object> {
        loop {
            let op = self.byte()?;
            match op {
                PROTO => {
                    self.byte()?;
                }
                FRAME => {
                    self.u64()?;
                }
                STOP => return self.pop(),
                MARK => self.marks.push(self.stack.len()),
                POP => {
                    self.pop()?;
                }
                GLOBAL => {
                    let module = self.line()?;
                    let name = self.line()?;
                    self.stack.push(Object::Global { module, name });
                }
                STACK_GLOBAL => {
                    let name = self.pop()?;
                    let module = self.pop()?;
                    match (module, name) {
                        (Object::Str(module), Object::Str(name)) => {
                            self.stack.push(Object::Global { module, name })
                        }
                        _ => return Err(FeatureError::data_load("STACK_GLOBAL expects two strings")),
                    }
                }
                BININT => {
                    let v = self.u32()? as i32;
                    self.stack.push(Object::Int(v as i64));
                }
                BININT1 => {
                    let v = self.byte()?;
                    self.stack.push(Object::Int(v as i64));
                }
                BININT2 => {
                    let v = self.u16()?;
                    self.stack.push(Object::Int(v as i64));
                }
                LONG1 => {
                    let n = self.byte()? as usize;
                    let bytes = self.take(n)?;
                    let v = read_int(bytes, true, false)?;
                    self.stack.push(Object::Int(v));
                }
                NONE => self.stack.push(Object::None),
                NEWTRUE => self.stack.push(Object::Bool(true)),
                NEWFALSE => self.stack.push(Object::Bool(false)),
                SHORT_BINUNICODE | BINUNICODE | BINUNICODE8 => {
                    let n = match op {
                        SHORT_BINUNICODE => self.byte()? as usize,
                        BINUNICODE => self.u32()? as usize,
                        _ => self.len_u64()?,
                    };
                    let bytes = self.take(n)?;
                    let text = self.utf8(bytes)?;
                    self.stack.push(Object::Str(text));
                }
                SHORT_BINSTRING | SHORT_BINBYTES => {
                    let n = self.byte()? as usize;
                    let bytes = self.take(n)?.to_vec();
                    self.stack.push(Object::Bytes(bytes));
                }
                BINSTRING | BINBYTES => {
                    let n = self.u32()? as usize;
                    let bytes = self.take(n)?.to_vec();
                    self.stack.push(Object::Bytes(bytes));
                }
                BINBYTES8 | BYTEARRAY8 => {
                    let n = self.len_u64()?;
                    let bytes = self.take(n)?.to_vec();
                    self.stack.push(Object::Bytes(bytes));
                }
                EMPTY_TUPLE => self.stack.push(Object::Tuple(Vec::new())),
                TUPLE => {
                    let items = self.pop_mark()?;
                    self.stack.push(Object::Tuple(items));
                }
                TUPLE1 | TUPLE2 | TUPLE3 => {
                    let n = (op - TUPLE1 + 1) as usize;
                    if self.stack.len() < n {
                        return Err(FeatureError::data_load("pickle stack underflow"));
                    }
                    let items = self.stack.split_off(self.stack.len() - n);
                    self.stack.push(Object::Tuple(items));
                }
                EMPTY_LIST => self.stack.push(Object::List(Vec::new())),
                APPEND => {
                    let item = self.pop()?;
                    match self.top()? {
                        Object::List(items) => items.push(item),
                        _ => return Err(FeatureError::data_load("APPEND to a non-list")),
                    }
                }
                APPENDS => {
                    let new_items = self.pop_mark()?;
                    match self.top()? {
                        Object::List(items) => items.extend(new_items),
                        _ => return Err(FeatureError::data_load("APPENDS to a non-list")),
                    }
                }
                REDUCE | NEWOBJ => {
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    self.stack.push(Object::Call {
                        callable: Box::new(callable),
                        args: Box::new(args),
                        state: None,
                    });
                }
                BUILD => {
                    let new_state = self.pop()?;
                    match self.top()? {
                        Object::Call { state, .. } => *state = Some(Box::new(new_state)),
                        _ => return Err(FeatureError::data_load("BUILD on a non-object")),
                    }
                }
                BINPUT => {
                    let key = self.byte()? as u32;
                    self.memo_put(key)?;
                }
                LONG_BINPUT => {
                    let key = self.u32()?;
                    self.memo_put(key)?;
                }
                MEMOIZE => {
                    let key = self.memo.len() as u32;
                    self.memo_put(key)?;
                }
                BINGET => {
                    let key = self.byte()? as u32;
                    let value = self.memo_get(key)?;
                    self.stack.push(value);
                }
                LONG_BINGET => {
                    let key = self.u32()?;
                    let value = self.memo_get(key)?;
                    self.stack.push(value);
                }
                other => {
                    return Err(FeatureError::data_load(format!(
                        "unsupported pickle opcode 0x{:02x} at byte {}",
                        other,
                        self.pos - 1
                    )))
                }
            }
        }
    }
}

/// Integer element type of an array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IntDtype {
    signed: bool,
    width: usize,
    big_endian: bool,
}

/// Read one integer of `bytes.len()` (1..=8) bytes
fn read_int(bytes: &[u8], signed: bool, big_endian: bool) -> Result<i64> {
    let width = bytes.len();
    if width == 0 {
        return Ok(0);
    }
    if width > 8 {
        return Err(FeatureError::data_load(format!("{}-byte integer does not fit in i64", width)));
    }

    let mut buf = [0u8; 8];
    if big_endian {
        for (dst, src) in buf.iter_mut().zip(bytes.iter().rev()) {
            *dst = *src;
        }
    } else {
        buf[..width].copy_from_slice(bytes);
    }
    if signed && buf[width - 1] & 0x80 != 0 {
        for b in &mut buf[width..] {
            *b = 0xff;
        }
    }

    let raw = u64::from_le_bytes(buf);
    if signed {
        Ok(raw as i64)
    } else {
        i64::try_from(raw).map_err(|_| FeatureError::data_load(format!("value {} does not fit in i64", raw)))
    }
}

fn int(obj: &Object, what: &str) -> Result<i64> {
    match obj {
        Object::Int(v) => Ok(*v),
        Object::Bool(b) => Ok(*b as i64),
        other => Err(FeatureError::data_load(format!("{}: expected an integer, found {:?}", what, other))),
    }
}

fn tuple<'o>(obj: &'o Object, what: &str) -> Result<&'o [Object]> {
    match obj {
        Object::Tuple(items) => Ok(items),
        _ => Err(FeatureError::data_load(format!("{}: expected a tuple", what))),
    }
}

/// Raw buffer, including the latin-1 `_codecs.encode` form protocol 2 uses for bytes
fn buffer(obj: &Object) -> Result<Vec<u8>> {
    match obj {
        Object::Bytes(bytes) => Ok(bytes.clone()),
        Object::Call { callable, args, .. } if callable.is_global("_codecs", "encode") => {
            let args = tuple(args, "_codecs.encode")?;
            match args.first() {
                Some(Object::Str(text)) => text
                    .chars()
                    .map(|c| {
                        u8::try_from(c as u32)
                            .map_err(|_| FeatureError::data_load("non latin-1 array buffer"))
                    })
                    .collect(),
                _ => Err(FeatureError::data_load("_codecs.encode without a string")),
            }
        }
        _ => Err(FeatureError::data_load("array buffer is not bytes")),
    }
}

/// `numpy.dtype(code, align, copy)` with BUILD state `(3, byteorder, ...)`
fn dtype(obj: &Object) -> Result<IntDtype> {
    let (args, state) = match obj {
        Object::Call {
            callable,
            args,
            state,
        } if callable.is_global("numpy", "dtype") => (args, state),
        _ => return Err(FeatureError::data_load("array dtype is not a numpy.dtype")),
    };

    let code = match tuple(args, "dtype")?.first() {
        Some(Object::Str(code)) => code.trim_start_matches(['<', '>', '=', '|']),
        _ => return Err(FeatureError::data_load("dtype without a type code")),
    };
    let signed = match code.chars().next() {
        Some('i') => true,
        Some('u') => false,
        _ => {
            return Err(FeatureError::data_load(format!(
                "dtype {:?} is not an integer type",
                code
            )))
        }
    };
    let width: usize = code[1..]
        .parse()
        .ok()
        .filter(|w| matches!(w, 1 | 2 | 4 | 8))
        .ok_or_else(|| FeatureError::data_load(format!("unsupported integer dtype {:?}", code)))?;

    let big_endian = match state.as_deref() {
        Some(state) => matches!(tuple(state, "dtype state")?.get(1), Some(Object::Str(order)) if order == ">"),
        None => false,
    };

    Ok(IntDtype {
        signed,
        width,
        big_endian,
    })
}

fn matrix(shape: &Object, dtype: IntDtype, fortran: bool, raw: &[u8]) -> Result<Array2<i64>> {
    let dims = tuple(shape, "array shape")?
        .iter()
        .map(|d| {
            let d = int(d, "array shape")?;
            usize::try_from(d).map_err(|_| FeatureError::data_load(format!("negative dimension {}", d)))
        })
        .collect::<Result<Vec<usize>>>()?;

    let (n_rows, n_cols) = match dims.as_slice() {
        [rows, cols] => (*rows, *cols),
        [0] => (0, 0),
        other => {
            return Err(FeatureError::data_load(format!(
                "expected a 2-D array, found shape {:?}",
                other
            )))
        }
    };

    let expected = n_rows
        .checked_mul(n_cols)
        .and_then(|n| n.checked_mul(dtype.width))
        .ok_or_else(|| FeatureError::data_load("array shape overflows"))?;
    if raw.len() != expected {
        return Err(FeatureError::data_load(format!(
            "array buffer has {} bytes, shape {:?} needs {}",
            raw.len(),
            dims,
            expected
        )));
    }

    let values = raw
        .chunks_exact(dtype.width)
        .map(|chunk| read_int(chunk, dtype.signed, dtype.big_endian))
        .collect::<Result<Vec<i64>>>()?;

    let array = if fortran {
        Array2::from_shape_vec((n_rows, n_cols).f(), values)
    } else {
        Array2::from_shape_vec((n_rows, n_cols), values)
    }
    .map_err(|e| FeatureError::shape(e.to_string()))?;

    Ok(array.as_standard_layout().into_owned())
}

fn array_from(obj: &Object) -> Result<Option<Array2<i64>>> {
    let (callable, args, state) = match obj {
        Object::Call {
            callable,
            args,
            state,
        } => (callable, args, state),
        _ => return Ok(None),
    };

    if callable.is_global("numpy", "_reconstruct") {
        let state = state
            .as_deref()
            .ok_or_else(|| FeatureError::data_load("numpy array without BUILD state"))?;
        let items = tuple(state, "array state")?;
        // the leading version number is absent in very old pickles
        let items = match items.len() {
            5 => &items[1..],
            4 => items,
            n => {
                return Err(FeatureError::data_load(format!(
                    "array state has {} fields",
                    n
                )))
            }
        };
        let fortran = int(&items[2], "is_fortran")? != 0;
        let raw = buffer(&items[3])?;
        return matrix(&items[0], dtype(&items[1])?, fortran, &raw).map(Some);
    }

    if callable.is_global("numpy", "_frombuffer") {
        let items = tuple(args, "_frombuffer")?;
        if items.len() != 4 {
            return Err(FeatureError::data_load("_frombuffer expects 4 arguments"));
        }
        let fortran = matches!(&items[3], Object::Str(order) if order == "F");
        let raw = buffer(&items[0])?;
        return matrix(&items[2], dtype(&items[1])?, fortran, &raw).map(Some);
    }

    Ok(None)
}

/// Decode a pickled numpy integer matrix
///
/// Returns `Ok(None)` when the pickle holds something other than a numpy
/// array, so callers can fall back to plain pickle decoding.
pub fn decode_int_matrix(data: &[u8]) -> Result<Option<Array2<i64>>> {
    let mentions_numpy = data.windows(5).any(|w| w == b"numpy");
    match Machine::new(data).run() {
        Ok(obj) => array_from(&obj),
        Err(e) if mentions_numpy => Err(e),
        Err(_) => Ok(None),
    }
}
