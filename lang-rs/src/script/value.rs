//! Runtime value model for Lang.
//!
//! A [`Value`] is a closed tagged union; a [`DataObject`] is the slot that
//! holds one, together with the slot metadata (type constraint, `final` and
//! `static` flags, owning variable name, language-internal marker).
//!
//! Every variant accessor is available on every value.  Reading through an
//! accessor that does not match the active variant returns a neutral default
//! (`0`, `""`, `'\0'`, `None`) instead of failing, so call sites can stay
//! uniform.
//!
//! Collections (`Array`, `List`, `ByteBuffer`) are shared by reference:
//! cloning the value clones the handle, not the contents.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use bitflags::bitflags;

use super::ast::Node;
use super::error::{ErrorObject, InterpretingError};
use super::native::{NativeCallable, NativeFunction};
use super::scope::{ScopeId, ScopeRef};

// ── Data types ────────────────────────────────────────────────────────────────

/// The discriminant of a [`Value`], also usable as a value (`Value::Type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Text,
    Char,
    Int,
    Long,
    Float,
    Double,
    ByteBuffer,
    Array,
    List,
    VarPointer,
    FunctionPointer,
    Struct,
    Object,
    Error,
    Type,
    Null,
    Void,
}

impl DataType {
    pub const ALL: [DataType; 17] = [
        DataType::Text,
        DataType::Char,
        DataType::Int,
        DataType::Long,
        DataType::Float,
        DataType::Double,
        DataType::ByteBuffer,
        DataType::Array,
        DataType::List,
        DataType::VarPointer,
        DataType::FunctionPointer,
        DataType::Struct,
        DataType::Object,
        DataType::Error,
        DataType::Type,
        DataType::Null,
        DataType::Void,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DataType::Text => "TEXT",
            DataType::Char => "CHAR",
            DataType::Int => "INT",
            DataType::Long => "LONG",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::ByteBuffer => "BYTE_BUFFER",
            DataType::Array => "ARRAY",
            DataType::List => "LIST",
            DataType::VarPointer => "VAR_POINTER",
            DataType::FunctionPointer => "FUNCTION_POINTER",
            DataType::Struct => "STRUCT",
            DataType::Object => "OBJECT",
            DataType::Error => "ERROR",
            DataType::Type => "TYPE",
            DataType::Null => "NULL",
            DataType::Void => "VOID",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }

    pub fn flag(self) -> DataTypeSet {
        DataTypeSet::from_bits_truncate(1 << (self as u32))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// A set of [`DataType`]s, one bit per variant.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DataTypeSet: u32 {
        const TEXT = 1 << 0;
        const CHAR = 1 << 1;
        const INT = 1 << 2;
        const LONG = 1 << 3;
        const FLOAT = 1 << 4;
        const DOUBLE = 1 << 5;
        const BYTE_BUFFER = 1 << 6;
        const ARRAY = 1 << 7;
        const LIST = 1 << 8;
        const VAR_POINTER = 1 << 9;
        const FUNCTION_POINTER = 1 << 10;
        const STRUCT = 1 << 11;
        const OBJECT = 1 << 12;
        const ERROR = 1 << 13;
        const TYPE = 1 << 14;
        const NULL = 1 << 15;
        const VOID = 1 << 16;

        const NUMBER = Self::INT.bits() | Self::LONG.bits() | Self::FLOAT.bits() | Self::DOUBLE.bits();
        const COLLECTION = Self::ARRAY.bits() | Self::LIST.bits() | Self::STRUCT.bits();
    }
}

impl DataTypeSet {
    /// The member types in declaration order.
    pub fn data_types(self) -> Vec<DataType> {
        DataType::ALL.iter().copied().filter(|t| self.contains(t.flag())).collect()
    }
}

// ── Type constraints ──────────────────────────────────────────────────────────

/// Allow-list or deny-list of the variants a slot may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeConstraint {
    types: DataTypeSet,
    allow_list: bool,
}

impl Default for TypeConstraint {
    fn default() -> Self {
        Self::any()
    }
}

impl TypeConstraint {
    /// No restriction (an empty deny-list).
    pub fn any() -> Self {
        Self { types: DataTypeSet::empty(), allow_list: false }
    }

    pub fn allow(types: DataTypeSet) -> Self {
        Self { types, allow_list: true }
    }

    pub fn deny(types: DataTypeSet) -> Self {
        Self { types, allow_list: false }
    }

    pub fn number() -> Self {
        Self::allow(DataTypeSet::NUMBER)
    }

    /// Implicit constraint of `&name` slots.
    pub fn collection() -> Self {
        Self::allow(DataTypeSet::COLLECTION | DataTypeSet::NULL)
    }

    /// Implicit constraint of `fp.name` slots.
    pub fn function_pointer() -> Self {
        Self::allow(DataTypeSet::FUNCTION_POINTER | DataTypeSet::NULL)
    }

    pub fn is_any(&self) -> bool {
        !self.allow_list && self.types.is_empty()
    }

    pub fn is_allow_list(&self) -> bool {
        self.allow_list
    }

    pub fn allows(&self, t: DataType) -> bool {
        self.types.contains(t.flag()) == self.allow_list
    }

    /// Every type this constraint lets through.
    pub fn allowed(&self) -> DataTypeSet {
        if self.allow_list {
            self.types
        } else {
            DataTypeSet::all().difference(self.types)
        }
    }

    pub fn intersect(self, other: TypeConstraint) -> TypeConstraint {
        if self.is_any() {
            return other;
        }
        if other.is_any() {
            return self;
        }
        Self::allow(self.allowed() & other.allowed())
    }

    /// Parse the inside of a `{...}` constraint: `INT|LONG` or `!NULL|VOID`.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let spec = spec.trim();
        let (allow_list, list) = match spec.strip_prefix('!') {
            Some(rest) => (false, rest),
            None => (true, spec),
        };
        if list.trim().is_empty() {
            return Err("empty type constraint".to_owned());
        }
        let mut types = DataTypeSet::empty();
        for name in list.split('|') {
            let name = name.trim();
            let t = DataType::from_name(name)
                .ok_or_else(|| format!("unknown data type \"{name}\""))?;
            types |= t.flag();
        }
        Ok(Self { types, allow_list })
    }

    /// The listed set rendered as `[INT, LONG]`, for error messages.
    pub fn describe(&self) -> String {
        let names: Vec<&str> = self.types.data_types().iter().map(|t| t.name()).collect();
        format!("[{}]", names.join(", "))
    }
}

impl fmt::Display for TypeConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.types.data_types().iter().map(|t| t.name()).collect();
        let bang = if self.allow_list { "" } else { "!" };
        write!(f, "{{{bang}{}}}", names.join("|"))
    }
}

/// The constraint implied by a variable's sigil.
pub fn sigil_constraint(name: &str) -> TypeConstraint {
    if name.starts_with('&') {
        TypeConstraint::collection()
    } else if name.starts_with("fp.") {
        TypeConstraint::function_pointer()
    } else {
        TypeConstraint::any()
    }
}

// ── Value ─────────────────────────────────────────────────────────────────────

pub type ArrayRef = Rc<RefCell<Vec<DataObject>>>;
pub type ListRef = Rc<RefCell<VecDeque<DataObject>>>;
pub type BufferRef = Rc<RefCell<Vec<u8>>>;

/// A Lang runtime datum.
#[derive(Debug, Clone)]
pub enum Value {
    Text(String),
    Char(char),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteBuffer(BufferRef),
    Array(ArrayRef),
    List(ListRef),
    VarPointer(VarPointer),
    FunctionPointer(Rc<FunctionPointer>),
    Struct(Rc<StructObject>),
    Object(Rc<LangObject>),
    Error(Rc<ErrorObject>),
    Type(DataType),
    Null,
    Void,
}

impl Default for Value {
    fn default() -> Self {
        Value::Text(String::new())
    }
}

impl Value {
    pub fn new_array(elements: Vec<DataObject>) -> Self {
        Value::Array(Rc::new(RefCell::new(elements)))
    }

    pub fn new_list(elements: VecDeque<DataObject>) -> Self {
        Value::List(Rc::new(RefCell::new(elements)))
    }

    pub fn new_byte_buffer(bytes: Vec<u8>) -> Self {
        Value::ByteBuffer(Rc::new(RefCell::new(bytes)))
    }

    pub fn new_error(err: ErrorObject) -> Self {
        Value::Error(Rc::new(err))
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Text(_) => DataType::Text,
            Value::Char(_) => DataType::Char,
            Value::Int(_) => DataType::Int,
            Value::Long(_) => DataType::Long,
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::ByteBuffer(_) => DataType::ByteBuffer,
            Value::Array(_) => DataType::Array,
            Value::List(_) => DataType::List,
            Value::VarPointer(_) => DataType::VarPointer,
            Value::FunctionPointer(_) => DataType::FunctionPointer,
            Value::Struct(_) => DataType::Struct,
            Value::Object(_) => DataType::Object,
            Value::Error(_) => DataType::Error,
            Value::Type(_) => DataType::Type,
            Value::Null => DataType::Null,
            Value::Void => DataType::Void,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    // ── Accessors (neutral default on mismatch) ───────────────────────────────

    pub fn text(&self) -> &str {
        match self {
            Value::Text(s) => s,
            _ => "",
        }
    }

    pub fn char_value(&self) -> char {
        match self {
            Value::Char(c) => *c,
            _ => '\0',
        }
    }

    pub fn int(&self) -> i32 {
        match self {
            Value::Int(n) => *n,
            _ => 0,
        }
    }

    pub fn long(&self) -> i64 {
        match self {
            Value::Long(n) => *n,
            _ => 0,
        }
    }

    pub fn float(&self) -> f32 {
        match self {
            Value::Float(x) => *x,
            _ => 0.0,
        }
    }

    pub fn double(&self) -> f64 {
        match self {
            Value::Double(x) => *x,
            _ => 0.0,
        }
    }

    pub fn byte_buffer(&self) -> Option<&BufferRef> {
        match self {
            Value::ByteBuffer(b) => Some(b),
            _ => None,
        }
    }

    pub fn array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn list(&self) -> Option<&ListRef> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn var_pointer(&self) -> Option<&VarPointer> {
        match self {
            Value::VarPointer(p) => Some(p),
            _ => None,
        }
    }

    pub fn function_pointer(&self) -> Option<&Rc<FunctionPointer>> {
        match self {
            Value::FunctionPointer(fp) => Some(fp),
            _ => None,
        }
    }

    pub fn struct_object(&self) -> Option<&Rc<StructObject>> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn object(&self) -> Option<&Rc<LangObject>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorObject> {
        match self {
            Value::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn type_value(&self) -> Option<DataType> {
        match self {
            Value::Type(t) => Some(*t),
            _ => None,
        }
    }
}

fn fmt_double(f: &mut fmt::Formatter<'_>, x: f64) -> fmt::Result {
    if x.is_nan() {
        f.write_str("NaN")
    } else if x.is_infinite() {
        f.write_str(if x > 0.0 { "Infinity" } else { "-Infinity" })
    } else if x.fract() == 0.0 && x.abs() < 1e15 {
        write!(f, "{x:.1}")
    } else {
        write!(f, "{x}")
    }
}

fn fmt_float(f: &mut fmt::Formatter<'_>, x: f32) -> fmt::Result {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e7 {
        write!(f, "{x:.1}")
    } else if x.is_finite() {
        write!(f, "{x}")
    } else {
        fmt_double(f, f64::from(x))
    }
}

fn fmt_elements<'a>(
    f: &mut fmt::Formatter<'_>,
    elements: impl Iterator<Item = &'a DataObject>,
) -> fmt::Result {
    f.write_str("[")?;
    for (i, e) in elements.enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", e.value())?;
    }
    f.write_str("]")
}

/// Lang's text conversion: what `func.toText` and text concatenation see.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Char(c) => write!(f, "{c}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Long(n) => write!(f, "{n}"),
            Value::Float(x) => fmt_float(f, *x),
            Value::Double(x) => fmt_double(f, *x),
            Value::ByteBuffer(b) => {
                let hex: Vec<String> = b.borrow().iter().map(|b| format!("0x{b:02X}")).collect();
                write!(f, "[{}]", hex.join(", "))
            }
            Value::Array(a) => fmt_elements(f, a.borrow().iter()),
            Value::List(l) => fmt_elements(f, l.borrow().iter()),
            Value::VarPointer(p) => write!(f, "-->{{{}}}", p.name),
            Value::FunctionPointer(fp) => write!(f, "{fp}"),
            Value::Struct(s) => write!(f, "{s}"),
            Value::Object(o) => write!(f, "<Object: {}>", o.class_name()),
            Value::Error(e) => f.write_str(e.err.name()),
            Value::Type(t) => f.write_str(t.name()),
            Value::Null => f.write_str("null"),
            Value::Void => Ok(()),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Long(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Double(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Int(i32::from(b))
    }
}

// ── DataObject ────────────────────────────────────────────────────────────────

/// A value together with the metadata of the slot holding it.
#[derive(Debug, Clone, Default)]
pub struct DataObject {
    value: Value,
    constraint: TypeConstraint,
    final_data: bool,
    static_data: bool,
    lang_var: bool,
    variable_name: Option<String>,
}

impl Deref for DataObject {
    type Target = Value;

    fn deref(&self) -> &Value {
        &self.value
    }
}

impl fmt::Display for DataObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.value, f)
    }
}

impl From<Value> for DataObject {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

impl DataObject {
    pub fn new(value: Value) -> Self {
        Self { value, ..Self::default() }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::new(Value::Text(s.into()))
    }

    pub fn int(n: i32) -> Self {
        Self::new(Value::Int(n))
    }

    pub fn long(n: i64) -> Self {
        Self::new(Value::Long(n))
    }

    pub fn double(x: f64) -> Self {
        Self::new(Value::Double(x))
    }

    pub fn char(c: char) -> Self {
        Self::new(Value::Char(c))
    }

    pub fn boolean(b: bool) -> Self {
        Self::new(Value::from(b))
    }

    pub fn null() -> Self {
        Self::new(Value::Null)
    }

    pub fn void() -> Self {
        Self::new(Value::Void)
    }

    pub fn error(err: ErrorObject) -> Self {
        Self::new(Value::new_error(err))
    }

    pub fn array(elements: Vec<DataObject>) -> Self {
        Self::new(Value::new_array(elements))
    }

    pub fn function_pointer(fp: FunctionPointer) -> Self {
        Self::new(Value::FunctionPointer(Rc::new(fp)))
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// A new, unflagged slot holding the same value.
    pub fn fresh_copy(&self) -> DataObject {
        DataObject::new(self.value.clone())
    }

    /// Replace the held value, honouring `final` and the type constraint.
    pub fn set(&mut self, value: Value) -> Result<(), ErrorObject> {
        if self.final_data {
            return Err(ErrorObject::with_message(
                InterpretingError::FinalVarChange,
                format!("\"{}\" is final", self.display_name()),
            ));
        }
        if !self.constraint.allows(value.data_type()) {
            return Err(ErrorObject::with_message(
                InterpretingError::IncompatibleDataType,
                format!(
                    "{} can not be stored in \"{}\" {}",
                    value.data_type(),
                    self.display_name(),
                    self.constraint
                ),
            ));
        }
        self.value = value;
        Ok(())
    }

    /// Change the constraint; the current value must satisfy it.
    pub fn set_constraint(&mut self, constraint: TypeConstraint) -> Result<(), ErrorObject> {
        if self.final_data {
            return Err(ErrorObject::with_message(
                InterpretingError::FinalVarChange,
                format!("\"{}\" is final", self.display_name()),
            ));
        }
        if !constraint.allows(self.value.data_type()) {
            return Err(ErrorObject::with_message(
                InterpretingError::IncompatibleDataType,
                format!("current value of \"{}\" violates {constraint}", self.display_name()),
            ));
        }
        self.constraint = constraint;
        Ok(())
    }

    pub fn constraint(&self) -> TypeConstraint {
        self.constraint
    }

    pub fn with_constraint(mut self, constraint: TypeConstraint) -> Self {
        self.constraint = constraint;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.variable_name = Some(name.into());
        self
    }

    pub fn variable_name(&self) -> Option<&str> {
        self.variable_name.as_deref()
    }

    fn display_name(&self) -> &str {
        self.variable_name.as_deref().unwrap_or("<anonymous>")
    }

    pub fn is_final(&self) -> bool {
        self.final_data
    }

    pub fn set_final(&mut self) {
        self.final_data = true;
    }

    pub fn is_static(&self) -> bool {
        self.static_data
    }

    pub fn set_static(&mut self) {
        self.static_data = true;
    }

    pub fn is_lang_var(&self) -> bool {
        self.lang_var
    }

    pub fn set_lang_var(&mut self) {
        self.lang_var = true;
    }
}

// ── Var pointers ──────────────────────────────────────────────────────────────

/// An aliasing reference to the slot `name` in scope `scope`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarPointer {
    pub scope: ScopeId,
    pub name: String,
}

// ── Function pointers ─────────────────────────────────────────────────────────

/// One declared parameter of a Lang or native function.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub constraint: Option<TypeConstraint>,
    /// Argument must coerce to a number.
    pub number: bool,
    /// Collects every remaining argument into an array.
    pub varargs: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), constraint: None, number: false, varargs: false }
    }
}

/// A user-defined function: parameters, body and the scope it closes over.
pub struct LangFunction {
    pub params: Vec<Parameter>,
    pub return_constraint: Option<TypeConstraint>,
    pub body: Rc<Node>,
    pub scope: ScopeRef,
}

impl fmt::Debug for LangFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LangFunction")
            .field("params", &self.params)
            .field("return_constraint", &self.return_constraint)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub enum Callable {
    Normal(Rc<LangFunction>),
    Native(Rc<NativeFunction>),
    /// A host closure outside the registry; no descriptor checks apply.
    External(NativeCallable),
}

/// How a function pointer is classified for `func.typeOf` and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Normal,
    Native,
    External,
    Linker,
}

#[derive(Clone)]
pub struct FunctionPointer {
    name: Option<String>,
    callable: Callable,
}

impl FunctionPointer {
    pub fn new(name: Option<String>, callable: Callable) -> Self {
        Self { name, callable }
    }

    pub fn external<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(
                &mut super::interp::Interpreter,
                Vec<DataObject>,
                ScopeId,
            ) -> super::native::NativeResult
            + 'static,
    {
        Self { name: Some(name.into()), callable: Callable::External(Rc::new(f)) }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self { name: Some(name.into()), callable: self.callable.clone() }
    }

    pub fn callable(&self) -> &Callable {
        &self.callable
    }

    pub fn kind(&self) -> FunctionKind {
        match &self.callable {
            Callable::Normal(_) => FunctionKind::Normal,
            Callable::Native(n) if n.descriptor.linker => FunctionKind::Linker,
            Callable::Native(_) => FunctionKind::Native,
            Callable::External(_) => FunctionKind::External,
        }
    }

    /// Identity comparison of the underlying callable.
    pub fn same_function(&self, other: &FunctionPointer) -> bool {
        match (&self.callable, &other.callable) {
            (Callable::Normal(a), Callable::Normal(b)) => Rc::ptr_eq(a, b),
            (Callable::Native(a), Callable::Native(b)) => Rc::ptr_eq(a, b),
            (Callable::External(a), Callable::External(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for FunctionPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionPointer")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .finish()
    }
}

impl fmt::Display for FunctionPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, self.kind()) {
            (Some(name), _) => f.write_str(name),
            (None, FunctionKind::Normal) => f.write_str("<Normal FP>"),
            (None, FunctionKind::Native) => f.write_str("<Native FP>"),
            (None, FunctionKind::External) => f.write_str("<External FP>"),
            (None, FunctionKind::Linker) => f.write_str("<Linker FP>"),
        }
    }
}

// ── Structs ───────────────────────────────────────────────────────────────────

/// A struct definition (member names only) or an instance (members + values).
#[derive(Debug)]
pub struct StructObject {
    members: Vec<(String, Option<TypeConstraint>)>,
    values: Option<RefCell<Vec<DataObject>>>,
}

impl StructObject {
    pub fn definition(members: Vec<(String, Option<TypeConstraint>)>) -> Self {
        Self { members, values: None }
    }

    /// Instantiate `definition` with one value per member.
    pub fn instance(definition: &StructObject, values: Vec<Value>) -> Result<Self, ErrorObject> {
        if values.len() != definition.members.len() {
            return Err(ErrorObject::with_message(
                InterpretingError::InvalidArgCount,
                format!("{} member value(s) needed", definition.members.len()),
            ));
        }
        let mut slots = Vec::with_capacity(values.len());
        for ((name, constraint), value) in definition.members.iter().zip(values) {
            let mut slot = DataObject::default()
                .with_name(name.clone())
                .with_constraint(constraint.unwrap_or_default());
            slot.set(value)?;
            slots.push(slot);
        }
        Ok(Self { members: definition.members.clone(), values: Some(RefCell::new(slots)) })
    }

    pub fn is_definition(&self) -> bool {
        self.values.is_none()
    }

    pub fn member_names(&self) -> Vec<String> {
        self.members.iter().map(|(n, _)| n.clone()).collect()
    }

    fn index_of(&self, name: &str) -> Result<usize, ErrorObject> {
        self.members
            .iter()
            .position(|(n, _)| n == name || n.strip_prefix('$') == Some(name))
            .ok_or_else(|| {
                ErrorObject::with_message(
                    InterpretingError::InvalidArguments,
                    format!("the struct has no member \"{name}\""),
                )
            })
    }

    fn instance_values(&self) -> Result<&RefCell<Vec<DataObject>>, ErrorObject> {
        self.values.as_ref().ok_or_else(|| {
            ErrorObject::with_message(
                InterpretingError::InvalidArguments,
                "a struct definition has no member values",
            )
        })
    }

    pub fn get(&self, name: &str) -> Result<DataObject, ErrorObject> {
        let values = self.instance_values()?;
        let i = self.index_of(name)?;
        Ok(values.borrow()[i].clone())
    }

    pub fn set(&self, name: &str, value: Value) -> Result<(), ErrorObject> {
        let values = self.instance_values()?;
        let i = self.index_of(name)?;
        values.borrow_mut()[i].set(value)
    }
}

impl fmt::Display for StructObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(values) = &self.values else {
            return f.write_str("<Struct[Definition]>");
        };
        f.write_str("{")?;
        for (i, slot) in values.borrow().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", self.members[i].0, slot.value())?;
        }
        f.write_str("}")
    }
}

// ── Objects ───────────────────────────────────────────────────────────────────

/// A dynamic object: a class name plus a mutable member table.
#[derive(Debug)]
pub struct LangObject {
    class_name: String,
    members: RefCell<BTreeMap<String, DataObject>>,
}

impl LangObject {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self { class_name: class_name.into(), members: RefCell::new(BTreeMap::new()) }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn get(&self, name: &str) -> Option<DataObject> {
        self.members.borrow().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) -> Result<(), ErrorObject> {
        let mut members = self.members.borrow_mut();
        if let Some(slot) = members.get_mut(name) {
            return slot.set(value);
        }
        let mut slot = DataObject::default().with_name(name).with_constraint(sigil_constraint(name));
        slot.set(value)?;
        members.insert(name.to_owned(), slot);
        Ok(())
    }

    pub fn member_names(&self) -> Vec<String> {
        self.members.borrow().keys().cloned().collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
