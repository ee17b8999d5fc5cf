//! Abstract syntax tree.
//!
//! Nodes are built once by the parser and never mutated.  Composite
//! statements (if, loop, try) hold an ordered list of *part* nodes.  Every
//! node exposes its children in order ([`Node::children`]) and a fieldless
//! discriminant ([`Node::node_type`]) for dispatch and diagnostics.

use std::fmt;
use std::rc::Rc;

use super::error::InterpretingError;
use super::value::{Parameter, TypeConstraint};

// ── Operators ─────────────────────────────────────────────────────────────────

/// Arithmetic/bitwise operators (the math precedence table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathOperator {
    Pow,
    Pos,
    Inv,
    BitwiseNot,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Add,
    Sub,
    Lshift,
    Rshift,
    Rzshift,
    BitwiseAnd,
    BitwiseXor,
    BitwiseOr,
    /// Postfix `[index]`.
    GetItem,
}

impl MathOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            MathOperator::Pow => "**",
            MathOperator::Pos => "+",
            MathOperator::Inv => "-",
            MathOperator::BitwiseNot => "~",
            MathOperator::Mul => "*",
            MathOperator::Div => "/",
            MathOperator::FloorDiv => "~/",
            MathOperator::Mod => "%",
            MathOperator::Add => "+",
            MathOperator::Sub => "-",
            MathOperator::Lshift => "<<",
            MathOperator::Rshift => ">>",
            MathOperator::Rzshift => ">>>",
            MathOperator::BitwiseAnd => "&",
            MathOperator::BitwiseXor => "^",
            MathOperator::BitwiseOr => "|",
            MathOperator::GetItem => "[]",
        }
    }
}

/// Boolean/comparison operators (the condition precedence table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    /// Truthiness of a single operand.
    Truth,
    Not,
    Equals,
    NotEquals,
    StrictEquals,
    StrictNotEquals,
    LessThan,
    GreaterThan,
    LessThanOrEquals,
    GreaterThanOrEquals,
    /// `=~`, regex match.
    Matches,
    And,
    Or,
}

impl ConditionOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            ConditionOperator::Truth => "",
            ConditionOperator::Not => "!",
            ConditionOperator::Equals => "==",
            ConditionOperator::NotEquals => "!=",
            ConditionOperator::StrictEquals => "===",
            ConditionOperator::StrictNotEquals => "!==",
            ConditionOperator::LessThan => "<",
            ConditionOperator::GreaterThan => ">",
            ConditionOperator::LessThanOrEquals => "<=",
            ConditionOperator::GreaterThanOrEquals => ">=",
            ConditionOperator::Matches => "=~",
            ConditionOperator::And => "&&",
            ConditionOperator::Or => "||",
        }
    }

    pub fn from_symbol(s: &str) -> Option<Self> {
        Some(match s {
            "==" => ConditionOperator::Equals,
            "!=" => ConditionOperator::NotEquals,
            "===" => ConditionOperator::StrictEquals,
            "!==" => ConditionOperator::StrictNotEquals,
            "<" => ConditionOperator::LessThan,
            ">" => ConditionOperator::GreaterThan,
            "<=" => ConditionOperator::LessThanOrEquals,
            ">=" => ConditionOperator::GreaterThanOrEquals,
            "=~" => ConditionOperator::Matches,
            _ => return None,
        })
    }
}

/// `=` and its compound forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOperator {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// `?=`: store the condition value.
    Condition,
}

impl AssignOperator {
    /// The math operator a compound assignment applies.
    pub fn math(self) -> Option<MathOperator> {
        match self {
            AssignOperator::Add => Some(MathOperator::Add),
            AssignOperator::Sub => Some(MathOperator::Sub),
            AssignOperator::Mul => Some(MathOperator::Mul),
            AssignOperator::Div => Some(MathOperator::Div),
            AssignOperator::Mod => Some(MathOperator::Mod),
            AssignOperator::Assign | AssignOperator::Condition => None,
        }
    }
}

// ── Parse errors ──────────────────────────────────────────────────────────────

/// Recoverable syntax problems, embedded in the tree as error nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsingError {
    /// A block or literal was still open at end of input.
    Eof,
    BracketMismatch,
    ContFlowArgMissing,
    InvalidConPart,
    InvalidAssignment,
    InvalidParameter,
    InvalidExpression,
}

impl ParsingError {
    /// The errno raised when the error node is evaluated.
    pub fn interpreting_error(self) -> InterpretingError {
        match self {
            ParsingError::Eof => InterpretingError::Eof,
            ParsingError::BracketMismatch => InterpretingError::BracketMismatch,
            ParsingError::ContFlowArgMissing => InterpretingError::ContFlowArgMissing,
            ParsingError::InvalidConPart => InterpretingError::InvalidConPart,
            ParsingError::InvalidAssignment => InterpretingError::InvalidAssignment,
            ParsingError::InvalidParameter | ParsingError::InvalidExpression => {
                InterpretingError::InvalidAstNode
            }
        }
    }
}

// ── Nodes ─────────────────────────────────────────────────────────────────────

/// Modifiers on an assignment target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VarModifiers {
    pub final_data: bool,
    pub static_data: bool,
}

/// A function literal: `(params):{RET} -> body`.
#[derive(Debug)]
pub struct FunctionDefinition {
    pub params: Vec<Parameter>,
    pub return_constraint: Option<TypeConstraint>,
    pub body: Rc<Node>,
}

#[derive(Debug, Clone)]
pub enum Node {
    /// Statement list, or adjacent expression pieces concatenated as text.
    List(Vec<Node>),
    ParsingError { error: ParsingError, line: usize, message: String },

    Assignment { lvalue: Box<Node>, rvalue: Box<Node>, operator: AssignOperator },
    /// Assignment target with optional modifiers, constraint and index.
    VariableName {
        name: String,
        modifiers: VarModifiers,
        constraint: Option<TypeConstraint>,
        index: Option<Box<Node>>,
    },
    /// A raw variable reference, resolved at evaluation time.
    UnprocessedVariableName(String),
    EscapeSequence(char),

    ArgumentSeparator(String),
    /// `&name...`: spread a collection into separate arguments.
    ArgumentUnpack(String),
    FunctionCall { name: String, args: Vec<Node> },
    /// Call the value of `callee` (chained call).
    FunctionCallPreviousNodeValue { callee: Box<Node>, args: Vec<Node> },
    FunctionDefinition(Rc<FunctionDefinition>),

    IfStatement(Vec<Node>),
    IfStatementPartIf { condition: Box<Node>, body: Box<Node> },
    IfStatementPartElse { body: Box<Node> },

    LoopStatement(Vec<Node>),
    LoopStatementPartLoop { body: Box<Node> },
    LoopStatementPartWhile { condition: Box<Node>, body: Box<Node> },
    LoopStatementPartUntil { condition: Box<Node>, body: Box<Node> },
    LoopStatementPartRepeat { var_pointer: Box<Node>, count: Box<Node>, body: Box<Node> },
    LoopStatementPartForEach { var_pointer: Box<Node>, collection: Box<Node>, body: Box<Node> },
    LoopStatementPartElse { body: Box<Node> },
    LoopStatementContinueBreak { number: Option<Box<Node>>, is_continue: bool },

    TryStatement(Vec<Node>),
    TryStatementPartTry { body: Box<Node> },
    TryStatementPartSoftTry { body: Box<Node> },
    TryStatementPartNonTry { body: Box<Node> },
    TryStatementPartCatch { errors: Option<Vec<Node>>, body: Box<Node> },
    TryStatementPartElse { body: Box<Node> },
    TryStatementPartFinally { body: Box<Node> },

    Math { operator: MathOperator, left: Box<Node>, right: Option<Box<Node>> },
    Condition { operator: ConditionOperator, left: Box<Node>, right: Option<Box<Node>> },

    Return(Option<Box<Node>>),
    Throw { error: Box<Node>, message: Option<Box<Node>> },

    IntValue(i32),
    LongValue(i64),
    FloatValue(f32),
    DoubleValue(f64),
    CharValue(char),
    TextValue(String),
    NullValue,
    VoidValue,
    ArrayValue(Vec<Node>),
}

/// Fieldless mirror of [`Node`]'s variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    List,
    ParsingError,
    Assignment,
    VariableName,
    UnprocessedVariableName,
    EscapeSequence,
    ArgumentSeparator,
    ArgumentUnpack,
    FunctionCall,
    FunctionCallPreviousNodeValue,
    FunctionDefinition,
    IfStatement,
    IfStatementPartIf,
    IfStatementPartElse,
    LoopStatement,
    LoopStatementPartLoop,
    LoopStatementPartWhile,
    LoopStatementPartUntil,
    LoopStatementPartRepeat,
    LoopStatementPartForEach,
    LoopStatementPartElse,
    LoopStatementContinueBreak,
    TryStatement,
    TryStatementPartTry,
    TryStatementPartSoftTry,
    TryStatementPartNonTry,
    TryStatementPartCatch,
    TryStatementPartElse,
    TryStatementPartFinally,
    Math,
    Condition,
    Return,
    Throw,
    IntValue,
    LongValue,
    FloatValue,
    DoubleValue,
    CharValue,
    TextValue,
    NullValue,
    VoidValue,
    ArrayValue,
}

impl Node {
    pub fn text(s: impl Into<String>) -> Node {
        Node::TextValue(s.into())
    }

    pub fn parsing_error(error: ParsingError, line: usize, message: impl Into<String>) -> Node {
        Node::ParsingError { error, line, message: message.into() }
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            Node::List(_) => NodeType::List,
            Node::ParsingError { .. } => NodeType::ParsingError,
            Node::Assignment { .. } => NodeType::Assignment,
            Node::VariableName { .. } => NodeType::VariableName,
            Node::UnprocessedVariableName(_) => NodeType::UnprocessedVariableName,
            Node::EscapeSequence(_) => NodeType::EscapeSequence,
            Node::ArgumentSeparator(_) => NodeType::ArgumentSeparator,
            Node::ArgumentUnpack(_) => NodeType::ArgumentUnpack,
            Node::FunctionCall { .. } => NodeType::FunctionCall,
            Node::FunctionCallPreviousNodeValue { .. } => NodeType::FunctionCallPreviousNodeValue,
            Node::FunctionDefinition(_) => NodeType::FunctionDefinition,
            Node::IfStatement(_) => NodeType::IfStatement,
            Node::IfStatementPartIf { .. } => NodeType::IfStatementPartIf,
            Node::IfStatementPartElse { .. } => NodeType::IfStatementPartElse,
            Node::LoopStatement(_) => NodeType::LoopStatement,
            Node::LoopStatementPartLoop { .. } => NodeType::LoopStatementPartLoop,
            Node::LoopStatementPartWhile { .. } => NodeType::LoopStatementPartWhile,
            Node::LoopStatementPartUntil { .. } => NodeType::LoopStatementPartUntil,
            Node::LoopStatementPartRepeat { .. } => NodeType::LoopStatementPartRepeat,
            Node::LoopStatementPartForEach { .. } => NodeType::LoopStatementPartForEach,
            Node::LoopStatementPartElse { .. } => NodeType::LoopStatementPartElse,
            Node::LoopStatementContinueBreak { .. } => NodeType::LoopStatementContinueBreak,
            Node::TryStatement(_) => NodeType::TryStatement,
            Node::TryStatementPartTry { .. } => NodeType::TryStatementPartTry,
            Node::TryStatementPartSoftTry { .. } => NodeType::TryStatementPartSoftTry,
            Node::TryStatementPartNonTry { .. } => NodeType::TryStatementPartNonTry,
            Node::TryStatementPartCatch { .. } => NodeType::TryStatementPartCatch,
            Node::TryStatementPartElse { .. } => NodeType::TryStatementPartElse,
            Node::TryStatementPartFinally { .. } => NodeType::TryStatementPartFinally,
            Node::Math { .. } => NodeType::Math,
            Node::Condition { .. } => NodeType::Condition,
            Node::Return(_) => NodeType::Return,
            Node::Throw { .. } => NodeType::Throw,
            Node::IntValue(_) => NodeType::IntValue,
            Node::LongValue(_) => NodeType::LongValue,
            Node::FloatValue(_) => NodeType::FloatValue,
            Node::DoubleValue(_) => NodeType::DoubleValue,
            Node::CharValue(_) => NodeType::CharValue,
            Node::TextValue(_) => NodeType::TextValue,
            Node::NullValue => NodeType::NullValue,
            Node::VoidValue => NodeType::VoidValue,
            Node::ArrayValue(_) => NodeType::ArrayValue,
        }
    }

    /// Ordered child nodes.
    pub fn children(&self) -> Vec<&Node> {
        match self {
            Node::List(nodes)
            | Node::IfStatement(nodes)
            | Node::LoopStatement(nodes)
            | Node::TryStatement(nodes)
            | Node::ArrayValue(nodes)
            | Node::FunctionCall { args: nodes, .. } => nodes.iter().collect(),
            Node::Assignment { lvalue, rvalue, .. } => vec![&**lvalue, &**rvalue],
            Node::VariableName { index, .. } => index.iter().map(|n| &**n).collect(),
            Node::FunctionCallPreviousNodeValue { callee, args } => {
                std::iter::once(&**callee).chain(args.iter()).collect()
            }
            Node::FunctionDefinition(def) => vec![&*def.body],
            Node::IfStatementPartIf { condition, body }
            | Node::LoopStatementPartWhile { condition, body }
            | Node::LoopStatementPartUntil { condition, body } => vec![&**condition, &**body],
            Node::IfStatementPartElse { body }
            | Node::LoopStatementPartLoop { body }
            | Node::LoopStatementPartElse { body }
            | Node::TryStatementPartTry { body }
            | Node::TryStatementPartSoftTry { body }
            | Node::TryStatementPartNonTry { body }
            | Node::TryStatementPartElse { body }
            | Node::TryStatementPartFinally { body } => vec![&**body],
            Node::LoopStatementPartRepeat { var_pointer, count: second, body }
            | Node::LoopStatementPartForEach { var_pointer, collection: second, body } => {
                vec![&**var_pointer, &**second, &**body]
            }
            Node::TryStatementPartCatch { errors, body } => {
                let mut out: Vec<&Node> = errors.iter().flatten().collect();
                out.push(&**body);
                out
            }
            Node::LoopStatementContinueBreak { number, .. } => number.iter().map(|n| &**n).collect(),
            Node::Math { left, right, .. } | Node::Condition { left, right, .. } => {
                std::iter::once(&**left).chain(right.iter().map(|n| &**n)).collect()
            }
            Node::Return(value) => value.iter().map(|n| &**n).collect(),
            Node::Throw { error, message } => {
                std::iter::once(&**error).chain(message.iter().map(|n| &**n)).collect()
            }
            Node::ParsingError { .. }
            | Node::UnprocessedVariableName(_)
            | Node::EscapeSequence(_)
            | Node::ArgumentSeparator(_)
            | Node::ArgumentUnpack(_)
            | Node::IntValue(_)
            | Node::LongValue(_)
            | Node::FloatValue(_)
            | Node::DoubleValue(_)
            | Node::CharValue(_)
            | Node::TextValue(_)
            | Node::NullValue
            | Node::VoidValue => Vec::new(),
        }
    }

    /// Depth-first search for the first parsing-error node.
    pub fn find_parsing_error(&self) -> Option<&Node> {
        if matches!(self, Node::ParsingError { .. }) {
            return Some(self);
        }
        self.children().into_iter().find_map(Node::find_parsing_error)
    }
}

/// Compact single-line rendering, for debug logging and tests.
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::TextValue(s) => write!(f, "{s:?}"),
            Node::IntValue(n) => write!(f, "{n}"),
            Node::LongValue(n) => write!(f, "{n}L"),
            Node::FloatValue(x) => write!(f, "{x}f"),
            Node::DoubleValue(x) => write!(f, "{x}"),
            Node::CharValue(c) => write!(f, "{c:?}"),
            Node::NullValue => f.write_str("null"),
            Node::VoidValue => f.write_str("void"),
            Node::UnprocessedVariableName(name) => f.write_str(name),
            Node::FunctionCall { name, args } => {
                write!(f, "{name}(")?;
                for a in args {
                    write!(f, "{a}")?;
                }
                f.write_str(")")
            }
            Node::ArgumentSeparator(_) => f.write_str(", "),
            Node::Math { operator, left, right: Some(right) } => {
                write!(f, "({left} {} {right})", operator.symbol())
            }
            Node::Math { operator, left, right: None } => write!(f, "({}{left})", operator.symbol()),
            Node::Condition { operator, left, right: Some(right) } => {
                write!(f, "({left} {} {right})", operator.symbol())
            }
            Node::Condition { operator, left, right: None } => {
                write!(f, "({}{left})", operator.symbol())
            }
            Node::List(nodes) => {
                f.write_str("[")?;
                for (i, n) in nodes.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{n}")?;
                }
                f.write_str("]")
            }
            other => write!(f, "<{:?}>", other.node_type()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_are_ordered() {
        let n = Node::Math {
            operator: MathOperator::Add,
            left: Box::new(Node::IntValue(1)),
            right: Some(Box::new(Node::IntValue(2))),
        };
        let kids: Vec<NodeType> = n.children().iter().map(|c| c.node_type()).collect();
        assert_eq!(kids, vec![NodeType::IntValue, NodeType::IntValue]);
        assert_eq!(n.to_string(), "(1 + 2)");
    }

    #[test]
    fn finds_nested_parsing_error() {
        let tree = Node::List(vec![
            Node::IntValue(1),
            Node::IfStatement(vec![Node::IfStatementPartElse {
                body: Box::new(Node::List(vec![Node::parsing_error(ParsingError::Eof, 3, "eof")])),
            }]),
        ]);
        let err = tree.find_parsing_error().unwrap();
        assert!(matches!(err, Node::ParsingError { error: ParsingError::Eof, line: 3, .. }));
    }

    #[test]
    fn parsing_errors_map_to_errno() {
        assert_eq!(ParsingError::Eof.interpreting_error(), InterpretingError::Eof);
        assert_eq!(
            ParsingError::BracketMismatch.interpreting_error(),
            InterpretingError::BracketMismatch
        );
    }
}
