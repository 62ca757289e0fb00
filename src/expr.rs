//! Criterion expressions.
//!
//! A criterion is a prefix S-expression such as
//! `(max (/ (- nir red) (+ nir red)))`. Arithmetic works elementwise over
//! `(image, row, col)` band arrays; the outermost function is a selection
//! that collapses the image axis into a [`WinnerMap`].
//!
//! Function names are looked up in a [`FunctionTable`] handed to
//! [`Criterion::parse`], so callers can restrict or alias the vocabulary
//! without touching shared state.

use crate::error::{CompositeError, Result};
use crate::selection::{Selector, WinnerMap};
use ndarray::{Array3, ArrayView3, ErrorKind as ShapeErrorKind, ShapeError, Zip};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
        }
    }

    fn min_args(self) -> usize {
        match self {
            ArithOp::Div => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Arithmetic(ArithOp),
    Selection(Selector),
}

/// Name → behaviour mapping consulted while parsing.
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    functions: HashMap<String, Function>,
}

impl FunctionTable {
    /// An empty table; nothing parses until functions are registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// `+ - * /` plus the `max`, `min` and `median` selections.
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.insert("+", Function::Arithmetic(ArithOp::Add));
        table.insert("-", Function::Arithmetic(ArithOp::Sub));
        table.insert("*", Function::Arithmetic(ArithOp::Mul));
        table.insert("/", Function::Arithmetic(ArithOp::Div));
        for sel in [Selector::Max, Selector::Min, Selector::Median] {
            table.insert(sel.name(), Function::Selection(sel));
        }
        table
    }

    pub fn insert(&mut self, name: impl Into<String>, function: Function) {
        self.functions.insert(name.into(), function);
    }

    pub fn get(&self, name: &str) -> Option<Function> {
        self.functions.get(name).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(f64),
    Band(String),
    Apply { op: ArithOp, args: Vec<Node> },
}

/// A parsed criterion, validated to end in exactly one selection.
#[derive(Debug, Clone)]
pub struct Criterion {
    source: String,
    selector: Selector,
    body: Node,
    identifiers: Vec<String>,
}

impl Criterion {
    pub fn parse(source: &str, table: &FunctionTable) -> Result<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            table,
            end: source.len(),
        };
        let (selector, body) = parser.parse_criterion()?;
        if let Some(tok) = parser.peek() {
            return Err(CompositeError::Parse {
                pos: tok.pos,
                message: "unexpected input after expression".to_string(),
            });
        }

        let mut idents = BTreeSet::new();
        collect_identifiers(&body, &mut idents);

        Ok(Self {
            source: source.to_string(),
            selector,
            body,
            identifiers: idents.into_iter().collect(),
        })
    }

    pub fn selector(&self) -> Selector {
        self.selector
    }

    /// Free band names, sorted and deduplicated.
    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    /// Evaluate against per-band `(image, row, col)` slices of one block.
    ///
    /// NaN marks masked values and propagates through arithmetic.
    pub fn evaluate(
        &self,
        shape: (usize, usize, usize),
        bands: &HashMap<String, ArrayView3<'_, f64>>,
    ) -> Result<WinnerMap> {
        let values = match eval_node(&self.body, shape, bands)? {
            Value::Array(a) => a,
            Value::Scalar(v) => Array3::from_elem(shape, v),
        };
        Ok(self.selector.select(values.view()))
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn collect_identifiers(node: &Node, out: &mut BTreeSet<String>) {
    match node {
        Node::Number(_) => {}
        Node::Band(name) => {
            out.insert(name.clone());
        }
        Node::Apply { args, .. } => args.iter().for_each(|a| collect_identifiers(a, out)),
    }
}

enum Value {
    Scalar(f64),
    Array(Array3<f64>),
}

fn eval_node(
    node: &Node,
    shape: (usize, usize, usize),
    bands: &HashMap<String, ArrayView3<'_, f64>>,
) -> Result<Value> {
    match node {
        Node::Number(v) => Ok(Value::Scalar(*v)),
        Node::Band(name) => {
            let view = bands
                .get(name)
                .ok_or_else(|| CompositeError::UnknownBand(name.clone()))?;
            if view.dim() != shape {
                return Err(ShapeError::from_kind(ShapeErrorKind::IncompatibleShape).into());
            }
            Ok(Value::Array(view.to_owned()))
        }
        Node::Apply { op, args } => {
            let mut values = args
                .iter()
                .map(|a| eval_node(a, shape, bands))
                .collect::<Result<Vec<_>>>()?
                .into_iter();
            let first = values.next().ok_or_else(|| CompositeError::Arity {
                name: format!("{:?}", op),
                expected: "at least 1",
                got: 0,
            })?;

            if args.len() == 1 {
                return Ok(match op {
                    ArithOp::Sub => combine(Value::Scalar(0.0), first, ArithOp::Sub),
                    _ => first,
                });
            }
            Ok(values.fold(first, |acc, v| combine(acc, v, *op)))
        }
    }
}

fn combine(lhs: Value, rhs: Value, op: ArithOp) -> Value {
    match (lhs, rhs) {
        (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(op.apply(a, b)),
        (Value::Array(mut a), Value::Scalar(b)) => {
            a.par_mapv_inplace(|x| op.apply(x, b));
            Value::Array(a)
        }
        (Value::Scalar(a), Value::Array(mut b)) => {
            b.par_mapv_inplace(|x| op.apply(a, x));
            Value::Array(b)
        }
        (Value::Array(mut a), Value::Array(b)) => {
            Zip::from(&mut a)
                .and(&b)
                .par_for_each(|x, &y| *x = op.apply(*x, y));
            Value::Array(a)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Open,
    Close,
    Number(f64),
    Symbol(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    pos: usize,
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(pos, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        if ch == '(' || ch == ')' {
            chars.next();
            let kind = if ch == '(' { TokenKind::Open } else { TokenKind::Close };
            tokens.push(Token { kind, pos });
            continue;
        }

        let mut end = pos;
        while let Some(&(i, c)) = chars.peek() {
            if c.is_whitespace() || c == '(' || c == ')' {
                break;
            }
            end = i + c.len_utf8();
            chars.next();
        }
        let word = &source[pos..end];
        tokens.push(Token {
            kind: classify_word(word, pos)?,
            pos,
        });
    }

    Ok(tokens)
}

fn classify_word(word: &str, pos: usize) -> Result<TokenKind> {
    let mut chars = word.chars();
    let first = chars.next().unwrap_or(' ');
    let second = chars.next();

    let numeric_start = first.is_ascii_digit()
        || first == '.'
        || ((first == '-' || first == '+')
            && second.map_or(false, |c| c.is_ascii_digit() || c == '.'));

    if numeric_start {
        return word
            .parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| CompositeError::Parse {
                pos,
                message: format!("invalid number '{}'", word),
            });
    }
    Ok(TokenKind::Symbol(word.to_string()))
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    table: &'a FunctionTable,
    end: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<&'a Token> {
        let tok = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| CompositeError::Parse {
                pos: self.end,
                message: "unexpected end of expression".to_string(),
            })?;
        self.pos += 1;
        Ok(tok)
    }

    /// `( selector arg )` at the top level.
    fn parse_criterion(&mut self) -> Result<(Selector, Node)> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Open,
                ..
            }) => {}
            Some(_) => return Err(CompositeError::NotASelection),
            None => {
                return Err(CompositeError::Parse {
                    pos: 0,
                    message: "empty expression".to_string(),
                })
            }
        }
        self.next()?;

        let (name, pos) = self.head()?;
        let selector = match self.lookup(&name, pos)? {
            Function::Selection(sel) => sel,
            Function::Arithmetic(_) => return Err(CompositeError::NotASelection),
        };

        let args = self.args()?;
        if args.len() != 1 {
            return Err(CompositeError::Arity {
                name,
                expected: "exactly 1",
                got: args.len(),
            });
        }
        let body = args.into_iter().next().ok_or(CompositeError::NotASelection)?;
        Ok((selector, body))
    }

    fn parse_node(&mut self) -> Result<Node> {
        let tok = self.next()?;
        match &tok.kind {
            TokenKind::Number(v) => Ok(Node::Number(*v)),
            TokenKind::Symbol(word) if is_identifier(word) => Ok(Node::Band(word.clone())),
            TokenKind::Symbol(word) => Err(CompositeError::Parse {
                pos: tok.pos,
                message: format!("unexpected symbol '{}'", word),
            }),
            TokenKind::Close => Err(CompositeError::Parse {
                pos: tok.pos,
                message: "unexpected ')'".to_string(),
            }),
            TokenKind::Open => {
                let (name, pos) = self.head()?;
                let op = match self.lookup(&name, pos)? {
                    Function::Arithmetic(op) => op,
                    Function::Selection(_) => return Err(CompositeError::NestedSelection(name)),
                };
                let args = self.args()?;
                if args.len() < op.min_args() {
                    return Err(CompositeError::Arity {
                        name,
                        expected: if op.min_args() == 2 { "at least 2" } else { "at least 1" },
                        got: args.len(),
                    });
                }
                Ok(Node::Apply { op, args })
            }
        }
    }

    fn head(&mut self) -> Result<(String, usize)> {
        let tok = self.next()?;
        match &tok.kind {
            TokenKind::Symbol(word) => Ok((word.clone(), tok.pos)),
            _ => Err(CompositeError::Parse {
                pos: tok.pos,
                message: "expected a function name".to_string(),
            }),
        }
    }

    fn lookup(&self, name: &str, pos: usize) -> Result<Function> {
        self.table
            .get(name)
            .ok_or_else(|| CompositeError::UnsupportedFunction {
                name: name.to_string(),
                pos,
            })
    }

    /// Arguments up to and including the closing paren.
    fn args(&mut self) -> Result<Vec<Node>> {
        let mut args = Vec::new();
        loop {
            match self.peek() {
                Some(Token {
                    kind: TokenKind::Close,
                    ..
                }) => {
                    self.pos += 1;
                    return Ok(args);
                }
                Some(_) => args.push(self.parse_node()?),
                None => {
                    return Err(CompositeError::Parse {
                        pos: self.end,
                        message: "missing ')'".to_string(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    const NDVI: &str = "(max (/ (- nir red) (+ nir red)))";

    fn parse(src: &str) -> Result<Criterion> {
        Criterion::parse(src, &FunctionTable::standard())
    }

    fn column(values: &[f64]) -> Array3<f64> {
        Array3::from_shape_vec((values.len(), 1, 1), values.to_vec()).unwrap()
    }

    #[test]
    fn test_parse_ndvi() {
        let crit = parse(NDVI).unwrap();
        assert_eq!(crit.selector(), Selector::Max);
        assert_eq!(crit.identifiers(), &["nir".to_string(), "red".to_string()]);
        assert_eq!(crit.to_string(), NDVI);
    }

    #[test]
    fn test_identifiers_are_free_names_only() {
        // "red" is a substring of "redge" but not referenced on its own
        let crit = parse("(min (* 2.5 redge))").unwrap();
        assert_eq!(crit.identifiers(), &["redge".to_string()]);
    }

    #[test]
    fn test_outermost_must_be_selection() {
        assert!(matches!(parse("(+ nir red)"), Err(CompositeError::NotASelection)));
        assert!(matches!(parse("nir"), Err(CompositeError::NotASelection)));
        assert!(matches!(parse("42"), Err(CompositeError::NotASelection)));
    }

    #[test]
    fn test_nested_selection_rejected() {
        let err = parse("(max (+ (min blue) nir))").unwrap_err();
        assert!(matches!(err, CompositeError::NestedSelection(ref n) if n == "min"));
    }

    #[test]
    fn test_unsupported_operator() {
        let err = parse("(max (** nir 2))").unwrap_err();
        assert!(matches!(err, CompositeError::UnsupportedFunction { ref name, pos: 6 } if name == "**"));
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_arity_checks() {
        assert!(matches!(parse("(max nir red)"), Err(CompositeError::Arity { got: 2, .. })));
        assert!(matches!(parse("(max)"), Err(CompositeError::Arity { got: 0, .. })));
        assert!(matches!(parse("(max (/ nir))"), Err(CompositeError::Arity { got: 1, .. })));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(parse(""), Err(CompositeError::Parse { .. })));
        assert!(matches!(parse("(max nir"), Err(CompositeError::Parse { .. })));
        assert!(matches!(parse("(max nir))"), Err(CompositeError::Parse { .. })));
        assert!(matches!(parse("(max (+ nir 1.2.3))"), Err(CompositeError::Parse { .. })));
        assert!(matches!(parse("(max (+ nir #))"), Err(CompositeError::Parse { .. })));
    }

    #[test]
    fn test_function_table_is_local() {
        assert!(matches!(
            Criterion::parse("(max nir)", &FunctionTable::new()),
            Err(CompositeError::UnsupportedFunction { .. })
        ));

        let mut table = FunctionTable::standard();
        table.insert("argmax", Function::Selection(Selector::Max));
        let crit = Criterion::parse("(argmax nir)", &table).unwrap();
        assert_eq!(crit.selector(), Selector::Max);

        // The standard table is unaffected
        assert!(parse("(argmax nir)").is_err());
    }

    #[test]
    fn test_evaluate_ndvi() {
        let crit = parse(NDVI).unwrap();
        let red = column(&[10.0, 10.0]);
        let nir = column(&[40.0, 100.0]);
        let bands = HashMap::from([
            ("red".to_string(), red.view()),
            ("nir".to_string(), nir.view()),
        ]);
        let winners = crit.evaluate((2, 1, 1), &bands).unwrap();
        assert_eq!(winners[[0, 0]], Some(1));
    }

    #[test]
    fn test_evaluate_unary_minus_and_literals() {
        // (min (- blue)) is the same as (max blue)
        let crit = parse("(min (- blue))").unwrap();
        let blue = column(&[5.0, 50.0, 20.0]);
        let bands = HashMap::from([("blue".to_string(), blue.view())]);
        assert_eq!(crit.evaluate((3, 1, 1), &bands).unwrap()[[0, 0]], Some(1));

        let crit = parse("(min (+ -100 (* 2 blue) 1e1))").unwrap();
        assert_eq!(crit.evaluate((3, 1, 1), &bands).unwrap()[[0, 0]], Some(0));
    }

    #[test]
    fn test_evaluate_propagates_nan() {
        let crit = parse("(max (/ nir blue))").unwrap();
        let nir = column(&[f64::NAN, 10.0, 30.0]);
        let blue = column(&[1.0, 1.0, f64::NAN]);
        let bands = HashMap::from([
            ("nir".to_string(), nir.view()),
            ("blue".to_string(), blue.view()),
        ]);
        assert_eq!(crit.evaluate((3, 1, 1), &bands).unwrap()[[0, 0]], Some(1));
    }

    #[test]
    fn test_evaluate_missing_band() {
        let crit = parse("(max nir)").unwrap();
        let bands = HashMap::new();
        assert!(matches!(
            crit.evaluate((1, 1, 1), &bands),
            Err(CompositeError::UnknownBand(_))
        ));
    }

    #[test]
    fn test_constant_expression_picks_first_image() {
        let crit = parse("(max 3)").unwrap();
        let winners = crit.evaluate((4, 2, 2), &HashMap::new()).unwrap();
        assert!(winners.iter().all(|w| *w == Some(0)));
    }
}
