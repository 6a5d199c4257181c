//! Textual event traces
//!
//! A trace is a sequence of instrumentation events, one per line:
//!
//! ```text
//! # comment
//! branch  <pc> <0|1> <expr>
//! addr    <value> <expr>
//! value   <value> <expr>
//! solveall <value> <expr>
//! ```
//!
//! Expressions use the s-expression syntax produced by
//! [`ExprArena::render`]: `(read 3)`, `(const 0x61 8)`, `(add a b)`,
//! `(extract 7 0 a)`, `(zext 32 a)`, `(eq a b)`, `(lnot c)`, `true`...
//! Numbers are decimal or `0x`-prefixed hex. Read indices above
//! [`MAX_INDEX`] are rejected.

use std::fmt;
use std::path::Path;

use crate::dependency::MAX_INDEX;
use crate::expr::{ExprArena, ExprId, Kind, MAX_WIDTH};
use crate::oracle::BranchOracle;
use crate::session::{BranchOutcome, SolverSession};

/// Parse error with location information
#[derive(Debug, Clone)]
pub struct ParseError {
    pub line_number: usize,
    pub message: String,
    pub line_content: String,
}

impl ParseError {
    pub fn new(
        line_number: usize,
        message: impl Into<String>,
        line_content: impl Into<String>,
    ) -> Self {
        Self {
            line_number,
            message: message.into(),
            line_content: line_content.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}: {}\n  | {}",
            self.line_number, self.message, self.line_content
        )
    }
}

impl std::error::Error for ParseError {}

/// One instrumentation callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Branch { condition: ExprId, taken: bool, pc: u64 },
    Address { expr: ExprId, value: u64 },
    Value { expr: ExprId, value: u64 },
    SolveAll { expr: ExprId, value: u64 },
}

/// Parse a number (hex with 0x prefix or decimal)
pub fn parse_number(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty number".to_string());
    }
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| format!("invalid hex number '{}': {}", s, e))
    } else {
        s.parse::<u64>()
            .map_err(|e| format!("invalid number '{}': {}", s, e))
    }
}

fn parse_taken(s: &str) -> Result<bool, String> {
    match s {
        "1" | "true" | "taken" => Ok(true),
        "0" | "false" | "not-taken" => Ok(false),
        _ => Err(format!("invalid branch outcome '{}'", s)),
    }
}

fn parse_bit(s: &str) -> Result<u32, String> {
    let bit = parse_number(s)?;
    u32::try_from(bit).map_err(|_| format!("bit position {} out of range", bit))
}

fn parse_index(s: &str) -> Result<usize, String> {
    let index = parse_number(s)?;
    match usize::try_from(index) {
        Ok(index) if index <= MAX_INDEX => Ok(index),
        _ => Err(format!("read index {} above limit {}", index, MAX_INDEX)),
    }
}

fn parse_width(s: &str) -> Result<u32, String> {
    let width = parse_number(s)?;
    if width == 0 || width > MAX_WIDTH as u64 {
        return Err(format!("width {} out of range 1..={}", width, MAX_WIDTH));
    }
    Ok(width as u32)
}

// --- S-expressions ---

#[derive(Debug)]
enum Sexp<'a> {
    Atom(&'a str),
    List(Vec<Sexp<'a>>),
}

fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        if c == '(' || c == ')' || c.is_whitespace() {
            if let Some(s) = start.take() {
                tokens.push(&text[s..i]);
            }
            if !c.is_whitespace() {
                tokens.push(&text[i..i + 1]);
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        tokens.push(&text[s..]);
    }
    tokens
}

fn read_sexp<'a>(tokens: &[&'a str], pos: &mut usize) -> Result<Sexp<'a>, String> {
    let Some(&token) = tokens.get(*pos) else {
        return Err("unexpected end of expression".to_string());
    };
    *pos += 1;
    match token {
        ")" => Err("unexpected ')'".to_string()),
        "(" => {
            let mut items = Vec::new();
            loop {
                match tokens.get(*pos) {
                    None => return Err("missing ')'".to_string()),
                    Some(&")") => {
                        *pos += 1;
                        return Ok(Sexp::List(items));
                    }
                    Some(_) => items.push(read_sexp(tokens, pos)?),
                }
            }
        }
        atom => Ok(Sexp::Atom(atom)),
    }
}

fn atom<'a>(sexp: &Sexp<'a>) -> Result<&'a str, String> {
    match sexp {
        Sexp::Atom(a) => Ok(*a),
        Sexp::List(_) => Err("expected a number, found a list".to_string()),
    }
}

fn expect_args(op: &str, args: &[Sexp<'_>], count: usize) -> Result<(), String> {
    if args.len() != count {
        return Err(format!(
            "{} expects {} operands, found {}",
            op,
            count,
            args.len()
        ));
    }
    Ok(())
}

fn build(arena: &mut ExprArena, sexp: &Sexp<'_>) -> Result<ExprId, String> {
    let items = match sexp {
        Sexp::Atom("true") => return Ok(arena.bool_const(true)),
        Sexp::Atom("false") => return Ok(arena.bool_const(false)),
        Sexp::Atom(a) => return Err(format!("unexpected atom '{}'", a)),
        Sexp::List(items) => items,
    };
    let Some((head, args)) = items.split_first() else {
        return Err("empty expression".to_string());
    };
    let op = atom(head)?;

    match op {
        "read" => {
            expect_args(op, args, 1)?;
            let index = parse_index(atom(&args[0])?)?;
            Ok(arena.read(index))
        }
        "const" => {
            expect_args(op, args, 2)?;
            let value = parse_number(atom(&args[0])?)?;
            let width = parse_width(atom(&args[1])?)?;
            Ok(arena.constant(value, width))
        }
        "extract" => {
            expect_args(op, args, 3)?;
            let high = parse_bit(atom(&args[0])?)?;
            let low = parse_bit(atom(&args[1])?)?;
            let operand = build(arena, &args[2])?;
            if low > high || high >= arena.width(operand) {
                return Err(format!(
                    "extract {}..{} out of range for width {}",
                    high,
                    low,
                    arena.width(operand)
                ));
            }
            Ok(arena.extract(high, low, operand))
        }
        "zext" | "sext" => {
            expect_args(op, args, 2)?;
            let width = parse_width(atom(&args[0])?)?;
            let operand = build(arena, &args[1])?;
            if width < arena.width(operand) {
                return Err(format!(
                    "{} to {} bits narrows a {}-bit operand",
                    op,
                    width,
                    arena.width(operand)
                ));
            }
            Ok(if op == "zext" {
                arena.zext(width, operand)
            } else {
                arena.sext(width, operand)
            })
        }
        _ => {
            let kind =
                Kind::from_mnemonic(op).ok_or_else(|| format!("unknown operator '{}'", op))?;
            build_operator(arena, kind, args)
        }
    }
}

fn build_operator(arena: &mut ExprArena, kind: Kind, args: &[Sexp<'_>]) -> Result<ExprId, String> {
    let op = kind.mnemonic();
    match kind {
        Kind::Not | Kind::Neg | Kind::LNot => {
            expect_args(op, args, 1)?;
            let operand = build(arena, &args[0])?;
            if kind == Kind::LNot {
                expect_bool(arena, op, operand)?;
                Ok(arena.lnot(operand))
            } else {
                Ok(arena.unary(kind, operand))
            }
        }
        _ => {
            expect_args(op, args, 2)?;
            let lhs = build(arena, &args[0])?;
            let rhs = build(arena, &args[1])?;
            let (lw, rw) = (arena.width(lhs), arena.width(rhs));

            if kind.is_logical() {
                expect_bool(arena, op, lhs)?;
                expect_bool(arena, op, rhs)?;
                return Ok(if kind == Kind::LAnd {
                    arena.land(lhs, rhs)
                } else {
                    arena.lor(lhs, rhs)
                });
            }
            if kind == Kind::Concat {
                if lw + rw > MAX_WIDTH {
                    return Err(format!("concat of {} and {} bits is too wide", lw, rw));
                }
                return Ok(arena.binary(kind, lhs, rhs));
            }
            if lw != rw {
                return Err(format!("{} operand widths differ: {} vs {}", op, lw, rw));
            }
            Ok(if kind.is_relational() {
                arena.relational(kind, lhs, rhs)
            } else {
                arena.binary(kind, lhs, rhs)
            })
        }
    }
}

fn expect_bool(arena: &ExprArena, op: &str, id: ExprId) -> Result<(), String> {
    if arena.kind(id).is_bool() {
        Ok(())
    } else {
        Err(format!("{} expects a boolean operand", op))
    }
}

/// Parse one s-expression into `arena`
pub fn parse_expr(text: &str, arena: &mut ExprArena) -> Result<ExprId, String> {
    let tokens = tokenize(text);
    let mut pos = 0;
    let sexp = read_sexp(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(format!("trailing input after expression: '{}'", tokens[pos]));
    }
    build(arena, &sexp)
}

// --- Events ---

/// Strip a trailing `#` comment
fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

/// Split off the first whitespace-delimited word
fn next_word(s: &str) -> Result<(&str, &str), String> {
    let s = s.trim_start();
    if s.is_empty() {
        return Err("missing field".to_string());
    }
    Ok(match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], &s[pos..]),
        None => (s, ""),
    })
}

/// Parse a single trace line; `None` for blank and comment lines
pub fn parse_line(line: &str, arena: &mut ExprArena) -> Result<Option<Event>, String> {
    let trimmed = strip_comment(line).trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let (keyword, rest) = next_word(trimmed)?;
    let keyword = keyword.to_lowercase();
    let event = match keyword.as_str() {
        "branch" => {
            let (pc, rest) = next_word(rest)?;
            let (taken, rest) = next_word(rest)?;
            let pc = parse_number(pc)?;
            let taken = parse_taken(taken)?;
            let condition = parse_expr(rest, arena)?;
            expect_bool(arena, "branch", condition)?;
            Event::Branch {
                condition,
                taken,
                pc,
            }
        }
        "addr" | "value" | "solveall" => {
            let (value, rest) = next_word(rest)?;
            let value = parse_number(value)?;
            let expr = parse_expr(rest, arena)?;
            match keyword.as_str() {
                "addr" => Event::Address { expr, value },
                "value" => Event::Value { expr, value },
                _ => Event::SolveAll { expr, value },
            }
        }
        _ => return Err(format!("unknown event: {}", keyword)),
    };
    Ok(Some(event))
}

/// Parse a trace file into events built in `arena`
pub fn parse_trace_file(path: &Path, arena: &mut ExprArena) -> Result<Vec<Event>, ParseError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ParseError::new(
            0,
            format!("failed to read file: {}", e),
            path.display().to_string(),
        )
    })?;
    parse_trace_string(&content, arena)
}

/// Parse trace text into events built in `arena`
pub fn parse_trace_string(content: &str, arena: &mut ExprArena) -> Result<Vec<Event>, ParseError> {
    let mut events = Vec::new();
    for (line_num, line) in content.lines().enumerate() {
        match parse_line(line, arena) {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {}
            Err(msg) => return Err(ParseError::new(line_num + 1, msg, line)),
        }
    }
    Ok(events)
}

/// Counters from one replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: usize,
    pub errors: usize,
    pub negated: usize,
}

/// Feed `events` to the session in order
///
/// Per-event errors are logged and counted; replay always continues.
pub fn replay<O: BranchOracle>(session: &mut SolverSession<O>, events: &[Event]) -> ReplaySummary {
    let mut summary = ReplaySummary::default();
    for (n, event) in events.iter().enumerate() {
        summary.events += 1;
        let result = match *event {
            Event::Branch {
                condition,
                taken,
                pc,
            } => session.on_branch(condition, taken, pc).map(|outcome| {
                if let BranchOutcome::Negated(negation) = outcome {
                    log::debug!("event {}: branch at 0x{:x} {:?}", n, pc, negation);
                    summary.negated += 1;
                }
            }),
            Event::Address { expr, value } => session.on_address(expr, value).map(|_| ()),
            Event::Value { expr, value } => {
                session.on_value(expr, value);
                Ok(())
            }
            Event::SolveAll { expr, value } => session.on_solve_all(expr, value).map(|_| ()),
        };
        if let Err(e) = result {
            log::error!("event {}: {}", n, e);
            summary.errors += 1;
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::evaluate;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("42").unwrap(), 42);
        assert_eq!(parse_number("0x2a").unwrap(), 42);
        assert_eq!(parse_number("0X2A").unwrap(), 42);
        assert!(parse_number("").is_err());
        assert!(parse_number("0xzz").is_err());
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("(add (read 1)(const 0x2 8))"),
            vec!["(", "add", "(", "read", "1", ")", "(", "const", "0x2", "8", ")", ")"]
        );
    }

    #[test]
    fn test_parse_expr_matches_render() {
        let mut arena = ExprArena::new();
        let text = "(eq (add (sext 32 (read 15)) (sext 32 (read 7))) (const 0x61 32))";
        let e = parse_expr(text, &mut arena).unwrap();
        assert_eq!(arena.render(e), text);
        assert_eq!(arena.width(e), 1);

        let input = b"aaaaaaa(xxxxxxx9aa)e+rrrrrrr55566677\n";
        assert_eq!(evaluate(&arena, e, input), 1);
    }

    #[test]
    fn test_parse_expr_shares_reads() {
        let mut arena = ExprArena::new();
        let a = parse_expr("(read 4)", &mut arena).unwrap();
        let b = parse_expr("(ult (read 4) (const 9 8))", &mut arena).unwrap();
        assert_eq!(arena.child(b, 0), a);
    }

    #[test]
    fn test_parse_expr_errors() {
        let mut arena = ExprArena::new();
        for bad in [
            "",
            "(read 1",
            "(read 1))",
            "(frob (read 1))",
            "(add (read 1) (const 1 16))",
            "(zext 4 (read 1))",
            "(extract 9 0 (read 1))",
            "(land (read 1) true)",
            "(const 1 65)",
            "(add (read 1))",
            "bogus",
        ] {
            assert!(parse_expr(bad, &mut arena).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_parse_logical() {
        let mut arena = ExprArena::new();
        let e = parse_expr(
            "(lor (lnot (eq (read 0) (const 1 8))) (ugt (read 1) (const 2 8)))",
            &mut arena,
        )
        .unwrap();
        assert_eq!(arena.kind(e), Kind::LOr);
        // lnot of a comparison folds into the negated comparison
        assert_eq!(arena.kind(arena.child(e, 0)), Kind::Distinct);
    }

    #[test]
    fn test_parse_line_events() {
        let mut arena = ExprArena::new();
        let branch = parse_line("branch 0x4005d0 1 (eq (read 0) (const 0x61 8))", &mut arena)
            .unwrap()
            .unwrap();
        assert!(matches!(
            branch,
            Event::Branch { taken: true, pc: 0x4005d0, .. }
        ));

        let addr = parse_line("addr 0x61 (zext 64 (read 2))  # pointer", &mut arena)
            .unwrap()
            .unwrap();
        assert!(matches!(addr, Event::Address { value: 0x61, .. }));

        let all = parse_line("solveall 3 (and (read 5) (const 3 8))", &mut arena)
            .unwrap()
            .unwrap();
        assert!(matches!(all, Event::SolveAll { value: 3, .. }));

        assert!(parse_line("   # only a comment", &mut arena).unwrap().is_none());
        assert!(parse_line("", &mut arena).unwrap().is_none());
        assert!(parse_line("jump 1 (read 0)", &mut arena).is_err());
        assert!(parse_line("branch 1 maybe (eq (read 0) (read 1))", &mut arena).is_err());
        assert!(parse_line("branch 1", &mut arena).is_err());
    }

    #[test]
    fn test_branch_condition_must_be_boolean() {
        let mut arena = ExprArena::new();
        let err = parse_line("branch 1 1 (read 0)", &mut arena).unwrap_err();
        assert!(err.contains("boolean"), "{}", err);
        assert!(parse_line("branch 1 1 (add (read 0) (const 1 8))", &mut arena).is_err());
        assert!(parse_line("branch 1 1 true", &mut arena).unwrap().is_some());
        assert!(parse_line("branch 1 0 (lor (eq (read 0) (read 1)) false)", &mut arena)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_oversized_numbers_are_rejected() {
        let mut arena = ExprArena::new();
        for bad in [
            "(eq (read 18446744073709551615) (const 0 8))",
            "(eq (read 1099511627776) (const 0 8))",
            "(eq (read 16777216) (const 0 8))",
            "(extract 4294967303 0 (read 1))",
            "(extract 7 4294967296 (read 1))",
        ] {
            assert!(parse_expr(bad, &mut arena).is_err(), "accepted {:?}", bad);
        }
        let top = parse_expr("(read 16777215)", &mut arena).unwrap();
        assert_eq!(arena.read_index(top), Some(MAX_INDEX));
    }

    #[test]
    fn test_oversized_read_reports_its_line() {
        let mut arena = ExprArena::new();
        let content = "\
branch 1 1 (eq (read 0) (const 0x61 8))
branch 1 1 (eq (read 18446744073709551615) (const 0 8))
";
        let err = parse_trace_string(content, &mut arena).unwrap_err();
        assert_eq!(err.line_number, 2);
        assert!(err.message.contains("read index"), "{}", err);
    }

    #[test]
    fn test_parse_trace_string_reports_line() {
        let mut arena = ExprArena::new();
        let content = "# header\nvalue 1 (read 0)\nbranch 2 0 (ult (read 0)\n";
        let err = parse_trace_string(content, &mut arena).unwrap_err();
        assert_eq!(err.line_number, 3);
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_parse_trace_string() {
        let mut arena = ExprArena::new();
        let content = "\
# two events
branch 0x10 1 (eq (read 0) (const 0x61 8))

value 0x61 (read 0)
";
        let events = parse_trace_string(content, &mut arena).unwrap();
        assert_eq!(events.len(), 2);
    }
}
