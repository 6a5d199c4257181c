//! Concrete evaluation of expression nodes over an input
//!
//! Semantics follow SMT-LIB bit-vectors (including division by zero), so a
//! value computed here always agrees with what the solver would assign. This
//! is what lets it serve as the reference when checking generated inputs.

use std::collections::HashMap;

use super::kind::Kind;
use super::{ExprArena, ExprId, mask, to_signed};

/// Evaluate `root` with every read taken from `input`
///
/// Reads past the end of the input evaluate to zero. Booleans are 0 or 1.
/// Concretization flags are ignored: this is always the real value.
pub fn evaluate(arena: &ExprArena, root: ExprId, input: &[u8]) -> u64 {
    let mut values: HashMap<ExprId, u64> = HashMap::new();
    let mut stack = vec![(root, false)];

    while let Some((id, expanded)) = stack.pop() {
        if values.contains_key(&id) {
            continue;
        }
        let children = arena.children(id);
        if !expanded && !children.is_empty() {
            stack.push((id, true));
            for child in children {
                if !values.contains_key(child) {
                    stack.push((*child, false));
                }
            }
            continue;
        }
        let args: Vec<u64> = children.iter().map(|c| values[c]).collect();
        let value = apply(arena, id, &args, input);
        values.insert(id, value);
    }

    values[&root]
}

fn apply(arena: &ExprArena, id: ExprId, args: &[u64], input: &[u8]) -> u64 {
    let width = arena.width(id);
    let m = mask(width);
    // Width of the operands, which differs from the result for
    // relational, extension and extraction nodes
    let operand_width = arena
        .children(id)
        .first()
        .map(|c| arena.width(*c))
        .unwrap_or(width);

    match arena.kind(id) {
        Kind::Bool(value) => value as u64,
        Kind::Constant(value) => value,
        Kind::Read(index) => input.get(index).copied().unwrap_or(0) as u64,

        Kind::Not => !args[0] & m,
        Kind::Neg => args[0].wrapping_neg() & m,
        Kind::Extract { high, low } => (args[0] >> low) & mask(high - low + 1),
        Kind::ZExt => args[0],
        Kind::SExt => (to_signed(args[0], operand_width) as u64) & m,

        Kind::Add => args[0].wrapping_add(args[1]) & m,
        Kind::Sub => args[0].wrapping_sub(args[1]) & m,
        Kind::Mul => args[0].wrapping_mul(args[1]) & m,
        Kind::UDiv => {
            if args[1] == 0 {
                m
            } else {
                args[0] / args[1]
            }
        }
        Kind::URem => {
            if args[1] == 0 {
                args[0]
            } else {
                args[0] % args[1]
            }
        }
        Kind::SDiv => {
            let a = to_signed(args[0], width);
            let b = to_signed(args[1], width);
            if b == 0 {
                if a < 0 { 1 } else { m }
            } else {
                (a.wrapping_div(b) as u64) & m
            }
        }
        Kind::SRem => {
            let a = to_signed(args[0], width);
            let b = to_signed(args[1], width);
            if b == 0 {
                args[0]
            } else {
                (a.wrapping_rem(b) as u64) & m
            }
        }
        Kind::And => args[0] & args[1],
        Kind::Or => args[0] | args[1],
        Kind::Xor => args[0] ^ args[1],
        Kind::Shl => {
            if args[1] >= width as u64 {
                0
            } else {
                (args[0] << args[1]) & m
            }
        }
        Kind::LShr => {
            if args[1] >= width as u64 {
                0
            } else {
                args[0] >> args[1]
            }
        }
        Kind::AShr => {
            let a = to_signed(args[0], width);
            let shift = args[1].min(width as u64 - 1);
            ((a >> shift) as u64) & m
        }
        Kind::Concat => {
            let low_width = arena.width(arena.child(id, 1));
            (args[0] << low_width) | args[1]
        }

        Kind::Equal => (args[0] == args[1]) as u64,
        Kind::Distinct => (args[0] != args[1]) as u64,
        Kind::Ult => (args[0] < args[1]) as u64,
        Kind::Ule => (args[0] <= args[1]) as u64,
        Kind::Ugt => (args[0] > args[1]) as u64,
        Kind::Uge => (args[0] >= args[1]) as u64,
        Kind::Slt => (to_signed(args[0], operand_width) < to_signed(args[1], operand_width)) as u64,
        Kind::Sle => (to_signed(args[0], operand_width) <= to_signed(args[1], operand_width)) as u64,
        Kind::Sgt => (to_signed(args[0], operand_width) > to_signed(args[1], operand_width)) as u64,
        Kind::Sge => (to_signed(args[0], operand_width) >= to_signed(args[1], operand_width)) as u64,

        Kind::LNot => (args[0] == 0) as u64,
        Kind::LAnd => (args[0] != 0 && args[1] != 0) as u64,
        Kind::LOr => (args[0] != 0 || args[1] != 0) as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT: &[u8] = b"aaaaaaa(xxxxxxx9aa)e+rrrrrrr55566677\n";

    #[test]
    fn test_sum_of_signed_chars() {
        let mut arena = ExprArena::new();
        let r15 = arena.read(15);
        let r7 = arena.read(7);
        let a = arena.sext(32, r15);
        let b = arena.sext(32, r7);
        let sum = arena.binary(Kind::Add, a, b);
        let c = arena.constant(b'a' as u64, 32);
        let eq = arena.relational(Kind::Equal, sum, c);

        assert_eq!(evaluate(&arena, sum, INPUT), (b'9' + b'(') as u64);
        assert_eq!(evaluate(&arena, eq, INPUT), 1);
    }

    #[test]
    fn test_sign_extension() {
        let mut arena = ExprArena::new();
        let r = arena.read(0);
        let s = arena.sext(16, r);
        let z = arena.zext(16, r);
        assert_eq!(evaluate(&arena, s, &[0x80]), 0xff80);
        assert_eq!(evaluate(&arena, z, &[0x80]), 0x0080);
    }

    #[test]
    fn test_division_by_zero_matches_smtlib() {
        let mut arena = ExprArena::new();
        let r = arena.read(0);
        let zero = arena.constant(0, 8);
        let udiv = arena.binary(Kind::UDiv, r, zero);
        let urem = arena.binary(Kind::URem, r, zero);
        let sdiv = arena.binary(Kind::SDiv, r, zero);
        assert_eq!(evaluate(&arena, udiv, &[7]), 0xff);
        assert_eq!(evaluate(&arena, urem, &[7]), 7);
        assert_eq!(evaluate(&arena, sdiv, &[7]), 0xff);
        assert_eq!(evaluate(&arena, sdiv, &[0xf0]), 1);
    }

    #[test]
    fn test_shifts_and_concat() {
        let mut arena = ExprArena::new();
        let hi = arena.read(0);
        let lo = arena.read(1);
        let word = arena.binary(Kind::Concat, hi, lo);
        assert_eq!(arena.width(word), 16);
        assert_eq!(evaluate(&arena, word, &[0x12, 0x34]), 0x1234);

        let nine = arena.constant(9, 8);
        let shl = arena.binary(Kind::Shl, hi, nine);
        let ashr = arena.binary(Kind::AShr, hi, nine);
        assert_eq!(evaluate(&arena, shl, &[0x81]), 0);
        assert_eq!(evaluate(&arena, ashr, &[0x81]), 0xff);

        let ext = arena.extract(11, 4, word);
        assert_eq!(evaluate(&arena, ext, &[0x12, 0x34]), 0x23);
    }

    #[test]
    fn test_signed_compare_uses_operand_width() {
        let mut arena = ExprArena::new();
        let r = arena.read(0);
        let zero = arena.constant(0, 8);
        let slt = arena.relational(Kind::Slt, r, zero);
        let ult = arena.relational(Kind::Ult, r, zero);
        assert_eq!(evaluate(&arena, slt, &[0xfe]), 1);
        assert_eq!(evaluate(&arena, ult, &[0xfe]), 0);
    }

    #[test]
    fn test_reads_past_end_are_zero() {
        let mut arena = ExprArena::new();
        let r = arena.read(100);
        assert_eq!(evaluate(&arena, r, INPUT), 0);
    }

    #[test]
    fn test_concretized_leaf_still_evaluates_input() {
        let mut arena = ExprArena::new();
        let r = arena.read(3);
        arena.concretize(r);
        assert_eq!(evaluate(&arena, r, b"abcd"), b'd' as u64);
    }
}
