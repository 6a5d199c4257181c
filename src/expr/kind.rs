//! Operator kinds of the expression graph

use std::fmt;

/// Interpretation of a bit-vector when comparing or bounding it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signedness {
    Unsigned,
    Signed,
}

/// Operator kind of an expression node, including leaf payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    // Leaves
    Bool(bool),
    Constant(u64),
    Read(usize),

    // Unary bit-vector operators
    Not,
    Neg,
    Extract { high: u32, low: u32 },
    ZExt,
    SExt,

    // Binary bit-vector operators
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
    Concat,

    // Relational operators (bit-vector operands, boolean result)
    Equal,
    Distinct,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,

    // Logical connectives
    LNot,
    LAnd,
    LOr,
}

impl Kind {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Kind::Bool(_) | Kind::Constant(_) | Kind::Read(_))
    }

    pub fn is_relational(&self) -> bool {
        matches!(
            self,
            Kind::Equal
                | Kind::Distinct
                | Kind::Ult
                | Kind::Ule
                | Kind::Ugt
                | Kind::Uge
                | Kind::Slt
                | Kind::Sle
                | Kind::Sgt
                | Kind::Sge
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, Kind::LNot | Kind::LAnd | Kind::LOr)
    }

    /// Whether nodes of this kind produce a boolean
    pub fn is_bool(&self) -> bool {
        matches!(self, Kind::Bool(_)) || self.is_relational() || self.is_logical()
    }

    /// Relational kind holding exactly when `self` does not
    pub fn negate(&self) -> Option<Kind> {
        let negated = match self {
            Kind::Equal => Kind::Distinct,
            Kind::Distinct => Kind::Equal,
            Kind::Ult => Kind::Uge,
            Kind::Ule => Kind::Ugt,
            Kind::Ugt => Kind::Ule,
            Kind::Uge => Kind::Ult,
            Kind::Slt => Kind::Sge,
            Kind::Sle => Kind::Sgt,
            Kind::Sgt => Kind::Sle,
            Kind::Sge => Kind::Slt,
            _ => return None,
        };
        Some(negated)
    }

    /// Relational kind with the operands exchanged (`a < b` is `b > a`)
    pub fn swap(&self) -> Option<Kind> {
        let swapped = match self {
            Kind::Equal => Kind::Equal,
            Kind::Distinct => Kind::Distinct,
            Kind::Ult => Kind::Ugt,
            Kind::Ule => Kind::Uge,
            Kind::Ugt => Kind::Ult,
            Kind::Uge => Kind::Ule,
            Kind::Slt => Kind::Sgt,
            Kind::Sle => Kind::Sge,
            Kind::Sgt => Kind::Slt,
            Kind::Sge => Kind::Sle,
            _ => return None,
        };
        Some(swapped)
    }

    /// Signedness of an ordering comparison; equality kinds have none
    pub fn signedness(&self) -> Option<Signedness> {
        match self {
            Kind::Ult | Kind::Ule | Kind::Ugt | Kind::Uge => Some(Signedness::Unsigned),
            Kind::Slt | Kind::Sle | Kind::Sgt | Kind::Sge => Some(Signedness::Signed),
            _ => None,
        }
    }

    /// Short mnemonic, also the operator name used by the trace format
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Kind::Bool(true) => "true",
            Kind::Bool(false) => "false",
            Kind::Constant(_) => "const",
            Kind::Read(_) => "read",
            Kind::Not => "not",
            Kind::Neg => "neg",
            Kind::Extract { .. } => "extract",
            Kind::ZExt => "zext",
            Kind::SExt => "sext",
            Kind::Add => "add",
            Kind::Sub => "sub",
            Kind::Mul => "mul",
            Kind::UDiv => "udiv",
            Kind::SDiv => "sdiv",
            Kind::URem => "urem",
            Kind::SRem => "srem",
            Kind::And => "and",
            Kind::Or => "or",
            Kind::Xor => "xor",
            Kind::Shl => "shl",
            Kind::LShr => "lshr",
            Kind::AShr => "ashr",
            Kind::Concat => "concat",
            Kind::Equal => "eq",
            Kind::Distinct => "ne",
            Kind::Ult => "ult",
            Kind::Ule => "ule",
            Kind::Ugt => "ugt",
            Kind::Uge => "uge",
            Kind::Slt => "slt",
            Kind::Sle => "sle",
            Kind::Sgt => "sgt",
            Kind::Sge => "sge",
            Kind::LNot => "lnot",
            Kind::LAnd => "land",
            Kind::LOr => "lor",
        }
    }

    /// Look up an operator without payload by mnemonic
    pub fn from_mnemonic(name: &str) -> Option<Kind> {
        let kind = match name {
            "not" => Kind::Not,
            "neg" => Kind::Neg,
            "add" => Kind::Add,
            "sub" => Kind::Sub,
            "mul" => Kind::Mul,
            "udiv" => Kind::UDiv,
            "sdiv" => Kind::SDiv,
            "urem" => Kind::URem,
            "srem" => Kind::SRem,
            "and" => Kind::And,
            "or" => Kind::Or,
            "xor" => Kind::Xor,
            "shl" => Kind::Shl,
            "lshr" => Kind::LShr,
            "ashr" => Kind::AShr,
            "concat" => Kind::Concat,
            "eq" => Kind::Equal,
            "ne" => Kind::Distinct,
            "ult" => Kind::Ult,
            "ule" => Kind::Ule,
            "ugt" => Kind::Ugt,
            "uge" => Kind::Uge,
            "slt" => Kind::Slt,
            "sle" => Kind::Sle,
            "sgt" => Kind::Sgt,
            "sge" => Kind::Sge,
            "lnot" => Kind::LNot,
            "land" => Kind::LAnd,
            "lor" => Kind::LOr,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}
