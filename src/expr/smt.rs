//! Translation of expression nodes into Z3 terms

use std::collections::{BTreeSet, HashMap};

use z3::ast::{BV, Bool};

use super::kind::Kind;
use super::{BYTE_WIDTH, ExprArena, ExprId};

/// A translated node: bit-vector or boolean
#[derive(Clone, Debug)]
pub enum Term {
    Bv(BV),
    Bool(Bool),
}

/// Solver variable standing for one input byte
pub fn input_variable(index: usize) -> BV {
    BV::new_const(format!("k!{}", index), BYTE_WIDTH)
}

/// Translates nodes into Z3 terms, honouring read concretization flags
///
/// A read flagged concrete becomes the input byte constant, every other read
/// becomes the variable `k!<index>`. Indices emitted as variables are
/// collected so the caller knows which bytes a model binds.
pub struct SmtTranslator<'a> {
    arena: &'a ExprArena,
    input: &'a [u8],
    cache: HashMap<ExprId, Term>,
    variables: BTreeSet<usize>,
}

impl<'a> SmtTranslator<'a> {
    pub fn new(arena: &'a ExprArena, input: &'a [u8]) -> Self {
        Self {
            arena,
            input,
            cache: HashMap::new(),
            variables: BTreeSet::new(),
        }
    }

    /// Input indices translated as free variables so far
    pub fn variables(&self) -> &BTreeSet<usize> {
        &self.variables
    }

    pub fn translate_bool(&mut self, id: ExprId) -> Bool {
        match self.translate(id) {
            Term::Bool(b) => b,
            Term::Bv(bv) => {
                let zero = BV::from_u64(0, bv.get_size());
                bv.eq(&zero).not()
            }
        }
    }

    pub fn translate_bv(&mut self, id: ExprId) -> BV {
        match self.translate(id) {
            Term::Bv(bv) => bv,
            Term::Bool(b) => b.ite(&BV::from_u64(1, 1), &BV::from_u64(0, 1)),
        }
    }

    pub fn translate(&mut self, id: ExprId) -> Term {
        if let Some(term) = self.cache.get(&id) {
            return term.clone();
        }
        let term = self.translate_uncached(id);
        self.cache.insert(id, term.clone());
        term
    }

    fn translate_uncached(&mut self, id: ExprId) -> Term {
        let arena = self.arena;
        let width = arena.width(id);
        let kind = arena.kind(id);

        match kind {
            Kind::Bool(value) => Term::Bool(Bool::from_bool(value)),
            Kind::Constant(value) => Term::Bv(BV::from_u64(value, width)),
            Kind::Read(index) => {
                if arena.is_concrete(id) {
                    let byte = self.input.get(index).copied().unwrap_or(0);
                    Term::Bv(BV::from_u64(byte as u64, BYTE_WIDTH))
                } else {
                    self.variables.insert(index);
                    Term::Bv(input_variable(index))
                }
            }

            Kind::Not | Kind::Neg | Kind::Extract { .. } | Kind::ZExt | Kind::SExt => {
                let a = self.translate_bv(arena.child(id, 0));
                let extra = width.saturating_sub(a.get_size());
                let bv = match kind {
                    Kind::Not => a.bvnot(),
                    Kind::Neg => a.bvneg(),
                    Kind::Extract { high, low } => a.extract(high, low),
                    Kind::ZExt => a.zero_ext(extra),
                    _ => a.sign_ext(extra),
                };
                Term::Bv(bv)
            }

            Kind::LNot => Term::Bool(self.translate_bool(arena.child(id, 0)).not()),
            Kind::LAnd | Kind::LOr => {
                let a = self.translate_bool(arena.child(id, 0));
                let b = self.translate_bool(arena.child(id, 1));
                if kind == Kind::LAnd {
                    Term::Bool(Bool::and(&[&a, &b]))
                } else {
                    Term::Bool(Bool::or(&[&a, &b]))
                }
            }

            _ if kind.is_relational() => {
                let a = self.translate_bv(arena.child(id, 0));
                let b = self.translate_bv(arena.child(id, 1));
                let cmp = match kind {
                    Kind::Equal => a.eq(&b),
                    Kind::Distinct => a.eq(&b).not(),
                    Kind::Ult => a.bvult(&b),
                    Kind::Ule => a.bvule(&b),
                    Kind::Ugt => a.bvugt(&b),
                    Kind::Uge => a.bvuge(&b),
                    Kind::Slt => a.bvslt(&b),
                    Kind::Sle => a.bvsle(&b),
                    Kind::Sgt => a.bvsgt(&b),
                    _ => a.bvsge(&b),
                };
                Term::Bool(cmp)
            }

            _ => {
                let a = self.translate_bv(arena.child(id, 0));
                let b = self.translate_bv(arena.child(id, 1));
                let bv = match kind {
                    Kind::Add => a.bvadd(&b),
                    Kind::Sub => a.bvsub(&b),
                    Kind::Mul => a.bvmul(&b),
                    Kind::UDiv => a.bvudiv(&b),
                    Kind::SDiv => a.bvsdiv(&b),
                    Kind::URem => a.bvurem(&b),
                    Kind::SRem => a.bvsrem(&b),
                    Kind::And => a.bvand(&b),
                    Kind::Or => a.bvor(&b),
                    Kind::Xor => a.bvxor(&b),
                    Kind::Shl => a.bvshl(&b),
                    Kind::LShr => a.bvlshr(&b),
                    Kind::AShr => a.bvashr(&b),
                    _ => a.concat(&b),
                };
                Term::Bv(bv)
            }
        }
    }
}
