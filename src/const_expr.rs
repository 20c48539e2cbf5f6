//! 定数式の評価
//!
//! オブジェクトマクロの置換列が副作用のない定数式かどうかの判定と、
//! #if / #elif の条件式の評価に使う。値と同時に C++ の通常の算術変換に
//! 従った結果型を求める。

use std::fmt;

use thiserror::Error;

use crate::token::{FloatSuffix, IntSuffix, Token, TokenKind};

/// 定数の型（組み込みスカラー型のみ）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum ScalarType {
    Bool,
    Char,
    Int,
    UnsignedInt,
    Long,
    UnsignedLong,
    LongLong,
    UnsignedLongLong,
    Float,
    Double,
    LongDouble,
}

impl ScalarType {
    /// C++ での型名
    pub fn cpp_name(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Char => "char",
            ScalarType::Int => "int",
            ScalarType::UnsignedInt => "unsigned int",
            ScalarType::Long => "long",
            ScalarType::UnsignedLong => "unsigned long",
            ScalarType::LongLong => "long long",
            ScalarType::UnsignedLongLong => "unsigned long long",
            ScalarType::Float => "float",
            ScalarType::Double => "double",
            ScalarType::LongDouble => "long double",
        }
    }

    /// 整数型（bool, char を含む）か
    pub fn is_integral(self) -> bool {
        !self.is_floating()
    }

    pub fn is_floating(self) -> bool {
        matches!(self, ScalarType::Float | ScalarType::Double | ScalarType::LongDouble)
    }

    fn is_unsigned(self) -> bool {
        matches!(
            self,
            ScalarType::UnsignedInt | ScalarType::UnsignedLong | ScalarType::UnsignedLongLong
        )
    }

    /// 整数変換順位（LP64 前提で long と long long は同じ幅）
    fn rank(self) -> u8 {
        match self {
            ScalarType::Bool => 0,
            ScalarType::Char => 1,
            ScalarType::Int | ScalarType::UnsignedInt => 2,
            ScalarType::Long | ScalarType::UnsignedLong => 3,
            ScalarType::LongLong | ScalarType::UnsignedLongLong => 4,
            ScalarType::Float => 5,
            ScalarType::Double => 6,
            ScalarType::LongDouble => 7,
        }
    }

    fn bits(self) -> u32 {
        match self {
            ScalarType::Bool => 1,
            ScalarType::Char => 8,
            ScalarType::Int | ScalarType::UnsignedInt => 32,
            _ => 64,
        }
    }

    /// 汎整数拡張
    fn promote(self) -> ScalarType {
        match self {
            ScalarType::Bool | ScalarType::Char => ScalarType::Int,
            other => other,
        }
    }

    fn to_unsigned(self) -> ScalarType {
        match self {
            ScalarType::Int => ScalarType::UnsignedInt,
            ScalarType::Long => ScalarType::UnsignedLong,
            ScalarType::LongLong => ScalarType::UnsignedLongLong,
            other => other,
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cpp_name())
    }
}

/// 評価結果の値
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Int(i128),
    Float(f64),
}

impl ConstValue {
    pub fn is_truthy(self) -> bool {
        match self {
            ConstValue::Int(v) => v != 0,
            ConstValue::Float(v) => v != 0.0,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            ConstValue::Int(v) => v as f64,
            ConstValue::Float(v) => v,
        }
    }

    fn as_int(self) -> i128 {
        match self {
            ConstValue::Int(v) => v,
            ConstValue::Float(v) => v as i128,
        }
    }
}

/// 型付きの評価結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluated {
    pub value: ConstValue,
    pub ty: ScalarType,
    /// 型の決定に曖昧さがあった（符号混在、int に収まらない無印リテラル等）
    pub ambiguous: bool,
}

/// 定数として評価できなかった理由
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// 定数でない識別子
    #[error("references non-constant identifier `{0}`")]
    UnknownIdentifier(String),
    /// defined 演算子（#if 専用）
    #[error("uses the `defined` operator")]
    Defined,
    /// 副作用のある演算子
    #[error("has a side-effecting operator `{0}`")]
    SideEffect(String),
    /// 定数式に現れない構文（関数呼び出し、sizeof、文字列など）
    #[error("contains `{0}`, which is not a constant expression")]
    NotConstant(String),
    /// ゼロ除算
    #[error("divides by zero")]
    DivisionByZero,
    /// 構文エラー
    #[error("is not a well-formed expression ({0})")]
    Syntax(String),
}

type EvalResult = Result<Evaluated, EvalError>;

/// 定数式評価器
pub struct ConstEvaluator<'a> {
    tokens: &'a [Token],
    pos: usize,
    ambiguous: bool,
}

impl<'a> ConstEvaluator<'a> {
    /// 新しい評価器を作成
    pub fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            ambiguous: false,
        }
    }

    /// トークン列全体を1つの定数式として評価
    pub fn evaluate(mut self) -> EvalResult {
        if self.tokens.is_empty() {
            return Err(EvalError::Syntax("empty expression".to_string()));
        }
        let mut result = self.conditional()?;
        if let Some(token) = self.current() {
            return Err(Self::unexpected(token));
        }
        result.ambiguous |= self.ambiguous;
        Ok(result)
    }

    /// 現在のトークンを取得
    fn current(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn current_kind(&self) -> Option<&'a TokenKind> {
        self.current().map(|t| &t.kind)
    }

    /// 次へ進む
    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), EvalError> {
        if self.current_kind() == Some(&kind) {
            self.advance();
            Ok(())
        } else {
            Err(EvalError::Syntax(format!("expected {}", what)))
        }
    }

    fn unexpected(token: &Token) -> EvalError {
        match &token.kind {
            TokenKind::Ident(name) => EvalError::UnknownIdentifier(name.clone()),
            kind if kind.is_mutating_op() => EvalError::SideEffect(token.lexeme.clone()),
            TokenKind::Comma => EvalError::NotConstant(",".to_string()),
            _ => EvalError::Syntax(format!("unexpected `{}`", token.lexeme)),
        }
    }

    /// 条件演算子
    fn conditional(&mut self) -> EvalResult {
        let cond = self.binary(0)?;
        if self.current_kind() != Some(&TokenKind::Question) {
            return Ok(cond);
        }
        self.advance();
        let then_val = self.conditional()?;
        self.expect(TokenKind::Colon, "':' in conditional expression")?;
        let else_val = self.conditional()?;
        let ty = self.common_type(then_val.ty, else_val.ty);
        let chosen = if cond.value.is_truthy() { then_val } else { else_val };
        Ok(self.convert(chosen, ty))
    }

    /// 二項演算子（優先順位法）
    fn binary(&mut self, min_prec: u8) -> EvalResult {
        let mut left = self.unary()?;
        loop {
            let Some(kind) = self.current_kind() else {
                break;
            };
            let Some(prec) = binary_precedence(kind) else {
                if kind.is_mutating_op() {
                    return Err(EvalError::SideEffect(self.tokens[self.pos].lexeme.clone()));
                }
                break;
            };
            if prec < min_prec {
                break;
            }
            let op = kind.clone();
            self.advance();
            let right = self.binary(prec + 1)?;
            left = self.apply_binary(&op, left, right)?;
        }
        Ok(left)
    }

    /// 単項演算子
    fn unary(&mut self) -> EvalResult {
        let Some(token) = self.current() else {
            return Err(EvalError::Syntax("unexpected end of expression".to_string()));
        };
        match &token.kind {
            TokenKind::Plus => {
                self.advance();
                let v = self.unary()?;
                Ok(self.promoted(v))
            }
            TokenKind::Minus => {
                self.advance();
                let v = self.unary()?;
                let v = self.promoted(v);
                let value = match v.value {
                    ConstValue::Int(i) => ConstValue::Int(wrap(-i, v.ty)),
                    ConstValue::Float(f) => ConstValue::Float(-f),
                };
                Ok(Evaluated { value, ..v })
            }
            TokenKind::Bang => {
                self.advance();
                let v = self.unary()?;
                Ok(bool_value(!v.value.is_truthy()))
            }
            TokenKind::Tilde => {
                self.advance();
                let v = self.unary()?;
                if v.ty.is_floating() {
                    return Err(EvalError::Syntax("'~' applied to floating operand".to_string()));
                }
                let v = self.promoted(v);
                Ok(Evaluated {
                    value: ConstValue::Int(wrap(!v.value.as_int(), v.ty)),
                    ..v
                })
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => Err(EvalError::SideEffect(token.lexeme.clone())),
            TokenKind::LParen => {
                if let Some(ty) = self.try_cast_type() {
                    let v = self.unary()?;
                    return Ok(self.convert(v, ty));
                }
                self.advance();
                let v = self.conditional()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(v)
            }
            _ => self.primary(),
        }
    }

    /// 一次式
    fn primary(&mut self) -> EvalResult {
        let Some(token) = self.current() else {
            return Err(EvalError::Syntax("unexpected end of expression".to_string()));
        };
        let result = match &token.kind {
            TokenKind::IntLit { value, suffix } => {
                let (ty, ambiguous) = int_literal_type(*value, *suffix);
                self.ambiguous |= ambiguous;
                Evaluated {
                    value: ConstValue::Int(*value as i128),
                    ty,
                    ambiguous,
                }
            }
            TokenKind::FloatLit { value, suffix } => Evaluated {
                value: ConstValue::Float(*value),
                ty: match suffix {
                    FloatSuffix::None => ScalarType::Double,
                    FloatSuffix::Float => ScalarType::Float,
                    FloatSuffix::Long => ScalarType::LongDouble,
                },
                ambiguous: false,
            },
            TokenKind::CharLit { value, .. } => Evaluated {
                value: ConstValue::Int(*value as i128),
                ty: ScalarType::Char,
                ambiguous: false,
            },
            TokenKind::KwTrue => bool_value(true),
            TokenKind::KwFalse => bool_value(false),
            TokenKind::Ident(name) if name == "defined" => return Err(EvalError::Defined),
            TokenKind::Ident(name) => {
                let next = self.tokens.get(self.pos + 1).map(|t| &t.kind);
                if next == Some(&TokenKind::LParen) {
                    return Err(EvalError::NotConstant(format!("{}(...)", name)));
                }
                return Err(EvalError::UnknownIdentifier(name.clone()));
            }
            TokenKind::KwSizeof | TokenKind::KwAlignof | TokenKind::KwNew | TokenKind::KwDelete
            | TokenKind::KwThrow | TokenKind::KwNullptr | TokenKind::StringLit { .. } => {
                return Err(EvalError::NotConstant(token.lexeme.clone()));
            }
            _ => return Err(Self::unexpected(token)),
        };
        self.advance();
        Ok(result)
    }

    /// ( 組み込み型 ) 形式のキャストなら型を読んで返す
    fn try_cast_type(&mut self) -> Option<ScalarType> {
        let mut i = self.pos + 1;
        let mut words = Vec::new();
        while let Some(token) = self.tokens.get(i) {
            if token.kind == TokenKind::RParen {
                break;
            }
            if !token.kind.is_type_keyword() {
                return None;
            }
            words.push(token.lexeme.as_str());
            i += 1;
        }
        if words.is_empty() || self.tokens.get(i).is_none() {
            return None;
        }
        let ty = scalar_type_from_words(&words)?;
        self.pos = i + 1;
        Some(ty)
    }

    fn promoted(&mut self, v: Evaluated) -> Evaluated {
        let ty = v.ty.promote();
        self.convert(v, ty)
    }

    /// 通常の算術変換
    fn common_type(&mut self, a: ScalarType, b: ScalarType) -> ScalarType {
        if a.is_floating() || b.is_floating() {
            return if a.rank() >= b.rank() { a } else { b };
        }
        let (a, b) = (a.promote(), b.promote());
        if a.is_unsigned() == b.is_unsigned() {
            return if a.rank() >= b.rank() { a } else { b };
        }
        // 符号混在は結果が実装・値依存になりうる
        self.ambiguous = true;
        let (unsigned, signed) = if a.is_unsigned() { (a, b) } else { (b, a) };
        if unsigned.rank() >= signed.rank() {
            unsigned
        } else if signed.bits() > unsigned.bits() {
            signed
        } else {
            signed.to_unsigned()
        }
    }

    fn convert(&self, v: Evaluated, ty: ScalarType) -> Evaluated {
        let value = match (v.value, ty.is_floating()) {
            (ConstValue::Int(i), true) => ConstValue::Float(i as f64),
            (ConstValue::Float(f), false) => ConstValue::Int(wrap(f as i128, ty)),
            (ConstValue::Int(i), false) => ConstValue::Int(wrap(i, ty)),
            (ConstValue::Float(f), true) => ConstValue::Float(f),
        };
        Evaluated { value, ty, ..v }
    }

    fn apply_binary(&mut self, op: &TokenKind, left: Evaluated, right: Evaluated) -> EvalResult {
        let ambiguous = left.ambiguous || right.ambiguous;
        match op {
            TokenKind::AmpAmp => return Ok(bool_value(left.value.is_truthy() && right.value.is_truthy())),
            TokenKind::PipePipe => return Ok(bool_value(left.value.is_truthy() || right.value.is_truthy())),
            _ => {}
        }

        if matches!(op, TokenKind::LtLt | TokenKind::GtGt) {
            if left.ty.is_floating() || right.ty.is_floating() {
                return Err(EvalError::Syntax("shift of floating operand".to_string()));
            }
            let l = self.promoted(left);
            let amount = right.value.as_int().clamp(0, 127) as u32;
            let value = match op {
                TokenKind::LtLt => l.value.as_int().wrapping_shl(amount),
                _ => l.value.as_int().wrapping_shr(amount),
            };
            return Ok(Evaluated {
                value: ConstValue::Int(wrap(value, l.ty)),
                ty: l.ty,
                ambiguous,
            });
        }

        let ty = self.common_type(left.ty, right.ty);
        let l = self.convert(left, ty).value;
        let r = self.convert(right, ty).value;

        if let Some(result) = compare(op, l, r) {
            return Ok(Evaluated { ambiguous, ..bool_value(result) });
        }

        let value = if ty.is_floating() {
            let (a, b) = (l.as_f64(), r.as_f64());
            ConstValue::Float(match op {
                TokenKind::Plus => a + b,
                TokenKind::Minus => a - b,
                TokenKind::Star => a * b,
                TokenKind::Slash if b == 0.0 => return Err(EvalError::DivisionByZero),
                TokenKind::Slash => a / b,
                _ => return Err(EvalError::Syntax("invalid operator for floating operands".to_string())),
            })
        } else {
            let (a, b) = (l.as_int(), r.as_int());
            let raw = match op {
                TokenKind::Plus => a.wrapping_add(b),
                TokenKind::Minus => a.wrapping_sub(b),
                TokenKind::Star => a.wrapping_mul(b),
                TokenKind::Slash | TokenKind::Percent if b == 0 => return Err(EvalError::DivisionByZero),
                TokenKind::Slash => a / b,
                TokenKind::Percent => a % b,
                TokenKind::Amp => a & b,
                TokenKind::Pipe => a | b,
                TokenKind::Caret => a ^ b,
                _ => return Err(EvalError::Syntax("unsupported operator".to_string())),
            };
            ConstValue::Int(wrap(raw, ty))
        };
        Ok(Evaluated { value, ty, ambiguous })
    }
}

/// 比較演算子なら結果を返す
fn compare(op: &TokenKind, l: ConstValue, r: ConstValue) -> Option<bool> {
    let ordering = match (l, r) {
        (ConstValue::Int(a), ConstValue::Int(b)) => a.partial_cmp(&b),
        _ => l.as_f64().partial_cmp(&r.as_f64()),
    };
    let result = match op {
        TokenKind::EqEq => ordering == Some(std::cmp::Ordering::Equal),
        TokenKind::BangEq => ordering != Some(std::cmp::Ordering::Equal),
        TokenKind::Lt => ordering == Some(std::cmp::Ordering::Less),
        TokenKind::Gt => ordering == Some(std::cmp::Ordering::Greater),
        TokenKind::LtEq => matches!(ordering, Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)),
        TokenKind::GtEq => matches!(ordering, Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)),
        _ => return None,
    };
    Some(result)
}

fn bool_value(b: bool) -> Evaluated {
    Evaluated {
        value: ConstValue::Int(b as i128),
        ty: ScalarType::Bool,
        ambiguous: false,
    }
}

/// 型の幅に合わせて値を切り詰める
fn wrap(value: i128, ty: ScalarType) -> i128 {
    match ty {
        ScalarType::Bool => (value != 0) as i128,
        ScalarType::Char => value as i8 as i128,
        ScalarType::Int => value as i32 as i128,
        ScalarType::UnsignedInt => value as u32 as i128,
        ScalarType::Long | ScalarType::LongLong => value as i64 as i128,
        ScalarType::UnsignedLong | ScalarType::UnsignedLongLong => value as u64 as i128,
        _ => value,
    }
}

/// 二項演算子の優先順位（大きいほど強い）
fn binary_precedence(kind: &TokenKind) -> Option<u8> {
    let prec = match kind {
        TokenKind::PipePipe => 1,
        TokenKind::AmpAmp => 2,
        TokenKind::Pipe => 3,
        TokenKind::Caret => 4,
        TokenKind::Amp => 5,
        TokenKind::EqEq | TokenKind::BangEq => 6,
        TokenKind::Lt | TokenKind::Gt | TokenKind::LtEq | TokenKind::GtEq => 7,
        TokenKind::LtLt | TokenKind::GtGt => 8,
        TokenKind::Plus | TokenKind::Minus => 9,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => 10,
        _ => return None,
    };
    Some(prec)
}

/// 整数リテラルの型（サフィックスと値から）
///
/// 無印で int に収まらない場合は long long とし、曖昧として扱う。
pub fn int_literal_type(value: u64, suffix: IntSuffix) -> (ScalarType, bool) {
    match (suffix.unsigned, suffix.long) {
        (false, 0) if value <= i32::MAX as u64 => (ScalarType::Int, false),
        (false, 0) if value <= i64::MAX as u64 => (ScalarType::LongLong, true),
        (false, 0) => (ScalarType::UnsignedLongLong, true),
        (true, 0) if value <= u32::MAX as u64 => (ScalarType::UnsignedInt, false),
        (true, 0) => (ScalarType::UnsignedLongLong, true),
        (false, 1) => (ScalarType::Long, value > i64::MAX as u64),
        (true, 1) => (ScalarType::UnsignedLong, false),
        (false, _) => (ScalarType::LongLong, value > i64::MAX as u64),
        (true, _) => (ScalarType::UnsignedLongLong, false),
    }
}

/// "unsigned long" のような単語列を型に変換
fn scalar_type_from_words(words: &[&str]) -> Option<ScalarType> {
    let unsigned = words.contains(&"unsigned");
    let longs = words.iter().filter(|w| **w == "long").count();
    let base = words
        .iter()
        .copied()
        .find(|w| !matches!(*w, "unsigned" | "signed" | "long" | "const" | "volatile"));
    let ty = match (base, longs, unsigned) {
        (Some("bool"), 0, false) => ScalarType::Bool,
        (Some("char"), 0, _) => ScalarType::Char,
        (Some("float"), 0, false) => ScalarType::Float,
        (Some("double"), 0, false) => ScalarType::Double,
        (Some("double"), 1, false) => ScalarType::LongDouble,
        (Some("int") | Some("short") | None, 0, false) => ScalarType::Int,
        (Some("int") | Some("short") | None, 0, true) => ScalarType::UnsignedInt,
        (Some("int") | None, 1, false) => ScalarType::Long,
        (Some("int") | None, 1, true) => ScalarType::UnsignedLong,
        (Some("int") | None, 2, false) => ScalarType::LongLong,
        (Some("int") | None, 2, true) => ScalarType::UnsignedLongLong,
        _ => return None,
    };
    Some(ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::source::FileId;

    fn eval(src: &str) -> EvalResult {
        let tokens = tokenize(src.as_bytes(), FileId::default()).unwrap();
        ConstEvaluator::new(&tokens).evaluate()
    }

    #[test]
    fn test_literal_types() {
        assert_eq!(eval("1.653").unwrap().ty, ScalarType::Double);
        assert_eq!(eval("5").unwrap().ty, ScalarType::Int);
        assert_eq!(eval("5u").unwrap().ty, ScalarType::UnsignedInt);
        assert_eq!(eval("2.0f").unwrap().ty, ScalarType::Float);
        assert_eq!(eval("'x'").unwrap().ty, ScalarType::Char);
        assert_eq!(eval("true").unwrap().ty, ScalarType::Bool);
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        let v = eval("(1 << 4) | 2 * 3").unwrap();
        assert_eq!(v.value, ConstValue::Int(22));
        assert_eq!(v.ty, ScalarType::Int);
        assert_eq!(eval("10 > 3 ? 7 : 9").unwrap().value, ConstValue::Int(7));
        assert_eq!(eval("-(3) + 1").unwrap().value, ConstValue::Int(-2));
    }

    #[test]
    fn test_mixed_types() {
        let v = eval("1 + 2.5").unwrap();
        assert_eq!(v.ty, ScalarType::Double);
        assert_eq!(v.value, ConstValue::Float(3.5));

        let v = eval("1u + -1").unwrap();
        assert_eq!(v.ty, ScalarType::UnsignedInt);
        assert!(v.ambiguous);
    }

    #[test]
    fn test_large_literal_is_ambiguous() {
        let v = eval("4000000000").unwrap();
        assert_eq!(v.ty, ScalarType::LongLong);
        assert!(v.ambiguous);
    }

    #[test]
    fn test_cast() {
        let v = eval("(unsigned long)1").unwrap();
        assert_eq!(v.ty, ScalarType::UnsignedLong);
    }

    #[test]
    fn test_not_constant() {
        assert_eq!(eval("x + 1").unwrap_err(), EvalError::UnknownIdentifier("x".into()));
        assert!(matches!(eval("x++").unwrap_err(), EvalError::UnknownIdentifier(_)));
        assert!(matches!(eval("f(1)").unwrap_err(), EvalError::NotConstant(_)));
        assert!(matches!(eval("1 = 2").unwrap_err(), EvalError::SideEffect(_)));
        assert!(matches!(eval("\"str\"").unwrap_err(), EvalError::NotConstant(_)));
        assert!(matches!(eval("sizeof(int)").unwrap_err(), EvalError::NotConstant(_)));
        assert_eq!(eval("1 / 0").unwrap_err(), EvalError::DivisionByZero);
        assert_eq!(eval("defined(FOO)").unwrap_err(), EvalError::Defined);
    }
}
