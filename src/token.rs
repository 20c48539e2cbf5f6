use crate::source::Span;

/// 整数リテラルのサフィックス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntSuffix {
    pub unsigned: bool,
    /// 0 = なし, 1 = l, 2 = ll
    pub long: u8,
}

impl IntSuffix {
    pub const NONE: IntSuffix = IntSuffix { unsigned: false, long: 0 };
}

/// 浮動小数点リテラルのサフィックス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FloatSuffix {
    #[default]
    None,
    /// f / F
    Float,
    /// l / L
    Long,
}

/// 文字列・文字リテラルのエンコーディング接頭辞
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
pub enum StrPrefix {
    #[default]
    None,
    /// L"..."
    Wide,
    /// u8"..."
    Utf8,
    /// u"..."
    Utf16,
    /// U"..."
    Utf32,
}

/// トークン種別
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // === リテラル ===
    /// 整数リテラル
    IntLit { value: u64, suffix: IntSuffix },
    /// 浮動小数点リテラル
    FloatLit { value: f64, suffix: FloatSuffix },
    /// 文字リテラル
    CharLit { value: u32, prefix: StrPrefix },
    /// 文字列リテラル（エスケープ解除前の中身）
    StringLit { prefix: StrPrefix, raw: String },

    // === 識別子 ===
    Ident(String),

    // === キーワード ===
    // スコープを作るもの
    KwClass,
    KwStruct,
    KwUnion,
    KwEnum,
    KwNamespace,
    // アクセス指定子
    KwPublic,
    KwPrivate,
    KwProtected,
    // 宣言
    KwTemplate,
    KwTypename,
    KwTypedef,
    KwUsing,
    KwExtern,
    KwStatic,
    KwConst,
    KwConstexpr,
    KwVolatile,
    KwInline,
    KwOperator,
    KwStaticAssert,
    // 型指定子
    KwAuto,
    KwBool,
    KwChar,
    KwDouble,
    KwFloat,
    KwInt,
    KwLong,
    KwShort,
    KwSigned,
    KwUnsigned,
    KwVoid,
    // 式
    KwSizeof,
    KwAlignof,
    KwTrue,
    KwFalse,
    KwNullptr,
    KwNew,
    KwDelete,
    KwThrow,
    // 制御フロー
    KwBreak,
    KwCase,
    KwContinue,
    KwDefault,
    KwDo,
    KwElse,
    KwFor,
    KwGoto,
    KwIf,
    KwReturn,
    KwSwitch,
    KwWhile,

    // === 演算子 ===
    Plus,       // +
    Minus,      // -
    Star,       // *
    Slash,      // /
    Percent,    // %
    Amp,        // &
    Pipe,       // |
    Caret,      // ^
    Tilde,      // ~
    LtLt,       // <<
    GtGt,       // >>
    Bang,       // !
    AmpAmp,     // &&
    PipePipe,   // ||
    Lt,         // <
    Gt,         // >
    LtEq,       // <=
    GtEq,       // >=
    EqEq,       // ==
    BangEq,     // !=
    Eq,         // =
    PlusEq,     // +=
    MinusEq,    // -=
    StarEq,     // *=
    SlashEq,    // /=
    PercentEq,  // %=
    AmpEq,      // &=
    PipeEq,     // |=
    CaretEq,    // ^=
    LtLtEq,     // <<=
    GtGtEq,     // >>=
    PlusPlus,   // ++
    MinusMinus, // --
    Question,   // ?
    Colon,      // :
    ColonColon, // ::
    Arrow,      // ->
    Dot,        // .
    Ellipsis,   // ...

    // === 区切り記号 ===
    Comma,      // ,
    Semi,       // ;
    LParen,     // (
    RParen,     // )
    LBracket,   // [
    RBracket,   // ]
    LBrace,     // {
    RBrace,     // }

    // === プリプロセッサ用 ===
    Hash,       // #
    HashHash,   // ##

    // === 特殊 ===
    /// 改行（ディレクティブの終端）
    Newline,
    /// ファイル終端
    Eof,
}

impl TokenKind {
    /// キーワード文字列からTokenKindへの変換
    pub fn from_keyword(s: &str) -> Option<TokenKind> {
        let kw = match s {
            "class" => TokenKind::KwClass,
            "struct" => TokenKind::KwStruct,
            "union" => TokenKind::KwUnion,
            "enum" => TokenKind::KwEnum,
            "namespace" => TokenKind::KwNamespace,
            "public" => TokenKind::KwPublic,
            "private" => TokenKind::KwPrivate,
            "protected" => TokenKind::KwProtected,
            "template" => TokenKind::KwTemplate,
            "typename" => TokenKind::KwTypename,
            "typedef" => TokenKind::KwTypedef,
            "using" => TokenKind::KwUsing,
            "extern" => TokenKind::KwExtern,
            "static" => TokenKind::KwStatic,
            "const" => TokenKind::KwConst,
            "constexpr" => TokenKind::KwConstexpr,
            "volatile" => TokenKind::KwVolatile,
            "inline" | "__inline" | "__inline__" => TokenKind::KwInline,
            "operator" => TokenKind::KwOperator,
            "static_assert" | "_Static_assert" => TokenKind::KwStaticAssert,
            "auto" => TokenKind::KwAuto,
            "bool" | "_Bool" => TokenKind::KwBool,
            "char" => TokenKind::KwChar,
            "double" => TokenKind::KwDouble,
            "float" => TokenKind::KwFloat,
            "int" => TokenKind::KwInt,
            "long" => TokenKind::KwLong,
            "short" => TokenKind::KwShort,
            "signed" => TokenKind::KwSigned,
            "unsigned" => TokenKind::KwUnsigned,
            "void" => TokenKind::KwVoid,
            "sizeof" => TokenKind::KwSizeof,
            "alignof" | "_Alignof" => TokenKind::KwAlignof,
            "true" => TokenKind::KwTrue,
            "false" => TokenKind::KwFalse,
            "nullptr" => TokenKind::KwNullptr,
            "new" => TokenKind::KwNew,
            "delete" => TokenKind::KwDelete,
            "throw" => TokenKind::KwThrow,
            "break" => TokenKind::KwBreak,
            "case" => TokenKind::KwCase,
            "continue" => TokenKind::KwContinue,
            "default" => TokenKind::KwDefault,
            "do" => TokenKind::KwDo,
            "else" => TokenKind::KwElse,
            "for" => TokenKind::KwFor,
            "goto" => TokenKind::KwGoto,
            "if" => TokenKind::KwIf,
            "return" => TokenKind::KwReturn,
            "switch" => TokenKind::KwSwitch,
            "while" => TokenKind::KwWhile,
            _ => return None,
        };
        Some(kw)
    }

    /// 組み込み型のキーワードか
    pub fn is_type_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::KwAuto
                | TokenKind::KwBool
                | TokenKind::KwChar
                | TokenKind::KwDouble
                | TokenKind::KwFloat
                | TokenKind::KwInt
                | TokenKind::KwLong
                | TokenKind::KwShort
                | TokenKind::KwSigned
                | TokenKind::KwUnsigned
                | TokenKind::KwVoid
                | TokenKind::KwConst
                | TokenKind::KwVolatile
        )
    }

    /// 文を構成するキーワードか（式マクロには現れない）
    pub fn is_statement_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::KwBreak
                | TokenKind::KwCase
                | TokenKind::KwContinue
                | TokenKind::KwDefault
                | TokenKind::KwDo
                | TokenKind::KwElse
                | TokenKind::KwFor
                | TokenKind::KwGoto
                | TokenKind::KwIf
                | TokenKind::KwReturn
                | TokenKind::KwSwitch
                | TokenKind::KwWhile
                | TokenKind::KwTypedef
                | TokenKind::KwUsing
                | TokenKind::KwStatic
                | TokenKind::KwExtern
        )
    }

    /// 代入・インクリメント系（副作用のある演算子）か
    pub fn is_mutating_op(&self) -> bool {
        matches!(
            self,
            TokenKind::Eq
                | TokenKind::PlusEq
                | TokenKind::MinusEq
                | TokenKind::StarEq
                | TokenKind::SlashEq
                | TokenKind::PercentEq
                | TokenKind::AmpEq
                | TokenKind::PipeEq
                | TokenKind::CaretEq
                | TokenKind::LtLtEq
                | TokenKind::GtGtEq
                | TokenKind::PlusPlus
                | TokenKind::MinusMinus
        )
    }

    /// 識別子名（キーワードは含まない）
    pub fn ident(&self) -> Option<&str> {
        match self {
            TokenKind::Ident(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            TokenKind::IntLit { .. }
                | TokenKind::FloatLit { .. }
                | TokenKind::CharLit { .. }
                | TokenKind::StringLit { .. }
                | TokenKind::KwTrue
                | TokenKind::KwFalse
                | TokenKind::KwNullptr
        )
    }
}

/// 位置情報付きトークン
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// ソース上の綴り（継続行は除去済み）
    pub lexeme: String,
    pub span: Span,
    /// マクロ展開の深さ（0 = ソースそのもの）
    pub depth: u32,
    /// 直前に空白（またはコメント）があったか
    pub leading_space: bool,
}

impl Token {
    /// 新しいトークンを作成
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            span,
            depth: 0,
            leading_space: false,
        }
    }

    /// 展開結果として複製（深さを1つ増やす）
    pub fn expanded(&self, depth: u32) -> Self {
        Self {
            depth,
            ..self.clone()
        }
    }

    pub fn is_ident(&self, name: &str) -> bool {
        self.kind.ident() == Some(name)
    }
}

/// トークン列を元の空白情報に従って連結
pub fn join_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 && token.leading_space {
            out.push(' ');
        }
        out.push_str(&token.lexeme);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_lookup() {
        assert_eq!(TokenKind::from_keyword("class"), Some(TokenKind::KwClass));
        assert_eq!(TokenKind::from_keyword("__inline__"), Some(TokenKind::KwInline));
        assert_eq!(TokenKind::from_keyword("NumTurns"), None);
    }

    #[test]
    fn test_join_tokens_keeps_spacing() {
        let span = Span::default();
        let mut a = Token::new(TokenKind::Ident("f".into()), "f", span.clone());
        a.leading_space = true;
        let lp = Token::new(TokenKind::LParen, "(", span.clone());
        let mut x = Token::new(TokenKind::Ident("x".into()), "x", span.clone());
        x.leading_space = false;
        let mut plus = Token::new(TokenKind::Plus, "+", span.clone());
        plus.leading_space = true;
        let mut one = Token::new(TokenKind::IntLit { value: 1, suffix: IntSuffix::NONE }, "1", span.clone());
        one.leading_space = true;
        let rp = Token::new(TokenKind::RParen, ")", span);
        assert_eq!(join_tokens(&[a, lp, x, plus, one, rp]), "f(x + 1)");
    }
}
