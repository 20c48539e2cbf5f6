use std::path::PathBuf;

use thiserror::Error;

use crate::source::{FileRegistry, Location, SourceLocation};

/// レキサーエラー
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexError {
    /// 閉じられていないブロックコメント
    #[error("unterminated block comment")]
    UnterminatedComment,
    /// 閉じられていない文字列リテラル
    #[error("unterminated string literal")]
    UnterminatedString,
    /// 閉じられていない文字リテラル
    #[error("unterminated character literal")]
    UnterminatedChar,
    /// 空の文字リテラル
    #[error("empty character literal")]
    EmptyCharLit,
    /// 不正な文字
    #[error("invalid character: {0:?}")]
    InvalidChar(char),
    /// 不正な数値リテラル
    #[error("invalid number: {0}")]
    InvalidNumber(String),
}

/// ディレクティブの構文エラー（翻訳単位の解析を中止する）
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// 不正なディレクティブ
    #[error("invalid directive: #{0}")]
    InvalidDirective(String),
    /// #define / #undef の後にマクロ名がない
    #[error("macro name missing after #{0}")]
    MissingMacroName(&'static str),
    /// 不正な仮引数リスト
    #[error("invalid macro parameter list: {0}")]
    InvalidMacroParams(String),
    /// 対応する#ifがない#endif
    #[error("#endif without matching #if")]
    UnmatchedEndif,
    /// 対応する#ifがない#else
    #[error("#else without matching #if")]
    UnmatchedElse,
    /// #elifが#elseの後に出現
    #[error("#elif after #else")]
    ElifAfterElse,
    /// 対応する#endifがない
    #[error("missing #endif")]
    MissingEndif,
    /// インクルードが深すぎる
    #[error("#include nested too deeply (limit {0})")]
    IncludeTooDeep(usize),
}

/// 位置付きの解析エラー（ファイルIDのまま）
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("{}:{}:{}: lexer error: {kind}", .loc.file_id.as_u32(), .loc.line, .loc.column)]
    Lex { loc: SourceLocation, kind: LexError },
    #[error("{}:{}:{}: parse error: {kind}", .loc.file_id.as_u32(), .loc.line, .loc.column)]
    Parse { loc: SourceLocation, kind: ParseError },
}

impl CompileError {
    /// エラーが発生した位置を取得
    pub fn loc(&self) -> &SourceLocation {
        match self {
            CompileError::Lex { loc, .. } => loc,
            CompileError::Parse { loc, .. } => loc,
        }
    }

    /// ファイル名を解決して翻訳単位エラーに変換
    pub fn into_unit_error(self, files: &FileRegistry) -> UnitError {
        let resolve = |loc: &SourceLocation| Location {
            path: files.get_path(loc.file_id).to_path_buf(),
            line: loc.line,
            column: loc.column,
        };
        match self {
            CompileError::Lex { loc, kind } => UnitError::Lex {
                loc: resolve(&loc),
                kind,
            },
            CompileError::Parse { loc, kind } => UnitError::Parse {
                loc: resolve(&loc),
                kind,
            },
        }
    }
}

/// 翻訳単位の解析を中止させるエラー
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("{loc}: lexer error: {kind}")]
    Lex { loc: Location, kind: LexError },
    #[error("{loc}: parse error: {kind}")]
    Parse { loc: Location, kind: ParseError },
    #[error("I/O error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 設定ファイルのエラー
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result型エイリアス
pub type Result<T> = std::result::Result<T, CompileError>;
