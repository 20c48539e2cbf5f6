use crate::error::{CompileError, LexError, Result};
use crate::source::{FileId, SourceLocation, Span};
use crate::token::{FloatSuffix, IntSuffix, StrPrefix, Token, TokenKind};

/// Lexer
///
/// バックスラッシュ改行（継続行）は透過的に読み飛ばし、改行は
/// ディレクティブ終端の検出のため独立したトークンとして返す。
pub struct Lexer {
    source: Vec<u8>,
    pos: usize,
    line: u32,
    column: u32,
    file_id: FileId,
    /// 現在スキャン中のトークンの綴り
    lexeme: Vec<u8>,
}

impl Lexer {
    /// 新しいLexerを作成
    pub fn new(source: impl Into<Vec<u8>>, file_id: FileId) -> Self {
        Self {
            source: source.into(),
            pos: 0,
            line: 1,
            column: 1,
            file_id,
            lexeme: Vec::new(),
        }
    }

    /// 現在位置を取得
    pub fn current_location(&self) -> SourceLocation {
        SourceLocation::new(self.file_id, self.line, self.column)
    }

    /// ファイルIDを取得
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// 現在のバイトオフセット
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// 次のトークンを取得
    pub fn next_token(&mut self) -> Result<Token> {
        let mut leading_space = false;

        loop {
            self.skip_continuations();
            match (self.peek(), self.peek_n(1)) {
                (Some(b' ' | b'\t' | b'\r' | b'\x0c' | b'\x0b'), _) => {
                    self.bump();
                    leading_space = true;
                }
                (Some(b'/'), Some(b'/')) => {
                    self.skip_line_comment();
                    leading_space = true;
                }
                (Some(b'/'), Some(b'*')) => {
                    self.skip_block_comment()?;
                    leading_space = true;
                }
                _ => break,
            }
        }

        let start = self.pos;
        let (line, column) = (self.line, self.column);
        self.lexeme.clear();
        let kind = self.scan_token_kind()?;

        let span = Span::new(self.file_id, start, self.pos, line, column);
        let lexeme = String::from_utf8_lossy(&self.lexeme).into_owned();
        let mut token = Token::new(kind, lexeme, span);
        token.leading_space = leading_space;
        Ok(token)
    }

    /// 論理行の残りをトークン化せずに読み飛ばす（#error, 無効ブランチ用）
    ///
    /// 行内で始まるブロックコメントは閉じるまで読み進める。
    /// 終端の改行は消費しない。
    pub fn skip_rest_of_line(&mut self) -> Result<()> {
        loop {
            self.skip_continuations();
            match (self.peek(), self.peek_n(1)) {
                (None, _) | (Some(b'\n'), _) => return Ok(()),
                (Some(b'/'), Some(b'*')) => self.skip_block_comment()?,
                (Some(b'/'), Some(b'/')) => self.skip_line_comment(),
                _ => {
                    self.bump();
                }
            }
        }
    }

    /// 現在の文字をピーク
    fn peek(&self) -> Option<u8> {
        self.peek_n(0)
    }

    /// n文字先をピーク（継続行はスキップして数える）
    fn peek_n(&self, n: usize) -> Option<u8> {
        let mut pos = self.pos;
        let mut remaining = n;
        loop {
            pos += continuation_len(&self.source, pos);
            let c = *self.source.get(pos)?;
            if remaining == 0 {
                return Some(c);
            }
            remaining -= 1;
            pos += 1;
        }
    }

    /// 継続行を読み飛ばす
    fn skip_continuations(&mut self) {
        loop {
            let len = continuation_len(&self.source, self.pos);
            if len == 0 {
                break;
            }
            self.pos += len;
            self.line += 1;
            self.column = 1;
        }
    }

    /// 1文字進める（綴りに含めない）
    fn bump(&mut self) -> Option<u8> {
        self.skip_continuations();
        let c = *self.source.get(self.pos)?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// 1文字進めて綴りに追加
    fn advance(&mut self) -> Option<u8> {
        let c = self.bump()?;
        self.lexeme.push(c);
        Some(c)
    }

    /// 行コメントを読み飛ばす
    fn skip_line_comment(&mut self) {
        while self.peek().is_some_and(|c| c != b'\n') {
            self.bump();
        }
    }

    /// ブロックコメントを読み飛ばす
    fn skip_block_comment(&mut self) -> Result<()> {
        let loc = self.current_location();
        self.bump(); // /
        self.bump(); // *
        loop {
            match (self.peek(), self.peek_n(1)) {
                (Some(b'*'), Some(b'/')) => {
                    self.bump();
                    self.bump();
                    return Ok(());
                }
                (Some(_), _) => {
                    self.bump();
                }
                (None, _) => {
                    return Err(CompileError::Lex {
                        loc,
                        kind: LexError::UnterminatedComment,
                    });
                }
            }
        }
    }

    /// トークン種別をスキャン
    fn scan_token_kind(&mut self) -> Result<TokenKind> {
        let Some(c) = self.peek() else {
            return Ok(TokenKind::Eof);
        };

        match c {
            b'\n' => {
                self.bump();
                Ok(TokenKind::Newline)
            }
            // エンコーディング接頭辞付きリテラル（識別子より先にチェック）
            b'L' | b'u' | b'U' | b'R' if self.literal_prefix_len().is_some() => {
                self.scan_prefixed_literal()
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' | b'$' | 0x80..=0xff => self.scan_identifier(),
            b'0'..=b'9' => self.scan_number(),
            b'.' if self.peek_n(1).is_some_and(|c| c.is_ascii_digit()) => self.scan_number(),
            b'.' => Ok(self.scan_dot()),
            b'"' => self.scan_string(StrPrefix::None),
            b'\'' => self.scan_char(StrPrefix::None),
            b'+' => Ok(self.scan_operator(&[(b'+', TokenKind::PlusPlus), (b'=', TokenKind::PlusEq)], TokenKind::Plus)),
            b'-' => Ok(self.scan_operator(
                &[(b'-', TokenKind::MinusMinus), (b'=', TokenKind::MinusEq), (b'>', TokenKind::Arrow)],
                TokenKind::Minus,
            )),
            b'*' => Ok(self.scan_operator(&[(b'=', TokenKind::StarEq)], TokenKind::Star)),
            b'/' => Ok(self.scan_operator(&[(b'=', TokenKind::SlashEq)], TokenKind::Slash)),
            b'%' => Ok(self.scan_operator(&[(b'=', TokenKind::PercentEq)], TokenKind::Percent)),
            b'&' => Ok(self.scan_operator(&[(b'&', TokenKind::AmpAmp), (b'=', TokenKind::AmpEq)], TokenKind::Amp)),
            b'|' => Ok(self.scan_operator(&[(b'|', TokenKind::PipePipe), (b'=', TokenKind::PipeEq)], TokenKind::Pipe)),
            b'^' => Ok(self.scan_operator(&[(b'=', TokenKind::CaretEq)], TokenKind::Caret)),
            b'~' => Ok(self.scan_operator(&[], TokenKind::Tilde)),
            b'!' => Ok(self.scan_operator(&[(b'=', TokenKind::BangEq)], TokenKind::Bang)),
            b'=' => Ok(self.scan_operator(&[(b'=', TokenKind::EqEq)], TokenKind::Eq)),
            b'?' => Ok(self.scan_operator(&[], TokenKind::Question)),
            b':' => Ok(self.scan_operator(&[(b':', TokenKind::ColonColon)], TokenKind::Colon)),
            b',' => Ok(self.scan_operator(&[], TokenKind::Comma)),
            b';' => Ok(self.scan_operator(&[], TokenKind::Semi)),
            b'(' => Ok(self.scan_operator(&[], TokenKind::LParen)),
            b')' => Ok(self.scan_operator(&[], TokenKind::RParen)),
            b'[' => Ok(self.scan_operator(&[], TokenKind::LBracket)),
            b']' => Ok(self.scan_operator(&[], TokenKind::RBracket)),
            b'{' => Ok(self.scan_operator(&[], TokenKind::LBrace)),
            b'}' => Ok(self.scan_operator(&[], TokenKind::RBrace)),
            b'#' => Ok(self.scan_operator(&[(b'#', TokenKind::HashHash)], TokenKind::Hash)),
            b'<' => Ok(self.scan_shift(b'<', TokenKind::Lt, TokenKind::LtEq, TokenKind::LtLt, TokenKind::LtLtEq)),
            b'>' => Ok(self.scan_shift(b'>', TokenKind::Gt, TokenKind::GtEq, TokenKind::GtGt, TokenKind::GtGtEq)),
            _ => {
                let loc = self.current_location();
                self.bump();
                Err(CompileError::Lex {
                    loc,
                    kind: LexError::InvalidChar(c as char),
                })
            }
        }
    }

    /// 1文字演算子と、その後に続く1文字で決まる2文字演算子
    fn scan_operator(&mut self, continuations: &[(u8, TokenKind)], default: TokenKind) -> TokenKind {
        self.advance();
        if let Some(next) = self.peek() {
            for (c, kind) in continuations {
                if *c == next {
                    self.advance();
                    return kind.clone();
                }
            }
        }
        default
    }

    fn scan_dot(&mut self) -> TokenKind {
        self.advance();
        if self.peek() == Some(b'.') && self.peek_n(1) == Some(b'.') {
            self.advance();
            self.advance();
            TokenKind::Ellipsis
        } else {
            TokenKind::Dot
        }
    }

    /// < / > 系（<<= のような3文字まで）
    fn scan_shift(&mut self, c: u8, single: TokenKind, eq: TokenKind, double: TokenKind, double_eq: TokenKind) -> TokenKind {
        self.advance();
        match self.peek() {
            Some(n) if n == c => {
                self.advance();
                if self.peek() == Some(b'=') {
                    self.advance();
                    double_eq
                } else {
                    double
                }
            }
            Some(b'=') => {
                self.advance();
                eq
            }
            _ => single,
        }
    }

    /// 識別子またはキーワードをスキャン
    fn scan_identifier(&mut self) -> Result<TokenKind> {
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'$' || c >= 0x80 {
                self.advance();
            } else {
                break;
            }
        }

        let text = String::from_utf8_lossy(&self.lexeme).into_owned();
        Ok(TokenKind::from_keyword(&text).unwrap_or(TokenKind::Ident(text)))
    }

    /// 文字列・文字リテラルの接頭辞長（L, u8, u, U, R とその組み合わせ）
    fn literal_prefix_len(&self) -> Option<usize> {
        let prefixes: [&[u8]; 9] = [b"u8R", b"LR", b"uR", b"UR", b"u8", b"R", b"L", b"u", b"U"];
        for prefix in prefixes {
            let matches = prefix.iter().enumerate().all(|(i, &p)| self.peek_n(i) == Some(p));
            if !matches {
                continue;
            }
            let quote = self.peek_n(prefix.len());
            let is_raw = prefix.ends_with(b"R");
            match quote {
                Some(b'"') => return Some(prefix.len()),
                Some(b'\'') if !is_raw && *prefix != *b"u8" => return Some(prefix.len()),
                _ => {}
            }
        }
        None
    }

    /// 接頭辞付きリテラルをスキャン
    fn scan_prefixed_literal(&mut self) -> Result<TokenKind> {
        let len = self.literal_prefix_len().unwrap_or(0);
        let mut prefix_bytes = Vec::with_capacity(len);
        for _ in 0..len {
            if let Some(c) = self.advance() {
                prefix_bytes.push(c);
            }
        }
        let is_raw = prefix_bytes.last() == Some(&b'R');
        let encoding = match prefix_bytes.first() {
            Some(b'L') => StrPrefix::Wide,
            Some(b'u') if prefix_bytes.get(1) == Some(&b'8') => StrPrefix::Utf8,
            Some(b'u') => StrPrefix::Utf16,
            Some(b'U') => StrPrefix::Utf32,
            _ => StrPrefix::None,
        };
        match self.peek() {
            Some(b'"') if is_raw => self.scan_raw_string(encoding),
            Some(b'"') => self.scan_string(encoding),
            _ => self.scan_char(encoding),
        }
    }

    /// 数値リテラルをスキャン
    fn scan_number(&mut self) -> Result<TokenKind> {
        let loc = self.current_location();
        let mut is_float = false;
        let mut radix = 10;

        if self.peek() == Some(b'0') && matches!(self.peek_n(1), Some(b'x' | b'X')) {
            radix = 16;
            self.advance();
            self.advance();
        } else if self.peek() == Some(b'0') && matches!(self.peek_n(1), Some(b'b' | b'B')) {
            radix = 2;
            self.advance();
            self.advance();
        }

        let digits_start = self.lexeme.len();
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_hexdigit() && radix == 16 => {
                    self.advance();
                }
                Some(c) if c.is_ascii_digit() => {
                    self.advance();
                }
                // C++14 桁区切り
                Some(b'\'') if self.peek_n(1).is_some_and(|c| c.is_ascii_hexdigit()) => {
                    self.advance();
                }
                Some(b'.') if radix == 10 => {
                    is_float = true;
                    self.advance();
                }
                Some(b'e' | b'E') if radix == 10 => {
                    is_float = true;
                    self.advance();
                    if matches!(self.peek(), Some(b'+' | b'-')) {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
        let digits: String = String::from_utf8_lossy(&self.lexeme[digits_start..])
            .chars()
            .filter(|&c| c != '\'')
            .collect();

        if is_float {
            let suffix = match self.peek() {
                Some(b'f' | b'F') => {
                    self.advance();
                    FloatSuffix::Float
                }
                Some(b'l' | b'L') => {
                    self.advance();
                    FloatSuffix::Long
                }
                _ => FloatSuffix::None,
            };
            let value: f64 = digits.parse().map_err(|_| self.invalid_number(&loc))?;
            return Ok(TokenKind::FloatLit { value, suffix });
        }

        // サフィックス: u/U, l/L, ll/LL（順不同）
        let mut suffix = IntSuffix::NONE;
        loop {
            match self.peek() {
                Some(b'u' | b'U') if !suffix.unsigned => {
                    suffix.unsigned = true;
                    self.advance();
                }
                Some(b'l' | b'L') if suffix.long == 0 => {
                    self.advance();
                    suffix.long = 1;
                    if matches!(self.peek(), Some(b'l' | b'L')) {
                        self.advance();
                        suffix.long = 2;
                    }
                }
                _ => break,
            }
        }
        if self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
            // ユーザー定義リテラルなど
            while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
                self.advance();
            }
            return Err(self.invalid_number(&loc));
        }

        if radix == 10 && digits.len() > 1 && digits.starts_with('0') {
            radix = 8;
        }
        let value = u64::from_str_radix(if digits.is_empty() { "0" } else { &digits }, radix)
            .map_err(|_| self.invalid_number(&loc))?;
        Ok(TokenKind::IntLit { value, suffix })
    }

    fn invalid_number(&self, loc: &SourceLocation) -> CompileError {
        CompileError::Lex {
            loc: loc.clone(),
            kind: LexError::InvalidNumber(String::from_utf8_lossy(&self.lexeme).into_owned()),
        }
    }

    /// 文字列リテラルをスキャン（エスケープは解除せず中身をそのまま保持）
    fn scan_string(&mut self, prefix: StrPrefix) -> Result<TokenKind> {
        let loc = self.current_location();
        self.advance(); // "
        let content_start = self.lexeme.len();
        loop {
            match self.peek() {
                Some(b'"') => {
                    let raw = String::from_utf8_lossy(&self.lexeme[content_start..]).into_owned();
                    self.advance();
                    return Ok(TokenKind::StringLit { prefix, raw });
                }
                Some(b'\\') => {
                    self.advance();
                    if self.peek().is_some_and(|c| c != b'\n') {
                        self.advance();
                    }
                }
                Some(b'\n') | None => {
                    return Err(CompileError::Lex {
                        loc,
                        kind: LexError::UnterminatedString,
                    });
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
    }

    /// 生文字列リテラル R"delim(...)delim" をスキャン
    fn scan_raw_string(&mut self, prefix: StrPrefix) -> Result<TokenKind> {
        let loc = self.current_location();
        self.advance(); // "
        let mut delim = Vec::new();
        while let Some(c) = self.peek() {
            if c == b'(' {
                break;
            }
            if c == b'\n' || c == b'"' || delim.len() > 16 {
                return Err(CompileError::Lex {
                    loc,
                    kind: LexError::UnterminatedString,
                });
            }
            delim.push(c);
            self.advance();
        }
        self.advance(); // (
        let content_start = self.lexeme.len();
        loop {
            // 生文字列の中では継続行も文字として扱うため、位置を直接見る
            let Some(&c) = self.source.get(self.pos) else {
                return Err(CompileError::Lex {
                    loc,
                    kind: LexError::UnterminatedString,
                });
            };
            if c == b')' {
                let rest = &self.source[self.pos + 1..];
                if rest.starts_with(&delim) && rest.get(delim.len()) == Some(&b'"') {
                    let raw = String::from_utf8_lossy(&self.lexeme[content_start..]).into_owned();
                    for _ in 0..delim.len() + 2 {
                        self.raw_advance();
                    }
                    return Ok(TokenKind::StringLit { prefix, raw });
                }
            }
            self.raw_advance();
        }
    }

    /// 継続行を解釈せずに1バイト進める
    fn raw_advance(&mut self) {
        if let Some(&c) = self.source.get(self.pos) {
            self.pos += 1;
            self.lexeme.push(c);
            if c == b'\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    /// 文字リテラルをスキャン
    fn scan_char(&mut self, prefix: StrPrefix) -> Result<TokenKind> {
        let loc = self.current_location();
        self.advance(); // '

        let value = match self.peek() {
            Some(b'\'') => {
                return Err(CompileError::Lex {
                    loc,
                    kind: LexError::EmptyCharLit,
                });
            }
            Some(b'\\') => {
                self.advance();
                self.scan_escape_value()
            }
            Some(b'\n') | None => {
                return Err(CompileError::Lex {
                    loc,
                    kind: LexError::UnterminatedChar,
                });
            }
            Some(c) => {
                self.advance();
                c as u32
            }
        };

        // 複数文字リテラル 'ab' も受け付ける（値は先頭文字）
        loop {
            match self.peek() {
                Some(b'\'') => {
                    self.advance();
                    return Ok(TokenKind::CharLit { value, prefix });
                }
                Some(b'\n') | None => {
                    return Err(CompileError::Lex {
                        loc,
                        kind: LexError::UnterminatedChar,
                    });
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
    }

    /// エスケープシーケンスの値（\ の直後から）
    fn scan_escape_value(&mut self) -> u32 {
        let Some(c) = self.advance() else {
            return 0;
        };
        match c {
            b'n' => 0x0A,
            b't' => 0x09,
            b'r' => 0x0D,
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0C,
            b'v' => 0x0B,
            b'x' => {
                let mut value = 0u32;
                while let Some(d) = self.peek().and_then(|c| (c as char).to_digit(16)) {
                    value = value.wrapping_mul(16).wrapping_add(d);
                    self.advance();
                }
                value
            }
            b'0'..=b'7' => {
                let mut value = (c - b'0') as u32;
                for _ in 0..2 {
                    match self.peek() {
                        Some(d @ b'0'..=b'7') => {
                            value = value * 8 + (d - b'0') as u32;
                            self.advance();
                        }
                        _ => break,
                    }
                }
                value
            }
            other => other as u32,
        }
    }
}

/// pos から始まる継続行（\ + 改行）の長さ
fn continuation_len(source: &[u8], pos: usize) -> usize {
    match (source.get(pos), source.get(pos + 1), source.get(pos + 2)) {
        (Some(b'\\'), Some(b'\n'), _) => 2,
        (Some(b'\\'), Some(b'\r'), Some(b'\n')) => 3,
        _ => 0,
    }
}

/// ソース全体をトークン化する（Eof は含まない）
pub fn tokenize(source: &[u8], file_id: FileId) -> Result<Vec<Token>> {
    let mut lexer = Lexer::new(source, file_id);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        if matches!(token.kind, TokenKind::Eof) {
            break;
        }
        tokens.push(token);
    }
    Ok(tokens)
}
