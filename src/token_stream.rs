//! トークンストリーム
//!
//! 翻訳単位をディレクティブ境界付きのトークン列として遅延的に生成する。
//! 条件コンパイルの入れ子を追跡して各トークン・ディレクティブの到達性
//! （無条件・条件付き・無効）を記録し、#include はソースプロバイダ経由で
//! 展開する。ディレクティブは黙って捨てず、#define / #undef 以外は
//! `RawDirective` として返す。

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::const_expr::ConstEvaluator;
use crate::engine::SourceProvider;
use crate::error::{CompileError, ParseError, Result, UnitError};
use crate::lexer::Lexer;
use crate::macro_def::{Directive, DirectiveKind};
use crate::source::{FileRegistry, SourceLocation, Span};
use crate::token::{Token, TokenKind};

/// 到達性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Reachability {
    /// 常に有効
    Unconditional,
    /// 条件次第で有効
    Conditional,
    /// 常に無効（#if 0 など）
    Disabled,
}

/// 条件コンパイルの分岐経路の1段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BranchStep {
    /// #if ... #endif のグループ番号（翻訳単位内で一意）
    pub group: u32,
    /// グループ内の分岐番号（#if = 0, 以降 #elif / #else ごとに増える）
    pub branch: u32,
}

/// 2つの分岐経路が排他的か（同じグループの別分岐を通る）
pub fn branches_exclusive(a: &[BranchStep], b: &[BranchStep]) -> bool {
    for (x, y) in a.iter().zip(b) {
        if x.group != y.group {
            return false;
        }
        if x.branch != y.branch {
            return true;
        }
    }
    false
}

/// コード中のトークン（ディレクティブ行は含まない）
#[derive(Debug, Clone)]
pub struct CodeToken {
    pub token: Token,
    /// 翻訳単位内の通し位置
    pub position: usize,
    pub reachability: Reachability,
}

/// #define / #undef 以外のディレクティブ
#[derive(Debug, Clone)]
pub struct RawDirective {
    /// ディレクティブ名（空のディレクティブは ""）
    pub name: String,
    /// ディレクティブ名より後のトークン（#error などは空）
    pub tokens: Vec<Token>,
    pub span: Span,
    pub reachability: Reachability,
    pub position: usize,
}

impl RawDirective {
    /// 条件式中で参照されているマクロ名のトークン
    pub fn condition_references(&self) -> Vec<&Token> {
        match self.name.as_str() {
            "if" | "elif" => self
                .tokens
                .iter()
                .filter(|t| matches!(&t.kind, TokenKind::Ident(name) if name != "defined"))
                .collect(),
            "ifdef" | "ifndef" | "elifdef" | "elifndef" => {
                self.tokens.iter().take(1).filter(|t| t.kind.ident().is_some()).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// ストリームの要素
#[derive(Debug, Clone)]
pub enum StreamItem {
    Token(CodeToken),
    Directive(Directive),
    Raw(RawDirective),
}

/// ストリームの設定
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub follow_includes: bool,
    pub max_include_depth: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            follow_includes: true,
            max_include_depth: 32,
        }
    }
}

/// 分岐の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchState {
    /// 確実に有効
    Taken,
    /// 有効かどうか静的には決まらない
    Maybe,
    /// 確実に無効
    Skipped,
}

/// 条件コンパイル状態
#[derive(Debug, Clone)]
struct CondState {
    group: u32,
    branch: u32,
    state: BranchState,
    any_taken: bool,
    any_maybe: bool,
    seen_else: bool,
    /// インクルードガード（到達性に影響しない）
    is_guard: bool,
}

/// インクルードガードの検出状態
#[derive(Debug, Clone, PartialEq, Eq)]
enum GuardState {
    /// ファイル先頭（まだ何も見ていない）
    Start,
    /// 先頭の #ifndef X を見た（次が #define X なら確定）
    Candidate { name: String, cond_index: usize },
    Done,
}

/// 入力ファイル
struct FileFrame {
    lexer: Lexer,
    path: PathBuf,
    at_line_start: bool,
    guard: GuardState,
    /// このファイルに入った時点の条件スタックの深さ
    cond_base: usize,
}

/// 翻訳単位のトークンストリーム（遅延評価）
pub struct TokenStream<'p> {
    provider: &'p dyn SourceProvider,
    options: StreamOptions,
    files: FileRegistry,
    stack: Vec<FileFrame>,
    conds: Vec<CondState>,
    entered: HashSet<PathBuf>,
    position: usize,
    next_group: u32,
    done: bool,
}

impl<'p> TokenStream<'p> {
    /// メインファイルのソースからストリームを作成
    pub fn new(provider: &'p dyn SourceProvider, options: StreamOptions, path: PathBuf, source: Vec<u8>) -> Self {
        let mut files = FileRegistry::new();
        let file_id = files.register(path.clone());
        let mut entered = HashSet::new();
        entered.insert(path.clone());
        Self {
            provider,
            options,
            files,
            stack: vec![FileFrame {
                lexer: Lexer::new(source, file_id),
                path,
                at_line_start: true,
                guard: GuardState::Start,
                cond_base: 0,
            }],
            conds: Vec::new(),
            entered,
            position: 0,
            next_group: 0,
            done: false,
        }
    }

    /// ファイルレジストリ
    pub fn files(&self) -> &FileRegistry {
        &self.files
    }

    /// ストリームを消費してファイルレジストリを取り出す
    pub fn into_files(self) -> FileRegistry {
        self.files
    }

    /// 次に割り当てる通し位置（終了後は翻訳単位の末尾位置）
    pub fn position(&self) -> usize {
        self.position
    }

    fn next_position(&mut self) -> usize {
        let position = self.position;
        self.position += 1;
        position
    }

    fn reachability_of(conds: &[CondState]) -> Reachability {
        let mut reach = Reachability::Unconditional;
        for cond in conds.iter().filter(|c| !c.is_guard) {
            match cond.state {
                BranchState::Skipped => return Reachability::Disabled,
                BranchState::Maybe => reach = Reachability::Conditional,
                BranchState::Taken => {}
            }
        }
        reach
    }

    /// 現在の到達性
    fn reachability(&self) -> Reachability {
        Self::reachability_of(&self.conds)
    }

    /// 現在のグループを除いた到達性（#elif / #else / #endif 用）
    fn outer_reachability(&self) -> Reachability {
        let len = self.conds.len().saturating_sub(1);
        Self::reachability_of(&self.conds[..len])
    }

    fn branch_path(&self) -> Vec<BranchStep> {
        self.conds
            .iter()
            .filter(|c| !c.is_guard)
            .map(|c| BranchStep {
                group: c.group,
                branch: c.branch,
            })
            .collect()
    }

    fn frame(&mut self) -> &mut FileFrame {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn parse_error(loc: SourceLocation, kind: ParseError) -> CompileError {
        CompileError::Parse { loc, kind }
    }

    /// インクルードガード候補を確定または解除する
    fn settle_guard(&mut self, defines: Option<&str>) -> bool {
        let guard = std::mem::replace(&mut self.frame().guard, GuardState::Done);
        match guard {
            GuardState::Candidate { name, cond_index } => {
                if defines == Some(name.as_str()) {
                    return true;
                }
                if let Some(cond) = self.conds.get_mut(cond_index) {
                    cond.is_guard = false;
                }
                false
            }
            _ => false,
        }
    }

    /// 行末までのトークンを読む（改行は消費する）。行末オフセットも返す
    fn read_line(&mut self) -> Result<(Vec<Token>, usize)> {
        let frame = self.frame();
        let mut tokens = Vec::new();
        loop {
            let token = frame.lexer.next_token()?;
            match token.kind {
                TokenKind::Newline => return Ok((tokens, token.span.end)),
                TokenKind::Eof => return Ok((tokens, frame.lexer.offset())),
                _ => tokens.push(token),
            }
        }
    }

    /// 行の残りを読み飛ばす（改行は消費する）。改行前のオフセットを返す
    fn skip_line(&mut self) -> Result<usize> {
        let frame = self.frame();
        frame.lexer.skip_rest_of_line()?;
        let end = frame.lexer.offset();
        frame.lexer.next_token()?;
        Ok(end)
    }

    /// ディレクティブを処理する。`hash` は行頭の `#`
    fn directive(&mut self, hash: Token) -> Result<Option<StreamItem>> {
        let name_token = self.frame().lexer.next_token()?;
        let name = match name_token.kind {
            TokenKind::Newline | TokenKind::Eof => {
                self.settle_guard(None);
                return Ok(Some(self.raw(String::new(), Vec::new(), hash.span)));
            }
            TokenKind::IntLit { .. } => {
                // # 123 "file" 形式の行マーカー
                let end = self.skip_line()?;
                self.settle_guard(None);
                let span = Span { end, ..hash.span };
                return Ok(Some(self.raw("line".to_string(), Vec::new(), span)));
            }
            _ => name_token.lexeme.clone(),
        };
        let loc = hash.span.loc();
        let disabled = self.reachability() == Reachability::Disabled;

        match name.as_str() {
            "define" | "undef" => {
                let (tokens, line_end) = match self.read_line() {
                    Ok(line) => line,
                    Err(err) if disabled => {
                        debug!(error = %err, "unlexable directive in disabled branch");
                        let end = self.skip_line()?;
                        self.settle_guard(None);
                        let span = Span { end, ..hash.span };
                        return Ok(Some(self.raw(name, Vec::new(), span)));
                    }
                    Err(err) => return Err(err),
                };
                let directive = self.macro_directive(&name, &hash, tokens, line_end)?;
                Ok(Some(StreamItem::Directive(directive)))
            }
            "if" | "elif" | "ifdef" | "ifndef" | "elifdef" | "elifndef" | "else" | "endif" => {
                let (tokens, _) = self.read_line()?;
                let span = line_span(&hash, &name_token, &tokens);
                self.conditional(&name, tokens, span, loc).map(Some)
            }
            "include" | "include_next" | "import" => {
                self.settle_guard(None);
                let (tokens, _) = self.read_line()?;
                let span = line_span(&hash, &name_token, &tokens);
                self.include(name, tokens, span).map(Some)
            }
            "error" | "warning" | "pragma" | "line" | "ident" | "sccs" => {
                self.settle_guard(None);
                let end = self.skip_line()?;
                let span = Span { end, ..hash.span };
                Ok(Some(self.raw(name, Vec::new(), span)))
            }
            _ if disabled => {
                let end = self.skip_line()?;
                let span = Span { end, ..hash.span };
                Ok(Some(self.raw(name, Vec::new(), span)))
            }
            _ => Err(Self::parse_error(loc, ParseError::InvalidDirective(name))),
        }
    }

    fn raw(&mut self, name: String, tokens: Vec<Token>, span: Span) -> StreamItem {
        StreamItem::Raw(RawDirective {
            name,
            tokens,
            span,
            reachability: self.reachability(),
            position: self.next_position(),
        })
    }

    /// #define / #undef を解析
    fn macro_directive(&mut self, name: &str, hash: &Token, tokens: Vec<Token>, line_end: usize) -> Result<Directive> {
        let loc = hash.span.loc();
        let kind = if name == "define" {
            DirectiveKind::Define
        } else {
            DirectiveKind::Undef
        };
        let which = if kind == DirectiveKind::Define { "define" } else { "undef" };

        let mut iter = tokens.into_iter().peekable();
        let name_token = match iter.next() {
            Some(t) if is_identifier_like(&t) => t,
            _ => return Err(Self::parse_error(loc, ParseError::MissingMacroName(which))),
        };
        let mut span = hash.span.to(&name_token.span);

        let mut params = Vec::new();
        let mut is_function_like = false;
        let mut is_variadic = false;
        if kind == DirectiveKind::Define
            && iter.peek().is_some_and(|t| t.kind == TokenKind::LParen && !t.leading_space)
        {
            is_function_like = true;
            iter.next();
            let mut expect_param = true;
            loop {
                let Some(token) = iter.next() else {
                    return Err(Self::parse_error(
                        loc,
                        ParseError::InvalidMacroParams("missing ')'".to_string()),
                    ));
                };
                match &token.kind {
                    TokenKind::RParen if !expect_param || params.is_empty() && !is_variadic => {
                        span = span.to(&token.span);
                        break;
                    }
                    TokenKind::Ident(p) if expect_param && !is_variadic => {
                        if params.contains(p) {
                            return Err(Self::parse_error(
                                loc,
                                ParseError::InvalidMacroParams(format!("duplicate parameter `{}`", p)),
                            ));
                        }
                        params.push(p.clone());
                        expect_param = false;
                    }
                    TokenKind::Ellipsis if !is_variadic => {
                        // `...` または GNU 形式の `args...`
                        is_variadic = true;
                        expect_param = false;
                    }
                    TokenKind::Comma if !expect_param && !is_variadic => expect_param = true,
                    _ => {
                        return Err(Self::parse_error(
                            loc,
                            ParseError::InvalidMacroParams(format!("unexpected `{}`", token.lexeme)),
                        ));
                    }
                }
            }
        }

        let body: Vec<Token> = if kind == DirectiveKind::Define {
            iter.collect()
        } else {
            Vec::new()
        };
        if let Some(last) = body.last() {
            span = span.to(&last.span);
        }

        let include_guard = if kind == DirectiveKind::Define && !is_function_like {
            self.settle_guard(Some(&name_token.lexeme))
        } else {
            self.settle_guard(None);
            false
        };

        Ok(Directive {
            kind,
            name: name_token.lexeme.clone(),
            name_span: name_token.span.clone(),
            params,
            is_function_like,
            is_variadic,
            body,
            span,
            line_end,
            reachability: self.reachability(),
            branch: self.branch_path(),
            position: self.next_position(),
            include_guard,
        })
    }

    /// 条件コンパイルディレクティブを処理
    fn conditional(
        &mut self,
        name: &str,
        tokens: Vec<Token>,
        span: Span,
        loc: SourceLocation,
    ) -> Result<StreamItem> {
        let cond_base = self.frame().cond_base;
        let owns_top = self.conds.len() > cond_base;

        let reachability = match name {
            "if" | "ifdef" | "ifndef" => {
                let reachability = self.reachability();
                let at_file_start = self.frame().guard == GuardState::Start;
                let guard_name = match (name, tokens.first()) {
                    ("ifndef", Some(t)) if at_file_start && is_identifier_like(t) => Some(t.lexeme.clone()),
                    _ => None,
                };
                if guard_name.is_none() {
                    self.settle_guard(None);
                }
                if matches!(name, "ifdef" | "ifndef") && !tokens.first().is_some_and(is_identifier_like) {
                    return Err(Self::parse_error(loc, ParseError::MissingMacroName("ifdef")));
                }
                let state = if name == "if" {
                    evaluate_condition(&tokens)
                } else {
                    BranchState::Maybe
                };
                let group = self.next_group;
                self.next_group += 1;
                if let Some(guard) = guard_name {
                    self.frame().guard = GuardState::Candidate {
                        name: guard,
                        cond_index: self.conds.len(),
                    };
                }
                let is_guard = self.frame().guard != GuardState::Done;
                self.conds.push(CondState {
                    group,
                    branch: 0,
                    state,
                    any_taken: state == BranchState::Taken,
                    any_maybe: state == BranchState::Maybe,
                    seen_else: false,
                    is_guard,
                });
                reachability
            }
            "elif" | "elifdef" | "elifndef" | "else" => {
                self.settle_guard(None);
                if !owns_top {
                    let kind = if name == "else" {
                        ParseError::UnmatchedElse
                    } else {
                        ParseError::UnmatchedEndif
                    };
                    return Err(Self::parse_error(loc, kind));
                }
                let reachability = self.outer_reachability();
                let Some(cond) = self.conds.last_mut() else {
                    return Err(Self::parse_error(loc, ParseError::UnmatchedElse));
                };
                if cond.seen_else {
                    let kind = if name == "else" {
                        ParseError::UnmatchedElse
                    } else {
                        ParseError::ElifAfterElse
                    };
                    return Err(Self::parse_error(loc, kind));
                }
                cond.is_guard = false;
                cond.branch += 1;
                let state = if cond.any_taken {
                    BranchState::Skipped
                } else if name == "else" {
                    if cond.any_maybe { BranchState::Maybe } else { BranchState::Taken }
                } else {
                    let own = if name == "elif" {
                        evaluate_condition(&tokens)
                    } else {
                        BranchState::Maybe
                    };
                    match own {
                        BranchState::Taken if cond.any_maybe => BranchState::Maybe,
                        other => other,
                    }
                };
                if name == "else" {
                    cond.seen_else = true;
                }
                cond.state = state;
                cond.any_taken |= state == BranchState::Taken;
                cond.any_maybe |= state == BranchState::Maybe;
                reachability
            }
            _ => {
                // endif
                self.settle_guard(None);
                if !owns_top {
                    return Err(Self::parse_error(loc, ParseError::UnmatchedEndif));
                }
                let reachability = self.outer_reachability();
                self.conds.pop();
                reachability
            }
        };
        Ok(StreamItem::Raw(RawDirective {
            name: name.to_string(),
            tokens,
            span,
            reachability,
            position: self.next_position(),
        }))
    }

    /// #include を処理（解決できれば次からインクルード先を読む）
    fn include(&mut self, name: String, tokens: Vec<Token>, span: Span) -> Result<StreamItem> {
        let loc = span.loc();
        let target = match tokens.first().map(|t| &t.kind) {
            Some(TokenKind::StringLit { raw, .. }) => Some((raw.clone(), false)),
            Some(TokenKind::Lt) => {
                let spec: String = tokens[1..]
                    .iter()
                    .take_while(|t| t.kind != TokenKind::Gt)
                    .map(|t| t.lexeme.as_str())
                    .collect();
                Some((spec, true))
            }
            _ => None,
        };
        let follow = self.options.follow_includes && self.reachability() != Reachability::Disabled;
        let item = self.raw(name, tokens, span);

        let Some((spec, angled)) = target else {
            debug!("computed #include is not followed");
            return Ok(item);
        };
        if !follow {
            return Ok(item);
        }

        let from = self.frame().path.clone();
        let Some(path) = self.provider.resolve_include(&from, &spec, angled) else {
            if angled {
                debug!(include = %spec, "unresolved include skipped");
            } else {
                warn!(include = %spec, from = %from.display(), "unresolved include skipped");
            }
            return Ok(item);
        };
        if self.entered.contains(&path) {
            debug!(path = %path.display(), "include already entered in this unit");
            return Ok(item);
        }
        if self.stack.len() >= self.options.max_include_depth {
            return Err(Self::parse_error(
                loc,
                ParseError::IncludeTooDeep(self.options.max_include_depth),
            ));
        }
        match self.provider.load(&path) {
            Ok(source) => {
                debug!(path = %path.display(), "entering include");
                let file_id = self.files.register(path.clone());
                self.entered.insert(path.clone());
                let cond_base = self.conds.len();
                self.stack.push(FileFrame {
                    lexer: Lexer::new(source, file_id),
                    path,
                    at_line_start: true,
                    guard: GuardState::Start,
                    cond_base,
                });
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot read include, skipped");
            }
        }
        Ok(item)
    }

    fn next_item(&mut self) -> Result<Option<StreamItem>> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };
            let at_line_start = frame.at_line_start;
            let disabled = Self::reachability_of(&self.conds) == Reachability::Disabled;

            let token = match frame.lexer.next_token() {
                Ok(token) => token,
                Err(err) if disabled => {
                    debug!(error = %err, "unlexable text in disabled branch");
                    frame.lexer.skip_rest_of_line()?;
                    frame.at_line_start = false;
                    continue;
                }
                Err(err) => return Err(err),
            };

            match token.kind {
                TokenKind::Eof => {
                    let loc = frame.lexer.current_location();
                    let cond_base = frame.cond_base;
                    if self.conds.len() > cond_base {
                        return Err(Self::parse_error(loc, ParseError::MissingEndif));
                    }
                    if let Some(frame) = self.stack.pop() {
                        debug!(path = %frame.path.display(), "leaving file");
                    }
                }
                TokenKind::Newline => frame.at_line_start = true,
                TokenKind::Hash if at_line_start => {
                    let item = self.directive(token)?;
                    self.frame().at_line_start = true;
                    if item.is_some() {
                        return Ok(item);
                    }
                }
                _ if disabled => {
                    frame.lexer.skip_rest_of_line()?;
                    frame.at_line_start = false;
                }
                _ => {
                    frame.at_line_start = false;
                    self.settle_guard(None);
                    let reachability = self.reachability();
                    let position = self.next_position();
                    return Ok(Some(StreamItem::Token(CodeToken {
                        token,
                        position,
                        reachability,
                    })));
                }
            }
        }
    }
}

impl Iterator for TokenStream<'_> {
    type Item = Result<StreamItem>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_item() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// #if / #elif の条件を定数として評価
fn evaluate_condition(tokens: &[Token]) -> BranchState {
    match ConstEvaluator::new(tokens).evaluate() {
        Ok(result) if result.value.is_truthy() => BranchState::Taken,
        Ok(_) => BranchState::Skipped,
        Err(_) => BranchState::Maybe,
    }
}

/// 識別子またはキーワード（マクロ名として使える綴り）
fn is_identifier_like(token: &Token) -> bool {
    token.lexeme.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && token.lexeme.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// ディレクティブ行全体の範囲
fn line_span(hash: &Token, name: &Token, tokens: &[Token]) -> Span {
    let last = tokens.last().unwrap_or(name);
    hash.span.to(&last.span)
}

/// ストリームを実体化した翻訳単位
#[derive(Debug)]
pub struct TranslationUnit {
    pub main_path: PathBuf,
    pub files: FileRegistry,
    /// コードトークン（無効ブランチ内とディレクティブ行を除く）
    pub tokens: Vec<CodeToken>,
    pub directives: Vec<Directive>,
    pub raw_directives: Vec<RawDirective>,
    /// 翻訳単位の末尾位置
    pub end_position: usize,
}

impl TranslationUnit {
    /// ソースプロバイダからメインファイルを読み込んで構築
    pub fn build(path: &Path, provider: &dyn SourceProvider, options: StreamOptions) -> std::result::Result<Self, UnitError> {
        let source = provider.load(path).map_err(|source| UnitError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut stream = TokenStream::new(provider, options, path.to_path_buf(), source);

        let mut tokens = Vec::new();
        let mut directives = Vec::new();
        let mut raw_directives = Vec::new();
        while let Some(item) = stream.next() {
            match item {
                Ok(StreamItem::Token(token)) => tokens.push(token),
                Ok(StreamItem::Directive(directive)) => directives.push(directive),
                Ok(StreamItem::Raw(raw)) => raw_directives.push(raw),
                Err(err) => return Err(err.into_unit_error(stream.files())),
            }
        }

        let end_position = stream.position();
        debug!(
            path = %path.display(),
            tokens = tokens.len(),
            directives = directives.len(),
            "translation unit built"
        );
        Ok(Self {
            main_path: path.to_path_buf(),
            files: stream.into_files(),
            tokens,
            directives,
            raw_directives,
            end_position,
        })
    }

    /// 位置以下で最後のコードトークンのインデックス
    pub fn token_index_before(&self, position: usize) -> Option<usize> {
        let idx = self.tokens.partition_point(|t| t.position < position);
        idx.checked_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryProvider;

    fn build(files: &[(&str, &str)]) -> std::result::Result<TranslationUnit, UnitError> {
        let mut provider = MemoryProvider::new();
        for (path, text) in files {
            provider.insert(*path, *text);
        }
        TranslationUnit::build(Path::new(files[0].0), &provider, StreamOptions::default())
    }

    fn directive<'a>(unit: &'a TranslationUnit, name: &str) -> &'a Directive {
        unit.directives.iter().find(|d| d.name == name).unwrap()
    }

    #[test]
    fn test_directives_and_tokens() {
        let unit = build(&[("main.cpp", "#define ASPECT_RATIO 1.653\ndouble r = ASPECT_RATIO;\n")]).unwrap();
        assert_eq!(unit.directives.len(), 1);
        let d = &unit.directives[0];
        assert_eq!(d.kind, DirectiveKind::Define);
        assert_eq!(d.body_text(), "1.653");
        assert_eq!(d.reachability, Reachability::Unconditional);
        assert_eq!(d.span.start, 0);
        assert_eq!(d.span.end, 26);
        assert_eq!(d.line_end, 27);
        assert_eq!(unit.tokens.len(), 5);
        assert!(unit.tokens.iter().all(|t| t.position > d.position));
    }

    #[test]
    fn test_function_like_params() {
        let unit = build(&[("m.h", "#define MAX(a, b) ((a) > (b) ? (a) : (b))\n#define V(fmt, ...) f(fmt)\n#define P (x)\n")])
            .unwrap();
        let max = directive(&unit, "MAX");
        assert!(max.is_function_like);
        assert_eq!(max.params, vec!["a", "b"]);
        let v = directive(&unit, "V");
        assert!(v.is_variadic);
        let p = directive(&unit, "P");
        assert!(!p.is_function_like);
        assert_eq!(p.body_text(), "(x)");
    }

    #[test]
    fn test_continuation_is_part_of_directive() {
        let unit = build(&[("m.h", "#define LONG 1 + \\\n  2\nint x;\n")]).unwrap();
        let d = directive(&unit, "LONG");
        assert_eq!(d.body_text(), "1 + 2");
        assert_eq!(d.span.line, 1);
        assert_eq!(unit.tokens[0].token.span.line, 3);
    }

    #[test]
    fn test_reachability() {
        let src = "#ifdef FEATURE\n#define A 1\n#else\n#define A 2\n#endif\n\
                   #if 0\n#define B 1\nit's disabled\n#elif 1\n#define C 3\n#endif\n#define D 4\n";
        let unit = build(&[("m.h", src)]).unwrap();
        let a: Vec<_> = unit.directives.iter().filter(|d| d.name == "A").collect();
        assert_eq!(a[0].reachability, Reachability::Conditional);
        assert_eq!(a[1].reachability, Reachability::Conditional);
        assert!(branches_exclusive(&a[0].branch, &a[1].branch));
        assert_eq!(directive(&unit, "B").reachability, Reachability::Disabled);
        assert_eq!(directive(&unit, "C").reachability, Reachability::Unconditional);
        assert_eq!(directive(&unit, "D").reachability, Reachability::Unconditional);
        assert!(unit.tokens.is_empty());
    }

    #[test]
    fn test_include_guard_is_not_conditional() {
        let src = "#ifndef WIDGET_H\n#define WIDGET_H\n#define N 5\n#endif\n";
        let unit = build(&[("widget.h", src)]).unwrap();
        assert!(directive(&unit, "WIDGET_H").include_guard);
        assert_eq!(directive(&unit, "N").reachability, Reachability::Unconditional);
        assert!(directive(&unit, "N").branch.is_empty());
    }

    #[test]
    fn test_ifndef_without_guard_define_is_conditional() {
        let src = "#ifndef N\n#define M 5\n#endif\n";
        let unit = build(&[("a.h", src)]).unwrap();
        assert_eq!(directive(&unit, "M").reachability, Reachability::Conditional);
    }

    #[test]
    fn test_include_expansion() {
        let unit = build(&[
            ("main.cpp", "#include \"widget.h\"\n#include <vector>\nint x = N;\n"),
            ("widget.h", "#define N 5\n"),
        ])
        .unwrap();
        let n = directive(&unit, "N");
        assert_eq!(unit.files.get_path(n.span.file_id), Path::new("widget.h"));
        assert_eq!(unit.raw_directives.iter().filter(|r| r.name == "include").count(), 2);
        assert_eq!(unit.files.len(), 2);
    }

    #[test]
    fn test_condition_references() {
        let unit = build(&[("a.h", "#define N 1\n#if defined(N) && N > 0\n#endif\n")]).unwrap();
        let refs: Vec<_> = unit.raw_directives[0]
            .condition_references()
            .into_iter()
            .map(|t| t.lexeme.clone())
            .collect();
        assert_eq!(refs, vec!["N", "N"]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            build(&[("a.h", "#endif\n")]),
            Err(UnitError::Parse { kind: ParseError::UnmatchedEndif, .. })
        ));
        assert!(matches!(
            build(&[("a.h", "#if X\nint x;\n")]),
            Err(UnitError::Parse { kind: ParseError::MissingEndif, .. })
        ));
        assert!(matches!(
            build(&[("a.h", "#define\n")]),
            Err(UnitError::Parse { kind: ParseError::MissingMacroName("define"), .. })
        ));
        assert!(matches!(
            build(&[("a.h", "#define F(a,,b) a\n")]),
            Err(UnitError::Parse { kind: ParseError::InvalidMacroParams(_), .. })
        ));
        assert!(matches!(
            build(&[("a.h", "#if 1\n#else\n#else\n#endif\n")]),
            Err(UnitError::Parse { kind: ParseError::UnmatchedElse, .. })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let provider = MemoryProvider::new();
        let err = TranslationUnit::build(Path::new("nope.cpp"), &provider, StreamOptions::default()).unwrap_err();
        assert!(matches!(err, UnitError::Io { .. }));
    }
}
