//! マクロの使用箇所の収集
//!
//! - コード中の使用箇所（関数マクロは実引数も）
//! - 有効区間外に現れた同名の識別子
//! - #if / #ifdef などの条件式での参照（プリプロセッサ使用）
//! - 他のマクロの置換列からの参照（マクロ間の依存）

use std::collections::HashMap;

use crate::macro_def::{DefinitionId, MacroDefinition, MacroTable};
use crate::scope::{BraceKind, DeclarationContext, ScopeId, ScopeResolver};
use crate::source::Span;
use crate::token::{Token, TokenKind};
use crate::token_stream::{CodeToken, Reachability, TranslationUnit};

/// コード中のマクロ使用箇所
#[derive(Debug, Clone)]
pub struct UsageSite {
    pub name: String,
    /// 解決された定義
    pub definition: DefinitionId,
    /// 実引数（関数マクロのみ）
    pub arguments: Vec<Vec<Token>>,
    pub context: DeclarationContext,
    /// マクロ名から閉じ括弧まで
    pub span: Span,
    pub name_span: Span,
    pub position: usize,
    /// クラス本体内の定数式の位置で使われていればそのクラス
    pub const_expr_in_class: Option<ScopeId>,
}

/// 有効区間の外に現れた同名の識別子
#[derive(Debug, Clone)]
pub struct StrayUse {
    pub span: Span,
    pub position: usize,
}

/// 条件コンパイルディレクティブでの参照
#[derive(Debug, Clone)]
pub struct PreprocessorUse {
    /// ディレクティブ名（if, ifdef など）
    pub directive: String,
    pub span: Span,
    pub position: usize,
}

/// 置換列からの他マクロへの参照
#[derive(Debug, Clone)]
pub struct MacroDependency {
    pub name: String,
    /// 置換列内のインデックス
    pub body_index: usize,
    /// `NAME(...)` 形式なら実引数の数
    pub call_arity: Option<usize>,
    /// 定義位置で有効な定義（なければ後方の定義）
    pub resolved: Option<DefinitionId>,
    /// 定義より後で定義されるマクロへの参照
    pub defined_later: bool,
    /// 自分自身への参照
    pub self_reference: bool,
}

/// 他のマクロの置換列を経由した参照
#[derive(Debug, Clone)]
pub struct IndirectUse {
    /// 参照を運ぶマクロ
    pub via: DefinitionId,
    /// via の #define の位置、または via の展開位置
    pub position: usize,
    pub span: Span,
}

/// 翻訳単位内の使用情報
#[derive(Debug, Default)]
pub struct UsageIndex {
    sites: Vec<UsageSite>,
    by_definition: HashMap<DefinitionId, Vec<usize>>,
    by_name: HashMap<String, Vec<usize>>,
    stray: HashMap<String, Vec<StrayUse>>,
    preprocessor: HashMap<String, Vec<PreprocessorUse>>,
    dependencies: HashMap<DefinitionId, Vec<MacroDependency>>,
    /// 依存の逆引き（参照される定義 → 参照する定義）
    dependents: HashMap<DefinitionId, Vec<DefinitionId>>,
}

impl UsageIndex {
    /// 翻訳単位から使用情報を収集
    pub fn collect(unit: &TranslationUnit, table: &MacroTable, scopes: &ScopeResolver) -> Self {
        let mut index = Self::default();
        index.collect_code_uses(unit, table, scopes);
        index.collect_preprocessor_uses(unit, table);
        index.collect_dependencies(table);
        index
    }

    /// Phase 1: コード中の使用箇所
    fn collect_code_uses(&mut self, unit: &TranslationUnit, table: &MacroTable, scopes: &ScopeResolver) {
        let tokens = &unit.tokens;
        for (i, code) in tokens.iter().enumerate() {
            let Some(name) = code.token.kind.ident() else {
                continue;
            };
            if !table.is_macro_name(name) {
                continue;
            }
            let Some(def) = table.active_definition_at(name, code.position) else {
                self.add_stray(name, code);
                continue;
            };

            let (arguments, end_span) = if def.is_function_like() {
                match call_arguments(tokens, i + 1) {
                    Some((args, close)) => (args, tokens[close].token.span.clone()),
                    None => {
                        // 括弧なしの関数マクロ名は展開されない
                        self.add_stray(name, code);
                        continue;
                    }
                }
            } else {
                (Vec::new(), code.token.span.clone())
            };
            let span = if end_span.file_id == code.token.span.file_id {
                code.token.span.to(&end_span)
            } else {
                code.token.span.clone()
            };

            let site = UsageSite {
                name: name.to_string(),
                definition: def.id,
                arguments,
                context: scopes.context_at(unit, code.position),
                span,
                name_span: code.token.span.clone(),
                position: code.position,
                const_expr_in_class: const_expr_class(tokens, scopes, i),
            };
            let idx = self.sites.len();
            self.by_definition.entry(def.id).or_default().push(idx);
            self.by_name.entry(site.name.clone()).or_default().push(idx);
            self.sites.push(site);
        }
    }

    fn add_stray(&mut self, name: &str, code: &CodeToken) {
        self.stray.entry(name.to_string()).or_default().push(StrayUse {
            span: code.token.span.clone(),
            position: code.position,
        });
    }

    /// Phase 2: 条件コンパイルでの参照
    fn collect_preprocessor_uses(&mut self, unit: &TranslationUnit, table: &MacroTable) {
        for raw in unit
            .raw_directives
            .iter()
            .filter(|r| r.reachability != Reachability::Disabled)
        {
            for token in raw.condition_references() {
                if !table.is_macro_name(&token.lexeme) {
                    continue;
                }
                self.preprocessor
                    .entry(token.lexeme.clone())
                    .or_default()
                    .push(PreprocessorUse {
                        directive: raw.name.clone(),
                        span: token.span.clone(),
                        position: raw.position,
                    });
            }
        }
    }

    /// Phase 3: マクロ間の依存
    fn collect_dependencies(&mut self, table: &MacroTable) {
        for def in table.iter().filter(|d| d.is_active_span_nonempty()) {
            let deps = body_dependencies(def, table);
            for resolved in deps.iter().filter(|d| !d.self_reference).filter_map(|d| d.resolved) {
                let users = self.dependents.entry(resolved).or_default();
                if !users.contains(&def.id) {
                    users.push(def.id);
                }
            }
            if !deps.is_empty() {
                self.dependencies.insert(def.id, deps);
            }
        }
    }

    /// 定義に解決された使用箇所
    pub fn sites_of(&self, id: DefinitionId) -> impl Iterator<Item = &UsageSite> {
        self.by_definition
            .get(&id)
            .into_iter()
            .flatten()
            .map(|&i| &self.sites[i])
    }

    /// 名前の全使用箇所（定義を問わない）
    pub fn sites_named(&self, name: &str) -> impl Iterator<Item = &UsageSite> {
        self.by_name
            .get(name)
            .into_iter()
            .flatten()
            .map(|&i| &self.sites[i])
    }

    /// 有効区間外の同名識別子
    pub fn stray_uses(&self, name: &str) -> &[StrayUse] {
        self.stray.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 条件コンパイルでの参照
    pub fn preprocessor_uses(&self, name: &str) -> &[PreprocessorUse] {
        self.preprocessor.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 置換列からの依存
    pub fn dependencies(&self, id: DefinitionId) -> &[MacroDependency] {
        self.dependencies.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 置換列でこの定義を参照している定義
    pub fn dependents(&self, id: DefinitionId) -> &[DefinitionId] {
        self.dependents.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 他のマクロを経由した参照を推移的に集める
    ///
    /// 参照するマクロの定義位置と、そのマクロのコード中の使用箇所を返す。
    pub fn indirect_uses(&self, table: &MacroTable, id: DefinitionId) -> Vec<IndirectUse> {
        let mut uses = Vec::new();
        let mut seen = vec![id];
        let mut queue: Vec<DefinitionId> = self.dependents(id).to_vec();
        while let Some(via) = queue.pop() {
            if seen.contains(&via) {
                continue;
            }
            seen.push(via);
            let directive = &table.get(via).directive;
            uses.push(IndirectUse {
                via,
                position: directive.position,
                span: directive.name_span.clone(),
            });
            uses.extend(self.sites_of(via).map(|site| IndirectUse {
                via,
                position: site.position,
                span: site.name_span.clone(),
            }));
            queue.extend_from_slice(self.dependents(via));
        }
        uses.sort_by_key(|u| u.position);
        uses
    }

    /// 使用箇所の総数
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

/// 置換列中の他マクロへの参照を列挙
fn body_dependencies(def: &MacroDefinition, table: &MacroTable) -> Vec<MacroDependency> {
    let body = &def.directive.body;
    let mut deps = Vec::new();
    for (i, token) in body.iter().enumerate() {
        let Some(name) = token.kind.ident() else {
            continue;
        };
        if def.directive.params.iter().any(|p| p == name) || !table.is_macro_name(name) {
            continue;
        }
        let call_arity = arity_at(body, i + 1);
        if name == def.name {
            deps.push(MacroDependency {
                name: name.to_string(),
                body_index: i,
                call_arity,
                resolved: None,
                defined_later: false,
                self_reference: true,
            });
            continue;
        }
        let (resolved, defined_later) = match table.active_definition_at(name, def.start) {
            Some(d) => (Some(d.id), false),
            None => match table.next_definition_after(name, def.start) {
                Some(d) => (Some(d.id), true),
                None => (None, false),
            },
        };
        deps.push(MacroDependency {
            name: name.to_string(),
            body_index: i,
            call_arity,
            resolved,
            defined_later,
            self_reference: false,
        });
    }
    deps
}

/// `(` から始まる実引数の数（`(` でなければ None）
fn arity_at(tokens: &[Token], open: usize) -> Option<usize> {
    if tokens.get(open)?.kind != TokenKind::LParen {
        return None;
    }
    let mut depth = 0usize;
    let mut commas = 0;
    let mut empty = true;
    for token in &tokens[open..] {
        match token.kind {
            TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => {
                depth += 1;
                if depth == 1 {
                    continue;
                }
            }
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                depth -= 1;
                if depth == 0 {
                    return Some(if empty { 0 } else { commas + 1 });
                }
            }
            TokenKind::Comma if depth == 1 => commas += 1,
            _ => {}
        }
        empty = false;
    }
    // 閉じていない呼び出しは置換列の外に続く
    None
}

/// コード中の `(` から始まる実引数を切り出す（閉じ括弧のインデックスも返す）
pub fn call_arguments(tokens: &[CodeToken], open: usize) -> Option<(Vec<Vec<Token>>, usize)> {
    if tokens.get(open)?.token.kind != TokenKind::LParen {
        return None;
    }
    let mut depth = 0usize;
    let mut args: Vec<Vec<Token>> = Vec::new();
    let mut current = Vec::new();
    for (i, code) in tokens.iter().enumerate().skip(open) {
        let token = &code.token;
        match token.kind {
            TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => {
                depth += 1;
                if depth == 1 {
                    continue;
                }
            }
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                depth -= 1;
                if depth == 0 {
                    if !current.is_empty() || !args.is_empty() {
                        args.push(current);
                    }
                    return Some((args, i));
                }
            }
            TokenKind::Comma if depth == 1 => {
                args.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(token.clone());
    }
    None
}

/// クラス本体内の定数式の位置（配列の要素数、ビットフィールド幅、
/// 列挙子の初期化子、static_assert、テンプレート実引数、static メンバの初期化子）なら
/// そのクラスのスコープを返す
fn const_expr_class(tokens: &[CodeToken], scopes: &ScopeResolver, index: usize) -> Option<ScopeId> {
    let scope_id = scopes.scope_of_token(index)?;
    let scope = scopes.get(scope_id);
    match &scope.kind {
        BraceKind::Enum => {
            let parent = scope.parent?;
            matches!(scopes.get(parent).kind, BraceKind::Class { .. }).then_some(parent)
        }
        BraceKind::Class { .. } => {
            let start = scope.open_index + 1;
            const_expr_in_member_declaration(&tokens[start..index], &tokens[index + 1..]).then_some(scope_id)
        }
        _ => None,
    }
}

/// メンバ宣言の中で、直前のトークン列 `before` に続く位置が定数式か
fn const_expr_in_member_declaration(before: &[CodeToken], after: &[CodeToken]) -> bool {
    let mut depth = 0i32;
    for (i, code) in before.iter().enumerate().rev() {
        match code.token.kind {
            TokenKind::Semi | TokenKind::LBrace | TokenKind::RBrace if depth == 0 => return false,
            TokenKind::RBracket | TokenKind::RParen | TokenKind::Gt => depth += 1,
            TokenKind::GtGt => depth += 2,
            TokenKind::LBracket if depth == 0 => return true,
            TokenKind::LParen if depth == 0 => {
                return i > 0 && before[i - 1].token.kind == TokenKind::KwStaticAssert;
            }
            TokenKind::Lt if depth == 0 => {
                return i > 0 && before[i - 1].token.kind.ident().is_some();
            }
            TokenKind::LBracket | TokenKind::LParen | TokenKind::Lt => depth -= 1,
            TokenKind::Colon if depth == 0 => {
                // アクセス指定子の `public:` は宣言の区切り
                let access = i > 0
                    && matches!(
                        before[i - 1].token.kind,
                        TokenKind::KwPublic | TokenKind::KwProtected | TokenKind::KwPrivate
                    );
                return !access;
            }
            TokenKind::Eq if depth == 0 => {
                let statement = statement_start(before, i);
                return before[statement..i]
                    .iter()
                    .any(|t| matches!(t.token.kind, TokenKind::KwStatic | TokenKind::KwConstexpr))
                    && !after.iter().take_while(|t| t.token.kind != TokenKind::Semi).any(|t| t.token.kind == TokenKind::LParen);
            }
            _ => {}
        }
    }
    false
}

/// 宣言の先頭インデックス
fn statement_start(tokens: &[CodeToken], end: usize) -> usize {
    tokens[..end]
        .iter()
        .rposition(|t| {
            matches!(t.token.kind, TokenKind::Semi | TokenKind::LBrace | TokenKind::RBrace | TokenKind::Colon)
        })
        .map_or(0, |p| p + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryProvider;
    use crate::token_stream::StreamOptions;
    use std::path::Path;

    struct Fixture {
        unit: TranslationUnit,
        table: MacroTable,
        usage: UsageIndex,
    }

    fn fixture(src: &str) -> Fixture {
        let mut provider = MemoryProvider::new();
        provider.insert("t.h", src);
        let unit = TranslationUnit::build(Path::new("t.h"), &provider, StreamOptions::default()).unwrap();
        let mut table = MacroTable::new();
        for d in &unit.directives {
            table.record(d.clone());
        }
        table.finish(unit.end_position);
        let scopes = ScopeResolver::new(&unit);
        let usage = UsageIndex::collect(&unit, &table, &scopes);
        Fixture { unit, table, usage }
    }

    fn def_id(f: &Fixture, name: &str) -> DefinitionId {
        f.table.definitions_of(name).next().unwrap().id
    }

    #[test]
    fn test_object_like_uses() {
        let f = fixture("int a = N;\n#define N 5\nint b = N + N;\n#undef N\nint c = N;\n");
        let id = def_id(&f, "N");
        assert_eq!(f.usage.sites_of(id).count(), 2);
        assert_eq!(f.usage.stray_uses("N").len(), 2);
        assert!(f.unit.tokens.len() > 10);
    }

    #[test]
    fn test_function_like_arguments() {
        let f = fixture("#define CALL_WITH_MAX(a, b) f((a) > (b) ? (a) : (b))\nvoid g() { CALL_WITH_MAX(++a, h(b, c)); CALL_WITH_MAX; }\n");
        let id = def_id(&f, "CALL_WITH_MAX");
        let sites: Vec<_> = f.usage.sites_of(id).collect();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].arguments.len(), 2);
        assert_eq!(crate::token::join_tokens(&sites[0].arguments[1]), "h(b, c)");
        assert_eq!(f.usage.stray_uses("CALL_WITH_MAX").len(), 1);
    }

    #[test]
    fn test_const_expr_in_class() {
        let src = "class GamePlayer {\n#define NumTurns 5\n  int scores[NumTurns];\n  int x = NumTurns;\n\
                   unsigned bits : NumTurns;\n  enum { E = NumTurns };\n  static const int S = NumTurns;\n\
                   std::array<int, NumTurns> arr;\n  void f() { int y = NumTurns; }\n};\n";
        let f = fixture(src);
        let id = def_id(&f, "NumTurns");
        let flags: Vec<bool> = f.usage.sites_of(id).map(|s| s.const_expr_in_class.is_some()).collect();
        assert_eq!(flags, vec![true, false, true, true, true, true, false]);
    }

    #[test]
    fn test_preprocessor_uses() {
        let f = fixture("#define DEBUG 1\n#if DEBUG\n#endif\n#ifdef DEBUG\n#endif\n#if 0\n#if DEBUG\n#endif\n#endif\n");
        let uses = f.usage.preprocessor_uses("DEBUG");
        assert_eq!(uses.len(), 2);
        assert_eq!(uses[0].directive, "if");
        assert_eq!(uses[1].directive, "ifdef");
    }

    #[test]
    fn test_dependencies() {
        let src = "#define A 1\n#define B (A + C)\n#define C 2\n#define D D\n#define E MAX(1, 2)\n#define MAX(x, y) x\n";
        let f = fixture(src);
        let deps = f.usage.dependencies(def_id(&f, "B"));
        assert_eq!(deps.len(), 2);
        assert!(!deps[0].defined_later);
        assert!(deps[1].defined_later);
        assert!(f.usage.dependencies(def_id(&f, "D"))[0].self_reference);
        assert_eq!(f.usage.dependencies(def_id(&f, "E"))[0].call_arity, Some(2));
        assert!(f.usage.dependencies(def_id(&f, "MAX")).is_empty());
        assert_eq!(f.usage.dependents(def_id(&f, "A")), &[def_id(&f, "B")]);
        assert!(f.usage.dependents(def_id(&f, "D")).is_empty());
    }

    #[test]
    fn test_indirect_uses_follow_dependent_macros() {
        let src = "#define SIZE 4
#define TWICE (SIZE * 2)
#define FOUR (TWICE * 2)
int a = FOUR;
int b = SIZE;
";
        let f = fixture(src);
        let uses = f.usage.indirect_uses(&f.table, def_id(&f, "SIZE"));
        let via: Vec<&str> = uses.iter().map(|u| f.table.get(u.via).name.as_str()).collect();
        assert_eq!(via, vec!["TWICE", "FOUR", "FOUR"]);
        assert_eq!(uses[2].span.line, 4);
        assert!(f.usage.indirect_uses(&f.table, def_id(&f, "FOUR")).is_empty());
    }
}
