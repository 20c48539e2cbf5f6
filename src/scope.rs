//! 宣言コンテキストの解決
//!
//! 翻訳単位のコードトークンから波括弧の対応を一度だけ計算し、
//! 任意の位置を囲む namespace / class / ブロックを求める。
//! プリプロセッサのマクロにはスコープがないため、クラス本体の
//! 波括弧の間で定義されたマクロはそのクラスに属するものとみなす。

use serde::Serialize;

use crate::token::TokenKind;
use crate::token_stream::{CodeToken, TranslationUnit};

/// スコープの識別子
pub type ScopeId = usize;

/// クラスを導入したキーワード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ClassKeyword {
    Class,
    Struct,
    Union,
}

impl ClassKeyword {
    /// キーワードごとの既定のアクセス指定
    pub fn default_access(self) -> Access {
        match self {
            ClassKeyword::Class => Access::Private,
            ClassKeyword::Struct | ClassKeyword::Union => Access::Public,
        }
    }
}

/// アクセス指定子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Access {
    Public,
    Protected,
    Private,
}

impl Access {
    pub fn as_str(self) -> &'static str {
        match self {
            Access::Public => "public",
            Access::Protected => "protected",
            Access::Private => "private",
        }
    }
}

/// 波括弧が導入したものの種類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BraceKind {
    Namespace(String),
    Class { name: String, keyword: ClassKeyword },
    Enum,
    /// `= {` で始まる初期化子
    Initializer,
    /// extern "C" { ... }（スコープを作らない）
    LinkageSpec,
    /// 関数本体など
    Block,
}

/// 波括弧で囲まれた範囲
#[derive(Debug, Clone)]
pub struct BraceScope {
    pub kind: BraceKind,
    pub parent: Option<ScopeId>,
    /// `{` のトークンインデックス
    pub open_index: usize,
    /// `}` のトークンインデックス（閉じていなければ None）
    pub close_index: Option<usize>,
    pub open_position: usize,
    /// `}` の位置（閉じていなければ usize::MAX）
    pub close_position: usize,
    /// 直下のアクセス指定子（位置, 指定）
    access_marks: Vec<(usize, Access)>,
}

impl BraceScope {
    /// 位置が本体内か
    pub fn contains(&self, position: usize) -> bool {
        self.open_position < position && position < self.close_position
    }
}

/// 宣言コンテキストの1段
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ContextKind {
    GlobalNamespace,
    Namespace(String),
    ClassScope {
        name: String,
        access: Access,
        keyword: ClassKeyword,
    },
    Block,
}

/// 宣言コンテキスト
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarationContext {
    /// 外側から順の囲みスコープ（グローバルは含まない）
    pub chain: Vec<ContextKind>,
    /// chain と対応するスコープID
    pub scope_ids: Vec<ScopeId>,
}

impl DeclarationContext {
    /// グローバル名前空間
    pub fn global() -> Self {
        Self {
            chain: Vec::new(),
            scope_ids: Vec::new(),
        }
    }

    /// 最も内側のコンテキスト
    pub fn kind(&self) -> &ContextKind {
        static GLOBAL: ContextKind = ContextKind::GlobalNamespace;
        self.chain.last().unwrap_or(&GLOBAL)
    }

    /// 最も内側のスコープ
    pub fn scope(&self) -> Option<ScopeId> {
        self.scope_ids.last().copied()
    }

    /// 直接クラス本体内ならそのスコープと名前
    pub fn class_scope(&self) -> Option<(ScopeId, &str, Access)> {
        match (self.kind(), self.scope()) {
            (ContextKind::ClassScope { name, access, .. }, Some(id)) => Some((id, name.as_str(), *access)),
            _ => None,
        }
    }

    /// ブロック（関数本体など）の中か
    pub fn is_block(&self) -> bool {
        self.chain.iter().any(|k| *k == ContextKind::Block)
    }

    /// 表示用の説明
    pub fn describe(&self) -> String {
        match self.kind() {
            ContextKind::GlobalNamespace => "global namespace".to_string(),
            ContextKind::Namespace(name) if name.is_empty() => "anonymous namespace".to_string(),
            ContextKind::Namespace(name) => format!("namespace {}", name),
            ContextKind::ClassScope { name, access, .. } => format!("class {} ({} section)", name, access.as_str()),
            ContextKind::Block => "local block".to_string(),
        }
    }
}

/// 宣言コンテキストの解決器
#[derive(Debug, Default)]
pub struct ScopeResolver {
    scopes: Vec<BraceScope>,
    /// トークンごとの直後の最内スコープ
    scope_after: Vec<Option<ScopeId>>,
    /// トークンごとの所属スコープ（`{` `}` 自体は外側）
    scope_of: Vec<Option<ScopeId>>,
}

impl ScopeResolver {
    /// 翻訳単位の波括弧対応を計算
    pub fn new(unit: &TranslationUnit) -> Self {
        let tokens = &unit.tokens;
        let mut resolver = Self {
            scopes: Vec::new(),
            scope_after: Vec::with_capacity(tokens.len()),
            scope_of: Vec::with_capacity(tokens.len()),
        };
        let mut stack: Vec<ScopeId> = Vec::new();

        for (i, token) in tokens.iter().enumerate() {
            let current = stack.last().copied();
            resolver.scope_of.push(current);
            match token.token.kind {
                TokenKind::LBrace => {
                    let id = resolver.scopes.len();
                    resolver.scopes.push(BraceScope {
                        kind: classify_brace(tokens, i),
                        parent: current,
                        open_index: i,
                        close_index: None,
                        open_position: token.position,
                        close_position: usize::MAX,
                        access_marks: Vec::new(),
                    });
                    stack.push(id);
                }
                TokenKind::RBrace => {
                    if let Some(id) = stack.pop() {
                        resolver.scopes[id].close_index = Some(i);
                        resolver.scopes[id].close_position = token.position;
                    }
                }
                TokenKind::KwPublic | TokenKind::KwProtected | TokenKind::KwPrivate => {
                    let followed_by_colon = tokens.get(i + 1).is_some_and(|t| t.token.kind == TokenKind::Colon);
                    if let (Some(id), true) = (current, followed_by_colon) {
                        if matches!(resolver.scopes[id].kind, BraceKind::Class { .. }) {
                            let access = match token.token.kind {
                                TokenKind::KwPublic => Access::Public,
                                TokenKind::KwProtected => Access::Protected,
                                _ => Access::Private,
                            };
                            resolver.scopes[id].access_marks.push((token.position, access));
                        }
                    }
                }
                _ => {}
            }
            resolver.scope_after.push(stack.last().copied());
        }
        resolver
    }

    /// スコープを取得
    pub fn get(&self, id: ScopeId) -> &BraceScope {
        &self.scopes[id]
    }

    /// トークンが直接属するスコープ
    pub fn scope_of_token(&self, index: usize) -> Option<ScopeId> {
        self.scope_of.get(index).copied().flatten()
    }

    /// 位置を囲む最内スコープ
    pub fn scope_at(&self, unit: &TranslationUnit, position: usize) -> Option<ScopeId> {
        unit.token_index_before(position)
            .and_then(|i| self.scope_after.get(i).copied().flatten())
    }

    /// 位置の宣言コンテキストを求める
    pub fn context_at(&self, unit: &TranslationUnit, position: usize) -> DeclarationContext {
        let mut ids = Vec::new();
        let mut current = self.scope_at(unit, position);
        while let Some(id) = current {
            if self.scopes[id].kind != BraceKind::LinkageSpec {
                ids.push(id);
            }
            current = self.scopes[id].parent;
        }
        ids.reverse();

        let chain = ids
            .iter()
            .map(|&id| {
                let scope = &self.scopes[id];
                match &scope.kind {
                    BraceKind::Namespace(name) => ContextKind::Namespace(name.clone()),
                    BraceKind::Class { name, keyword } => ContextKind::ClassScope {
                        name: name.clone(),
                        access: scope
                            .access_marks
                            .iter()
                            .rev()
                            .find(|(p, _)| *p < position)
                            .map(|(_, a)| *a)
                            .unwrap_or_else(|| keyword.default_access()),
                        keyword: *keyword,
                    },
                    BraceKind::Enum | BraceKind::Initializer | BraceKind::Block | BraceKind::LinkageSpec => {
                        ContextKind::Block
                    }
                }
            })
            .collect();
        DeclarationContext { chain, scope_ids: ids }
    }

    /// クラス本体の位置範囲 (開き括弧, 閉じ括弧)
    pub fn class_body_range(&self, id: ScopeId) -> (usize, usize) {
        let scope = &self.scopes[id];
        (scope.open_position, scope.close_position)
    }

    /// use_ctx から def_ctx のクラスメンバーを参照するための修飾（"A::B::" 形式）
    ///
    /// ローカルクラスなど修飾できない場合は None。
    pub fn qualifier(&self, def_ctx: &DeclarationContext, use_ctx: &DeclarationContext) -> Option<String> {
        if def_ctx.is_block() {
            return None;
        }
        let common = def_ctx
            .scope_ids
            .iter()
            .zip(&use_ctx.scope_ids)
            .take_while(|(a, b)| a == b)
            .count();
        let mut out = String::new();
        for kind in &def_ctx.chain[common..] {
            match kind {
                ContextKind::Namespace(name) | ContextKind::ClassScope { name, .. } if !name.is_empty() => {
                    out.push_str(name);
                    out.push_str("::");
                }
                _ => return None,
            }
        }
        Some(out)
    }
}

/// `{` の直前の宣言頭部から種類を判定
fn classify_brace(tokens: &[CodeToken], open: usize) -> BraceKind {
    let start = tokens[..open]
        .iter()
        .rposition(|t| matches!(t.token.kind, TokenKind::Semi | TokenKind::LBrace | TokenKind::RBrace))
        .map_or(0, |p| p + 1);
    let mut head: Vec<&TokenKind> = tokens[start..open].iter().map(|t| &t.token.kind).collect();

    // アクセス指定子 `public:` は頭部に含めない
    while let [TokenKind::KwPublic | TokenKind::KwProtected | TokenKind::KwPrivate, TokenKind::Colon, ..] = head.as_slice() {
        head.drain(..2);
    }

    match head.as_slice() {
        [] => return BraceKind::Block,
        [TokenKind::KwExtern, TokenKind::StringLit { .. }] => return BraceKind::LinkageSpec,
        [TokenKind::KwNamespace, rest @ ..] | [TokenKind::KwInline, TokenKind::KwNamespace, rest @ ..] => {
            let name = rest
                .iter()
                .map(|k| match k {
                    TokenKind::Ident(n) => n.as_str(),
                    TokenKind::ColonColon => "::",
                    _ => "",
                })
                .collect();
            return BraceKind::Namespace(name);
        }
        _ => {}
    }

    // 頭部の最上位（<> の外）にある class / struct / union / enum を探す
    let mut angle = 0i32;
    let mut paren = 0i32;
    let mut found: Option<(usize, ClassKeyword)> = None;
    for (i, kind) in head.iter().enumerate() {
        match kind {
            TokenKind::Lt => angle += 1,
            TokenKind::Gt if angle > 0 => angle -= 1,
            TokenKind::GtGt if angle > 0 => angle = (angle - 2).max(0),
            TokenKind::LParen => paren += 1,
            TokenKind::RParen => paren -= 1,
            TokenKind::Eq if angle == 0 && paren == 0 => return BraceKind::Initializer,
            TokenKind::KwEnum if angle == 0 && paren == 0 => return BraceKind::Enum,
            TokenKind::KwClass | TokenKind::KwStruct | TokenKind::KwUnion if angle == 0 && paren == 0 => {
                let keyword = match kind {
                    TokenKind::KwClass => ClassKeyword::Class,
                    TokenKind::KwStruct => ClassKeyword::Struct,
                    _ => ClassKeyword::Union,
                };
                if found.is_none() {
                    found = Some((i, keyword));
                }
            }
            _ => {}
        }
    }
    let Some((at, keyword)) = found else {
        return BraceKind::Block;
    };

    // `struct S f() {` のような関数定義は除外
    if head[at..].iter().any(|k| matches!(k, TokenKind::LParen)) {
        let before_colon = head[at..].iter().position(|k| matches!(k, TokenKind::Colon));
        let first_paren = head[at..].iter().position(|k| matches!(k, TokenKind::LParen));
        if matches!((before_colon, first_paren), (None, Some(_))) {
            return BraceKind::Block;
        }
    }

    let name = head[at + 1..].iter().find_map(|k| match k {
        TokenKind::Ident(n) if n != "final" => Some(n.clone()),
        _ => None,
    });
    match name {
        Some(name) => BraceKind::Class { name, keyword },
        None => BraceKind::Block,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryProvider;
    use crate::token_stream::StreamOptions;
    use std::path::Path;

    fn unit(src: &str) -> TranslationUnit {
        let mut provider = MemoryProvider::new();
        provider.insert("t.h", src);
        TranslationUnit::build(Path::new("t.h"), &provider, StreamOptions::default()).unwrap()
    }

    fn define_position(unit: &TranslationUnit, name: &str) -> usize {
        unit.directives.iter().find(|d| d.name == name).unwrap().position
    }

    #[test]
    fn test_global_and_namespace() {
        let u = unit("#define A 1\nnamespace app {\n#define B 2\n}\n");
        let r = ScopeResolver::new(&u);
        assert_eq!(r.context_at(&u, define_position(&u, "A")).kind(), &ContextKind::GlobalNamespace);
        assert_eq!(
            r.context_at(&u, define_position(&u, "B")).kind(),
            &ContextKind::Namespace("app".to_string())
        );
    }

    #[test]
    fn test_class_scope_and_access() {
        let src = "class GamePlayer {\n#define A 1\npublic:\n#define B 2\nprivate:\n  int x;\n#define C 3\n};\n\
                   struct S {\n#define D 4\n};\n";
        let u = unit(src);
        let r = ScopeResolver::new(&u);
        let ctx = r.context_at(&u, define_position(&u, "A"));
        assert_eq!(
            ctx.kind(),
            &ContextKind::ClassScope {
                name: "GamePlayer".to_string(),
                access: Access::Private,
                keyword: ClassKeyword::Class
            }
        );
        let access = |name| match r.context_at(&u, define_position(&u, name)).kind().clone() {
            ContextKind::ClassScope { access, .. } => access,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(access("B"), Access::Public);
        assert_eq!(access("C"), Access::Private);
        assert_eq!(access("D"), Access::Public);
    }

    #[test]
    fn test_class_with_bases_and_templates() {
        let src = "template <class T> class Box : public Base<T> {\n#define A 1\n};\n";
        let u = unit(src);
        let r = ScopeResolver::new(&u);
        let ctx = r.context_at(&u, define_position(&u, "A"));
        assert!(matches!(ctx.kind(), ContextKind::ClassScope { name, .. } if name == "Box"));
    }

    #[test]
    fn test_function_body_is_block() {
        let src = "int f() {\n#define L 1\n  return L;\n}\nstruct S g() {\n#define M 2\n}\nint arr[] = {\n#define N 3\n1};\n";
        let u = unit(src);
        let r = ScopeResolver::new(&u);
        assert_eq!(r.context_at(&u, define_position(&u, "L")).kind(), &ContextKind::Block);
        assert_eq!(r.context_at(&u, define_position(&u, "M")).kind(), &ContextKind::Block);
        assert_eq!(r.context_at(&u, define_position(&u, "N")).kind(), &ContextKind::Block);

        let in_init = r.context_at(&u, define_position(&u, "N")).scope().unwrap();
        assert_eq!(r.get(in_init).kind, BraceKind::Initializer);
        let in_fn = r.context_at(&u, define_position(&u, "L")).scope().unwrap();
        assert_eq!(r.get(in_fn).kind, BraceKind::Block);
    }

    #[test]
    fn test_extern_c_is_transparent() {
        let u = unit("extern \"C\" {\n#define A 1\n}\n");
        let r = ScopeResolver::new(&u);
        assert_eq!(r.context_at(&u, define_position(&u, "A")).kind(), &ContextKind::GlobalNamespace);
    }

    #[test]
    fn test_qualifier() {
        let src = "namespace ns {\nclass W {\n#define A 1\n};\nint a = 0;\n}\nint b = 0;\n";
        let u = unit(src);
        let r = ScopeResolver::new(&u);
        let def_ctx = r.context_at(&u, define_position(&u, "A"));
        let in_ns = u.tokens.iter().find(|t| t.token.is_ident("a")).unwrap().position;
        let global = u.tokens.iter().find(|t| t.token.is_ident("b")).unwrap().position;
        assert_eq!(r.qualifier(&def_ctx, &r.context_at(&u, in_ns)).as_deref(), Some("W::"));
        assert_eq!(r.qualifier(&def_ctx, &r.context_at(&u, global)).as_deref(), Some("ns::W::"));
        assert_eq!(r.qualifier(&def_ctx, &def_ctx).as_deref(), Some(""));
    }

    #[test]
    fn test_class_body_range() {
        let u = unit("class C {\n#define A 1\n};\nint x;\n");
        let r = ScopeResolver::new(&u);
        let (id, name, _) = r.context_at(&u, define_position(&u, "A")).class_scope().map(|(i, n, a)| (i, n.to_string(), a)).unwrap();
        assert_eq!(name, "C");
        let (open, close) = r.class_body_range(id);
        assert!(open < define_position(&u, "A") && define_position(&u, "A") < close);
        assert!(!r.get(id).contains(u.tokens.last().unwrap().position));
    }
}
