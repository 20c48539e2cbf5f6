//! マクロ定義と管理
//!
//! #define / #undef をディレクティブとして保持し、名前ごとの有効区間
//! （定義位置から対応する #undef・再定義・翻訳単位末尾まで）を記録する。
//! マクロテーブルは蓄積のみを行い、構築後は読み取り専用で使われる。

use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;

use crate::source::Span;
use crate::token::{Token, TokenKind, join_tokens};
use crate::token_stream::{BranchStep, Reachability, branches_exclusive};

/// ディレクティブの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DirectiveKind {
    Define,
    Undef,
}

/// #define / #undef ディレクティブ
#[derive(Debug, Clone)]
pub struct Directive {
    pub kind: DirectiveKind,
    /// マクロ名
    pub name: String,
    /// マクロ名トークンの位置
    pub name_span: Span,
    /// 仮引数（オブジェクトマクロなら空）
    pub params: Vec<String>,
    /// `NAME(` 形式で定義されたか（空の仮引数リストを含む）
    pub is_function_like: bool,
    /// 可変引数 `...` を取るか
    pub is_variadic: bool,
    /// 置換トークン列
    pub body: Vec<Token>,
    /// `#` から行末（継続行を含む、改行は含まない）まで
    pub span: Span,
    /// 終端の改行を含めた行末オフセット
    pub line_end: usize,
    pub reachability: Reachability,
    /// 条件コンパイルの分岐経路（外側から順）
    pub branch: Vec<BranchStep>,
    /// 翻訳単位内の通し位置
    pub position: usize,
    /// インクルードガード用の定義か
    pub include_guard: bool,
}

impl Directive {
    /// 置換列を元の空白で連結した文字列
    pub fn body_text(&self) -> String {
        join_tokens(&self.body)
    }

    /// 同一の定義か（仮引数と置換列の綴りが一致）
    pub fn same_definition(&self, other: &Directive) -> bool {
        self.params == other.params
            && self.is_function_like == other.is_function_like
            && self.is_variadic == other.is_variadic
            && self.body.len() == other.body.len()
            && self
                .body
                .iter()
                .zip(&other.body)
                .enumerate()
                .all(|(i, (a, b))| a.lexeme == b.lexeme && (i == 0 || a.leading_space == b.leading_space))
    }

    /// 置換列に # / ## を含むか
    pub fn has_stringizing(&self) -> bool {
        self.body.iter().any(|t| t.kind == TokenKind::Hash)
    }

    pub fn has_token_pasting(&self) -> bool {
        self.body.iter().any(|t| t.kind == TokenKind::HashHash)
    }
}

/// マクロ定義の識別子（テーブル内のインデックス）
pub type DefinitionId = usize;

/// 有効区間がどのように閉じられたか
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpanClose {
    /// 翻訳単位の末尾まで有効
    EndOfUnit,
    /// #undef で閉じられた
    Undef { position: usize },
    /// 別の値での再定義で閉じられた
    Redefinition { position: usize, by: DefinitionId },
    /// 排他的な分岐内の定義に引き継がれた
    ExclusiveBranch { position: usize, by: DefinitionId },
    /// 有効にならない（無効ブランチ、同一再定義）
    Never,
}

/// 直前の定義との関係
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Redefinition {
    None,
    /// 同一内容の再定義（無害）
    Identical { of: DefinitionId },
    /// 異なる内容での再定義
    Conflicting { previous: DefinitionId },
    /// 排他的な分岐での定義
    Exclusive { previous: DefinitionId },
}

/// マクロ定義（有効区間付き）
#[derive(Debug, Clone)]
pub struct MacroDefinition {
    pub id: DefinitionId,
    pub name: String,
    pub directive: Directive,
    /// 有効区間の開始位置（定義位置）
    pub start: usize,
    /// 有効区間の終了位置（排他的）
    pub end: usize,
    pub closed_by: SpanClose,
    pub redefinition: Redefinition,
    /// 区間を閉じた #undef
    pub undef: Option<Directive>,
    /// この定義に吸収された同一内容の再定義
    pub duplicates: Vec<DefinitionId>,
}

impl MacroDefinition {
    /// 有効区間が空でないか
    pub fn is_active_span_nonempty(&self) -> bool {
        self.start < self.end
    }

    /// 位置が有効区間内か
    pub fn is_active_at(&self, position: usize) -> bool {
        self.start <= position && position < self.end
    }

    pub fn is_function_like(&self) -> bool {
        self.directive.is_function_like
    }
}

/// マクロテーブル
#[derive(Debug, Default)]
pub struct MacroTable {
    definitions: Vec<MacroDefinition>,
    /// 名前ごとの定義（定義順）
    by_name: HashMap<String, Vec<DefinitionId>>,
    /// 名前ごとの全ディレクティブ履歴
    history: HashMap<String, Vec<Directive>>,
    /// 現在有効な定義
    active: HashMap<String, DefinitionId>,
}

impl MacroTable {
    /// 新しいマクロテーブルを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// ディレクティブを記録
    pub fn record(&mut self, directive: Directive) {
        self.history
            .entry(directive.name.clone())
            .or_default()
            .push(directive.clone());

        match directive.kind {
            DirectiveKind::Undef => {
                if directive.reachability != Reachability::Disabled {
                    let position = directive.position;
                    let name = directive.name.clone();
                    if let Some(id) = self.undefine(&name, position) {
                        self.definitions[id].undef = Some(directive);
                    }
                }
            }
            DirectiveKind::Define => self.define(directive),
        }
    }

    fn define(&mut self, directive: Directive) {
        let id = self.definitions.len();
        let position = directive.position;
        let name = directive.name.clone();
        let mut def = MacroDefinition {
            id,
            name: name.clone(),
            start: position,
            end: usize::MAX,
            closed_by: SpanClose::EndOfUnit,
            redefinition: Redefinition::None,
            undef: None,
            duplicates: Vec::new(),
            directive,
        };

        if def.directive.reachability == Reachability::Disabled {
            // 無効ブランチの定義は履歴にのみ残る
            def.end = position;
            def.closed_by = SpanClose::Never;
        } else if let Some(&prev_id) = self.active.get(&name) {
            let prev = &mut self.definitions[prev_id];
            if branches_exclusive(&prev.directive.branch, &def.directive.branch) {
                prev.end = position;
                prev.closed_by = SpanClose::ExclusiveBranch { position, by: id };
                def.redefinition = Redefinition::Exclusive { previous: prev_id };
                self.active.insert(name.clone(), id);
            } else if prev.directive.same_definition(&def.directive) {
                prev.duplicates.push(id);
                def.end = position;
                def.closed_by = SpanClose::Never;
                def.redefinition = Redefinition::Identical { of: prev_id };
            } else {
                warn!(
                    macro_name = %name,
                    line = def.directive.span.line,
                    previous_line = prev.directive.span.line,
                    "macro redefined with a different replacement"
                );
                prev.end = position;
                prev.closed_by = SpanClose::Redefinition { position, by: id };
                def.redefinition = Redefinition::Conflicting { previous: prev_id };
                self.active.insert(name.clone(), id);
            }
        } else {
            self.active.insert(name.clone(), id);
        }

        self.by_name.entry(name).or_default().push(id);
        self.definitions.push(def);
    }

    /// 有効区間を閉じる（閉じた定義があれば返す）
    pub fn undefine(&mut self, name: &str, position: usize) -> Option<DefinitionId> {
        let id = self.active.remove(name)?;
        let def = &mut self.definitions[id];
        def.end = position;
        def.closed_by = SpanClose::Undef { position };
        Some(id)
    }

    /// 翻訳単位の末尾で開いている区間を閉じる
    pub fn finish(&mut self, end_position: usize) {
        for (_, id) in self.active.drain() {
            self.definitions[id].end = end_position;
        }
    }

    /// 位置で有効な定義を取得（なければ None。「マクロではない」を意味する）
    pub fn active_definition_at(&self, name: &str, position: usize) -> Option<&MacroDefinition> {
        self.by_name
            .get(name)?
            .iter()
            .map(|&id| &self.definitions[id])
            .find(|def| def.is_active_at(position))
    }

    /// 位置より後に定義される最初の定義
    pub fn next_definition_after(&self, name: &str, position: usize) -> Option<&MacroDefinition> {
        self.by_name
            .get(name)?
            .iter()
            .map(|&id| &self.definitions[id])
            .find(|def| def.start > position && def.is_active_span_nonempty())
    }

    /// IDから定義を取得
    pub fn get(&self, id: DefinitionId) -> &MacroDefinition {
        &self.definitions[id]
    }

    /// 名前の定義一覧（定義順）
    pub fn definitions_of(&self, name: &str) -> impl Iterator<Item = &MacroDefinition> {
        self.by_name
            .get(name)
            .into_iter()
            .flatten()
            .map(|&id| &self.definitions[id])
    }

    /// 名前の全ディレクティブ履歴
    pub fn history(&self, name: &str) -> &[Directive] {
        self.history.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// マクロ名として現れたことがあるか
    pub fn is_macro_name(&self, name: &str) -> bool {
        self.history.contains_key(name)
    }

    /// 全定義をイテレート（定義順）
    pub fn iter(&self) -> impl Iterator<Item = &MacroDefinition> {
        self.definitions.iter()
    }

    /// 定義数を返す
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// テーブルが空かどうか
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// 有効区間の途中で異なる内容に再定義した相手（前後どちらか）
    pub fn conflicting_definition(&self, id: DefinitionId) -> Option<&MacroDefinition> {
        let def = &self.definitions[id];
        if !def.is_active_span_nonempty() {
            return None;
        }
        if let SpanClose::Redefinition { by, .. } = def.closed_by {
            return Some(&self.definitions[by]);
        }
        match def.redefinition {
            Redefinition::Conflicting { previous } => Some(&self.definitions[previous]),
            _ => None,
        }
    }

    /// #undef で区切られた別の有効区間を持つ同名の定義（排他分岐は除く）
    pub fn definition_across_undef(&self, id: DefinitionId) -> Option<&MacroDefinition> {
        let def = &self.definitions[id];
        if !def.is_active_span_nonempty() {
            return None;
        }
        let conflicting = self.conflicting_definition(id).map(|d| d.id);
        self.definitions_of(&def.name).find(|other| {
            other.id != id
                && Some(other.id) != conflicting
                && other.is_active_span_nonempty()
                && !branches_exclusive(&def.directive.branch, &other.directive.branch)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::source::FileId;

    fn directive(kind: DirectiveKind, name: &str, body: &str, position: usize) -> Directive {
        let body = tokenize(body.as_bytes(), FileId::default()).unwrap();
        Directive {
            kind,
            name: name.to_string(),
            name_span: Span::default(),
            params: Vec::new(),
            is_function_like: false,
            is_variadic: false,
            body,
            span: Span::default(),
            line_end: 0,
            reachability: Reachability::Unconditional,
            branch: Vec::new(),
            position,
            include_guard: false,
        }
    }

    #[test]
    fn test_define_and_lookup() {
        let mut table = MacroTable::new();
        table.record(directive(DirectiveKind::Define, "ASPECT_RATIO", "1.653", 3));
        table.finish(100);

        assert!(table.active_definition_at("ASPECT_RATIO", 2).is_none());
        let def = table.active_definition_at("ASPECT_RATIO", 50).unwrap();
        assert_eq!(def.directive.body_text(), "1.653");
        assert_eq!(def.closed_by, SpanClose::EndOfUnit);
        assert!(table.active_definition_at("OTHER", 50).is_none());
    }

    #[test]
    fn test_undef_closes_span() {
        let mut table = MacroTable::new();
        table.record(directive(DirectiveKind::Define, "N", "5", 1));
        table.record(directive(DirectiveKind::Undef, "N", "", 10));
        table.finish(20);

        assert!(table.active_definition_at("N", 9).is_some());
        assert!(table.active_definition_at("N", 10).is_none());
        let def = table.get(0);
        assert_eq!(def.closed_by, SpanClose::Undef { position: 10 });
        assert!(def.undef.is_some());
        assert_eq!(table.history("N").len(), 2);
    }

    #[test]
    fn test_conflicting_redefinition() {
        let mut table = MacroTable::new();
        table.record(directive(DirectiveKind::Define, "N", "5", 1));
        table.record(directive(DirectiveKind::Define, "N", "6", 4));
        table.finish(20);

        assert_eq!(table.active_definition_at("N", 3).unwrap().id, 0);
        assert_eq!(table.active_definition_at("N", 5).unwrap().id, 1);
        assert_eq!(table.get(1).redefinition, Redefinition::Conflicting { previous: 0 });
        assert_eq!(table.conflicting_definition(0).map(|d| d.id), Some(1));
    }

    #[test]
    fn test_redefinition_after_undef_is_not_a_conflict() {
        let mut table = MacroTable::new();
        table.record(directive(DirectiveKind::Define, "N", "1", 1));
        table.record(directive(DirectiveKind::Undef, "N", "", 5));
        table.record(directive(DirectiveKind::Define, "N", "2", 8));
        table.finish(20);

        assert!(table.conflicting_definition(0).is_none());
        assert!(table.conflicting_definition(1).is_none());
        assert_eq!(table.get(1).redefinition, Redefinition::None);
        assert_eq!(table.definition_across_undef(0).map(|d| d.id), Some(1));
        assert_eq!(table.definition_across_undef(1).map(|d| d.id), Some(0));
    }

    #[test]
    fn test_identical_redefinition_is_benign() {
        let mut table = MacroTable::new();
        table.record(directive(DirectiveKind::Define, "N", "5", 1));
        table.record(directive(DirectiveKind::Define, "N", "5", 4));
        table.finish(20);

        let first = table.get(0);
        assert_eq!(first.duplicates, vec![1]);
        assert!(first.is_active_at(10));
        assert!(!table.get(1).is_active_span_nonempty());
        assert!(table.conflicting_definition(0).is_none());
    }

    #[test]
    fn test_exclusive_branches_do_not_conflict() {
        let mut table = MacroTable::new();
        let mut a = directive(DirectiveKind::Define, "N", "1", 2);
        a.reachability = Reachability::Conditional;
        a.branch = vec![BranchStep { group: 0, branch: 0 }];
        let mut b = directive(DirectiveKind::Define, "N", "2", 5);
        b.reachability = Reachability::Conditional;
        b.branch = vec![BranchStep { group: 0, branch: 1 }];
        table.record(a);
        table.record(b);
        table.finish(20);

        assert!(table.conflicting_definition(0).is_none());
        assert!(table.definition_across_undef(0).is_none());
        assert_eq!(table.get(1).redefinition, Redefinition::Exclusive { previous: 0 });
    }

    #[test]
    fn test_disabled_definition_never_active() {
        let mut table = MacroTable::new();
        let mut d = directive(DirectiveKind::Define, "N", "1", 2);
        d.reachability = Reachability::Disabled;
        table.record(d);
        table.finish(20);

        assert!(table.active_definition_at("N", 10).is_none());
        assert_eq!(table.get(0).closed_by, SpanClose::Never);
        assert!(table.is_macro_name("N"));
    }
}
