//! 書き換え提案の合成
//!
//! 分類結果ごとに置き換え宣言と必要な編集を作る。安全な書き換えが
//! 作れない場合はエラーにせず、理由付きの却下として返す。

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::classifier::{
    char_type, string_type, ClassInfo, ClassificationResult, Confidence, ConstantType, Hazard, Pattern,
    UnclassifiedReason,
};
use crate::config::Config;
use crate::edit_plan::TextEdit;
use crate::engine::SourceProvider;
use crate::macro_def::{Directive, MacroDefinition, MacroTable};
use crate::scope::{Access, BraceKind, DeclarationContext, ScopeResolver};
use crate::source::{Location, Span};
use crate::token::{StrPrefix, TokenKind};
use crate::token_stream::TranslationUnit;
use crate::usage::UsageIndex;

/// 提案の安全度（低い順）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SafetyTier {
    /// 報告のみ
    Low,
    /// 前提付きで等価
    Medium,
    /// 機械的に等価
    High,
}

impl From<Confidence> for SafetyTier {
    fn from(confidence: Confidence) -> Self {
        match confidence {
            Confidence::High => SafetyTier::High,
            Confidence::Medium => SafetyTier::Medium,
            Confidence::Unrewritable => SafetyTier::Low,
        }
    }
}

impl fmt::Display for SafetyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SafetyTier::High => "High",
            SafetyTier::Medium => "Medium",
            SafetyTier::Low => "Low",
        })
    }
}

/// 書き換え提案
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewriteProposal {
    /// `NAME@path:line`
    pub id: String,
    pub macro_name: String,
    pub pattern: Pattern,
    pub location: Location,
    /// 置き換え宣言
    pub declaration: String,
    /// 代替案
    pub alternative: Option<String>,
    /// 実装ファイルに置くクラス外定義
    pub out_of_class_definition: Option<String>,
    pub edits: Vec<TextEdit>,
    pub tier: SafetyTier,
    pub notes: Vec<String>,
}

/// 合成の結果
#[derive(Debug, Clone)]
pub enum Synthesis {
    Proposed(RewriteProposal),
    /// 分類不能
    Unrewritable { reason: UnclassifiedReason },
    /// 分類できたが安全な書き換えが存在しない
    Rejected { reason: String },
    /// 安全度が `minConfidenceToEmit` 未満
    BelowThreshold(RewriteProposal),
}

/// 書き換え提案の合成器
pub struct Synthesizer<'a> {
    unit: &'a TranslationUnit,
    table: &'a MacroTable,
    scopes: &'a ScopeResolver,
    usage: &'a UsageIndex,
    config: &'a Config,
    provider: &'a dyn SourceProvider,
}

/// 組み立て中の提案
struct Draft {
    id: String,
    declaration: String,
    alternative: Option<String>,
    out_of_class_definition: Option<String>,
    edits: Vec<TextEdit>,
    tier: SafetyTier,
    notes: Vec<String>,
}

impl<'a> Synthesizer<'a> {
    /// 新しい合成器を作成
    pub fn new(
        unit: &'a TranslationUnit,
        table: &'a MacroTable,
        scopes: &'a ScopeResolver,
        usage: &'a UsageIndex,
        config: &'a Config,
        provider: &'a dyn SourceProvider,
    ) -> Self {
        Self {
            unit,
            table,
            scopes,
            usage,
            config,
            provider,
        }
    }

    /// 分類結果から提案を合成
    pub fn synthesize(&self, result: &ClassificationResult) -> Synthesis {
        if let Pattern::Unclassified { reason } = &result.pattern {
            return Synthesis::Unrewritable { reason: reason.clone() };
        }
        let def = self.table.get(result.definition);
        if let Err(reason) = self.check_safety(def) {
            debug!(macro_name = %def.name, %reason, "rewrite rejected");
            return Synthesis::Rejected { reason };
        }

        let location = self.unit.files.location(&def.directive.span);
        let mut draft = Draft {
            id: format!("{}@{}:{}", def.name, location.path.display(), location.line),
            declaration: String::new(),
            alternative: None,
            out_of_class_definition: None,
            edits: Vec::new(),
            tier: SafetyTier::from(result.confidence),
            notes: Vec::new(),
        };

        let built = match &result.pattern {
            Pattern::SimpleConstant { ty } => {
                draft.declaration = format!("const {} {} = {};", ty.cpp_name(), def.name, def.directive.body_text());
                self.qualify_outside_uses(def, None).map(|edits| draft.edits.extend(edits))
            }
            Pattern::PointerConstant { prefix } => {
                self.pointer_constant(def, *prefix, &mut draft);
                self.qualify_outside_uses(def, None).map(|edits| draft.edits.extend(edits))
            }
            Pattern::ClassScopedConstant { class, ty } => self.class_constant(def, class, *ty, &mut draft),
            Pattern::EnumHackCandidate { class, ty } => {
                let init = def.directive.body_text();
                draft.declaration = format!("enum {{ {} = {} }};", def.name, init);
                draft.alternative = Some(format!("static const {} {} = {};", ty.cpp_name(), def.name, init));
                draft.notes.push(
                    "the static const alternative relies on in-class initializer support; \
                     odr-uses additionally need an out-of-class definition"
                        .to_string(),
                );
                self.qualify_outside_uses(def, Some(class))
                    .map(|edits| draft.edits.extend(edits))
            }
            Pattern::FunctionLikeMacro {
                params,
                by_reference,
                class,
            } => {
                self.function_template(def, params, by_reference, class.is_some(), result, &mut draft);
                self.qualify_outside_uses(def, class.as_ref())
                    .map(|edits| draft.edits.extend(edits))
            }
            Pattern::Unclassified { reason } => return Synthesis::Unrewritable { reason: reason.clone() },
        };
        if let Err(reason) = built {
            debug!(macro_name = %def.name, %reason, "rewrite rejected");
            return Synthesis::Rejected { reason };
        }

        self.replace_definition(def, &mut draft);
        self.remove_closing_directives(def, &mut draft);

        let proposal = RewriteProposal {
            id: draft.id,
            macro_name: def.name.clone(),
            pattern: result.pattern.clone(),
            location,
            declaration: draft.declaration,
            alternative: draft.alternative,
            out_of_class_definition: draft.out_of_class_definition,
            edits: draft.edits,
            tier: draft.tier,
            notes: draft.notes,
        };
        if self.config.min_confidence_to_emit.admits(proposal.tier) {
            Synthesis::Proposed(proposal)
        } else {
            Synthesis::BelowThreshold(proposal)
        }
    }

    /// 書き換えを不安全にする使われ方を検査
    fn check_safety(&self, def: &MacroDefinition) -> Result<(), String> {
        if let Some(pp) = self.usage.preprocessor_uses(&def.name).first() {
            return Err(format!(
                "`{}` is tested by #{} at {}; a C++ constant is invisible to the preprocessor",
                def.name,
                pp.directive,
                self.unit.files.location(&pp.span)
            ));
        }
        if let Some(stray) = self.usage.stray_uses(&def.name).first() {
            return Err(format!(
                "identifier `{}` appears outside the macro's active span at {}",
                def.name,
                self.unit.files.location(&stray.span)
            ));
        }
        if let Some(dep) = self.usage.dependencies(def.id).iter().find(|d| d.defined_later) {
            return Err(format!(
                "replacement list refers to macro `{}`, which is defined after `{}`",
                dep.name, def.name
            ));
        }
        if let Some(other) = self.table.definition_across_undef(def.id) {
            return Err(format!(
                "`{}` has another definition at line {} separated by #undef; two declarations of the same name would collide",
                def.name, other.directive.span.line
            ));
        }
        let resolved: BTreeSet<_> = self.usage.sites_named(&def.name).map(|s| s.definition).collect();
        if resolved.len() > 1 {
            return Err(format!(
                "usage sites of `{}` resolve to {} different definitions",
                def.name,
                resolved.len()
            ));
        }
        Ok(())
    }

    /// 文字列定数の宣言
    fn pointer_constant(&self, def: &MacroDefinition, prefix: StrPrefix, draft: &mut Draft) {
        let init = def.directive.body_text();
        let pointer = format!("const {}* const {} = {};", char_type(prefix), def.name, init);
        let string = format!("const {} {}({});", string_type(prefix), def.name, init);
        if self.config.prefer_string_type {
            draft.declaration = string;
            draft.alternative = Some(pointer);
            draft.notes.push("requires #include <string>".to_string());
        } else {
            draft.declaration = pointer;
            draft.alternative = Some(string);
        }
    }

    /// クラス内定数（非整数型はクラス外定義を実装ファイルに置く）
    fn class_constant(
        &self,
        def: &MacroDefinition,
        class: &ClassInfo,
        ty: ConstantType,
        draft: &mut Draft,
    ) -> Result<(), String> {
        let init = def.directive.body_text();
        if ty.is_integral() {
            let decl_ty = ty.declaration_type();
            draft.declaration = format!("static const {} {} = {};", decl_ty, def.name, init);
            draft.alternative = Some(format!("enum {{ {} = {} }};", def.name, init));
        } else {
            let def_ctx = self.scopes.context_at(self.unit, def.directive.position);
            let qualifier = self
                .scopes
                .qualifier(&def_ctx, &DeclarationContext::global())
                .ok_or_else(|| format!("class {} cannot be named outside its enclosing block", class.name))?;
            let (member_ty, out_of_class) = match ty {
                ConstantType::String(prefix) if self.config.prefer_string_type => {
                    draft.notes.push("requires #include <string>".to_string());
                    let string_ty = string_type(prefix);
                    (
                        string_ty.to_string(),
                        format!("const {} {}{}({});", string_ty, qualifier, def.name, init),
                    )
                }
                _ => {
                    let decl_ty = ty.declaration_type();
                    let out = format!("const {} {}{} = {};", decl_ty, qualifier, def.name, init);
                    (decl_ty, out)
                }
            };
            draft.declaration = format!("static const {} {};", member_ty, def.name);
            self.place_out_of_class(def, class, &out_of_class, draft)?;
            draft.out_of_class_definition = Some(out_of_class);
        }
        if class.access != Access::Public {
            draft
                .notes
                .push(format!("member is declared in the {} section of {}", class.access.as_str(), class.name));
        }
        let edits = self.qualify_outside_uses(def, Some(class))?;
        draft.edits.extend(edits);
        Ok(())
    }

    /// クラス外定義の挿入位置を決めて編集を追加
    fn place_out_of_class(
        &self,
        def: &MacroDefinition,
        class: &ClassInfo,
        definition: &str,
        draft: &mut Draft,
    ) -> Result<(), String> {
        let header = self.unit.files.get_path(def.directive.span.file_id);
        if self.is_implementation_file(header) {
            // クラスの `};` の直後に置く
            let scope = self.scopes.get(class.scope);
            let close = scope
                .close_index
                .ok_or_else(|| format!("class {} has no closing brace", class.name))?;
            let last = match self.unit.tokens.get(close + 1) {
                Some(next) if next.token.kind == TokenKind::Semi => &next.token,
                _ => &self.unit.tokens[close].token,
            };
            draft.edits.push(self.edit(&last.span, last.span.end, last.span.end, format!("\n{}", definition), &draft.id));
            return Ok(());
        }

        let companion = self.companion_path(header);
        match self.provider.load(&companion) {
            Ok(bytes) => {
                let sep = if bytes.is_empty() || bytes.ends_with(b"\n") { "" } else { "\n" };
                draft.edits.push(TextEdit {
                    path: companion.clone(),
                    start: bytes.len(),
                    end: bytes.len(),
                    replacement_text: format!("{}{}\n", sep, definition),
                    proposal_id: draft.id.clone(),
                });
                draft
                    .notes
                    .push(format!("out-of-class definition is appended to {}", companion.display()));
            }
            Err(_) => {
                draft.edits.push(TextEdit {
                    path: companion.clone(),
                    start: 0,
                    end: 0,
                    replacement_text: format!("{}\n", definition),
                    proposal_id: draft.id.clone(),
                });
                draft.tier = draft.tier.min(SafetyTier::Medium);
                draft.notes.push(format!(
                    "companion implementation unit {} was not found; it must be created and must include {}",
                    companion.display(),
                    header.display()
                ));
            }
        }
        Ok(())
    }

    fn is_implementation_file(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        ext == self.config.implementation_extension || matches!(ext, "c" | "cc" | "cpp" | "cxx" | "c++")
    }

    /// `foo.h` → `foo.cpp`
    fn companion_path(&self, header: &Path) -> PathBuf {
        header.with_extension(&self.config.implementation_extension)
    }

    /// 定義のスコープ外の使用箇所を `ns::Class::NAME` の形に修飾
    ///
    /// 宣言を置けない波括弧の中の定義、外から名前を引けないブロック内の定義や
    /// 非公開メンバー、他のマクロの置換列を経由してスコープ外に届く参照は却下する。
    fn qualify_outside_uses(&self, def: &MacroDefinition, class: Option<&ClassInfo>) -> Result<Vec<TextEdit>, String> {
        let def_ctx = self.scopes.context_at(self.unit, def.directive.position);
        let Some(scope_id) = def_ctx.scope() else {
            return Ok(Vec::new());
        };
        let scope = self.scopes.get(scope_id);
        let place = match class {
            Some(class) => format!("class {}", class.name),
            None => def_ctx.describe(),
        };
        let unplaceable = match scope.kind {
            BraceKind::Enum => Some("an enumerator list"),
            BraceKind::Initializer => Some("a brace initializer"),
            _ => None,
        };
        if let Some(what) = unplaceable {
            return Err(format!("defined inside {}, where a declaration cannot be placed", what));
        }

        let indirect = self.usage.indirect_uses(self.table, def.id);
        if let Some(escape) = indirect.iter().find(|u| !scope.contains(u.position)) {
            return Err(format!(
                "`{}` is reached through macro `{}` at {}, outside the {}; the replacement list would lose the name",
                def.name,
                self.table.get(escape.via).name,
                self.unit.files.location(&escape.span),
                place
            ));
        }

        let mut edits = Vec::new();
        for site in self.usage.sites_of(def.id).filter(|s| !scope.contains(s.position)) {
            if let Some(class) = class.filter(|c| c.access != Access::Public) {
                return Err(format!(
                    "`{}` is used outside class {} at {} but would become a {} member",
                    def.name,
                    class.name,
                    self.unit.files.location(&site.name_span),
                    class.access.as_str()
                ));
            }
            let qualifier = self.scopes.qualifier(&def_ctx, &site.context).ok_or_else(|| {
                format!(
                    "use of `{}` at {} is outside the {} and cannot be qualified",
                    def.name,
                    self.unit.files.location(&site.name_span),
                    place
                )
            })?;
            if qualifier.is_empty() {
                continue;
            }
            edits.push(self.edit(
                &site.name_span,
                site.name_span.start,
                site.name_span.end,
                format!("{}{}", qualifier, def.name),
                &self.proposal_id_of(def),
            ));
        }
        Ok(edits)
    }

    /// テンプレート関数の宣言
    fn function_template(
        &self,
        def: &MacroDefinition,
        params: &[String],
        by_reference: &[bool],
        in_class: bool,
        result: &ClassificationResult,
        draft: &mut Draft,
    ) {
        let body = &def.directive.body;
        let type_params = template_parameter_names(params.len(), |name| body.iter().any(|t| t.is_ident(name)));
        let header = type_params
            .iter()
            .map(|t| format!("typename {}", t))
            .collect::<Vec<_>>()
            .join(", ");
        let args = params
            .iter()
            .zip(&type_params)
            .zip(by_reference)
            .map(|((param, ty), by_ref)| {
                if *by_ref {
                    format!("{}& {}", ty, param)
                } else {
                    format!("const {}& {}", ty, param)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        let specifier = if in_class { "static" } else { "inline" };
        draft.declaration = format!(
            "template<{}>\n{} auto {}({}) {{ return {}; }}",
            header,
            specifier,
            def.name,
            args,
            def.directive.body_text()
        );
        for hazard in &result.hazards {
            if let Hazard::RepeatedEvaluation { param, .. } = hazard {
                draft.notes.push(format!(
                    "argument for `{}` is now evaluated exactly once; callers relying on repeated side effects change behavior",
                    param
                ));
            }
        }
        if by_reference.iter().any(|b| *b) {
            draft
                .notes
                .push("modified parameters are taken by non-const reference; arguments must be lvalues".to_string());
        }
    }

    /// 定義行を宣言で置き換え、同一内容の再定義行を削除
    fn replace_definition(&self, def: &MacroDefinition, draft: &mut Draft) {
        let span = &def.directive.span;
        draft
            .edits
            .push(self.edit(span, span.start, span.end, draft.declaration.clone(), &draft.id));
        for &dup in &def.duplicates {
            let directive = &self.table.get(dup).directive;
            draft.edits.push(self.remove_line(directive, &draft.id));
            draft.notes.push(format!(
                "identical redefinition at {} is removed",
                self.unit.files.location(&directive.span)
            ));
        }
    }

    /// 有効区間を閉じる #undef を削除
    fn remove_closing_directives(&self, def: &MacroDefinition, draft: &mut Draft) {
        if let Some(undef) = &def.undef {
            draft.edits.push(self.remove_line(undef, &draft.id));
            draft
                .notes
                .push(format!("#undef at {} is removed", self.unit.files.location(&undef.span)));
        }
    }

    /// ディレクティブ行を改行ごと削除
    fn remove_line(&self, directive: &Directive, id: &str) -> TextEdit {
        let span = &directive.span;
        let line_start = span.start.saturating_sub(span.column.saturating_sub(1) as usize);
        self.edit(span, line_start, directive.line_end, String::new(), id)
    }

    fn edit(&self, span: &Span, start: usize, end: usize, replacement_text: String, id: &str) -> TextEdit {
        TextEdit {
            path: self.unit.files.get_path(span.file_id).to_path_buf(),
            start,
            end,
            replacement_text,
            proposal_id: id.to_string(),
        }
    }

    fn proposal_id_of(&self, def: &MacroDefinition) -> String {
        let location = self.unit.files.location(&def.directive.span);
        format!("{}@{}:{}", def.name, location.path.display(), location.line)
    }
}

/// 本体の識別子と衝突しないテンプレート仮引数名（T1, T2, ...）
fn template_parameter_names(count: usize, taken: impl Fn(&str) -> bool) -> Vec<String> {
    (1..=count)
        .map(|i| {
            let mut name = format!("T{}", i);
            while taken(&name) {
                name.push('_');
            }
            name
        })
        .collect()
}
