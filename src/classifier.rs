//! マクロ分類モジュール
//!
//! 各マクロ定義を置換列・使用箇所・宣言コンテキストから次のいずれかに分類する:
//! - 単純定数 / ポインタ（文字列）定数
//! - クラス内定数 / enum hack 候補
//! - テンプレート inline 関数で置き換え可能な関数マクロ
//! - 分類不能（理由付き）
//!
//! 関数マクロの危険（引数の多重評価、括弧の不足）は書き換えの可否に
//! かかわらず常に記録する。

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::config::ClassConstantStyle;
use crate::const_expr::{ConstEvaluator, ScalarType};
use crate::macro_def::{DefinitionId, Directive, MacroDefinition, MacroTable};
use crate::scope::{Access, DeclarationContext, ScopeId, ScopeResolver};
use crate::token::{StrPrefix, Token, TokenKind};
use crate::token_stream::{Reachability, TranslationUnit};
use crate::usage::{MacroDependency, UsageIndex};

/// 分類の確信度（低い順に並ぶ）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Confidence {
    Unrewritable,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Confidence::High => "High",
            Confidence::Medium => "Medium",
            Confidence::Unrewritable => "Unrewritable",
        })
    }
}

/// 定数の型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConstantType {
    Scalar(ScalarType),
    /// 文字列リテラル（エンコーディング接頭辞付き）
    String(StrPrefix),
}

impl ConstantType {
    /// 整数型（enum や in-class 初期化子が使える）か
    pub fn is_integral(self) -> bool {
        matches!(self, ConstantType::Scalar(ty) if ty.is_integral())
    }

    /// 宣言に使う C++ の型（文字列は `const CharT* const`）
    pub fn declaration_type(self) -> String {
        match self {
            ConstantType::Scalar(ty) => ty.cpp_name().to_string(),
            ConstantType::String(prefix) => format!("{}* const", char_type(prefix)),
        }
    }
}

/// 文字列リテラルの要素型
pub fn char_type(prefix: StrPrefix) -> &'static str {
    match prefix {
        StrPrefix::None | StrPrefix::Utf8 => "char",
        StrPrefix::Wide => "wchar_t",
        StrPrefix::Utf16 => "char16_t",
        StrPrefix::Utf32 => "char32_t",
    }
}

/// 文字列リテラルに対応する値型の文字列クラス
pub fn string_type(prefix: StrPrefix) -> &'static str {
    match prefix {
        StrPrefix::None | StrPrefix::Utf8 => "std::string",
        StrPrefix::Wide => "std::wstring",
        StrPrefix::Utf16 => "std::u16string",
        StrPrefix::Utf32 => "std::u32string",
    }
}

/// マクロが属するクラス
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassInfo {
    #[serde(skip)]
    pub scope: ScopeId,
    pub name: String,
    pub access: Access,
}

/// 分類不能の理由
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum UnclassifiedReason {
    EmptyBody,
    Statement,
    Stringizing,
    TokenPasting,
    Variadic,
    NoParameters,
    ParameterAsType { param: String },
    NotAnExpression(String),
    NotConstant(String),
    DependsOnUnclassified { name: String },
    ArityMismatch { name: String, expected: usize, found: usize },
    AmbiguousDefinition { other_line: u32 },
    SelfReference { name: String },
}

impl fmt::Display for UnclassifiedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnclassifiedReason::EmptyBody => write!(f, "empty replacement list"),
            UnclassifiedReason::Statement => write!(f, "replacement list is a statement or multiple statements"),
            UnclassifiedReason::Stringizing => write!(f, "uses the stringizing operator `#`"),
            UnclassifiedReason::TokenPasting => write!(f, "uses the token-pasting operator `##`"),
            UnclassifiedReason::Variadic => write!(f, "takes variadic arguments"),
            UnclassifiedReason::NoParameters => write!(f, "function-like macro without parameters"),
            UnclassifiedReason::ParameterAsType { param } => write!(f, "parameter `{}` is used as a type", param),
            UnclassifiedReason::NotAnExpression(why) => write!(f, "replacement list is not a single expression ({})", why),
            UnclassifiedReason::NotConstant(why) => write!(f, "replacement list {}", why),
            UnclassifiedReason::DependsOnUnclassified { name } => {
                write!(f, "refers to macro `{}`, which is itself unclassified", name)
            }
            UnclassifiedReason::ArityMismatch { name, expected, found } => write!(
                f,
                "invokes macro `{}` with {} argument(s) but it takes {}",
                name, found, expected
            ),
            UnclassifiedReason::AmbiguousDefinition { other_line } => write!(
                f,
                "ambiguous definition: conflicting definition of the same name at line {}",
                other_line
            ),
            UnclassifiedReason::SelfReference { name } => write!(f, "recursive reference to `{}`", name),
        }
    }
}

/// 分類パターン
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "tag")]
pub enum Pattern {
    SimpleConstant { ty: ScalarType },
    PointerConstant { prefix: StrPrefix },
    ClassScopedConstant { class: ClassInfo, ty: ConstantType },
    EnumHackCandidate { class: ClassInfo, ty: ScalarType },
    FunctionLikeMacro {
        params: Vec<String>,
        /// 本体で書き換えられる仮引数（非 const 参照で受ける）
        by_reference: Vec<bool>,
        class: Option<ClassInfo>,
    },
    Unclassified { reason: UnclassifiedReason },
}

impl Pattern {
    /// パターン名
    pub fn tag(&self) -> &'static str {
        match self {
            Pattern::SimpleConstant { .. } => "SimpleConstant",
            Pattern::PointerConstant { .. } => "PointerConstant",
            Pattern::ClassScopedConstant { .. } => "ClassScopedConstant",
            Pattern::EnumHackCandidate { .. } => "EnumHackCandidate",
            Pattern::FunctionLikeMacro { .. } => "FunctionLikeMacro",
            Pattern::Unclassified { .. } => "Unclassified",
        }
    }

    pub fn is_unclassified(&self) -> bool {
        matches!(self, Pattern::Unclassified { .. })
    }
}

/// 関数マクロの危険
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum Hazard {
    /// 仮引数が複数回現れ、実引数の副作用が重複する
    RepeatedEvaluation { param: String, count: usize },
    /// 仮引数の使用が括弧で囲まれていない
    UnparenthesizedParameter { param: String },
    /// 本体全体が括弧で囲まれていない
    UnparenthesizedBody,
}

impl fmt::Display for Hazard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hazard::RepeatedEvaluation { param, count } => {
                write!(f, "parameter `{}` is evaluated {} times", param, count)
            }
            Hazard::UnparenthesizedParameter { param } => {
                write!(f, "parameter `{}` is used without enclosing parentheses", param)
            }
            Hazard::UnparenthesizedBody => write!(f, "replacement list is not enclosed in parentheses"),
        }
    }
}

/// 分類結果
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationResult {
    pub name: String,
    pub definition: DefinitionId,
    pub pattern: Pattern,
    pub confidence: Confidence,
    /// 判定に使った根拠
    pub evidence: Vec<String>,
    pub hazards: Vec<Hazard>,
    /// 他マクロを展開済みの置換列（オブジェクトマクロの定数のみ）
    #[serde(skip)]
    pub expanded: Vec<Token>,
}

impl ClassificationResult {
    fn unclassified(def: &MacroDefinition, reason: UnclassifiedReason, evidence: Vec<String>, hazards: Vec<Hazard>) -> Self {
        Self {
            name: def.name.clone(),
            definition: def.id,
            pattern: Pattern::Unclassified { reason },
            confidence: Confidence::Unrewritable,
            evidence,
            hazards,
            expanded: Vec::new(),
        }
    }
}

/// マクロ分類器
pub struct Classifier<'a> {
    unit: &'a TranslationUnit,
    table: &'a MacroTable,
    scopes: &'a ScopeResolver,
    usage: &'a UsageIndex,
    style: ClassConstantStyle,
    results: HashMap<DefinitionId, ClassificationResult>,
    /// 分類中の定義（循環参照の検出用）
    in_progress: HashSet<DefinitionId>,
}

impl<'a> Classifier<'a> {
    /// 新しい分類器を作成
    pub fn new(
        unit: &'a TranslationUnit,
        table: &'a MacroTable,
        scopes: &'a ScopeResolver,
        usage: &'a UsageIndex,
        style: ClassConstantStyle,
    ) -> Self {
        Self {
            unit,
            table,
            scopes,
            usage,
            style,
            results: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    /// 有効区間が空でない全定義を分類（定義順）
    pub fn classify_all(mut self) -> Vec<ClassificationResult> {
        let ids: Vec<DefinitionId> = self
            .table
            .iter()
            .filter(|d| d.is_active_span_nonempty() && !d.directive.include_guard)
            .map(|d| d.id)
            .collect();
        for &id in &ids {
            self.classify(id);
        }
        ids.into_iter().filter_map(|id| self.results.remove(&id)).collect()
    }

    /// 定義を分類（メモ化）
    pub fn classify(&mut self, id: DefinitionId) -> &ClassificationResult {
        if !self.results.contains_key(&id) {
            self.in_progress.insert(id);
            let def = self.table.get(id);
            let result = if def.is_function_like() {
                self.classify_function(def)
            } else {
                self.classify_object(def)
            };
            self.in_progress.remove(&id);
            debug!(
                macro_name = %result.name,
                pattern = result.pattern.tag(),
                confidence = %result.confidence,
                "classified"
            );
            self.results.insert(id, result);
        }
        &self.results[&id]
    }

    /// オブジェクトマクロの分類
    fn classify_object(&mut self, def: &'a MacroDefinition) -> ClassificationResult {
        let directive = &def.directive;
        let mut evidence = vec!["object-like macro".to_string()];

        if let Some(other) = self.table.conflicting_definition(def.id) {
            let reason = UnclassifiedReason::AmbiguousDefinition {
                other_line: other.directive.span.line,
            };
            return ClassificationResult::unclassified(def, reason, evidence, Vec::new());
        }
        if let Some(reason) = structural_reason(directive) {
            return ClassificationResult::unclassified(def, reason, evidence, Vec::new());
        }

        let mut confidence = Confidence::High;
        let expanded = match self.expand_object_body(def, &mut evidence, &mut confidence) {
            Ok(tokens) => tokens,
            Err(reason) => return ClassificationResult::unclassified(def, reason, evidence, Vec::new()),
        };

        let ty = if let Some(prefix) = string_literal_prefix(&expanded) {
            match prefix {
                Ok(prefix) => {
                    evidence.push("replacement list is a string literal".to_string());
                    ConstantType::String(prefix)
                }
                Err(reason) => return ClassificationResult::unclassified(def, reason, evidence, Vec::new()),
            }
        } else {
            match ConstEvaluator::new(&expanded).evaluate() {
                Ok(value) => {
                    evidence.push(format!("replacement list folds to a constant of type {}", value.ty));
                    if value.ambiguous {
                        confidence = confidence.min(Confidence::Medium);
                        evidence.push(format!(
                            "type is ambiguous (signedness or literal width); widest lossless type {} chosen",
                            value.ty
                        ));
                    }
                    ConstantType::Scalar(value.ty)
                }
                Err(err) => {
                    let reason = UnclassifiedReason::NotConstant(err.to_string());
                    return ClassificationResult::unclassified(def, reason, evidence, Vec::new());
                }
            }
        };

        self.apply_reachability(def, &mut confidence, &mut evidence);

        let ctx = self.scopes.context_at(self.unit, directive.position);
        let pattern = match ctx.class_scope() {
            Some((scope, class_name, access)) => {
                let class = ClassInfo {
                    scope,
                    name: class_name.to_string(),
                    access,
                };
                evidence.push(format!("defined inside {}", ctx.describe()));
                self.check_class_pollution(def, scope, &mut confidence, &mut evidence);
                let const_use = self
                    .usage
                    .sites_of(def.id)
                    .any(|s| s.const_expr_in_class == Some(scope));
                if const_use {
                    evidence.push(format!("used in a constant-expression position inside class {}", class.name));
                }
                let enum_hack = match (ty, self.style) {
                    (ConstantType::Scalar(s), ClassConstantStyle::Auto) => s.is_integral() && const_use,
                    (ConstantType::Scalar(s), ClassConstantStyle::EnumHack) => s.is_integral(),
                    _ => false,
                };
                match ty {
                    ConstantType::Scalar(s) if enum_hack => Pattern::EnumHackCandidate { class, ty: s },
                    _ => Pattern::ClassScopedConstant { class, ty },
                }
            }
            None => {
                if ctx.is_block() {
                    confidence = confidence.min(Confidence::Medium);
                    evidence.push("defined inside a local block".to_string());
                }
                self.check_scope_escape(def, &ctx, &mut confidence, &mut evidence);
                match ty {
                    ConstantType::Scalar(s) => Pattern::SimpleConstant { ty: s },
                    ConstantType::String(prefix) => Pattern::PointerConstant { prefix },
                }
            }
        };

        ClassificationResult {
            name: def.name.clone(),
            definition: def.id,
            pattern,
            confidence,
            evidence,
            hazards: Vec::new(),
            expanded,
        }
    }

    /// 参照している定数マクロを展開した置換列を作る
    fn expand_object_body(
        &mut self,
        def: &'a MacroDefinition,
        evidence: &mut Vec<String>,
        confidence: &mut Confidence,
    ) -> Result<Vec<Token>, UnclassifiedReason> {
        let deps: HashMap<usize, &MacroDependency> = self
            .usage
            .dependencies(def.id)
            .iter()
            .map(|d| (d.body_index, d))
            .collect();
        let mut out = Vec::new();
        for (i, token) in def.directive.body.iter().enumerate() {
            let Some(dep) = deps.get(&i) else {
                out.push(token.clone());
                continue;
            };
            if dep.self_reference {
                return Err(UnclassifiedReason::SelfReference { name: dep.name.clone() });
            }
            let Some(dep_id) = dep.resolved else {
                out.push(token.clone());
                continue;
            };
            let dep_def = self.table.get(dep_id);
            self.check_dependency(dep, dep_def)?;
            if dep_def.is_function_like() {
                return Err(UnclassifiedReason::NotConstant(format!(
                    "invokes function-like macro `{}`",
                    dep.name
                )));
            }
            let dep_result = self.classify(dep_id);
            if dep_result.pattern.is_unclassified() {
                return Err(UnclassifiedReason::DependsOnUnclassified { name: dep.name.clone() });
            }
            if dep_result.confidence < *confidence {
                *confidence = dep_result.confidence;
                evidence.push(format!("depends on {}-confidence macro `{}`", dep_result.confidence, dep.name));
            }
            evidence.push(format!("expands macro `{}`", dep.name));
            out.extend(dep_result.expanded.iter().map(|t| t.expanded(t.depth + 1)));
        }
        Ok(out)
    }

    /// 依存先の循環・引数の数を検査
    fn check_dependency(&self, dep: &MacroDependency, dep_def: &MacroDefinition) -> Result<(), UnclassifiedReason> {
        if self.in_progress.contains(&dep_def.id) {
            return Err(UnclassifiedReason::SelfReference { name: dep.name.clone() });
        }
        if dep_def.is_function_like() {
            if let Some(found) = dep.call_arity {
                let expected = dep_def.directive.params.len();
                let ok = if dep_def.directive.is_variadic {
                    found >= expected
                } else {
                    found == expected || (expected == 1 && found == 0)
                };
                if !ok {
                    return Err(UnclassifiedReason::ArityMismatch {
                        name: dep.name.clone(),
                        expected,
                        found,
                    });
                }
            }
        }
        Ok(())
    }

    /// 関数マクロの分類
    fn classify_function(&mut self, def: &'a MacroDefinition) -> ClassificationResult {
        let directive = &def.directive;
        let params = &directive.params;
        let hazards = function_hazards(params, &directive.body);
        let mut evidence = vec![format!("function-like macro with {} parameter(s)", params.len())];
        evidence.extend(hazards.iter().map(|h| format!("hazard: {}", h)));

        if let Some(other) = self.table.conflicting_definition(def.id) {
            let reason = UnclassifiedReason::AmbiguousDefinition {
                other_line: other.directive.span.line,
            };
            return ClassificationResult::unclassified(def, reason, evidence, hazards);
        }
        if directive.is_variadic {
            return ClassificationResult::unclassified(def, UnclassifiedReason::Variadic, evidence, hazards);
        }
        if params.is_empty() {
            return ClassificationResult::unclassified(def, UnclassifiedReason::NoParameters, evidence, hazards);
        }
        if let Some(reason) = structural_reason(directive) {
            return ClassificationResult::unclassified(def, reason, evidence, hazards);
        }
        if let Some(param) = parameter_used_as_type(params, &directive.body) {
            let reason = UnclassifiedReason::ParameterAsType { param };
            return ClassificationResult::unclassified(def, reason, evidence, hazards);
        }
        if let Err(why) = check_single_expression(&directive.body) {
            return ClassificationResult::unclassified(def, UnclassifiedReason::NotAnExpression(why), evidence, hazards);
        }

        let mut confidence = Confidence::High;
        let deps = self.usage.dependencies(def.id);
        for dep in deps {
            if dep.self_reference {
                let reason = UnclassifiedReason::SelfReference { name: dep.name.clone() };
                return ClassificationResult::unclassified(def, reason, evidence, hazards);
            }
            let Some(dep_id) = dep.resolved else {
                continue;
            };
            let dep_def = self.table.get(dep_id);
            if let Err(reason) = self.check_dependency(dep, dep_def) {
                return ClassificationResult::unclassified(def, reason, evidence, hazards);
            }
            let dep_result = self.classify(dep_id);
            if dep_result.pattern.is_unclassified() {
                let reason = UnclassifiedReason::DependsOnUnclassified { name: dep.name.clone() };
                return ClassificationResult::unclassified(def, reason, evidence, hazards);
            }
            if dep_result.confidence < confidence {
                confidence = dep_result.confidence;
                evidence.push(format!("depends on {}-confidence macro `{}`", dep_result.confidence, dep.name));
            }
        }

        let by_reference: Vec<bool> = params
            .iter()
            .map(|p| parameter_is_modified(p, &directive.body))
            .collect();
        for (param, modified) in params.iter().zip(&by_reference) {
            if *modified {
                confidence = confidence.min(Confidence::Medium);
                evidence.push(format!("parameter `{}` is modified by the body and taken by non-const reference", param));
            }
        }
        evidence.push("replacement list is a single expression".to_string());

        self.apply_reachability(def, &mut confidence, &mut evidence);

        let ctx = self.scopes.context_at(self.unit, directive.position);
        let class = ctx.class_scope().map(|(scope, name, access)| ClassInfo {
            scope,
            name: name.to_string(),
            access,
        });
        if let Some(class) = &class {
            evidence.push(format!("defined inside {}", ctx.describe()));
            self.check_class_pollution(def, class.scope, &mut confidence, &mut evidence);
        } else {
            if ctx.is_block() {
                confidence = confidence.min(Confidence::Medium);
                evidence.push("defined inside a local block".to_string());
            }
            self.check_scope_escape(def, &ctx, &mut confidence, &mut evidence);
        }

        ClassificationResult {
            name: def.name.clone(),
            definition: def.id,
            pattern: Pattern::FunctionLikeMacro {
                params: params.clone(),
                by_reference,
                class,
            },
            confidence,
            evidence,
            hazards,
            expanded: Vec::new(),
        }
    }

    /// 条件付きコンパイル下の定義は Medium まで
    fn apply_reachability(&self, def: &MacroDefinition, confidence: &mut Confidence, evidence: &mut Vec<String>) {
        if def.directive.reachability == Reachability::Conditional {
            *confidence = (*confidence).min(Confidence::Medium);
            evidence.push("defined under a conditional-compilation branch".to_string());
        }
    }

    /// クラス外での使用（名前空間の汚染）を検査
    fn check_class_pollution(
        &self,
        def: &MacroDefinition,
        scope: ScopeId,
        confidence: &mut Confidence,
        evidence: &mut Vec<String>,
    ) {
        let (open, close) = self.scopes.class_body_range(scope);
        let outside = self.outside_references(def, |position| open < position && position < close);
        if outside > 0 {
            *confidence = (*confidence).min(Confidence::Medium);
            evidence.push(format!(
                "used {} time(s) outside its class, polluting the enclosing namespace",
                outside
            ));
        }
    }

    /// 名前空間やブロックの外での使用を検査（使用箇所は修飾が必要になる）
    fn check_scope_escape(
        &self,
        def: &MacroDefinition,
        ctx: &DeclarationContext,
        confidence: &mut Confidence,
        evidence: &mut Vec<String>,
    ) {
        let Some(scope) = ctx.scope() else {
            return;
        };
        let body = self.scopes.get(scope);
        let outside = self.outside_references(def, |position| body.contains(position));
        if outside > 0 {
            *confidence = (*confidence).min(Confidence::Medium);
            evidence.push(format!("used {} time(s) outside the {}", outside, ctx.describe()));
        }
    }

    /// 範囲外からの参照の数（他のマクロの置換列を経由したものを含む）
    fn outside_references(&self, def: &MacroDefinition, inside: impl Fn(usize) -> bool) -> usize {
        let direct = self.usage.sites_of(def.id).filter(|s| !inside(s.position)).count();
        let indirect = self
            .usage
            .indirect_uses(self.table, def.id)
            .iter()
            .filter(|u| !inside(u.position))
            .count();
        direct + indirect
    }
}

/// 置換列の構造上の不適格理由（空、文、# / ##）
fn structural_reason(directive: &Directive) -> Option<UnclassifiedReason> {
    let body = &directive.body;
    if body.is_empty() {
        return Some(UnclassifiedReason::EmptyBody);
    }
    if directive.has_token_pasting() {
        return Some(UnclassifiedReason::TokenPasting);
    }
    if directive.has_stringizing() {
        return Some(UnclassifiedReason::Stringizing);
    }
    if body.iter().any(|t| {
        t.kind.is_statement_keyword() || matches!(t.kind, TokenKind::Semi | TokenKind::LBrace | TokenKind::RBrace)
    }) {
        return Some(UnclassifiedReason::Statement);
    }
    None
}

/// 全トークンが文字列リテラルなら連結後の接頭辞（混在はエラー）
fn string_literal_prefix(tokens: &[Token]) -> Option<Result<StrPrefix, UnclassifiedReason>> {
    let mut prefix = StrPrefix::None;
    for token in tokens {
        let TokenKind::StringLit { prefix: p, .. } = token.kind else {
            return None;
        };
        match (prefix, p) {
            (_, StrPrefix::None) => {}
            (StrPrefix::None, p) => prefix = p,
            (a, b) if a == b => {}
            _ => {
                return Some(Err(UnclassifiedReason::NotConstant(
                    "concatenates string literals of different encodings".to_string(),
                )));
            }
        }
    }
    (!tokens.is_empty()).then_some(Ok(prefix))
}

/// 関数マクロの危険を列挙
pub fn function_hazards(params: &[String], body: &[Token]) -> Vec<Hazard> {
    let mut hazards = Vec::new();
    for param in params {
        let uses: Vec<usize> = body
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_ident(param))
            .map(|(i, _)| i)
            .collect();
        if uses.len() > 1 {
            hazards.push(Hazard::RepeatedEvaluation {
                param: param.clone(),
                count: uses.len(),
            });
        }
        let unwrapped = uses.iter().any(|&i| {
            let prev = i.checked_sub(1).map(|p| &body[p].kind);
            let next = body.get(i + 1).map(|t| &t.kind);
            !matches!(
                (prev, next),
                (Some(TokenKind::LParen), Some(TokenKind::RParen))
                    | (Some(TokenKind::LBracket), Some(TokenKind::RBracket))
                    | (
                        Some(TokenKind::LParen | TokenKind::Comma),
                        Some(TokenKind::Comma | TokenKind::RParen)
                    )
            )
        });
        if unwrapped {
            hazards.push(Hazard::UnparenthesizedParameter { param: param.clone() });
        }
    }
    if !body.is_empty() && !is_wrapped_expression(body) {
        hazards.push(Hazard::UnparenthesizedBody);
    }
    hazards
}

/// 本体全体が括弧で囲まれているか（単一トークン、関数呼び出し形式も可）
fn is_wrapped_expression(body: &[Token]) -> bool {
    if body.len() == 1 {
        return true;
    }
    let start = match body.first().map(|t| &t.kind) {
        Some(TokenKind::LParen) => 0,
        Some(TokenKind::Ident(_)) if body.get(1).is_some_and(|t| t.kind == TokenKind::LParen) => 1,
        _ => return false,
    };
    matching_close(body, start) == Some(body.len() - 1)
}

/// `(` に対応する `)` のインデックス
fn matching_close(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// 仮引数が型として使われていれば返す
fn parameter_used_as_type(params: &[String], body: &[Token]) -> Option<String> {
    for (i, token) in body.iter().enumerate() {
        let Some(name) = token.kind.ident() else {
            continue;
        };
        if !params.iter().any(|p| p == name) {
            continue;
        }
        let prev = i.checked_sub(1).map(|p| &body[p].kind);
        let prev2 = i.checked_sub(2).map(|p| &body[p].kind);
        let next = body.get(i + 1).map(|t| &t.kind);
        let after = body.get(i + 2).map(|t| &t.kind);
        let as_type = match (prev, next) {
            // (T)x
            (Some(TokenKind::LParen), Some(TokenKind::RParen)) => {
                after.is_some_and(|k| k.ident().is_some() || k.is_literal())
            }
            // static_cast<T>(x), std::vector<T>
            (Some(TokenKind::Lt), Some(TokenKind::Gt | TokenKind::Comma)) => {
                prev2.is_some_and(|k| k.ident().is_some() || matches!(k, TokenKind::KwConst))
            }
            // new T
            (Some(TokenKind::KwNew), _) => true,
            // T x
            (_, Some(TokenKind::Ident(_))) => true,
            _ => false,
        };
        if as_type {
            return Some(name.to_string());
        }
    }
    None
}

/// 単一の式として扱えるか（括弧の対応、最上位のカンマ、末尾の演算子）
fn check_single_expression(body: &[Token]) -> Result<(), String> {
    let mut stack: Vec<&TokenKind> = Vec::new();
    for token in body {
        match &token.kind {
            TokenKind::LParen | TokenKind::LBracket => stack.push(&token.kind),
            TokenKind::RParen => {
                if stack.pop() != Some(&TokenKind::LParen) {
                    return Err("unbalanced parentheses".to_string());
                }
            }
            TokenKind::RBracket => {
                if stack.pop() != Some(&TokenKind::LBracket) {
                    return Err("unbalanced brackets".to_string());
                }
            }
            TokenKind::Comma if stack.is_empty() => return Err("top-level comma".to_string()),
            _ => {}
        }
    }
    if !stack.is_empty() {
        return Err("unbalanced parentheses".to_string());
    }
    match body.last().map(|t| &t.kind) {
        Some(
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent
            | TokenKind::Amp
            | TokenKind::Pipe
            | TokenKind::Caret
            | TokenKind::AmpAmp
            | TokenKind::PipePipe
            | TokenKind::Lt
            | TokenKind::Gt
            | TokenKind::Question
            | TokenKind::Colon
            | TokenKind::Eq
            | TokenKind::Dot
            | TokenKind::Arrow
            | TokenKind::ColonColon,
        ) => Err("ends with an operator".to_string()),
        _ => Ok(()),
    }
}

/// 仮引数が本体で書き換えられるか（++p, p++, p = ..., (p) += ... など）
pub fn parameter_is_modified(param: &str, body: &[Token]) -> bool {
    body.iter().enumerate().filter(|(_, t)| t.is_ident(param)).any(|(i, _)| {
        // 括弧で囲まれていれば外側を見る
        let (mut lo, mut hi) = (i, i);
        while lo > 0
            && body[lo - 1].kind == TokenKind::LParen
            && body.get(hi + 1).is_some_and(|t| t.kind == TokenKind::RParen)
        {
            lo -= 1;
            hi += 1;
        }
        let prev = lo.checked_sub(1).map(|p| &body[p].kind);
        let next = body.get(hi + 1).map(|t| &t.kind);
        matches!(prev, Some(TokenKind::PlusPlus | TokenKind::MinusMinus))
            || next.is_some_and(|k| k.is_mutating_op())
    })
}
