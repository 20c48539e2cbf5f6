//! 解析エンジン
//!
//! 翻訳単位ごとに次の順で処理する:
//! 1. トークンストリームの構築（include 展開、条件コンパイル）
//! 2. マクロテーブルへの #define / #undef の記録
//! 3. 宣言コンテキストと使用箇所の収集
//! 4. 分類と書き換え提案の合成
//! 5. 編集計画の集約
//!
//! 翻訳単位は互いに独立なので rayon で並列に解析し、最後に
//! ファイルパスをキーに編集計画を統合する。

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classifier::{ClassificationResult, Classifier, Confidence, Hazard};
use crate::config::Config;
use crate::edit_plan::{EditPlan, ReportEntry, ReportKind};
use crate::error::UnitError;
use crate::macro_def::{MacroDefinition, MacroTable, Redefinition};
use crate::scope::ScopeResolver;
use crate::source::Location;
use crate::synthesizer::{RewriteProposal, Synthesis, Synthesizer};
use crate::token_stream::{Reachability, StreamOptions, TranslationUnit};
use crate::usage::UsageIndex;

/// ソースの読み込みと include の解決
pub trait SourceProvider: Sync {
    /// ファイルの内容を読む
    fn load(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// `#include` の指定を解決する（見つからなければ None）
    fn resolve_include(&self, from: &Path, spec: &str, angled: bool) -> Option<PathBuf>;
}

/// `"..."` の include は取り込み元のディレクトリからの相対パス
fn sibling(from: &Path, spec: &str) -> PathBuf {
    match from.parent() {
        Some(parent) => parent.join(spec),
        None => PathBuf::from(spec),
    }
}

/// ファイルシステムから読むプロバイダ
#[derive(Debug, Clone, Default)]
pub struct FsProvider {
    include_paths: Vec<PathBuf>,
}

impl FsProvider {
    pub fn new(include_paths: Vec<PathBuf>) -> Self {
        Self { include_paths }
    }
}

impl SourceProvider for FsProvider {
    fn load(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn resolve_include(&self, from: &Path, spec: &str, angled: bool) -> Option<PathBuf> {
        if !angled {
            let candidate = sibling(from, spec);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        self.include_paths
            .iter()
            .map(|dir| dir.join(spec))
            .find(|candidate| candidate.is_file())
    }
}

/// メモリ上のファイルを読むプロバイダ
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    files: HashMap<PathBuf, Vec<u8>>,
    include_paths: Vec<PathBuf>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// ファイルを追加（同じパスは上書き）
    pub fn insert(&mut self, path: impl Into<PathBuf>, text: impl AsRef<[u8]>) {
        self.files.insert(path.into(), text.as_ref().to_vec());
    }

    pub fn with_include_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_paths.push(dir.into());
        self
    }
}

impl SourceProvider for MemoryProvider {
    fn load(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{} is not loaded", path.display()))
        })
    }

    fn resolve_include(&self, from: &Path, spec: &str, angled: bool) -> Option<PathBuf> {
        if !angled {
            let candidate = sibling(from, spec);
            if self.files.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        self.include_paths
            .iter()
            .map(|dir| dir.join(spec))
            .chain(std::iter::once(PathBuf::from(spec)))
            .find(|candidate| self.files.contains_key(candidate))
    }
}

/// マクロ1つの処遇
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Disposition {
    /// 書き換えを提案した
    Rewritten { proposal_id: String },
    /// 報告のみ
    ReportedOnly { reason: String },
    /// 対象外
    Skipped { reason: String },
}

/// マクロ定義ごとの診断
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub macro_name: String,
    pub location: Location,
    /// パターン名（分類しなかった場合は None）
    pub pattern: Option<&'static str>,
    pub confidence: Option<Confidence>,
    pub hazards: Vec<Hazard>,
    /// 判定の根拠
    pub rationale: Vec<String>,
    pub disposition: Disposition,
}

/// 中止された翻訳単位
#[derive(Debug, Clone, Serialize)]
pub struct UnitFailure {
    pub path: PathBuf,
    pub error: String,
}

/// 1つの翻訳単位の解析結果
#[derive(Debug, Clone, Default)]
pub struct UnitAnalysis {
    pub plan: EditPlan,
    pub diagnostics: Vec<Diagnostic>,
    pub proposals: Vec<RewriteProposal>,
}

/// 統計
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisStats {
    pub units: usize,
    pub failed_units: usize,
    pub macros: usize,
    pub rewritten: usize,
    pub reported_only: usize,
    pub skipped: usize,
    pub edits: usize,
    pub conflicts: usize,
}

/// 全翻訳単位の解析結果
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisResult {
    pub plan: EditPlan,
    pub diagnostics: Vec<Diagnostic>,
    pub proposals: Vec<RewriteProposal>,
    pub failures: Vec<UnitFailure>,
    pub stats: AnalysisStats,
}

impl AnalysisResult {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// 解析エンジン
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: Config,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 1つの翻訳単位を解析
    pub fn analyze_unit(&self, path: &Path, provider: &dyn SourceProvider) -> Result<UnitAnalysis, UnitError> {
        debug!(path = %path.display(), "analyzing unit");
        let options = StreamOptions {
            follow_includes: self.config.follow_includes,
            max_include_depth: self.config.max_include_depth,
        };
        let unit = TranslationUnit::build(path, provider, options)?;

        let mut table = MacroTable::new();
        for directive in &unit.directives {
            table.record(directive.clone());
        }
        table.finish(unit.end_position);

        let scopes = ScopeResolver::new(&unit);
        let usage = UsageIndex::collect(&unit, &table, &scopes);
        debug!(definitions = table.len(), usage_sites = usage.len(), "macro table built");

        let mut results: HashMap<_, ClassificationResult> =
            Classifier::new(&unit, &table, &scopes, &usage, self.config.class_constant_style)
                .classify_all()
                .into_iter()
                .map(|r| (r.definition, r))
                .collect();
        let synthesizer = Synthesizer::new(&unit, &table, &scopes, &usage, &self.config, provider);

        let mut analysis = UnitAnalysis::default();
        for def in table.iter() {
            let location = unit.files.location(&def.directive.span);
            let classified = match skip_reason(&table, def) {
                Some(reason) => Err(reason),
                None => results.remove(&def.id).ok_or_else(|| "no active span".to_string()),
            };
            let result = match classified {
                Ok(result) => result,
                Err(reason) => {
                    analysis.diagnostics.push(Diagnostic {
                        macro_name: def.name.clone(),
                        location,
                        pattern: None,
                        confidence: None,
                        hazards: Vec::new(),
                        rationale: Vec::new(),
                        disposition: Disposition::Skipped { reason },
                    });
                    continue;
                }
            };

            for hazard in &result.hazards {
                analysis.plan.report(ReportEntry {
                    macro_name: def.name.clone(),
                    location: Some(location.clone()),
                    kind: ReportKind::Warning,
                    message: hazard.to_string(),
                });
            }

            let disposition = match synthesizer.synthesize(&result) {
                Synthesis::Proposed(proposal) => {
                    analysis.plan.add(&proposal);
                    let id = proposal.id.clone();
                    analysis.proposals.push(proposal);
                    Disposition::Rewritten { proposal_id: id }
                }
                Synthesis::Unrewritable { reason } => {
                    self.report_only(&mut analysis.plan, def, &location, ReportKind::Unrewritable, reason.to_string())
                }
                Synthesis::Rejected { reason } => {
                    self.report_only(&mut analysis.plan, def, &location, ReportKind::UnsafeRewriteRejected, reason)
                }
                Synthesis::BelowThreshold(proposal) => {
                    let reason = format!(
                        "proposal tier {} is below the configured minimum ({:?})",
                        proposal.tier, self.config.min_confidence_to_emit
                    );
                    self.report_only(&mut analysis.plan, def, &location, ReportKind::BelowThreshold, reason)
                }
            };

            analysis.diagnostics.push(Diagnostic {
                macro_name: def.name.clone(),
                location,
                pattern: Some(result.pattern.tag()),
                confidence: Some(result.confidence),
                hazards: result.hazards,
                rationale: result.evidence,
                disposition,
            });
        }

        let withdrawn = analysis.plan.finalize();
        withdraw(&mut analysis.diagnostics, &withdrawn);
        analysis.proposals.retain(|p| !withdrawn.contains(&p.id));

        debug!(
            path = %path.display(),
            proposals = analysis.proposals.len(),
            edits = analysis.plan.edit_count(),
            "unit analyzed"
        );
        Ok(analysis)
    }

    fn report_only(
        &self,
        plan: &mut EditPlan,
        def: &MacroDefinition,
        location: &Location,
        kind: ReportKind,
        reason: String,
    ) -> Disposition {
        plan.report(ReportEntry {
            macro_name: def.name.clone(),
            location: Some(location.clone()),
            kind,
            message: reason.clone(),
        });
        Disposition::ReportedOnly { reason }
    }

    /// 複数の翻訳単位を並列に解析して統合
    pub fn analyze_units(&self, paths: &[PathBuf], provider: &dyn SourceProvider) -> AnalysisResult {
        let run = || -> Vec<(PathBuf, Result<UnitAnalysis, UnitError>)> {
            paths
                .par_iter()
                .map(|path| (path.clone(), self.analyze_unit(path, provider)))
                .collect()
        };
        let outcomes = if self.config.jobs > 0 {
            match rayon::ThreadPoolBuilder::new().num_threads(self.config.jobs).build() {
                Ok(pool) => pool.install(run),
                Err(err) => {
                    warn!(error = %err, "cannot build worker pool, using the global pool");
                    run()
                }
            }
        } else {
            run()
        };

        let mut result = AnalysisResult::default();
        let mut plans = Vec::new();
        // 定義（名前と位置）ごとの診断のインデックス
        let mut by_definition: HashMap<(String, Location), usize> = HashMap::new();
        let mut vetoed = BTreeSet::new();
        for (path, outcome) in outcomes {
            result.stats.units += 1;
            match outcome {
                Ok(analysis) => {
                    plans.push(analysis.plan);
                    for diagnostic in analysis.diagnostics {
                        let key = (diagnostic.macro_name.clone(), diagnostic.location.clone());
                        match by_definition.get(&key) {
                            Some(&i) => merge_diagnostic(&mut result.diagnostics[i], diagnostic, &mut vetoed),
                            None => {
                                by_definition.insert(key, result.diagnostics.len());
                                result.diagnostics.push(diagnostic);
                            }
                        }
                    }
                    for proposal in analysis.proposals {
                        if !result.proposals.iter().any(|p| p.id == proposal.id) {
                            result.proposals.push(proposal);
                        }
                    }
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "unit abandoned");
                    result.stats.failed_units += 1;
                    result.failures.push(UnitFailure {
                        path,
                        error: err.to_string(),
                    });
                }
            }
        }

        if !vetoed.is_empty() {
            info!(proposals = ?vetoed, "proposals withdrawn because another unit reports the macro");
            for plan in &mut plans {
                plan.withdraw(&vetoed);
            }
            result.proposals.retain(|p| !vetoed.contains(&p.id));
        }
        result.plan = EditPlan::merge(plans);
        let kept: BTreeSet<String> = result.plan.proposal_ids().into_iter().map(str::to_string).collect();
        let withdrawn: BTreeSet<String> = result
            .proposals
            .iter()
            .filter(|p| !kept.contains(&p.id))
            .map(|p| p.id.clone())
            .collect();
        withdraw(&mut result.diagnostics, &withdrawn);
        result.proposals.retain(|p| kept.contains(&p.id));

        let stats = &mut result.stats;
        stats.macros = result.diagnostics.len();
        for diagnostic in &result.diagnostics {
            match diagnostic.disposition {
                Disposition::Rewritten { .. } => stats.rewritten += 1,
                Disposition::ReportedOnly { .. } => stats.reported_only += 1,
                Disposition::Skipped { .. } => stats.skipped += 1,
            }
        }
        stats.edits = result.plan.edit_count();
        stats.conflicts = result.plan.conflicts.len();
        info!(
            units = stats.units,
            failed = stats.failed_units,
            macros = stats.macros,
            rewritten = stats.rewritten,
            edits = stats.edits,
            conflicts = stats.conflicts,
            "analysis finished"
        );
        result
    }
}

/// 分類の対象にならない定義の理由
fn skip_reason(table: &MacroTable, def: &MacroDefinition) -> Option<String> {
    let directive = &def.directive;
    if directive.reachability == Reachability::Disabled {
        return Some("defined in a disabled conditional branch".to_string());
    }
    if directive.include_guard {
        return Some("include guard".to_string());
    }
    if let Redefinition::Identical { of } = def.redefinition {
        return Some(format!(
            "identical redefinition of the definition at line {}",
            table.get(of).directive.span.line
        ));
    }
    if !def.is_active_span_nonempty() {
        return Some("no active span".to_string());
    }
    None
}

/// 同じ定義についての別の翻訳単位の診断を統合する
///
/// 報告のみは書き換えより優先し、書き換え側の提案を取り下げ対象にする。
/// 対象外は他の処遇に置き換えられる。
fn merge_diagnostic(existing: &mut Diagnostic, incoming: Diagnostic, vetoed: &mut BTreeSet<String>) {
    match (&existing.disposition, &incoming.disposition) {
        (Disposition::Rewritten { proposal_id }, Disposition::ReportedOnly { .. }) => {
            vetoed.insert(proposal_id.clone());
            let note = format!("proposal {} is withdrawn for every translation unit", proposal_id);
            *existing = incoming;
            existing.rationale.push(note);
        }
        (Disposition::ReportedOnly { .. }, Disposition::Rewritten { proposal_id }) => {
            vetoed.insert(proposal_id.clone());
            existing
                .rationale
                .push(format!("proposal {} is withdrawn for every translation unit", proposal_id));
        }
        (Disposition::Skipped { .. }, Disposition::Rewritten { .. } | Disposition::ReportedOnly { .. }) => {
            *existing = incoming;
        }
        _ => {}
    }
}

/// 競合で取り下げた提案の処遇を報告のみに変える
fn withdraw(diagnostics: &mut [Diagnostic], withdrawn: &BTreeSet<String>) {
    for diagnostic in diagnostics {
        if let Disposition::Rewritten { proposal_id } = &diagnostic.disposition {
            if withdrawn.contains(proposal_id) {
                diagnostic.disposition = Disposition::ReportedOnly {
                    reason: format!("proposal {} has conflicting edits", proposal_id),
                };
            }
        }
    }
}
