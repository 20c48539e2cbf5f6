//! 編集計画の集約
//!
//! 提案ごとの編集をファイル別・位置順に並べ、異なる提案の編集が
//! 重なる場合は両方の提案を取り下げて競合として報告する。
//! 複数の翻訳単位の計画はファイルパスをキーに統合する。

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;

use serde::Serialize;
use tracing::warn;

use crate::source::Location;
use crate::synthesizer::RewriteProposal;

/// 1つのテキスト編集（バイト範囲の置換）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEdit {
    pub path: PathBuf,
    pub start: usize,
    pub end: usize,
    pub replacement_text: String,
    pub proposal_id: String,
}

impl TextEdit {
    /// 範囲が重なるか（同じ位置への挿入どうしは重ならない）
    fn overlaps(&self, other: &TextEdit) -> bool {
        self.start < other.end && other.start < self.end
    }

    fn same_span(&self, other: &TextEdit) -> bool {
        self.start == other.start && self.end == other.end
    }
}

/// 重なった編集
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub path: PathBuf,
    pub start: usize,
    pub end: usize,
    pub proposals: Vec<String>,
}

/// 報告の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ReportKind {
    /// 分類不能
    Unrewritable,
    /// 安全な書き換えが存在しない
    UnsafeRewriteRejected,
    /// 安全度が閾値未満
    BelowThreshold,
    /// 編集が他の提案と重なった
    ConflictingEdits,
    /// 書き換えは提案したが注意が必要
    Warning,
}

/// 報告項目
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEntry {
    pub macro_name: String,
    pub location: Option<Location>,
    pub kind: ReportKind,
    pub message: String,
}

/// 編集計画
#[derive(Debug, Clone, Default, Serialize)]
pub struct EditPlan {
    /// ファイルごとの重ならない編集（位置順）
    pub files: BTreeMap<PathBuf, Vec<TextEdit>>,
    pub conflicts: Vec<Conflict>,
    pub report: Vec<ReportEntry>,
}

impl EditPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// 提案の編集を追加
    pub fn add(&mut self, proposal: &RewriteProposal) {
        for edit in &proposal.edits {
            self.files.entry(edit.path.clone()).or_default().push(edit.clone());
        }
    }

    /// 報告項目を追加
    pub fn report(&mut self, entry: ReportEntry) {
        self.report.push(entry);
    }

    /// 編集を並べ替え、重なりを競合として取り下げる
    ///
    /// 取り下げた提案の ID を返す。
    pub fn finalize(&mut self) -> BTreeSet<String> {
        let mut withdrawn = BTreeSet::new();
        for (path, edits) in &mut self.files {
            edits.sort_by_key(|e| (e.start, e.end));
            for (i, a) in edits.iter().enumerate() {
                for b in edits[i + 1..]
                    .iter()
                    .take_while(|b| b.start < a.end || b.start == a.start)
                {
                    let conflicting = if a.proposal_id == b.proposal_id {
                        a.same_span(b) && a.replacement_text != b.replacement_text
                    } else {
                        a.overlaps(b)
                    };
                    if !conflicting {
                        continue;
                    }
                    let mut proposals = vec![a.proposal_id.clone(), b.proposal_id.clone()];
                    proposals.dedup();
                    warn!(path = %path.display(), start = a.start, end = a.end.max(b.end), ?proposals, "conflicting edits");
                    withdrawn.extend(proposals.iter().cloned());
                    self.conflicts.push(Conflict {
                        path: path.clone(),
                        start: a.start,
                        end: a.end.max(b.end),
                        proposals,
                    });
                }
            }
        }

        if !withdrawn.is_empty() {
            self.withdraw(&withdrawn);
            for id in &withdrawn {
                self.report.push(ReportEntry {
                    macro_name: macro_name_of(id).to_string(),
                    location: None,
                    kind: ReportKind::ConflictingEdits,
                    message: format!("proposal {} overlaps another proposal's edits; neither is applied", id),
                });
            }
        }
        withdrawn
    }

    /// 提案の編集をすべて取り除く
    pub fn withdraw(&mut self, proposal_ids: &BTreeSet<String>) {
        for edits in self.files.values_mut() {
            edits.retain(|e| !proposal_ids.contains(&e.proposal_id));
        }
        self.files.retain(|_, edits| !edits.is_empty());
    }

    /// 複数の翻訳単位の計画を統合
    ///
    /// 同一の編集と報告は1つにまとめ、同じ範囲への異なる編集は競合にする。
    pub fn merge(plans: impl IntoIterator<Item = EditPlan>) -> EditPlan {
        let mut merged = EditPlan::new();
        let mut seen_edits = HashSet::new();
        let mut seen_reports = HashSet::new();
        let mut seen_conflicts = Vec::new();
        for plan in plans {
            for (path, edits) in plan.files {
                let target = merged.files.entry(path).or_default();
                for edit in edits {
                    if seen_edits.insert(edit.clone()) {
                        target.push(edit);
                    }
                }
            }
            for conflict in plan.conflicts {
                if !seen_conflicts.contains(&conflict) {
                    seen_conflicts.push(conflict);
                }
            }
            for entry in plan.report {
                if seen_reports.insert(entry.clone()) {
                    merged.report.push(entry);
                }
            }
        }
        merged.conflicts = seen_conflicts;
        merged.finalize();
        merged
    }

    /// 編集の総数
    pub fn edit_count(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    /// 編集を含む提案の ID
    pub fn proposal_ids(&self) -> BTreeSet<&str> {
        self.files
            .values()
            .flatten()
            .map(|e| e.proposal_id.as_str())
            .collect()
    }
}

/// 提案 ID（`NAME@path:line`）からマクロ名を取り出す
pub fn macro_name_of(proposal_id: &str) -> &str {
    proposal_id.split_once('@').map_or(proposal_id, |(name, _)| name)
}

/// テキストに編集を適用（編集は同一ファイル・重なりなしであること）
pub fn apply_edits(text: &str, edits: &[TextEdit]) -> String {
    let mut sorted: Vec<&TextEdit> = edits.iter().collect();
    sorted.sort_by_key(|e| (e.start, e.end));
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for edit in sorted {
        let start = edit.start.clamp(cursor, text.len());
        out.push_str(&text[cursor..start]);
        out.push_str(&edit.replacement_text);
        cursor = edit.end.clamp(start, text.len());
    }
    out.push_str(&text[cursor..]);
    out
}
