//! C/C++ Macro Rewrite
//!
//! C/C++ のソースからマクロ定義を収集・分類し、型付き定数、enum、
//! テンプレート inline 関数への書き換え提案と編集計画を生成するツール。

pub mod classifier;
pub mod config;
pub mod const_expr;
pub mod edit_plan;
pub mod engine;
pub mod error;
pub mod lexer;
pub mod macro_def;
pub mod scope;
pub mod source;
pub mod synthesizer;
pub mod token;
pub mod token_stream;
pub mod usage;

// 主要な型を再エクスポート
pub use classifier::{
    ClassInfo, ClassificationResult, Classifier, Confidence, ConstantType, Hazard, Pattern, UnclassifiedReason,
};
pub use config::{ClassConstantStyle, Config, ConfigBuilder, MinConfidence};
pub use const_expr::{ConstEvaluator, ConstValue, EvalError, Evaluated, ScalarType};
pub use edit_plan::{apply_edits, Conflict, EditPlan, ReportEntry, ReportKind, TextEdit};
pub use engine::{
    AnalysisResult, AnalysisStats, Diagnostic, Disposition, Engine, FsProvider, MemoryProvider, SourceProvider,
    UnitAnalysis, UnitFailure,
};
pub use error::{CompileError, ConfigError, LexError, ParseError, Result, UnitError};
pub use lexer::Lexer;
pub use macro_def::{DefinitionId, Directive, DirectiveKind, MacroDefinition, MacroTable};
pub use scope::{Access, DeclarationContext, ScopeResolver};
pub use source::{FileId, FileRegistry, Location, SourceLocation, Span};
pub use synthesizer::{RewriteProposal, SafetyTier, Synthesis, Synthesizer};
pub use token::{Token, TokenKind};
pub use token_stream::{Reachability, StreamItem, StreamOptions, TokenStream, TranslationUnit};
pub use usage::{IndirectUse, UsageIndex, UsageSite};

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_basic_engine_integration() {
        let mut provider = MemoryProvider::new();
        provider.insert("basic.h", "#define ANSWER 42\nint value = ANSWER;\n");

        let analysis = Engine::default().analyze_unit(Path::new("basic.h"), &provider).unwrap();

        assert_eq!(analysis.proposals.len(), 1);
        assert_eq!(analysis.proposals[0].declaration, "const int ANSWER = 42;");
        assert_eq!(analysis.plan.edit_count(), 1);
    }
}
