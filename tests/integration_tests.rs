//! End-to-end integration tests

use std::fs;
use std::path::{Path, PathBuf};

use cxx_macro_rewrite::{
    apply_edits, ClassConstantStyle, Config, Confidence, Diagnostic, Disposition, Engine, FsProvider, Hazard,
    MemoryProvider, MinConfidence, ReportKind, RewriteProposal, SafetyTier, UnitAnalysis,
};
use pretty_assertions::assert_eq;

/// Helper to analyze the first file of an in-memory source set
fn analyze_with(files: &[(&str, &str)], config: Config) -> UnitAnalysis {
    let mut provider = MemoryProvider::new();
    for (path, text) in files {
        provider.insert(*path, *text);
    }
    Engine::new(config)
        .analyze_unit(Path::new(files[0].0), &provider)
        .unwrap()
}

fn analyze(files: &[(&str, &str)]) -> UnitAnalysis {
    analyze_with(files, Config::default())
}

/// Helper to find the diagnostic of a macro
fn diagnostic<'a>(analysis: &'a UnitAnalysis, name: &str) -> &'a Diagnostic {
    analysis
        .diagnostics
        .iter()
        .find(|d| d.macro_name == name)
        .unwrap_or_else(|| panic!("no diagnostic for {}", name))
}

fn proposal<'a>(analysis: &'a UnitAnalysis, name: &str) -> &'a RewriteProposal {
    analysis
        .proposals
        .iter()
        .find(|p| p.macro_name == name)
        .unwrap_or_else(|| panic!("no proposal for {}", name))
}

/// Helper to apply the plan's edits to one file
fn rewritten(analysis: &UnitAnalysis, path: &str, text: &str) -> String {
    let edits = analysis.plan.files.get(Path::new(path)).cloned().unwrap_or_default();
    apply_edits(text, &edits)
}

fn reason(diagnostic: &Diagnostic) -> &str {
    match &diagnostic.disposition {
        Disposition::ReportedOnly { reason } | Disposition::Skipped { reason } => reason,
        Disposition::Rewritten { proposal_id } => panic!("{} was rewritten", proposal_id),
    }
}

#[test]
fn test_scenario_simple_constant() {
    let src = "#define ASPECT_RATIO 1.653\ndouble area(double r) { return ASPECT_RATIO * r * r; }\n";
    let analysis = analyze(&[("shape.h", src)]);

    let d = diagnostic(&analysis, "ASPECT_RATIO");
    assert_eq!(d.pattern, Some("SimpleConstant"));
    assert_eq!(d.confidence, Some(Confidence::High));
    assert_eq!(analysis.proposals.len(), 1);

    let p = proposal(&analysis, "ASPECT_RATIO");
    assert_eq!(p.tier, SafetyTier::High);
    assert_eq!(p.declaration, "const double ASPECT_RATIO = 1.653;");
    assert_eq!(
        rewritten(&analysis, "shape.h", src),
        "const double ASPECT_RATIO = 1.653;\ndouble area(double r) { return ASPECT_RATIO * r * r; }\n"
    );
}

#[test]
fn test_scenario_function_like_macro() {
    let src = "#define CALL_WITH_MAX(a,b) f((a)>(b) ? (a):(b))\nint f(int);\nvoid g(int a, int b) { CALL_WITH_MAX(++a, b); }\n";
    let analysis = analyze(&[("max.cpp", src)]);

    let d = diagnostic(&analysis, "CALL_WITH_MAX");
    assert_eq!(d.pattern, Some("FunctionLikeMacro"));
    assert!(d.hazards.contains(&Hazard::RepeatedEvaluation { param: "a".to_string(), count: 2 }));

    let p = proposal(&analysis, "CALL_WITH_MAX");
    assert_eq!(p.tier, SafetyTier::High);
    assert_eq!(
        p.declaration,
        "template<typename T1, typename T2>\ninline auto CALL_WITH_MAX(const T1& a, const T2& b) { return f((a)>(b) ? (a):(b)); }"
    );
}

#[test]
fn test_scenario_enum_hack() {
    let src = "class GamePlayer {\nprivate:\n#define NumTurns 5\n  int scores[NumTurns];\n};\n";
    let analysis = analyze(&[("game.h", src)]);

    let d = diagnostic(&analysis, "NumTurns");
    assert_eq!(d.pattern, Some("EnumHackCandidate"));
    assert_eq!(d.confidence, Some(Confidence::High));
    assert_eq!(
        rewritten(&analysis, "game.h", src),
        "class GamePlayer {\nprivate:\nenum { NumTurns = 5 };\n  int scores[NumTurns];\n};\n"
    );
    assert_eq!(
        proposal(&analysis, "NumTurns").alternative.as_deref(),
        Some("static const int NumTurns = 5;")
    );
}

#[test]
fn test_scenario_ambiguous_redefinition() {
    let analysis = analyze(&[("limit.h", "#define LIMIT 10\n#define LIMIT 20\nint a = LIMIT;\n")]);

    assert!(analysis.proposals.is_empty());
    assert_eq!(analysis.diagnostics.len(), 2);
    for d in &analysis.diagnostics {
        assert_eq!(d.pattern, Some("Unclassified"));
        assert_eq!(d.confidence, Some(Confidence::Unrewritable));
        assert!(reason(d).contains("ambiguous definition"));
    }
    assert_eq!(
        analysis.plan.report.iter().filter(|r| r.kind == ReportKind::Unrewritable).count(),
        2
    );
}

#[test]
fn test_scenario_transitively_unclassified() {
    let analysis = analyze(&[("bad.h", "#define BAD (counter++)\n#define WORSE (BAD * 2)\n")]);

    let d = diagnostic(&analysis, "WORSE");
    assert_eq!(d.pattern, Some("Unclassified"));
    assert_eq!(reason(d), "refers to macro `BAD`, which is itself unclassified");
    assert!(analysis.proposals.is_empty());
    assert_eq!(analysis.plan.edit_count(), 0);
}

#[test]
fn test_literal_defines_are_high_confidence() {
    let literals = [
        ("42", "const int V = 42;"),
        ("0x10UL", "const unsigned long V = 0x10UL;"),
        ("2.5f", "const float V = 2.5f;"),
        ("'c'", "const char V = 'c';"),
        ("true", "const bool V = true;"),
        ("\"text\"", "const char* const V = \"text\";"),
    ];
    for (literal, expected) in literals {
        let src = format!("#define V {}\n", literal);
        let analysis = analyze(&[("v.h", &src)]);
        let d = diagnostic(&analysis, "V");
        assert_eq!(d.confidence, Some(Confidence::High), "literal {}", literal);
        assert_eq!(proposal(&analysis, "V").declaration, expected);
    }
}

#[test]
fn test_repeated_evaluation_flagged_without_rewrite() {
    let analysis = analyze(&[("twice.h", "#define TWICE(x) do { g(x); g(x); } while (0)\n")]);

    let d = diagnostic(&analysis, "TWICE");
    assert!(matches!(d.disposition, Disposition::ReportedOnly { .. }));
    assert!(d.hazards.contains(&Hazard::RepeatedEvaluation { param: "x".to_string(), count: 2 }));
    assert!(analysis
        .plan
        .report
        .iter()
        .any(|r| r.kind == ReportKind::Warning && r.message.contains("evaluated 2 times")));
}

#[test]
fn test_rewrite_is_idempotent() {
    let src = "#define ASPECT_RATIO 1.653\n\
               #define AUTHOR \"Scott Meyers\"\n\
               #define CALL_WITH_MAX(a,b) f((a)>(b) ? (a):(b))\n\
               class GamePlayer {\n\
               #define NumTurns 5\n  int scores[NumTurns];\n};\n\
               void g(int x, int y) { CALL_WITH_MAX(x, y); }\n";
    let first = analyze(&[("all.h", src)]);
    assert_eq!(first.proposals.len(), 4);

    let output = rewritten(&first, "all.h", src);
    let second = analyze(&[("all.h", &output)]);
    assert!(second.proposals.is_empty());
    assert!(second.diagnostics.is_empty());
}

#[test]
fn test_conditional_defines_capped_at_medium() {
    let src = "#ifdef USE_FAST\n#define SPEED 10\n#else\n#define SPEED 5\n#endif\nint s = SPEED;\n";
    let analysis = analyze(&[("speed.h", src)]);

    assert_eq!(analysis.diagnostics.len(), 2);
    for d in &analysis.diagnostics {
        assert_eq!(d.confidence, Some(Confidence::Medium));
        assert!(matches!(d.disposition, Disposition::Rewritten { .. }));
    }
    assert!(analysis.proposals.iter().all(|p| p.tier == SafetyTier::Medium));
}

#[test]
fn test_disabled_branch_is_skipped() {
    let analysis = analyze(&[("old.h", "#if 0\n#define OLD 1\n#endif\n#define NEW 2\n")]);

    assert!(reason(diagnostic(&analysis, "OLD")).contains("disabled"));
    assert!(matches!(
        diagnostic(&analysis, "NEW").disposition,
        Disposition::Rewritten { .. }
    ));
}

#[test]
fn test_preprocessor_use_blocks_rewrite() {
    for use_site in ["#if FEATURE\n", "#ifdef FEATURE\n", "#if defined(FEATURE) && 1\n"] {
        let src = format!("#define FEATURE 1\n{}int x;\n#endif\n", use_site);
        let analysis = analyze(&[("feature.h", &src)]);
        assert!(analysis.proposals.is_empty(), "{}", use_site);
        assert!(analysis
            .plan
            .report
            .iter()
            .any(|r| r.kind == ReportKind::UnsafeRewriteRejected && r.macro_name == "FEATURE"));
    }
}

#[test]
fn test_class_constant_emits_companion_definition() {
    let header = "class Shape {\npublic:\n#define PI_APPROX 3.14159\n  double area() const { return PI_APPROX * r * r; }\n  double r;\n};\n";
    let source = "#include \"shape.h\"\n";
    let analysis = analyze(&[("shape.h", header), ("shape.cpp", source)]);

    let d = diagnostic(&analysis, "PI_APPROX");
    assert_eq!(d.pattern, Some("ClassScopedConstant"));
    let p = proposal(&analysis, "PI_APPROX");
    assert_eq!(p.declaration, "static const double PI_APPROX;");
    assert_eq!(
        p.out_of_class_definition.as_deref(),
        Some("const double Shape::PI_APPROX = 3.14159;")
    );
    assert_eq!(
        rewritten(&analysis, "shape.cpp", source),
        "#include \"shape.h\"\nconst double Shape::PI_APPROX = 3.14159;\n"
    );
    assert!(rewritten(&analysis, "shape.h", header).contains("static const double PI_APPROX;"));
}

#[test]
fn test_undef_and_identical_redefinition_removed() {
    let src = "#define N 3\nint a[N];\n#define N 3\nint b[N];\n#undef N\n";
    let analysis = analyze(&[("n.h", src)]);

    assert!(reason(&analysis.diagnostics[1]).contains("identical redefinition"));
    assert_eq!(rewritten(&analysis, "n.h", src), "const int N = 3;\nint a[N];\nint b[N];\n");
}

#[test]
fn test_min_confidence_filters_proposals() {
    let config = Config::builder().min_confidence_to_emit(MinConfidence::High).build();
    let analysis = analyze_with(&[("f.h", "#ifdef X\n#define FLAG 1\n#endif\n")], config);

    assert!(analysis.proposals.is_empty());
    assert!(analysis.plan.report.iter().any(|r| r.kind == ReportKind::BelowThreshold));
}

#[test]
fn test_prefer_string_type_and_class_style() {
    let config = Config::builder()
        .prefer_string_type(true)
        .class_constant_style(ClassConstantStyle::StaticConstInClass)
        .build();
    let src = "#define AUTHOR \"Scott Meyers\"\nstruct P {\n#define N 3\n  int v[N];\n};\n";
    let analysis = analyze_with(&[("p.h", src)], config);

    assert_eq!(
        proposal(&analysis, "AUTHOR").declaration,
        "const std::string AUTHOR(\"Scott Meyers\");"
    );
    assert_eq!(proposal(&analysis, "N").declaration, "static const int N = 3;");
}

#[test]
fn test_cross_unit_merge_dedupes_shared_header() {
    let mut provider = MemoryProvider::new();
    provider.insert("limits.h", "#define LIMIT 10\n");
    provider.insert("a.cpp", "#include \"limits.h\"\nint a = LIMIT;\n");
    provider.insert("b.cpp", "#include \"limits.h\"\nint b = LIMIT;\n");

    let result = Engine::default().analyze_units(&[PathBuf::from("a.cpp"), PathBuf::from("b.cpp")], &provider);

    assert_eq!(result.plan.edit_count(), 1);
    assert_eq!(result.proposals.len(), 1);
    assert_eq!(result.proposals[0].id, "LIMIT@limits.h:1");
    assert_eq!(result.stats.macros, 1);
    assert!(result.plan.conflicts.is_empty());
}

#[test]
fn test_cross_unit_differing_proposals_conflict() {
    let mut provider = MemoryProvider::new();
    provider.insert("mask.h", "#define MASK (WIDTH * 2)\n");
    provider.insert("a.cpp", "#define WIDTH 4\n#include \"mask.h\"\n");
    provider.insert("b.cpp", "#define WIDTH 4.0\n#include \"mask.h\"\n");

    let result = Engine::default().analyze_units(&[PathBuf::from("a.cpp"), PathBuf::from("b.cpp")], &provider);

    assert_eq!(result.plan.conflicts.len(), 1);
    assert_eq!(result.plan.conflicts[0].proposals, vec!["MASK@mask.h:1".to_string()]);
    assert!(!result.plan.files.contains_key(Path::new("mask.h")));
    assert!(result.proposals.iter().all(|p| p.macro_name != "MASK"));
    assert!(result
        .diagnostics
        .iter()
        .filter(|d| d.macro_name == "MASK")
        .all(|d| matches!(d.disposition, Disposition::ReportedOnly { .. })));
    assert_eq!(result.proposals.len(), 2);
}

#[test]
fn test_fs_provider_with_include_paths() {
    let dir = tempfile::tempdir().unwrap();
    let inc = dir.path().join("inc");
    fs::create_dir(&inc).unwrap();
    fs::write(
        dir.path().join("widget.h"),
        "#ifndef WIDGET_H\n#define WIDGET_H\n#include <config.h>\nclass Widget {\npublic:\n#define MAX_ITEMS 16\n  int items[MAX_ITEMS];\n};\n#endif\n",
    )
    .unwrap();
    fs::write(inc.join("config.h"), "#define VERSION_STRING \"1.0\"\n").unwrap();
    let main = dir.path().join("main.cpp");
    fs::write(&main, "#include \"widget.h\"\nconst char* v() { return VERSION_STRING; }\n").unwrap();

    let config = Config::builder().include_path(&inc).build();
    let provider = FsProvider::new(config.include_paths.clone());
    let result = Engine::new(config).analyze_units(&[main], &provider);

    assert!(!result.has_failures());
    let ids: Vec<&str> = result.proposals.iter().map(|p| p.id.as_str()).collect();
    assert!(ids.contains(&format!("MAX_ITEMS@{}:6", dir.path().join("widget.h").display()).as_str()));
    assert!(ids.contains(&format!("VERSION_STRING@{}:1", inc.join("config.h").display()).as_str()));
    let guard = result.diagnostics.iter().find(|d| d.macro_name == "WIDGET_H").unwrap();
    assert_eq!(guard.disposition, Disposition::Skipped { reason: "include guard".to_string() });
}

#[test]
fn test_parse_error_aborts_only_that_unit() {
    let mut provider = MemoryProvider::new();
    provider.insert("ok.cpp", "#define OK 1\n");
    provider.insert("broken.cpp", "#define\n");

    let result = Engine::default().analyze_units(&[PathBuf::from("broken.cpp"), PathBuf::from("ok.cpp")], &provider);

    assert_eq!(result.failures.len(), 1);
    assert!(result.failures[0].error.contains("broken.cpp"));
    assert_eq!(result.stats.rewritten, 1);
}

#[test]
fn test_namespace_constant_keeps_outside_uses_in_scope() {
    let src = "namespace a {\n#define N 3\nint x = N;\n}\nnamespace b {\nint y = N;\n}\n\
               void f() {\n#define M 2\n}\nint z = M;\n";
    let analysis = analyze(&[("t.cpp", src)]);

    let n = diagnostic(&analysis, "N");
    assert_eq!(n.confidence, Some(Confidence::Medium));
    assert!(matches!(n.disposition, Disposition::Rewritten { .. }));
    assert!(reason(diagnostic(&analysis, "M")).contains("cannot be qualified"));

    assert_eq!(
        rewritten(&analysis, "t.cpp", src),
        "namespace a {\nconst int N = 3;\nint x = N;\n}\nnamespace b {\nint y = a::N;\n}\n\
         void f() {\n#define M 2\n}\nint z = M;\n"
    );
}

#[test]
fn test_class_constant_reached_through_dependent_macro() {
    let src = "class W {\n#define SIZE 4\n int a[SIZE];\n};\n#define TWICE (SIZE * 2)\nint b[TWICE];\n";
    let analysis = analyze(&[("t.h", src)]);

    let size = diagnostic(&analysis, "SIZE");
    assert_eq!(size.confidence, Some(Confidence::Medium));
    assert!(reason(size).contains("through macro `TWICE`"));
    assert!(analysis
        .plan
        .report
        .iter()
        .any(|r| r.kind == ReportKind::UnsafeRewriteRejected && r.macro_name == "SIZE"));

    // SIZE はマクロのまま残り、TWICE の初期化子から見える
    assert_eq!(
        rewritten(&analysis, "t.h", src),
        "class W {\n#define SIZE 4\n int a[SIZE];\n};\nconst int TWICE = (SIZE * 2);\nint b[TWICE];\n"
    );
}

#[test]
fn test_shared_header_rejected_by_one_unit_is_not_rewritten() {
    let mut provider = MemoryProvider::new();
    provider.insert("w.h", "#define LIMIT 8\n");
    provider.insert("a.cpp", "#include \"w.h\"\nint a = LIMIT;\n");
    provider.insert("b.cpp", "#include \"w.h\"\n#if LIMIT > 4\nint b = LIMIT;\n#endif\n");

    for order in [["a.cpp", "b.cpp"], ["b.cpp", "a.cpp"]] {
        let paths: Vec<PathBuf> = order.iter().map(PathBuf::from).collect();
        let result = Engine::default().analyze_units(&paths, &provider);

        let limit: Vec<&Diagnostic> = result.diagnostics.iter().filter(|d| d.macro_name == "LIMIT").collect();
        assert_eq!(limit.len(), 1, "{:?}", order);
        assert!(matches!(&limit[0].disposition, Disposition::ReportedOnly { reason } if reason.contains("#if")));
        assert!(!result.plan.files.contains_key(Path::new("w.h")));
        assert!(result.proposals.is_empty());
        assert_eq!(result.stats.rewritten, 0);
        assert_eq!(result.stats.reported_only, 1);
    }
}

#[test]
fn test_redefinition_after_undef_is_rejected_not_ambiguous() {
    let src = "#define N 1\nint a = N;\n#undef N\n#define N 2\nint b = N;\n";
    let analysis = analyze(&[("n.h", src)]);

    assert_eq!(analysis.diagnostics.len(), 2);
    for d in &analysis.diagnostics {
        assert_eq!(d.pattern, Some("SimpleConstant"));
        assert!(reason(d).contains("separated by #undef"));
    }
    assert_eq!(
        analysis.plan.report.iter().filter(|r| r.kind == ReportKind::UnsafeRewriteRejected).count(),
        2
    );
    assert_eq!(analysis.plan.edit_count(), 0);
}
