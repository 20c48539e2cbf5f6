//! Preprocessor integration tests
//!
//! トークンストリームの構築（インクルード展開、条件コンパイル）と
//! マクロテーブルの有効区間を確認する。

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use cxx_macro_rewrite::macro_def::{Redefinition, SpanClose};
use cxx_macro_rewrite::{
    DirectiveKind, FsProvider, MacroTable, MemoryProvider, ParseError, Reachability, StreamOptions,
    TranslationUnit, UnitError,
};

/// Helper to build a unit from in-memory files (先頭がメインファイル)
fn build(files: &[(&str, &str)]) -> TranslationUnit {
    build_with(files, StreamOptions::default()).unwrap()
}

fn build_with(files: &[(&str, &str)], options: StreamOptions) -> Result<TranslationUnit, UnitError> {
    let mut provider = MemoryProvider::new();
    for (path, text) in files {
        provider.insert(*path, *text);
    }
    TranslationUnit::build(Path::new(files[0].0), &provider, options)
}

/// Helper to record every directive of a unit into a table
fn table_of(unit: &TranslationUnit) -> MacroTable {
    let mut table = MacroTable::new();
    for directive in &unit.directives {
        table.record(directive.clone());
    }
    table.finish(unit.end_position);
    table
}

/// Helper to write a file under a temporary directory
fn write(dir: &TempDir, relative: &str, text: &str) -> std::path::PathBuf {
    let path = dir.path().join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, text).unwrap();
    path
}

#[test]
fn test_object_and_function_macros_from_disk() {
    let dir = TempDir::new().unwrap();
    let main = write(
        &dir,
        "main.cpp",
        "#define ASPECT_RATIO 1.653\n#define MAX(a, b) ((a) > (b) ? (a) : (b))\nint m = MAX(1, 2);\n",
    );

    let provider = FsProvider::new(Vec::new());
    let unit = TranslationUnit::build(&main, &provider, StreamOptions::default()).unwrap();
    let table = table_of(&unit);

    assert_eq!(table.len(), 2);
    let ratio = table.definitions_of("ASPECT_RATIO").next().unwrap();
    assert!(!ratio.is_function_like());
    assert_eq!(ratio.directive.body_text(), "1.653");

    let max = table.definitions_of("MAX").next().unwrap();
    assert!(max.is_function_like());
    assert_eq!(max.directive.params, vec!["a", "b"]);
    assert_eq!(max.closed_by, SpanClose::EndOfUnit);
    assert_eq!(max.end, unit.end_position);
}

#[test]
fn test_include_path_lookup() {
    let dir = TempDir::new().unwrap();
    write(&dir, "include/config.h", "#define BUFFER_SIZE 512\n");
    let main = write(&dir, "src/main.cpp", "#include \"config.h\"\nchar buf[BUFFER_SIZE];\n");

    let provider = FsProvider::new(vec![dir.path().join("include")]);
    let unit = TranslationUnit::build(&main, &provider, StreamOptions::default()).unwrap();

    let define = unit.directives.iter().find(|d| d.name == "BUFFER_SIZE").unwrap();
    assert!(unit.files.get_path(define.span.file_id).ends_with("include/config.h"));
    assert_eq!(unit.files.len(), 2);
}

#[test]
fn test_unresolved_include_is_skipped() {
    let unit = build(&[("main.cpp", "#include \"missing.h\"\n#include <map>\n#define N 1\n")]);
    assert_eq!(unit.raw_directives.iter().filter(|r| r.name == "include").count(), 2);
    assert_eq!(unit.directives.len(), 1);
    assert_eq!(unit.files.len(), 1);
}

#[test]
fn test_include_entered_once() {
    let unit = build(&[
        ("a.h", "#include \"b.h\"\n#define A 1\n"),
        ("b.h", "#include \"a.h\"\n#define B 2\n"),
    ]);
    let names: Vec<_> = unit.directives.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["B", "A"]);
    assert_eq!(unit.files.len(), 2);
}

#[test]
fn test_follow_includes_disabled() {
    let options = StreamOptions {
        follow_includes: false,
        ..StreamOptions::default()
    };
    let unit = build_with(&[("main.cpp", "#include \"w.h\"\nint x;\n"), ("w.h", "#define N 5\n")], options).unwrap();
    assert!(unit.directives.is_empty());
    assert_eq!(unit.raw_directives.len(), 1);
    assert_eq!(unit.files.len(), 1);
}

#[test]
fn test_include_depth_limit() {
    let options = StreamOptions {
        follow_includes: true,
        max_include_depth: 1,
    };
    let result = build_with(&[("main.cpp", "#include \"a.h\"\n"), ("a.h", "#define A 1\n")], options);
    assert!(matches!(
        result,
        Err(UnitError::Parse { kind: ParseError::IncludeTooDeep(1), .. })
    ));
}

#[test]
fn test_ifdef_else_branches_are_exclusive() {
    let unit = build(&[("m.h", "#ifdef FAST\n#define SPEED 10\n#else\n#define SPEED 1\n#endif\n")]);
    let table = table_of(&unit);

    let defs: Vec<_> = table.definitions_of("SPEED").collect();
    assert_eq!(defs.len(), 2);
    assert!(defs.iter().all(|d| d.directive.reachability == Reachability::Conditional));
    assert!(matches!(defs[0].closed_by, SpanClose::ExclusiveBranch { by: 1, .. }));
    assert_eq!(defs[1].redefinition, Redefinition::Exclusive { previous: 0 });
    assert!(table.conflicting_definition(0).is_none());
    assert!(table.conflicting_definition(1).is_none());
}

#[test]
fn test_ifndef_and_elif_reachability() {
    let src = "#ifndef LEGACY\n#define MODE 1\n#elif VERSION > 2\n#define MODE 2\n#endif\n\
               #if 1\n#define ALWAYS 1\n#endif\n";
    let unit = build(&[("m.h", src)]);
    let modes: Vec<_> = unit.directives.iter().filter(|d| d.name == "MODE").collect();
    assert_eq!(modes[0].reachability, Reachability::Conditional);
    assert_eq!(modes[1].reachability, Reachability::Conditional);
    let always = unit.directives.iter().find(|d| d.name == "ALWAYS").unwrap();
    assert_eq!(always.reachability, Reachability::Unconditional);
}

#[test]
fn test_disabled_definition_stays_in_history() {
    let unit = build(&[("m.h", "#if 0\n#define OLD 1\n#endif\nint x;\n")]);
    let table = table_of(&unit);

    let old = table.definitions_of("OLD").next().unwrap();
    assert_eq!(old.directive.reachability, Reachability::Disabled);
    assert_eq!(old.closed_by, SpanClose::Never);
    assert!(!old.is_active_span_nonempty());
    assert!(table.is_macro_name("OLD"));
    assert_eq!(table.history("OLD").len(), 1);
    assert!(table.active_definition_at("OLD", unit.tokens[0].position).is_none());
}

#[test]
fn test_undef_closes_active_span() {
    let unit = build(&[("m.h", "#define N 1\nint a = N;\n#undef N\nint b = N;\n")]);
    let table = table_of(&unit);

    let uses: Vec<_> = unit.tokens.iter().filter(|t| t.token.is_ident("N")).collect();
    assert_eq!(uses.len(), 2);
    assert!(table.active_definition_at("N", uses[0].position).is_some());
    assert!(table.active_definition_at("N", uses[1].position).is_none());

    let def = table.get(0);
    assert!(matches!(def.closed_by, SpanClose::Undef { .. }));
    let undef = def.undef.as_ref().unwrap();
    assert_eq!(undef.kind, DirectiveKind::Undef);
    assert_eq!(undef.span.line, 3);
    assert_eq!(table.history("N").len(), 2);
}

#[test]
fn test_conflicting_redefinition() {
    let unit = build(&[("m.h", "#define LIMIT 10\nint a = LIMIT;\n#define LIMIT 20\nint b = LIMIT;\n")]);
    let table = table_of(&unit);

    let defs: Vec<_> = table.definitions_of("LIMIT").collect();
    assert_eq!(defs.len(), 2);
    assert!(matches!(defs[0].closed_by, SpanClose::Redefinition { by: 1, .. }));
    assert_eq!(defs[1].redefinition, Redefinition::Conflicting { previous: 0 });
    assert_eq!(table.conflicting_definition(0).map(|d| d.id), Some(1));

    let uses: Vec<_> = unit.tokens.iter().filter(|t| t.token.is_ident("LIMIT")).collect();
    assert_eq!(table.active_definition_at("LIMIT", uses[0].position).map(|d| d.id), Some(0));
    assert_eq!(table.active_definition_at("LIMIT", uses[1].position).map(|d| d.id), Some(1));
    assert_eq!(table.next_definition_after("LIMIT", uses[0].position).map(|d| d.id), Some(1));
}

#[test]
fn test_identical_redefinition_is_absorbed() {
    let unit = build(&[("m.h", "#define N 1\n#define N  1\n")]);
    let table = table_of(&unit);

    assert_eq!(table.get(0).duplicates, vec![1]);
    assert_eq!(table.get(1).redefinition, Redefinition::Identical { of: 0 });
    assert!(!table.get(1).is_active_span_nonempty());
    assert!(table.conflicting_definition(0).is_none());
}

#[test]
fn test_multiline_macro() {
    let unit = build(&[("m.h", "#define SUM(a, b) \\\n    ((a) + \\\n     (b))\nint x;\n")]);
    let sum = &unit.directives[0];
    assert_eq!(sum.body_text(), "((a) + (b))");
    assert_eq!(sum.span.line, 1);
    assert_eq!(unit.tokens[0].token.span.line, 4);
}

#[test]
fn test_empty_and_parameterless_macros() {
    let unit = build(&[("m.h", "#define EMPTY\n#define NOW() 1\n")]);
    let empty = &unit.directives[0];
    assert!(empty.body.is_empty());
    assert!(!empty.is_function_like);

    let now = &unit.directives[1];
    assert!(now.is_function_like);
    assert!(now.params.is_empty());
}

#[test]
fn test_stringizing_and_pasting_detected() {
    let unit = build(&[("m.h", "#define STR(x) #x\n#define CAT(a, b) a ## b\n")]);
    assert!(unit.directives[0].has_stringizing());
    assert!(unit.directives[1].has_token_pasting());
    assert!(!unit.directives[1].has_stringizing());
}

#[test]
fn test_other_directives_are_kept() {
    let unit = build(&[("m.h", "#pragma once\n#if 0\n#error don't build this\n#endif\n#line 10\n")]);
    let names: Vec<_> = unit.raw_directives.iter().map(|r| r.name.as_str()).collect();
    assert!(names.contains(&"pragma"));
    assert!(names.contains(&"line"));
    assert!(unit.directives.is_empty());
}
