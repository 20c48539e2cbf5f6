//! C/C++ Macro Rewrite CLI
//!
//! 翻訳単位を解析して、マクロごとの診断と編集計画を出力する

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use cxx_macro_rewrite::{
    AnalysisResult, ClassConstantStyle, Config, ConfigBuilder, Disposition, Engine, FsProvider, MinConfidence,
};

/// 出力形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Text,
}

/// コマンドライン引数
#[derive(Parser)]
#[command(name = "cxx-macro-rewrite")]
#[command(version, about = "Classify C/C++ macros and propose typed replacements")]
struct Cli {
    /// 解析する翻訳単位
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// インクルードパス (-I)
    #[arg(short = 'I', long = "include")]
    include: Vec<PathBuf>,

    /// 設定ファイル（JSON）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 文字列定数を std::string で宣言する
    #[arg(long)]
    prefer_string_type: bool,

    /// クラス内定数の形式
    #[arg(long, value_enum)]
    class_constant_style: Option<ClassConstantStyle>,

    /// 出力する提案の最低安全度
    #[arg(long = "min-confidence", value_enum)]
    min_confidence: Option<MinConfidence>,

    /// 出力形式
    #[arg(long, value_enum, default_value = "text")]
    format: Format,

    /// 出力ファイル（省略時は標準出力）
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// ワーカースレッド数
    #[arg(short = 'j', long = "jobs")]
    jobs: Option<usize>,

    /// ログを詳しくする（-v, -vv, -vvv）
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let config = build_config(&cli)?;
    let provider = FsProvider::new(config.include_paths.clone());
    let engine = Engine::new(config);
    let result = engine.analyze_units(&cli.files, &provider);

    let rendered = match cli.format {
        Format::Json => serde_json::to_string_pretty(&result).context("cannot serialize the analysis result")?,
        Format::Text => render_text(&result),
    };
    match &cli.output {
        Some(path) => fs::write(path, rendered).with_context(|| format!("cannot write {}", path.display()))?,
        None => println!("{}", rendered),
    }

    Ok(if result.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// 設定ファイルにコマンドラインの指定を重ねる
fn build_config(cli: &Cli) -> Result<Config> {
    let base = match &cli.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };
    let mut builder = ConfigBuilder::from_config(base);
    for dir in &cli.include {
        builder = builder.include_path(dir.clone());
    }
    if cli.prefer_string_type {
        builder = builder.prefer_string_type(true);
    }
    if let Some(style) = cli.class_constant_style {
        builder = builder.class_constant_style(style);
    }
    if let Some(min) = cli.min_confidence {
        builder = builder.min_confidence_to_emit(min);
    }
    if let Some(jobs) = cli.jobs {
        builder = builder.jobs(jobs);
    }
    Ok(builder.build())
}

/// 人が読む形式で出力
fn render_text(result: &AnalysisResult) -> String {
    let mut out = String::new();

    for diagnostic in &result.diagnostics {
        let pattern = diagnostic.pattern.unwrap_or("-");
        let confidence = diagnostic
            .confidence
            .map_or_else(|| "-".to_string(), |c| c.to_string());
        let disposition = match &diagnostic.disposition {
            Disposition::Rewritten { proposal_id } => format!("rewritten ({})", proposal_id),
            Disposition::ReportedOnly { reason } => format!("reported: {}", reason),
            Disposition::Skipped { reason } => format!("skipped: {}", reason),
        };
        let _ = writeln!(
            out,
            "{}: {} [{} / {}] {}",
            diagnostic.location, diagnostic.macro_name, pattern, confidence, disposition
        );
        for hazard in &diagnostic.hazards {
            let _ = writeln!(out, "    hazard: {}", hazard);
        }
    }

    if !result.proposals.is_empty() {
        let _ = writeln!(out, "\n# Proposals");
    }
    for proposal in &result.proposals {
        let _ = writeln!(out, "{} ({} tier)", proposal.id, proposal.tier);
        for line in proposal.declaration.lines() {
            let _ = writeln!(out, "    {}", line);
        }
        if let Some(def) = &proposal.out_of_class_definition {
            let _ = writeln!(out, "    out of class: {}", def);
        }
        if let Some(alt) = &proposal.alternative {
            let _ = writeln!(out, "    alternative: {}", alt);
        }
        for note in &proposal.notes {
            let _ = writeln!(out, "    note: {}", note);
        }
    }

    for conflict in &result.plan.conflicts {
        let _ = writeln!(
            out,
            "conflict: {} [{}..{}] between {}",
            conflict.path.display(),
            conflict.start,
            conflict.end,
            conflict.proposals.join(", ")
        );
    }
    for failure in &result.failures {
        let _ = writeln!(out, "error: {}: {}", failure.path.display(), failure.error);
    }

    let stats = &result.stats;
    let _ = write!(
        out,
        "\n{} unit(s), {} failed; {} macro(s): {} rewritten, {} reported, {} skipped; {} edit(s), {} conflict(s)",
        stats.units,
        stats.failed_units,
        stats.macros,
        stats.rewritten,
        stats.reported_only,
        stats.skipped,
        stats.edits,
        stats.conflicts
    );
    out
}
