//! 解析の設定
//!
//! JSON（camelCase）から読み込むか、`ConfigBuilder` で組み立てる。
//! 未指定の項目は既定値になる。

use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::synthesizer::SafetyTier;

/// クラス内定数の書き換え形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
pub enum ClassConstantStyle {
    /// クラス本体の定数式で使われていれば enum、それ以外は static const
    #[default]
    Auto,
    /// 常に static const メンバ
    #[value(name = "static-const")]
    StaticConstInClass,
    /// 整数型なら常に enum
    EnumHack,
}

/// 出力する提案の最低安全度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
pub enum MinConfidence {
    High,
    #[default]
    Medium,
    Low,
}

impl MinConfidence {
    /// この閾値で出力してよい安全度か
    pub fn admits(self, tier: SafetyTier) -> bool {
        let min = match self {
            MinConfidence::High => SafetyTier::High,
            MinConfidence::Medium => SafetyTier::Medium,
            MinConfidence::Low => SafetyTier::Low,
        };
        tier >= min
    }
}

/// 解析の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// 文字列定数を `const std::string` で宣言する
    pub prefer_string_type: bool,
    pub class_constant_style: ClassConstantStyle,
    pub min_confidence_to_emit: MinConfidence,
    /// `#include` をたどる
    pub follow_includes: bool,
    pub max_include_depth: usize,
    /// `<>` の include を探すディレクトリ
    pub include_paths: Vec<PathBuf>,
    /// クラス外定義を置く実装ファイルの拡張子
    pub implementation_extension: String,
    /// ワーカースレッド数（0 = rayon の既定）
    pub jobs: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefer_string_type: false,
            class_constant_style: ClassConstantStyle::Auto,
            min_confidence_to_emit: MinConfidence::Medium,
            follow_includes: true,
            max_include_depth: 32,
            include_paths: Vec::new(),
            implementation_extension: "cpp".to_string(),
            jobs: 0,
        }
    }
}

impl Config {
    /// JSON ファイルから読み込む
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// `Config` のビルダー
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// 既存の設定から始める
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    pub fn prefer_string_type(mut self, value: bool) -> Self {
        self.config.prefer_string_type = value;
        self
    }

    pub fn class_constant_style(mut self, style: ClassConstantStyle) -> Self {
        self.config.class_constant_style = style;
        self
    }

    pub fn min_confidence_to_emit(mut self, min: MinConfidence) -> Self {
        self.config.min_confidence_to_emit = min;
        self
    }

    pub fn follow_includes(mut self, value: bool) -> Self {
        self.config.follow_includes = value;
        self
    }

    pub fn max_include_depth(mut self, depth: usize) -> Self {
        self.config.max_include_depth = depth;
        self
    }

    pub fn include_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.include_paths.push(dir.into());
        self
    }

    pub fn implementation_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.implementation_extension = ext.into();
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.config.jobs = jobs;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
