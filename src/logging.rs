//! # Logging モジュール
//!
//! シミュレーターのログ出力（tracing-subscriber）を初期化します。
//!
//! コンソールには読みやすい compact 形式、ファイルには日付ごとに切り替わる
//! JSON 形式で出力します。ファイル出力は tracing-appender の非同期ライターを
//! 使うため、ティック処理中のログ書き込みで処理が止まりません。
//! `RUST_LOG` が設定されていれば、設定ファイルやコマンドラインの指定より優先されます。

use std::error::Error;
use std::fs;
use std::str::FromStr;

use tracing::Level;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// ログ出力先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
}

impl LogOutput {
    pub fn writes_console(self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    pub fn writes_file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

impl FromStr for LogOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "console" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" => Ok(LogOutput::Both),
            _ => Err(format!("無効な出力先 '{}' (console, file, both のいずれか)", s)),
        }
    }
}

/// ログ設定
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub output: LogOutput,
    /// ファイル出力先ディレクトリ（存在しなければ作成）
    pub log_dir: String,
    /// ファイル名の接頭辞（`<prefix>.YYYY-MM-DD`）
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            output: LogOutput::Console,
            log_dir: "logs".to_string(),
            file_prefix: "uavsim".to_string(),
        }
    }
}

impl LogConfig {
    /// `-v` の指定回数からログレベルを決めた設定
    pub fn for_verbosity(verbosity: u8) -> Self {
        Self {
            level: level_for_verbosity(verbosity),
            ..Self::default()
        }
    }
}

/// `-v` の指定回数に対応するログレベル（-vv で DEBUG、-vvv 以上で TRACE）
pub fn level_for_verbosity(verbosity: u8) -> Level {
    match verbosity {
        0 | 1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// ログレベル名を解析する（大文字・小文字は区別しない）
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    Level::from_str(level).map_err(|_| format!("無効なログレベル '{}' (trace, debug, info, warn, error のいずれか)", level))
}

/// ログ出力を初期化します
///
/// 出力先に応じてコンソール層とファイル層を組み合わせ、グローバルな
/// subscriber として登録します。ファイル出力時はディレクトリも作成します。
///
/// # 戻り値
///
/// ファイル出力を行う場合は非同期ライターのガード。破棄した時点で
/// 未書き込みのログが書き出され、ファイル出力が止まるため、
/// 呼び出し側はプログラム終了まで保持してください。
///
/// # 例
///
/// ```rust,no_run
/// use uavsim::logging::{init_logging, LogConfig, LogOutput};
///
/// let config = LogConfig {
///     output: LogOutput::Both,
///     ..LogConfig::for_verbosity(2)
/// };
/// let _guard = init_logging(&config)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>, Box<dyn Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    let (file_writer, guard) = if config.output.writes_file() {
        fs::create_dir_all(&config.log_dir)?;
        let (writer, guard) = non_blocking(rolling::daily(&config.log_dir, &config.file_prefix));
        (Some(writer), Some(guard))
    } else {
        (None, None)
    };

    let console_layer = config
        .output
        .writes_console()
        .then(|| fmt::layer().with_target(true).compact());
    let file_layer = file_writer.map(|writer| fmt::layer().with_writer(writer).with_target(true).json());

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_output_from_str() {
        assert_eq!("console".parse(), Ok(LogOutput::Console));
        assert_eq!("FILE".parse(), Ok(LogOutput::File));
        assert_eq!("both".parse(), Ok(LogOutput::Both));
        assert!("stdout".parse::<LogOutput>().is_err());
    }

    #[test]
    fn test_log_output_targets() {
        assert!(LogOutput::Console.writes_console() && !LogOutput::Console.writes_file());
        assert!(!LogOutput::File.writes_console() && LogOutput::File.writes_file());
        assert!(LogOutput::Both.writes_console() && LogOutput::Both.writes_file());
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug"), Ok(Level::DEBUG));
        assert_eq!(parse_log_level("WARN"), Ok(Level::WARN));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_for_verbosity(0), Level::INFO);
        assert_eq!(level_for_verbosity(1), Level::INFO);
        assert_eq!(level_for_verbosity(2), Level::DEBUG);
        assert_eq!(level_for_verbosity(5), Level::TRACE);

        let config = LogConfig::for_verbosity(2);
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.output, LogOutput::Console);
        assert_eq!(config.file_prefix, "uavsim");
    }
}
