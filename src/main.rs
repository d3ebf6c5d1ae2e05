use std::fs;

use clap::{Arg, Command};
use tracing::{error, info};

use uavsim::controller::{run_episode, GreedyController};
use uavsim::logging::{init_logging, parse_log_level, LogConfig, LogOutput};
use uavsim::scenario::{ScenarioConfig, ScenarioError};
use uavsim::simulation::EpisodeReport;

fn main() {
    // コマンドライン引数の解析
    let matches = Command::new("uavsim")
        .version("0.1.0")
        .about("UAVデータ収集シミュレーション")
        .long_about("センサー・UAV・基地局からなる無線センサーネットワークの離散時間シミュレーター\n\
                     UAVによるデータ収集と中継転送を評価します。")
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("シナリオファイル(.yaml)のパスを指定")
                .long_help("実行するシナリオファイル(.yaml)のパスを指定します。\n\
                           指定しない場合、利用方法を表示して終了します。")
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(clap::ArgAction::SetTrue)
                .help("シナリオの情報のみ表示して終了")
        )
        .arg(
            Arg::new("test")
                .short('t')
                .long("test")
                .action(clap::ArgAction::SetTrue)
                .help("組み込みのデモシナリオを実行")
                .conflicts_with("scenario")
        )
        .arg(
            Arg::new("episodes")
                .short('e')
                .long("episodes")
                .value_name("N")
                .value_parser(clap::value_parser!(usize))
                .default_value("1")
                .help("実行するエピソード数")
        )
        .arg(
            Arg::new("report")
                .short('r')
                .long("report")
                .value_name("FILE")
                .help("エピソード集計をYAMLで書き出すファイル")
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::Count)
                .help("詳細出力レベル (-v: 基本, -vv: 詳細, -vvv: デバッグ)")
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("ログレベル (trace, debug, info, warn, error)")
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("OUTPUT")
                .default_value("console")
                .help("ログ出力先 (console, file, both)")
        )
        .get_matches();

    println!("UAVデータ収集シミュレーション - uavsim v0.1.0");
    println!();

    // 詳細レベルの設定
    let verbose_level = matches.get_count("verbose");
    if verbose_level > 0 {
        println!("詳細出力レベル: {}", verbose_level);
    }

    let mut log_config = LogConfig::for_verbosity(verbose_level);
    if let Some(level) = matches.get_one::<String>("log-level") {
        match parse_log_level(level) {
            Ok(level) => log_config.level = level,
            Err(e) => eprintln!("警告: {}", e),
        }
    }
    if let Some(output) = matches.get_one::<String>("log-output") {
        match output.parse::<LogOutput>() {
            Ok(output) => log_config.output = output,
            Err(e) => eprintln!("警告: {}", e),
        }
    }
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("エラー: ログ初期化に失敗しました: {}", e);
            std::process::exit(1);
        }
    };

    let scenario = if matches.get_flag("test") {
        println!("=== デモシナリオモード ===");
        ScenarioConfig::demo()
    } else if let Some(scenario_path) = matches.get_one::<String>("scenario") {
        ScenarioConfig::from_file(scenario_path)
    } else {
        // デフォルト動作: 利用可能なシナリオ一覧を表示
        show_default_help();
        return;
    };

    let episodes = matches.get_one::<usize>("episodes").copied().unwrap_or(1);
    let report_path = matches.get_one::<String>("report").cloned();
    match run_scenario(scenario, matches.get_flag("info"), episodes, report_path.as_deref(), verbose_level) {
        Ok(_) => {
            if verbose_level > 0 {
                println!("シナリオ実行が正常に完了しました。");
            }
        }
        Err(e) => {
            error!("{}", e);
            eprintln!("エラー: {}", e);
            std::process::exit(1);
        }
    }
}

/// 読み込んだシナリオを実行（情報表示のみの場合は概要を表示）
fn run_scenario(
    scenario: Result<ScenarioConfig, ScenarioError>,
    info_only: bool,
    episodes: usize,
    report_path: Option<&str>,
    verbose_level: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = scenario?;

    // 情報表示のみの場合
    if info_only {
        scenario.print_summary();
        return Ok(());
    }

    execute_scenario(scenario, episodes, report_path, verbose_level)
}

/// シナリオの実行
fn execute_scenario(
    scenario: ScenarioConfig,
    episodes: usize,
    report_path: Option<&str>,
    verbose_level: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    // 基本情報表示
    scenario.print_summary();
    println!();

    let mut environment = scenario.build_environment();
    let mut controller = GreedyController::new(1);
    info!("シミュレーション開始: {} エピソード", episodes);

    let mut reports = Vec::with_capacity(episodes);
    for episode in 0..episodes {
        let report = run_episode(&mut environment, &mut controller, episode);
        if verbose_level > 0 {
            environment.log_results();
        }
        print_report(&report);
        reports.push(report);
    }

    if let Some(path) = report_path {
        let contents = serde_yaml::to_string(&reports)?;
        fs::write(path, contents)?;
        println!("集計結果を書き出しました: {}", path);
    }

    Ok(())
}

fn print_report(report: &EpisodeReport) {
    println!("=== エピソード {} ===", report.episode);
    println!("終了時刻: {}", report.time_step);
    println!("生成: {} / 受信: {} (PDR {:.3})", report.generated, report.received, report.pdr);
    match report.e2e_delay {
        Some(delay) => println!("平均遅延: {:.2}", delay),
        None => println!("平均遅延: -"),
    }
    println!(
        "損失: プロトコル {} / 上書き {} / 失効 {}",
        report.protocol_loss, report.overwrite_loss, report.expired
    );
    for uav in &report.uavs {
        println!(
            "  UAV {}: 収集 {} 単位, エネルギー {:.4}, 使用率 {:.2}",
            uav.id, uav.num_of_collected_packets, uav.consumed_energy, uav.occupancy
        );
    }
    println!();
}

/// デフォルトヘルプとシナリオ一覧を表示
fn show_default_help() {
    println!("使用方法:");
    println!("  uavsim [オプション]");
    println!();
    println!("オプション:");
    println!("  -s, --scenario <FILE>    シナリオファイルを指定して実行");
    println!("  -i, --info               シナリオ情報のみ表示");
    println!("  -t, --test               組み込みのデモシナリオを実行");
    println!("  -e, --episodes <N>       エピソード数 (デフォルト: 1)");
    println!("  -r, --report <FILE>      エピソード集計をYAMLで書き出し");
    println!("  -v, --verbose            詳細出力 (複数指定で詳細レベル上昇)");
    println!("      --log-level <LEVEL>  ログレベル");
    println!("      --log-output <OUT>   ログ出力先 (console, file, both)");
    println!("  -h, --help               このヘルプを表示");
    println!();
    println!("利用可能なシナリオファイル:");
    println!("  scenarios/simple_collection.yaml  - UAV 1機による基本収集");
    println!("  scenarios/relay_chain.yaml        - UAV間中継の確認用");
    println!();
    println!("例:");
    println!("  uavsim -s scenarios/simple_collection.yaml");
    println!("  uavsim -s scenarios/relay_chain.yaml -v");
    println!("  uavsim -s scenarios/simple_collection.yaml -e 5 -r report.yaml");
    println!("  uavsim --test");
}
