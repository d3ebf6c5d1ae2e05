//! # Scenario モジュール
//!
//! YAML形式のシナリオファイルを読み込み、検証し、シミュレーション環境を構築します。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::*;
use crate::simulation::Environment;

/// 組み込みのデモシナリオ
const DEMO_SCENARIO: &str = include_str!("../scenarios/simple_collection.yaml");

/// シナリオメタデータ
#[derive(Debug, Deserialize, Serialize)]
pub struct ScenarioMeta {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// シミュレーション設定
#[derive(Debug, Deserialize, Serialize)]
pub struct SimulationConfig {
    /// 1ティックで進む時間
    #[serde(default = "default_speed_rate")]
    pub speed_rate: u64,
    pub run_until: u64,
    #[serde(default)]
    pub seed: u64,
}

fn default_speed_rate() -> u64 {
    1
}

/// フィールド設定
#[derive(Debug, Deserialize, Serialize)]
pub struct WorldConfig {
    pub land_width: f64,
    pub land_height: f64,
}

/// 記憶領域1つ分の設定
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct BufferConfig {
    pub capacity: u64,
    pub io_speed: u64,
}

impl BufferConfig {
    fn build(&self) -> Memory {
        Memory::new(self.capacity, self.io_speed)
    }
}

/// 記憶モデル設定
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct MemoryConfig {
    pub sending_buffer: BufferConfig,
    pub receiving_buffer: BufferConfig,
    pub memory: BufferConfig,
}

impl MemoryConfig {
    fn build(&self) -> MemoryModel {
        MemoryModel::new(self.sending_buffer.build(), self.receiving_buffer.build(), self.memory.build())
    }
}

/// センサー設定
#[derive(Debug, Deserialize, Serialize)]
pub struct SensorConfig {
    pub position: Vector,
    pub memory: MemoryConfig,
    pub network: NetworkSettings,
    pub data_collecting_rate: u64,
    pub packet_size: u64,
    pub packet_life_time: u64,
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: u64,
}

fn default_sampling_rate() -> u64 {
    1
}

/// 基地局設定
#[derive(Debug, Deserialize, Serialize)]
pub struct BaseStationConfig {
    pub position: Vector,
    pub memory: MemoryConfig,
    pub network: NetworkSettings,
}

/// ウェイポイント設定
#[derive(Debug, Deserialize, Serialize)]
pub struct WayPointConfig {
    pub position: Vector,
    #[serde(default)]
    pub collection_rate: u64,
}

/// UAV設定
///
/// 速度は経路（ウェイポイントと `speed`）から区間ごとに決まるため設定項目はありません。
/// `position` はウェイポイント0と一致している必要があります。
#[derive(Debug, Deserialize, Serialize)]
pub struct UavConfig {
    pub position: Vector,
    pub memory: MemoryConfig,
    pub network: NetworkSettings,
    pub speed: f64,
    #[serde(default)]
    pub loop_route: bool,
    #[serde(default)]
    pub way_points: Vec<WayPointConfig>,
}

/// 完全なシナリオ設定
#[derive(Debug, Deserialize, Serialize)]
pub struct ScenarioConfig {
    pub meta: ScenarioMeta,
    pub sim: SimulationConfig,
    pub world: WorldConfig,
    #[serde(default)]
    pub energy_model: EnergyModel,
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
    #[serde(default)]
    pub base_stations: Vec<BaseStationConfig>,
    #[serde(default)]
    pub uavs: Vec<UavConfig>,
}

impl ScenarioConfig {
    /// YAMLファイルからシナリオ設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();

        // ファイル存在チェック
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path).map_err(|e| ScenarioError::IoError(path.to_path_buf(), e))?;
        Self::parse(&contents, path)
    }

    /// YAML文字列からシナリオ設定を読み込み
    pub fn from_yaml(contents: &str) -> Result<Self, ScenarioError> {
        Self::parse(contents, Path::new("<inline>"))
    }

    /// 組み込みのデモシナリオ
    pub fn demo() -> Result<Self, ScenarioError> {
        Self::parse(DEMO_SCENARIO, Path::new("<demo>"))
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, ScenarioError> {
        let config: ScenarioConfig =
            serde_yaml::from_str(contents).map_err(|e| ScenarioError::ParseError(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// 設定の検証
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.sim.speed_rate == 0 {
            return Err(ScenarioError::ValidationError("speed_rate must be positive".to_string()));
        }
        if self.sim.run_until == 0 {
            return Err(ScenarioError::ValidationError("run_until must be positive".to_string()));
        }
        if self.world.land_width <= 0.0 || self.world.land_height <= 0.0 {
            return Err(ScenarioError::ValidationError("Invalid land size".to_string()));
        }

        for (index, sensor) in self.sensors.iter().enumerate() {
            let label = format!("Sensor {}", index);
            if sensor.packet_size == 0 {
                return Err(ScenarioError::ValidationError(format!("{}: packet_size must be positive", label)));
            }
            if sensor.sampling_rate == 0 {
                return Err(ScenarioError::ValidationError(format!("{}: sampling_rate must be positive", label)));
            }
            self.validate_device(&label, &sensor.position, &sensor.network)?;
        }

        for (index, station) in self.base_stations.iter().enumerate() {
            self.validate_device(&format!("BaseStation {}", index), &station.position, &station.network)?;
        }

        for (index, uav) in self.uavs.iter().enumerate() {
            let label = format!("UAV {}", index);
            if uav.speed <= 0.0 {
                return Err(ScenarioError::ValidationError(format!("{}: speed must be positive", label)));
            }
            self.validate_device(&label, &uav.position, &uav.network)?;
            // 経路はウェイポイント0から始まる
            if let Some(first) = uav.way_points.first() {
                if first.position != uav.position {
                    return Err(ScenarioError::ValidationError(format!(
                        "{}: position must match way point 0",
                        label
                    )));
                }
            }
            for (wp_index, way_point) in uav.way_points.iter().enumerate() {
                if !self.is_position_in_bounds(&way_point.position) {
                    return Err(ScenarioError::ValidationError(format!(
                        "{}: way point {} outside land bounds",
                        label, wp_index
                    )));
                }
            }
        }

        Ok(())
    }

    fn validate_device(&self, label: &str, position: &Vector, network: &NetworkSettings) -> Result<(), ScenarioError> {
        if !self.is_position_in_bounds(position) {
            return Err(ScenarioError::ValidationError(format!("{} outside land bounds", label)));
        }
        if network.coverage_radius < 0.0 {
            return Err(ScenarioError::ValidationError(format!("{}: coverage_radius must not be negative", label)));
        }
        let protocol = &network.protocol;
        let fractions = [protocol.data_loss_percentage, protocol.data_loss_probability];
        if fractions.iter().any(|value| !(0.0..=1.0).contains(value)) {
            return Err(ScenarioError::ValidationError(format!(
                "{}: data loss fractions must be within [0, 1]",
                label
            )));
        }
        Ok(())
    }

    /// 位置が領域内かどうかをチェック
    fn is_position_in_bounds(&self, position: &Vector) -> bool {
        position.is_inside_land(self.world.land_width, self.world.land_height)
    }

    /// シナリオからシミュレーション環境を構築
    pub fn build_environment(&self) -> Environment {
        let sensors = self
            .sensors
            .iter()
            .enumerate()
            .map(|(index, config)| {
                let device = Device::new(
                    DeviceRef::sensor(index),
                    config.position,
                    config.memory.build(),
                    config.network,
                    self.energy_model,
                );
                Sensor::new(device, config.data_collecting_rate, config.packet_size, config.packet_life_time)
                    .with_sampling_rate(config.sampling_rate)
            })
            .collect();

        let base_stations = self
            .base_stations
            .iter()
            .enumerate()
            .map(|(index, config)| {
                BaseStation::new(Device::new(
                    DeviceRef::base_station(index),
                    config.position,
                    config.memory.build(),
                    config.network,
                    self.energy_model,
                ))
            })
            .collect();

        let uavs = self
            .uavs
            .iter()
            .enumerate()
            .map(|(index, config)| {
                let device = Device::new(
                    DeviceRef::uav(index),
                    config.position,
                    config.memory.build(),
                    config.network,
                    self.energy_model,
                );
                let mut uav = Uav::new(device, config.speed).with_loop_route(config.loop_route);
                for way_point in &config.way_points {
                    uav.add_way_point(way_point.position, way_point.collection_rate);
                }
                uav
            })
            .collect();

        Environment::new(
            self.world.land_width,
            self.world.land_height,
            self.sim.speed_rate,
            self.sim.run_until,
            self.sim.seed,
            uavs,
            sensors,
            base_stations,
        )
    }

    /// シナリオの概要を表示
    pub fn print_summary(&self) {
        println!("=== シナリオ情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!("バージョン: {}", self.meta.version);
        println!();

        println!("=== シミュレーション設定 ===");
        println!("時間倍率: {}", self.sim.speed_rate);
        println!("終了時刻: {}", self.sim.run_until);
        println!("シード値: {}", self.sim.seed);
        println!("フィールド: {:.1} x {:.1}", self.world.land_width, self.world.land_height);
        println!();

        println!("=== デバイス ===");
        println!("センサー: {}基", self.sensors.len());
        let total_rate: u64 = self.sensors.iter().map(|s| s.data_collecting_rate).sum();
        println!("総生成レート: {} 単位/ティック", total_rate);
        println!("基地局: {}基", self.base_stations.len());
        println!("UAV: {}機", self.uavs.len());

        for (index, uav) in self.uavs.iter().enumerate() {
            let total_collection: u64 = uav.way_points.iter().map(|w| w.collection_rate).sum();
            println!(
                "  UAV {}: ウェイポイント {}箇所 (収集予定 {} 単位, 速度 {:.1})",
                index,
                uav.way_points.len(),
                total_collection,
                uav.speed
            );
        }
    }
}

/// シナリオ読み込みエラー
#[derive(Debug)]
pub enum ScenarioError {
    FileNotFound(PathBuf),
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    ValidationError(String),
}

impl std::fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScenarioError::FileNotFound(path) => {
                write!(f, "シナリオファイルが見つかりません: {}", path.display())
            }
            ScenarioError::IoError(path, err) => {
                write!(f, "ファイル読み込みエラー {}: {}", path.display(), err)
            }
            ScenarioError::ParseError(path, err) => {
                write!(f, "YAML解析エラー {}: {}", path.display(), err)
            }
            ScenarioError::ValidationError(msg) => {
                write!(f, "設定検証エラー: {}", msg)
            }
        }
    }
}

impl std::error::Error for ScenarioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScenarioError::IoError(_, err) => Some(err),
            ScenarioError::ParseError(_, err) => Some(err),
            _ => None,
        }
    }
}
