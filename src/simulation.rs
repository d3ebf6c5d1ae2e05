//! # Simulation モジュール
//!
//! UAVによるデータ収集シミュレーションの中核となる環境を提供します。
//!
//! このモジュールは、離散時間シミュレーションの1ティックを管理し、
//! すべてのデバイス（センサー、基地局、UAV）の処理を決められた順序で実行します。
//! 外部のコントローラー（強化学習エージェントなど）はティックの合間に
//! 範囲検索やタスク割り当てを行い、`step()` を `has_ended()` まで繰り返します。
//!
//! ## シミュレーション処理順序
//!
//! 各ティックにおいて、以下の順序で処理が実行されます：
//!
//! 1. **センサー処理**: 記憶領域の減衰、データ生成
//! 2. **基地局処理**: 受信データの昇格、到着時刻の記録
//! 3. **UAV処理**: 記憶領域の減衰、接続の整理、タスク（FORWARD / COLLECT / MOVE）の実行
//!
//! 各リスト内はリスト順に処理され、同じ初期状態とシードからは常に同じ結果になります。
//!
//! ## 使用例
//!
//! ```rust,no_run
//! use uavsim::scenario::ScenarioConfig;
//!
//! let config = ScenarioConfig::from_file("scenarios/simple_collection.yaml")?;
//! let mut environment = config.build_environment();
//! while !environment.has_ended() {
//!     environment.step();
//! }
//! println!("PDR: {:.3}", environment.calculate_pdr());
//! # Ok::<(), uavsim::scenario::ScenarioError>(())
//! ```

use rand::SeedableRng;
use rand_pcg::Pcg64;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::models::*;

/// リセット用のデバイス状態スナップショット
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub uavs: Vec<Uav>,
    pub sensors: Vec<Sensor>,
    pub base_stations: Vec<BaseStation>,
}

/// 環境全体の累計統計
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnvironmentStats {
    /// プロトコル損失の累計単位数
    pub protocol_loss: u64,
    /// 転送で届いた累計単位数
    pub transferred: u64,
    /// 転送回数
    pub transitions: u64,
}

/// 1ティック開始時点の全デバイス位置
struct PositionTable {
    uavs: Vec<Vector>,
    sensors: Vec<Vector>,
    base_stations: Vec<Vector>,
}

impl PositionTable {
    fn get(&self, device: DeviceRef) -> Option<Vector> {
        let positions = match device.kind {
            DeviceKind::Uav => &self.uavs,
            DeviceKind::Sensor => &self.sensors,
            DeviceKind::BaseStation => &self.base_stations,
        };
        positions.get(device.index).copied()
    }
}

/// シミュレーション環境
#[derive(Debug, Clone)]
pub struct Environment {
    pub land_width: f64,
    pub land_height: f64,
    /// 1ティックで進む時間
    pub speed_rate: u64,
    pub uavs: Vec<Uav>,
    pub sensors: Vec<Sensor>,
    pub base_stations: Vec<BaseStation>,
    pub run_until: u64,
    pub time_step: u64,
    pub stats: EnvironmentStats,
    /// 直近のティックで発生した転送
    pub last_transitions: Vec<DataTransition>,
    rng: Pcg64,
    initial_state: DeviceSnapshot,
}

impl Environment {
    /// 新しい環境を作成し、リセット用に初期状態を保存します
    ///
    /// 各デバイスのIDは所属リスト内の位置に合わせて振り直されます。
    ///
    /// # 引数
    ///
    /// * `land_width`, `land_height` - フィールドの大きさ
    /// * `speed_rate` - 1ティックで進む時間（1以上）
    /// * `run_until` - この時刻に達したらエピソード終了
    /// * `seed` - プロトコル損失の乱数シード
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        land_width: f64,
        land_height: f64,
        speed_rate: u64,
        run_until: u64,
        seed: u64,
        mut uavs: Vec<Uav>,
        mut sensors: Vec<Sensor>,
        mut base_stations: Vec<BaseStation>,
    ) -> Self {
        for (index, uav) in uavs.iter_mut().enumerate() {
            uav.device.id = DeviceRef::uav(index);
        }
        for (index, sensor) in sensors.iter_mut().enumerate() {
            sensor.device.id = DeviceRef::sensor(index);
        }
        for (index, base_station) in base_stations.iter_mut().enumerate() {
            base_station.device.id = DeviceRef::base_station(index);
        }

        let initial_state = DeviceSnapshot {
            uavs: uavs.clone(),
            sensors: sensors.clone(),
            base_stations: base_stations.clone(),
        };

        Self {
            land_width,
            land_height,
            speed_rate: speed_rate.max(1),
            uavs,
            sensors,
            base_stations,
            run_until,
            time_step: 0,
            stats: EnvironmentStats::default(),
            last_transitions: Vec::new(),
            rng: Pcg64::seed_from_u64(seed),
            initial_state,
        }
    }

    /// 現在のデバイス状態のスナップショット
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            uavs: self.uavs.clone(),
            sensors: self.sensors.clone(),
            base_stations: self.base_stations.clone(),
        }
    }

    fn positions(&self) -> PositionTable {
        PositionTable {
            uavs: self.uavs.iter().map(|uav| uav.device.position).collect(),
            sensors: self.sensors.iter().map(|sensor| sensor.device.position).collect(),
            base_stations: self.base_stations.iter().map(|station| station.device.position).collect(),
        }
    }

    /// 参照先のデバイスを取得
    pub fn device(&self, device: DeviceRef) -> Option<&Device> {
        match device.kind {
            DeviceKind::Uav => self.uavs.get(device.index).map(|uav| &uav.device),
            DeviceKind::Sensor => self.sensors.get(device.index).map(|sensor| &sensor.device),
            DeviceKind::BaseStation => self.base_stations.get(device.index).map(|station| &station.device),
        }
    }

    fn devices(&self, kind: DeviceKind) -> Vec<&Device> {
        match kind {
            DeviceKind::Uav => self.uavs.iter().map(|uav| &uav.device).collect(),
            DeviceKind::Sensor => self.sensors.iter().map(|sensor| &sensor.device).collect(),
            DeviceKind::BaseStation => self.base_stations.iter().map(|station| &station.device).collect(),
        }
    }

    /// 1ティック進める
    pub fn step(&mut self) {
        self.time_step += self.speed_rate;
        self.last_transitions.clear();
        let current_time = self.time_step;
        let speed_rate = self.speed_rate;

        let positions = self.positions();
        let lookup = |device: DeviceRef| positions.get(device);
        for sensor in &mut self.sensors {
            sensor.tick(current_time, speed_rate, &lookup);
        }
        for base_station in &mut self.base_stations {
            base_station.tick(current_time, speed_rate, &lookup);
        }

        for index in 0..self.uavs.len() {
            // 先に処理されたUAVの移動を反映する
            let positions = self.positions();
            let lookup = |device: DeviceRef| positions.get(device);
            self.uavs[index].tick(current_time, speed_rate, &lookup);
            self.run_uav_task(index);
        }
    }

    /// UAVのタスクを1つ実行する（FORWARD > COLLECT > RECEIVE待機 > MOVE の優先順）
    fn run_uav_task(&mut self, index: usize) {
        let uav = &self.uavs[index];
        if uav.is_active(UavTask::Forward) {
            self.forward_data(index);
        } else if uav.is_active(UavTask::Collect) {
            self.collect_data(index);
        } else if uav.is_active(UavTask::Receive) {
            // 転送元の完了待ち
        } else {
            self.uavs[index].advance(self.speed_rate);
        }
    }

    fn forward_data(&mut self, index: usize) {
        let Some(target) = self.uavs[index].forward_data_target else {
            warn!("{}: 転送先が未設定のためFORWARDを終了", self.uavs[index].device);
            self.uavs[index].deactivate_task(UavTask::Forward);
            return;
        };
        if target.kind == DeviceKind::Uav {
            assert!(target.index != index, "UAV {} cannot forward data to itself", index);
            assert!(
                self.uavs[target.index].is_active(UavTask::Receive),
                "{} must be in RECEIVE to accept forwarded data",
                target
            );
        }

        let mut ctx = TickContext {
            time_step: self.time_step,
            speed_rate: self.speed_rate,
            rng: &mut self.rng,
        };
        let (uav, peer) = uav_with_peer(&mut self.uavs, &mut self.sensors, &mut self.base_stations, index, target);
        let transition = uav.forward_data(peer, &mut ctx);
        let completed = !uav.is_active(UavTask::Forward);
        self.record(transition);

        if completed && target.kind == DeviceKind::Uav {
            self.uavs[target.index].deactivate_task(UavTask::Receive);
        }
    }

    /// 範囲内のセンサーからリスト順に収集する（先のセンサーが残量を使い切れば後続は対象外）
    ///
    /// 最初の転送の前に範囲内の全センサーと接続し、帯域を分配しておきます。
    fn collect_data(&mut self, index: usize) {
        let sensors_in_range = self.get_in_range(index, DeviceKind::Sensor);
        let peers: Vec<(DeviceRef, Vector)> = sensors_in_range
            .iter()
            .map(|sensor| (*sensor, self.sensors[sensor.index].device.position))
            .collect();
        let uav = &mut self.uavs[index].device;
        uav.network_model.open_connections(uav.id, &peers);

        let mut ctx = TickContext {
            time_step: self.time_step,
            speed_rate: self.speed_rate,
            rng: &mut self.rng,
        };
        let mut transitions = Vec::new();
        for sensor in sensors_in_range {
            let uav = &mut self.uavs[index];
            if uav.get_current_collection_rate() == 0 {
                break;
            }
            transitions.push(uav.collect_from(&mut self.sensors[sensor.index].device, &mut ctx));
        }
        self.uavs[index].refresh_collection_task();
        for transition in transitions {
            self.record(transition);
        }
    }

    fn record(&mut self, transition: DataTransition) {
        self.stats.protocol_loss += transition.data_loss;
        self.stats.transferred += transition.size;
        self.stats.transitions += 1;
        self.last_transitions.push(transition);
    }

    /// エピソードが終了したか
    ///
    /// 時刻が `run_until` に達したか、全UAVに有効なタスクがなくなった場合に true。
    pub fn has_ended(&self) -> bool {
        let done = self.uavs.iter().all(|uav| !uav.has_active_tasks());
        self.time_step >= self.run_until || done
    }

    /// 初期状態に戻す
    ///
    /// デバイス状態と時刻のみを戻します。乱数源は巻き戻さないため、
    /// 続くエピソードでは異なる損失が発生し得ます。
    pub fn reset(&mut self) {
        debug!("環境を初期状態にリセット");
        self.time_step = 0;
        self.stats = EnvironmentStats::default();
        self.last_transitions.clear();
        self.uavs = self.initial_state.uavs.clone();
        self.sensors = self.initial_state.sensors.clone();
        self.base_stations = self.initial_state.base_stations.clone();
    }

    /// 指定UAVの通信範囲内にある指定種別のデバイスを返す（自身は除く）
    pub fn get_in_range(&self, uav_index: usize, device_kind: DeviceKind) -> Vec<DeviceRef> {
        let uav = &self.uavs[uav_index].device;
        self.devices(device_kind)
            .into_iter()
            .filter(|device| device.id != uav.id && uav.in_range(device))
            .map(|device| device.id)
            .collect()
    }

    /// センサーが生成した総単位数
    pub fn num_of_generated_packets(&self) -> u64 {
        self.sensors.iter().map(|sensor| sensor.device.num_of_collected_packets).sum()
    }

    /// 基地局が受信した総単位数
    pub fn num_of_received_packets(&self) -> u64 {
        self.base_stations
            .iter()
            .map(|station| station.device.num_of_collected_packets)
            .sum()
    }

    /// パケット到達率（受信 / 生成）
    pub fn calculate_pdr(&self) -> f64 {
        let generated = self.num_of_generated_packets();
        if generated == 0 {
            return 0.0;
        }
        self.num_of_received_packets() as f64 / generated as f64
    }

    /// 基地局に届いたデータの平均エンドツーエンド遅延（単位数で重み付け）
    pub fn calculate_e2e_delay(&self) -> Option<f64> {
        let mut sum_of_delays = 0.0;
        let mut received = 0;
        for station in &self.base_stations {
            for packet in station.device.get_current_data() {
                if let Some(delay) = packet.delay() {
                    sum_of_delays += (delay * packet.size) as f64;
                    received += packet.size;
                }
            }
        }
        if received == 0 {
            return None;
        }
        Some(sum_of_delays / received as f64)
    }

    /// センサー間の生成量の偏り（平均と範囲の中央値の差）
    pub fn calculate_sensors_data_fairness(&self) -> f64 {
        if self.sensors.is_empty() {
            return 0.0;
        }
        let values: Vec<u64> = self
            .sensors
            .iter()
            .map(|sensor| sensor.device.num_of_collected_packets)
            .collect();
        let maximum = values.iter().copied().max().unwrap_or(0);
        let minimum = values.iter().copied().min().unwrap_or(0);
        let median = (maximum - minimum) as f64 / 2.0;
        let average = values.iter().sum::<u64>() as f64 / values.len() as f64;
        (average - median).abs()
    }

    /// 現在の状態の集計
    pub fn report(&self, episode: usize) -> EpisodeReport {
        EpisodeReport {
            episode,
            time_step: self.time_step,
            generated: self.num_of_generated_packets(),
            received: self.num_of_received_packets(),
            pdr: self.calculate_pdr(),
            e2e_delay: self.calculate_e2e_delay(),
            protocol_loss: self.stats.protocol_loss,
            overwrite_loss: self.sensors.iter().map(|sensor| sensor.data_loss).sum(),
            expired: self.devices_expired(),
            sensors_data_fairness: self.calculate_sensors_data_fairness(),
            uavs: self
                .uavs
                .iter()
                .map(|uav| UavReport {
                    id: uav.device.id.index,
                    consumed_energy: uav.device.consumed_energy,
                    num_of_collected_packets: uav.device.num_of_collected_packets,
                    occupancy: uav.get_occupancy_percentage(),
                })
                .collect(),
        }
    }

    fn devices_expired(&self) -> u64 {
        let uavs: u64 = self.uavs.iter().map(|uav| uav.device.memory_model.expired_size()).sum();
        let sensors: u64 = self.sensors.iter().map(|sensor| sensor.device.memory_model.expired_size()).sum();
        let stations: u64 = self
            .base_stations
            .iter()
            .map(|station| station.device.memory_model.expired_size())
            .sum();
        uavs + sensors + stations
    }

    /// 集計をログ出力
    pub fn log_results(&self) {
        info!("経過時間: {}", self.time_step);
        info!("センサー: {}基 / UAV: {}機 / 基地局: {}基", self.sensors.len(), self.uavs.len(), self.base_stations.len());
        info!("PDR: {:.3}", self.calculate_pdr());
        for uav in &self.uavs {
            info!("{} エネルギー: {:.4}", uav.device, uav.device.consumed_energy);
        }
    }
}

/// UAVと転送相手のデバイスを同時に可変借用する
fn uav_with_peer<'a>(
    uavs: &'a mut [Uav],
    sensors: &'a mut [Sensor],
    base_stations: &'a mut [BaseStation],
    index: usize,
    peer: DeviceRef,
) -> (&'a mut Uav, &'a mut Device) {
    match peer.kind {
        DeviceKind::Sensor => (&mut uavs[index], &mut sensors[peer.index].device),
        DeviceKind::BaseStation => (&mut uavs[index], &mut base_stations[peer.index].device),
        DeviceKind::Uav => {
            assert!(index != peer.index, "a UAV cannot be its own peer");
            if index < peer.index {
                let (left, right) = uavs.split_at_mut(peer.index);
                (&mut left[index], &mut right[0].device)
            } else {
                let (left, right) = uavs.split_at_mut(index);
                (&mut right[0], &mut left[peer.index].device)
            }
        }
    }
}

/// UAVごとの集計
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UavReport {
    pub id: usize,
    pub consumed_energy: f64,
    pub num_of_collected_packets: u64,
    pub occupancy: f64,
}

/// エピソードの集計結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeReport {
    pub episode: usize,
    pub time_step: u64,
    pub generated: u64,
    pub received: u64,
    pub pdr: f64,
    pub e2e_delay: Option<f64>,
    pub protocol_loss: u64,
    pub overwrite_loss: u64,
    pub expired: u64,
    pub sensors_data_fairness: f64,
    pub uavs: Vec<UavReport>,
}
