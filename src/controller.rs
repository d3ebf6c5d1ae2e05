//! # Controller モジュール
//!
//! ティックの合間に環境へタスクを割り当てる意思決定の境界を提供します。
//!
//! 強化学習エージェントなど外部の意思決定器は [`Controller`] を実装し、
//! [`run_episode`] によって「判断 → 1ティック実行」を終了条件まで繰り返します。
//! 基準として、決定的な貪欲法 [`GreedyController`] を同梱しています。

use tracing::{debug, info};

use crate::models::*;
use crate::simulation::{Environment, EpisodeReport};

/// ティックごとに環境へ判断を下す意思決定器
pub trait Controller {
    /// 次のティックを実行する前に呼ばれます
    fn on_step(&mut self, environment: &mut Environment);

    /// エピソード開始時に内部状態を初期化します
    fn reset(&mut self) {}

    fn name(&self) -> &str;
}

/// 何も割り当てないコントローラー（UAVは経路を巡回するだけ）
#[derive(Debug, Default)]
pub struct PassiveController;

impl Controller for PassiveController {
    fn on_step(&mut self, _environment: &mut Environment) {}

    fn name(&self) -> &str {
        "passive"
    }
}

/// 貪欲法による基準コントローラー
///
/// - ウェイポイントに停止していて収集量が残っていれば収集を開始
/// - データを持っていれば範囲内の基地局へ全量を転送
/// - 基地局が範囲外なら、自分より基地局に近い範囲内の待機中UAVへ中継
///
/// 中継先は常に基地局へ近づく方向に限られるため、UAV間の往復は発生しません。
#[derive(Debug, Default)]
pub struct GreedyController {
    /// 転送を開始する最小データ量
    pub min_forward_size: u64,
    decisions: u64,
}

impl GreedyController {
    pub fn new(min_forward_size: u64) -> Self {
        Self {
            min_forward_size: min_forward_size.max(1),
            decisions: 0,
        }
    }

    /// これまでに割り当てたタスク数
    pub fn decisions(&self) -> u64 {
        self.decisions
    }

    fn try_collect(&mut self, environment: &mut Environment, index: usize) -> bool {
        let uav = &mut environment.uavs[index];
        if !uav.is_at_way_point() {
            return false;
        }
        let way_point = &uav.way_points[uav.current_way_point];
        if way_point.collection_rate == 0 || way_point.active {
            return false;
        }
        let current = uav.current_way_point;
        uav.assign_collect_data_task(current);
        self.decisions += 1;
        true
    }

    fn try_forward(&mut self, environment: &mut Environment, index: usize) -> bool {
        let data = environment.uavs[index].device.memory_model.outgoing_size();
        if data < self.min_forward_size.max(1) {
            return false;
        }

        if let Some(&station) = environment.get_in_range(index, DeviceKind::BaseStation).first() {
            environment.uavs[index].assign_forward_data_task(station, data);
            self.decisions += 1;
            return true;
        }

        let relay = find_relay(environment, index);
        let Some(relay) = relay else {
            return false;
        };
        debug!("UAV {} -> {}: 中継転送を割り当て", index, relay);
        environment.uavs[relay.index].assign_receiving_data_task();
        environment.uavs[index].assign_forward_data_task(relay, data);
        self.decisions += 1;
        true
    }
}

/// 自分より基地局に近い、範囲内の待機中UAVのうち最も基地局に近いもの
fn find_relay(environment: &Environment, index: usize) -> Option<DeviceRef> {
    let own_distance = distance_to_base_station(environment, environment.uavs[index].device.position);
    environment
        .get_in_range(index, DeviceKind::Uav)
        .into_iter()
        .filter(|peer| !environment.uavs[peer.index].is_busy())
        .map(|peer| {
            let position = environment.uavs[peer.index].device.position;
            (peer, distance_to_base_station(environment, position))
        })
        .filter(|(_, distance)| *distance < own_distance)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(peer, _)| peer)
}

fn distance_to_base_station(environment: &Environment, position: Vector) -> f64 {
    environment
        .base_stations
        .iter()
        .map(|station| station.device.position.distance_from(&position))
        .fold(f64::INFINITY, f64::min)
}

impl Controller for GreedyController {
    fn on_step(&mut self, environment: &mut Environment) {
        for index in 0..environment.uavs.len() {
            if environment.uavs[index].is_busy() {
                continue;
            }
            if !self.try_collect(environment, index) {
                self.try_forward(environment, index);
            }
        }
    }

    fn reset(&mut self) {
        self.decisions = 0;
    }

    fn name(&self) -> &str {
        "greedy"
    }
}

/// 1エピソードを実行します
///
/// 環境とコントローラーを初期化し、終了条件を満たすまで
/// 「コントローラーの判断 → 1ティック実行」を繰り返します。
///
/// # 引数
///
/// * `environment` - シミュレーション環境
/// * `controller` - 意思決定器
/// * `episode` - エピソード番号（集計結果に記録）
///
/// # 戻り値
///
/// エピソード終了時点の集計結果
pub fn run_episode(environment: &mut Environment, controller: &mut dyn Controller, episode: usize) -> EpisodeReport {
    environment.reset();
    controller.reset();
    info!("エピソード {} 開始 (コントローラー: {})", episode, controller.name());

    let mut steps = 0u64;
    loop {
        controller.on_step(environment);
        if environment.has_ended() {
            break;
        }
        environment.step();
        steps += 1;
        if steps % 100 == 0 {
            debug!("時刻 {}: 受信 {} / 生成 {}", environment.time_step, environment.num_of_received_packets(), environment.num_of_generated_packets());
        }
    }

    let report = environment.report(episode);
    info!(
        "エピソード {} 終了: 時刻 {}, PDR {:.3}, 受信 {} / 生成 {}",
        episode, report.time_step, report.pdr, report.received, report.generated
    );
    report
}

/// 複数エピソードを連続実行します
pub fn run_episodes(environment: &mut Environment, controller: &mut dyn Controller, episodes: usize) -> Vec<EpisodeReport> {
    (0..episodes)
        .map(|episode| run_episode(environment, controller, episode))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::tests::device;

    fn collection_environment() -> Environment {
        let mut uav = Uav::new(device(DeviceRef::uav(0), Vector::zero(), 10), 5.0);
        uav.add_way_point(Vector::zero(), 20);
        uav.add_way_point(Vector::new(40.0, 0.0, 0.0), 0);
        let sensor = Sensor::new(device(DeviceRef::sensor(0), Vector::new(2.0, 0.0, 0.0), 10), 10, 10, 1000);
        let station = BaseStation::new(device(DeviceRef::base_station(0), Vector::new(45.0, 0.0, 0.0), 10));
        Environment::new(100.0, 100.0, 1, 200, 3, vec![uav], vec![sensor], vec![station])
    }

    #[test]
    fn test_passive_controller_only_moves() {
        let mut environment = collection_environment();
        let report = run_episode(&mut environment, &mut PassiveController, 0);
        assert_eq!(report.received, 0);
        assert_eq!(environment.uavs[0].device.position, Vector::new(40.0, 0.0, 0.0));
        assert_eq!(environment.uavs[0].device.num_of_collected_packets, 0);
    }

    #[test]
    fn test_greedy_collects_and_delivers() {
        let mut environment = collection_environment();
        let mut controller = GreedyController::new(1);
        let report = run_episode(&mut environment, &mut controller, 0);

        assert_eq!(environment.uavs[0].device.num_of_collected_packets, 20);
        assert_eq!(report.received, 20);
        assert!(report.pdr > 0.0);
        assert!(report.e2e_delay.is_some());
        assert!(controller.decisions() >= 2);
        assert!(environment.has_ended());
    }

    #[test]
    fn test_greedy_waits_until_way_point_is_reached() {
        let mut uav = Uav::new(device(DeviceRef::uav(0), Vector::new(40.0, 0.0, 0.0), 10), 5.0);
        uav.add_way_point(Vector::zero(), 20);
        let sensor = Sensor::new(device(DeviceRef::sensor(0), Vector::new(2.0, 0.0, 0.0), 10), 10, 10, 1000);
        let mut environment = Environment::new(100.0, 100.0, 1, 200, 3, vec![uav], vec![sensor], vec![]);

        let mut controller = GreedyController::new(1);
        controller.on_step(&mut environment);
        assert!(!environment.uavs[0].is_active(UavTask::Collect));
        assert_eq!(controller.decisions(), 0);
    }

    #[test]
    fn test_greedy_relays_toward_base_station() {
        let mut far = Uav::new(device(DeviceRef::uav(0), Vector::zero(), 10), 1.0);
        far.device
            .store_data_in_memory(vec![DataPacket::new(30, 1000, 0)], false);
        let near = Uav::new(device(DeviceRef::uav(1), Vector::new(15.0, 0.0, 0.0), 10), 1.0);
        let station = BaseStation::new(device(DeviceRef::base_station(0), Vector::new(30.0, 0.0, 0.0), 10));
        let mut environment = Environment::new(100.0, 100.0, 1, 50, 3, vec![far, near], vec![], vec![station]);

        let mut controller = GreedyController::new(1);
        controller.on_step(&mut environment);
        assert_eq!(environment.uavs[0].forward_data_target, Some(DeviceRef::uav(1)));
        assert!(environment.uavs[1].is_active(UavTask::Receive));

        let report = run_episode(&mut environment, &mut controller, 1);
        assert_eq!(report.received, 30);
        assert_eq!(environment.uavs[0].device.memory_model.outgoing_size(), 0);
    }

    #[test]
    fn test_episodes_are_repeatable_without_loss() {
        let mut environment = collection_environment();
        let mut controller = GreedyController::new(1);
        let reports = run_episodes(&mut environment, &mut controller, 2);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].received, reports[1].received);
        assert_eq!(reports[0].time_step, reports[1].time_step);
        assert_eq!(reports[1].episode, 1);
    }
}
