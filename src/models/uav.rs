//! # UAV モジュール
//!
//! 経路（ウェイポイント列）に沿って移動し、センサーからのデータ収集と
//! 他デバイスへのデータ転送を行う移動体を提供します。
//!
//! ## タスク
//!
//! - **MOVE**: 次のウェイポイントへ移動（初期状態）
//! - **COLLECT**: 現在のウェイポイントで収集レートが0になるまで収集
//! - **FORWARD**: 指定量を転送先へ送信
//! - **RECEIVE**: 他のUAVからの転送を受け入れる受動的な印
//!
//! COLLECT / FORWARD / RECEIVE のいずれかが有効な間は移動しません。

use std::fmt;

use serde::Serialize;
use tracing::{debug, trace};

use crate::models::common::{DeviceRef, Vector};
use crate::models::connection::{DataTransition, TickContext, TransferType};
use crate::models::device::Device;
use crate::models::traits::{IDevice, IMovable};

/// UAVのタスク種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UavTask {
    Move,
    Collect,
    Receive,
    Forward,
}

impl UavTask {
    fn index(self) -> usize {
        match self {
            UavTask::Move => 0,
            UavTask::Collect => 1,
            UavTask::Receive => 2,
            UavTask::Forward => 3,
        }
    }
}

impl fmt::Display for UavTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UavTask::Move => write!(f, "MOVE"),
            UavTask::Collect => write!(f, "COLLECT"),
            UavTask::Receive => write!(f, "RECEIVE"),
            UavTask::Forward => write!(f, "FORWARD"),
        }
    }
}

/// タスク種別ごとの有効カウンタ
///
/// RECEIVE のみ複数の転送元から重ねて有効化できます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskCounters {
    counts: [u32; 4],
}

impl TaskCounters {
    pub fn activate(&mut self, task: UavTask) {
        assert!(
            task == UavTask::Receive || self.counts[task.index()] == 0,
            "{} is already activated",
            task
        );
        self.counts[task.index()] += 1;
    }

    pub fn deactivate(&mut self, task: UavTask) {
        assert!(self.counts[task.index()] > 0, "{} is not active", task);
        self.counts[task.index()] -= 1;
    }

    pub fn is_active(&self, task: UavTask) -> bool {
        self.counts[task.index()] > 0
    }

    pub fn count(&self, task: UavTask) -> u32 {
        self.counts[task.index()]
    }

    pub fn has_active_tasks(&self) -> bool {
        self.counts.iter().any(|&count| count > 0)
    }
}

/// 経路上の地点
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WayPoint {
    pub position: Vector,
    /// この地点で収集すべき残り単位数
    pub collection_rate: u64,
    /// 収集タスクが割り当て済みか
    pub active: bool,
}

impl WayPoint {
    pub fn new(position: Vector, collection_rate: u64) -> Self {
        Self {
            position,
            collection_rate,
            active: false,
        }
    }
}

/// UAV（移動シンク）
#[derive(Debug, Clone, PartialEq)]
pub struct Uav {
    pub device: Device,
    /// 1ティックあたりの移動距離
    pub speed: f64,
    pub way_points: Vec<WayPoint>,
    pub current_way_point: usize,
    pub tasks: TaskCounters,
    pub forward_data_target: Option<DeviceRef>,
    pub data_to_forward: u64,
    /// 現在の区間の残りティック数
    pub steps_to_move: u64,
    /// 最終地点の後に先頭へ戻るか
    pub loop_route: bool,
}

impl Uav {
    /// 新しいUAVを作成します（MOVEタスクが有効な状態で開始）
    pub fn new(device: Device, speed: f64) -> Self {
        let mut tasks = TaskCounters::default();
        tasks.activate(UavTask::Move);
        Self {
            device,
            speed,
            way_points: Vec::new(),
            current_way_point: 0,
            tasks,
            forward_data_target: None,
            data_to_forward: 0,
            steps_to_move: 0,
            loop_route: false,
        }
    }

    pub fn with_loop_route(mut self, loop_route: bool) -> Self {
        self.loop_route = loop_route;
        self
    }

    pub fn add_way_point(&mut self, position: Vector, collection_rate: u64) {
        self.way_points.push(WayPoint::new(position, collection_rate));
    }

    pub fn activate_task(&mut self, task: UavTask) {
        self.tasks.activate(task);
        trace!("{}: {} を有効化", self.device, task);
    }

    pub fn deactivate_task(&mut self, task: UavTask) {
        self.tasks.deactivate(task);
        trace!("{}: {} を無効化", self.device, task);
    }

    pub fn is_active(&self, task: UavTask) -> bool {
        self.tasks.is_active(task)
    }

    pub fn has_active_tasks(&self) -> bool {
        self.tasks.has_active_tasks()
    }

    /// 移動を止めるタスク（COLLECT / FORWARD / RECEIVE）が有効か
    pub fn is_busy(&self) -> bool {
        self.is_active(UavTask::Collect) || self.is_active(UavTask::Forward) || self.is_active(UavTask::Receive)
    }

    /// 現在のウェイポイントに停止しているか
    ///
    /// 到着時に位置をウェイポイントへ合わせるため、座標の一致で判定できます。
    pub fn is_at_way_point(&self) -> bool {
        self.steps_to_move == 0
            && self
                .way_points
                .get(self.current_way_point)
                .is_some_and(|way_point| way_point.position == self.device.position)
    }

    pub fn get_occupancy_percentage(&self) -> f64 {
        self.device.get_occupancy_percentage()
    }

    /// ウェイポイントの収集レートを設定する（未設定の地点に限る）
    pub fn assign_collection_rate(&mut self, index: usize, collection_rate: u64) {
        let way_point = &mut self.way_points[index];
        assert!(way_point.collection_rate == 0, "the collection rate must be 0");
        way_point.collection_rate = collection_rate;
        way_point.active = false;
    }

    /// 現在のウェイポイントで収集タスクを開始する
    pub fn assign_collect_data_task(&mut self, index: usize) {
        assert!(
            index == self.current_way_point && self.is_at_way_point(),
            "collection can only start at the current way point"
        );
        let way_point = &self.way_points[index];
        assert!(way_point.collection_rate != 0, "the collection rate must not be 0");
        assert!(!way_point.active, "the task is already assigned");
        self.activate_task(UavTask::Collect);
        self.way_points[index].active = true;
        debug!("{}: ウェイポイント {} で収集開始 ({} 単位)", self.device, index, self.way_points[index].collection_rate);
    }

    /// 転送タスクを割り当てる（転送先がUAVなら相手側でRECEIVEを有効にしておくこと）
    pub fn assign_forward_data_task(&mut self, forward_data_target: DeviceRef, data_to_forward: u64) {
        self.activate_task(UavTask::Forward);
        self.forward_data_target = Some(forward_data_target);
        self.data_to_forward = data_to_forward;
        debug!("{}: {} へ {} 単位の転送開始", self.device, forward_data_target, data_to_forward);
    }

    pub fn assign_receiving_data_task(&mut self) {
        self.activate_task(UavTask::Receive);
    }

    pub fn get_current_collection_rate(&self) -> u64 {
        match self.way_points.get(self.current_way_point) {
            Some(way_point) if way_point.active => way_point.collection_rate,
            _ => 0,
        }
    }

    pub fn set_current_collection_rate(&mut self, collection_rate: u64) {
        if let Some(way_point) = self.way_points.get_mut(self.current_way_point) {
            way_point.collection_rate = collection_rate;
        }
    }

    /// 現在地点の収集が終わっていればCOLLECTを終了する
    pub fn refresh_collection_task(&mut self) {
        if self.get_current_collection_rate() > 0 {
            return;
        }
        if let Some(way_point) = self.way_points.get_mut(self.current_way_point) {
            way_point.active = false;
        }
        if self.is_active(UavTask::Collect) {
            self.deactivate_task(UavTask::Collect);
            debug!("{}: 収集完了", self.device);
        }
    }

    /// 次の区間を開始する。経路の終端ならMOVEを終了して false を返す。
    fn update_velocity(&mut self) -> bool {
        let last = self.current_way_point + 1 >= self.way_points.len();
        if self.way_points.is_empty() || (last && !self.loop_route) {
            if self.is_active(UavTask::Move) {
                self.deactivate_task(UavTask::Move);
            }
            self.device.set_velocity(Vector::zero());
            return false;
        }
        self.current_way_point = (self.current_way_point + 1) % self.way_points.len();
        let target = self.way_points[self.current_way_point].position;
        let distance = self.device.position.distance_from(&target);
        self.steps_to_move = if self.speed > 0.0 {
            (distance / self.speed).ceil() as u64
        } else {
            0
        };
        self.device
            .set_velocity((target - self.device.position).normalize() * self.speed);
        true
    }

    fn snap_to_way_point(&mut self) {
        let target = self.way_points[self.current_way_point].position;
        self.device.set_position(target);
        self.device.set_velocity(Vector::zero());
        trace!("{}: ウェイポイント {} に到着", self.device, self.current_way_point);
    }

    /// MOVEタスクを1ティック進める
    ///
    /// 停止中なら次の区間を開始し、区間の残りティックを減らします。
    /// 残りが0になった時点でウェイポイントの位置に合わせます。
    pub fn advance(&mut self, speed_rate: u64) {
        if !self.is_active(UavTask::Move) {
            return;
        }
        if self.steps_to_move == 0 && !self.update_velocity() {
            return;
        }
        if self.steps_to_move == 0 {
            self.snap_to_way_point();
            return;
        }
        let delta_t = speed_rate.min(self.steps_to_move);
        self.device.move_to_next_position(delta_t as f64);
        self.steps_to_move -= delta_t;
        if self.steps_to_move == 0 {
            self.snap_to_way_point();
        }
    }

    /// 範囲内のセンサーから現在地点の残り収集量を受信する
    pub fn collect_from(&mut self, sensor: &mut Device, ctx: &mut TickContext<'_>) -> DataTransition {
        let collection_rate = self.get_current_collection_rate();
        let transition = self
            .device
            .transfer_data(sensor, collection_rate, TransferType::Receive, ctx);
        self.set_current_collection_rate(collection_rate.saturating_sub(transition.size));
        transition
    }

    /// 転送先へ残りの転送量を送信する
    ///
    /// 送信済み（到着 + 損失）の分だけ残量を減らし、残量が0になるか送るデータが
    /// 尽きた時点でFORWARDを終了します。
    pub fn forward_data(&mut self, target: &mut Device, ctx: &mut TickContext<'_>) -> DataTransition {
        let transition = self
            .device
            .transfer_data(target, self.data_to_forward, TransferType::Send, ctx);
        self.data_to_forward = self.data_to_forward.saturating_sub(transition.sent_size());
        if self.data_to_forward == 0 || self.device.memory_model.outgoing_size() == 0 {
            self.data_to_forward = 0;
            self.forward_data_target = None;
            self.deactivate_task(UavTask::Forward);
            debug!("{}: {} への転送完了", self.device, target);
        }
        transition
    }
}

impl IDevice for Uav {
    fn device(&self) -> &Device {
        &self.device
    }

    fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    fn tick(&mut self, _current_time: u64, speed_rate: u64, peer_position: &dyn Fn(DeviceRef) -> Option<Vector>) {
        self.device.step(speed_rate, peer_position);
        self.refresh_collection_task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::device::tests::test_device;
    use crate::models::packet::DataPacket;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    fn uav() -> Uav {
        Uav::new(test_device(DeviceRef::uav(0), Vector::zero(), 10), 5.0)
    }

    #[test]
    fn test_task_counters() {
        let mut tasks = TaskCounters::default();
        assert!(!tasks.has_active_tasks());
        tasks.activate(UavTask::Receive);
        tasks.activate(UavTask::Receive);
        assert_eq!(tasks.count(UavTask::Receive), 2);
        tasks.deactivate(UavTask::Receive);
        assert!(tasks.is_active(UavTask::Receive));
        tasks.deactivate(UavTask::Receive);
        assert!(!tasks.has_active_tasks());
    }

    #[test]
    #[should_panic(expected = "already activated")]
    fn test_double_forward_assignment_panics() {
        let mut uav = uav();
        uav.assign_forward_data_task(DeviceRef::base_station(0), 10);
        uav.assign_forward_data_task(DeviceRef::base_station(0), 10);
    }

    #[test]
    fn test_route_without_way_points_ends_move() {
        let mut uav = uav();
        assert!(uav.has_active_tasks());
        uav.advance(1);
        assert!(!uav.has_active_tasks());
    }

    #[test]
    fn test_advance_moves_along_legs() {
        let mut uav = uav();
        uav.add_way_point(Vector::zero(), 0);
        uav.add_way_point(Vector::new(12.0, 0.0, 0.0), 0);

        uav.advance(1);
        assert_eq!(uav.current_way_point, 1);
        assert_eq!(uav.device.position, Vector::new(5.0, 0.0, 0.0));
        assert_eq!(uav.steps_to_move, 2);

        uav.advance(1);
        assert_eq!(uav.device.position, Vector::new(10.0, 0.0, 0.0));
        uav.advance(1);
        assert_eq!(uav.device.position, Vector::new(12.0, 0.0, 0.0));
        assert!(uav.is_at_way_point());
        assert_eq!(uav.device.network_model.center, uav.device.position);

        uav.advance(1);
        assert!(!uav.is_active(UavTask::Move));
    }

    #[test]
    fn test_not_at_way_point_before_reaching_it() {
        let mut uav = Uav::new(test_device(DeviceRef::uav(0), Vector::new(40.0, 0.0, 0.0), 10), 5.0);
        uav.add_way_point(Vector::zero(), 20);
        assert!(!uav.is_at_way_point());

        uav.device.set_position(Vector::zero());
        assert!(uav.is_at_way_point());
    }

    #[test]
    #[should_panic(expected = "current way point")]
    fn test_collection_away_from_way_point_panics() {
        let mut uav = Uav::new(test_device(DeviceRef::uav(0), Vector::new(40.0, 0.0, 0.0), 10), 5.0);
        uav.add_way_point(Vector::zero(), 20);
        uav.assign_collect_data_task(0);
    }

    #[test]
    fn test_loop_route_wraps() {
        let mut uav = uav().with_loop_route(true);
        uav.add_way_point(Vector::zero(), 0);
        uav.add_way_point(Vector::new(5.0, 0.0, 0.0), 0);
        uav.advance(1);
        uav.advance(1);
        assert_eq!(uav.current_way_point, 0);
        assert_eq!(uav.device.position, Vector::zero());
        assert!(uav.is_active(UavTask::Move));
    }

    #[test]
    fn test_collection_rate_assignment() {
        let mut uav = uav();
        uav.add_way_point(Vector::zero(), 0);
        assert_eq!(uav.get_current_collection_rate(), 0);
        uav.assign_collection_rate(0, 30);
        assert_eq!(uav.get_current_collection_rate(), 0);
        uav.assign_collect_data_task(0);
        assert_eq!(uav.get_current_collection_rate(), 30);
        assert!(uav.is_busy());

        uav.set_current_collection_rate(0);
        uav.refresh_collection_task();
        assert!(!uav.is_active(UavTask::Collect));
        assert!(!uav.way_points[0].active);
    }

    #[test]
    fn test_collect_from_sensor_decrements_rate() {
        let mut rng = Pcg64::seed_from_u64(0);
        let mut uav = uav();
        uav.add_way_point(Vector::zero(), 15);
        uav.assign_collect_data_task(0);
        let mut sensor = test_device(DeviceRef::sensor(0), Vector::new(1.0, 0.0, 0.0), 10);
        sensor.store_data_in_memory(vec![DataPacket::new(40, 100, 0)], false);

        let mut ctx = TickContext {
            time_step: 1,
            speed_rate: 1,
            rng: &mut rng,
        };
        let transition = uav.collect_from(&mut sensor, &mut ctx);
        assert_eq!(transition.size, 10);
        assert_eq!(uav.get_current_collection_rate(), 5);
        assert_eq!(uav.device.num_of_collected_packets, 10);

        let transition = uav.collect_from(&mut sensor, &mut ctx);
        assert_eq!(transition.size, 5);
        uav.refresh_collection_task();
        assert!(!uav.is_active(UavTask::Collect));
    }

    #[test]
    fn test_forward_completes_when_data_runs_out() {
        let mut rng = Pcg64::seed_from_u64(0);
        let mut uav = uav();
        uav.device.store_data_in_memory(vec![DataPacket::new(4, 100, 0)], false);
        uav.assign_forward_data_task(DeviceRef::base_station(0), 50);
        let mut station = test_device(DeviceRef::base_station(0), Vector::zero(), 10);

        let mut ctx = TickContext {
            time_step: 1,
            speed_rate: 1,
            rng: &mut rng,
        };
        let transition = uav.forward_data(&mut station, &mut ctx);
        assert_eq!(transition.size, 4);
        assert!(!uav.is_active(UavTask::Forward));
        assert_eq!(uav.forward_data_target, None);
    }
}
