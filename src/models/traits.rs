use crate::models::common::{DeviceRef, Vector};
use crate::models::device::Device;

/// 全てのデバイス（センサー・UAV・基地局）が実装する基本インターフェース
pub trait IDevice {
    /// 共通部分への参照
    fn device(&self) -> &Device;

    fn device_mut(&mut self) -> &mut Device;

    /// 1ティックの処理実行
    ///
    /// `peer_position` は接続相手の現在位置の問い合わせに使われます。
    fn tick(&mut self, current_time: u64, speed_rate: u64, peer_position: &dyn Fn(DeviceRef) -> Option<Vector>);

    fn get_id(&self) -> DeviceRef {
        self.device().id
    }

    fn get_position(&self) -> Vector {
        self.device().position
    }

    /// 長期記憶にデータを保持しているか（描画側の判定に使用）
    fn has_data(&self) -> bool {
        self.device().memory_model.has_data()
    }
}

/// 移動可能な物体のインターフェース
pub trait IMovable {
    /// 加速度・速度に従って `delta_t` だけ進める
    fn move_to_next_position(&mut self, delta_t: f64);

    fn get_velocity(&self) -> Vector;

    fn set_position(&mut self, position: Vector);

    fn set_velocity(&mut self, velocity: Vector);
}
