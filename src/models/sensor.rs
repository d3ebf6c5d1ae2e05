use tracing::trace;

use crate::models::common::{DeviceRef, Vector};
use crate::models::device::Device;
use crate::models::packet::DataPacket;
use crate::models::traits::IDevice;

/// センサー
///
/// 固定位置でデータを生成し、自身の長期記憶に上書き格納します。
/// UAVに収集されるまでデータは記憶内で減衰し、寿命切れで失効します。
#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub device: Device,
    /// 1ティックあたりの生成単位数
    pub data_collecting_rate: u64,
    pub packet_size: u64,
    pub packet_life_time: u64,
    /// 何ティックごとにデータを生成するか
    pub sampling_rate: u64,
    /// 上書き格納で失われた累計単位数
    pub data_loss: u64,
}

impl Sensor {
    /// 新しいセンサーを作成します
    ///
    /// # 引数
    ///
    /// * `device` - デバイス共通部分
    /// * `data_collecting_rate` - 1ティックあたりの生成単位数
    /// * `packet_size` - パケット1個あたりの単位数（0より大きいこと）
    /// * `packet_life_time` - 生成パケットの寿命（ティック）
    pub fn new(device: Device, data_collecting_rate: u64, packet_size: u64, packet_life_time: u64) -> Self {
        Self {
            device,
            data_collecting_rate,
            packet_size,
            packet_life_time,
            sampling_rate: 1,
            data_loss: 0,
        }
    }

    pub fn with_sampling_rate(mut self, sampling_rate: u64) -> Self {
        self.sampling_rate = sampling_rate.max(1);
        self
    }

    /// データを生成して長期記憶に格納します
    ///
    /// # 戻り値
    ///
    /// 生成した単位数
    pub fn collect_data(&mut self, current_time: u64, speed_rate: u64) -> u64 {
        if self.packet_size == 0 {
            return 0;
        }
        let num_of_packets = (self.data_collecting_rate * speed_rate) / self.packet_size;
        if num_of_packets == 0 {
            return 0;
        }
        let packet = DataPacket::new(self.packet_size, self.packet_life_time, current_time);
        let packets = vec![packet; num_of_packets as usize];
        let generated = num_of_packets * self.packet_size;

        self.device.num_of_collected_packets += generated;
        let outcome = self.device.store_data_in_memory(packets, true);
        self.data_loss += outcome.lost();
        trace!("{}: {} 単位を生成 (損失 {})", self.device, generated, outcome.lost());
        generated
    }
}

impl IDevice for Sensor {
    fn device(&self) -> &Device {
        &self.device
    }

    fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    fn tick(&mut self, current_time: u64, speed_rate: u64, peer_position: &dyn Fn(DeviceRef) -> Option<Vector>) {
        self.device.step(speed_rate, peer_position);
        if current_time % self.sampling_rate == 0 {
            self.collect_data(current_time, speed_rate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::device::tests::test_device;

    fn no_peers(_: DeviceRef) -> Option<Vector> {
        None
    }

    fn sensor(rate: u64, packet_size: u64, life_time: u64) -> Sensor {
        Sensor::new(test_device(DeviceRef::sensor(0), Vector::zero(), 10), rate, packet_size, life_time)
    }

    #[test]
    fn test_collect_data_generates_whole_packets() {
        let mut sensor = sensor(25, 10, 5);
        assert_eq!(sensor.collect_data(1, 1), 20);
        assert_eq!(sensor.device.get_current_data_size(), 20);
        assert_eq!(sensor.device.get_current_data().len(), 2);
        assert_eq!(sensor.collect_data(2, 2), 50);
        assert_eq!(sensor.device.num_of_collected_packets, 70);
    }

    #[test]
    fn test_generated_data_expires_without_collection() {
        let mut sensor = sensor(100, 10, 5);
        for t in 1..=5 {
            sensor.tick(t, 1, &no_peers);
        }
        assert_eq!(sensor.device.get_current_data_size(), 500);

        sensor.data_collecting_rate = 0;
        for t in 6..=11 {
            sensor.tick(t, 1, &no_peers);
        }
        assert_eq!(sensor.device.get_current_data_size(), 0);
        assert!(!sensor.has_data());
        assert_eq!(sensor.device.memory_model.expired_size(), 500);
    }

    #[test]
    fn test_overwrite_loss_is_counted() {
        let mut sensor = sensor(600, 100, 50);
        sensor.device.memory_model.memory = crate::models::memory::Memory::new(1000, 100);
        sensor.collect_data(1, 1);
        sensor.collect_data(2, 1);
        assert_eq!(sensor.device.get_current_data_size(), 1000);
        assert_eq!(sensor.data_loss, 200);
    }

    #[test]
    fn test_sampling_rate_skips_ticks() {
        let mut sensor = sensor(10, 10, 50).with_sampling_rate(3);
        for t in 1..=6 {
            sensor.tick(t, 1, &no_peers);
        }
        assert_eq!(sensor.device.num_of_collected_packets, 20);
    }
}
