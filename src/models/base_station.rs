use crate::models::common::{DeviceRef, Vector};
use crate::models::device::Device;
use crate::models::traits::IDevice;

/// 基地局
///
/// データの最終到達点です。長期記憶に入ったパケットへ到着時刻を記録します。
#[derive(Debug, Clone, PartialEq)]
pub struct BaseStation {
    pub device: Device,
}

impl BaseStation {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    /// 到着時刻が未記録のパケットに `current_time` を記録する
    pub fn update_data_arrival_time(&mut self, current_time: u64) -> u64 {
        self.device.memory_model.memory.stamp_arrivals(current_time)
    }
}

impl IDevice for BaseStation {
    fn device(&self) -> &Device {
        &self.device
    }

    fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    fn tick(&mut self, current_time: u64, speed_rate: u64, peer_position: &dyn Fn(DeviceRef) -> Option<Vector>) {
        self.device.step(speed_rate, peer_position);
        self.update_data_arrival_time(current_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::device::tests::test_device;
    use crate::models::packet::DataPacket;

    #[test]
    fn test_arrivals_stamped_after_promotion() {
        let mut station = BaseStation::new(test_device(DeviceRef::base_station(0), Vector::zero(), 10));
        station.device.store_data(vec![DataPacket::new(5, 100, 2)], false);

        station.tick(7, 1, &|_| None);
        let data = station.device.get_current_data();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].arrival_time, Some(7));
        assert_eq!(data[0].delay(), Some(5));

        station.tick(8, 1, &|_| None);
        assert_eq!(station.device.get_current_data()[0].arrival_time, Some(7));
    }
}
