use tracing::trace;

use crate::models::memory::{Memory, StoreOutcome};
use crate::models::packet::DataPacket;

/// デバイスの記憶モデル
///
/// 送信バッファ・受信バッファ・長期記憶の3段で構成されます。
/// 送出するパケットは長期記憶から送信バッファへ、受信したパケットは
/// 受信バッファから長期記憶へ、それぞれ入出力速度の範囲で移動します。
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryModel {
    pub sending_buffer: Memory,
    pub receiving_buffer: Memory,
    pub memory: Memory,
}

impl MemoryModel {
    pub fn new(sending_buffer: Memory, receiving_buffer: Memory, memory: Memory) -> Self {
        Self {
            sending_buffer,
            receiving_buffer,
            memory,
        }
    }

    pub fn has_data(&self) -> bool {
        self.memory.has_data(1)
    }

    /// デバイス内に残っている全データ量（長期記憶 + 送信バッファ）
    pub fn outgoing_size(&self) -> u64 {
        self.memory.current_size() + self.sending_buffer.current_size()
    }

    /// 長期記憶から送信バッファへ移動する
    ///
    /// 移動量は送信バッファの入出力速度（ティック倍率込み）で制限されます。
    pub fn move_to_buffer_queue(&mut self, data_size: u64, speed_rate: u64) -> u64 {
        let data_size = data_size.min(self.sending_buffer.io_speed() * speed_rate);
        self.memory.move_to(&mut self.sending_buffer, data_size)
    }

    /// 受信バッファから長期記憶へ昇格させる
    pub fn move_to_memory(&mut self, speed_rate: u64) -> u64 {
        if !self.receiving_buffer.has_data(1) {
            return 0;
        }
        let speed = self.receiving_buffer.io_speed().min(self.memory.io_speed()) * speed_rate;
        let moved = self.receiving_buffer.move_to(&mut self.memory, speed);
        trace!("受信バッファから長期記憶へ {} 単位を移動", moved);
        moved
    }

    /// 送信バッファから `data_size` 単位を取り出す（不足分は長期記憶から補充）
    pub fn fetch_data(&mut self, data_size: u64, speed_rate: u64) -> Vec<DataPacket> {
        if self.sending_buffer.current_size() < data_size {
            let remaining = data_size - self.sending_buffer.current_size();
            self.move_to_buffer_queue(remaining, speed_rate);
        }
        self.sending_buffer.fetch(data_size)
    }

    /// 受信バッファに格納する
    pub fn store_data(&mut self, packets: Vec<DataPacket>, overwrite: bool) -> StoreOutcome {
        self.receiving_buffer.store(packets, overwrite)
    }

    /// 長期記憶に直接格納する
    pub fn store_data_in_memory(&mut self, packets: Vec<DataPacket>, overwrite: bool) -> StoreOutcome {
        self.memory.store(packets, overwrite)
    }

    pub fn read_data(&self) -> Vec<DataPacket> {
        self.memory.read_data()
    }

    /// 長期記憶の使用率（小数第2位で丸め）
    pub fn get_occupancy(&self) -> f64 {
        if self.memory.capacity() == 0 {
            return 0.0;
        }
        let ratio = self.memory.current_size() as f64 / self.memory.capacity() as f64;
        (ratio * 100.0).round() / 100.0
    }

    pub fn get_available_to_send(&self) -> u64 {
        self.sending_buffer.current_size()
    }

    pub fn get_available_to_receive(&self) -> u64 {
        self.receiving_buffer.get_available()
    }

    /// 1ティック分の処理: 受信データの昇格と全領域の寿命減衰
    ///
    /// # 戻り値
    ///
    /// このティックで失効した単位数
    pub fn step(&mut self, speed_rate: u64) -> u64 {
        self.move_to_memory(speed_rate);
        self.sending_buffer.decay(speed_rate)
            + self.receiving_buffer.decay(speed_rate)
            + self.memory.decay(speed_rate)
    }

    /// 累計失効量
    pub fn expired_size(&self) -> u64 {
        self.sending_buffer.expired_size + self.receiving_buffer.expired_size + self.memory.expired_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> MemoryModel {
        MemoryModel::new(Memory::new(20, 5), Memory::new(20, 8), Memory::new(100, 6))
    }

    #[test]
    fn test_move_to_buffer_queue_limited_by_io_speed() {
        let mut model = model();
        model.store_data_in_memory(vec![DataPacket::new(30, 10, 0)], false);
        assert_eq!(model.move_to_buffer_queue(30, 1), 5);
        assert_eq!(model.get_available_to_send(), 5);
        assert_eq!(model.move_to_buffer_queue(30, 2), 10);
        assert_eq!(model.outgoing_size(), 30);
    }

    #[test]
    fn test_promotion_uses_slower_io_speed() {
        let mut model = model();
        model.store_data(vec![DataPacket::new(20, 10, 0)], false);
        model.step(1);
        assert_eq!(model.memory.current_size(), 6);
        assert_eq!(model.receiving_buffer.current_size(), 14);
    }

    #[test]
    fn test_fetch_data_refills_from_memory() {
        let mut model = model();
        model.store_data_in_memory(vec![DataPacket::new(12, 10, 0)], false);
        let data = model.fetch_data(4, 1);
        assert_eq!(data.iter().map(|p| p.size).sum::<u64>(), 4);
        assert_eq!(model.get_available_to_send(), 0);
        assert_eq!(model.memory.current_size(), 8);

        let data = model.fetch_data(9, 1);
        assert_eq!(data.iter().map(|p| p.size).sum::<u64>(), 5);
        assert_eq!(model.memory.current_size(), 3);
    }

    #[test]
    fn test_occupancy_is_rounded() {
        let mut model = model();
        model.store_data_in_memory(vec![DataPacket::new(33, 10, 0)], false);
        assert_eq!(model.get_occupancy(), 0.33);
    }
}
