use serde::{Deserialize, Serialize};

/// データパケット
///
/// 同一単位データの束を表します。`size` は束に含まれる単位数で、
/// 転送やフェッチの際には束を分割できます。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPacket {
    /// 単位数
    pub size: u64,
    /// 失効までの残りティック数
    pub life_time: u64,
    /// センサーで生成された時刻
    pub created_time: u64,
    /// 基地局に初めて格納された時刻（未到着なら None）
    pub arrival_time: Option<u64>,
}

impl DataPacket {
    pub fn new(size: u64, life_time: u64, created_time: u64) -> Self {
        Self {
            size,
            life_time,
            created_time,
            arrival_time: None,
        }
    }

    /// 寿命を `ticks` だけ減らす（0で下げ止まり）
    pub fn decrease_life_time(&mut self, ticks: u64) {
        self.life_time = self.life_time.saturating_sub(ticks);
    }

    pub fn is_alive(&self) -> bool {
        self.life_time > 0
    }

    /// 到着時刻を記録する。既に記録済みなら何もしない。
    ///
    /// # 戻り値
    ///
    /// 今回記録した場合は true
    pub fn update_arrival_time(&mut self, time_step: u64) -> bool {
        if self.arrival_time.is_some() {
            return false;
        }
        self.arrival_time = Some(time_step);
        true
    }

    /// 先頭から `size` 単位を切り出し、残りを自身に残す
    pub fn split_off(&mut self, size: u64) -> DataPacket {
        let taken = size.min(self.size);
        self.size -= taken;
        DataPacket {
            size: taken,
            ..self.clone()
        }
    }

    /// 生成から到着までの遅延
    pub fn delay(&self) -> Option<u64> {
        self.arrival_time.map(|arrival| arrival.saturating_sub(self.created_time))
    }
}

/// パケット列の合計サイズ
pub fn total_size(packets: &[DataPacket]) -> u64 {
    packets.iter().map(|packet| packet.size).sum()
}
