//! # Memory モジュール
//!
//! 容量と入出力速度で制限されたパケット記憶領域を提供します。
//!
//! パケットは生成時刻の古い順（同時刻なら挿入順）に並び、フェッチ・上書き退避・
//! 失効のいずれも最も古いパケットから処理されます。

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tracing::{trace, warn};

use crate::models::packet::{total_size, DataPacket};

/// キュー内のパケット（並び順キー付き）
#[derive(Debug, Clone)]
struct QueuedPacket {
    created_time: u64,
    sequence: u64,
    packet: DataPacket,
}

impl QueuedPacket {
    fn key(&self) -> (u64, u64) {
        (self.created_time, self.sequence)
    }
}

impl PartialEq for QueuedPacket {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedPacket {}

impl PartialOrd for QueuedPacket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedPacket {
    // BinaryHeap は最大値を先頭にするため、古いものほど「大きく」なるよう逆順にする
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// 格納操作の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// 格納成功。`evicted` は上書きで退避された単位数
    Stored { evicted: u64 },
    /// 空き容量不足で拒否された（状態は変化しない）
    Rejected { requested: u64, available: u64 },
}

impl StoreOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, StoreOutcome::Stored { .. })
    }

    /// 失われた単位数（拒否された場合は要求量全体）
    pub fn lost(&self) -> u64 {
        match self {
            StoreOutcome::Stored { evicted } => *evicted,
            StoreOutcome::Rejected { requested, .. } => *requested,
        }
    }
}

/// 容量・入出力速度制限付きのパケット記憶領域
#[derive(Debug, Clone)]
pub struct Memory {
    capacity: u64,
    io_speed: u64,
    current_size: u64,
    queue: BinaryHeap<QueuedPacket>,
    next_sequence: u64,
    /// 上書きにより退避された累計単位数
    pub evicted_size: u64,
    /// 寿命切れにより失効した累計単位数
    pub expired_size: u64,
}

impl Memory {
    /// 新しい記憶領域を作成します
    ///
    /// # 引数
    ///
    /// * `capacity` - 最大格納単位数
    /// * `io_speed` - 1ティックあたりに移動できる最大単位数
    pub fn new(capacity: u64, io_speed: u64) -> Self {
        Self {
            capacity,
            io_speed,
            current_size: 0,
            queue: BinaryHeap::new(),
            next_sequence: 0,
            evicted_size: 0,
            expired_size: 0,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn io_speed(&self) -> u64 {
        self.io_speed
    }

    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    pub fn get_available(&self) -> u64 {
        self.capacity.saturating_sub(self.current_size)
    }

    pub fn has_data(&self, data_size: u64) -> bool {
        self.current_size >= data_size && self.current_size > 0
    }

    pub fn has_memory(&self, data_size: u64) -> bool {
        self.get_available() >= data_size
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn add_packet(&mut self, packet: DataPacket) {
        if packet.size == 0 {
            return;
        }
        self.current_size += packet.size;
        self.queue.push(QueuedPacket {
            created_time: packet.created_time,
            sequence: self.next_sequence,
            packet,
        });
        self.next_sequence += 1;
    }

    /// 最も古いパケットを取り出す
    pub fn pop_prior_packet(&mut self) -> Option<DataPacket> {
        let entry = self.queue.pop()?;
        self.current_size -= entry.packet.size;
        Some(entry.packet)
    }

    /// パケット群を格納します
    ///
    /// 空き容量が足りない場合、`overwrite` が false なら何もせず `Rejected` を返します。
    /// true なら古いパケットから退避して容量上限を守ります。入力自体が容量を超える場合も
    /// 容量が上限となり、超過分は最も古いものから退避されます。
    pub fn store(&mut self, packets: Vec<DataPacket>, overwrite: bool) -> StoreOutcome {
        let data_size = total_size(&packets);
        if !self.has_memory(data_size) && !overwrite {
            warn!(
                "記憶領域の空き不足で格納を拒否: 要求 {} / 空き {}",
                data_size,
                self.get_available()
            );
            return StoreOutcome::Rejected {
                requested: data_size,
                available: self.get_available(),
            };
        }

        for packet in packets {
            self.add_packet(packet);
        }

        let mut evicted = 0;
        if self.current_size > self.capacity {
            let overflow = self.current_size - self.capacity;
            evicted = total_size(&self.fetch(overflow));
            self.evicted_size += evicted;
            trace!("上書き格納で {} 単位を退避", evicted);
        }
        StoreOutcome::Stored { evicted }
    }

    /// 古い順に最大 `data_size` 単位を取り出します
    ///
    /// 先頭パケットが要求量を超える場合は分割し、残りはキューに残します。
    /// 格納量が不足する場合は全パケットを返します。
    pub fn fetch(&mut self, data_size: u64) -> Vec<DataPacket> {
        if data_size >= self.current_size {
            return self.pop_all_data();
        }
        let mut remaining = data_size;
        let mut data = Vec::new();
        while remaining > 0 {
            let Some(mut head) = self.queue.peek_mut() else {
                break;
            };
            if head.packet.size <= remaining {
                drop(head);
                if let Some(packet) = self.pop_prior_packet() {
                    remaining -= packet.size;
                    data.push(packet);
                }
            } else {
                let part = head.packet.split_off(remaining);
                drop(head);
                self.current_size -= part.size;
                remaining = 0;
                data.push(part);
            }
        }
        data
    }

    /// 全パケットを古い順に取り出す
    pub fn pop_all_data(&mut self) -> Vec<DataPacket> {
        self.current_size = 0;
        let mut entries = std::mem::take(&mut self.queue).into_sorted_vec();
        // into_sorted_vec は Ord の昇順 = 新しい順
        entries.reverse();
        entries.into_iter().map(|entry| entry.packet).collect()
    }

    /// 格納中パケットのコピーを古い順に返す
    pub fn read_data(&self) -> Vec<DataPacket> {
        let mut entries = self.queue.clone().into_sorted_vec();
        entries.reverse();
        entries.into_iter().map(|entry| entry.packet).collect()
    }

    /// 他の記憶領域へ最大 `data_size` 単位を移動します
    ///
    /// 移動量は移動先の空き容量で制限され、データは失われません。
    ///
    /// # 戻り値
    ///
    /// 実際に移動した単位数
    pub fn move_to(&mut self, other: &mut Memory, data_size: u64) -> u64 {
        let data_size = data_size.min(other.get_available());
        if data_size == 0 {
            return 0;
        }
        let packets = self.fetch(data_size);
        let moved = total_size(&packets);
        other.store(packets, false);
        moved
    }

    /// 全パケットの寿命を `ticks` 減らし、失効したものを取り除きます
    ///
    /// # 戻り値
    ///
    /// 今回失効した単位数
    pub fn decay(&mut self, ticks: u64) -> u64 {
        if self.queue.is_empty() || ticks == 0 {
            return 0;
        }
        let mut entries = std::mem::take(&mut self.queue).into_vec();
        let mut expired = 0;
        entries.retain_mut(|entry| {
            entry.packet.decrease_life_time(ticks);
            if entry.packet.is_alive() {
                true
            } else {
                expired += entry.packet.size;
                false
            }
        });
        self.queue = BinaryHeap::from(entries);
        self.current_size -= expired;
        self.expired_size += expired;
        expired
    }

    /// 到着時刻が未設定のパケットに現在時刻を記録する
    ///
    /// # 戻り値
    ///
    /// 新たに到着時刻を記録した単位数
    pub fn stamp_arrivals(&mut self, time_step: u64) -> u64 {
        let mut entries = std::mem::take(&mut self.queue).into_vec();
        let mut stamped = 0;
        for entry in &mut entries {
            if entry.packet.update_arrival_time(time_step) {
                stamped += entry.packet.size;
            }
        }
        self.queue = BinaryHeap::from(entries);
        stamped
    }
}

impl PartialEq for Memory {
    fn eq(&self, other: &Self) -> bool {
        self.capacity == other.capacity
            && self.io_speed == other.io_speed
            && self.current_size == other.current_size
            && self.evicted_size == other.evicted_size
            && self.expired_size == other.expired_size
            && self.read_data() == other.read_data()
    }
}
