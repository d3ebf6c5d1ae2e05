//! # Connection モジュール
//!
//! 2台のデバイス間の通信路を表します。帯域（公平分配された速度）で転送量を制限し、
//! 接続確立のためのハンドシェイクと、プロトコルによる確率的なデータ損失を再現します。

use std::fmt;

use rand::RngCore;
use serde::Serialize;
use tracing::{debug, trace};

use crate::models::common::{DeviceRef, Vector};
use crate::models::memory_model::MemoryModel;
use crate::models::packet::{total_size, DataPacket};
use crate::models::protocol::ConnectionProtocol;

/// 転送方向（接続の所有者から見た向き）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferType {
    /// 所有者 → 相手
    Send,
    /// 相手 → 所有者
    Receive,
}

/// 1回の転送結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataTransition {
    pub source: DeviceRef,
    pub destination: DeviceRef,
    /// 受信側に届いたパケット
    pub data: Vec<DataPacket>,
    /// プロトコル損失で失われた単位数
    pub data_loss: u64,
    /// 届いた単位数
    pub size: u64,
    pub time_step: u64,
}

impl DataTransition {
    pub fn new(source: DeviceRef, destination: DeviceRef, data: Vec<DataPacket>, data_loss: u64, time_step: u64) -> Self {
        let size = total_size(&data);
        Self {
            source,
            destination,
            data,
            data_loss,
            size,
            time_step,
        }
    }

    /// 送信側から出ていった単位数（到着分 + 損失分）
    pub fn sent_size(&self) -> u64 {
        self.size + self.data_loss
    }
}

impl fmt::Display for DataTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}: size {} (loss {})", self.source, self.destination, self.size, self.data_loss)
    }
}

/// 転送に参加するデバイスの一時的なビュー
pub struct Endpoint<'a> {
    pub id: DeviceRef,
    pub position: Vector,
    pub memory: &'a mut MemoryModel,
}

/// 1ティック内の転送で共有される文脈
pub struct TickContext<'a> {
    pub time_step: u64,
    pub speed_rate: u64,
    pub rng: &'a mut dyn RngCore,
}

/// デバイス間接続
///
/// `owner` 側のネットワークモデルが保持し、`peer` は相手デバイスを指します。
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub owner: DeviceRef,
    pub peer: DeviceRef,
    pub protocol: ConnectionProtocol,
    /// このティックの帯域割り当て（単位/ティック）
    pub speed: u64,
    pub initialization_data_sent: u64,
}

impl Connection {
    pub fn new(owner: DeviceRef, peer: DeviceRef, protocol: ConnectionProtocol, speed: u64) -> Self {
        Self {
            owner,
            peer,
            protocol,
            speed,
            initialization_data_sent: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialization_data_sent >= self.protocol.initialization_data_size
    }

    fn remaining_init_data(&self) -> u64 {
        self.protocol
            .initialization_data_size
            .saturating_sub(self.initialization_data_sent)
    }

    /// ハンドシェイクに帯域を割り当て、ペイロードに使える残量を返す
    fn initialize(&mut self, budget: u64) -> u64 {
        let spent = budget.min(self.remaining_init_data());
        self.initialization_data_sent += spent;
        if spent > 0 {
            trace!("{} -> {}: ハンドシェイク {} 単位", self.owner, self.peer, spent);
        }
        budget - spent
    }

    /// 損失を適用し、届くパケットと損失量を返す（新しい側から削る）
    fn get_packets_after_error(&self, mut packets: Vec<DataPacket>, rng: &mut dyn RngCore) -> (Vec<DataPacket>, u64) {
        let data_size = total_size(&packets);
        let mut error = self.protocol.calculate_data_loss(data_size, rng);
        let loss = error;
        while error > 0 {
            let Some(last) = packets.last_mut() else {
                break;
            };
            if last.size <= error {
                error -= last.size;
                packets.pop();
            } else {
                last.size -= error;
                error = 0;
            }
        }
        (packets, loss)
    }

    /// 転送を1回実行します
    ///
    /// # 引数
    ///
    /// * `owner` - 接続の所有者側デバイス
    /// * `peer` - 相手側デバイス
    /// * `data_size` - 要求転送量
    /// * `transfer_type` - 転送方向
    /// * `ctx` - ティック文脈（時刻・倍率・乱数源）
    ///
    /// # 戻り値
    ///
    /// 転送結果。ハンドシェイク中や帯域0の場合はサイズ0の結果を返します。
    pub fn run(
        &mut self,
        owner: Endpoint<'_>,
        peer: Endpoint<'_>,
        data_size: u64,
        transfer_type: TransferType,
        ctx: &mut TickContext<'_>,
    ) -> DataTransition {
        let (sender, receiver) = match transfer_type {
            TransferType::Send => (owner, peer),
            TransferType::Receive => (peer, owner),
        };

        let mut budget = data_size.min(self.speed * ctx.speed_rate);
        if !self.is_initialized() {
            budget = self.initialize(budget);
        }

        let mut data_size = budget;
        let available = sender.memory.get_available_to_send();
        if available < data_size {
            sender.memory.move_to_buffer_queue(data_size - available, ctx.speed_rate);
        }
        data_size = data_size
            .min(receiver.memory.get_available_to_receive())
            .min(sender.memory.get_available_to_send());

        let packets = sender.memory.sending_buffer.fetch(data_size);
        let (packets, data_loss) = self.get_packets_after_error(packets, ctx.rng);
        if data_loss > 0 {
            debug!("{} -> {}: プロトコル損失 {} 単位", sender.id, receiver.id, data_loss);
        }
        receiver.memory.store_data(packets.clone(), false);

        DataTransition::new(sender.id, receiver.id, packets, data_loss, ctx.time_step)
    }
}
