use std::fmt;

use tracing::trace;

use crate::models::common::{DeviceRef, Vector};
use crate::models::connection::{DataTransition, Endpoint, TickContext, TransferType};
use crate::models::energy::EnergyModel;
use crate::models::memory::StoreOutcome;
use crate::models::memory_model::MemoryModel;
use crate::models::network::{NetworkModel, NetworkSettings};
use crate::models::packet::DataPacket;
use crate::models::traits::IMovable;

/// デバイス共通部分
///
/// 物理状態（位置・速度・加速度）、記憶モデル、ネットワークモデル、
/// エネルギー消費の記録をまとめたものです。
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: DeviceRef,
    pub position: Vector,
    pub velocity: Vector,
    pub acceleration: Vector,
    pub memory_model: MemoryModel,
    pub network_model: NetworkModel,
    pub energy_model: EnergyModel,
    pub num_of_collected_packets: u64,
    pub consumed_energy: f64,
}

impl Device {
    pub fn new(
        id: DeviceRef,
        position: Vector,
        memory_model: MemoryModel,
        network: NetworkSettings,
        energy_model: EnergyModel,
    ) -> Self {
        Self {
            id,
            position,
            velocity: Vector::zero(),
            acceleration: Vector::zero(),
            memory_model,
            network_model: NetworkModel::new(position, network),
            energy_model,
            num_of_collected_packets: 0,
            consumed_energy: 0.0,
        }
    }

    /// ネットワークの中心を現在位置に合わせる
    pub fn centralize_network(&mut self) {
        self.network_model.center = self.position;
    }

    pub fn get_current_data(&self) -> Vec<DataPacket> {
        self.memory_model.read_data()
    }

    pub fn get_current_data_size(&self) -> u64 {
        self.memory_model.memory.current_size()
    }

    pub fn consume_energy(&mut self, energy: f64) {
        self.consumed_energy += energy;
    }

    pub fn get_occupancy_percentage(&self) -> f64 {
        self.memory_model.get_occupancy()
    }

    /// 相手が自デバイスの通信範囲内にあるか
    pub fn in_range(&self, other: &Device) -> bool {
        self.network_model.in_range(&other.position)
    }

    pub fn store_data(&mut self, packets: Vec<DataPacket>, overwrite: bool) -> StoreOutcome {
        self.memory_model.store_data(packets, overwrite)
    }

    pub fn store_data_in_memory(&mut self, packets: Vec<DataPacket>, overwrite: bool) -> StoreOutcome {
        self.memory_model.store_data_in_memory(packets, overwrite)
    }

    /// 相手デバイスとの間でデータを転送します
    ///
    /// 接続は自デバイスのネットワークモデルが管理します。転送量に応じたエネルギーを
    /// 送信側・受信側の双方に加算し、受信側の収集数を更新します。
    ///
    /// # 引数
    ///
    /// * `peer` - 相手デバイス
    /// * `data_size` - 要求転送量
    /// * `transfer_type` - `Send` なら自分から相手へ、`Receive` なら相手から自分へ
    /// * `ctx` - ティック文脈
    pub fn transfer_data(
        &mut self,
        peer: &mut Device,
        data_size: u64,
        transfer_type: TransferType,
        ctx: &mut TickContext<'_>,
    ) -> DataTransition {
        let transition = self.network_model.transfer_data(
            Endpoint {
                id: self.id,
                position: self.position,
                memory: &mut self.memory_model,
            },
            Endpoint {
                id: peer.id,
                position: peer.position,
                memory: &mut peer.memory_model,
            },
            data_size,
            transfer_type,
            ctx,
        );

        let distance = self.position.distance_from(&peer.position);
        let energy = self.energy_model.get_data_transition_energy(transition.size, distance);
        self.consume_energy(energy);
        peer.consume_energy(energy);

        match transfer_type {
            TransferType::Send => peer.num_of_collected_packets += transition.size,
            TransferType::Receive => self.num_of_collected_packets += transition.size,
        }
        trace!("{} (エネルギー {:.4})", transition, energy);
        transition
    }

    /// 記憶モデルとネットワークモデルを1ティック進めます
    ///
    /// # 戻り値
    ///
    /// このティックで失効した単位数
    pub fn step<F>(&mut self, speed_rate: u64, peer_position: F) -> u64
    where
        F: Fn(DeviceRef) -> Option<Vector>,
    {
        let expired = self.memory_model.step(speed_rate);
        self.network_model.step(peer_position);
        expired
    }
}

impl IMovable for Device {
    fn move_to_next_position(&mut self, delta_t: f64) {
        self.velocity = self.velocity + self.acceleration * delta_t;
        self.position = self.position + self.velocity * delta_t;
        self.centralize_network();
    }

    fn get_velocity(&self) -> Vector {
        self.velocity
    }

    fn set_position(&mut self, position: Vector) {
        self.position = position;
        self.centralize_network();
    }

    fn set_velocity(&mut self, velocity: Vector) {
        self.velocity = velocity;
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::memory::Memory;
    use crate::models::protocol::ConnectionProtocol;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    /// テスト用デバイス（十分な容量・入出力速度、損失なし）
    pub(crate) fn test_device(id: DeviceRef, position: Vector, bandwidth: u64) -> Device {
        Device::new(
            id,
            position,
            MemoryModel::new(Memory::new(1000, 1000), Memory::new(1000, 1000), Memory::new(10_000, 1000)),
            NetworkSettings {
                bandwidth,
                coverage_radius: 50.0,
                protocol: ConnectionProtocol::lossless(0),
            },
            EnergyModel {
                e_elec: 1.0,
                distance_threshold: 100.0,
                power_amplifier_for_fs: 0.0,
                power_amplifier_for_amp: 0.0,
                scale: 1.0,
            },
        )
    }

    #[test]
    fn test_transfer_charges_both_endpoints() {
        let mut rng = Pcg64::seed_from_u64(0);
        let mut uav = test_device(DeviceRef::uav(0), Vector::zero(), 20);
        let mut station = test_device(DeviceRef::base_station(0), Vector::new(3.0, 4.0, 0.0), 20);
        uav.store_data_in_memory(vec![DataPacket::new(30, 100, 0)], false);

        let mut ctx = TickContext {
            time_step: 1,
            speed_rate: 1,
            rng: &mut rng,
        };
        let transition = uav.transfer_data(&mut station, 30, TransferType::Send, &mut ctx);

        assert_eq!(transition.size, 20);
        // 20 * (1 + 0) + 20 * 1
        assert_eq!(uav.consumed_energy, 40.0);
        assert_eq!(station.consumed_energy, 40.0);
        assert_eq!(station.num_of_collected_packets, 20);
        assert_eq!(uav.num_of_collected_packets, 0);
    }

    #[test]
    fn test_move_keeps_network_centered() {
        let mut device = test_device(DeviceRef::uav(0), Vector::zero(), 10);
        device.set_velocity(Vector::new(1.0, 2.0, 0.0));
        device.move_to_next_position(2.0);
        assert_eq!(device.position, Vector::new(2.0, 4.0, 0.0));
        assert_eq!(device.network_model.center, device.position);
    }
}
