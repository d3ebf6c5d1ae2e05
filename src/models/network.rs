use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::common::{DeviceRef, Vector};
use crate::models::connection::{Connection, DataTransition, Endpoint, TickContext, TransferType};
use crate::models::protocol::ConnectionProtocol;

/// ネットワーク設定（シナリオから読み込む値）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub bandwidth: u64,
    pub coverage_radius: f64,
    #[serde(default)]
    pub protocol: ConnectionProtocol,
}

/// デバイスのネットワークモデル
///
/// 自デバイスが張った接続を管理し、帯域を接続数で公平に分配します。
/// `center` は所有デバイスの位置に同期されます。
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkModel {
    pub center: Vector,
    pub bandwidth: u64,
    pub coverage_radius: f64,
    pub protocol: ConnectionProtocol,
    pub connections: Vec<Connection>,
}

impl NetworkModel {
    pub fn new(center: Vector, settings: NetworkSettings) -> Self {
        Self {
            center,
            bandwidth: settings.bandwidth,
            coverage_radius: settings.coverage_radius,
            protocol: settings.protocol,
            connections: Vec::new(),
        }
    }

    pub fn in_range(&self, position: &Vector) -> bool {
        self.center.distance_from(position) <= self.coverage_radius
    }

    pub fn get_connection(&self, peer: DeviceRef) -> Option<&Connection> {
        self.connections.iter().find(|connection| connection.peer == peer)
    }

    pub fn is_connected_to(&self, peer: DeviceRef) -> bool {
        self.get_connection(peer).is_some()
    }

    /// 帯域を接続数で均等に分配する（整数除算）
    pub fn update_connections_speed(&mut self) {
        if self.connections.is_empty() {
            return;
        }
        let new_speed = self.bandwidth / self.connections.len() as u64;
        for connection in &mut self.connections {
            connection.speed = new_speed;
        }
    }

    /// 新しい接続を追加し、既存の接続を含めて帯域を再分配する
    fn connect(&mut self, owner: DeviceRef, peer: DeviceRef) -> usize {
        self.connections.push(Connection::new(owner, peer, self.protocol, 0));
        self.update_connections_speed();
        debug!("{} -> {}: 接続を確立 (接続数 {})", owner, peer, self.connections.len());
        self.connections.len() - 1
    }

    /// 同じティックで転送する相手との接続をまとめて確立します
    ///
    /// 1ティックに複数の相手と転送する場合は、最初の転送の前に呼び出してください。
    /// すべての転送が同じ分配速度を使うため、合計が帯域を超えません。
    /// 接続済みの相手はそのまま残し、新しい接続があった場合のみ再分配します。
    ///
    /// # 引数
    ///
    /// * `owner` - 所有デバイス
    /// * `peers` - 相手デバイスとその現在位置
    pub fn open_connections(&mut self, owner: DeviceRef, peers: &[(DeviceRef, Vector)]) {
        let before = self.connections.len();
        for &(peer, position) in peers {
            if self.is_connected_to(peer) {
                continue;
            }
            assert!(self.in_range(&position), "{} must be in range of the {}", peer, owner);
            self.connections.push(Connection::new(owner, peer, self.protocol, 0));
        }
        if self.connections.len() != before {
            self.update_connections_speed();
            debug!("{}: {} 件の接続を確立 (接続数 {})", owner, self.connections.len() - before, self.connections.len());
        }
    }

    pub fn disconnect(&mut self, peer: DeviceRef) {
        self.connections.retain(|connection| connection.peer != peer);
        self.update_connections_speed();
    }

    pub fn delete_all_connections(&mut self) {
        self.connections.clear();
    }

    /// 相手デバイスとの転送を実行します
    ///
    /// 接続がなければ作成します。相手が通信範囲外の場合はプログラム上の誤りとして
    /// パニックします。
    pub fn transfer_data(
        &mut self,
        source: Endpoint<'_>,
        destination: Endpoint<'_>,
        data_size: u64,
        transfer_type: TransferType,
        ctx: &mut TickContext<'_>,
    ) -> DataTransition {
        let peer = destination.id;
        let index = match self.connections.iter().position(|connection| connection.peer == peer) {
            Some(index) => index,
            None => {
                assert!(
                    self.in_range(&destination.position),
                    "{} must be in range of the {}",
                    destination.id,
                    source.id
                );
                self.connect(source.id, peer)
            }
        };
        self.connections[index].run(source, destination, data_size, transfer_type, ctx)
    }

    /// 1ティック分の処理: 範囲外になった接続を切断し、帯域を再分配する
    ///
    /// # 引数
    ///
    /// * `peer_position` - 相手デバイスの現在位置を返す関数（存在しなければ None）
    pub fn step<F>(&mut self, peer_position: F)
    where
        F: Fn(DeviceRef) -> Option<Vector>,
    {
        let center = self.center;
        let radius = self.coverage_radius;
        self.connections.retain(|connection| {
            let keep = peer_position(connection.peer)
                .map(|position| center.distance_from(&position) <= radius)
                .unwrap_or(false);
            if !keep {
                debug!("{} -> {}: 範囲外のため切断", connection.owner, connection.peer);
            }
            keep
        });
        self.update_connections_speed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::memory::Memory;
    use crate::models::memory_model::MemoryModel;
    use crate::models::packet::DataPacket;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    fn settings(bandwidth: u64) -> NetworkSettings {
        NetworkSettings {
            bandwidth,
            coverage_radius: 10.0,
            protocol: ConnectionProtocol::lossless(0),
        }
    }

    fn memory_model() -> MemoryModel {
        let mut model = MemoryModel::new(Memory::new(100, 100), Memory::new(100, 100), Memory::new(100, 100));
        model.store_data_in_memory(vec![DataPacket::new(50, 100, 0)], false);
        model
    }

    fn transfer(network: &mut NetworkModel, peer: DeviceRef, position: Vector, rng: &mut Pcg64) -> DataTransition {
        let mut own = memory_model();
        let mut other = memory_model();
        let mut ctx = TickContext {
            time_step: 1,
            speed_rate: 1,
            rng,
        };
        network.transfer_data(
            Endpoint { id: DeviceRef::uav(0), position: network.center, memory: &mut own },
            Endpoint { id: peer, position, memory: &mut other },
            5,
            TransferType::Send,
            &mut ctx,
        )
    }

    #[test]
    fn test_bandwidth_shared_fairly() {
        let mut rng = Pcg64::seed_from_u64(0);
        let mut network = NetworkModel::new(Vector::zero(), settings(10));
        for index in 0..3 {
            transfer(&mut network, DeviceRef::sensor(index), Vector::new(1.0, 0.0, 0.0), &mut rng);
        }
        network.step(|_| Some(Vector::new(1.0, 0.0, 0.0)));

        assert_eq!(network.connections.len(), 3);
        assert!(network.connections.iter().all(|c| c.speed == 3));
        assert!(network.connections.iter().map(|c| c.speed).sum::<u64>() <= network.bandwidth);
    }

    #[test]
    fn test_step_drops_out_of_range_connections() {
        let mut rng = Pcg64::seed_from_u64(0);
        let mut network = NetworkModel::new(Vector::zero(), settings(12));
        transfer(&mut network, DeviceRef::sensor(0), Vector::new(1.0, 0.0, 0.0), &mut rng);
        transfer(&mut network, DeviceRef::sensor(1), Vector::new(2.0, 0.0, 0.0), &mut rng);

        network.step(|peer| match peer.index {
            0 => Some(Vector::new(50.0, 0.0, 0.0)),
            _ => Some(Vector::new(2.0, 0.0, 0.0)),
        });

        assert!(!network.is_connected_to(DeviceRef::sensor(0)));
        assert!(network.is_connected_to(DeviceRef::sensor(1)));
        assert_eq!(network.connections[0].speed, 12);
    }

    #[test]
    fn test_existing_connection_is_reused() {
        let mut rng = Pcg64::seed_from_u64(0);
        let mut network = NetworkModel::new(Vector::zero(), settings(10));
        transfer(&mut network, DeviceRef::sensor(0), Vector::new(1.0, 0.0, 0.0), &mut rng);
        transfer(&mut network, DeviceRef::sensor(0), Vector::new(1.0, 0.0, 0.0), &mut rng);
        assert_eq!(network.connections.len(), 1);
    }

    #[test]
    fn test_new_connection_lowers_existing_speeds() {
        let mut rng = Pcg64::seed_from_u64(0);
        let mut network = NetworkModel::new(Vector::zero(), settings(10));
        transfer(&mut network, DeviceRef::sensor(0), Vector::new(1.0, 0.0, 0.0), &mut rng);
        assert_eq!(network.connections[0].speed, 10);

        transfer(&mut network, DeviceRef::sensor(1), Vector::new(1.0, 0.0, 0.0), &mut rng);
        assert!(network.connections.iter().all(|c| c.speed == 5));
    }

    #[test]
    fn test_open_connections_splits_before_transfer() {
        let mut rng = Pcg64::seed_from_u64(0);
        let mut network = NetworkModel::new(Vector::zero(), settings(10));
        let peers = [
            (DeviceRef::sensor(0), Vector::new(1.0, 0.0, 0.0)),
            (DeviceRef::sensor(1), Vector::new(2.0, 0.0, 0.0)),
        ];
        network.open_connections(DeviceRef::uav(0), &peers);
        assert_eq!(network.connections.len(), 2);
        assert!(network.connections.iter().all(|c| c.speed == 5));

        // 接続済みの相手は作り直さない
        transfer(&mut network, DeviceRef::sensor(0), peers[0].1, &mut rng);
        network.open_connections(DeviceRef::uav(0), &peers);
        assert_eq!(network.connections.len(), 2);
        assert!(network.connections.iter().all(|c| c.speed == 5));
    }

    #[test]
    #[should_panic(expected = "must be in range")]
    fn test_transfer_out_of_range_panics() {
        let mut rng = Pcg64::seed_from_u64(0);
        let mut network = NetworkModel::new(Vector::zero(), settings(10));
        transfer(&mut network, DeviceRef::sensor(0), Vector::new(100.0, 0.0, 0.0), &mut rng);
    }
}
