// 基本的なデータ型
pub mod common;
pub mod packet;

// デバイスの基本インターフェース（trait）定義
pub mod traits;

// 記憶・通信・エネルギーのモデル
pub mod memory;
pub mod memory_model;
pub mod protocol;
pub mod connection;
pub mod network;
pub mod energy;

// 各デバイスの実装
pub mod device;
pub mod sensor;
pub mod base_station;
pub mod uav;

// 便利な re-export
pub use common::*;
pub use traits::*;
pub use packet::DataPacket;
pub use memory::{Memory, StoreOutcome};
pub use memory_model::MemoryModel;
pub use protocol::ConnectionProtocol;
pub use connection::{Connection, DataTransition, Endpoint, TickContext, TransferType};
pub use network::{NetworkModel, NetworkSettings};
pub use energy::EnergyModel;
pub use device::Device;
pub use sensor::Sensor;
pub use base_station::BaseStation;
pub use uav::{TaskCounters, Uav, UavTask, WayPoint};
