use std::fmt;
use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// 3次元ベクトル（位置・速度・加速度で共用）
///
/// 値型として扱い、位置の更新は新しい値で置き換えます。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Vector {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// 他の点とのユークリッド距離を計算
    pub fn distance_from(&self, other: &Vector) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2)).sqrt()
    }

    /// ベクトルの長さ（原点からの距離）
    pub fn magnitude(&self) -> f64 {
        (self.x.powi(2) + self.y.powi(2) + self.z.powi(2)).sqrt()
    }

    /// 単位ベクトル化（長さ0の場合はそのまま返す）
    pub fn normalize(&self) -> Self {
        let mag = self.magnitude();
        if mag > 0.0 {
            Self::new(self.x / mag, self.y / mag, self.z / mag)
        } else {
            *self
        }
    }

    /// 矩形領域 [0, width] x [0, height] 内にあるか
    pub fn is_inside_land(&self, width: f64, height: f64) -> bool {
        self.x >= 0.0 && self.x <= width && self.y >= 0.0 && self.y <= height
    }
}

impl Add for Vector {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl Sub for Vector {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl Mul<f64> for Vector {
    type Output = Self;

    fn mul(self, scalar: f64) -> Self::Output {
        Self::new(self.x * scalar, self.y * scalar, self.z * scalar)
    }
}

/// デバイスの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Sensor,
    Uav,
    BaseStation,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Sensor => write!(f, "Sensor"),
            DeviceKind::Uav => write!(f, "UAV"),
            DeviceKind::BaseStation => write!(f, "BaseStation"),
        }
    }
}

/// 環境内のデバイスを指す参照（種類 + 所属リスト内のインデックス）
///
/// 接続やデータ転送はオブジェクト参照ではなくこの値で相手を識別します。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceRef {
    pub kind: DeviceKind,
    pub index: usize,
}

impl DeviceRef {
    pub fn new(kind: DeviceKind, index: usize) -> Self {
        Self { kind, index }
    }

    pub fn sensor(index: usize) -> Self {
        Self::new(DeviceKind::Sensor, index)
    }

    pub fn uav(index: usize) -> Self {
        Self::new(DeviceKind::Uav, index)
    }

    pub fn base_station(index: usize) -> Self {
        Self::new(DeviceKind::BaseStation, index)
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.index)
    }
}
