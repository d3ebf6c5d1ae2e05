use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

/// 通信プロトコル
///
/// データ損失の発生確率と損失割合、および接続確立に必要な初期化データ量を表します。
/// 確率・割合はいずれも [0, 1] の小数で指定します。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectionProtocol {
    pub data_loss_percentage: f64,
    pub data_loss_probability: f64,
    #[serde(default)]
    pub initialization_data_size: u64,
}

impl ConnectionProtocol {
    pub fn new(data_loss_percentage: f64, data_loss_probability: f64, initialization_data_size: u64) -> Self {
        Self {
            data_loss_percentage,
            data_loss_probability,
            initialization_data_size,
        }
    }

    /// 損失なしのプロトコル
    pub fn lossless(initialization_data_size: u64) -> Self {
        Self::new(0.0, 0.0, initialization_data_size)
    }

    /// 1回の転送で失われる単位数を算出します
    ///
    /// 一様乱数を1回引き、`data_loss_probability` 未満であれば
    /// `(1 - data_loss_percentage) * data_size` を切り捨てた値を損失とします。
    pub fn calculate_data_loss(&self, data_size: u64, rng: &mut dyn RngCore) -> u64 {
        let draw: f64 = rng.gen_range(0.0..1.0);
        if draw < self.data_loss_probability {
            let loss = ((1.0 - self.data_loss_percentage) * data_size as f64).floor();
            (loss.max(0.0) as u64).min(data_size)
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    #[test]
    fn test_zero_probability_never_loses() {
        let protocol = ConnectionProtocol::new(0.5, 0.0, 0);
        let mut rng = Pcg64::seed_from_u64(7);
        for _ in 0..100 {
            assert_eq!(protocol.calculate_data_loss(100, &mut rng), 0);
        }
    }

    #[test]
    fn test_certain_loss_amount() {
        let protocol = ConnectionProtocol::new(0.75, 1.0, 0);
        let mut rng = Pcg64::seed_from_u64(7);
        assert_eq!(protocol.calculate_data_loss(10, &mut rng), 2);
        assert_eq!(protocol.calculate_data_loss(0, &mut rng), 0);
    }

    #[test]
    fn test_seeded_draws_are_reproducible() {
        let protocol = ConnectionProtocol::new(0.0, 0.5, 0);
        let mut a = Pcg64::seed_from_u64(42);
        let mut b = Pcg64::seed_from_u64(42);
        let first: Vec<u64> = (0..20).map(|_| protocol.calculate_data_loss(10, &mut a)).collect();
        let second: Vec<u64> = (0..20).map(|_| protocol.calculate_data_loss(10, &mut b)).collect();
        assert_eq!(first, second);
    }
}
