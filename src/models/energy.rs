use serde::{Deserialize, Serialize};

/// 無線エネルギー消費モデル（2波モデル）
///
/// 送信距離がしきい値未満なら自由空間モデル（距離の2乗）、
/// しきい値以上ならマルチパスモデル（距離の4乗）で増幅器のエネルギーを計算します。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyModel {
    /// 送受信回路の単位あたり消費エネルギー
    pub e_elec: f64,
    pub distance_threshold: f64,
    pub power_amplifier_for_fs: f64,
    pub power_amplifier_for_amp: f64,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1e-4
}

impl Default for EnergyModel {
    fn default() -> Self {
        Self {
            e_elec: 50.0,
            distance_threshold: 1.0,
            power_amplifier_for_fs: 1.0,
            power_amplifier_for_amp: 1.0,
            scale: default_scale(),
        }
    }
}

impl EnergyModel {
    /// `size` 単位を `distance` だけ離れた相手に送るときの消費エネルギー（送信 + 受信）
    pub fn get_data_transition_energy(&self, size: u64, distance: f64) -> f64 {
        let k = size as f64;
        let e_t = if distance < self.distance_threshold {
            k * (self.e_elec + self.power_amplifier_for_fs * distance.powi(2))
        } else {
            k * (self.e_elec + self.power_amplifier_for_amp * distance.powi(4))
        };
        let e_r = k * self.e_elec;
        (e_t + e_r) * self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> EnergyModel {
        EnergyModel {
            e_elec: 2.0,
            distance_threshold: 10.0,
            power_amplifier_for_fs: 0.5,
            power_amplifier_for_amp: 0.01,
            scale: 1.0,
        }
    }

    #[test]
    fn test_free_space_regime() {
        // 3 * (2 + 0.5 * 16) + 3 * 2
        assert_eq!(model().get_data_transition_energy(3, 4.0), 36.0);
    }

    #[test]
    fn test_multipath_regime() {
        // 1 * (2 + 0.01 * 10^4) + 1 * 2
        let energy = model().get_data_transition_energy(1, 10.0);
        assert!((energy - 104.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_size_costs_nothing() {
        assert_eq!(model().get_data_transition_energy(0, 100.0), 0.0);
    }
}
