//! # uavsim
//!
//! センサーフィールド上を飛行するUAV群によるデータ収集・転送の
//! 離散時間シミュレーターです。強化学習エージェントなどの外部コントローラーは
//! [`simulation::Environment`] の `step` / `reset` / `has_ended` / `get_in_range` と
//! UAVへのタスク割り当てを通じてシミュレーションを操作します。

pub mod controller;
pub mod logging;
pub mod models;
pub mod scenario;
pub mod simulation;
