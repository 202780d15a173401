pub mod connections;
pub mod daemon;
pub mod market_param_updater;
pub mod price_updater;
pub mod sub_task_runner;

pub use connections::{all_paginated_market_params, DaemonConnector, HttpDaemonConnector};
pub use daemon::{DaemonState, PriceDaemon};
pub use sub_task_runner::{SubTaskRunner, SubTaskRunnerImpl};
