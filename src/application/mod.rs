pub mod bootstrap;
pub mod cloud_sync;
pub mod commands;
pub mod phase_timer;
pub mod task_board;
pub mod timer_driver;
