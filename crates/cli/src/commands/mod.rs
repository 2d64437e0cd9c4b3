pub mod config_cmd;
pub mod interval;
pub mod simulate;
