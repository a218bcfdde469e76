//! 应用层数据模型
//!
//! - `arg`: 命令行参数
//! - `config`: 应用配置
//! - `account`: 账号

pub mod account;
pub mod arg;
pub mod config;
