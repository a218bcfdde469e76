use clap::Parser;

/// 多账号并发抢票客户端
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<String>,

    /// 账号文件路径
    #[arg(short, long)]
    pub accounts: Option<String>,

    /// 代理列表文件路径
    #[arg(short, long)]
    pub proxies: Option<String>,

    /// 结果审计日志路径（覆盖配置文件）
    #[arg(long)]
    pub audit_log: Option<String>,
}
