use std::sync::Arc;

use clap::Parser;
use slot_rush::claim::HttpClaimApi;
use slot_rush::model::account::load_accounts;
use slot_rush::model::arg::Args;
use slot_rush::model::config::Config;
use slot_rush::pool::route::load_routes;
use slot_rush::pool::ProxyHealthPool;
use slot_rush::race::RaceOrchestrator;
use slot_rush::recorder::JsonlRecorder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config_path = args
        .config
        .unwrap_or_else(|| Config::default_config_path().to_string());
    let mut config = Config::load(&config_path)?;
    config.override_from_env();
    if let Some(path) = args.audit_log {
        config.audit_log = Some(path);
    }
    config.validate()?;

    let accounts_path = args.accounts.unwrap_or_else(|| "accounts.json".to_string());
    let accounts = load_accounts(&accounts_path)?;
    if accounts.is_empty() {
        anyhow::bail!("没有可用账号: {}", accounts_path);
    }
    tracing::info!("已加载 {} 个账号", accounts.len());

    let pool = match &args.proxies {
        Some(path) => {
            let routes = load_routes(path, config.proxy_max_failures)?;
            if routes.is_empty() {
                anyhow::bail!("代理列表为空: {}", path);
            }
            let lifetime = config.proxy_lifetime();
            tracing::info!(
                "已加载 {} 条代理线路，策略 {}，有效期 {:?}",
                routes.len(),
                config.proxy_strategy.as_str(),
                lifetime
            );
            Some(Arc::new(ProxyHealthPool::new(
                routes,
                config.proxy_strategy,
                lifetime,
            )))
        }
        None => None,
    };

    let api = Arc::new(HttpClaimApi::new(&config, pool.clone())?);
    let mut orchestrator = RaceOrchestrator::new(api, &config);
    if let Some(pool) = pool {
        orchestrator = orchestrator.with_pool(pool);
    }
    if let Some(path) = &config.audit_log {
        orchestrator = orchestrator.with_recorder(Arc::new(JsonlRecorder::open(path)?));
    }
    let orchestrator = Arc::new(orchestrator);

    let stopper = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop();
        }
    });

    let stats = orchestrator.run(accounts).await;
    tracing::info!("{}", stats);
    if stats.completed() < stats.total {
        tracing::warn!("{} 个账号未完成", stats.total - stats.completed());
    }
    Ok(())
}
