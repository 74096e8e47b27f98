// ==========================================
// 血液申请履约引擎 - 维护工具入口
// ==========================================
// 用法: blood-fulfillment [db_path] [--sweep]
// - 打开/初始化数据库并写入参考数据
// - 输出当前履约策略
// - --sweep: 以当前时间执行过期巡检
// ==========================================

use std::sync::Arc;

use anyhow::Context;
use blood_fulfillment::app::{get_default_db_path, AppState};
use blood_fulfillment::engine::{NoOpDispatcher, StaticIdentityProvider};

fn main() -> anyhow::Result<()> {
    blood_fulfillment::logging::init();

    let mut db_path: Option<String> = None;
    let mut sweep = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--sweep" => sweep = true,
            flag if flag.starts_with("--") => anyhow::bail!("未知参数: {}", flag),
            path => db_path = Some(path.to_string()),
        }
    }
    let db_path = db_path.unwrap_or_else(get_default_db_path);

    tracing::info!("==================================================");
    tracing::info!("{} v{}", blood_fulfillment::APP_NAME, blood_fulfillment::VERSION);
    tracing::info!("使用数据库: {}", db_path);
    tracing::info!("==================================================");

    let state = AppState::new(
        db_path,
        Arc::new(StaticIdentityProvider::new()),
        Arc::new(NoOpDispatcher),
    )
    .map_err(anyhow::Error::msg)?;

    let policy = state.config_api.get_policy().context("读取履约策略失败")?;
    tracing::info!(
        platelets_allow_rh_mismatch = policy.platelets_allow_rh_mismatch,
        donation_cooldown_days = policy.donation_cooldown_days,
        approve_timeout_ms = policy.approve_timeout_ms,
        allocation_strategy = %policy.allocation_strategy,
        "当前履约策略"
    );

    if sweep {
        let result = state
            .inventory_api
            .sweep_expired(None)
            .context("过期巡检失败")?;
        tracing::info!(expired = result.expired_count, "过期巡检完成");
        println!("expired units: {}", result.expired_count);
    }

    Ok(())
}
