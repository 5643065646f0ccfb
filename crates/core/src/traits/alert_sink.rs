use async_trait::async_trait;

use crate::models::Alert;
use crate::CapacityResult;

/// 告警投递通道
///
/// 核心层不直接发送邮件、短信或Webhook，告警统一推送给外部注册的通道。
/// 投递失败只记录日志，不会影响告警评估。
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, alert: &Alert) -> CapacityResult<()>;

    fn name(&self) -> &str;
}
