use async_trait::async_trait;

use crate::models::Node;
use crate::CapacityResult;

/// 节点健康探测器
///
/// 探测调用由路由器包裹在超时内执行，实现方无需自行处理超时。
#[async_trait]
pub trait NodeProbe: Send + Sync {
    async fn probe(&self, node: &Node) -> CapacityResult<()>;
}
