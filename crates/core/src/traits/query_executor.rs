use async_trait::async_trait;

use crate::models::Node;
use crate::CapacityResult;

/// 查询执行器
///
/// 路由器只负责选择节点，查询本身由调用方提供的执行器在选中的节点上执行，
/// 路由器从不解析查询语句。
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        node: &Node,
        query: &str,
        params: &[serde_json::Value],
    ) -> CapacityResult<serde_json::Value>;
}
