use async_trait::async_trait;
use capacity_core::models::Node;
use capacity_core::traits::NodeProbe;
use capacity_core::{CapacityError, CapacityResult};
use tokio::net::TcpStream;
use tracing::debug;

/// 通过建立TCP连接判断节点是否存活
///
/// 超时由路由器统一控制。
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpNodeProbe;

impl TcpNodeProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NodeProbe for TcpNodeProbe {
    async fn probe(&self, node: &Node) -> CapacityResult<()> {
        let stream = TcpStream::connect(node.endpoint.as_str())
            .await
            .map_err(|e| {
                CapacityError::Internal(format!(
                    "无法连接节点 {} ({}): {}",
                    node.id, node.endpoint, e
                ))
            })?;
        debug!(node_id = %node.id, peer = ?stream.peer_addr().ok(), "Node probe succeeded");
        Ok(())
    }
}
