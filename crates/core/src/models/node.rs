use serde::{Deserialize, Serialize};

/// 数据库节点角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Primary,
    Replica,
}

/// 节点健康状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeHealth {
    Healthy,
    Unhealthy,
}

/// 查询类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Read,
    Write,
}

impl std::str::FromStr for QueryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "read" => Ok(QueryKind::Read),
            "write" => Ok(QueryKind::Write),
            other => Err(format!("无效的查询类型: {other}")),
        }
    }
}

/// 只读节点选择策略
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    #[default]
    RoundRobin,
    LeastConnections,
    Weighted,
}

/// 节点身份信息，传递给查询执行器和健康探测器
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    pub endpoint: String,
    pub role: NodeRole,
    pub weight: u32,
}

impl Node {
    pub fn is_primary(&self) -> bool {
        self.role == NodeRole::Primary
    }
}

/// 节点状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: String,
    pub endpoint: String,
    pub role: NodeRole,
    pub weight: u32,
    pub health: NodeHealth,
    pub active_connections: usize,
    pub avg_latency_ms: f64,
    pub total_queries: u64,
    pub failed_queries: u64,
    pub consecutive_failures: u32,
}

/// 查询结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub node_id: String,
    pub value: serde_json::Value,
    pub latency_ms: f64,
    /// 读请求因没有健康只读节点而回退到主节点
    pub degraded: bool,
}
