pub mod node_state;
pub mod probe;
pub mod router;
pub mod strategies;

pub use node_state::{ConnectionGuard, HealthTransition, NodeState};
pub use probe::TcpNodeProbe;
pub use router::{NodeHealthEvent, NodeRouter, NodeSelection};
pub use strategies::{
    strategy_for, LeastConnectionsStrategy, NodeSelectionStrategy, RoundRobinStrategy,
    WeightedStrategy,
};
