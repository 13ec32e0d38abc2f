pub mod balancer;
pub mod cluster;
pub mod common;
pub mod dispatch;
pub mod server;

pub use balancer::LoadBalancer;
pub use dispatch::Decision;
