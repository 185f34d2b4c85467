mod gateway;

pub use gateway::HttpGateway;
