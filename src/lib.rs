// Cellbot runtime: operator commands over interchangeable uplinks, robot
// actions over interchangeable wire framings, and obstacle evasion.

pub mod capability;
pub mod config;
pub mod dispatch;
pub mod downlink;
pub mod host;
pub mod messages;
pub mod protocol;
pub mod remote;
pub mod robot;
pub mod runtime;
pub mod sensor_stream;
pub mod telemetry;
pub mod uplink;
