// stepflow/src/cluster/mod.rs

//! Running one pipeline across a master and several slave nodes: the
//! cluster schema, the splitter, the socket steps joining the parts and the
//! executor hand-off.

pub mod executor;
pub mod schema;
pub mod socket;
pub mod splitter;
pub mod wire;

pub use executor::{run_cluster, ClusterRunResult, LocalClusterExecutor, NodeOutcome, RemoteExecutor};
pub use schema::{ClusterSchema, NodeIdentity};
pub use socket::{SocketReaderStep, SocketWriterStep, SOCKET_READER, SOCKET_WRITER};
pub use splitter::{ClusterSplitter, NodeGraph, SocketPair, SplitResult};
pub use wire::WireMessage;
