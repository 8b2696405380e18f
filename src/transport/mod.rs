//! The bundled reference transport: a gRPC `RpcProvider`/server pair built on `tonic`/`prost`,
//! wired up the way this lineage's client binaries wire up their own services.

pub mod tonic_provider;

pub mod proto {
    tonic::include_proto!("raftcore");
}

pub use tonic_provider::{RaftGrpcService, TonicRpcProvider};
