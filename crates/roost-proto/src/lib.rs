// Re-export compiled gRPC protos.
//
// We keep all `.proto` files within this crate so other crates can depend on a
// single Rust type source.

pub mod roost {
    pub mod host {
        pub mod v1 {
            tonic::include_proto!("roost.host.v1");
        }
    }
}

pub use roost::host::v1 as host_v1;
