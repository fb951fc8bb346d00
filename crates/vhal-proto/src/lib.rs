/// Generated gRPC protocol definitions for the vehicle proxy.
///
/// This crate provides the protocol buffer definitions and generated code
/// for communication between the vehicle proxy server and its clients,
/// plus the codec between wire messages and the in-process property model.
pub mod vhal {
    pub mod v1 {
        tonic::include_proto!("vhal.v1");
    }
}

pub mod convert;

// Re-export commonly used types for convenience
pub use vhal::v1::*;
