//! Generated protobuf modules
//!
//! build.rs compiles every `.proto` under `protos/`; prost emits one file per
//! package (`meshtastic.rs`), included here.

pub mod meshtastic_generated {
    //! Generated Meshtastic wire types: `ServiceEnvelope`, `MeshPacket`, `Data`,
    //! `PortNum` and the port payloads the bridge reads.
    #[allow(dead_code, unused_imports, unused_variables, unused_mut, unused_macros)]
    #[allow(clippy::all)]
    // Generated docs can contain tag-like text; relax strict rustdoc HTML checks here
    #[allow(rustdoc::invalid_html_tags)]
    mod inner {
        include!(concat!(env!("OUT_DIR"), "/meshtastic.rs"));
    }
    pub use inner::*;
}
