//! gridpact-client — outbound calls made by the marketplace core.
//!
//! Two kinds of collaborator live here:
//!
//! - The machine-operator HTTP contract (`MachineClient`), with a real
//!   reqwest-backed implementation. Operators expose `/v1/activate`,
//!   `/v1/deactivate`, and `/v1/benchmark` on their activation endpoint.
//! - Interface-only collaborators owned by other parts of the platform:
//!   the on-chain registry (`ChainRegistry`), the proof-of-cloud verifier
//!   (`CloudVerifier`), and the workload scheduling layer
//!   (`PlacementSync`).
//!
//! Every outbound call carries an explicit deadline; exceeding it surfaces
//! as `ClientError::Timeout`, never an indefinite hang.

pub mod collaborators;
pub mod error;
pub mod machine;

pub use collaborators::{ChainRegistry, CloudVerifier, NullPlacementSync, PlacementSync};
pub use error::{ClientError, ClientResult};
pub use machine::{ActivateRequest, ActivateResponse, BenchmarkRequest, HttpMachineClient, MachineClient};
