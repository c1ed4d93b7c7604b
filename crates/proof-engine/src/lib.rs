//! # Proof Engine
//!
//! The proof executor for the anonymous identity backend. Owns the
//! circuit artifacts (witness generator wasm, proving key, verifying
//! key) and turns an Aadhaar QR payload plus a caller-chosen signal
//! into a Groth16-shaped identity proof.
//!
//! The executor is deliberately opaque to the orchestration layer: a
//! single synchronous, CPU-bound `compute` call with no cancellation
//! hook. Callers that need responsiveness must run it on a dedicated
//! worker context.
//!
//! ```text
//!   ProofInput { qr_data, signal }
//!        │
//!        ▼
//!   ProofExecutor::compute  ──►  AnonAadhaarProof { nullifier,
//!        (minutes of CPU)         revealed fields, groth16Proof }
//! ```

mod executor;
mod proof;

pub use executor::{
    ArtifactPaths, ExecutorError, Groth16Executor, MockExecutor, ProofExecutor,
    NULLIFIER_SEED, REQUIRED_ARTIFACTS,
};
pub use proof::{AnonAadhaarProof, Groth16Proof, ProofInput};
