//! Proof input and output types.
//!
//! Wire shapes follow the anon-aadhaar proof format: camelCase keys,
//! all field elements as decimal strings.

use serde::{Deserialize, Serialize};

/// Immutable payload for one proof computation. Opaque to the
/// orchestration layer; only the executor interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofInput {
    /// Scanned Aadhaar secure QR payload (big decimal string).
    pub qr_data: String,
    /// Caller-chosen signal bound into the proof.
    pub signal: String,
}

/// Groth16 proof points over BN254, in snarkjs layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Groth16Proof {
    pub pi_a: [String; 3],
    pub pi_b: [[String; 2]; 3],
    pub pi_c: [String; 3],
    pub protocol: String,
    pub curve: String,
}

/// A completed identity proof with its revealed fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonAadhaarProof {
    /// Hash of the UIDAI signing pubkey the QR was verified against.
    pub pubkey_hash: String,
    /// QR signing timestamp, as a field element.
    pub timestamp: String,
    pub nullifier_seed: String,
    pub nullifier: String,
    /// Hash binding the caller's signal into the proof.
    pub signal_hash: String,
    // Revealed identity fields
    pub age_above18: String,
    pub gender: String,
    pub pincode: String,
    pub state: String,
    pub groth16_proof: Groth16Proof,
}
