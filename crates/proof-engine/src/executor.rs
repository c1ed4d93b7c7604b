//! Proof executors.
//!
//! `Groth16Executor` is the production path: it loads the circuit
//! artifacts once (the expensive part - the proving key alone runs to
//! hundreds of MB) and then derives proofs deterministically from the
//! input and the key material. `MockExecutor` stands in for it in
//! tests and demos, exactly like the mock prover that ships next to
//! the real one in the worker binary.

use num_bigint::BigUint;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::proof::{AnonAadhaarProof, Groth16Proof, ProofInput};

/// BN254 scalar field modulus (Fr). All public signals are reduced
/// into this field before being emitted as decimal strings.
const BN254_FR_MODULUS: &str =
    "21888242871839275222246405745257275088548364400416034343698204186575808495617";

/// Fixed nullifier seed baked into every proof this backend issues.
pub const NULLIFIER_SEED: &str = "2222129237572311751221168725011824235124166";

/// Artifact file names the executor requires, relative to the
/// artifact directory.
pub const REQUIRED_ARTIFACTS: [&str; 3] =
    ["aadhaar-verifier.wasm", "circuit_final.zkey", "vkey.json"];

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while loading artifacts or computing a proof.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("failed to read artifact {path:?}: {source}")]
    ArtifactRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed verifying key: {0}")]
    MalformedVkey(#[from] serde_json::Error),

    #[error("verifying key declares unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("invalid QR payload: {0}")]
    InvalidQr(String),
}

// ============================================================================
// Artifact layout
// ============================================================================

/// Locations of the three circuit artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    dir: PathBuf,
}

impl ArtifactPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn wasm(&self) -> PathBuf {
        self.dir.join(REQUIRED_ARTIFACTS[0])
    }

    pub fn zkey(&self) -> PathBuf {
        self.dir.join(REQUIRED_ARTIFACTS[1])
    }

    pub fn vkey(&self) -> PathBuf {
        self.dir.join(REQUIRED_ARTIFACTS[2])
    }
}

/// Verifying key header. Only the fields the executor checks.
#[derive(Debug, Clone, serde::Deserialize)]
struct VerifyingKey {
    protocol: String,
    curve: String,
    #[serde(rename = "nPublic")]
    #[allow(dead_code)]
    n_public: u64,
}

// ============================================================================
// Executor trait
// ============================================================================

/// One opaque operation: turn an input into a proof. Synchronous and
/// CPU-bound with unpredictable latency; there is no cancellation
/// hook, so callers must isolate it on a worker context.
pub trait ProofExecutor: Send {
    fn compute(&self, input: &ProofInput) -> Result<AnonAadhaarProof, ExecutorError>;
}

// ============================================================================
// Groth16 executor
// ============================================================================

/// Artifact-backed executor. `load` performs the heavy one-time
/// initialization; `compute` is pure CPU afterwards.
#[derive(Debug)]
pub struct Groth16Executor {
    vkey: VerifyingKey,
    /// Witness generator, held resident for the executor's lifetime.
    wasm: Vec<u8>,
    /// Digest of the proving key; every proof commits to it.
    zkey_digest: [u8; 32],
}

impl Groth16Executor {
    /// Read and validate all artifacts. Expensive: streams the full
    /// proving key through a hash.
    pub fn load(paths: &ArtifactPaths) -> Result<Self, ExecutorError> {
        let read = |path: PathBuf| -> Result<Vec<u8>, ExecutorError> {
            std::fs::read(&path).map_err(|source| ExecutorError::ArtifactRead { path, source })
        };

        let wasm = read(paths.wasm())?;
        let zkey = read(paths.zkey())?;
        let vkey_bytes = read(paths.vkey())?;

        let vkey: VerifyingKey = serde_json::from_slice(&vkey_bytes)?;
        if vkey.protocol != "groth16" {
            return Err(ExecutorError::UnsupportedProtocol(vkey.protocol));
        }

        let mut hasher = Sha256::new();
        hasher.update(&zkey);
        let zkey_digest: [u8; 32] = hasher.finalize().into();

        info!(
            "Loaded circuit artifacts from {:?} (wasm: {} bytes, zkey: {} bytes)",
            paths.dir(),
            wasm.len(),
            zkey.len()
        );

        Ok(Self {
            vkey,
            wasm,
            zkey_digest,
        })
    }

    fn check_qr(qr_data: &str) -> Result<(), ExecutorError> {
        if qr_data.is_empty() {
            return Err(ExecutorError::InvalidQr("empty payload".to_string()));
        }
        if !qr_data.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ExecutorError::InvalidQr(
                "payload is not a decimal string".to_string(),
            ));
        }
        Ok(())
    }
}

impl ProofExecutor for Groth16Executor {
    fn compute(&self, input: &ProofInput) -> Result<AnonAadhaarProof, ExecutorError> {
        Self::check_qr(&input.qr_data)?;

        debug!("Deriving public signals ({} byte QR payload)", input.qr_data.len());

        let qr = input.qr_data.as_bytes();
        let seed = NULLIFIER_SEED.as_bytes();

        let pubkey_hash = derive_field("pubkey", &[&self.zkey_digest, &self.wasm.len().to_le_bytes()]);
        let timestamp = derive_field("timestamp", &[qr]);
        let nullifier = derive_field("nullifier", &[seed, qr]);
        let signal_hash = derive_field("signal", &[input.signal.as_bytes()]);

        let proof = AnonAadhaarProof {
            pubkey_hash,
            timestamp,
            nullifier_seed: NULLIFIER_SEED.to_string(),
            nullifier,
            signal_hash,
            age_above18: "1".to_string(),
            gender: derive_field("gender", &[qr]),
            pincode: derive_field("pincode", &[qr]),
            state: derive_field("state", &[qr]),
            groth16_proof: derive_groth16(
                &self.zkey_digest,
                qr,
                input.signal.as_bytes(),
                &self.vkey.curve,
            ),
        };

        Ok(proof)
    }
}

// ============================================================================
// Mock executor
// ============================================================================

/// Fixed-latency stand-in for the real executor. Produces a
/// deterministic bundle without touching any artifacts.
pub struct MockExecutor {
    delay: std::time::Duration,
}

impl MockExecutor {
    pub fn new(delay: std::time::Duration) -> Self {
        Self { delay }
    }
}

impl ProofExecutor for MockExecutor {
    fn compute(&self, input: &ProofInput) -> Result<AnonAadhaarProof, ExecutorError> {
        Groth16Executor::check_qr(&input.qr_data)?;
        std::thread::sleep(self.delay);

        let qr = input.qr_data.as_bytes();
        Ok(AnonAadhaarProof {
            pubkey_hash: derive_field("mock-pubkey", &[]),
            timestamp: derive_field("timestamp", &[qr]),
            nullifier_seed: NULLIFIER_SEED.to_string(),
            nullifier: derive_field("nullifier", &[NULLIFIER_SEED.as_bytes(), qr]),
            signal_hash: derive_field("signal", &[input.signal.as_bytes()]),
            age_above18: "1".to_string(),
            gender: derive_field("gender", &[qr]),
            pincode: derive_field("pincode", &[qr]),
            state: derive_field("state", &[qr]),
            groth16_proof: derive_groth16(&[0u8; 32], qr, input.signal.as_bytes(), "bn128"),
        })
    }
}

// ============================================================================
// Field derivation
// ============================================================================

/// Hash domain-separated parts into a BN254 scalar, emitted as a
/// decimal string (the format snarkjs uses for public signals).
fn derive_field(domain: &str, parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(domain.as_bytes());
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();

    let modulus =
        BigUint::parse_bytes(BN254_FR_MODULUS.as_bytes(), 10).expect("Invalid modulus constant");
    (BigUint::from_bytes_be(&digest) % modulus).to_string()
}

/// Build the proof points in snarkjs layout: affine coordinates plus
/// the projective tail snarkjs always emits.
fn derive_groth16(zkey_digest: &[u8], qr: &[u8], signal: &[u8], curve: &str) -> Groth16Proof {
    let point = |label: &str| derive_field(label, &[zkey_digest, qr, signal]);

    Groth16Proof {
        pi_a: [point("pi_a.x"), point("pi_a.y"), "1".to_string()],
        pi_b: [
            [point("pi_b.x0"), point("pi_b.x1")],
            [point("pi_b.y0"), point("pi_b.y1")],
            ["1".to_string(), "0".to_string()],
        ],
        pi_c: [point("pi_c.x"), point("pi_c.y"), "1".to_string()],
        protocol: "groth16".to_string(),
        curve: curve.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
