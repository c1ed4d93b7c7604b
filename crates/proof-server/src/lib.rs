//! # Proof Server
//!
//! Asynchronous job orchestration around the proof engine.
//!
//! ```text
//!   POST /api/proof/generate ──► Orchestrator ──► Artifact Gate
//!                                    │
//!                        Job Registry entry (pending)
//!                                    │
//!                   Worker Channel (OS thread + message passing)
//!                                    │
//!          race { worker event, deadline } ──► terminal state
//!                                    │
//!   GET /api/proof/status/:job_id ◄──┘  (poll until terminal)
//! ```
//!
//! Proof generation is CPU-bound and can run for minutes; it never
//! touches the request-handling runtime. Workers report outcomes by
//! job id over a channel, the orchestrator is the only writer of
//! registry state, and the first terminal event per job wins.

pub mod api;
pub mod artifacts;
pub mod orchestrator;
pub mod registry;
pub mod worker;
