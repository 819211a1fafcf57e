//! Route handlers shared by the `server` and `main` binaries: the
//! thin axum contract surface over `retrieval`/`ingestion`/`common`. The
//! `worker` binary does not need any of this, only `ingestion`.
pub mod app;
