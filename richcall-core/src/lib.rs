//! # richcall-core
//!
//! Core library for rich-call sharing signaling.
//!
//! This crate provides the protocol data types used by the engine: SDP
//! offer/answer parsing and codec negotiation, dialog bookkeeping, the
//! session state graph, capability records and the error taxonomy.

pub mod capability;
pub mod codec;
pub mod dialog;
pub mod error;
pub mod message;
pub mod sdp;
pub mod state;

pub use capability::Capabilities;
pub use codec::{Codec, FrameSize};
pub use dialog::DialogPath;
pub use error::{ReasonCode, RichcallError, RichcallResult, SharingErrorCode, TerminationReason};
pub use message::{Content, InviteRequest, InviteResponse, Refresher, SignalingResponse, StatusCode};
pub use sdp::{MediaDescription, MediaDirection, ParsedSdp};
pub use state::{Direction, ServiceType, SessionState};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
