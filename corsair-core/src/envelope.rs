//! Multipart message envelopes.
//!
//! The routing pattern runs on a small set of frame layouts. Inbound frames
//! are parsed into typed views here so the broker and worker loops never
//! index raw frame vectors; outbound messages are composed by the helpers at
//! the bottom.
//!
//! Layouts (ROUTER perspective):
//! - frontend request:  `[client_id, empty, payload]`
//! - backend check-in:  `[worker_id, empty, READY]`
//! - backend reply:     `[worker_id, empty, client_id, empty, result]`

use bytes::Bytes;
use thiserror::Error;

use crate::port::READY_SENTINEL;

/// Why an inbound message was rejected. Rejected messages are dropped and
/// logged, never propagated.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("expected {expected} frames, got {got}")]
    FrameCount { expected: usize, got: usize },

    #[error("delimiter frame {index} is not empty")]
    BadDelimiter { index: usize },
}

/// A request as seen by the frontend ROUTER or by a worker's socket:
/// `[client_id, empty, payload]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEnvelope {
    pub client: Bytes,
    pub payload: Bytes,
}

impl RequestEnvelope {
    /// Parse a frontend message. Strict: exactly three frames with an empty
    /// delimiter in the middle.
    pub fn parse(frames: &[Bytes]) -> Result<Self, EnvelopeError> {
        if frames.len() != 3 {
            return Err(EnvelopeError::FrameCount {
                expected: 3,
                got: frames.len(),
            });
        }
        if !frames[1].is_empty() {
            return Err(EnvelopeError::BadDelimiter { index: 1 });
        }
        Ok(Self {
            client: frames[0].clone(),
            payload: frames[2].clone(),
        })
    }
}

/// A message arriving on the backend ROUTER.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    /// First check-in after a worker connects
    Ready { worker: Bytes },
    /// A completed request on its way back to the client
    Reply {
        worker: Bytes,
        client: Bytes,
        payload: Bytes,
    },
}

impl BackendMessage {
    /// Parse a backend message. Frame 0 is always the worker identity; frame
    /// 2 disambiguates READY from a reply envelope.
    pub fn parse(frames: &[Bytes]) -> Result<Self, EnvelopeError> {
        if frames.len() < 3 {
            return Err(EnvelopeError::FrameCount {
                expected: 3,
                got: frames.len(),
            });
        }
        if !frames[1].is_empty() {
            return Err(EnvelopeError::BadDelimiter { index: 1 });
        }
        if frames[2].as_ref() == READY_SENTINEL {
            if frames.len() != 3 {
                return Err(EnvelopeError::FrameCount {
                    expected: 3,
                    got: frames.len(),
                });
            }
            return Ok(Self::Ready {
                worker: frames[0].clone(),
            });
        }
        if frames.len() != 5 {
            return Err(EnvelopeError::FrameCount {
                expected: 5,
                got: frames.len(),
            });
        }
        if !frames[3].is_empty() {
            return Err(EnvelopeError::BadDelimiter { index: 3 });
        }
        Ok(Self::Reply {
            worker: frames[0].clone(),
            client: frames[2].clone(),
            payload: frames[4].clone(),
        })
    }
}

/// Compose the broker -> backend dispatch:
/// `[worker_id, empty, client_id, empty, payload]`.
#[must_use]
pub fn dispatch_frames(worker: &Bytes, client: &Bytes, payload: &Bytes) -> Vec<Bytes> {
    vec![
        worker.clone(),
        Bytes::new(),
        client.clone(),
        Bytes::new(),
        payload.clone(),
    ]
}

/// Compose a reply envelope `[client_id, empty, payload]`, used both by the
/// broker (frontend send) and by workers (reply send).
#[must_use]
pub fn reply_frames(client: &Bytes, payload: &Bytes) -> Vec<Bytes> {
    vec![client.clone(), Bytes::new(), payload.clone()]
}
